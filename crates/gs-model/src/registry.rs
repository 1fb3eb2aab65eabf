//! `classTag → behavior constructor` table (spec §9), keyed additionally by
//! [`Kind`] since the same class tag string is not guaranteed unique across
//! kinds.

use std::collections::HashMap;
use std::sync::OnceLock;

use gs_tsid::Kind;

use crate::*;

pub type Constructor = fn() -> Box<dyn EntityBehavior>;

fn builtin() -> HashMap<(Kind, &'static str), Constructor> {
    let mut m: HashMap<(Kind, &'static str), Constructor> = HashMap::new();
    m.insert((Kind::Location, "location"), || Box::new(Location));
    m.insert((Kind::Group, "group"), || Box::new(Group));
    m.insert((Kind::Player, "player"), || Box::new(Player));
    m.insert((Kind::Bag, "bag"), || Box::new(Bag));
    m.insert((Kind::Item, "item"), || Box::new(Item));
    m.insert((Kind::DataContainer, "data_container"), || Box::new(DataContainer));
    m.insert((Kind::Quest, "quest"), || Box::new(Quest));
    m.insert((Kind::Geometry, "geometry"), || Box::new(Geometry));
    m
}

static REGISTRY: OnceLock<HashMap<(Kind, &'static str), Constructor>> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
#[error("no registered behavior for kind {kind:?} class_tag {class_tag:?}")]
pub struct UnknownClass {
    pub kind: Kind,
    pub class_tag: String,
}

/// Instantiate the behavior for `(kind, class_tag)`. Mirrors spec §4.2
/// `load`'s "instantiates the correct model (by TSID first letter + class
/// tag)".
pub fn instantiate(kind: Kind, class_tag: &str) -> Result<Box<dyn EntityBehavior>, UnknownClass> {
    let registry = REGISTRY.get_or_init(builtin);
    registry
        .iter()
        .find(|((k, tag), _)| *k == kind && *tag == class_tag)
        .map(|(_, ctor)| ctor())
        .ok_or_else(|| UnknownClass { kind, class_tag: class_tag.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiates_known_classes() {
        let behavior = instantiate(Kind::Location, "location").unwrap();
        assert_eq!(behavior.class_tag(), "location");
    }

    #[test]
    fn unknown_class_errors() {
        let err = instantiate(Kind::Location, "nope").unwrap_err();
        assert_eq!(err.class_tag, "nope");
    }
}
