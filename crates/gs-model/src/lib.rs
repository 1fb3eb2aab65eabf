//! The entity data model (spec §3) and the `EntityBehavior` interface that
//! stands in for scripted content (spec §9 design note: "Scripted content as
//! polymorphism" — in a typed port this becomes a trait per kind implemented
//! by a content-specific struct, plus a `classTag → behavior constructor`
//! table; no dynamic method dispatch by name outside tests).

pub mod registry;
pub mod timers;

use gs_tsid::{Kind, Tsid};
pub use timers::{TimerEntry, TimerOptions};

/// Fields whose name begins with `!`, and anything callers stash only for
/// the lifetime of a request, never round-trip through storage (spec §6).
pub const TRANSIENT_FIELD_PREFIX: char = '!';

/// Every persistent thing in the world, regardless of kind.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GameObject {
    pub tsid: Tsid,
    /// Immutable after creation; used with `tsid`'s kind byte to look up the
    /// entity's [`EntityBehavior`] in the [`registry`].
    pub class_tag: String,
    /// Unix seconds.
    pub created: u64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub stale: bool,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub timers: Vec<TimerEntry>,
}

impl GameObject {
    pub fn new(tsid: Tsid, class_tag: impl Into<String>, created: u64) -> Self {
        GameObject {
            tsid,
            class_tag: class_tag.into(),
            created,
            deleted: false,
            stale: false,
            fields: serde_json::Map::new(),
            timers: Vec::new(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.tsid.kind()
    }

    /// Fields beginning with `!` are scratch state and are stripped before
    /// persisting (spec §6).
    pub fn persistable_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        self.fields
            .iter()
            .filter(|(k, _)| !k.starts_with(TRANSIENT_FIELD_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Per-kind behavior hook-points the runtime calls into. Real game logic is
/// out of scope (spec §1 "content script evaluation ... opaque handlers");
/// these are the seams the runtime invokes them through.
pub trait EntityBehavior: Send + Sync {
    fn class_tag(&self) -> &'static str;

    /// Invoked synchronously when a brand-new entity is created (spec §3
    /// Lifecycle "Created").
    fn on_create(&self, _obj: &mut GameObject) {}

    /// Invoked synchronously on first load; the handler must not suspend
    /// (spec §3 Lifecycle "Loaded").
    fn on_load(&self, _obj: &mut GameObject) {}

    /// Invoked synchronously once per elapsed catch-up call a resumed
    /// timer owes (spec §9 "Serialization of timers/intervals"), and later
    /// for each on-time tick of a live timer. `args` is whatever was
    /// supplied to the original delayed/interval call.
    fn on_timer(&self, _obj: &mut GameObject, _fname: &str, _args: Option<&serde_json::Value>) {}
}

macro_rules! leaf_behavior {
    ($name:ident, $tag:literal) => {
        #[derive(Debug, Default)]
        pub struct $name;

        impl EntityBehavior for $name {
            fn class_tag(&self) -> &'static str {
                $tag
            }
        }
    };
}

leaf_behavior!(Location, "location");
leaf_behavior!(Group, "group");
leaf_behavior!(Player, "player");
leaf_behavior!(Bag, "bag");
leaf_behavior!(Item, "item");
leaf_behavior!(DataContainer, "data_container");
leaf_behavior!(Quest, "quest");
leaf_behavior!(Geometry, "geometry");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistable_fields_strips_transient() {
        let mut obj = GameObject::new(Tsid::parse("Labc").unwrap(), "location", 0);
        obj.fields.insert("name".into(), serde_json::json!("Spoke"));
        obj.fields.insert("!scratch".into(), serde_json::json!(1));

        let out = obj.persistable_fields();
        assert!(out.contains_key("name"));
        assert!(!out.contains_key("!scratch"));
    }
}
