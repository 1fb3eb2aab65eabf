//! The TSID: a short ASCII identifier shared by every persistent entity in the
//! cluster. The first byte encodes the entity's [`Kind`]; everything else is
//! opaque and only needs to compare, hash, and round-trip through storage.

use std::fmt;
use std::str::FromStr;

/// Maximum TSID length. TSIDs observed in the wild are well under this; it's
/// generous enough that we never need to fall back to a heap allocation.
pub const MAX_LEN: usize = 16;

/// The kind of entity a TSID names, encoded as its first character.
///
/// Only [`Kind::Location`], [`Kind::Group`], and [`Kind::Player`] are
/// top-level: they own a request queue and are reachable without going
/// through a root container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Location,
    Group,
    Player,
    Bag,
    Item,
    DataContainer,
    Quest,
    Geometry,
}

impl Kind {
    /// Decode a TSID's kind from its leading byte.
    pub fn from_prefix(c: u8) -> Option<Kind> {
        Some(match c {
            b'L' => Kind::Location,
            b'R' => Kind::Group,
            b'P' => Kind::Player,
            b'B' => Kind::Bag,
            b'I' => Kind::Item,
            b'D' => Kind::DataContainer,
            b'Q' => Kind::Quest,
            b'G' => Kind::Geometry,
            _ => return None,
        })
    }

    /// Whether entities of this kind own a request queue directly, rather
    /// than being reached through a root container (spec.md §3 "top-level").
    pub fn is_top_level(self) -> bool {
        matches!(self, Kind::Location | Kind::Group | Kind::Player)
    }

    pub fn prefix(self) -> u8 {
        match self {
            Kind::Location => b'L',
            Kind::Group => b'R',
            Kind::Player => b'P',
            Kind::Bag => b'B',
            Kind::Item => b'I',
            Kind::DataContainer => b'D',
            Kind::Quest => b'Q',
            Kind::Geometry => b'G',
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TsidError {
    #[error("tsid is empty")]
    Empty,
    #[error("tsid {0:?} exceeds max length {MAX_LEN}")]
    TooLong(String),
    #[error("tsid {0:?} is not ASCII")]
    NotAscii(String),
    #[error("tsid {0:?} has unrecognized kind prefix {1:?}")]
    UnknownKind(String, char),
}

/// A TSID, stored inline without heap allocation.
#[derive(Clone, Copy, Eq)]
pub struct Tsid {
    len: u8,
    buf: [u8; MAX_LEN],
}

impl Tsid {
    pub fn parse(s: &str) -> Result<Tsid, TsidError> {
        if s.is_empty() {
            return Err(TsidError::Empty);
        }
        if !s.is_ascii() {
            return Err(TsidError::NotAscii(s.to_string()));
        }
        if s.len() > MAX_LEN {
            return Err(TsidError::TooLong(s.to_string()));
        }
        if Kind::from_prefix(s.as_bytes()[0]).is_none() {
            return Err(TsidError::UnknownKind(s.to_string(), s.chars().next().unwrap()));
        }
        let mut buf = [0u8; MAX_LEN];
        buf[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Tsid { len: s.len() as u8, buf })
    }

    pub fn kind(&self) -> Kind {
        Kind::from_prefix(self.buf[0]).expect("validated at construction")
    }

    pub fn as_str(&self) -> &str {
        // Safety: constructed only from validated ASCII in `parse`.
        std::str::from_utf8(&self.buf[..self.len as usize]).expect("ascii invariant")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    pub fn is_top_level(&self) -> bool {
        self.kind().is_top_level()
    }
}

impl PartialEq for Tsid {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl std::hash::Hash for Tsid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl Ord for Tsid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for Tsid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Tsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tsid({})", self.as_str())
    }
}

impl fmt::Display for Tsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tsid {
    type Err = TsidError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tsid::parse(s)
    }
}

impl serde::Serialize for Tsid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for Tsid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Tsid::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_kinds() {
        assert_eq!(Tsid::parse("LabcHOST01").unwrap().kind(), Kind::Location);
        assert_eq!(Tsid::parse("Pxyz").unwrap().kind(), Kind::Player);
        assert_eq!(Tsid::parse("Ifoo").unwrap().kind(), Kind::Item);
    }

    #[test]
    fn top_level_kinds() {
        assert!(Tsid::parse("Lxx").unwrap().is_top_level());
        assert!(Tsid::parse("Rxx").unwrap().is_top_level());
        assert!(Tsid::parse("Pxx").unwrap().is_top_level());
        assert!(!Tsid::parse("Ixx").unwrap().is_top_level());
        assert!(!Tsid::parse("Bxx").unwrap().is_top_level());
        assert!(!Tsid::parse("Dxx").unwrap().is_top_level());
        assert!(!Tsid::parse("Qxx").unwrap().is_top_level());
        assert!(!Tsid::parse("Gxx").unwrap().is_top_level());
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(Tsid::parse(""), Err(TsidError::Empty));
        assert!(matches!(Tsid::parse("Zabc"), Err(TsidError::UnknownKind(_, 'Z'))));
        assert!(matches!(
            Tsid::parse("Labcdefghijklmnopqrstuvwxyz"),
            Err(TsidError::TooLong(_))
        ));
    }

    #[test]
    fn serde_round_trip() {
        let t = Tsid::parse("Pabc123").unwrap();
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"Pabc123\"");
        let back: Tsid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn equal_tsids_hash_equal() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let a = Tsid::parse("Pabc").unwrap();
        let b = Tsid::parse("Pabc").unwrap();
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }
}
