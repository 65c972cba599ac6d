//! Object identifiers.

use crate::*;

/// Stable identifier of a replicated object, the same on every peer.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    derive_more::Display,
    derive_more::From,
    derive_more::AsRef,
)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Construct from any string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The home object of a peer store, used when an access path carries no
    /// explicit object id.
    pub fn home_object_of(location: &PeerLocation) -> Self {
        Self(location.as_str().to_string())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Escaped form, safe to append after the `#` of an access path.
    pub fn to_external_form(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for c in self.0.chars() {
            match c {
                '%' => out.push_str("%25"),
                '#' => out.push_str("%23"),
                '!' => out.push_str("%21"),
                c => out.push(c),
            }
        }
        out
    }

    /// Inverse of [`ObjectId::to_external_form`]. Escape sequences other than
    /// the three this type emits are left alone.
    pub fn from_external_form(s: &str) -> Self {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(idx) = rest.find('%') {
            out.push_str(&rest[..idx]);
            let tail = &rest[idx..];
            let decoded = match tail.get(..3) {
                Some("%25") => Some('%'),
                Some("%23") => Some('#'),
                Some("%21") => Some('!'),
                _ => None,
            };
            match decoded {
                Some(c) => {
                    out.push(c);
                    rest = &tail[3..];
                }
                None => {
                    out.push('%');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        Self(out)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("plain")]
    #[test_case("with#hash")]
    #[test_case("bang!and%percent")]
    #[test_case("%23 already escaped looking")]
    #[test_case("trailing%")]
    fn escape_round_trip(raw: &str) {
        let id = ObjectId::from(raw);
        let ext = id.to_external_form();
        assert!(!ext.contains('#'));
        assert!(!ext.contains('!'));
        assert_eq!(id, ObjectId::from_external_form(&ext));
    }

    #[test]
    fn home_object_is_location() {
        let loc = PeerLocation::create("http://example.com").unwrap();
        assert_eq!("http://example.com", ObjectId::home_object_of(&loc).as_str());
    }
}
