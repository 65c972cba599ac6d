//! Identity of a peer store.

use crate::*;
use std::sync::Arc;

/// Schemes whose locations can be dialed directly.
const RESTFUL_SCHEMES: &[&str] = &["http", "https", "file"];

/// Schemes accepted by the protocol-checked constructors.
/// `mem` names an in-process store and is never resolvable.
const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file", "mem"];

/// Characters that separate hops and object ids in an access path.
const RESERVED: &[char] = &['!', '#'];

/// Identifies one peer store.
///
/// A PeerLocation is compared, ordered and hashed by its canonical string
/// only. The resolvability flag says whether the location can be dialed
/// directly, or whether it is an opaque identity that some other peer must
/// route to.
#[derive(Clone)]
pub struct PeerLocation {
    canonical: Arc<str>,
    resolvable: bool,
}

impl PeerLocation {
    /// Protocol-checked constructor. Only supported schemes are accepted.
    pub fn create(s: impl AsRef<str>) -> MeshResult<Self> {
        let s = s.as_ref();
        check_reserved(s)?;
        let url = url2::try_url2!("{}", s)
            .map_err(|e| MeshError::invalid_address(format!("{}: {}", s, e)))?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(MeshError::invalid_address(format!(
                "unsupported protocol '{}' in {}",
                url.scheme(),
                s
            )));
        }
        Ok(Self::from_url(&url))
    }

    /// Like [`PeerLocation::create`], but assumes `http://` when the string
    /// carries no scheme.
    pub fn guess(s: impl AsRef<str>) -> MeshResult<Self> {
        let s = s.as_ref().trim();
        if s.contains("://") {
            Self::create(s)
        } else {
            Self::create(format!("http://{}", s))
        }
    }

    /// Reconstruct from a previously emitted external form.
    /// No protocol check is performed; strings that are not urls become
    /// unresolvable opaque identities.
    pub fn from_external_form(s: impl AsRef<str>) -> MeshResult<Self> {
        let s = s.as_ref();
        check_reserved(s)?;
        if s.is_empty() {
            return Err(MeshError::invalid_address("empty peer location"));
        }
        match url2::try_url2!("{}", s) {
            Ok(url) => Ok(Self::from_url(&url)),
            Err(_) => Ok(Self {
                canonical: s.into(),
                resolvable: false,
            }),
        }
    }

    /// An opaque identity that cannot be dialed.
    ///
    /// The string is canonicalized the same way [`PeerLocation::from_external_form`]
    /// does it, so the external form always parses back to an equal location.
    pub fn new_unresolvable(s: impl AsRef<str>) -> MeshResult<Self> {
        let s = s.as_ref();
        check_reserved(s)?;
        if s.is_empty() {
            return Err(MeshError::invalid_address("empty peer location"));
        }
        let canonical = match url2::try_url2!("{}", s) {
            Ok(url) => Self::from_url(&url).canonical,
            Err(_) => s.into(),
        };
        Ok(Self {
            canonical,
            resolvable: false,
        })
    }

    fn from_url(url: &url2::Url2) -> Self {
        let mut canonical = url.as_str().to_string();
        // "http://host/" and "http://host" are the same store
        if url.path() == "/" && url.query().is_none() && canonical.ends_with('/') {
            canonical.pop();
        }
        Self {
            canonical: canonical.into(),
            resolvable: RESTFUL_SCHEMES.contains(&url.scheme()),
        }
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Same as [`PeerLocation::as_str`], for symmetry with the parser.
    pub fn to_external_form(&self) -> String {
        self.canonical.to_string()
    }

    /// Can this location be dialed directly?
    pub fn is_resolvable(&self) -> bool {
        self.resolvable
    }

    /// The transport-specific form of this location.
    pub fn to_url(&self) -> MeshResult<url2::Url2> {
        url2::try_url2!("{}", &*self.canonical)
            .map_err(|e| MeshError::invalid_address(format!("{}: {}", self.canonical, e)))
    }
}

fn check_reserved(s: &str) -> MeshResult<()> {
    if s.contains(RESERVED) {
        return Err(MeshError::invalid_address(format!(
            "peer location may not contain '!' or '#': {}",
            s
        )));
    }
    Ok(())
}

impl PartialEq for PeerLocation {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for PeerLocation {}

impl PartialOrd for PeerLocation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerLocation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl std::hash::Hash for PeerLocation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl std::fmt::Debug for PeerLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerLocation({})", self.canonical)
    }
}

impl std::fmt::Display for PeerLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl std::str::FromStr for PeerLocation {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external_form(s)
    }
}

impl serde::Serialize for PeerLocation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de> serde::Deserialize<'de> for PeerLocation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_external_form(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("http://example.com:80/", "http://example.com" ; "default http port")]
    #[test_case("https://Example.COM:443", "https://example.com" ; "default https port and case")]
    #[test_case("http://example.com:8080/", "http://example.com:8080" ; "explicit port kept")]
    #[test_case("http://example.com/a/b", "http://example.com/a/b" ; "path kept")]
    #[test_case("mem://peer-a", "mem://peer-a" ; "mem")]
    fn canonicalizes(input: &str, expected: &str) {
        assert_eq!(expected, PeerLocation::create(input).unwrap().as_str());
    }

    #[test]
    fn equality_is_by_canonical_form() {
        let a = PeerLocation::create("http://example.com:80").unwrap();
        let b = PeerLocation::guess("example.com").unwrap();
        assert_eq!(a, b);
        assert!(a.is_resolvable());
    }

    #[test]
    fn mem_is_not_resolvable() {
        let loc = PeerLocation::create("mem://peer-a").unwrap();
        assert!(!loc.is_resolvable());
    }

    #[test]
    fn rejects_unsupported_and_reserved() {
        assert!(PeerLocation::create("gopher://example.com").is_err());
        assert!(PeerLocation::create("http://example.com/a!b").is_err());
        assert!(PeerLocation::from_external_form("peer#1").is_err());
    }

    #[test]
    fn external_form_skips_protocol_check() {
        let loc = PeerLocation::from_external_form("gopher://example.com").unwrap();
        assert!(!loc.is_resolvable());
        let opaque = PeerLocation::from_external_form("some opaque peer").unwrap();
        assert_eq!("some opaque peer", opaque.as_str());
        assert!(opaque.to_url().is_err());
    }

    #[test_case("X:Y" ; "scheme case")]
    #[test_case("HTTP://Example.com/" ; "url shaped")]
    #[test_case("opaque-peer" ; "not a url")]
    fn unresolvable_parses_back_equal(raw: &str) {
        let loc = PeerLocation::new_unresolvable(raw).unwrap();
        assert!(!loc.is_resolvable());
        let back = PeerLocation::from_external_form(loc.to_external_form()).unwrap();
        assert_eq!(loc, back);
    }

    #[test]
    fn unresolvable_rejects_empty() {
        assert!(PeerLocation::new_unresolvable("").is_err());
    }

    #[test]
    fn serde_as_string() {
        let loc = PeerLocation::create("http://example.com").unwrap();
        let json = serde_json::to_string(&loc).unwrap();
        assert_eq!("\"http://example.com\"", json);
        let back: PeerLocation = serde_json::from_str(&json).unwrap();
        assert_eq!(loc, back);
    }
}
