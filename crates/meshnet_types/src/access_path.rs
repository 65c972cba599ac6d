//! Addressing a remote object through a chain of peers.
//!
//! External form: `hop1!hop2!...#<escaped object id>`, where each hop is a
//! peer location optionally followed by `?lid-scope=<enc>&lid-coherence=<enc>`
//! when a non-default scope or coherence applies to that hop.

use crate::*;
use url::form_urlencoded;

const SCOPE_KEY: &str = "lid-scope";
const COHERENCE_KEY: &str = "lid-coherence";

/// One hop of an [`ObjectAccessPath`]: a peer plus the scope and coherence
/// to use when replicating through it. `None` means the default.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PeerAccessSpec {
    /// Where to go.
    pub location: PeerLocation,
    /// How far to reach, default if `None`.
    pub scope: Option<ScopeSpec>,
    /// How eagerly to refresh, default if `None`.
    pub coherence: Option<CoherenceSpec>,
}

impl PeerAccessSpec {
    /// A hop with default scope and coherence.
    pub fn new(location: PeerLocation) -> Self {
        Self {
            location,
            scope: None,
            coherence: None,
        }
    }

    /// Builder-style scope setter.
    pub fn with_scope(mut self, scope: ScopeSpec) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Builder-style coherence setter.
    pub fn with_coherence(mut self, coherence: CoherenceSpec) -> Self {
        self.coherence = Some(coherence);
        self
    }

    /// The coherence to apply, falling back to [`CoherenceSpec::default`].
    pub fn effective_coherence(&self) -> CoherenceSpec {
        self.coherence.clone().unwrap_or_default()
    }

    /// Canonical string form of this hop.
    pub fn to_external_form(&self) -> String {
        let mut out = self.location.to_external_form();
        let mut sep = if out.contains('?') { '&' } else { '?' };
        if let Some(scope) = &self.scope {
            push_pair(&mut out, sep, SCOPE_KEY, &scope.to_string());
            sep = '&';
        }
        if let Some(coherence) = &self.coherence {
            push_pair(&mut out, sep, COHERENCE_KEY, &coherence.to_string());
        }
        out
    }

    /// Parse a single hop. Query pairs other than ours stay part of the
    /// peer location.
    pub fn parse(s: &str) -> MeshResult<Self> {
        let (base, query) = match s.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (s, None),
        };
        let mut scope = None;
        let mut coherence = None;
        let mut kept = Vec::new();
        for raw in query.into_iter().flat_map(|q| q.split('&')) {
            if raw.is_empty() {
                continue;
            }
            let (key, value) = match form_urlencoded::parse(raw.as_bytes()).next() {
                Some(kv) => kv,
                None => continue,
            };
            match key.as_ref() {
                SCOPE_KEY => scope = Some(value.parse::<ScopeSpec>()?),
                COHERENCE_KEY => coherence = Some(value.parse::<CoherenceSpec>()?),
                _ => kept.push(raw),
            }
        }
        let location = if kept.is_empty() {
            PeerLocation::from_external_form(base)?
        } else {
            PeerLocation::from_external_form(format!("{}?{}", base, kept.join("&")))?
        };
        Ok(Self {
            location,
            scope,
            coherence,
        })
    }
}

fn push_pair(out: &mut String, sep: char, key: &str, value: &str) {
    out.push(sep);
    out.push_str(key);
    out.push('=');
    out.extend(form_urlencoded::byte_serialize(value.as_bytes()));
}

impl From<PeerLocation> for PeerAccessSpec {
    fn from(location: PeerLocation) -> Self {
        Self::new(location)
    }
}

impl From<PeerAccessSpec> for String {
    fn from(p: PeerAccessSpec) -> Self {
        p.to_external_form()
    }
}

impl TryFrom<String> for PeerAccessSpec {
    type Error = MeshError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

/// Ordered chain of hops leading to an object, plus an optional explicit
/// object id. Without one, the path names the home object of its last hop.
///
/// Used both to request a replica and to identify the resulting replica.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ObjectAccessPath {
    hops: Vec<PeerAccessSpec>,
    object_id: Option<ObjectId>,
}

impl ObjectAccessPath {
    /// Construct from hops. At least one hop is required.
    pub fn new(hops: Vec<PeerAccessSpec>, object_id: Option<ObjectId>) -> MeshResult<Self> {
        if hops.is_empty() {
            return Err(MeshError::invalid_address("access path without hops"));
        }
        Ok(Self { hops, object_id })
    }

    /// A single-hop path to a specific object.
    pub fn to_object(location: PeerLocation, object_id: ObjectId) -> Self {
        Self {
            hops: vec![PeerAccessSpec::new(location)],
            object_id: Some(object_id),
        }
    }

    /// The hops, first to last.
    pub fn hops(&self) -> &[PeerAccessSpec] {
        &self.hops
    }

    /// The explicit object id, if any.
    pub fn object_id(&self) -> Option<&ObjectId> {
        self.object_id.as_ref()
    }

    /// The hop to talk to first.
    pub fn first_hop(&self) -> &PeerAccessSpec {
        // hops is never empty
        &self.hops[0]
    }

    /// The hop that holds the object.
    pub fn last_hop(&self) -> &PeerAccessSpec {
        &self.hops[self.hops.len() - 1]
    }

    /// The id the object will have once replicated.
    pub fn effective_object_id(&self) -> ObjectId {
        match &self.object_id {
            Some(id) => id.clone(),
            None => ObjectId::home_object_of(&self.last_hop().location),
        }
    }

    /// The remainder of the path after the first hop, `None` if the first hop
    /// is the last one.
    pub fn forward(&self) -> Option<Self> {
        if self.hops.len() < 2 {
            return None;
        }
        Some(Self {
            hops: self.hops[1..].to_vec(),
            object_id: self.object_id.clone(),
        })
    }

    /// Canonical string form.
    pub fn to_external_form(&self) -> String {
        let mut out = self
            .hops
            .iter()
            .map(PeerAccessSpec::to_external_form)
            .collect::<Vec<_>>()
            .join("!");
        if let Some(id) = &self.object_id {
            out.push('#');
            out.push_str(&id.to_external_form());
        }
        out
    }

    /// Inverse of [`ObjectAccessPath::to_external_form`].
    pub fn parse(s: &str) -> MeshResult<Self> {
        let (head, object_id) = match s.split_once('#') {
            Some((head, id)) => (head, Some(ObjectId::from_external_form(id))),
            None => (s, None),
        };
        let hops = head
            .split('!')
            .map(PeerAccessSpec::parse)
            .collect::<MeshResult<Vec<_>>>()?;
        Self::new(hops, object_id)
    }
}

impl std::fmt::Display for ObjectAccessPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_external_form())
    }
}

impl std::str::FromStr for ObjectAccessPath {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<ObjectAccessPath> for String {
    fn from(p: ObjectAccessPath) -> Self {
        p.to_external_form()
    }
}

impl TryFrom<String> for ObjectAccessPath {
    type Error = MeshError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn loc(s: &str) -> PeerLocation {
        PeerLocation::create(s).unwrap()
    }

    #[test]
    fn hop_with_defaults_is_bare_location() {
        let hop = PeerAccessSpec::new(loc("http://example.com"));
        assert_eq!("http://example.com", hop.to_external_form());
    }

    #[test]
    fn hop_keeps_foreign_query_pairs() {
        let hop = PeerAccessSpec::parse(
            "http://example.com/x?a=b&lid-coherence=periodic%7B5%7D&c=d",
        )
        .unwrap();
        assert_eq!("http://example.com/x?a=b&c=d", hop.location.as_str());
        assert_eq!(Some(CoherenceSpec::Periodic { period: 5 }), hop.coherence);
        assert_eq!(None, hop.scope);
        assert_eq!(hop, PeerAccessSpec::parse(&hop.to_external_form()).unwrap());
    }

    #[test]
    fn multi_hop_with_id() {
        let path = ObjectAccessPath::new(
            vec![
                PeerAccessSpec::new(loc("http://a.example.com"))
                    .with_scope(ScopeSpec::StepCount(2)),
                PeerAccessSpec::new(loc("mem://b")).with_coherence(CoherenceSpec::OneTime),
            ],
            Some(ObjectId::from("obj#1")),
        )
        .unwrap();
        let ext = path.to_external_form();
        assert_eq!(
            "http://a.example.com?lid-scope=steps%7B2%7D!mem://b?lid-coherence=one-time#obj%231",
            ext
        );
        assert_eq!(path, ext.parse().unwrap());
    }

    #[test]
    fn default_object_is_home_of_last_hop() {
        let path: ObjectAccessPath = "mem://a!mem://b".parse().unwrap();
        assert_eq!(None, path.object_id());
        assert_eq!("mem://b", path.effective_object_id().as_str());
        let rest = path.forward().unwrap();
        assert_eq!(loc("mem://b"), rest.first_hop().location);
        assert!(rest.forward().is_none());
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(ObjectAccessPath::new(vec![], None).is_err());
        assert!("".parse::<ObjectAccessPath>().is_err());
    }

    fn arb_coherence() -> impl Strategy<Value = CoherenceSpec> {
        prop_oneof![
            Just(CoherenceSpec::OneTime),
            any::<u64>().prop_map(|period| CoherenceSpec::Periodic { period }),
            (any::<u64>(), any::<u64>(), 0.0f64..1000.0).prop_map(|(f, m, g)| {
                CoherenceSpec::AdaptivePeriodic {
                    fallback_delay: f,
                    max_delay: m,
                    growth_factor: g,
                }
            }),
        ]
    }

    fn arb_location() -> impl Strategy<Value = PeerLocation> {
        prop_oneof![
            "[a-z]{1,8}".prop_map(|h| format!("http://{}.example.com", h)),
            "[a-z0-9-]{1,8}".prop_map(|h| format!("mem://{}", h)),
            ("[a-z]{1,8}", 1u16..9999).prop_map(|(h, p)| format!("https://{}:{}/p", h, p)),
        ]
        .prop_map(|l| PeerLocation::create(l).unwrap())
    }

    fn arb_unresolvable() -> impl Strategy<Value = PeerLocation> {
        prop_oneof![
            "[A-Za-z][A-Za-z0-9]{0,6}:[A-Za-z0-9._-]{1,8}",
            "[A-Za-z0-9_-]{1,10}",
        ]
        .prop_map(|s| PeerLocation::new_unresolvable(s).unwrap())
    }

    fn arb_hop() -> impl Strategy<Value = PeerAccessSpec> {
        (
            prop_oneof![arb_location(), arb_unresolvable()],
            proptest::option::of(any::<u32>().prop_map(ScopeSpec::StepCount)),
            proptest::option::of(arb_coherence()),
        )
            .prop_map(|(location, scope, coherence)| PeerAccessSpec {
                location,
                scope,
                coherence,
            })
    }

    proptest! {
        #[test]
        fn coherence_round_trip(c in arb_coherence()) {
            prop_assert_eq!(&c, &c.to_external_form().parse::<CoherenceSpec>().unwrap());
        }

        #[test]
        fn access_path_round_trip(
            hops in proptest::collection::vec(arb_hop(), 1..4),
            id in proptest::option::of("[ -~]{0,16}"),
        ) {
            let path = ObjectAccessPath::new(hops, id.map(ObjectId::new)).unwrap();
            let parsed = ObjectAccessPath::parse(&path.to_external_form()).unwrap();
            prop_assert_eq!(path, parsed);
        }
    }
}
