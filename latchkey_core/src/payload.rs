use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

/// Protocol states a session target can occupy.
///
/// This is a closed set: seed preconditions may additionally use the `any`
/// wildcard (see [`StateMatch`]), but a live session is always in exactly one
/// of these states.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Locked,
    Unlocked,
    Authenticated,
}

impl FromStr for ProtocolState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("locked") {
            Ok(ProtocolState::Locked)
        } else if s.eq_ignore_ascii_case("unlocked") {
            Ok(ProtocolState::Unlocked)
        } else if s.eq_ignore_ascii_case("authenticated") {
            Ok(ProtocolState::Authenticated)
        } else {
            Err(format!("unknown protocol state: {s:?}"))
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Locked => "Locked",
            ProtocolState::Unlocked => "Unlocked",
            ProtocolState::Authenticated => "Authenticated",
        };
        f.write_str(name)
    }
}

/// A seed's declared source-state precondition: either a concrete
/// [`ProtocolState`] or the `any` wildcard. The wildcard is only valid in
/// seed preconditions, never as a live session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateMatch {
    Any,
    Is(ProtocolState),
}

impl StateMatch {
    pub fn accepts(&self, state: ProtocolState) -> bool {
        match self {
            StateMatch::Any => true,
            StateMatch::Is(expected) => *expected == state,
        }
    }
}

impl Serialize for StateMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StateMatch::Any => serializer.serialize_str("any"),
            StateMatch::Is(state) => state.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for StateMatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.eq_ignore_ascii_case("any") {
            return Ok(StateMatch::Any);
        }
        raw.parse::<ProtocolState>()
            .map(StateMatch::Is)
            .map_err(serde::de::Error::custom)
    }
}

/// A seed payload as managed by the corpus and consumed by mutation operators.
///
/// Implementations must be plain data: cloning a seed and mutating the clone
/// must never affect the original (mutation always produces a new value).
/// The JSON serialization doubles as the wire-adjacent canonical form used
/// for fingerprinting.
pub trait SeedPayload:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + 'static
{
    /// The built-in seeds used when a seed file is missing or malformed.
    fn default_seeds() -> Vec<Self>;

    /// Produces a single replacement seed when the queue runs dry.
    fn synthesize<R: Rng + ?Sized>(rng: &mut R) -> Self;

    /// Whether this seed may be scheduled from the given session state.
    /// Stateless payloads are always eligible.
    fn eligible_from(&self, _state: ProtocolState) -> bool {
        true
    }

    /// Stable identity of this seed, used as the interesting-count map key.
    ///
    /// Top-level keys starting with `_` are stripped before hashing so that
    /// cosmetic mutation-tag metadata can never fracture interest counting.
    fn fingerprint(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.retain(|key, _| !key.starts_with('_'));
        }
        format!("{:x}", md5::compute(value.to_string()))
    }
}

/// A mutated payload on its way to the target, tagged with the operator that
/// produced it. The tag lives outside the payload, so it is excluded from
/// both the transmitted bytes and the payload fingerprint.
#[derive(Clone, Debug)]
pub struct TestCase<P> {
    pub payload: P,
    pub operator: &'static str,
}

/// The stateless target's payload: a flat key/value record posted as a JSON
/// body. Backed by `serde_json`'s map so type-confusion mutations stay
/// representable, and so serialization is key-ordered and deterministic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductRecord {
    pub fields: Map<String, Value>,
}

impl ProductRecord {
    pub fn new(name: impl Into<String>, price: Value, info: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("name".to_string(), Value::String(name.into()));
        fields.insert("price".to_string(), price);
        fields.insert("info".to_string(), Value::String(info.into()));
        ProductRecord { fields }
    }

    /// The JSON body transmitted to the target.
    pub fn body(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}

impl SeedPayload for ProductRecord {
    fn default_seeds() -> Vec<Self> {
        vec![
            ProductRecord::new("Default Product", json!(99.99), "Default product information"),
            ProductRecord::new("Test Item", json!(100), "Sample description"),
        ]
    }

    fn synthesize<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let price = (rng.random_range(10.0..1000.0_f64) * 100.0).round() / 100.0;
        ProductRecord::new(
            format!("Replenished Product {}", rng.random_range(1000..10_000)),
            json!(price),
            "Replenished product information",
        )
    }
}

/// The session target's payload: a command frame plus the protocol-state
/// transition it is expected to exercise. The command is a JSON array so
/// that type-confusion mutations (strings, null, nested arrays) remain
/// expressible in the wire format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSeed {
    pub from_state: StateMatch,
    pub to_state: String,
    pub command: Vec<Value>,
}

impl SessionSeed {
    pub fn new(from_state: StateMatch, to_state: impl Into<String>, command: Vec<Value>) -> Self {
        SessionSeed {
            from_state,
            to_state: to_state.into(),
            command,
        }
    }

    /// A copy of this seed carrying a different command, keeping the declared
    /// state transition. Used when a mutated command is requeued as a seed.
    pub fn with_command(&self, command: Vec<Value>) -> Self {
        SessionSeed {
            from_state: self.from_state,
            to_state: self.to_state.clone(),
            command,
        }
    }
}

impl SeedPayload for SessionSeed {
    fn default_seeds() -> Vec<Self> {
        vec![
            SessionSeed::new(
                StateMatch::Any,
                "Locked",
                vec![json!(0x00), json!(0x01), json!(0x02), json!(0x03), json!(0x04), json!(0x05)],
            ),
            SessionSeed::new(
                StateMatch::Is(ProtocolState::Authenticated),
                "Unlocked",
                vec![json!(0x01)],
            ),
            SessionSeed::new(
                StateMatch::Is(ProtocolState::Unlocked),
                "Locked",
                vec![json!(0x02)],
            ),
        ]
    }

    fn synthesize<R: Rng + ?Sized>(_rng: &mut R) -> Self {
        SessionSeed::new(
            StateMatch::Any,
            "Locked",
            vec![json!(0x00), json!(0x01), json!(0x02), json!(0x03), json!(0x04), json!(0x05)],
        )
    }

    fn eligible_from(&self, state: ProtocolState) -> bool {
        self.from_state.accepts(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    #[test]
    fn fingerprint_is_stable_across_calls() {
        let seed = ProductRecord::new("Widget", json!(10), "x");
        assert_eq!(seed.fingerprint(), seed.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_mutation_tag_fields() {
        let clean = ProductRecord::new("Widget", json!(10), "x");
        let mut tagged = clean.clone();
        tagged
            .fields
            .insert("_mutation_type".to_string(), json!("boundary_value"));
        assert_eq!(clean.fingerprint(), tagged.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_real_field_changes() {
        let a = ProductRecord::new("Widget", json!(10), "x");
        let b = ProductRecord::new("Widget", json!(11), "x");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn state_match_accepts_wildcard_and_exact() {
        assert!(StateMatch::Any.accepts(ProtocolState::Unlocked));
        assert!(StateMatch::Is(ProtocolState::Locked).accepts(ProtocolState::Locked));
        assert!(!StateMatch::Is(ProtocolState::Locked).accepts(ProtocolState::Unlocked));
    }

    #[test]
    fn session_seed_round_trips_through_json() {
        let raw = r#"{"from_state":"any","to_state":"Locked","command":[0,1,2,3,4,5]}"#;
        let seed: SessionSeed = serde_json::from_str(raw).unwrap();
        assert_eq!(seed.from_state, StateMatch::Any);
        assert_eq!(seed.to_state, "Locked");
        assert_eq!(seed.command.len(), 6);

        let encoded = serde_json::to_string(&seed).unwrap();
        let reparsed: SessionSeed = serde_json::from_str(&encoded).unwrap();
        assert_eq!(seed, reparsed);
    }

    #[test]
    fn session_seed_rejects_unknown_from_state() {
        let raw = r#"{"from_state":"Jammed","to_state":"Locked","command":[0]}"#;
        assert!(serde_json::from_str::<SessionSeed>(raw).is_err());
    }

    #[test]
    fn session_seed_eligibility_follows_precondition() {
        let seeds = SessionSeed::default_seeds();
        assert!(seeds[0].eligible_from(ProtocolState::Unlocked)); // wildcard
        assert!(seeds[1].eligible_from(ProtocolState::Authenticated));
        assert!(!seeds[1].eligible_from(ProtocolState::Locked));
    }

    #[test]
    fn synthesized_product_is_valid_and_deterministic() {
        let mut rng_a = ChaCha8Rng::from_seed([7u8; 32]);
        let mut rng_b = ChaCha8Rng::from_seed([7u8; 32]);
        let a = ProductRecord::synthesize(&mut rng_a);
        let b = ProductRecord::synthesize(&mut rng_b);
        assert_eq!(a, b);
        assert!(a.fields.contains_key("name"));
        assert!(a.fields.contains_key("price"));
        assert!(a.fields.contains_key("info"));
    }
}
