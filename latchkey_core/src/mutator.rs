use rand::Rng;
use serde_json::{Value, json};

use crate::payload::{ProductRecord, SessionSeed, TestCase};

/// One mutation transformation: derives a new payload from a seed without
/// touching the seed itself.
///
/// Operators must be deterministic given a fixed random source, and every
/// output must remain serializable in the target's wire format (which is why
/// non-finite floats travel as the strings "NaN"/"Infinity": JSON numbers
/// cannot hold them).
pub trait MutationOperator<P, R: Rng + ?Sized>: Send + Sync {
    /// The name recorded on produced test cases for later attribution.
    fn name(&self) -> &'static str;

    /// Applies the transformation. Must not mutate `payload`.
    fn apply(&self, payload: &P, rng: &mut R) -> P;
}

/// The operator pool registered for one target kind. Each mutation picks an
/// operator uniformly at random and tags the test case with its name.
pub struct OperatorSet<P, R: Rng + ?Sized> {
    operators: Vec<Box<dyn MutationOperator<P, R>>>,
}

impl<P, R: Rng + ?Sized> OperatorSet<P, R> {
    /// Builds a set from a non-empty operator list.
    pub fn new(operators: Vec<Box<dyn MutationOperator<P, R>>>) -> Self {
        assert!(!operators.is_empty(), "operator set must not be empty");
        OperatorSet { operators }
    }

    pub fn mutate(&self, seed: &P, rng: &mut R) -> TestCase<P> {
        let operator = &self.operators[rng.random_range(0..self.operators.len())];
        TestCase {
            payload: operator.apply(seed, rng),
            operator: operator.name(),
        }
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Stateless (HTTP record) operators
// ---------------------------------------------------------------------------

const RECORD_FIELDS: [&str; 3] = ["name", "price", "info"];
const FLIP_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Swaps one character of `name` for a punctuation character.
pub struct FlipChar;

impl<R: Rng + ?Sized> MutationOperator<ProductRecord, R> for FlipChar {
    fn name(&self) -> &'static str {
        "flip_char"
    }

    fn apply(&self, payload: &ProductRecord, rng: &mut R) -> ProductRecord {
        let mut mutated = payload.clone();
        if let Some(Value::String(name)) = mutated.fields.get("name") {
            let mut chars: Vec<char> = name.chars().collect();
            if !chars.is_empty() {
                let pos = rng.random_range(0..chars.len());
                let pool: Vec<char> = FLIP_CHARS.chars().collect();
                chars[pos] = pool[rng.random_range(0..pool.len())];
                mutated
                    .fields
                    .insert("name".to_string(), Value::String(chars.into_iter().collect()));
            }
        }
        mutated
    }
}

/// Deletes one of the record's present fields. No-op when none of the known
/// fields are present.
pub struct DropField;

impl<R: Rng + ?Sized> MutationOperator<ProductRecord, R> for DropField {
    fn name(&self) -> &'static str {
        "remove_field"
    }

    fn apply(&self, payload: &ProductRecord, rng: &mut R) -> ProductRecord {
        let mut mutated = payload.clone();
        let present: Vec<&str> = RECORD_FIELDS
            .iter()
            .copied()
            .filter(|f| mutated.fields.contains_key(*f))
            .collect();
        if !present.is_empty() {
            let field = present[rng.random_range(0..present.len())];
            mutated.fields.remove(field);
        }
        mutated
    }
}

/// Replaces one field with a value of an incompatible type drawn from a
/// fixed pool.
pub struct FieldTypeConfusion;

impl FieldTypeConfusion {
    fn pool() -> [Value; 5] {
        [json!(null), json!([]), json!({}), json!(true), json!("")]
    }
}

impl<R: Rng + ?Sized> MutationOperator<ProductRecord, R> for FieldTypeConfusion {
    fn name(&self) -> &'static str {
        "invalid_type"
    }

    fn apply(&self, payload: &ProductRecord, rng: &mut R) -> ProductRecord {
        let mut mutated = payload.clone();
        let field = RECORD_FIELDS[rng.random_range(0..RECORD_FIELDS.len())];
        let pool = Self::pool();
        let value = pool[rng.random_range(0..pool.len())].clone();
        mutated.fields.insert(field.to_string(), value);
        mutated
    }
}

/// Substitutes an extreme value for `price`. Non-finite floats are encoded
/// as strings since a JSON number cannot carry them.
pub struct PriceBoundary;

impl PriceBoundary {
    fn pool() -> [Value; 7] {
        [
            json!(-1),
            json!(i32::MAX),
            json!(0),
            json!(0.000001),
            json!("NaN"),
            json!("Infinity"),
            json!("-Infinity"),
        ]
    }
}

impl<R: Rng + ?Sized> MutationOperator<ProductRecord, R> for PriceBoundary {
    fn name(&self) -> &'static str {
        "boundary_value"
    }

    fn apply(&self, payload: &ProductRecord, rng: &mut R) -> ProductRecord {
        let mut mutated = payload.clone();
        if mutated.fields.contains_key("price") {
            let pool = Self::pool();
            let value = pool[rng.random_range(0..pool.len())].clone();
            mutated.fields.insert("price".to_string(), value);
        }
        mutated
    }
}

/// Smuggles a `divide_by: 0` field into the record to probe arithmetic on
/// unvalidated input.
pub struct DivisionByZero;

impl<R: Rng + ?Sized> MutationOperator<ProductRecord, R> for DivisionByZero {
    fn name(&self) -> &'static str {
        "division_by_zero"
    }

    fn apply(&self, payload: &ProductRecord, _rng: &mut R) -> ProductRecord {
        let mut mutated = payload.clone();
        mutated.fields.insert("divide_by".to_string(), json!(0));
        mutated
    }
}

/// Blanks one field.
pub struct EmptyValue;

impl<R: Rng + ?Sized> MutationOperator<ProductRecord, R> for EmptyValue {
    fn name(&self) -> &'static str {
        "empty_value"
    }

    fn apply(&self, payload: &ProductRecord, rng: &mut R) -> ProductRecord {
        let mut mutated = payload.clone();
        let field = RECORD_FIELDS[rng.random_range(0..RECORD_FIELDS.len())];
        mutated.fields.insert(field.to_string(), json!(""));
        mutated
    }
}

/// Oversized-value stress: a numeric magnitude far past any plausible price,
/// or an `info` string far past any plausible description length.
pub struct OversizedValue;

const OVERSIZED_STRING_LEN: usize = 8192;

impl<R: Rng + ?Sized> MutationOperator<ProductRecord, R> for OversizedValue {
    fn name(&self) -> &'static str {
        "extremely_long_value"
    }

    fn apply(&self, payload: &ProductRecord, rng: &mut R) -> ProductRecord {
        let mut mutated = payload.clone();
        if rng.random_bool(0.5) {
            mutated.fields.insert("price".to_string(), json!(1e200));
        } else {
            mutated
                .fields
                .insert("info".to_string(), json!("A".repeat(OVERSIZED_STRING_LEN)));
        }
        mutated
    }
}

/// Replaces the record wholesale with a fixed structurally-odd payload,
/// independent of the seed. Probes parser robustness rather than
/// seed-guided exploration.
pub struct MalformedShape;

impl<R: Rng + ?Sized> MutationOperator<ProductRecord, R> for MalformedShape {
    fn name(&self) -> &'static str {
        "malformed_json"
    }

    fn apply(&self, _payload: &ProductRecord, _rng: &mut R) -> ProductRecord {
        let mut mutated = ProductRecord::new("TestItem", json!(100), "Sample");
        mutated
            .fields
            .insert("extra_field".to_string(), json!("Something extra,}"));
        mutated
    }
}

/// The operator pool for the stateless HTTP record target.
pub fn endpoint_operators<R: Rng + ?Sized>() -> OperatorSet<ProductRecord, R> {
    OperatorSet::new(vec![
        Box::new(FlipChar),
        Box::new(DropField),
        Box::new(FieldTypeConfusion),
        Box::new(PriceBoundary),
        Box::new(DivisionByZero),
        Box::new(MalformedShape),
        Box::new(EmptyValue),
        Box::new(OversizedValue),
    ])
}

// ---------------------------------------------------------------------------
// Session (command frame) operators
// ---------------------------------------------------------------------------

/// XORs one numeric element of the command with a random single-bit mask.
/// No-op when the command carries no numeric element to flip.
pub struct BitFlip;

impl<R: Rng + ?Sized> MutationOperator<SessionSeed, R> for BitFlip {
    fn name(&self) -> &'static str {
        "bit_flip"
    }

    fn apply(&self, payload: &SessionSeed, rng: &mut R) -> SessionSeed {
        let mut command = payload.command.clone();
        let numeric: Vec<usize> = command
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_u64().map(|_| i))
            .collect();
        if !numeric.is_empty() {
            let index = numeric[rng.random_range(0..numeric.len())];
            let mask = 1u8 << rng.random_range(0..8);
            if let Some(byte) = command[index].as_u64() {
                command[index] = json!((byte as u8) ^ mask);
            }
        }
        payload.with_command(command)
    }
}

/// Drops one command element. No-op on commands of one element or fewer so
/// a frame is never emptied by removal alone.
pub struct DropElement;

impl<R: Rng + ?Sized> MutationOperator<SessionSeed, R> for DropElement {
    fn name(&self) -> &'static str {
        "remove_field"
    }

    fn apply(&self, payload: &SessionSeed, rng: &mut R) -> SessionSeed {
        let mut command = payload.command.clone();
        if command.len() > 1 {
            command.remove(rng.random_range(0..command.len()));
        }
        payload.with_command(command)
    }
}

/// Replaces one command element with a value of an incompatible shape.
/// No-op on empty commands.
pub struct ElementTypeConfusion;

impl ElementTypeConfusion {
    fn pool() -> [Value; 4] {
        [json!("invalid"), json!(null), json!([]), json!(true)]
    }
}

impl<R: Rng + ?Sized> MutationOperator<SessionSeed, R> for ElementTypeConfusion {
    fn name(&self) -> &'static str {
        "invalid_type"
    }

    fn apply(&self, payload: &SessionSeed, rng: &mut R) -> SessionSeed {
        let mut command = payload.command.clone();
        if !command.is_empty() {
            let index = rng.random_range(0..command.len());
            let pool = Self::pool();
            command[index] = pool[rng.random_range(0..pool.len())].clone();
        }
        payload.with_command(command)
    }
}

/// Byte-boundary substitution: each element independently becomes one of
/// the extreme byte values with probability 0.4.
pub struct BoundaryBytes;

const BOUNDARY_BYTES: [u8; 4] = [0x00, 0xFF, 0x7F, 0x80];

impl<R: Rng + ?Sized> MutationOperator<SessionSeed, R> for BoundaryBytes {
    fn name(&self) -> &'static str {
        "boundary_value"
    }

    fn apply(&self, payload: &SessionSeed, rng: &mut R) -> SessionSeed {
        let mut command = payload.command.clone();
        for element in command.iter_mut() {
            if rng.random_bool(0.4) {
                *element = json!(BOUNDARY_BYTES[rng.random_range(0..BOUNDARY_BYTES.len())]);
            }
        }
        payload.with_command(command)
    }
}

/// The operator pool for the session command target.
pub fn session_operators<R: Rng + ?Sized>() -> OperatorSet<SessionSeed, R> {
    OperatorSet::new(vec![
        Box::new(BitFlip),
        Box::new(DropElement),
        Box::new(ElementTypeConfusion),
        Box::new(BoundaryBytes),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{SeedPayload, StateMatch};
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    fn product() -> ProductRecord {
        ProductRecord::new("Widget", json!(10), "x")
    }

    fn session(command: Vec<Value>) -> SessionSeed {
        SessionSeed::new(StateMatch::Any, "Locked", command)
    }

    #[test]
    fn mutation_is_deterministic_for_a_fixed_rng_seed() {
        let operators = endpoint_operators::<ChaCha8Rng>();
        let seed = product();
        let mut rng_a = ChaCha8Rng::from_seed([11u8; 32]);
        let mut rng_b = ChaCha8Rng::from_seed([11u8; 32]);
        for _ in 0..32 {
            let a = operators.mutate(&seed, &mut rng_a);
            let b = operators.mutate(&seed, &mut rng_b);
            assert_eq!(a.payload, b.payload);
            assert_eq!(a.operator, b.operator);
        }
    }

    #[test]
    fn mutation_never_touches_the_seed() {
        let operators = session_operators::<ChaCha8Rng>();
        let seed = session(vec![json!(0), json!(1), json!(2)]);
        let pristine = seed.clone();
        let mut rng = ChaCha8Rng::from_seed([5u8; 32]);
        for _ in 0..64 {
            let _ = operators.mutate(&seed, &mut rng);
        }
        assert_eq!(seed, pristine);
    }

    #[test]
    fn every_mutation_stays_wire_serializable() {
        let mut rng = ChaCha8Rng::from_seed([23u8; 32]);
        let endpoint = endpoint_operators::<ChaCha8Rng>();
        let seed = product();
        for _ in 0..128 {
            let case = endpoint.mutate(&seed, &mut rng);
            assert!(serde_json::to_string(&case.payload).is_ok());
        }

        let sess_ops = session_operators::<ChaCha8Rng>();
        let seed = session(vec![json!(0), json!(255)]);
        for _ in 0..128 {
            let case = sess_ops.mutate(&seed, &mut rng);
            assert!(serde_json::to_string(&case.payload).is_ok());
        }
    }

    #[test]
    fn removal_is_a_no_op_on_single_element_command() {
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);
        let seed = session(vec![json!(7)]);
        let mutated = <DropElement as MutationOperator<_, _>>::apply(&DropElement, &seed, &mut rng);
        assert_eq!(mutated, seed);
    }

    #[test]
    fn removal_drops_exactly_one_element() {
        let mut rng = ChaCha8Rng::from_seed([2u8; 32]);
        let seed = session(vec![json!(1), json!(2), json!(3)]);
        let mutated = <DropElement as MutationOperator<_, _>>::apply(&DropElement, &seed, &mut rng);
        assert_eq!(mutated.command.len(), 2);
    }

    #[test]
    fn bit_flip_changes_one_byte_by_a_single_bit() {
        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        let seed = session(vec![json!(0b0000_0000), json!(0b1111_0000)]);
        let mutated = <BitFlip as MutationOperator<_, _>>::apply(&BitFlip, &seed, &mut rng);

        let changed: Vec<(u8, u8)> = seed
            .command
            .iter()
            .zip(mutated.command.iter())
            .filter(|(a, b)| a != b)
            .map(|(a, b)| (a.as_u64().unwrap() as u8, b.as_u64().unwrap() as u8))
            .collect();
        assert_eq!(changed.len(), 1);
        let (before, after) = changed[0];
        assert_eq!((before ^ after).count_ones(), 1);
    }

    #[test]
    fn bit_flip_is_a_no_op_without_numeric_elements() {
        let mut rng = ChaCha8Rng::from_seed([4u8; 32]);
        let seed = session(vec![json!("invalid"), json!(null)]);
        let mutated = <BitFlip as MutationOperator<_, _>>::apply(&BitFlip, &seed, &mut rng);
        assert_eq!(mutated, seed);
    }

    #[test]
    fn boundary_bytes_only_substitutes_extreme_values() {
        let mut rng = ChaCha8Rng::from_seed([6u8; 32]);
        let seed = session(vec![json!(0x10); 32]);
        let mutated =
            <BoundaryBytes as MutationOperator<_, _>>::apply(&BoundaryBytes, &seed, &mut rng);
        for (before, after) in seed.command.iter().zip(mutated.command.iter()) {
            if before != after {
                let byte = after.as_u64().unwrap() as u8;
                assert!(BOUNDARY_BYTES.contains(&byte), "unexpected substitute {byte:#x}");
            }
        }
    }

    #[test]
    fn price_boundary_draws_from_the_fixed_pool() {
        let mut rng = ChaCha8Rng::from_seed([7u8; 32]);
        let seed = product();
        for _ in 0..32 {
            let mutated =
                <PriceBoundary as MutationOperator<_, _>>::apply(&PriceBoundary, &seed, &mut rng);
            let price = mutated.fields.get("price").unwrap();
            assert!(PriceBoundary::pool().contains(price), "price {price:?} not in pool");
        }
    }

    #[test]
    fn price_boundary_is_a_no_op_without_a_price_field() {
        let mut rng = ChaCha8Rng::from_seed([8u8; 32]);
        let mut seed = product();
        seed.fields.remove("price");
        let mutated =
            <PriceBoundary as MutationOperator<_, _>>::apply(&PriceBoundary, &seed, &mut rng);
        assert_eq!(mutated, seed);
    }

    #[test]
    fn drop_field_removes_one_known_field() {
        let mut rng = ChaCha8Rng::from_seed([9u8; 32]);
        let seed = product();
        let mutated = <DropField as MutationOperator<_, _>>::apply(&DropField, &seed, &mut rng);
        assert_eq!(mutated.fields.len(), seed.fields.len() - 1);
    }

    #[test]
    fn malformed_shape_ignores_the_seed_entirely() {
        let mut rng = ChaCha8Rng::from_seed([10u8; 32]);
        let a = <MalformedShape as MutationOperator<_, _>>::apply(
            &MalformedShape,
            &product(),
            &mut rng,
        );
        let b = <MalformedShape as MutationOperator<_, _>>::apply(
            &MalformedShape,
            &ProductRecord::new("Other", json!(5), "y"),
            &mut rng,
        );
        assert_eq!(a, b);
        assert_eq!(a.fields.get("extra_field"), Some(&json!("Something extra,}")));
    }

    #[test]
    fn division_by_zero_inserts_the_trap_field() {
        let mut rng = ChaCha8Rng::from_seed([12u8; 32]);
        let mutated =
            <DivisionByZero as MutationOperator<_, _>>::apply(&DivisionByZero, &product(), &mut rng);
        assert_eq!(mutated.fields.get("divide_by"), Some(&json!(0)));
    }

    #[test]
    fn operator_tag_does_not_change_the_payload_fingerprint() {
        let operators = endpoint_operators::<ChaCha8Rng>();
        let seed = product();
        let mut rng = ChaCha8Rng::from_seed([13u8; 32]);
        let case = operators.mutate(&seed, &mut rng);
        // The tag lives on the test case, not in the payload.
        assert_eq!(case.payload.fingerprint(), case.payload.clone().fingerprint());
        assert!(!case.payload.fields.contains_key("_mutation_type"));
    }
}
