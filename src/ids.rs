//! Deterministic identifiers for orchestration code.
//!
//! Identifiers are UUID v5 values: a namespace derived from a fixed root and
//! the instance id, hashed together with a name built from replay-stable state
//! (virtual time and a per-execution counter). Two replays of the same history
//! therefore hand out the same sequence of ids.

use uuid::Uuid;

/// Root namespace for every instance-scoped namespace.
pub const ROOT_NAMESPACE: Uuid = Uuid::from_u128(0x9e95_2958_5e33_4daf_827f_2fa1_2937_b875);

#[derive(Debug, Clone)]
pub struct DeterministicIdGenerator {
    namespace: Uuid,
    instance_id: String,
    counter: u64,
}

impl DeterministicIdGenerator {
    pub fn new(instance_id: &str) -> Self {
        Self {
            namespace: Uuid::new_v5(&ROOT_NAMESPACE, instance_id.as_bytes()),
            instance_id: instance_id.to_string(),
            counter: 0,
        }
    }

    pub fn namespace(&self) -> Uuid {
        self.namespace
    }

    /// Next id for the given virtual time. The counter never resets within an
    /// execution, so ids stay unique even when time does not advance.
    pub fn next(&mut self, virtual_time_ms: u64) -> Uuid {
        let name = format!("{}-{}-{}", self.instance_id, virtual_time_ms, self.counter);
        self.counter = self.counter.saturating_add(1);
        Uuid::new_v5(&self.namespace, name.as_bytes())
    }
}

/// Stable id for a (namespace, name) pair.
pub fn name_based_id(namespace: &str, name: &str) -> Uuid {
    let ns = Uuid::new_v5(&ROOT_NAMESPACE, namespace.as_bytes());
    Uuid::new_v5(&ns, name.as_bytes())
}
