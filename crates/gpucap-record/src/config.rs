use serde::{Deserialize, Serialize};

/// Recording scheduler configuration.
///
/// Deserializable with defaults for every field so hosts can embed it in their own settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name of the consumer thread.
    pub thread_name: String,
    /// First key the scheduler expects. Must match the key allocator feeding the producers.
    pub first_key: u64,
    /// Warn once when this many out-of-order commands are buffered behind a missing key.
    ///
    /// A large backlog almost always means a producer took a key and never recorded or skipped
    /// it.
    pub pending_warn_threshold: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "gpucap-recorder".to_string(),
            first_key: 1,
            pending_warn_threshold: 4096,
        }
    }
}
