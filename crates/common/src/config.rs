use serde::{Deserialize, Serialize};

/// Global engine configuration shared across execution layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Target rows per chunk for operators that emit lazy results.
    pub chunk_size_rows: usize,

    /// Initial capacity hint for the per-run DISTINCT scratch sets used by
    /// aggregate kernels.
    #[serde(default = "default_distinct_scratch_capacity")]
    pub distinct_scratch_capacity: usize,
}

fn default_distinct_scratch_capacity() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size_rows: 8192,
            distinct_scratch_capacity: default_distinct_scratch_capacity(),
        }
    }
}

/// Whether per-row invariant validation (sort order of constructed and
/// streamed tables) runs.
///
/// Enabled in debug builds; the `expensive-checks` feature forces it on in
/// release builds as well.
pub const fn expensive_checks_enabled() -> bool {
    cfg!(debug_assertions) || cfg!(feature = "expensive-checks")
}
