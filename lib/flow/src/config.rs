//! Engine limits.

use serde::Deserialize;

/// Limits applied to every run.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Largest iteration count a loop node may request.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,

    /// Longest pause a loop node may request between iterations.
    #[serde(default = "default_max_loop_delay_ms")]
    pub max_loop_delay_ms: u64,

    /// Deepest chain of nodes a walk may follow before the run aborts.
    #[serde(default = "default_max_walk_depth")]
    pub max_walk_depth: usize,
}

fn default_max_loop_iterations() -> u32 {
    1000
}

fn default_max_loop_delay_ms() -> u64 {
    60_000
}

fn default_max_walk_depth() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: default_max_loop_iterations(),
            max_loop_delay_ms: default_max_loop_delay_ms(),
            max_walk_depth: default_max_walk_depth(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_has_correct_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_loop_iterations, 1000);
        assert_eq!(config.max_loop_delay_ms, 60_000);
        assert_eq!(config.max_walk_depth, 256);
    }

    #[test]
    fn engine_config_fills_missing_fields() {
        let config: EngineConfig =
            serde_json::from_value(serde_json::json!({ "max_walk_depth": 16 }))
                .expect("deserialize");
        assert_eq!(config.max_walk_depth, 16);
        assert_eq!(config.max_loop_iterations, 1000);
    }
}
