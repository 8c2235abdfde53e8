//! Configuration for the patching engine.
//!
//! [`EngineConfig`] controls the encoder and the interpreter that executes installed streams.
//! It is handed to [`crate::Registry::with_config`] and applies to every target the registry
//! manages.

/// Configuration for the patching engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum nesting of intercepted calls per thread (default: 64).
    pub max_call_depth: usize,

    /// Maximum number of operations executed per invocation (default: 1_000_000).
    pub max_instructions: u64,

    /// Verify stack balance when encoding installed streams (default: true).
    pub verify_stack: bool,

    /// Encode branches in short form where the displacement fits (default: true).
    pub prefer_short_branches: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            max_instructions: 1_000_000,
            verify_stack: true,
            prefer_short_branches: true,
        }
    }
}

impl EngineConfig {
    /// Sets the maximum call depth.
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Sets the per-invocation instruction budget.
    #[must_use]
    pub fn with_max_instructions(mut self, max: u64) -> Self {
        self.max_instructions = max;
        self
    }

    /// Enables or disables stack verification during encoding.
    #[must_use]
    pub fn with_verify_stack(mut self, enabled: bool) -> Self {
        self.verify_stack = enabled;
        self
    }

    /// Enables or disables short-form branch selection.
    #[must_use]
    pub fn with_short_branches(mut self, enabled: bool) -> Self {
        self.prefer_short_branches = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.max_instructions, 1_000_000);
        assert!(config.verify_stack);
        assert!(config.prefer_short_branches);
    }

    #[test]
    fn builders() {
        let config = EngineConfig::default()
            .with_max_call_depth(4)
            .with_max_instructions(100)
            .with_verify_stack(false)
            .with_short_branches(false);

        assert_eq!(config.max_call_depth, 4);
        assert_eq!(config.max_instructions, 100);
        assert!(!config.verify_stack);
        assert!(!config.prefer_short_branches);
    }
}
