//! Interception behavior configuration.

use serde::{Deserialize, Serialize};

/// What to do when encrypting or decrypting a single value fails.
///
/// `FailOpen` keeps the application available: the original value is used
/// and the statement continues. `FailClosed` surfaces the failure to the
/// caller. The default is `FailOpen`; deployments that must never write
/// plaintext to a protected column should set `fail_closed` explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    #[default]
    FailOpen,
    FailClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptionConfig {
    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Number of parsed statements memoised per connection factory.
    #[serde(default = "default_parse_cache_size")]
    pub parse_cache_size: usize,
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            failure_mode: FailureMode::default(),
            parse_cache_size: default_parse_cache_size(),
        }
    }
}

fn default_parse_cache_size() -> usize {
    512
}
