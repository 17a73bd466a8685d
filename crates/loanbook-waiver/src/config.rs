use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::approval::ApprovalPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Validity given to requests that do not name their own end date.
    pub default_validity_days: i64,
    pub lock_timeout_ms: u64,
    /// Extra attempts after a commit loses a version race.
    pub commit_retries: u32,
    pub policy: ApprovalPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_validity_days: 7,
            lock_timeout_ms: 5_000,
            commit_retries: 3,
            policy: ApprovalPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
