use std::time::Duration;

use crate::{DEFAULT_TIMEOUT, Quirks};

/// Per-session protocol settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DfuConfig {
    /// Control transfer timeout
    pub timeout: Duration,
    /// Replaces the device reported `bwPollTimeout` when set
    pub poll_timeout_override: Option<Duration>,
    /// Upper bound for a single download block to settle
    pub busy_timeout: Duration,
    /// Delay between status requests while the device is manifesting
    pub manifest_poll_interval: Duration,
    /// Number of status requests before giving up on manifestation
    pub manifest_poll_limit: u32,
}

impl Default for DfuConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_timeout_override: None,
            busy_timeout: DEFAULT_TIMEOUT * 2,
            manifest_poll_interval: Duration::from_secs(1),
            manifest_poll_limit: 60,
        }
    }
}

impl DfuConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_timeout_override(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout_override = Some(poll_timeout);
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_manifest_polling(mut self, interval: Duration, limit: u32) -> Self {
        self.manifest_poll_interval = interval;
        self.manifest_poll_limit = limit;
        self
    }

    /// Apply device specific workarounds.
    pub fn with_quirks(mut self, quirks: Quirks) -> Self {
        if let Some(poll_timeout) = quirks.poll_timeout_override() {
            self.poll_timeout_override = Some(poll_timeout);
        }
        self
    }
}
