use std::time::Duration;

pub const VENDOR_OPENMOKO: u16 = 0x1d50;
pub const VENDOR_FIC: u16 = 0x1457;
pub const VENDOR_VOTI: u16 = 0x16c0;

/// Fallback poll timeout, works for OpenMoko
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(5);

/// Known device misbehaviours
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Quirks {
    bogus_poll_timeout: bool,
}

impl Quirks {
    pub fn for_device(vendor: u16, _product: u16) -> Self {
        Quirks {
            bogus_poll_timeout: matches!(
                vendor,
                VENDOR_OPENMOKO | VENDOR_FIC | VENDOR_VOTI
            ),
        }
    }

    /// Device returns bogus `bwPollTimeout` values
    pub fn bogus_poll_timeout(&self) -> bool {
        self.bogus_poll_timeout
    }

    pub fn poll_timeout_override(&self) -> Option<Duration> {
        self.bogus_poll_timeout.then_some(DEFAULT_POLL_TIMEOUT)
    }
}
