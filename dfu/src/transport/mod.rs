//! Control transfer primitive used by the protocol layers.
//!
//! Every DFU request is a class request addressed to the DFU interface,
//! the transport fixes the request type, `wIndex` and the timeout.

#[cfg(test)]
pub(crate) mod mock;
mod usb;

pub use usb::NusbTransport;

use crate::DfuError;

pub trait DfuTransport {
    /// Device-to-host request, returns the bytes received (at most `length`).
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError>;

    /// Host-to-device request, returns the number of bytes sent.
    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<usize, DfuError>;
}
