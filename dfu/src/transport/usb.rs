use std::time::Duration;

use nusb::{
    MaybeFuture,
    transfer::{ControlIn, ControlOut, ControlType, Recipient},
};

use super::DfuTransport;
use crate::DfuError;

/// Transport over a claimed `nusb` interface
pub struct NusbTransport {
    interface: nusb::Interface,
    timeout: Duration,
}

impl NusbTransport {
    pub fn new(interface: nusb::Interface, timeout: Duration) -> Self {
        NusbTransport { interface, timeout }
    }

    pub fn interface(&self) -> &nusb::Interface {
        &self.interface
    }
}

impl DfuTransport for NusbTransport {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let index = self.interface.interface_number() as u16;
        Ok(self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    length,
                },
                self.timeout,
            )
            .wait()?)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<usize, DfuError> {
        let index = self.interface.interface_number() as u16;
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    data,
                },
                self.timeout,
            )
            .wait()?;
        Ok(data.len())
    }
}
