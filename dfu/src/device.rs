use log::{debug, info};
use nusb::{self, MaybeFuture};

use crate::{
    DfuConfig, DfuConnection, DfuError, Quirks, descriptor::*, interface::*,
    transport::NusbTransport,
};

const DFU_CLASS: u8 = 0xFE;
const DFU_SUBCLASS: u8 = 0x1;

/// DFU device representation
pub struct DfuDevice {
    dev: nusb::DeviceInfo,
    interfaces: Vec<DfuInterface>,
    descriptor: Option<DfuDescriptor>,
}

impl DfuDevice {
    fn from_device_info(
        device: nusb::DeviceInfo,
    ) -> Result<Option<Self>, DfuError> {
        let open_dev: nusb::Device = device.open().wait()?;
        let mut descriptor = None;
        let mut dfu_interfaces = Vec::new();

        for configuration in open_dev.configurations() {
            let config = configuration.configuration_value();
            for alt_setting in configuration.interface_alt_settings() {
                if alt_setting.class() != DFU_CLASS
                    || alt_setting.subclass() != DFU_SUBCLASS
                {
                    continue;
                }
                if descriptor.is_none() {
                    descriptor = alt_setting.descriptors().find_map(|desc| {
                        DfuDescriptor::from_bytes(&desc)
                    });
                }
                dfu_interfaces.push(DfuInterface::from_device(
                    &open_dev,
                    config,
                    alt_setting.interface_number(),
                    alt_setting.alternate_setting(),
                    alt_setting.protocol(),
                    alt_setting.string_index(),
                ));
            }
        }

        if dfu_interfaces.is_empty() {
            Ok(None)
        } else {
            Ok(Some(DfuDevice {
                dev: device,
                interfaces: dfu_interfaces,
                descriptor,
            }))
        }
    }

    pub fn device_info(&self) -> &nusb::DeviceInfo {
        &self.dev
    }

    pub fn id(&self) -> nusb::DeviceId {
        self.dev.id()
    }

    pub fn bus_id(&self) -> &str {
        self.dev.bus_id()
    }

    pub fn device_address(&self) -> u8 {
        self.dev.device_address()
    }

    pub fn vendor_id(&self) -> u16 {
        self.dev.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.dev.product_id()
    }

    pub fn device_version(&self) -> u16 {
        self.dev.device_version()
    }

    /// DFU interfaces and alternate settings combined
    pub fn interfaces(&self) -> &[DfuInterface] {
        &self.interfaces
    }

    /// DFU functional descriptor of the first DFU interface
    pub fn dfu_descriptor(&self) -> Option<&DfuDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn is_dfuse(&self) -> bool {
        self.descriptor.is_some_and(|d| d.is_dfuse())
    }

    /// At least one interface is in run-time mode
    pub fn is_runtime(&self) -> bool {
        self.interfaces.iter().any(|intf| !intf.dfu_mode())
    }

    pub fn quirks(&self) -> Quirks {
        Quirks::for_device(self.vendor_id(), self.product_id())
    }

    /// Select an interface and alternate setting
    ///
    /// Unspecified values match anything, the first match wins.
    pub fn find_interface(
        &self,
        interface: Option<u8>,
        alt_setting: Option<u8>,
    ) -> Result<&DfuInterface, DfuError> {
        self.interfaces
            .iter()
            .find(|intf| {
                interface.is_none_or(|i| intf.interface() == i)
                    && alt_setting.is_none_or(|a| intf.alt_setting() == a)
            })
            .ok_or(DfuError::InvalidInterface)
    }

    /// Find the alternate setting whose memory covers an address range
    pub fn find_interface_for_address(
        &self,
        start_address: u32,
        end_address: u32,
    ) -> Result<&DfuInterface, DfuError> {
        self.interfaces
            .iter()
            .find(|intf| {
                intf.layout()
                    .is_some_and(|l| l.covers(start_address, end_address))
            })
            .ok_or(DfuError::NoMemorySegments)
    }

    /// Connect to the DFU interface
    ///
    /// The transfer size comes from the functional descriptor and the
    /// device specific quirks are applied to `config`.
    pub fn connect(
        &self,
        intf: &DfuInterface,
        config: DfuConfig,
    ) -> Result<DfuConnection<NusbTransport>, DfuError> {
        let xfer_size = self.descriptor.map_or(0, |d| d.transfer_size());
        let config = config.with_quirks(self.quirks());
        debug!(
            "Claiming interface {}, alt setting {}",
            intf.interface(),
            intf.alt_setting()
        );
        let dev = self.dev.open().wait()?;
        let interface = dev.claim_interface(intf.interface()).wait()?;
        interface.set_alt_setting(intf.alt_setting()).wait()?;
        info!(
            "Connected to {:04x}:{:04x}, transfer size {xfer_size}",
            self.vendor_id(),
            self.product_id()
        );
        let transport = NusbTransport::new(interface, config.timeout);
        Ok(DfuConnection::new(transport, xfer_size, config))
    }
}

fn is_dfu_device(dev: &nusb::DeviceInfo) -> bool {
    dev.interfaces()
        .any(|i| i.class() == DFU_CLASS && i.subclass() == DFU_SUBCLASS)
}

/// List devices exposing a DFU interface, optionally filtered by ids
pub fn find_dfu_devices(
    vid: Option<u16>,
    pid: Option<u16>,
) -> Result<Vec<DfuDevice>, DfuError> {
    let devices: Vec<nusb::DeviceInfo> = nusb::list_devices()
        .wait()?
        .filter(|dev| {
            vid.is_none_or(|id| dev.vendor_id() == id)
                && pid.is_none_or(|id| dev.product_id() == id)
        })
        .filter(is_dfu_device)
        .collect();
    let mut dfu_devices = Vec::with_capacity(devices.len());
    for device in devices {
        if let Some(dfu_device) = DfuDevice::from_device_info(device)? {
            dfu_devices.push(dfu_device);
        }
    }
    Ok(dfu_devices)
}
