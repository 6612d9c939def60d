use std::{num::NonZeroU8, time::Duration};

use log::debug;
use nusb::{self, MaybeFuture};

use crate::{DfuError, memory::*};

/// DFU mode (as opposed to run-time) interface protocol
pub(crate) const DFU_PROTOCOL_DFU_MODE: u8 = 2;

/// One alternate setting of a DFU interface
#[derive(Clone, Debug)]
pub struct DfuInterface {
    config: u8,
    interface: u8,
    alt_setting: u8,
    dfu_mode: bool,
    name: Option<String>,
    layout: Option<DfuMemory>,
}

impl DfuInterface {
    /// A DfuSe memory layout is parsed from `name` when it holds one.
    pub fn new(
        config: u8,
        interface: u8,
        alt_setting: u8,
        name: Option<String>,
    ) -> Self {
        let layout = name.as_deref().and_then(|name| {
            parse_memory_layout(name)
                .inspect_err(|err| debug!("Alt setting {alt_setting}: {err}"))
                .ok()
        });
        Self {
            config,
            interface,
            alt_setting,
            dfu_mode: true,
            name,
            layout,
        }
    }

    pub(crate) fn from_device(
        device: &nusb::Device,
        config: u8,
        interface: u8,
        alt_setting: u8,
        protocol: u8,
        name_idx: Option<NonZeroU8>,
    ) -> Self {
        let name = name_idx.and_then(|idx| {
            get_string_descriptor(device, idx, crate::DEFAULT_TIMEOUT)
        });
        let mut intf = Self::new(config, interface, alt_setting, name);
        intf.dfu_mode = protocol == DFU_PROTOCOL_DFU_MODE;
        intf
    }

    pub fn config(&self) -> u8 {
        self.config
    }
    pub fn interface(&self) -> u8 {
        self.interface
    }
    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }
    /// Interface is in DFU mode, not run-time mode
    pub fn dfu_mode(&self) -> bool {
        self.dfu_mode
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    pub fn layout(&self) -> Option<&DfuMemory> {
        self.layout.as_ref()
    }

    /// Memory layout, required for DfuSe operations
    pub fn memory(&self) -> Result<&DfuMemory, DfuError> {
        self.layout.as_ref().ok_or(DfuError::NoMemoryLayout)
    }

    /// Alternate setting describes DfuSe memory
    pub fn is_dfuse(&self) -> bool {
        self.layout.is_some()
    }

    pub fn find_segments(
        &self,
        start_address: u32,
        end_address: u32,
    ) -> Vec<DfuMemSegment> {
        self.layout
            .as_ref()
            .map(|l| l.find_segments(start_address, end_address))
            .unwrap_or_default()
    }
}

fn get_string_descriptor(
    device: &nusb::Device,
    desc_index: NonZeroU8,
    timeout: Duration,
) -> Option<String> {
    let language: u16 = device
        .get_string_descriptor_supported_languages(timeout)
        .wait()
        .ok()?
        .next()
        .unwrap_or(nusb::descriptors::language_id::US_ENGLISH);

    device
        .get_string_descriptor(desc_index, language, timeout)
        .wait()
        .ok()
}
