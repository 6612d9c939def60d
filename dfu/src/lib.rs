//! USB Device Firmware Upgrade (DFU) host implementation based on [`nusb`]
//!
//! Provides a portable implementation of the DFU 1.1 protocol with the
//! STMicroelectronics extensions (aka "DfuSe"): the status state machine,
//! chunked upload and download, DfuSe special commands with page aware
//! erasing, and file level orchestration for raw binaries, DFU suffixed
//! images and DfuSe containers.
//!
//! Useful references:
//! - DFU: [USB Device Firmware Upgrade Specification, Revision 1.1](https://www.usb.org/sites/default/files/DFU_1.1.pdf)
//! - DfuSe: [STMicroelectronics AN3156](https://www.st.com/resource/en/application_note/an3156-usb-dfu-protocol-used-in-the-stm32-bootloader-stmicroelectronics.pdf)
//!
//! The protocol layers only need a [`DfuTransport`], the [`nusb`] backend
//! is [`NusbTransport`].
//!
//! # Example
//!
//! The following example shows how to obtain a `Vec` of [DfuDevice]:
//! ```
//! use dfu::find_dfu_devices;
//!
//! match find_dfu_devices(None, None) {
//!     Ok(devices) => {
//!         if devices.is_empty() {
//!             println!("No DFU devices found");
//!         } else {
//!             println!("Found {} DFU devices", devices.len());
//!         }
//!     }
//!     Err(e) => println!("Error: {e}"),
//! }
//! ```
//!
//! [`nusb`]: https://docs.rs/nusb

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000u64);
pub const DEFAULT_TRANSFER_SIZE: u16 = 1024 * 2;

mod config;
mod connection;
mod descriptor;
mod device;
mod dfuse;
mod error;
mod interface;
mod load;
mod memory;
mod quirks;
mod status;
pub mod transfer;
pub mod transport;

use std::time::Duration;

// Re-exports
pub use config::DfuConfig;
pub use connection::DfuConnection;
pub use descriptor::{DFUSE_VERSION_NUMBER, DfuDescriptor};
pub use device::{DfuDevice, find_dfu_devices};
pub use dfuse::{
    DFUSE_DEFAULT_UPLOAD_LIMIT, DfuseCommand, DfuseSession, ErasedPageTracker,
};
pub use error::DfuError;
pub use interface::DfuInterface;
pub use load::{
    download_bytes, download_from_file, upload_to_file, upload_to_writer,
};
pub use memory::{DfuMemSegment, DfuMemory, parse_memory_layout};
pub use quirks::Quirks;
pub use status::{DfuState, DfuStatus, DfuStatusCode};
pub use transport::{DfuTransport, NusbTransport};

pub use dfufile;
