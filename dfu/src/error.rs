use dfufile::DfuFileError;
use thiserror::Error;

use crate::{DfuState, DfuStatusCode, DfuseCommand};

#[derive(Debug, Error)]
pub enum DfuError {
    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("Transfer error: {0}")]
    Transfer(#[from] nusb::transfer::TransferError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Firmware file error: {0}")]
    File(#[from] DfuFileError),

    #[error("Short response: expected {expected} bytes, got {got}")]
    ShortResponse { expected: usize, got: usize },

    #[error("DFU status error: {0}")]
    Status(DfuStatusCode),

    #[error("Wrong state: expected {expected}, got {got}")]
    UnexpectedState { expected: DfuState, got: DfuState },

    #[error("Download rejected, state {state}, status {status}")]
    DownloadRejected {
        state: DfuState,
        status: DfuStatusCode,
    },

    #[error("{command} at 0x{address:08x} not correctly executed: {status}")]
    CommandRejected {
        command: DfuseCommand,
        address: u32,
        status: DfuStatusCode,
    },

    #[error("Failed to enter idle state on abort, state {state}")]
    AbortFailed { state: DfuState },

    #[error("Device still manifesting after {polls} status requests")]
    ManifestationTimeout { polls: u32 },

    #[error("Failed to write whole chunk at 0x{address:08x}: {written} of {expected} bytes")]
    ShortWrite {
        address: u32,
        written: usize,
        expected: usize,
    },

    #[error("Page at 0x{0:08x} is not readable")]
    NotReadable(u32),

    #[error("Page at 0x{0:08x} is not writable")]
    NotWritable(u32),

    #[error("Page at 0x{0:08x} can not be erased")]
    NotErasable(u32),

    #[error("{size} bytes at 0x{address:08x} exceed the address space")]
    AddressOverflow { address: u32, size: usize },

    #[error("No compatible memory segments")]
    NoMemorySegments,

    #[error("Interface has no DfuSe memory layout")]
    NoMemoryLayout,

    #[error("Invalid memory layout, {0}")]
    InvalidMemoryLayout(String),

    #[error("File seems a bit too small")]
    EmptyFirmware,

    #[error("This is a DfuSe file, not meant for raw download")]
    FormatMismatch,

    #[error("Only DfuSe file version 1.1a is supported (got 0x{0:04x})")]
    UnsupportedDfuseVersion(u16),

    #[error("Invalid transfer size {0}")]
    InvalidTransferSize(u16),

    #[error("Invalid interface")]
    InvalidInterface,

    #[error("Timeout")]
    Timeout,
}
