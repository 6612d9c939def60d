use std::{fmt, time::Duration};

use crate::DfuError;

pub(crate) const DFU_STATUS_LEN: u16 = 6;

/// Device state (`bState`), DFU 1.1 section 6.1.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuState {
    AppIdle,
    AppDetach,
    Idle,
    DnloadSync,
    DnBusy,
    DnloadIdle,
    ManifestSync,
    Manifest,
    ManifestWaitReset,
    UploadIdle,
    Error,
    Unknown(u8),
}

/// Device status (`bStatus`), DFU 1.1 section 6.1.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuStatusCode {
    Ok,
    ErrTarget,
    ErrFile,
    ErrWrite,
    ErrErase,
    ErrCheckErased,
    ErrProg,
    ErrVerify,
    ErrAddress,
    ErrNotDone,
    ErrFirmware,
    ErrVendor,
    ErrUsbReset,
    ErrPowerOnReset,
    ErrUnknown,
    ErrStalledPkt,
    Unknown(u8),
}

/// Result of a `DFU_GETSTATUS` request
///
/// Only valid for the request that produced it, never cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DfuStatus {
    pub status: DfuStatusCode,
    /// `bwPollTimeout` in milliseconds
    pub poll_timeout: u32,
    pub state: DfuState,
    pub string_index: u8,
}

impl DfuStatus {
    pub(crate) fn from_raw(data: &[u8]) -> Result<Self, DfuError> {
        if data.len() < DFU_STATUS_LEN as usize {
            return Err(DfuError::ShortResponse {
                expected: DFU_STATUS_LEN as usize,
                got: data.len(),
            });
        }
        Ok(DfuStatus {
            status: DfuStatusCode::from(data[0]),
            poll_timeout: (data[3] as u32) << 16
                | (data[2] as u32) << 8
                | (data[1] as u32),
            state: DfuState::from(data[4]),
            string_index: data[5],
        })
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout as u64)
    }

    pub fn ok(&self) -> Result<(), DfuError> {
        self.ret(())
    }

    pub fn ret<T>(&self, t: T) -> Result<T, DfuError> {
        if self.status != DfuStatusCode::Ok {
            Err(DfuError::from(self))
        } else {
            Ok(t)
        }
    }
}

impl From<&DfuStatus> for DfuError {
    fn from(st: &DfuStatus) -> Self {
        DfuError::Status(st.status)
    }
}

impl fmt::Display for DfuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state = {}, status = {}", self.state, self.status)
    }
}

impl From<u8> for DfuState {
    fn from(value: u8) -> Self {
        match value {
            0 => DfuState::AppIdle,
            1 => DfuState::AppDetach,
            2 => DfuState::Idle,
            3 => DfuState::DnloadSync,
            4 => DfuState::DnBusy,
            5 => DfuState::DnloadIdle,
            6 => DfuState::ManifestSync,
            7 => DfuState::Manifest,
            8 => DfuState::ManifestWaitReset,
            9 => DfuState::UploadIdle,
            10 => DfuState::Error,
            other => DfuState::Unknown(other),
        }
    }
}

impl From<DfuState> for u8 {
    fn from(state: DfuState) -> Self {
        match state {
            DfuState::AppIdle => 0,
            DfuState::AppDetach => 1,
            DfuState::Idle => 2,
            DfuState::DnloadSync => 3,
            DfuState::DnBusy => 4,
            DfuState::DnloadIdle => 5,
            DfuState::ManifestSync => 6,
            DfuState::Manifest => 7,
            DfuState::ManifestWaitReset => 8,
            DfuState::UploadIdle => 9,
            DfuState::Error => 10,
            DfuState::Unknown(other) => other,
        }
    }
}

impl DfuState {
    pub fn name(&self) -> &'static str {
        match self {
            DfuState::AppIdle => "appIDLE",
            DfuState::AppDetach => "appDETACH",
            DfuState::Idle => "dfuIDLE",
            DfuState::DnloadSync => "dfuDNLOAD-SYNC",
            DfuState::DnBusy => "dfuDNBUSY",
            DfuState::DnloadIdle => "dfuDNLOAD-IDLE",
            DfuState::ManifestSync => "dfuMANIFEST-SYNC",
            DfuState::Manifest => "dfuMANIFEST",
            DfuState::ManifestWaitReset => "dfuMANIFEST-WAIT-RESET",
            DfuState::UploadIdle => "dfuUPLOAD-IDLE",
            DfuState::Error => "dfuERROR",
            DfuState::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), u8::from(*self))
    }
}

impl From<u8> for DfuStatusCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => DfuStatusCode::Ok,
            0x01 => DfuStatusCode::ErrTarget,
            0x02 => DfuStatusCode::ErrFile,
            0x03 => DfuStatusCode::ErrWrite,
            0x04 => DfuStatusCode::ErrErase,
            0x05 => DfuStatusCode::ErrCheckErased,
            0x06 => DfuStatusCode::ErrProg,
            0x07 => DfuStatusCode::ErrVerify,
            0x08 => DfuStatusCode::ErrAddress,
            0x09 => DfuStatusCode::ErrNotDone,
            0x0a => DfuStatusCode::ErrFirmware,
            0x0b => DfuStatusCode::ErrVendor,
            0x0c => DfuStatusCode::ErrUsbReset,
            0x0d => DfuStatusCode::ErrPowerOnReset,
            0x0e => DfuStatusCode::ErrUnknown,
            0x0f => DfuStatusCode::ErrStalledPkt,
            other => DfuStatusCode::Unknown(other),
        }
    }
}

impl From<DfuStatusCode> for u8 {
    fn from(status: DfuStatusCode) -> Self {
        match status {
            DfuStatusCode::Ok => 0x00,
            DfuStatusCode::ErrTarget => 0x01,
            DfuStatusCode::ErrFile => 0x02,
            DfuStatusCode::ErrWrite => 0x03,
            DfuStatusCode::ErrErase => 0x04,
            DfuStatusCode::ErrCheckErased => 0x05,
            DfuStatusCode::ErrProg => 0x06,
            DfuStatusCode::ErrVerify => 0x07,
            DfuStatusCode::ErrAddress => 0x08,
            DfuStatusCode::ErrNotDone => 0x09,
            DfuStatusCode::ErrFirmware => 0x0a,
            DfuStatusCode::ErrVendor => 0x0b,
            DfuStatusCode::ErrUsbReset => 0x0c,
            DfuStatusCode::ErrPowerOnReset => 0x0d,
            DfuStatusCode::ErrUnknown => 0x0e,
            DfuStatusCode::ErrStalledPkt => 0x0f,
            DfuStatusCode::Unknown(other) => other,
        }
    }
}

impl DfuStatusCode {
    pub fn description(&self) -> &'static str {
        match self {
            DfuStatusCode::Ok => "No error condition is present",
            DfuStatusCode::ErrTarget => {
                "File is not targeted for use by this device"
            }
            DfuStatusCode::ErrFile => {
                "File is for this device but fails some vendor-specific test"
            }
            DfuStatusCode::ErrWrite => "Device is unable to write memory",
            DfuStatusCode::ErrErase => "Memory erase function failed",
            DfuStatusCode::ErrCheckErased => "Memory erase check failed",
            DfuStatusCode::ErrProg => "Program memory function failed",
            DfuStatusCode::ErrVerify => {
                "Programmed memory failed verification"
            }
            DfuStatusCode::ErrAddress => {
                "Cannot program memory due to received address that is out of range"
            }
            DfuStatusCode::ErrNotDone => {
                "Received DNLOAD with wLength = 0, but device does not think \
                 that it has all data yet"
            }
            DfuStatusCode::ErrFirmware => {
                "Device's firmware is corrupt. It cannot return to run-time \
                 (non-DFU) operations"
            }
            DfuStatusCode::ErrVendor => {
                "iString indicates a vendor specific error"
            }
            DfuStatusCode::ErrUsbReset => {
                "Device detected unexpected USB reset signalling"
            }
            DfuStatusCode::ErrPowerOnReset => {
                "Device detected unexpected power on reset"
            }
            DfuStatusCode::ErrUnknown => {
                "Something went wrong, but the device does not know what it was"
            }
            DfuStatusCode::ErrStalledPkt => {
                "Device stalled an unexpected request"
            }
            DfuStatusCode::Unknown(_) => "Unknown status code",
        }
    }
}

impl fmt::Display for DfuStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), u8::from(*self))
    }
}
