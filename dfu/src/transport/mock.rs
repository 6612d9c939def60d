//! Simulated DFU / DfuSe device for testing the protocol layers.

use std::{cell::RefCell, time::Duration};

use nusb::transfer::TransferError;

use super::DfuTransport;
use crate::{DfuConfig, DfuConnection, DfuError, DfuState, DfuStatusCode};

const DFU_CMD_DETACH: u8 = 0;
const DFU_CMD_DOWNLOAD: u8 = 1;
const DFU_CMD_UPLOAD: u8 = 2;
const DFU_CMD_GETSTATUS: u8 = 3;
const DFU_CMD_CLRSTATUS: u8 = 4;
const DFU_CMD_GETSTATE: u8 = 5;
const DFU_CMD_ABORT: u8 = 6;

const DFUSE_CMD_SET_ADDRESS: u8 = 0x21;
const DFUSE_CMD_ERASE: u8 = 0x41;

/// Control request as seen by the device
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Request {
    Detach(u16),
    Dnload { transaction: u16, data: Vec<u8> },
    Upload { transaction: u16, length: u16 },
    GetStatus,
    ClearStatus,
    GetState,
    Abort,
}

/// Decoded DfuSe command
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    SetAddress(u32),
    ErasePage(u32),
    MassErase,
}

pub(crate) struct MockDevice {
    inner: RefCell<MockState>,
}

struct MockState {
    state: DfuState,
    status: DfuStatusCode,
    poll_timeout: u32,
    busy_polls: u32,
    command_busy_polls: u32,
    pending_busy: u32,
    manifest_polls: u32,
    pending_manifest: u32,
    // status reported once the pending operation settles
    pending_status: DfuStatusCode,
    data_dnloads: usize,
    reject_dnload: Option<(usize, DfuStatusCode)>,
    reject_command: Option<DfuStatusCode>,
    abort_state: DfuState,
    short_write: bool,
    address: u32,
    upload_data: Vec<u8>,
    upload_offset: usize,
    requests: Vec<Request>,
    commands: Vec<Command>,
    writes: Vec<(u16, u32, Vec<u8>)>,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        MockDevice {
            inner: RefCell::new(MockState {
                state: DfuState::Idle,
                status: DfuStatusCode::Ok,
                poll_timeout: 0,
                busy_polls: 1,
                command_busy_polls: 1,
                pending_busy: 0,
                manifest_polls: 1,
                pending_manifest: 0,
                pending_status: DfuStatusCode::Ok,
                data_dnloads: 0,
                reject_dnload: None,
                reject_command: None,
                abort_state: DfuState::Idle,
                short_write: false,
                address: 0,
                upload_data: Vec::new(),
                upload_offset: 0,
                requests: Vec::new(),
                commands: Vec::new(),
                writes: Vec::new(),
            }),
        }
    }

    pub(crate) fn with_state(
        self,
        state: DfuState,
        status: DfuStatusCode,
    ) -> Self {
        {
            let mut inner = self.inner.borrow_mut();
            inner.state = state;
            inner.status = status;
        }
        self
    }

    /// Number of `dfuDNBUSY` replies after each data block.
    pub(crate) fn with_busy_polls(self, polls: u32) -> Self {
        self.inner.borrow_mut().busy_polls = polls;
        self
    }

    /// Number of `dfuDNBUSY` replies after each special command.
    pub(crate) fn with_command_busy_polls(self, polls: u32) -> Self {
        self.inner.borrow_mut().command_busy_polls = polls;
        self
    }

    /// Number of `dfuMANIFEST` replies after the final zero length block.
    pub(crate) fn with_manifest_polls(self, polls: u32) -> Self {
        self.inner.borrow_mut().manifest_polls = polls;
        self
    }

    pub(crate) fn with_poll_timeout(self, poll_timeout: u32) -> Self {
        self.inner.borrow_mut().poll_timeout = poll_timeout;
        self
    }

    /// Fail the `nth` data block (1-based) with `status`.
    pub(crate) fn reject_dnload(
        self,
        nth: usize,
        status: DfuStatusCode,
    ) -> Self {
        self.inner.borrow_mut().reject_dnload = Some((nth, status));
        self
    }

    pub(crate) fn reject_commands(self, status: DfuStatusCode) -> Self {
        self.inner.borrow_mut().reject_command = Some(status);
        self
    }

    /// State entered on `DFU_ABORT`.
    pub(crate) fn with_abort_state(self, state: DfuState) -> Self {
        self.inner.borrow_mut().abort_state = state;
        self
    }

    /// Accept one byte less than sent for data blocks.
    pub(crate) fn with_short_writes(self) -> Self {
        self.inner.borrow_mut().short_write = true;
        self
    }

    pub(crate) fn with_upload_data(self, data: &[u8]) -> Self {
        self.inner.borrow_mut().upload_data = data.to_vec();
        self
    }

    pub(crate) fn state(&self) -> DfuState {
        self.inner.borrow().state
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.inner.borrow().requests.clone()
    }

    pub(crate) fn commands(&self) -> Vec<Command> {
        self.inner.borrow().commands.clone()
    }

    pub(crate) fn erased_pages(&self) -> Vec<u32> {
        self.commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                Command::ErasePage(addr) => Some(addr),
                _ => None,
            })
            .collect()
    }

    /// Data blocks as `(transaction, address pointer, data)`.
    pub(crate) fn writes(&self) -> Vec<(u16, u32, Vec<u8>)> {
        self.inner.borrow().writes.clone()
    }

    /// Concatenated data blocks.
    pub(crate) fn written_data(&self) -> Vec<u8> {
        self.writes()
            .into_iter()
            .flat_map(|(_, _, data)| data)
            .collect()
    }
}

/// Connection to `device` without any sleeping between manifest polls.
pub(crate) fn connect(
    device: MockDevice,
    xfer_size: u16,
) -> DfuConnection<MockDevice> {
    DfuConnection::new(
        device,
        xfer_size,
        DfuConfig::default()
            .with_busy_timeout(Duration::from_millis(50))
            .with_manifest_polling(Duration::ZERO, 10),
    )
}

fn stall(inner: &mut MockState) -> DfuError {
    inner.state = DfuState::Error;
    inner.status = DfuStatusCode::ErrStalledPkt;
    DfuError::Transfer(TransferError::Stall)
}

impl MockState {
    fn dnload(
        &mut self,
        transaction: u16,
        data: &[u8],
    ) -> Result<usize, DfuError> {
        if !matches!(self.state, DfuState::Idle | DfuState::DnloadIdle) {
            return Err(stall(self));
        }

        if data.is_empty() {
            self.state = DfuState::ManifestSync;
            self.pending_manifest = self.manifest_polls;
            return Ok(0);
        }

        self.state = DfuState::DnloadSync;
        if transaction == 0 {
            let command = match data {
                [DFUSE_CMD_SET_ADDRESS, a0, a1, a2, a3] => {
                    let addr = u32::from_le_bytes([*a0, *a1, *a2, *a3]);
                    self.address = addr;
                    Command::SetAddress(addr)
                }
                [DFUSE_CMD_ERASE, a0, a1, a2, a3] => Command::ErasePage(
                    u32::from_le_bytes([*a0, *a1, *a2, *a3]),
                ),
                [DFUSE_CMD_ERASE] => Command::MassErase,
                _ => return Err(stall(self)),
            };
            self.commands.push(command);
            self.pending_busy = self.command_busy_polls;
            self.pending_status =
                self.reject_command.unwrap_or(DfuStatusCode::Ok);
            return Ok(data.len());
        }

        self.data_dnloads += 1;
        self.writes.push((transaction, self.address, data.to_vec()));
        self.pending_busy = self.busy_polls;
        self.pending_status = match self.reject_dnload {
            Some((nth, status)) if nth == self.data_dnloads => status,
            _ => DfuStatusCode::Ok,
        };
        Ok(if self.short_write {
            data.len() - 1
        } else {
            data.len()
        })
    }

    fn get_status(&mut self) -> Vec<u8> {
        let reported = match self.state {
            DfuState::DnloadSync if self.pending_busy > 0 => {
                self.pending_busy -= 1;
                DfuState::DnBusy
            }
            DfuState::DnloadSync => {
                if self.pending_status != DfuStatusCode::Ok {
                    self.state = DfuState::Error;
                    self.status = self.pending_status;
                } else {
                    self.state = DfuState::DnloadIdle;
                }
                self.state
            }
            DfuState::ManifestSync | DfuState::Manifest
                if self.pending_manifest > 0 =>
            {
                if self.pending_manifest != u32::MAX {
                    self.pending_manifest -= 1;
                }
                self.state = DfuState::Manifest;
                self.state
            }
            DfuState::ManifestSync | DfuState::Manifest => {
                self.state = DfuState::Idle;
                self.state
            }
            state => state,
        };
        let pt = self.poll_timeout;
        vec![
            self.status.into(),
            pt as u8,
            (pt >> 8) as u8,
            (pt >> 16) as u8,
            reported.into(),
            0,
        ]
    }

    fn upload(&mut self, length: u16) -> Result<Vec<u8>, DfuError> {
        if !matches!(self.state, DfuState::Idle | DfuState::UploadIdle) {
            return Err(stall(self));
        }
        let start = self.upload_offset.min(self.upload_data.len());
        let end = (start + length as usize).min(self.upload_data.len());
        self.upload_offset = end;
        self.state = if end - start < length as usize {
            DfuState::Idle
        } else {
            DfuState::UploadIdle
        };
        Ok(self.upload_data[start..end].to_vec())
    }
}

impl DfuTransport for MockDevice {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let mut inner = self.inner.borrow_mut();
        match request {
            DFU_CMD_GETSTATUS => {
                inner.requests.push(Request::GetStatus);
                Ok(inner.get_status())
            }
            DFU_CMD_GETSTATE => {
                inner.requests.push(Request::GetState);
                Ok(vec![inner.state.into()])
            }
            DFU_CMD_UPLOAD => {
                inner.requests.push(Request::Upload {
                    transaction: value,
                    length,
                });
                inner.upload(length)
            }
            _ => Err(stall(&mut inner)),
        }
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<usize, DfuError> {
        let mut inner = self.inner.borrow_mut();
        match request {
            DFU_CMD_DOWNLOAD => {
                inner.requests.push(Request::Dnload {
                    transaction: value,
                    data: data.to_vec(),
                });
                inner.dnload(value, data)
            }
            DFU_CMD_CLRSTATUS => {
                inner.requests.push(Request::ClearStatus);
                if inner.state == DfuState::Error {
                    inner.state = DfuState::Idle;
                }
                inner.status = DfuStatusCode::Ok;
                Ok(0)
            }
            DFU_CMD_ABORT => {
                inner.requests.push(Request::Abort);
                inner.state = inner.abort_state;
                inner.status = DfuStatusCode::Ok;
                Ok(0)
            }
            DFU_CMD_DETACH => {
                inner.requests.push(Request::Detach(value));
                inner.state = DfuState::AppDetach;
                Ok(0)
            }
            _ => Err(stall(&mut inner)),
        }
    }
}
