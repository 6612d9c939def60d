use std::{
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, trace};

use crate::{
    DfuConfig, DfuError, DfuState, DfuStatus, DfuStatusCode,
    status::DFU_STATUS_LEN,
    transport::{DfuTransport, NusbTransport},
};

const DFU_CMD_DETACH: u8 = 0;
const DFU_CMD_DOWNLOAD: u8 = 1;
const DFU_CMD_UPLOAD: u8 = 2;
const DFU_CMD_GETSTATUS: u8 = 3;
const DFU_CMD_CLRSTATUS: u8 = 4;
const DFU_CMD_GETSTATE: u8 = 5;
const DFU_CMD_ABORT: u8 = 6;

/// Open DFU session on a single interface
///
/// All requests are issued synchronously, one at a time. The connection
/// never caches device state: every decision is taken on a fresh
/// `DFU_GETSTATUS` reply.
pub struct DfuConnection<T: DfuTransport = NusbTransport> {
    transport: T,
    xfer_size: u16,
    config: DfuConfig,
}

impl<T: DfuTransport> DfuConnection<T> {
    /// A transfer size of 0 selects [`DEFAULT_TRANSFER_SIZE`].
    ///
    /// [`DEFAULT_TRANSFER_SIZE`]: crate::DEFAULT_TRANSFER_SIZE
    pub fn new(transport: T, xfer_size: u16, config: DfuConfig) -> Self {
        DfuConnection {
            transport,
            xfer_size: if xfer_size > 0 {
                xfer_size
            } else {
                crate::DEFAULT_TRANSFER_SIZE
            },
            config,
        }
    }

    pub fn transfer_size(&self) -> u16 {
        self.xfer_size
    }

    pub fn with_transfer_size(mut self, xfer_size: u16) -> Self {
        if xfer_size > 0 {
            self.xfer_size = xfer_size;
        }
        self
    }

    pub fn config(&self) -> &DfuConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Bring the device back to `dfuIDLE`
    pub fn reset_state(&self) -> Result<(), DfuError> {
        let mut st = self.get_status()?;
        if st.status != DfuStatusCode::Ok || st.state == DfuState::Error {
            debug!("Clearing status: {st}");
            self.clear_status()?;
            st = self.get_status()?;
        }
        if st.state != DfuState::Idle {
            debug!("Aborting: {st}");
            self.abort()?;
            st = self.get_status()?;
        }
        st.ok()?;
        if st.state != DfuState::Idle {
            return Err(DfuError::UnexpectedState {
                expected: DfuState::Idle,
                got: st.state,
            });
        }
        Ok(())
    }

    pub fn get_status(&self) -> Result<DfuStatus, DfuError> {
        let data =
            self.transport
                .control_in(DFU_CMD_GETSTATUS, 0, DFU_STATUS_LEN)?;
        let st = DfuStatus::from_raw(&data)?;
        trace!("GETSTATUS: {st}, poll timeout {} ms", st.poll_timeout);
        Ok(st)
    }

    pub fn clear_status(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_CLRSTATUS, 0, &[])?;
        Ok(())
    }

    pub fn abort(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_ABORT, 0, &[])?;
        Ok(())
    }

    pub fn get_state(&self) -> Result<DfuState, DfuError> {
        let data = self.transport.control_in(DFU_CMD_GETSTATE, 0, 1)?;
        match data.first() {
            Some(state) => Ok(DfuState::from(*state)),
            None => Err(DfuError::ShortResponse {
                expected: 1,
                got: 0,
            }),
        }
    }

    /// Ask a run-time device to enter DFU mode
    ///
    /// `timeout_ms` is the time the device waits for a USB reset.
    pub fn detach(&self, timeout_ms: u16) -> Result<(), DfuError> {
        info!("Detaching, timeout {timeout_ms} ms");
        self.transport.control_out(DFU_CMD_DETACH, timeout_ms, &[])?;
        Ok(())
    }

    pub(crate) fn dnload(
        &self,
        transaction: u16,
        data: &[u8],
    ) -> Result<usize, DfuError> {
        debug!("DNLOAD #{transaction}, {} bytes", data.len());
        self.transport
            .control_out(DFU_CMD_DOWNLOAD, transaction, data)
    }

    pub(crate) fn upload(
        &self,
        transaction: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let data =
            self.transport
                .control_in(DFU_CMD_UPLOAD, transaction, length)?;
        debug!("UPLOAD #{transaction}, {} bytes", data.len());
        Ok(data)
    }

    /// Time to wait before the next request
    pub(crate) fn poll_delay(&self, st: &DfuStatus) -> Duration {
        self.config
            .poll_timeout_override
            .unwrap_or_else(|| st.poll_timeout())
    }

    pub(crate) fn wait_poll_timeout(&self, st: &DfuStatus) {
        let delay = self.poll_delay(st);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    /// Send one block and poll until the device has processed it
    pub(crate) fn dnload_chunk(
        &self,
        transaction: u16,
        data: &[u8],
    ) -> Result<usize, DfuError> {
        let written = self.dnload(transaction, data)?;

        let start = Instant::now();
        let st = loop {
            let st = self.get_status()?;
            self.wait_poll_timeout(&st);
            match st.state {
                DfuState::DnloadSync | DfuState::DnBusy => {
                    if start.elapsed() >= self.config.busy_timeout {
                        return Err(DfuError::Timeout);
                    }
                }
                _ => break st,
            }
        };

        if st.status != DfuStatusCode::Ok {
            return Err(DfuError::DownloadRejected {
                state: st.state,
                status: st.status,
            });
        }
        if st.state != DfuState::DnloadIdle {
            return Err(DfuError::UnexpectedState {
                expected: DfuState::DnloadIdle,
                got: st.state,
            });
        }
        Ok(written)
    }

    /// Poll through manifestation after the zero length download
    pub(crate) fn wait_manifest(&self) -> Result<(), DfuError> {
        let limit = self.config.manifest_poll_limit;
        for _ in 0..limit {
            let st = self.get_status()?;
            if st.status != DfuStatusCode::Ok {
                return Err(DfuError::DownloadRejected {
                    state: st.state,
                    status: st.status,
                });
            }
            match st.state {
                DfuState::Idle => return Ok(()),
                DfuState::ManifestWaitReset => {
                    info!("Device requires a reset to leave manifestation");
                    return Ok(());
                }
                DfuState::ManifestSync
                | DfuState::Manifest
                | DfuState::DnloadIdle => {
                    debug!("Manifesting: {st}");
                    let delay = self
                        .poll_delay(&st)
                        .max(self.config.manifest_poll_interval);
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                DfuState::Error => {
                    return Err(DfuError::DownloadRejected {
                        state: st.state,
                        status: st.status,
                    });
                }
                other => {
                    return Err(DfuError::UnexpectedState {
                        expected: DfuState::Idle,
                        got: other,
                    });
                }
            }
        }
        Err(DfuError::ManifestationTimeout { polls: limit })
    }
}
