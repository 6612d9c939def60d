//! DfuSe extension: special commands, page aware programming and
//! addressed uploads (AN3156)

use std::{fmt, io::Write};

use dfufile::DfuseImage;
use log::{debug, info, warn};

use crate::{
    DfuConnection, DfuError, DfuMemSegment, DfuMemory, DfuState,
    DfuStatusCode,
    transfer::{self, FIRST_BLOCK_TRANSACTION},
    transport::{DfuTransport, NusbTransport},
};

/// Upload length when no start address is given
pub const DFUSE_DEFAULT_UPLOAD_LIMIT: usize = 0x4000;

const DFUSE_CMD_SET_ADDRESS: u8 = 0x21;
const DFUSE_CMD_ERASE: u8 = 0x41;

/// Commands sent as `DFU_DNLOAD` payload on transaction 0
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DfuseCommand {
    SetAddress,
    ErasePage,
    MassErase,
}

impl DfuseCommand {
    pub fn encode(&self, address: u32) -> Vec<u8> {
        let [a0, a1, a2, a3] = address.to_le_bytes();
        match self {
            DfuseCommand::SetAddress => {
                vec![DFUSE_CMD_SET_ADDRESS, a0, a1, a2, a3]
            }
            DfuseCommand::ErasePage => vec![DFUSE_CMD_ERASE, a0, a1, a2, a3],
            DfuseCommand::MassErase => vec![DFUSE_CMD_ERASE],
        }
    }
}

impl fmt::Display for DfuseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DfuseCommand::SetAddress => "Set address",
            DfuseCommand::ErasePage => "Erase page",
            DfuseCommand::MassErase => "Mass erase",
        })
    }
}

/// Base address of the last erased page
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErasedPageTracker {
    last: Option<u32>,
}

impl ErasedPageTracker {
    pub fn last_erased(&self) -> Option<u32> {
        self.last
    }

    pub fn is_erased(&self, page_base: u32) -> bool {
        self.last == Some(page_base)
    }

    fn record(&mut self, page_base: u32) {
        self.last = Some(page_base);
    }

    fn clear(&mut self) {
        self.last = None;
    }
}

/// DfuSe operations on one alternate setting
pub struct DfuseSession<'a, T: DfuTransport = NusbTransport> {
    conn: &'a DfuConnection<T>,
    memory: &'a DfuMemory,
    erased: ErasedPageTracker,
}

impl<'a, T: DfuTransport> DfuseSession<'a, T> {
    pub fn new(conn: &'a DfuConnection<T>, memory: &'a DfuMemory) -> Self {
        DfuseSession {
            conn,
            memory,
            erased: ErasedPageTracker::default(),
        }
    }

    pub fn memory(&self) -> &DfuMemory {
        self.memory
    }

    pub fn erased_pages(&self) -> &ErasedPageTracker {
        &self.erased
    }

    /// Send a special command and walk the device back to `dfuIDLE`
    ///
    /// The device must answer `dfuDNBUSY`, then report success, then
    /// enter `dfuIDLE` on abort. Anything else leaves the target memory in
    /// an unknown state and fails the command.
    pub fn special_command(
        &mut self,
        address: u32,
        command: DfuseCommand,
    ) -> Result<(), DfuError> {
        let mut erased_page = None;
        match command {
            DfuseCommand::ErasePage => {
                let segment = self
                    .memory
                    .find_segment(address)
                    .filter(|s| s.erasable())
                    .ok_or(DfuError::NotErasable(address))?;
                let page_base = segment.page_base(address);
                debug!(
                    "Erasing page size {} at address 0x{address:08x}, \
                     page starting at 0x{page_base:08x}",
                    segment.page_size()
                );
                erased_page = Some(page_base);
            }
            DfuseCommand::SetAddress => {
                debug!("Setting address pointer to 0x{address:08x}");
            }
            DfuseCommand::MassErase => info!("Mass erase"),
        }

        self.conn.dnload(0, &command.encode(address))?;

        let st = self.conn.get_status()?;
        if st.state != DfuState::DnBusy {
            return Err(DfuError::UnexpectedState {
                expected: DfuState::DnBusy,
                got: st.state,
            });
        }
        // wait while command is executed
        self.conn.wait_poll_timeout(&st);

        let st = self.conn.get_status()?;
        if st.status != DfuStatusCode::Ok {
            return Err(DfuError::CommandRejected {
                command,
                address,
                status: st.status,
            });
        }
        self.conn.wait_poll_timeout(&st);

        self.abort_to_idle()?;

        match command {
            DfuseCommand::MassErase => self.erased.clear(),
            _ => {
                if let Some(page_base) = erased_page {
                    self.erased.record(page_base);
                }
            }
        }
        Ok(())
    }

    pub fn set_address(&mut self, address: u32) -> Result<(), DfuError> {
        self.special_command(address, DfuseCommand::SetAddress)
    }

    pub fn erase_page(&mut self, address: u32) -> Result<(), DfuError> {
        self.special_command(address, DfuseCommand::ErasePage)
    }

    pub fn mass_erase(&mut self) -> Result<(), DfuError> {
        self.special_command(0, DfuseCommand::MassErase)
    }

    fn abort_to_idle(&self) -> Result<(), DfuError> {
        self.conn.abort()?;
        let st = self.conn.get_status()?;
        if st.state != DfuState::Idle {
            return Err(DfuError::AbortFailed { state: st.state });
        }
        self.conn.wait_poll_timeout(&st);
        Ok(())
    }

    fn writable_segment(
        &self,
        address: u32,
    ) -> Result<&'a DfuMemSegment, DfuError> {
        let memory: &'a DfuMemory = self.memory;
        memory
            .find_segment(address)
            .filter(|s| s.writable())
            .ok_or(DfuError::NotWritable(address))
    }

    /// Program `data` at `address`, erasing every touched page once
    pub fn download_element(
        &mut self,
        address: u32,
        data: &[u8],
        block_size: u16,
    ) -> Result<(), DfuError> {
        if data.is_empty() {
            debug!("Skipping empty element at 0x{address:08x}");
            return Ok(());
        }
        if block_size == 0 {
            return Err(DfuError::InvalidTransferSize(block_size));
        }

        let last_addr = u32::try_from(data.len() - 1)
            .ok()
            .and_then(|len| address.checked_add(len))
            .ok_or(DfuError::AddressOverflow {
                address,
                size: data.len(),
            })?;
        // fail before programming anything
        self.writable_segment(last_addr)?;

        for (i, chunk) in data.chunks(block_size as usize).enumerate() {
            let chunk_addr = address + (i * block_size as usize) as u32;
            let chunk_last = chunk_addr + (chunk.len() - 1) as u32;
            let segment = self.writable_segment(chunk_addr)?;

            if segment.erasable() {
                let mut erase_addr = Some(chunk_addr);
                while let Some(addr) = erase_addr.filter(|a| *a <= chunk_last)
                {
                    if !self.erased.is_erased(segment.page_base(addr)) {
                        self.erase_page(addr)?;
                    }
                    erase_addr = addr.checked_add(segment.page_size());
                }
                if !self.erased.is_erased(segment.page_base(chunk_last)) {
                    debug!("Chunk wraps over to next page");
                    self.erase_page(chunk_last)?;
                }
            }

            debug!(
                "Download from image offset {:08x} to memory \
                 {chunk_addr:08x}-{chunk_last:08x}, size {}",
                i * block_size as usize,
                chunk.len()
            );
            self.set_address(chunk_addr)?;

            // transaction 2: no offset to the address pointer
            let written =
                self.conn.dnload_chunk(FIRST_BLOCK_TRANSACTION, chunk)?;
            if written != chunk.len() {
                return Err(DfuError::ShortWrite {
                    address: chunk_addr,
                    written,
                    expected: chunk.len(),
                });
            }
        }
        Ok(())
    }

    /// Program every element of the targets for `alt_setting`
    ///
    /// Targets for other alternate settings are skipped with a warning.
    /// Returns the number of elements found for `alt_setting`.
    pub fn download_image(
        &mut self,
        image: &DfuseImage,
        alt_setting: u8,
        block_size: u16,
    ) -> Result<usize, DfuError> {
        let mut count = 0;
        for target in image.targets() {
            if target.alt_setting() != alt_setting {
                warn!(
                    "Image for alternate setting {} does not match \
                     current alternate setting {alt_setting}, skipping",
                    target.alt_setting()
                );
                continue;
            }
            info!(
                "Downloading image for alternate setting {} ({})",
                target.alt_setting(),
                target.name().unwrap_or("unnamed")
            );
            for element in target.elements() {
                info!(
                    "Element at 0x{:08x}, {} bytes",
                    element.address(),
                    element.size()
                );
                self.download_element(
                    element.address(),
                    element.data(),
                    block_size,
                )?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Read memory into `out`
    ///
    /// With an address the upload starts there and never goes past the
    /// end of its segment, without one the device decides where to start
    /// and [`DFUSE_DEFAULT_UPLOAD_LIMIT`] bytes are read unless `limit`
    /// says otherwise.
    pub fn upload(
        &mut self,
        address: Option<u32>,
        limit: Option<usize>,
        block_size: u16,
        out: &mut impl Write,
    ) -> Result<usize, DfuError> {
        let limit = match address {
            Some(address) => {
                let segment = self
                    .memory
                    .find_segment(address)
                    .filter(|s| s.readable())
                    .ok_or(DfuError::NotReadable(address))?;
                let segment_limit =
                    (segment.end_addr() - address) as usize + 1;
                self.set_address(address)?;
                limit.map_or(segment_limit, |l| l.min(segment_limit))
            }
            None => limit.unwrap_or(DFUSE_DEFAULT_UPLOAD_LIMIT),
        };
        info!("Limiting upload to {limit} bytes");

        let mut total = 0;
        let mut blocks =
            transfer::upload(self.conn, block_size).with_limit(limit);
        for block in blocks.by_ref() {
            let block = block?;
            out.write_all(&block)?;
            total += block.len();
        }
        if blocks.limit_reached() {
            self.abort_to_idle()?;
        }
        Ok(total)
    }

    /// Leave DFU mode, optionally jumping to `address`
    pub fn leave(&mut self, address: Option<u32>) -> Result<(), DfuError> {
        if let Some(address) = address {
            self.set_address(address)?;
        }
        info!("Leaving DFU mode");
        self.conn.dnload(FIRST_BLOCK_TRANSACTION, &[])?;
        // the device may already be gone
        match self.conn.get_status() {
            Ok(st) => debug!("After leave: {st}"),
            Err(err) => debug!("No status after leave: {err}"),
        }
        Ok(())
    }
}
