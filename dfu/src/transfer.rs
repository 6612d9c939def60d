//! Chunked plain DFU transfers

use std::cmp;

use log::{debug, info};

use crate::{DfuConnection, DfuError, transport::DfuTransport};

/// Block number of the first data block
///
/// DfuSe uses 0 for special commands and treats 1 as reserved, so blocks
/// are numbered from 2 for plain DFU as well.
pub const FIRST_BLOCK_TRANSACTION: u16 = 2;

/// Lazy sequence of uploaded blocks
///
/// A reply shorter than the requested length is the last block. The
/// sequence also stops once the optional byte limit has been reached, in
/// which case the device is left in `dfuUPLOAD-IDLE`.
pub struct Upload<'a, T: DfuTransport> {
    conn: &'a DfuConnection<T>,
    block_size: u16,
    transaction: u16,
    remaining: Option<usize>,
    limit_reached: bool,
    done: bool,
}

impl<'a, T: DfuTransport> Upload<'a, T> {
    fn new(conn: &'a DfuConnection<T>, block_size: u16) -> Self {
        Upload {
            conn,
            block_size,
            transaction: FIRST_BLOCK_TRANSACTION,
            remaining: None,
            limit_reached: false,
            done: block_size == 0,
        }
    }

    /// Stop after `limit` bytes
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.remaining = Some(limit);
        self
    }

    pub fn with_optional_limit(self, limit: Option<usize>) -> Self {
        match limit {
            Some(limit) => self.with_limit(limit),
            None => self,
        }
    }

    /// The upload ended on the byte limit, not on a short block
    pub fn limit_reached(&self) -> bool {
        self.limit_reached
    }
}

impl<T: DfuTransport> Iterator for Upload<'_, T> {
    type Item = Result<Vec<u8>, DfuError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let length = match self.remaining {
            Some(0) => {
                self.done = true;
                self.limit_reached = true;
                return None;
            }
            Some(remaining) => {
                cmp::min(remaining, self.block_size as usize) as u16
            }
            None => self.block_size,
        };

        let data = match self.conn.upload(self.transaction, length) {
            Ok(data) => data,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };
        self.transaction = self.transaction.wrapping_add(1);

        if data.len() < length as usize {
            debug!("Short block ({} bytes), upload complete", data.len());
            self.done = true;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(data.len());
            if *remaining == 0 && !self.done {
                self.done = true;
                self.limit_reached = true;
            }
        }

        if data.is_empty() {
            None
        } else {
            Some(Ok(data))
        }
    }
}

/// Read blocks of `block_size` bytes until the device sends a short one
pub fn upload<T: DfuTransport>(
    conn: &DfuConnection<T>,
    block_size: u16,
) -> Upload<'_, T> {
    Upload::new(conn, block_size)
}

/// Write `data` in blocks of `block_size` bytes, then manifest
pub fn download<T: DfuTransport>(
    conn: &DfuConnection<T>,
    block_size: u16,
    data: &[u8],
) -> Result<(), DfuError> {
    if block_size == 0 {
        return Err(DfuError::InvalidTransferSize(block_size));
    }

    info!(
        "Downloading {} bytes in blocks of {block_size} bytes",
        data.len()
    );
    let mut transaction = FIRST_BLOCK_TRANSACTION;
    for (i, chunk) in data.chunks(block_size as usize).enumerate() {
        let written = conn.dnload_chunk(transaction, chunk)?;
        if written != chunk.len() {
            return Err(DfuError::ShortWrite {
                address: (i * block_size as usize) as u32,
                written,
                expected: chunk.len(),
            });
        }
        transaction = transaction.wrapping_add(1);
    }

    info!("Sending end of transfer");
    conn.dnload(transaction, &[])?;
    conn.wait_manifest()
}
