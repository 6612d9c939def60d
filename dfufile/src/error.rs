use thiserror::Error;

#[derive(Debug, Error)]
pub enum DfuFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File too small for a DfuSe file ({size} bytes)")]
    TooSmall { size: usize },

    #[error("No valid DfuSe signature")]
    BadSignature,

    #[error("DfuSe format revision {0} not supported")]
    UnsupportedRevision(u8),

    #[error("No valid target signature in image {target}")]
    BadTargetSignature { target: usize },

    #[error("Unexpected end of file at offset {offset} ({needed} bytes needed)")]
    Truncated { offset: usize, needed: usize },

    #[error(
        "File too small for element {element} of image {target} \
         (address 0x{address:08x}, size {size})"
    )]
    ElementOverrun {
        target: usize,
        element: usize,
        address: u32,
        size: u32,
    },

    #[error("File already has a DFU suffix, remove it first")]
    SuffixAlreadyPresent,

    #[error("File has no valid DFU suffix")]
    NoSuffix,

    #[error("Suffix removal is not supported on this platform")]
    TruncationUnsupported,

    #[error("DFU suffix CRC mismatch: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    CrcMismatch { stored: u32, computed: u32 },
}
