use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher;
use log::{debug, info, warn};

use crate::{DfuFileError, extract_u16, extract_u32};

pub const DFU_SUFFIX_LEN: usize = 16;
pub const DFU_SUFFIX_SIGNATURE: &[u8; 3] = b"UFD";

/// `bcdDFU` of plain DFU 1.0 / 1.1 files
pub const DFU_VERSION: u16 = 0x0100;
/// `bcdDFU` tagging a DfuSe container
pub const DFUSE_VERSION: u16 = 0x011a;

pub const WILDCARD_ID: u16 = 0xffff;

// bytes of the suffix covered by the CRC
const DFU_SUFFIX_CRC_OFFSET: usize = 12;

/// DFU file suffix
///
/// Trailing block appended to a firmware image:
///
/// | Offset | Field       | Size |
/// |--------|-------------|------|
/// | 0      | bcdDevice   | 2    |
/// | 2      | idProduct   | 2    |
/// | 4      | idVendor    | 2    |
/// | 6      | bcdDFU      | 2    |
/// | 8      | "UFD"       | 3    |
/// | 11     | bLength     | 1    |
/// | 12     | dwCRC       | 4    |
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuSuffix {
    device: u16,
    product: u16,
    vendor: u16,
    dfu_version: u16,
    length: u8,
    crc: u32,
}

impl DfuSuffix {
    /// New suffix for a plain DFU image, CRC not computed yet.
    pub fn new(vendor: u16, product: u16, device: u16) -> Self {
        DfuSuffix {
            device,
            product,
            vendor,
            dfu_version: DFU_VERSION,
            length: DFU_SUFFIX_LEN as u8,
            crc: 0,
        }
    }

    pub fn with_dfu_version(mut self, dfu_version: u16) -> Self {
        self.dfu_version = dfu_version;
        self
    }

    /// Decode the suffix at the end of `data`.
    ///
    /// Returns `None` when `data` is too short, the signature does not match
    /// or the declared length is unsupported (or larger than `data`).
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < DFU_SUFFIX_LEN {
            debug!("File too short for DFU suffix");
            return None;
        }
        Self::decode(&data[data.len() - DFU_SUFFIX_LEN..])
            .filter(|suffix| fits_in(suffix, data.len() as u64))
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        if &raw[8..11] != DFU_SUFFIX_SIGNATURE {
            debug!("No valid DFU suffix signature");
            return None;
        }

        let length = raw[11];
        if (length as usize) < DFU_SUFFIX_LEN {
            warn!("Unsupported DFU suffix length {length}");
            return None;
        }

        Some(DfuSuffix {
            device: extract_u16(raw, 0),
            product: extract_u16(raw, 2),
            vendor: extract_u16(raw, 4),
            dfu_version: extract_u16(raw, 6),
            length,
            crc: extract_u32(raw, 12),
        })
    }

    /// Encode the suffix as stored on disk.
    pub fn to_bytes(&self) -> [u8; DFU_SUFFIX_LEN] {
        let mut raw = [0u8; DFU_SUFFIX_LEN];
        raw[0..2].copy_from_slice(&self.device.to_le_bytes());
        raw[2..4].copy_from_slice(&self.product.to_le_bytes());
        raw[4..6].copy_from_slice(&self.vendor.to_le_bytes());
        raw[6..8].copy_from_slice(&self.dfu_version.to_le_bytes());
        raw[8..11].copy_from_slice(DFU_SUFFIX_SIGNATURE);
        raw[11] = self.length;
        raw[12..16].copy_from_slice(&self.crc.to_le_bytes());
        raw
    }

    /// Suffix for `content` with its CRC filled in.
    pub fn seal(mut self, content: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(content);
        self.crc = self.finish_crc(hasher);
        self
    }

    fn finish_crc(&self, mut hasher: Hasher) -> u32 {
        hasher.update(&self.to_bytes()[..DFU_SUFFIX_CRC_OFFSET]);
        !hasher.finalize()
    }

    /// Release number of the targeted device (`bcdDevice`)
    #[doc(alias = "bcdDevice")]
    pub fn device_id(&self) -> u16 {
        self.device
    }

    #[doc(alias = "idProduct")]
    pub fn product_id(&self) -> u16 {
        self.product
    }

    #[doc(alias = "idVendor")]
    pub fn vendor_id(&self) -> u16 {
        self.vendor
    }

    #[doc(alias = "bcdDFU")]
    pub fn dfu_version(&self) -> u16 {
        self.dfu_version
    }

    /// Total length of the suffix (`bLength`), at least 16 bytes
    #[doc(alias = "bLength")]
    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[doc(alias = "dwCRC")]
    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub fn is_dfuse(&self) -> bool {
        self.dfu_version == DFUSE_VERSION
    }

    /// Check vendor / product IDs against a device, `0xffff` matches any.
    pub fn matches_device(&self, vendor: u16, product: u16) -> bool {
        (self.vendor == WILDCARD_ID || self.vendor == vendor)
            && (self.product == WILDCARD_ID || self.product == product)
    }
}

/// CRC used by the DFU suffix: reflected CRC-32, seed `0xffffffff`,
/// without the final inversion.
pub fn dfu_crc(data: &[u8]) -> u32 {
    !crc32fast::hash(data)
}

/// Firmware file on disk with its (optional) DFU suffix
pub struct FirmwareFile {
    path: PathBuf,
    file: File,
    size: u64,
    suffix: Option<DfuSuffix>,
}

impl FirmwareFile {
    /// Open read-only, for inspection and download.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DfuFileError> {
        let file = File::open(path.as_ref())?;
        Self::from_file(path.as_ref(), file)
    }

    /// Open read-write, for suffix addition and removal.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self, DfuFileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        Self::from_file(path.as_ref(), file)
    }

    fn from_file(path: &Path, mut file: File) -> Result<Self, DfuFileError> {
        let size = file.metadata()?.len();
        let suffix = read_suffix(&mut file, size)?;
        if let Some(suffix) = &suffix {
            debug!("DFU suffix version {:x}", suffix.dfu_version());
        }
        Ok(FirmwareFile {
            path: path.to_path_buf(),
            file,
            size,
            suffix,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn suffix(&self) -> Option<&DfuSuffix> {
        self.suffix.as_ref()
    }

    /// Suffix length, 0 without a valid suffix
    pub fn suffix_len(&self) -> usize {
        self.suffix.map_or(0, |s| s.len())
    }

    pub fn vendor_id(&self) -> u16 {
        self.suffix.map_or(WILDCARD_ID, |s| s.vendor_id())
    }

    pub fn product_id(&self) -> u16 {
        self.suffix.map_or(WILDCARD_ID, |s| s.product_id())
    }

    pub fn device_id(&self) -> u16 {
        self.suffix.map_or(WILDCARD_ID, |s| s.device_id())
    }

    /// `bcdDFU` from the suffix, 0 without a valid suffix
    pub fn dfu_version(&self) -> u16 {
        self.suffix.map_or(0, |s| s.dfu_version())
    }

    pub fn matches_device(&self, vendor: u16, product: u16) -> bool {
        self.suffix.is_none_or(|s| s.matches_device(vendor, product))
    }

    /// Whole file, suffix included.
    pub fn read_all(&mut self) -> Result<Vec<u8>, DfuFileError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::with_capacity(self.size as usize);
        self.file.read_to_end(&mut data)?;
        if data.len() as u64 != self.size {
            warn!("Read {} bytes, file size {}", data.len(), self.size);
        }
        Ok(data)
    }

    /// File content without the suffix.
    pub fn read_payload(&mut self) -> Result<Vec<u8>, DfuFileError> {
        let mut data = self.read_all()?;
        data.truncate(data.len().saturating_sub(self.suffix_len()));
        Ok(data)
    }

    /// Recompute the CRC and compare it with the stored one.
    pub fn verify_crc(&mut self) -> Result<u32, DfuFileError> {
        let suffix = self.suffix.ok_or(DfuFileError::NoSuffix)?;
        let mut hasher = Hasher::new();
        self.file.seek(SeekFrom::Start(0))?;
        update_crc(&mut self.file, self.size - 4, &mut hasher)?;
        let computed = !hasher.finalize();
        if computed != suffix.crc() {
            return Err(DfuFileError::CrcMismatch {
                stored: suffix.crc(),
                computed,
            });
        }
        Ok(computed)
    }

    /// Append `suffix` with a freshly computed CRC.
    ///
    /// The file must not carry a valid suffix already.
    pub fn add_suffix(
        &mut self,
        suffix: DfuSuffix,
    ) -> Result<DfuSuffix, DfuFileError> {
        if self.suffix.is_some() {
            return Err(DfuFileError::SuffixAlreadyPresent);
        }

        let mut hasher = Hasher::new();
        self.file.seek(SeekFrom::Start(0))?;
        update_crc(&mut self.file, self.size, &mut hasher)?;
        let suffix = DfuSuffix {
            length: DFU_SUFFIX_LEN as u8,
            ..suffix
        };
        let suffix = DfuSuffix {
            crc: suffix.finish_crc(hasher),
            ..suffix
        };

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&suffix.to_bytes())?;
        self.file.flush()?;

        self.size += DFU_SUFFIX_LEN as u64;
        self.suffix = Some(suffix);
        info!("New DFU suffix added to {}", self.path.display());
        Ok(suffix)
    }

    /// Truncate the file by the suffix length.
    pub fn remove_suffix(&mut self) -> Result<DfuSuffix, DfuFileError> {
        let suffix = self.suffix.ok_or(DfuFileError::NoSuffix)?;
        let new_size = self.size - suffix.len() as u64;
        self.file.set_len(new_size).map_err(|err| {
            if err.kind() == io::ErrorKind::Unsupported {
                DfuFileError::TruncationUnsupported
            } else {
                DfuFileError::Io(err)
            }
        })?;
        self.size = new_size;
        self.suffix = None;
        info!("DFU suffix removed from {}", self.path.display());
        Ok(suffix)
    }
}

fn read_suffix(
    file: &mut File,
    size: u64,
) -> Result<Option<DfuSuffix>, DfuFileError> {
    if size < DFU_SUFFIX_LEN as u64 {
        debug!("File too short for DFU suffix");
        return Ok(None);
    }

    let mut raw = [0u8; DFU_SUFFIX_LEN];
    file.seek(SeekFrom::End(-(DFU_SUFFIX_LEN as i64)))?;
    file.read_exact(&mut raw)?;
    file.seek(SeekFrom::Start(0))?;

    Ok(DfuSuffix::decode(&raw).filter(|suffix| fits_in(suffix, size)))
}

fn fits_in(suffix: &DfuSuffix, size: u64) -> bool {
    let fits = suffix.len() as u64 <= size;
    if !fits {
        warn!("DFU suffix length {} exceeds file size {size}", suffix.len());
    }
    fits
}

fn update_crc(
    reader: &mut impl Read,
    len: u64,
    hasher: &mut Hasher,
) -> io::Result<()> {
    let mut reader = reader.take(len);
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firmware_file(content: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmware.bin");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_dfu_crc() {
        // reflected CRC-32 of "123456789" is 0xcbf43926 after the final
        // inversion, the DFU variant skips it
        assert_eq!(dfu_crc(b"123456789"), !0xcbf4_3926);
        assert_eq!(dfu_crc(b"123456789"), dfu_crc(b"123456789"));
    }

    #[test]
    fn test_parse_suffix() {
        let mut data = vec![0x55u8; 32];
        data.extend([
            0x00, 0x02, // bcdDevice
            0x11, 0xdf, // idProduct
            0x83, 0x04, // idVendor
            0x1a, 0x01, // bcdDFU
            b'U', b'F', b'D', 16, // signature, length
            0x78, 0x56, 0x34, 0x12, // dwCRC
        ]);

        let suffix = DfuSuffix::parse(&data).unwrap();
        assert_eq!(suffix.device_id(), 0x0200);
        assert_eq!(suffix.product_id(), 0xdf11);
        assert_eq!(suffix.vendor_id(), 0x0483);
        assert_eq!(suffix.dfu_version(), DFUSE_VERSION);
        assert!(suffix.is_dfuse());
        assert_eq!(suffix.len(), 16);
        assert_eq!(suffix.crc(), 0x12345678);
        assert_eq!(&suffix.to_bytes()[..], &data[32..]);
    }

    #[test]
    fn test_parse_no_suffix() {
        assert_eq!(DfuSuffix::parse(b"too short"), None);
        assert_eq!(DfuSuffix::parse(&[0u8; 64]), None);

        let mut data = vec![0u8; 32];
        data.extend(DfuSuffix::new(1, 2, 3).to_bytes());
        // unsupported suffix length
        data[32 + 11] = 15;
        assert_eq!(DfuSuffix::parse(&data), None);
        // suffix claims more than the whole file
        data[32 + 11] = 64;
        assert_eq!(DfuSuffix::parse(&data), None);
    }

    #[test]
    fn test_matches_device() {
        let suffix = DfuSuffix::new(0x0483, 0xdf11, 0x0200);
        assert!(suffix.matches_device(0x0483, 0xdf11));
        assert!(!suffix.matches_device(0x0483, 0x0001));

        let any = DfuSuffix::new(WILDCARD_ID, WILDCARD_ID, WILDCARD_ID);
        assert!(any.matches_device(0x1234, 0x5678));
    }

    #[test]
    fn test_file_without_suffix() {
        let (_dir, path) = firmware_file(&[0xa5; 100]);
        let mut file = FirmwareFile::open(&path).unwrap();
        assert!(file.suffix().is_none());
        assert_eq!(file.suffix_len(), 0);
        assert_eq!(file.vendor_id(), WILDCARD_ID);
        assert_eq!(file.product_id(), WILDCARD_ID);
        assert_eq!(file.device_id(), WILDCARD_ID);
        assert_eq!(file.dfu_version(), 0);
        assert_eq!(file.read_payload().unwrap().len(), 100);
        assert!(matches!(file.verify_crc(), Err(DfuFileError::NoSuffix)));
        assert!(matches!(file.remove_suffix(), Err(DfuFileError::NoSuffix)));
    }

    #[test]
    fn test_add_check_remove_suffix() {
        let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let (_dir, path) = firmware_file(&content);

        let mut file = FirmwareFile::open_rw(&path).unwrap();
        let added = file
            .add_suffix(DfuSuffix::new(0x0483, 0xdf11, 0x2200))
            .unwrap();
        assert_eq!(file.size(), 1016);
        assert!(matches!(
            file.add_suffix(DfuSuffix::new(1, 2, 3)),
            Err(DfuFileError::SuffixAlreadyPresent)
        ));
        drop(file);

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..1000], &content[..]);
        assert_eq!(dfu_crc(&raw[..raw.len() - 4]), added.crc());

        let mut file = FirmwareFile::open(&path).unwrap();
        let suffix = *file.suffix().unwrap();
        assert_eq!(suffix, added);
        assert_eq!(suffix.vendor_id(), 0x0483);
        assert_eq!(suffix.product_id(), 0xdf11);
        assert_eq!(suffix.device_id(), 0x2200);
        assert_eq!(suffix.dfu_version(), DFU_VERSION);
        assert_eq!(file.verify_crc().unwrap(), suffix.crc());
        assert_eq!(file.read_payload().unwrap(), content);
        drop(file);

        let mut file = FirmwareFile::open_rw(&path).unwrap();
        file.remove_suffix().unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), content);
        assert!(FirmwareFile::open(&path).unwrap().suffix().is_none());
    }

    #[test]
    fn test_corrupted_byte_fails_crc() {
        let (_dir, path) = firmware_file(&[0x11; 64]);
        FirmwareFile::open_rw(&path)
            .unwrap()
            .add_suffix(
                DfuSuffix::new(0x1d50, 0x6017, 0)
                    .with_dfu_version(DFUSE_VERSION),
            )
            .unwrap();

        let original = std::fs::read(&path).unwrap();
        // every byte before the CRC field is covered
        for offset in [0, 31, 63, 64, 70, 75] {
            let mut corrupted = original.clone();
            corrupted[offset] ^= 0x01;
            std::fs::write(&path, &corrupted).unwrap();
            let mut file = FirmwareFile::open(&path).unwrap();
            assert!(
                matches!(
                    file.verify_crc(),
                    Err(DfuFileError::CrcMismatch { .. })
                ),
                "offset {offset}"
            );
        }

        // a damaged signature is no suffix at all
        let mut corrupted = original.clone();
        corrupted[73] = b'X';
        std::fs::write(&path, &corrupted).unwrap();
        assert!(FirmwareFile::open(&path).unwrap().suffix().is_none());
    }

    #[test]
    fn test_seal_matches_file_crc() {
        let content = [0xdeu8, 0xad, 0xbe, 0xef];
        let suffix = DfuSuffix::new(0x0483, 0xdf11, 0).seal(&content);

        let mut data = content.to_vec();
        data.extend(suffix.to_bytes());
        assert_eq!(dfu_crc(&data[..data.len() - 4]), suffix.crc());
    }
}
