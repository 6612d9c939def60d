use log::{debug, info, warn};

use crate::{DfuFileError, extract_u32};

pub const DFUSE_PREFIX_LEN: usize = 11;
pub const DFUSE_TARGET_PREFIX_LEN: usize = 274;
pub const DFUSE_ELEMENT_HEADER_LEN: usize = 8;

pub const DFUSE_SIGNATURE: &[u8; 5] = b"DfuSe";
pub const DFUSE_TARGET_SIGNATURE: &[u8; 6] = b"Target";
pub const DFUSE_FORMAT_REVISION: u8 = 1;

const TARGET_NAME_RANGE: std::ops::Range<usize> = 8..266;

/// DfuSe container (UM0391)
///
/// ```text
/// prefix   "DfuSe" | bVersion | DFUImageSize (u32) | bTargets
/// target   "Target" | bAlternateSetting | bTargetNamed | szTargetName
///          | dwTargetSize (u32) | dwNbElements (u32)
/// element  dwElementAddress (u32) | dwElementSize (u32) | data
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuseImage {
    revision: u8,
    image_size: u32,
    targets: Vec<DfuseTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuseTarget {
    alt_setting: u8,
    name: Option<String>,
    target_size: u32,
    elements: Vec<DfuseElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuseElement {
    address: u32,
    data: Vec<u8>,
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DfuFileError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DfuFileError::Truncated {
                offset: self.offset,
                needed: len,
            })?;
        let chunk = &self.data[self.offset..end];
        self.offset = end;
        Ok(chunk)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

impl DfuseImage {
    /// Decode a DfuSe container.
    ///
    /// `data` is the whole file, `suffix_len` the length of its DFU suffix:
    /// element payloads may never extend into the suffix.
    pub fn parse(
        data: &[u8],
        suffix_len: usize,
    ) -> Result<DfuseImage, DfuFileError> {
        if data.len()
            <= DFUSE_PREFIX_LEN
                + suffix_len
                + DFUSE_TARGET_PREFIX_LEN
                + DFUSE_ELEMENT_HEADER_LEN
        {
            return Err(DfuFileError::TooSmall { size: data.len() });
        }

        let mut cursor = Cursor { data, offset: 0 };
        let prefix = cursor.take(DFUSE_PREFIX_LEN)?;
        if &prefix[0..5] != DFUSE_SIGNATURE {
            return Err(DfuFileError::BadSignature);
        }
        let revision = prefix[5];
        if revision != DFUSE_FORMAT_REVISION {
            return Err(DfuFileError::UnsupportedRevision(revision));
        }
        let image_size = extract_u32(prefix, 6);
        let target_count = prefix[10] as usize;
        info!("File contains {target_count} DFU images");

        let mut targets = Vec::with_capacity(target_count);
        for target in 1..=target_count {
            debug!("Parsing DFU image {target}");
            targets.push(parse_target(&mut cursor, target, suffix_len)?);
        }

        // only the suffix is expected after the last element
        let trailing = cursor.remaining();
        if trailing < suffix_len {
            return Err(DfuFileError::Truncated {
                offset: cursor.offset,
                needed: suffix_len,
            });
        }
        cursor.take(suffix_len)?;
        if trailing != suffix_len {
            warn!("Read {} bytes, file size {}", cursor.offset, data.len());
        }

        debug!("Done parsing DfuSe file");
        Ok(DfuseImage {
            revision,
            image_size,
            targets,
        })
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    /// Image size as declared in the prefix (`DFUImageSize`)
    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn targets(&self) -> &[DfuseTarget] {
        &self.targets
    }

    /// Container bytes, without DFU suffix
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.image_size as usize);
        out.extend(DFUSE_SIGNATURE);
        out.push(self.revision);
        out.extend(self.image_size.to_le_bytes());
        out.push(self.targets.len() as u8);
        for target in &self.targets {
            target.encode(&mut out);
        }
        out
    }

    pub fn new(targets: Vec<DfuseTarget>) -> Self {
        let size: usize = targets
            .iter()
            .map(|t| DFUSE_TARGET_PREFIX_LEN + t.target_size as usize)
            .sum();
        DfuseImage {
            revision: DFUSE_FORMAT_REVISION,
            image_size: (DFUSE_PREFIX_LEN + size) as u32,
            targets,
        }
    }
}

fn parse_target(
    cursor: &mut Cursor,
    target: usize,
    suffix_len: usize,
) -> Result<DfuseTarget, DfuFileError> {
    let prefix = cursor.take(DFUSE_TARGET_PREFIX_LEN)?;
    if &prefix[0..6] != DFUSE_TARGET_SIGNATURE {
        return Err(DfuFileError::BadTargetSignature { target });
    }

    let alt_setting = prefix[6];
    let name = if prefix[7] != 0 {
        Some(decode_name(&prefix[TARGET_NAME_RANGE]))
    } else {
        None
    };
    let target_size = extract_u32(prefix, 266);
    let element_count = extract_u32(prefix, 270) as usize;
    info!(
        "Image for alternate setting {alt_setting}, \
         ({element_count} elements, total size = {target_size})"
    );

    let mut elements = Vec::new();
    for element in 1..=element_count {
        let header = cursor.take(DFUSE_ELEMENT_HEADER_LEN)?;
        let address = extract_u32(header, 0);
        let size = extract_u32(header, 4);
        debug!(
            "Parsing element {element}, address = 0x{address:08x}, \
             size = {size}"
        );

        // never read into the suffix
        if cursor.offset + size as usize + suffix_len > cursor.data.len() {
            return Err(DfuFileError::ElementOverrun {
                target,
                element,
                address,
                size,
            });
        }
        let data = cursor.take(size as usize)?.to_vec();
        elements.push(DfuseElement { address, data });
    }

    Ok(DfuseTarget {
        alt_setting,
        name,
        target_size,
        elements,
    })
}

// Accepts the name at offset 11 (after a 4 byte flag) as well as at
// offset 8, padding is stripped on both sides.
fn decode_name(raw: &[u8]) -> String {
    let start = raw.iter().position(|b| *b != 0).unwrap_or(raw.len());
    let end = raw[start..]
        .iter()
        .position(|b| *b == 0)
        .map_or(raw.len(), |pos| start + pos);
    String::from_utf8_lossy(&raw[start..end]).into_owned()
}

impl DfuseTarget {
    /// Names longer than 255 bytes are truncated.
    pub fn new(
        alt_setting: u8,
        name: Option<&str>,
        elements: Vec<DfuseElement>,
    ) -> Self {
        let target_size = elements
            .iter()
            .map(|e| DFUSE_ELEMENT_HEADER_LEN + e.data.len())
            .sum::<usize>() as u32;
        DfuseTarget {
            alt_setting,
            name: name.map(String::from),
            target_size,
            elements,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let mut prefix = [0u8; DFUSE_TARGET_PREFIX_LEN];
        prefix[0..6].copy_from_slice(DFUSE_TARGET_SIGNATURE);
        prefix[6] = self.alt_setting;
        if let Some(name) = &self.name {
            // bTargetNamed is a 4 byte field in UM0391
            prefix[7] = 1;
            let name = &name.as_bytes()[..name.len().min(255)];
            prefix[11..11 + name.len()].copy_from_slice(name);
        }
        prefix[266..270].copy_from_slice(&self.target_size.to_le_bytes());
        prefix[270..274]
            .copy_from_slice(&(self.elements.len() as u32).to_le_bytes());
        out.extend(prefix);
        for element in &self.elements {
            out.extend(element.address.to_le_bytes());
            out.extend((element.data.len() as u32).to_le_bytes());
            out.extend(&element.data);
        }
    }

    #[doc(alias = "bAlternateSetting")]
    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    #[doc(alias = "szTargetName")]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[doc(alias = "dwTargetSize")]
    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    pub fn elements(&self) -> &[DfuseElement] {
        &self.elements
    }
}

impl DfuseElement {
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        DfuseElement { address, data }
    }

    #[doc(alias = "dwElementAddress")]
    pub fn address(&self) -> u32 {
        self.address
    }

    #[doc(alias = "dwElementSize")]
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
