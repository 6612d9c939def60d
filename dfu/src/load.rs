//! File level upload and download
//!
//! Chooses between plain DFU and DfuSe depending on the selected alternate
//! setting, the explicit start address and the suffix of the firmware file.

use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

use dfufile::{DfuSuffix, DfuseImage, FirmwareFile};
use log::{info, warn};

use crate::{
    DfuConnection, DfuError, DfuInterface, DfuseSession, transfer,
    transport::DfuTransport,
};

/// Upload into `out`, returns the number of bytes read
///
/// DfuSe alternate settings start at `dfuse_address` when given, plain DFU
/// devices decide on their own where to start.
pub fn upload_to_writer<T: DfuTransport>(
    conn: &DfuConnection<T>,
    intf: &DfuInterface,
    out: &mut impl Write,
    dfuse_address: Option<u32>,
    limit: Option<usize>,
) -> Result<usize, DfuError> {
    let block_size = conn.transfer_size();
    if let Some(memory) = intf.layout() {
        return DfuseSession::new(conn, memory).upload(
            dfuse_address,
            limit,
            block_size,
            out,
        );
    }
    if dfuse_address.is_some() {
        return Err(DfuError::NoMemoryLayout);
    }

    let mut total = 0;
    let mut blocks =
        transfer::upload(conn, block_size).with_optional_limit(limit);
    for block in blocks.by_ref() {
        let block = block?;
        out.write_all(&block)?;
        total += block.len();
    }
    if blocks.limit_reached() {
        conn.abort()?;
    }
    Ok(total)
}

/// Upload into a new file, an existing file is never overwritten
///
/// The file is removed again when the upload fails.
pub fn upload_to_file<T: DfuTransport>(
    conn: &DfuConnection<T>,
    intf: &DfuInterface,
    path: impl AsRef<Path>,
    dfuse_address: Option<u32>,
    limit: Option<usize>,
) -> Result<usize, DfuError> {
    let mut file = File::create_new(path.as_ref())?;
    let result = upload_to_writer(conn, intf, &mut file, dfuse_address, limit)
        .and_then(|total| {
            file.flush()?;
            Ok(total)
        });
    drop(file);
    let total = result.inspect_err(|err| {
        warn!("Upload failed ({err}), removing {}", path.as_ref().display());
        if let Err(err) = fs::remove_file(path.as_ref()) {
            warn!("Could not remove {}: {err}", path.as_ref().display());
        }
    })?;
    info!("Uploaded {total} bytes to {}", path.as_ref().display());
    Ok(total)
}

/// Download a firmware image
///
/// `data` is the whole file and `suffix` its parsed DFU suffix. The suffix
/// itself is never sent to the device.
///
/// - with an address, `data` is raw binary written there (DfuSe only)
/// - a DfuSe suffix selects the DfuSe container format
/// - anything else is a plain DFU download
pub fn download_bytes<T: DfuTransport>(
    conn: &DfuConnection<T>,
    intf: &DfuInterface,
    data: &[u8],
    suffix: Option<&DfuSuffix>,
    address: Option<u32>,
) -> Result<(), DfuError> {
    let block_size = conn.transfer_size();
    let suffix_len = suffix.map_or(0, |s| s.len());
    let payload = &data[..data.len().saturating_sub(suffix_len)];
    let dfuse_file = suffix.is_some_and(|s| s.is_dfuse());

    match address {
        Some(address) => {
            if dfuse_file {
                return Err(DfuError::FormatMismatch);
            }
            let memory = intf.memory()?;
            info!(
                "Downloading to address = 0x{address:08x}, size = {}",
                payload.len()
            );
            DfuseSession::new(conn, memory).download_element(
                address,
                payload,
                block_size,
            )
        }
        None if dfuse_file => {
            let memory = intf.memory()?;
            let image = DfuseImage::parse(data, suffix_len)?;
            let count = DfuseSession::new(conn, memory).download_image(
                &image,
                intf.alt_setting(),
                block_size,
            )?;
            if count == 0 {
                warn!(
                    "No image for alternate setting {}, nothing downloaded",
                    intf.alt_setting()
                );
            }
            Ok(())
        }
        None if intf.is_dfuse() => Err(DfuError::UnsupportedDfuseVersion(
            suffix.map_or(0, |s| s.dfu_version()),
        )),
        None => {
            if payload.is_empty() {
                return Err(DfuError::EmptyFirmware);
            }
            transfer::download(conn, block_size, payload)
        }
    }
}

/// Download the content of a firmware file, see [`download_bytes`]
pub fn download_from_file<T: DfuTransport>(
    conn: &DfuConnection<T>,
    intf: &DfuInterface,
    file: &mut FirmwareFile,
    address: Option<u32>,
) -> Result<(), DfuError> {
    let data = file.read_all()?;
    download_bytes(conn, intf, &data, file.suffix(), address)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use dfufile::{DFUSE_VERSION, DfuseElement, DfuseTarget};

    use super::*;
    use crate::{
        DfuState,
        transport::mock::{Command, MockDevice, Request, connect},
    };

    const FLASH: &str = "@Internal Flash  /0x08000000/16*001Kg";

    fn dfuse_intf(alt_setting: u8) -> DfuInterface {
        DfuInterface::new(1, 0, alt_setting, Some(FLASH.into()))
    }

    fn plain_intf() -> DfuInterface {
        DfuInterface::new(1, 0, 0, Some("Flash".into()))
    }

    fn with_suffix(data: &[u8], dfu_version: u16) -> (Vec<u8>, DfuSuffix) {
        let suffix = DfuSuffix::new(0x0483, 0xdf11, 0x2200)
            .with_dfu_version(dfu_version)
            .seal(data);
        let mut file = data.to_vec();
        file.extend(suffix.to_bytes());
        (file, suffix)
    }

    #[test]
    fn test_plain_download_strips_suffix() {
        let conn = connect(MockDevice::new(), 16);
        let payload: Vec<u8> = (0..40).collect();
        let (file, suffix) = with_suffix(&payload, dfufile::DFU_VERSION);
        download_bytes(&conn, &plain_intf(), &file, Some(&suffix), None)
            .unwrap();
        assert_eq!(conn.transport().written_data(), payload);
        assert_eq!(conn.transport().state(), DfuState::Idle);
    }

    #[test]
    fn test_plain_download_empty_file() {
        let conn = connect(MockDevice::new(), 16);
        assert!(matches!(
            download_bytes(&conn, &plain_intf(), &[], None, None),
            Err(DfuError::EmptyFirmware)
        ));
    }

    #[test]
    fn test_raw_download_to_address() {
        let conn = connect(MockDevice::new(), 0x100);
        let payload = vec![0xa5; 0x500];
        download_bytes(&conn, &dfuse_intf(0), &payload, None, Some(0x08000000))
            .unwrap();
        assert_eq!(conn.transport().written_data(), payload);
        assert_eq!(
            conn.transport().erased_pages(),
            vec![0x08000000, 0x08000400]
        );
    }

    #[test]
    fn test_raw_download_of_dfuse_file() {
        let conn = connect(MockDevice::new(), 0x100);
        let (file, suffix) = with_suffix(&[0; 64], DFUSE_VERSION);
        assert!(matches!(
            download_bytes(
                &conn,
                &dfuse_intf(0),
                &file,
                Some(&suffix),
                Some(0x08000000)
            ),
            Err(DfuError::FormatMismatch)
        ));
        assert!(conn.transport().requests().is_empty());
    }

    #[test]
    fn test_raw_download_needs_layout() {
        let conn = connect(MockDevice::new(), 0x100);
        assert!(matches!(
            download_bytes(&conn, &plain_intf(), &[0; 64], None, Some(0)),
            Err(DfuError::NoMemoryLayout)
        ));
    }

    #[test]
    fn test_dfuse_interface_needs_dfuse_file() {
        let conn = connect(MockDevice::new(), 0x100);
        let (file, suffix) = with_suffix(&[0; 64], 0x0100);
        assert!(matches!(
            download_bytes(&conn, &dfuse_intf(0), &file, Some(&suffix), None),
            Err(DfuError::UnsupportedDfuseVersion(0x0100))
        ));
    }

    #[test]
    fn test_dfuse_container_download() {
        let image = DfuseImage::new(vec![
            DfuseTarget::new(
                0,
                Some("Internal Flash"),
                vec![
                    DfuseElement::new(0x08000000, vec![1; 0x180]),
                    DfuseElement::new(0x08000800, vec![2; 0x10]),
                ],
            ),
            DfuseTarget::new(1, None, vec![DfuseElement::new(0, vec![3; 8])]),
        ]);
        let (file, suffix) = with_suffix(&image.to_bytes(), DFUSE_VERSION);

        let conn = connect(MockDevice::new(), 0x100);
        download_bytes(&conn, &dfuse_intf(0), &file, Some(&suffix), None)
            .unwrap();

        assert_eq!(
            conn.transport().commands()[..3],
            [
                Command::ErasePage(0x08000000),
                Command::SetAddress(0x08000000),
                Command::SetAddress(0x08000100),
            ]
        );
        assert_eq!(
            conn.transport().erased_pages(),
            vec![0x08000000, 0x08000800]
        );
        let mut expected = vec![1; 0x180];
        expected.extend([2; 0x10]);
        assert_eq!(conn.transport().written_data(), expected);
    }

    #[test]
    fn test_download_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmware.bin");
        let payload: Vec<u8> = (0..100).collect();
        fs::write(&path, &payload).unwrap();
        FirmwareFile::open_rw(&path)
            .unwrap()
            .add_suffix(DfuSuffix::new(0x1d50, 0x6017, 0))
            .unwrap();

        let mut file = FirmwareFile::open(&path).unwrap();
        assert_eq!(file.suffix_len(), 16);
        let conn = connect(MockDevice::new(), 32);
        download_from_file(&conn, &plain_intf(), &mut file, None).unwrap();
        assert_eq!(conn.transport().written_data(), payload);
    }

    #[test]
    fn test_plain_upload_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        let data: Vec<u8> = (0..50).collect();
        let conn = connect(MockDevice::new().with_upload_data(&data), 16);

        let total =
            upload_to_file(&conn, &plain_intf(), &path, None, None).unwrap();
        assert_eq!(total, 50);
        assert_eq!(fs::read(&path).unwrap(), data);

        // never overwrite
        assert!(matches!(
            upload_to_file(&conn, &plain_intf(), &path, None, None),
            Err(DfuError::Io(_))
        ));
    }

    #[test]
    fn test_failed_upload_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        let conn = connect(MockDevice::new(), 16);
        let memory_intf =
            DfuInterface::new(1, 0, 0, Some("@Flash/0x08000000/4*1Kf".into()));

        assert!(matches!(
            upload_to_file(&conn, &memory_intf, &path, Some(0x08000000), None),
            Err(DfuError::NotReadable(0x08000000))
        ));
        assert!(!path.exists());

        // a retry is not blocked by a leftover file
        let data = vec![5; 8];
        let conn = connect(MockDevice::new().with_upload_data(&data), 16);
        upload_to_file(&conn, &plain_intf(), &path, None, None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_plain_upload_with_limit_aborts() {
        let data = vec![7; 64];
        let conn = connect(MockDevice::new().with_upload_data(&data), 16);
        let mut out = Vec::new();
        let total =
            upload_to_writer(&conn, &plain_intf(), &mut out, None, Some(32))
                .unwrap();
        assert_eq!(total, 32);
        assert_eq!(conn.transport().requests().last(), Some(&Request::Abort));
        assert_eq!(conn.transport().state(), DfuState::Idle);
    }

    #[test]
    fn test_dfuse_upload_to_writer() {
        let data = vec![9; 0x1000];
        let conn = connect(MockDevice::new().with_upload_data(&data), 0x400);
        let mut out = Vec::new();
        let total = upload_to_writer(
            &conn,
            &dfuse_intf(0),
            &mut out,
            Some(0x08003C00),
            None,
        )
        .unwrap();
        // last kilobyte of the segment
        assert_eq!(total, 0x400);
        assert_eq!(
            conn.transport().commands(),
            vec![Command::SetAddress(0x08003C00)]
        );
    }

    #[test]
    fn test_plain_upload_with_address() {
        let conn = connect(MockDevice::new(), 16);
        let mut out = Vec::new();
        assert!(matches!(
            upload_to_writer(&conn, &plain_intf(), &mut out, Some(0), None),
            Err(DfuError::NoMemoryLayout)
        ));
    }
}
