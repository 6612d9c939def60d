use std::path::Path;

use dfufile::{DfuSuffix, DfuseImage, FirmwareFile};

use crate::CliError;

pub(crate) fn check_suffix(path: &Path) -> Result<(), CliError> {
    let mut file = FirmwareFile::open(path)?;
    let Some(suffix) = file.suffix().copied() else {
        println!("The file {} has no valid DFU suffix", path.display());
        return Ok(());
    };
    print_suffix(&suffix);
    let crc = file.verify_crc()?;
    println!("CRC:\t\t0x{crc:08x} (valid)");

    if suffix.is_dfuse() {
        let data = file.read_all()?;
        let image = DfuseImage::parse(&data, suffix.len())?;
        println!(
            "DfuSe image, revision {}, {} target(s)",
            image.revision(),
            image.targets().len()
        );
        for target in image.targets() {
            println!(
                "  Target alt={}, name=\"{}\", {} element(s)",
                target.alt_setting(),
                target.name().unwrap_or(""),
                target.elements().len()
            );
            for element in target.elements() {
                println!(
                    "    0x{:08x}, {} bytes",
                    element.address(),
                    element.size()
                );
            }
        }
    }
    Ok(())
}

pub(crate) fn add_suffix(
    path: &Path,
    vid: u16,
    pid: u16,
    did: u16,
    dfu_version: u16,
) -> Result<(), CliError> {
    let mut file = FirmwareFile::open_rw(path)?;
    let suffix = file.add_suffix(
        DfuSuffix::new(vid, pid, did).with_dfu_version(dfu_version),
    )?;
    print_suffix(&suffix);
    println!("CRC:\t\t0x{:08x}", suffix.crc());
    println!("New DFU suffix added");
    Ok(())
}

pub(crate) fn remove_suffix(path: &Path) -> Result<(), CliError> {
    let mut file = FirmwareFile::open_rw(path)?;
    let suffix = file.remove_suffix()?;
    print_suffix(&suffix);
    println!("DFU suffix removed");
    Ok(())
}

fn print_suffix(suffix: &DfuSuffix) {
    println!("Product:\t0x{:04x}", suffix.product_id());
    println!("Vendor:\t\t0x{:04x}", suffix.vendor_id());
    println!("Device:\t\t0x{:04x}", suffix.device_id());
    println!("Version:\t0x{:04x}", suffix.dfu_version());
    println!("Length:\t\t{}", suffix.len());
}
