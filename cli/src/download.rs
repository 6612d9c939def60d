use std::path::Path;

use dfu::{DfuseSession, download_from_file};
use dfufile::{FirmwareFile, WILDCARD_ID};
use log::warn;

use crate::{CliError, DeviceArgs, connect, get_dfu_device, select_interface};

pub(crate) fn download_file(
    path: &Path,
    args: &DeviceArgs,
    start_address: Option<u32>,
    leave: bool,
) -> Result<(), CliError> {
    let mut file = FirmwareFile::open(path)?;
    match file.suffix() {
        Some(suffix) => println!(
            "DFU suffix version {:x}, ID {:04x}:{:04x}",
            suffix.dfu_version(),
            suffix.vendor_id(),
            suffix.product_id(),
        ),
        None => warn!("Invalid DFU suffix signature, no DFU suffix"),
    }

    let device = get_dfu_device(args)?;
    if !file.matches_device(device.vendor_id(), device.product_id()) {
        warn!(
            "File ID {:04x}:{:04x} does not match device {:04x}:{:04x}",
            file.vendor_id(),
            file.product_id(),
            device.vendor_id(),
            device.product_id(),
        );
    }
    if file.device_id() != WILDCARD_ID
        && file.device_id() != device.device_version()
    {
        warn!(
            "File device release {:04x} does not match device {:04x}",
            file.device_id(),
            device.device_version(),
        );
    }

    let payload_len = file.size() as usize - file.suffix_len();
    let range = start_address.map(|start| {
        let len = payload_len.max(1) - 1;
        (start, start.saturating_add(len.try_into().unwrap_or(u32::MAX)))
    });
    let intf = select_interface(&device, args, range)?;
    let connection = connect(&device, intf, args)?;

    println!("Resetting state...");
    connection.reset_state()?;

    println!("Downloading {}...", path.display());
    download_from_file(&connection, intf, &mut file, start_address)?;
    println!("Download done");

    if leave {
        match intf.layout() {
            Some(memory) => {
                println!("Leaving DFU mode...");
                DfuseSession::new(&connection, memory).leave(start_address)?;
            }
            None => warn!("Leaving DFU mode is only supported by DfuSe"),
        }
    }
    Ok(())
}
