use std::path::Path;

use dfu::upload_to_file;

use crate::{CliError, DeviceArgs, connect, get_dfu_device, select_interface};

pub(crate) fn upload_file(
    path: &Path,
    args: &DeviceArgs,
    start_address: Option<u32>,
    length: Option<usize>,
) -> Result<(), CliError> {
    let device = get_dfu_device(args)?;
    let range = start_address.map(|start| {
        let len = length.unwrap_or(1).max(1) - 1;
        (start, start.saturating_add(len.try_into().unwrap_or(u32::MAX)))
    });
    let intf = select_interface(&device, args, range)?;
    let connection = connect(&device, intf, args)?;

    println!("Resetting state...");
    connection.reset_state()?;

    match start_address {
        Some(addr) => println!("Uploading from {addr:#010x}..."),
        None => println!("Uploading..."),
    }
    let total =
        upload_to_file(&connection, intf, path, start_address, length)?;
    println!("Upload done, {total} bytes written to {}", path.display());
    Ok(())
}
