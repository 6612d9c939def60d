use std::{
    thread,
    time::{Duration, Instant},
};

use dfu::{DfuDevice, DfuError, find_dfu_devices};

use crate::{CliError, DeviceArgs, connect, get_dfu_device};

const RECONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) fn detach_device(
    args: &DeviceArgs,
    timeout_ms: u16,
) -> Result<(), CliError> {
    let device = get_dfu_device(args)?;
    if !device.is_runtime() {
        println!("Device is already in DFU mode");
        return Ok(());
    }
    let intf = device
        .interfaces()
        .iter()
        .find(|intf| !intf.dfu_mode())
        .ok_or(DfuError::InvalidInterface)?;
    let will_detach = device.dfu_descriptor().is_some_and(|d| d.will_detach());
    let (vid, pid) = (device.vendor_id(), device.product_id());

    let connection = connect(&device, intf, args)?;
    println!("Detaching...");
    connection.detach(timeout_ms)?;
    drop(connection);
    if !will_detach {
        println!("Device does not detach by itself, a USB reset is needed");
        return Ok(());
    }

    println!("Reconnecting...");
    let start = Instant::now();
    let device = reconnect(vid, pid)?;
    println!(
        "Reconnected in {:?}, {} DFU interface(s)",
        start.elapsed(),
        device.interfaces().len()
    );
    Ok(())
}

fn reconnect(vid: u16, pid: u16) -> Result<DfuDevice, DfuError> {
    let start = Instant::now();
    loop {
        let mut devices: Vec<DfuDevice> = find_dfu_devices(None, None)?
            .into_iter()
            .filter(|dev| !dev.is_runtime())
            .collect();
        // the DFU mode personality may use other ids
        if let Some(pos) = devices
            .iter()
            .position(|dev| (dev.vendor_id(), dev.product_id()) == (vid, pid))
        {
            return Ok(devices.swap_remove(pos));
        }
        if let Some(device) = devices.pop() {
            return Ok(device);
        }
        if start.elapsed() >= RECONNECT_TIMEOUT {
            return Err(DfuError::Timeout);
        }
        thread::sleep(RECONNECT_INTERVAL);
    }
}
