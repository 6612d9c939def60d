use dfu::{DfuDevice, DfuInterface, DfuMemSegment, find_dfu_devices};

use crate::CliError;

pub(crate) fn list_dfu_devices(
    vid: Option<u16>,
    pid: Option<u16>,
) -> Result<(), CliError> {
    let devices = find_dfu_devices(vid, pid)?;
    if devices.is_empty() {
        println!("No DFU device found");
    } else {
        print_devices(&devices);
    }
    Ok(())
}

fn print_segment(prefix: &str, segment: &DfuMemSegment) {
    let mut page_size = segment.page_size();
    let page_char = if page_size >= 1024 && page_size % 1024 == 0 {
        page_size /= 1024;
        "K"
    } else {
        " "
    };
    println!(
        "{}0x{:08X} {:4} pages of {:4}{} bytes ({})",
        prefix,
        segment.start_addr(),
        segment.pages(),
        page_size,
        page_char,
        segment.flags(),
    );
}

fn print_interface(device: &DfuDevice, interface: &DfuInterface) {
    println!(
        "  {} [{:04x}:{:04x}] cfg={}, intf={}, alt={}, name=\"{}\"",
        if interface.dfu_mode() {
            "Found DFU"
        } else {
            "Found Runtime"
        },
        device.vendor_id(),
        device.product_id(),
        interface.config(),
        interface.interface(),
        interface.alt_setting(),
        interface.name().unwrap_or("UNKNOWN"),
    );
    if let Some(layout) = interface.layout() {
        println!("    {}:", layout.name());
        for segment in layout.segments() {
            print_segment("      ", segment);
        }
    }
}

fn print_devices(devices: &[DfuDevice]) {
    for device in devices {
        print!(
            "Bus {} Device {:03}: ID {:04x}:{:04x}, devnum {:04x}",
            device.bus_id(),
            device.device_address(),
            device.vendor_id(),
            device.product_id(),
            device.device_version(),
        );
        match device.dfu_descriptor() {
            Some(desc) => println!(
                " (DFU {:x}.{:02x}, transfer size {}{})",
                desc.dfu_version() >> 8,
                desc.dfu_version() & 0xff,
                desc.transfer_size(),
                if desc.is_dfuse() { ", DfuSe" } else { "" },
            ),
            None => println!(),
        }

        for interface in device.interfaces() {
            print_interface(device, interface);
        }
    }
}
