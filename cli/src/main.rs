use std::{path::PathBuf, process::ExitCode};

use clap::{ArgAction, Args, Parser, Subcommand};
use clap_num::maybe_hex;
use parse_size::parse_size;

use dfu::{
    DfuConfig, DfuConnection, DfuDevice, DfuInterface, find_dfu_devices,
};
use detach::*;
use download::*;
use error::CliError;
use list::*;
use suffix::*;
use upload::*;

mod detach;
mod download;
mod error;
mod list;
mod suffix;
mod upload;

#[derive(Parser)]
#[command(name = "dfu-util", version, about, long_about = None)]
struct Cli {
    /// more output, repeat for even more (ex: --verbose --verbose)
    #[clap(long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Device and interface selection
#[derive(Args, Clone, Default)]
struct DeviceArgs {
    /// vendor and product ID (ex: "0483:df11", "0483:", ":df11")
    #[clap(short, long, value_parser=parse_device)]
    device: Option<DeviceFilter>,
    /// interface number
    #[clap(short, long)]
    intf: Option<u8>,
    /// alternate setting
    #[clap(short, long)]
    alt: Option<u8>,
    /// bytes per control transfer, overrides the device descriptor
    #[clap(short, long, value_parser=parse_transfer_size)]
    transfer_size: Option<u16>,
}

#[derive(Clone, Copy, Default)]
struct DeviceFilter {
    vid: Option<u16>,
    pid: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// list DFU devices
    List {
        /// vendor and product ID (ex: "0483:df11")
        #[clap(short, long, value_parser=parse_device)]
        device: Option<DeviceFilter>,
    },
    /// read from device into a new file
    Upload {
        /// file to create
        file: PathBuf,
        #[command(flatten)]
        device: DeviceArgs,
        /// DfuSe start address (ex: 0x08000000)
        #[clap(short, long, value_parser=maybe_hex::<u32>)]
        start_address: Option<u32>,
        /// length (ex: 64K, 2MB)
        #[clap(short, long, value_parser=parse_length)]
        length: Option<usize>,
    },
    /// write a file to the device
    Download {
        /// file to write (raw binary, DFU suffixed or DfuSe)
        file: PathBuf,
        #[command(flatten)]
        device: DeviceArgs,
        /// DfuSe start address for raw binaries (ex: 0x08000000)
        #[clap(short, long, value_parser=maybe_hex::<u32>)]
        start_address: Option<u32>,
        /// leave DFU mode after download (DfuSe only)
        #[clap(long)]
        leave: bool,
    },
    /// switch a run-time device into DFU mode
    Detach {
        #[command(flatten)]
        device: DeviceArgs,
        /// time in ms the device waits for a USB reset
        #[clap(long, default_value_t = 1000)]
        timeout: u16,
    },
    /// inspect or edit the DFU suffix of a file
    Suffix {
        #[command(subcommand)]
        command: SuffixCommands,
    },
}

#[derive(Subcommand)]
enum SuffixCommands {
    /// show the suffix and verify its CRC
    Check {
        /// firmware file
        file: PathBuf,
    },
    /// append a suffix
    Add {
        /// firmware file
        file: PathBuf,
        /// product ID (ex: "df11"), wildcard when omitted
        #[clap(short, long, value_parser=hex_u16, default_value = "ffff")]
        pid: u16,
        /// vendor ID (ex: "0483"), wildcard when omitted
        #[clap(short, long, value_parser=hex_u16, default_value = "ffff")]
        vid: u16,
        /// device release (ex: "2200"), wildcard when omitted
        #[clap(short, long, value_parser=hex_u16, default_value = "ffff")]
        did: u16,
        /// DFU specification version (ex: "011a" for DfuSe files)
        #[clap(short, long, value_parser=hex_u16, default_value = "0100")]
        spec: u16,
    },
    /// remove the suffix
    Remove {
        /// firmware file
        file: PathBuf,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::List { device: None }
    }
}

fn hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim_start_matches("0x");
    <u16>::from_str_radix(s, 16).map_err(|e| format!("{e}"))
}

fn parse_device(s: &str) -> Result<DeviceFilter, String> {
    let (vid, pid) = s.split_once(':').unwrap_or((s, ""));
    let id = |s: &str| {
        if s.is_empty() || s == "*" {
            Ok(None)
        } else {
            hex_u16(s).map(Some)
        }
    };
    Ok(DeviceFilter {
        vid: id(vid)?,
        pid: id(pid)?,
    })
}

fn parse_length(s: &str) -> Result<usize, String> {
    let len = parse_size(s).map_err(|e| format!("{e}"))?;
    len.try_into().map_err(|e| format!("{e}"))
}

fn parse_transfer_size(s: &str) -> Result<u16, String> {
    match parse_length(s)?.try_into() {
        Ok(0) | Err(_) => Err("must be between 1 and 65535".into()),
        Ok(size) => Ok(size),
    }
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level),
    )
    .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    if let Err(err) = match &cli.command.unwrap_or_default() {
        Commands::List { device } => {
            let filter = device.unwrap_or_default();
            list_dfu_devices(filter.vid, filter.pid)
        }
        Commands::Upload {
            file,
            device,
            start_address,
            length,
        } => upload_file(file, device, *start_address, *length),
        Commands::Download {
            file,
            device,
            start_address,
            leave,
        } => download_file(file, device, *start_address, *leave),
        Commands::Detach { device, timeout } => detach_device(device, *timeout),
        Commands::Suffix { command } => match command {
            SuffixCommands::Check { file } => check_suffix(file),
            SuffixCommands::Add {
                file,
                pid,
                vid,
                did,
                spec,
            } => add_suffix(file, *vid, *pid, *did, *spec),
            SuffixCommands::Remove { file } => remove_suffix(file),
        },
    } {
        eprintln!("Error: {err}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn get_dfu_device(args: &DeviceArgs) -> Result<DfuDevice, CliError> {
    let filter = args.device.unwrap_or_default();
    let mut devices = find_dfu_devices(filter.vid, filter.pid)?;
    if devices.is_empty() {
        return Err(CliError::NoDFUDevice);
    }

    if devices.len() > 1 {
        return Err(CliError::ManyDFUDevices);
    }

    Ok(devices.remove(0))
}

/// Interface from the command line, or the one covering `address`
fn select_interface<'a>(
    device: &'a DfuDevice,
    args: &DeviceArgs,
    address: Option<(u32, u32)>,
) -> Result<&'a DfuInterface, CliError> {
    match address {
        Some((start, end)) if args.intf.is_none() && args.alt.is_none() => {
            Ok(device.find_interface_for_address(start, end)?)
        }
        _ => Ok(device.find_interface(args.intf, args.alt)?),
    }
}

fn connect(
    device: &DfuDevice,
    intf: &DfuInterface,
    args: &DeviceArgs,
) -> Result<DfuConnection, CliError> {
    let conn = device.connect(intf, DfuConfig::default())?;
    Ok(match args.transfer_size {
        Some(size) => conn.with_transfer_size(size),
        None => conn,
    })
}
