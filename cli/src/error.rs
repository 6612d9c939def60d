use std::{fmt::Display, io};

use dfu::DfuError;
use dfufile::DfuFileError;

pub enum CliError {
    IO(io::Error),
    Dfu(DfuError),
    File(DfuFileError),
    NoDFUDevice,
    ManyDFUDevices,
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        CliError::IO(value)
    }
}

impl From<DfuError> for CliError {
    fn from(value: DfuError) -> Self {
        CliError::Dfu(value)
    }
}

impl From<DfuFileError> for CliError {
    fn from(value: DfuFileError) -> Self {
        CliError::File(value)
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::IO(err) => write!(f, "IO error: {err}"),
            CliError::Dfu(err) => write!(f, "DFU error: {err}"),
            CliError::File(err) => write!(f, "{err}"),
            CliError::NoDFUDevice => write!(f, "No DFU capable USB device"),
            CliError::ManyDFUDevices => write!(
                f,
                "More than one DFU capable USB device, use --device to select"
            ),
        }
    }
}
