// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Defines the error type used throughout the activation engine.

use std::{error::Error, fmt, io};

pub type VolmanResult<T> = Result<T, VolmanError>;

/// The device-mapper operations the engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmOp {
    Create,
    Reload,
    Suspend,
    Resume,
    Remove,
    Info,
    List,
}

impl fmt::Display for DmOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DmOp::Create => write!(f, "create"),
            DmOp::Reload => write!(f, "reload"),
            DmOp::Suspend => write!(f, "suspend"),
            DmOp::Resume => write!(f, "resume"),
            DmOp::Remove => write!(f, "remove"),
            DmOp::Info => write!(f, "info"),
            DmOp::List => write!(f, "list"),
        }
    }
}

#[derive(Debug)]
pub enum VolmanError {
    Msg(String),
    /// The target LV's top layer was not present after expansion.
    PlanIncomplete(String),
    /// A dependency cycle was found involving the named layer or LV.
    CircularDependency(String),
    /// A dependency referenced a layer missing from the plan.
    MissingDependency(String),
    /// The VG metadata does not describe a realizable volume.
    MetadataInconsistent(String),
    /// A rendered target parameter string exceeded the adapter's buffer.
    TableTooLarge(String, usize),
    /// A kernel operation failed against the named node.
    KernelOp(DmOp, String, Box<VolmanError>),
    Dm(devicemapper::DmError),
    Io(io::Error),
    Serde(serde_json::Error),
}

impl fmt::Display for VolmanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            VolmanError::Msg(ref msg) => write!(f, "Error: {}", msg),
            VolmanError::PlanIncomplete(ref name) => {
                write!(f, "top layer '{}' missing from the device plan", name)
            }
            VolmanError::CircularDependency(ref name) => {
                write!(f, "circular device dependency found for '{}'", name)
            }
            VolmanError::MissingDependency(ref name) => {
                write!(f, "couldn't find device layer '{}'", name)
            }
            VolmanError::MetadataInconsistent(ref msg) => {
                write!(f, "inconsistent metadata: {}", msg)
            }
            VolmanError::TableTooLarge(ref name, len) => write!(
                f,
                "table parameters for '{}' are {} bytes, too large for a single target",
                name, len
            ),
            VolmanError::KernelOp(op, ref name, ref err) => {
                write!(f, "couldn't {} device '{}': {}", op, name, err)
            }
            VolmanError::Dm(ref err) => write!(f, "DM error: {}", err),
            VolmanError::Io(ref err) => write!(f, "IO error: {}", err),
            VolmanError::Serde(ref err) => write!(f, "Serde error: {}", err),
        }
    }
}

impl Error for VolmanError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            VolmanError::KernelOp(_, _, ref err) => Some(err),
            VolmanError::Dm(ref err) => Some(err),
            VolmanError::Io(ref err) => Some(err),
            VolmanError::Serde(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<devicemapper::DmError> for VolmanError {
    fn from(err: devicemapper::DmError) -> VolmanError {
        VolmanError::Dm(err)
    }
}

impl From<io::Error> for VolmanError {
    fn from(err: io::Error) -> VolmanError {
        VolmanError::Io(err)
    }
}

impl From<serde_json::Error> for VolmanError {
    fn from(err: serde_json::Error) -> VolmanError {
        VolmanError::Serde(err)
    }
}
