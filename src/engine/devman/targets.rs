// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// The table targets the planner knows how to emit.

use std::{fmt, path::PathBuf};

use itertools::Itertools;

use devicemapper::Sectors;

/// Largest parameter string one target may carry.
pub const TARGET_PARAMS_MAX: usize = 1024;

/// Filler device substituted for an absent area of a striped segment.
pub const IOERROR_DEV: &str = "/dev/ioerror";

/// Parameters for one table target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetParams {
    /// Unmapped range; all I/O fails.
    Error,
    Linear {
        dev: PathBuf,
        start: Sectors,
    },
    Striped {
        stripe_size: Sectors,
        /// One entry per stripe; `None` marks an absent backing device.
        areas: Vec<Option<(PathBuf, Sectors)>>,
    },
    SnapshotOrigin {
        real: PathBuf,
    },
    Snapshot {
        real: PathBuf,
        cow: PathBuf,
        persistent: bool,
        chunk_size: Sectors,
    },
}

impl TargetParams {
    pub fn target_type(&self) -> &'static str {
        match *self {
            TargetParams::Error => "error",
            TargetParams::Linear { .. } => "linear",
            TargetParams::Striped { .. } => "striped",
            TargetParams::SnapshotOrigin { .. } => "snapshot-origin",
            TargetParams::Snapshot { .. } => "snapshot",
        }
    }
}

impl fmt::Display for TargetParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetParams::Error => Ok(()),
            TargetParams::Linear { dev, start } => {
                write!(f, "{} {}", dev.display(), **start)
            }
            TargetParams::Striped { stripe_size, areas } => {
                write!(
                    f,
                    "{} {} {}",
                    areas.len(),
                    **stripe_size,
                    areas
                        .iter()
                        .map(|area| match area {
                            Some((dev, start)) => format!("{} {}", dev.display(), **start),
                            None => format!("{} 0", IOERROR_DEV),
                        })
                        .join(" ")
                )
            }
            TargetParams::SnapshotOrigin { real } => write!(f, "{}", real.display()),
            TargetParams::Snapshot {
                real,
                cow,
                persistent,
                chunk_size,
            } => write!(
                f,
                "{} {} {} {}",
                real.display(),
                cow.display(),
                if *persistent { "P" } else { "N" },
                **chunk_size
            ),
        }
    }
}

/// One entry in a node's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLine {
    pub start: Sectors,
    pub length: Sectors,
    pub params: TargetParams,
}

impl TargetLine {
    pub fn new(start: Sectors, length: Sectors, params: TargetParams) -> TargetLine {
        TargetLine {
            start,
            length,
            params,
        }
    }

    /// Render to the raw form the devicemapper table_load interface takes.
    pub fn to_raw(&self) -> (u64, u64, String, String) {
        (
            *self.start,
            *self.length,
            self.params.target_type().to_string(),
            self.params.to_string(),
        )
    }
}

/// Render a whole table to raw lines.
pub fn to_raw_table(table: &[TargetLine]) -> Vec<(u64, u64, String, String)> {
    table.iter().map(TargetLine::to_raw).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_params() {
        let line = TargetLine::new(
            Sectors(0),
            Sectors(81920),
            TargetParams::Linear {
                dev: PathBuf::from("/dev/sda"),
                start: Sectors(384),
            },
        );
        assert_eq!(
            line.to_raw(),
            (
                0,
                81920,
                "linear".to_string(),
                "/dev/sda 384".to_string()
            )
        );
    }

    #[test]
    fn test_striped_params() {
        let params = TargetParams::Striped {
            stripe_size: Sectors(128),
            areas: vec![
                Some((PathBuf::from("/dev/sda"), Sectors(384))),
                Some((PathBuf::from("/dev/sdb"), Sectors(384))),
            ],
        };
        assert_eq!(params.to_string(), "2 128 /dev/sda 384 /dev/sdb 384");
        assert_eq!(params.target_type(), "striped");
    }

    #[test]
    fn test_striped_filler_params() {
        let params = TargetParams::Striped {
            stripe_size: Sectors(128),
            areas: vec![
                Some((PathBuf::from("/dev/sda"), Sectors(384))),
                None,
            ],
        };
        assert_eq!(params.to_string(), "2 128 /dev/sda 384 /dev/ioerror 0");
    }

    #[test]
    fn test_error_params() {
        assert_eq!(TargetParams::Error.to_string(), "");
        assert_eq!(TargetParams::Error.target_type(), "error");
    }

    #[test]
    fn test_snapshot_params() {
        let params = TargetParams::Snapshot {
            real: PathBuf::from("/dev/mapper/vg0-lvol0-real"),
            cow: PathBuf::from("/dev/mapper/vg0-snap0-cow"),
            persistent: true,
            chunk_size: Sectors(8),
        };
        assert_eq!(
            params.to_string(),
            "/dev/mapper/vg0-lvol0-real /dev/mapper/vg0-snap0-cow P 8"
        );

        let origin = TargetParams::SnapshotOrigin {
            real: PathBuf::from("/dev/mapper/vg0-lvol0-real"),
        };
        assert_eq!(origin.to_string(), "/dev/mapper/vg0-lvol0-real");
    }
}
