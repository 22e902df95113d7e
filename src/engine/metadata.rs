// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// In-memory model of a volume group, the input to device planning.
//
// Parsing the on-disk metadata format is not this crate's job; callers
// hand over a deserialized `VolumeGroup`. The structs are serde-friendly
// so a metadata snapshot can travel as JSON.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use devicemapper::Sectors;

use crate::volman::{VolmanError, VolmanResult};

/// A physical volume contributing extents to a volume group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalVolume {
    /// Device node path; `None` when the device is missing from the system.
    pub dev: Option<PathBuf>,
    /// Offset of the first physical extent, in sectors.
    pub pe_start: Sectors,
}

/// One stripe of a segment: which PV it lives on and at which extent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentArea {
    pub pv: Option<String>,
    pub pe: u64,
}

/// A contiguous range of logical extents with uniform layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeSegment {
    /// First logical extent covered by this segment.
    pub le: u64,
    /// Length in extents.
    pub len: u64,
    /// Stripe chunk size in sectors; ignored for single-stripe segments.
    pub stripe_size: Sectors,
    /// One area per stripe.
    pub areas: Vec<SegmentArea>,
}

impl StripeSegment {
    pub fn stripes(&self) -> usize {
        self.areas.len()
    }
}

/// Links a cow LV to the origin whose diverged blocks it stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub origin: String,
    pub cow: String,
    /// Copy-on-write chunk size in sectors.
    pub chunk_size: Sectors,
    pub persistent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub name: String,
    pub id: Uuid,
    pub segments: Vec<StripeSegment>,
}

impl LogicalVolume {
    /// Total length in extents.
    pub fn extents(&self) -> u64 {
        self.segments.iter().map(|seg| seg.len).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub name: String,
    pub id: Uuid,
    /// Sectors per extent; constant across the VG.
    pub extent_size: Sectors,
    pub pvs: BTreeMap<String, PhysicalVolume>,
    pub lvs: BTreeMap<String, LogicalVolume>,
    /// Snapshot links between LVs in this VG.
    pub snapshots: Vec<Snapshot>,
}

impl VolumeGroup {
    /// Look up an LV, failing if the metadata does not contain it.
    pub fn lv(&self, name: &str) -> VolmanResult<&LogicalVolume> {
        self.lvs.get(name).ok_or_else(|| {
            VolmanError::MetadataInconsistent(format!(
                "LV {} not present in VG {}",
                name, self.name
            ))
        })
    }

    /// The snapshot for which `lv_name` is the cow side, if any.
    pub fn find_cow(&self, lv_name: &str) -> Option<&Snapshot> {
        self.snapshots.iter().find(|snap| snap.cow == lv_name)
    }

    /// Whether some snapshot names `lv_name` as its origin.
    pub fn is_origin(&self, lv_name: &str) -> bool {
        self.snapshots.iter().any(|snap| snap.origin == lv_name)
    }

    /// LV length in sectors.
    pub fn lv_size(&self, lv: &LogicalVolume) -> Sectors {
        Sectors(*self.extent_size * lv.extents())
    }

    /// Resolve an area to its backing device and pe_start. `None` means
    /// the backing PV is absent and the area must be emitted as an error
    /// or filler target.
    pub fn area_backing(&self, area: &SegmentArea) -> Option<(&Path, Sectors)> {
        let pv = self.pvs.get(area.pv.as_deref()?)?;
        let dev = pv.dev.as_deref()?;
        Some((dev, pv.pe_start))
    }

    /// Deserialize a VG metadata snapshot from JSON.
    pub fn from_json(json: &str) -> VolmanResult<VolumeGroup> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize this VG's metadata to JSON.
    pub fn to_json(&self) -> VolmanResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use devicemapper::IEC;

    use super::*;

    fn small_vg() -> VolumeGroup {
        let mut pvs = BTreeMap::new();
        pvs.insert(
            "pv0".to_string(),
            PhysicalVolume {
                dev: Some(PathBuf::from("/dev/sda")),
                pe_start: Sectors(384),
            },
        );

        let mut lvs = BTreeMap::new();
        lvs.insert(
            "lvol0".to_string(),
            LogicalVolume {
                name: "lvol0".to_string(),
                id: Uuid::new_v4(),
                segments: vec![StripeSegment {
                    le: 0,
                    len: 10,
                    stripe_size: Sectors(0),
                    areas: vec![SegmentArea {
                        pv: Some("pv0".to_string()),
                        pe: 0,
                    }],
                }],
            },
        );

        VolumeGroup {
            name: "vg0".to_string(),
            id: Uuid::new_v4(),
            extent_size: Sectors(8 * IEC::Ki),
            pvs,
            lvs,
            snapshots: vec![Snapshot {
                origin: "lvol0".to_string(),
                cow: "snap0".to_string(),
                chunk_size: Sectors(8),
                persistent: true,
            }],
        }
    }

    #[test]
    fn test_lv_size() {
        let vg = small_vg();
        let lv = vg.lv("lvol0").unwrap();
        assert_eq!(lv.extents(), 10);
        assert_eq!(vg.lv_size(lv), Sectors(81920));
    }

    #[test]
    fn test_snapshot_links() {
        let vg = small_vg();
        assert!(vg.is_origin("lvol0"));
        assert!(!vg.is_origin("snap0"));
        assert_eq!(vg.find_cow("snap0").unwrap().origin, "lvol0");
        assert!(vg.find_cow("lvol0").is_none());
    }

    #[test]
    fn test_area_backing() {
        let vg = small_vg();
        let seg = &vg.lv("lvol0").unwrap().segments[0];
        let (dev, pe_start) = vg.area_backing(&seg.areas[0]).unwrap();
        assert_eq!(dev, Path::new("/dev/sda"));
        assert_eq!(pe_start, Sectors(384));

        let orphan = SegmentArea { pv: None, pe: 0 };
        assert!(vg.area_backing(&orphan).is_none());

        let dangling = SegmentArea {
            pv: Some("pv9".to_string()),
            pe: 0,
        };
        assert!(vg.area_backing(&dangling).is_none());
    }

    #[test]
    fn test_json_round_trip() {
        let vg = small_vg();
        let json = vg.to_json().unwrap();
        let back = VolumeGroup::from_json(&json).unwrap();
        assert_eq!(back.name, vg.name);
        assert_eq!(back.extent_size, vg.extent_size);
        assert_eq!(back.lvs.len(), vg.lvs.len());
        assert_eq!(back.snapshots.len(), 1);
    }
}
