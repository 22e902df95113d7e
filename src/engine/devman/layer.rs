// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// One planned or observed device-mapper node and the rules that fill
// its kernel table.

use std::path::Path;

use devicemapper::Sectors;

use crate::{
    engine::metadata::{StripeSegment, VolumeGroup},
    volman::{VolmanError, VolmanResult},
};

use super::{
    dm::DevInfo,
    names,
    targets::{TargetLine, TargetParams, TARGET_PARAMS_MAX},
};

/// Reserved hidden-layer names.
pub const LAYER_REAL: &str = "real";
pub const LAYER_COW: &str = "cow";

/// How a layer's table is built when it is created or reloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Populate {
    /// One linear/striped/error target per segment of the LV.
    Vanilla,
    /// A single snapshot-origin target over the LV's hidden real device.
    Origin,
    /// A single snapshot target joining an origin's real device to a cow.
    Snapshot {
        origin: String,
        cow: String,
        chunk_size: Sectors,
        persistent: bool,
    },
}

#[derive(Debug, Clone)]
pub struct DevLayer {
    pub(super) name: String,
    /// The LV this layer realizes; `None` for nodes discovered in the
    /// kernel that no expansion claimed.
    pub(super) lv: Option<String>,
    pub(super) populate: Option<Populate>,
    pub(super) info: DevInfo,
    /// Layers that must exist before this one may be created.
    pub(super) pre_create: Vec<String>,
    /// Layers that must be live before this one may be resumed. No
    /// current strategy requires any.
    pub(super) pre_active: Vec<String>,
    /// User-facing top layer, published under /dev.
    pub(super) visible: bool,
    /// Forces a refresh even when the kernel node is already present.
    /// The walks reload every existing layer, so nothing sets this yet.
    #[allow(dead_code)]
    pub(super) dirty: bool,
    /// Reachability scratch bit for the planning pass.
    pub(super) marked: bool,
}

impl DevLayer {
    /// A layer observed in the kernel but not (yet) claimed by any LV.
    pub(super) fn discovered(name: String, info: DevInfo) -> DevLayer {
        DevLayer {
            name,
            lv: None,
            populate: None,
            info,
            pre_create: Vec::new(),
            pre_active: Vec::new(),
            visible: false,
            dirty: false,
            marked: false,
        }
    }

    /// A layer required by the plan for the named LV.
    pub(super) fn planned(
        name: String,
        lv: &str,
        populate: Populate,
        visible: bool,
        info: DevInfo,
    ) -> DevLayer {
        DevLayer {
            name,
            lv: Some(lv.to_string()),
            populate: Some(populate),
            info,
            pre_create: Vec::new(),
            pre_active: Vec::new(),
            visible,
            dirty: false,
            marked: false,
        }
    }

    /// Build the kernel table for this layer.
    pub(super) fn table(&self, vg: &VolumeGroup, dm_dir: &Path) -> VolmanResult<Vec<TargetLine>> {
        let populate = self.populate.as_ref().ok_or_else(|| {
            VolmanError::Msg(format!("no table strategy for layer '{}'", self.name))
        })?;
        let lv_name = self.lv.as_deref().ok_or_else(|| {
            VolmanError::Msg(format!("no LV recorded for layer '{}'", self.name))
        })?;

        let table = match populate {
            Populate::Vanilla => {
                let lv = vg.lv(lv_name)?;
                lv.segments
                    .iter()
                    .map(|seg| segment_line(vg, lv_name, seg))
                    .collect::<VolmanResult<Vec<_>>>()?
            }
            Populate::Origin => {
                let lv = vg.lv(lv_name)?;
                let real =
                    dm_dir.join(names::build_name(&vg.name, lv_name, Some(LAYER_REAL)));
                vec![TargetLine::new(
                    Sectors(0),
                    vg.lv_size(lv),
                    TargetParams::SnapshotOrigin { real },
                )]
            }
            Populate::Snapshot {
                origin,
                cow,
                chunk_size,
                persistent,
            } => {
                let origin_lv = vg.lv(origin)?;
                let real =
                    dm_dir.join(names::build_name(&vg.name, origin, Some(LAYER_REAL)));
                let cow =
                    dm_dir.join(names::build_name(&vg.name, cow, Some(LAYER_COW)));
                vec![TargetLine::new(
                    Sectors(0),
                    vg.lv_size(origin_lv),
                    TargetParams::Snapshot {
                        real,
                        cow,
                        persistent: *persistent,
                        chunk_size: *chunk_size,
                    },
                )]
            }
        };

        for line in &table {
            let len = line.params.to_string().len();
            if len >= TARGET_PARAMS_MAX {
                return Err(VolmanError::TableTooLarge(self.name.clone(), len));
            }
        }

        Ok(table)
    }
}

/// Emit the target realizing one segment.
fn segment_line(
    vg: &VolumeGroup,
    lv_name: &str,
    seg: &StripeSegment,
) -> VolmanResult<TargetLine> {
    if seg.areas.is_empty() {
        return Err(VolmanError::MetadataInconsistent(format!(
            "segment of LV {} has no areas",
            lv_name
        )));
    }

    let esize = vg.extent_size;
    let start = Sectors(*esize * seg.le);
    let length = Sectors(*esize * seg.len);

    let params = if seg.stripes() == 1 {
        match vg.area_backing(&seg.areas[0]) {
            // The whole segment's backing device is gone.
            None => TargetParams::Error,
            Some((dev, pe_start)) => TargetParams::Linear {
                dev: dev.to_owned(),
                start: Sectors(*pe_start + *esize * seg.areas[0].pe),
            },
        }
    } else {
        TargetParams::Striped {
            stripe_size: seg.stripe_size,
            areas: seg
                .areas
                .iter()
                .map(|area| {
                    vg.area_backing(area).map(|(dev, pe_start)| {
                        (dev.to_owned(), Sectors(*pe_start + *esize * area.pe))
                    })
                })
                .collect(),
        }
    };

    Ok(TargetLine::new(start, length, params))
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, path::PathBuf};

    use assert_matches::assert_matches;
    use uuid::Uuid;

    use devicemapper::IEC;

    use crate::engine::metadata::{LogicalVolume, PhysicalVolume, SegmentArea};

    use super::*;

    fn one_pv_vg(dev: Option<PathBuf>) -> VolumeGroup {
        let mut pvs = BTreeMap::new();
        pvs.insert(
            "pv0".to_string(),
            PhysicalVolume {
                dev,
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
            snapshots: Vec::new(),
        }
    }

    #[test]
    fn test_vanilla_linear_table() {
        let vg = one_pv_vg(Some(PathBuf::from("/dev/sda")));
        let layer = DevLayer::planned(
            "vg0-lvol0".to_string(),
            "lvol0",
            Populate::Vanilla,
            true,
            DevInfo::absent(),
        );
        let table = layer.table(&vg, Path::new("/dev/mapper")).unwrap();
        assert_eq!(
            table[0].to_raw(),
            (0, 81920, "linear".to_string(), "/dev/sda 384".to_string())
        );
    }

    #[test]
    fn test_vanilla_absent_pv_is_error_target() {
        let vg = one_pv_vg(None);
        let layer = DevLayer::planned(
            "vg0-lvol0".to_string(),
            "lvol0",
            Populate::Vanilla,
            true,
            DevInfo::absent(),
        );
        let table = layer.table(&vg, Path::new("/dev/mapper")).unwrap();
        assert_eq!(
            table[0].to_raw(),
            (0, 81920, "error".to_string(), String::new())
        );
    }

    #[test]
    fn test_oversized_params_rejected() {
        let mut vg = one_pv_vg(Some(PathBuf::from(format!(
            "/dev/disk/by-id/{}",
            "x".repeat(600)
        ))));
        // A two-stripe segment over the same huge path overflows the
        // parameter buffer.
        let lv = vg.lvs.get_mut("lvol0").unwrap();
        lv.segments[0].stripe_size = Sectors(128);
        lv.segments[0].areas = vec![
            SegmentArea {
                pv: Some("pv0".to_string()),
                pe: 0,
            },
            SegmentArea {
                pv: Some("pv0".to_string()),
                pe: 5,
            },
        ];
        let layer = DevLayer::planned(
            "vg0-lvol0".to_string(),
            "lvol0",
            Populate::Vanilla,
            true,
            DevInfo::absent(),
        );
        assert_matches!(
            layer.table(&vg, Path::new("/dev/mapper")),
            Err(VolmanError::TableTooLarge(name, _)) if name == "vg0-lvol0"
        );
    }

    #[test]
    fn test_segment_with_no_areas_rejected() {
        let mut vg = one_pv_vg(Some(PathBuf::from("/dev/sda")));
        vg.lvs.get_mut("lvol0").unwrap().segments[0].areas.clear();
        let layer = DevLayer::planned(
            "vg0-lvol0".to_string(),
            "lvol0",
            Populate::Vanilla,
            true,
            DevInfo::absent(),
        );
        assert_matches!(
            layer.table(&vg, Path::new("/dev/mapper")),
            Err(VolmanError::MetadataInconsistent(_))
        );
    }
}
