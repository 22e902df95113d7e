// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// The device manager: computes the device-mapper nodes a logical volume
// needs and issues the kernel operations realizing or removing them.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    engine::metadata::VolumeGroup,
    volman::{DmOp, VolmanError, VolmanResult},
};

use super::{
    devlinks::DevFs,
    dm::{DevInfo, DmControl},
    layer::DevLayer,
    names,
    planner::PlanMode,
};

/// Wrap an adapter failure with the operation and node it ran against.
pub(super) fn kernel_err(
    op: DmOp,
    name: &str,
) -> impl FnOnce(VolmanError) -> VolmanError + '_ {
    move |err| VolmanError::KernelOp(op, name.to_string(), Box::new(err))
}

/// Plans and executes activation state changes for the LVs of one VG.
///
/// The kernel's device-mapper namespace is process-global; an instance
/// assumes exclusive use of the names carrying its VG prefix for the
/// duration of each call. Callers must serialize instances that overlap.
pub struct DevManager<'a> {
    pub(super) dm: &'a dyn DmControl,
    pub(super) vg_name: String,
    /// The current plan, keyed by layer name.
    pub(super) layers: BTreeMap<String, DevLayer>,
    /// LVs selected to be, or observed to be, active.
    pub(super) active: BTreeSet<String>,
    /// Nodes of this VG that the current plan does not need.
    pub(super) remove_list: Vec<String>,
}

impl<'a> DevManager<'a> {
    pub fn new(dm: &'a dyn DmControl, vg_name: &str) -> DevManager<'a> {
        DevManager {
            dm,
            vg_name: vg_name.to_string(),
            layers: BTreeMap::new(),
            active: BTreeSet::new(),
            remove_list: Vec::new(),
        }
    }

    pub fn vg_name(&self) -> &str {
        &self.vg_name
    }

    /// Kernel state of the LV's top layer. Does not build a plan.
    pub fn info(&self, lv_name: &str) -> VolmanResult<DevInfo> {
        self.query_info(&names::build_name(&self.vg_name, lv_name, None))
    }

    /// Bring `lv_name` and every layer it depends on live.
    pub fn activate(
        &mut self,
        vg: &VolumeGroup,
        lv_name: &str,
        fs: &mut dyn DevFs,
    ) -> VolmanResult<()> {
        info!("Activating {}/{}", self.vg_name, lv_name);
        self.plan(vg, lv_name, PlanMode::Activate)?;
        self.execute_create(vg, fs)
    }

    /// Tear down `lv_name` and the layers only it needs. Nodes shared
    /// with still-active LVs are left alone.
    pub fn deactivate(
        &mut self,
        vg: &VolumeGroup,
        lv_name: &str,
        fs: &mut dyn DevFs,
    ) -> VolmanResult<()> {
        info!("Deactivating {}/{}", self.vg_name, lv_name);
        self.plan(vg, lv_name, PlanMode::Deactivate)?;
        self.execute_remove(fs)
    }

    /// Nodes that belong to this VG but were not needed by the last
    /// plan, for callers that want to reap leftovers.
    pub fn remove_list(&self) -> &[String] {
        &self.remove_list
    }

    pub(super) fn query_info(&self, name: &str) -> VolmanResult<DevInfo> {
        self.dm.info(name).map_err(kernel_err(DmOp::Info, name))
    }
}
