// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Plan construction: expands VG metadata into the dependency graph of
// device layers a target LV needs, against what the kernel already has.

use std::collections::BTreeSet;

use crate::{
    engine::metadata::{LogicalVolume, Snapshot, VolumeGroup},
    volman::{DmOp, VolmanError, VolmanResult},
};

use super::{
    devman::{kernel_err, DevManager},
    layer::{DevLayer, Populate, LAYER_COW, LAYER_REAL},
    names,
};

/// Whether the target LV joins or leaves the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PlanMode {
    Activate,
    Deactivate,
}

impl DevManager<'_> {
    /// Build the pruned layer plan for one target LV: scan the kernel,
    /// settle the active set, expand every LV in the VG, then keep only
    /// the layers the target's top layer reaches.
    pub(super) fn plan(
        &mut self,
        vg: &VolumeGroup,
        lv_name: &str,
        mode: PlanMode,
    ) -> VolmanResult<()> {
        if vg.name != self.vg_name {
            return Err(VolmanError::MetadataInconsistent(format!(
                "device manager scoped to VG {} was handed metadata for VG {}",
                self.vg_name, vg.name
            )));
        }

        self.layers.clear();
        self.active.clear();
        self.remove_list.clear();

        self.scan_existing()?;
        self.fill_in_active_list(vg);
        match mode {
            PlanMode::Activate => {
                self.active.insert(lv_name.to_string());
            }
            PlanMode::Deactivate => {
                self.active.remove(lv_name);
            }
        }

        for lv in vg.lvs.values() {
            self.expand_lv(vg, lv)?;
        }

        let top = names::build_name(&vg.name, lv_name, None);
        if !self.layers.contains_key(&top) {
            return Err(VolmanError::PlanIncomplete(top));
        }

        self.mark_from(&top, mode)?;
        // Activating a snapshot also raises its origin's stack: the
        // origin's top layer joins the plan even though the snapshot's
        // own dependencies only reach the hidden real device. The
        // converse does not hold for deactivation; removing a snapshot
        // leaves its origin alone.
        if mode == PlanMode::Activate {
            if let Some(snap) = vg.find_cow(lv_name) {
                let origin_top = names::build_name(&vg.name, &snap.origin, None);
                self.mark_from(&origin_top, mode)?;
            }
        }
        self.prune_unmarked();

        Ok(())
    }

    /// Record every node in the kernel that claims to belong to this VG.
    fn scan_existing(&mut self) -> VolmanResult<()> {
        let node_names = self
            .dm
            .list_names()
            .map_err(kernel_err(DmOp::List, &self.vg_name))?;

        for name in node_names {
            if !names::belongs_to_vg(&self.vg_name, &name) {
                continue;
            }
            debug!("Found existing layer '{}'", name);
            let info = self.query_info(&name)?;
            self.layers.insert(name.clone(), DevLayer::discovered(name, info));
        }
        Ok(())
    }

    /// An LV whose top layer is in the kernel is active.
    fn fill_in_active_list(&mut self, vg: &VolumeGroup) {
        for lv in vg.lvs.values() {
            let top = names::build_name(&vg.name, &lv.name, None);
            if self.layers.contains_key(&top) {
                debug!("LV {} is active", lv.name);
                self.active.insert(lv.name.clone());
            }
        }
    }

    /// Insert the layers realizing one LV, shaped by its snapshot role.
    fn expand_lv(&mut self, vg: &VolumeGroup, lv: &LogicalVolume) -> VolmanResult<()> {
        if lv.segments.is_empty() {
            return Err(VolmanError::MetadataInconsistent(format!(
                "LV {} has no segments",
                lv.name
            )));
        }

        if let Some(snap) = vg.find_cow(&lv.name).cloned() {
            self.check_snapshot_chain(vg, &lv.name)?;
            self.expand_snapshot(vg, lv, &snap)
        } else if self.origin_needs_layers(vg, &lv.name) {
            self.expand_origin_real(vg, lv)
        } else {
            self.expand_vanilla(vg, lv)
        }
    }

    /// An origin needs the real/origin split only while one of its
    /// snapshots is active; otherwise it is realized directly.
    fn origin_needs_layers(&self, vg: &VolumeGroup, lv_name: &str) -> bool {
        vg.snapshots
            .iter()
            .any(|snap| snap.origin == lv_name && self.active.contains(&snap.cow))
    }

    /// Follow cow -> origin links from `lv_name`; a revisited LV means
    /// the snapshot metadata is cyclic.
    fn check_snapshot_chain(&self, vg: &VolumeGroup, lv_name: &str) -> VolmanResult<()> {
        let mut seen = BTreeSet::new();
        let mut current = lv_name.to_string();
        while let Some(snap) = vg.find_cow(&current) {
            if seen.contains(&current) {
                return Err(VolmanError::CircularDependency(current));
            }
            seen.insert(current);
            current = snap.origin.clone();
        }
        Ok(())
    }

    /// A planned layer starts from fresh kernel info.
    fn new_layer(
        &self,
        name: String,
        lv: &LogicalVolume,
        populate: Populate,
        visible: bool,
    ) -> VolmanResult<DevLayer> {
        let info = self.query_info(&name)?;
        Ok(DevLayer::planned(name, &lv.name, populate, visible, info))
    }

    fn insert_layer(&mut self, layer: DevLayer) {
        self.layers.insert(layer.name.clone(), layer);
    }

    fn expand_vanilla(&mut self, vg: &VolumeGroup, lv: &LogicalVolume) -> VolmanResult<()> {
        let layer = self.new_layer(
            names::build_name(&vg.name, &lv.name, None),
            lv,
            Populate::Vanilla,
            true,
        )?;
        self.insert_layer(layer);
        Ok(())
    }

    fn expand_origin_real(&mut self, vg: &VolumeGroup, lv: &LogicalVolume) -> VolmanResult<()> {
        let real = self.new_layer(
            names::build_name(&vg.name, &lv.name, Some(LAYER_REAL)),
            lv,
            Populate::Vanilla,
            false,
        )?;
        let real_name = real.name.clone();
        self.insert_layer(real);

        let mut top = self.new_layer(
            names::build_name(&vg.name, &lv.name, None),
            lv,
            Populate::Origin,
            true,
        )?;
        top.pre_create.push(real_name);
        self.insert_layer(top);
        Ok(())
    }

    fn expand_snapshot(
        &mut self,
        vg: &VolumeGroup,
        lv: &LogicalVolume,
        snap: &Snapshot,
    ) -> VolmanResult<()> {
        if !vg.lvs.contains_key(&snap.origin) {
            return Err(VolmanError::MetadataInconsistent(format!(
                "snapshot {} references missing origin {}",
                lv.name, snap.origin
            )));
        }

        let cow = self.new_layer(
            names::build_name(&vg.name, &lv.name, Some(LAYER_COW)),
            lv,
            Populate::Vanilla,
            false,
        )?;
        let cow_name = cow.name.clone();
        self.insert_layer(cow);

        let mut top = self.new_layer(
            names::build_name(&vg.name, &lv.name, None),
            lv,
            Populate::Snapshot {
                origin: snap.origin.clone(),
                cow: snap.cow.clone(),
                chunk_size: snap.chunk_size,
                persistent: snap.persistent,
            },
            true,
        )?;
        // The origin's hidden real device must exist before the snapshot
        // can hook into it, as must the cow's own layer.
        top.pre_create
            .push(names::build_name(&vg.name, &snap.origin, Some(LAYER_REAL)));
        top.pre_create.push(cow_name);
        self.insert_layer(top);
        Ok(())
    }

    /// Mark the target's top layer and everything reachable from it
    /// through pre_create.
    fn mark_from(&mut self, top: &str, mode: PlanMode) -> VolmanResult<()> {
        if let Some(layer) = self.layers.get_mut(top) {
            layer.marked = true;
        }
        let mut path = vec![top.to_string()];
        self.mark_pre_create(top, &mut path, mode)
    }

    fn mark_pre_create(
        &mut self,
        name: &str,
        path: &mut Vec<String>,
        mode: PlanMode,
    ) -> VolmanResult<()> {
        let deps = match self.layers.get(name) {
            Some(layer) => layer.pre_create.clone(),
            None => Vec::new(),
        };

        for dep in deps {
            if path.iter().any(|seen| *seen == dep) {
                return Err(VolmanError::CircularDependency(dep));
            }
            let layer = match self.layers.get_mut(&dep) {
                Some(layer) => layer,
                None => match mode {
                    // Nothing needs to exist for a removal; the
                    // dependency may be gone already.
                    PlanMode::Deactivate => {
                        debug!("Ignoring absent dependency '{}'", dep);
                        continue;
                    }
                    PlanMode::Activate => {
                        return Err(VolmanError::MissingDependency(dep));
                    }
                },
            };
            if layer.marked {
                continue;
            }
            layer.marked = true;
            path.push(dep.clone());
            self.mark_pre_create(&dep, path, mode)?;
            path.pop();
        }
        Ok(())
    }

    /// Drop unmarked layers from the plan, recording the ones that are
    /// in the kernel so the caller can see what was left behind.
    fn prune_unmarked(&mut self) {
        let mut pruned = Vec::new();
        self.layers.retain(|name, layer| {
            if layer.marked {
                true
            } else {
                debug!("Pruning layer '{}'", name);
                if layer.info.exists {
                    pruned.push(name.clone());
                }
                false
            }
        });
        self.remove_list = pruned;
    }

    /// The layers no other layer depends on; execution walks start
    /// here. Origin tops sort last: a snapshot must be registered
    /// against the real device before the origin's table goes live.
    pub(super) fn roots(&self) -> VolmanResult<Vec<String>> {
        let mut dependants = BTreeSet::new();
        for name in self.layers.keys() {
            if dependants.contains(name.as_str()) {
                continue;
            }
            self.collect_dependants(name, &mut dependants);
            if dependants.contains(name.as_str()) {
                return Err(VolmanError::CircularDependency(name.clone()));
            }
        }

        let mut roots = self
            .layers
            .keys()
            .filter(|name| !dependants.contains(name.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        roots.sort_by_key(|name| {
            (
                matches!(
                    self.layers.get(name).and_then(|layer| layer.populate.as_ref()),
                    Some(Populate::Origin)
                ),
                name.clone(),
            )
        });
        Ok(roots)
    }

    fn collect_dependants(&self, name: &str, dependants: &mut BTreeSet<String>) {
        let layer = match self.layers.get(name) {
            Some(layer) => layer,
            None => return,
        };
        for dep in &layer.pre_create {
            if dependants.contains(dep) {
                continue;
            }
            dependants.insert(dep.clone());
            self.collect_dependants(dep, dependants);
        }
    }
}
