// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Walks the pruned layer graph issuing the kernel operations that
// realize or tear down the plan. A failed operation aborts the walk;
// partial kernel state is left for the caller to quiesce.

use std::collections::BTreeSet;

use crate::{
    engine::metadata::VolumeGroup,
    volman::{DmOp, VolmanError, VolmanResult},
};

use super::{
    devlinks::DevFs,
    devman::{kernel_err, DevManager},
    dm::DevInfo,
};

impl DevManager<'_> {
    /// Activation walk: post-order over every root's pre_create tree,
    /// so a layer's dependencies are loaded before its own table goes
    /// live.
    pub(super) fn execute_create(
        &mut self,
        vg: &VolumeGroup,
        fs: &mut dyn DevFs,
    ) -> VolmanResult<()> {
        let mut done = BTreeSet::new();
        for root in self.roots()? {
            self.create_rec(vg, &root, fs, &mut done)?;
        }
        Ok(())
    }

    fn create_rec(
        &mut self,
        vg: &VolumeGroup,
        name: &str,
        fs: &mut dyn DevFs,
        done: &mut BTreeSet<String>,
    ) -> VolmanResult<()> {
        if !done.insert(name.to_string()) {
            return Ok(());
        }

        let info = self.refresh_info(name)?;

        // A present parent must be quiesced before its dependencies'
        // tables change underneath it.
        if info.exists {
            self.suspend_layer(name)?;
        }

        let deps = match self.layers.get(name) {
            Some(layer) => layer.pre_create.clone(),
            None => return Err(VolmanError::MissingDependency(name.to_string())),
        };
        for dep in &deps {
            if !self.layers.contains_key(dep) {
                return Err(VolmanError::MissingDependency(dep.clone()));
            }
            self.create_rec(vg, dep, fs, done)?;
        }

        // Layers that must be live before this one resumes. No current
        // strategy populates these.
        let pre_active = self
            .layers
            .get(name)
            .map(|layer| layer.pre_active.clone())
            .unwrap_or_default();
        for dep in &pre_active {
            if self.layers.contains_key(dep) {
                self.create_rec(vg, dep, fs, done)?;
            }
        }

        let table = match self.layers.get(name) {
            Some(layer) => layer.table(vg, self.dm.dir())?,
            None => return Err(VolmanError::MissingDependency(name.to_string())),
        };

        if info.exists {
            debug!("Reloading {}", name);
            self.dm
                .reload(name, &table)
                .map_err(kernel_err(DmOp::Reload, name))?;
            self.resume_layer(name)?;
        } else {
            debug!("Creating {}", name);
            let uuid = self.layer_uuid(vg, name);
            self.dm
                .create(name, uuid.as_deref(), &table)
                .map_err(kernel_err(DmOp::Create, name))?;
            // The adapter may or may not leave a fresh node live.
            let fresh = self.refresh_info(name)?;
            if fresh.suspended {
                self.resume_layer(name)?;
            }
        }

        self.notify_added(name, fs);
        Ok(())
    }

    /// Deactivation walk: pre-order, so parents release their holds
    /// before their dependencies are removed.
    pub(super) fn execute_remove(&mut self, fs: &mut dyn DevFs) -> VolmanResult<()> {
        let mut done = BTreeSet::new();
        for root in self.roots()? {
            self.remove_rec(&root, fs, &mut done)?;
        }
        Ok(())
    }

    fn remove_rec(
        &mut self,
        name: &str,
        fs: &mut dyn DevFs,
        done: &mut BTreeSet<String>,
    ) -> VolmanResult<()> {
        if !done.insert(name.to_string()) {
            return Ok(());
        }

        let info = self.refresh_info(name)?;
        if info.exists {
            // A suspended node cannot be removed cleanly.
            if info.suspended {
                self.resume_layer(name)?;
            }
            debug!("Removing {}", name);
            self.dm.remove(name).map_err(kernel_err(DmOp::Remove, name))?;
            if let Some(layer) = self.layers.get_mut(name) {
                layer.info = DevInfo::absent();
            }
            self.notify_removed(name, fs);
        }

        let deps = self
            .layers
            .get(name)
            .map(|layer| layer.pre_create.clone())
            .unwrap_or_default();
        for dep in &deps {
            if !self.layers.contains_key(dep) {
                debug!("Dependency '{}' is outside the plan", dep);
                continue;
            }
            self.remove_rec(dep, fs, done)?;
        }
        Ok(())
    }

    /// Re-query the kernel and update the layer's recorded state.
    fn refresh_info(&mut self, name: &str) -> VolmanResult<DevInfo> {
        let info = self.query_info(name)?;
        if let Some(layer) = self.layers.get_mut(name) {
            layer.info = info;
        }
        Ok(info)
    }

    /// Suspend the layer unless it already is.
    fn suspend_layer(&mut self, name: &str) -> VolmanResult<()> {
        let suspended = match self.layers.get(name) {
            Some(layer) => layer.info.suspended,
            None => return Err(VolmanError::MissingDependency(name.to_string())),
        };
        if suspended {
            return Ok(());
        }
        debug!("Suspending {}", name);
        self.dm
            .suspend(name)
            .map_err(kernel_err(DmOp::Suspend, name))?;
        if let Some(layer) = self.layers.get_mut(name) {
            layer.info.suspended = true;
        }
        Ok(())
    }

    /// Resume the layer unless it already is live.
    fn resume_layer(&mut self, name: &str) -> VolmanResult<()> {
        let suspended = match self.layers.get(name) {
            Some(layer) => layer.info.suspended,
            None => return Err(VolmanError::MissingDependency(name.to_string())),
        };
        if !suspended {
            return Ok(());
        }
        debug!("Resuming {}", name);
        self.dm
            .resume(name)
            .map_err(kernel_err(DmOp::Resume, name))?;
        if let Some(layer) = self.layers.get_mut(name) {
            layer.info.suspended = false;
        }
        Ok(())
    }

    /// Kernel uuid recorded on a visible layer at create time.
    fn layer_uuid(&self, vg: &VolumeGroup, name: &str) -> Option<String> {
        let layer = self.layers.get(name)?;
        if !layer.visible {
            return None;
        }
        let lv = vg.lvs.get(layer.lv.as_deref()?)?;
        Some(format!("LVM-{}{}", vg.id.simple(), lv.id.simple()))
    }

    /// Tell the /dev publisher about a visible layer that went live.
    /// Publisher trouble is not worth failing an otherwise complete
    /// activation over.
    fn notify_added(&self, name: &str, fs: &mut dyn DevFs) {
        if let Some(layer) = self.layers.get(name) {
            if layer.visible {
                if let Some(lv) = layer.lv.as_deref() {
                    if let Err(err) = fs.add_lv(&self.vg_name, lv, name) {
                        warn!("Failed to publish /dev entry for {}: {}", name, err);
                    }
                }
            }
        }
    }

    fn notify_removed(&self, name: &str, fs: &mut dyn DevFs) {
        if let Some(layer) = self.layers.get(name) {
            if layer.visible {
                if let Some(lv) = layer.lv.as_deref() {
                    if let Err(err) = fs.del_lv(&self.vg_name, lv) {
                        warn!("Failed to retire /dev entry for {}: {}", name, err);
                    }
                }
            }
        }
    }
}
