// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Abstraction over the kernel device-mapper control interface.

use std::path::{Path, PathBuf};

use devicemapper::{DevId, DmFlags, DmName, DmOptions, DmUuidBuf, DM};

use crate::volman::{VolmanError, VolmanResult};

use super::targets::{to_raw_table, TargetLine};

/// Directory under which the kernel publishes device-mapper nodes.
pub const DEV_MAPPER_DIR: &str = "/dev/mapper";

/// Last observed kernel state of one device-mapper node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DevInfo {
    pub exists: bool,
    pub suspended: bool,
    pub open_count: i32,
    pub major: u32,
    pub minor: u32,
}

impl DevInfo {
    /// The state of a node that is not in the kernel.
    pub fn absent() -> DevInfo {
        DevInfo::default()
    }
}

/// The device-mapper operations the engine needs, one method per task.
///
/// `create` must leave the node loaded; whether it also resumes is the
/// implementation's business, so callers re-query `info` afterwards and
/// issue an explicit `resume` when the node is still suspended.
pub trait DmControl {
    /// Directory under which nodes appear, for inter-layer table
    /// references.
    fn dir(&self) -> &Path;

    /// All node names in the kernel's device-mapper namespace.
    fn list_names(&self) -> VolmanResult<Vec<String>>;

    fn info(&self, name: &str) -> VolmanResult<DevInfo>;

    /// Create the node and load `table` into it.
    fn create(&self, name: &str, uuid: Option<&str>, table: &[TargetLine])
        -> VolmanResult<()>;

    /// Replace the inactive table of an existing node. Does not change
    /// its suspend state.
    fn reload(&self, name: &str, table: &[TargetLine]) -> VolmanResult<()>;

    fn suspend(&self, name: &str) -> VolmanResult<()>;

    fn resume(&self, name: &str) -> VolmanResult<()>;

    /// Remove the node. Fails while the node is open or referenced by
    /// another table.
    fn remove(&self, name: &str) -> VolmanResult<()>;
}

lazy_static! {
    static ref DM_CONTEXT: Result<DM, devicemapper::DmError> = DM::new();
}

/// Get the process-wide devicemapper context.
pub fn get_dm() -> VolmanResult<&'static DM> {
    match *DM_CONTEXT {
        Ok(ref dm) => Ok(dm),
        Err(_) => Err(VolmanError::Msg(
            "failed to initialize the device-mapper context".into(),
        )),
    }
}

/// The kernel-backed adapter.
#[derive(Debug)]
pub struct SysDm {
    dm: &'static DM,
    dir: PathBuf,
}

impl SysDm {
    pub fn new() -> VolmanResult<SysDm> {
        Ok(SysDm {
            dm: get_dm()?,
            dir: PathBuf::from(DEV_MAPPER_DIR),
        })
    }
}

impl DmControl for SysDm {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn list_names(&self) -> VolmanResult<Vec<String>> {
        Ok(self
            .dm
            .list_devices()?
            .iter()
            .map(|entry| entry.0.to_string())
            .collect())
    }

    fn info(&self, name: &str) -> VolmanResult<DevInfo> {
        let name = DmName::new(name)?;
        match self.dm.device_info(&DevId::Name(name)) {
            Ok(info) => {
                let device = info.device();
                Ok(DevInfo {
                    exists: true,
                    suspended: info.flags() & DmFlags::DM_SUSPEND == DmFlags::DM_SUSPEND,
                    open_count: info.open_count(),
                    major: device.major,
                    minor: device.minor,
                })
            }
            // The info ioctl fails for a nonexistent node.
            Err(_) => Ok(DevInfo::absent()),
        }
    }

    fn create(&self, name: &str, uuid: Option<&str>, table: &[TargetLine])
        -> VolmanResult<()> {
        let name = DmName::new(name)?;
        let id = DevId::Name(name);
        let uuid = uuid
            .map(|uuid| DmUuidBuf::new(uuid.to_string()))
            .transpose()?;
        self.dm
            .device_create(name, uuid.as_deref(), DmOptions::default())?;
        self.dm
            .table_load(&id, &to_raw_table(table), DmOptions::default())?;
        // An un-flagged suspend ioctl resumes, bringing the new node live.
        self.dm.device_suspend(&id, DmOptions::default())?;
        Ok(())
    }

    fn reload(&self, name: &str, table: &[TargetLine]) -> VolmanResult<()> {
        let name = DmName::new(name)?;
        self.dm.table_load(
            &DevId::Name(name),
            &to_raw_table(table),
            DmOptions::default(),
        )?;
        Ok(())
    }

    fn suspend(&self, name: &str) -> VolmanResult<()> {
        let name = DmName::new(name)?;
        self.dm.device_suspend(
            &DevId::Name(name),
            DmOptions::default().set_flags(DmFlags::DM_SUSPEND),
        )?;
        Ok(())
    }

    fn resume(&self, name: &str) -> VolmanResult<()> {
        let name = DmName::new(name)?;
        self.dm
            .device_suspend(&DevId::Name(name), DmOptions::default())?;
        Ok(())
    }

    fn remove(&self, name: &str) -> VolmanResult<()> {
        let name = DmName::new(name)?;
        self.dm
            .device_remove(&DevId::Name(name), DmOptions::default())?;
        Ok(())
    }
}
