// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// A simulated device-mapper backend. Keeps the whole kernel namespace
// in memory so planning and execution can be exercised without touching
// the control device.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::volman::{DmOp, VolmanError, VolmanResult};

use super::{
    devlinks::DevFs,
    dm::{DevInfo, DmControl, DEV_MAPPER_DIR},
    targets::{to_raw_table, TargetLine},
};

const SIM_DM_MAJOR: u32 = 253;

#[derive(Debug, Clone)]
struct SimNode {
    uuid: Option<String>,
    table: Vec<(u64, u64, String, String)>,
    suspended: bool,
    open_count: i32,
    minor: u32,
}

/// In-memory device-mapper namespace with an operation journal.
#[derive(Debug, Default)]
pub struct SimDm {
    dir: PathBuf,
    nodes: RefCell<BTreeMap<String, SimNode>>,
    journal: RefCell<Vec<String>>,
    fail_on: RefCell<Option<(DmOp, String)>>,
    next_minor: RefCell<u32>,
}

impl SimDm {
    pub fn new() -> SimDm {
        SimDm {
            dir: PathBuf::from(DEV_MAPPER_DIR),
            ..SimDm::default()
        }
    }

    /// The state-changing operations issued so far, oldest first, each
    /// rendered as "<op> <name>".
    pub fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.borrow_mut().clear();
    }

    /// The node's currently loaded table, if the node exists.
    pub fn table(&self, name: &str) -> Option<Vec<(u64, u64, String, String)>> {
        self.nodes.borrow().get(name).map(|node| node.table.clone())
    }

    pub fn uuid(&self, name: &str) -> Option<String> {
        self.nodes.borrow().get(name).and_then(|node| node.uuid.clone())
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.borrow().keys().cloned().collect()
    }

    /// Fail the next attempt of `op` against `name`.
    pub fn fail_next(&self, op: DmOp, name: &str) {
        *self.fail_on.borrow_mut() = Some((op, name.to_string()));
    }

    /// Pretend external holders keep the node open.
    pub fn set_open(&self, name: &str, count: i32) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(name) {
            node.open_count = count;
        }
    }

    fn record(&self, op: DmOp, name: &str) -> VolmanResult<()> {
        self.journal.borrow_mut().push(format!("{} {}", op, name));
        let mut fail = self.fail_on.borrow_mut();
        if let Some((fail_op, fail_name)) = fail.take() {
            if fail_op == op && fail_name == name {
                return Err(VolmanError::Msg(format!(
                    "injected {} failure on {}",
                    op, name
                )));
            }
            *fail = Some((fail_op, fail_name));
        }
        Ok(())
    }
}

impl DmControl for SimDm {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn list_names(&self) -> VolmanResult<Vec<String>> {
        Ok(self.node_names())
    }

    fn info(&self, name: &str) -> VolmanResult<DevInfo> {
        Ok(match self.nodes.borrow().get(name) {
            Some(node) => DevInfo {
                exists: true,
                suspended: node.suspended,
                open_count: node.open_count,
                major: SIM_DM_MAJOR,
                minor: node.minor,
            },
            None => DevInfo::absent(),
        })
    }

    fn create(&self, name: &str, uuid: Option<&str>, table: &[TargetLine])
        -> VolmanResult<()> {
        self.record(DmOp::Create, name)?;
        let mut nodes = self.nodes.borrow_mut();
        if nodes.contains_key(name) {
            return Err(VolmanError::Msg(format!("device {} already exists", name)));
        }
        let minor = *self.next_minor.borrow();
        *self.next_minor.borrow_mut() += 1;
        nodes.insert(
            name.to_string(),
            SimNode {
                uuid: uuid.map(|uuid| uuid.to_string()),
                table: to_raw_table(table),
                suspended: false,
                open_count: 0,
                minor,
            },
        );
        Ok(())
    }

    fn reload(&self, name: &str, table: &[TargetLine]) -> VolmanResult<()> {
        self.record(DmOp::Reload, name)?;
        match self.nodes.borrow_mut().get_mut(name) {
            Some(node) => {
                node.table = to_raw_table(table);
                Ok(())
            }
            None => Err(VolmanError::Msg(format!("device {} does not exist", name))),
        }
    }

    fn suspend(&self, name: &str) -> VolmanResult<()> {
        self.record(DmOp::Suspend, name)?;
        match self.nodes.borrow_mut().get_mut(name) {
            Some(node) => {
                node.suspended = true;
                Ok(())
            }
            None => Err(VolmanError::Msg(format!("device {} does not exist", name))),
        }
    }

    fn resume(&self, name: &str) -> VolmanResult<()> {
        self.record(DmOp::Resume, name)?;
        match self.nodes.borrow_mut().get_mut(name) {
            Some(node) => {
                node.suspended = false;
                Ok(())
            }
            None => Err(VolmanError::Msg(format!("device {} does not exist", name))),
        }
    }

    fn remove(&self, name: &str) -> VolmanResult<()> {
        self.record(DmOp::Remove, name)?;
        let mut nodes = self.nodes.borrow_mut();
        match nodes.get(name) {
            Some(node) if node.open_count > 0 => Err(VolmanError::Msg(format!(
                "device {} is still open",
                name
            ))),
            Some(_) => {
                nodes.remove(name);
                Ok(())
            }
            None => Err(VolmanError::Msg(format!("device {} does not exist", name))),
        }
    }
}

/// Records publisher notifications instead of touching /dev.
#[derive(Debug, Default)]
pub struct SimFs {
    pub ops: Vec<String>,
}

impl DevFs for SimFs {
    fn add_lv(&mut self, vg: &str, lv: &str, dm_name: &str) -> VolmanResult<()> {
        self.ops.push(format!("add {} {} {}", vg, lv, dm_name));
        Ok(())
    }

    fn del_lv(&mut self, vg: &str, lv: &str) -> VolmanResult<()> {
        self.ops.push(format!("del {} {}", vg, lv));
        Ok(())
    }
}
