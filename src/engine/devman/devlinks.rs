// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Publishing /dev entries for visible layers.

use std::{
    fs,
    io::ErrorKind,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
};

use crate::volman::VolmanResult;

/// Receives notifications when a visible layer comes or goes.
pub trait DevFs {
    /// A visible layer for `lv` is live under the device-mapper node
    /// `dm_name`.
    fn add_lv(&mut self, vg: &str, lv: &str, dm_name: &str) -> VolmanResult<()>;

    /// The visible layer for `lv` has been removed.
    fn del_lv(&mut self, vg: &str, lv: &str) -> VolmanResult<()>;
}

/// Publishes `/dev/<vg>/<lv>` symlinks pointing into the device-mapper
/// directory.
#[derive(Debug)]
pub struct DevLinks {
    dev_dir: PathBuf,
    mapper_dir: PathBuf,
}

impl DevLinks {
    pub fn new(dev_dir: &Path, mapper_dir: &Path) -> DevLinks {
        DevLinks {
            dev_dir: dev_dir.to_owned(),
            mapper_dir: mapper_dir.to_owned(),
        }
    }

    fn remove_link(link: &Path) -> VolmanResult<()> {
        match fs::remove_file(link) {
            Ok(()) => Ok(()),
            Err(ref err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl DevFs for DevLinks {
    fn add_lv(&mut self, vg: &str, lv: &str, dm_name: &str) -> VolmanResult<()> {
        let vg_dir = self.dev_dir.join(vg);
        fs::create_dir_all(&vg_dir)?;

        let link = vg_dir.join(lv);
        DevLinks::remove_link(&link)?;
        symlink(self.mapper_dir.join(dm_name), &link)?;
        debug!("Linked {} -> {}", link.display(), dm_name);
        Ok(())
    }

    fn del_lv(&mut self, vg: &str, lv: &str) -> VolmanResult<()> {
        let vg_dir = self.dev_dir.join(vg);
        DevLinks::remove_link(&vg_dir.join(lv))?;
        // Drop the VG directory once its last LV is gone.
        if fs::remove_dir(&vg_dir).is_ok() {
            debug!("Removed empty directory {}", vg_dir.display());
        }
        Ok(())
    }
}
