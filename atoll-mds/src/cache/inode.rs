// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::cache::waiter::WaitList;
use crate::mds::Cont;
use atoll_common::state::{
    ClientId, DirFragId, Frag, FragTree, InodeAttr, InodeId, InodeStat, PeerId, ReqId, Version,
};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Identity of a cached dentry: owning dirfrag plus name. Orders
/// lexicographically by (dirfrag-id, name).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DentryKey {
    pub df: DirFragId,
    pub name: String,
}

impl DentryKey {
    pub fn new(df: DirFragId, name: impl Into<String>) -> Self {
        Self {
            df,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for DentryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.df, self.name)
    }
}

/// Shared/exclusive lock state for one inode lock class. Lock holders are
/// request identities; re-requesting a held lock is idempotent.
#[derive(Debug, Default)]
pub struct LockState {
    readers: Vec<ReqId>,
    writer: Option<ReqId>,
    pub waiters: VecDeque<Cont>,
}

impl LockState {
    pub fn try_read(&mut self, req: ReqId) -> bool {
        if self.readers.contains(&req) {
            return true;
        }
        match self.writer {
            Some(w) if w != req => false,
            _ => {
                self.readers.push(req);
                true
            }
        }
    }

    pub fn read_finish(&mut self, req: ReqId) {
        self.readers.retain(|r| *r != req);
    }

    pub fn try_write(&mut self, req: ReqId) -> bool {
        if self.writer == Some(req) {
            return true;
        }
        if self.writer.is_some() {
            return false;
        }
        if self.readers.iter().any(|r| *r != req) {
            return false;
        }
        self.readers.retain(|r| *r != req);
        self.writer = Some(req);
        true
    }

    pub fn write_finish(&mut self, req: ReqId) {
        if self.writer == Some(req) {
            self.writer = None;
        }
    }

    pub fn held_by(&self, req: ReqId) -> bool {
        self.writer == Some(req) || self.readers.contains(&req)
    }

    pub fn is_idle(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

/// A capability grant: the file-state rights a client may cache. Issuance is
/// the only part this core touches; revocation belongs to the capability
/// subsystem.
#[derive(Debug, Clone, Default)]
pub struct Capability {
    pub issued: u32,
    pub wanted: u32,
    pub seq: u64,
}

/// A cached inode. Authoritative on exactly one peer; replicas are
/// read-through copies.
#[derive(Debug)]
pub struct CInode {
    pub attr: InodeAttr,
    pub symlink: Option<String>,
    pub fragtree: FragTree,
    /// Primary parent dentry, if linked.
    pub parent: Option<DentryKey>,
    pub auth: PeerId,
    pub anchored: bool,
    pub caps: FxHashMap<ClientId, Capability>,
    pub hard: LockState,
    pub file: LockState,
    fdv: Version,
    projected: Version,
    pins: u32,
}

impl CInode {
    pub fn new(attr: InodeAttr, auth: PeerId) -> Self {
        let projected = attr.version;
        Self {
            attr,
            symlink: None,
            fragtree: FragTree::default(),
            parent: None,
            auth,
            anchored: false,
            caps: FxHashMap::default(),
            hard: LockState::default(),
            file: LockState::default(),
            fdv: 0,
            projected,
            pins: 0,
        }
    }

    pub fn ino(&self) -> InodeId {
        self.attr.ino
    }

    pub fn is_dir(&self) -> bool {
        self.attr.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.attr.is_file()
    }

    pub fn is_symlink(&self) -> bool {
        self.attr.is_symlink()
    }

    pub fn is_auth(&self, whoami: PeerId) -> bool {
        self.auth == whoami
    }

    pub fn pick_dirfrag(&self, name: &str) -> Frag {
        self.fragtree.pick(name)
    }

    /// Reserve the next version for a prepared mutation.
    pub fn pre_dirty(&mut self) -> Version {
        self.projected += 1;
        self.projected
    }

    /// Apply a prepared mutation at its reserved version. A fresh inode's
    /// first version comes from its dentry's reservation, so the projected
    /// counter follows the applied version when it lags.
    pub fn mark_dirty(&mut self, v: Version) {
        if v > self.projected {
            self.projected = v;
        }
        self.attr.version = v;
    }

    pub fn projected_version(&self) -> Version {
        self.projected
    }

    pub fn issue_fdv(&mut self) -> Version {
        self.fdv += 1;
        self.fdv
    }

    /// Does any client hold or want capabilities on this inode?
    pub fn caps_wanted(&self) -> bool {
        self.caps.values().any(|c| c.issued != 0 || c.wanted != 0)
    }

    pub fn pin(&mut self) {
        self.pins += 1;
    }

    pub fn unpin(&mut self) {
        debug_assert!(self.pins > 0);
        self.pins = self.pins.saturating_sub(1);
    }

    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }

    pub fn stat(&self) -> InodeStat {
        InodeStat {
            attr: self.attr.clone(),
            symlink: self.symlink.clone(),
        }
    }
}

/// Dentry linkage: a reserved name, a primary link owning its inode, or a
/// remote link referring to an inode whose primary dentry lives elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnState {
    Null,
    Primary(InodeId),
    Remote(InodeId),
}

#[derive(Debug)]
pub struct CDentry {
    pub name: String,
    pub state: DnState,
    pub xlocked_by: Option<ReqId>,
    pub replicas: Vec<PeerId>,
    pub dirty: bool,
    version: Version,
    projected: Version,
}

impl CDentry {
    pub fn new(name: impl Into<String>, state: DnState) -> Self {
        Self {
            name: name.into(),
            state,
            xlocked_by: None,
            replicas: vec![],
            dirty: false,
            version: 0,
            projected: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.state, DnState::Null)
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.state, DnState::Primary(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.state, DnState::Remote(_))
    }

    pub fn ino(&self) -> Option<InodeId> {
        match self.state {
            DnState::Null => None,
            DnState::Primary(ino) | DnState::Remote(ino) => Some(ino),
        }
    }

    /// Readable unless another request holds the xlock.
    pub fn can_read(&self, req: ReqId) -> bool {
        match self.xlocked_by {
            None => true,
            Some(holder) => holder == req,
        }
    }

    pub fn is_xlocked_by(&self, req: ReqId) -> bool {
        self.xlocked_by == Some(req)
    }

    pub fn pre_dirty(&mut self) -> Version {
        self.projected += 1;
        self.projected
    }

    pub fn mark_dirty(&mut self, v: Version) {
        assert!(v <= self.projected, "dirty version {} ahead of projected {}", v, self.projected);
        self.version = v;
        self.dirty = true;
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn projected_version(&self) -> Version {
        self.projected
    }

    pub fn is_clean(&self) -> bool {
        !self.dirty
    }

    /// No xlock holder; safe to drop if also null and clean.
    pub fn is_sync(&self) -> bool {
        self.xlocked_by.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeState {
    Unfrozen,
    Freezing,
    Frozen,
}

/// One shard of a directory's children.
#[derive(Debug)]
pub struct CDir {
    pub id: DirFragId,
    pub auth: PeerId,
    pub complete: bool,
    pub dirty: bool,
    pub freeze: FreezeState,
    pub waiters: WaitList,
    pub fetching: bool,
    auth_pins_frozen: bool,
    items: BTreeMap<String, CDentry>,
    version: Version,
    projected: Version,
}

impl CDir {
    pub fn new(id: DirFragId, auth: PeerId) -> Self {
        Self {
            id,
            auth,
            complete: false,
            dirty: false,
            freeze: FreezeState::Unfrozen,
            waiters: WaitList::default(),
            fetching: false,
            auth_pins_frozen: false,
            items: BTreeMap::new(),
            version: 0,
            projected: 0,
        }
    }

    pub fn is_auth(&self, whoami: PeerId) -> bool {
        self.auth == whoami
    }

    pub fn is_frozen(&self) -> bool {
        !matches!(self.freeze, FreezeState::Unfrozen)
    }

    pub fn can_auth_pin(&self) -> bool {
        !self.auth_pins_frozen && !self.is_frozen()
    }

    /// Used by the migration subsystem; exposed here for tests.
    pub fn set_auth_pins_frozen(&mut self, v: bool) {
        self.auth_pins_frozen = v;
    }

    pub fn lookup(&self, name: &str) -> Option<&CDentry> {
        self.items.get(name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut CDentry> {
        self.items.get_mut(name)
    }

    pub fn add_dentry(&mut self, name: impl Into<String>, state: DnState) -> &mut CDentry {
        let name = name.into();
        self.items
            .entry(name.clone())
            .or_insert_with(|| CDentry::new(name, state))
    }

    pub fn remove_dentry(&mut self, name: &str) {
        self.items.remove(name);
    }

    /// Demote a dentry to null. The caller owns inode-side bookkeeping.
    pub fn unlink_inode(&mut self, name: &str) {
        if let Some(dn) = self.items.get_mut(name) {
            dn.state = DnState::Null;
        }
    }

    /// Number of live (non-null) entries.
    pub fn size(&self) -> usize {
        self.items.values().filter(|d| !d.is_null()).count()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &CDentry)> {
        self.items.iter()
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub fn pre_dirty(&mut self) -> Version {
        self.projected += 1;
        self.projected
    }

    pub fn mark_dirty(&mut self, v: Version) {
        assert!(v <= self.projected);
        self.version = v;
        self.dirty = true;
    }

    pub fn version(&self) -> Version {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_state_shared_exclusive() {
        let mut lock = LockState::default();
        assert!(lock.try_read(1));
        assert!(lock.try_read(2));
        // Writer blocked by a foreign reader.
        assert!(!lock.try_write(3));
        lock.read_finish(1);
        lock.read_finish(2);
        assert!(lock.try_write(3));
        // Idempotent re-request.
        assert!(lock.try_write(3));
        assert!(!lock.try_read(4));
        lock.write_finish(3);
        assert!(lock.try_read(4));
    }

    #[test]
    fn lock_upgrades_own_read() {
        let mut lock = LockState::default();
        assert!(lock.try_read(1));
        // Sole reader may take the write lock.
        assert!(lock.try_write(1));
        assert!(lock.held_by(1));
        lock.write_finish(1);
        assert!(lock.is_idle());
    }

    #[test]
    fn dentry_versions() {
        let mut dn = CDentry::new("a", DnState::Null);
        let pv = dn.pre_dirty();
        assert_eq!(pv, 1);
        assert!(dn.version() <= dn.projected_version());
        dn.mark_dirty(pv);
        assert_eq!(dn.version(), 1);
        assert!(dn.dirty);
    }

    #[test]
    fn dir_size_skips_null() {
        let mut dir = CDir::new(DirFragId::root_of(1), 0);
        dir.add_dentry("a", DnState::Primary(10));
        dir.add_dentry("b", DnState::Null);
        assert_eq!(dir.size(), 1);
        dir.unlink_inode("a");
        assert_eq!(dir.size(), 0);
    }
}
