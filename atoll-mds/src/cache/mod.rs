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

//! Inode / dirfrag / dentry cache. The object graph is cyclic (inodes link to
//! parent dentries, dentries to inodes, dirfrags hold dentries), so the cache
//! is index-based: inodes are addressed by ino, dirfrags by (ino, frag), and
//! dentries by (dirfrag, name). Nothing holds owning references.

mod inode;
mod request;
pub mod resolve;
pub mod waiter;

pub use inode::{CDentry, CDir, CInode, Capability, DentryKey, DnState, FreezeState, LockState};
pub use request::MdRequest;

use crate::mds::Cont;
use atoll_common::state::{
    DirFragId, Frag, InodeAttr, InodeId, PeerId, ReqId, MODE_DIR, ROOT_INO,
};
use atoll_common::utils::LocalTime;
use fxhash::FxHashMap;
use log::debug;
use std::collections::VecDeque;

/// Authority of the root inode, by convention the first peer.
pub const ROOT_AUTH: PeerId = 0;

pub struct MdCache {
    whoami: PeerId,
    inodes: FxHashMap<InodeId, CInode>,
    dirfrags: FxHashMap<DirFragId, CDir>,
    requests: FxHashMap<ReqId, MdRequest>,
    /// Continuations parked on in-flight remote inode opens.
    pub opening_inodes: FxHashMap<InodeId, VecDeque<Cont>>,
    /// Continuations parked on in-flight cross-peer xlock requests.
    pub remote_xlock_waiters: FxHashMap<DentryKey, VecDeque<Cont>>,
    /// Inodes handed to the object-store purge queue, newest last.
    pub purged: Vec<InodeId>,
    next_ino: u64,
}

impl MdCache {
    pub fn new(whoami: PeerId) -> Self {
        let mut cache = Self {
            whoami,
            inodes: FxHashMap::default(),
            dirfrags: FxHashMap::default(),
            requests: FxHashMap::default(),
            opening_inodes: FxHashMap::default(),
            remote_xlock_waiters: FxHashMap::default(),
            purged: vec![],
            next_ino: 0,
        };

        // The root inode exists before any client request is dispatched.
        let attr = InodeAttr {
            ino: ROOT_INO,
            mode: MODE_DIR | 0o755,
            nlink: 1,
            mtime: LocalTime::unix_secs(),
            atime: LocalTime::unix_secs(),
            ctime: LocalTime::unix_secs(),
            ..Default::default()
        };
        cache.inodes.insert(ROOT_INO, CInode::new(attr, ROOT_AUTH));
        if whoami == ROOT_AUTH {
            let df = DirFragId::root_of(ROOT_INO);
            let mut dir = CDir::new(df, ROOT_AUTH);
            dir.mark_complete();
            cache.dirfrags.insert(df, dir);
        }
        cache
    }

    pub fn whoami(&self) -> PeerId {
        self.whoami
    }

    pub fn root(&self) -> InodeId {
        ROOT_INO
    }

    // ---- inodes

    pub fn get_inode(&self, ino: InodeId) -> Option<&CInode> {
        self.inodes.get(&ino)
    }

    pub fn get_inode_mut(&mut self, ino: InodeId) -> Option<&mut CInode> {
        self.inodes.get_mut(&ino)
    }

    pub fn have_inode(&self, ino: InodeId) -> bool {
        self.inodes.contains_key(&ino)
    }

    pub fn add_inode(&mut self, inode: CInode) {
        self.inodes.insert(inode.ino(), inode);
    }

    /// Allocate a fresh authoritative inode for a create-type operation.
    /// Inos are unique across peers: the peer rank lives in the high bits.
    pub fn create_inode(&mut self, uid: u32, gid: u32) -> InodeId {
        self.next_ino += 1;
        let ino = ((self.whoami as u64 + 1) << 40) + self.next_ino;
        let now = LocalTime::unix_secs();
        let attr = InodeAttr {
            ino,
            uid,
            gid,
            nlink: 1,
            ctime: now,
            mtime: now,
            atime: now,
            ..Default::default()
        };
        self.inodes.insert(ino, CInode::new(attr, self.whoami));
        ino
    }

    pub fn remove_inode(&mut self, ino: InodeId) {
        self.inodes.remove(&ino);
        self.dirfrags.retain(|df, _| df.ino != ino);
    }

    /// Queue the inode body for destruction in the object store.
    pub fn purge_inode(&mut self, attr: &InodeAttr) {
        debug!("purge_inode {} size={}", attr.ino, attr.size);
        self.purged.push(attr.ino);
    }

    // ---- dirfrags

    pub fn get_dirfrag(&self, df: DirFragId) -> Option<&CDir> {
        self.dirfrags.get(&df)
    }

    pub fn get_dirfrag_mut(&mut self, df: DirFragId) -> Option<&mut CDir> {
        self.dirfrags.get_mut(&df)
    }

    pub fn have_dirfrag(&self, df: DirFragId) -> bool {
        self.dirfrags.contains_key(&df)
    }

    /// Open (creating if absent) the dirfrag, inheriting authority from the
    /// owning inode.
    pub fn get_or_open_dirfrag(&mut self, ino: InodeId, frag: Frag) -> DirFragId {
        let df = DirFragId::new(ino, frag);
        if !self.dirfrags.contains_key(&df) {
            let auth = self
                .inodes
                .get(&ino)
                .map(|i| i.auth)
                .unwrap_or(self.whoami);
            self.dirfrags.insert(df, CDir::new(df, auth));
        }
        df
    }

    // ---- dentries

    pub fn dentry(&self, key: &DentryKey) -> Option<&CDentry> {
        self.dirfrags.get(&key.df).and_then(|d| d.lookup(&key.name))
    }

    pub fn dentry_mut(&mut self, key: &DentryKey) -> Option<&mut CDentry> {
        self.dirfrags
            .get_mut(&key.df)
            .and_then(|d| d.lookup_mut(&key.name))
    }

    /// Promote a null dentry to primary and back-link the inode.
    pub fn link_inode(&mut self, key: &DentryKey, ino: InodeId) {
        if let Some(dir) = self.dirfrags.get_mut(&key.df) {
            if let Some(dn) = dir.lookup_mut(&key.name) {
                dn.state = DnState::Primary(ino);
            }
        }
        if let Some(inode) = self.inodes.get_mut(&ino) {
            inode.parent = Some(key.clone());
        }
    }

    /// The inode a dentry resolves to, following remote links into the local
    /// cache if present.
    pub fn dentry_inode(&self, key: &DentryKey) -> Option<&CInode> {
        let ino = self.dentry(key)?.ino()?;
        self.inodes.get(&ino)
    }

    // ---- request table

    pub fn insert_request(&mut self, req: MdRequest) -> bool {
        if self.requests.contains_key(&req.id) {
            return false;
        }
        self.requests.insert(req.id, req);
        true
    }

    pub fn get_request(&self, id: ReqId) -> Option<&MdRequest> {
        self.requests.get(&id)
    }

    pub fn get_request_mut(&mut self, id: ReqId) -> Option<&mut MdRequest> {
        self.requests.get_mut(&id)
    }

    pub fn remove_request(&mut self, id: ReqId) -> Option<MdRequest> {
        self.requests.remove(&id)
    }

    pub fn contains_request(&self, id: ReqId) -> bool {
        self.requests.contains_key(&id)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Inodes with a hard or file lock held by the request.
    pub fn inodes_holding_locks(&self, req: ReqId) -> Vec<InodeId> {
        self.inodes
            .iter()
            .filter(|(_, i)| i.hard.held_by(req) || i.file.held_by(req))
            .map(|(ino, _)| *ino)
            .collect()
    }

    // ---- introspection for tests and invariant checks

    pub fn inode_count(&self) -> usize {
        self.inodes.len()
    }

    /// Dirty-version <= projected-version across every cached dentry.
    pub fn check_version_invariant(&self) -> bool {
        self.dirfrags.values().all(|dir| {
            dir.entries()
                .all(|(_, dn)| dn.version() <= dn.projected_version())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_exists_on_auth() {
        let cache = MdCache::new(0);
        assert!(cache.have_inode(ROOT_INO));
        let df = DirFragId::root_of(ROOT_INO);
        assert!(cache.have_dirfrag(df));
        assert!(cache.get_dirfrag(df).unwrap().complete);
    }

    #[test]
    fn replica_peer_has_root_inode_only() {
        let cache = MdCache::new(1);
        assert!(cache.have_inode(ROOT_INO));
        assert!(!cache.have_dirfrag(DirFragId::root_of(ROOT_INO)));
        assert!(!cache.get_inode(ROOT_INO).unwrap().is_auth(1));
    }

    #[test]
    fn created_inos_are_peer_unique() {
        let mut c0 = MdCache::new(0);
        let mut c1 = MdCache::new(1);
        let a = c0.create_inode(0, 0);
        let b = c1.create_inode(0, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn link_inode_backlinks_parent() {
        let mut cache = MdCache::new(0);
        let df = DirFragId::root_of(ROOT_INO);
        cache
            .get_dirfrag_mut(df)
            .unwrap()
            .add_dentry("a", DnState::Null);
        let ino = cache.create_inode(1, 1);
        let key = DentryKey::new(df, "a");
        cache.link_inode(&key, ino);
        assert!(cache.dentry(&key).unwrap().is_primary());
        assert_eq!(cache.get_inode(ino).unwrap().parent, Some(key));
    }
}
