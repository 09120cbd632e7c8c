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

//! Inode-centric operations: stat, the attribute updates (utime, chmod,
//! chown), truncate, and open / open-create.

use crate::balancer::MetaPop;
use crate::journal::{LogEvent, MetaBlob};
use crate::mds::Mds;
use crate::messenger::Messenger;
use crate::server::finisher::Finisher;
use crate::server::PrepareMknod;
use crate::store::MetaStore;
use atoll_common::proto::{MClientReply, OpArgs, O_EXCL};
use atoll_common::state::{
    InodeId, ReqId, FILE_MODE_LAZY, FILE_MODE_R, MODE_FILE, STAT_MASK_FILE,
};
use atoll_common::utils::LocalTime;
use log::debug;

impl<M: Messenger, S: MetaStore> Mds<M, S> {
    // ---- stat / lstat

    pub fn handle_client_stat(&mut self, reqid: ReqId) {
        let (cur, mask) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("stat has a reference inode"),
                match req.msg.args {
                    OpArgs::Stat { mask } => mask,
                    _ => 0,
                },
            ),
            None => return,
        };

        // Size/mtime/atime live under the file lock; anything else is served
        // from cached metadata without taking a lock.
        if mask & STAT_MASK_FILE != 0 {
            if !self.inode_file_read_start(cur, reqid) {
                return;
            }
            self.inode_file_read_finish(cur, reqid);
        }

        self.balancer.hit_inode(cur, MetaPop::IRd);
        self.reply_request(reqid, 0, Some(cur));
    }

    // ---- utime

    pub fn handle_client_utime(&mut self, reqid: ReqId) {
        let (cur, (mtime, atime)) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("utime has a reference inode"),
                match req.msg.args {
                    OpArgs::Utime { mtime, atime } => (mtime, atime),
                    _ => (0, 0),
                },
            ),
            None => return,
        };

        if !self.inode_file_write_start(cur, reqid) {
            return;
        }
        self.balancer.hit_inode(cur, MetaPop::IWr);

        let pdv = match self.cache.get_inode_mut(cur) {
            Some(inode) => inode.pre_dirty(),
            None => return,
        };
        let ctime = LocalTime::unix_secs();

        let mut blob = MetaBlob::default();
        self.journal_projected_inode(&mut blob, cur, pdv, |pi| {
            pi.mtime = mtime;
            pi.atime = atime;
            pi.ctime = ctime;
        });

        self.journal_and_apply(
            LogEvent::EUpdate {
                name: "utime".into(),
                metablob: blob,
            },
            Finisher::Utime {
                reqid,
                ino: cur,
                pdv,
                mtime,
                atime,
                ctime,
            },
        );
    }

    // ---- chmod

    pub fn handle_client_chmod(&mut self, reqid: ReqId) {
        let (cur, mode) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("chmod has a reference inode"),
                match req.msg.args {
                    OpArgs::Chmod { mode } => mode,
                    _ => 0,
                },
            ),
            None => return,
        };

        if !self.inode_hard_write_start(cur, reqid) {
            return;
        }
        self.balancer.hit_inode(cur, MetaPop::IWr);

        let pdv = match self.cache.get_inode_mut(cur) {
            Some(inode) => inode.pre_dirty(),
            None => return,
        };
        let ctime = LocalTime::unix_secs();

        let mut blob = MetaBlob::default();
        self.journal_projected_inode(&mut blob, cur, pdv, |pi| {
            pi.mode &= !atoll_common::state::MODE_CHMOD_MASK;
            pi.mode |= mode & atoll_common::state::MODE_CHMOD_MASK;
            pi.ctime = ctime;
        });

        self.journal_and_apply(
            LogEvent::EUpdate {
                name: "chmod".into(),
                metablob: blob,
            },
            Finisher::Chmod {
                reqid,
                ino: cur,
                pdv,
                mode,
                ctime,
            },
        );
    }

    // ---- chown

    pub fn handle_client_chown(&mut self, reqid: ReqId) {
        let (cur, (uid, gid)) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("chown has a reference inode"),
                match req.msg.args {
                    OpArgs::Chown { uid, gid } => (uid, gid),
                    _ => (-1, -1),
                },
            ),
            None => return,
        };

        if !self.inode_hard_write_start(cur, reqid) {
            return;
        }
        self.balancer.hit_inode(cur, MetaPop::IWr);

        let pdv = match self.cache.get_inode_mut(cur) {
            Some(inode) => inode.pre_dirty(),
            None => return,
        };
        let ctime = LocalTime::unix_secs();

        let mut blob = MetaBlob::default();
        self.journal_projected_inode(&mut blob, cur, pdv, |pi| {
            if uid >= 0 {
                pi.uid = uid as u32;
            }
            if gid >= 0 {
                pi.gid = gid as u32;
            }
            pi.ctime = ctime;
        });

        self.journal_and_apply(
            LogEvent::EUpdate {
                name: "chown".into(),
                metablob: blob,
            },
            Finisher::Chown {
                reqid,
                ino: cur,
                pdv,
                uid,
                gid,
                ctime,
            },
        );
    }

    // ---- truncate

    /// Truncate journals the size change alongside ctime; the finisher
    /// applies both after sync.
    pub fn handle_client_truncate(&mut self, reqid: ReqId) {
        let (cur, length) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("truncate has a reference inode"),
                match req.msg.args {
                    OpArgs::Truncate { length, .. } => length,
                    _ => 0,
                },
            ),
            None => return,
        };

        let is_file = match self.cache.get_inode(cur) {
            Some(i) => i.is_file(),
            None => return,
        };
        if !is_file {
            let is_dir = self
                .cache
                .get_inode(cur)
                .map(|i| i.is_dir())
                .unwrap_or(false);
            let err = if is_dir { -libc::EISDIR } else { -libc::EINVAL };
            self.reply_request(reqid, err, Some(cur));
            return;
        }

        if !self.inode_file_write_start(cur, reqid) {
            return;
        }

        let pdv = match self.cache.get_inode_mut(cur) {
            Some(inode) => inode.pre_dirty(),
            None => return,
        };
        let ctime = LocalTime::unix_secs();

        let mut blob = MetaBlob::default();
        self.journal_projected_inode(&mut blob, cur, pdv, |pi| {
            pi.size = length;
            pi.ctime = ctime;
        });

        self.journal_and_apply(
            LogEvent::EUpdate {
                name: "truncate".into(),
                metablob: blob,
            },
            Finisher::Truncate {
                reqid,
                ino: cur,
                pdv,
                size: length,
                ctime,
            },
        );
    }

    // ---- open

    pub fn handle_client_open(&mut self, reqid: ReqId) {
        let cur = match self.cache.get_request(reqid) {
            Some(req) => req.ref_ino.expect("open has a reference inode"),
            None => return,
        };
        self.handle_client_open_on(reqid, cur);
    }

    /// Open with an explicit target, shared with openc's fall-through on a
    /// pre-existing inode.
    pub(crate) fn handle_client_open_on(&mut self, reqid: ReqId, cur: InodeId) {
        let (flags, mode, client) = match self.cache.get_request(reqid) {
            Some(req) => (
                match req.msg.args {
                    OpArgs::Open { flags, .. } => flags,
                    _ => 0,
                },
                match req.msg.args {
                    OpArgs::Open { mode, .. } => mode,
                    _ => 0,
                },
                req.msg.client.id,
            ),
            None => return,
        };
        debug!("open flags {:o} mode {} on {}", flags, mode, cur);

        let (is_file, auth_here, auth) = match self.cache.get_inode(cur) {
            Some(i) => (i.is_file(), i.is_auth(self.whoami()), i.auth),
            None => return,
        };

        if !is_file {
            debug!("open on non-regular file {}", cur);
            self.reply_request(reqid, -libc::EINVAL, Some(cur));
            return;
        }

        // Writable opens must run on the authority.
        if mode != FILE_MODE_R && mode != FILE_MODE_LAZY && !auth_here {
            debug!("open writeable on replica {}, fw to auth mds{}", cur, auth);
            self.request_forward(reqid, auth);
            return;
        }

        let fdv = self.issue_file_data_version(cur);
        let (caps, seq) = match self.issue_new_caps(cur, mode, client) {
            Some(v) => v,
            // Issuance blocked; the capability subsystem parked the request.
            None => return,
        };

        self.balancer.hit_inode(cur, MetaPop::IRd);

        let mut reply = match self.cache.get_request(reqid) {
            Some(req) => MClientReply::new(&req.msg, 0),
            None => return,
        };
        reply.caps = Some(caps);
        reply.caps_seq = Some(seq);
        reply.file_data_version = Some(fdv);
        self.reply_request_full(reqid, reply, Some(cur));
    }

    // ---- open with O_CREAT

    pub fn handle_client_openc(&mut self, reqid: ReqId) {
        let (diri, flags) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("openc has a reference inode"),
                match req.msg.args {
                    OpArgs::Open { flags, .. } => flags,
                    _ => 0,
                },
            ),
            None => return,
        };
        debug!("open w/ O_CREAT, excl={}", flags & O_EXCL != 0);

        let excl = flags & O_EXCL != 0;
        match self.prepare_mknod(reqid, diri, true, !excl) {
            PrepareMknod::Wait => {}
            PrepareMknod::Exists { ino, .. } => {
                if excl {
                    debug!("O_EXCL, target exists, failing with EEXIST");
                    self.reply_request(reqid, -libc::EEXIST, Some(ino));
                } else {
                    self.handle_client_open_on(reqid, ino);
                }
            }
            PrepareMknod::Created { dn, ino } => {
                let ino = ino.expect("openc asked for an inode");
                let pv = match self.cache.dentry_mut(&dn) {
                    Some(dentry) => dentry.pre_dirty(),
                    None => return,
                };
                if let Some(inode) = self.cache.get_inode_mut(ino) {
                    inode.attr.mode = 0o644 | MODE_FILE;
                }

                let mut blob = MetaBlob::default();
                blob.add_dir_context(self.dir_context_chain(dn.df));
                let attr = self
                    .cache
                    .get_inode(ino)
                    .map(|i| i.attr.clone())
                    .unwrap_or_default();
                let pi = blob.add_primary_dentry(&dn, true, attr, None);
                pi.version = pv;

                self.journal_and_apply(
                    LogEvent::EUpdate {
                        name: "openc".into(),
                        metablob: blob,
                    },
                    Finisher::Mknod {
                        reqid,
                        dn,
                        ino,
                        pv,
                        open_after: true,
                    },
                );
            }
        }
    }

    /// Fill a MetaBlob with the projected attribute image of `ino` after
    /// applying `delta`, versioned at `pdv`.
    fn journal_projected_inode<F: FnOnce(&mut atoll_common::state::InodeAttr)>(
        &mut self,
        blob: &mut MetaBlob,
        ino: InodeId,
        pdv: u64,
        delta: F,
    ) {
        let (parent, mut attr, symlink) = match self.cache.get_inode(ino) {
            Some(i) => (i.parent.clone(), i.attr.clone(), i.symlink.clone()),
            None => return,
        };
        delta(&mut attr);
        attr.version = pdv;
        match parent {
            Some(key) => {
                blob.add_dir_context(self.dir_context_chain(key.df));
                blob.add_primary_dentry(&key, true, attr, symlink);
            }
            None => blob.add_root_inode(attr),
        }
    }
}
