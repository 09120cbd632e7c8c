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

//! Directory and namespace operations: readdir, the mknod family (mknod,
//! mkdir, symlink), link, and unlink / rmdir.

use crate::cache::resolve::{Traverse, TraverseMode};
use crate::cache::waiter::WaitKind;
use crate::cache::{DentryKey, DnState};
use crate::journal::{LogEvent, MetaBlob};
use crate::mds::{Cont, Mds};
use crate::messenger::Messenger;
use crate::server::finisher::Finisher;
use crate::server::PrepareMknod;
use crate::store::MetaStore;
use atoll_common::fs::FilePath;
use atoll_common::proto::{DirItems, MClientReply, OpArgs, Op};
use atoll_common::state::{
    Frag, InodeId, ReqId, MODE_DIR, MODE_FILE, MODE_SYMLINK, MODE_TYPE_MASK,
};
use atoll_common::utils::LocalTime;
use log::debug;

impl<M: Messenger, S: MetaStore> Mds<M, S> {
    // ---- readdir

    pub fn handle_client_readdir(&mut self, reqid: ReqId) {
        let (diri, frag) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("readdir has a reference inode"),
                match req.msg.args {
                    OpArgs::Readdir { frag } => frag,
                    _ => Frag::root(),
                },
            ),
            None => return,
        };

        let (is_dir, in_tree) = match self.cache.get_inode(diri) {
            Some(i) => (i.is_dir(), i.fragtree.contains_leaf(frag)),
            None => return,
        };
        if !is_dir {
            debug!("readdir on non-dir {}", diri);
            self.reply_request(reqid, -libc::ENOTDIR, None);
            return;
        }
        if !in_tree {
            debug!("frag {} not in fragtree of {}", frag, diri);
            self.reply_request(reqid, -libc::EAGAIN, None);
            return;
        }

        let df = match self.try_open_auth_dir(diri, frag, reqid) {
            Some(df) => df,
            None => return,
        };

        // Serialize against in-flight metadata changes.
        if !self.inode_hard_read_start(diri, reqid) {
            return;
        }
        self.inode_hard_read_finish(diri, reqid);

        let complete = self
            .cache
            .get_dirfrag(df)
            .map(|d| d.complete)
            .unwrap_or(false);
        if !complete {
            debug!("incomplete dir contents for readdir on {}, fetching", df);
            self.fetch_dirfrag(df, Cont::RetryRequest(reqid));
            return;
        }

        // Snapshot the listing.
        let mut entries: Vec<(String, atoll_common::state::InodeStat)> = vec![];
        {
            let dir = self.cache.get_dirfrag(df).expect("dirfrag");
            for (name, dn) in dir.entries() {
                if dn.is_null() {
                    continue;
                }
                let ino = dn.ino().expect("non-null dentry");
                if let Some(inode) = self.cache.get_inode(ino) {
                    entries.push((name.clone(), inode.stat()));
                }
                // Remote link without the inode cached: skipped.
            }
        }
        if let Some(diri_inode) = self.cache.get_inode(diri) {
            entries.push((".".to_string(), diri_inode.stat()));
        }

        debug!("readdir {} -> {} entries", df, entries.len());
        let mut reply = match self.cache.get_request(reqid) {
            Some(req) => MClientReply::new(&req.msg, 0),
            None => return,
        };
        reply.dir_items = Some(DirItems { frag, entries });
        self.reply_request_full(reqid, reply, Some(diri));
    }

    // ---- mknod

    pub fn handle_client_mknod(&mut self, reqid: ReqId) {
        let (diri, mode) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("mknod has a reference inode"),
                match req.msg.args {
                    OpArgs::Mknod { mode } => mode,
                    _ => 0,
                },
            ),
            None => return,
        };

        let (dn, ino) = match self.prepare_mknod(reqid, diri, true, false) {
            PrepareMknod::Created { dn, ino } => (dn, ino.expect("mknod wants an inode")),
            _ => return,
        };

        let pv = match self.cache.dentry_mut(&dn) {
            Some(dentry) => dentry.pre_dirty(),
            None => return,
        };
        if let Some(inode) = self.cache.get_inode_mut(ino) {
            inode.attr.mode = (mode & !MODE_TYPE_MASK) | MODE_FILE;
        }

        self.journal_mknod("mknod", reqid, dn, ino, pv, None);
    }

    // ---- mkdir

    pub fn handle_client_mkdir(&mut self, reqid: ReqId) {
        let (diri, mode) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("mkdir has a reference inode"),
                match req.msg.args {
                    OpArgs::Mkdir { mode } => mode,
                    _ => 0,
                },
            ),
            None => return,
        };

        let (dn, ino) = match self.prepare_mknod(reqid, diri, true, false) {
            PrepareMknod::Created { dn, ino } => (dn, ino.expect("mkdir wants an inode")),
            _ => return,
        };

        let pv = match self.cache.dentry_mut(&dn) {
            Some(dentry) => dentry.pre_dirty(),
            None => return,
        };
        if let Some(inode) = self.cache.get_inode_mut(ino) {
            inode.attr.mode = (mode & !MODE_TYPE_MASK) | MODE_DIR;
        }

        // The new directory starts with one fresh, empty, complete frag.
        let newdf = self.cache.get_or_open_dirfrag(ino, Frag::root());
        if let Some(newdir) = self.cache.get_dirfrag_mut(newdf) {
            newdir.mark_complete();
            let v = newdir.pre_dirty();
            newdir.mark_dirty(v);
        }

        self.journal_mknod("mkdir", reqid, dn, ino, pv, Some(newdf));
    }

    // ---- symlink

    pub fn handle_client_symlink(&mut self, reqid: ReqId) {
        let (diri, target) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("symlink has a reference inode"),
                req.msg.sarg.clone(),
            ),
            None => return,
        };

        let (dn, ino) = match self.prepare_mknod(reqid, diri, true, false) {
            PrepareMknod::Created { dn, ino } => (dn, ino.expect("symlink wants an inode")),
            _ => return,
        };

        let pv = match self.cache.dentry_mut(&dn) {
            Some(dentry) => dentry.pre_dirty(),
            None => return,
        };
        if let Some(inode) = self.cache.get_inode_mut(ino) {
            inode.attr.mode = (inode.attr.mode & !MODE_TYPE_MASK) | MODE_SYMLINK | 0o777;
            inode.symlink = Some(target);
        }

        self.journal_mknod("symlink", reqid, dn, ino, pv, None);
    }

    fn journal_mknod(
        &mut self,
        opname: &str,
        reqid: ReqId,
        dn: DentryKey,
        ino: InodeId,
        pv: u64,
        newdir: Option<atoll_common::state::DirFragId>,
    ) {
        let mut blob = MetaBlob::default();
        blob.add_dir_context(self.dir_context_chain(dn.df));
        let (attr, symlink) = self
            .cache
            .get_inode(ino)
            .map(|i| (i.attr.clone(), i.symlink.clone()))
            .unwrap_or_default();
        let pi = blob.add_primary_dentry(&dn, true, attr, symlink);
        pi.version = pv;
        if let Some(df) = newdir {
            blob.add_dir(df, true);
        }

        self.journal_and_apply(
            LogEvent::EUpdate {
                name: opname.into(),
                metablob: blob,
            },
            Finisher::Mknod {
                reqid,
                dn,
                ino,
                pv,
                open_after: false,
            },
        );
    }

    // ---- link

    pub fn handle_client_link(&mut self, reqid: ReqId) {
        let (diri, dname, target_path, msg) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("link has a reference inode"),
                req.msg.path.last_dentry().to_string(),
                FilePath::new(&req.msg.sarg),
                req.msg.clone(),
            ),
            None => return,
        };
        debug!("link dname {} target {}", dname, target_path);

        if self.validate_dentry_dir(reqid, diri, &dname).is_none() {
            return;
        }

        // Discover the link target; trailing symlinks are not followed.
        match self.path_traverse(
            &target_path,
            false,
            TraverseMode::Discover,
            &msg,
            Cont::RetryRequest(reqid),
        ) {
            Traverse::Delayed | Traverse::Forwarded(_) => {}
            Traverse::Error(r) => {
                debug!("link target {} dne", target_path);
                self.reply_request(reqid, r, None);
            }
            Traverse::Done(trace) => {
                let targeti = trace
                    .last()
                    .and_then(|k| self.cache.dentry(k).and_then(|d| d.ino()))
                    .unwrap_or(self.cache.root());
                self.handle_client_link_2(reqid, diri, targeti);
            }
        }
    }

    fn handle_client_link_2(&mut self, reqid: ReqId, diri: InodeId, targeti: InodeId) {
        let (target_is_dir, target_auth_here) = match self.cache.get_inode(targeti) {
            Some(i) => (i.is_dir(), i.is_auth(self.whoami())),
            None => return,
        };
        if target_is_dir {
            debug!("link target {} is a dir, failing", targeti);
            self.reply_request(reqid, -libc::EINVAL, None);
            return;
        }

        let dn = match self.prepare_mknod(reqid, diri, false, false) {
            PrepareMknod::Created { dn, .. } => dn,
            _ => return,
        };
        debug_assert!(self
            .cache
            .dentry(&dn)
            .map(|d| d.is_xlocked_by(reqid))
            .unwrap_or(false));

        if target_auth_here {
            self.link_local(reqid, dn, targeti);
        } else {
            self.link_remote(reqid, dn, targeti);
        }
    }

    fn link_local(&mut self, reqid: ReqId, dn: DentryKey, targeti: InodeId) {
        debug!("link_local {} -> {}", dn, targeti);

        // A hard-linked inode must be locatable from any of its names; the
        // anchor is the durable back-pointer. Same-dir and already-anchored
        // targets skip the round trip.
        let (same_dir, anchored) = match self.cache.get_inode(targeti) {
            Some(i) => (
                i.parent.as_ref().map(|k| k.df) == Some(dn.df),
                i.anchored,
            ),
            None => return,
        };
        if !same_dir && !anchored {
            debug!("target {} needs anchor, creating", targeti);
            self.anchor_create(targeti, Cont::RetryRequest(reqid));
            return;
        }

        if !self.inode_hard_write_start(targeti, reqid) {
            return;
        }

        let dpv = match self.cache.dentry_mut(&dn) {
            Some(dentry) => dentry.pre_dirty(),
            None => return,
        };
        let tpdv = match self.cache.get_inode_mut(targeti) {
            Some(inode) => inode.pre_dirty(),
            None => return,
        };
        let tctime = LocalTime::unix_secs();

        let mut blob = MetaBlob::default();
        blob.add_dir_context(self.dir_context_chain(dn.df));
        blob.add_remote_dentry(&dn, true, targeti);
        let tparent = self
            .cache
            .get_inode(targeti)
            .and_then(|i| i.parent.clone());
        if let Some(tkey) = tparent {
            blob.add_dir_context(self.dir_context_chain(tkey.df));
            let attr = self
                .cache
                .get_inode(targeti)
                .map(|i| i.attr.clone())
                .unwrap_or_default();
            let pi = blob.add_primary_dentry(&tkey, true, attr, None);
            pi.nlink += 1;
            pi.ctime = tctime;
            pi.version = tpdv;
        }

        self.journal_and_apply(
            LogEvent::EUpdate {
                name: "link_local".into(),
                metablob: blob,
            },
            Finisher::LinkLocal {
                reqid,
                dn,
                target: targeti,
                dpv,
                tpdv,
                tctime,
            },
        );
    }

    fn link_remote(&mut self, reqid: ReqId, dn: DentryKey, targeti: InodeId) {
        debug!("link_remote {} -> {}", dn, targeti);

        // Pin the replica while the request lives.
        self.request_pin_inode(reqid, targeti);

        // Two-phase LinkPrepare / LinkCommit with the target's authority is
        // not implemented; reject cleanly.
        self.reply_request(reqid, -libc::EXDEV, Some(dn.df.ino));
    }

    /// Record the durable back-pointer for a soon-to-be hard-linked inode
    /// and resume the caller. The anchor table proper is external.
    fn anchor_create(&mut self, ino: InodeId, cont: Cont) {
        if let Some(inode) = self.cache.get_inode_mut(ino) {
            inode.anchored = true;
        }
        self.queue_cont(cont);
    }

    // ---- unlink / rmdir

    pub fn handle_client_unlink(&mut self, reqid: ReqId) {
        let (diri, op, name, depth) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.ref_ino.expect("unlink has a reference inode"),
                req.msg.op,
                req.msg.path.last_dentry().to_string(),
                req.msg.path.depth(),
            ),
            None => return,
        };
        let rmdir = op == Op::Rmdir;

        if depth == 0 {
            debug!("can't unlink root");
            self.reply_request(reqid, -libc::EINVAL, None);
            return;
        }
        if name == "." || name == ".." {
            self.reply_request(reqid, -libc::EINVAL, None);
            return;
        }

        let diri_is_dir = self
            .cache
            .get_inode(diri)
            .map(|i| i.is_dir())
            .unwrap_or(false);
        if !diri_is_dir {
            self.reply_request(reqid, -libc::ENOTDIR, None);
            return;
        }

        let df = match self.validate_dentry_dir(reqid, diri, &name) {
            Some(df) => df,
            None => return,
        };
        let key = DentryKey::new(df, &name);

        // Does the dentry exist?
        let dn_view = self
            .cache
            .dentry(&key)
            .map(|dn| (dn.can_read(reqid), dn.state));
        let (readable, state) = match dn_view {
            Some(v) => v,
            None => {
                let complete = self
                    .cache
                    .get_dirfrag(df)
                    .map(|d| d.complete)
                    .unwrap_or(false);
                if !complete {
                    debug!("missing dn {} but dir not complete, fetching", name);
                    self.fetch_dirfrag(df, Cont::RetryRequest(reqid));
                } else {
                    debug!("unlink {} dne", name);
                    self.reply_request(reqid, -libc::ENOENT, None);
                }
                return;
            }
        };

        if !readable {
            debug!("waiting on xlocked dentry {}", key);
            if let Some(dir) = self.cache.get_dirfrag_mut(df) {
                dir.waiters
                    .add(WaitKind::DentryRead(name), Cont::RetryRequest(reqid));
            }
            return;
        }

        let ino = match state {
            DnState::Null => {
                debug!("unlink on null dn {}", key);
                self.reply_request(reqid, -libc::ENOENT, None);
                return;
            }
            DnState::Remote(rino) if !self.cache.have_inode(rino) => {
                debug!("remote dn, opening inode {} for {}", rino, key);
                self.open_remote_ino(rino, Cont::RetryRequest(reqid));
                return;
            }
            DnState::Primary(ino) | DnState::Remote(ino) => ino,
        };

        let (in_is_dir, nlink, caps, in_auth_here) = match self.cache.get_inode(ino) {
            Some(i) => (
                i.is_dir(),
                i.attr.nlink,
                i.caps_wanted(),
                i.is_auth(self.whoami()),
            ),
            None => return,
        };

        if in_is_dir {
            if rmdir {
                if !self.verify_rmdir(reqid, ino) {
                    return;
                }
            } else {
                debug!("unlink on dir {}, returning EISDIR", ino);
                self.reply_request(reqid, -libc::EISDIR, None);
                return;
            }
        } else if rmdir {
            debug!("rmdir on non-dir {}, returning ENOTDIR", ino);
            self.reply_request(reqid, -libc::ENOTDIR, None);
            return;
        }

        let primary = matches!(state, DnState::Primary(_));

        // Unlinking a primary whose inode stays reachable (other links or
        // open handles) must become a rename into the dangle directory so
        // the inode survives; not implemented.
        if primary && (nlink > 1 || caps) {
            debug!("unlink of busy primary {}, EXDEV", key);
            self.reply_request(reqid, -libc::EXDEV, Some(df.ino));
            return;
        }

        if !self.dentry_xlock_start(&key, reqid) {
            return;
        }

        self.balancer.hit_dir(df);

        if !primary && !in_auth_here {
            self.unlink_remote(reqid, key);
        } else {
            self.unlink_local(reqid, key, ino);
        }
    }

    /// Every leaf frag of the victim must be empty and complete, and local.
    fn verify_rmdir(&mut self, reqid: ReqId, ino: InodeId) -> bool {
        let leaves = match self.cache.get_inode(ino) {
            Some(i) => i.fragtree.leaves().to_vec(),
            None => return false,
        };

        for frag in leaves {
            let df = self.cache.get_or_open_dirfrag(ino, frag);
            let (auth_here, size, complete) = {
                let dir = self.cache.get_dirfrag(df).expect("just opened");
                (dir.is_auth(self.whoami()), dir.size(), dir.complete)
            };

            if auth_here && size == 0 && !complete {
                debug!("verify_rmdir fetching incomplete dir {}", df);
                self.fetch_dirfrag(df, Cont::RetryRequest(reqid));
                return false;
            }
            if size > 0 {
                debug!("verify_rmdir {} not empty", df);
                self.reply_request(reqid, -libc::ENOTEMPTY, None);
                return false;
            }
            if !auth_here {
                // Importing the frag first is the migration subsystem's job.
                debug!("verify_rmdir non-auth frag {}, EXDEV", df);
                self.reply_request(reqid, -libc::EXDEV, None);
                return false;
            }
        }
        true
    }

    fn unlink_local(&mut self, reqid: ReqId, key: DentryKey, ino: InodeId) {
        debug!("unlink_local {}", key);

        let remote = self
            .cache
            .dentry(&key)
            .map(|d| d.is_remote())
            .unwrap_or(false);
        let nlink = self
            .cache
            .get_inode(ino)
            .map(|i| i.attr.nlink)
            .unwrap_or(0);

        // Dropping one of several links updates the primary's nlink; that
        // needs the hard lock.
        if nlink > 1 {
            debug_assert!(remote);
            if !self.inode_hard_write_start(ino, reqid) {
                return;
            }
        }

        let ipv = match self.cache.get_inode_mut(ino) {
            Some(inode) => inode.pre_dirty(),
            None => return,
        };
        let dpv = match self.cache.dentry_mut(&key) {
            Some(dentry) => dentry.pre_dirty(),
            None => return,
        };
        let ictime = LocalTime::unix_secs();

        let mut blob = MetaBlob::default();
        blob.add_dir_context(self.dir_context_chain(key.df));
        blob.add_null_dentry(&key, true);

        if remote {
            // nlink-- on the primary.
            let tparent = self.cache.get_inode(ino).and_then(|i| i.parent.clone());
            if let Some(tkey) = tparent {
                blob.add_dir_context(self.dir_context_chain(tkey.df));
                let attr = self
                    .cache
                    .get_inode(ino)
                    .map(|i| i.attr.clone())
                    .unwrap_or_default();
                let pi = blob.add_primary_dentry(&tkey, true, attr, None);
                pi.nlink = pi.nlink.saturating_sub(1);
                pi.ctime = ictime;
                pi.version = ipv;
            }
        } else {
            let attr = self
                .cache
                .get_inode(ino)
                .map(|i| i.attr.clone())
                .unwrap_or_default();
            blob.add_destroyed_inode(attr);
        }

        self.journal_and_apply(
            LogEvent::EUpdate {
                name: "unlink_local".into(),
                metablob: blob,
            },
            Finisher::UnlinkLocal {
                reqid,
                dn: key,
                ino,
                ipv,
                ictime,
                dpv,
                remote,
            },
        );
    }

    fn unlink_remote(&mut self, reqid: ReqId, key: DentryKey) {
        debug!("unlink_remote {}", key);

        // nlink-- on a foreign primary needs its authority's cooperation;
        // not implemented.
        self.reply_request(reqid, -libc::EXDEV, Some(key.df.ino));
    }
}
