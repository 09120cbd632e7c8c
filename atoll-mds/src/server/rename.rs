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

//! Rename. Four sub-problems: re-locate the source dentry (its location may
//! have drifted since admission), locate the destination (which may not
//! exist yet), take both dentry xlocks in lexicographic path order so no two
//! renaming peers can deadlock, and hand the relink to the rename executor.

use crate::cache::resolve::{Traverse, TraverseMode};
use crate::cache::waiter::WaitKind;
use crate::cache::{DentryKey, DnState};
use crate::journal::{LogEvent, MetaBlob};
use crate::mds::{Cont, Mds};
use crate::messenger::Messenger;
use crate::server::finisher::Finisher;
use crate::store::MetaStore;
use atoll_common::fs::FilePath;
use atoll_common::state::{DirFragId, InodeId, ReqId};
use atoll_common::utils::LocalTime;
use log::debug;

impl<M: Messenger, S: MetaStore> Mds<M, S> {
    pub fn handle_client_rename(&mut self, reqid: ReqId) {
        let msg = match self.cache.get_request(reqid) {
            Some(req) => req.msg.clone(),
            None => return,
        };
        debug!("rename {} -> {}", msg.path, msg.sarg);

        // Sanity checks.
        if msg.path.depth() == 0 {
            debug!("can't rename root");
            self.reply_request(reqid, -libc::EINVAL, None);
            return;
        }
        let destpath_full = FilePath::new(&msg.sarg);
        // mv a/b a/b/c is meaningless.
        if msg.path.is_prefix_of(&destpath_full) {
            debug!("can't rename to underneath myself");
            self.reply_request(reqid, -libc::EINVAL, None);
            return;
        }
        // mv blah blah, likewise.
        if destpath_full == msg.path {
            debug!("can't rename something to itself");
            self.reply_request(reqid, -libc::EINVAL, None);
            return;
        }

        // Re-trace the source parent: the source isn't pinned (that would
        // wreck the lock ordering), so it may have moved since admission.
        let srcname = msg.path.last_dentry().to_string();
        let refpath = msg.path.parent();
        let trace = match self.path_traverse(
            &refpath,
            true,
            TraverseMode::Forward,
            &msg,
            Cont::RetryRequest(reqid),
        ) {
            Traverse::Forwarded(_) => {
                // The traversal already shipped the message; clean up the
                // local request without finishing (finishing would reply).
                debug!("src traverse forwarded, doing local request_cleanup");
                self.request_cleanup(reqid);
                return;
            }
            Traverse::Delayed => return,
            Traverse::Error(r) => {
                // Renamed out from under us, probably.
                debug!("src traverse r={}", r);
                self.reply_request(reqid, r, None);
                return;
            }
            Traverse::Done(trace) => trace,
        };

        let srcdiri = trace
            .last()
            .and_then(|k| self.cache.dentry(k).and_then(|d| d.ino()))
            .unwrap_or(self.cache.root());

        let srcdiri_is_dir = self
            .cache
            .get_inode(srcdiri)
            .map(|i| i.is_dir())
            .unwrap_or(false);
        if !srcdiri_is_dir {
            self.reply_request(reqid, -libc::EINVAL, None);
            return;
        }

        let (srcfg, src_auth_here, src_auth) = match self.cache.get_inode(srcdiri) {
            Some(i) => (i.pick_dirfrag(&srcname), i.is_auth(self.whoami()), i.auth),
            None => return,
        };
        if !self
            .cache
            .have_dirfrag(DirFragId::new(srcdiri, srcfg))
            && !src_auth_here
        {
            debug!("srcdir not open, not auth, fw to mds{}", src_auth);
            self.request_forward(reqid, src_auth);
            return;
        }

        let srcdf = match self.try_open_auth_dir(srcdiri, srcfg, reqid) {
            Some(df) => df,
            None => return,
        };
        let srckey = DentryKey::new(srcdf, &srcname);

        // Source dentry.
        let dn_view = self
            .cache
            .dentry(&srckey)
            .map(|dn| (dn.can_read(reqid), dn.ino()));
        let complete = self
            .cache
            .get_dirfrag(srcdf)
            .map(|d| d.complete)
            .unwrap_or(false);

        if let Some((false, _)) = dn_view {
            debug!("waiting on xlocked src {}", srckey);
            if let Some(dir) = self.cache.get_dirfrag_mut(srcdf) {
                dir.waiters.add(
                    WaitKind::DentryRead(srcname.clone()),
                    Cont::RetryRequest(reqid),
                );
            }
            return;
        }
        match &dn_view {
            Some((_, None)) => {
                // Null source: it got renamed out from under us.
                debug!("rename src dne");
                self.reply_request(reqid, -libc::EEXIST, None);
                return;
            }
            None if complete => {
                debug!("rename src dne");
                self.reply_request(reqid, -libc::EEXIST, None);
                return;
            }
            None => {
                debug!("rereading incomplete srcdir");
                self.fetch_dirfrag(srcdf, Cont::RetryRequest(reqid));
                return;
            }
            Some((_, Some(_))) => {}
        }
        let srci = dn_view.and_then(|(_, i)| i).expect("src resolved");

        // Pin the source so it can't expire while we chase the dest.
        self.request_pin_inode(reqid, srci);

        // Walk the destination parent in discover mode; the dest dentry
        // itself may legitimately not exist yet.
        let dest_parent = destpath_full.parent();
        let dtrace = match self.path_traverse(
            &dest_parent,
            false,
            TraverseMode::Discover,
            &msg,
            Cont::RetryRequest(reqid),
        ) {
            Traverse::Delayed | Traverse::Forwarded(_) => return,
            Traverse::Error(r) => {
                debug!("rename dest {} dne (r={})", msg.sarg, r);
                self.reply_request(reqid, -libc::EINVAL, None);
                return;
            }
            Traverse::Done(t) => t,
        };

        self.handle_client_rename_2(reqid, srckey, srci, destpath_full, dtrace);
    }

    /// Normalize the destination: resolve the final component against the
    /// traced parent, deciding between "into a dir", "overwrite", and
    /// "fresh name".
    fn handle_client_rename_2(
        &mut self,
        reqid: ReqId,
        srckey: DentryKey,
        srci: InodeId,
        destpath: FilePath,
        dtrace: Vec<DentryKey>,
    ) {
        let msg_path = match self.cache.get_request(reqid) {
            Some(req) => req.msg.path.clone(),
            None => return,
        };
        let srcname = msg_path.last_dentry().to_string();

        let d = dtrace
            .last()
            .and_then(|k| self.cache.dentry(k).and_then(|dn| dn.ino()))
            .unwrap_or(self.cache.root());
        debug!("rename_2 traced to {}, dest {}", d, destpath);

        let d_is_dir = self.cache.get_inode(d).map(|i| i.is_dir()).unwrap_or(false);
        if !d_is_dir {
            debug!("dest parent not a dir");
            self.reply_request(reqid, -libc::EINVAL, None);
            return;
        }

        let leafname = destpath.last_dentry().to_string();
        if leafname.is_empty() {
            self.reply_request(reqid, -libc::EINVAL, None);
            return;
        }

        let dfg = match self.cache.get_inode(d) {
            Some(i) => i.pick_dirfrag(&leafname),
            None => return,
        };
        let leafdf = match self.try_open_dir(d, dfg, reqid) {
            Some(df) => df,
            None => return,
        };

        // Resolve the leaf.
        let leaf_view = self
            .cache
            .dentry(&DentryKey::new(leafdf, &leafname))
            .map(|dn| (dn.can_read(reqid), dn.state));

        if let Some((false, _)) = leaf_view {
            if let Some(dir) = self.cache.get_dirfrag_mut(leafdf) {
                dir.waiters.add(
                    WaitKind::DentryRead(leafname.clone()),
                    Cont::RetryRequest(reqid),
                );
            }
            return;
        }

        let (destdf, destname, effective_path) = match leaf_view {
            None => {
                let complete = self
                    .cache
                    .get_dirfrag(leafdf)
                    .map(|dir| dir.complete)
                    .unwrap_or(false);
                if !complete {
                    self.fetch_dirfrag(leafdf, Cont::RetryRequest(reqid));
                    return;
                }
                // mv /some/thing /to/some/name_that_dne
                (leafdf, leafname, destpath.clone())
            }
            Some((_, DnState::Null)) => (leafdf, leafname, destpath.clone()),
            Some((_, DnState::Remote(rino))) if !self.cache.have_inode(rino) => {
                self.open_remote_ino(rino, Cont::RetryRequest(reqid));
                return;
            }
            Some((_, DnState::Primary(lino))) | Some((_, DnState::Remote(lino))) => {
                let leaf_is_dir = self
                    .cache
                    .get_inode(lino)
                    .map(|i| i.is_dir())
                    .unwrap_or(false);
                if leaf_is_dir {
                    // mv /some/thing /to/some/dir: effective name is the
                    // source's basename inside that dir.
                    let ddfg = match self.cache.get_inode(lino) {
                        Some(i) => i.pick_dirfrag(&srcname),
                        None => return,
                    };
                    let destdf = match self.try_open_dir(lino, ddfg, reqid) {
                        Some(df) => df,
                        None => return,
                    };
                    let mut p = destpath.clone();
                    p.push_dentry(srcname.clone());
                    (destdf, srcname.clone(), p)
                } else {
                    // mv /some/thing /to/some/existing_file
                    (leafdf, leafname, destpath.clone())
                }
            }
        };
        let destkey = DentryKey::new(destdf, &destname);

        // src == dest?
        if srckey == destkey {
            debug!("rename src=dest, same file");
            self.reply_request(reqid, -libc::EINVAL, None);
            return;
        }

        // Overwrite checks. Overwriting a directory is forbidden outright,
        // and a directory may not displace a file.
        let old_view = self.cache.dentry(&destkey).and_then(|dn| dn.ino());
        if let Some(oldino) = old_view {
            if !self.cache.have_inode(oldino) {
                self.open_remote_ino(oldino, Cont::RetryRequest(reqid));
                return;
            }
            let old_is_dir = self
                .cache
                .get_inode(oldino)
                .map(|i| i.is_dir())
                .unwrap_or(false);
            let src_is_dir = self
                .cache
                .get_inode(srci)
                .map(|i| i.is_dir())
                .unwrap_or(false);
            if old_is_dir || src_is_dir {
                debug!("dest exists and a directory is involved, EISDIR");
                self.reply_request(reqid, -libc::EISDIR, None);
                return;
            }
        }

        // Cross-peer renames of directories are not supported at all.
        let srclocal = self
            .cache
            .get_dirfrag(srckey.df)
            .map(|dir| dir.is_auth(self.whoami()))
            .unwrap_or(false);
        let destlocal = self
            .cache
            .get_dirfrag(destkey.df)
            .map(|dir| dir.is_auth(self.whoami()))
            .unwrap_or(false);
        if !(srclocal && destlocal) {
            debug!("foreign rename");
            let src_is_dir = self
                .cache
                .get_inode(srci)
                .map(|i| i.is_dir())
                .unwrap_or(false);
            if src_is_dir {
                self.reply_request(reqid, -libc::EXDEV, None);
                return;
            }
        }

        let srcpath = msg_path.get_path();
        let destpath_str = effective_path.get_path();
        self.handle_client_rename_local(
            reqid,
            srcpath,
            srckey,
            srclocal,
            destpath_str,
            destkey,
            destlocal,
        );
    }

    /// Take both xlocks in lexicographic path order. Every peer renaming
    /// these paths picks the same order, so no cycle is possible.
    #[allow(clippy::too_many_arguments)]
    fn handle_client_rename_local(
        &mut self,
        reqid: ReqId,
        srcpath: String,
        src: DentryKey,
        srclocal: bool,
        destpath: String,
        dest: DentryKey,
        destlocal: bool,
    ) {
        debug!(
            "rename_local {} (local={}) -> {} (local={})",
            srcpath, srclocal, destpath, destlocal
        );

        let mut dosrc = srcpath < destpath;
        for _ in 0..2 {
            if dosrc {
                let held = self
                    .cache
                    .dentry(&src)
                    .map(|dn| dn.is_xlocked_by(reqid))
                    .unwrap_or(false);
                if srclocal {
                    if !held && !self.dentry_xlock_start(&src, reqid) {
                        return;
                    }
                } else if !held {
                    self.dentry_xlock_request(&src, false, reqid, Cont::RetryRequest(reqid));
                    return;
                }
                debug!("rename_local: srcdn is xlock {}", src);
            } else {
                if destlocal {
                    if self.cache.dentry(&dest).is_none() {
                        if let Some(dir) = self.cache.get_dirfrag_mut(dest.df) {
                            dir.add_dentry(&dest.name, DnState::Null);
                        }
                    }
                    let held = self
                        .cache
                        .dentry(&dest)
                        .map(|dn| dn.is_xlocked_by(reqid))
                        .unwrap_or(false);
                    if !held && !self.dentry_xlock_start(&dest, reqid) {
                        // Drop the provisional dentry if we invented it.
                        let removable = self
                            .cache
                            .dentry(&dest)
                            .map(|dn| dn.is_clean() && dn.is_null() && dn.is_sync())
                            .unwrap_or(false);
                        if removable {
                            if let Some(dir) = self.cache.get_dirfrag_mut(dest.df) {
                                dir.remove_dentry(&dest.name);
                            }
                        }
                        return;
                    }
                } else {
                    let held = self
                        .cache
                        .dentry(&dest)
                        .map(|dn| dn.is_xlocked_by(reqid))
                        .unwrap_or(false);
                    if !held {
                        // The remote side will only lock a leaf, in case our
                        // view of dest-vs-dest/srcname was stale.
                        self.dentry_xlock_request(&dest, true, reqid, Cont::RetryRequest(reqid));
                        return;
                    }
                }
                debug!("rename_local: destdn is xlock {}", dest);
            }
            dosrc = !dosrc;
        }

        self.balancer.hit_dir(src.df);
        self.balancer.hit_dir(dest.df);

        // Everything is xlocked by us; delegate the relink.
        self.file_rename(reqid, src, dest, srclocal && destlocal);
    }

    /// Rename executor: journal the move, apply on commit, reply 0.
    pub(crate) fn file_rename(
        &mut self,
        reqid: ReqId,
        src: DentryKey,
        dest: DentryKey,
        local: bool,
    ) {
        if !local {
            // Executing a foreign rename needs the remote authority to
            // journal its half; reject until that exists.
            debug!("file_rename foreign, EXDEV");
            self.reply_request(reqid, -libc::EXDEV, None);
            return;
        }

        let srci = match self.cache.dentry(&src).and_then(|dn| dn.ino()) {
            Some(i) => i,
            None => {
                self.reply_request(reqid, -libc::EEXIST, None);
                return;
            }
        };
        let src_state = self
            .cache
            .dentry(&src)
            .map(|dn| dn.state)
            .unwrap_or(DnState::Null);
        let old = self.cache.dentry(&dest).and_then(|dn| dn.ino());

        // Overwriting a target that stays reachable is the dangle-dir
        // problem again; only last-link files may be replaced.
        if let Some(oldino) = old {
            let busy = self
                .cache
                .get_inode(oldino)
                .map(|i| i.attr.nlink > 1 || i.caps_wanted())
                .unwrap_or(false);
            if busy {
                self.reply_request(reqid, -libc::EXDEV, None);
                return;
            }
        }

        let spv = match self.cache.dentry_mut(&src) {
            Some(dn) => dn.pre_dirty(),
            None => return,
        };
        let dpv = match self.cache.dentry_mut(&dest) {
            Some(dn) => dn.pre_dirty(),
            None => return,
        };
        let ctime = LocalTime::unix_secs();

        let mut blob = MetaBlob::default();
        blob.add_dir_context(self.dir_context_chain(src.df));
        blob.add_null_dentry(&src, true);
        blob.add_dir_context(self.dir_context_chain(dest.df));
        match src_state {
            DnState::Primary(_) => {
                let (attr, symlink) = self
                    .cache
                    .get_inode(srci)
                    .map(|i| (i.attr.clone(), i.symlink.clone()))
                    .unwrap_or_default();
                let pi = blob.add_primary_dentry(&dest, true, attr, symlink);
                pi.ctime = ctime;
                pi.version = dpv;
            }
            DnState::Remote(rino) => blob.add_remote_dentry(&dest, true, rino),
            DnState::Null => {}
        }
        if let Some(oldino) = old {
            let attr = self
                .cache
                .get_inode(oldino)
                .map(|i| i.attr.clone())
                .unwrap_or_default();
            blob.add_destroyed_inode(attr);
        }

        self.journal_and_apply(
            LogEvent::EUpdate {
                name: "rename".into(),
                metablob: blob,
            },
            Finisher::Rename {
                reqid,
                src,
                dest,
                srci,
                spv,
                dpv,
                old,
                ctime,
            },
        );
    }
}
