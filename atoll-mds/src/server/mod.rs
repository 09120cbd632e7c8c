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

//! Client-request processing: admission and referencing, per-op dispatch,
//! reply plumbing, and the shared preparation helpers used by the
//! namespace-mutating handlers.

pub mod dir_ops;
pub mod finisher;
pub mod inode_ops;
pub mod mount;
pub mod rename;

use crate::cache::resolve::{Traverse, TraverseMode};
use crate::cache::waiter::WaitKind;
use crate::cache::DentryKey;
use crate::journal::LogEvent;
use crate::mds::{Cont, Event, Mds};
use crate::messenger::Messenger;
use crate::store::MetaStore;
use atoll_common::proto::{ClientMsg, MClientReply, MClientRequest, Message, Op, OpArgs, O_CREAT};
use atoll_common::state::{DirFragId, Frag, InodeId, ReqId};
use log::{debug, warn};

/// Outcome of the shared mknod-type preparation.
#[derive(Debug)]
pub enum PrepareMknod {
    /// Parked, or an error reply was already sent; the handler returns.
    Wait,
    /// Null dentry added and xlocked; inode created when requested.
    Created {
        dn: DentryKey,
        ino: Option<InodeId>,
    },
    /// A readable non-null dentry already exists (only when the caller
    /// permits).
    Exists { dn: DentryKey, ino: InodeId },
}

impl<M: Messenger, S: MetaStore> Mds<M, S> {
    // ---- admission and referencing

    pub fn handle_client_request(&mut self, req: MClientRequest) {
        debug!("req {} op {:?} path {}", req.reqid, req.op, req.path);

        // fh-style ops reference the inode directly; if we don't have it,
        // pass the buck around the ring until someone does.
        if let Some(ino) = Self::fh_ino(&req) {
            if !self.cache.have_inode(ino) {
                let next = (self.whoami() + 1) % self.conf.mds_count.max(1);
                debug!(
                    "got request on ino {} we don't have, passing buck to mds{}",
                    ino, next
                );
                self.messenger.send_peer(next, Message::ClientRequest(req));
                return;
            }
            let reqid = req.reqid;
            if !self.request_start(req, ino, vec![]) {
                return;
            }
            self.dispatch_request(reqid);
            return;
        }

        // Ops creating (or unlinking) names resolve the parent directory.
        let refpath = if Self::is_parent_path_op(&req) {
            req.path.parent()
        } else {
            req.path.clone()
        };
        let follow = req.op != Op::Lstat;

        let ondelay = Cont::RetryMessage(Message::ClientRequest(req.clone()));
        match self.path_traverse(&refpath, follow, TraverseMode::Forward, &req, ondelay) {
            Traverse::Delayed => return,
            Traverse::Forwarded(_) => return,
            Traverse::Error(r) => {
                debug!("path traverse error {}, replying", r);
                self.reply_early(&req, r);
                return;
            }
            Traverse::Done(mut trace) => {
                let ref_ino = trace
                    .last()
                    .and_then(|k| self.cache.dentry(k).and_then(|d| d.ino()))
                    .unwrap_or(self.cache.root());

                // Rename re-traces its source later; pinning the admit-time
                // trace would wreck the lock ordering.
                if req.op == Op::Rename {
                    trace.clear();
                }

                let reqid = req.reqid;
                if !self.request_start(req, ref_ino, trace) {
                    return;
                }
                self.dispatch_request(reqid);
            }
        }
    }

    fn fh_ino(req: &MClientRequest) -> Option<InodeId> {
        match (&req.op, &req.args) {
            (Op::Truncate, OpArgs::Truncate { ino: Some(i), .. }) => Some(*i),
            (Op::Fsync, OpArgs::Fsync { ino }) => Some(*ino),
            (Op::Release, OpArgs::Release { ino }) => Some(*ino),
            _ => None,
        }
    }

    fn is_parent_path_op(req: &MClientRequest) -> bool {
        match req.op {
            Op::Open => match req.args {
                OpArgs::Open { flags, .. } => flags & O_CREAT != 0,
                _ => false,
            },
            Op::Mknod
            | Op::Mkdir
            | Op::Symlink
            | Op::Link
            | Op::Unlink
            | Op::Rmdir
            | Op::Rename => true,
            _ => false,
        }
    }

    /// Route a started request to its operation handler. Retry continuations
    /// land here; handlers are idempotent from the top.
    pub fn dispatch_request(&mut self, reqid: ReqId) {
        let (op, flags) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.msg.op,
                match req.msg.args {
                    OpArgs::Open { flags, .. } => flags,
                    _ => 0,
                },
            ),
            None => return,
        };

        match op {
            Op::Open => {
                if flags & O_CREAT != 0 {
                    self.handle_client_openc(reqid)
                } else {
                    self.handle_client_open(reqid)
                }
            }
            Op::Truncate => self.handle_client_truncate(reqid),
            // Release and fsync are capability-subsystem enqueue points;
            // admission already routed them to the right peer.
            Op::Release | Op::Fsync => {
                let ino = self.cache.get_request(reqid).and_then(|r| r.ref_ino);
                self.reply_request(reqid, 0, ino);
            }
            Op::Stat | Op::Lstat => self.handle_client_stat(reqid),
            Op::Utime => self.handle_client_utime(reqid),
            Op::Chmod => self.handle_client_chmod(reqid),
            Op::Chown => self.handle_client_chown(reqid),
            Op::Readdir => self.handle_client_readdir(reqid),
            Op::Mknod => self.handle_client_mknod(reqid),
            Op::Mkdir => self.handle_client_mkdir(reqid),
            Op::Symlink => self.handle_client_symlink(reqid),
            Op::Link => self.handle_client_link(reqid),
            Op::Unlink | Op::Rmdir => self.handle_client_unlink(reqid),
            Op::Rename => self.handle_client_rename(reqid),
        }
    }

    // ---- replies

    /// Error reply for a request that never entered the request table.
    pub(crate) fn reply_early(&mut self, req: &MClientRequest, result: i32) {
        let reply = MClientReply::new(req, result);
        self.messenger
            .send_client(&req.client, ClientMsg::Reply(reply));
    }

    pub fn reply_request(&mut self, reqid: ReqId, result: i32, tracei: Option<InodeId>) {
        let reply = match self.cache.get_request(reqid) {
            Some(req) => MClientReply::new(&req.msg, result),
            None => {
                warn!("reply for unknown request {}", reqid);
                return;
            }
        };
        self.reply_request_full(reqid, reply, tracei);
    }

    /// Send a reply (with a trace to `tracei`) and finish the request.
    pub fn reply_request_full(
        &mut self,
        reqid: ReqId,
        mut reply: MClientReply,
        tracei: Option<InodeId>,
    ) {
        let client = match self.cache.get_request(reqid) {
            Some(req) => req.msg.client.clone(),
            None => {
                warn!("reply for unknown request {}", reqid);
                return;
            }
        };
        if let Some(ino) = tracei {
            reply.trace = self.build_trace(ino);
        }
        debug!("reply_request {} r={}", reqid, reply.result);
        self.messenger.send_client(&client, ClientMsg::Reply(reply));
        self.request_finish(reqid);
    }

    /// Dentry-name / inode-stat pairs from the root down to `ino`.
    pub fn build_trace(&self, ino: InodeId) -> Vec<atoll_common::proto::TraceItem> {
        let mut items = std::collections::VecDeque::new();
        let mut cur = ino;
        loop {
            let inode = match self.cache.get_inode(cur) {
                Some(i) => i,
                None => break,
            };
            let dname = inode
                .parent
                .as_ref()
                .map(|k| k.name.clone())
                .unwrap_or_default();
            items.push_front(atoll_common::proto::TraceItem {
                dname,
                stat: inode.stat(),
            });
            match &inode.parent {
                Some(key) => cur = key.df.ino,
                None => break,
            }
        }
        items.into()
    }

    // ---- journal plumbing

    /// Submit a mutation's entry and arrange for its finisher. Safe mode
    /// parks the finisher on the sync barrier; with `log_before_reply` off
    /// the finisher runs without waiting for durability.
    pub(crate) fn journal_and_apply(&mut self, entry: LogEvent, fin: finisher::Finisher) {
        self.mdlog.submit_entry(entry);
        if self.conf.mds.log && self.conf.mds.log_before_reply {
            self.mdlog.wait_for_sync(fin);
        } else {
            self.events.push_back(Event::Finish(fin));
        }
    }

    /// Dirfrag chain from the root down to `df`, for MetaBlob dir context.
    pub(crate) fn dir_context_chain(&self, df: DirFragId) -> Vec<DirFragId> {
        let mut chain = vec![df];
        let mut ino = df.ino;
        while let Some(parent) = self.cache.get_inode(ino).and_then(|i| i.parent.clone()) {
            chain.push(parent.df);
            ino = parent.df.ino;
        }
        chain.reverse();
        chain
    }

    // ---- directory opens

    /// Open the dirfrag, waiting out a frozen parent. Invents the frag when
    /// absent; does not check authority (rename's destination side needs
    /// replicas too).
    pub(crate) fn try_open_dir(
        &mut self,
        diri: InodeId,
        frag: Frag,
        reqid: ReqId,
    ) -> Option<DirFragId> {
        let df = DirFragId::new(diri, frag);
        if self.cache.have_dirfrag(df) {
            return Some(df);
        }

        if let Some(parent_df) = self
            .cache
            .get_inode(diri)
            .and_then(|i| i.parent.as_ref().map(|k| k.df))
        {
            let frozen = self
                .cache
                .get_dirfrag(parent_df)
                .map(|d| d.is_frozen())
                .unwrap_or(false);
            if frozen {
                debug!("try_open_dir: dir inode {} frozen, waiting", diri);
                if let Some(dir) = self.cache.get_dirfrag_mut(parent_df) {
                    dir.waiters
                        .add(WaitKind::Unfreeze, Cont::RetryRequest(reqid));
                }
                return None;
            }
        }

        Some(self.cache.get_or_open_dirfrag(diri, frag))
    }

    /// Open the dirfrag and require local authority, forwarding the request
    /// when authority lies elsewhere.
    pub(crate) fn try_open_auth_dir(
        &mut self,
        diri: InodeId,
        frag: Frag,
        reqid: ReqId,
    ) -> Option<DirFragId> {
        let df = DirFragId::new(diri, frag);
        let have = self.cache.have_dirfrag(df);

        if !have {
            let (inode_auth_here, inode_auth) = match self.cache.get_inode(diri) {
                Some(i) => (i.is_auth(self.whoami()), i.auth),
                None => return None,
            };
            if !inode_auth_here {
                debug!(
                    "try_open_auth_dir: {} not open, not inode auth, fw to mds{}",
                    df, inode_auth
                );
                self.request_forward(reqid, inode_auth);
                return None;
            }
            self.try_open_dir(diri, frag, reqid)?;
        }

        let dir_auth = self.cache.get_dirfrag(df).map(|d| d.auth)?;
        if dir_auth != self.whoami() {
            debug!(
                "try_open_auth_dir: not auth for {}, fw to mds{}",
                df, dir_auth
            );
            self.request_forward(reqid, dir_auth);
            return None;
        }

        Some(df)
    }

    /// Verify the parent can own a new dentry for `name`: a directory, with
    /// an unfrozen, auth-pinnable, locally authoritative dirfrag. Replies
    /// or parks on failure.
    pub(crate) fn validate_dentry_dir(
        &mut self,
        reqid: ReqId,
        diri: InodeId,
        name: &str,
    ) -> Option<DirFragId> {
        let (is_dir, frag) = match self.cache.get_inode(diri) {
            Some(i) => (i.is_dir(), i.pick_dirfrag(name)),
            None => return None,
        };
        if !is_dir {
            self.reply_request(reqid, -libc::ENOTDIR, None);
            return None;
        }

        let df = self.try_open_auth_dir(diri, frag, reqid)?;

        let (pinnable, frozen) = {
            let dir = self.cache.get_dirfrag(df)?;
            (dir.can_auth_pin(), dir.is_frozen())
        };
        if !pinnable {
            debug!("validate_dentry_dir: {} not pinnable, waiting", df);
            if let Some(dir) = self.cache.get_dirfrag_mut(df) {
                dir.waiters
                    .add(WaitKind::AuthPinnable, Cont::RetryRequest(reqid));
            }
            return None;
        }
        if frozen {
            debug!("validate_dentry_dir: {} frozen, waiting", df);
            if let Some(dir) = self.cache.get_dirfrag_mut(df) {
                dir.waiters
                    .add(WaitKind::Unfreeze, Cont::RetryRequest(reqid));
            }
            return None;
        }

        Some(df)
    }

    /// Shared preparation for mknod-type operations (mknod, mkdir, symlink,
    /// open-create, link's new dentry): validate the parent dir, reserve a
    /// null dentry under xlock, and optionally create the child inode.
    pub(crate) fn prepare_mknod(
        &mut self,
        reqid: ReqId,
        diri: InodeId,
        want_inode: bool,
        okexist: bool,
    ) -> PrepareMknod {
        let (name, uid, gid) = match self.cache.get_request(reqid) {
            Some(req) => (
                req.msg.path.last_dentry().to_string(),
                req.msg.caller_uid,
                req.msg.caller_gid,
            ),
            None => return PrepareMknod::Wait,
        };
        debug!("prepare_mknod {} in {}", name, diri);

        let df = match self.validate_dentry_dir(reqid, diri, &name) {
            Some(df) => df,
            None => return PrepareMknod::Wait,
        };
        let key = DentryKey::new(df, &name);

        // Existing dentry?
        let existing = {
            let dir = self.cache.get_dirfrag(df).expect("validated dirfrag");
            dir.lookup(&name)
                .map(|dn| (dn.can_read(reqid), dn.is_null(), dn.ino()))
        };
        if let Some((readable, is_null, ino)) = existing {
            if !readable {
                debug!("waiting on (existing!) unreadable dentry {}", key);
                if let Some(dir) = self.cache.get_dirfrag_mut(df) {
                    dir.waiters
                        .add(WaitKind::DentryRead(name), Cont::RetryRequest(reqid));
                }
                return PrepareMknod::Wait;
            }
            if !is_null {
                let ino = ino.expect("non-null dentry has a target");
                if okexist {
                    debug!("dentry {} exists", key);
                    return PrepareMknod::Exists { dn: key, ino };
                }
                debug!("dentry {} exists, replying EEXIST", key);
                self.reply_request(reqid, -libc::EEXIST, Some(ino));
                return PrepareMknod::Wait;
            }
        }

        // Need completeness before inventing a name.
        let complete = self.cache.get_dirfrag(df).expect("dirfrag").complete;
        if !complete {
            debug!("incomplete dir contents for {}, fetching", df);
            self.fetch_dirfrag(df, Cont::RetryRequest(reqid));
            return PrepareMknod::Wait;
        }

        // Reserve the name.
        if self.cache.dentry(&key).is_none() {
            if let Some(dir) = self.cache.get_dirfrag_mut(df) {
                dir.add_dentry(&name, crate::cache::DnState::Null);
            }
        }

        if !self.dentry_xlock_start(&key, reqid) {
            return PrepareMknod::Wait;
        }

        let ino = if want_inode {
            Some(self.cache.create_inode(uid, gid))
        } else {
            None
        };

        self.balancer.hit_dir(df);

        PrepareMknod::Created { dn: key, ino }
    }
}
