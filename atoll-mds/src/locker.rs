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

//! Lock manager: per-dentry exclusive locks (local and cross-peer) and
//! per-inode hard/file shared/exclusive locks. Every `*_start` returns true
//! with the lock held by the request, or false with a retry continuation
//! parked. Locks are idempotent per request. A write lock on a
//! non-authoritative inode forwards the request instead of blocking.

use crate::cache::waiter::WaitKind;
use crate::cache::DentryKey;
use crate::mds::{Cont, Mds};
use crate::messenger::Messenger;
use crate::store::MetaStore;
use atoll_common::proto::{Message, PeerMsg};
use atoll_common::state::{InodeId, ReqId};
use log::{debug, warn};

impl<M: Messenger, S: MetaStore> Mds<M, S> {
    // ---- dentry xlocks

    /// Take the dentry xlock for `reqid`. The dentry must be cached; the
    /// holder of record is written into it.
    pub fn dentry_xlock_start(&mut self, key: &DentryKey, reqid: ReqId) -> bool {
        let holder = match self.cache.dentry(key) {
            Some(dn) => dn.xlocked_by,
            None => {
                warn!("xlock_start on missing dentry {}", key);
                return false;
            }
        };

        match holder {
            Some(h) if h == reqid => true,
            Some(_) => {
                debug!("dentry {} xlocked by other, {} waiting", key, reqid);
                if let Some(dir) = self.cache.get_dirfrag_mut(key.df) {
                    dir.waiters.add(
                        WaitKind::DentryRead(key.name.clone()),
                        Cont::RetryRequest(reqid),
                    );
                }
                false
            }
            None => {
                if let Some(dn) = self.cache.dentry_mut(key) {
                    dn.xlocked_by = Some(reqid);
                }
                if let Some(req) = self.cache.get_request_mut(reqid) {
                    req.add_xlock(key.clone());
                }
                debug!("dentry {} xlocked by {}", key, reqid);
                true
            }
        }
    }

    /// Release an xlock and wake readers parked on the name. Also used by
    /// request teardown, so it tolerates a holder whose request is gone.
    pub fn dentry_xlock_finish(&mut self, key: &DentryKey) {
        let holder = self.dentry_xlock_release(key);
        if let Some(h) = holder {
            if let Some(req) = self.cache.get_request_mut(h) {
                req.drop_xlock(key);
            }
        }
    }

    /// Low-level release: clears the holder and wakes waiters without
    /// touching the request table. A lock granted by a remote authority is
    /// released there too.
    pub(crate) fn dentry_xlock_release(&mut self, key: &DentryKey) -> Option<ReqId> {
        let holder = match self.cache.dentry_mut(key) {
            Some(dn) => dn.xlocked_by.take(),
            None => None,
        };
        if let Some(h) = holder {
            debug!("dentry {} xlock released", key);
            let conts = match self.cache.get_dirfrag_mut(key.df) {
                Some(dir) => dir.waiters.take(WaitKind::DentryRead(key.name.clone())),
                None => vec![],
            };
            self.queue_conts(conts);

            let auth = self.cache.get_dirfrag(key.df).map(|d| d.auth);
            if let Some(auth) = auth {
                if auth != self.whoami() {
                    self.messenger.send_peer(
                        auth,
                        Message::PeerLock(PeerMsg::DentryXlockRelease {
                            dirfrag: key.df,
                            name: key.name.clone(),
                            reqid: h,
                        }),
                    );
                }
            }
        }
        holder
    }

    /// Ask the dentry authority for the xlock over the messenger, parking a
    /// retry continuation until the grant arrives.
    pub fn dentry_xlock_request(
        &mut self,
        key: &DentryKey,
        file_only: bool,
        reqid: ReqId,
        cont: Cont,
    ) {
        let auth = self
            .cache
            .get_dirfrag(key.df)
            .map(|d| d.auth)
            .unwrap_or(self.whoami());
        debug!("requesting xlock on {} from mds{}", key, auth);
        self.cache
            .remote_xlock_waiters
            .entry(key.clone())
            .or_default()
            .push_back(cont);
        let msg = PeerMsg::DentryXlockRequest {
            dirfrag: key.df,
            name: key.name.clone(),
            file_only,
            reqid,
            from: self.whoami(),
        };
        self.messenger.send_peer(auth, Message::PeerLock(msg));
    }

    /// Inter-MDS lock traffic entry point.
    pub fn handle_peer_lock(&mut self, pm: PeerMsg) {
        match pm {
            PeerMsg::DentryXlockRequest {
                dirfrag,
                name,
                file_only,
                reqid,
                from,
            } => {
                let key = DentryKey::new(dirfrag, &name);
                let holder = {
                    let df = self.cache.get_or_open_dirfrag(dirfrag.ino, dirfrag.frag);
                    let dir = match self.cache.get_dirfrag_mut(df) {
                        Some(d) => d,
                        None => return,
                    };
                    let dn = dir.add_dentry(name.clone(), crate::cache::DnState::Null);
                    dn.xlocked_by
                };
                match holder {
                    Some(h) if h == reqid => {
                        // Re-request after a lost grant; answer again.
                    }
                    Some(_) => {
                        // Contended: park the whole message for redelivery.
                        debug!("peer xlock on {} contended, parking", key);
                        if let Some(dir) = self.cache.get_dirfrag_mut(dirfrag) {
                            dir.waiters.add(
                                WaitKind::DentryRead(name.clone()),
                                Cont::RetryMessage(Message::PeerLock(
                                    PeerMsg::DentryXlockRequest {
                                        dirfrag,
                                        name,
                                        file_only,
                                        reqid,
                                        from,
                                    },
                                )),
                            );
                        }
                        return;
                    }
                    None => {
                        if let Some(dn) = self.cache.dentry_mut(&key) {
                            dn.xlocked_by = Some(reqid);
                            if !dn.replicas.contains(&from) {
                                dn.replicas.push(from);
                            }
                        }
                    }
                }
                debug!("granting xlock on {} to {} (mds{})", key, reqid, from);
                self.messenger.send_peer(
                    from,
                    Message::PeerLock(PeerMsg::DentryXlockGrant {
                        dirfrag,
                        name,
                        reqid,
                    }),
                );
            }

            PeerMsg::DentryXlockGrant {
                dirfrag,
                name,
                reqid,
            } => {
                let key = DentryKey::new(dirfrag, &name);
                {
                    let df = self.cache.get_or_open_dirfrag(dirfrag.ino, dirfrag.frag);
                    if let Some(dir) = self.cache.get_dirfrag_mut(df) {
                        let dn = dir.add_dentry(name.clone(), crate::cache::DnState::Null);
                        dn.xlocked_by = Some(reqid);
                    }
                }
                if let Some(req) = self.cache.get_request_mut(reqid) {
                    req.add_xlock(key.clone());
                }
                let conts = self
                    .cache
                    .remote_xlock_waiters
                    .remove(&key)
                    .map(|q| q.into_iter().collect::<Vec<_>>())
                    .unwrap_or_default();
                debug!("xlock grant on {}, {} waiters", key, conts.len());
                self.queue_conts(conts);
            }

            PeerMsg::DentryXlockRelease {
                dirfrag,
                name,
                reqid,
            } => {
                let key = DentryKey::new(dirfrag, &name);
                let held = self
                    .cache
                    .dentry(&key)
                    .map(|dn| dn.xlocked_by == Some(reqid))
                    .unwrap_or(false);
                if held {
                    self.dentry_xlock_release(&key);
                }
            }

            PeerMsg::DentryUnlink { dirfrag, name } => {
                // Replica-side removal broadcast from the unlink finisher.
                if let Some(dir) = self.cache.get_dirfrag_mut(dirfrag) {
                    dir.remove_dentry(&name);
                }
            }

            PeerMsg::RenameNotify {
                src,
                srcname,
                dest,
                destname,
            } => {
                debug!(
                    "rename notify {}/{} -> {}/{}",
                    src, srcname, dest, destname
                );
                if let Some(dir) = self.cache.get_dirfrag_mut(src) {
                    dir.remove_dentry(&srcname);
                }
            }
        }
    }

    // ---- inode hard lock (mode, uid, gid, nlink, ctime)

    pub fn inode_hard_read_start(&mut self, ino: InodeId, reqid: ReqId) -> bool {
        let inode = match self.cache.get_inode_mut(ino) {
            Some(i) => i,
            None => return false,
        };
        if inode.hard.try_read(reqid) {
            true
        } else {
            inode.hard.waiters.push_back(Cont::RetryRequest(reqid));
            false
        }
    }

    pub fn inode_hard_read_finish(&mut self, ino: InodeId, reqid: ReqId) {
        if let Some(inode) = self.cache.get_inode_mut(ino) {
            inode.hard.read_finish(reqid);
            let conts: Vec<Cont> = inode.hard.waiters.drain(..).collect();
            self.queue_conts(conts);
        }
    }

    pub fn inode_hard_write_start(&mut self, ino: InodeId, reqid: ReqId) -> bool {
        let whoami = self.whoami();
        let auth = match self.cache.get_inode(ino) {
            Some(i) => i.auth,
            None => return false,
        };
        if auth != whoami {
            // Mutating a replica is forbidden; hand the request over.
            self.request_forward(reqid, auth);
            return false;
        }
        let inode = match self.cache.get_inode_mut(ino) {
            Some(i) => i,
            None => return false,
        };
        if inode.hard.try_write(reqid) {
            true
        } else {
            inode.hard.waiters.push_back(Cont::RetryRequest(reqid));
            false
        }
    }

    pub fn inode_hard_write_finish(&mut self, ino: InodeId, reqid: ReqId) {
        if let Some(inode) = self.cache.get_inode_mut(ino) {
            inode.hard.write_finish(reqid);
            let conts: Vec<Cont> = inode.hard.waiters.drain(..).collect();
            self.queue_conts(conts);
        }
    }

    // ---- inode file lock (size, mtime, atime, file data version)

    pub fn inode_file_read_start(&mut self, ino: InodeId, reqid: ReqId) -> bool {
        let inode = match self.cache.get_inode_mut(ino) {
            Some(i) => i,
            None => return false,
        };
        if inode.file.try_read(reqid) {
            true
        } else {
            inode.file.waiters.push_back(Cont::RetryRequest(reqid));
            false
        }
    }

    pub fn inode_file_read_finish(&mut self, ino: InodeId, reqid: ReqId) {
        if let Some(inode) = self.cache.get_inode_mut(ino) {
            inode.file.read_finish(reqid);
            let conts: Vec<Cont> = inode.file.waiters.drain(..).collect();
            self.queue_conts(conts);
        }
    }

    pub fn inode_file_write_start(&mut self, ino: InodeId, reqid: ReqId) -> bool {
        let whoami = self.whoami();
        let auth = match self.cache.get_inode(ino) {
            Some(i) => i.auth,
            None => return false,
        };
        if auth != whoami {
            self.request_forward(reqid, auth);
            return false;
        }
        let inode = match self.cache.get_inode_mut(ino) {
            Some(i) => i,
            None => return false,
        };
        if inode.file.try_write(reqid) {
            true
        } else {
            inode.file.waiters.push_back(Cont::RetryRequest(reqid));
            false
        }
    }

    pub fn inode_file_write_finish(&mut self, ino: InodeId, reqid: ReqId) {
        if let Some(inode) = self.cache.get_inode_mut(ino) {
            inode.file.write_finish(reqid);
            let conts: Vec<Cont> = inode.file.waiters.drain(..).collect();
            self.queue_conts(conts);
        }
    }

    /// Drop any inode lock still held by a request at teardown.
    pub(crate) fn release_inode_locks(&mut self, reqid: ReqId) {
        let held: Vec<InodeId> = self
            .cache
            .inodes_holding_locks(reqid)
            .into_iter()
            .collect();
        for ino in held {
            if let Some(inode) = self.cache.get_inode_mut(ino) {
                inode.hard.read_finish(reqid);
                inode.hard.write_finish(reqid);
                inode.file.read_finish(reqid);
                inode.file.write_finish(reqid);
                let mut conts: Vec<Cont> = inode.hard.waiters.drain(..).collect();
                conts.extend(inode.file.waiters.drain(..));
                self.queue_conts(conts);
            }
        }
    }

    // ---- capabilities (issuance only; the caps subsystem is external)

    pub fn issue_file_data_version(&mut self, ino: InodeId) -> u64 {
        self.cache
            .get_inode_mut(ino)
            .map(|i| i.issue_fdv())
            .unwrap_or(0)
    }

    /// Issue (or widen) the client's capability on the inode. Returns the
    /// issued bits and sequence, or None when issuance is blocked and the
    /// request has been parked.
    pub fn issue_new_caps(
        &mut self,
        ino: InodeId,
        mode: u32,
        client: atoll_common::state::ClientId,
    ) -> Option<(u32, u64)> {
        let inode = self.cache.get_inode_mut(ino)?;
        let cap = inode.caps.entry(client).or_default();
        cap.issued |= mode;
        cap.wanted |= mode;
        cap.seq += 1;
        Some((cap.issued, cap.seq))
    }
}
