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

//! Asynchronous path traversal. Walks a filepath component by component
//! across authority boundaries; any step may park the caller's continuation
//! on a wait list and report a delay.

use crate::cache::waiter::WaitKind;
use crate::cache::{DentryKey, DnState};
use crate::mds::{Cont, Mds};
use crate::messenger::Messenger;
use crate::store::MetaStore;
use atoll_common::fs::FilePath;
use atoll_common::proto::{MClientRequest, Message};
use atoll_common::state::{DirFragId, PeerId};
use log::debug;
use std::collections::VecDeque;

// Bound on symlink splices before the walk gives up.
const MAX_SYMLINK_SPLICES: u32 = 32;

/// How to resolve a cross-peer hop: hand the request to the authority, or
/// pull a replica into the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraverseMode {
    Forward,
    Discover,
}

/// Traversal outcome.
#[derive(Debug)]
pub enum Traverse {
    /// Fully resolved; the dentry trace, root-first.
    Done(Vec<DentryKey>),
    /// A continuation was parked; the caller must return.
    Delayed,
    /// The request was sent to the authority; local state is the caller's to
    /// clean up if it had already started.
    Forwarded(PeerId),
    /// Negated POSIX error.
    Error(i32),
}

impl<M: Messenger, S: MetaStore> Mds<M, S> {
    pub fn path_traverse(
        &mut self,
        path: &FilePath,
        follow_trailing: bool,
        mode: TraverseMode,
        req: &MClientRequest,
        ondelay: Cont,
    ) -> Traverse {
        let whoami = self.whoami();
        let mut cur = self.cache.root();
        let mut trace: Vec<DentryKey> = vec![];
        let mut components: VecDeque<String> = path.components().to_vec().into();
        let mut splices = 0u32;

        while let Some(name) = components.pop_front() {
            let is_last = components.is_empty();

            let (diri_is_dir, diri_auth_here, diri_auth, frag) = {
                let diri = match self.cache.get_inode(cur) {
                    Some(i) => i,
                    None => return Traverse::Error(-libc::ENOENT),
                };
                (
                    diri.is_dir(),
                    diri.is_auth(whoami),
                    diri.auth,
                    diri.pick_dirfrag(&name),
                )
            };

            if !diri_is_dir {
                return Traverse::Error(-libc::ENOTDIR);
            }

            let df = DirFragId::new(cur, frag);

            if !self.cache.have_dirfrag(df) {
                if !diri_auth_here && mode == TraverseMode::Forward {
                    debug!(
                        "traverse: dirfrag {} not open, not inode auth, fw to mds{}",
                        df, diri_auth
                    );
                    self.messenger
                        .send_peer(diri_auth, Message::ClientRequest(req.clone()));
                    return Traverse::Forwarded(diri_auth);
                }
                // Auth here, or DISCOVER pulling a replica: open locally and
                // read through below.
                self.cache.get_or_open_dirfrag(cur, frag);
            }

            // Frozen or unpinnable frags park the walk.
            let (frozen, pinnable) = {
                let dir = self.cache.get_dirfrag(df).expect("dirfrag just opened");
                (dir.is_frozen(), dir.can_auth_pin())
            };
            if frozen {
                debug!("traverse: dirfrag {} frozen, waiting", df);
                let dir = self.cache.get_dirfrag_mut(df).expect("dirfrag");
                dir.waiters.add(WaitKind::Unfreeze, ondelay);
                return Traverse::Delayed;
            }
            if !pinnable {
                debug!("traverse: dirfrag {} not auth-pinnable, waiting", df);
                let dir = self.cache.get_dirfrag_mut(df).expect("dirfrag");
                dir.waiters.add(WaitKind::AuthPinnable, ondelay);
                return Traverse::Delayed;
            }

            let dn_view = {
                let dir = self.cache.get_dirfrag(df).expect("dirfrag");
                dir.lookup(&name)
                    .map(|dn| (dn.state, dn.can_read(req.reqid)))
            };

            match dn_view {
                None => {
                    let complete = self.cache.get_dirfrag(df).expect("dirfrag").complete;
                    if complete {
                        return Traverse::Error(-libc::ENOENT);
                    }
                    debug!("traverse: {} absent in incomplete {}, fetching", name, df);
                    self.fetch_dirfrag(df, ondelay);
                    return Traverse::Delayed;
                }
                Some((_, false)) => {
                    debug!("traverse: dentry {} unreadable, waiting", name);
                    let dir = self.cache.get_dirfrag_mut(df).expect("dirfrag");
                    dir.waiters.add(WaitKind::DentryRead(name), ondelay);
                    return Traverse::Delayed;
                }
                Some((DnState::Null, true)) => {
                    // Reserved name with no target.
                    return Traverse::Error(-libc::ENOENT);
                }
                Some((DnState::Remote(rino), true)) if !self.cache.have_inode(rino) => {
                    debug!("traverse: remote dentry {}, opening ino {}", name, rino);
                    self.open_remote_ino(rino, ondelay);
                    return Traverse::Delayed;
                }
                Some((DnState::Primary(ino), true)) | Some((DnState::Remote(ino), true)) => {
                    let (is_symlink, symlink) = {
                        let inode = self.cache.get_inode(ino).expect("target inode cached");
                        (inode.is_symlink(), inode.symlink.clone())
                    };

                    if is_symlink && (!is_last || follow_trailing) {
                        splices += 1;
                        if splices > MAX_SYMLINK_SPLICES {
                            return Traverse::Error(-libc::ENOENT);
                        }
                        let target = symlink.unwrap_or_default();
                        debug!("traverse: splicing symlink {} -> {}", name, target);
                        let tp = FilePath::new(&target);
                        for c in tp.components().iter().rev() {
                            components.push_front(c.clone());
                        }
                        if target.starts_with('/') {
                            cur = self.cache.root();
                            trace.clear();
                        }
                        // Relative links continue from the containing dir.
                        continue;
                    }

                    trace.push(DentryKey::new(df, name));
                    cur = ino;
                }
            }
        }

        Traverse::Done(trace)
    }
}
