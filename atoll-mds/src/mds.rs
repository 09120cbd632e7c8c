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

//! The metadata server context and its single-threaded event loop. All
//! suspension is explicit: a handler either runs to completion or parks a
//! [`Cont`] on a wait list and returns; wait lists, journal sync, and store
//! fetches feed the event queue, and the loop re-enters handlers from the
//! top.

use crate::balancer::Balancer;
use crate::cache::waiter::WaitKind;
use crate::cache::{DnState, MdCache, MdRequest};
use crate::journal::{JournalWriter, MdLog, NoopWriter};
use crate::messenger::{Messenger, VecMessenger};
use crate::server::finisher::Finisher;
use crate::store::{FetchedDir, FetchedInode, FetchedLink, MemStore, MetaStore};
use atoll_common::conf::ClusterConf;
use atoll_common::proto::{MClientRequest, Message};
use atoll_common::state::{ClientMap, DirFragId, InodeId, PeerId, ReqId};
use log::{debug, error, info, warn};
use std::collections::VecDeque;

/// A parked continuation: how to resume a suspended piece of work.
#[derive(Debug, Clone, PartialEq)]
pub enum Cont {
    /// Re-deliver a message through the dispatcher (used before
    /// `request_start`, and for parked peer messages).
    RetryMessage(Message),
    /// Re-enter the operation handler from the top for a live request.
    RetryRequest(ReqId),
}

/// Work items processed by the event loop.
#[derive(Debug)]
pub enum Event {
    Deliver(Message),
    Retry(ReqId),
    Finish(Finisher),
    FragFetched { df: DirFragId, dir: FetchedDir },
    InodeFetched { ino: InodeId, data: Option<FetchedInode> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdsState {
    Starting,
    Active,
    Stopping,
}

pub struct Mds<M: Messenger, S: MetaStore> {
    pub conf: ClusterConf,
    whoami: PeerId,
    state: MdsState,
    pub clientmap: ClientMap,
    pub cache: MdCache,
    pub mdlog: MdLog,
    pub balancer: Balancer,
    pub messenger: M,
    pub store: S,
    pub(crate) events: VecDeque<Event>,
    waitfor_active: Vec<Message>,
    // Map epochs bundled into mount acks; maintained by the membership layer.
    pub mds_map_epoch: u64,
    pub osd_map_epoch: u64,
}

struct StdoutLog;

impl log::Log for StdoutLog {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        println!("{:<5} {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static STDOUT_LOG: StdoutLog = StdoutLog;
static TEST_LOG_INIT: once_cell::sync::OnceCell<()> = once_cell::sync::OnceCell::new();

impl Mds<VecMessenger, MemStore> {
    /// One-time logger setup for tests.
    pub fn init_test_log() {
        TEST_LOG_INIT.get_or_init(|| {
            if log::set_logger(&STDOUT_LOG).is_ok() {
                log::set_max_level(log::LevelFilter::Debug);
            }
        });
    }

    /// Fully in-process instance for tests: recording messenger, empty
    /// in-memory store, journal captured in the log. Starts active.
    pub fn test_instance(conf: ClusterConf, whoami: PeerId) -> Self {
        let mut mds = Mds::new(
            conf,
            whoami,
            VecMessenger::default(),
            MemStore::default(),
            Box::new(NoopWriter),
        );
        mds.set_active();
        mds
    }
}

impl<M: Messenger, S: MetaStore> Mds<M, S> {
    pub fn new(
        conf: ClusterConf,
        whoami: PeerId,
        messenger: M,
        store: S,
        writer: Box<dyn JournalWriter>,
    ) -> Self {
        let mdlog = MdLog::new(conf.mds.log, writer);
        if conf.mds.debug > 0 || conf.mds.debug_mds > 0 {
            log::set_max_level(log::LevelFilter::Debug);
        }
        Self {
            whoami,
            state: MdsState::Starting,
            clientmap: ClientMap::default(),
            cache: MdCache::new(whoami),
            mdlog,
            balancer: Balancer::default(),
            messenger,
            store,
            events: VecDeque::new(),
            waitfor_active: vec![],
            mds_map_epoch: 1,
            osd_map_epoch: 1,
            conf,
        }
    }

    pub fn whoami(&self) -> PeerId {
        self.whoami
    }

    pub fn state(&self) -> MdsState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == MdsState::Active
    }

    /// Flip to active and redeliver everything stashed while starting.
    pub fn set_active(&mut self) {
        self.state = MdsState::Active;
        info!("mds{} active", self.whoami);
        for m in std::mem::take(&mut self.waitfor_active) {
            self.events.push_back(Event::Deliver(m));
        }
    }

    pub fn shutdown_start(&mut self) {
        info!("mds{} initiating shutdown", self.whoami);
        self.state = MdsState::Stopping;
    }

    // ---- dispatcher (admission gate)

    pub fn dispatch(&mut self, m: Message) {
        if !self.is_active() {
            debug!("not active yet, waiting");
            self.waitfor_active.push(m);
            return;
        }

        match m {
            Message::ClientMount(m) => self.handle_client_mount(m),
            Message::ClientUnmount(m) => self.handle_client_unmount(m),
            Message::ClientRequest(r) => self.handle_client_request(r),
            Message::PeerLock(pm) => self.handle_peer_lock(pm),
        }
    }

    // ---- event loop

    /// Process one event. Journal sync runs between events so finishers fire
    /// in submit order before anything else cuts in line.
    pub fn step(&mut self) -> bool {
        for fin in self.mdlog.sync() {
            self.events.push_back(Event::Finish(fin));
        }
        match self.events.pop_front() {
            Some(ev) => {
                self.process(ev);
                true
            }
            None => false,
        }
    }

    pub fn run_until_idle(&mut self) {
        while self.step() {}
    }

    /// Deliver a message and drive everything it triggers to quiescence.
    pub fn process_message(&mut self, m: Message) {
        self.dispatch(m);
        self.run_until_idle();
    }

    fn process(&mut self, ev: Event) {
        match ev {
            Event::Deliver(m) => self.dispatch(m),
            Event::Retry(reqid) => {
                // The request may have been finished or forwarded while the
                // retry was queued; wait-list entries fire idempotently.
                if self.cache.contains_request(reqid) {
                    self.dispatch_request(reqid);
                }
            }
            Event::Finish(fin) => self.apply_finisher(fin),
            Event::FragFetched { df, dir } => self.finish_frag_fetch(df, dir),
            Event::InodeFetched { ino, data } => self.finish_inode_fetch(ino, data),
        }
    }

    pub(crate) fn queue_cont(&mut self, cont: Cont) {
        let ev = match cont {
            Cont::RetryMessage(m) => Event::Deliver(m),
            Cont::RetryRequest(r) => Event::Retry(r),
        };
        self.events.push_back(ev);
    }

    pub(crate) fn queue_conts(&mut self, conts: Vec<Cont>) {
        for c in conts {
            self.queue_cont(c);
        }
    }

    // ---- dirfrag fetch

    /// Register `cont` on the frag's completion wait list and start a fetch
    /// if one is not already in flight.
    pub(crate) fn fetch_dirfrag(&mut self, df: DirFragId, cont: Cont) {
        let cur_auth = {
            let dir = self
                .cache
                .get_dirfrag_mut(df)
                .expect("fetch on unopened dirfrag");
            dir.waiters.add(WaitKind::Complete, cont);
            if dir.fetching {
                return;
            }
            dir.fetching = true;
            dir.auth
        };

        debug!("fetching dirfrag {}", df);
        let dir = match self.store.fetch_dirfrag(df) {
            Ok(Some(dir)) => dir,
            Ok(None) => FetchedDir {
                auth: cur_auth,
                entries: vec![],
            },
            Err(e) => {
                error!("dirfrag {} fetch failed: {}", df, e);
                FetchedDir {
                    auth: cur_auth,
                    entries: vec![],
                }
            }
        };
        self.events.push_back(Event::FragFetched { df, dir });
    }

    fn finish_frag_fetch(&mut self, df: DirFragId, data: FetchedDir) {
        // Install primary inodes first; the dirfrag borrow stays narrow.
        for entry in &data.entries {
            if let FetchedLink::Primary { attr, symlink } = &entry.link {
                if !self.cache.have_inode(attr.ino) {
                    let mut inode = crate::cache::CInode::new(attr.clone(), data.auth);
                    inode.symlink = symlink.clone();
                    self.cache.add_inode(inode);
                }
            }
        }

        let conts = {
            let dir = match self.cache.get_dirfrag_mut(df) {
                Some(d) => d,
                None => return,
            };
            dir.fetching = false;
            dir.auth = data.auth;
            for entry in data.entries {
                if dir.lookup(&entry.name).is_none() {
                    let state = match entry.link {
                        FetchedLink::Primary { ref attr, .. } => DnState::Primary(attr.ino),
                        FetchedLink::Remote(ino) => DnState::Remote(ino),
                    };
                    let name = entry.name.clone();
                    dir.add_dentry(name, state);
                }
            }
            dir.mark_complete();
            dir.waiters.take(WaitKind::Complete)
        };

        // Back-link primary dentries to their inodes.
        let links: Vec<(String, InodeId)> = self
            .cache
            .get_dirfrag(df)
            .map(|dir| {
                dir.entries()
                    .filter_map(|(name, dn)| match dn.state {
                        DnState::Primary(ino) => Some((name.clone(), ino)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        for (name, ino) in links {
            if let Some(inode) = self.cache.get_inode_mut(ino) {
                if inode.parent.is_none() {
                    inode.parent = Some(crate::cache::DentryKey::new(df, name));
                }
            }
        }

        debug!("dirfrag {} fetched, {} waiters", df, conts.len());
        self.queue_conts(conts);
    }

    // ---- remote inode open

    pub(crate) fn open_remote_ino(&mut self, ino: InodeId, cont: Cont) {
        let first = !self.cache.opening_inodes.contains_key(&ino);
        self.cache
            .opening_inodes
            .entry(ino)
            .or_default()
            .push_back(cont);
        if !first {
            return;
        }
        debug!("opening remote ino {}", ino);
        let data = match self.store.fetch_inode(ino) {
            Ok(data) => data,
            Err(e) => {
                error!("remote ino {} fetch failed: {}", ino, e);
                None
            }
        };
        self.events.push_back(Event::InodeFetched { ino, data });
    }

    fn finish_inode_fetch(&mut self, ino: InodeId, data: Option<FetchedInode>) {
        let conts = self
            .cache
            .opening_inodes
            .remove(&ino)
            .map(|q| q.into_iter().collect::<Vec<_>>())
            .unwrap_or_default();
        match data {
            Some(fetched) => {
                if !self.cache.have_inode(ino) {
                    let mut inode = crate::cache::CInode::new(fetched.attr, fetched.auth);
                    inode.symlink = fetched.symlink;
                    self.cache.add_inode(inode);
                }
                self.queue_conts(conts);
            }
            None => {
                // Leave the waiters unresumed rather than spin on refetch;
                // the discovery layer owns retry policy for lost inodes.
                warn!("remote ino {} not found in store, {} waiters stalled", ino, conts.len());
            }
        }
    }

    /// Thaw a dirfrag and resume everything parked on the freeze or the
    /// auth-pin gate. Called by the migration subsystem when an export
    /// aborts or completes; exposed for tests.
    pub fn thaw_dirfrag(&mut self, df: DirFragId) {
        let conts = match self.cache.get_dirfrag_mut(df) {
            Some(dir) => {
                dir.freeze = crate::cache::FreezeState::Unfrozen;
                dir.set_auth_pins_frozen(false);
                let mut conts = dir.waiters.take(WaitKind::Unfreeze);
                conts.extend(dir.waiters.take(WaitKind::AuthPinnable));
                conts
            }
            None => return,
        };
        self.queue_conts(conts);
    }

    // ---- request lifecycle

    /// Install a traversed request in the request table, pinning the
    /// reference inode and trace. Returns false on a duplicate.
    pub fn request_start(
        &mut self,
        msg: MClientRequest,
        ref_ino: InodeId,
        trace: Vec<crate::cache::DentryKey>,
    ) -> bool {
        if self.cache.contains_request(msg.reqid) {
            debug!("request {} already in flight, dropping duplicate", msg.reqid);
            return false;
        }
        let reqid = msg.reqid;
        let mut req = MdRequest::new(msg, Some(ref_ino), trace.clone());
        req.add_pin(ref_ino);
        for key in &trace {
            if let Some(ino) = self.cache.dentry(key).and_then(|d| d.ino()) {
                req.add_pin(ino);
            }
        }
        let pins = req.pins.clone();
        assert!(self.cache.insert_request(req));
        for ino in pins {
            if let Some(inode) = self.cache.get_inode_mut(ino) {
                inode.pin();
            }
        }
        debug!("request_start {}", reqid);
        true
    }

    /// Pin an additional inode for the lifetime of the request.
    pub fn request_pin_inode(&mut self, reqid: ReqId, ino: InodeId) {
        let newly = match self.cache.get_request_mut(reqid) {
            Some(req) => req.add_pin(ino),
            None => return,
        };
        if newly {
            if let Some(inode) = self.cache.get_inode_mut(ino) {
                inode.pin();
            }
        }
    }

    /// Release everything the request holds and drop it from the table,
    /// without sending anything. Returns the original message.
    pub fn request_cleanup(&mut self, reqid: ReqId) -> Option<MClientRequest> {
        let req = self.cache.remove_request(reqid)?;
        for ino in &req.pins {
            if let Some(inode) = self.cache.get_inode_mut(*ino) {
                inode.unpin();
            }
        }
        for key in req.xlocks.clone() {
            self.dentry_xlock_release(&key);
        }
        self.release_inode_locks(reqid);
        debug!("request_cleanup {}", reqid);
        Some(req.msg)
    }

    /// Tear down a replied (or errored) request.
    pub fn request_finish(&mut self, reqid: ReqId) {
        self.request_cleanup(reqid);
    }

    /// Release local state and pass the request to the peer that holds
    /// authority.
    pub fn request_forward(&mut self, reqid: ReqId, peer: PeerId) {
        if let Some(msg) = self.request_cleanup(reqid) {
            info!("forwarding request {} to mds{}", reqid, peer);
            self.messenger.send_peer(peer, Message::ClientRequest(msg));
        }
    }
}
