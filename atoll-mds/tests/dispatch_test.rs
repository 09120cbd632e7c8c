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

//! Dispatcher, forwarding, suspension, and inter-MDS lock-message tests.

mod common;

use atoll_common::conf::ClusterConf;
use atoll_common::proto::{MClientMount, Message, Op, OpArgs, PeerMsg};
use atoll_common::state::{DirFragId, InodeAttr, MODE_FILE};
use atoll_mds::cache::{CInode, DentryKey, DnState};
use atoll_mds::journal::NoopWriter;
use atoll_mds::messenger::VecMessenger;
use atoll_mds::store::{FetchedDentry, FetchedDir, FetchedLink, MemStore};
use atoll_mds::Mds;
use common::*;

#[test]
fn test_messages_stash_until_active() {
    TestMds::init_test_log();
    let mut mds: TestMds = Mds::new(
        ClusterConf::testing(),
        0,
        VecMessenger::default(),
        MemStore::default(),
        Box::new(NoopWriter),
    );
    assert!(!mds.is_active());

    mds.dispatch(Message::ClientMount(MClientMount { client: client(7) }));
    mds.run_until_idle();
    assert!(mds.clientmap.is_empty());
    assert!(mds.messenger.client_msgs.is_empty());

    // Activation redelivers the stashed mount.
    mds.set_active();
    mds.run_until_idle();
    assert!(mds.clientmap.is_mounted(7));
    assert_eq!(mds.messenger.client_msgs.len(), 1);
}

#[test]
fn test_fsync_on_unknown_ino_passes_the_buck() {
    let mut conf = ClusterConf::testing();
    conf.mds_count = 3;
    let mut mds = new_mds_with_conf(conf);

    let req = request(Op::Fsync, "", "", OpArgs::Fsync { ino: 42 });
    let reqid = req.reqid;
    mds.process_message(Message::ClientRequest(req));

    // Round-robin forward to the next peer; no reply from this one.
    assert_eq!(mds.messenger.peer_msgs.len(), 1);
    let (peer, msg) = &mds.messenger.peer_msgs[0];
    assert_eq!(*peer, 1);
    assert!(matches!(msg, Message::ClientRequest(r) if r.reqid == reqid));
    assert_eq!(mds.messenger.replies().filter(|r| r.reqid == reqid).count(), 0);
}

#[test]
fn test_fsync_on_cached_ino_replies() {
    let mut mds = new_mds();
    let reply = mknod(&mut mds, "/f");
    let ino = trace_ino(&reply);

    let reply = run_op(&mut mds, request(Op::Fsync, "", "", OpArgs::Fsync { ino }))
        .expect("fsync reply");
    assert_eq!(reply.result, 0);
}

#[test]
fn test_write_on_replica_forwards_to_auth() {
    let mut mds = new_mds();

    // A replica of an inode whose authority is mds1.
    let attr = InodeAttr {
        ino: 4242,
        mode: MODE_FILE | 0o644,
        nlink: 1,
        ..Default::default()
    };
    mds.cache.add_inode(CInode::new(attr, 1));
    let df = DirFragId::root_of(mds.cache.root());
    mds.cache
        .get_dirfrag_mut(df)
        .unwrap()
        .add_dentry("r", DnState::Primary(4242));

    let req = request(Op::Chmod, "/r", "", OpArgs::Chmod { mode: 0o600 });
    let reqid = req.reqid;
    mds.process_message(Message::ClientRequest(req));

    // Forwarded to the authority, never replied locally, nothing left in
    // the request table.
    assert!(mds
        .messenger
        .peer_msgs
        .iter()
        .any(|(p, m)| *p == 1 && matches!(m, Message::ClientRequest(r) if r.reqid == reqid)));
    assert_eq!(mds.messenger.replies().filter(|r| r.reqid == reqid).count(), 0);
    assert_eq!(mds.cache.request_count(), 0);
}

#[test]
fn test_readdir_fetches_incomplete_frag_then_replies() {
    let mut mds = new_mds();
    let reply = mkdir(&mut mds, "/d");
    let dino = trace_ino(&reply);

    // Pretend /d was only partially cached and the store holds a child.
    let ddf = DirFragId::root_of(dino);
    mds.cache.get_dirfrag_mut(ddf).unwrap().complete = false;
    mds.store.put_dir(
        ddf,
        FetchedDir {
            auth: 0,
            entries: vec![FetchedDentry {
                name: "kid".to_string(),
                link: FetchedLink::Primary {
                    attr: InodeAttr {
                        ino: 9999,
                        mode: MODE_FILE | 0o644,
                        nlink: 1,
                        ..Default::default()
                    },
                    symlink: None,
                },
            }],
        },
    );

    let req = request(
        Op::Readdir,
        "/d",
        "",
        OpArgs::Readdir {
            frag: atoll_common::state::Frag::root(),
        },
    );
    let reqid = req.reqid;

    // The fetch is enqueued; no reply yet.
    mds.dispatch(Message::ClientRequest(req));
    assert_eq!(mds.messenger.replies().filter(|r| r.reqid == reqid).count(), 0);
    assert_eq!(mds.store.dir_fetches, 1);

    // The fetch finisher fires, the request retries, the reply lists "."
    // and every child.
    mds.run_until_idle();
    let reply = mds
        .messenger
        .replies()
        .find(|r| r.reqid == reqid)
        .cloned()
        .expect("readdir reply");
    assert_eq!(reply.result, 0);
    assert_eq!(listing(&reply), vec!["kid".to_string()]);
    assert!(mds
        .cache
        .get_dirfrag(ddf)
        .unwrap()
        .complete);
}

#[test]
fn test_readdir_of_non_auth_frag_forwards() {
    let mut mds = new_mds();
    let reply = mkdir(&mut mds, "/d");
    let dino = trace_ino(&reply);
    let ddf = DirFragId::root_of(dino);
    mds.cache.get_dirfrag_mut(ddf).unwrap().auth = 2;

    let req = request(
        Op::Readdir,
        "/d",
        "",
        OpArgs::Readdir {
            frag: atoll_common::state::Frag::root(),
        },
    );
    let reqid = req.reqid;
    mds.process_message(Message::ClientRequest(req));

    assert!(mds
        .messenger
        .peer_msgs
        .iter()
        .any(|(p, m)| *p == 2 && matches!(m, Message::ClientRequest(r) if r.reqid == reqid)));
    assert_eq!(mds.messenger.replies().filter(|r| r.reqid == reqid).count(), 0);
}

#[test]
fn test_frozen_dirfrag_parks_create_until_thaw() {
    let mut mds = new_mds();
    let df = DirFragId::root_of(mds.cache.root());
    mds.cache.get_dirfrag_mut(df).unwrap().freeze = atoll_mds::cache::FreezeState::Frozen;

    let req = request(Op::Mknod, "/cold", "", OpArgs::Mknod { mode: 0o644 });
    let reqid = req.reqid;
    mds.process_message(Message::ClientRequest(req));
    assert_eq!(mds.messenger.replies().filter(|r| r.reqid == reqid).count(), 0);

    mds.thaw_dirfrag(df);
    mds.run_until_idle();
    let reply = mds
        .messenger
        .replies()
        .find(|r| r.reqid == reqid)
        .expect("reply after thaw");
    assert_eq!(reply.result, 0);
}

#[test]
fn test_peer_xlock_request_grant_and_release() {
    let mut mds = new_mds();
    mknod(&mut mds, "/a");
    let df = DirFragId::root_of(mds.cache.root());
    let key = DentryKey::new(df, "a");

    // A peer asks for the xlock; we are the authority and grant it.
    mds.process_message(Message::PeerLock(PeerMsg::DentryXlockRequest {
        dirfrag: df,
        name: "a".to_string(),
        file_only: false,
        reqid: 777,
        from: 2,
    }));
    assert_eq!(mds.cache.dentry(&key).unwrap().xlocked_by, Some(777));
    assert!(mds.cache.dentry(&key).unwrap().replicas.contains(&2));
    assert!(mds.messenger.peer_msgs.iter().any(|(p, m)| *p == 2
        && matches!(
            m,
            Message::PeerLock(PeerMsg::DentryXlockGrant { reqid: 777, .. })
        )));

    // The holder releases; the record clears.
    mds.process_message(Message::PeerLock(PeerMsg::DentryXlockRelease {
        dirfrag: df,
        name: "a".to_string(),
        reqid: 777,
    }));
    assert_eq!(mds.cache.dentry(&key).unwrap().xlocked_by, None);
}

#[test]
fn test_peer_xlock_contention_parks_until_release() {
    let mut mds = new_mds();
    mknod(&mut mds, "/b");
    let df = DirFragId::root_of(mds.cache.root());
    let key = DentryKey::new(df, "b");
    mds.cache.dentry_mut(&key).unwrap().xlocked_by = Some(555);

    mds.process_message(Message::PeerLock(PeerMsg::DentryXlockRequest {
        dirfrag: df,
        name: "b".to_string(),
        file_only: false,
        reqid: 888,
        from: 3,
    }));
    // Contended: no grant yet.
    assert!(!mds
        .messenger
        .peer_msgs
        .iter()
        .any(|(_, m)| matches!(m, Message::PeerLock(PeerMsg::DentryXlockGrant { .. }))));

    mds.dentry_xlock_finish(&key);
    mds.run_until_idle();
    assert_eq!(mds.cache.dentry(&key).unwrap().xlocked_by, Some(888));
    assert!(mds.messenger.peer_msgs.iter().any(|(p, m)| *p == 3
        && matches!(
            m,
            Message::PeerLock(PeerMsg::DentryXlockGrant { reqid: 888, .. })
        )));
}

#[test]
fn test_unlink_broadcasts_to_replicas() {
    let mut mds = new_mds();
    mknod(&mut mds, "/rep");
    let df = DirFragId::root_of(mds.cache.root());
    let key = DentryKey::new(df, "rep");
    mds.cache.dentry_mut(&key).unwrap().replicas.push(3);

    assert_eq!(unlink(&mut mds, "/rep").result, 0);
    assert!(mds.messenger.peer_msgs.iter().any(|(p, m)| *p == 3
        && matches!(
            m,
            Message::PeerLock(PeerMsg::DentryUnlink { name, .. }) if name == "rep"
        )));
}

#[test]
fn test_replica_applies_dentry_unlink_broadcast() {
    let mut mds = new_mds();
    mknod(&mut mds, "/gone");
    let df = DirFragId::root_of(mds.cache.root());
    let key = DentryKey::new(df, "gone");

    mds.process_message(Message::PeerLock(PeerMsg::DentryUnlink {
        dirfrag: df,
        name: "gone".to_string(),
    }));
    assert!(mds.cache.dentry(&key).is_none());
}
