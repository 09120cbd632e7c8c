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

//! Rename: boundary conditions, the namespace round-trip laws, overwrite
//! semantics, lexicographic lock ordering under contention, and the
//! cross-peer stubs.

mod common;

use atoll_common::proto::{Message, Op, OpArgs, PeerMsg};
use atoll_common::state::{DirFragId, InodeAttr, MODE_DIR};
use atoll_mds::cache::{CDir, CInode, DentryKey, DnState};
use common::*;

#[test]
fn test_rename_boundaries() {
    let mut mds = new_mds();
    mkdir(&mut mds, "/a");
    mkdir(&mut mds, "/a/b");

    // Root, self, and prefix renames are all meaningless.
    assert_eq!(rename(&mut mds, "/", "/x").result, -libc::EINVAL);
    assert_eq!(rename(&mut mds, "/a", "/a").result, -libc::EINVAL);
    assert_eq!(rename(&mut mds, "/a", "/a/b/c").result, -libc::EINVAL);
}

#[test]
fn test_rename_missing_source() {
    let mut mds = new_mds();
    assert_eq!(rename(&mut mds, "/nope", "/dst").result, -libc::EEXIST);
}

#[test]
fn test_rename_round_trip_is_noop() {
    let mut mds = new_mds();
    mknod(&mut mds, "/ra");
    let before = listing(&readdir(&mut mds, "/"));

    assert_eq!(rename(&mut mds, "/ra", "/rb").result, 0);
    assert_eq!(stat(&mut mds, "/ra", 0).result, -libc::ENOENT);
    assert_eq!(stat(&mut mds, "/rb", 0).result, 0);

    assert_eq!(rename(&mut mds, "/rb", "/ra").result, 0);
    assert_eq!(listing(&readdir(&mut mds, "/")), before);
    assert_eq!(stat(&mut mds, "/ra", 0).result, 0);
    assert!(mds.cache.check_version_invariant());
}

#[test]
fn test_rename_into_directory() {
    let mut mds = new_mds();
    mkdir(&mut mds, "/a");
    mkdir(&mut mds, "/a/b");
    let created = mknod(&mut mds, "/a/1.log");
    let ino = trace_ino(&created);

    // mv /a/1.log /a/b lands the file inside b under its own name.
    assert_eq!(rename(&mut mds, "/a/1.log", "/a/b").result, 0);
    assert_eq!(stat(&mut mds, "/a/1.log", 0).result, -libc::ENOENT);
    let st = stat(&mut mds, "/a/b/1.log", 0);
    assert_eq!(st.result, 0);
    assert_eq!(trace_ino(&st), ino);
    assert_eq!(listing(&readdir(&mut mds, "/a")), vec!["b".to_string()]);
    assert_eq!(listing(&readdir(&mut mds, "/a/b")), vec!["1.log".to_string()]);
}

#[test]
fn test_rename_overwrites_file() {
    let mut mds = new_mds();
    let r1 = mknod(&mut mds, "/o1");
    let ino1 = trace_ino(&r1);
    let r2 = mknod(&mut mds, "/o2");
    let ino2 = trace_ino(&r2);

    assert_eq!(rename(&mut mds, "/o1", "/o2").result, 0);
    let st = stat(&mut mds, "/o2", 0);
    assert_eq!(trace_ino(&st), ino1);
    assert_eq!(stat(&mut mds, "/o1", 0).result, -libc::ENOENT);

    // The displaced inode lost its last link: purged and evicted.
    assert!(!mds.cache.have_inode(ino2));
    assert!(mds.cache.purged.contains(&ino2));

    let names: Vec<&str> = mds.mdlog.entries().iter().map(|e| e.name()).collect();
    assert_eq!(names.last(), Some(&"rename"));
}

#[test]
fn test_rename_refuses_directory_overwrite() {
    let mut mds = new_mds();

    // mv /g /e where /e/g is a directory: the effective destination is a
    // dir, which may not be overwritten by anything.
    mkdir(&mut mds, "/e");
    mkdir(&mut mds, "/e/g");
    mknod(&mut mds, "/g");
    assert_eq!(rename(&mut mds, "/g", "/e").result, -libc::EISDIR);
    assert_eq!(stat(&mut mds, "/g", 0).result, 0);

    // A directory may not displace a file either.
    mkdir(&mut mds, "/dd");
    mknod(&mut mds, "/ff");
    assert_eq!(rename(&mut mds, "/dd", "/ff").result, -libc::EISDIR);

    // A directory rename to a fresh name is fine.
    assert_eq!(rename(&mut mds, "/dd", "/dd2").result, 0);
    assert_eq!(stat(&mut mds, "/dd2", 0).result, 0);
}

#[test]
fn test_sequential_renames_are_deterministic() {
    let mut mds = new_mds();
    let rx = mknod(&mut mds, "/x");
    let ino_x = trace_ino(&rx);
    mknod(&mut mds, "/z");

    // rename(/x,/z) then rename(/z,/y): both lock "z" second (x < z,
    // y < z), so the outcome is fixed by arrival order.
    assert_eq!(rename(&mut mds, "/x", "/z").result, 0);
    assert_eq!(rename(&mut mds, "/z", "/y").result, 0);

    assert_eq!(listing(&readdir(&mut mds, "/")), vec!["y".to_string()]);
    assert_eq!(trace_ino(&stat(&mut mds, "/y", 0)), ino_x);
}

#[test]
fn test_rename_parks_on_contended_dest_and_completes() {
    let mut mds = new_mds();
    mknod(&mut mds, "/x");
    mknod(&mut mds, "/z");
    let df = DirFragId::root_of(mds.cache.root());
    let zkey = DentryKey::new(df, "z");
    mds.cache.dentry_mut(&zkey).unwrap().xlocked_by = Some(0xfeed);

    let req = request(Op::Rename, "/x", "/z", OpArgs::None);
    let reqid = req.reqid;
    mds.process_message(Message::ClientRequest(req));
    // Parked behind the foreign xlock; no reply, request alive.
    assert_eq!(mds.messenger.replies().filter(|r| r.reqid == reqid).count(), 0);
    assert_eq!(mds.cache.request_count(), 1);

    mds.dentry_xlock_finish(&zkey);
    mds.run_until_idle();
    let reply = mds
        .messenger
        .replies()
        .find(|r| r.reqid == reqid)
        .expect("rename reply");
    assert_eq!(reply.result, 0);
    assert_eq!(stat(&mut mds, "/x", 0).result, -libc::ENOENT);
    assert_eq!(stat(&mut mds, "/z", 0).result, 0);
}

/// Plant a directory whose authority is a remote peer: inode, open dirfrag,
/// and a primary dentry under the root.
fn plant_remote_dir(mds: &mut TestMds, name: &str, ino: u64, auth: u32) -> DirFragId {
    let attr = InodeAttr {
        ino,
        mode: MODE_DIR | 0o755,
        nlink: 1,
        ..Default::default()
    };
    mds.cache.add_inode(CInode::new(attr, auth));
    let rootdf = DirFragId::root_of(mds.cache.root());
    mds.cache
        .get_dirfrag_mut(rootdf)
        .unwrap()
        .add_dentry(name, DnState::Primary(ino));
    let df = mds.cache.get_or_open_dirfrag(ino, atoll_common::state::Frag::root());
    let dir: &mut CDir = mds.cache.get_dirfrag_mut(df).unwrap();
    dir.auth = auth;
    dir.mark_complete();
    df
}

#[test]
fn test_cross_peer_directory_rename_is_exdev() {
    let mut mds = new_mds();
    mkdir(&mut mds, "/d");
    plant_remote_dir(&mut mds, "far", 7700, 2);

    assert_eq!(rename(&mut mds, "/d", "/far/d2").result, -libc::EXDEV);
    assert_eq!(stat(&mut mds, "/d", 0).result, 0);
}

#[test]
fn test_cross_peer_file_rename_locks_remotely_then_exdev() {
    let mut mds = new_mds();
    mknod(&mut mds, "/file");
    let fardf = plant_remote_dir(&mut mds, "far", 7701, 2);

    let req = request(Op::Rename, "/file", "/far/f2", OpArgs::None);
    let reqid = req.reqid;
    mds.process_message(Message::ClientRequest(req));

    // Dest orders first ("/far/f2" < "/file") and is remote: an xlock
    // request went to the authority and the request parked.
    assert!(mds.messenger.peer_msgs.iter().any(|(p, m)| *p == 2
        && matches!(
            m,
            Message::PeerLock(PeerMsg::DentryXlockRequest { name, .. }) if name == "f2"
        )));
    assert_eq!(mds.messenger.replies().filter(|r| r.reqid == reqid).count(), 0);

    // The grant arrives; the executor still refuses the foreign relink,
    // and teardown releases the granted lock back to the authority.
    mds.process_message(Message::PeerLock(PeerMsg::DentryXlockGrant {
        dirfrag: fardf,
        name: "f2".to_string(),
        reqid,
    }));
    let reply = mds
        .messenger
        .replies()
        .find(|r| r.reqid == reqid)
        .expect("rename reply");
    assert_eq!(reply.result, -libc::EXDEV);
    assert!(mds.messenger.peer_msgs.iter().any(|(p, m)| *p == 2
        && matches!(
            m,
            Message::PeerLock(PeerMsg::DentryXlockRelease { name, .. }) if name == "f2"
        )));
    // Source survived.
    assert_eq!(stat(&mut mds, "/file", 0).result, 0);
}
