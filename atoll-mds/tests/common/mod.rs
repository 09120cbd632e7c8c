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

#![allow(dead_code)]

use atoll_common::conf::ClusterConf;
use atoll_common::fs::FilePath;
use atoll_common::proto::{
    MClientMount, MClientReply, MClientRequest, MClientUnmount, Message, Op, OpArgs,
};
use atoll_common::state::{ClientInst, Frag, InodeId};
use atoll_common::utils::next_req_id;
use atoll_mds::messenger::VecMessenger;
use atoll_mds::store::MemStore;
use atoll_mds::Mds;

pub type TestMds = Mds<VecMessenger, MemStore>;

pub fn new_mds() -> TestMds {
    TestMds::init_test_log();
    Mds::test_instance(ClusterConf::testing(), 0)
}

pub fn new_mds_with_conf(conf: ClusterConf) -> TestMds {
    TestMds::init_test_log();
    Mds::test_instance(conf, 0)
}

pub fn client(id: u64) -> ClientInst {
    ClientInst::new(id, format!("client{}", id))
}

pub fn request(op: Op, path: &str, sarg: &str, args: OpArgs) -> MClientRequest {
    MClientRequest {
        reqid: next_req_id(),
        op,
        path: FilePath::new(path),
        sarg: sarg.to_string(),
        args,
        caller_uid: 500,
        caller_gid: 500,
        client: client(1),
    }
}

/// Deliver a request, drive to quiescence, and return the reply it produced.
pub fn run_op(mds: &mut TestMds, req: MClientRequest) -> Option<MClientReply> {
    let id = req.reqid;
    mds.process_message(Message::ClientRequest(req));
    mds.messenger
        .replies()
        .filter(|r| r.reqid == id)
        .last()
        .cloned()
}

pub fn mount(mds: &mut TestMds, c: &ClientInst) {
    mds.process_message(Message::ClientMount(MClientMount { client: c.clone() }));
}

pub fn unmount(mds: &mut TestMds, c: &ClientInst) {
    mds.process_message(Message::ClientUnmount(MClientUnmount {
        client: c.clone(),
    }));
}

pub fn mknod(mds: &mut TestMds, path: &str) -> MClientReply {
    run_op(
        mds,
        request(Op::Mknod, path, "", OpArgs::Mknod { mode: 0o644 }),
    )
    .expect("mknod reply")
}

pub fn mkdir(mds: &mut TestMds, path: &str) -> MClientReply {
    run_op(
        mds,
        request(Op::Mkdir, path, "", OpArgs::Mkdir { mode: 0o755 }),
    )
    .expect("mkdir reply")
}

pub fn symlink(mds: &mut TestMds, path: &str, target: &str) -> MClientReply {
    run_op(mds, request(Op::Symlink, path, target, OpArgs::None)).expect("symlink reply")
}

pub fn link(mds: &mut TestMds, newpath: &str, target: &str) -> MClientReply {
    run_op(mds, request(Op::Link, newpath, target, OpArgs::None)).expect("link reply")
}

pub fn unlink(mds: &mut TestMds, path: &str) -> MClientReply {
    run_op(mds, request(Op::Unlink, path, "", OpArgs::None)).expect("unlink reply")
}

pub fn rmdir(mds: &mut TestMds, path: &str) -> MClientReply {
    run_op(mds, request(Op::Rmdir, path, "", OpArgs::None)).expect("rmdir reply")
}

pub fn rename(mds: &mut TestMds, src: &str, dst: &str) -> MClientReply {
    run_op(mds, request(Op::Rename, src, dst, OpArgs::None)).expect("rename reply")
}

pub fn stat(mds: &mut TestMds, path: &str, mask: u32) -> MClientReply {
    run_op(mds, request(Op::Stat, path, "", OpArgs::Stat { mask })).expect("stat reply")
}

pub fn lstat(mds: &mut TestMds, path: &str, mask: u32) -> MClientReply {
    run_op(mds, request(Op::Lstat, path, "", OpArgs::Stat { mask })).expect("lstat reply")
}

pub fn readdir(mds: &mut TestMds, path: &str) -> MClientReply {
    run_op(
        mds,
        request(Op::Readdir, path, "", OpArgs::Readdir { frag: Frag::root() }),
    )
    .expect("readdir reply")
}

pub fn open(mds: &mut TestMds, path: &str, flags: u32, mode: u32) -> MClientReply {
    run_op(mds, request(Op::Open, path, "", OpArgs::Open { flags, mode })).expect("open reply")
}

pub fn chmod(mds: &mut TestMds, path: &str, mode: u32) -> MClientReply {
    run_op(mds, request(Op::Chmod, path, "", OpArgs::Chmod { mode })).expect("chmod reply")
}

pub fn chown(mds: &mut TestMds, path: &str, uid: i32, gid: i32) -> MClientReply {
    run_op(mds, request(Op::Chown, path, "", OpArgs::Chown { uid, gid })).expect("chown reply")
}

pub fn utime(mds: &mut TestMds, path: &str, mtime: u64, atime: u64) -> MClientReply {
    run_op(mds, request(Op::Utime, path, "", OpArgs::Utime { mtime, atime }))
        .expect("utime reply")
}

pub fn truncate(mds: &mut TestMds, path: &str, length: u64) -> MClientReply {
    run_op(
        mds,
        request(
            Op::Truncate,
            path,
            "",
            OpArgs::Truncate { ino: None, length },
        ),
    )
    .expect("truncate reply")
}

/// The ino a successful reply's trace ends at.
pub fn trace_ino(reply: &MClientReply) -> InodeId {
    reply.trace.last().expect("trace").stat.attr.ino
}

/// Live names in a readdir reply, sorted, "." excluded.
pub fn listing(reply: &MClientReply) -> Vec<String> {
    let mut names: Vec<String> = reply
        .dir_items
        .as_ref()
        .expect("dir items")
        .entries
        .iter()
        .map(|(n, _)| n.clone())
        .filter(|n| n != ".")
        .collect();
    names.sort();
    names
}
