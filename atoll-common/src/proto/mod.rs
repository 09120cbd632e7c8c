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

//! Wire message types. Framing is the messenger's concern; these are the
//! decoded payloads the core consumes and produces.

use crate::fs::FilePath;
use crate::state::{
    ClientInst, DirFragId, FileMode, Frag, InodeId, InodeStat, PeerId, ReqId, Version,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

// Open flags understood by the open/openc handlers.
pub const O_CREAT: u32 = 0o100;
pub const O_EXCL: u32 = 0o200;

/// Client operation codes as they appear on the wire.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum Op {
    Open = 1,
    Truncate = 2,
    Release = 3,
    Fsync = 4,
    Stat = 5,
    Lstat = 6,
    Utime = 7,
    Chmod = 8,
    Chown = 9,
    Readdir = 10,
    Mknod = 11,
    Mkdir = 12,
    Symlink = 13,
    Link = 14,
    Unlink = 15,
    Rmdir = 16,
    Rename = 17,
}

/// Per-op argument payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpArgs {
    None,
    Open { flags: u32, mode: u32 },
    Truncate { ino: Option<InodeId>, length: u64 },
    Fsync { ino: InodeId },
    Release { ino: InodeId },
    Stat { mask: u32 },
    Utime { mtime: u64, atime: u64 },
    Chmod { mode: FileMode },
    Chown { uid: i32, gid: i32 },
    Readdir { frag: Frag },
    Mknod { mode: FileMode },
    Mkdir { mode: FileMode },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MClientMount {
    pub client: ClientInst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MClientUnmount {
    pub client: ClientInst,
}

/// Acks a mount, bundling the maps the client needs to start issuing I/O.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MClientMountAck {
    pub client: ClientInst,
    pub mds_map_epoch: u64,
    pub osd_map_epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MClientRequest {
    pub reqid: ReqId,
    pub op: Op,
    pub path: FilePath,
    // String argument: symlink target, link target path, rename destination.
    pub sarg: String,
    pub args: OpArgs,
    pub caller_uid: u32,
    pub caller_gid: u32,
    pub client: ClientInst,
}

/// One step of a reply trace: the dentry name and the inode behind it,
/// root-first down to the reference inode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceItem {
    pub dname: String,
    pub stat: InodeStat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirItems {
    pub frag: Frag,
    pub entries: Vec<(String, InodeStat)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MClientReply {
    pub reqid: ReqId,
    pub op: Op,
    // 0 on success, negated POSIX errno on failure.
    pub result: i32,
    pub trace: Vec<TraceItem>,
    pub caps: Option<u32>,
    pub caps_seq: Option<u64>,
    pub file_data_version: Option<Version>,
    pub dir_items: Option<DirItems>,
}

impl MClientReply {
    pub fn new(req: &MClientRequest, result: i32) -> Self {
        Self {
            reqid: req.reqid,
            op: req.op,
            result,
            trace: vec![],
            caps: None,
            caps_seq: None,
            file_data_version: None,
            dir_items: None,
        }
    }
}

/// Messages sent from the server back to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMsg {
    MountAck(MClientMountAck),
    // Unmount acks echo the request back to the client.
    UnmountAck(MClientUnmount),
    Reply(MClientReply),
}

/// Inter-MDS messages consumed by the core. The wire layout belongs to the
/// messenger; these are the hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMsg {
    /// Ask the dentry authority to xlock (name, dirfrag) for `reqid`.
    /// `file_only` refuses to lock a directory dentry, which rename relies on
    /// when its view of the destination may be stale.
    DentryXlockRequest {
        dirfrag: DirFragId,
        name: String,
        file_only: bool,
        reqid: ReqId,
        from: PeerId,
    },
    DentryXlockGrant {
        dirfrag: DirFragId,
        name: String,
        reqid: ReqId,
    },
    /// Requester is done with a granted xlock; the authority clears the
    /// holder of record.
    DentryXlockRelease {
        dirfrag: DirFragId,
        name: String,
        reqid: ReqId,
    },
    DentryUnlink {
        dirfrag: DirFragId,
        name: String,
    },
    RenameNotify {
        src: DirFragId,
        srcname: String,
        dest: DirFragId,
        destname: String,
    },
}

/// Everything a peer can deliver to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    ClientMount(MClientMount),
    ClientUnmount(MClientUnmount),
    ClientRequest(MClientRequest),
    PeerLock(PeerMsg),
}

#[cfg(test)]
mod tests {
    use super::Op;

    #[test]
    fn op_codes_round_trip() {
        for code in 1u8..=17 {
            let op = Op::try_from(code).unwrap();
            assert_eq!(u8::from(op), code);
        }
        // Unknown op codes fail decode; the dispatcher treats them as fatal.
        assert!(Op::try_from(0u8).is_err());
        assert!(Op::try_from(18u8).is_err());
    }
}
