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

mod attr;
mod client_map;
mod frag;

pub use attr::{FileMode, InodeAttr, InodeStat};
pub use client_map::{ClientInst, ClientMap};
pub use frag::{DirFragId, Frag, FragTree};

/// Globally unique inode number.
pub type InodeId = u64;

/// Client identity, unique within the cluster.
pub type ClientId = u64;

/// Rank of a metadata server in the cluster map.
pub type PeerId = u32;

/// Client request identity; unique per live request.
pub type ReqId = u64;

/// Monotonic per-object version counter.
pub type Version = u64;

pub const ROOT_INO: InodeId = 1;

// Mode type bits, POSIX style.
pub const MODE_TYPE_MASK: u32 = 0o170000;
pub const MODE_FILE: u32 = 0o100000;
pub const MODE_DIR: u32 = 0o040000;
pub const MODE_SYMLINK: u32 = 0o120000;

// chmod may touch permission and setuid/sticky bits only.
pub const MODE_CHMOD_MASK: u32 = 0o4777;

// File open modes carried by open requests. Only read and lazy modes may be
// served from a non-authoritative replica.
pub const FILE_MODE_R: u32 = 1;
pub const FILE_MODE_RW: u32 = 2;
pub const FILE_MODE_W: u32 = 3;
pub const FILE_MODE_LAZY: u32 = 4;

// Stat mask bits; size/mtime/atime live under the file lock.
pub const STAT_MASK_SIZE: u32 = 0x1;
pub const STAT_MASK_MTIME: u32 = 0x2;
pub const STAT_MASK_ATIME: u32 = 0x4;
pub const STAT_MASK_MODE: u32 = 0x8;
pub const STAT_MASK_OWNER: u32 = 0x10;

pub const STAT_MASK_FILE: u32 = STAT_MASK_SIZE | STAT_MASK_MTIME | STAT_MASK_ATIME;
