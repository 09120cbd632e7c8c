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

use crate::state::{InodeId, Version, MODE_DIR, MODE_FILE, MODE_SYMLINK, MODE_TYPE_MASK};
use serde::{Deserialize, Serialize};

pub type FileMode = u32;

/// The journaled per-inode attribute block. This is what mutation deltas are
/// expressed against and what replay reapplies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeAttr {
    pub ino: InodeId,
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub mtime: u64,
    pub atime: u64,
    pub ctime: u64,
    // Object layout tag, opaque to the metadata core.
    pub layout: u32,
    pub version: Version,
}

impl InodeAttr {
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_DIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_FILE
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_SYMLINK
    }

    pub fn set_type(&mut self, type_bits: FileMode) {
        self.mode = (self.mode & !MODE_TYPE_MASK) | type_bits;
    }
}

/// Inode view shipped to clients in traces, readdir payloads, and stat
/// replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeStat {
    pub attr: InodeAttr,
    pub symlink: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MODE_DIR, MODE_FILE};

    #[test]
    fn type_bits() {
        let mut attr = InodeAttr {
            mode: 0o644,
            ..Default::default()
        };
        attr.set_type(MODE_FILE);
        assert!(attr.is_file());
        assert_eq!(attr.mode & 0o777, 0o644);

        attr.set_type(MODE_DIR);
        assert!(attr.is_dir());
        assert!(!attr.is_file());
    }
}
