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

use atoll_common::state::{DirFragId, InodeAttr, InodeId, PeerId};
use atoll_common::FsResult;
use fxhash::FxHashMap;

/// Dentry linkage as fetched from the object store.
#[derive(Debug, Clone)]
pub enum FetchedLink {
    Primary {
        attr: InodeAttr,
        symlink: Option<String>,
    },
    Remote(InodeId),
}

#[derive(Debug, Clone)]
pub struct FetchedDentry {
    pub name: String,
    pub link: FetchedLink,
}

#[derive(Debug, Clone)]
pub struct FetchedDir {
    pub auth: PeerId,
    pub entries: Vec<FetchedDentry>,
}

#[derive(Debug, Clone)]
pub struct FetchedInode {
    pub attr: InodeAttr,
    pub symlink: Option<String>,
    pub auth: PeerId,
}

/// Read side of the object store / peer-discovery boundary: dirfrag fill and
/// remote inode open. Commit is journal-driven and out of scope here.
pub trait MetaStore {
    fn fetch_dirfrag(&mut self, df: DirFragId) -> FsResult<Option<FetchedDir>>;
    fn fetch_inode(&mut self, ino: InodeId) -> FsResult<Option<FetchedInode>>;
}

/// Preloadable in-memory store for tests and single-process setups.
#[derive(Debug, Default)]
pub struct MemStore {
    dirs: FxHashMap<DirFragId, FetchedDir>,
    inodes: FxHashMap<InodeId, FetchedInode>,
    pub dir_fetches: u64,
    pub inode_fetches: u64,
}

impl MemStore {
    pub fn put_dir(&mut self, df: DirFragId, dir: FetchedDir) {
        self.dirs.insert(df, dir);
    }

    pub fn put_inode(&mut self, ino: InodeId, inode: FetchedInode) {
        self.inodes.insert(ino, inode);
    }
}

impl MetaStore for MemStore {
    fn fetch_dirfrag(&mut self, df: DirFragId) -> FsResult<Option<FetchedDir>> {
        self.dir_fetches += 1;
        Ok(self.dirs.get(&df).cloned())
    }

    fn fetch_inode(&mut self, ino: InodeId) -> FsResult<Option<FetchedInode>> {
        self.inode_fetches += 1;
        Ok(self.inodes.get(&ino).cloned())
    }
}
