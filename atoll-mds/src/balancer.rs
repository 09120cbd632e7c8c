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

use atoll_common::state::{DirFragId, InodeId};
use fxhash::FxHashMap;

/// Popularity kinds tracked for inode hits; directory writes go through
/// [`Balancer::hit_dir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaPop {
    /// Inode read.
    IRd,
    /// Inode write.
    IWr,
}

/// Popularity counters consumed by the load balancer, which itself lives
/// outside this core. Handlers record hits; the balancer reads them.
#[derive(Debug, Default)]
pub struct Balancer {
    inode_reads: FxHashMap<InodeId, u64>,
    inode_writes: FxHashMap<InodeId, u64>,
    dir_writes: FxHashMap<DirFragId, u64>,
}

impl Balancer {
    pub fn hit_inode(&mut self, ino: InodeId, pop: MetaPop) {
        match pop {
            MetaPop::IRd => *self.inode_reads.entry(ino).or_default() += 1,
            MetaPop::IWr => *self.inode_writes.entry(ino).or_default() += 1,
        }
    }

    pub fn hit_dir(&mut self, df: DirFragId) {
        *self.dir_writes.entry(df).or_default() += 1;
    }

    pub fn inode_reads(&self, ino: InodeId) -> u64 {
        self.inode_reads.get(&ino).copied().unwrap_or(0)
    }

    pub fn inode_writes(&self, ino: InodeId) -> u64 {
        self.inode_writes.get(&ino).copied().unwrap_or(0)
    }

    pub fn dir_writes(&self, df: DirFragId) -> u64 {
        self.dir_writes.get(&df).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Balancer, MetaPop};
    use atoll_common::state::DirFragId;

    #[test]
    fn counters_accumulate() {
        let mut b = Balancer::default();
        b.hit_inode(7, MetaPop::IRd);
        b.hit_inode(7, MetaPop::IRd);
        b.hit_inode(7, MetaPop::IWr);
        let df = DirFragId::root_of(1);
        b.hit_dir(df);

        assert_eq!(b.inode_reads(7), 2);
        assert_eq!(b.inode_writes(7), 1);
        assert_eq!(b.dir_writes(df), 1);
        assert_eq!(b.inode_reads(8), 0);
    }
}
