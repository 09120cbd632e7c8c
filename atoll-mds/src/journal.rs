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

//! Write-ahead journal interface: submit an entry, then park a finisher on
//! the sync barrier. Entries appear in submit order; finishers fire in that
//! order once their entry is durable. The storage backend is external and
//! consumed through [`JournalWriter`].

use crate::cache::DentryKey;
use crate::server::finisher::Finisher;
use atoll_common::state::{ClientInst, DirFragId, InodeAttr, InodeId, Version};
use atoll_common::FsResult;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One step of a [`MetaBlob`]: replay reapplies these in order to reproduce
/// the in-memory mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaBlobOp {
    /// Dirfrag chain from the root down to a touched directory.
    DirContext { chain: Vec<DirFragId> },
    PrimaryDentry {
        key: DentryKey,
        dirty: bool,
        inode: InodeAttr,
        symlink: Option<String>,
    },
    RemoteDentry {
        key: DentryKey,
        dirty: bool,
        ino: InodeId,
    },
    NullDentry {
        key: DentryKey,
        dirty: bool,
    },
    /// A freshly opened dirfrag (mkdir).
    Dir { df: DirFragId, dirty: bool },
    /// Attribute update on an inode with no parent dentry (the root).
    RootInode { inode: InodeAttr },
    DestroyedInode { inode: InodeAttr },
}

/// Ordered payload of an `EUpdate`: directory context chains, dentry payloads
/// with embedded inodes, and destroyed-inode records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaBlob {
    ops: Vec<MetaBlobOp>,
}

impl MetaBlob {
    pub fn add_dir_context(&mut self, chain: Vec<DirFragId>) {
        self.ops.push(MetaBlobOp::DirContext { chain });
    }

    /// Append a primary dentry payload and hand back the embedded inode for
    /// the caller to fill in the projected delta.
    pub fn add_primary_dentry(
        &mut self,
        key: &DentryKey,
        dirty: bool,
        inode: InodeAttr,
        symlink: Option<String>,
    ) -> &mut InodeAttr {
        self.ops.push(MetaBlobOp::PrimaryDentry {
            key: key.clone(),
            dirty,
            inode,
            symlink,
        });
        match self.ops.last_mut() {
            Some(MetaBlobOp::PrimaryDentry { inode, .. }) => inode,
            _ => unreachable!(),
        }
    }

    pub fn add_remote_dentry(&mut self, key: &DentryKey, dirty: bool, ino: InodeId) {
        self.ops.push(MetaBlobOp::RemoteDentry {
            key: key.clone(),
            dirty,
            ino,
        });
    }

    pub fn add_null_dentry(&mut self, key: &DentryKey, dirty: bool) {
        self.ops.push(MetaBlobOp::NullDentry {
            key: key.clone(),
            dirty,
        });
    }

    pub fn add_dir(&mut self, df: DirFragId, dirty: bool) {
        self.ops.push(MetaBlobOp::Dir { df, dirty });
    }

    pub fn add_root_inode(&mut self, inode: InodeAttr) {
        self.ops.push(MetaBlobOp::RootInode { inode });
    }

    pub fn add_destroyed_inode(&mut self, inode: InodeAttr) {
        self.ops.push(MetaBlobOp::DestroyedInode { inode });
    }

    pub fn ops(&self) -> &[MetaBlobOp] {
        &self.ops
    }
}

/// Journal entries produced by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEvent {
    /// Placeholder marker entry.
    EString(String),
    EMount {
        client: ClientInst,
        mount: bool,
        version: Version,
    },
    EUpdate {
        name: String,
        metablob: MetaBlob,
    },
}

impl LogEvent {
    pub fn name(&self) -> &str {
        match self {
            LogEvent::EString(_) => "estring",
            LogEvent::EMount { .. } => "emount",
            LogEvent::EUpdate { name, .. } => name,
        }
    }
}

/// Storage backend for the journal stream. Append must preserve submit
/// order; flush returns once everything appended so far is durable.
pub trait JournalWriter {
    fn append(&mut self, entry: &LogEvent) -> FsResult<()>;
    fn flush(&mut self) -> FsResult<()>;
}

/// Backend used when journaling is disabled or kept in process.
#[derive(Debug, Default)]
pub struct NoopWriter;

impl JournalWriter for NoopWriter {
    fn append(&mut self, _entry: &LogEvent) -> FsResult<()> {
        Ok(())
    }

    fn flush(&mut self) -> FsResult<()> {
        Ok(())
    }
}

pub struct MdLog {
    enabled: bool,
    seq: u64,
    synced: u64,
    entries: Vec<LogEvent>,
    waiters: VecDeque<(u64, Finisher)>,
    writer: Box<dyn JournalWriter>,
}

impl MdLog {
    pub fn new(enabled: bool, writer: Box<dyn JournalWriter>) -> Self {
        Self {
            enabled,
            seq: 0,
            synced: 0,
            entries: vec![],
            waiters: VecDeque::new(),
            writer,
        }
    }

    /// Submit an entry to the journal stream.
    pub fn submit_entry(&mut self, entry: LogEvent) {
        self.seq += 1;
        if self.enabled {
            // A journal write failure is an invariant violation; abort.
            self.writer
                .append(&entry)
                .expect("journal append failed");
            self.entries.push(entry);
        }
    }

    /// Park a finisher on the sync barrier for everything submitted so far.
    pub fn wait_for_sync(&mut self, fin: Finisher) {
        self.waiters.push_back((self.seq, fin));
    }

    /// Make submitted entries durable and return the finishers whose entries
    /// now are, in submit order.
    pub fn sync(&mut self) -> Vec<Finisher> {
        if self.synced < self.seq {
            if self.enabled {
                self.writer.flush().expect("journal sync failed");
            }
            self.synced = self.seq;
        }
        let mut ready = vec![];
        while let Some((s, _)) = self.waiters.front() {
            if *s <= self.synced {
                let (_, fin) = self.waiters.pop_front().unwrap();
                ready.push(fin);
            } else {
                break;
            }
        }
        ready
    }

    pub fn has_pending(&self) -> bool {
        self.synced < self.seq || !self.waiters.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[LogEvent] {
        &self.entries
    }

    /// Drain captured entries, for tests that inspect the journal stream.
    pub fn take_entries(&mut self) -> Vec<LogEvent> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::finisher::Finisher;
    use atoll_common::state::ClientInst;

    fn mount_entry(v: u64) -> LogEvent {
        LogEvent::EMount {
            client: ClientInst::new(1, "c1"),
            mount: true,
            version: v,
        }
    }

    #[test]
    fn finishers_fire_in_submit_order_after_sync() {
        let mut log = MdLog::new(true, Box::new(NoopWriter));
        log.submit_entry(mount_entry(1));
        log.wait_for_sync(Finisher::Mount {
            client: ClientInst::new(1, "c1"),
            mount: true,
            cmapv: 1,
        });
        log.submit_entry(mount_entry(2));
        log.wait_for_sync(Finisher::Mount {
            client: ClientInst::new(2, "c2"),
            mount: true,
            cmapv: 2,
        });

        let ready = log.sync();
        assert_eq!(ready.len(), 2);
        match &ready[0] {
            Finisher::Mount { cmapv, .. } => assert_eq!(*cmapv, 1),
            other => panic!("unexpected finisher {:?}", other),
        }
        assert!(!log.has_pending());
    }

    #[test]
    fn disabled_log_still_drives_finishers() {
        let mut log = MdLog::new(false, Box::new(NoopWriter));
        log.submit_entry(mount_entry(1));
        log.wait_for_sync(Finisher::Mount {
            client: ClientInst::new(1, "c1"),
            mount: true,
            cmapv: 1,
        });
        assert_eq!(log.entry_count(), 0);
        assert_eq!(log.sync().len(), 1);
    }

    #[test]
    fn metablob_primary_dentry_returns_embedded_inode() {
        let mut blob = MetaBlob::default();
        let key = DentryKey::new(DirFragId::root_of(1), "a");
        let pi = blob.add_primary_dentry(&key, true, InodeAttr::default(), None);
        pi.mtime = 42;
        match &blob.ops()[0] {
            MetaBlobOp::PrimaryDentry { inode, .. } => assert_eq!(inode.mtime, 42),
            other => panic!("unexpected op {:?}", other),
        }
    }
}
