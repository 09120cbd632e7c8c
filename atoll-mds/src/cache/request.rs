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

use crate::cache::inode::DentryKey;
use atoll_common::proto::MClientRequest;
use atoll_common::state::{InodeId, ReqId};

/// Per-request mutable state, alive from `request_start` to
/// `request_finish`. Retry continuations re-enter the handler from the top;
/// everything acquired so far is recorded here so re-entry is idempotent and
/// teardown can release it all.
#[derive(Debug)]
pub struct MdRequest {
    pub id: ReqId,
    pub msg: MClientRequest,
    /// Resolved reference inode.
    pub ref_ino: Option<InodeId>,
    /// Dentry trace from the admission-time traversal.
    pub trace: Vec<DentryKey>,
    /// Pinned inodes; released at teardown.
    pub pins: Vec<InodeId>,
    /// Dentry xlocks held by this request.
    pub xlocks: Vec<DentryKey>,
}

impl MdRequest {
    pub fn new(msg: MClientRequest, ref_ino: Option<InodeId>, trace: Vec<DentryKey>) -> Self {
        Self {
            id: msg.reqid,
            msg,
            ref_ino,
            trace,
            pins: vec![],
            xlocks: vec![],
        }
    }

    pub fn add_xlock(&mut self, key: DentryKey) {
        if !self.xlocks.contains(&key) {
            self.xlocks.push(key);
        }
    }

    pub fn drop_xlock(&mut self, key: &DentryKey) {
        self.xlocks.retain(|k| k != key);
    }

    pub fn add_pin(&mut self, ino: InodeId) -> bool {
        if self.pins.contains(&ino) {
            false
        } else {
            self.pins.push(ino);
            true
        }
    }
}
