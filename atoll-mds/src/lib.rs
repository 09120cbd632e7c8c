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

//! Request-processing core of the Atoll metadata server: client-request
//! dispatch, asynchronous path resolution, distributed dentry/inode locking,
//! write-ahead journaling, and the apply-and-reply finishers. The journal
//! backend, object store, and inter-MDS transport are consumed through the
//! [`journal::JournalWriter`], [`store::MetaStore`], and
//! [`messenger::Messenger`] traits.

pub mod balancer;
pub mod cache;
pub mod journal;
pub mod locker;
pub mod mds;
pub mod messenger;
pub mod server;
pub mod store;

pub use mds::{Cont, Event, Mds, MdsState};
