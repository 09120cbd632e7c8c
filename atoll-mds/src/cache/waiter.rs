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

use crate::mds::Cont;
use fxhash::FxHashMap;
use std::collections::VecDeque;

/// What a parked continuation is waiting for on a dirfrag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WaitKind {
    /// The frag thawed.
    Unfreeze,
    /// The frag became auth-pinnable again.
    AuthPinnable,
    /// A fetch filled the frag to completeness.
    Complete,
    /// The named dentry became readable (xlock released).
    DentryRead(String),
}

/// Named FIFO wait lists attached to a cache entry. Grants are delivered in
/// enqueue order.
#[derive(Debug, Default)]
pub struct WaitList {
    unfreeze: VecDeque<Cont>,
    authpin: VecDeque<Cont>,
    complete: VecDeque<Cont>,
    dnread: FxHashMap<String, VecDeque<Cont>>,
}

impl WaitList {
    pub fn add(&mut self, kind: WaitKind, cont: Cont) {
        match kind {
            WaitKind::Unfreeze => self.unfreeze.push_back(cont),
            WaitKind::AuthPinnable => self.authpin.push_back(cont),
            WaitKind::Complete => self.complete.push_back(cont),
            WaitKind::DentryRead(name) => {
                self.dnread.entry(name).or_default().push_back(cont)
            }
        }
    }

    /// Drain every continuation parked on `kind`, preserving FIFO order.
    pub fn take(&mut self, kind: WaitKind) -> Vec<Cont> {
        match kind {
            WaitKind::Unfreeze => self.unfreeze.drain(..).collect(),
            WaitKind::AuthPinnable => self.authpin.drain(..).collect(),
            WaitKind::Complete => self.complete.drain(..).collect(),
            WaitKind::DentryRead(name) => self
                .dnread
                .remove(&name)
                .map(|q| q.into_iter().collect())
                .unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.unfreeze.is_empty()
            && self.authpin.is_empty()
            && self.complete.is_empty()
            && self.dnread.values().all(|q| q.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::{WaitKind, WaitList};
    use crate::mds::Cont;

    #[test]
    fn fifo_per_list() {
        let mut wl = WaitList::default();
        wl.add(WaitKind::Complete, Cont::RetryRequest(1));
        wl.add(WaitKind::Complete, Cont::RetryRequest(2));
        wl.add(WaitKind::Unfreeze, Cont::RetryRequest(3));

        let drained = wl.take(WaitKind::Complete);
        assert_eq!(drained, vec![Cont::RetryRequest(1), Cont::RetryRequest(2)]);
        assert!(!wl.is_empty());
        assert_eq!(wl.take(WaitKind::Unfreeze), vec![Cont::RetryRequest(3)]);
        assert!(wl.is_empty());
    }

    #[test]
    fn per_name_waits_are_independent() {
        let mut wl = WaitList::default();
        wl.add(WaitKind::DentryRead("a".into()), Cont::RetryRequest(1));
        wl.add(WaitKind::DentryRead("b".into()), Cont::RetryRequest(2));

        assert_eq!(
            wl.take(WaitKind::DentryRead("a".into())),
            vec![Cont::RetryRequest(1)]
        );
        assert_eq!(
            wl.take(WaitKind::DentryRead("b".into())),
            vec![Cont::RetryRequest(2)]
        );
        assert!(wl.take(WaitKind::DentryRead("a".into())).is_empty());
    }
}
