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

use crate::state::{ClientId, Version};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A client identity plus the address it can be reached at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInst {
    pub id: ClientId,
    pub addr: String,
}

impl ClientInst {
    pub fn new(id: ClientId, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
        }
    }
}

/// Ordered map of mounted client sessions. The map is versioned: mutations
/// reserve the next version with [`inc_projected`](ClientMap::inc_projected)
/// before journaling and apply only from the journal finisher, so the
/// committed version trails the projected one by the number of in-flight
/// mount events.
#[derive(Debug, Clone, Default)]
pub struct ClientMap {
    mounts: BTreeMap<ClientId, ClientInst>,
    version: Version,
    projected: Version,
}

impl ClientMap {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn projected(&self) -> Version {
        self.projected
    }

    /// Reserve the next client-map version for a journaled mount event.
    pub fn inc_projected(&mut self) -> Version {
        self.projected += 1;
        self.projected
    }

    pub fn add_mount(&mut self, inst: ClientInst) {
        info!("add mount: client{} at {}", inst.id, inst.addr);
        self.mounts.insert(inst.id, inst);
        self.version += 1;
    }

    pub fn rem_mount(&mut self, client: ClientId) {
        info!("rem mount: client{}", client);
        self.mounts.remove(&client);
        self.version += 1;
    }

    pub fn is_mounted(&self, client: ClientId) -> bool {
        self.mounts.contains_key(&client)
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projected_leads_committed() {
        let mut map = ClientMap::default();
        let v1 = map.inc_projected();
        let v2 = map.inc_projected();
        assert_eq!((v1, v2), (1, 2));
        assert_eq!(map.version(), 0);

        map.add_mount(ClientInst::new(7, "client7"));
        assert_eq!(map.version(), v1);
        assert!(map.is_mounted(7));

        map.rem_mount(7);
        assert_eq!(map.version(), v2);
        assert!(map.is_empty());
    }
}
