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

//! Mount controller: client sessions come and go only through journaled
//! EMount events. The finisher applies the map change after sync and acks
//! the client.

use crate::journal::LogEvent;
use crate::mds::Mds;
use crate::messenger::Messenger;
use crate::server::finisher::Finisher;
use crate::store::MetaStore;
use atoll_common::proto::{MClientMount, MClientUnmount};
use log::info;

impl<M: Messenger, S: MetaStore> Mds<M, S> {
    pub fn handle_client_mount(&mut self, m: MClientMount) {
        info!(
            "mount by client{} oldv {}",
            m.client.id,
            self.clientmap.version()
        );

        let cmapv = self.clientmap.inc_projected();
        self.mdlog.submit_entry(LogEvent::EMount {
            client: m.client.clone(),
            mount: true,
            version: cmapv,
        });
        self.mdlog.wait_for_sync(Finisher::Mount {
            client: m.client,
            mount: true,
            cmapv,
        });
    }

    pub fn handle_client_unmount(&mut self, m: MClientUnmount) {
        info!(
            "unmount by client{} oldv {}",
            m.client.id,
            self.clientmap.version()
        );

        let cmapv = self.clientmap.inc_projected();
        self.mdlog.submit_entry(LogEvent::EMount {
            client: m.client.clone(),
            mount: false,
            version: cmapv,
        });
        self.mdlog.wait_for_sync(Finisher::Mount {
            client: m.client,
            mount: false,
            cmapv,
        });
    }
}
