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

use atoll_common::proto::{ClientMsg, MClientReply, Message};
use atoll_common::state::{ClientInst, PeerId};

/// Outbound transport boundary. Framing, addressing, and delivery live in the
/// messenger subsystem; the core only hands it decoded payloads.
pub trait Messenger {
    fn send_client(&mut self, client: &ClientInst, msg: ClientMsg);
    fn send_peer(&mut self, peer: PeerId, msg: Message);
}

/// In-process messenger that records everything sent. Serves unit tests and
/// single-process harnesses.
#[derive(Debug, Default)]
pub struct VecMessenger {
    pub client_msgs: Vec<(ClientInst, ClientMsg)>,
    pub peer_msgs: Vec<(PeerId, Message)>,
}

impl VecMessenger {
    pub fn replies(&self) -> impl Iterator<Item = &MClientReply> {
        self.client_msgs.iter().filter_map(|(_, m)| match m {
            ClientMsg::Reply(r) => Some(r),
            _ => None,
        })
    }

    pub fn last_reply(&self) -> Option<&MClientReply> {
        self.replies().last()
    }

    pub fn reply_count(&self) -> usize {
        self.replies().count()
    }

    pub fn take_peer_msgs(&mut self) -> Vec<(PeerId, Message)> {
        std::mem::take(&mut self.peer_msgs)
    }
}

impl Messenger for VecMessenger {
    fn send_client(&mut self, client: &ClientInst, msg: ClientMsg) {
        self.client_msgs.push((client.clone(), msg));
    }

    fn send_peer(&mut self, peer: PeerId, msg: Message) {
        self.peer_msgs.push((peer, msg));
    }
}
