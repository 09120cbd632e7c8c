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

use serde::{Deserialize, Serialize};

/// Cluster-wide configuration shared by every peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConf {
    pub mds: MdsConf,

    // Number of metadata servers in the cluster map.
    pub mds_count: u32,

    // Testing mode disables background behavior and keeps everything
    // deterministic for unit tests.
    pub testing: bool,
}

impl Default for ClusterConf {
    fn default() -> Self {
        Self {
            mds: MdsConf::default(),
            mds_count: 1,
            testing: false,
        }
    }
}

impl ClusterConf {
    pub fn testing() -> Self {
        ClusterConf {
            testing: true,
            ..Default::default()
        }
    }
}

/// Metadata server configuration honored by the request-processing core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MdsConf {
    // Journal mutations at all. Turning this off is only sensible in tests.
    pub log: bool,

    // Safe mode: a mutation's journal entry must sync before the client sees
    // the reply. Turning this off trades correctness for latency.
    pub log_before_reply: bool,

    // Begin orderly shutdown when the last client unmounts.
    pub shutdown_on_last_unmount: bool,

    pub debug: i32,
    pub debug_mds: i32,
}

impl Default for MdsConf {
    fn default() -> Self {
        Self {
            log: true,
            log_before_reply: true,
            shutdown_on_last_unmount: false,
            debug: 0,
            debug_mds: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe_mode() {
        let conf = ClusterConf::default();
        assert!(conf.mds.log);
        assert!(conf.mds.log_before_reply);
        assert!(!conf.mds.shutdown_on_last_unmount);
        assert_eq!(conf.mds_count, 1);
    }
}
