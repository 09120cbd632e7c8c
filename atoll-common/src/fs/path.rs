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
use std::fmt;

/// A slash-separated file path, stored as its components. The root path has
/// depth 0. Paths are always interpreted relative to the filesystem root;
/// a leading slash is accepted and ignored on parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePath {
    components: Vec<String>,
}

impl FilePath {
    pub fn new<T: AsRef<str>>(path: T) -> Self {
        let components = path
            .as_ref()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        Self { components }
    }

    pub fn root() -> Self {
        Self { components: vec![] }
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The final path component. Empty for the root path.
    pub fn last_dentry(&self) -> &str {
        self.components.last().map(|s| s.as_str()).unwrap_or("")
    }

    /// The first `depth` components as a new path.
    pub fn prefixpath(&self, depth: usize) -> FilePath {
        let depth = depth.min(self.components.len());
        FilePath {
            components: self.components[..depth].to_vec(),
        }
    }

    /// The parent path (everything but the final component).
    pub fn parent(&self) -> FilePath {
        if self.is_root() {
            self.clone()
        } else {
            self.prefixpath(self.depth() - 1)
        }
    }

    pub fn push_dentry<T: Into<String>>(&mut self, name: T) {
        self.components.push(name.into());
    }

    pub fn get_path(&self) -> String {
        let mut out = String::new();
        for c in &self.components {
            out.push('/');
            out.push_str(c);
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    /// True if `self` is a strict path prefix of `other` ("/a" of "/a/b").
    pub fn is_prefix_of(&self, other: &FilePath) -> bool {
        self.depth() < other.depth()
            && other.components[..self.depth()] == self.components[..]
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_path())
    }
}
