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

use crate::state::InodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One shard of a directory's hash space: the `bits`-bit prefix `value` of the
/// 32-bit name hash. `Frag::root()` covers the whole space.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Frag {
    pub bits: u8,
    pub value: u32,
}

impl Frag {
    pub fn root() -> Frag {
        Frag { bits: 0, value: 0 }
    }

    pub fn new(bits: u8, value: u32) -> Frag {
        debug_assert!(bits <= 32);
        Frag { bits, value }
    }

    /// Does this frag own the given name hash?
    pub fn contains(&self, hash: u32) -> bool {
        if self.bits == 0 {
            true
        } else {
            (hash >> (32 - self.bits as u32)) == self.value
        }
    }

    /// Split this frag into its two children, one more prefix bit each.
    pub fn split(&self) -> (Frag, Frag) {
        let bits = self.bits + 1;
        (
            Frag::new(bits, self.value << 1),
            Frag::new(bits, (self.value << 1) | 1),
        )
    }
}

impl fmt::Display for Frag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}/{}", self.value, self.bits)
    }
}

/// Identity of a cached dirfrag: owning directory inode plus the frag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DirFragId {
    pub ino: InodeId,
    pub frag: Frag,
}

impl DirFragId {
    pub fn new(ino: InodeId, frag: Frag) -> Self {
        Self { ino, frag }
    }

    pub fn root_of(ino: InodeId) -> Self {
        Self {
            ino,
            frag: Frag::root(),
        }
    }
}

impl fmt::Display for DirFragId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.ino, self.frag)
    }
}

/// Per-inode map from hash-space prefix to the frag owning it. Leaves must
/// partition the hash space; the default tree is the single root frag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragTree {
    leaves: Vec<Frag>,
}

impl Default for FragTree {
    fn default() -> Self {
        Self {
            leaves: vec![Frag::root()],
        }
    }
}

impl FragTree {
    /// Stable 32-bit name hash. FxHash is a pure function of the bytes and
    /// identical on every peer, which `pick` relies on.
    pub fn hash_name(name: &str) -> u32 {
        fxhash::hash32(name.as_bytes())
    }

    /// The leaf frag owning `name`.
    pub fn pick(&self, name: &str) -> Frag {
        let h = Self::hash_name(name);
        for leaf in &self.leaves {
            if leaf.contains(h) {
                return *leaf;
            }
        }
        // Leaves partition the hash space; a miss means a corrupt tree.
        panic!("fragtree has no leaf for hash {:#x}", h);
    }

    pub fn leaves(&self) -> &[Frag] {
        &self.leaves
    }

    pub fn contains_leaf(&self, frag: Frag) -> bool {
        self.leaves.contains(&frag)
    }

    /// Replace a leaf with its two children.
    pub fn split_leaf(&mut self, frag: Frag) {
        if let Some(pos) = self.leaves.iter().position(|f| *f == frag) {
            let (a, b) = frag.split();
            self.leaves.remove(pos);
            self.leaves.push(a);
            self.leaves.push(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_is_stable() {
        let tree = FragTree::default();
        let f1 = tree.pick("alpha");
        let f2 = tree.pick("alpha");
        assert_eq!(f1, f2);
        assert_eq!(f1, Frag::root());
    }

    #[test]
    fn split_partitions_hash_space() {
        let mut tree = FragTree::default();
        tree.split_leaf(Frag::root());
        assert_eq!(tree.leaves().len(), 2);

        for name in ["a", "b", "some/longer-name", "x.y.z"] {
            let h = FragTree::hash_name(name);
            let owners = tree.leaves().iter().filter(|f| f.contains(h)).count();
            assert_eq!(owners, 1, "name {} owned by {} leaves", name, owners);
        }
    }

    #[test]
    fn frag_contains() {
        let (a, b) = Frag::root().split();
        assert!(a.contains(0x0000_0001));
        assert!(!a.contains(0x8000_0001));
        assert!(b.contains(0xffff_0000));
    }
}
