// src/index/trie.rs

//! Compact radix trie over byte keys.
//!
//! Backs the per-list prefix and full-hash sets. Keys are short
//! (host hash plus a 4- or 32-byte hash), sets reach the order of 10^6
//! entries, and membership tests sit on the lookup hot path, so nodes
//! hold compressed edge labels rather than one node per byte.

use std::collections::BTreeMap;

/// A set of byte-string keys with prefix scans.
#[derive(Debug, Clone, Default)]
pub struct Trie {
    root: Node,
    len: usize,
}

#[derive(Debug, Clone, Default)]
struct Node {
    /// Edge label leading to this node; empty for the root.
    label: Vec<u8>,
    terminal: bool,
    children: BTreeMap<u8, Node>,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in the set.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a key. Returns `true` if it was not already present.
    pub fn insert(&mut self, key: &[u8]) -> bool {
        let inserted = self.root.insert(key);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    /// Remove a key. Returns `true` if it was present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let removed = self.root.remove(key);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Membership test.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.root.contains(key)
    }

    /// All keys, in lexicographic order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len);
        let mut acc = Vec::new();
        self.root.collect(&mut acc, &mut out);
        out
    }

    /// All keys starting with `prefix`, in lexicographic order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut acc = Vec::new();
        let mut node = &self.root;
        let mut remaining = prefix;
        loop {
            if remaining.is_empty() {
                node.collect(&mut acc, &mut out);
                return out;
            }
            let Some(child) = node.children.get(&remaining[0]) else {
                return out;
            };
            if remaining.len() <= child.label.len() {
                // prefix ends inside this edge
                if child.label.starts_with(remaining) {
                    acc.extend_from_slice(&child.label);
                    child.collect(&mut acc, &mut out);
                }
                return out;
            }
            if !remaining.starts_with(&child.label) {
                return out;
            }
            acc.extend_from_slice(&child.label);
            remaining = &remaining[child.label.len()..];
            node = child;
        }
    }

    /// Drop every key.
    pub fn clear(&mut self) {
        self.root = Node::default();
        self.len = 0;
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

impl Node {
    fn insert(&mut self, key: &[u8]) -> bool {
        if key.is_empty() {
            let inserted = !self.terminal;
            self.terminal = true;
            return inserted;
        }
        let Some(child) = self.children.get_mut(&key[0]) else {
            self.children.insert(
                key[0],
                Node {
                    label: key.to_vec(),
                    terminal: true,
                    children: BTreeMap::new(),
                },
            );
            return true;
        };
        let shared = common_prefix_len(&child.label, key);
        if shared == child.label.len() {
            return child.insert(&key[shared..]);
        }

        // split the edge at the divergence point
        let old = std::mem::take(child);
        let mut lower = old;
        let upper_label = lower.label[..shared].to_vec();
        lower.label = lower.label[shared..].to_vec();

        let mut mid = Node {
            label: upper_label,
            terminal: false,
            children: BTreeMap::new(),
        };
        mid.children.insert(lower.label[0], lower);
        if key.len() == shared {
            mid.terminal = true;
        } else {
            mid.children.insert(
                key[shared],
                Node {
                    label: key[shared..].to_vec(),
                    terminal: true,
                    children: BTreeMap::new(),
                },
            );
        }
        *child = mid;
        true
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        if key.is_empty() {
            let removed = self.terminal;
            self.terminal = false;
            return removed;
        }
        let Some(child) = self.children.get_mut(&key[0]) else {
            return false;
        };
        if key.len() < child.label.len() || !key.starts_with(&child.label) {
            return false;
        }
        let label_len = child.label.len();
        let removed = child.remove(&key[label_len..]);
        if removed {
            if !child.terminal && child.children.is_empty() {
                self.children.remove(&key[0]);
            } else if !child.terminal && child.children.len() == 1 {
                // collapse the pass-through node into its only child
                let mut grand = child
                    .children
                    .values_mut()
                    .next()
                    .map(std::mem::take)
                    .expect("child count checked");
                let mut label = child.label.clone();
                label.extend_from_slice(&grand.label);
                grand.label = label;
                *child = grand;
            }
        }
        removed
    }

    fn contains(&self, key: &[u8]) -> bool {
        if key.is_empty() {
            return self.terminal;
        }
        match self.children.get(&key[0]) {
            Some(child) if key.len() >= child.label.len() && key.starts_with(&child.label) => {
                child.contains(&key[child.label.len()..])
            }
            _ => false,
        }
    }

    fn collect(&self, acc: &mut Vec<u8>, out: &mut Vec<Vec<u8>>) {
        if self.terminal {
            out.push(acc.clone());
        }
        for child in self.children.values() {
            acc.extend_from_slice(&child.label);
            child.collect(acc, out);
            acc.truncate(acc.len() - child.label.len());
        }
    }
}
