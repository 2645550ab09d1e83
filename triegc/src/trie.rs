//! Trie - fixed-length byte keys mapped to payloads
//!
//! A 256-ary prefix tree whose depth equals the key length `N`. Every key
//! occupies exactly one path of `N` edges from the root, and payloads live only
//! on the terminal node of that path.
//!
//! Lookups walk at most `N` nodes and never allocate, which is what makes the
//! trie usable as the probe structure during a conservative stack scan: a scan
//! performs one speculative lookup per scanned byte.

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

/// Number of child slots per node, one per possible byte value
const FANOUT: usize = 256;

struct TrieNode<V> {
    /// Child nodes indexed by the next key byte
    children: [Option<Box<TrieNode<V>>>; FANOUT],
    /// Number of occupied child slots
    num_children: u16,
    /// Payload, only ever set on nodes at depth `N`
    value: Option<V>,
}

impl<V> TrieNode<V> {
    fn new() -> TrieNode<V> {
        TrieNode {
            children: core::array::from_fn(|_| None),
            num_children: 0,
            value: None,
        }
    }

    #[inline]
    fn child(&self, byte: u8) -> Option<&TrieNode<V>> {
        self.children[byte as usize].as_deref()
    }

    #[inline]
    fn child_mut(&mut self, byte: u8) -> Option<&mut TrieNode<V>> {
        self.children[byte as usize].as_deref_mut()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.num_children == 0 && self.value.is_none()
    }
}

/// Exact-match map from `[u8; N]` keys to values of type `V`.
pub struct Trie<V, const N: usize> {
    root: Box<TrieNode<V>>,
    /// Number of stored keys
    len: usize,
    /// Number of allocated nodes, including the root
    num_nodes: usize,
}

impl<V, const N: usize> Trie<V, N> {
    /// Create an empty trie consisting of only the root node
    pub fn new() -> Trie<V, N> {
        Trie {
            root: Box::new(TrieNode::new()),
            len: 0,
            num_nodes: 1,
        }
    }

    /// Number of keys stored in the trie
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of nodes currently allocated, including the root
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Insert a value for `key`, creating intermediate nodes as needed.
    ///
    /// Returns the value previously stored under `key`, if there was one.
    pub fn insert(&mut self, key: &[u8; N], value: V) -> Option<V> {
        let mut node = &mut *self.root;

        for &byte in key.iter() {
            let index = byte as usize;
            if node.children[index].is_none() {
                node.num_children += 1;
                self.num_nodes += 1;
            }

            node = &mut **node.children[index].get_or_insert_with(|| Box::new(TrieNode::new()));
        }

        let old_value = node.value.replace(value);
        if old_value.is_none() {
            self.len += 1;
        }

        old_value
    }

    /// Look up the value stored under `key`.
    ///
    /// Stops at the first missing node and never modifies the trie.
    #[inline]
    pub fn get(&self, key: &[u8; N]) -> Option<&V> {
        let mut node = &*self.root;
        for &byte in key.iter() {
            node = node.child(byte)?;
        }

        node.value.as_ref()
    }

    /// Look up a mutable reference to the value stored under `key`
    #[inline]
    pub fn get_mut(&mut self, key: &[u8; N]) -> Option<&mut V> {
        let mut node = &mut *self.root;
        for &byte in key.iter() {
            node = node.child_mut(byte)?;
        }

        node.value.as_mut()
    }

    #[inline]
    pub fn contains_key(&self, key: &[u8; N]) -> bool {
        self.get(key).is_some()
    }

    /// Remove the value stored under `key`, returning it.
    ///
    /// Nodes left without a value and without children are freed, so a trie
    /// that had a key inserted and removed again holds the same nodes as before.
    pub fn remove(&mut self, key: &[u8; N]) -> Option<V> {
        let mut freed_nodes = 0;
        let value = Self::remove_from(&mut self.root, key, &mut freed_nodes)?;

        self.len -= 1;
        self.num_nodes -= freed_nodes;

        Some(value)
    }

    fn remove_from(node: &mut TrieNode<V>, key: &[u8], freed_nodes: &mut usize) -> Option<V> {
        let (&byte, rest) = match key.split_first() {
            Some(split) => split,
            None => return node.value.take(),
        };

        let slot = &mut node.children[byte as usize];
        let child = slot.as_deref_mut()?;
        let value = Self::remove_from(child, rest, freed_nodes)?;

        if child.is_empty() {
            *slot = None;
            node.num_children -= 1;
            *freed_nodes += 1;
        }

        Some(value)
    }

    /// Iterate over all entries in ascending key order
    pub fn iter(&self) -> Iter<'_, V, N> {
        let mut stack = Vec::with_capacity(N + 1);
        stack.push((&*self.root, 0));

        Iter {
            stack,
            key: [0; N],
            remaining: self.len,
        }
    }
}

impl<V, const N: usize> Default for Trie<V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug, const N: usize> fmt::Debug for Trie<V, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, V, const N: usize> IntoIterator for &'a Trie<V, N> {
    type Item = ([u8; N], &'a V);
    type IntoIter = Iter<'a, V, N>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// In-order iterator over the entries of a [`Trie`].
///
/// Depth-first walk that keeps one `(node, next child slot)` frame per level.
pub struct Iter<'a, V, const N: usize> {
    stack: Vec<(&'a TrieNode<V>, usize)>,
    key: [u8; N],
    remaining: usize,
}

impl<'a, V, const N: usize> Iterator for Iter<'a, V, N> {
    type Item = ([u8; N], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let depth = self.stack.len().checked_sub(1)?;
            let (node, next_slot) = self.stack[depth];

            if depth == N {
                self.stack.pop();
                if let Some(value) = node.value.as_ref() {
                    self.remaining -= 1;
                    return Some((self.key, value));
                }
                continue;
            }

            let next_child = node.children[next_slot..]
                .iter()
                .position(Option::is_some)
                .map(|offset| next_slot + offset);

            match next_child {
                Some(byte) => {
                    self.stack[depth].1 = byte + 1;
                    self.key[depth] = byte as u8;
                    if let Some(child) = node.children[byte].as_deref() {
                        self.stack.push((child, 0));
                    }
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V, const N: usize> ExactSizeIterator for Iter<'_, V, N> {}
