//! Reverse-label domain trie.
//!
//! Labels are stored TLD-first, so `mail.example.com` indexes the path
//! `com → example → mail`. An endpoint node matches itself and its whole
//! subtree, minus the immediate child labels recorded as exceptions.

use std::collections::BTreeMap;

use crate::entry::{query_labels, Entry};

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<String, Node>,
    endpoint: bool,
    /// Sorted; only populated on endpoint nodes.
    exceptions: Vec<String>,
}

/// One trie per named list. Rebuilt from scratch whenever a list's entry
/// set changes wholesale; `insert` is the one in-place mutator.
#[derive(Debug, Default)]
pub struct DomainTrie {
    root: Node,
}

impl DomainTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a trie from a set of parsed entries.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a Entry>,
    {
        let mut trie = Self::new();
        for entry in entries {
            trie.insert(entry);
        }
        trie
    }

    /// Insert an entry. Re-inserting the same domain is idempotent;
    /// exceptions accumulate.
    pub fn insert(&mut self, entry: &Entry) {
        let mut node = &mut self.root;
        for label in entry.labels().iter().rev() {
            node = node.children.entry(label.clone()).or_default();
        }
        node.endpoint = true;
        for exception in entry.exceptions() {
            if let Err(pos) = node.exceptions.binary_search(exception) {
                node.exceptions.insert(pos, exception.clone());
            }
        }
    }

    /// Exception-aware membership test.
    ///
    /// Descends the reversed labels of `name`. Crossing an endpoint is a
    /// match unless the immediately-next label is one of the endpoint's
    /// exceptions, which exempts that label's entire subtree. A query
    /// equal to the endpoint has no next label, so no exception fires.
    pub fn matches(&self, name: &str) -> bool {
        let labels = query_labels(name);
        let mut node = &self.root;
        for (i, label) in labels.iter().rev().enumerate() {
            match node.children.get(label) {
                Some(child) => node = child,
                None => return false,
            }
            if node.endpoint {
                // The next label toward the host end, if any.
                let remaining = labels.len() - 1 - i;
                if remaining > 0 {
                    let next = &labels[remaining - 1];
                    if node.exceptions.binary_search(next).is_ok() {
                        return false;
                    }
                }
                return true;
            }
        }
        false
    }

    /// Enumerate one entry per endpoint.
    ///
    /// Child traversal is in label order, so the result is deterministic
    /// for a given trie; callers needing stable file output still sort.
    pub fn entries(&self) -> Vec<Entry> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        collect(&self.root, &mut path, &mut out);
        out
    }

    /// Number of endpoint nodes.
    pub fn len(&self) -> usize {
        count_endpoints(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn collect(node: &Node, path: &mut Vec<String>, out: &mut Vec<Entry>) {
    if node.endpoint {
        let mut labels: Vec<String> = path.clone();
        labels.reverse();
        out.push(Entry::new(labels, node.exceptions.clone()));
    }
    for (label, child) in &node.children {
        path.push(label.clone());
        collect(child, path, out);
        path.pop();
    }
}

fn count_endpoints(node: &Node) -> usize {
    let own = usize::from(node.endpoint);
    own + node.children.values().map(count_endpoints).sum::<usize>()
}
