//! Tag Index Module
//!
//! Secondary index from tag to the keys currently carrying it.

use std::collections::{BTreeSet, HashMap, HashSet};

// == Tag Index ==
/// Maps tags to keys and keys back to their tags.
///
/// The reverse map lets a key be unlinked without knowing its tags.
#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: HashMap<String, HashSet<String>>,
    by_key: HashMap<String, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // == Insert ==
    /// Replaces the tag set recorded for a key.
    pub fn insert(&mut self, key: &str, tags: &BTreeSet<String>) {
        self.remove(key);
        if tags.is_empty() {
            return;
        }
        for tag in tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.by_key.insert(key.to_string(), tags.clone());
    }

    // == Remove ==
    /// Unlinks a key from every tag it carried.
    pub fn remove(&mut self, key: &str) {
        let Some(tags) = self.by_key.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(&tag);
                }
            }
        }
    }

    // == Keys For Tags ==
    /// Keys carrying at least one of the given tags.
    pub fn keys_for_tags<S: AsRef<str>>(&self, tags: &[S]) -> BTreeSet<String> {
        tags.iter()
            .filter_map(|tag| self.by_tag.get(tag.as_ref()))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.by_key.clear();
    }
}
