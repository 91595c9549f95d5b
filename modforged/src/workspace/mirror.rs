use std::collections::HashMap;

/// Editable copy of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorEntry {
    pub content: String,
    /// Content as last fetched from or pushed to the remote; `None` for local creates.
    pub baseline: Option<String>,
    /// Content hash matching `baseline`.
    pub hash: Option<String>,
    last_touched: u64,
}

impl MirrorEntry {
    pub fn is_dirty(&self) -> bool {
        self.baseline.as_deref() != Some(self.content.as_str())
    }
}

/// In-memory `path -> content` map for files opened or created in this session.
#[derive(Debug, Default)]
pub struct LocalMirror {
    entries: HashMap<String, MirrorEntry>,
    capacity: Option<usize>,
    clock: u64,
}

impl LocalMirror {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.filter(|c| *c > 0),
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&MirrorEntry> {
        self.entries.get(path)
    }

    pub fn content(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(|entry| entry.content.as_str())
    }

    pub fn insert_fetched(&mut self, path: &str, content: String, hash: Option<String>) {
        let stamp = self.tick();
        self.entries.insert(
            path.to_string(),
            MirrorEntry {
                baseline: Some(content.clone()),
                content,
                hash,
                last_touched: stamp,
            },
        );
    }

    pub fn insert_created(&mut self, path: &str, content: String) {
        let stamp = self.tick();
        self.entries.insert(
            path.to_string(),
            MirrorEntry {
                content,
                baseline: None,
                hash: None,
                last_touched: stamp,
            },
        );
    }

    /// Replaces the content of an existing entry; returns the entry when present.
    pub fn set_content(&mut self, path: &str, content: String) -> Option<&MirrorEntry> {
        let stamp = self.tick();
        let entry = self.entries.get_mut(path)?;
        entry.content = content;
        entry.last_touched = stamp;
        Some(entry)
    }

    /// Records that the remote now holds `pushed` under `hash`. Edits made while the
    /// push was in flight keep the entry dirty.
    pub fn mark_pushed(&mut self, path: &str, pushed: String, hash: String) -> Option<&MirrorEntry> {
        let entry = self.entries.get_mut(path)?;
        entry.baseline = Some(pushed);
        entry.hash = Some(hash);
        Some(entry)
    }

    pub fn touch(&mut self, path: &str) {
        let stamp = self.tick();
        if let Some(entry) = self.entries.get_mut(path) {
            entry.last_touched = stamp;
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<MirrorEntry> {
        self.entries.remove(path)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MirrorEntry)> {
        self.entries.iter()
    }

    /// Drops least recently touched clean entries until the mirror fits its capacity.
    /// Entries for which `protected` returns true are never evicted.
    pub fn evict_over_capacity(&mut self, protected: impl Fn(&str) -> bool) -> Vec<String> {
        let Some(capacity) = self.capacity else {
            return Vec::new();
        };
        if self.entries.len() <= capacity {
            return Vec::new();
        }

        let mut candidates: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|(path, entry)| !entry.is_dirty() && !protected(path))
            .map(|(path, entry)| (entry.last_touched, path.clone()))
            .collect();
        candidates.sort();

        let excess = self.entries.len() - capacity;
        let mut evicted = Vec::new();
        for (_, path) in candidates.into_iter().take(excess) {
            self.entries.remove(&path);
            evicted.push(path);
        }
        evicted
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}
