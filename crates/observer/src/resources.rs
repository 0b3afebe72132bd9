use std::sync::Mutex;
use std::collections::HashMap;

/// Content-addressed store of every byte range sent in this capture session.
///
/// Identical contents get the same id, so they are transmitted once no matter
/// how many observations point at them.
#[derive(Debug, Default)]
pub struct ResourceStore {
    ids: Mutex<HashMap<[u8; 32], u64>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash(data: &[u8]) -> [u8; 32] {
        *blake3::hash(data).as_bytes()
    }

    /// Returns the id for `data` and whether this is the first time it was seen.
    ///
    /// On first sight `define` runs with the new id and hash before the store
    /// is unlocked, so no other caller can get the id back until whatever
    /// `define` emits is in the stream.
    pub fn intern<F>(&self, data: &[u8], define: F) -> (u64, [u8; 32], bool)
    where
        F: FnOnce(u64, [u8; 32]),
    {
        let hash = Self::hash(data);
        let mut ids = self.ids.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(id) = ids.get(&hash) {
            return (*id, hash, false);
        }

        let id = ids.len() as u64 + 1;
        define(id, hash);
        ids.insert(hash, id);
        (id, hash, true)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().map(|ids| ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets everything sent so far, for a new capture session.
    pub fn reset(&self) {
        self.ids.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::ResourceStore;

    #[test]
    fn identical_bytes_share_an_id() {
        let store = ResourceStore::new();
        let (a, _, a_new) = store.intern(b"hello", |_, _| {});
        let (b, _, b_new) = store.intern(b"world", |_, _| {});
        let (c, _, c_new) = store.intern(b"hello", |_, _| {});

        assert!(a_new && b_new && !c_new);
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn definitions_run_only_for_new_contents() {
        let store = ResourceStore::new();
        let mut defined = Vec::new();

        store.intern(b"hello", |id, hash| defined.push((id, hash)));
        store.intern(b"hello", |id, hash| defined.push((id, hash)));
        store.intern(b"world", |id, hash| defined.push((id, hash)));

        assert_eq!(defined.len(), 2);
        assert_eq!(defined[0], (1, ResourceStore::hash(b"hello")));
        assert_eq!(defined[1].0, 2);
    }
}
