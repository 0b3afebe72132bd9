use std::fmt;
use std::collections::BTreeMap;
use std::marker::PhantomData;

use ash::vk::Handle;

/// A handle captured together with the generation of the object it named.
///
/// Drivers reuse handle values once an object is destroyed. A reference taken
/// before the destroy keeps the old generation and stops resolving once the
/// value is reused.
pub struct HandleRef<H> {
    raw: u64,
    generation: u64,
    _marker: PhantomData<H>,
}

impl<H: Handle + Copy> HandleRef<H> {
    pub fn handle(&self) -> H {
        H::from_raw(self.raw)
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<H> Clone for HandleRef<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for HandleRef<H> {}

impl<H> PartialEq for HandleRef<H> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.generation == other.generation
    }
}

impl<H> Eq for HandleRef<H> {}

impl<H> fmt::Debug for HandleRef<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}@{}", self.raw, self.generation)
    }
}

struct Entry<T> {
    generation: u64,
    value: T,
}

/// Shadow objects keyed by driver handle.
///
/// Iteration is in handle order so that state walks are deterministic.
pub struct HandleMap<H, T> {
    entries: BTreeMap<u64, Entry<T>>,
    next_generation: u64,
    _marker: PhantomData<H>,
}

impl<H, T> Default for HandleMap<H, T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_generation: 1,
            _marker: PhantomData,
        }
    }
}

impl<H: Handle + Copy, T> HandleMap<H, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `value` under `handle`, replacing whatever was tracked there.
    pub fn insert(&mut self, handle: H, value: T) -> HandleRef<H> {
        let generation = self.next_generation;
        self.next_generation += 1;

        let raw = handle.as_raw();
        self.entries.insert(raw, Entry { generation, value });
        HandleRef { raw, generation, _marker: PhantomData }
    }

    pub fn get(&self, handle: H) -> Option<&T> {
        self.entries.get(&handle.as_raw()).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        self.entries.get_mut(&handle.as_raw()).map(|e| &mut e.value)
    }

    pub fn contains(&self, handle: H) -> bool {
        self.entries.contains_key(&handle.as_raw())
    }

    /// A reference to the object currently tracked under `handle`.
    pub fn reference(&self, handle: H) -> Option<HandleRef<H>> {
        let raw = handle.as_raw();
        self.entries.get(&raw).map(|e| HandleRef { raw, generation: e.generation, _marker: PhantomData })
    }

    /// Resolves `reference`, failing if its object has since been destroyed.
    pub fn resolve(&self, reference: &HandleRef<H>) -> Option<&T> {
        self.entries.get(&reference.raw)
            .filter(|e| e.generation == reference.generation)
            .map(|e| &e.value)
    }

    pub fn resolve_mut(&mut self, reference: &HandleRef<H>) -> Option<&mut T> {
        self.entries.get_mut(&reference.raw)
            .filter(|e| e.generation == reference.generation)
            .map(|e| &mut e.value)
    }

    pub fn is_live(&self, reference: &HandleRef<H>) -> bool {
        self.resolve(reference).is_some()
    }

    pub fn remove(&mut self, handle: H) -> Option<T> {
        self.entries.remove(&handle.as_raw()).map(|e| e.value)
    }

    /// Drops every object `remove` selects, returning their handles.
    pub fn remove_where(&mut self, mut remove: impl FnMut(&T) -> bool) -> Vec<H> {
        let doomed: Vec<u64> = self.entries.iter()
            .filter(|(_, e)| remove(&e.value))
            .map(|(raw, _)| *raw)
            .collect();

        for raw in &doomed {
            self.entries.remove(raw);
        }
        doomed.into_iter().map(H::from_raw).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.entries.iter().map(|(raw, e)| (H::from_raw(*raw), &e.value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (H, &mut T)> {
        self.entries.iter_mut().map(|(raw, e)| (H::from_raw(*raw), &mut e.value))
    }

    pub fn handles(&self) -> Vec<H> {
        self.entries.keys().map(|raw| H::from_raw(*raw)).collect()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::{self, Handle};

    use crate::HandleMap;

    #[test]
    fn references_go_stale_when_a_handle_is_reused() {
        let mut buffers: HandleMap<vk::Buffer, &str> = HandleMap::new();
        let handle = vk::Buffer::from_raw(0x10);

        let old = buffers.insert(handle, "vertices");
        assert_eq!(buffers.resolve(&old), Some(&"vertices"));

        buffers.remove(handle);
        assert!(!buffers.is_live(&old));

        let new = buffers.insert(handle, "indices");
        assert!(buffers.resolve(&old).is_none());
        assert_eq!(buffers.resolve(&new), Some(&"indices"));
        assert_eq!(buffers.get(handle), Some(&"indices"));
        assert_ne!(old, new);
    }

    #[test]
    fn we_can_remove_objects_by_owner() {
        let mut images: HandleMap<vk::Image, u32> = HandleMap::new();
        images.insert(vk::Image::from_raw(3), 1);
        images.insert(vk::Image::from_raw(1), 2);
        images.insert(vk::Image::from_raw(2), 1);

        let removed = images.remove_where(|device| *device == 1);

        assert_eq!(removed, vec![vk::Image::from_raw(2), vk::Image::from_raw(3)]);
        assert_eq!(images.handles(), vec![vk::Image::from_raw(1)]);
    }
}
