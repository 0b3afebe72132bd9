use std::collections::BTreeMap;

use ash::vk;

/// One range of a sparse resource backed by device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseBinding {
    pub size: u64,
    pub memory: vk::DeviceMemory,
    pub memory_offset: u64,
}

/// The memory bindings of a sparse resource, keyed by resource offset.
///
/// Ranges never overlap: a new binding carves whatever it covers out of the
/// existing ones.
#[derive(Debug, Default, Clone)]
pub struct SparseBindings {
    bindings: BTreeMap<u64, SparseBinding>,
}

impl SparseBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `[offset, offset + size)` to `memory`. A null memory handle
    /// unbinds the range.
    pub fn bind(&mut self, offset: u64, size: u64, memory: vk::DeviceMemory, memory_offset: u64) {
        if size == 0 {
            return;
        }
        // Ranges running past the end of the address space are clamped.
        let end = offset.saturating_add(size);
        let size = end - offset;

        let overlapping: Vec<(u64, SparseBinding)> = self.bindings
            .range(..end)
            .filter(|(start, binding)| start.saturating_add(binding.size) > offset)
            .map(|(start, binding)| (*start, *binding))
            .collect();

        for (start, binding) in overlapping {
            self.bindings.remove(&start);
            let binding_end = start.saturating_add(binding.size);

            if start < offset {
                self.bindings.insert(start, SparseBinding { size: offset - start, ..binding });
            }
            if binding_end > end {
                self.bindings.insert(end, SparseBinding {
                    size: binding_end - end,
                    memory: binding.memory,
                    memory_offset: binding.memory_offset.saturating_add(end - start),
                });
            }
        }

        if memory != vk::DeviceMemory::null() {
            self.bindings.insert(offset, SparseBinding { size, memory, memory_offset });
        }
    }

    /// Whether every byte of `[offset, offset + size)` is backed by memory.
    ///
    /// Walks backwards from the last binding that starts before the end of
    /// the range, pulling the uncovered end down through bindings that reach
    /// it. A binding that stops short of the uncovered end leaves a hole.
    pub fn is_fully_bound(&self, offset: u64, size: u64) -> bool {
        if size == 0 {
            return true;
        }

        let mut uncovered_end = offset.saturating_add(size);
        for (start, binding) in self.bindings.range(..uncovered_end).rev() {
            if start.saturating_add(binding.size) < uncovered_end {
                return false;
            }

            uncovered_end = uncovered_end.min(*start);
            if uncovered_end <= offset {
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Bindings as `(resource_offset, binding)` in offset order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &SparseBinding)> {
        self.bindings.iter().map(|(offset, binding)| (*offset, binding))
    }

    /// Forgets every binding to `memory`, as when the memory is freed.
    pub fn unbind_memory(&mut self, memory: vk::DeviceMemory) {
        self.bindings.retain(|_, binding| binding.memory != memory);
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::{self, Handle};

    use crate::{SparseBinding, SparseBindings};

    fn memory(raw: u64) -> vk::DeviceMemory {
        vk::DeviceMemory::from_raw(raw)
    }

    #[test]
    fn adjacent_bindings_cover_a_range() {
        let mut bindings = SparseBindings::new();
        bindings.bind(0, 10, memory(1), 0);
        bindings.bind(10, 10, memory(1), 10);

        assert!(bindings.is_fully_bound(0, 20));
        assert!(bindings.is_fully_bound(5, 10));
    }

    #[test]
    fn a_gap_is_detected() {
        let mut bindings = SparseBindings::new();
        bindings.bind(0, 10, memory(1), 0);
        bindings.bind(15, 10, memory(2), 0);

        assert!(!bindings.is_fully_bound(0, 20));
        assert!(bindings.is_fully_bound(15, 10));
        assert!(!bindings.is_fully_bound(0, 30));
    }

    #[test]
    fn ranges_outside_any_binding_are_unbound() {
        let mut bindings = SparseBindings::new();
        bindings.bind(100, 10, memory(1), 0);

        assert!(!bindings.is_fully_bound(0, 20));
        assert!(!bindings.is_fully_bound(105, 10));
        assert!(SparseBindings::new().is_fully_bound(0, 0));
    }

    #[test]
    fn rebinding_carves_existing_ranges() {
        let mut bindings = SparseBindings::new();
        bindings.bind(0, 30, memory(1), 100);
        bindings.bind(10, 10, memory(2), 0);

        let ranges: Vec<(u64, SparseBinding)> = bindings.iter().map(|(o, b)| (o, *b)).collect();
        assert_eq!(ranges, vec![
            (0, SparseBinding { size: 10, memory: memory(1), memory_offset: 100 }),
            (10, SparseBinding { size: 10, memory: memory(2), memory_offset: 0 }),
            (20, SparseBinding { size: 10, memory: memory(1), memory_offset: 120 }),
        ]);
        assert!(bindings.is_fully_bound(0, 30));
    }

    #[test]
    fn ranges_at_the_top_of_the_address_space_do_not_wrap() {
        let mut bindings = SparseBindings::new();
        bindings.bind(u64::MAX - 16, u64::MAX, memory(1), 0);
        bindings.bind(u64::MAX - 8, 4, memory(2), u64::MAX);

        assert_eq!(bindings.len(), 3);
        assert!(bindings.is_fully_bound(u64::MAX - 16, 16));
        assert!(bindings.is_fully_bound(u64::MAX - 16, u64::MAX));
        assert!(!bindings.is_fully_bound(0, u64::MAX));
    }

    #[test]
    fn binding_null_memory_opens_a_hole() {
        let mut bindings = SparseBindings::new();
        bindings.bind(0, 30, memory(1), 0);
        bindings.bind(10, 5, vk::DeviceMemory::null(), 0);

        assert_eq!(bindings.len(), 2);
        assert!(!bindings.is_fully_bound(0, 30));
        assert!(bindings.is_fully_bound(15, 15));

        bindings.unbind_memory(memory(1));
        assert!(bindings.is_empty());
    }
}
