use parking_lot::Mutex;

/// An append-only store of fixed-identity slots.
///
/// Mirrors the block allocator backing a [`Chunk`](https://docs.rs/octree-index)'s voxel
/// grid: values are pushed once and never removed or moved for the lifetime of the
/// allocator, so a previously returned [`BlockId`] stays valid forever. A single mutex
/// guards the growable backing vector; contention is expected to be brief since the
/// critical section is just a push.
pub struct BlockAllocator<T> {
    slots: Mutex<Vec<T>>,
}

/// A stable index into a [`BlockAllocator`]. Never reused.
pub type BlockId = u32;

impl<T> Default for BlockAllocator<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }
}

impl<T> BlockAllocator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(cap)),
        }
    }

    /// Appends `value`, returning the [`BlockId`] it can be fetched with thereafter.
    pub fn push(&self, value: T) -> BlockId {
        let mut slots = self.slots.lock();
        let id = slots.len() as BlockId;
        slots.push(value);
        id
    }

    /// Number of values currently resident. Used to size grid/overflow totals.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_cloned(&self, id: BlockId) -> T
    where
        T: Clone,
    {
        self.slots.lock()[id as usize].clone()
    }

    /// Drains all resident values in insertion order, leaving the allocator empty.
    /// Used when a chunk is evicted and its grid contents must be encoded.
    pub fn drain_all(&self) -> Vec<T> {
        std::mem::take(&mut *self.slots.lock())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn push_and_read_back() {
        let alloc: BlockAllocator<u64> = BlockAllocator::new();
        let a = alloc.push(10);
        let b = alloc.push(20);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(alloc.get_cloned(a), 10);
        assert_eq!(alloc.get_cloned(b), 20);
        assert_eq!(alloc.len(), 2);
    }

    #[test]
    fn drain_empties_and_preserves_order() {
        let alloc: BlockAllocator<u32> = BlockAllocator::new();
        for i in 0..5 {
            alloc.push(i);
        }
        let drained = alloc.drain_all();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(alloc.is_empty());
    }
}
