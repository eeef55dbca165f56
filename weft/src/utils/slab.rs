/// Stable handle to a value stored in a [`Slab`].
///
/// A key is only valid for the value it was returned for: once that value
/// is removed, the slot's generation moves on and the old key no longer
/// resolves, even if the slot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    index: u32,
    generation: u32,
}

/// A single slot of the slab.
enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// A generational slab allocator.
///
/// A `Slab` stores values of type `T` in a contiguous array and
/// returns stable [`Key`]s. Removed slots are reused by later insertions,
/// with a bumped generation so that keys held by stale owners miss.
///
/// This structure is used for arenas where removal must be O(1) and
/// handles may outlive the value they point to.
pub(crate) struct Slab<T> {
    /// Storage for items.
    entries: Vec<Entry<T>>,

    /// Stack of free indices that can be reused.
    free: Vec<u32>,

    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a new `Slab` able to hold `size` values before growing.
    pub(crate) fn new(size: usize) -> Self {
        Self {
            entries: Vec::with_capacity(size),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Inserts a value into the slab and returns its key.
    ///
    /// If a free slot is available, it is reused.
    /// Otherwise, the slab grows by one slot.
    pub(crate) fn insert(&mut self, value: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.entries[index as usize];

            let generation = match &*slot {
                Entry::Vacant { generation } => *generation,
                Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };

            *slot = Entry::Occupied { generation, value };

            return Key { index, generation };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });

        Key {
            index,
            generation: 0,
        }
    }

    /// Removes and returns the value stored under `key`.
    ///
    /// Returns `None` if the key is stale or was never issued by this slab.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.entries.get_mut(key.index as usize)?;

        let generation = match &*slot {
            Entry::Occupied { generation, .. } if *generation == key.generation => *generation,
            _ => return None,
        };

        let next = Entry::Vacant {
            generation: generation.wrapping_add(1),
        };

        let Entry::Occupied { value, .. } = std::mem::replace(slot, next) else {
            unreachable!("slot was checked to be occupied")
        };

        self.free.push(key.index);
        self.len -= 1;

        Some(value)
    }

    /// Returns a reference to the value stored under `key`, if still present.
    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        match self.entries.get(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.entries.get_mut(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Number of values currently stored.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}
