//! Generational slot pool handing out dense bindless indices.

/// Handle to a texture registered in the bindless set.
///
/// `index` is the element shaders use; `generation` tells apart successive owners of a reused index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId {
    index: u32,
    generation: u32,
}

impl TextureId {
    /// Sentinel for "no texture".
    pub const NULL: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    /// Shader-visible array index.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when this id was issued.
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Whether this is [`TextureId::NULL`].
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl Default for TextureId {
    fn default() -> Self {
        Self::NULL
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Pool of values addressed by [`TextureId`].
///
/// Indices are assigned densely from 0. A freed index goes on a LIFO free list and is only handed out
/// again after `remove` returned its previous value, with a bumped generation.
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    limit: u32,
    len: usize,
}

impl<T> SlotPool<T> {
    /// Pool holding at most `limit` live values.
    pub fn new(limit: u32) -> Self {
        assert!(limit > 0 && limit < u32::MAX, "slot limit {limit} out of range");
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            limit,
            len: 0,
        }
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of live values.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Reserve an id and build the value from it, or `None` when the pool is full.
    pub fn try_insert_with(&mut self, make: impl FnOnce(TextureId) -> T) -> Option<TextureId> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).ok()?;
                if index >= self.limit {
                    return None;
                }
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        let id = TextureId {
            index,
            generation: slot.generation,
        };
        slot.value = Some(make(id));
        self.len += 1;
        Some(id)
    }

    /// Insert a value built from its id.
    ///
    /// # Panics
    /// If the pool is full.
    pub fn insert_with(&mut self, make: impl FnOnce(TextureId) -> T) -> TextureId {
        let limit = self.limit;
        match self.try_insert_with(make) {
            Some(id) => id,
            None => panic!("slot pool exhausted ({limit} entries)"),
        }
    }

    /// Insert a value.
    ///
    /// # Panics
    /// If the pool is full.
    pub fn insert(&mut self, value: T) -> TextureId {
        self.insert_with(|_| value)
    }

    fn slot(&self, id: TextureId) -> Option<&Slot<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    /// Value for `id`, `None` for null, stale or freed ids.
    pub fn get(&self, id: TextureId) -> Option<&T> {
        self.slot(id).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: TextureId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Whether `id` refers to a live value.
    pub fn contains(&self, id: TextureId) -> bool {
        self.get(id).is_some()
    }

    /// Take the value out and release its index.
    pub fn remove(&mut self, id: TextureId) -> Option<T> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Live ids and values in index order.
    pub fn iter(&self) -> impl Iterator<Item = (TextureId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    TextureId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Remove every value, releasing all indices.
    pub fn drain(&mut self) -> Vec<T> {
        let ids: Vec<_> = self.iter().map(|(id, _)| id).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn indices_are_dense_from_zero() {
        let mut pool = SlotPool::new(16);
        let ids: Vec<_> = (0..4).map(|i| pool.insert(i)).collect();
        let indices: Vec<_> = ids.iter().map(|id| id.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn null_is_never_issued_or_resolved() {
        let mut pool = SlotPool::new(4);
        let id = pool.insert("a");
        assert!(!id.is_null());
        assert!(pool.get(TextureId::NULL).is_none());
        assert!(TextureId::default().is_null());
    }

    #[test]
    fn freed_index_is_reused_with_new_generation() {
        let mut pool = SlotPool::new(8);
        let a = pool.insert('a');
        let b = pool.insert('b');

        assert_eq!(pool.remove(a), Some('a'));
        let c = pool.insert('c');

        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert!(pool.get(a).is_none());
        assert_eq!(pool.get(b), Some(&'b'));
        assert_eq!(pool.get(c), Some(&'c'));
    }

    #[test]
    fn free_list_is_lifo() {
        let mut pool = SlotPool::new(8);
        let ids: Vec<_> = (0..4).map(|i| pool.insert(i)).collect();
        pool.remove(ids[1]);
        pool.remove(ids[3]);

        assert_eq!(pool.insert(10).index(), 3);
        assert_eq!(pool.insert(11).index(), 1);
        assert_eq!(pool.insert(12).index(), 4);
    }

    #[test]
    fn stale_remove_is_ignored() {
        let mut pool = SlotPool::new(4);
        let a = pool.insert(1);
        pool.remove(a);
        let b = pool.insert(2);

        assert_eq!(pool.remove(a), None);
        assert_eq!(pool.get(b), Some(&2));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn live_ids_never_collide() {
        let mut pool = SlotPool::new(64);
        let mut live = Vec::new();

        // Deterministic interleaving of inserts and removals.
        for step in 0u32..500 {
            if step % 3 == 2 && !live.is_empty() {
                let victim = live.remove((step as usize * 7) % live.len());
                assert!(pool.remove(victim).is_some());
            } else if let Some(id) = pool.try_insert_with(|_| step) {
                live.push(id);
            }

            let indices: HashSet<_> = live.iter().map(|id| id.index()).collect();
            assert_eq!(indices.len(), live.len());
            assert_eq!(pool.len(), live.len());
            assert!(live.iter().all(|&id| pool.contains(id)));
        }
    }

    #[test]
    fn full_pool_rejects_inserts() {
        let mut pool = SlotPool::new(2);
        pool.insert(0);
        pool.insert(1);
        assert!(pool.try_insert_with(|_| 2).is_none());
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn insert_into_full_pool_panics() {
        let mut pool = SlotPool::new(1);
        pool.insert(0);
        pool.insert(1);
    }

    #[test]
    fn insert_with_sees_its_own_id() {
        let mut pool = SlotPool::new(4);
        let id = pool.insert_with(|id| id);
        assert_eq!(pool.get(id), Some(&id));
    }

    #[test]
    fn drain_empties_pool() {
        let mut pool = SlotPool::new(4);
        pool.insert(1);
        pool.insert(2);
        let mut values = pool.drain();
        values.sort();
        assert_eq!(values, vec![1, 2]);
        assert!(pool.is_empty());
    }
}
