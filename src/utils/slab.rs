//! Index-stable storage with slot reuse.
//!
//! Freed indices go onto a free list and are handed out again by the next
//! insertion, so identifiers stay small and dense.

pub(crate) struct Slab<T> {
    items: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Slab<T> {
    pub(crate) fn new(size: usize) -> Self {
        let items = (0..size).map(|_| None).collect();
        let free = (0..size).rev().collect();

        Self {
            items,
            free,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index).and_then(Option::as_mut)
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let item = self.items.get_mut(index)?.take()?;

        self.free.push(index);
        self.len -= 1;

        Some(item)
    }

    pub(crate) fn insert(&mut self, item: T) -> usize {
        let index = if let Some(i) = self.free.pop() {
            i
        } else {
            let len = self.items.len();
            let new_len = if len == 0 { 1 } else { 2 * len };

            self.items.extend((len..new_len).map(|_| None));
            self.free.extend(((len + 1)..new_len).rev());

            len
        };

        self.items[index] = Some(item);
        self.len += 1;

        index
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.as_ref().map(|item| (index, item)))
    }

    /// Removes every occupied slot, leaving the slab empty.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.len);

        for index in 0..self.items.len() {
            if let Some(item) = self.remove(index) {
                drained.push(item);
            }
        }

        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_starts_at_zero() {
        let mut slab = Slab::new(4);

        assert_eq!(slab.insert("a"), 0);
        assert_eq!(slab.insert("b"), 1);
        assert_eq!(slab.len(), 2);
    }

    #[test]
    fn test_removed_index_is_reused() {
        let mut slab = Slab::new(4);
        let a = slab.insert(1);
        let _b = slab.insert(2);

        assert_eq!(slab.remove(a), Some(1));
        assert!(slab.get(a).is_none());
        assert_eq!(slab.insert(3), a);
        assert_eq!(slab.get(a), Some(&3));
    }

    #[test]
    fn test_grows_past_initial_size() {
        let mut slab = Slab::new(0);
        let indices: Vec<usize> = (0..5).map(|i| slab.insert(i)).collect();

        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(slab.iter().count(), 5);
    }

    #[test]
    fn test_double_remove_is_none() {
        let mut slab = Slab::new(1);
        let index = slab.insert(());

        assert!(slab.remove(index).is_some());
        assert!(slab.remove(index).is_none());
        assert_eq!(slab.len(), 0);
    }

    #[test]
    fn test_drain_empties() {
        let mut slab = Slab::new(2);
        slab.insert(1);
        slab.insert(2);

        let mut drained = slab.drain();
        drained.sort();

        assert_eq!(drained, vec![1, 2]);
        assert_eq!(slab.len(), 0);
        assert_eq!(slab.insert(9), 1);
    }
}
