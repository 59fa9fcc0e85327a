use std::collections::VecDeque;

/// Fixed-capacity FIFO history. Pushing into a full buffer evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append an item, returning the evicted one if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// The last `n` items, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        self.items.iter().skip(self.items.len().saturating_sub(n))
    }

    /// Drop items from the front while `predicate` holds.
    pub fn prune_front<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let mut removed = 0;
        while self.items.front().is_some_and(&mut predicate) {
            self.items.pop_front();
            removed += 1;
        }
        removed
    }
}

impl RingBuffer<f64> {
    pub fn mean(&self) -> Option<f64> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.iter().sum::<f64>() / self.items.len() as f64)
        }
    }

    pub fn min(&self) -> Option<f64> {
        self.items.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.items.iter().copied().reduce(f64::max)
    }

    pub fn sum(&self) -> f64 {
        self.items.iter().sum()
    }
}
