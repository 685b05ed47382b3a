//! Binary min-heap over pooled search nodes.
//!
//! `BinaryHeap` cannot lower the key of an entry in place, so the open list keeps
//! its own heap of node keys and writes every node's slot back into
//! [`PathNode::heap_index`](crate::node::PathNode). A node whose `g` improves is
//! sifted up from where it sits instead of being pushed a second time.
use crate::node::{NodeKey, NodePool};

#[derive(Debug, Default)]
pub(crate) struct OpenList {
    heap: Vec<NodeKey>,
}

impl OpenList {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        OpenList {
            heap: Vec::with_capacity(capacity),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    pub(crate) fn push(&mut self, pool: &mut NodePool, key: NodeKey) {
        let index = self.heap.len();
        self.heap.push(key);
        pool[key].heap_index = Some(index);
        self.sift_up(pool, index);
    }

    /// Removes the node with the smallest `f`.
    pub(crate) fn pop(&mut self, pool: &mut NodePool) -> Option<NodeKey> {
        if self.heap.is_empty() {
            return None;
        }

        let last = self.heap.len() - 1;
        self.swap(pool, 0, last);
        let key = self.heap.pop()?;
        pool[key].heap_index = None;

        if !self.heap.is_empty() {
            self.sift_down(pool, 0);
        }

        Some(key)
    }

    /// Restores heap order after `key`'s `f` was lowered.
    pub(crate) fn decrease_key(&mut self, pool: &mut NodePool, key: NodeKey) {
        if let Some(index) = pool[key].heap_index {
            self.sift_up(pool, index);
        }
    }

    /// Lower `f` first. On ties the node further along (larger `g`) wins.
    fn less(pool: &NodePool, a: NodeKey, b: NodeKey) -> bool {
        let (a, b) = (&pool[a], &pool[b]);
        a.f < b.f || (a.f == b.f && a.g > b.g)
    }

    fn swap(&mut self, pool: &mut NodePool, i: usize, j: usize) {
        self.heap.swap(i, j);
        pool[self.heap[i]].heap_index = Some(i);
        pool[self.heap[j]].heap_index = Some(j);
    }

    fn sift_up(&mut self, pool: &mut NodePool, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !Self::less(pool, self.heap[index], self.heap[parent]) {
                break;
            }
            self.swap(pool, index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, pool: &mut NodePool, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = index * 2 + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len && Self::less(pool, self.heap[left], self.heap[smallest]) {
                smallest = left;
            }
            if right < len && Self::less(pool, self.heap[right], self.heap[smallest]) {
                smallest = right;
            }
            if smallest == index {
                break;
            }

            self.swap(pool, index, smallest);
            index = smallest;
        }
    }
}
