//! Search nodes and the pool they are recycled through.
use slab::Slab;

/// Handle to a node inside a [`NodePool`].
pub(crate) type NodeKey = usize;

/// A cell discovered during one search. Never outlives that search.
#[derive(Debug, Clone, Default)]
pub(crate) struct PathNode {
    pub(crate) x: i32,
    pub(crate) z: i32,
    /// Cost from the start, in cells.
    pub(crate) g: f32,
    /// Heuristic to the goal, in cells.
    pub(crate) h: f32,
    pub(crate) f: f32,
    /// Back-reference into the same pool.
    pub(crate) parent: Option<NodeKey>,
    /// Position in the open list, `None` when not queued.
    pub(crate) heap_index: Option<usize>,
}

impl PathNode {
    fn reset(&mut self, x: i32, z: i32, h: f32) {
        self.x = x;
        self.z = z;
        self.g = f32::INFINITY;
        self.h = h;
        self.f = f32::INFINITY;
        self.parent = None;
        self.heap_index = None;
    }
}

/// Free-list arena of [`PathNode`]s reused across searches.
///
/// Released slots keep their allocation and are handed out again by the next
/// `acquire`, so a worker running many searches stops allocating once warm.
#[derive(Debug, Default)]
pub(crate) struct NodePool {
    nodes: Slab<PathNode>,
    /// Nodes acquired since the last `release_all`.
    live: Vec<NodeKey>,
}

impl NodePool {
    pub(crate) fn new() -> Self {
        NodePool::default()
    }

    /// Takes a node from the free list, reset for cell `(x, z)`.
    pub(crate) fn acquire(&mut self, x: i32, z: i32, h: f32) -> NodeKey {
        let entry = self.nodes.vacant_entry();
        let key = entry.key();
        let mut node = PathNode::default();
        node.reset(x, z, h);
        entry.insert(node);
        self.live.push(key);
        key
    }

    /// Returns every node acquired since the last call.
    pub(crate) fn release_all(&mut self) {
        for key in self.live.drain(..) {
            self.nodes.try_remove(key);
        }
    }

    /// Keys of nodes acquired during the current search.
    pub(crate) fn live(&self) -> &[NodeKey] {
        &self.live
    }

    #[cfg(test)]
    pub(crate) fn in_use(&self) -> usize {
        self.nodes.len()
    }

    /// Slots allocated so far, used or free.
    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.nodes.capacity()
    }
}

impl std::ops::Index<NodeKey> for NodePool {
    type Output = PathNode;

    fn index(&self, key: NodeKey) -> &PathNode {
        &self.nodes[key]
    }
}

impl std::ops::IndexMut<NodeKey> for NodePool {
    fn index_mut(&mut self, key: NodeKey) -> &mut PathNode {
        &mut self.nodes[key]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_resets() {
        let mut pool = NodePool::new();
        let key = pool.acquire(3, 4, 2.0);
        pool[key].g = 7.0;
        pool[key].parent = Some(99);
        pool.release_all();

        let again = pool.acquire(1, 1, 0.5);
        assert_eq!(again, key);
        assert_eq!(pool[again].x, 1);
        assert!(pool[again].g.is_infinite());
        assert_eq!(pool[again].parent, None);
        assert_eq!(pool[again].heap_index, None);
    }

    #[test]
    fn test_release_all_reuses_slots() {
        let mut pool = NodePool::new();
        for i in 0..100 {
            pool.acquire(i, 0, 0.0);
        }
        let capacity = pool.capacity();
        pool.release_all();
        assert_eq!(pool.in_use(), 0);
        assert!(pool.live().is_empty());

        for i in 0..100 {
            pool.acquire(0, i, 0.0);
        }
        assert_eq!(pool.capacity(), capacity);
        assert_eq!(pool.in_use(), 100);
    }
}
