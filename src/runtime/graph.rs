//! Watcher relationship graph
//!
//! Tracks which session watches which. A watcher has at most one parent, a
//! parent any number of watchers, and the parent chain never loops. Both
//! directions live behind one lock so they change together.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::sync::{read, write};
use crate::core::{RuntimeError, RuntimeResult, SessionId};

#[derive(Debug, Default)]
struct Edges {
    parent_of: HashMap<SessionId, SessionId>,
    watchers_of: HashMap<SessionId, Vec<SessionId>>,
}

impl Edges {
    /// Walk up the parent chain from `from`; true if `target` is on it
    fn has_ancestor(&self, from: SessionId, target: SessionId) -> bool {
        let mut current = from;
        // Chains are acyclic, so this terminates; the bound guards corrupt input.
        for _ in 0..=self.parent_of.len() {
            match self.parent_of.get(&current) {
                Some(&parent) if parent == target => return true,
                Some(&parent) => current = parent,
                None => return false,
            }
        }
        true
    }

    fn unlink(&mut self, watcher: SessionId) -> Option<SessionId> {
        let parent = self.parent_of.remove(&watcher)?;
        if let Some(watchers) = self.watchers_of.get_mut(&parent) {
            watchers.retain(|w| *w != watcher);
            if watchers.is_empty() {
                self.watchers_of.remove(&parent);
            }
        }
        Some(parent)
    }
}

/// Bidirectional watcher→parent / parent→watchers mapping
#[derive(Debug, Default)]
pub struct WatchGraph {
    edges: RwLock<Edges>,
}

impl WatchGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `watcher_id` watch `parent_id`.
    ///
    /// Fails with `AlreadyWatching` if the watcher has a parent, and with
    /// `CircularWatch` if `parent_id` is `watcher_id` or one of its watchers,
    /// directly or transitively. A failed call changes nothing.
    pub fn add_watcher(&self, parent_id: SessionId, watcher_id: SessionId) -> RuntimeResult<()> {
        let mut edges = write(&self.edges);

        if let Some(&parent) = edges.parent_of.get(&watcher_id) {
            return Err(RuntimeError::AlreadyWatching {
                watcher: watcher_id,
                parent,
            });
        }
        if parent_id == watcher_id || edges.has_ancestor(parent_id, watcher_id) {
            return Err(RuntimeError::CircularWatch {
                parent: parent_id,
                watcher: watcher_id,
            });
        }

        edges.parent_of.insert(watcher_id, parent_id);
        edges.watchers_of.entry(parent_id).or_default().push(watcher_id);
        Ok(())
    }

    /// Delete the edge from `watcher_id`; returns the former parent
    pub fn remove_watcher(&self, watcher_id: SessionId) -> Option<SessionId> {
        write(&self.edges).unlink(watcher_id)
    }

    /// Detach every watcher of `parent_id`; returns them in insertion order.
    /// The watchers themselves stay registered as parentless sessions.
    pub fn remove_parent(&self, parent_id: SessionId) -> Vec<SessionId> {
        let mut edges = write(&self.edges);
        let watchers = edges.watchers_of.remove(&parent_id).unwrap_or_default();
        for watcher in &watchers {
            edges.parent_of.remove(watcher);
        }
        watchers
    }

    /// Watchers of `parent_id`, in the order they were added
    pub fn get_watchers(&self, parent_id: SessionId) -> Vec<SessionId> {
        read(&self.edges)
            .watchers_of
            .get(&parent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Parent of `id`, if it is watching one
    pub fn get_parent(&self, id: SessionId) -> Option<SessionId> {
        read(&self.edges).parent_of.get(&id).copied()
    }

    /// Number of watchers of `parent_id`
    pub fn watcher_count(&self, parent_id: SessionId) -> usize {
        read(&self.edges)
            .watchers_of
            .get(&parent_id)
            .map_or(0, Vec::len)
    }

    /// True if no edges exist
    pub fn is_empty(&self) -> bool {
        let edges = read(&self.edges);
        edges.parent_of.is_empty() && edges.watchers_of.is_empty()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let edges = read(&self.edges);
        for (watcher, parent) in &edges.parent_of {
            let watchers = edges.watchers_of.get(parent).expect("parent entry missing");
            assert_eq!(watchers.iter().filter(|w| *w == watcher).count(), 1);
        }
        for (parent, watchers) in &edges.watchers_of {
            assert!(!watchers.is_empty());
            for watcher in watchers {
                assert_eq!(edges.parent_of.get(watcher), Some(parent));
            }
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Vec<(SessionId, SessionId)>, Vec<(SessionId, Vec<SessionId>)>) {
        let edges = read(&self.edges);
        let mut parents: Vec<_> = edges.parent_of.iter().map(|(w, p)| (*w, *p)).collect();
        let mut watchers: Vec<_> = edges
            .watchers_of
            .iter()
            .map(|(p, ws)| (*p, ws.clone()))
            .collect();
        parents.sort();
        watchers.sort();
        (parents, watchers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids(n: usize) -> Vec<SessionId> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_add_watcher() {
        let graph = WatchGraph::new();
        let s = ids(3);

        graph.add_watcher(s[0], s[1]).unwrap();
        graph.add_watcher(s[0], s[2]).unwrap();

        assert_eq!(graph.get_parent(s[1]), Some(s[0]));
        assert_eq!(graph.get_parent(s[2]), Some(s[0]));
        assert_eq!(graph.get_watchers(s[0]), vec![s[1], s[2]]);
        assert_eq!(graph.watcher_count(s[0]), 2);
        assert_eq!(graph.get_parent(s[0]), None);
        graph.assert_consistent();
    }

    #[test]
    fn test_second_parent_is_rejected() {
        let graph = WatchGraph::new();
        let s = ids(3);
        graph.add_watcher(s[0], s[2]).unwrap();
        let before = graph.snapshot();

        let err = graph.add_watcher(s[1], s[2]).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::AlreadyWatching { watcher, parent } if watcher == s[2] && parent == s[0]
        ));
        assert_eq!(graph.snapshot(), before);
    }

    #[test]
    fn test_direct_cycle_is_rejected() {
        let graph = WatchGraph::new();
        let s = ids(2);
        graph.add_watcher(s[0], s[1]).unwrap();
        let before = graph.snapshot();

        let err = graph.add_watcher(s[1], s[0]).unwrap_err();
        assert!(matches!(err, RuntimeError::CircularWatch { .. }));
        assert_eq!(graph.snapshot(), before);
        graph.assert_consistent();
    }

    #[test]
    fn test_transitive_cycle_is_rejected() {
        let graph = WatchGraph::new();
        let s = ids(4);
        // s0 <- s1 <- s2 <- s3
        graph.add_watcher(s[0], s[1]).unwrap();
        graph.add_watcher(s[1], s[2]).unwrap();
        graph.add_watcher(s[2], s[3]).unwrap();
        let before = graph.snapshot();

        assert!(matches!(
            graph.add_watcher(s[3], s[0]),
            Err(RuntimeError::CircularWatch { .. })
        ));
        assert_eq!(graph.snapshot(), before);
    }

    #[test]
    fn test_self_watch_is_rejected() {
        let graph = WatchGraph::new();
        let s = ids(1);
        assert!(matches!(
            graph.add_watcher(s[0], s[0]),
            Err(RuntimeError::CircularWatch { .. })
        ));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_siblings_and_chains_are_allowed() {
        let graph = WatchGraph::new();
        let s = ids(5);
        graph.add_watcher(s[0], s[1]).unwrap();
        graph.add_watcher(s[0], s[2]).unwrap();
        graph.add_watcher(s[1], s[3]).unwrap();
        // s4 watching s3 extends a chain without closing it
        graph.add_watcher(s[3], s[4]).unwrap();
        graph.assert_consistent();
    }

    #[test]
    fn test_remove_watcher() {
        let graph = WatchGraph::new();
        let s = ids(3);
        graph.add_watcher(s[0], s[1]).unwrap();
        graph.add_watcher(s[0], s[2]).unwrap();

        assert_eq!(graph.remove_watcher(s[1]), Some(s[0]));
        assert_eq!(graph.get_parent(s[1]), None);
        assert_eq!(graph.get_watchers(s[0]), vec![s[2]]);
        graph.assert_consistent();

        assert_eq!(graph.remove_watcher(s[1]), None);
        assert_eq!(graph.remove_watcher(s[2]), Some(s[0]));
        assert!(graph.get_watchers(s[0]).is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_remove_parent() {
        let graph = WatchGraph::new();
        let s = ids(4);
        graph.add_watcher(s[0], s[1]).unwrap();
        graph.add_watcher(s[0], s[2]).unwrap();
        graph.add_watcher(s[3], s[0]).unwrap();

        assert_eq!(graph.remove_parent(s[0]), vec![s[1], s[2]]);
        assert_eq!(graph.get_parent(s[1]), None);
        assert_eq!(graph.get_parent(s[2]), None);
        assert!(graph.get_watchers(s[0]).is_empty());
        // s0's own parent edge is not touched by remove_parent
        assert_eq!(graph.get_parent(s[0]), Some(s[3]));
        graph.assert_consistent();

        assert!(graph.remove_parent(s[0]).is_empty());
    }

    #[test]
    fn test_removed_edge_allows_reverse_direction() {
        let graph = WatchGraph::new();
        let s = ids(2);
        graph.add_watcher(s[0], s[1]).unwrap();
        graph.remove_watcher(s[1]);
        graph.add_watcher(s[1], s[0]).unwrap();
        assert_eq!(graph.get_parent(s[0]), Some(s[1]));
    }

    #[test]
    fn test_concurrent_mutations_stay_consistent() {
        let graph = std::sync::Arc::new(WatchGraph::new());
        let parents = ids(4);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let graph = graph.clone();
                let parents = parents.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let watcher = Uuid::new_v4();
                        let _ = graph.add_watcher(parents[i % 4], watcher);
                        if i % 2 == 0 {
                            graph.remove_watcher(watcher);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        graph.assert_consistent();
        let total: usize = parents.iter().map(|p| graph.watcher_count(*p)).sum();
        assert_eq!(total, 4 * 50);
    }
}
