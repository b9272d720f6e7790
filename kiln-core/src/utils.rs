//! Utility functions for the object pool

/// Dependency resolution utilities
pub mod dependency {
    use std::collections::{HashMap, HashSet};

    use crate::type_key::TypeKey;

    /// Tracks types currently being constructed to detect circular dependencies.
    ///
    /// Keeps insertion order so error messages can show the resolution chain.
    /// Not synchronized on its own; the pool only touches it while holding its
    /// registry lock.
    #[derive(Debug, Default)]
    pub struct CreationTracker {
        creating: Vec<TypeKey>,
    }

    impl CreationTracker {
        pub fn new() -> Self {
            Self::default()
        }

        /// Checks if a type is currently being constructed.
        pub fn is_creating(&self, key: &TypeKey) -> bool {
            self.creating.contains(key)
        }

        /// Marks a type as being constructed.
        ///
        /// Returns `false` if it already was (circular dependency).
        pub fn start_creating(&mut self, key: TypeKey) -> bool {
            if self.is_creating(&key) {
                return false;
            }
            self.creating.push(key);
            true
        }

        /// Marks a type as finished.
        pub fn finish_creating(&mut self, key: &TypeKey) {
            if let Some(pos) = self.creating.iter().rposition(|k| k == key) {
                self.creating.remove(pos);
            }
        }

        /// Resolution chain from the first in-progress type to `key`.
        pub fn chain_to(&self, key: &TypeKey) -> Vec<&'static str> {
            let start = self
                .creating
                .iter()
                .position(|k| k == key)
                .unwrap_or(0);
            self.creating[start..]
                .iter()
                .map(TypeKey::name)
                .chain(std::iter::once(key.name()))
                .collect()
        }

        pub fn depth(&self) -> usize {
            self.creating.len()
        }
    }

    /// Finds a cycle reachable from `root` in a dependency graph.
    ///
    /// Returns the cycle as a chain of type names whose first and last entries
    /// are the same type.
    pub fn find_cycle(
        root: TypeKey,
        graph: &HashMap<TypeKey, Vec<TypeKey>>,
    ) -> Option<Vec<&'static str>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        detect_cycle_dfs(root, graph, &mut visited, &mut stack)
    }

    fn detect_cycle_dfs(
        node: TypeKey,
        graph: &HashMap<TypeKey, Vec<TypeKey>>,
        visited: &mut HashSet<TypeKey>,
        stack: &mut Vec<TypeKey>,
    ) -> Option<Vec<&'static str>> {
        visited.insert(node);
        stack.push(node);

        if let Some(deps) = graph.get(&node) {
            for dep in deps {
                if let Some(start) = stack.iter().position(|k| k == dep) {
                    let mut cycle: Vec<_> = stack[start..].iter().map(TypeKey::name).collect();
                    cycle.push(dep.name());
                    return Some(cycle);
                }
                if !visited.contains(dep) {
                    if let Some(cycle) = detect_cycle_dfs(*dep, graph, visited, stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        None
    }
}

#[cfg(test)]
mod tests {
    mod dependency_tests {
        use super::super::dependency::*;
        use crate::type_key::TypeKey;
        use std::collections::HashMap;

        struct ServiceA;
        struct ServiceB;
        struct ServiceC;

        #[test]
        fn test_creation_tracker() {
            let mut tracker = CreationTracker::new();
            let a = TypeKey::of::<ServiceA>();

            assert!(!tracker.is_creating(&a));
            assert!(tracker.start_creating(a));
            assert!(tracker.is_creating(&a));

            // Starting again means a circular dependency
            assert!(!tracker.start_creating(a));

            tracker.finish_creating(&a);
            assert!(!tracker.is_creating(&a));
            assert_eq!(tracker.depth(), 0);
        }

        #[test]
        fn test_chain_to() {
            let mut tracker = CreationTracker::new();
            let a = TypeKey::of::<ServiceA>();
            let b = TypeKey::of::<ServiceB>();

            tracker.start_creating(a);
            tracker.start_creating(b);

            let chain = tracker.chain_to(&a);
            assert_eq!(chain, vec![a.name(), b.name(), a.name()]);
        }

        #[test]
        fn test_find_cycle() {
            let a = TypeKey::of::<ServiceA>();
            let b = TypeKey::of::<ServiceB>();
            let c = TypeKey::of::<ServiceC>();

            let mut graph = HashMap::new();
            graph.insert(a, vec![b]);
            graph.insert(b, vec![c]);
            graph.insert(c, vec![a]);

            let cycle = find_cycle(a, &graph).expect("cycle expected");
            assert_eq!(cycle, vec![a.name(), b.name(), c.name(), a.name()]);
        }

        #[test]
        fn test_find_cycle_self_dependency() {
            let a = TypeKey::of::<ServiceA>();
            let mut graph = HashMap::new();
            graph.insert(a, vec![a]);

            assert_eq!(find_cycle(a, &graph).map(|c| c.len()), Some(2));
        }

        #[test]
        fn test_diamond_is_not_a_cycle() {
            let a = TypeKey::of::<ServiceA>();
            let b = TypeKey::of::<ServiceB>();
            let c = TypeKey::of::<ServiceC>();

            let mut graph = HashMap::new();
            graph.insert(a, vec![b, c]);
            graph.insert(b, vec![c]);
            graph.insert(c, vec![]);

            assert!(find_cycle(a, &graph).is_none());
        }
    }
}
