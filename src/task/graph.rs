//! Prerequisite graph: cycle detection and execution order.
//!
//! Graphs map each task name to the names of its prerequisites.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

pub type Prerequisites = HashMap<String, Vec<String>>;

/// Find a cycle reachable from `start`, returned as `[a, b, ..., a]`.
pub fn find_cycle(start: &str, graph: &Prerequisites) -> Option<Vec<String>> {
    let mut path = Vec::new();
    let mut on_path = HashSet::new();
    let mut done = HashSet::new();
    visit(start, graph, &mut path, &mut on_path, &mut done)
}

fn visit<'a>(
    current: &'a str,
    graph: &'a Prerequisites,
    path: &mut Vec<&'a str>,
    on_path: &mut HashSet<&'a str>,
    done: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    if on_path.contains(current) {
        let from = path.iter().position(|n| *n == current).unwrap_or(0);
        let mut cycle: Vec<String> = path[from..].iter().map(|n| n.to_string()).collect();
        cycle.push(current.to_string());
        return Some(cycle);
    }
    if !done.insert(current) {
        return None;
    }

    path.push(current);
    on_path.insert(current);
    for prereq in graph.get(current).into_iter().flatten() {
        if let Some(cycle) = visit(prereq, graph, path, on_path, done) {
            return Some(cycle);
        }
    }
    on_path.remove(current);
    path.pop();
    None
}

/// Order `nodes` so every prerequisite comes before the tasks needing it.
///
/// Kahn's algorithm with a min-heap on each node's position in `nodes`, so
/// independent tasks keep their definition order.
pub fn execution_order(nodes: &[String], graph: &Prerequisites) -> Result<Vec<String>> {
    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.as_str(), 0)).collect();

    for node in nodes {
        for prereq in graph.get(node).into_iter().flatten() {
            if !position.contains_key(prereq.as_str()) {
                return Err(Error::TaskNotFound(prereq.clone()));
            }
            dependents.entry(prereq.as_str()).or_default().push(node.as_str());
            *in_degree.entry(node.as_str()).or_default() += 1;
        }
    }

    let mut heap: BinaryHeap<Ordered> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| Ordered(position[*name], *name))
        .collect();

    let mut result = Vec::with_capacity(nodes.len());
    while let Some(Ordered(_, name)) = heap.pop() {
        result.push(name.to_string());
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    heap.push(Ordered(position[*dependent], *dependent));
                }
            }
        }
    }

    if result.len() < nodes.len() {
        let stuck = nodes
            .iter()
            .find(|n| !result.contains(n))
            .map(String::as_str)
            .unwrap_or_default();
        return Err(Error::CycleDetected(
            find_cycle(stuck, graph).unwrap_or_else(|| vec![stuck.to_string()]),
        ));
    }
    Ok(result)
}

/// Heap entry ordered by reversed position, turning the max-heap into a min-heap.
#[derive(Debug, PartialEq, Eq)]
struct Ordered<'a>(usize, &'a str);

impl PartialOrd for Ordered<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ordered<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}
