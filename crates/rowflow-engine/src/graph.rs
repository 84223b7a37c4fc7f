//! Static shape analysis of the pipeline graph: cycle detection, sink
//! identification, and copy pairing across a hop.

use std::collections::{HashMap, HashSet};

use crate::config::types::PipelineDef;

/// Edges leaving each step: hops plus error handling routes.
fn successors(def: &PipelineDef) -> HashMap<&str, Vec<&str>> {
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &def.steps {
        adj.entry(step.name.as_str()).or_default();
    }
    for hop in &def.hops {
        adj.entry(hop.from.as_str()).or_default().push(hop.to.as_str());
    }
    for step in &def.steps {
        if let Some(eh) = &step.error_handling {
            adj.entry(step.name.as_str())
                .or_default()
                .push(eh.target.as_str());
        }
    }
    adj
}

/// Look for a cycle in the step graph, error routes included. Returns
/// the steps along one cycle when found.
#[must_use]
pub fn find_cycle(def: &PipelineDef) -> Option<Vec<String>> {
    let adj = successors(def);
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_path: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        adj: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        on_path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = on_path.iter().position(|&n| n == node) {
            let mut cycle: Vec<String> = on_path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if !visited.insert(node) {
            return None;
        }
        on_path.push(node);
        if let Some(nexts) = adj.get(node) {
            for next in nexts {
                if let Some(cycle) = visit(next, adj, visited, on_path) {
                    return Some(cycle);
                }
            }
        }
        on_path.pop();
        None
    }

    for step in &def.steps {
        if let Some(cycle) = visit(step.name.as_str(), &adj, &mut visited, &mut on_path) {
            return Some(cycle);
        }
    }
    None
}

/// Steps with no outgoing route (neither hops nor an error target).
/// Their written-row counters are what the pipeline reports as output.
#[must_use]
pub fn sink_steps(def: &PipelineDef) -> HashSet<String> {
    let mut sinks: HashSet<String> = def.steps.iter().map(|s| s.name.clone()).collect();
    for hop in &def.hops {
        sinks.remove(&hop.from);
    }
    for step in &def.steps {
        if step.error_handling.is_some() {
            sinks.remove(&step.name);
        }
    }
    sinks
}

/// Queue wiring between the copies of two adjacent steps.
///
/// Equal copy counts pair up one-to-one, which keeps row order within
/// each lane. Unequal counts get the full cross product so every
/// producer copy can reach every consumer copy.
#[must_use]
pub fn copy_pairs(producer_copies: u32, consumer_copies: u32) -> Vec<(u32, u32)> {
    if producer_copies == consumer_copies {
        (0..producer_copies).map(|i| (i, i)).collect()
    } else {
        let mut pairs = Vec::with_capacity((producer_copies * consumer_copies) as usize);
        for p in 0..producer_copies {
            for c in 0..consumer_copies {
                pairs.push((p, c));
            }
        }
        pairs
    }
}
