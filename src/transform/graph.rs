//! Transform dependency ordering.
//!
//! Computes the execution order of transforms using topological sort
//! (Kahn's algorithm). Among transforms that are ready at the same time the
//! one declared first runs first, so independent transforms keep their
//! configured order.

use std::collections::{BTreeSet, HashMap};

use crate::error::IngestError;
use super::TransformSpec;

/// Edges `producer -> consumers`, where a producer writes a name the consumer reads.
///
/// A transform reading a name it writes itself does not depend on itself; it
/// reads the value that existed before it ran.
pub fn dependency_edges(transforms: &[TransformSpec]) -> Vec<Vec<usize>> {
    let mut producers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, transform) in transforms.iter().enumerate() {
        for output in &transform.outputs {
            producers.entry(output.as_str()).or_default().push(index);
        }
    }

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); transforms.len()];
    for (consumer, transform) in transforms.iter().enumerate() {
        for input in &transform.inputs {
            let Some(sources) = producers.get(input.as_str()) else {
                continue;
            };
            for &producer in sources {
                if producer != consumer && !edges[producer].contains(&consumer) {
                    edges[producer].push(consumer);
                }
            }
        }
    }

    edges
}

/// Order transforms so every producer runs before its consumers.
///
/// # Algorithm
/// 1. Build producer → consumer edges from output/input names
/// 2. Seed the ready set with transforms that have no producers (in-degree = 0)
/// 3. Repeatedly take the lowest declaration index from the ready set
/// 4. If any transforms remain unprocessed, there's a cycle
///
/// # Returns
/// * `Ok(order)` - indices into `transforms` in execution order
/// * `Err(IngestError::TransformCycle)` - labels of the transforms on or behind a cycle
pub fn execution_order(transforms: &[TransformSpec]) -> Result<Vec<usize>, IngestError> {
    let edges = dependency_edges(transforms);

    let mut in_degree = vec![0usize; transforms.len()];
    for consumers in &edges {
        for &consumer in consumers {
            in_degree[consumer] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree == 0)
        .map(|(index, _)| index)
        .collect();

    let mut sorted = Vec::with_capacity(transforms.len());

    while let Some(index) = ready.pop_first() {
        sorted.push(index);

        for &consumer in &edges[index] {
            in_degree[consumer] -= 1;
            if in_degree[consumer] == 0 {
                ready.insert(consumer);
            }
        }
    }

    if sorted.len() != transforms.len() {
        let unprocessed: Vec<String> = (0..transforms.len())
            .filter(|index| !sorted.contains(index))
            .map(|index| transforms[index].label())
            .collect();

        return Err(IngestError::TransformCycle { transforms: unprocessed });
    }

    Ok(sorted)
}
