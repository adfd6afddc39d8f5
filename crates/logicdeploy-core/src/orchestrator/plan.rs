//! File-level dependency graph and chunk levels for the chunked strategy.
//!
//! Each logic file is one chunk. An edge `A → B` means "B depends on A":
//! B instantiates, calls or types against a POU or type defined in A, so A
//! must be applied first.
//!
//! Levels are Kahn waves: every chunk in level `n` depends only on chunks in
//! levels `< n`, so chunks within a level can be applied concurrently.

use std::collections::{BTreeMap, BTreeSet};

use logicdeploy_safety::ExtractedFacts;
use serde::{Deserialize, Serialize};

use crate::domain::{PipelineError, PipelineResult};

/// Chunk levels in application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub levels: Vec<Vec<String>>,
    /// chunk -> chunks it depends on
    pub depends_on: BTreeMap<String, BTreeSet<String>>,
}

impl ChunkPlan {
    pub fn chunk_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

/// Build the dependency graph from extracted facts.
///
/// Names defined in more than one file resolve to every definer.
pub fn dependency_graph(facts: &ExtractedFacts) -> BTreeMap<String, BTreeSet<String>> {
    let mut definers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for file in &facts.files {
        for name in file.defines_pous.iter().chain(&file.defines_types) {
            definers.entry(name.as_str()).or_default().push(file.path.as_str());
        }
    }

    facts
        .files
        .iter()
        .map(|file| {
            let deps = file
                .references
                .iter()
                .filter_map(|name| definers.get(name.as_str()))
                .flatten()
                .filter(|path| **path != file.path)
                .map(|path| path.to_string())
                .collect();
            (file.path.clone(), deps)
        })
        .collect()
}

/// Compute chunk levels.
///
/// # Errors
///
/// Returns `PipelineError::InvalidPlan` naming the files on a dependency cycle.
pub fn plan_chunks(facts: &ExtractedFacts) -> PipelineResult<ChunkPlan> {
    let depends_on = dependency_graph(facts);
    let levels = kahn_levels(&depends_on)?;
    Ok(ChunkPlan { levels, depends_on })
}

fn kahn_levels(depends_on: &BTreeMap<String, BTreeSet<String>>) -> PipelineResult<Vec<Vec<String>>> {
    let mut in_degree: BTreeMap<&str, usize> = depends_on
        .iter()
        .map(|(id, deps)| (id.as_str(), deps.len()))
        .collect();
    let mut downstream: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, deps) in depends_on {
        for dep in deps {
            downstream.entry(dep.as_str()).or_default().push(id.as_str());
        }
    }

    let mut levels = Vec::new();
    let mut frontier: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut placed = 0;

    while !frontier.is_empty() {
        let mut next = Vec::new();
        for id in &frontier {
            in_degree.remove(id);
            for dependent in downstream.get(id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        placed += frontier.len();
        levels.push(frontier.iter().map(|s| s.to_string()).collect());
        next.sort_unstable();
        frontier = next;
    }

    if placed != depends_on.len() {
        let cycle: Vec<&str> = in_degree.keys().copied().collect();
        return Err(PipelineError::InvalidPlan(format!(
            "dependency cycle between {}",
            cycle.join(", ")
        )));
    }
    Ok(levels)
}
