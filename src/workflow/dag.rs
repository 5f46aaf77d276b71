//! DAG computation for stage scheduling.
//!
//! Pure functions over the fixed stage graph: which stages must run for a
//! request, and in what order.

use crate::models::{Stage, StageStatus};
use std::collections::{BTreeMap, BTreeSet};

/// Errors that can occur during DAG operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DagError {
    /// A cycle was detected in the dependency graph.
    CycleDetected {
        /// The stages involved in the cycle.
        stages: Vec<Stage>,
    },
}

impl std::fmt::Display for DagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected { stages } => {
                let names: Vec<_> = stages.iter().map(Stage::as_str).collect();
                write!(f, "Cycle detected in stage graph involving: {names:?}")
            }
        }
    }
}

impl std::error::Error for DagError {}

/// Stages that must execute for a request.
///
/// A stage is included if it was requested, or if an included stage depends
/// on it and it is not already complete. Dependencies of a complete stage are
/// not followed.
#[must_use]
pub fn closure<F>(requested: &BTreeSet<Stage>, status: F) -> BTreeSet<Stage>
where
    F: Fn(Stage) -> StageStatus,
{
    let mut included: BTreeSet<Stage> = requested.clone();
    let mut pending: Vec<Stage> = requested.iter().copied().collect();

    while let Some(stage) = pending.pop() {
        for &dep in stage.depends_on() {
            if included.contains(&dep) || status(dep) == StageStatus::Complete {
                continue;
            }
            included.insert(dep);
            pending.push(dep);
        }
    }

    included
}

/// Sort stages in topological order (dependencies before dependents).
///
/// Only edges between the given stages are considered. When several stages
/// are ready at once the one declared first in [`Stage`] goes first.
///
/// # Errors
///
/// Returns `DagError::CycleDetected` if the stages cannot be ordered.
pub fn topological_sort(stages: &BTreeSet<Stage>) -> Result<Vec<Stage>, DagError> {
    // Build adjacency list and in-degree count
    let mut in_degree: BTreeMap<Stage, usize> = stages.iter().map(|&s| (s, 0)).collect();
    let mut dependents: BTreeMap<Stage, Vec<Stage>> =
        stages.iter().map(|&s| (s, Vec::new())).collect();

    for &stage in stages {
        for dep in stage.depends_on() {
            if !stages.contains(dep) {
                continue;
            }
            if let Some(list) = dependents.get_mut(dep) {
                list.push(stage);
            }
            if let Some(degree) = in_degree.get_mut(&stage) {
                *degree += 1;
            }
        }
    }

    // Kahn's algorithm; the ready set is ordered so the smallest stage pops first
    let mut ready: BTreeSet<Stage> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&stage, _)| stage)
        .collect();

    let mut result = Vec::with_capacity(stages.len());

    while let Some(current) = ready.pop_first() {
        result.push(current);
        for dependent in dependents.get(&current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if result.len() != stages.len() {
        let remaining = stages
            .iter()
            .filter(|s| !result.contains(s))
            .copied()
            .collect();
        return Err(DagError::CycleDetected { stages: remaining });
    }

    Ok(result)
}
