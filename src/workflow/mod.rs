//! Stage task graph.
//!
//! Planning happens in two steps. [`canonicalize`] rewrites the requested
//! stage set into the set that will actually be dispatched (this is where
//! `annotation` is folded into `variant_load`). [`dag::closure`] and
//! [`dag::topological_sort`] then work on that canonical set without knowing
//! anything about the merge rule.

pub mod dag;

pub use dag::DagError;

use crate::models::{Stage, StageStatus};
use std::collections::BTreeSet;

/// Requested stages after the merge rule has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    /// Stages to dispatch.
    pub stages: BTreeSet<Stage>,
    /// `annotation` was requested together with `variant_load` and will run
    /// inside that stage's invocation.
    pub annotation_folded: bool,
}

/// Apply the merge rule to a requested stage list.
///
/// An empty request means every stage.
#[must_use]
pub fn canonicalize(requested: &[Stage]) -> CanonicalRequest {
    let mut stages: BTreeSet<Stage> = if requested.is_empty() {
        Stage::ALL.into_iter().collect()
    } else {
        requested.iter().copied().collect()
    };

    let annotation_folded =
        stages.contains(&Stage::Annotation) && stages.contains(&Stage::VariantLoad);
    if annotation_folded {
        stages.remove(&Stage::Annotation);
    }

    CanonicalRequest {
        stages,
        annotation_folded,
    }
}

/// One entry of an execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStage {
    /// Stage to dispatch.
    pub stage: Stage,
    /// Run the variant load workflow in annotation-only mode.
    pub annotation_only: bool,
    /// This invocation also covers `annotation`.
    pub folds_annotation: bool,
}

/// Ordered stages for one run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionPlan {
    /// Stages in dependency order.
    pub stages: Vec<PlannedStage>,
}

impl ExecutionPlan {
    /// Stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<Stage> {
        self.stages.iter().map(|p| p.stage).collect()
    }
}

/// Build the execution plan for a request.
///
/// # Errors
///
/// Returns `DagError` if the stages cannot be ordered.
pub fn plan<F>(requested: &[Stage], status: F) -> Result<ExecutionPlan, DagError>
where
    F: Fn(Stage) -> StageStatus,
{
    let request = canonicalize(requested);
    let included = dag::closure(&request.stages, status);
    let order = dag::topological_sort(&included)?;

    let stages = order
        .into_iter()
        .map(|stage| PlannedStage {
            stage,
            annotation_only: stage == Stage::Annotation,
            folds_annotation: stage == Stage::VariantLoad && request.annotation_folded,
        })
        .collect();

    Ok(ExecutionPlan { stages })
}
