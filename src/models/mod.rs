//! Data model for ingestion runs.

mod stage;
mod unit;

pub use stage::{
    ParseStageError, Stage, StageRecord, StageState, StageStatus, TransitionError,
};
pub use unit::{
    AnalysisGrouping, DatabaseBinding, InputFile, UnitOfWork, UnitOfWorkError,
    HUMAN_TAXONOMY_ID,
};
