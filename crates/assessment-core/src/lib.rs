pub mod error;
pub mod types;

pub use error::{AssessmentError, PipelineResult};
pub use types::{
    AssessmentPayload, AssessmentResult, DailyPoint, Indicator, IndicatorSnapshot, PricePoint,
    RecentWindow, RunMetadata, StorageStatus, StoredAssessment,
};
