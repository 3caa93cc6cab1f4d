pub mod estimator;

pub use estimator::{
    canonical_tool_text, CharRatioEstimator, FramingOverhead, SerializedEstimator, TokenEstimator,
};
