use thiserror::Error;

/// Returned by blocking engine primitives when the run's cancellation
/// signal fires while a caller is waiting.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("execution canceled")]
pub struct Canceled;
