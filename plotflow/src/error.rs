//! Host-facing error type.

use thiserror::Error;

use crate::array::ArrayError;

/// Validation failures raised synchronously to the host. Everything past
/// validation is either a programmer invariant (panic) or a tolerable
/// stream event (logged).
#[derive(Debug, Error)]
pub enum PlotError {
    #[error(transparent)]
    Array(#[from] ArrayError),

    #[error("figure data cannot be added after drawing started")]
    IngestAfterSeal,

    #[error("selection map is already initialized")]
    SelectionAlreadyInitialized,

    #[error("unknown canvas config id {0}")]
    UnknownConfig(i32),

    #[error("invalid item id {0}")]
    InvalidItemId(i32),

    #[error("{name}: expected shape ({rows}, {cols}), got ({got_rows}, {got_cols})")]
    ShapeMismatch {
        name: &'static str,
        rows: i32,
        cols: i32,
        got_rows: i32,
        got_cols: i32,
    },
}
