use thiserror::Error;

use crate::tables::TableKind;

/// Failures that abort processing of a single producer page.
///
/// The run records them against the page title and moves on.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("cannot find {{{{ProdLinks}}}}")]
    MissingMarker,
    #[error("found {found} {kind} tables, expected {expected}")]
    TableShape {
        kind: TableKind,
        found: usize,
        expected: &'static str,
    },
    #[error("page does not exist")]
    PageNotFound,
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}
