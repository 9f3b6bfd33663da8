use thiserror::Error;

/// Errors produced while loading taxonomy dump files.
#[derive(Error, Debug)]
pub enum TaxonomyError {
    /// Column arguments are 1-based; zero is never a valid index.
    #[error("illegal column index, positive integer needed")]
    IllegalColumnIndex,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid taxid {token:?} on line {line}")]
    Parse { line: usize, token: String },

    #[error("number of ranks exceeds limit of 255")]
    TooManyRanks,

    /// Contract violation: `rank()` requires a store built with rank columns.
    #[error("ranks not loaded, build the taxonomy with Taxonomy::with_ranks")]
    RankNotLoaded,
}

pub type Result<T> = std::result::Result<T, TaxonomyError>;
