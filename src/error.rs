use core::fmt;

/// Result alias for `hddc`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the clustering engine.
///
/// Soft conditions (iteration cap reached, cooperative cancellation) are not
/// errors; they are reported through [`crate::model::FitStatus`] so that
/// partial results stay usable.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Input was empty.
    EmptyInput,

    /// Input contained a NaN or infinite value.
    NonFiniteInput {
        /// Row of the offending entry.
        row: usize,
        /// Column of the offending entry.
        col: usize,
    },

    /// Matrix dimension mismatch.
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// Invalid number of clusters requested.
    InvalidClusterCount {
        /// Requested count.
        requested: usize,
        /// Number of observations.
        n_items: usize,
    },

    /// A cluster's weighted covariance collapsed: near-zero responsibility
    /// mass, or a requested intrinsic dimension at or beyond the available
    /// rank. Recoverable by dropping the cluster when the caller enables it.
    NumericalDegeneracy {
        /// Index of the degenerate cluster.
        cluster: usize,
        /// What collapsed.
        message: String,
    },

    /// Inconsistent configuration, rejected before any EM iteration runs.
    Configuration {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyInput => write!(f, "empty input provided"),
            Error::NonFiniteInput { row, col } => {
                write!(f, "non-finite value at row {row}, column {col}")
            }
            Error::DimensionMismatch { expected, found } => {
                write!(f, "dimension mismatch: expected {expected}, found {found}")
            }
            Error::InvalidClusterCount { requested, n_items } => {
                write!(f, "cannot fit {requested} clusters to {n_items} observations")
            }
            Error::NumericalDegeneracy { cluster, message } => {
                write!(f, "numerical degeneracy in cluster {cluster}: {message}")
            }
            Error::Configuration { name, message } => {
                write!(f, "invalid configuration '{name}': {message}")
            }
        }
    }
}

impl std::error::Error for Error {}
