// src/error.rs

use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions for a fetch or compile run. Any of these aborts the run
/// and leaves the artifacts of earlier runs untouched.
#[derive(Debug, Error)]
pub enum Error {
    #[error("fetching {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed input {}{}: {reason}", path.display(), row_suffix(*row))]
    MalformedInput {
        path: PathBuf,
        /// 1-based line in the source file, header included.
        row: Option<usize>,
        reason: String,
    },

    #[error("invalid schema version `{0}`")]
    Version(String),

    #[error("filesystem error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no input files given")]
    NoInput,

    #[error("view `{0}` has not been populated; refresh it first")]
    NotPopulated(&'static str),
}

fn row_suffix(row: Option<usize>) -> String {
    match row {
        Some(r) => format!(" (row {})", r),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn malformed(path: impl Into<PathBuf>, row: Option<usize>, reason: impl Into<String>) -> Self {
        Error::MalformedInput {
            path: path.into(),
            row,
            reason: reason.into(),
        }
    }

    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_message_names_row_and_file() {
        let err = Error::malformed("data/ecs.csv", Some(17), "expected 9 columns, found 8");
        assert_eq!(
            err.to_string(),
            "malformed input data/ecs.csv (row 17): expected 9 columns, found 8"
        );
        let err = Error::malformed("data/ecs.csv", None, "no data rows");
        assert_eq!(err.to_string(), "malformed input data/ecs.csv: no data rows");
        assert_eq!(Error::NoInput.to_string(), "no input files given");
    }
}
