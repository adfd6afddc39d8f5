use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("{path} is not valid UTF-8 text")]
    Encoding { path: PathBuf },

    #[error("no logic files found under {path}")]
    NoLogicFiles { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, SafetyError>;
