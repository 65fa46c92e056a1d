//! Crate level errors returned by the `dump` facade.

use std::path::PathBuf;

use thiserror::Error;

use crate::{macho::MachOErr, objc::WalkError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    MachO(#[from] MachOErr),

    #[error(transparent)]
    Walk(#[from] WalkError),

    #[error("no slice matches architecture '{0}'")]
    NoMatchingArchitecture(String),
}

pub type Result<T> = std::result::Result<T, Error>;
