//! Errors raised while booting the engine.

use oobx_types::error::OobError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error(transparent)]
    Oob(#[from] OobError),

    /// The directory holding the record database could not be created.
    #[error("Cannot create data directory {}: {source}", path.display())]
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The record database could not be opened or migrated.
    #[error("Record store {} unavailable: {source}", path.display())]
    StoreUnavailable { path: PathBuf, source: OobError },
}

pub type KernelResult<T> = Result<T, KernelError>;
