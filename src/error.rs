use std::fmt;
use std::path::PathBuf;

use crate::store::Collection;

/// 被阻塞的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedOn {
    Open,
    Reset,
    Write,
}

impl fmt::Display for BlockedOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Reset => "reset",
            Self::Write => "write",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to open catalog at {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: heed::Error,
    },

    #[error("catalog busy: {0} is blocked by another connection")]
    Blocked(BlockedOn),

    #[error("write of {key} failed in {}", join(.failed))]
    Write { key: String, failed: Vec<Collection> },

    #[error("transaction aborted: {0}")]
    Aborted(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("catalog is not open")]
    NotOpen,

    #[error("storage engine error: {0}")]
    Engine(#[from] heed::Error),

    #[error("share snapshot request failed: {0}")]
    Share(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

fn join(collections: &[Collection]) -> String {
    collections.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
}

pub type Result<T> = std::result::Result<T, CatalogError>;
