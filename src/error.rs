use crate::range::{ByteRange, ChunkMap};
use std::fmt;
use std::io;

pub type CloudRangeResult<T> = Result<T, CloudRangeError>;

#[derive(Debug)]
pub enum CloudRangeError {
    Config(String),
    NotFound(String),
    UnsupportedUri(String),
    ReadError(io::Error),
    Timeout(ByteRange),
    PartialRead(PartialRead),
    UnknownTile(usize),
    MissingTiles(Vec<(usize, String)>),
    #[cfg(feature = "async")]
    AsyncJoinError(tokio::task::JoinError),
}

impl fmt::Display for CloudRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudRangeError::PartialRead(partial) => write!(f, "{partial}"),
            e => write!(f, "{:?}", e),
        }
    }
}

impl std::error::Error for CloudRangeError {}

impl CloudRangeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudRangeError::NotFound(_))
    }
}

impl From<io::Error> for CloudRangeError {
    fn from(e: io::Error) -> Self {
        CloudRangeError::ReadError(e)
    }
}

#[cfg(feature = "async")]
impl From<tokio::task::JoinError> for CloudRangeError {
    fn from(e: tokio::task::JoinError) -> Self {
        CloudRangeError::AsyncJoinError(e)
    }
}

/// Outcome of a batch where some ranges failed.
///
/// The chunks that did arrive are kept so the caller can decide whether a
/// partial result is acceptable.
#[derive(Debug)]
pub struct PartialRead {
    pub fetched: ChunkMap,
    pub failed: Vec<(ByteRange, CloudRangeError)>,
}

impl fmt::Display for PartialRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} ranges failed:",
            self.failed.len(),
            self.failed.len() + self.fetched.len()
        )?;
        for (range, reason) in self.failed.iter() {
            write!(f, " {range} ({reason});")?;
        }
        Ok(())
    }
}
