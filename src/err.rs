use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io;

#[derive(Debug)]
pub enum WorldError {
    /// The actor that owned the request exited before answering.
    Removed,
    /// No answer arrived in time; the request was withdrawn.
    Timeout,
    Io(io::Error),
    Corrupt(String),
    UnsupportedCompression(u8),
    ChunkTooLarge(usize),
    /// A record would start past the last sector offset the region header can express.
    RegionFull(usize),
    /// A block range whose volume can't be served in one request.
    CuboidTooLarge(u64),
    OutOfBounds { x: i32, y: i32, z: i32 },
    Nbt(String),
    Any(String),
}

impl WorldError {
    /// Fatal errors leave persisted state in an unknown condition and must not be retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            WorldError::Removed => false,
            WorldError::Timeout => false,
            WorldError::Io(_) => true,
            WorldError::Corrupt(_) => false,
            WorldError::UnsupportedCompression(_) => false,
            WorldError::ChunkTooLarge(_) => true,
            WorldError::RegionFull(_) => true,
            WorldError::CuboidTooLarge(_) => false,
            WorldError::OutOfBounds { .. } => false,
            WorldError::Nbt(_) => false,
            WorldError::Any(_) => true,
        }
    }

    /// Whether this error describes unreadable persisted data rather than a failing disk.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            WorldError::Corrupt(_) | WorldError::UnsupportedCompression(_) | WorldError::Nbt(_)
        )
    }
}

impl Display for WorldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::Removed => write!(f, "Target was removed"),
            WorldError::Timeout => write!(f, "Request timed out"),
            WorldError::Io(e) => write!(f, "IO error: {}", e),
            WorldError::Corrupt(v) => write!(f, "Corrupted chunk: {}", v),
            WorldError::UnsupportedCompression(v) => {
                write!(f, "Unsupported compression scheme: {}", v)
            }
            WorldError::ChunkTooLarge(v) => write!(f, "Chunk payload too large: {} B", v),
            WorldError::RegionFull(v) => write!(f, "No sector offset left for {} sectors", v),
            WorldError::CuboidTooLarge(v) => write!(f, "Cuboid too large: {} blocks", v),
            WorldError::OutOfBounds { x, y, z } => {
                write!(f, "Position out of bounds: {}, {}, {}", x, y, z)
            }
            WorldError::Nbt(v) => write!(f, "NBT error: {}", v),
            WorldError::Any(v) => write!(f, "{}", v),
        }
    }
}

impl Error for WorldError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorldError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorldError {
    fn from(e: io::Error) -> Self {
        WorldError::Io(e)
    }
}

impl From<String> for WorldError {
    fn from(s: String) -> Self {
        WorldError::Any(s)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for WorldError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        WorldError::Removed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for WorldError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        WorldError::Removed
    }
}
