use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StarError {
    #[error("Entry table is full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },

    #[error("Member not found: {0}")]
    NotFound(String),

    #[error("Member already exists: {0}")]
    DuplicateName(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Short read at offset {offset}: expected {expected} bytes")]
    ShortRead { offset: u64, expected: usize },

    #[error("Block {block} out of range (valid {first}..{count})")]
    BlockOutOfRange { block: u32, first: u32, count: u32 },

    #[error("Block {0} reached twice while walking chains")]
    BlockRevisited(u32),

    #[error("Chain of '{name}' ends {missing} bytes short of its recorded size")]
    ChainTooShort { name: String, missing: u64 },

    #[error("Chain starting at block {0} does not terminate")]
    Cycle(u32),

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StarError {
    /// Outcomes a batch driver may report and continue past. The archive is
    /// left untouched when one of these is returned.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StarError::CapacityExceeded { .. }
                | StarError::NotFound(_)
                | StarError::DuplicateName(_)
        )
    }

    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StarError::ShortRead { .. }
                | StarError::BlockOutOfRange { .. }
                | StarError::BlockRevisited(_)
                | StarError::ChainTooShort { .. }
                | StarError::Cycle(_)
                | StarError::MalformedHeader(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StarError>;
