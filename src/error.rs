use std::{fmt, io};

use thiserror::Error;

/// Which raw memory source a failed request went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Incremental growth of the break region.
    Break,
    /// A fresh anonymous mapping.
    Mapping,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Break => f.write_str("break region"),
            Strategy::Mapping => f.write_str("anonymous mapping"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AllocError {
    /// The underlying memory source refused to hand out more memory.
    #[error("could not allocate requested memory: {strategy} refused {requested} bytes")]
    SourceExhausted {
        strategy: Strategy,
        requested: usize,
        #[source]
        source: io::Error,
    },

    #[error("zero-allocation of {count} elements of {elem_size} bytes overflows usize")]
    SizeOverflow { count: usize, elem_size: usize },

    #[error("request of {size} bytes is too large to carry a block header")]
    RequestTooLarge { size: usize },

    /// The pointer was never handed out by this allocator.
    #[error("pointer {addr:#x} was not returned by this allocator")]
    InvalidRelease { addr: usize },

    #[error("block at {addr:#x} is already free")]
    DoubleRelease { addr: usize },

    #[error("invalid allocator configuration: {0}")]
    InvalidConfig(String),
}

impl AllocError {
    /// Whether this error means the memory source ran dry, as opposed to a
    /// caller mistake.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, AllocError::SourceExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_message_names_the_strategy() {
        let err = AllocError::SourceExhausted {
            strategy: Strategy::Mapping,
            requested: 8192,
            source: io::Error::from(io::ErrorKind::OutOfMemory),
        };

        assert!(err.is_exhaustion());
        assert_eq!(
            err.to_string(),
            "could not allocate requested memory: anonymous mapping refused 8192 bytes"
        );
    }

    #[test]
    fn caller_mistakes_are_not_exhaustion() {
        let err = AllocError::DoubleRelease { addr: 0x1000 };

        assert!(!err.is_exhaustion());
        assert_eq!(err.to_string(), "block at 0x1000 is already free");
    }
}
