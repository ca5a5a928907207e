//! Error taxonomy for the bzip2 codec and pipelines.
//!
//! Every way a compressed stream can be malformed gets its own variant so
//! diagnostics can name the exact failure. Data errors are fatal to the
//! file being processed; they are never recovered from or resynchronised.

use thiserror::Error;

/// A defect detected in the compressed data itself.
///
/// The variants mirror the checks performed while parsing a stream: header
/// magics, codebook structure, symbol stream termination, and the two CRC
/// levels (per block and per stream).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataError {
    #[error("bad stream header magic")]
    StreamMagic,
    #[error("bad block header magic")]
    BlockMagic,
    #[error("empty source alphabet")]
    EmptyAlphabet,
    #[error("bad number of codebooks")]
    CodebookCount,
    #[error("no coding groups")]
    NoGroups,
    #[error("invalid selector")]
    Selector,
    #[error("invalid delta code")]
    DeltaCode,
    #[error("invalid prefix code")]
    PrefixCode,
    #[error("incomplete prefix code")]
    IncompletePrefixCode,
    #[error("empty block")]
    EmptyBlock,
    #[error("unterminated block")]
    UnterminatedBlock,
    #[error("missing run length")]
    MissingRunLength,
    #[error("block CRC mismatch")]
    BlockCrc,
    #[error("stream CRC mismatch")]
    StreamCrc,
    #[error("block overflow")]
    BlockOverflow,
    #[error("primary index out of range")]
    PrimaryIndex,
    #[error("randomised block not supported")]
    RandomizedBlock,
}

/// Failures that can abort processing of one file.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("read error: {0}")]
    Read(std::io::Error),

    #[error("write error: {0}")]
    Write(std::io::Error),
}

pub type Result<T> = std::result::Result<T, DataError>;
