//! Parallel bzip2-compatible compression and decompression.
//!
//! The crate is organized as one block codec and the pipelines that drive
//! it: [`codec`] holds the transforms and entropy coding for single
//! blocks, [`parse`] recognizes container structure, and [`pipeline`]
//! schedules blocks across worker threads while keeping output in input
//! order. [`process`] is the per-file harness the `parbz` binary runs.

pub mod cli;
pub mod codec;
pub mod error;
pub mod file;
pub mod parse;
pub mod pipeline;
pub mod process;

/// Block encoder: raw bytes to one compressed block.
pub use codec::encode::BlockEncoder;
/// Block decoder stages: parse, transform, emit.
pub use codec::decode::BlockDecoder;
pub use codec::retrieve::Retriever;
/// Stream-level framing and the combined CRC.
pub use codec::stream::StreamAssembler;
/// The data-error taxonomy shared by every decoder stage.
pub use error::DataError;
/// Container structure recognizer.
pub use parse::Parser;

/// Everything the harness passes down into a pipeline run.
#[derive(Debug, Clone)]
pub struct Options {
    /// Worker thread count; 1 selects the serial decompressor.
    pub num_workers: u32,
    /// Input-slot quota bounding splitter read-ahead.
    pub num_slots: u32,
    /// Block-size tier: maximum uncompressed block bytes / 100 000.
    pub bs100k: u32,
    pub decompress: bool,
    /// Decompress and discard (integrity check).
    pub test: bool,
    pub keep: bool,
    pub force: bool,
    pub stdout_mode: bool,
    pub verbose: bool,
    pub print_cctrs: bool,
    /// Disable the quicksort block-sorting path.
    pub exponential: bool,
    /// Compressed-name suffix.
    pub suffix: String,
}
