//! The split/work/merge pipelines.
//!
//! Each file is processed by one splitter thread, N worker threads, and a
//! muxer running on the pipeline's leader thread. Input flows through
//! fixed-size slots bounded by a free-slot counter the muxer refills as it
//! retires work, so the splitter can run at most `num_slots` slots ahead
//! of the writer. Output order is re-established solely by the muxer's
//! min-heap over work-unit identifiers.

pub mod compress;
pub mod decompress;
pub mod monitor;
pub mod serial;

/// Raw-input slot granularity for the decompressors. A compressed block is
/// under ~910 kB, so no block ever spans more than two slots.
pub const SLOT_SIZE: usize = 1 << 20;

/// Decoded-output granularity of the decompressors.
pub const OUT_CHUNK: usize = 1 << 20;

/// What a finished pipeline reports back to the harness.
#[derive(Debug, Default, Clone, Copy)]
pub struct Report {
    pub in_bytes: u64,
    pub out_bytes: u64,
    /// Worker/muxer/splitter monitor contention, as
    /// `(consume attempts, stalls)` pairs.
    pub cctrs: [(u64, u64); 3],
    /// Bits of unrecognized input after the last complete stream
    /// (serial decompressor only).
    pub trailing_garbage_bits: u32,
}
