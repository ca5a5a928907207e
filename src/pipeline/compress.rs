//! The compression pipeline: one splitter, N block-encoding workers, one
//! muxer reassembling compressed blocks in input order.
//!
//! The splitter cuts the source on exact `bs100k * 100 000`-byte
//! boundaries, so block contents, and therefore the compressed bytes,
//! are independent of the worker count. A slot may still produce two
//! compressed blocks: the run-length stage can expand pathological input
//! past the block limit, in which case the worker encodes the remainder as
//! a second block under the same serial number.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use crate::codec::encode::BlockEncoder;
use crate::codec::stream::StreamAssembler;
use crate::codec::{DEFAULT_PREFIX_FACTOR, DEFAULT_SHALLOW_FACTOR};
use crate::error::FileError;
use crate::file::{ByteSink, ByteSource, FileSpec};
use crate::pipeline::monitor::Monitor;
use crate::pipeline::Report;
use crate::process::thread_fatal;
use crate::Options;

/// One slot of raw input on its way to a worker.
struct S2wBlock {
    id: u64,
    data: Vec<u8>,
}

struct S2wState {
    q: VecDeque<S2wBlock>,
    eof: bool,
}

/// One slot's compressed output (1 or 2 blocks) on its way to the muxer.
struct W2mBlock {
    id: u64,
    /// `(block CRC, compressed bytes)` per encoded block.
    blocks: Vec<(u32, Vec<u8>)>,
}

impl PartialEq for W2mBlock {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for W2mBlock {}
impl PartialOrd for W2mBlock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for W2mBlock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

struct W2mState {
    head: Vec<W2mBlock>,
    working: u32,
    needed: u64,
}

fn split(
    m2s: &Monitor<u32>,
    s2w: &Monitor<S2wState>,
    ispec: &mut FileSpec<ByteSource>,
    slot_bytes: usize,
) -> Result<u64, FileError> {
    let mut id = 0u64;
    let mut total = 0u64;

    loop {
        // Grab a free slot.
        {
            let mut free = m2s.lock_pred();
            while *free == 0 {
                free = m2s.wait(free);
            }
            *free -= 1;
        }

        let mut data = vec![0u8; slot_bytes];
        let n = ispec.read_full(&mut data).map_err(FileError::Read)?;
        let eof = n < slot_bytes;
        data.truncate(n);
        total += n as u64;

        if n == 0 {
            // EOF on the boundary: hand the unused slot straight back.
            let mut free = m2s.lock();
            *free += 1;
            drop(free);
        }

        {
            let mut g = s2w.lock();
            if g.q.is_empty() {
                s2w.broadcast();
            }
            if n > 0 {
                g.q.push_back(S2wBlock { id, data });
            }
            g.eof = eof;
        }

        id += 1;
        if eof {
            return Ok(total);
        }
    }
}

fn work(s2w: &Monitor<S2wState>, w2m: &Monitor<W2mState>, opts: &Options) {
    loop {
        let blk = {
            let mut g = s2w.lock_pred();
            loop {
                if let Some(b) = g.q.pop_front() {
                    break Some(b);
                }
                if g.eof {
                    break None;
                }
                g = s2w.wait(g);
            }
        };

        let Some(blk) = blk else { break };
        work_compress(blk, w2m, opts);
    }

    // Wake the muxer when the last worker leaves an empty queue behind.
    let mut g = w2m.lock();
    g.working -= 1;
    if g.working == 0 && g.head.is_empty() {
        w2m.signal();
    }
}

fn work_compress(blk: S2wBlock, w2m: &Monitor<W2mState>, opts: &Options) {
    let shallow = if opts.exponential { 0 } else { DEFAULT_SHALLOW_FACTOR };
    let mut input = &blk.data[..];
    let mut blocks = Vec::with_capacity(1);

    while !input.is_empty() {
        let mut enc = BlockEncoder::new(
            opts.bs100k as usize * 100_000,
            shallow,
            DEFAULT_PREFIX_FACTOR,
        );
        let (consumed, _overflow) = enc.collect(input);
        input = &input[consumed..];

        let (crc, size) = enc.encode();
        let mut out = Vec::with_capacity(size);
        enc.transmit(&mut out);
        blocks.push((crc, out));
    }

    let done = W2mBlock { id: blk.id, blocks };

    let mut g = w2m.lock();
    let wanted = done.id == g.needed;
    g.head.push(done);
    if wanted {
        w2m.signal();
    }
}

fn mux(
    w2m: &Monitor<W2mState>,
    m2s: &Monitor<u32>,
    ospec: &mut FileSpec<ByteSink>,
    bs100k: u32,
) -> Result<u64, FileError> {
    let mut assembler = StreamAssembler::new(bs100k);
    ospec.write_all(&assembler.header()).map_err(FileError::Write)?;
    let mut out_bytes = assembler.header().len() as u64;

    let mut reord: BinaryHeap<Reverse<W2mBlock>> = BinaryHeap::new();
    let mut needed = 0u64;

    let mut g = w2m.lock_pred();
    loop {
        while g.head.is_empty() && g.working > 0 {
            g = w2m.wait(g);
        }
        if g.head.is_empty() {
            break;
        }
        let batch = std::mem::take(&mut g.head);
        drop(g);

        for b in batch {
            reord.push(Reverse(b));
        }

        // Retire the contiguous prefix.
        while reord.peek().map(|Reverse(b)| b.id) == Some(needed) {
            let Reverse(b) = reord.pop().unwrap();
            for (crc, bytes) in &b.blocks {
                ospec.write_all(bytes).map_err(FileError::Write)?;
                out_bytes += bytes.len() as u64;
                assembler.join(*crc);
            }
            needed += 1;

            let mut free = m2s.lock();
            *free += 1;
            if *free == 1 {
                m2s.signal();
            }
        }

        g = w2m.lock_pred();
        g.needed = needed;
    }
    drop(g);

    ospec.write_all(&assembler.trailer()).map_err(FileError::Write)?;
    out_bytes += assembler.trailer().len() as u64;
    ospec.flush().map_err(FileError::Write)?;
    Ok(out_bytes)
}

/// Run the whole compression pipeline on the calling thread (which serves
/// as the muxer). Worker/splitter failures abort the process through the
/// signal protocol.
pub fn compress(
    mut ispec: FileSpec<ByteSource>,
    mut ospec: FileSpec<ByteSink>,
    opts: &Options,
) -> Result<Report, FileError> {
    let s2w = Monitor::new(S2wState { q: VecDeque::new(), eof: false });
    let w2m = Monitor::new(W2mState { head: Vec::new(), working: opts.num_workers, needed: 0 });
    let m2s = Monitor::new(opts.num_slots);
    let slot_bytes = opts.bs100k as usize * 100_000;

    let in_label = ispec.label.clone();
    let (in_bytes, out_bytes) = std::thread::scope(|scope| {
        let splitter = scope.spawn(|| match split(&m2s, &s2w, &mut ispec, slot_bytes) {
            Ok(n) => n,
            Err(e) => thread_fatal(&in_label, &e),
        });

        for _ in 0..opts.num_workers {
            scope.spawn(|| work(&s2w, &w2m, opts));
        }

        let out = match mux(&w2m, &m2s, &mut ospec, opts.bs100k) {
            Ok(n) => n,
            Err(e) => thread_fatal(&ospec.label, &e),
        };
        (splitter.join().expect("splitter panicked"), out)
    });

    Ok(Report {
        in_bytes,
        out_bytes,
        cctrs: [s2w.counters(), w2m.counters(), m2s.counters()],
        trailing_garbage_bits: 0,
    })
}
