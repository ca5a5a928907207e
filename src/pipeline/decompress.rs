//! The parallel decompression pipeline.
//!
//! Compressed streams carry no block index, so the splitter reads opaque
//! 1 MiB slots and the workers find block boundaries themselves by
//! scanning for the 48-bit block-header magic. A worker owns every block
//! whose magic *starts* inside the slot it took from the scan chain; a
//! block's tail may continue into the successor slot, which the worker
//! follows (consuming its chain reference on the way out, waiting for the
//! splitter if the successor does not exist yet). Reconstructed blocks
//! enter a priority queue that any worker may service; decoding has
//! absolute priority over scanning, since decoded output is what unblocks
//! the muxer and, through the free-slot counter, the splitter.
//!
//! One monitor guards the scan chain, the decode queue, the EOF flag, and
//! the count of scanning workers. Two wait predicates share its condition
//! variable:
//!
//! * scanner wait: until work exists or everything is provably done,
//!   blocked while `deco_q empty && next_scan none && (!eof || scanning > 0)`
//! * continuation wait: until the successor slot can exist,
//!   blocked while `deco_q empty && next_scan none && !eof`
//!
//! The continuation predicate implies the scanner predicate, so a single
//! conditional broadcast covers both; the only spurious wakeup is a
//! continuation waiter woken by the EOF transition, which happens once.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use crate::codec::bits::BitCursor;
use crate::codec::decode;
use crate::codec::retrieve::{Retrieve, Retriever};
use crate::codec::MAX_BLOCK_SIZE;
use crate::error::{DataError, FileError};
use crate::file::{ByteSink, ByteSource, FileSpec};
use crate::pipeline::monitor::Monitor;
use crate::pipeline::{Report, OUT_CHUNK, SLOT_SIZE};
use crate::process::thread_fatal;
use crate::Options;

const MAGIC_MASK: u64 = 0xFFFF_FFFF_FFFF;
const BLOCK_MAGIC: u64 = crate::codec::BLOCK_MAGIC;

/// One slot of compressed input. `succ` is set by the splitter once the
/// next slot exists; `refs` counts the scan-chain reference plus a
/// possible predecessor chaining in.
struct InputSlot {
    id: u64,
    data: Vec<u8>,
    succ: OnceLock<Arc<InputSlot>>,
    refs: AtomicU32,
}

impl InputSlot {
    fn is_full(&self) -> bool {
        self.data.len() == SLOT_SIZE
    }
}

/// A reconstructed block waiting for a decode worker, keyed by
/// (slot, block-within-slot).
struct DecoTask {
    slot: u64,
    block: u64,
    last_block: bool,
    retr: Retriever,
}

impl PartialEq for DecoTask {
    fn eq(&self, other: &Self) -> bool {
        (self.slot, self.block) == (other.slot, other.block)
    }
}
impl Eq for DecoTask {}
impl PartialOrd for DecoTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DecoTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.slot, self.block).cmp(&(other.slot, other.block))
    }
}

struct ScanState {
    next_scan: Option<Arc<InputSlot>>,
    eof: bool,
    scanning: u32,
    deco_q: BinaryHeap<Reverse<DecoTask>>,
}

/// Work-unit identifier the muxer orders by: lexicographic on
/// (slot, block, sub); the two flags drive cursor advancement.
#[derive(Clone, Copy, PartialEq, Eq)]
struct WorkId {
    slot: u64,
    block: u64,
    last_block: bool,
    sub: u64,
    last_sub: bool,
}

impl WorkId {
    fn key(&self) -> (u64, u64, u64) {
        (self.slot, self.block, self.sub)
    }
}

struct W2mBlock {
    id: WorkId,
    data: Vec<u8>,
}

impl PartialEq for W2mBlock {
    fn eq(&self, other: &Self) -> bool {
        self.id.key() == other.id.key()
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
        self.id.key().cmp(&other.id.key())
    }
}

struct W2mState {
    head: Vec<W2mBlock>,
    working: u32,
    /// Freed input slots not yet credited back to the splitter.
    num_rel: u32,
    needed: (u64, u64, u64),
}

/// Everything a worker needs a handle on.
struct Shared<'a> {
    proceed: &'a Monitor<ScanState>,
    w2m: &'a Monitor<W2mState>,
    label: &'a str,
}

fn split(
    m2s: &Monitor<u32>,
    proceed: &Monitor<ScanState>,
    ispec: &mut FileSpec<ByteSource>,
) -> Result<u64, FileError> {
    let mut prev: Option<Arc<InputSlot>> = None;
    let mut id = 0u64;
    let mut total = 0u64;

    loop {
        {
            let mut free = m2s.lock_pred();
            while *free == 0 {
                free = m2s.wait(free);
            }
            *free -= 1;
        }

        let mut data = vec![0u8; SLOT_SIZE];
        let n = ispec.read_full(&mut data).map_err(FileError::Read)?;
        let eof = n < SLOT_SIZE;
        data.truncate(n);
        total += n as u64;

        let slot = if n > 0 {
            Some(Arc::new(InputSlot {
                id,
                data,
                succ: OnceLock::new(),
                refs: AtomicU32::new(1 + prev.is_some() as u32),
            }))
        } else {
            None
        };

        {
            let mut g = proceed.lock();
            debug_assert!(!g.eof);

            if let (Some(p), Some(s)) = (&prev, &slot) {
                p.succ.set(Arc::clone(s)).ok().expect("successor set twice");
            }

            if g.next_scan.is_none() {
                g.next_scan = slot.clone();
                // Waiters of either predicate can only be blocked while
                // the decode queue is empty too; this covers the EOF
                // transition as well, since eof is set under this lock.
                if g.deco_q.is_empty() {
                    proceed.broadcast();
                }
            }

            if eof {
                g.eof = true;
            }
        }

        if n == 0 {
            // Nothing was read; the reserved slot goes straight back.
            let mut free = m2s.lock();
            *free += 1;
        } else {
            id += 1;
            prev = slot;
        }

        if eof {
            return Ok(total);
        }
    }
}

/// Drop one reference to `slot`; the last holder routes a free-slot
/// credit to the splitter by way of the muxer.
fn release(slot: &Arc<InputSlot>, w2m: &Monitor<W2mState>) {
    if slot.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
        let mut g = w2m.lock();
        g.num_rel += 1;
        if g.num_rel == 1 {
            w2m.signal();
        }
    }
}

/// Decode one reconstructed block and stream its output to the muxer in
/// bounded chunks.
fn decode_task(task: DecoTask, sh: &Shared) {
    let block = task.retr.into_block();
    let mut dec = match decode::work(block) {
        Ok(d) => d,
        Err(e) => thread_fatal(sh.label, &e),
    };

    let mut sub = 0u64;
    loop {
        let mut buf = vec![0u8; OUT_CHUNK];
        let (produced, done) = match dec.emit(&mut buf) {
            Ok(decode::Emit::Done(n)) => (n, true),
            Ok(decode::Emit::Full) => (OUT_CHUNK, false),
            Err(e) => thread_fatal(sh.label, &e),
        };
        buf.truncate(produced);

        let blk = W2mBlock {
            id: WorkId {
                slot: task.slot,
                block: task.block,
                last_block: task.last_block,
                sub,
                last_sub: done,
            },
            data: buf,
        };

        {
            let mut g = sh.w2m.lock();
            debug_assert!(g.working > 0);
            let wanted = g.num_rel == 0 && blk.id.key() == g.needed;
            g.head.push(blk);
            if wanted {
                sh.w2m.signal();
            }
        }

        if done {
            break;
        }
        sub += 1;
    }
}

/// Take the next slot to scan, draining the decode queue first. `None`
/// means end of input with nothing left to do anywhere.
fn get_first(sh: &Shared) -> Option<Arc<InputSlot>> {
    let mut g = sh.proceed.lock_pred();
    g.scanning -= 1;
    let mut first_pass = true;

    loop {
        if let Some(Reverse(task)) = g.deco_q.pop() {
            drop(g);
            decode_task(task, sh);
            g = sh.proceed.lock_pred();
        } else if g.next_scan.is_some() {
            g.scanning += 1;
            let s = g.next_scan.take().unwrap();
            g.next_scan = s.succ.get().cloned();
            return Some(s);
        } else if g.eof && g.scanning == 0 {
            // The last scanner to retire wakes the rest so they observe
            // the same terminal state; later arrivals were woken already.
            if first_pass {
                sh.proceed.broadcast();
            }
            return None;
        } else {
            g = sh.proceed.wait(g);
        }
        first_pass = false;
    }
}

/// The current slot ran dry mid-block or mid-scan: follow the chain.
/// Consumes the caller's reference on `slot`; `None` means the input
/// ended instead (the reference is consumed either way).
fn get_second(slot: &Arc<InputSlot>, sh: &Shared) -> Option<Arc<InputSlot>> {
    let mut g = sh.proceed.lock_pred();
    loop {
        if let Some(Reverse(task)) = g.deco_q.pop() {
            drop(g);
            decode_task(task, sh);
            g = sh.proceed.lock_pred();
        } else if g.next_scan.is_some() || g.eof {
            // Once anything later is scannable, or EOF is set, our
            // successor link is settled.
            let next = slot.succ.get().cloned();
            drop(g);
            release(slot, sh.w2m);
            return next;
        } else {
            g = sh.proceed.wait(g);
        }
    }
}

/// Queue a reconstructed block for decoding.
fn flush_block(task: DecoTask, sh: &Shared) {
    let mut g = sh.proceed.lock_pred();
    debug_assert!(g.scanning > 0);
    if g.deco_q.is_empty() && g.next_scan.is_none() {
        sh.proceed.broadcast();
    }
    g.deco_q.push(Reverse(task));
}

/// Consumed-bit position of the cursor relative to the current slot's
/// first byte; negative while buffered bits still belong to the
/// predecessor slot.
fn scan_pos(cursor: &BitCursor) -> i64 {
    cursor.pos() as i64 * 8 - cursor.live() as i64
}

fn missing_magic(slot: u64, label: &str) -> ! {
    if slot == 0 {
        thread_fatal(label, &DataError::StreamMagic)
    } else {
        thread_fatal(label, &DataError::BlockMagic)
    }
}

/// Quick shape check for a magic-free slot zero: a bzip2 stream must open
/// with `BZh1`..`BZh9`.
fn looks_like_stream(data: &[u8]) -> bool {
    data.len() >= 4
        && data[0] == 0x42
        && data[1] == 0x5A
        && data[2] == 0x68
        && (0x31..=0x39).contains(&data[3])
}

/// How the hunt for the next block-header magic ended.
enum NextMagic {
    /// Starts inside the worker's own slot: decode it too.
    Owned,
    /// Starts inside the successor (that worker's business) or the input
    /// ended. `holding` is false when the chain walk already consumed our
    /// slot reference.
    Foreign { holding: bool },
}

fn work(sh: &Shared) {
    'again: loop {
        let Some(first) = get_first(sh) else {
            // Last worker out signals a possibly idle muxer.
            let mut g = sh.w2m.lock();
            g.working -= 1;
            if g.working == 0 && g.num_rel == 0 && g.head.is_empty() {
                sh.w2m.signal();
            }
            return;
        };

        let first_id = first.id;
        let mut cursor = BitCursor::new();
        let mut cur = first;
        let mut chained = false;
        let mut block_id = 0u64;
        let mut search: u64 = MAGIC_MASK;

        // Find the first magic starting inside this slot. The match may
        // complete a few bits into the successor; one that both starts
        // and completes there belongs to the successor's worker, and a
        // slot without any owned magic is only legitimate at a stream
        // tail.
        loop {
            match cursor.take_bit(&cur.data) {
                Some(bit) => {
                    search = ((search << 1) | bit as u64) & MAGIC_MASK;
                    if search == BLOCK_MAGIC {
                        if chained && scan_pos(&cursor) - 48 >= 0 {
                            missing_magic(first_id, sh.label);
                        }
                        break;
                    }
                    if chained && scan_pos(&cursor) >= 47 {
                        // No further match can start back in our slot.
                        missing_magic(first_id, sh.label);
                    }
                }
                None => {
                    if !cur.is_full() {
                        // A straddling candidate that ran out of input is
                        // a truncated stream.
                        if chained {
                            missing_magic(first_id, sh.label);
                        }
                        // Short (final) slot with no block start: stream
                        // trailers land here. Raw garbage is only
                        // tolerable past slot zero.
                        if first_id == 0 && !looks_like_stream(&cur.data) {
                            thread_fatal(sh.label, &DataError::StreamMagic);
                        }
                        release(&cur, sh.w2m);
                        continue 'again;
                    }
                    match get_second(&cur, sh) {
                        Some(next) => {
                            cur = next;
                            chained = true;
                            cursor.rebase();
                        }
                        None => missing_magic(first_id, sh.label),
                    }
                }
            }
        }

        // Decode blocks until one's successor magic starts past our slot.
        loop {
            let mut retr = Retriever::new(MAX_BLOCK_SIZE as u32);
            loop {
                match retr.retrieve(&mut cursor, &cur.data) {
                    Ok(Retrieve::Done) => break,
                    Ok(Retrieve::More) => {
                        // A compressed block fits in well under one slot,
                        // so it can span two but never three.
                        if !cur.is_full() || chained {
                            thread_fatal(sh.label, &DataError::UnterminatedBlock);
                        }
                        match get_second(&cur, sh) {
                            Some(next) => {
                                cur = next;
                                chained = true;
                                cursor.rebase();
                            }
                            None => {
                                thread_fatal(sh.label, &DataError::UnterminatedBlock)
                            }
                        }
                    }
                    Err(e) => thread_fatal(sh.label, &e),
                }
            }

            // Hunt for the next magic to learn whether it is still ours.
            search = MAGIC_MASK;
            let next = loop {
                match cursor.take_bit(&cur.data) {
                    Some(bit) => {
                        search = ((search << 1) | bit as u64) & MAGIC_MASK;
                        if search == BLOCK_MAGIC {
                            if !chained || scan_pos(&cursor) - 48 < 0 {
                                break NextMagic::Owned;
                            }
                            break NextMagic::Foreign { holding: true };
                        }
                    }
                    None => {
                        if !cur.is_full() {
                            break NextMagic::Foreign { holding: true };
                        }
                        // The next header begins within bits of the block
                        // end; a whole further slot without one means the
                        // data is bad, and following the chain any deeper
                        // would consume a successor reference that is not
                        // ours to spend.
                        if chained {
                            thread_fatal(sh.label, &DataError::BlockMagic);
                        }
                        match get_second(&cur, sh) {
                            Some(next) => {
                                cur = next;
                                chained = true;
                                cursor.rebase();
                            }
                            None => break NextMagic::Foreign { holding: false },
                        }
                    }
                }
            };

            match next {
                NextMagic::Owned => {
                    flush_block(
                        DecoTask { slot: first_id, block: block_id, last_block: false, retr },
                        sh,
                    );
                    block_id += 1;
                }
                NextMagic::Foreign { holding } => {
                    if holding {
                        release(&cur, sh.w2m);
                    }
                    flush_block(
                        DecoTask { slot: first_id, block: block_id, last_block: true, retr },
                        sh,
                    );
                    continue 'again;
                }
            }
        }
    }
}

fn mux(
    w2m: &Monitor<W2mState>,
    m2s: &Monitor<u32>,
    ospec: &mut FileSpec<ByteSink>,
) -> Result<u64, FileError> {
    let mut reord: BinaryHeap<Reverse<W2mBlock>> = BinaryHeap::new();
    let mut needed = (0u64, 0u64, 0u64);
    let mut out_bytes = 0u64;

    let mut g = w2m.lock_pred();
    loop {
        while g.head.is_empty() && g.working > 0 && g.num_rel == 0 {
            g = w2m.wait(g);
        }

        let batch = std::mem::take(&mut g.head);
        let num_rel = std::mem::replace(&mut g.num_rel, 0);
        let working = g.working;
        drop(g);

        if num_rel > 0 {
            let mut free = m2s.lock();
            if *free == 0 {
                m2s.signal();
            }
            *free += num_rel;
        }

        for b in batch {
            reord.push(Reverse(b));
        }

        // Retire the contiguous prefix in work-unit order.
        while reord.peek().map(|Reverse(b)| b.id.key()) == Some(needed) {
            let Reverse(b) = reord.pop().unwrap();
            ospec.write_all(&b.data).map_err(FileError::Write)?;
            out_bytes += b.data.len() as u64;

            needed = if b.id.last_sub {
                if b.id.last_block {
                    (b.id.slot + 1, 0, 0)
                } else {
                    (b.id.slot, b.id.block + 1, 0)
                }
            } else {
                (b.id.slot, b.id.block, b.id.sub + 1)
            };
        }

        g = w2m.lock_pred();
        g.needed = needed;

        if working == 0 {
            break;
        }
    }
    drop(g);

    ospec.flush().map_err(FileError::Write)?;
    Ok(out_bytes)
}

/// Run the parallel decompression pipeline; the calling thread is the
/// muxer.
pub fn decompress(
    mut ispec: FileSpec<ByteSource>,
    mut ospec: FileSpec<ByteSink>,
    opts: &Options,
) -> Result<Report, FileError> {
    let proceed = Monitor::new(ScanState {
        next_scan: None,
        eof: false,
        scanning: opts.num_workers,
        deco_q: BinaryHeap::new(),
    });
    let w2m = Monitor::new(W2mState {
        head: Vec::new(),
        working: opts.num_workers,
        num_rel: 0,
        needed: (0, 0, 0),
    });
    let m2s = Monitor::new(opts.num_slots);

    let in_label = ispec.label.clone();
    let sh = Shared { proceed: &proceed, w2m: &w2m, label: in_label.as_str() };

    let (in_bytes, out_bytes) = std::thread::scope(|scope| {
        let splitter = scope.spawn(|| match split(&m2s, &proceed, &mut ispec) {
            Ok(n) => n,
            Err(e) => thread_fatal(&in_label, &e),
        });

        for _ in 0..opts.num_workers {
            let sh = &sh;
            scope.spawn(move || work(sh));
        }

        let out = match mux(&w2m, &m2s, &mut ospec) {
            Ok(n) => n,
            Err(e) => thread_fatal(&ospec.label, &e),
        };
        (splitter.join().expect("splitter panicked"), out)
    });

    Ok(Report {
        in_bytes,
        out_bytes,
        cctrs: [proceed.counters(), w2m.counters(), m2s.counters()],
        trailing_garbage_bits: 0,
    })
}
