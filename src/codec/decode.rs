//! Decoding a retrieved block back to plain bytes.
//!
//! [`work`] turns the MTF symbol stream into the transformed block: run
//! symbols expand through bijective base 2, ranks resolve through a
//! sliding-list inverse MTF (16 rows of 16 over an 8 KiB slide area,
//! amortized O(sqrt n) per deep access), and a counting pass threads the
//! inverse-BWT cycle through a packed array where each entry holds
//! `(successor << 8) | byte`.
//!
//! [`BlockDecoder::emit`] then walks that cycle on demand, undoing the
//! initial run-length stage and checksumming the plain bytes. Emission
//! suspends when the output buffer fills and resumes exactly where it
//! stopped, so decoded blocks larger than the caller's buffer stream out
//! in pieces.

use crate::codec::crc::CRC_TABLE;
use crate::codec::retrieve::RetrievedBlock;
use crate::error::DataError;

const ROW_WIDTH: usize = 16;
const NUM_ROWS: usize = 16;
const SLIDE_LENGTH: usize = 8192;

/// Sliding-list inverse MTF dictionary.
struct Imtf {
    slide: Box<[u8; SLIDE_LENGTH]>,
    rows: [usize; NUM_ROWS],
}

impl Imtf {
    fn new(init: &[u8]) -> Self {
        let mut slide = Box::new([0u8; SLIDE_LENGTH]);
        let base = SLIDE_LENGTH - 256;
        slide[base..base + init.len()].copy_from_slice(init);
        let mut rows = [0usize; NUM_ROWS];
        for (i, r) in rows.iter_mut().enumerate() {
            *r = base + i * ROW_WIDTH;
        }
        Imtf { slide, rows }
    }

    /// Fetch the byte at rank `c` and move it to the front.
    fn pull(&mut self, c: u8) -> u8 {
        let c = c as usize;
        if c < ROW_WIDTH {
            // Shallow hit: shift within the front row.
            let row = self.rows[0];
            let byte = self.slide[row + c];
            let mut i = c;
            while i > 0 {
                self.slide[row + i] = self.slide[row + i - 1];
                i -= 1;
            }
            self.slide[row] = byte;
            byte
        } else {
            // The rows slide downward one slot per deep access; rebuild at
            // the bottom of the slide area.
            if self.rows[0] == 0 {
                let mut k = SLIDE_LENGTH;
                for r in (0..NUM_ROWS).rev() {
                    let begin = self.rows[r];
                    for b in (begin..begin + ROW_WIDTH).rev() {
                        k -= 1;
                        self.slide[k] = self.slide[b];
                    }
                    self.rows[r] = k;
                }
            }

            let row_no = c / ROW_WIDTH;
            let begin = self.rows[row_no];
            let pos = begin + c % ROW_WIDTH;
            let byte = self.slide[pos];

            // Shift the row segment right, then ripple the inter-row
            // boundaries: each earlier row grows down by one and donates
            // its last byte upward.
            let mut i = pos;
            while i > begin {
                self.slide[i] = self.slide[i - 1];
                i -= 1;
            }
            let mut r = row_no;
            while r > 0 {
                self.rows[r - 1] -= 1;
                self.slide[self.rows[r]] = self.slide[self.rows[r - 1] + ROW_WIDTH];
                r -= 1;
            }
            self.slide[self.rows[0]] = byte;
            byte
        }
    }
}

/// Run the inverse MTF and build the inverse-BWT cycle.
pub fn work(block: RetrievedBlock) -> Result<BlockDecoder, DataError> {
    if block.randomized {
        return Err(DataError::RandomizedBlock);
    }

    let max = block.max_block_size as usize;
    let mut imtf = Imtf::new(&block.mtf_init[..block.num_used]);
    let mut tt: Vec<u32> = Vec::with_capacity(max);
    let mut ftab = [0u32; 256];

    let mut run_char = block.mtf_init[0];
    let mut shift = 0u32;
    let mut run: u64 = 0;

    for &s in &block.syms {
        if s >= 256 && run <= 900_000 {
            // Zero-run digit; cap growth since a longer run must overflow
            // the block anyway.
            run += ((s & 3) as u64) << shift;
            shift += 1;
            continue;
        }

        if tt.len() as u64 + run > max as u64 {
            return Err(DataError::BlockOverflow);
        }
        ftab[run_char as usize] += run as u32;
        for _ in 0..run {
            tt.push(run_char as u32);
        }

        run_char = imtf.pull(s as u8);
        shift = 0;
        run = 1;
    }

    debug_assert!(run > 0);
    if tt.len() as u64 + run > max as u64 {
        return Err(DataError::BlockOverflow);
    }
    ftab[run_char as usize] += run as u32;
    for _ in 0..run {
        tt.push(run_char as u32);
    }

    let block_size = tt.len() as u32;
    if block.bwt_idx >= block_size {
        return Err(DataError::PrimaryIndex);
    }

    // Counts to start offsets.
    let mut cum = 0u32;
    for f in ftab.iter_mut() {
        let c = *f;
        *f = cum;
        cum += c;
    }
    debug_assert_eq!(cum, block_size);

    // Thread the cycle: entry i's successor field is stored at the sorted
    // position of byte i.
    for i in 0..block_size {
        let uc = (tt[i as usize] & 0xFF) as usize;
        tt[ftab[uc] as usize] |= i << 8;
        ftab[uc] += 1;
    }

    let start = tt[block.bwt_idx as usize];
    Ok(BlockDecoder {
        tt,
        pos: start,
        avail: block_size,
        crc: 0xFFFF_FFFF,
        expect_crc: block.expect_crc,
        rle: Rle::Plain { run: 0, prev: 0 },
        done: false,
    })
}

/// Un-RLE progress carried across emit calls.
enum Rle {
    /// Copying bytes straight off the cycle; `run` counts the current
    /// streak of identical bytes (0..=4), `prev` is the streak byte.
    Plain { run: u8, prev: u8 },
    /// Expanding a count byte: `left` more copies of `byte`.
    Spread { byte: u8, left: u8 },
}

/// Outcome of one emit call.
#[derive(Debug, PartialEq, Eq)]
pub enum Emit {
    /// Block fully emitted (CRC verified); the count is bytes written by
    /// this call.
    Done(usize),
    /// Output buffer filled; call again with fresh space.
    Full,
}

pub struct BlockDecoder {
    tt: Vec<u32>,
    pos: u32,
    avail: u32,
    crc: u32,
    expect_crc: u32,
    rle: Rle,
    done: bool,
}

impl BlockDecoder {
    /// Write decoded bytes into `out`. Returns [`Emit::Full`] when `out`
    /// runs out first.
    pub fn emit(&mut self, out: &mut [u8]) -> Result<Emit, DataError> {
        debug_assert!(!out.is_empty());
        if self.done {
            return Ok(Emit::Done(0));
        }

        let mut crc = self.crc;
        let mut n = 0usize;

        macro_rules! put {
            ($b:expr) => {{
                let b = $b;
                out[n] = b;
                n += 1;
                crc = (crc << 8) ^ CRC_TABLE[((crc >> 24) ^ b as u32) as usize];
            }};
        }

        loop {
            match self.rle {
                Rle::Spread { byte, ref mut left } => {
                    while *left > 0 {
                        if n == out.len() {
                            self.crc = crc;
                            return Ok(Emit::Full);
                        }
                        put!(byte);
                        *left -= 1;
                    }
                    self.rle = Rle::Plain { run: 0, prev: byte };
                }

                Rle::Plain { ref mut run, ref mut prev } => {
                    if *run == 4 {
                        // Four identical bytes must be followed by their
                        // extension count.
                        if self.avail == 0 {
                            return Err(DataError::MissingRunLength);
                        }
                        self.pos = self.tt[(self.pos >> 8) as usize];
                        self.avail -= 1;
                        let byte = *prev;
                        self.rle = Rle::Spread { byte, left: self.pos as u8 };
                        continue;
                    }

                    if self.avail == 0 {
                        self.crc = crc ^ 0xFFFF_FFFF;
                        self.done = true;
                        if self.crc != self.expect_crc {
                            return Err(DataError::BlockCrc);
                        }
                        return Ok(Emit::Done(n));
                    }
                    if n == out.len() {
                        self.crc = crc;
                        return Ok(Emit::Full);
                    }

                    self.pos = self.tt[(self.pos >> 8) as usize];
                    self.avail -= 1;
                    let b = self.pos as u8;
                    put!(b);
                    if *run > 0 && b == *prev {
                        *run += 1;
                    } else {
                        *run = 1;
                        *prev = b;
                    }
                }
            }
        }
    }

    /// The block CRC accumulated so far (final once emission is done).
    pub fn crc(&self) -> u32 {
        self.crc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-built block: symbols and tables for the plain string "nnbaaa"
    /// (the BWT of "banana"), used bytes {a, b, n}.
    fn banana_block() -> RetrievedBlock {
        let mut mtf_init = [0u8; 256];
        mtf_init[0] = b'a';
        mtf_init[1] = b'b';
        mtf_init[2] = b'n';
        RetrievedBlock {
            // MTF ranks of "nnbaaa" with zero runs re-coded; in decoder
            // symbol space ranks stay plain and RUNA=257, RUNB=258.
            syms: vec![2, 257, 2, 2, 258],
            mtf_init,
            num_used: 3,
            bwt_idx: 3,
            expect_crc: crate::codec::crc::crc32(b"banana"),
            randomized: false,
            max_block_size: 900_000,
        }
    }

    #[test]
    fn banana_round_trip() {
        let mut dec = work(banana_block()).unwrap();
        let mut out = [0u8; 16];
        match dec.emit(&mut out).unwrap() {
            Emit::Done(n) => assert_eq!(&out[..n], b"banana"),
            Emit::Full => panic!("buffer was large enough"),
        }
    }

    #[test]
    fn emit_resumes_across_tiny_buffers() {
        let mut dec = work(banana_block()).unwrap();
        let mut result = Vec::new();
        let mut buf = [0u8; 2];
        loop {
            match dec.emit(&mut buf).unwrap() {
                Emit::Done(n) => {
                    result.extend_from_slice(&buf[..n]);
                    break;
                }
                Emit::Full => result.extend_from_slice(&buf),
            }
        }
        assert_eq!(result, b"banana");
    }

    #[test]
    fn crc_mismatch_is_reported_at_completion() {
        let mut block = banana_block();
        block.expect_crc ^= 1;
        let mut dec = work(block).unwrap();
        let mut out = [0u8; 16];
        assert_eq!(dec.emit(&mut out), Err(DataError::BlockCrc));
    }

    #[test]
    fn randomized_block_is_rejected() {
        let mut block = banana_block();
        block.randomized = true;
        assert_eq!(work(block).err(), Some(DataError::RandomizedBlock));
    }

    #[test]
    fn primary_index_must_be_inside_block() {
        let mut block = banana_block();
        block.bwt_idx = 6;
        assert_eq!(work(block).err(), Some(DataError::PrimaryIndex));
    }

    #[test]
    fn overflowing_run_is_rejected() {
        let mut mtf_init = [0u8; 256];
        mtf_init[0] = b'z';
        // A zero-run far past the block limit.
        let syms: Vec<u16> = std::iter::repeat(258).take(40).collect();
        let block = RetrievedBlock {
            syms,
            mtf_init,
            num_used: 1,
            bwt_idx: 0,
            expect_crc: 0,
            randomized: false,
            max_block_size: 900_000,
        };
        assert_eq!(work(block).err(), Some(DataError::BlockOverflow));
    }

    #[test]
    fn deep_imtf_access_crosses_rows() {
        // 200 used values; pulling rank 150 must return value 150 and
        // promote it.
        let init: Vec<u8> = (0..200).collect();
        let mut imtf = Imtf::new(&init);
        assert_eq!(imtf.pull(150), 150);
        assert_eq!(imtf.pull(0), 150);
        assert_eq!(imtf.pull(1), 0);
        // Repeated deep pulls force the slide-area rebuild.
        for i in 0..600u32 {
            let _ = imtf.pull((i % 64 + 100) as u8);
        }
    }
}
