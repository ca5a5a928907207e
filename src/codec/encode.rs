//! The block encoder: raw bytes in, one complete compressed block out.
//!
//! Pipeline per block: RLE1 collection (with CRC and used-byte map) →
//! Burrows-Wheeler transform → move-to-front with zero-run coding →
//! codebook clustering → bit-exact emission. The encoder is two-phase:
//! [`BlockEncoder::encode`] does all the work and reports the block CRC
//! and the exact compressed size; [`BlockEncoder::transmit`] then emits
//! exactly that many bytes. Splitting the phases lets the caller place the
//! output without guessing at bounds.

use crate::codec::bits::BitWriter;
use crate::codec::prefix::{assign_prefix_codes, PrefixPlan};
use crate::codec::rle::Collector;
use crate::codec::{bwt, mtf, GROUP_SIZE, MAX_TREES};

/// Everything computed by the encode phase, waiting for transmission.
struct Prepared {
    crc: u32,
    bwt_idx: u32,
    in_use: [bool; 256],
    mtfv: Vec<u16>,
    nmtf: usize,
    plan: PrefixPlan,
    /// Selector stream after its own move-to-front, including the
    /// byte-alignment padding selectors.
    selector_mtf: Vec<u8>,
    size: usize,
}

pub struct BlockEncoder {
    shallow_factor: u32,
    prefix_factor: u32,
    collector: Collector,
    prepared: Option<Prepared>,
}

impl BlockEncoder {
    /// `max_block_size` is the bs100k tier in bytes (100 000 … 900 000).
    pub fn new(max_block_size: usize, shallow_factor: u32, prefix_factor: u32) -> Self {
        assert!(prefix_factor > 0);
        BlockEncoder {
            shallow_factor,
            prefix_factor,
            collector: Collector::new(max_block_size),
            prepared: None,
        }
    }

    /// Feed raw input. Returns `(consumed, overflow)`; on overflow the
    /// caller encodes this block and starts a new encoder for the rest.
    pub fn collect(&mut self, buf: &[u8]) -> (usize, bool) {
        debug_assert!(self.prepared.is_none());
        self.collector.collect(buf)
    }

    /// True when no input has been collected; encoding an empty block is
    /// not possible.
    pub fn is_empty(&self) -> bool {
        self.collector.is_empty()
    }

    /// Run the whole transform chain. Returns the block CRC and the exact
    /// compressed size in bytes.
    pub fn encode(&mut self) -> (u32, usize) {
        let collected = std::mem::replace(&mut self.collector, Collector::new(1)).finish();

        let (bwt_out, bwt_idx) = bwt::bwt(&collected.block, self.shallow_factor);
        drop(collected.block);

        let encoded = mtf::encode(&bwt_out, &collected.in_use);
        drop(bwt_out);

        let nmtf = encoded.symbols.len();
        let mut mtfv = encoded.symbols;
        let padded = nmtf.div_ceil(GROUP_SIZE) * GROUP_SIZE;
        mtfv.resize(padded, encoded.alpha_size as u16);

        let plan = assign_prefix_codes(&mtfv, &encoded.freqs, nmtf, self.prefix_factor);

        // Fixed per-block framing: 48-bit magic, 32-bit CRC, rand bit,
        // 24-bit primary index, 3-bit codebook count, 15-bit selector
        // count.
        let mut cost = 48 + 32 + 1 + 24 + 3 + 15;
        cost += plan.cost;

        // Selector move-to-front, done branchlessly on a packed-nibble
        // dictionary: six 4-bit lanes hold the current codebook order.
        let mut selector_mtf = Vec::with_capacity(plan.selectors.len() + 7);
        let mut state: u32 = 0x543210;
        for &sel in &plan.selectors {
            let c = sel as u32;
            let v = state ^ (0x111111u32.wrapping_mul(c));
            let z = v.wrapping_add(0xEEEEEF) & 0x888888;
            let l = z ^ z.wrapping_sub(1);
            let h = !l;
            state = (state | l) & ((state << 4) | h | c);
            let j = (h.trailing_zeros() >> 2) - 1;
            selector_mtf.push(j as u8);
            cost += j + 1;
        }

        // Zero to seven dummy selectors pad the block to a whole byte.
        let pad = (8 - (cost & 7)) & 7;
        cost += pad;
        selector_mtf.extend(std::iter::repeat(0u8).take(pad as usize));
        debug_assert_eq!(cost % 8, 0);

        // Alphabet bitmap: 16 bits of big-bucket flags plus 16 bits per
        // non-empty bucket.
        cost += 16;
        for row in 0..16 {
            if collected.in_use[row * 16..(row + 1) * 16].iter().any(|&u| u) {
                cost += 16;
            }
        }

        let size = (cost / 8) as usize;
        self.prepared = Some(Prepared {
            crc: collected.crc,
            bwt_idx,
            in_use: collected.in_use,
            mtfv,
            nmtf,
            plan,
            selector_mtf,
            size,
        });
        (collected.crc, size)
    }

    /// Emit the compressed block. Appends exactly the size reported by
    /// [`BlockEncoder::encode`].
    pub fn transmit(&mut self, out: &mut Vec<u8>) {
        let p = self.prepared.take().expect("encode before transmit");
        let mut w = BitWriter::with_capacity(p.size);

        w.push(24, 0x314159);
        w.push(24, 0x265359);
        w.push(32, p.crc);
        w.push(1, 0); // never randomised
        w.push(24, p.bwt_idx);

        // Bitmap: big bucket flags first, then each non-empty bucket.
        let mut rows = [0u16; 16];
        let mut big = 0u32;
        for (r, row) in rows.iter_mut().enumerate() {
            let mut bits = 0u16;
            for b in 0..16 {
                bits = (bits << 1) | p.in_use[r * 16 + b] as u16;
            }
            *row = bits;
            big = (big << 1) | (bits != 0) as u32;
        }
        w.push(16, big);
        for &row in rows.iter() {
            if row != 0 {
                w.push(16, row as u32);
            }
        }

        debug_assert!((2..=MAX_TREES).contains(&p.plan.num_trees));
        w.push(3, p.plan.num_trees as u32);
        w.push(15, p.selector_mtf.len() as u32);

        // Selectors as unary: v ones then a zero.
        for &v in &p.selector_mtf {
            let v = v as u32 + 1;
            debug_assert!(v <= MAX_TREES as u32);
            w.push(v, (1u32 << v) - 2);
        }

        // Codebooks: 5-bit seed length, then +1/-1 deltas per symbol.
        let alpha_size = p.mtfv[p.nmtf - 1] as usize + 1;
        for t in 0..p.plan.num_trees {
            let lens = &p.plan.books[t].lens;
            let mut cur = lens[0] as i32;
            w.push(6, (cur as u32) << 1);
            for &l in &lens[1..alpha_size] {
                let c = l as i32;
                while cur < c {
                    w.push(2, 2);
                    cur += 1;
                }
                while cur > c {
                    w.push(2, 3);
                    cur -= 1;
                }
                w.push(1, 0);
            }
        }

        // Symbol groups; the padding symbol's column has length zero so
        // trailing dummies emit nothing.
        let groups = p.nmtf.div_ceil(GROUP_SIZE);
        for (g, group) in p.mtfv.chunks(GROUP_SIZE).take(groups).enumerate() {
            let book = &p.plan.books[p.plan.selectors[g] as usize];
            for &sym in group {
                w.push(book.lens[sym as usize] as u32, book.codes[sym as usize]);
            }
        }

        let bytes = w.finish();
        debug_assert_eq!(bytes.len(), p.size);
        out.extend_from_slice(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_block(data: &[u8]) -> (u32, Vec<u8>) {
        let mut enc = BlockEncoder::new(900_000, 8, 8);
        let (n, overflow) = enc.collect(data);
        assert_eq!(n, data.len());
        assert!(!overflow);
        let (crc, size) = enc.encode();
        let mut out = Vec::new();
        enc.transmit(&mut out);
        assert_eq!(out.len(), size);
        (crc, out)
    }

    #[test]
    fn block_starts_with_header_magic() {
        let (_, out) = encode_block(b"hello hello hello");
        assert_eq!(&out[..6], &[0x31, 0x41, 0x59, 0x26, 0x53, 0x59]);
    }

    #[test]
    fn crc_of_single_a() {
        let (crc, out) = encode_block(b"A");
        assert_eq!(crc, 0x81B0_2D8B);
        // Stored CRC sits right after the 48-bit magic.
        assert_eq!(&out[6..10], &0x81B0_2D8Bu32.to_be_bytes());
    }

    #[test]
    fn transmit_is_byte_exact_against_reported_size() {
        for data in [&b"x"[..], b"aaaaaaaaaabbbbbbbbbb", b"the quick brown fox"] {
            let mut enc = BlockEncoder::new(100_000, 8, 8);
            enc.collect(data);
            let (_, size) = enc.encode();
            let mut out = Vec::new();
            enc.transmit(&mut out);
            assert_eq!(out.len(), size);
        }
    }

    #[test]
    fn rand_bit_is_zero_and_index_in_range() {
        let (_, out) = encode_block(b"banana banana banana");
        // Byte 10 starts with the rand bit then the top of the 24-bit
        // primary index.
        assert_eq!(out[10] & 0x80, 0);
    }
}
