//! Move-to-front coding of the transformed block.
//!
//! The MTF dictionary ranks only the bytes that actually occur in the
//! block (the used-byte map supplies the dense rank mapping). Rank 0 never
//! appears as a plain symbol: runs of it are re-coded in bijective base 2
//! over the two reserved run symbols, so symbol 0 is RUNA, 1 is RUNB, a
//! rank-v hit emits symbol v + 1, and the end-of-block sentinel closes the
//! stream.

use crate::codec::MAX_ALPHA_SIZE;

pub const RUN_A: u16 = 0;
pub const RUN_B: u16 = 1;

/// MTF-coded block: symbol stream (terminated by EOB) plus the symbol
/// frequency table the clustering stage starts from.
pub struct MtfEncoded {
    pub symbols: Vec<u16>,
    /// One entry per symbol 0..=eob, plus one slack slot for the group
    /// padding symbol.
    pub freqs: Vec<u32>,
    pub eob: u16,
    pub alpha_size: usize,
}

/// Dense ranks of the used byte values: `rank[b]` is the number of used
/// bytes below `b`, meaningful only where `in_use[b]` holds.
pub fn byte_ranks(in_use: &[bool; 256]) -> ([u8; 256], usize) {
    let mut rank = [0u8; 256];
    let mut next = 0usize;
    for (b, &used) in in_use.iter().enumerate() {
        rank[b] = next as u8;
        next += used as usize;
    }
    (rank, next)
}

/// Encode the BWT output. `in_use` must cover every byte in `bwt`.
pub fn encode(bwt: &[u8], in_use: &[bool; 256]) -> MtfEncoded {
    let (rank, in_use_count) = byte_ranks(in_use);
    debug_assert!(in_use_count >= 1);
    let eob = (in_use_count + 1) as u16;
    let alpha_size = in_use_count + 2;
    debug_assert!(alpha_size <= MAX_ALPHA_SIZE);

    let mut symbols = Vec::with_capacity(bwt.len() + 1);
    let mut freqs = vec![0u32; alpha_size + 1];

    // Dictionary: `front` plus `order`, which lists the remaining ranks.
    let mut front = 0u8;
    let mut order = [0u8; 255];
    for (i, o) in order.iter_mut().enumerate() {
        *o = (i + 1) as u8;
    }

    // Pending run of rank-0 hits.
    let mut zero_run = 0u64;

    let flush_run = |zero_run: &mut u64, symbols: &mut Vec<u16>, freqs: &mut Vec<u32>| {
        let mut k = *zero_run;
        if k == 0 {
            return;
        }
        // Bijective base 2, least significant digit first.
        loop {
            k -= 1;
            let s = (k & 1) as u16;
            symbols.push(s);
            freqs[s as usize] += 1;
            k >>= 1;
            if k == 0 {
                break;
            }
        }
        *zero_run = 0;
    };

    for &byte in bwt {
        let c = rank[byte as usize];
        if c == front {
            zero_run += 1;
            continue;
        }
        flush_run(&mut zero_run, &mut symbols, &mut freqs);

        // Walk the dictionary towards `c`, shifting everything passed one
        // slot back; `c` becomes the new front.
        let mut t = order[0];
        order[0] = front;
        let mut j = 0usize;
        loop {
            if c == t {
                front = t;
                break;
            }
            j += 1;
            let v = order[j];
            order[j] = t;
            if c == v {
                front = v;
                break;
            }
            j += 1;
            t = order[j];
            order[j] = v;
        }
        let sym = (j + 2) as u16;
        symbols.push(sym);
        freqs[sym as usize] += 1;
    }

    flush_run(&mut zero_run, &mut symbols, &mut freqs);

    symbols.push(eob);
    freqs[eob as usize] += 1;

    MtfEncoded { symbols, freqs, eob, alpha_size }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_use_of(bytes: &[u8]) -> [bool; 256] {
        let mut m = [false; 256];
        for &b in bytes {
            m[b as usize] = true;
        }
        m
    }

    #[test]
    fn ranks_are_dense() {
        let m = in_use_of(b"ban");
        let (rank, n) = byte_ranks(&m);
        assert_eq!(n, 3);
        assert_eq!(rank[b'a' as usize], 0);
        assert_eq!(rank[b'b' as usize], 1);
        assert_eq!(rank[b'n' as usize], 2);
    }

    #[test]
    fn banana_bwt_sequence() {
        // BWT("banana") = "nnbaaa"; ranks a=0 b=1 n=2, EOB = 4.
        // n -> value 2 -> symbol 3; n again -> front hit (run 1) -> RUNA;
        // b -> symbol 3; a -> symbol 3; a,a -> run of 2 -> RUNB; EOB.
        let enc = encode(b"nnbaaa", &in_use_of(b"abn"));
        assert_eq!(enc.eob, 4);
        assert_eq!(enc.symbols, vec![3, RUN_A, 3, 3, RUN_B, 4]);
        assert_eq!(enc.freqs[3], 3);
        assert_eq!(enc.freqs[RUN_A as usize], 1);
        assert_eq!(enc.freqs[RUN_B as usize], 1);
        assert_eq!(enc.freqs[4], 1);
    }

    #[test]
    fn long_zero_run_is_bijective_base_two() {
        // A constant block is all front hits after the first byte.
        let data = vec![b'q'; 8];
        let enc = encode(&data, &in_use_of(&data));
        // First byte: rank 0 = front hit too, so the run is 8:
        // 8 = RUNB RUNA RUNA in LSB-first bijective base 2
        //   (8 = 2 + 2*(1 + 2*1)).
        assert_eq!(enc.symbols, vec![RUN_B, RUN_A, RUN_A, enc.eob]);
    }

    #[test]
    fn symbol_stream_always_ends_with_eob() {
        let data = b"xyzzy";
        let enc = encode(data, &in_use_of(data));
        assert_eq!(*enc.symbols.last().unwrap(), enc.eob);
        assert_eq!(enc.freqs[enc.eob as usize], 1);
    }

    #[test]
    fn deep_dictionary_hit() {
        // 256 distinct bytes: last byte of the first pass sits at the
        // deepest rank.
        let data: Vec<u8> = (0u8..=255).collect();
        let enc = encode(&data, &in_use_of(&data));
        assert_eq!(enc.alpha_size, 258);
        // First byte hits the front (rank 0 -> run), every later byte v
        // sits at rank v after the promotions: symbol v + 1.
        assert_eq!(enc.symbols[0], RUN_A);
        assert_eq!(enc.symbols[1], 2);
        assert_eq!(enc.symbols[255], 256);
    }
}
