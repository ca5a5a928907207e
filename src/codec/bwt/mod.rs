//! Forward Burrows-Wheeler transform with a hybrid strategy.
//!
//! Blocks up to 16 KiB, and all blocks when the caller disables the fast
//! path (shallow factor 0), go straight to induced sorting. Larger blocks
//! try the bucket-sort/cached-quicksort path first; if it exhausts its work
//! budget or detects a periodic input it abandons the attempt and the block
//! is redone with induced sorting, which has no pathological cases.
//!
//! The inverse transform lives with the block decoder, where it is fused
//! with the output run-length stage.

mod qsort;
mod sais;

/// Blocks at or below this size skip the quicksort path; the bucket-sort
/// setup dominates at small sizes.
const SMALL_BLOCK: usize = 16 * 1024;

/// Transform `block`, returning the permuted bytes and the primary index
/// (the sorted-rotation position of the unrotated input).
///
/// `shallow_factor` scales the quicksort work budget; 0 forces induced
/// sorting unconditionally.
pub fn bwt(block: &[u8], shallow_factor: u32) -> (Vec<u8>, u32) {
    let n = block.len();
    assert!(n >= 1);

    if n == 1 {
        return (block.to_vec(), 0);
    }
    if n <= SMALL_BLOCK || shallow_factor == 0 {
        return sais::bwt(block);
    }
    match qsort::bwt(block, shallow_factor) {
        Ok(r) => r,
        Err(qsort::Abort) => sais::bwt(block),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_agree_above_threshold() {
        // Deterministic compressible data large enough for the fast path.
        let mut state = 0xACE1u32;
        let mut data = Vec::with_capacity(SMALL_BLOCK * 2);
        while data.len() < SMALL_BLOCK * 2 {
            state = state.wrapping_mul(75).wrapping_add(74) % 65537;
            let run = 1 + (state % 13) as usize;
            data.extend(std::iter::repeat((state >> 3) as u8 % 7 + b'a').take(run));
        }
        let fast = bwt(&data, 8);
        let exact = bwt(&data, 0);
        assert_eq!(fast, exact);
    }

    #[test]
    fn forced_exact_path_small_input() {
        let (out, idx) = bwt(b"banana", 8);
        // Rotations of "banana" sorted: abanan, anaban, ananab, banana,
        // nabana, nanaba -> last column "nnbaaa", original at row 3.
        assert_eq!(out, b"nnbaaa");
        assert_eq!(idx, 3);
    }

    #[test]
    fn periodic_large_input_falls_back() {
        let data: Vec<u8> = b"ab".iter().copied().cycle().take(SMALL_BLOCK + 10).collect();
        let (out, _idx) = bwt(&data, 8);
        // All 'b's sort before... rather: rows starting 'a' end in 'b' and
        // vice versa, so the transform is a 'b'-half then an 'a'-half.
        let half = data.len() / 2;
        assert!(out[..half].iter().all(|&c| c == b'b'));
        assert!(out[half + 1..].iter().all(|&c| c == b'a'));
    }
}
