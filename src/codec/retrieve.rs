//! Resumable parsing of one compressed block into its MTF symbol stream.
//!
//! The retriever consumes bits positioned right after the 48-bit block
//! magic (or after the stored CRC, when the stream parser has already read
//! it) and walks the block structure: CRC, rand flag, primary index,
//! alphabet bitmap, selector stream, delta-coded codebooks, then the
//! entropy-coded symbols up to the end-of-block sentinel. All progress
//! lives in the retriever, so when the input slice runs dry it reports
//! underflow and picks up exactly where it stopped once the caller has the
//! next slice; that is what lets one block span two input slots.
//!
//! Prefix decoding uses a 10-bit first-level table; longer codes finish
//! through canonical base/limit arrays and a permutation table. A codebook
//! that fails the Kraft equality is not rejected here: it is marked and
//! only becomes an error if a group actually selects it, matching the
//! reference decoder's tolerance of unused garbage codebooks.

use crate::codec::bits::BitCursor;
use crate::codec::{
    GROUP_SIZE, MAX_ALPHA_SIZE, MAX_CODE_LENGTH, MAX_MTF_VALUES, MAX_SELECTORS, MAX_TREES,
    MIN_TREES,
};
use crate::error::DataError;

/// First-level decode table width.
const START_WIDTH: u32 = 10;

/// Selector cap that keeps the symbol buffer within bounds.
const SELECTOR_CAP: usize = MAX_SELECTORS;

/// Internal symbol space: 0 is the end-of-block sentinel, 1..=255 are MTF
/// ranks, RUN_A/RUN_B carry zero-run digits in their low two bits.
const SYM_EOB: u16 = 0;
const SYM_RUN_A: u16 = 257;
const SYM_RUN_B: u16 = 258;

/// One codebook's decode tables.
struct DecodeTable {
    /// Indexed by the next 10 bits: `(symbol << 5) | length` for codes
    /// that fit, or just a lower-bound length for longer ones.
    start: Vec<u16>,
    /// Right-justified first code per length.
    base: [u32; MAX_CODE_LENGTH + 1],
    /// Right-justified one-past-last code per length.
    limit: [u32; MAX_CODE_LENGTH + 1],
    /// Cumulative symbol count below each length.
    cum: [u32; MAX_CODE_LENGTH + 1],
    /// Symbols in (length, code) order.
    perm: Vec<u16>,
}

/// Marker for a malformed codebook, stored in the selector-MTF slot.
const BOOK_OVERSUBSCRIBED: u8 = 6;
const BOOK_INCOMPLETE: u8 = 7;

/// Build decode tables from transmitted code lengths. Returns the bad-book
/// marker instead of an error; use is what fails, not construction.
fn make_table(lens: &[u8], n: usize) -> Result<DecodeTable, u8> {
    let mut counts = [0u32; MAX_CODE_LENGTH + 1];
    for &l in &lens[..n] {
        debug_assert!(l >= 1 && l as usize <= MAX_CODE_LENGTH);
        counts[l as usize] += 1;
    }

    // Kraft equality: a complete prefix code fills the whole code space.
    let mut width = 0u64;
    for (k, &c) in counts.iter().enumerate().skip(1) {
        width += (c as u64) << (MAX_CODE_LENGTH - k);
    }
    if width != 1 << MAX_CODE_LENGTH {
        return Err(if width > 1 << MAX_CODE_LENGTH {
            BOOK_OVERSUBSCRIBED
        } else {
            BOOK_INCOMPLETE
        });
    }

    let mut base = [0u32; MAX_CODE_LENGTH + 1];
    let mut limit = [0u32; MAX_CODE_LENGTH + 1];
    let mut cum = [0u32; MAX_CODE_LENGTH + 1];
    let mut code = 0u32;
    let mut total = 0u32;
    for k in 1..=MAX_CODE_LENGTH {
        base[k] = code;
        cum[k] = total;
        limit[k] = code + counts[k];
        code = (code + counts[k]) << 1;
        total += counts[k];
    }

    // Counting sort of symbols by length, remapping transmitted indices to
    // the internal symbol space.
    let mut next = cum;
    let mut perm = vec![0u16; n];
    let mut place = |len: u8, sym: u16, perm: &mut [u16]| {
        let slot = next[len as usize];
        perm[slot as usize] = sym;
        next[len as usize] += 1;
    };
    place(lens[0], SYM_RUN_A, &mut perm);
    place(lens[1], SYM_RUN_B, &mut perm);
    for s in 2..n - 1 {
        place(lens[s], (s - 1) as u16, &mut perm);
    }
    place(lens[n - 1], SYM_EOB, &mut perm);

    // First level: complete entries for codes within START_WIDTH bits.
    let mut start = vec![0u16; 1 << START_WIDTH];
    let mut idx = 0usize;
    for k in 1..=START_WIDTH as usize {
        for c in base[k]..limit[k] {
            let entry = (perm[(cum[k] + (c - base[k])) as usize] << 5) | k as u16;
            let lo = (c as usize) << (START_WIDTH as usize - k);
            let hi = ((c + 1) as usize) << (START_WIDTH as usize - k);
            for slot in &mut start[lo..hi] {
                *slot = entry;
            }
            idx = hi;
        }
    }

    // Remaining prefixes map to a lower bound on the code length.
    for (pfx, slot) in start.iter_mut().enumerate().skip(idx) {
        let mut k = START_WIDTH as usize + 1;
        while k < MAX_CODE_LENGTH && ((pfx as u32) << (k - START_WIDTH as usize)) >= limit[k] {
            k += 1;
        }
        *slot = k as u16;
    }

    Ok(DecodeTable { start, base, limit, cum, perm })
}

/// Parsed block contents, ready for the decode stage.
pub struct RetrievedBlock {
    /// MTF symbol stream in the internal symbol space (EOB stripped).
    pub syms: Vec<u16>,
    /// Used byte values in ascending order.
    pub mtf_init: [u8; 256],
    pub num_used: usize,
    pub bwt_idx: u32,
    pub expect_crc: u32,
    pub randomized: bool,
    pub max_block_size: u32,
}

enum State {
    BlockCrc,
    RandBit,
    BwtIdx,
    BitmapBig,
    BitmapRow,
    NumTrees,
    NumSelectors,
    Selectors,
    DeltaBase,
    DeltaSteps,
    NextGroup,
    GroupSymbols,
    Done,
}

/// Whether [`Retriever::retrieve`] finished the block or needs more input.
#[derive(Debug, PartialEq, Eq)]
pub enum Retrieve {
    Done,
    More,
}

pub struct Retriever {
    state: State,
    max_block_size: u32,

    expect_crc: u32,
    randomized: bool,
    bwt_idx: u32,

    big: u32,
    small_row: usize,
    mtf_init: [u8; 256],
    num_used: usize,
    alpha_size: usize,

    num_trees: usize,
    num_selectors: usize,
    selectors: Vec<u8>,
    sel_i: usize,

    tree_i: usize,
    delta_s: usize,
    delta_x: i32,
    lens: [u8; MAX_ALPHA_SIZE],
    tables: Vec<Result<DecodeTable, u8>>,
    table_mtf: [u8; MAX_TREES],

    group: usize,
    group_i: usize,
    cur_table: usize,
    syms: Vec<u16>,
}

impl Retriever {
    /// Start right after the block magic; the stored CRC is read from the
    /// bit stream.
    pub fn new(max_block_size: u32) -> Self {
        Self::with_state(max_block_size, State::BlockCrc, 0)
    }

    /// Start after the magic *and* CRC (the stream parser consumed both).
    pub fn with_crc(max_block_size: u32, expect_crc: u32) -> Self {
        Self::with_state(max_block_size, State::RandBit, expect_crc)
    }

    fn with_state(max_block_size: u32, state: State, expect_crc: u32) -> Self {
        Retriever {
            state,
            max_block_size,
            expect_crc,
            randomized: false,
            bwt_idx: 0,
            big: 0,
            small_row: 0,
            mtf_init: [0; 256],
            num_used: 0,
            alpha_size: 0,
            num_trees: 0,
            num_selectors: 0,
            selectors: Vec::new(),
            sel_i: 0,
            tree_i: 0,
            delta_s: 0,
            delta_x: 0,
            lens: [0; MAX_ALPHA_SIZE],
            tables: Vec::new(),
            table_mtf: [0; MAX_TREES],
            group: 0,
            group_i: 0,
            cur_table: 0,
            syms: Vec::new(),
        }
    }

    /// Consume bits from `cur`/`data`. `Ok(More)` means every input bit
    /// was drained and the block is still open; call again with the next
    /// slice.
    pub fn retrieve(
        &mut self,
        cur: &mut BitCursor,
        data: &[u8],
    ) -> Result<Retrieve, DataError> {
        loop {
            match self.state {
                State::BlockCrc => {
                    let Some(v) = cur.take(data, 32) else { return Ok(Retrieve::More) };
                    self.expect_crc = v;
                    self.state = State::RandBit;
                }

                State::RandBit => {
                    let Some(v) = cur.take(data, 1) else { return Ok(Retrieve::More) };
                    self.randomized = v != 0;
                    self.state = State::BwtIdx;
                }

                State::BwtIdx => {
                    let Some(v) = cur.take(data, 24) else { return Ok(Retrieve::More) };
                    self.bwt_idx = v;
                    self.state = State::BitmapBig;
                }

                State::BitmapBig => {
                    let Some(v) = cur.take(data, 16) else { return Ok(Retrieve::More) };
                    self.big = v;
                    self.small_row = 0;
                    self.num_used = 0;
                    self.state = State::BitmapRow;
                }

                State::BitmapRow => {
                    if self.small_row == 16 {
                        if self.num_used == 0 {
                            return Err(DataError::EmptyAlphabet);
                        }
                        self.alpha_size = self.num_used + 2;
                        self.state = State::NumTrees;
                        continue;
                    }
                    let row = self.small_row;
                    let small = if self.big & (0x8000 >> row) != 0 {
                        let Some(v) = cur.take(data, 16) else { return Ok(Retrieve::More) };
                        v
                    } else {
                        0
                    };
                    for b in 0..16 {
                        if small & (0x8000 >> b) != 0 {
                            self.mtf_init[self.num_used] = (row * 16 + b) as u8;
                            self.num_used += 1;
                        }
                    }
                    self.small_row += 1;
                }

                State::NumTrees => {
                    let Some(v) = cur.take(data, 3) else { return Ok(Retrieve::More) };
                    let v = v as usize;
                    if !(MIN_TREES..=MAX_TREES).contains(&v) {
                        return Err(DataError::CodebookCount);
                    }
                    self.num_trees = v;
                    self.state = State::NumSelectors;
                }

                State::NumSelectors => {
                    let Some(v) = cur.take(data, 15) else { return Ok(Retrieve::More) };
                    if v == 0 {
                        return Err(DataError::NoGroups);
                    }
                    self.num_selectors = v as usize;
                    self.selectors = Vec::with_capacity(self.num_selectors.min(SELECTOR_CAP));
                    self.sel_i = 0;
                    self.state = State::Selectors;
                }

                State::Selectors => {
                    // Position of the first zero bit in a 6-bit window;
                    // 7 means no zero within the window.
                    const FIRST_ZERO: [u8; 64] = [
                        1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
                        1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
                        2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2,
                        3, 3, 3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 6, 7,
                    ];
                    while self.sel_i < self.num_selectors {
                        if !cur.want(data, 6) {
                            return Ok(Retrieve::More);
                        }
                        let k = FIRST_ZERO[cur.peek(6) as usize] as usize;
                        if k > self.num_trees {
                            return Err(DataError::Selector);
                        }
                        cur.skip(k as u32);
                        // Selectors beyond the cap cannot correspond to
                        // any group of a legal block; parse and drop.
                        if self.sel_i < SELECTOR_CAP {
                            self.selectors.push((k - 1) as u8);
                        }
                        self.sel_i += 1;
                    }
                    self.num_selectors = self.num_selectors.min(SELECTOR_CAP);
                    self.tables = Vec::with_capacity(self.num_trees);
                    self.tree_i = 0;
                    self.state = State::DeltaBase;
                }

                State::DeltaBase => {
                    if self.tree_i == self.num_trees {
                        self.syms = Vec::with_capacity(MAX_MTF_VALUES.min(
                            self.num_selectors * GROUP_SIZE,
                        ));
                        self.group = 0;
                        self.state = State::NextGroup;
                        continue;
                    }
                    let Some(v) = cur.take(data, 5) else { return Ok(Retrieve::More) };
                    self.delta_x = v as i32;
                    self.delta_s = 0;
                    self.state = State::DeltaSteps;
                }

                State::DeltaSteps => {
                    // Bit-length deltas, up to three +1/-1 pairs decoded
                    // per 6-bit window. WIDTH gives consumed bits, DELTA
                    // the biased length adjustment.
                    const WIDTH: [u8; 64] = [
                        1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
                        1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
                        3, 3, 3, 3, 3, 3, 3, 3, 5, 5, 6, 6, 5, 5, 6, 6,
                        3, 3, 3, 3, 3, 3, 3, 3, 5, 5, 6, 6, 5, 5, 6, 6,
                    ];
                    const DELTA: [u8; 64] = [
                        3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3,
                        3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3,
                        4, 4, 4, 4, 4, 4, 4, 4, 5, 5, 6, 4, 3, 3, 4, 2,
                        2, 2, 2, 2, 2, 2, 2, 2, 3, 3, 4, 2, 1, 1, 2, 0,
                    ];
                    while self.delta_s < self.alpha_size {
                        loop {
                            if !cur.want(data, 6) {
                                return Ok(Retrieve::More);
                            }
                            let k = cur.peek(6) as usize;
                            self.delta_x += DELTA[k] as i32;
                            if self.delta_x < 3 + 1
                                || self.delta_x > 3 + MAX_CODE_LENGTH as i32
                            {
                                return Err(DataError::DeltaCode);
                            }
                            self.delta_x -= 3;
                            let w = WIDTH[k];
                            cur.skip(w as u32);
                            if w != 6 {
                                break;
                            }
                        }
                        self.lens[self.delta_s] = self.delta_x as u8;
                        self.delta_s += 1;
                    }

                    let built = make_table(&self.lens, self.alpha_size);
                    self.table_mtf[self.tree_i] = match built {
                        Ok(_) => self.tree_i as u8,
                        Err(marker) => marker,
                    };
                    self.tables.push(built);
                    self.tree_i += 1;
                    self.state = State::DeltaBase;
                }

                State::NextGroup => {
                    if self.group == self.num_selectors {
                        return Err(DataError::UnterminatedBlock);
                    }
                    // Selector values are move-to-front coded over the
                    // codebook indices; bad-book markers surface here.
                    let mut i = self.selectors[self.group] as usize;
                    let t = self.table_mtf[i];
                    if t >= BOOK_OVERSUBSCRIBED {
                        return Err(if t == BOOK_OVERSUBSCRIBED {
                            DataError::PrefixCode
                        } else {
                            DataError::IncompletePrefixCode
                        });
                    }
                    while i > 0 {
                        self.table_mtf[i] = self.table_mtf[i - 1];
                        i -= 1;
                    }
                    self.table_mtf[0] = t;
                    self.cur_table = t as usize;
                    self.group += 1;
                    self.group_i = 0;
                    self.state = State::GroupSymbols;
                }

                State::GroupSymbols => {
                    let table = self.tables[self.cur_table]
                        .as_ref()
                        .expect("selected table was validated");
                    while self.group_i < GROUP_SIZE {
                        // A full code plus slack must be buffered before
                        // the table lookup.
                        if !cur.want(data, MAX_CODE_LENGTH as u32) {
                            return Ok(Retrieve::More);
                        }
                        let window = cur.peek(MAX_CODE_LENGTH as u32);
                        let entry = table.start[(window >> (MAX_CODE_LENGTH as u32 - START_WIDTH)) as usize];
                        let mut k = (entry & 0x1F) as usize;
                        let sym;
                        if k <= START_WIDTH as usize {
                            sym = entry >> 5;
                        } else {
                            loop {
                                let c = window >> (MAX_CODE_LENGTH - k);
                                if c < table.limit[k] {
                                    sym = table.perm[(table.cum[k] + (c - table.base[k])) as usize];
                                    break;
                                }
                                k += 1;
                                debug_assert!(k <= MAX_CODE_LENGTH);
                            }
                        }
                        cur.skip(k as u32);
                        self.group_i += 1;

                        if sym == SYM_EOB {
                            if self.syms.is_empty() {
                                return Err(DataError::EmptyBlock);
                            }
                            self.state = State::Done;
                            return Ok(Retrieve::Done);
                        }
                        debug_assert!(self.syms.len() < MAX_MTF_VALUES);
                        self.syms.push(sym);
                    }
                    self.state = State::NextGroup;
                }

                State::Done => return Ok(Retrieve::Done),
            }
        }
    }

    /// Hand the parsed block to the decode stage. Only valid after
    /// [`Retrieve::Done`].
    pub fn into_block(self) -> RetrievedBlock {
        debug_assert!(matches!(self.state, State::Done));
        RetrievedBlock {
            syms: self.syms,
            mtf_init: self.mtf_init,
            num_used: self.num_used,
            bwt_idx: self.bwt_idx,
            expect_crc: self.expect_crc,
            randomized: self.randomized,
            max_block_size: self.max_block_size,
        }
    }
}
