//! Finite-state recognizer for the container structure.
//!
//! The parser consumes 16-bit big-endian words and walks stream headers,
//! block headers, and end-of-stream markers, folding every block's stored
//! CRC into the running combined CRC and checking it against the trailer.
//! Block payloads are not its business: after it reports a block header
//! the caller switches to the block retriever on the same bit cursor, and
//! returns here once the block's symbols are consumed.
//!
//! Concatenated streams loop back to the stream-magic state after each
//! trailer; input that does not continue with `BZh` ends recognition with
//! a count of trailing garbage bits.

use crate::codec::bits::BitCursor;
use crate::error::DataError;

/// A recognized block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Maximum block size tier of the enclosing stream (1..=9).
    pub bs100k: u32,
    /// Stored CRC of the upcoming block.
    pub crc: u32,
}

/// Outcome of one parser step.
#[derive(Debug, PartialEq, Eq)]
pub enum Parse {
    /// A block header was consumed; decode its body next.
    Block(BlockHeader),
    /// Input exhausted mid-structure; feed more and retry.
    More,
    /// End of recognizable input; `garbage_bits` of trailing junk follow
    /// the last complete stream.
    Finished { garbage_bits: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StreamMagic1,
    StreamMagic2,
    BlockMagic1,
    BlockMagic2,
    BlockMagic3,
    BlockCrc1,
    BlockCrc2,
    Eos2,
    Eos3,
    EosCrc1,
    EosCrc2,
    Accept,
}

pub struct Parser {
    state: State,
    bs100k: u32,
    stored: u32,
    combined_crc: u32,
    streams_completed: u64,
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            state: State::StreamMagic1,
            bs100k: 0,
            stored: 0,
            combined_crc: 0,
            streams_completed: 0,
        }
    }

    /// The combined CRC folded so far (diagnostic).
    pub fn combined_crc(&self) -> u32 {
        self.combined_crc
    }

    /// Streams whose trailer checked out so far.
    pub fn streams_completed(&self) -> u64 {
        self.streams_completed
    }

    /// Advance over `data`. `eof` tells the parser that no further input
    /// exists beyond this slice, turning word starvation into either a
    /// clean finish or an unterminated-stream error.
    pub fn parse(
        &mut self,
        cur: &mut BitCursor,
        data: &[u8],
        eof: bool,
    ) -> Result<Parse, DataError> {
        debug_assert!(self.state != State::Accept);

        loop {
            let Some(word) = cur.take(data, 16) else {
                if !eof {
                    return Ok(Parse::More);
                }
                // Starved at end of input: only the inter-stream states
                // finish cleanly.
                return match self.state {
                    State::StreamMagic1 => {
                        self.state = State::Accept;
                        Ok(Parse::Finished { garbage_bits: 0 })
                    }
                    State::StreamMagic2 => {
                        self.state = State::Accept;
                        Ok(Parse::Finished { garbage_bits: 16 })
                    }
                    _ => Err(DataError::UnterminatedBlock),
                };
            };

            match self.state {
                State::StreamMagic1 => {
                    if word != 0x425A {
                        self.state = State::Accept;
                        return Ok(Parse::Finished { garbage_bits: 16 });
                    }
                    self.state = State::StreamMagic2;
                }

                State::StreamMagic2 => {
                    if !(0x6831..=0x6839).contains(&word) {
                        self.state = State::Accept;
                        return Ok(Parse::Finished { garbage_bits: 32 });
                    }
                    self.bs100k = (word & 15) as u32;
                    self.state = State::BlockMagic1;
                }

                State::BlockMagic1 => {
                    if word == 0x1772 {
                        self.state = State::Eos2;
                        continue;
                    }
                    if word != 0x3141 {
                        return Err(DataError::BlockMagic);
                    }
                    self.state = State::BlockMagic2;
                }

                State::BlockMagic2 => {
                    if word != 0x5926 {
                        return Err(DataError::BlockMagic);
                    }
                    self.state = State::BlockMagic3;
                }

                State::BlockMagic3 => {
                    if word != 0x5359 {
                        return Err(DataError::BlockMagic);
                    }
                    self.state = State::BlockCrc1;
                }

                State::BlockCrc1 => {
                    self.stored = (word as u32) << 16;
                    self.state = State::BlockCrc2;
                }

                State::BlockCrc2 => {
                    let crc = self.stored | word as u32;
                    self.combined_crc = self.combined_crc.rotate_left(1) ^ crc;
                    self.state = State::BlockMagic1;
                    return Ok(Parse::Block(BlockHeader { bs100k: self.bs100k, crc }));
                }

                State::Eos2 => {
                    if word != 0x4538 {
                        return Err(DataError::BlockMagic);
                    }
                    self.state = State::Eos3;
                }

                State::Eos3 => {
                    if word != 0x5090 {
                        return Err(DataError::BlockMagic);
                    }
                    self.state = State::EosCrc1;
                }

                State::EosCrc1 => {
                    self.stored = (word as u32) << 16;
                    self.state = State::EosCrc2;
                }

                State::EosCrc2 => {
                    let stored = self.stored | word as u32;
                    if stored != self.combined_crc {
                        return Err(DataError::StreamCrc);
                    }
                    self.combined_crc = 0;
                    self.streams_completed += 1;
                    cur.align();
                    self.state = State::StreamMagic1;
                }

                State::Accept => unreachable!("parse after accept"),
            }
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(p: &mut Parser, cur: &mut BitCursor, data: &[u8]) -> Result<Parse, DataError> {
        p.parse(cur, data, true)
    }

    /// Header + trailer of an empty stream.
    const EMPTY: [u8; 14] = [
        0x42, 0x5A, 0x68, 0x39, 0x17, 0x72, 0x45, 0x38, 0x50, 0x90, 0, 0, 0, 0,
    ];

    #[test]
    fn empty_stream_finishes_clean() {
        let mut p = Parser::new();
        let mut cur = BitCursor::new();
        assert_eq!(step(&mut p, &mut cur, &EMPTY), Ok(Parse::Finished { garbage_bits: 0 }));
    }

    #[test]
    fn non_bz_input_is_all_garbage() {
        let mut p = Parser::new();
        let mut cur = BitCursor::new();
        assert_eq!(
            step(&mut p, &mut cur, b"PK\x03\x04"),
            Ok(Parse::Finished { garbage_bits: 16 })
        );
    }

    #[test]
    fn bad_block_size_digit() {
        let mut p = Parser::new();
        let mut cur = BitCursor::new();
        // "BZhX" is not a stream; both words count as garbage.
        assert_eq!(
            step(&mut p, &mut cur, b"BZhX"),
            Ok(Parse::Finished { garbage_bits: 32 })
        );
    }

    #[test]
    fn block_header_reports_tier_and_crc() {
        let mut p = Parser::new();
        let mut cur = BitCursor::new();
        let data = [
            0x42, 0x5A, 0x68, 0x35, // BZh5
            0x31, 0x41, 0x59, 0x26, 0x53, 0x59, // block magic
            0xDE, 0xAD, 0xBE, 0xEF, // stored CRC
        ];
        assert_eq!(
            step(&mut p, &mut cur, &data),
            Ok(Parse::Block(BlockHeader { bs100k: 5, crc: 0xDEADBEEF }))
        );
        assert_eq!(p.combined_crc(), 0xDEADBEEF);
    }

    #[test]
    fn wrong_combined_crc_is_a_stream_error() {
        let mut p = Parser::new();
        let mut cur = BitCursor::new();
        let mut data = EMPTY;
        data[13] = 1; // stored combined CRC no longer 0
        assert_eq!(step(&mut p, &mut cur, &data), Err(DataError::StreamCrc));
    }

    #[test]
    fn truncation_inside_structure_errors() {
        let mut p = Parser::new();
        let mut cur = BitCursor::new();
        assert_eq!(
            step(&mut p, &mut cur, &EMPTY[..8]),
            Err(DataError::UnterminatedBlock)
        );
    }

    #[test]
    fn starving_without_eof_asks_for_more() {
        let mut p = Parser::new();
        let mut cur = BitCursor::new();
        assert_eq!(p.parse(&mut cur, &EMPTY[..3], false), Ok(Parse::More));
        cur.rebase();
        assert_eq!(
            p.parse(&mut cur, &EMPTY[3..], true),
            Ok(Parse::Finished { garbage_bits: 0 })
        );
    }

    #[test]
    fn two_streams_back_to_back() {
        let mut p = Parser::new();
        let mut cur = BitCursor::new();
        let mut data = Vec::new();
        data.extend_from_slice(&EMPTY);
        data.extend_from_slice(&EMPTY);
        assert_eq!(step(&mut p, &mut cur, &data), Ok(Parse::Finished { garbage_bits: 0 }));
    }
}
