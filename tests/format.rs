//! Wire-format checks: the emitted container must be byte-recognizable by
//! any conformant decoder, starting with the fixed magics and checksum
//! layout.

use std::fs;
use std::path::Path;

use parbz::codec::crc::crc32;
use parbz::file::FileSpec;
use parbz::pipeline::compress;
use parbz::Options;

fn options(bs100k: u32) -> Options {
    Options {
        num_workers: 2,
        num_slots: 8,
        bs100k,
        decompress: false,
        test: false,
        keep: true,
        force: false,
        stdout_mode: false,
        verbose: false,
        print_cctrs: false,
        exponential: false,
        suffix: ".bz2".into(),
    }
}

fn compress_bytes(data: &[u8], bs100k: u32) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("in");
    let packed = dir.path().join("out");
    fs::write(&plain, data).unwrap();
    let ispec = FileSpec::open(&plain).unwrap();
    let ospec = FileSpec::create(&packed).unwrap();
    compress::compress(ispec, ospec, &options(bs100k)).unwrap();
    fs::read(Path::new(&packed)).unwrap()
}

#[test]
fn empty_input_is_the_fourteen_byte_stream() {
    assert_eq!(
        compress_bytes(b"", 9),
        [0x42, 0x5A, 0x68, 0x39, 0x17, 0x72, 0x45, 0x38, 0x50, 0x90, 0, 0, 0, 0]
    );
}

#[test]
fn stream_header_carries_block_size_digit() {
    for bs in [1u32, 5, 9] {
        let out = compress_bytes(b"x", bs);
        assert_eq!(&out[..3], &[0x42, 0x5A, 0x68]);
        assert_eq!(out[3], 0x30 + bs as u8);
    }
}

#[test]
fn block_magic_follows_header() {
    let out = compress_bytes(b"some data", 9);
    assert_eq!(&out[4..10], &[0x31, 0x41, 0x59, 0x26, 0x53, 0x59]);
}

#[test]
fn single_byte_block_crc_is_stored_after_magic() {
    let out = compress_bytes(b"A", 1);
    let crc = crc32(b"A");
    assert_eq!(crc, 0x81B0_2D8B);
    assert_eq!(&out[10..14], &crc.to_be_bytes());
}

#[test]
fn trailer_combined_crc_equals_rotate_xor_fold() {
    // One block: combined CRC == block CRC.
    let out = compress_bytes(b"check the trailer", 9);
    let block_crc = u32::from_be_bytes(out[10..14].try_into().unwrap());
    let stored_combined = u32::from_be_bytes(out[out.len() - 4..].try_into().unwrap());
    assert_eq!(stored_combined, block_crc);

    // The end-of-stream magic sits right before it, byte aligned.
    let eos = &out[out.len() - 10..out.len() - 4];
    assert_eq!(eos, &[0x17, 0x72, 0x45, 0x38, 0x50, 0x90]);
}

#[test]
fn multi_block_streams_fold_crcs() {
    // Force several blocks with the smallest tier.
    let data: Vec<u8> = (0..350_000u32).map(|i| (i * 31 % 251) as u8).collect();
    let out = compress_bytes(&data, 1);

    // Collect the stored per-block CRCs by walking byte-aligned block
    // magics (blocks are not byte aligned in general, so walk via the
    // known first block and check only the fold at the end).
    let stored_combined = u32::from_be_bytes(out[out.len() - 4..].try_into().unwrap());

    // Decode-side verification: decompressing with the serial pipeline
    // checks the fold; reaching byte identity proves the stored value.
    let dir = tempfile::tempdir().unwrap();
    let packed = dir.path().join("p.bz2");
    let plain = dir.path().join("p");
    fs::write(&packed, &out).unwrap();
    let ispec = FileSpec::open(&packed).unwrap();
    let ospec = FileSpec::create(&plain).unwrap();
    parbz::pipeline::serial::decompress_serial(ispec, ospec, 4).unwrap();
    assert_eq!(fs::read(&plain).unwrap(), data);

    // And the combined CRC is not degenerate.
    assert_ne!(stored_combined, 0);
}

#[test]
fn compressed_output_is_parsable_by_own_parser() {
    use parbz::codec::bits::BitCursor;
    use parbz::parse::{Parse, Parser};

    let out = compress_bytes(b"parse me", 9);
    let mut parser = Parser::new();
    let mut cur = BitCursor::new();

    // First step must be a block header with the right tier.
    match parser.parse(&mut cur, &out, true).unwrap() {
        Parse::Block(hd) => assert_eq!(hd.bs100k, 9),
        other => panic!("expected block header, got {:?}", other),
    }
}
