//! End-to-end pipeline round trips through the library API: compress with
//! the parallel pipeline, decompress with both the parallel and the
//! serial pipeline, and require byte identity, including the invariant
//! that the compressed bytes do not depend on the worker count.

use std::fs;
use std::path::Path;

use parbz::file::FileSpec;
use parbz::pipeline::{compress, decompress, serial};
use parbz::Options;

fn options(workers: u32, bs100k: u32, decompress: bool) -> Options {
    Options {
        num_workers: workers,
        num_slots: (4 * workers).max(workers + 1),
        bs100k,
        decompress,
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

fn compress_file(src: &Path, dst: &Path, workers: u32, bs100k: u32) {
    let ispec = FileSpec::open(src).unwrap();
    let ospec = FileSpec::create(dst).unwrap();
    compress::compress(ispec, ospec, &options(workers, bs100k, false)).unwrap();
}

fn decompress_file(src: &Path, dst: &Path, workers: u32) {
    let ispec = FileSpec::open(src).unwrap();
    let ospec = FileSpec::create(dst).unwrap();
    let opts = options(workers, 9, true);
    if workers == 1 {
        serial::decompress_serial(ispec, ospec, opts.num_slots).unwrap();
    } else {
        decompress::decompress(ispec, ospec, &opts).unwrap();
    }
}

/// Deterministic compressible pseudo-data.
fn sample_data(len: usize, alphabet: u8) -> Vec<u8> {
    let mut state = 0x2545_F491u32;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let run = 1 + (state >> 20) as usize % 17;
        let byte = b'a' + ((state >> 9) as u8 % alphabet);
        out.extend(std::iter::repeat(byte).take(run.min(len - out.len())));
    }
    out
}

fn round_trip(data: &[u8], compress_workers: u32, decompress_workers: u32, bs100k: u32) {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("plain");
    let packed = dir.path().join("plain.bz2");
    let unpacked = dir.path().join("unpacked");

    fs::write(&plain, data).unwrap();
    compress_file(&plain, &packed, compress_workers, bs100k);
    decompress_file(&packed, &unpacked, decompress_workers);
    assert_eq!(fs::read(&unpacked).unwrap(), data, "round trip mismatch");
}

#[test]
fn empty_input() {
    round_trip(b"", 2, 2, 9);
    round_trip(b"", 1, 1, 9);
}

#[test]
fn tiny_inputs() {
    for data in [&b"A"[..], b"ab", b"hello, world\n"] {
        round_trip(data, 2, 2, 1);
        round_trip(data, 3, 1, 9);
    }
}

#[test]
fn single_full_block() {
    // Exactly bs100k * 100 000 input bytes make one maximal block.
    let data = sample_data(100_000, 4);
    round_trip(&data, 2, 2, 1);
}

#[test]
fn multi_block_multi_worker() {
    let data = sample_data(750_000, 6);
    round_trip(&data, 4, 4, 1);
    round_trip(&data, 4, 1, 1);
}

#[test]
fn megabyte_of_zeros() {
    let data = vec![0u8; 1 << 20];
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("z");
    let packed = dir.path().join("z.bz2");
    let unpacked = dir.path().join("z.out");

    fs::write(&plain, &data).unwrap();
    compress_file(&plain, &packed, 2, 9);
    // Runs, MTF, and the entropy coder together flatten this to almost
    // nothing.
    assert!(fs::metadata(&packed).unwrap().len() < 100);

    decompress_file(&packed, &unpacked, 2);
    assert_eq!(fs::read(&unpacked).unwrap(), data);
}

#[test]
fn rle_worst_case_block() {
    // Alternating bytes never form runs, so RLE1 cannot shrink the block,
    // and a trailing short run exercises the run-flush path.
    let mut data = Vec::with_capacity(899_985);
    for _ in 0..449_990 {
        data.extend_from_slice(b"AB");
    }
    data.extend_from_slice(b"CCCCC");
    round_trip(&data, 3, 3, 9);
    round_trip(&data, 1, 1, 9);
}

#[test]
fn compressed_bytes_independent_of_worker_count() {
    let data = sample_data(480_000, 8);
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("p");
    fs::write(&plain, &data).unwrap();

    let mut outputs = Vec::new();
    for workers in [1u32, 2, 5] {
        let packed = dir.path().join(format!("p.{}.bz2", workers));
        compress_file(&plain, &packed, workers, 1);
        outputs.push(fs::read(&packed).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], outputs[2]);
}

#[test]
fn concatenated_streams_decode_to_concatenation() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::write(&a, b"foo").unwrap();
    fs::write(&b, b"bar").unwrap();

    let pa = dir.path().join("a.bz2");
    let pb = dir.path().join("b.bz2");
    compress_file(&a, &pa, 2, 9);
    compress_file(&b, &pb, 2, 9);

    let joined = dir.path().join("joined.bz2");
    let mut bytes = fs::read(&pa).unwrap();
    bytes.extend(fs::read(&pb).unwrap());
    fs::write(&joined, &bytes).unwrap();

    for workers in [1u32, 3] {
        let out = dir.path().join(format!("joined.{}", workers));
        decompress_file(&joined, &out, workers);
        assert_eq!(fs::read(&out).unwrap(), b"foobar");
    }
}

#[test]
fn exponential_sorting_gives_identical_output() {
    let data = sample_data(120_000, 3);
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("p");
    fs::write(&plain, &data).unwrap();

    let fast = dir.path().join("fast.bz2");
    compress_file(&plain, &fast, 2, 1);

    let exact = dir.path().join("exact.bz2");
    let ispec = FileSpec::open(&plain).unwrap();
    let ospec = FileSpec::create(&exact).unwrap();
    let mut opts = options(2, 1, false);
    opts.exponential = true;
    compress::compress(ispec, ospec, &opts).unwrap();

    assert_eq!(fs::read(&fast).unwrap(), fs::read(&exact).unwrap());
}

#[test]
fn large_input_spanning_many_slots() {
    // Over 4 MiB of plain input compresses to a few slots; decompression
    // slots; decompression must stitch blocks across slot boundaries.
    let data = sample_data(4 << 20, 26);
    round_trip(&data, 4, 4, 1);
}
