//! The single-worker decompression path.
//!
//! With one worker there is nothing to gain from boundary scanning, so
//! the slots flow in order through plain bounded channels: the splitter
//! reads 1 MiB slots, the worker runs the incremental stream decoder
//! (parser state machine plus block codec) across them, and the muxer
//! writes the ordered output chunks. The input channel's capacity *is*
//! the free-slot accounting: a slot is in flight from send to drop.
//!
//! This path is also the one that verifies stream-combined CRCs and
//! accounts for trailing garbage, since it is the only decompressor that
//! actually parses stream trailers.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::codec::bits::BitCursor;
use crate::codec::decode::{self, BlockDecoder, Emit};
use crate::codec::retrieve::{Retrieve, Retriever};
use crate::error::{DataError, FileError};
use crate::file::{ByteSink, ByteSource, FileSpec};
use crate::parse::{Parse, Parser};
use crate::pipeline::{Report, OUT_CHUNK, SLOT_SIZE};
use crate::process::thread_fatal;

/// A slot of compressed input; shorter than [`SLOT_SIZE`] means last.
type Slot = Vec<u8>;

fn split(tx: &Sender<Slot>, ispec: &mut FileSpec<ByteSource>) -> Result<u64, FileError> {
    let mut total = 0u64;
    loop {
        let mut data = vec![0u8; SLOT_SIZE];
        let n = ispec.read_full(&mut data).map_err(FileError::Read)?;
        data.truncate(n);
        total += n as u64;
        let last = n < SLOT_SIZE;
        if tx.send(data).is_err() {
            // Worker already finished (trailing garbage) or the process
            // is failing; either way reading on is pointless.
            return Ok(total);
        }
        if last {
            return Ok(total);
        }
    }
}

/// Incremental decoder state carried between input slots.
enum Phase {
    Parsing,
    Retrieving(Retriever),
    Emitting(BlockDecoder),
}

fn work(rx: &Receiver<Slot>, tx: &Sender<Vec<u8>>) -> Result<u32, DataError> {
    let mut parser = Parser::new();
    let mut cursor = BitCursor::new();
    let mut phase = Phase::Parsing;

    loop {
        let slot = rx.recv().expect("splitter vanished");
        let eof = slot.len() < SLOT_SIZE;
        cursor.rebase();

        'slot: loop {
            phase = match std::mem::replace(&mut phase, Phase::Parsing) {
                Phase::Parsing => match parser.parse(&mut cursor, &slot, eof)? {
                    Parse::Block(hd) => {
                        Phase::Retrieving(Retriever::with_crc(hd.bs100k * 100_000, hd.crc))
                    }
                    Parse::More => break 'slot,
                    Parse::Finished { garbage_bits } => {
                        if parser.streams_completed() == 0 && garbage_bits > 0 {
                            return Err(DataError::StreamMagic);
                        }
                        return Ok(garbage_bits);
                    }
                },

                Phase::Retrieving(mut retr) => match retr.retrieve(&mut cursor, &slot)? {
                    Retrieve::Done => Phase::Emitting(decode::work(retr.into_block())?),
                    Retrieve::More => {
                        if eof {
                            return Err(DataError::UnterminatedBlock);
                        }
                        phase = Phase::Retrieving(retr);
                        break 'slot;
                    }
                },

                Phase::Emitting(mut dec) => {
                    let mut buf = vec![0u8; OUT_CHUNK];
                    match dec.emit(&mut buf)? {
                        Emit::Done(n) => {
                            buf.truncate(n);
                            if !buf.is_empty() {
                                let _ = tx.send(buf);
                            }
                            Phase::Parsing
                        }
                        Emit::Full => {
                            let _ = tx.send(buf);
                            Phase::Emitting(dec)
                        }
                    }
                }
            };
        }
    }
}

fn mux(rx: &Receiver<Vec<u8>>, ospec: &mut FileSpec<ByteSink>) -> Result<u64, FileError> {
    let mut out_bytes = 0u64;
    for chunk in rx.iter() {
        ospec.write_all(&chunk).map_err(FileError::Write)?;
        out_bytes += chunk.len() as u64;
    }
    ospec.flush().map_err(FileError::Write)?;
    Ok(out_bytes)
}

/// Run the serial decompressor; the calling thread is the muxer.
pub fn decompress_serial(
    mut ispec: FileSpec<ByteSource>,
    mut ospec: FileSpec<ByteSink>,
    num_slots: u32,
) -> Result<Report, FileError> {
    let (slot_tx, slot_rx) = bounded::<Slot>(num_slots as usize);
    let (out_tx, out_rx) = bounded::<Vec<u8>>(num_slots as usize);

    let in_label = ispec.label.clone();

    let (in_bytes, garbage, out_bytes) = std::thread::scope(|scope| {
        let splitter = scope.spawn(|| match split(&slot_tx, &mut ispec) {
            Ok(n) => n,
            Err(e) => thread_fatal(&in_label, &e),
        });

        let worker_label = in_label.clone();
        let worker = scope.spawn(move || {
            // Owning both channel ends ties their drop, and thereby the
            // splitter's and muxer's shutdown, to this thread's exit.
            let slot_rx = slot_rx;
            let out_tx = out_tx;
            match work(&slot_rx, &out_tx) {
                Ok(garbage) => garbage,
                Err(e) => thread_fatal(&worker_label, &e),
            }
        });

        let out = match mux(&out_rx, &mut ospec) {
            Ok(n) => n,
            Err(e) => thread_fatal(&ospec.label, &e),
        };

        (
            splitter.join().expect("splitter panicked"),
            worker.join().expect("worker panicked"),
            out,
        )
    });

    Ok(Report {
        in_bytes,
        out_bytes,
        cctrs: [(0, 0); 3],
        trailing_garbage_bits: garbage,
    })
}
