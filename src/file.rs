//! Byte-stream endpoints and filename policy.
//!
//! The pipelines see only [`FileSpec`]s: a blocking byte source or sink
//! plus the label used in diagnostics. Filename handling (the compressed
//! suffix table and output-path resolution) lives here too so the harness
//! and the CLI share one policy.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Where decompressed or compressed bytes go.
pub enum ByteSink {
    Stdout(io::Stdout),
    File(File),
    /// Test mode: bytes are checked and dropped.
    Discard,
}

/// Where input bytes come from.
pub enum ByteSource {
    Stdin(io::Stdin),
    File(File),
}

/// A byte-stream endpoint with its diagnostic label.
pub struct FileSpec<T> {
    pub io: T,
    /// Shown in messages, quoted for real files ("stdin"/"stdout" bare).
    pub label: String,
}

impl FileSpec<ByteSource> {
    pub fn stdin() -> Self {
        FileSpec { io: ByteSource::Stdin(io::stdin()), label: "stdin".into() }
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(FileSpec {
            io: ByteSource::File(File::open(path)?),
            label: format!("\"{}\"", path.display()),
        })
    }

    /// Fill `buf` completely unless the stream ends first; returns bytes
    /// read. Short reads below EOF are retried.
    pub fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let reader: &mut dyn Read = match &mut self.io {
            ByteSource::Stdin(s) => s,
            ByteSource::File(f) => f,
        };
        let mut total = 0;
        while total < buf.len() {
            match reader.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}

impl FileSpec<ByteSink> {
    pub fn stdout() -> Self {
        FileSpec { io: ByteSink::Stdout(io::stdout()), label: "stdout".into() }
    }

    pub fn discard() -> Self {
        FileSpec { io: ByteSink::Discard, label: "nowhere".into() }
    }

    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(FileSpec {
            io: ByteSink::File(File::create(path)?),
            label: format!("\"{}\"", path.display()),
        })
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match &mut self.io {
            ByteSink::Stdout(s) => s.write_all(bytes),
            ByteSink::File(f) => f.write_all(bytes),
            ByteSink::Discard => Ok(()),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match &mut self.io {
            ByteSink::Stdout(s) => s.flush(),
            ByteSink::File(f) => f.flush(),
            ByteSink::Discard => Ok(()),
        }
    }
}

/// Default compressed-name suffix.
pub const DEFAULT_SUFFIX: &str = ".bz2";

/// Where output for `input` should land when compressing.
pub fn compressed_name(input: &Path, suffix: &str) -> PathBuf {
    let mut s = input.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Where output for `input` should land when decompressing: strip the
/// known compressed suffixes, mapping the tar shorthands to `.tar`. `None`
/// means the name carries no recognizable suffix.
pub fn decompressed_name(input: &Path, suffix: &str) -> Option<PathBuf> {
    let name = input.file_name()?.to_str()?;

    let stripped = if !suffix.is_empty() && name.len() > suffix.len() && name.ends_with(suffix) {
        name[..name.len() - suffix.len()].to_string()
    } else if let Some(stem) = name.strip_suffix(".tbz2") {
        format!("{}.tar", stem)
    } else if let Some(stem) = name.strip_suffix(".tbz") {
        format!("{}.tar", stem)
    } else {
        return None;
    };

    if stripped.is_empty() {
        return None;
    }
    Some(input.with_file_name(stripped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_name_appends_suffix() {
        assert_eq!(
            compressed_name(Path::new("dir/data"), ".bz2"),
            PathBuf::from("dir/data.bz2")
        );
    }

    #[test]
    fn decompressed_name_strips_bz2() {
        assert_eq!(
            decompressed_name(Path::new("dir/data.bz2"), ".bz2"),
            Some(PathBuf::from("dir/data"))
        );
    }

    #[test]
    fn tar_shorthands_map_to_tar() {
        assert_eq!(
            decompressed_name(Path::new("x.tbz2"), ".bz2"),
            Some(PathBuf::from("x.tar"))
        );
        assert_eq!(
            decompressed_name(Path::new("x.tbz"), ".bz2"),
            Some(PathBuf::from("x.tar"))
        );
    }

    #[test]
    fn unknown_suffix_is_rejected() {
        assert_eq!(decompressed_name(Path::new("archive.gz"), ".bz2"), None);
        assert_eq!(decompressed_name(Path::new(".bz2"), ".bz2"), None);
    }

    #[test]
    fn custom_suffix() {
        assert_eq!(
            decompressed_name(Path::new("data.bzip"), ".bzip"),
            Some(PathBuf::from("data"))
        );
    }

    #[test]
    fn read_full_reaches_eof() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f");
        std::fs::write(&p, b"abcdef").unwrap();
        let mut spec = FileSpec::open(&p).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(spec.read_full(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"abcdef");
    }
}
