use flate2::{write::GzEncoder, Compression};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

/// How a sink should be opened.
#[derive(Debug, Clone, Copy)]
pub struct SinkOptions {
    pub compress: bool,
    /// Gzip level, 1..=9. Ignored when `compress` is false.
    pub compress_level: u32,
}

enum SinkWriter {
    Plain(BufWriter<File>),
    Gzip(BufWriter<GzEncoder<File>>),
}

/// Buffered, optionally gzip-compressed append-only file.
///
/// Each sink has exactly one writer. `close` is the only operation that
/// finalizes the gzip stream; the file is not valid gzip before it runs.
pub struct Sink {
    path: PathBuf,
    writer: Option<SinkWriter>,
}

impl Sink {
    /// Create the destination file. With compression on, `.gz` is appended
    /// to the path unless it already ends with it.
    pub fn create(path: impl Into<PathBuf>, options: &SinkOptions) -> io::Result<Sink> {
        let mut path: PathBuf = path.into();
        if options.compress && path.extension().map_or(true, |ext| ext != "gz") {
            let mut name = path.into_os_string();
            name.push(".gz");
            path = PathBuf::from(name);
        }

        let file = File::create(&path)?;
        let writer = if options.compress {
            let encoder = GzEncoder::new(file, Compression::new(options.compress_level));
            SinkWriter::Gzip(BufWriter::new(encoder))
        } else {
            SinkWriter::Plain(BufWriter::new(file))
        };

        Ok(Sink {
            path,
            writer: Some(writer),
        })
    }

    /// Path the sink actually writes to, including any appended `.gz`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> io::Result<&mut SinkWriter> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sink already closed"))
    }

    /// Flush the buffer, finalize the compressor, and close the file, in
    /// that order. Closing twice is an error; output written before the
    /// first close stays intact.
    pub fn close(&mut self) -> io::Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sink already closed"))?;
        match writer {
            SinkWriter::Plain(buffer) => {
                buffer.into_inner().map_err(io::IntoInnerError::into_error)?;
            }
            SinkWriter::Gzip(buffer) => {
                let encoder = buffer.into_inner().map_err(io::IntoInnerError::into_error)?;
                encoder.finish()?;
            }
        }
        Ok(())
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer()? {
            SinkWriter::Plain(w) => w.write(buf),
            SinkWriter::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer()? {
            SinkWriter::Plain(w) => w.flush(),
            SinkWriter::Gzip(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    const PLAIN: SinkOptions = SinkOptions {
        compress: false,
        compress_level: 1,
    };

    #[test]
    fn test_writes_bytes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sql");
        let mut sink = Sink::create(&path, &PLAIN).unwrap();
        sink.write_all(b"SET NAMES utf8;\n").unwrap();
        sink.write_all(b"INSERT INTO `t` VALUES \n(1);\n").unwrap();
        sink.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "SET NAMES utf8;\nINSERT INTO `t` VALUES \n(1);\n");
    }

    #[test]
    fn test_gz_suffix_appended_once() {
        let dir = tempfile::tempdir().unwrap();
        let options = SinkOptions {
            compress: true,
            compress_level: 6,
        };

        let sink = Sink::create(dir.path().join("a.sql"), &options).unwrap();
        assert_eq!(sink.path(), dir.path().join("a.sql.gz"));

        let sink = Sink::create(dir.path().join("b.sql.gz"), &options).unwrap();
        assert_eq!(sink.path(), dir.path().join("b.sql.gz"));
    }

    #[test]
    fn test_gzip_output_matches_plain_output() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"-- Chunk 1 - from 0 to 2500\nINSERT INTO `t` VALUES \n(1,'a');\n";

        let mut plain = Sink::create(dir.path().join("plain.sql"), &PLAIN).unwrap();
        plain.write_all(payload).unwrap();
        plain.close().unwrap();

        let mut gzipped = Sink::create(
            dir.path().join("packed.sql"),
            &SinkOptions {
                compress: true,
                compress_level: 9,
            },
        )
        .unwrap();
        gzipped.write_all(payload).unwrap();
        gzipped.close().unwrap();

        let mut decoder =
            GzDecoder::new(File::open(dir.path().join("packed.sql.gz")).unwrap());
        let mut unpacked = Vec::new();
        decoder.read_to_end(&mut unpacked).unwrap();

        assert_eq!(unpacked, std::fs::read(dir.path().join("plain.sql")).unwrap());
    }

    #[test]
    fn test_flush_pushes_buffered_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sql");
        let mut sink = Sink::create(&path, &PLAIN).unwrap();
        sink.write_all(b"hello").unwrap();
        sink.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        sink.close().unwrap();
    }

    #[test]
    fn test_double_close_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = Sink::create(dir.path().join("out.sql"), &PLAIN).unwrap();
        sink.write_all(b"x").unwrap();
        sink.close().unwrap();
        assert!(sink.close().is_err());
        assert!(sink.write_all(b"y").is_err());
        // The first close's output is untouched.
        assert_eq!(std::fs::read(dir.path().join("out.sql")).unwrap(), b"x");
    }
}
