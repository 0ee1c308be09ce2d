//! Buffered raw PCM file access
//!
//! Readers and writers track their byte position so repeated seeks to the
//! current position cost nothing, and every offset they accept is floored to
//! a whole frame of their format.

use crate::audio::types::PcmFormat;
use cutline_common::timing::align_to_frame;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Buffered reader over a raw PCM file
#[derive(Debug)]
pub struct PcmReader {
    path: PathBuf,
    format: PcmFormat,
    reader: BufReader<File>,
    position: u64,
    len: u64,
}

impl PcmReader {
    pub fn open(path: impl AsRef<Path>, format: PcmFormat) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path,
            format,
            reader: BufReader::new(file),
            position: 0,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &PcmFormat {
        &self.format
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// File length in bytes at open time
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Seek to `offset` floored to a frame boundary; returns the new position
    pub fn seek_to(&mut self, offset: u64) -> io::Result<u64> {
        let offset = align_to_frame(offset, self.format.frame_bytes());
        if offset != self.position {
            self.reader.seek(SeekFrom::Start(offset))?;
            self.position = offset;
        }
        Ok(offset)
    }

    /// Read until `buf` is full or the file ends
    ///
    /// Returns the byte count read; fewer than `buf.len()` means end of file.
    pub fn read_up_to(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }
}

/// Buffered writer over a raw PCM file
#[derive(Debug)]
pub struct PcmWriter {
    path: PathBuf,
    format: PcmFormat,
    writer: BufWriter<File>,
    position: u64,
    len: u64,
}

impl PcmWriter {
    /// Create or truncate `path`
    pub fn create(path: impl AsRef<Path>, format: PcmFormat) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            format,
            writer: BufWriter::new(file),
            position: 0,
            len: 0,
        })
    }

    /// Open `path` for writing without truncating it
    pub fn open(path: impl AsRef<Path>, format: PcmFormat) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path,
            format,
            writer: BufWriter::new(file),
            position: 0,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &PcmFormat {
        &self.format
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Current file length including buffered bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position the writer at `offset`, padding the file with silence when it
    /// is shorter
    pub fn pad_to(&mut self, offset: u64) -> io::Result<()> {
        let offset = align_to_frame(offset, self.format.frame_bytes());
        if self.len < offset {
            debug!(
                "Padding {} with {} bytes of silence",
                self.path.display(),
                offset - self.len
            );
            self.seek_to(self.len)?;
            self.write_silence(offset - self.len)?;
        } else {
            self.seek_to(offset)?;
        }
        Ok(())
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        if offset != self.position {
            self.writer.seek(SeekFrom::Start(offset))?;
            self.position = offset;
        }
        Ok(())
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.position += bytes.len() as u64;
        self.len = self.len.max(self.position);
        Ok(())
    }

    /// Write `bytes` of format silence in bounded pieces
    pub fn write_silence(&mut self, bytes: u64) -> io::Result<()> {
        const PIECE: usize = 64 * 1024;
        let mut chunk = vec![0u8; PIECE.min(bytes as usize)];
        self.format.fill_silence(&mut chunk);
        let mut remaining = bytes;
        while remaining > 0 {
            let n = (remaining as usize).min(chunk.len());
            self.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Readers kept open between render calls, keyed by clip
///
/// Holds at most `capacity` readers; readers returned beyond that are closed.
#[derive(Debug)]
pub struct ReaderCache {
    capacity: usize,
    stored: HashMap<i32, PcmReader>,
}

impl ReaderCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            stored: HashMap::new(),
        }
    }

    /// Take the stored reader for `clip`, if any
    pub fn checkout(&mut self, clip: i32) -> Option<PcmReader> {
        self.stored.remove(&clip)
    }

    /// Return a reader; returns `false` when it was closed instead of stored
    pub fn checkin(&mut self, clip: i32, reader: PcmReader) -> bool {
        if self.stored.contains_key(&clip) || self.stored.len() >= self.capacity {
            return false;
        }
        self.stored.insert(clip, reader);
        true
    }

    pub fn len(&self) -> usize {
        self.stored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }

    /// Close the reader for a clip whose file changed
    pub fn invalidate(&mut self, clip: i32) {
        self.stored.remove(&clip);
    }

    pub fn close_all(&mut self) {
        self.stored.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_reader_seeks_on_frame_boundaries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pcm");
        std::fs::write(&path, (0u8..16).collect::<Vec<_>>()).unwrap();

        let mut reader = PcmReader::open(&path, PcmFormat::new(44100, 2, 16)).unwrap();
        assert_eq!(reader.len(), 16);
        assert_eq!(reader.seek_to(6).unwrap(), 4);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read_up_to(&mut buf).unwrap(), 4);
        assert_eq!(buf, [4, 5, 6, 7]);
        assert_eq!(reader.position(), 8);

        let mut tail = [0u8; 12];
        assert_eq!(reader.read_up_to(&mut tail).unwrap(), 8);
    }

    #[test]
    fn test_writer_pads_with_format_silence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.pcm");
        let fmt = PcmFormat::new(8000, 1, 8);

        let mut writer = PcmWriter::create(&path, fmt).unwrap();
        writer.pad_to(3).unwrap();
        writer.write_all(&[1, 2]).unwrap();
        writer.flush().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![0x80, 0x80, 0x80, 1, 2]);
    }

    #[test]
    fn test_writer_overwrites_inside_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.pcm");
        std::fs::write(&path, [9u8; 8]).unwrap();
        let fmt = PcmFormat::new(44100, 1, 16);

        let mut writer = PcmWriter::open(&path, fmt).unwrap();
        assert_eq!(writer.len(), 8);
        writer.pad_to(5).unwrap();
        assert_eq!(writer.position(), 4);
        writer.write_all(&[0, 0]).unwrap();
        writer.flush().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![9, 9, 9, 9, 0, 0, 9, 9]);
    }

    #[test]
    fn test_reader_cache_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pcm");
        std::fs::write(&path, [0u8; 4]).unwrap();
        let fmt = PcmFormat::default();

        let mut cache = ReaderCache::new(1);
        assert!(cache.checkin(1, PcmReader::open(&path, fmt).unwrap()));
        assert!(!cache.checkin(2, PcmReader::open(&path, fmt).unwrap()));
        assert_eq!(cache.len(), 1);
        assert!(cache.checkout(2).is_none());
        assert!(cache.checkout(1).is_some());
        assert!(cache.is_empty());
    }
}
