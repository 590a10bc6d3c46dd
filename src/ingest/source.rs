//! Input sources and byte-range striping.
//!
//! A source of `len` bytes is cut into `num_workers * segments_per_worker`
//! equal segments and worker `w` reads segments `w, w + num_workers, ...`.
//! A line belongs to the segment that contains its first byte, so a segment
//! starting mid-line skips ahead to the next line start and the previous
//! segment reads past its end to finish the line.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::Result;

/// Where input bytes come from.
#[derive(Clone, Debug)]
pub enum InputSource {
    /// A file read through the filesystem.
    File(PathBuf),
    /// An in-memory buffer with a display name for diagnostics.
    Memory {
        /// Display name.
        name: String,
        /// Contents.
        data: Arc<[u8]>,
    },
}

trait SegmentReader: BufRead + Seek {}

impl<T: BufRead + Seek> SegmentReader for T {}

/// Half-open byte range `[start, end)` of one segment before line alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    /// First byte.
    pub start: u64,
    /// One past the last byte.
    pub end: u64,
}

impl InputSource {
    /// Reads `path` from the filesystem.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        InputSource::File(path.into())
    }

    /// Wraps an in-memory buffer under a display name.
    pub fn memory(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        InputSource::Memory {
            name: name.into(),
            data: Arc::from(data),
        }
    }

    /// Name used in error messages and logs.
    pub fn name(&self) -> String {
        match self {
            InputSource::File(path) => path.display().to_string(),
            InputSource::Memory { name, .. } => name.clone(),
        }
    }

    /// Filesystem path for file sources.
    pub fn path(&self) -> Option<&Path> {
        match self {
            InputSource::File(path) => Some(path),
            InputSource::Memory { .. } => None,
        }
    }

    /// Size of the source in bytes.
    pub fn len(&self) -> Result<u64> {
        match self {
            InputSource::File(path) => Ok(std::fs::metadata(path)?.len()),
            InputSource::Memory { data, .. } => Ok(data.len() as u64),
        }
    }

    fn open(&self) -> Result<Box<dyn SegmentReader + '_>> {
        match self {
            InputSource::File(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            InputSource::Memory { data, .. } => Ok(Box::new(Cursor::new(&data[..]))),
        }
    }

    /// Calls `on_line(offset, line)` for every line starting inside `segment`.
    ///
    /// `line` excludes the terminator (`\n` or `\r\n`); `offset` is the byte
    /// position of its first character.
    pub fn for_each_line<F>(&self, segment: Segment, mut on_line: F) -> Result<()>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        if segment.start >= segment.end {
            return Ok(());
        }
        let mut reader = self.open()?;
        let mut buf = Vec::new();
        let mut pos = segment.start;
        if pos > 0 {
            // Land on the byte before the segment: if it ends a line we start
            // right here, otherwise the partial line belongs to the previous segment.
            reader.seek(SeekFrom::Start(pos - 1))?;
            pos = pos - 1 + reader.read_until(b'\n', &mut buf)? as u64;
        }
        while pos < segment.end {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            on_line(pos, trim_terminator(&buf))?;
            pos += read as u64;
        }
        Ok(())
    }
}

fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Byte range of segment `index` out of `num_segments` over `len` bytes.
pub fn segment_bounds(len: u64, num_segments: usize, index: usize) -> Segment {
    let n = num_segments.max(1) as u128;
    let at = |i: usize| ((len as u128 * i as u128) / n) as u64;
    Segment {
        start: at(index),
        end: at(index + 1),
    }
}

/// Segments of a `len`-byte source read by `worker`.
pub fn worker_segments(
    len: u64,
    worker: usize,
    num_workers: usize,
    segments_per_worker: usize,
) -> impl Iterator<Item = Segment> {
    let num_segments = num_workers * segments_per_worker;
    (0..segments_per_worker)
        .map(move |k| worker + k * num_workers)
        .map(move |index| segment_bounds(len, num_segments, index))
}
