//! Bounded, overlapping byte windows over a source.
//!
//! Each window after the first starts with the last `overlap` bytes of its
//! predecessor, so a signature that straddles a read boundary is still whole
//! in the next window. `Window::prefix_len` marks that carried-over prefix.

use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RecoveryError, Result};

/// Cap for `SourceLayout::Whole`; larger files fall back to chunks of this size.
pub const MAX_WHOLE_WINDOW: usize = 64 * 1024 * 1024;

/// Default page size of the paged stores these dumps come from.
pub const DEFAULT_PAGE_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLayout {
    Whole,
    Chunked { chunk_size: usize },
    Paged { page_size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub path: PathBuf,
    pub layout: SourceLayout,
    pub max_windows: Option<usize>,
}

impl SourceDescriptor {
    pub fn whole(path: impl Into<PathBuf>) -> Self {
        SourceDescriptor {
            path: path.into(),
            layout: SourceLayout::Whole,
            max_windows: None,
        }
    }

    pub fn chunked(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        SourceDescriptor {
            path: path.into(),
            layout: SourceLayout::Chunked { chunk_size },
            max_windows: None,
        }
    }

    pub fn paged(path: impl Into<PathBuf>, page_size: usize) -> Self {
        SourceDescriptor {
            path: path.into(),
            layout: SourceLayout::Paged { page_size },
            max_windows: None,
        }
    }

    pub fn with_max_windows(mut self, max: usize) -> Self {
        self.max_windows = Some(max);
        self
    }

    pub fn label(&self) -> String {
        self.path.display().to_string()
    }

    /// Opens the source afresh, so the sequence can be restarted at will.
    pub fn windows(&self, overlap: usize) -> Result<WindowReader<File>> {
        let file = File::open(&self.path).map_err(|e| self.unavailable(e))?;
        let payload = match self.layout {
            SourceLayout::Whole => {
                let len = file.metadata().map_err(|e| self.unavailable(e))?.len();
                usize::try_from(len)
                    .unwrap_or(MAX_WHOLE_WINDOW)
                    .clamp(1, MAX_WHOLE_WINDOW)
            }
            SourceLayout::Chunked { chunk_size } => chunk_size,
            SourceLayout::Paged { page_size } => page_size,
        };
        if payload == 0 {
            return Err(RecoveryError::InvalidConfig(format!(
                "{}: window size must be non-zero",
                self.label()
            )));
        }
        let mut reader = WindowReader::new(file, payload, overlap);
        if let Some(max) = self.max_windows {
            reader = reader.with_max_windows(max);
        }
        Ok(reader)
    }

    pub fn unavailable(&self, reason: io::Error) -> RecoveryError {
        RecoveryError::SourceUnavailable {
            source_label: self.label(),
            reason,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One scanning unit. `data[..prefix_len]` repeats the previous window's tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Absolute source offset of `data[0]`.
    pub offset: u64,
    pub prefix_len: usize,
    pub data: Vec<u8>,
}

impl Window {
    pub fn payload(&self) -> &[u8] {
        &self.data[self.prefix_len..]
    }

    pub fn is_blank(&self) -> bool {
        self.payload().iter().all(|&b| b == 0)
    }
}

/// Turns any reader into a finite sequence of overlapping windows.
pub struct WindowReader<R> {
    inner: R,
    payload_size: usize,
    overlap: usize,
    tail: Vec<u8>,
    consumed: u64,
    max_windows: Option<usize>,
    emitted: usize,
    done: bool,
}

impl<R: Read> WindowReader<R> {
    pub fn new(inner: R, payload_size: usize, overlap: usize) -> Self {
        assert!(payload_size > 0, "payload size must be non-zero");
        WindowReader {
            inner,
            payload_size,
            overlap,
            tail: Vec::with_capacity(overlap),
            consumed: 0,
            max_windows: None,
            emitted: 0,
            done: false,
        }
    }

    pub fn with_max_windows(mut self, max: usize) -> Self {
        self.max_windows = Some(max);
        self
    }

    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for WindowReader<R> {
    type Item = io::Result<Window>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.max_windows.is_some_and(|max| self.emitted >= max) {
            return None;
        }

        let prefix_len = self.tail.len();
        let mut data = vec![0u8; prefix_len + self.payload_size];
        data[..prefix_len].copy_from_slice(&self.tail);

        let read = match self.fill(&mut data[prefix_len..]) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if read == 0 {
            self.done = true;
            return None;
        }
        if read < self.payload_size {
            // short fill only happens at EOF
            self.done = true;
        }

        let total = prefix_len + read;
        data.truncate(total);

        let keep = self.overlap.min(total);
        self.tail.clear();
        self.tail.extend_from_slice(&data[total - keep..]);

        let offset = self.consumed - prefix_len as u64;
        self.consumed += read as u64;
        self.emitted += 1;

        Some(Ok(Window {
            offset,
            prefix_len,
            data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(bytes: &[u8], payload: usize, overlap: usize) -> Vec<Window> {
        WindowReader::new(Cursor::new(bytes.to_vec()), payload, overlap)
            .map(|w| w.unwrap())
            .collect()
    }

    #[test]
    fn windows_carry_overlap_prefix() {
        let windows = collect(b"abcdefghij", 4, 2);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].data, b"abcd");
        assert_eq!(windows[0].prefix_len, 0);
        assert_eq!(windows[1].data, b"cdefgh");
        assert_eq!(windows[1].prefix_len, 2);
        assert_eq!(windows[1].offset, 2);
        assert_eq!(windows[2].data, b"ghij");
        assert_eq!(windows[2].payload(), b"ij");
        assert_eq!(windows[2].offset, 6);
    }

    #[test]
    fn payloads_tile_the_source() {
        let src: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let windows = collect(&src, 7, 5);
        let rebuilt: Vec<u8> = windows.iter().flat_map(|w| w.payload().to_vec()).collect();
        assert_eq!(rebuilt, src);
        for w in &windows {
            let start = w.offset as usize;
            assert_eq!(&src[start..start + w.data.len()], &w.data[..]);
        }
    }

    #[test]
    fn empty_source_yields_nothing() {
        assert!(collect(b"", 16, 4).is_empty());
    }

    #[test]
    fn max_windows_truncates() {
        let reader = WindowReader::new(Cursor::new(vec![1u8; 100]), 10, 0).with_max_windows(3);
        assert_eq!(reader.count(), 3);
    }

    #[test]
    fn blank_payload_detected() {
        let windows = collect(&[0, 0, 0, 0, b'x', 0, 0, 0], 4, 1);
        assert!(windows[0].is_blank());
        assert!(!windows[1].is_blank());
    }

    #[test]
    fn descriptor_restarts_from_the_top() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"0123456789").unwrap();
        let source = SourceDescriptor::paged(file.path(), 4);
        let first: Vec<Window> = source.windows(1).unwrap().map(|w| w.unwrap()).collect();
        let second: Vec<Window> = source.windows(1).unwrap().map(|w| w.unwrap()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let source = SourceDescriptor::whole("/nonexistent/wis/rfile000");
        match source.windows(0) {
            Err(RecoveryError::SourceUnavailable { source_label, .. }) => {
                assert!(source_label.contains("rfile000"))
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
