//! Tick-File Reader
//!
//! Binary tick files have no framing header; they are an unterminated
//! concatenation of records:
//!
//! ```text
//! [ msgType: u8 ][ msgLen: u8 ][ body: msgLen-2 bytes ][ receiveTime: u64 LE ]
//! ```
//!
//! The reader yields one [`Tick`] per record, synthesizing a
//! single-message frame the codec accepts unchanged by prepending a count
//! byte of one. End-of-file at a record boundary ends the iterator; a
//! partial record at EOF is a truncation error.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// Largest synthesized frame: the count byte plus a maximal record.
pub const MAX_PAYLOAD: usize = 1 + u8::MAX as usize;

/// One replay event: a receive timestamp and a parse-ready frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Nanoseconds since the Unix epoch at which the record was received.
    pub receive_time: u64,
    /// A single-message frame for the codec.
    pub payload: Vec<u8>,
}

/// Errors reading a tick file.
#[derive(Debug, thiserror::Error)]
pub enum TickFileError {
    /// The file ended inside a record.
    #[error("truncated record at byte offset {offset}")]
    Truncated {
        /// File offset at which the partial record starts.
        offset: u64,
    },

    /// A record declares a length too small to hold its own header.
    #[error("record at byte offset {offset} declares impossible length {len}")]
    BadLength {
        /// File offset of the offending record.
        offset: u64,
        /// Declared length.
        len: u8,
    },

    /// Underlying I/O failure.
    #[error("tick file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lazy record iterator over one binary tick file.
#[derive(Debug)]
pub struct TickFileReader<R> {
    inner: R,
    offset: u64,
    done: bool,
}

impl TickFileReader<BufReader<File>> {
    /// Open a tick file from disk.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be opened.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> TickFileReader<R> {
    /// Wrap any byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            done: false,
        }
    }

    /// Read one record; `None` on clean EOF at a record boundary.
    fn read_record(&mut self) -> Option<Result<Tick, TickFileError>> {
        let record_start = self.offset;

        // A zero-byte read at the boundary is the end of the file.
        let mut first = [0u8; 1];
        match self.inner.read(&mut first) {
            Ok(0) => return None,
            Ok(n) => self.offset += n as u64,
            Err(e) => return Some(Err(e.into())),
        }
        let msg_type = first[0];

        let mut rest_of_header = [0u8; 1];
        if let Err(e) = self.read_exact(&mut rest_of_header, record_start) {
            return Some(Err(e));
        }
        let msg_len = rest_of_header[0];

        if msg_len < 2 {
            return Some(Err(TickFileError::BadLength {
                offset: record_start,
                len: msg_len,
            }));
        }

        let body_len = usize::from(msg_len) - 2;
        let mut body = vec![0u8; body_len];
        if let Err(e) = self.read_exact(&mut body, record_start) {
            return Some(Err(e));
        }

        let mut time_bytes = [0u8; 8];
        if let Err(e) = self.read_exact(&mut time_bytes, record_start) {
            return Some(Err(e));
        }
        let receive_time = u64::from_le_bytes(time_bytes);

        // Synthesize a one-message frame for the codec.
        let mut payload = Vec::with_capacity(MAX_PAYLOAD);
        payload.push(1);
        payload.push(msg_type);
        payload.push(msg_len);
        payload.extend_from_slice(&body);

        Some(Ok(Tick {
            receive_time,
            payload,
        }))
    }

    /// `read_exact` with truncation mapped to [`TickFileError::Truncated`].
    fn read_exact(&mut self, buf: &mut [u8], record_start: u64) -> Result<(), TickFileError> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(TickFileError::Truncated {
                offset: record_start,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: Read> Iterator for TickFileReader<R> {
    type Item = Result<Tick, TickFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Some(Ok(tick)) => Some(Ok(tick)),
            Some(Err(e)) => {
                // A damaged record poisons everything after it; stop here.
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
