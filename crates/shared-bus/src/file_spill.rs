//! # File Spill
//!
//! A [`SpillStore`] backed by one append-only file, so events that overflow
//! a subscriber's live queue survive a restart.
//!
//! ## Record Layout
//!
//! ```text
//! 0        4        8           12          16          20
//! ├────────┼────────┼───────────┼───────────┼───────────┼──────────────┐
//! │  len   │ crc32  │ type code │ source id │  dest id  │ payload ...  │
//! └────────┴────────┴───────────┴───────────┴───────────┴──────────────┘
//! ```
//!
//! `len` counts the bytes after the checksum, and the checksum covers those
//! bytes. The payload is the codec's wire encoding. Integers are big-endian.
//!
//! ## Lifecycle
//!
//! Records are appended at the tail and consumed from the head. Closing the
//! spill (or dropping it) rewrites the file without its consumed head, so a
//! clean shutdown never replays an event twice; after a crash the head is
//! replayed again. Opening an existing file replays its records before
//! anything pushed afterwards, once a torn or corrupted tail has been cut
//! off. The file is removed as soon as its last record is consumed, and
//! created again on the next overflow.

use crate::spill::SpillStore;
use bytes::{Buf, BufMut, BytesMut};
use mb_01_event_codec::EventCodec;
use shared_types::{CodecError, Event, SharedEvent, TypeCode};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Length and checksum in front of every record body.
const RECORD_PREFIX: usize = 8;

/// Type code and routing ids at the start of every record body.
const ROUTE_SIZE: usize = 12;

/// Larger length prefixes are treated as corruption.
const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpillFileError {
    #[error("spill file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

enum RecordRead {
    Record,
    End,
    Damaged,
}

#[derive(Debug)]
struct SpillFile {
    writer: File,
    reader: BufReader<File>,
}

/// Disk-backed, bounded spill for one subscriber.
pub struct FileSpill {
    path: PathBuf,
    codec: EventCodec,
    capacity: usize,
    /// Open while the file holds unread records.
    file: Option<SpillFile>,
    len: usize,
    /// Bytes of consumed records at the head of the file.
    consumed: u64,
    closed: bool,
    record: BytesMut,
}

impl FileSpill {
    /// Open the spill at `path`, replaying whatever a previous run left.
    pub fn open(
        path: impl Into<PathBuf>,
        codec: EventCodec,
        capacity: usize,
    ) -> Result<Self, SpillFileError> {
        let mut spill = Self {
            path: path.into(),
            codec,
            capacity,
            file: None,
            len: 0,
            consumed: 0,
            closed: false,
            record: BytesMut::new(),
        };
        spill.recover().map_err(|source| SpillFileError::Io {
            path: spill.path.clone(),
            source,
        })?;
        Ok(spill)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn recover(&mut self) -> io::Result<()> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let (records, valid_end) = scan_records(BufReader::new(file))?;
        let size = fs::metadata(&self.path)?.len();
        if valid_end < size {
            warn!(
                path = %self.path.display(),
                kept = records,
                dropped_bytes = size - valid_end,
                "Spill file has a damaged tail, truncating"
            );
            OpenOptions::new()
                .write(true)
                .open(&self.path)?
                .set_len(valid_end)?;
        }
        if records == 0 {
            fs::remove_file(&self.path)?;
            return Ok(());
        }
        self.file = Some(open_handles(&self.path)?);
        self.len = records;
        info!(path = %self.path.display(), events = records, "Replaying spilled events");
        Ok(())
    }

    fn append(&mut self, event: &Event) -> io::Result<()> {
        encode_record(&self.codec, event, &mut self.record)?;
        if self.file.is_none() {
            self.file = Some(open_handles(&self.path)?);
            debug!(path = %self.path.display(), "Spill file created");
        }
        if let Some(file) = self.file.as_mut() {
            file.writer.write_all(&self.record)?;
        }
        Ok(())
    }

    fn decode(&self, body: &[u8]) -> Result<SharedEvent, CodecError> {
        let mut route = &body[..ROUTE_SIZE];
        let type_code = TypeCode::from_raw(route.get_u32());
        let source_id = route.get_u32();
        let destination_id = route.get_u32();
        Ok(self
            .codec
            .decode(type_code, &body[ROUTE_SIZE..])?
            .with_route(source_id, destination_id)
            .into_shared())
    }

    fn discard_remaining(&mut self, reason: &str) {
        warn!(path = %self.path.display(), lost = self.len, reason, "Spilled events dropped");
        self.len = 0;
        self.remove_file();
    }

    fn remove_file(&mut self) {
        self.consumed = 0;
        if self.file.take().is_none() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Spill file drained and removed"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Cannot remove drained spill file"),
        }
    }

    /// Write `live` ahead of the unread records into a fresh file.
    fn rewrite_with(&mut self, live: &[SharedEvent]) -> io::Result<()> {
        let staging = self.path.with_extension("spill.tmp");
        let mut out = BufWriter::new(File::create(&staging)?);
        for event in live {
            encode_record(&self.codec, event, &mut self.record)?;
            out.write_all(&self.record)?;
        }
        if let Some(file) = self.file.as_mut() {
            io::copy(&mut file.reader, &mut out)?;
        }
        out.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()?;
        self.file = None;
        self.consumed = 0;
        fs::rename(&staging, &self.path)
    }
}

impl SpillStore for FileSpill {
    fn push(&mut self, event: SharedEvent) -> Result<(), SharedEvent> {
        if self.closed || self.len >= self.capacity {
            return Err(event);
        }
        match self.append(&event) {
            Ok(()) => {
                self.len += 1;
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot write spill file");
                Err(event)
            }
        }
    }

    fn pop(&mut self) -> Option<SharedEvent> {
        let mut body = Vec::new();
        while !self.closed && self.len > 0 {
            let read = match self.file.as_mut() {
                Some(file) => read_record(&mut file.reader, &mut body),
                None => Ok(RecordRead::End),
            };
            match read {
                Ok(RecordRead::Record) => {
                    self.len -= 1;
                    self.consumed += (RECORD_PREFIX + body.len()) as u64;
                    let decoded = self.decode(&body);
                    if self.len == 0 {
                        self.remove_file();
                    }
                    match decoded {
                        Ok(event) => return Some(event),
                        Err(e) => {
                            warn!(path = %self.path.display(), error = %e, "Skipping undecodable spilled event");
                        }
                    }
                }
                Ok(RecordRead::End | RecordRead::Damaged) => self.discard_remaining("damaged record"),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Cannot read spill file");
                    self.discard_remaining("read error");
                }
            }
        }
        None
    }

    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }

    fn close(&mut self, live: Vec<SharedEvent>) -> usize {
        if self.closed {
            return self.len;
        }
        self.closed = true;
        if !live.is_empty() || self.consumed > 0 {
            match self.rewrite_with(&live) {
                Ok(()) => self.len += live.len(),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, dropped = live.len(), "Cannot persist queued events");
                }
            }
        }
        self.file = None;
        if self.len > 0 {
            info!(path = %self.path.display(), events = self.len, "Spilled events kept for the next start");
        }
        self.len
    }
}

impl Drop for FileSpill {
    fn drop(&mut self) {
        self.close(Vec::new());
    }
}

impl fmt::Debug for FileSpill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSpill")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn open_handles(path: &Path) -> io::Result<SpillFile> {
    let writer = OpenOptions::new().create(true).append(true).open(path)?;
    let reader = BufReader::new(File::open(path)?);
    Ok(SpillFile { writer, reader })
}

fn encode_record(codec: &EventCodec, event: &Event, buf: &mut BytesMut) -> io::Result<()> {
    buf.clear();
    buf.put_bytes(0, RECORD_PREFIX);
    buf.put_u32(event.type_code().raw());
    buf.put_u32(event.source_id());
    buf.put_u32(event.destination_id());
    codec
        .encode_into(event, buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(buf.len() - RECORD_PREFIX)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large to spill"))?;
    let checksum = crc32fast::hash(&buf[RECORD_PREFIX..]);
    buf[..4].copy_from_slice(&len.to_be_bytes());
    buf[4..RECORD_PREFIX].copy_from_slice(&checksum.to_be_bytes());
    Ok(())
}

/// Count the intact records and the offset where they end.
fn scan_records(mut reader: impl Read) -> io::Result<(usize, u64)> {
    let mut body = Vec::new();
    let mut records = 0;
    let mut valid_end = 0u64;
    while let RecordRead::Record = read_record(&mut reader, &mut body)? {
        records += 1;
        valid_end += (RECORD_PREFIX + body.len()) as u64;
    }
    Ok((records, valid_end))
}

fn read_record(reader: &mut impl Read, body: &mut Vec<u8>) -> io::Result<RecordRead> {
    let mut prefix = [0u8; RECORD_PREFIX];
    match read_full(reader, &mut prefix)? {
        0 => return Ok(RecordRead::End),
        RECORD_PREFIX => {}
        _ => return Ok(RecordRead::Damaged),
    }
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    let checksum = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    if !(ROUTE_SIZE..=MAX_RECORD_SIZE).contains(&len) {
        return Ok(RecordRead::Damaged);
    }
    body.resize(len, 0);
    if read_full(reader, body)? < len || crc32fast::hash(body) != checksum {
        return Ok(RecordRead::Damaged);
    }
    Ok(RecordRead::Record)
}

/// Like `read_exact`, but reports how much was read before end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
