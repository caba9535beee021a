use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Events per record when writing a compacted snapshot.
const COMPACT_RECORD_EVENTS: usize = 256;

/// Encode one transaction to [len][bincode][crc32] format.
fn encode_record(writer: &mut impl Write, txn: &[Event]) -> io::Result<()> {
    let payload =
        bincode::serialize(txn).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only Write-Ahead Log of transactions.
///
/// Format per record: `[u32: len][bincode: Vec<Event>][u32: crc32]`
/// - One record is one committed transaction. Replay applies a record
///   entirely or not at all.
/// - A truncated or corrupt tail (crash mid-write) is discarded.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last successful `flush_sync`.
    committed_len: u64,
    /// Buffered since the last successful `flush_sync`.
    pending_appends: u64,
    appends_since_compact: u64,
    #[cfg(test)]
    fault: Option<Fault>,
}

/// Where an injected I/O failure strikes during `flush_sync`.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    /// Buffered bytes never reach the file.
    Flush,
    /// Bytes reach the file but the sync fails.
    Sync,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            pending_appends: 0,
            appends_since_compact: 0,
            #[cfg(test)]
            fault: None,
        })
    }

    /// Append and fsync a single transaction. Production code goes through
    /// `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, txn: &[Event]) -> io::Result<()> {
        self.append_buffered(txn)?;
        self.flush_sync()
    }

    /// Buffer a transaction without syncing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, txn: &[Event]) -> io::Result<()> {
        encode_record(&mut self.writer, txn)?;
        self.pending_appends += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if matches!(self.fault, Some(Fault::Flush)) {
            self.fault = None;
            return Err(io::Error::other("injected flush failure"));
        }
        self.writer.flush()?;
        #[cfg(test)]
        if matches!(self.fault, Some(Fault::Sync)) {
            self.fault = None;
            return Err(io::Error::other("injected sync failure"));
        }
        self.writer.get_ref().sync_all()?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.appends_since_compact += self.pending_appends;
        self.pending_appends = 0;
        Ok(())
    }

    /// Drop everything written since the last successful `flush_sync`.
    ///
    /// Buffered bytes are discarded without being written, and any bytes
    /// that already reached the file are truncated away, so a failed
    /// transaction can never be replayed.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (_, discarded) = stale.into_parts();
        if let Ok(bytes) = discarded {
            tracing::warn!(bytes = bytes.len(), "discarding unflushed WAL bytes");
        }
        self.pending_appends = 0;
        let file = self.writer.get_ref();
        if file.metadata()?.len() > self.committed_len {
            file.set_len(self.committed_len)?;
            file.sync_all()?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot to a temp file and fsync. Slow; call before `swap_compact_file`.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for chunk in events.chunks(COMPACT_RECORD_EVENTS) {
            encode_record(&mut writer, chunk)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the WAL and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending_appends = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact transaction, in commit order.
    pub fn replay(path: &Path) -> io::Result<Vec<Vec<Event>>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(path = %path.display(), records = records.len(), "WAL tail failed CRC, discarding");
                break;
            }

            match bincode::deserialize::<Vec<Event>>(&payload) {
                Ok(txn) => records.push(txn),
                Err(_) => break,
            }
        }

        Ok(records)
    }
}
