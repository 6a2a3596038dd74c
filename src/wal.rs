use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// One committed transaction. Its events are applied together or not at all.
pub type Record = Vec<Event>;

/// Frame overhead: `u32` length prefix plus `u32` crc32 trailer.
const FRAME_OVERHEAD: u64 = 8;

/// A length prefix above this is treated as corruption rather than allocated.
const MAX_RECORD_BYTES: usize = 256 * 1024 * 1024;

fn write_frame(writer: &mut impl Write, record: &[Event]) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidData, "record too large for WAL frame"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// `Ok(None)` on a clean or torn end of file.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<()>> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Next intact record and its on-disk size, or `None` where the intact prefix ends.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Record, u64)>> {
    let mut word = [0u8; 4];
    if read_exact_or_eof(reader, &mut word)?.is_none() {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_RECORD_BYTES {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if read_exact_or_eof(reader, &mut payload)?.is_none()
        || read_exact_or_eof(reader, &mut word)?.is_none()
        || u32::from_le_bytes(word) != crc32fast::hash(&payload)
    {
        return Ok(None);
    }

    Ok(bincode::deserialize::<Record>(&payload)
        .ok()
        .map(|record| (record, len as u64 + FRAME_OVERHEAD)))
}

/// Intact records from the head of the file plus the byte length they cover.
fn scan(path: &Path) -> io::Result<(Vec<Record>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut valid_len = 0;
    while let Some((record, size)) = read_frame(&mut reader)? {
        records.push(record);
        valid_len += size;
    }
    Ok((records, valid_len))
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append-only log of committed transactions, one frame per transaction:
/// `[u32 len][bincode Vec<Event>][u32 crc32]`, little-endian.
///
/// A torn trailing frame fails the length or CRC check and is dropped whole on
/// recovery, so a multi-event transaction is never half-replayed.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Read every intact record, cut off any torn tail, and reopen for appending.
    ///
    /// The tail is cut so that frames appended after a crash stay reachable.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Record>)> {
        let (records, valid_len) = scan(path)?;
        let on_disk = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        if on_disk > valid_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = on_disk - valid_len,
                "discarding torn WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let wal = Self {
            writer: open_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: records.len() as u64,
        };
        Ok((wal, records))
    }

    /// Buffer one record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, record: &[Event]) -> io::Result<()> {
        write_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `snapshot` as the single record of a fresh log next to `path`, fsynced.
    pub fn write_compact_file(path: &Path, snapshot: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        write_frame(&mut writer, snapshot)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the log and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        self.writer = open_append(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }
}
