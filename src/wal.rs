use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Length prefix plus trailing checksum.
const FRAME_OVERHEAD: u64 = 8;

/// Frames claiming a larger payload are treated as garbage, not allocated.
const MAX_PAYLOAD_LEN: usize = 1 << 20;

/// One log frame, little-endian: payload length (u32), bincode payload,
/// crc32 of the payload (u32).
fn frame(event: &Event) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut out = Vec::with_capacity(payload.len() + FRAME_OVERHEAD as usize);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(out)
}

fn append_handle(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn side_file(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}

/// Fill `buf` completely. `Ok(false)` if the file ran out first.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact frame and its size on disk, or `None` where the good prefix ends.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|event| (event, len as u64 + FRAME_OVERHEAD)))
}

/// The booking log. Writes are buffered; `flush_sync` makes them durable.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: append_handle(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.writer.write_all(&frame(event)?)?;
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

    /// First half of compaction: `events` go to a synced side file next to
    /// `path`. The live log is not touched.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut side = BufWriter::new(File::create(side_file(path))?);
        for event in events {
            side.write_all(&frame(event)?)?;
        }
        side.flush()?;
        side.get_ref().sync_all()
    }

    /// Second half: the side file replaces the log and appends continue on it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(side_file(&self.path), &self.path)?;
        self.writer = append_handle(&self.path)?;
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

    /// Events of every intact frame, oldest first. No file means no events.
    ///
    /// Whatever follows the last intact frame (a write cut short by a crash,
    /// a checksum mismatch) is cut off the file, so the next append lands
    /// right after good data.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let on_disk = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut events = Vec::new();
        let mut good = 0u64;
        while let Some((event, size)) = read_frame(&mut reader)? {
            events.push(event);
            good += size;
        }

        if good < on_disk {
            tracing::warn!(
                "WAL {}: cutting {} unreadable bytes after {} events",
                path.display(),
                on_disk - good,
                events.len()
            );
            OpenOptions::new().write(true).open(path)?.set_len(good)?;
        }
        Ok(events)
    }
}
