use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Append-only event journal.
///
/// Each entry is framed as `[u32 le: len][bincode: Event][u32 le: crc32 of payload]`.
/// A crash mid-write leaves at most one short or corrupt trailing frame, which
/// replay discards.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely. `Ok(false)` on a clean or partial EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read one frame and verify its checksum. `None` marks the end of usable data.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync a single event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing. Durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
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

    /// Write a snapshot to `<path>.tmp` and fsync it.
    pub fn write_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("journal.tmp"))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live journal and reopen for appends.
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("journal.tmp"), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_snapshot(&self.path, events)?;
        self.install_snapshot()
    }

    /// Read every intact event. A missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!("journal replay stopped at undecodable entry: {e}");
                    break;
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    use crate::model::*;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("appointd_test_journal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn client_event(name: &str) -> Event {
        Event::ClientRegistered {
            client: Client {
                id: Ulid::new(),
                name: name.into(),
                email: format!("{name}@example.com"),
                phone: "+254700000000".into(),
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.journal");
        let events = vec![
            client_event("amina"),
            Event::BusinessVerified { id: Ulid::new() },
            Event::AppointmentCancelled { id: Ulid::new(), comment: Some("sick".into()) },
        ];
        {
            let mut journal = Journal::open(&path).unwrap();
            for e in &events {
                journal.append(e).unwrap();
            }
        }
        assert_eq!(Journal::replay(&path).unwrap(), events);
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let path = tmp_path("truncated.journal");
        let event = client_event("baraka");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Journal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.journal");
        assert!(Journal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.journal");
        let payload = bincode::serialize(&Event::StaffRemoved { id: Ulid::new() }).unwrap();
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Journal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compaction_shrinks_and_keeps_appending() {
        let path = tmp_path("compact.journal");
        let keep = client_event("chebet");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&keep).unwrap();
            for _ in 0..20 {
                journal.append(&Event::ReminderSent { id: Ulid::new() }).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let after_event = Event::BusinessVerified { id: Ulid::new() };
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.compact(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(journal.appends_since_compact(), 0);
            journal.append(&after_event).unwrap();
        }
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted journal should be smaller: {after} < {before}");
        assert_eq!(Journal::replay(&path).unwrap(), vec![keep, after_event]);
    }

    #[test]
    fn buffered_appends_count_until_flush() {
        let path = tmp_path("buffered.journal");
        let events: Vec<Event> = (0..5).map(|i| client_event(&format!("c{i}"))).collect();
        {
            let mut journal = Journal::open(&path).unwrap();
            for e in &events {
                journal.append_buffered(e).unwrap();
            }
            assert_eq!(journal.appends_since_compact(), 5);
            journal.flush_sync().unwrap();
        }
        assert_eq!(Journal::replay(&path).unwrap(), events);
    }
}
