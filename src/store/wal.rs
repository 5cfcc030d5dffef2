use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::BookingEvent;

/// Frame one booking event as `[u32 len][bincode payload][u32 crc32]`, little endian.
fn write_frame(writer: &mut impl Write, event: &BookingEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "booking event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum Frame {
    Event(BookingEvent),
    /// Clean end of file.
    End,
    /// Truncated or corrupt tail; everything from here on is ignored.
    Torn,
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    let mut first = [0u8; 1];
    if !read_exact_or_eof(reader, &mut first)? {
        return Ok(Frame::End);
    }
    len_buf[0] = first[0];
    if !read_exact_or_eof(reader, &mut len_buf[1..])? {
        return Ok(Frame::Torn);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut payload)? {
        return Ok(Frame::Torn);
    }
    let mut crc_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut crc_buf)? {
        return Ok(Frame::Torn);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Torn);
    }
    match bincode::deserialize::<BookingEvent>(&payload) {
        Ok(event) => Ok(Frame::Event(event)),
        Err(_) => Ok(Frame::Torn),
    }
}

/// Result of reading a booking log back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<BookingEvent>,
    /// A torn tail (crash mid-append) was found and skipped.
    pub torn_tail: bool,
}

/// Append-only booking log. Appends are buffered; `flush_sync` makes them durable.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &BookingEvent) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &BookingEvent) -> io::Result<()> {
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

    /// Write the snapshot to a sibling temp file and fsync it. Does not touch the live log.
    pub fn write_compact_file(path: &Path, events: &[BookingEvent]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[BookingEvent]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Read every intact event. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event) => replay.events.push(event),
                Frame::End => break,
                Frame::Torn => {
                    replay.torn_tail = true;
                    break;
                }
            }
        }
        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("bunkhouse_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn inserted(beds: u32) -> BookingEvent {
        BookingEvent::Inserted {
            booking: ConfirmedBooking {
                id: Ulid::new(),
                room_id: "dorm-a".into(),
                beds_count: beds,
                stay: Stay::new("2026-05-01".parse().unwrap(), "2026-05-03".parse().unwrap()),
                status: BookingStatus::Confirmed,
                booked_as: RoomType::Mixed,
                hold_id: None,
                guest_ref: "guest-1".into(),
                created_at: "2026-04-01T12:00:00Z".parse().unwrap(),
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let first = inserted(2);
        let id = match &first {
            BookingEvent::Inserted { booking } => booking.id,
            _ => unreachable!(),
        };
        let events = vec![
            first,
            BookingEvent::StatusChanged {
                id,
                status: BookingStatus::CheckedIn,
            },
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, events);
        assert!(!replay.torn_tail);
    }

    #[test]
    fn torn_tail_is_skipped() {
        let path = tmp_path("torn_tail.wal");
        let event = inserted(1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event]);
        assert!(replay.torn_tail);
    }

    #[test]
    fn missing_file_replays_empty() {
        let path = tmp_path("missing.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert!(!replay.torn_tail);
    }

    #[test]
    fn bad_crc_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let payload = bincode::serialize(&inserted(3)).unwrap();
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert!(replay.torn_tail);
    }

    #[test]
    fn compaction_shrinks_log_and_accepts_new_appends() {
        let path = tmp_path("compaction.wal");
        let keep = inserted(2);
        let booking_id = match &keep {
            BookingEvent::Inserted { booking } => booking.id,
            _ => unreachable!(),
        };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&keep).unwrap();
            for _ in 0..10 {
                wal.append(&BookingEvent::StatusChanged {
                    id: booking_id,
                    status: BookingStatus::Confirmed,
                })
                .unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let late = inserted(1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&late).unwrap();
        }
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![keep, late]);
    }

    #[test]
    fn buffered_appends_count_until_compaction() {
        let path = tmp_path("buffered.wal");
        let events: Vec<_> = (1..=4).map(inserted).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 4);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap().events, events);
    }
}
