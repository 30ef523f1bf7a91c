use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::AnalysisRecord;

const LEN_PREFIX: u64 = 4;

/// Largest frame body `append` will write. A length prefix above this can only
/// come from corruption, never from a torn write.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Append-only record log.
/// Frame format: [Length (4b LE)][rkyv archive (N bytes)]
#[derive(Debug)]
pub struct Segment {
    pub file_path: PathBuf,
    file: File,
    current_offset: u64,
    strict: bool,
}

impl Segment {
    /// Opens (or creates) the segment. `strict` fsyncs every append.
    pub fn open(path: &Path, strict: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let current_offset = file.metadata()?.len();

        Ok(Self {
            file_path: path.to_path_buf(),
            file,
            current_offset,
            strict,
        })
    }

    pub fn len(&self) -> u64 {
        self.current_offset
    }

    pub fn is_empty(&self) -> bool {
        self.current_offset == 0
    }

    /// Appends one record and returns the offset of its frame.
    pub fn append(&mut self, record: &AnalysisRecord) -> Result<u64, StoreError> {
        let bytes = rkyv::to_bytes::<_, 4096>(record)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        if bytes.len() > MAX_FRAME_BYTES {
            return Err(StoreError::Encode(format!("record too large: {} bytes", bytes.len())));
        }
        let len = bytes.len() as u32;

        let start = self.current_offset;
        let mut frame = Vec::with_capacity(LEN_PREFIX as usize + bytes.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&bytes);

        self.file.seek(SeekFrom::Start(start))?;
        let written = self.file.write_all(&frame).and_then(|()| {
            if self.strict {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // A failed append must not resurface on replay
            self.discard_from(start);
            return Err(e.into());
        }

        self.current_offset = start + frame.len() as u64;
        Ok(start)
    }

    fn discard_from(&mut self, start: u64) {
        if let Err(e) = self.file.set_len(start) {
            warn!(path = %self.file_path.display(), offset = start, error = %e, "could not cut failed frame");
        }
        self.current_offset = start;
    }

    pub fn read(&self, offset: u64) -> Result<AnalysisRecord, StoreError> {
        // The clone shares the cursor with the writer; append always seeks first
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        read_frame(&mut file, offset, self.current_offset)?
            .map(|(record, _)| record)
            .ok_or(StoreError::Corrupt {
                offset,
                reason: "unexpected end of segment".into(),
            })
    }

    /// Walks every complete frame from the start of the file. A frame whose
    /// declared length runs past the end of the file is treated as torn and
    /// cut off, along with everything after it. Undecodable frames and length
    /// prefixes above `MAX_FRAME_BYTES` are errors.
    pub fn replay(&mut self) -> Result<Vec<(u64, AnalysisRecord)>, StoreError> {
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut records = Vec::new();
        let mut offset = 0u64;
        while offset < self.current_offset {
            match read_frame(&mut reader, offset, self.current_offset)? {
                Some((record, body_len)) => {
                    records.push((offset, record));
                    offset += LEN_PREFIX + body_len;
                }
                None => {
                    warn!(
                        path = %self.file_path.display(),
                        offset,
                        dropped = self.current_offset - offset,
                        "truncating torn frame at end of segment"
                    );
                    self.file.set_len(offset)?;
                    self.file.sync_data()?;
                    self.current_offset = offset;
                    break;
                }
            }
        }

        debug!(count = records.len(), bytes = self.current_offset, "segment replayed");
        Ok(records)
    }
}

/// Reads one frame at the reader's position and returns the record with its
/// body length. `Ok(None)` means a plausible frame runs past `end`, i.e. it
/// was never completely written.
fn read_frame<R: Read>(
    reader: &mut R,
    offset: u64,
    end: u64,
) -> Result<Option<(AnalysisRecord, u64)>, StoreError> {
    if offset + LEN_PREFIX > end {
        return Ok(None);
    }
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf) {
        return match e.kind() {
            io::ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(e.into()),
        };
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(StoreError::Corrupt {
            offset,
            reason: format!("frame length {len} exceeds {MAX_FRAME_BYTES} bytes"),
        });
    }
    if offset + LEN_PREFIX + len as u64 > end {
        return Ok(None);
    }

    let mut bytes = vec![0u8; len];
    if let Err(e) = reader.read_exact(&mut bytes) {
        return match e.kind() {
            io::ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(e.into()),
        };
    }

    // rkyv needs the archive on an aligned buffer
    let mut aligned = rkyv::AlignedVec::with_capacity(len);
    aligned.extend_from_slice(&bytes);

    let record = rkyv::from_bytes::<AnalysisRecord>(&aligned).map_err(|e| StoreError::Corrupt {
        offset,
        reason: e.to_string(),
    })?;
    Ok(Some((record, len as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metadata;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn sample(doc: &str) -> AnalysisRecord {
        let mut meta = Metadata::new();
        meta.insert("filename".into(), "x1.png".into());
        AnalysisRecord::new(Uuid::new_v4(), vec![0.1, 0.2, 0.3], doc.into(), meta)
    }

    #[test]
    fn append_then_read_back() {
        let dir = TempDir::new().unwrap();
        let mut seg = Segment::open(&dir.path().join("seg.dat"), false).unwrap();

        let a = sample("first");
        let b = sample("second");
        let off_a = seg.append(&a).unwrap();
        let off_b = seg.append(&b).unwrap();

        assert_eq!(off_a, 0);
        assert!(off_b > off_a);
        assert_eq!(seg.read(off_a).unwrap(), a);
        assert_eq!(seg.read(off_b).unwrap(), b);
    }

    #[test]
    fn replay_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg.dat");
        let recs = vec![sample("one"), sample("two"), sample("three")];
        {
            let mut seg = Segment::open(&path, true).unwrap();
            for r in &recs {
                seg.append(r).unwrap();
            }
        }

        let mut seg = Segment::open(&path, false).unwrap();
        let replayed: Vec<AnalysisRecord> = seg.replay().unwrap().into_iter().map(|(_, r)| r).collect();
        assert_eq!(replayed, recs);
    }

    #[test]
    fn replay_truncates_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg.dat");
        let good = sample("kept");
        let full_len = {
            let mut seg = Segment::open(&path, false).unwrap();
            seg.append(&good).unwrap();
            seg.len()
        };

        // Half-written frame: length prefix promises more than is there
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&500u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }

        let mut seg = Segment::open(&path, false).unwrap();
        let replayed = seg.replay().unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].1, good);
        assert_eq!(seg.len(), full_len);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), full_len);

        // The next append lands right after the last good frame
        let next = sample("after crash");
        assert_eq!(seg.append(&next).unwrap(), full_len);
    }

    #[test]
    fn garbage_frame_is_reported_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg.dat");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&8u32.to_le_bytes()).unwrap();
            f.write_all(&[0xFF; 8]).unwrap();
        }
        let mut seg = Segment::open(&path, false).unwrap();
        assert!(matches!(seg.replay(), Err(StoreError::Corrupt { offset: 0, .. })));
    }

    #[test]
    fn discarded_frame_does_not_come_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg.dat");
        let kept = sample("kept");
        let off_lost = {
            let mut seg = Segment::open(&path, true).unwrap();
            seg.append(&kept).unwrap();
            let off = seg.append(&sample("never acknowledged")).unwrap();
            seg.discard_from(off);
            assert_eq!(seg.len(), off);
            off
        };

        let mut seg = Segment::open(&path, false).unwrap();
        let replayed = seg.replay().unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].1, kept);
        assert_eq!(seg.append(&sample("next")).unwrap(), off_lost);
    }

    #[test]
    fn absurd_length_mid_file_is_corrupt_not_torn() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg.dat");
        let off_b = {
            let mut seg = Segment::open(&path, false).unwrap();
            seg.append(&sample("a")).unwrap();
            let off = seg.append(&sample("b")).unwrap();
            seg.append(&sample("c")).unwrap();
            off
        };
        let size = std::fs::metadata(&path).unwrap().len();

        {
            let mut f = OpenOptions::new().write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start(off_b)).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }

        let mut seg = Segment::open(&path, false).unwrap();
        assert!(matches!(seg.replay(), Err(StoreError::Corrupt { offset, .. }) if offset == off_b));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);
    }
}
