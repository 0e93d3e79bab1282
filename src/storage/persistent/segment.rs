//! Snapshot segments.
//!
//! A segment is an immutable file holding the full entity table and ledger as
//! of one WAL checkpoint. Segments are numbered (`segment_00001.seg`, ...) and
//! the newest one is authoritative; older ones are kept only until pruned.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [codec-framed SegmentHeader]
//! [codec-framed SegmentData]
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::table::{EntitySnapshot, LedgerTable};

use super::codec;

const SEGMENT_PREFIX: &str = "segment_";
const SEGMENT_EXT: &str = "seg";
const TEMP_MARKER: &str = ".tmp.";

/// A finalized segment file.
#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    /// Cumulative WAL sequences covered, inclusive on both ends.
    pub sequence_range: (u64, u64),
}

impl Segment {
    /// Opens a segment and reads its header.
    pub fn open(path: &Path) -> IoResult<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        codec::read_header(&mut reader)?;
        let header: SegmentHeader = codec::decode(&mut reader)?;
        Ok(Self {
            path: path.to_path_buf(),
            sequence_range: (header.sequence_start, header.sequence_end),
        })
    }

    /// Path of the segment file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot held by this segment.
    pub fn read_all(&self) -> IoResult<SegmentData> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        codec::read_header(&mut reader)?;
        let _header: SegmentHeader = codec::decode(&mut reader)?;
        codec::decode(&mut reader)
    }
}

/// Segment file header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// First cumulative sequence covered.
    pub sequence_start: u64,
    /// Last cumulative sequence covered.
    pub sequence_end: u64,
    /// Entity rows plus ledger records in the snapshot.
    pub entry_count: u64,
    /// When the segment was written.
    pub created_at: DateTime<Utc>,
}

/// Full store state at a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentData {
    /// Entity rows and the id high-water mark.
    pub entities: EntitySnapshot,
    /// Ledger records and metadata.
    pub ledger: LedgerTable,
}

impl SegmentData {
    /// Entity rows plus ledger records.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entities.entities.len() + usize::try_from(self.ledger.total()).unwrap_or(usize::MAX)
    }
}

/// Writes a segment to a temp file and renames it into place on finalize.
pub struct SegmentWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
    sequence_start: u64,
    sequence_end: u64,
}

impl SegmentWriter {
    fn new(final_path: PathBuf, sequence_start: u64) -> IoResult<Self> {
        let temp_path = final_path.with_extension(format!("{SEGMENT_EXT}{TEMP_MARKER}{}", Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;

        Ok(Self {
            temp_path: Some(temp_path),
            final_path,
            writer: Some(writer),
            sequence_start,
            sequence_end: sequence_start,
        })
    }

    /// Writes the snapshot. May be called once.
    pub fn write_data(&mut self, data: &SegmentData, sequence_end: u64) -> IoResult<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "segment data already written"))?;

        let header = SegmentHeader {
            sequence_start: self.sequence_start,
            sequence_end,
            entry_count: data.entry_count() as u64,
            created_at: Utc::now(),
        };
        writer.write_all(&codec::encode(&header)?)?;
        writer.write_all(&codec::encode(data)?)?;

        self.sequence_end = sequence_end;
        self.writer = Some(writer);
        Ok(())
    }

    /// Flushes, fsyncs, and renames the segment into place. The segment is
    /// durable once this returns.
    pub fn finalize(mut self) -> IoResult<Segment> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "segment writer already consumed"))?;
        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "segment writer already consumed"))?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&temp_path, &self.final_path)?;

        Ok(Segment {
            path: self.final_path.clone(),
            sequence_range: (self.sequence_start, self.sequence_end),
        })
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        self.writer.take();
        if let Some(temp_path) = self.temp_path.take() {
            let _ = fs::remove_file(temp_path);
        }
    }
}

/// Segment files of one store directory.
#[derive(Debug)]
pub struct SegmentManager {
    dir: PathBuf,
    segments: Vec<Segment>,
    next_segment_id: u32,
}

impl SegmentManager {
    /// Scans `dir` for segments, removing temp files left by a crash.
    ///
    /// # Errors
    /// Fails if a finalized segment's header cannot be read.
    pub fn open(dir: &Path) -> IoResult<Self> {
        fs::create_dir_all(dir)?;

        let mut segments = Vec::new();
        let mut next_segment_id = 1u32;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.contains(TEMP_MARKER) {
                warn!("removing incomplete segment {}", path.display());
                let _ = fs::remove_file(&path);
                continue;
            }
            let Some(id) = segment_id(name) else {
                continue;
            };
            next_segment_id = next_segment_id.max(id + 1);
            let segment = Segment::open(&path)
                .map_err(|e| IoError::new(e.kind(), format!("segment {}: {e}", path.display())))?;
            segments.push(segment);
        }
        segments.sort_by_key(|s| s.sequence_range.1);

        Ok(Self {
            dir: dir.to_path_buf(),
            segments,
            next_segment_id,
        })
    }

    /// Segments ordered oldest first.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Highest cumulative sequence held in a segment.
    #[must_use]
    pub fn persisted_sequence(&self) -> u64 {
        self.segments.last().map_or(0, |s| s.sequence_range.1)
    }

    fn next_segment_path(&mut self) -> PathBuf {
        let name = format!("{SEGMENT_PREFIX}{:05}.{SEGMENT_EXT}", self.next_segment_id);
        self.next_segment_id += 1;
        self.dir.join(name)
    }

    /// Starts a segment covering sequences from `sequence_start`.
    pub fn create_segment_writer(&mut self, sequence_start: u64) -> IoResult<SegmentWriter> {
        let path = self.next_segment_path();
        SegmentWriter::new(path, sequence_start)
    }

    /// Registers a finalized segment.
    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
        self.segments.sort_by_key(|s| s.sequence_range.1);
    }

    /// Snapshot of the newest segment, or empty state when there is none.
    pub fn load_latest(&self) -> IoResult<SegmentData> {
        match self.segments.last() {
            Some(segment) => segment.read_all(),
            None => Ok(SegmentData::default()),
        }
    }

    /// Deletes all but the newest `keep` segments. Returns how many were removed.
    pub fn prune(&mut self, keep: usize) -> IoResult<usize> {
        let excess = self.segments.len().saturating_sub(keep.max(1));
        for segment in self.segments.drain(..excess) {
            debug!("pruning segment {}", segment.path.display());
            fs::remove_file(&segment.path)?;
        }
        Ok(excess)
    }
}

fn segment_id(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_EXT)?
        .strip_suffix('.')?
        .parse()
        .ok()
}
