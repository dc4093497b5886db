// SPDX-License-Identifier: Apache-2.0

//! Persisted tail position for a single log file.
//!
//! The on-disk form is two text lines, the inode followed by the byte offset,
//! stored next to the log file under `<log path>.offsetfile`. The inode is kept
//! so that a rotation between runs is detected instead of resuming at a stale
//! offset in a different file.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::tail::error::{Error, Result};

/// Suffix appended to the log file path to locate its offset file
pub const DEFAULT_SUFFIX: &str = ".offsetfile";

/// Resume point inside one file generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TailPosition {
    /// Inode of the generation this offset belongs to
    pub inode: u64,
    /// Byte offset of the first undelivered byte
    pub offset: u64,
}

impl TailPosition {
    pub fn new(inode: u64, offset: u64) -> Self {
        Self { inode, offset }
    }
}

/// Tail position bound to the offset file it is persisted in
#[derive(Debug, Clone)]
pub struct OffsetFile {
    path: PathBuf,
    position: TailPosition,
}

impl OffsetFile {
    /// Create an in-memory offset file for `log_path`. Nothing is written until `save`.
    pub fn new(log_path: impl AsRef<Path>, position: TailPosition) -> Self {
        Self {
            path: Self::path_for(log_path),
            position,
        }
    }

    /// Path of the offset file belonging to `log_path`.
    pub fn path_for(log_path: impl AsRef<Path>) -> PathBuf {
        let log_path = log_path.as_ref();
        if log_path.as_os_str().to_string_lossy().ends_with(DEFAULT_SUFFIX) {
            return log_path.to_path_buf();
        }
        let mut path = log_path.as_os_str().to_owned();
        path.push(DEFAULT_SUFFIX);
        PathBuf::from(path)
    }

    /// Load the persisted position for `log_path`.
    ///
    /// Returns `Ok(None)` when the file was never tailed. Malformed content is an
    /// error and is never repaired here.
    pub fn load(log_path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = Self::path_for(log_path);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let position = parse(&path, &contents)?;
        Ok(Some(Self { path, position }))
    }

    /// Delete the offset file for `log_path`. Returns whether a file was removed.
    pub fn remove(log_path: impl AsRef<Path>) -> Result<bool> {
        let path = Self::path_for(log_path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn position(&self) -> TailPosition {
        self.position
    }

    pub fn inode(&self) -> u64 {
        self.position.inode
    }

    pub fn offset(&self) -> u64 {
        self.position.offset
    }

    /// Start a new generation in memory. The caller decides when to persist.
    pub fn reset(&mut self, inode: u64, offset: u64) {
        self.position = TailPosition::new(inode, offset);
    }

    /// Move the offset forward by `bytes` consumed bytes.
    pub fn advance(&mut self, bytes: u64) {
        self.position.offset += bytes;
    }

    /// Persist the current position (write to temp, then rename).
    pub fn save(&self) -> Result<()> {
        atomic_write(&self.path, self.position)
    }
}

fn parse(path: &Path, contents: &str) -> Result<TailPosition> {
    let invalid = |reason: String| Error::InvalidOffsetFile {
        path: path.to_path_buf(),
        reason,
    };

    let lines: Vec<&str> = contents.trim().lines().collect();
    if lines.len() != 2 {
        return Err(invalid(format!(
            "expected 2 lines, found {}",
            lines.len()
        )));
    }

    let inode = lines[0]
        .trim()
        .parse::<u64>()
        .map_err(|e| invalid(format!("inode {:?}: {}", lines[0], e)))?;
    let offset = lines[1]
        .trim()
        .parse::<u64>()
        .map_err(|e| invalid(format!("offset {:?}: {}", lines[1], e)))?;

    Ok(TailPosition::new(inode, offset))
}

fn atomic_write(path: &Path, position: TailPosition) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", position.inode)?;
    writeln!(writer, "{}", position.offset)?;
    writer.flush()?;
    drop(writer);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_path_for_appends_suffix_once() {
        let log = Path::new("/var/lib/docker/containers/abc/abc-json.log");
        let path = OffsetFile::path_for(log);
        assert_eq!(
            path,
            PathBuf::from("/var/lib/docker/containers/abc/abc-json.log.offsetfile")
        );
        assert_eq!(OffsetFile::path_for(&path), path);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let loaded = OffsetFile::load(dir.path().join("app.log")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");

        let position = TailPosition::new(1234, 5678);
        OffsetFile::new(&log, position).save().unwrap();

        let loaded = OffsetFile::load(&log).unwrap().unwrap();
        assert_eq!(loaded.position(), position);
        assert_eq!(
            fs::read_to_string(OffsetFile::path_for(&log)).unwrap(),
            "1234\n5678\n"
        );
    }

    #[test]
    fn test_save_overwrites_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");

        let mut offsets = OffsetFile::new(&log, TailPosition::new(7, 0));
        offsets.save().unwrap();
        offsets.advance(42);
        offsets.save().unwrap();

        assert_eq!(OffsetFile::load(&log).unwrap().unwrap().offset(), 42);
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_load_wrong_line_count() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(OffsetFile::path_for(&log), "1\n2\n3\n").unwrap();

        let err = OffsetFile::load(&log).unwrap_err();
        assert!(matches!(err, Error::InvalidOffsetFile { .. }));
    }

    #[test]
    fn test_load_non_integer() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(OffsetFile::path_for(&log), "12\nabc\n").unwrap();

        let err = OffsetFile::load(&log).unwrap_err();
        assert!(matches!(err, Error::InvalidOffsetFile { .. }));
    }

    #[test]
    fn test_load_negative_offset_rejected() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(OffsetFile::path_for(&log), "12\n-4\n").unwrap();

        assert!(OffsetFile::load(&log).is_err());
    }

    #[test]
    fn test_load_tolerates_surrounding_whitespace() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        fs::write(OffsetFile::path_for(&log), "\n 12 \n34\n\n").unwrap();

        let loaded = OffsetFile::load(&log).unwrap().unwrap();
        assert_eq!(loaded.position(), TailPosition::new(12, 34));
    }

    #[test]
    fn test_reset_is_in_memory_only() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");

        let mut offsets = OffsetFile::new(&log, TailPosition::new(1, 100));
        offsets.save().unwrap();
        offsets.reset(2, 0);

        assert_eq!(offsets.position(), TailPosition::new(2, 0));
        let on_disk = OffsetFile::load(&log).unwrap().unwrap();
        assert_eq!(on_disk.position(), TailPosition::new(1, 100));
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        OffsetFile::new(&log, TailPosition::new(1, 1)).save().unwrap();

        assert!(OffsetFile::remove(&log).unwrap());
        assert!(!OffsetFile::remove(&log).unwrap());
        assert!(OffsetFile::load(&log).unwrap().is_none());
    }
}
