// SPDX-License-Identifier: Apache-2.0

//! Line reader over a growing, rotating log file.
//!
//! The tailer hands out complete, newline-terminated lines and tracks how many
//! bytes of the current file generation have been consumed. Consumed bytes only
//! become durable when [`Tailer::commit`] is called, which lets the caller
//! persist the position after the lines have been stored elsewhere.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::tail::error::{Error, Result};
use crate::tail::file_id::{inode_of, inode_of_file};
use crate::tail::offset_file::{OffsetFile, TailPosition};

const NEWLINE: u8 = b'\n';

/// Upper bound for a single read from the file. Reads repeat until a line is
/// complete, so lines longer than this are still returned whole.
const READ_CHUNK_SIZE: u64 = 1024 * 1024;

/// Stateful reader for one log file path
pub struct Tailer {
    path: PathBuf,
    offsets: OffsetFile,
    /// Inode of the generation being read, `None` once the path is gone
    inode: Option<u64>,
    file: Option<File>,
    /// Bytes read from `file` that have not yet formed a returned line
    buffer: Vec<u8>,
    /// Start of the unconsumed region of `buffer`
    cursor: usize,
    /// Bytes of `buffer` before this index hold no newline past `cursor`
    scanned: usize,
    /// Complete lines recovered from a rotated-away generation
    drained: VecDeque<String>,
    lines_read: u64,
}

impl Tailer {
    /// Open `path`, resuming from its offset file when the inode still matches.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let persisted = OffsetFile::load(&path)?;

        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::FileNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        let inode = inode_of_file(&file)?;

        let offsets = match persisted {
            Some(offsets) if offsets.inode() == inode => {
                debug!(path = ?path, offset = offsets.offset(), "Resuming from offset file");
                file.seek(SeekFrom::Start(offsets.offset()))?;
                offsets
            }
            Some(mut offsets) => {
                // The old generation cannot be opened by inode, so whatever it
                // held past the saved offset is out of reach.
                warn!(
                    path = ?path,
                    persisted_inode = offsets.inode(),
                    inode,
                    "Inode changed, possible data loss"
                );
                offsets.reset(inode, 0);
                offsets
            }
            None => OffsetFile::new(&path, TailPosition::new(inode, 0)),
        };

        Ok(Self {
            path,
            offsets,
            inode: Some(inode),
            file: Some(file),
            buffer: Vec::new(),
            cursor: 0,
            scanned: 0,
            drained: VecDeque::new(),
            lines_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Position covering every byte handed out so far (not necessarily persisted).
    pub fn position(&self) -> TailPosition {
        self.offsets.position()
    }

    /// Number of lines returned by `read_line`.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Read the next complete line, or `None` when no complete line is available yet.
    ///
    /// Fails with [`Error::FileNotFound`] once the file has disappeared and all
    /// lines drained from the last generation have been returned.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let current = inode_of(&self.path)?;
        if current != self.inode {
            self.rotate(current)?;
        }

        if let Some(line) = self.drained.pop_front() {
            self.lines_read += 1;
            return Ok(Some(line));
        }

        if self.file.is_none() {
            return Err(Error::FileNotFound(self.path.clone()));
        }

        self.check_truncation()?;

        loop {
            if let Some(line) = self.next_buffered_line() {
                self.lines_read += 1;
                return Ok(Some(line));
            }
            if self.fill_buffer()? == 0 {
                return Ok(None);
            }
        }
    }

    /// Persist the current position.
    pub fn commit(&self) -> Result<()> {
        if self.inode.is_none() {
            debug!(path = ?self.path, "No file generation to commit");
            return Ok(());
        }
        self.offsets.save()
    }

    /// Switch to the generation now at the path (or to none at all).
    fn rotate(&mut self, current: Option<u64>) -> Result<()> {
        info!(
            path = ?self.path,
            old_inode = ?self.inode,
            new_inode = ?current,
            "Log file changed"
        );

        self.drain_generation()?;
        self.file = None;
        self.inode = None;

        if current.is_none() {
            return Ok(());
        }

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        // The path may have been replaced again since the stat above; trust the handle.
        let inode = inode_of_file(&file)?;

        self.offsets.reset(inode, 0);
        self.offsets.save()?;
        self.inode = Some(inode);
        self.file = Some(file);

        Ok(())
    }

    /// Read the rest of the current generation and queue its complete lines.
    fn drain_generation(&mut self) -> Result<()> {
        let mut bytes = self.buffer.split_off(self.cursor);
        self.buffer.clear();
        self.cursor = 0;
        self.scanned = 0;

        if let Some(file) = self.file.as_mut() {
            file.read_to_end(&mut bytes)?;
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let complete = match bytes.iter().rposition(|&b| b == NEWLINE) {
            Some(last) => {
                let partial = &bytes[last + 1..];
                if !partial.is_empty() {
                    warn!(
                        path = ?self.path,
                        partial = %String::from_utf8_lossy(partial),
                        "Partial last line (not logged)"
                    );
                }
                &bytes[..last]
            }
            None => {
                warn!(
                    path = ?self.path,
                    bytes = bytes.len(),
                    "Partial chunk (not logged)"
                );
                return Ok(());
            }
        };

        for raw in complete.split(|&b| b == NEWLINE) {
            let line = decode(raw);
            if !line.is_empty() {
                self.drained.push_back(line);
            }
        }

        debug!(path = ?self.path, lines = self.drained.len(), "Drained rotated file");
        Ok(())
    }

    /// Detect an in-place truncation and restart the generation at offset 0.
    fn check_truncation(&mut self) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        let read_position = self.offsets.offset() + (self.buffer.len() - self.cursor) as u64;
        let len = file.metadata()?.len();
        if len >= read_position {
            return Ok(());
        }

        warn!(
            path = ?self.path,
            len,
            read_position,
            "File truncated, restarting from the beginning"
        );
        file.seek(SeekFrom::Start(0))?;
        self.buffer.clear();
        self.cursor = 0;
        self.scanned = 0;
        self.offsets.reset(self.offsets.inode(), 0);

        Ok(())
    }

    /// Append the next chunk of the file to the buffer, returning the bytes read.
    fn fill_buffer(&mut self) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.scanned = self.scanned.saturating_sub(self.cursor);
            self.cursor = 0;
        }

        let read = file.by_ref().take(READ_CHUNK_SIZE).read_to_end(&mut self.buffer)?;
        Ok(read)
    }

    /// Pop the next non-blank complete line from the buffer, advancing the offset
    /// over every consumed byte including blank lines and delimiters.
    fn next_buffered_line(&mut self) -> Option<String> {
        loop {
            let from = self.scanned.max(self.cursor);
            let Some(idx) = self.buffer[from..].iter().position(|&b| b == NEWLINE) else {
                // only the bytes read after this point need looking at next time
                self.scanned = self.buffer.len();
                return None;
            };

            let start = self.cursor;
            let end = from + idx;
            let line = decode(&self.buffer[start..end]);

            self.cursor = end + 1;
            self.scanned = self.cursor;
            self.offsets.advance((end - start) as u64 + 1);

            if !line.is_empty() {
                return Some(line);
            }
        }
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}
