// SPDX-License-Identifier: Apache-2.0

//! Inode lookup for tailed files.
//!
//! A file generation is identified by its inode: rotation by rename or by
//! delete-and-recreate leaves a new inode at the same path, while appends keep
//! the inode stable.

use std::fs::File;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Inode of the file currently at `path`, or `None` when nothing is there.
pub fn inode_of(path: impl AsRef<Path>) -> io::Result<Option<u64>> {
    match std::fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.ino())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Inode of an open file handle. Stays valid after the path is unlinked.
pub fn inode_of_file(file: &File) -> io::Result<u64> {
    Ok(file.metadata()?.ino())
}
