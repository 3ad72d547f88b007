//! Content identity of archive candidates.
//!
//! A regular file is identified by streaming its bytes through BLAKE3 in
//! fixed-size chunks. A symbolic link is identified by its raw target string
//! and has a logical size of zero; the link is never followed, so a link can
//! be archived and verified without its target existing.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use blake3::Hasher;

use crate::entry::{EntryKind, Fingerprint, Identity};

/// Chunk size used when streaming file content through the hasher.
pub const HASH_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Compute the identity of a regular file or symbolic link.
///
/// Fails with an I/O error if the path is unreadable, vanishes mid-read, or
/// is neither a regular file nor a symlink.
pub fn identify(path: &Path) -> io::Result<Identity> {
    let metadata = fs::symlink_metadata(path)?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(path)?;
        return Ok(Identity::new(
            0,
            fingerprint_link_target(&target),
            EntryKind::Symlink,
        ));
    }

    if !file_type.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a regular file or symlink: {}", path.display()),
        ));
    }

    let file = File::open(path)?;
    let (size, fingerprint) = hash_reader(file)?;
    Ok(Identity::new(size, fingerprint, EntryKind::File))
}

/// Stream a reader through BLAKE3, returning the byte count and fingerprint.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<(u64, Fingerprint)> {
    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut size = 0u64;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok((size, hasher.finalize().into()))
}

/// Fingerprint a symlink target string.
pub fn fingerprint_link_target(target: &Path) -> Fingerprint {
    blake3::hash(&link_target_bytes(target)).into()
}

#[cfg(unix)]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    target.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    target.to_string_lossy().into_owned().into_bytes()
}

/// A reader adapter that fingerprints everything read through it.
///
/// Used by copy paths to prove the bytes written match the identity that was
/// computed before the copy started.
pub struct HashingReader<R> {
    inner: R,
    hasher: Hasher,
    size: u64,
}

impl<R: Read> HashingReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            size: 0,
        }
    }

    /// Consume the adapter, returning the byte count and fingerprint so far.
    pub fn finish(self) -> (u64, Fingerprint) {
        (self.size, self.hasher.finalize().into())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }
}
