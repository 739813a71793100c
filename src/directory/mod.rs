//! Abstract byte-addressable file store (§4.2). The rest of the engine only
//! ever talks to a `dyn Directory`; two backends are provided: `fs` (real
//! files, optionally memory-mapped) and `memory` (fully in-RAM, used by
//! tests and by the in-memory-Directory end-to-end scenarios in `tests/`).

pub mod fs;
pub mod lock;
pub mod memory;

use std::fmt::Debug;

use crate::core::error::Result;

/// A read-only, byte-addressable view over one named file. `clone_input`
/// must produce an independent cursor over the same immutable bytes so
/// readers can parallelize without contending on a shared position (§4.2).
pub trait DirectoryInput: Send + Sync + Debug {
    fn len(&self) -> u64;

    /// Read `buf.len()` bytes starting at `offset`. Short reads are an I/O
    /// error, not a partial fill.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn read_all(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.len() as usize];
        self.read_at(0, &mut buf)?;
        Ok(buf)
    }

    fn clone_input(&self) -> Box<dyn DirectoryInput>;
}

/// A write-only, append-oriented handle to one named file.
pub trait DirectoryOutput: Send {
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Flush and fsync so the bytes are durable before the caller proceeds
    /// (e.g. before the manifest is rewritten to reference this file).
    fn sync(&mut self) -> Result<()>;
}

/// Capability set exposed by a directory backend (§4.2).
pub trait Directory: Send + Sync + Debug {
    fn open_output(&self, name: &str) -> Result<Box<dyn DirectoryOutput>>;
    fn open_input(&self, name: &str) -> Result<Box<dyn DirectoryInput>>;
    fn delete(&self, name: &str) -> Result<()>;
    /// Atomic within this directory; used by the manifest rewrite protocol.
    fn rename(&self, old: &str, new: &str) -> Result<()>;
    fn exists(&self, name: &str) -> bool;
    fn list(&self) -> Result<Vec<String>>;
}
