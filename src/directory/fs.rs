use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;

use crate::core::error::Result;
use crate::directory::{Directory, DirectoryInput, DirectoryOutput};

/// Filesystem-backed directory. When `use_mmap` is set, `open_input` maps
/// the file read-only and clones share the `Arc<Mmap>`; otherwise inputs
/// read through positioned reads (`pread`) on an independently opened file
/// descriptor, which is just as safe to clone.
#[derive(Debug)]
pub struct FsDirectory {
    root: PathBuf,
    use_mmap: bool,
}

impl FsDirectory {
    pub fn open(root: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(FsDirectory { root, use_mmap })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Directory for FsDirectory {
    fn open_output(&self, name: &str) -> Result<Box<dyn DirectoryOutput>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.path(name))?;
        Ok(Box::new(FsOutput { file }))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn DirectoryInput>> {
        let path = self.path(name);
        if self.use_mmap {
            let file = File::open(&path)?;
            let len = file.metadata()?.len();
            // Safety: the barrel files this engine maps are immutable once
            // sealed (§3 Barrel lifecycle), so concurrent mutation of the
            // backing file while mapped cannot happen through this API.
            let mmap = unsafe { Mmap::map(&file)? };
            Ok(Box::new(MmapInput {
                mmap: Arc::new(mmap),
                len,
            }))
        } else {
            let file = File::open(&path)?;
            let len = file.metadata()?.len();
            Ok(Box::new(PreadInput {
                file: Arc::new(file),
                len,
            }))
        }
    }

    fn delete(&self, name: &str) -> Result<()> {
        fs::remove_file(self.path(name))?;
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        fs::rename(self.path(old), self.path(new))?;
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

struct FsOutput {
    file: File,
}

impl DirectoryOutput for FsOutput {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        IoWrite::write_all(&mut self.file, buf)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[derive(Debug)]
struct MmapInput {
    mmap: Arc<Mmap>,
    len: u64,
}

impl DirectoryInput for MmapInput {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        buf.copy_from_slice(&self.mmap[start..end]);
        Ok(())
    }

    fn clone_input(&self) -> Box<dyn DirectoryInput> {
        Box::new(MmapInput {
            mmap: Arc::clone(&self.mmap),
            len: self.len,
        })
    }
}

#[derive(Debug)]
struct PreadInput {
    file: Arc<File>,
    len: u64,
}

impl DirectoryInput for PreadInput {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn clone_input(&self) -> Box<dyn DirectoryInput> {
        Box::new(PreadInput {
            file: Arc::clone(&self.file),
            len: self.len,
        })
    }
}

/// Advisory single-writer lock over a directory, guarding the OS-level
/// invariant that the in-process manifest mutex (§4.5, §5) already enforces
/// for this process — an extra guard against a second process opening the
/// same `index_location` for writing.
pub struct ExclusiveLock {
    file: Mutex<File>,
}

impl ExclusiveLock {
    pub fn acquire(root: impl AsRef<Path>) -> Result<Self> {
        let path = root.as_ref().join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        crate::directory::lock::flock_exclusive(&file)?;
        Ok(ExclusiveLock {
            file: Mutex::new(file),
        })
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        let file = self.file.lock();
        let _ = crate::directory::lock::flock_unlock(&file);
    }
}
