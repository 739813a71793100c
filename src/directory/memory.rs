use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::error::{Error, Result};
use crate::directory::{Directory, DirectoryInput, DirectoryOutput};

/// Fully in-memory directory backend, used by tests and by callers that
/// want a `Directory` without touching the filesystem (§4.2).
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    files: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        MemoryDirectory::default()
    }
}

impl Directory for MemoryDirectory {
    fn open_output(&self, name: &str) -> Result<Box<dyn DirectoryOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buf: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn DirectoryInput>> {
        let files = self.files.read();
        let data = files
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no such file: {name}")))?;
        Ok(Box::new(MemoryInput { data }))
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut files = self.files.write();
        files
            .remove(name)
            .ok_or_else(|| Error::not_found(format!("no such file: {name}")))?;
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let mut files = self.files.write();
        let data = files
            .remove(old)
            .ok_or_else(|| Error::not_found(format!("no such file: {old}")))?;
        files.insert(new.to_string(), data);
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }
}

struct MemoryOutput {
    name: String,
    buf: Vec<u8>,
    files: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl DirectoryOutput for MemoryOutput {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.files
            .write()
            .insert(self.name.clone(), Arc::new(std::mem::take(&mut self.buf)));
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryInput {
    data: Arc<Vec<u8>>,
}

impl DirectoryInput for MemoryInput {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(Error::corruption("read past end of in-memory file"));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn clone_input(&self) -> Box<dyn DirectoryInput> {
        Box::new(MemoryInput {
            data: Arc::clone(&self.data),
        })
    }
}
