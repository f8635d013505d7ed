//! The byte-addressable file store the kernel consumes. `FileSystem` /
//! `OpenFile` are the seams; `MemFileSystem` is the in-memory stub
//! implementation every test boots with.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One open handle with its own position. `read`/`write` return `None`
/// on device error and `Some(n)` for a transfer of `n` bytes (`n` may be
/// short at end of file).
pub trait OpenFile: Send {
    fn read(&mut self, buf: &mut [u8]) -> Option<usize>;
    fn write(&mut self, buf: &[u8]) -> Option<usize>;
    fn length(&self) -> usize;
}

pub trait FileSystem: Send + Sync {
    /// Open `name`, creating it first when `create` is set. `None` when
    /// the file does not exist (or cannot be created).
    fn open(&self, name: &str, create: bool) -> Option<Box<dyn OpenFile>>;
    fn remove(&self, name: &str) -> bool;
}

/// Named in-memory byte files. Handles share the backing bytes, so a
/// writer and a later reader observe the same content.
pub struct MemFileSystem {
    files: Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Install a file with fixed contents (test fixtures, boot images).
    pub fn install(&self, name: &str, bytes: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(Mutex::new(bytes)));
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().unwrap();
        files.get(name).map(|f| f.lock().unwrap().clone())
    }
}

impl Default for MemFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemFileSystem {
    fn open(&self, name: &str, create: bool) -> Option<Box<dyn OpenFile>> {
        let mut files = self.files.lock().unwrap();
        let data = match files.get(name) {
            Some(data) => Arc::clone(data),
            None if create => {
                let data = Arc::new(Mutex::new(Vec::new()));
                files.insert(name.to_string(), Arc::clone(&data));
                data
            }
            None => return None,
        };
        Some(Box::new(MemFile { data, pos: 0 }))
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().unwrap().remove(name).is_some()
    }
}

struct MemFile {
    data: Arc<Mutex<Vec<u8>>>,
    pos: usize,
}

impl OpenFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
        let data = self.data.lock().unwrap();
        if self.pos >= data.len() {
            return Some(0);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Some(n)
    }

    fn write(&mut self, buf: &[u8]) -> Option<usize> {
        let mut data = self.data.lock().unwrap();
        let end = self.pos + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Some(buf.len())
    }

    fn length(&self) -> usize {
        self.data.lock().unwrap().len()
    }
}
