//! Console device: one input byte queue and one output byte sink,
//! exposed as `OpenFile` handles so the kernel can bind them straight
//! into descriptor slots 0 and 1. Tests preload the input and inspect
//! the output.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::fs::OpenFile;

pub struct Console {
    input: Arc<Mutex<VecDeque<u8>>>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            input: Arc::new(Mutex::new(VecDeque::new())),
            output: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue bytes for the next console reads.
    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Drain and return everything written so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.output.lock().unwrap())
    }

    /// Handle suitable for descriptor 0.
    pub fn reader(&self) -> Box<dyn OpenFile> {
        Box::new(ConsoleReader {
            input: Arc::clone(&self.input),
        })
    }

    /// Handle suitable for descriptor 1.
    pub fn writer(&self) -> Box<dyn OpenFile> {
        Box::new(ConsoleWriter {
            output: Arc::clone(&self.output),
        })
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

struct ConsoleReader {
    input: Arc<Mutex<VecDeque<u8>>>,
}

impl OpenFile for ConsoleReader {
    fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
        let mut input = self.input.lock().unwrap();
        let n = buf.len().min(input.len());
        for b in buf.iter_mut().take(n) {
            *b = input.pop_front().unwrap();
        }
        Some(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Option<usize> {
        None
    }

    fn length(&self) -> usize {
        self.input.lock().unwrap().len()
    }
}

struct ConsoleWriter {
    output: Arc<Mutex<Vec<u8>>>,
}

impl OpenFile for ConsoleWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Option<usize> {
        None
    }

    fn write(&mut self, buf: &[u8]) -> Option<usize> {
        self.output.lock().unwrap().extend_from_slice(buf);
        Some(buf.len())
    }

    fn length(&self) -> usize {
        self.output.lock().unwrap().len()
    }
}
