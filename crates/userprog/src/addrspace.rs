//! Per-process virtual address space: a flat page table indexed by
//! virtual page number, plus the bounded copy routines every syscall
//! uses to move bytes in and out of user memory.
//!
//! Copy semantics are deliberately forgiving at the boundary: malformed
//! parameters (negative address, offset or length, a range past the
//! host buffer) transfer zero bytes rather than fault, and a copy that
//! walks off the mapped region simply stops there and reports how far
//! it got.

use std::sync::Arc;

use machine::PhysMemory;

#[derive(Debug, Clone, Copy)]
pub struct TranslationEntry {
    pub vpn: u32,
    pub ppn: u32,
    pub valid: bool,
    pub read_only: bool,
    pub used: bool,
}

impl TranslationEntry {
    pub fn new(vpn: u32, ppn: u32, read_only: bool) -> Self {
        Self {
            vpn,
            ppn,
            valid: true,
            read_only,
            used: false,
        }
    }
}

pub struct AddrSpace {
    entries: Vec<TranslationEntry>,
    page_size: usize,
    memory: Arc<PhysMemory>,
}

impl AddrSpace {
    /// Build a space over an explicit page table. The table is indexed
    /// by virtual page number, so entry `i` maps vpn `i`.
    pub fn with_entries(memory: Arc<PhysMemory>, entries: Vec<TranslationEntry>) -> Self {
        let page_size = memory.page_size();
        Self {
            entries,
            page_size,
            memory,
        }
    }

    pub fn num_pages(&self) -> usize {
        self.entries.len()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Every physical frame backing this space, for returning to the
    /// pool on teardown.
    pub fn frames(&self) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|e| e.valid)
            .map(|e| e.ppn)
            .collect()
    }

    /// Translate one virtual address, marking the entry used. `None`
    /// for a negative address, a vpn past the table, or an invalid
    /// entry.
    pub fn translate(&mut self, vaddr: i32) -> Option<usize> {
        if vaddr < 0 {
            return None;
        }
        let vpn = vaddr as usize / self.page_size;
        let page_off = vaddr as usize % self.page_size;
        let entry = self.entries.get_mut(vpn).filter(|e| e.valid)?;
        entry.used = true;
        Some(entry.ppn as usize * self.page_size + page_off)
    }

    /// Copy from user memory at `vaddr` into `data[offset..offset+length]`.
    /// Returns the number of bytes moved, which is less than `length`
    /// when the range runs past the end of the mapped space.
    pub fn read(&mut self, vaddr: i32, data: &mut [u8], offset: i32, length: i32) -> usize {
        let Some((mut vaddr, mut offset, length)) = self.clamp(vaddr, offset, length, data.len())
        else {
            return 0;
        };
        let mut remaining = length;
        let mut total = 0;
        while remaining > 0 {
            let vpn = vaddr / self.page_size;
            let page_off = vaddr % self.page_size;
            let chunk = remaining.min(self.page_size - page_off);
            let Some(entry) = self.entries.get_mut(vpn).filter(|e| e.valid) else {
                break;
            };
            entry.used = true;
            let paddr = entry.ppn as usize * self.page_size + page_off;
            self.memory.read(paddr, &mut data[offset..offset + chunk]);
            // the used marker is a transient access flag, dropped once
            // the page's chunk is consumed
            self.entries[vpn].used = false;
            vaddr += chunk;
            offset += chunk;
            total += chunk;
            remaining -= chunk;
        }
        total
    }

    /// Copy `data[offset..offset+length]` into user memory at `vaddr`.
    /// Stops short at an unmapped or read-only page.
    pub fn write(&mut self, vaddr: i32, data: &[u8], offset: i32, length: i32) -> usize {
        let Some((mut vaddr, mut offset, length)) = self.clamp(vaddr, offset, length, data.len())
        else {
            return 0;
        };
        let mut remaining = length;
        let mut total = 0;
        while remaining > 0 {
            let vpn = vaddr / self.page_size;
            let page_off = vaddr % self.page_size;
            let chunk = remaining.min(self.page_size - page_off);
            let Some(entry) = self.entries.get_mut(vpn).filter(|e| e.valid) else {
                break;
            };
            if entry.read_only {
                break;
            }
            entry.used = true;
            let paddr = entry.ppn as usize * self.page_size + page_off;
            self.memory.write(paddr, &data[offset..offset + chunk]);
            self.entries[vpn].used = false;
            vaddr += chunk;
            offset += chunk;
            total += chunk;
            remaining -= chunk;
        }
        total
    }

    /// Validate raw copy parameters. `None` means a zero-byte transfer;
    /// otherwise the length comes back clamped to the end of the space.
    fn clamp(
        &self,
        vaddr: i32,
        offset: i32,
        length: i32,
        buf_len: usize,
    ) -> Option<(usize, usize, usize)> {
        if vaddr < 0 || offset < 0 || length < 0 {
            return None;
        }
        let (offset, length) = (offset as usize, length as usize);
        if offset.checked_add(length)? > buf_len {
            return None;
        }
        let space_len = self.entries.len() * self.page_size;
        let vaddr = vaddr as usize;
        if vaddr >= space_len {
            return None;
        }
        Some((vaddr, offset, length.min(space_len - vaddr)))
    }

    /// Read a NUL-terminated string of at most `max_len` bytes from
    /// user memory. `None` if no terminator is found in range or the
    /// bytes are not valid UTF-8.
    pub fn read_string(&mut self, vaddr: i32, max_len: usize) -> Option<String> {
        let mut bytes = vec![0u8; max_len + 1];
        let got = self.read(vaddr, &mut bytes, 0, (max_len + 1) as i32);
        let nul = bytes[..got].iter().position(|&b| b == 0)?;
        bytes.truncate(nul);
        String::from_utf8(bytes).ok()
    }
}
