//! Raw physical memory: one flat byte array carved into fixed-size
//! frames. Only kernel code touches this directly; user addresses go
//! through a page table first, so an out-of-range physical access here
//! is a kernel bug and panics.

use std::sync::Mutex;

pub struct PhysMemory {
    page_size: usize,
    num_pages: usize,
    bytes: Mutex<Vec<u8>>,
}

impl PhysMemory {
    pub fn new(page_size: usize, num_pages: usize) -> Self {
        assert!(page_size > 0 && num_pages > 0);
        Self {
            page_size,
            num_pages,
            bytes: Mutex::new(vec![0u8; page_size * num_pages]),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Total bytes of physical memory.
    pub fn size(&self) -> usize {
        self.page_size * self.num_pages
    }

    pub fn read(&self, paddr: usize, buf: &mut [u8]) {
        let mem = self.bytes.lock().unwrap();
        let end = paddr
            .checked_add(buf.len())
            .filter(|&e| e <= mem.len())
            .unwrap_or_else(|| panic!("physical read out of bounds: addr=0x{paddr:08x}"));
        buf.copy_from_slice(&mem[paddr..end]);
    }

    pub fn write(&self, paddr: usize, data: &[u8]) {
        let mut mem = self.bytes.lock().unwrap();
        let end = paddr
            .checked_add(data.len())
            .filter(|&e| e <= mem.len())
            .unwrap_or_else(|| panic!("physical write out of bounds: addr=0x{paddr:08x}"));
        mem[paddr..end].copy_from_slice(data);
    }

    /// Zero one frame, e.g. before handing it to a fresh page table.
    pub fn zero_page(&self, ppn: u32) {
        let start = ppn as usize * self.page_size;
        let mut mem = self.bytes.lock().unwrap();
        assert!(start + self.page_size <= mem.len(), "zero_page: bad ppn {ppn}");
        mem[start..start + self.page_size].fill(0);
    }
}
