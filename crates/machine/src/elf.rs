//! ELF32 executables behind the same `ObjectFile` seam as the flat
//! format. Each PT_LOAD segment becomes one page-granular section;
//! segments without the write flag load as read-only pages.

use goblin::elf::program_header::{PF_W, PT_LOAD};
use goblin::elf::Elf;

use crate::fs::OpenFile;
use crate::image::{read_all, ImageError, ObjectFile, ObjectLoader, Section};
use crate::memory::PhysMemory;

pub struct ElfLoader {
    page_size: usize,
}

impl ElfLoader {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }
}

impl ObjectLoader for ElfLoader {
    fn load(&self, file: &mut dyn OpenFile) -> Result<Box<dyn ObjectFile>, ImageError> {
        let data = read_all(file)?;
        let elf = Elf::parse(&data).map_err(|e| ImageError::Unsupported(e.to_string()))?;
        let entry = elf.entry as u32;

        let mut segments: Vec<Segment> = Vec::new();
        let mut sections: Vec<Section> = Vec::new();
        let mut headers: Vec<_> = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == PT_LOAD && ph.p_memsz > 0)
            .collect();
        headers.sort_by_key(|ph| ph.p_vaddr);

        for ph in headers {
            if ph.p_vaddr as usize % self.page_size != 0 {
                return Err(ImageError::BadSectionTable("segment not page aligned"));
            }
            if ph.p_filesz > ph.p_memsz {
                return Err(ImageError::BadSectionTable("file size exceeds memory size"));
            }
            let file_end = (ph.p_offset + ph.p_filesz) as usize;
            if file_end > data.len() {
                return Err(ImageError::Truncated);
            }
            let read_only = ph.p_flags & PF_W == 0;
            let pages = (ph.p_memsz as usize).div_ceil(self.page_size) as u32;
            sections.push(Section {
                name: if read_only { ".text" } else { ".data" }.to_string(),
                first_vpn: ph.p_vaddr as u32 / self.page_size as u32,
                pages,
                read_only,
            });
            segments.push(Segment {
                offset: ph.p_offset as usize,
                file_size: ph.p_filesz as usize,
            });
        }

        Ok(Box::new(ElfImage {
            entry,
            page_size: self.page_size,
            sections,
            segments,
            data,
        }))
    }
}

struct Segment {
    offset: usize,
    file_size: usize,
}

struct ElfImage {
    entry: u32,
    page_size: usize,
    sections: Vec<Section>,
    segments: Vec<Segment>,
    data: Vec<u8>,
}

impl ObjectFile for ElfImage {
    fn entry_point(&self) -> u32 {
        self.entry
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn load_page(&self, section: usize, page: u32, ppn: u32, mem: &PhysMemory) {
        let seg = &self.segments[section];
        let mut frame = vec![0u8; self.page_size];
        let start = page as usize * self.page_size;
        // the tail of the last page (and whole bss pages) stays zeroed
        if start < seg.file_size {
            let n = self.page_size.min(seg.file_size - start);
            frame[..n].copy_from_slice(&self.data[seg.offset + start..seg.offset + start + n]);
        }
        mem.write(ppn as usize * self.page_size, &frame);
    }
}
