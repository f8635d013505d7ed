//! Executable images. The kernel only ever sees the `ObjectFile` seam: a
//! list of page-granular sections plus a "materialize page `i` of
//! section `s` into frame `p`" operation. `FlatLoader` implements the
//! native teaching format; real ELF executables go through
//! [`crate::elf::ElfLoader`].

use thiserror::Error;

use crate::fs::OpenFile;
use crate::memory::PhysMemory;

/// One loadable section, always a whole number of pages.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub first_vpn: u32,
    pub pages: u32,
    pub read_only: bool,
}

pub trait ObjectFile: Send {
    fn entry_point(&self) -> u32;
    fn sections(&self) -> &[Section];
    /// Copy page `page` of section `section` into physical frame `ppn`.
    fn load_page(&self, section: usize, page: u32, ppn: u32, mem: &PhysMemory);
}

pub trait ObjectLoader: Send + Sync {
    fn load(&self, file: &mut dyn OpenFile) -> Result<Box<dyn ObjectFile>, ImageError>;
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image truncated")]
    Truncated,
    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("image page size {image} does not match machine page size {machine}")]
    PageSizeMismatch { image: usize, machine: usize },
    #[error("malformed section table: {0}")]
    BadSectionTable(&'static str),
    #[error("unsupported executable: {0}")]
    Unsupported(String),
}

/// Read an `OpenFile` to the end. Device errors surface as `Truncated`.
pub(crate) fn read_all(file: &mut dyn OpenFile) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::with_capacity(file.length());
    let mut chunk = [0u8; 512];
    loop {
        match file.read(&mut chunk) {
            Some(0) => return Ok(out),
            Some(n) => out.extend_from_slice(&chunk[..n]),
            None => return Err(ImageError::Truncated),
        }
    }
}

// Flat image layout, all fields little-endian u32:
//   magic, page_size, entry, nsections,
//   nsections x { first_vpn, pages, flags },
//   payload (pages in section-table order, page_size bytes each).
const FLAT_MAGIC: u32 = 0x464c_4154;
const FLAG_READ_ONLY: u32 = 1;
const MAX_SECTIONS: usize = 64;

pub struct FlatLoader {
    page_size: usize,
}

impl FlatLoader {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }
}

impl ObjectLoader for FlatLoader {
    fn load(&self, file: &mut dyn OpenFile) -> Result<Box<dyn ObjectFile>, ImageError> {
        let data = read_all(file)?;
        let mut r = Reader { data: &data, pos: 0 };

        let magic = r.u32()?;
        if magic != FLAT_MAGIC {
            return Err(ImageError::BadMagic(magic));
        }
        let page_size = r.u32()? as usize;
        if page_size != self.page_size {
            return Err(ImageError::PageSizeMismatch {
                image: page_size,
                machine: self.page_size,
            });
        }
        let entry = r.u32()?;
        let nsections = r.u32()? as usize;
        if nsections > MAX_SECTIONS {
            return Err(ImageError::BadSectionTable("too many sections"));
        }

        let mut sections = Vec::with_capacity(nsections);
        let mut total_pages = 0u32;
        for i in 0..nsections {
            let first_vpn = r.u32()?;
            let pages = r.u32()?;
            let flags = r.u32()?;
            if pages == 0 {
                return Err(ImageError::BadSectionTable("empty section"));
            }
            sections.push(Section {
                name: format!("seg{i}"),
                first_vpn,
                pages,
                read_only: flags & FLAG_READ_ONLY != 0,
            });
            total_pages += pages;
        }

        let payload_start = r.pos;
        let expected = payload_start + total_pages as usize * page_size;
        if data.len() < expected {
            return Err(ImageError::Truncated);
        }

        Ok(Box::new(FlatImage {
            entry,
            page_size,
            payload_start,
            sections,
            data,
        }))
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u32(&mut self) -> Result<u32, ImageError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or(ImageError::Truncated)?;
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }
}

struct FlatImage {
    entry: u32,
    page_size: usize,
    payload_start: usize,
    sections: Vec<Section>,
    data: Vec<u8>,
}

impl ObjectFile for FlatImage {
    fn entry_point(&self) -> u32 {
        self.entry
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn load_page(&self, section: usize, page: u32, ppn: u32, mem: &PhysMemory) {
        let earlier: u32 = self.sections[..section].iter().map(|s| s.pages).sum();
        let offset = self.payload_start + (earlier + page) as usize * self.page_size;
        mem.write(
            ppn as usize * self.page_size,
            &self.data[offset..offset + self.page_size],
        );
    }
}

/// Build a flat image from raw section contents. Each section is padded
/// to a whole number of pages; test fixtures and demo programs are
/// assembled with this.
pub fn build_flat_image(
    page_size: usize,
    entry: u32,
    sections: &[(u32, bool, &[u8])],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&FLAT_MAGIC.to_le_bytes());
    out.extend_from_slice(&(page_size as u32).to_le_bytes());
    out.extend_from_slice(&entry.to_le_bytes());
    out.extend_from_slice(&(sections.len() as u32).to_le_bytes());
    for (first_vpn, read_only, bytes) in sections {
        let pages = bytes.len().div_ceil(page_size).max(1) as u32;
        let flags = if *read_only { FLAG_READ_ONLY } else { 0 };
        out.extend_from_slice(&first_vpn.to_le_bytes());
        out.extend_from_slice(&pages.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
    }
    for (_, _, bytes) in sections {
        let pages = bytes.len().div_ceil(page_size).max(1);
        let mut padded = bytes.to_vec();
        padded.resize(pages * page_size, 0);
        out.extend_from_slice(&padded);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemFileSystem};

    const PS: usize = 64;

    fn parse(bytes: Vec<u8>) -> Result<Box<dyn ObjectFile>, ImageError> {
        let fs = MemFileSystem::new();
        fs.install("a.img", bytes);
        let mut f = fs.open("a.img", false).unwrap();
        FlatLoader::new(PS).load(f.as_mut())
    }

    #[test]
    fn round_trips_sections() {
        let text = vec![0xaa; PS];
        let data = vec![0xbb; PS + 3];
        let image = build_flat_image(PS, 0x40, &[(0, true, &text), (1, false, &data)]);
        let img = parse(image).unwrap();

        assert_eq!(img.entry_point(), 0x40);
        let sections = img.sections();
        assert_eq!(sections.len(), 2);
        assert!(sections[0].read_only);
        assert_eq!(sections[1].pages, 2);

        let mem = PhysMemory::new(PS, 4);
        img.load_page(1, 1, 3, &mem);
        let mut buf = vec![0u8; PS];
        mem.read(3 * PS, &mut buf);
        assert_eq!(buf[..3], [0xbb, 0xbb, 0xbb]);
        assert_eq!(buf[3], 0);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(matches!(parse(vec![0; 16]), Err(ImageError::BadMagic(0))));

        let mut image = build_flat_image(PS, 0, &[(0, false, &[1, 2, 3])]);
        image.truncate(image.len() - 1);
        assert!(matches!(parse(image), Err(ImageError::Truncated)));
    }

    #[test]
    fn rejects_foreign_page_size() {
        let image = build_flat_image(128, 0, &[(0, false, &[1])]);
        assert!(matches!(
            parse(image),
            Err(ImageError::PageSizeMismatch { image: 128, machine: PS })
        ));
    }
}
