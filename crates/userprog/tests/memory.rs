use std::sync::Arc;

use machine::PhysMemory;
use userprog::{AddrSpace, TranslationEntry};

const PS: usize = 64;

/// Three mapped pages with a deliberately scrambled frame assignment.
fn three_page_space(memory: &Arc<PhysMemory>) -> AddrSpace {
    let entries = vec![
        TranslationEntry::new(0, 3, false),
        TranslationEntry::new(1, 1, false),
        TranslationEntry::new(2, 5, false),
    ];
    AddrSpace::with_entries(Arc::clone(memory), entries)
}

#[test]
fn translate_maps_through_the_page_table() {
    let memory = Arc::new(PhysMemory::new(PS, 8));
    let mut space = three_page_space(&memory);

    assert_eq!(space.translate(0), Some(3 * PS));
    assert_eq!(space.translate((PS + 7) as i32), Some(PS + 7));
    assert_eq!(space.translate((2 * PS + 63) as i32), Some(5 * PS + 63));
    assert_eq!(space.translate(-1), None);
    assert_eq!(space.translate((3 * PS) as i32), None);
}

#[test]
fn translate_refuses_invalid_entries() {
    let memory = Arc::new(PhysMemory::new(PS, 8));
    let mut hole = TranslationEntry::new(0, 0, false);
    hole.valid = false;
    let mut space = AddrSpace::with_entries(memory, vec![hole]);
    assert_eq!(space.translate(0), None);
}

#[test]
fn round_trips_across_page_boundaries() {
    let memory = Arc::new(PhysMemory::new(PS, 8));
    let mut space = three_page_space(&memory);

    for len in [0usize, 1, PS, PS + 17, 3 * PS] {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let wrote = space.write(0, &data, 0, len as i32);
        assert_eq!(wrote, len);

        let mut back = vec![0u8; len];
        let read = space.read(0, &mut back, 0, len as i32);
        assert_eq!(read, len);
        assert_eq!(back, data);
    }
}

#[test]
fn copies_land_in_the_mapped_frames() {
    let memory = Arc::new(PhysMemory::new(PS, 8));
    let mut space = three_page_space(&memory);

    let wrote = space.write((PS + 10) as i32, b"xyz", 0, 3);
    assert_eq!(wrote, 3);
    // vpn 1 maps to frame 1
    let mut raw = [0u8; 3];
    memory.read(PS + 10, &mut raw);
    assert_eq!(&raw, b"xyz");
}

#[test]
fn transfer_stops_at_an_unmapped_page() {
    let memory = Arc::new(PhysMemory::new(PS, 8));
    let mut hole = TranslationEntry::new(1, 1, false);
    hole.valid = false;
    let entries = vec![
        TranslationEntry::new(0, 3, false),
        hole,
        TranslationEntry::new(2, 5, false),
    ];
    let mut space = AddrSpace::with_entries(memory, entries);

    let data = vec![0xabu8; 2 * PS];
    assert_eq!(space.write(0, &data, 0, data.len() as i32), PS);
    let mut back = vec![0u8; 2 * PS];
    let len = back.len() as i32;
    assert_eq!(space.read(0, &mut back, 0, len), PS);
}

#[test]
fn malformed_parameters_move_nothing() {
    let memory = Arc::new(PhysMemory::new(PS, 8));
    let mut space = three_page_space(&memory);
    let mut buf = vec![0u8; 32];

    assert_eq!(space.read(-1, &mut buf, 0, 4), 0);
    assert_eq!(space.read(0, &mut buf, -1, 4), 0);
    assert_eq!(space.read(0, &mut buf, 0, -4), 0);
    // offset + length past the end of the host buffer
    assert_eq!(space.read(0, &mut buf, 30, 4), 0);
    // address past the end of the space
    assert_eq!(space.read((3 * PS) as i32, &mut buf, 0, 4), 0);
    assert_eq!(space.write((3 * PS) as i32, &buf, 0, 4), 0);
}

#[test]
fn length_clamps_to_the_end_of_the_space() {
    let memory = Arc::new(PhysMemory::new(PS, 8));
    let mut space = three_page_space(&memory);
    let mut buf = vec![0u8; 4 * PS];
    // starts in range, runs past it: moves only what is mapped
    assert_eq!(space.read(PS as i32, &mut buf, 0, (4 * PS) as i32), 2 * PS);
}

#[test]
fn writes_stop_at_read_only_pages() {
    let memory = Arc::new(PhysMemory::new(PS, 8));
    let entries = vec![
        TranslationEntry::new(0, 0, false),
        TranslationEntry::new(1, 1, true),
    ];
    let mut space = AddrSpace::with_entries(Arc::clone(&memory), entries);

    let data = vec![0x77u8; 2 * PS];
    assert_eq!(space.write(0, &data, 0, data.len() as i32), PS);
    // the read-only frame is untouched
    let mut raw = vec![0u8; PS];
    memory.read(PS, &mut raw);
    assert!(raw.iter().all(|&b| b == 0));
    // reads are unaffected by the write protection
    let mut back = vec![0u8; 2 * PS];
    let len = back.len() as i32;
    assert_eq!(space.read(0, &mut back, 0, len), 2 * PS);
}

#[test]
fn read_string_requires_a_terminator() {
    let memory = Arc::new(PhysMemory::new(PS, 8));
    let mut space = three_page_space(&memory);

    space.write(5, b"hello\0", 0, 6);
    assert_eq!(space.read_string(5, 32), Some("hello".to_string()));
    // terminator falls outside the scanned window
    assert_eq!(space.read_string(5, 3), None);

    // no NUL anywhere in range
    let junk = vec![b'a'; 64];
    space.write(PS as i32, &junk, 0, 64);
    assert_eq!(space.read_string(PS as i32, 32), None);
}
