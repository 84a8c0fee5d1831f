//! Maps decoded firmware images onto the target's page-addressable flash and byte-addressable
//! EEPROM.

use crate::error::{Error, Result};
use crate::protocol::MAX_PAYLOAD;

/// Fill value for bytes a partially covered page does not define; identical to the erased state
/// of the flash, so padding never programs anything.
const FILL: u8 = 0xff;

/// A contiguous run of defined bytes from a decoded Intel-HEX image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Address of the first byte.
    pub address: u32,

    /// The defined bytes.
    pub data: Vec<u8>,
}

impl Segment {
    /// Exclusive end address of the segment. Saturates at the top of the address space, so a
    /// segment placed near `u32::MAX` fails the bounds checks instead of wrapping past them.
    pub fn end(&self) -> u32 {
        self.address.saturating_add(self.data.len() as u32)
    }
}

/// Fails if any defined byte lies at or past the end of the application flash region.
pub(crate) fn check_flash_bounds(segments: &[Segment], application_size: u32) -> Result<()> {
    for segment in segments {
        if segment.end() > application_size {
            return Err(Error::ImageExceedsFlash {
                end: segment.end(),
                limit: application_size,
            });
        }
    }
    Ok(())
}

/// Fails if a write of `length` bytes starting at `address` runs past the end of the EEPROM.
/// The bound is exclusive-end: a write may run right up to the last EEPROM byte.
pub(crate) fn check_eeprom_bounds(address: u32, length: usize, eeprom_size: u32) -> Result<()> {
    let end = address.saturating_add(length as u32);
    if end > eeprom_size {
        return Err(Error::ImageExceedsEeprom {
            end,
            limit: eeprom_size,
        });
    }
    Ok(())
}

/// True if the page starting at `page` shares any byte with the segment: either range boundary
/// falling inside the other, or one range containing the other. An empty segment defines no
/// bytes and shares none, wherever its address lies.
fn overlaps(segment: &Segment, page: u32, page_size: u32) -> bool {
    !segment.data.is_empty() && segment.address < page + page_size && page < segment.end()
}

/// Start addresses of every application page the image touches, ascending. Pages the image
/// leaves alone are never reported; they may still hold parts of a previous program and must not
/// be erased gratuitously.
pub(crate) fn used_pages(segments: &[Segment], application_size: u32, page_size: u32) -> Vec<u32> {
    (0..application_size)
        .step_by(page_size as usize)
        .filter(|&page| segments.iter().any(|segment| overlaps(segment, page, page_size)))
        .collect()
}

/// Extracts exactly one page worth of bytes for the page starting at `page`, filling everything
/// the image does not define with the erased value.
pub(crate) fn extract_page(segments: &[Segment], page: u32, page_size: u32) -> Vec<u8> {
    let mut buffer = vec![FILL; page_size as usize];
    for segment in segments {
        if !overlaps(segment, page, page_size) {
            continue;
        }
        let start = segment.address.max(page);
        let end = segment.end().min(page + page_size);
        let count = (end - start) as usize;
        let into = (start - page) as usize;
        let from = (start - segment.address) as usize;
        buffer[into..into + count].copy_from_slice(&segment.data[from..from + count]);
    }
    buffer
}

/// Flattens EEPROM segments into report-sized `(address, chunk)` writes, preserving order.
/// EEPROM is byte-addressable, so segments are written exactly as given, without page mapping.
pub(crate) fn eeprom_chunks(segments: &[Segment]) -> Vec<(u32, Vec<u8>)> {
    let mut chunks = Vec::new();
    for segment in segments {
        for (i, chunk) in segment.data.chunks(MAX_PAYLOAD).enumerate() {
            chunks.push((segment.address + (i * MAX_PAYLOAD) as u32, chunk.to_vec()));
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(address: u32, data: &[u8]) -> Segment {
        Segment {
            address,
            data: data.to_vec(),
        }
    }

    #[test]
    fn a_small_segment_touches_exactly_one_page() {
        let image = [segment(10, &[0xaa; 10])];

        assert_eq!(used_pages(&image, 28672, 128), vec![0]);

        let page = extract_page(&image, 0, 128);
        assert_eq!(page.len(), 128);
        assert!(page[..10].iter().all(|&byte| byte == 0xff));
        assert!(page[10..20].iter().all(|&byte| byte == 0xaa));
        assert!(page[20..].iter().all(|&byte| byte == 0xff));
    }

    #[test]
    fn overlap_covers_all_four_cases() {
        let page_size = 128;
        // Straddles the start of page 1, straddles its end, contained in it, spanning it
        for seg in [
            segment(120, &[0; 16]),
            segment(250, &[0; 16]),
            segment(140, &[0; 4]),
            segment(0, &[0; 512]),
        ] {
            assert!(overlaps(&seg, 128, page_size), "{:?}", seg);
        }

        // Adjacent on either side, but not overlapping
        assert!(!overlaps(&segment(0, &[0; 128]), 128, page_size));
        assert!(!overlaps(&segment(256, &[0; 16]), 128, page_size));
        // Empty segments touch nothing
        assert!(!overlaps(&segment(130, &[]), 128, page_size));
    }

    #[test]
    fn empty_segments_mark_no_pages_used() {
        // A zero-length segment inside a page must not get that page erased and rewritten; it
        // may still hold a previous program.
        let image = [segment(130, &[])];
        assert_eq!(used_pages(&image, 28672, 128), Vec::<u32>::new());

        let mixed = [segment(130, &[]), segment(300, &[0xaa; 4])];
        assert_eq!(used_pages(&mixed, 28672, 128), vec![256]);
    }

    #[test]
    fn spanning_segments_report_every_touched_page() {
        let image = [segment(100, &[0x55; 100])];
        assert_eq!(used_pages(&image, 28672, 128), vec![0, 128]);

        let second = extract_page(&image, 128, 128);
        assert_eq!(&second[..72], &[0x55; 72][..]);
        assert!(second[72..].iter().all(|&byte| byte == 0xff));
    }

    #[test]
    fn flash_bound_is_exclusive() {
        let application_size = 28672;
        // Ends exactly at the boundary: the last defined byte is application_size - 1
        assert!(check_flash_bounds(&[segment(28600, &[0; 72])], application_size).is_ok());

        // Maximum defined address equals application_size: out of bounds
        match check_flash_bounds(&[segment(28672, &[0])], application_size) {
            Err(Error::ImageExceedsFlash { end: 28673, limit: 28672 }) => {}
            other => panic!("expected flash bound error, got {:?}", other),
        }
    }

    #[test]
    fn eeprom_bound_is_exclusive_end() {
        // A write may run up to and including the last EEPROM byte. (An earlier bootloader
        // revision rejected exactly-fitting writes; the current one accepts them.)
        assert!(check_eeprom_bounds(1014, 10, 1024).is_ok());

        match check_eeprom_bounds(1015, 10, 1024) {
            Err(Error::ImageExceedsEeprom { end: 1025, limit: 1024 }) => {}
            other => panic!("expected EEPROM bound error, got {:?}", other),
        }
    }

    #[test]
    fn bounds_checks_do_not_wrap_at_the_top_of_the_address_space() {
        // Addresses whose end would wrap around u32 are out of bounds, not back in
        match check_flash_bounds(&[segment(u32::MAX - 4, &[0; 10])], 28672) {
            Err(Error::ImageExceedsFlash { limit: 28672, .. }) => {}
            other => panic!("expected flash bound error, got {:?}", other),
        }

        match check_eeprom_bounds(u32::MAX - 4, 10, 1024) {
            Err(Error::ImageExceedsEeprom { limit: 1024, .. }) => {}
            other => panic!("expected EEPROM bound error, got {:?}", other),
        }
    }

    #[test]
    fn eeprom_chunking_preserves_length_and_order() {
        let data: Vec<u8> = (0..300).map(|i| i as u8).collect();
        let chunks = eeprom_chunks(&[segment(0, &data)]);

        let lengths: Vec<usize> = chunks.iter().map(|(_, chunk)| chunk.len()).collect();
        assert_eq!(lengths, vec![58, 58, 58, 58, 58, 10]);

        let mut reassembled = Vec::new();
        for (i, (address, chunk)) in chunks.iter().enumerate() {
            assert_eq!(*address, (i * 58) as u32);
            reassembled.extend_from_slice(chunk);
        }
        assert_eq!(reassembled, data);
    }
}
