//! An in-memory `BlockDevice`, indexed by sector, standing in for a
//! real backing block device in tests.

use std::collections::HashMap;

use blockveil_core::{Bio, Direction, SECTOR_SIZE};
use blockveil_membrane::device::DeviceCompletion;
use blockveil_membrane::BlockDevice;
use parking_lot::Mutex;

/// Stores one `SECTOR_SIZE` buffer per sector number. Sectors never
/// written to read back as zeroes, matching an unformatted device.
pub struct MemoryDevice {
    sectors: Mutex<HashMap<u64, Vec<u8>>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self { sectors: Mutex::new(HashMap::new()) }
    }

    /// Reads back the raw (ciphertext, on a real target) bytes stored at
    /// `sector`, for tests that want to assert the backing device never
    /// sees plaintext.
    pub fn raw_sector(&self, sector: u64) -> Option<Vec<u8>> {
        self.sectors.lock().get(&sector).cloned()
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for MemoryDevice {
    fn submit(&self, bio: Bio, on_complete: DeviceCompletion) {
        let mut store = self.sectors.lock();
        let mut offset = 0usize;
        for seg in &bio.segments {
            let sector_count = seg.len / SECTOR_SIZE;
            for s in 0..sector_count {
                let sector = bio.sector + (offset / SECTOR_SIZE) as u64 + s as u64;
                match bio.direction {
                    Direction::Encrypt => {
                        let mut buf = vec![0u8; SECTOR_SIZE];
                        seg.read_into(s * SECTOR_SIZE, &mut buf);
                        store.insert(sector, buf);
                    }
                    Direction::Decrypt => {
                        let data = store.get(&sector).cloned().unwrap_or_else(|| vec![0u8; SECTOR_SIZE]);
                        seg.write_from(s * SECTOR_SIZE, &data);
                    }
                }
            }
            offset += seg.len;
        }
        on_complete(Ok(()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockveil_core::bio::{new_page, Segment};

    #[test]
    fn test_unwritten_sector_reads_back_as_zero() {
        let device = MemoryDevice::new();
        let page = new_page(SECTOR_SIZE);
        let bio = Bio::new(vec![Segment::new(page.clone(), 0, SECTOR_SIZE)], 5, Direction::Decrypt);
        device.submit(bio, Box::new(|res| res.unwrap()));
        assert_eq!(*page.lock(), vec![0u8; SECTOR_SIZE]);
    }

    #[test]
    fn test_write_then_raw_sector_round_trips() {
        let device = MemoryDevice::new();
        let page = new_page(SECTOR_SIZE);
        page.lock().fill(0x7a);
        let bio = Bio::new(vec![Segment::new(page, 0, SECTOR_SIZE)], 3, Direction::Encrypt);
        device.submit(bio, Box::new(|res| res.unwrap()));
        assert_eq!(device.raw_sector(3), Some(vec![0x7au8; SECTOR_SIZE]));
    }
}
