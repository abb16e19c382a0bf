/// Block Availability Map: the per-track free/used bitmap at (18,0)

use log::debug;

use crate::error::{D64Error, Result};
use crate::geometry::{BlockAddress, DiskGeometry, BLOCK_SIZE, DIRECTORY_TRACK};
use crate::petscii;

/// Sector on the directory track holding the BAM
pub const BAM_SECTOR: u8 = 0;

/// Highest track with a BAM entry
///
/// The 1541 BAM sector carries one 4-byte record per track for tracks
/// 1-35 only. Extended 40/42-track images park their extra bitmaps in
/// vendor-specific spots this library does not interpret, so allocation
/// is confined to the first 35 tracks.
pub const MAX_BAM_TRACKS: u8 = 35;

/// Default sector interleave for file data
pub const DATA_INTERLEAVE: u8 = 10;

/// Sector interleave for directory blocks
pub const DIRECTORY_INTERLEAVE: u8 = 3;

const DOS_VERSION_OFFSET: usize = 0x02;
const ENTRIES_OFFSET: usize = 0x04;
const NAME_OFFSET: usize = 0x90;
const ID_OFFSET: usize = 0xA2;
const DOS_TYPE_OFFSET: usize = 0xA5;

fn entry_offset(track: u8) -> Result<usize> {
    if track == 0 || track > MAX_BAM_TRACKS {
        return Err(D64Error::InvalidTrack {
            track,
            max: MAX_BAM_TRACKS,
        });
    }
    Ok(ENTRIES_OFFSET + 4 * (track as usize - 1))
}

fn bam_slice_bounds(geometry: &DiskGeometry) -> Result<(usize, usize)> {
    let addr = BlockAddress::new(DIRECTORY_TRACK, BAM_SECTOR, geometry)?;
    let offset = geometry.block_offset(addr)?;
    Ok((offset, offset + BLOCK_SIZE))
}

/// Read-only view of the BAM sector
#[derive(Debug, Clone, Copy)]
pub struct Bam<'a> {
    bytes: &'a [u8],
}

impl<'a> Bam<'a> {
    /// Borrow the BAM sector from an image buffer
    pub fn read(buffer: &'a [u8], geometry: &DiskGeometry) -> Result<Self> {
        let (start, end) = bam_slice_bounds(geometry)?;
        if buffer.len() < end {
            return Err(D64Error::InvalidImageSize { size: buffer.len() });
        }
        Ok(Self {
            bytes: &buffer[start..end],
        })
    }

    /// True if the block at this address is free
    ///
    /// Tracks without a BAM entry (beyond 35) always report used.
    pub fn is_free(&self, addr: BlockAddress) -> bool {
        match entry_offset(addr.track()) {
            Ok(offset) => {
                let bit = addr.sector() as usize;
                self.bytes[offset + 1 + bit / 8] & (1 << (bit % 8)) != 0
            }
            Err(_) => false,
        }
    }

    /// Free-block count recorded for a track
    pub fn free_count(&self, track: u8) -> Result<u8> {
        Ok(self.bytes[entry_offset(track)?])
    }

    /// Total free blocks, excluding the directory track (CBM convention)
    pub fn blocks_free(&self) -> usize {
        (1..=MAX_BAM_TRACKS as usize)
            .filter(|&track| track != DIRECTORY_TRACK as usize)
            .map(|track| self.bytes[ENTRIES_OFFSET + 4 * (track - 1)] as usize)
            .sum()
    }

    /// The raw 16-byte PETSCII disk name field
    pub fn disk_name_raw(&self) -> &'a [u8] {
        &self.bytes[NAME_OFFSET..NAME_OFFSET + petscii::NAME_SIZE]
    }

    /// The disk name, decoded for display
    pub fn disk_name(&self) -> String {
        petscii::name_to_string(self.disk_name_raw())
    }

    /// The two-byte disk id
    pub fn disk_id(&self) -> [u8; 2] {
        [self.bytes[ID_OFFSET], self.bytes[ID_OFFSET + 1]]
    }

    /// DOS version byte (0x41 on 1541-formatted disks)
    pub fn dos_version(&self) -> u8 {
        self.bytes[DOS_VERSION_OFFSET]
    }
}

/// Mutable view of the BAM sector
///
/// Every mutation rewrites the affected track's free count from the
/// bitmap popcount before returning, so `free_count(track)` always
/// equals the number of set bits.
#[derive(Debug)]
pub struct BamMut<'a> {
    bytes: &'a mut [u8],
    geometry: DiskGeometry,
}

impl<'a> BamMut<'a> {
    /// Borrow the BAM sector mutably from an image buffer
    pub fn at(buffer: &'a mut [u8], geometry: &DiskGeometry) -> Result<Self> {
        let (start, end) = bam_slice_bounds(geometry)?;
        if buffer.len() < end {
            return Err(D64Error::InvalidImageSize { size: buffer.len() });
        }
        Ok(Self {
            bytes: &mut buffer[start..end],
            geometry: *geometry,
        })
    }

    /// True if the block at this address is free
    pub fn is_free(&self, addr: BlockAddress) -> bool {
        match entry_offset(addr.track()) {
            Ok(offset) => {
                let bit = addr.sector() as usize;
                self.bytes[offset + 1 + bit / 8] & (1 << (bit % 8)) != 0
            }
            Err(_) => false,
        }
    }

    /// Free-block count recorded for a track
    pub fn free_count(&self, track: u8) -> Result<u8> {
        Ok(self.bytes[entry_offset(track)?])
    }

    /// Mark a block as allocated
    pub fn mark_used(&mut self, addr: BlockAddress) -> Result<()> {
        let offset = entry_offset(addr.track())?;
        let bit = addr.sector() as usize;
        self.bytes[offset + 1 + bit / 8] &= !(1 << (bit % 8));
        self.recount(offset);
        Ok(())
    }

    /// Return a block to the free pool
    pub fn mark_free(&mut self, addr: BlockAddress) -> Result<()> {
        let offset = entry_offset(addr.track())?;
        let bit = addr.sector() as usize;
        self.bytes[offset + 1 + bit / 8] |= 1 << (bit % 8);
        self.recount(offset);
        Ok(())
    }

    fn recount(&mut self, offset: usize) {
        self.bytes[offset] = self.bytes[offset + 1].count_ones() as u8
            + self.bytes[offset + 2].count_ones() as u8
            + self.bytes[offset + 3].count_ones() as u8;
    }

    /// First free sector on a track, scanning forward from `start`
    fn scan_track(&self, track: u8, start: u8) -> Result<Option<u8>> {
        let sectors = self.geometry.sectors_for_track(track)?;
        let offset = entry_offset(track)?;
        for step in 0..sectors {
            let sector = (start + step) % sectors;
            let bit = sector as usize;
            if self.bytes[offset + 1 + bit / 8] & (1 << (bit % 8)) != 0 {
                return Ok(Some(sector));
            }
        }
        Ok(None)
    }

    /// Tracks to try after the preferred one, walking outward from the
    /// directory track and alternating below/above: 17, 19, 16, 20, ...
    fn outward_tracks(&self) -> impl Iterator<Item = u8> {
        let max = MAX_BAM_TRACKS.min(self.geometry.num_tracks());
        (1..=MAX_BAM_TRACKS as i16)
            .flat_map(|delta| {
                [
                    DIRECTORY_TRACK as i16 - delta,
                    DIRECTORY_TRACK as i16 + delta,
                ]
            })
            .filter(move |&track| track >= 1 && track <= max as i16)
            .map(|track| track as u8)
    }

    /// Allocate the block for the start of a new file
    ///
    /// Searches outward from the directory track (17, 19, 16, 20, ...),
    /// taking the first free sector scanning from 0.
    pub fn allocate_first(&mut self) -> Result<BlockAddress> {
        for track in self.outward_tracks() {
            if let Some(sector) = self.scan_track(track, 0)? {
                let addr = BlockAddress::new(track, sector, &self.geometry)?;
                self.mark_used(addr)?;
                debug!("allocated first block {}", addr);
                return Ok(addr);
            }
        }
        Err(D64Error::DiskFull)
    }

    /// Allocate the next block of a chain, honouring the interleave
    ///
    /// Starts on `near`'s track at `near.sector + interleave` (modulo
    /// the track's sector count) and steps forward by one until a free
    /// sector turns up. A full track moves the search outward from the
    /// directory track, which itself is never used for file data.
    pub fn allocate_next(&mut self, near: BlockAddress, interleave: u8) -> Result<BlockAddress> {
        if near.track() != DIRECTORY_TRACK && near.track() <= MAX_BAM_TRACKS {
            let sectors = self.geometry.sectors_for_track(near.track())?;
            let start = (near.sector() + interleave) % sectors;
            if let Some(sector) = self.scan_track(near.track(), start)? {
                let addr = BlockAddress::new(near.track(), sector, &self.geometry)?;
                self.mark_used(addr)?;
                debug!("allocated {} (interleave {} from {})", addr, interleave, near);
                return Ok(addr);
            }
        }
        for track in self.outward_tracks().filter(|&t| t != near.track()) {
            if track == DIRECTORY_TRACK {
                continue;
            }
            if let Some(sector) = self.scan_track(track, 0)? {
                let addr = BlockAddress::new(track, sector, &self.geometry)?;
                self.mark_used(addr)?;
                debug!("allocated {} (moved off full track {})", addr, near.track());
                return Ok(addr);
            }
        }
        Err(D64Error::DiskFull)
    }

    /// Allocate a block for a new directory sector
    ///
    /// The directory lives on track 18 only; its historical interleave
    /// is 3. The BAM sector itself is permanently allocated, so the
    /// scan can never land on it.
    pub fn allocate_directory_block(&mut self, near_sector: u8) -> Result<BlockAddress> {
        let sectors = self.geometry.sectors_for_track(DIRECTORY_TRACK)?;
        let start = (near_sector + DIRECTORY_INTERLEAVE) % sectors;
        match self.scan_track(DIRECTORY_TRACK, start)? {
            Some(sector) => {
                let addr = BlockAddress::new(DIRECTORY_TRACK, sector, &self.geometry)?;
                self.mark_used(addr)?;
                debug!("allocated directory block {}", addr);
                Ok(addr)
            }
            None => Err(D64Error::DiskFull),
        }
    }

    /// Write a fresh BAM for a newly formatted disk
    ///
    /// All blocks are free except the BAM sector itself and the first
    /// directory sector at (18,1).
    pub fn initialize(&mut self, name: &[u8; petscii::NAME_SIZE], id: [u8; 2]) -> Result<()> {
        self.bytes.fill(0);
        self.bytes[0] = DIRECTORY_TRACK;
        self.bytes[1] = 1;
        self.bytes[DOS_VERSION_OFFSET] = 0x41;

        let max = MAX_BAM_TRACKS.min(self.geometry.num_tracks());
        for track in 1..=max {
            let sectors = self.geometry.sectors_for_track(track)?;
            let offset = entry_offset(track)?;
            self.bytes[offset] = sectors;
            for sector in 0..sectors as usize {
                self.bytes[offset + 1 + sector / 8] |= 1 << (sector % 8);
            }
        }

        self.mark_used(BlockAddress::new(DIRECTORY_TRACK, BAM_SECTOR, &self.geometry)?)?;
        self.mark_used(BlockAddress::new(DIRECTORY_TRACK, 1, &self.geometry)?)?;

        self.bytes[NAME_OFFSET..NAME_OFFSET + petscii::NAME_SIZE].copy_from_slice(name);
        self.bytes[0xA0] = petscii::PAD;
        self.bytes[0xA1] = petscii::PAD;
        self.bytes[ID_OFFSET] = id[0];
        self.bytes[ID_OFFSET + 1] = id[1];
        self.bytes[0xA4] = petscii::PAD;
        self.bytes[DOS_TYPE_OFFSET] = b'2';
        self.bytes[DOS_TYPE_OFFSET + 1] = b'A';
        for offset in 0xA7..0xAB {
            self.bytes[offset] = petscii::PAD;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> DiskGeometry {
        DiskGeometry::d64()
    }

    fn addr(track: u8, sector: u8) -> BlockAddress {
        BlockAddress::new(track, sector, &geometry()).unwrap()
    }

    fn formatted() -> Vec<u8> {
        let mut buffer = vec![0u8; geometry().image_size()];
        let mut bam = BamMut::at(&mut buffer, &geometry()).unwrap();
        bam.initialize(&petscii::encode_name("TEST DISK").unwrap(), *b"TD")
            .unwrap();
        buffer
    }

    #[test]
    fn test_fresh_bam_counts() {
        let buffer = formatted();
        let bam = Bam::read(&buffer, &geometry()).unwrap();
        assert_eq!(bam.blocks_free(), 664);
        assert_eq!(bam.free_count(1).unwrap(), 21);
        assert_eq!(bam.free_count(18).unwrap(), 17); // two reserved
        assert_eq!(bam.free_count(35).unwrap(), 17);
        assert!(!bam.is_free(addr(18, 0)));
        assert!(!bam.is_free(addr(18, 1)));
        assert!(bam.is_free(addr(18, 2)));
    }

    #[test]
    fn test_header_fields() {
        let buffer = formatted();
        let bam = Bam::read(&buffer, &geometry()).unwrap();
        assert_eq!(bam.disk_name(), "TEST DISK");
        assert_eq!(bam.disk_id(), *b"TD");
        assert_eq!(bam.dos_version(), 0x41);
    }

    #[test]
    fn test_mark_used_and_free_keep_counts() {
        let mut buffer = formatted();
        let mut bam = BamMut::at(&mut buffer, &geometry()).unwrap();

        bam.mark_used(addr(1, 5)).unwrap();
        assert!(!bam.is_free(addr(1, 5)));
        assert_eq!(bam.free_count(1).unwrap(), 20);

        // Idempotent
        bam.mark_used(addr(1, 5)).unwrap();
        assert_eq!(bam.free_count(1).unwrap(), 20);

        bam.mark_free(addr(1, 5)).unwrap();
        assert!(bam.is_free(addr(1, 5)));
        assert_eq!(bam.free_count(1).unwrap(), 21);
    }

    #[test]
    fn test_count_matches_popcount_for_every_track() {
        let mut buffer = formatted();
        let mut bam = BamMut::at(&mut buffer, &geometry()).unwrap();
        bam.mark_used(addr(1, 0)).unwrap();
        bam.mark_used(addr(24, 18)).unwrap();
        bam.mark_free(addr(18, 1)).unwrap();
        drop(bam);

        let bam_offset = geometry().block_offset(addr(18, 0)).unwrap();
        for track in 1..=35u8 {
            let entry = bam_offset + 4 + 4 * (track as usize - 1);
            let popcount: u32 = buffer[entry + 1..entry + 4]
                .iter()
                .map(|b| b.count_ones())
                .sum();
            assert_eq!(buffer[entry] as u32, popcount, "track {}", track);
        }
    }

    #[test]
    fn test_interleave_allocation() {
        let mut buffer = formatted();
        let mut bam = BamMut::at(&mut buffer, &geometry()).unwrap();
        let next = bam.allocate_next(addr(1, 0), DATA_INTERLEAVE).unwrap();
        assert_eq!(next, addr(1, 10));
        let next = bam.allocate_next(next, DATA_INTERLEAVE).unwrap();
        assert_eq!(next, addr(1, 20));
        // 20 + 10 wraps to sector 9 on a 21-sector track
        let next = bam.allocate_next(next, DATA_INTERLEAVE).unwrap();
        assert_eq!(next, addr(1, 9));
    }

    #[test]
    fn test_allocation_steps_past_used_sectors() {
        let mut buffer = formatted();
        let mut bam = BamMut::at(&mut buffer, &geometry()).unwrap();
        bam.mark_used(addr(1, 10)).unwrap();
        bam.mark_used(addr(1, 11)).unwrap();
        let next = bam.allocate_next(addr(1, 0), DATA_INTERLEAVE).unwrap();
        assert_eq!(next, addr(1, 12));
    }

    #[test]
    fn test_full_track_moves_outward() {
        let mut buffer = formatted();
        let mut bam = BamMut::at(&mut buffer, &geometry()).unwrap();
        for sector in 0..21 {
            bam.mark_used(addr(17, sector)).unwrap();
        }
        let next = bam.allocate_next(addr(17, 0), DATA_INTERLEAVE).unwrap();
        // 17 is full; the outward walk tries 17 again, then 19
        assert_eq!(next.track(), 19);
    }

    #[test]
    fn test_allocate_first_prefers_track_17() {
        let mut buffer = formatted();
        let mut bam = BamMut::at(&mut buffer, &geometry()).unwrap();
        assert_eq!(bam.allocate_first().unwrap(), addr(17, 0));
        assert_eq!(bam.allocate_first().unwrap(), addr(17, 1));
    }

    #[test]
    fn test_allocate_first_never_uses_directory_track() {
        let mut buffer = formatted();
        let mut bam = BamMut::at(&mut buffer, &geometry()).unwrap();
        for track in (1..=35).filter(|&t| t != DIRECTORY_TRACK) {
            for sector in 0..geometry().sectors_for_track(track).unwrap() {
                bam.mark_used(addr(track, sector)).unwrap();
            }
        }
        // Only track 18 has free sectors left
        assert!(matches!(bam.allocate_first(), Err(D64Error::DiskFull)));
        assert!(matches!(
            bam.allocate_next(addr(1, 0), DATA_INTERLEAVE),
            Err(D64Error::DiskFull)
        ));
    }

    #[test]
    fn test_directory_block_allocation() {
        let mut buffer = formatted();
        let mut bam = BamMut::at(&mut buffer, &geometry()).unwrap();
        let block = bam.allocate_directory_block(1).unwrap();
        assert_eq!(block, addr(18, 4));
        for sector in 2..19 {
            let _ = bam.mark_used(addr(18, sector));
        }
        assert!(matches!(
            bam.allocate_directory_block(4),
            Err(D64Error::DiskFull)
        ));
    }
}
