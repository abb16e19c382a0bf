/// Disk geometry tables and address arithmetic

use crate::error::{D64Error, Result};

/// Size of one disk block in bytes
pub const BLOCK_SIZE: usize = 256;

/// Track holding the BAM and the directory
pub const DIRECTORY_TRACK: u8 = 18;

/// Byte size of a standard 35-track D64 image
pub const D64_SIZE: usize = 174_848;

/// Byte size of a 40-track D64 image
pub const D64_40_TRACK_SIZE: usize = 196_608;

/// Byte size of a 42-track D64 image
pub const D64_42_TRACK_SIZE: usize = 205_312;

/// Geometry of a 1541-style disk image
///
/// The 1541 records fewer sectors per track towards the disk centre
/// (zone bit recording): tracks 1-17 hold 21 sectors, 18-24 hold 19,
/// 25-30 hold 18 and everything outward holds 17. The zone table is
/// identical for the 35, 40 and 42 track variants, so a geometry is
/// fully described by its track count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    num_tracks: u8,
}

impl DiskGeometry {
    /// Standard 35-track single-sided layout (174,848 bytes)
    pub fn d64() -> Self {
        Self { num_tracks: 35 }
    }

    /// Extended 40-track layout (196,608 bytes)
    pub fn d64_40_track() -> Self {
        Self { num_tracks: 40 }
    }

    /// Extended 42-track layout (205,312 bytes)
    pub fn d64_42_track() -> Self {
        Self { num_tracks: 42 }
    }

    /// Select a geometry variant from the total image size
    ///
    /// Sizes with an appended error table are rejected; this library
    /// operates on the sector bytes only.
    pub fn from_image_size(size: usize) -> Result<Self> {
        match size {
            D64_SIZE => Ok(Self::d64()),
            D64_40_TRACK_SIZE => Ok(Self::d64_40_track()),
            D64_42_TRACK_SIZE => Ok(Self::d64_42_track()),
            _ => Err(D64Error::InvalidImageSize { size }),
        }
    }

    /// Highest valid track number
    pub fn num_tracks(&self) -> u8 {
        self.num_tracks
    }

    /// Number of sectors recorded on the given track
    ///
    /// Tracks are numbered from 1; track 0 and tracks beyond the last
    /// are invalid.
    pub fn sectors_for_track(&self, track: u8) -> Result<u8> {
        if track == 0 || track > self.num_tracks {
            return Err(D64Error::InvalidTrack {
                track,
                max: self.num_tracks,
            });
        }
        Ok(match track {
            1..=17 => 21,
            18..=24 => 19,
            25..=30 => 18,
            _ => 17,
        })
    }

    /// Byte offset of a block within the image buffer
    pub fn block_offset(&self, addr: BlockAddress) -> Result<usize> {
        let sectors = self.sectors_for_track(addr.track)?;
        if addr.sector >= sectors {
            return Err(D64Error::InvalidAddress {
                track: addr.track,
                sector: addr.sector,
                max: sectors - 1,
            });
        }
        let mut blocks = 0usize;
        for track in 1..addr.track {
            blocks += self.sectors_for_track(track)? as usize;
        }
        Ok(BLOCK_SIZE * (blocks + addr.sector as usize))
    }

    /// Total number of blocks on the disk
    pub fn total_blocks(&self) -> usize {
        (1..=self.num_tracks)
            .map(|track| match track {
                1..=17 => 21,
                18..=24 => 19,
                25..=30 => 18,
                _ => 17,
            })
            .sum()
    }

    /// Total image size in bytes
    pub fn image_size(&self) -> usize {
        self.total_blocks() * BLOCK_SIZE
    }
}

/// A validated (track, sector) block address
///
/// Addresses can only be built through [`BlockAddress::new`], which
/// checks both coordinates against a geometry, so holding one is proof
/// that it names a real block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockAddress {
    track: u8,
    sector: u8,
}

impl BlockAddress {
    /// Create an address, validating it against the geometry
    pub fn new(track: u8, sector: u8, geometry: &DiskGeometry) -> Result<Self> {
        let sectors = geometry.sectors_for_track(track)?;
        if sector >= sectors {
            return Err(D64Error::InvalidAddress {
                track,
                sector,
                max: sectors - 1,
            });
        }
        Ok(Self { track, sector })
    }

    /// Track number (1-based)
    pub fn track(&self) -> u8 {
        self.track
    }

    /// Sector number within the track (0-based)
    pub fn sector(&self) -> u8 {
        self.sector
    }
}

impl std::fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.track, self.sector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_table() {
        let geometry = DiskGeometry::d64();
        assert_eq!(geometry.sectors_for_track(1).unwrap(), 21);
        assert_eq!(geometry.sectors_for_track(17).unwrap(), 21);
        assert_eq!(geometry.sectors_for_track(18).unwrap(), 19);
        assert_eq!(geometry.sectors_for_track(24).unwrap(), 19);
        assert_eq!(geometry.sectors_for_track(25).unwrap(), 18);
        assert_eq!(geometry.sectors_for_track(30).unwrap(), 18);
        assert_eq!(geometry.sectors_for_track(31).unwrap(), 17);
        assert_eq!(geometry.sectors_for_track(35).unwrap(), 17);
    }

    #[test]
    fn test_invalid_tracks() {
        let geometry = DiskGeometry::d64();
        assert!(matches!(
            geometry.sectors_for_track(0),
            Err(D64Error::InvalidTrack { track: 0, max: 35 })
        ));
        assert!(matches!(
            geometry.sectors_for_track(36),
            Err(D64Error::InvalidTrack { track: 36, max: 35 })
        ));
        assert_eq!(DiskGeometry::d64_40_track().sectors_for_track(40).unwrap(), 17);
    }

    #[test]
    fn test_total_blocks() {
        assert_eq!(DiskGeometry::d64().total_blocks(), 683);
        assert_eq!(DiskGeometry::d64().image_size(), D64_SIZE);
        assert_eq!(DiskGeometry::d64_40_track().image_size(), D64_40_TRACK_SIZE);
        assert_eq!(DiskGeometry::d64_42_track().image_size(), D64_42_TRACK_SIZE);
    }

    #[test]
    fn test_from_image_size() {
        assert_eq!(
            DiskGeometry::from_image_size(D64_SIZE).unwrap(),
            DiskGeometry::d64()
        );
        assert_eq!(
            DiskGeometry::from_image_size(D64_40_TRACK_SIZE).unwrap(),
            DiskGeometry::d64_40_track()
        );
        // Size with an appended 683-byte error table is rejected
        assert!(matches!(
            DiskGeometry::from_image_size(D64_SIZE + 683),
            Err(D64Error::InvalidImageSize { size }) if size == D64_SIZE + 683
        ));
    }

    #[test]
    fn test_block_offset() {
        let geometry = DiskGeometry::d64();
        let first = BlockAddress::new(1, 0, &geometry).unwrap();
        assert_eq!(geometry.block_offset(first).unwrap(), 0);

        let second = BlockAddress::new(1, 1, &geometry).unwrap();
        assert_eq!(geometry.block_offset(second).unwrap(), 256);

        // Track 18 starts after 17 tracks of 21 sectors
        let bam = BlockAddress::new(18, 0, &geometry).unwrap();
        assert_eq!(geometry.block_offset(bam).unwrap(), 17 * 21 * 256);

        // Last block of the disk
        let last = BlockAddress::new(35, 16, &geometry).unwrap();
        assert_eq!(geometry.block_offset(last).unwrap(), D64_SIZE - 256);
    }

    #[test]
    fn test_offsets_are_distinct() {
        let geometry = DiskGeometry::d64();
        let mut offsets = std::collections::HashSet::new();
        for track in 1..=35 {
            for sector in 0..geometry.sectors_for_track(track).unwrap() {
                let addr = BlockAddress::new(track, sector, &geometry).unwrap();
                assert!(offsets.insert(geometry.block_offset(addr).unwrap()));
            }
        }
        assert_eq!(offsets.len(), 683);
    }

    #[test]
    fn test_invalid_address() {
        let geometry = DiskGeometry::d64();
        assert!(matches!(
            BlockAddress::new(1, 21, &geometry),
            Err(D64Error::InvalidAddress {
                track: 1,
                sector: 21,
                max: 20
            })
        ));
        assert!(BlockAddress::new(1, 20, &geometry).is_ok());
        assert!(BlockAddress::new(31, 17, &geometry).is_err());
    }

    #[test]
    fn test_address_display() {
        let geometry = DiskGeometry::d64();
        let addr = BlockAddress::new(18, 1, &geometry).unwrap();
        assert_eq!(addr.to_string(), "(18,1)");
    }
}
