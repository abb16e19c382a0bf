/// Borrowed block views over a disk image buffer

use crate::error::{D64Error, Result};
use crate::geometry::{BlockAddress, DiskGeometry, BLOCK_SIZE};

/// Usable payload bytes in a non-final block (256 minus the 2-byte link header)
pub const PAYLOAD_SIZE: usize = 254;

/// Read-only view of one 256-byte block
///
/// The first two bytes of every block form the link header: byte 0 is
/// the track of the next block in the chain, byte 1 its sector. A track
/// byte of 0 marks the final block, in which case byte 1 holds the
/// number of used payload bytes plus one.
///
/// Blocks compare equal when their addresses match, regardless of which
/// buffer they view or what the sector contains. This lets traversal
/// code use blocks and bare addresses interchangeably in visited sets.
#[derive(Debug, Clone, Copy)]
pub struct Block<'a> {
    addr: BlockAddress,
    geometry: DiskGeometry,
    bytes: &'a [u8],
}

impl<'a> Block<'a> {
    /// Create a view of the block at the given address
    ///
    /// Resolves the byte offset once; fails if the address is invalid
    /// for the geometry or the buffer is too short to contain it.
    pub fn at(buffer: &'a [u8], geometry: &DiskGeometry, addr: BlockAddress) -> Result<Self> {
        let offset = geometry.block_offset(addr)?;
        if buffer.len() < offset + BLOCK_SIZE {
            return Err(D64Error::InvalidImageSize { size: buffer.len() });
        }
        Ok(Self {
            addr,
            geometry: *geometry,
            bytes: &buffer[offset..offset + BLOCK_SIZE],
        })
    }

    /// Address of this block
    pub fn address(&self) -> BlockAddress {
        self.addr
    }

    /// True if this is the last block of its chain
    pub fn is_final(&self) -> bool {
        self.bytes[0] == 0
    }

    /// Address of the next block in the chain
    ///
    /// Returns `Ok(None)` on a final block. The link bytes come from
    /// the image and are untrusted; a link pointing outside the disk is
    /// a typed error, not a panic.
    pub fn next_address(&self) -> Result<Option<BlockAddress>> {
        if self.is_final() {
            return Ok(None);
        }
        BlockAddress::new(self.bytes[0], self.bytes[1], &self.geometry).map(Some)
    }

    /// Number of used payload bytes in a final block
    ///
    /// Only meaningful on the last block of a chain; on any other block
    /// this is a [`D64Error::NotFinal`] error. A stored size byte of 0
    /// (below the legal minimum of 1) reads as zero used bytes.
    pub fn data_size(&self) -> Result<u8> {
        if !self.is_final() {
            return Err(D64Error::NotFinal {
                track: self.addr.track(),
                sector: self.addr.sector(),
            });
        }
        Ok(self.bytes[1].saturating_sub(1))
    }

    /// Borrow a byte range within the sector
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the 256-byte sector. An
    /// out-of-range read is a logic bug in the caller, not bad data.
    pub fn read(&self, range: std::ops::Range<usize>) -> &'a [u8] {
        assert!(
            range.end <= BLOCK_SIZE,
            "read range {}..{} exceeds block size",
            range.start,
            range.end
        );
        &self.bytes[range]
    }

    /// The payload region (bytes 2..256)
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[2..]
    }
}

impl PartialEq for Block<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Block<'_> {}

impl std::hash::Hash for Block<'_> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

/// Mutable view of one 256-byte block
#[derive(Debug)]
pub struct BlockMut<'a> {
    addr: BlockAddress,
    bytes: &'a mut [u8],
}

impl<'a> BlockMut<'a> {
    /// Create a mutable view of the block at the given address
    pub fn at(buffer: &'a mut [u8], geometry: &DiskGeometry, addr: BlockAddress) -> Result<Self> {
        let offset = geometry.block_offset(addr)?;
        if buffer.len() < offset + BLOCK_SIZE {
            return Err(D64Error::InvalidImageSize { size: buffer.len() });
        }
        Ok(Self {
            addr,
            bytes: &mut buffer[offset..offset + BLOCK_SIZE],
        })
    }

    /// Address of this block
    pub fn address(&self) -> BlockAddress {
        self.addr
    }

    /// Mark this block as the final block of its chain
    ///
    /// Writes a zero track byte and the used-byte count plus one.
    ///
    /// # Panics
    ///
    /// Panics if `data_size` exceeds the 254-byte payload capacity.
    pub fn set_final(&mut self, data_size: u8) {
        assert!(
            data_size as usize <= PAYLOAD_SIZE,
            "data size {} exceeds payload capacity",
            data_size
        );
        self.bytes[0] = 0;
        self.bytes[1] = data_size + 1;
    }

    /// Point the link header at the next block of the chain
    ///
    /// The track and sector bytes are written verbatim, unlike the
    /// offset-by-one encoding of [`BlockMut::set_final`].
    pub fn set_next(&mut self, addr: BlockAddress) {
        self.bytes[0] = addr.track();
        self.bytes[1] = addr.sector();
    }

    /// Write bytes at an offset within the sector
    ///
    /// # Panics
    ///
    /// Panics if the write would extend past the 256-byte sector.
    pub fn write(&mut self, offset: usize, data: &[u8]) {
        assert!(
            offset + data.len() <= BLOCK_SIZE,
            "write of {} bytes at offset {} exceeds block size",
            data.len(),
            offset
        );
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    /// The mutable payload region (bytes 2..256)
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[2..]
    }

    /// Fill the whole sector with one byte value
    pub fn fill(&mut self, byte: u8) {
        self.bytes.fill(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Vec<u8> {
        vec![0u8; DiskGeometry::d64().image_size()]
    }

    fn addr(track: u8, sector: u8) -> BlockAddress {
        BlockAddress::new(track, sector, &DiskGeometry::d64()).unwrap()
    }

    #[test]
    fn test_final_detection() {
        let geometry = DiskGeometry::d64();
        let mut buffer = image();
        let block = Block::at(&buffer, &geometry, addr(1, 0)).unwrap();
        assert!(block.is_final());

        buffer[0] = 0x12;
        let block = Block::at(&buffer, &geometry, addr(1, 0)).unwrap();
        assert!(!block.is_final());
    }

    #[test]
    fn test_next_address() {
        let geometry = DiskGeometry::d64();
        let mut buffer = image();
        buffer[0] = 0x1A;
        buffer[1] = 0x17;
        let block = Block::at(&buffer, &geometry, addr(1, 0)).unwrap();
        assert_eq!(block.next_address().unwrap(), Some(addr(26, 23)));
    }

    #[test]
    fn test_next_address_final() {
        let geometry = DiskGeometry::d64();
        let buffer = image();
        let block = Block::at(&buffer, &geometry, addr(1, 0)).unwrap();
        assert_eq!(block.next_address().unwrap(), None);
    }

    #[test]
    fn test_next_address_bad_link() {
        let geometry = DiskGeometry::d64();
        let mut buffer = image();
        buffer[0] = 99;
        let block = Block::at(&buffer, &geometry, addr(1, 0)).unwrap();
        assert!(matches!(
            block.next_address(),
            Err(D64Error::InvalidTrack { track: 99, .. })
        ));
    }

    #[test]
    fn test_data_size() {
        let geometry = DiskGeometry::d64();
        let mut buffer = image();
        buffer[1] = 0xFF;
        let block = Block::at(&buffer, &geometry, addr(1, 0)).unwrap();
        assert_eq!(block.data_size().unwrap(), 254);
    }

    #[test]
    fn test_data_size_not_final() {
        let geometry = DiskGeometry::d64();
        let mut buffer = image();
        buffer[0] = 0x12;
        let block = Block::at(&buffer, &geometry, addr(1, 0)).unwrap();
        assert!(matches!(
            block.data_size(),
            Err(D64Error::NotFinal {
                track: 1,
                sector: 0
            })
        ));
    }

    #[test]
    fn test_set_final() {
        let geometry = DiskGeometry::d64();
        let mut buffer = image();
        let mut block = BlockMut::at(&mut buffer, &geometry, addr(1, 0)).unwrap();
        block.set_final(42);
        assert_eq!(&buffer[0..2], &[0, 43]);
    }

    #[test]
    fn test_set_next_is_verbatim() {
        let geometry = DiskGeometry::d64();
        let mut buffer = image();
        let mut block = BlockMut::at(&mut buffer, &geometry, addr(1, 0)).unwrap();
        block.set_next(addr(9, 14));
        assert_eq!(&buffer[0..2], &[9, 14]);
    }

    #[test]
    fn test_read_range() {
        let geometry = DiskGeometry::d64();
        let mut buffer = image();
        buffer[..7].copy_from_slice(&[0x00, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15]);
        let block = Block::at(&buffer, &geometry, addr(1, 0)).unwrap();
        assert_eq!(block.read(2..6), &[0x11, 0x12, 0x13, 0x14]);
    }

    #[test]
    #[should_panic(expected = "exceeds block size")]
    fn test_read_out_of_range_panics() {
        let geometry = DiskGeometry::d64();
        let buffer = image();
        let block = Block::at(&buffer, &geometry, addr(1, 0)).unwrap();
        let _ = block.read(250..260);
    }

    #[test]
    fn test_write() {
        let geometry = DiskGeometry::d64();
        let mut buffer = image();
        let mut block = BlockMut::at(&mut buffer, &geometry, addr(2, 3)).unwrap();
        block.write(10, &[0xAA, 0xBB]);
        let offset = geometry.block_offset(addr(2, 3)).unwrap();
        assert_eq!(&buffer[offset + 10..offset + 12], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_equality_by_address() {
        let geometry = DiskGeometry::d64();
        let a = image();
        let mut b = image();
        b[0] = 0xFF; // different contents, same address

        let view_a = Block::at(&a, &geometry, addr(1, 0)).unwrap();
        let view_b = Block::at(&b, &geometry, addr(1, 0)).unwrap();
        let other = Block::at(&a, &geometry, addr(1, 1)).unwrap();

        assert_eq!(view_a, view_b);
        assert_ne!(view_a, other);
    }

    #[test]
    fn test_truncated_buffer() {
        let geometry = DiskGeometry::d64();
        let buffer = vec![0u8; 512];
        assert!(matches!(
            Block::at(&buffer, &geometry, addr(18, 0)),
            Err(D64Error::InvalidImageSize { size: 512 })
        ));
    }
}
