/// Directory chain parsing and entry layout

use crate::chain::{BlockChain, ChainIter};
use crate::error::Result;
use crate::geometry::{BlockAddress, DiskGeometry, DIRECTORY_TRACK};
use crate::petscii;

/// Sector on the directory track holding the first directory block
pub const DIRECTORY_SECTOR: u8 = 1;

/// Directory entry slots per block
pub const ENTRIES_PER_BLOCK: usize = 8;

/// Size of one directory entry slot in bytes
pub const ENTRY_SIZE: usize = 32;

const FILE_TYPE_MASK: u8 = 0x0F;
const LOCKED_FLAG: u8 = 0x40;
const CLOSED_FLAG: u8 = 0x80;

/// CBM DOS file types, stored in the low nibble of the type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Deleted placeholder
    Del,
    /// Sequential data file
    Seq,
    /// Program file
    Prg,
    /// User file
    Usr,
    /// Relative (record-structured) file
    Rel,
    /// Type nibble outside the defined range, preserved as-is
    Unknown(u8),
}

impl FileType {
    /// Decode the low nibble of a type byte
    pub fn from_bits(bits: u8) -> Self {
        match bits & FILE_TYPE_MASK {
            0 => FileType::Del,
            1 => FileType::Seq,
            2 => FileType::Prg,
            3 => FileType::Usr,
            4 => FileType::Rel,
            b => FileType::Unknown(b),
        }
    }

    /// The low-nibble encoding of this type
    pub fn bits(&self) -> u8 {
        match self {
            FileType::Del => 0,
            FileType::Seq => 1,
            FileType::Prg => 2,
            FileType::Usr => 3,
            FileType::Rel => 4,
            FileType::Unknown(b) => *b,
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FileType::Del => "DEL",
            FileType::Seq => "SEQ",
            FileType::Prg => "PRG",
            FileType::Usr => "USR",
            FileType::Rel => "REL",
            FileType::Unknown(_) => "???",
        })
    }
}

/// One file's metadata from a 32-byte directory slot
///
/// Slot layout: bytes 0-1 carry the directory chain link (meaningful in
/// the first slot of a block only), byte 2 the type byte, bytes 3-4 the
/// first data block, bytes 5-20 the 0xA0-padded PETSCII name, bytes
/// 21-23 the REL side-sector block and record length, bytes 24-29 are
/// reserved (GEOS uses them) and preserved opaquely, bytes 30-31 the
/// block count little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// File type from the low nibble of the type byte
    pub file_type: FileType,
    /// Locked flag (bit 6): the file cannot be scratched
    pub locked: bool,
    /// Closed flag (bit 7): clear means an improperly closed "splat" file
    pub closed: bool,
    name: [u8; petscii::NAME_SIZE],
    /// First block of the file's data chain
    pub first_block: BlockAddress,
    /// Block count recorded by DOS when the file was written
    pub blocks_used: u16,
    /// First side-sector block (REL files only)
    pub side_sector: Option<BlockAddress>,
    /// Record length (REL files only)
    pub record_length: u8,
    reserved: [u8; 6],
}

impl DirectoryEntry {
    /// Create a closed entry for a newly written file
    pub fn new(
        name: &str,
        file_type: FileType,
        first_block: BlockAddress,
        blocks_used: u16,
    ) -> Result<Self> {
        Ok(Self {
            file_type,
            locked: false,
            closed: true,
            name: petscii::encode_name(name)?,
            first_block,
            blocks_used,
            side_sector: None,
            record_length: 0,
            reserved: [0; 6],
        })
    }

    /// The raw 16-byte PETSCII name field
    pub fn name_raw(&self) -> &[u8; petscii::NAME_SIZE] {
        &self.name
    }

    /// The name, decoded for display
    pub fn name(&self) -> String {
        petscii::name_to_string(&self.name)
    }

    /// Parse a 32-byte slot; `None` if the slot is unused (type byte 0)
    pub fn from_slot(slot: &[u8], geometry: &DiskGeometry) -> Result<Option<Self>> {
        debug_assert_eq!(slot.len(), ENTRY_SIZE);
        let type_byte = slot[2];
        if type_byte == 0 {
            return Ok(None);
        }

        let file_type = FileType::from_bits(type_byte);
        let first_block = BlockAddress::new(slot[3], slot[4], geometry)?;

        let mut name = [0u8; petscii::NAME_SIZE];
        name.copy_from_slice(&slot[5..21]);

        let side_sector = if file_type == FileType::Rel && slot[21] != 0 {
            Some(BlockAddress::new(slot[21], slot[22], geometry)?)
        } else {
            None
        };

        let mut reserved = [0u8; 6];
        reserved.copy_from_slice(&slot[24..30]);

        Ok(Some(Self {
            file_type,
            locked: type_byte & LOCKED_FLAG != 0,
            closed: type_byte & CLOSED_FLAG != 0,
            name,
            first_block,
            blocks_used: u16::from_le_bytes([slot[30], slot[31]]),
            side_sector,
            record_length: slot[23],
            reserved,
        }))
    }

    /// Encode this entry into a 32-byte slot, leaving the link bytes alone
    pub fn write_slot(&self, slot: &mut [u8]) {
        debug_assert_eq!(slot.len(), ENTRY_SIZE);
        slot[2] = self.type_byte();
        slot[3] = self.first_block.track();
        slot[4] = self.first_block.sector();
        slot[5..21].copy_from_slice(&self.name);
        match self.side_sector {
            Some(addr) => {
                slot[21] = addr.track();
                slot[22] = addr.sector();
            }
            None => {
                slot[21] = 0;
                slot[22] = 0;
            }
        }
        slot[23] = self.record_length;
        slot[24..30].copy_from_slice(&self.reserved);
        slot[30..32].copy_from_slice(&self.blocks_used.to_le_bytes());
    }

    /// The combined type byte (type nibble plus locked/closed flags)
    pub fn type_byte(&self) -> u8 {
        let mut byte = self.file_type.bits();
        if self.locked {
            byte |= LOCKED_FLAG;
        }
        if self.closed {
            byte |= CLOSED_FLAG;
        }
        byte
    }
}

/// Read-only view of the directory chain rooted at (18,1)
#[derive(Debug, Clone, Copy)]
pub struct Directory<'a> {
    buffer: &'a [u8],
    geometry: DiskGeometry,
    head: BlockAddress,
}

impl<'a> Directory<'a> {
    /// Borrow the directory from an image buffer
    pub fn open(buffer: &'a [u8], geometry: &DiskGeometry) -> Result<Self> {
        let head = BlockAddress::new(DIRECTORY_TRACK, DIRECTORY_SECTOR, geometry)?;
        Ok(Self {
            buffer,
            geometry: *geometry,
            head,
        })
    }

    /// Iterate over the directory's entries
    ///
    /// Walks the directory-block chain with the same cycle/length bound
    /// as any data chain, yielding each used slot. Slots with a type
    /// byte of 0 are skipped.
    pub fn iter(&self) -> DirectoryIter<'a> {
        DirectoryIter {
            blocks: BlockChain::open(self.buffer, &self.geometry, self.head).iter(),
            geometry: self.geometry,
            current: None,
            slot: 0,
            done: false,
        }
    }

    /// Look up an entry by name
    pub fn find(&self, name: &str) -> Result<Option<DirectoryEntry>> {
        let wanted = petscii::encode_name(name)?;
        for entry in self.iter() {
            let entry = entry?;
            if *entry.name_raw() == wanted {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

/// Iterator over used directory slots
#[derive(Debug)]
pub struct DirectoryIter<'a> {
    blocks: ChainIter<'a>,
    geometry: DiskGeometry,
    current: Option<&'a [u8]>,
    slot: usize,
    done: bool,
}

impl Iterator for DirectoryIter<'_> {
    type Item = Result<DirectoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(block) = self.current {
                while self.slot < ENTRIES_PER_BLOCK {
                    let offset = self.slot * ENTRY_SIZE;
                    self.slot += 1;
                    match DirectoryEntry::from_slot(
                        &block[offset..offset + ENTRY_SIZE],
                        &self.geometry,
                    ) {
                        Ok(Some(entry)) => return Some(Ok(entry)),
                        Ok(None) => continue,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                }
                self.current = None;
            }
            match self.blocks.next() {
                Some(Ok(block)) => {
                    self.current = Some(block.read(0..crate::geometry::BLOCK_SIZE));
                    self.slot = 0;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => return None,
            }
        }
    }
}
