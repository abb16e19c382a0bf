/// Owned disk image and file assembly

use log::{debug, warn};

use crate::bam::{Bam, BamMut, DATA_INTERLEAVE};
use crate::block::{Block, BlockMut, PAYLOAD_SIZE};
use crate::chain::{BlockChain, ChainWriter};
use crate::directory::{
    Directory, DirectoryEntry, FileType, DIRECTORY_SECTOR, ENTRIES_PER_BLOCK, ENTRY_SIZE,
};
use crate::error::{D64Error, Result, Warning};
use crate::geometry::{BlockAddress, DiskGeometry, DIRECTORY_TRACK};
use crate::petscii;

/// A file's bytes plus any non-fatal findings from reading it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// The file's payload
    pub data: Vec<u8>,
    /// Findings that did not prevent the read
    pub warnings: Vec<Warning>,
}

/// An in-memory disk image
///
/// `Disk` owns the single byte buffer every view borrows from; blocks,
/// chains, the BAM and the directory never outlive it and hold no
/// storage of their own. The borrow checker enforces the single-writer
/// discipline: no view survives across a mutation.
#[derive(Debug, Clone)]
pub struct Disk {
    bytes: Vec<u8>,
    geometry: DiskGeometry,
}

impl Disk {
    /// Wrap an image buffer, selecting the geometry from its size
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let geometry = DiskGeometry::from_image_size(bytes.len())?;
        Ok(Self { bytes, geometry })
    }

    /// Wrap an image buffer with an explicit geometry
    pub fn with_geometry(bytes: Vec<u8>, geometry: DiskGeometry) -> Result<Self> {
        if bytes.len() != geometry.image_size() {
            return Err(D64Error::InvalidImageSize { size: bytes.len() });
        }
        Ok(Self { bytes, geometry })
    }

    /// Create a freshly formatted blank disk
    ///
    /// Every block is free except the BAM sector and the first
    /// directory block, which is initialized empty.
    pub fn blank(geometry: DiskGeometry, name: &str, id: [u8; 2]) -> Result<Self> {
        let encoded = petscii::encode_name(name)?;
        let mut disk = Self {
            bytes: vec![0u8; geometry.image_size()],
            geometry,
        };
        BamMut::at(&mut disk.bytes, &geometry)?.initialize(&encoded, id)?;

        let head = BlockAddress::new(DIRECTORY_TRACK, DIRECTORY_SECTOR, &geometry)?;
        let mut block = BlockMut::at(&mut disk.bytes, &geometry, head)?;
        block.write(0, &[0, 0xFF]);
        debug!("formatted blank disk '{}'", name);
        Ok(disk)
    }

    /// The disk geometry
    pub fn geometry(&self) -> DiskGeometry {
        self.geometry
    }

    /// Borrow the raw image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the disk, returning the image bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// View the block at an address
    pub fn block(&self, addr: BlockAddress) -> Result<Block<'_>> {
        Block::at(&self.bytes, &self.geometry, addr)
    }

    /// Mutably view the block at an address
    pub fn block_mut(&mut self, addr: BlockAddress) -> Result<BlockMut<'_>> {
        BlockMut::at(&mut self.bytes, &self.geometry, addr)
    }

    /// View the BAM
    pub fn bam(&self) -> Result<Bam<'_>> {
        Bam::read(&self.bytes, &self.geometry)
    }

    /// Mutably view the BAM
    pub fn bam_mut(&mut self) -> Result<BamMut<'_>> {
        BamMut::at(&mut self.bytes, &self.geometry)
    }

    /// View the directory
    pub fn directory(&self) -> Result<Directory<'_>> {
        Directory::open(&self.bytes, &self.geometry)
    }

    /// Open the block chain starting at an address
    pub fn chain(&self, head: BlockAddress) -> BlockChain<'_> {
        BlockChain::open(&self.bytes, &self.geometry, head)
    }

    /// The disk name from the BAM, decoded for display
    pub fn name(&self) -> Result<String> {
        Ok(self.bam()?.disk_name())
    }

    /// Free blocks remaining, directory track excluded
    pub fn blocks_free(&self) -> Result<usize> {
        Ok(self.bam()?.blocks_free())
    }

    /// Collect the directory entries
    pub fn list(&self) -> Result<Vec<DirectoryEntry>> {
        self.directory()?.iter().collect()
    }

    /// Read a file's bytes via its directory entry
    ///
    /// The chain is walked and cross-checked against the entry's
    /// recorded block count; a mismatch is surfaced as a warning, never
    /// an error. A corrupt chain aborts with no partial output.
    pub fn extract(&self, entry: &DirectoryEntry) -> Result<ExtractedFile> {
        let chain = self.chain(entry.first_block);
        let data = chain.to_bytes()?;
        let actual = chain.count_blocks()? as u16;

        let mut warnings = Vec::new();
        if actual != entry.blocks_used {
            warn!(
                "'{}': directory records {} blocks but the chain contains {}",
                entry.name(),
                entry.blocks_used,
                actual
            );
            warnings.push(Warning::BlockCountMismatch {
                recorded: entry.blocks_used,
                actual,
            });
        }
        Ok(ExtractedFile { data, warnings })
    }

    /// Read a file's bytes by name
    pub fn extract_by_name(&self, name: &str) -> Result<ExtractedFile> {
        let entry = self
            .directory()?
            .find(name)?
            .ok_or_else(|| D64Error::FileNotFound(name.to_string()))?;
        self.extract(&entry)
    }

    /// Write a file to the disk and register its directory entry
    ///
    /// The payload is split into 254-byte pieces, one block per piece
    /// (zero-length data still occupies one block, as DOS stores it).
    /// The BAM, the block chain and the directory are updated together:
    /// if anything fails after allocation began, every BAM mark is
    /// rolled back and the image is left as it was.
    pub fn store(
        &mut self,
        name: &str,
        file_type: FileType,
        data: &[u8],
    ) -> Result<DirectoryEntry> {
        petscii::encode_name(name)?;
        if self.directory()?.find(name)?.is_some() {
            return Err(D64Error::FileExists(name.to_string()));
        }

        let block_count = if data.is_empty() {
            1
        } else {
            data.len().div_ceil(PAYLOAD_SIZE)
        };

        // Allocate the whole chain up front so a full disk rolls back
        // cleanly before a single payload byte is written.
        let mut allocated: Vec<BlockAddress> = Vec::with_capacity(block_count);
        {
            let mut bam = BamMut::at(&mut self.bytes, &self.geometry)?;
            let mut prev = match bam.allocate_first() {
                Ok(addr) => addr,
                Err(e) => return Err(e),
            };
            allocated.push(prev);
            for _ in 1..block_count {
                match bam.allocate_next(prev, DATA_INTERLEAVE) {
                    Ok(addr) => {
                        allocated.push(addr);
                        prev = addr;
                    }
                    Err(e) => {
                        Self::release(&mut bam, &allocated);
                        return Err(e);
                    }
                }
            }
        }

        let head = allocated[0];
        {
            let mut writer = ChainWriter::start(&mut self.bytes, &self.geometry, head)?;
            if data.is_empty() {
                writer.finalize(0)?;
            } else {
                let mut last_len = 0;
                for (index, piece) in data.chunks(PAYLOAD_SIZE).enumerate() {
                    if index > 0 {
                        writer.append(allocated[index])?;
                    }
                    writer.fill_tail(piece)?;
                    last_len = piece.len();
                }
                writer.finalize(last_len as u8)?;
            }
        }

        let entry = DirectoryEntry::new(name, file_type, head, allocated.len() as u16)?;
        if let Err(e) = self.add_entry(&entry) {
            let mut bam = BamMut::at(&mut self.bytes, &self.geometry)?;
            Self::release(&mut bam, &allocated);
            warn!(
                "rolled back {} data blocks after failed directory insert for '{}'",
                allocated.len(),
                name
            );
            return Err(e);
        }
        debug!("stored '{}' in {} blocks at {}", name, allocated.len(), head);
        Ok(entry)
    }

    fn release(bam: &mut BamMut<'_>, addrs: &[BlockAddress]) {
        for &addr in addrs {
            if let Err(e) = bam.mark_free(addr) {
                warn!("could not release {} during rollback: {}", addr, e);
            }
        }
    }

    /// Register a directory entry in the first free slot
    ///
    /// Extends the directory with a fresh block on track 18 when every
    /// slot of the existing chain is taken; a full directory track is
    /// [`D64Error::DiskFull`].
    pub fn add_entry(&mut self, entry: &DirectoryEntry) -> Result<()> {
        let head = BlockAddress::new(DIRECTORY_TRACK, DIRECTORY_SECTOR, &self.geometry)?;

        let mut free_slot: Option<(BlockAddress, usize)> = None;
        let mut last = head;
        for block in self.chain(head).iter() {
            let block = block?;
            last = block.address();
            if free_slot.is_none() {
                for slot in 0..ENTRIES_PER_BLOCK {
                    if block.read(slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE)[2] == 0 {
                        free_slot = Some((block.address(), slot));
                        break;
                    }
                }
            }
        }

        match free_slot {
            Some((addr, slot)) => {
                self.write_entry_slot(addr, slot, entry)?;
                Ok(())
            }
            None => {
                let fresh = BamMut::at(&mut self.bytes, &self.geometry)?
                    .allocate_directory_block(last.sector())?;
                if let Err(e) = self.extend_directory(last, fresh, entry) {
                    let mut bam = BamMut::at(&mut self.bytes, &self.geometry)?;
                    Self::release(&mut bam, &[fresh]);
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    fn extend_directory(
        &mut self,
        last: BlockAddress,
        fresh: BlockAddress,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        {
            let mut block = BlockMut::at(&mut self.bytes, &self.geometry, fresh)?;
            block.fill(0);
            block.write(0, &[0, 0xFF]);
        }
        BlockMut::at(&mut self.bytes, &self.geometry, last)?.set_next(fresh);
        self.write_entry_slot(fresh, 0, entry)?;
        debug!("extended directory with block {}", fresh);
        Ok(())
    }

    fn write_entry_slot(
        &mut self,
        addr: BlockAddress,
        slot: usize,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        let offset = slot * ENTRY_SIZE;
        let mut bytes = [0u8; ENTRY_SIZE];
        bytes.copy_from_slice(
            Block::at(&self.bytes, &self.geometry, addr)?.read(offset..offset + ENTRY_SIZE),
        );
        entry.write_slot(&mut bytes);
        BlockMut::at(&mut self.bytes, &self.geometry, addr)?.write(offset, &bytes);
        Ok(())
    }

    /// Scratch a file: clear its directory slot and free its blocks
    ///
    /// Locked files are refused. The chain is walked and validated
    /// before anything is touched, so a corrupt chain leaves the image
    /// unchanged.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let (slot_addr, slot, entry) = self
            .find_slot(name)?
            .ok_or_else(|| D64Error::FileNotFound(name.to_string()))?;
        if entry.locked {
            return Err(D64Error::FileLocked(name.to_string()));
        }

        let mut addrs = Vec::new();
        for block in self.chain(entry.first_block).iter() {
            addrs.push(block?.address());
        }

        // Clear the type byte, then return the blocks to the pool
        let offset = slot * ENTRY_SIZE + 2;
        BlockMut::at(&mut self.bytes, &self.geometry, slot_addr)?.write(offset, &[0]);
        let mut bam = BamMut::at(&mut self.bytes, &self.geometry)?;
        Self::release(&mut bam, &addrs);
        debug!("scratched '{}', freed {} blocks", name, addrs.len());
        Ok(())
    }

    /// Locate a name's directory slot alongside its parsed entry
    fn find_slot(&self, name: &str) -> Result<Option<(BlockAddress, usize, DirectoryEntry)>> {
        let wanted = petscii::encode_name(name)?;
        let head = BlockAddress::new(DIRECTORY_TRACK, DIRECTORY_SECTOR, &self.geometry)?;
        for block in self.chain(head).iter() {
            let block = block?;
            for slot in 0..ENTRIES_PER_BLOCK {
                let bytes = block.read(slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE);
                if let Some(entry) = DirectoryEntry::from_slot(bytes, &self.geometry)? {
                    if *entry.name_raw() == wanted {
                        return Ok(Some((block.address(), slot, entry)));
                    }
                }
            }
        }
        Ok(None)
    }
}
