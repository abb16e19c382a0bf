/// Block chain traversal and construction

use std::collections::HashSet;

use log::debug;

use crate::block::{Block, BlockMut, PAYLOAD_SIZE};
use crate::error::{D64Error, Result};
use crate::geometry::{BlockAddress, DiskGeometry};

/// A linked list of blocks holding one file's payload
///
/// Each non-final block contributes 254 payload bytes; the final block
/// contributes as many bytes as its size header records. Construction
/// is lazy: nothing is read until the chain is iterated.
#[derive(Debug, Clone, Copy)]
pub struct BlockChain<'a> {
    buffer: &'a [u8],
    geometry: DiskGeometry,
    head: BlockAddress,
}

impl<'a> BlockChain<'a> {
    /// Open a chain starting at the given block
    pub fn open(buffer: &'a [u8], geometry: &DiskGeometry, head: BlockAddress) -> Self {
        Self {
            buffer,
            geometry: *geometry,
            head,
        }
    }

    /// Address of the first block
    pub fn head(&self) -> BlockAddress {
        self.head
    }

    /// Iterate over the blocks of the chain
    ///
    /// The iterator is a stateful cursor: it tracks every address seen
    /// and the total block count of the disk, so a self-referencing or
    /// overlong chain on a corrupt image yields
    /// [`D64Error::CorruptChain`] and stops instead of looping forever.
    pub fn iter(&self) -> ChainIter<'a> {
        ChainIter {
            buffer: self.buffer,
            geometry: self.geometry,
            pending: Some(Ok(self.head)),
            visited: HashSet::new(),
            limit: self.geometry.total_blocks(),
        }
    }

    /// Concatenate the chain's payload into one buffer
    ///
    /// A chain fault aborts with the error rather than returning a
    /// partial file.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut blocks = 0usize;
        for block in self.iter() {
            let block = block?;
            if block.is_final() {
                let size = block.data_size()? as usize;
                data.extend_from_slice(&block.payload()[..size]);
            } else {
                data.extend_from_slice(block.payload());
            }
            blocks += 1;
        }
        debug!(
            "chain at {} yielded {} bytes from {} blocks",
            self.head,
            data.len(),
            blocks
        );
        Ok(data)
    }

    /// Count the blocks in the chain
    pub fn count_blocks(&self) -> Result<usize> {
        let mut count = 0;
        for block in self.iter() {
            block?;
            count += 1;
        }
        Ok(count)
    }
}

/// Finite, non-restartable cursor over a block chain
#[derive(Debug)]
pub struct ChainIter<'a> {
    buffer: &'a [u8],
    geometry: DiskGeometry,
    pending: Option<Result<BlockAddress>>,
    visited: HashSet<BlockAddress>,
    limit: usize,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = Result<Block<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let addr = match self.pending.take()? {
            Ok(addr) => addr,
            Err(e) => return Some(Err(e)),
        };

        if !self.visited.insert(addr) {
            return Some(Err(D64Error::corrupt_chain(
                addr.track(),
                addr.sector(),
                "chain revisits this block (cycle)",
            )));
        }
        if self.visited.len() > self.limit {
            return Some(Err(D64Error::corrupt_chain(
                addr.track(),
                addr.sector(),
                format!("chain exceeds the disk's {} blocks", self.limit),
            )));
        }

        let block = match Block::at(self.buffer, &self.geometry, addr) {
            Ok(block) => block,
            Err(e) => return Some(Err(e)),
        };

        self.pending = match block.next_address() {
            Ok(Some(next)) => Some(Ok(next)),
            Ok(None) => None,
            Err(e) => Some(Err(D64Error::corrupt_chain(
                addr.track(),
                addr.sector(),
                format!("link points outside the disk: {}", e),
            ))),
        };

        Some(Ok(block))
    }
}

/// Builds a chain block by block while a file is written
///
/// The newest block is always marked as a provisional final block so
/// the chain on disk stays well formed at every step; the caller seals
/// it with [`ChainWriter::finalize`] once the payload is complete.
#[derive(Debug)]
pub struct ChainWriter<'a> {
    buffer: &'a mut [u8],
    geometry: DiskGeometry,
    head: BlockAddress,
    tail: BlockAddress,
}

impl<'a> ChainWriter<'a> {
    /// Start a new chain at the given head block
    pub fn start(
        buffer: &'a mut [u8],
        geometry: &DiskGeometry,
        head: BlockAddress,
    ) -> Result<Self> {
        BlockMut::at(buffer, geometry, head)?.set_final(0);
        Ok(Self {
            buffer,
            geometry: *geometry,
            head,
            tail: head,
        })
    }

    /// Address of the first block
    pub fn head(&self) -> BlockAddress {
        self.head
    }

    /// Address of the current final block
    pub fn tail(&self) -> BlockAddress {
        self.tail
    }

    /// Link a freshly allocated block onto the end of the chain
    pub fn append(&mut self, addr: BlockAddress) -> Result<()> {
        BlockMut::at(self.buffer, &self.geometry, self.tail)?.set_next(addr);
        BlockMut::at(self.buffer, &self.geometry, addr)?.set_final(0);
        self.tail = addr;
        Ok(())
    }

    /// Write payload bytes into the current tail block
    ///
    /// # Panics
    ///
    /// Panics if `data` exceeds the 254-byte payload capacity.
    pub fn fill_tail(&mut self, data: &[u8]) -> Result<()> {
        assert!(
            data.len() <= PAYLOAD_SIZE,
            "payload of {} bytes exceeds block capacity",
            data.len()
        );
        let mut tail = BlockMut::at(self.buffer, &self.geometry, self.tail)?;
        tail.payload_mut()[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Seal the chain by recording the final block's used byte count
    pub fn finalize(&mut self, data_size: u8) -> Result<()> {
        BlockMut::at(self.buffer, &self.geometry, self.tail)?.set_final(data_size);
        Ok(())
    }
}
