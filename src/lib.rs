/*!
# d64manager

A Rust library for reading and writing Commodore 1541 "D64" disk images
with CBM DOS filesystem support.

## Features

- Track/sector addressing with the 1541's zone-bit-recording geometry
- Bounds-validated block views over a single owned image buffer
- Block chain traversal hardened against corrupt or malicious images
- Block Availability Map (BAM) reading, mutation and interleaved allocation
- Directory chain parsing and file storage with atomic BAM bookkeeping
- Idiomatic Rust API with comprehensive error handling

## Quick Start

```rust
use d64manager::{Disk, DiskGeometry, FileType};

// Format a blank 35-track disk
let mut disk = Disk::blank(DiskGeometry::d64(), "DEMOS", *b"DM")?;

// Store a file and read it back
disk.store("HELLO", FileType::Prg, b"hello, 1541")?;
let file = disk.extract_by_name("HELLO")?;
assert_eq!(file.data, b"hello, 1541");

// List the directory
for entry in disk.list()? {
    println!("{:>4}  {:<16} {}", entry.blocks_used, entry.name(), entry.file_type);
}

// An existing image is just bytes; the geometry follows from its size
let image = disk.into_bytes();
let reopened = Disk::from_bytes(image)?;
assert_eq!(reopened.name()?, "DEMOS");
# Ok::<(), d64manager::D64Error>(())
```

## D64 images

A D64 file is the raw, headerless byte dump of a 1541 diskette: 683
blocks of 256 bytes for the standard 35-track layout (174,848 bytes),
with 40- and 42-track variants recognized by size. Blocks are chained
by a two-byte link header; the BAM at track 18 sector 0 tracks free
blocks; the directory chain starts at track 18 sector 1.

The library never touches the host filesystem: callers hand it a byte
buffer and get one back. Images are untrusted input — chain traversal
is bounded, link pointers are validated, and malformed data surfaces as
typed errors, never panics.

## Modules

- `geometry`: track/sector layout tables and address validation
- `block`: borrowed 256-byte block views and the link header
- `chain`: chain traversal and construction
- `bam`: the Block Availability Map and sector allocation
- `directory`: directory chain and entry layout
- `disk`: the owned image plus file storage and extraction
- `petscii`: PETSCII name conversion
- `error`: error types and Result alias
*/

#![warn(missing_docs)]

/// The Block Availability Map and sector allocation
pub mod bam;
/// Borrowed 256-byte block views and the link header
pub mod block;
/// Chain traversal and construction
pub mod chain;
/// Directory chain and entry layout
pub mod directory;
/// The owned image plus file storage and extraction
pub mod disk;
/// Error types and Result alias
pub mod error;
/// Track/sector layout tables and address validation
pub mod geometry;
/// PETSCII name conversion
pub mod petscii;

// Re-export common types
pub use bam::{Bam, BamMut, DATA_INTERLEAVE, DIRECTORY_INTERLEAVE};
pub use block::{Block, BlockMut, PAYLOAD_SIZE};
pub use chain::{BlockChain, ChainIter, ChainWriter};
pub use directory::{Directory, DirectoryEntry, DirectoryIter, FileType};
pub use disk::{Disk, ExtractedFile};
pub use error::{D64Error, Result, Warning};
pub use geometry::{BlockAddress, DiskGeometry, BLOCK_SIZE, DIRECTORY_TRACK};
