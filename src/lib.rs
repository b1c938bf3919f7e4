//! # varc — sliced, self-describing backup archive engine
//!
//! Format guarantees (frozen for edition "03"):
//! - Every size, offset, and position on the wire is a self-delimiting
//!   arbitrary-precision counter; archives may logically exceed 2^64 bytes
//! - An archive is one logical stream over numbered slice files, each with
//!   its own header; only the final slice carries the terminal mark
//! - The archive header at offset 0 is never compressed nor ciphered: it
//!   names the layers the reader must build
//! - The catalogue sits at the offset the trailing terminator names, framed
//!   by a mandatory XOR-fold CRC; a corrupt catalogue never parses silently
//! - Hard links are stored once: the first mirage of an etiquette carries
//!   the inode, later mirages reference it
//! - The cipher frame is block-oriented and seekable; a wrong key reads as
//!   corruption at the catalogue layer, never as a cipher-layer diagnosis
//! - One compression algorithm per archive; each entry payload and the
//!   catalogue start a self-contained compressed segment

pub mod archive;
pub mod cancel;
pub mod catalogue;
pub mod channel;
pub mod cipher;
pub mod compress;
pub mod counter;
pub mod crc;
pub mod database;
pub mod elastic;
pub mod error;
pub mod fs_tree;
pub mod header;
pub mod interact;
pub mod mask;
pub mod slice;

// Flat re-exports for the most common types.
pub use archive::{
    create, CreateOptions, ExtractOptions, OpenArchive, OperationContext, OverwritePolicy,
};
pub use catalogue::{Catalogue, Entry, EntryStats, SavedStatus};
pub use channel::{Channel, FileChannel, MemChannel, Mode, NullChannel};
pub use cipher::CipherSpec;
pub use compress::{CompressionAlgo, Compressor};
pub use counter::Counter;
pub use crc::Crc;
pub use database::Database;
pub use error::{ArchiveError, Result};
pub use header::{ArchiveHeader, Terminator};
pub use interact::{FixedAnswer, Interact, TtyInteract};
pub use mask::Mask;
pub use slice::{SliceConfig, SliceSet};
