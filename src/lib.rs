//! zipflow reads, writes, and merges ZIP archives under strict memory
//! bounds: the central directory streams through a small sliding buffer
//! instead of being materialized, and the writer produces the archive as a
//! lazy sequence of chunks.
//!
//! Reading starts from any [`ByteSource`] — a buffer, a memory map, or an
//! open file:
//!
//! ```no_run
//! # use std::fs;
//! # use zipflow::*;
//! let bytes = fs::read("foo.zip")?;
//! let archive = ZipArchive::new(SliceSource::new(&bytes))?;
//! for entry in archive.entries() {
//!     let entry = entry?;
//!     println!("{}: {} bytes", entry.file_name()?, entry.uncompressed_size);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Archives with tens of thousands of entries iterate in bounded memory;
//! only the entry in hand is ever parsed. Entry payloads decompress either
//! whole (with a size cap) or as a chunked stream:
//!
//! ```no_run
//! # use std::fs;
//! # use zipflow::*;
//! # let bytes = fs::read("foo.zip")?;
//! # let archive = ZipArchive::new(SliceSource::new(&bytes))?;
//! let entry = archive.find("hello.txt")?.expect("no such entry");
//! let contents = archive.read_all(&entry, 16 * 1024 * 1024)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Writing is pull-based: a factory hands out entry sources, and
//! [`ZipWriter::next_chunk`] yields archive bytes until the central
//! directory and its end records have gone out. Sizes and CRCs are computed
//! on the fly, with Zip64 records appearing when the numbers (or an
//! explicit option) call for them.
//!
//! Merging composes the two: a [`merge::ZipMerger`] drives a writer with
//! entries copied verbatim — compressed payloads and all — from any number
//! of source archives, rewriting only names, headers, and offsets.

pub mod compress;
pub mod merge;
pub mod read;
pub mod result;
pub mod source;
pub mod write;

pub use compress::{CompressionMethod, CompressionRegistry, DataProcessor};
pub use read::{Entry, ReadOptions, ZipArchive};
pub use result::{ZipError, ZipResult};
pub use source::{ByteSource, FileSource, SliceSource};
pub use write::{EntryOptions, EntrySource, WriteOptions, ZipWriter};

mod extra;
mod spec;
mod text;
