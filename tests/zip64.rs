use std::io::Write as _;

use anyhow::Result;
use log::*;

use zipflow::write::{EntryData, EntryOptions, EntrySource, ReadEntryData, WriteOptions, ZipWriter};
use zipflow::{CompressionMethod, FileSource, SliceSource, ZipArchive, ZipResult};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn collect_archive(mut writer: ZipWriter) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = writer.next_chunk()? {
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn write_simple(force_zip64: bool, entries: Vec<(&str, &[u8])>) -> Result<Vec<u8>> {
    let mut queue = entries.into_iter();
    let writer = ZipWriter::new(
        Box::new(move || {
            Ok(queue.next().map(|(name, data)| {
                EntrySource::from_data(
                    EntryOptions::new(name).compression_method(CompressionMethod::Store),
                    ReadEntryData::new(data),
                )
            }))
        }),
        WriteOptions::new().force_zip64(force_zip64),
    )?;
    collect_archive(writer)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// A small archive needs no Zip64 records — and must not carry any.
/// Forcing Zip64 flips that.
#[test]
fn zip64_records_appear_only_when_called_for() -> Result<()> {
    init_logger();
    const LOCATOR_MAGIC: &[u8] = b"PK\x06\x07";

    let classic = write_simple(false, vec![("small", b"tiny payload")])?;
    assert!(!contains(&classic, LOCATOR_MAGIC));
    let archive = ZipArchive::new(SliceSource::new(&classic))?;
    assert!(!archive.is_zip64());

    let forced = write_simple(true, vec![("small", b"tiny payload")])?;
    assert!(contains(&forced, LOCATOR_MAGIC));
    let archive = ZipArchive::new(SliceSource::new(&forced))?;
    assert!(archive.is_zip64());
    Ok(())
}

#[test]
fn forced_zip64_archives_round_trip() -> Result<()> {
    init_logger();
    let bytes = write_simple(
        true,
        vec![("first", b"some bytes"), ("second", b"more bytes")],
    )?;
    let archive = ZipArchive::new(SliceSource::new(&bytes))?;
    assert!(archive.is_zip64());
    assert_eq!(archive.entry_count(), 2);

    let entries = archive.all_entries()?;
    assert_eq!(entries[0].file_name()?, "first");
    assert_eq!(archive.read_all(&entries[0], 1024)?, b"some bytes");
    assert_eq!(archive.read_all(&entries[1], 1024)?, b"more bytes");
    // Zip64 entries require version 4.5 to extract.
    assert_eq!(entries[0].extraction_version, 45);
    Ok(())
}

/// A synthetic producer: `length` bytes of a rolling pattern, no allocation
/// beyond one block at a time.
struct Pattern {
    remaining: u64,
    posit: u64,
}

impl Pattern {
    fn new(length: u64) -> Self {
        Self {
            remaining: length,
            posit: 0,
        }
    }
}

impl EntryData for Pattern {
    fn next_block(&mut self) -> ZipResult<Option<Vec<u8>>> {
        const BLOCK: u64 = 1024 * 1024;
        if self.remaining == 0 {
            return Ok(None);
        }
        let take = self.remaining.min(BLOCK);
        let block: Vec<u8> = (self.posit..self.posit + take)
            .map(|i| (i % 251) as u8)
            .collect();
        self.posit += take;
        self.remaining -= take;
        Ok(Some(block))
    }
}

/// Scenario: a single entry of 2³² + 1 bytes. Expensive (the archive runs
/// past 4 GiB on disk), so it's ignored by default:
///
///     cargo test --release -- --ignored big_entry
#[test]
#[ignore]
fn big_entry_goes_through_zip64() -> Result<()> {
    init_logger();
    const SIZE: u64 = (1 << 32) + 1;

    let mut served = false;
    let mut writer = ZipWriter::new(
        Box::new(move || {
            if served {
                return Ok(None);
            }
            served = true;
            Ok(Some(EntrySource::from_data(
                EntryOptions::new("huge.bin")
                    .compression_method(CompressionMethod::Store)
                    // Sizes are unknown up front, so the descriptor's width
                    // must be chosen before the payload streams.
                    .force_zip64(true),
                Pattern::new(SIZE),
            )))
        }),
        WriteOptions::new(),
    )?;

    let mut file = tempfile::NamedTempFile::new()?;
    {
        let mut out = std::io::BufWriter::new(&mut file);
        while let Some(chunk) = writer.next_chunk()? {
            out.write_all(&chunk)?;
        }
        out.flush()?;
    }
    info!("wrote a {} byte archive", file.as_file().metadata()?.len());

    let archive = ZipArchive::new(FileSource::new(file.reopen()?)?)?;
    assert!(archive.is_zip64());
    let entry = archive.find("huge.bin")?.expect("the entry should be there");
    assert_eq!(entry.uncompressed_size, SIZE);
    assert_eq!(entry.compressed_size, SIZE);

    // Stream it back out; the reader checks the CRC at end-of-stream.
    let mut reader = archive.reader(&entry)?;
    let mut total = 0u64;
    while let Some(block) = reader.read(1024 * 1024)? {
        total += block.len() as u64;
    }
    assert_eq!(total, SIZE);
    Ok(())
}
