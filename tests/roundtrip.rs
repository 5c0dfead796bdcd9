use anyhow::Result;
use log::*;

use zipflow::compress::StoreProcessor;
use zipflow::read::ReadOptions;
use zipflow::write::{EntryOptions, EntrySource, ReadEntryData, WriteOptions, ZipWriter};
use zipflow::{CompressionMethod, CompressionRegistry, SliceSource, ZipArchive, ZipError};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn collect_archive(mut writer: ZipWriter) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = writer.next_chunk()? {
        assert!(!chunk.is_empty(), "chunks must be non-empty");
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn write_simple(entries: Vec<(&str, &[u8], CompressionMethod)>) -> Result<Vec<u8>> {
    let mut queue = entries.into_iter();
    let writer = ZipWriter::new(
        Box::new(move || {
            Ok(queue.next().map(|(name, data, method)| {
                EntrySource::from_data(
                    EntryOptions::new(name).compression_method(method),
                    ReadEntryData::new(data),
                )
            }))
        }),
        WriteOptions::new(),
    )?;
    collect_archive(writer)
}

#[test]
fn store_and_deflate_round_trip() -> Result<()> {
    init_logger();
    let bytes = write_simple(vec![
        ("a.txt", b"hello", CompressionMethod::Store),
        ("b.txt", b"world", CompressionMethod::Deflate),
    ])?;
    let archive = ZipArchive::new(SliceSource::new(&bytes))?;
    assert_eq!(archive.entry_count(), 2);
    assert!(!archive.is_zip64());

    let entries = archive.all_entries()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].file_name()?, "a.txt");
    assert_eq!(entries[1].file_name()?, "b.txt");
    assert_eq!(archive.read_all(&entries[0], 1024)?, b"hello");
    assert_eq!(archive.read_all(&entries[1], 1024)?, b"world");

    let found = archive.find("b.txt")?.expect("b.txt should be present");
    assert_eq!(found.compression_method, CompressionMethod::Deflate);
    assert_eq!(found.compression_method.to_u16(), 8);
    assert_eq!(found.crc32, crc32fast::hash(b"world"));
    assert!(archive.find("missing")?.is_none());
    Ok(())
}

#[test]
fn directory_entries_are_recognized() -> Result<()> {
    init_logger();
    let bytes = write_simple(vec![
        ("docs/", b"", CompressionMethod::Store),
        ("docs/readme", b"hi", CompressionMethod::Store),
    ])?;
    let archive = ZipArchive::new(SliceSource::new(&bytes))?;
    let entries = archive.all_entries()?;
    assert!(entries[0].is_dir());
    assert!(entries[1].is_file());
    Ok(())
}

#[test]
fn crc_mismatch_is_detected() -> Result<()> {
    init_logger();
    let payload = b"some stored bytes that we will corrupt";
    let mut bytes = write_simple(vec![("victim", payload, CompressionMethod::Store)])?;

    // Store payloads appear verbatim; flip a bit in the middle of one.
    let posit = bytes
        .windows(payload.len())
        .position(|window| window == payload)
        .expect("stored payload should appear verbatim");
    bytes[posit + 10] ^= 0x40;

    let archive = ZipArchive::new(SliceSource::new(&bytes))?;
    let entry = archive.find("victim")?.unwrap();
    match archive.read_all(&entry, 1024) {
        Err(ZipError::CrcMismatch { declared, computed }) => assert_ne!(declared, computed),
        other => panic!("expected CrcMismatch, got {other:?}"),
    }
    Ok(())
}

#[test]
fn full_read_respects_the_size_cap() -> Result<()> {
    init_logger();
    let bytes = write_simple(vec![("big", &[7u8; 4096], CompressionMethod::Deflate)])?;
    let archive = ZipArchive::new(SliceSource::new(&bytes))?;
    let entry = archive.find("big")?.unwrap();
    match archive.read_all(&entry, 100) {
        Err(ZipError::TooLarge { size: 4096, cap: 100 }) => {}
        other => panic!("expected TooLarge, got {other:?}"),
    }
    assert_eq!(archive.read_all(&entry, 4096)?.len(), 4096);
    Ok(())
}

/// The chunked reader's contract: an empty block means "more input needed",
/// and only `None` — sticky once returned — means end-of-stream.
#[test]
fn streaming_reader_empty_is_not_eof() -> Result<()> {
    init_logger();
    let input: Vec<u8> = (0..50_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();
    let bytes = write_simple(vec![("data", &input, CompressionMethod::Deflate)])?;
    let archive = ZipArchive::new(SliceSource::new(&bytes))?;
    let entry = archive.find("data")?.unwrap();

    // Trickle compressed input one byte at a time.
    let mut reader = archive.reader(&entry)?;
    let mut output = Vec::new();
    let mut empty_blocks = 0usize;
    while let Some(block) = reader.read(1)? {
        if block.is_empty() {
            empty_blocks += 1;
        }
        output.extend_from_slice(&block);
    }
    assert_eq!(output, input);
    assert!(
        empty_blocks > 0,
        "single-byte input should starve the inflater at least once"
    );
    // End-of-stream is sticky.
    assert!(reader.read(1024)?.is_none());
    assert!(reader.read(1024)?.is_none());
    Ok(())
}

/// Scenario: an entry compressed with an exotic method. Its metadata reads
/// fine; opening its data without a registered processor does not.
#[test]
fn unsupported_method_fails_only_on_read() -> Result<()> {
    init_logger();
    let mut served = false;
    let writer = ZipWriter::new(
        Box::new(move || {
            if served {
                return Ok(None);
            }
            served = true;
            Ok(Some(EntrySource::from_data(
                EntryOptions::new("sealed")
                    .compression_method(CompressionMethod::Other(99))
                    .data_processors({
                        let mut registry = CompressionRegistry::empty();
                        registry.register(99, || Box::<StoreProcessor>::default());
                        registry
                    }),
                ReadEntryData::new(&b"not really aes"[..]),
            )))
        }),
        WriteOptions::new(),
    )?;
    let bytes = collect_archive(writer)?;

    let archive = ZipArchive::new(SliceSource::new(&bytes))?;
    let entry = archive.find("sealed")?.expect("metadata should iterate fine");
    assert_eq!(entry.compression_method, CompressionMethod::Other(99));
    match archive.reader(&entry) {
        Err(ZipError::UnsupportedMethod(99)) => {}
        other => panic!("expected UnsupportedMethod, got {:?}", other.err()),
    }

    // With the processor registered, the same entry reads fine.
    let archive = ZipArchive::with_options(
        SliceSource::new(&bytes),
        ReadOptions::new().data_processors({
            let mut registry = CompressionRegistry::decompressors();
            registry.register(99, || Box::<StoreProcessor>::default());
            registry
        }),
    )?;
    let entry = archive.find("sealed")?.unwrap();
    assert_eq!(archive.read_all(&entry, 1024)?, b"not really aes");
    Ok(())
}

/// Scenario: 100,000 one-byte entries walked through a 4 KiB directory
/// buffer. The reader must stay bounded and the count exact.
#[test]
fn huge_directory_iterates_through_a_small_buffer() -> Result<()> {
    init_logger();
    const COUNT: u32 = 100_000;

    let mut next = 0u32;
    let writer = ZipWriter::new(
        Box::new(move || {
            if next == COUNT {
                return Ok(None);
            }
            let name = format!("f{next}");
            next += 1;
            Ok(Some(EntrySource::from_data(
                EntryOptions::new(name).compression_method(CompressionMethod::Store),
                ReadEntryData::new(&b"\x00"[..]),
            )))
        }),
        WriteOptions::new(),
    )?;
    let bytes = collect_archive(writer)?;
    info!("100k-entry archive is {} bytes", bytes.len());

    let archive = ZipArchive::with_options(
        SliceSource::new(&bytes),
        ReadOptions::new().cd_buffer_size(4096),
    )?;
    // 100,000 entries overflows the classic EOCDR count.
    assert!(archive.is_zip64());
    assert_eq!(archive.entry_count(), u64::from(COUNT));

    let mut seen = 0u32;
    for entry in archive.entries() {
        let entry = entry?;
        if seen == 0 {
            assert_eq!(entry.file_name()?, "f0");
        }
        assert_eq!(entry.uncompressed_size, 1);
        seen += 1;
    }
    assert_eq!(seen, COUNT);
    Ok(())
}

/// With an index, `find` must return records identical to iteration.
#[test]
fn index_matches_iteration() -> Result<()> {
    init_logger();
    let bytes = write_simple(vec![
        ("one", b"1", CompressionMethod::Store),
        ("two", b"22", CompressionMethod::Deflate),
        ("three", b"333", CompressionMethod::Store),
    ])?;
    let archive = ZipArchive::with_options(
        SliceSource::new(&bytes),
        ReadOptions::new().create_entry_index(true),
    )?;
    for entry in archive.all_entries()? {
        let found = archive.find(&entry.file_name()?)?.expect("indexed entry");
        assert_eq!(found, entry);
    }
    assert!(archive.find("nope")?.is_none());
    Ok(())
}

#[test]
fn comments_and_timestamps_round_trip() -> Result<()> {
    init_logger();
    // An odd second: DOS time can't represent it, the extended timestamp can.
    let moment = chrono::NaiveDate::from_ymd_opt(2023, 11, 5)
        .unwrap()
        .and_hms_opt(13, 37, 7)
        .unwrap();

    let mut served = false;
    let writer = ZipWriter::new(
        Box::new(move || {
            if served {
                return Ok(None);
            }
            served = true;
            Ok(Some(EntrySource::from_data(
                EntryOptions::new("noted.txt")
                    .file_comment("a remark")
                    .mod_time(moment),
                ReadEntryData::new(&b"contents"[..]),
            )))
        }),
        WriteOptions::new().comment("archive note"),
    )?;
    let bytes = collect_archive(writer)?;

    let archive = ZipArchive::new(SliceSource::new(&bytes))?;
    assert_eq!(archive.comment(), b"archive note");
    let entry = archive.find("noted.txt")?.unwrap();
    assert_eq!(entry.comment()?, "a remark");
    assert_eq!(entry.modified(), moment);
    // The DOS field alone rounds down to even seconds.
    assert_eq!(
        entry.dos_modified(),
        moment - chrono::Duration::seconds(1)
    );
    Ok(())
}

#[test]
fn non_ascii_names_round_trip() -> Result<()> {
    init_logger();
    let mut queue = vec![
        // CP437 can spell this one.
        EntryOptions::new("naïve.txt").unicode_file_name_field(true),
        // This one needs bit 11.
        EntryOptions::new("snow☃.txt").force_utf8_file_name(true),
    ]
    .into_iter();
    let writer = ZipWriter::new(
        Box::new(move || {
            Ok(queue.next().map(|options| {
                EntrySource::from_data(options, ReadEntryData::new(&b"x"[..]))
            }))
        }),
        WriteOptions::new(),
    )?;
    let bytes = collect_archive(writer)?;

    let archive = ZipArchive::new(SliceSource::new(&bytes))?;
    let entries = archive.all_entries()?;
    assert_eq!(entries[0].file_name()?, "naïve.txt");
    assert_eq!(entries[1].file_name()?, "snow☃.txt");

    // A snowman without bit 11 has no CP437 spelling.
    let mut served = false;
    let mut writer = ZipWriter::new(
        Box::new(move || {
            if served {
                return Ok(None);
            }
            served = true;
            Ok(Some(EntrySource::from_data(
                EntryOptions::new("snow☃.txt"),
                ReadEntryData::new(&b"x"[..]),
            )))
        }),
        WriteOptions::new(),
    )?;
    loop {
        match writer.next_chunk() {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("expected an encoding error"),
            Err(ZipError::EncodingUnsupported(_)) => break,
            Err(other) => panic!("expected EncodingUnsupported, got {other}"),
        }
    }
    Ok(())
}

/// Self-extracting style: bytes prepended to the archive shift every
/// stored offset.
#[test]
fn prepended_data_is_tolerated() -> Result<()> {
    init_logger();
    let archive_bytes = write_simple(vec![("inner", b"payload", CompressionMethod::Deflate)])?;
    let mut bytes = b"#!/bin/unzip-me\n".to_vec();
    let junk = bytes.len() as u64;
    bytes.extend_from_slice(&archive_bytes);

    let archive = ZipArchive::new(SliceSource::new(&bytes))?;
    assert_eq!(archive.prepended_bytes(), junk);
    let entry = archive.find("inner")?.unwrap();
    assert_eq!(archive.read_all(&entry, 1024)?, b"payload");
    Ok(())
}

#[test]
fn random_bytes_are_not_a_zip() {
    init_logger();
    let noise: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
    match ZipArchive::new(SliceSource::new(&noise)) {
        Err(ZipError::NotAZip) => {}
        other => panic!("expected NotAZip, got {:?}", other.err()),
    }
}

#[test]
fn zero_buffer_size_is_rejected() -> Result<()> {
    init_logger();
    let bytes = write_simple(vec![("a", b"a", CompressionMethod::Store)])?;
    match ZipArchive::with_options(
        SliceSource::new(&bytes),
        ReadOptions::new().cd_buffer_size(0),
    ) {
        Err(ZipError::InvalidOption(_)) => Ok(()),
        other => panic!("expected InvalidOption, got {:?}", other.err()),
    }
}

#[test]
fn file_and_mmap_sources() -> Result<()> {
    use std::io::Write as _;

    init_logger();
    let bytes = write_simple(vec![("disk.txt", b"on disk", CompressionMethod::Deflate)])?;
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(&bytes)?;
    file.flush()?;

    let source = zipflow::FileSource::new(file.reopen()?)?;
    let archive = ZipArchive::new(source)?;
    let entry = archive.find("disk.txt")?.unwrap();
    assert_eq!(archive.read_all(&entry, 1024)?, b"on disk");

    // Memory maps are just another slice.
    let mapping = unsafe { memmap2::Mmap::map(file.as_file())? };
    let archive = ZipArchive::new(SliceSource::new(&mapping))?;
    let entry = archive.find("disk.txt")?.unwrap();
    assert_eq!(archive.read_all(&entry, 1024)?, b"on disk");
    Ok(())
}
