//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here:
//! record layouts, signatures, and the little-endian codecs for both
//! directions. Higher-level stuff lives in the [`read`] and [`write`]
//! modules. (This pattern, like several others, was inspired by the Zip
//! crate.)
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`read`]: ../read/index.html
//! [`write`]: ../write/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use std::convert::TryInto;
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use memchr::memmem;

use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
pub const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Data descriptor magic number
pub const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];

/// Fixed size of the classic End of central directory record
pub const EOCDR_FIXED_SIZE: usize = 22;
/// The EOCDR comment length is a u16, so the whole record can't be
/// further than this from the end of the archive.
pub const EOCDR_SEARCH_WINDOW: usize = EOCDR_FIXED_SIZE + u16::MAX as usize;
/// Fixed size of a central directory file header (before its variable tail)
pub const CENTRAL_HEADER_FIXED_SIZE: usize = 46;
/// Fixed size of a local file header (before its variable tail)
pub const LOCAL_HEADER_FIXED_SIZE: usize = 30;
/// Fixed size of the Zip64 end of central directory record
pub const ZIP64_EOCDR_FIXED_SIZE: usize = 56;
/// Size of the Zip64 end of central directory locator
pub const ZIP64_EOCDR_LOCATOR_SIZE: usize = 20;

/// 4.4.1.4 If one of the fields in the end of central directory
/// record is too small to hold required data, the field SHOULD be
/// set to -1 (0xFFFF or 0xFFFFFFFF) and the ZIP64 format record
/// SHOULD be created.
pub const ZIP64_SENTINEL_U16: u16 = 0xFFFF;
pub const ZIP64_SENTINEL_U32: u32 = 0xFFFF_FFFF;
/// Largest value a classic 32-bit size or offset field can carry
/// before Zip64 escalation.
pub const ZIP64_BYTES_LIMIT: u64 = 0xFFFF_FFFE;
/// Largest entry count a classic EOCDR can carry before Zip64 escalation.
pub const ZIP64_ENTRY_LIMIT: u64 = 0xFFFE;

// General purpose bit flags

/// Bit 0: If set, indicates that the file is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1;
/// Bit 3: crc-32, compressed size and uncompressed size are set to zero in
/// the local header and a data descriptor follows the file data.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// Bit 11: Language encoding flag (EFS). If this bit is set, the filename and
/// comment fields for this file MUST be encoded using UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Version needed to extract a plain deflated entry
pub const VERSION_DEFAULT: u16 = 20;
/// Version needed to extract Zip64 extensions
pub const VERSION_ZIP64: u16 = 45;
/// 4.4.2.2: host system 3 is UNIX (the upper byte of "version made by").
pub const MADE_BY_UNIX: u16 = 3 << 8;

// Straight from the Rust docs:

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
pub fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    u64::from_le_bytes(int_bytes.try_into().expect("less than eight bytes for u64"))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
pub fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
pub fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub fn parse(mut eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        if eocdr.len() < EOCDR_FIXED_SIZE || eocdr[..4] != EOCDR_MAGIC {
            return Err(ZipError::Malformed(
                "Invalid End Of Central Directory Record",
            ));
        }
        eocdr = &eocdr[4..];
        let disk_number = read_u16(&mut eocdr);
        let disk_with_central_directory = read_u16(&mut eocdr);
        let entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);
        let comment_length = read_u16(&mut eocdr) as usize;
        if eocdr.len() < comment_length {
            return Err(ZipError::Malformed(
                "End Of Central Directory Record comment is cut short",
            ));
        }
        let file_comment = eocdr[..comment_length].to_vec();

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }

    /// True if any field carries a Zip64 sentinel value,
    /// i.e. the authoritative numbers live in the Zip64 EOCDR.
    pub fn needs_zip64(&self) -> bool {
        self.entries == ZIP64_SENTINEL_U16
            || self.entries_on_this_disk == ZIP64_SENTINEL_U16
            || self.central_directory_size == ZIP64_SENTINEL_U32
            || self.central_directory_offset == ZIP64_SENTINEL_U32
    }
}

/// Searches backward through `window` (the tail of the archive) for the
/// End of central directory record.
///
/// It should be right at the end of the file, but its variable-length
/// comment means we can't jump to a known offset. A candidate only counts
/// if its comment runs exactly to the end of the window; random `PK\x05\x06`
/// bytes inside a comment are skipped over.
pub fn find_eocdr(window: &[u8]) -> ZipResult<usize> {
    for posit in memmem::rfind_iter(window, &EOCDR_MAGIC) {
        if posit + EOCDR_FIXED_SIZE > window.len() {
            continue;
        }
        let mut lens = &window[posit + 20..];
        let comment_length = read_u16(&mut lens) as usize;
        if posit + EOCDR_FIXED_SIZE + comment_length == window.len() {
            return Ok(posit);
        }
    }
    Err(ZipError::NotAZip)
}

pub fn write_eocdr<W: Write>(
    writer: &mut W,
    entries: u64,
    central_directory_size: u64,
    central_directory_offset: u64,
    comment: &[u8],
) -> ZipResult<()> {
    writer.write_all(&EOCDR_MAGIC)?;
    // number of this disk, disk with the start of the central directory
    writer.write_u16::<LittleEndian>(0)?;
    writer.write_u16::<LittleEndian>(0)?;
    // entry counts, this disk and total
    let clamped_entries = clamp_u16(entries);
    writer.write_u16::<LittleEndian>(clamped_entries)?;
    writer.write_u16::<LittleEndian>(clamped_entries)?;
    writer.write_u32::<LittleEndian>(clamp_u32(central_directory_size))?;
    writer.write_u32::<LittleEndian>(clamp_u32(central_directory_offset))?;
    writer.write_u16::<LittleEndian>(comment.len() as u16)?;
    writer.write_all(comment)?;
    Ok(())
}

fn clamp_u16(value: u64) -> u16 {
    if value > ZIP64_ENTRY_LIMIT {
        ZIP64_SENTINEL_U16
    } else {
        value as u16
    }
}

fn clamp_u32(value: u64) -> u32 {
    if value > ZIP64_BYTES_LIMIT {
        ZIP64_SENTINEL_U32
    } else {
        value as u32
    }
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central
/// directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub fn parse(mut locator: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if locator.len() < ZIP64_EOCDR_LOCATOR_SIZE || locator[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        locator = &locator[4..];
        let disk_with_central_directory = read_u32(&mut locator);
        let zip64_eocdr_offset = read_u64(&mut locator);
        let disks = read_u32(&mut locator);

        Some(Self {
            disk_with_central_directory,
            zip64_eocdr_offset,
            disks,
        })
    }
}

pub fn write_zip64_eocdr_locator<W: Write>(writer: &mut W, zip64_eocdr_offset: u64) -> ZipResult<()> {
    writer.write_all(&ZIP64_EOCDR_LOCATOR_MAGIC)?;
    // disk with the start of the zip64 end of central directory
    writer.write_u32::<LittleEndian>(0)?;
    writer.write_u64::<LittleEndian>(zip64_eocdr_offset)?;
    // total number of disks
    writer.write_u32::<LittleEndian>(1)?;
    Ok(())
}

/// Data from the Zip64 end of central directory record
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub fn parse(mut eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        if eocdr.len() < ZIP64_EOCDR_FIXED_SIZE || eocdr[..4] != ZIP64_EOCDR_MAGIC {
            return Err(ZipError::Malformed(
                "Invalid Zip64 End Of Central Directory Record",
            ));
        }
        eocdr = &eocdr[4..];
        let eocdr_size = read_u64(&mut eocdr);
        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        if eocdr_size.saturating_add(12) < ZIP64_EOCDR_FIXED_SIZE as u64 {
            return Err(ZipError::Malformed(
                "Invalid record size in Zip64 End Of Central Directory Record",
            ));
        }
        let source_version = read_u16(&mut eocdr);
        let minimum_extract_version = read_u16(&mut eocdr);
        let disk_number = read_u32(&mut eocdr);
        let disk_with_central_directory = read_u32(&mut eocdr);
        let entries_on_this_disk = read_u64(&mut eocdr);
        let entries = read_u64(&mut eocdr);
        let central_directory_size = read_u64(&mut eocdr);
        let central_directory_offset = read_u64(&mut eocdr);

        Ok(Self {
            source_version,
            minimum_extract_version,
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }
}

pub fn write_zip64_eocdr<W: Write>(
    writer: &mut W,
    entries: u64,
    central_directory_size: u64,
    central_directory_offset: u64,
) -> ZipResult<()> {
    writer.write_all(&ZIP64_EOCDR_MAGIC)?;
    // Size = SizeOfFixedFields + SizeOfVariableData - 12.
    writer.write_u64::<LittleEndian>((ZIP64_EOCDR_FIXED_SIZE - 12) as u64)?;
    writer.write_u16::<LittleEndian>(MADE_BY_UNIX | VERSION_ZIP64)?;
    writer.write_u16::<LittleEndian>(VERSION_ZIP64)?;
    // number of this disk, disk with the start of the central directory
    writer.write_u32::<LittleEndian>(0)?;
    writer.write_u32::<LittleEndian>(0)?;
    writer.write_u64::<LittleEndian>(entries)?;
    writer.write_u64::<LittleEndian>(entries)?;
    writer.write_u64::<LittleEndian>(central_directory_size)?;
    writer.write_u64::<LittleEndian>(central_directory_offset)?;
    Ok(())
}

/// A record from the central directory, owned so it outlives the
/// sliding buffer it was parsed out of.
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryRecord {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub file_comment: Vec<u8>,
}

impl CentralDirectoryRecord {
    /// Total size of this record in the file, given the fixed prefix.
    /// The prefix must be at least [`CENTRAL_HEADER_FIXED_SIZE`] bytes.
    pub fn size_in_file(fixed_prefix: &[u8]) -> ZipResult<usize> {
        if fixed_prefix.len() < CENTRAL_HEADER_FIXED_SIZE {
            return Err(ZipError::Malformed("Central directory record cut short"));
        }
        if fixed_prefix[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipError::Malformed("Invalid central directory entry"));
        }
        let mut lens = &fixed_prefix[28..];
        let name_length = read_u16(&mut lens) as usize;
        let extra_field_length = read_u16(&mut lens) as usize;
        let file_comment_length = read_u16(&mut lens) as usize;
        Ok(CENTRAL_HEADER_FIXED_SIZE + name_length + extra_field_length + file_comment_length)
    }

    pub fn parse_and_consume(entry: &mut &[u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        if entry.len() < CENTRAL_HEADER_FIXED_SIZE {
            return Err(ZipError::Malformed("Central directory record cut short"));
        }
        if entry[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipError::Malformed("Invalid central directory entry"));
        }
        *entry = &entry[4..];
        let source_version = read_u16(entry);
        let minimum_extract_version = read_u16(entry);
        let flags = read_u16(entry);
        let compression_method = read_u16(entry);
        let last_modified_time = read_u16(entry);
        let last_modified_date = read_u16(entry);
        let crc32 = read_u32(entry);
        let compressed_size = read_u32(entry);
        let uncompressed_size = read_u32(entry);
        let name_length = read_u16(entry) as usize;
        let extra_field_length = read_u16(entry) as usize;
        let file_comment_length = read_u16(entry) as usize;
        let disk_number = read_u16(entry);
        let internal_file_attributes = read_u16(entry);
        let external_file_attributes = read_u32(entry);
        let header_offset = read_u32(entry);
        if entry.len() < name_length + extra_field_length + file_comment_length {
            return Err(ZipError::Malformed(
                "Central directory record's variable fields are cut short",
            ));
        }
        let (name, remaining) = entry.split_at(name_length);
        let (extra_field, remaining) = remaining.split_at(extra_field_length);
        let (file_comment, remaining) = remaining.split_at(file_comment_length);
        let (name, extra_field, file_comment) =
            (name.to_vec(), extra_field.to_vec(), file_comment.to_vec());
        *entry = remaining;

        Ok(Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            name,
            extra_field,
            file_comment,
        })
    }
}

/// Field values for an emitted central directory file header.
///
/// The 32-bit size and offset fields are written as given; callers clamp
/// to the Zip64 sentinel and produce the matching extra field themselves
/// so the two always agree.
pub struct CentralHeaderFields<'a> {
    pub made_by_version: u16,
    pub extraction_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub name: &'a [u8],
    pub extra_field: &'a [u8],
    pub file_comment: &'a [u8],
}

pub fn write_central_directory_header<W: Write>(
    writer: &mut W,
    fields: &CentralHeaderFields,
) -> ZipResult<()> {
    writer.write_all(&CENTRAL_DIRECTORY_MAGIC)?;
    writer.write_u16::<LittleEndian>(fields.made_by_version)?;
    writer.write_u16::<LittleEndian>(fields.extraction_version)?;
    writer.write_u16::<LittleEndian>(fields.flags)?;
    writer.write_u16::<LittleEndian>(fields.compression_method)?;
    writer.write_u16::<LittleEndian>(fields.last_modified_time)?;
    writer.write_u16::<LittleEndian>(fields.last_modified_date)?;
    writer.write_u32::<LittleEndian>(fields.crc32)?;
    writer.write_u32::<LittleEndian>(fields.compressed_size)?;
    writer.write_u32::<LittleEndian>(fields.uncompressed_size)?;
    writer.write_u16::<LittleEndian>(fields.name.len() as u16)?;
    writer.write_u16::<LittleEndian>(fields.extra_field.len() as u16)?;
    writer.write_u16::<LittleEndian>(fields.file_comment.len() as u16)?;
    // disk number start
    writer.write_u16::<LittleEndian>(0)?;
    writer.write_u16::<LittleEndian>(fields.internal_file_attributes)?;
    writer.write_u32::<LittleEndian>(fields.external_file_attributes)?;
    writer.write_u32::<LittleEndian>(fields.header_offset)?;
    writer.write_all(fields.name)?;
    writer.write_all(fields.extra_field)?;
    writer.write_all(fields.file_comment)?;
    Ok(())
}

/// Data from a local file header's fixed prefix.
///
/// Each file's actual contents is preceded by one of these. We only use it
/// to cross-check the central directory and to find where the payload
/// starts; the central directory's values stay authoritative.
#[derive(Debug)]
pub struct LocalFileHeader {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub fn parse(mut header: &[u8]) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        if header.len() < LOCAL_HEADER_FIXED_SIZE || header[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipError::Malformed("Invalid local file header"));
        }
        header = &header[4..];
        let minimum_extract_version = read_u16(&mut header);
        let flags = read_u16(&mut header);
        let compression_method = read_u16(&mut header);
        let last_modified_time = read_u16(&mut header);
        let last_modified_date = read_u16(&mut header);
        let crc32 = read_u32(&mut header);
        let compressed_size = read_u32(&mut header);
        let uncompressed_size = read_u32(&mut header);
        let name_length = read_u16(&mut header);
        let extra_field_length = read_u16(&mut header);

        Ok(Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            name_length,
            extra_field_length,
        })
    }

    /// Offset of the payload relative to the start of this header.
    pub fn payload_offset(&self) -> u64 {
        LOCAL_HEADER_FIXED_SIZE as u64 + self.name_length as u64 + self.extra_field_length as u64
    }
}

/// Field values for an emitted local file header.
pub struct LocalHeaderFields<'a> {
    pub extraction_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: &'a [u8],
    pub extra_field: &'a [u8],
}

pub fn write_local_file_header<W: Write>(
    writer: &mut W,
    fields: &LocalHeaderFields,
) -> ZipResult<()> {
    writer.write_all(&LOCAL_FILE_HEADER_MAGIC)?;
    writer.write_u16::<LittleEndian>(fields.extraction_version)?;
    writer.write_u16::<LittleEndian>(fields.flags)?;
    writer.write_u16::<LittleEndian>(fields.compression_method)?;
    writer.write_u16::<LittleEndian>(fields.last_modified_time)?;
    writer.write_u16::<LittleEndian>(fields.last_modified_date)?;
    writer.write_u32::<LittleEndian>(fields.crc32)?;
    writer.write_u32::<LittleEndian>(fields.compressed_size)?;
    writer.write_u32::<LittleEndian>(fields.uncompressed_size)?;
    writer.write_u16::<LittleEndian>(fields.name.len() as u16)?;
    writer.write_u16::<LittleEndian>(fields.extra_field.len() as u16)?;
    writer.write_all(fields.name)?;
    writer.write_all(fields.extra_field)?;
    Ok(())
}

/// Writes a data descriptor.
///
/// 4.3.9.3 Although not originally assigned a signature, the value
/// 0x08074b50 has commonly been adopted as a signature value. We always
/// write it; many readers require it.
///
/// 4.3.9.2 When compressing files, compressed and uncompressed sizes
/// SHOULD be stored in ZIP64 format (as 8 byte values) when a
/// file's size exceeds 0xFFFFFFFF. However ZIP64 format MAY be used
/// regardless of the size of a file.
pub fn write_data_descriptor<W: Write>(
    writer: &mut W,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    zip64: bool,
) -> ZipResult<()> {
    writer.write_all(&DATA_DESCRIPTOR_MAGIC)?;
    writer.write_u32::<LittleEndian>(crc32)?;
    if zip64 {
        writer.write_u64::<LittleEndian>(compressed_size)?;
        writer.write_u64::<LittleEndian>(uncompressed_size)?;
    } else {
        writer.write_u32::<LittleEndian>(compressed_size as u32)?;
        writer.write_u32::<LittleEndian>(uncompressed_size as u32)?;
    }
    Ok(())
}

/// Unpacks an MS-DOS date/time pair (APPNOTE 4.4.6) into a calendar moment.
///
/// Nonsense dates (month 0, day 32, ...) clamp to the DOS epoch,
/// 1980-01-01 00:00:00.
pub fn parse_msdos(time: u16, date: u16) -> NaiveDateTime {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)
        .and_then(|date| date.and_hms_opt(hours, minutes, seconds))
        .unwrap_or_else(msdos_epoch)
}

/// Packs a calendar moment into an MS-DOS date/time pair, truncating to the
/// format's 2-second precision. Moments outside the representable range
/// (1980 through 2107) clamp to its nearest edge.
pub fn to_msdos(moment: NaiveDateTime) -> (u16, u16) {
    let moment = moment.clamp(
        msdos_epoch(),
        NaiveDate::from_ymd_opt(2107, 12, 31)
            .and_then(|date| date.and_hms_opt(23, 59, 58))
            .expect("valid calendar date"),
    );
    let time = (moment.second() / 2) as u16
        | ((moment.minute() as u16) << 5)
        | ((moment.hour() as u16) << 11);
    let date = moment.day() as u16
        | ((moment.month() as u16) << 5)
        | (((moment.year() - 1980) as u16) << 9);
    (time, date)
}

fn msdos_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("valid calendar date")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn msdos_round_trip() {
        let moment = NaiveDate::from_ymd_opt(2018, 8, 15)
            .unwrap()
            .and_hms_opt(20, 45, 6)
            .unwrap();
        let (time, date) = to_msdos(moment);
        assert_eq!(parse_msdos(time, date), moment);
    }

    #[test]
    fn msdos_truncates_odd_seconds() {
        let moment = NaiveDate::from_ymd_opt(2001, 2, 3)
            .unwrap()
            .and_hms_opt(4, 5, 7)
            .unwrap();
        let (time, date) = to_msdos(moment);
        assert_eq!(parse_msdos(time, date), moment - chrono::Duration::seconds(1));
    }

    #[test]
    fn msdos_clamps_out_of_range() {
        let eighties = NaiveDate::from_ymd_opt(1974, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let (time, date) = to_msdos(eighties);
        assert_eq!(
            parse_msdos(time, date),
            NaiveDate::from_ymd_opt(1980, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
        // A cleared date field decodes as month 0, day 0: nonsense.
        assert_eq!(parse_msdos(0, 0), msdos_epoch());
    }

    #[test]
    fn eocdr_round_trip() {
        let mut bytes = Vec::new();
        write_eocdr(&mut bytes, 3, 147, 1042, b"hello").unwrap();
        assert_eq!(bytes.len(), EOCDR_FIXED_SIZE + 5);

        let posit = find_eocdr(&bytes).unwrap();
        assert_eq!(posit, 0);
        let parsed = EndOfCentralDirectory::parse(&bytes).unwrap();
        assert_eq!(parsed.entries, 3);
        assert_eq!(parsed.central_directory_size, 147);
        assert_eq!(parsed.central_directory_offset, 1042);
        assert_eq!(parsed.file_comment, b"hello");
        assert!(!parsed.needs_zip64());
    }

    #[test]
    fn eocdr_scan_skips_magic_inside_comment() {
        // A comment which itself contains the EOCDR magic.
        let mut comment = b"PK\x05\x06 is the magic".to_vec();
        comment.resize(40, b'!');
        let mut bytes = vec![0xAA; 100];
        write_eocdr(&mut bytes, 1, 46, 30, &comment).unwrap();

        let posit = find_eocdr(&bytes).unwrap();
        assert_eq!(posit, 100);
        let parsed = EndOfCentralDirectory::parse(&bytes[posit..]).unwrap();
        assert_eq!(parsed.file_comment, comment);
    }

    #[test]
    fn eocdr_sentinels_need_zip64() {
        let mut bytes = Vec::new();
        write_eocdr(&mut bytes, 70_000, 147, u64::from(u32::MAX), b"").unwrap();
        let parsed = EndOfCentralDirectory::parse(&bytes).unwrap();
        assert_eq!(parsed.entries, ZIP64_SENTINEL_U16);
        assert_eq!(parsed.central_directory_offset, ZIP64_SENTINEL_U32);
        assert!(parsed.needs_zip64());
    }

    #[test]
    fn zip64_eocdr_round_trip() {
        let mut bytes = Vec::new();
        write_zip64_eocdr(&mut bytes, 70_000, 5_000_000_000, 12_000_000_000).unwrap();
        assert_eq!(bytes.len(), ZIP64_EOCDR_FIXED_SIZE);
        let parsed = Zip64EndOfCentralDirectory::parse(&bytes).unwrap();
        assert_eq!(parsed.entries, 70_000);
        assert_eq!(parsed.central_directory_size, 5_000_000_000);
        assert_eq!(parsed.central_directory_offset, 12_000_000_000);

        let mut locator = Vec::new();
        write_zip64_eocdr_locator(&mut locator, 12_005_000_000).unwrap();
        assert_eq!(locator.len(), ZIP64_EOCDR_LOCATOR_SIZE);
        let parsed = Zip64EndOfCentralDirectoryLocator::parse(&locator).unwrap();
        assert_eq!(parsed.zip64_eocdr_offset, 12_005_000_000);
        assert_eq!(parsed.disks, 1);
    }
}
