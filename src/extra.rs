//! Parsing and emission of header extra fields.
//!
//! 4.5.1 In order to allow different programs and different types
//! of information to be stored in the 'extra' field in .ZIP
//! files, the following structure MUST be used for all
//! programs storing data in this field:
//!
//! ```text
//! header1+data1 + header2+data2 . . .
//! ```
//!
//! Each header MUST consist of:
//!
//! ```text
//! Header ID - 2 bytes
//! Data Size - 2 bytes
//! ```
//!
//! We understand the tags that matter for sizes and names — Zip64 extended
//! information, the extended timestamp, and the Info-ZIP Unicode path and
//! comment fields. Everything else is carried through verbatim.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::result::*;
use crate::spec::{read_u16, read_u32, read_u64, ZIP64_SENTINEL_U16, ZIP64_SENTINEL_U32};

/// Zip64 extended information extra field
pub const ZIP64_TAG: u16 = 0x0001;
/// Extended timestamp extra field (Info-ZIP "UT")
pub const EXTENDED_TIMESTAMP_TAG: u16 = 0x5455;
/// Info-ZIP Unicode comment extra field
pub const UNICODE_COMMENT_TAG: u16 = 0x6375;
/// Info-ZIP Unicode path extra field
pub const UNICODE_PATH_TAG: u16 = 0x7075;

/// One tag and its payload, exactly as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawExtraField<'a> {
    pub tag: u16,
    pub data: &'a [u8],
}

/// Iterates the tag/length/data triples of an extra-field blob.
pub fn fields(blob: &[u8]) -> ExtraFields<'_> {
    ExtraFields { blob, failed: false }
}

pub struct ExtraFields<'a> {
    blob: &'a [u8],
    failed: bool,
}

impl<'a> Iterator for ExtraFields<'a> {
    type Item = ZipResult<RawExtraField<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.blob.is_empty() {
            return None;
        }
        if self.blob.len() < 4 {
            self.failed = true;
            return Some(Err(ZipError::Malformed("Extra field header is cut short")));
        }
        let tag = read_u16(&mut self.blob);
        let length = read_u16(&mut self.blob) as usize;
        if self.blob.len() < length {
            self.failed = true;
            return Some(Err(ZipError::Malformed("Extra field data is cut short")));
        }
        let (data, rest) = self.blob.split_at(length);
        self.blob = rest;
        Some(Ok(RawExtraField { tag, data }))
    }
}

/// Finds the payload of the first field with the given tag, if any.
pub fn find(blob: &[u8], tag: u16) -> ZipResult<Option<&[u8]>> {
    for field in fields(blob) {
        let field = field?;
        if field.tag == tag {
            return Ok(Some(field.data));
        }
    }
    Ok(None)
}

/// Re-serializes an extra-field blob with all fields of the given tag
/// removed. The surviving fields are preserved byte-for-byte.
pub fn strip_tag(blob: &[u8], tag: u16) -> ZipResult<Vec<u8>> {
    let mut out = Vec::with_capacity(blob.len());
    for field in fields(blob) {
        let field = field?;
        if field.tag != tag {
            append_field(&mut out, field.tag, field.data)?;
        }
    }
    Ok(out)
}

/// Appends one tag/length/data triple to a blob under construction.
pub fn append_field<W: Write>(writer: &mut W, tag: u16, data: &[u8]) -> ZipResult<()> {
    writer.write_u16::<LittleEndian>(tag)?;
    writer.write_u16::<LittleEndian>(data.len() as u16)?;
    writer.write_all(data)?;
    Ok(())
}

/// The classic 32-bit fields a Zip64 extra field may override.
/// Each leg of the extra field is present only when the matching classic
/// field carries the sentinel value.
#[derive(Debug, Clone, Copy)]
pub struct Zip64Classic {
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    pub header_offset: u32,
    pub disk_number: u16,
}

/// Values recovered from a Zip64 extended information field.
#[derive(Debug, Default, Clone, Copy)]
pub struct Zip64Extra {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub header_offset: Option<u64>,
    pub disk_number: Option<u32>,
}

/// Parses the Zip64 extended information field against the classic values.
///
/// 4.5.3: This entry in the Local header MUST include BOTH original
/// and compressed file size fields. If encrypting the central directory
/// [...] the fields [appear] only if the corresponding Local or Central
/// directory record field is set to 0xFFFF or 0xFFFFFFFF.
pub fn parse_zip64(mut data: &[u8], classic: Zip64Classic) -> ZipResult<Zip64Extra> {
    let mut parsed = Zip64Extra::default();
    let mut take_u64 = |data: &mut &[u8]| -> ZipResult<u64> {
        if data.len() < 8 {
            return Err(ZipError::Malformed("Zip64 extra field is cut short"));
        }
        Ok(read_u64(data))
    };
    if classic.uncompressed_size == ZIP64_SENTINEL_U32 {
        parsed.uncompressed_size = Some(take_u64(&mut data)?);
    }
    if classic.compressed_size == ZIP64_SENTINEL_U32 {
        parsed.compressed_size = Some(take_u64(&mut data)?);
    }
    if classic.header_offset == ZIP64_SENTINEL_U32 {
        parsed.header_offset = Some(take_u64(&mut data)?);
    }
    if classic.disk_number == ZIP64_SENTINEL_U16 {
        if data.len() < 4 {
            return Err(ZipError::Malformed("Zip64 extra field is cut short"));
        }
        parsed.disk_number = Some(read_u32(&mut data));
    }
    if !data.is_empty() {
        return Err(ZipError::Malformed(
            "Zip64 extra field is longer than its sentinels call for",
        ));
    }
    Ok(parsed)
}

/// Builds a Zip64 extended information field carrying the given legs,
/// tag and length included. Call with at least one `Some`.
pub fn zip64_field(
    uncompressed_size: Option<u64>,
    compressed_size: Option<u64>,
    header_offset: Option<u64>,
) -> ZipResult<Vec<u8>> {
    let mut data = Vec::with_capacity(24);
    for leg in [uncompressed_size, compressed_size, header_offset]
        .iter()
        .flatten()
    {
        data.write_u64::<LittleEndian>(*leg)?;
    }
    let mut field = Vec::with_capacity(4 + data.len());
    append_field(&mut field, ZIP64_TAG, &data)?;
    Ok(field)
}

/// Times recovered from an extended timestamp field, as Unix epoch seconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedTimestamp {
    pub mtime: Option<i64>,
    pub atime: Option<i64>,
    pub ctime: Option<i64>,
}

/// Parses an extended timestamp ("UT") field.
///
/// The flags byte advertises which times the *local* variant carries;
/// the central variant carries the mtime value only, whatever the flags
/// claim. Times are 32-bit signed Unix seconds.
pub fn parse_extended_timestamp(mut data: &[u8], in_local_header: bool) -> ZipResult<ExtendedTimestamp> {
    if data.is_empty() {
        return Err(ZipError::Malformed("Extended timestamp field is empty"));
    }
    let flags = data[0];
    data = &data[1..];
    let mut take_time = |data: &mut &[u8]| -> ZipResult<i64> {
        if data.len() < 4 {
            return Err(ZipError::Malformed("Extended timestamp field is cut short"));
        }
        Ok(read_u32(data) as i32 as i64)
    };
    let mut parsed = ExtendedTimestamp::default();
    if flags & 1 != 0 {
        parsed.mtime = Some(take_time(&mut data)?);
    }
    if in_local_header {
        if flags & 2 != 0 {
            parsed.atime = Some(take_time(&mut data)?);
        }
        if flags & 4 != 0 {
            parsed.ctime = Some(take_time(&mut data)?);
        }
    }
    Ok(parsed)
}

/// Builds an extended timestamp field, tag and length included.
/// Returns `None` when no time is given.
///
/// The central directory variant stores the mtime value only, but keeps
/// the full flags byte so readers know what the local header carries.
pub fn extended_timestamp_field(
    times: ExtendedTimestamp,
    for_local_header: bool,
) -> ZipResult<Option<Vec<u8>>> {
    let flags = times.mtime.map_or(0, |_| 1u8)
        | times.atime.map_or(0, |_| 2u8)
        | times.ctime.map_or(0, |_| 4u8);
    if flags == 0 {
        return Ok(None);
    }
    let mut data = vec![flags];
    let stored = if for_local_header {
        [times.mtime, times.atime, times.ctime]
    } else {
        [times.mtime, None, None]
    };
    for time in stored.iter().flatten() {
        let clamped = (*time).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        data.write_u32::<LittleEndian>(clamped as u32)?;
    }
    let mut field = Vec::with_capacity(4 + data.len());
    append_field(&mut field, EXTENDED_TIMESTAMP_TAG, &data)?;
    Ok(Some(field))
}

/// A parsed Info-ZIP Unicode path or comment field.
#[derive(Debug, Clone, Copy)]
pub struct UnicodeField<'a> {
    /// CRC-32 of the classic (CP437 or otherwise) bytes this field overrides.
    pub crc32: u32,
    /// The replacement text, UTF-8.
    pub utf8: &'a [u8],
}

/// Parses a Unicode path/comment field. Versions other than 1 are ignored
/// (`None`), per the Info-ZIP note that readers should fall back to the
/// classic name when they don't understand the field.
pub fn parse_unicode(mut data: &[u8]) -> ZipResult<Option<UnicodeField<'_>>> {
    if data.len() < 5 {
        return Err(ZipError::Malformed("Unicode extra field is cut short"));
    }
    let version = data[0];
    data = &data[1..];
    if version != 1 {
        return Ok(None);
    }
    let crc32 = read_u32(&mut data);
    Ok(Some(UnicodeField { crc32, utf8: data }))
}

/// Builds a Unicode path or comment field (pass the matching tag),
/// tag and length included.
pub fn unicode_field(tag: u16, classic_bytes: &[u8], utf8: &str) -> ZipResult<Vec<u8>> {
    let mut data = Vec::with_capacity(5 + utf8.len());
    data.push(1u8);
    data.write_u32::<LittleEndian>(crc32fast::hash(classic_bytes))?;
    data.extend_from_slice(utf8.as_bytes());
    let mut field = Vec::with_capacity(4 + data.len());
    append_field(&mut field, tag, &data)?;
    Ok(field)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tokenizes_and_preserves_unknown_tags() {
        let mut blob = Vec::new();
        append_field(&mut blob, 0xCAFE, b"mystery").unwrap();
        append_field(&mut blob, EXTENDED_TIMESTAMP_TAG, &[1, 0, 0, 0, 0]).unwrap();

        let parsed: Vec<_> = fields(&blob).collect::<ZipResult<_>>().unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].tag, 0xCAFE);
        assert_eq!(parsed[0].data, b"mystery");

        // Stripping one tag must keep the others byte-identical.
        let stripped = strip_tag(&blob, EXTENDED_TIMESTAMP_TAG).unwrap();
        assert_eq!(stripped, &blob[..4 + 7]);
        assert_eq!(strip_tag(&blob, 0x1234).unwrap(), blob);
    }

    #[test]
    fn truncated_field_is_malformed() {
        let blob = [0x01, 0x00, 0x08, 0x00, 0xAA]; // claims 8 bytes, has 1
        let result: ZipResult<Vec<_>> = fields(&blob).collect();
        assert!(matches!(result, Err(ZipError::Malformed(_))));
    }

    #[test]
    fn zip64_legs_follow_the_sentinels() {
        let field = zip64_field(Some(5_000_000_000), None, Some(77)).unwrap();
        let data = find(&field, ZIP64_TAG).unwrap().unwrap();

        let classic = Zip64Classic {
            uncompressed_size: ZIP64_SENTINEL_U32,
            compressed_size: 1234,
            header_offset: ZIP64_SENTINEL_U32,
            disk_number: 0,
        };
        let parsed = parse_zip64(data, classic).unwrap();
        assert_eq!(parsed.uncompressed_size, Some(5_000_000_000));
        assert_eq!(parsed.compressed_size, None);
        assert_eq!(parsed.header_offset, Some(77));

        // The same bytes against mismatched sentinels must not parse.
        let all_sentinels = Zip64Classic {
            uncompressed_size: ZIP64_SENTINEL_U32,
            compressed_size: ZIP64_SENTINEL_U32,
            header_offset: ZIP64_SENTINEL_U32,
            disk_number: 0,
        };
        assert!(parse_zip64(data, all_sentinels).is_err());
    }

    #[test]
    fn extended_timestamp_central_stores_mtime_only() {
        let times = ExtendedTimestamp {
            mtime: Some(1_600_000_000),
            atime: Some(1_600_000_001),
            ctime: None,
        };
        let local = extended_timestamp_field(times, true).unwrap().unwrap();
        let central = extended_timestamp_field(times, false).unwrap().unwrap();
        // flags + two times vs. flags + one time
        assert_eq!(local.len(), 4 + 1 + 8);
        assert_eq!(central.len(), 4 + 1 + 4);

        let parsed = parse_extended_timestamp(find(&local, EXTENDED_TIMESTAMP_TAG).unwrap().unwrap(), true).unwrap();
        assert_eq!(parsed.mtime, Some(1_600_000_000));
        assert_eq!(parsed.atime, Some(1_600_000_001));

        let parsed = parse_extended_timestamp(find(&central, EXTENDED_TIMESTAMP_TAG).unwrap().unwrap(), false).unwrap();
        assert_eq!(parsed.mtime, Some(1_600_000_000));
        assert_eq!(parsed.atime, None);
    }

    #[test]
    fn unicode_field_round_trip() {
        let classic = b"EURO?.txt";
        let field = unicode_field(UNICODE_PATH_TAG, classic, "EURO€.txt").unwrap();
        let data = find(&field, UNICODE_PATH_TAG).unwrap().unwrap();
        let parsed = parse_unicode(data).unwrap().unwrap();
        assert_eq!(parsed.crc32, crc32fast::hash(classic));
        assert_eq!(parsed.utf8, "EURO€.txt".as_bytes());

        // Unknown versions are ignored rather than rejected.
        let mut unversioned = data.to_vec();
        unversioned[0] = 2;
        assert!(parse_unicode(&unversioned).unwrap().is_none());
    }
}
