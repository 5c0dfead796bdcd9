//! Decoding and encoding of file names and comments.
//!
//! ZIP stores names and comments as raw bytes. If general purpose bit 11
//! is set they're UTF-8; otherwise they're CP437 — unless an Info-ZIP
//! Unicode extra field is present and its embedded CRC-32 still matches the
//! classic bytes, in which case the field's UTF-8 content wins. (A stale
//! CRC means some tool renamed the entry without touching the extra field,
//! so the field is ignored.)

use std::borrow::Cow;

use codepage_437::{BorrowFromCp437, ToCp437, CP437_CONTROL};
use log::warn;

use crate::extra::UnicodeField;
use crate::result::*;

/// Decodes classic name/comment bytes, honoring bit 11 and any Unicode
/// extra field that passes its CRC gate.
pub fn decode(raw: &[u8], utf8_flag: bool, unicode: Option<UnicodeField<'_>>) -> ZipResult<String> {
    if utf8_flag {
        return Ok(std::str::from_utf8(raw).map_err(ZipError::Encoding)?.to_owned());
    }
    if let Some(field) = unicode {
        if field.crc32 == crc32fast::hash(raw) {
            return Ok(std::str::from_utf8(field.utf8)
                .map_err(ZipError::Encoding)?
                .to_owned());
        }
        warn!("Ignoring Unicode extra field with stale CRC");
    }
    let cow: Cow<str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
    Ok(cow.into_owned())
}

/// Text encoded for storage, plus whether it needs bit 11.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedText {
    pub bytes: Vec<u8>,
    pub utf8: bool,
}

/// Encodes text for storage.
///
/// With `force_utf8`, bytes are UTF-8 and the caller must set bit 11.
/// Otherwise the text must fit CP437; code points outside it are an error
/// rather than a silent escalation, so archives stay byte-stable unless the
/// caller opts in.
pub fn encode(text: &str, force_utf8: bool) -> ZipResult<EncodedText> {
    if force_utf8 {
        return Ok(EncodedText {
            bytes: text.as_bytes().to_vec(),
            utf8: true,
        });
    }
    match text.to_cp437(&CP437_CONTROL) {
        Ok(bytes) => Ok(EncodedText {
            bytes: bytes.into_owned(),
            utf8: false,
        }),
        Err(_) => Err(ZipError::EncodingUnsupported(text.to_owned())),
    }
}
