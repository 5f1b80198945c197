//! Query-string and form body splitting.
//!
//! Splitting is zero-copy; percent-decoding happens once, when a handler
//! asks for decoded pairs.

use crate::errors::ErrorKind;
use memchr::memchr;
use percent_encoding::percent_decode;

/// Splits `key=value&…` data into raw pairs, preserving order and
/// duplicates.
///
/// A missing `=` yields an empty value, a leading `=` an empty key, and
/// empty segments between `&`s are skipped. A leading `?` is tolerated.
pub(crate) fn split_pairs(data: &[u8]) -> Vec<(&[u8], &[u8])> {
    let data = match data.first() {
        Some(b'?') => &data[1..],
        _ => data,
    };

    let mut pairs = Vec::new();
    let mut start = 0;
    while start < data.len() {
        let end = memchr(b'&', &data[start..])
            .map(|pos| start + pos)
            .unwrap_or(data.len());

        if end > start {
            let split = memchr(b'=', &data[start..end])
                .map(|pos| start + pos)
                .unwrap_or(end);

            let key = &data[start..split];
            let value = match split < end {
                true => &data[split + 1..end],
                false => b"" as &[u8],
            };
            pairs.push((key, value));
        }

        start = end + 1;
    }

    pairs
}

/// Percent-decodes one form component into UTF-8, with `+` meaning space.
pub(crate) fn decode_component(raw: &[u8], plus_as_space: bool) -> Result<String, ErrorKind> {
    let raw: Vec<u8> = match plus_as_space {
        true => raw
            .iter()
            .map(|&b| if b == b'+' { b' ' } else { b })
            .collect(),
        false => raw.to_vec(),
    };

    let decoded = percent_decode(&raw).collect::<Vec<u8>>();
    simdutf8::basic::from_utf8(&decoded)
        .map(str::to_owned)
        .map_err(|_| ErrorKind::BadBodyParse)
}
