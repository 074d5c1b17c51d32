//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Rendmail.
//
// Rendmail is free software: you can redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Rendmail is distributed in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Rendmail. If not, see <http://www.gnu.org/licenses/>.

//! RFC 2047 "encoded word" decoding and ASCII transliteration of header
//! values.

use std::borrow::Cow;
use std::str;

use encoding_rs::WINDOWS_1252;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Converts a raw header value to 7-bit ASCII.
///
/// Any RFC 2047 encoded words are decoded first. Diacritics are then removed
/// (so "é" becomes "e"), and whatever is still not printable ASCII or a tab
/// is dropped.
///
/// Returns `None` if the value uses a charset we don't support. Callers must
/// not fall back to some partially-decoded form in that case.
pub fn decode_header_value(raw: &[u8]) -> Option<String> {
    let decoded = ew_decode_all(raw)?;
    Some(
        decoded
            .chars()
            .nfd()
            .filter(|&ch| !is_combining_mark(ch))
            .nfc()
            // RFC 5322 2.2: A field body may be composed of printable
            // US-ASCII characters as well as the space and horizontal tab
            // characters.
            .filter(|&ch| '\t' == ch || (' '..='~').contains(&ch))
            .collect(),
    )
}

/// Decodes every encoded word in `raw`.
///
/// Encoded words are recognised anywhere, not only when delimited by
/// whitespace, since plenty of agents put them directly inside parentheses or
/// quotes. Linear whitespace between two adjacent encoded words is deleted as
/// RFC 2047 6.2 requires. Something that looks like an encoded word but has a
/// bad transfer encoding is passed through as-is.
///
/// Returns `None` if an encoded word names an unsupported charset.
fn ew_decode_all(raw: &[u8]) -> Option<Cow<'_, str>> {
    let first = match find(raw, b"=?") {
        Some(first) => first,
        None => return Some(String::from_utf8_lossy(raw)),
    };

    let mut decoded = String::from_utf8_lossy(&raw[..first]).into_owned();
    let mut rest = &raw[first..];
    let mut between_words = false;

    while let Some(start) = find(rest, b"=?") {
        let word = match split_encoded_word(&rest[start..]) {
            Some(word) => word,
            None => break,
        };

        match decode_xfer(word.transfer_encoding, word.text) {
            Some(content) => {
                let gap = &rest[..start];
                if !between_words
                    || gap.iter().any(|b| !b" \t\r\n".contains(b))
                {
                    decoded.push_str(&String::from_utf8_lossy(gap));
                }

                decoded.push_str(&decode_charset(word.charset, &content)?);
                rest = &rest[start + word.len..];
                between_words = true;
            }
            None => {
                // Not really an encoded word; keep the "=?" and look for
                // another one after it.
                decoded
                    .push_str(&String::from_utf8_lossy(&rest[..start + 2]));
                rest = &rest[start + 2..];
                between_words = false;
            }
        }
    }

    decoded.push_str(&String::from_utf8_lossy(rest));
    Some(Cow::Owned(decoded))
}

#[derive(Debug)]
struct EncodedWord<'a> {
    charset: &'a [u8],
    transfer_encoding: u8,
    text: &'a [u8],
    /// The length of the whole word, from `=?` to `?=` inclusive.
    len: usize,
}

/// Splits `=?charset?X?text?=` at the start of `s` into its components.
fn split_encoded_word(s: &[u8]) -> Option<EncodedWord<'_>> {
    let after_open = s.strip_prefix(b"=?")?;
    let charset_len = after_open.iter().position(|&b| b'?' == b)?;
    let charset = &after_open[..charset_len];

    let after_charset = &after_open[charset_len + 1..];
    // Transfer encoding, '?', then at least room for the closing "?="
    if after_charset.len() < 4 || b'?' != after_charset[1] {
        return None;
    }

    let transfer_encoding = after_charset[0];
    let after_xfer = &after_charset[2..];
    let text_len = find(after_xfer, b"?=")?;

    Some(EncodedWord {
        charset,
        transfer_encoding,
        text: &after_xfer[..text_len],
        len: 2 + charset_len + 1 + 2 + text_len + 2,
    })
}

fn decode_xfer(xfer: u8, text: &[u8]) -> Option<Vec<u8>> {
    match xfer {
        b'q' | b'Q' => q_decode(text),
        // The base64 crate tolerates missing padding; RFC 2047 does not
        b'b' | b'B' if 0 == text.len() % 4 => base64::decode(text).ok(),
        _ => None,
    }
}

/// Decodes the "Q" encoding from RFC 2047 4.2.
///
/// This is stricter than general quoted-printable: an invalid escape or a
/// character that may not appear in an encoded word makes the whole word
/// invalid.
fn q_decode(text: &[u8]) -> Option<Vec<u8>> {
    let mut decoded = Vec::with_capacity(text.len());
    let mut bytes = text.iter().copied();
    while let Some(b) = bytes.next() {
        match b {
            // _ stands for ASCII space regardless of charset
            b'_' => decoded.push(b' '),
            b'=' => {
                let hi = hex_value(bytes.next()?)?;
                let lo = hex_value(bytes.next()?)?;
                decoded.push(hi << 4 | lo);
            }
            b' '..=b'~' | b'\t' | b'\r' | b'\n' => decoded.push(b),
            _ => return None,
        }
    }

    Some(decoded)
}

pub(super) fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

fn decode_charset<'a>(
    charset: &[u8],
    content: &'a [u8],
) -> Option<Cow<'a, str>> {
    let charset = str::from_utf8(charset).ok()?;
    if "utf-8".eq_ignore_ascii_case(charset) {
        Some(String::from_utf8_lossy(content))
    } else if "iso-8859-1".eq_ignore_ascii_case(charset) {
        // encoding-rs treats ISO-8859-1 as windows-1252 per WHATWG, which
        // is wrong for 0x80..0x9F, so map bytes straight to code points.
        Some(encoding_rs::mem::decode_latin1(content))
    } else if "us-ascii".eq_ignore_ascii_case(charset) {
        Some(Cow::Owned(
            content
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                .collect(),
        ))
    } else if "windows-1252".eq_ignore_ascii_case(charset) {
        Some(WINDOWS_1252.decode_without_bom_handling(content).0)
    } else {
        None
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
