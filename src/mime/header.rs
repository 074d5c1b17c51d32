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

//! Utilities for working with individual RFC 5322 header fields.

use std::borrow::Cow;
use std::collections::BTreeMap;

use lazy_static::lazy_static;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take, take_while, take_while1},
    character::complete::char,
    combinator::{all_consuming, map, opt, verify},
    multi::{fold_many0, many0},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use regex::Regex;

use super::encoded_word::hex_value;

/// The maximum length of a line produced by `fold_header_field`, excluding
/// the line ending.
///
/// RFC 5322 2.1.1 says that lines SHOULD be no more than 78 characters.
pub const MAX_FOLDED_LINE: usize = 78;

/// Splits a logical header line, such as `from: "Bob" <bob@example.org>`,
/// into its canonicalised name and its value.
///
/// Whitespace at the start of the value is dropped. Returns `None` if the line
/// has no colon, which typically happens when the blank line between the
/// header and the body is missing.
pub fn parse_header_field(line: &[u8]) -> Option<(Cow<'_, str>, &[u8])> {
    let colon = line.iter().position(|&b| b':' == b)?;
    let name = canonical_name(&line[..colon]);
    let value = &line[colon + 1..];
    let start = value
        .iter()
        .position(|&b| b' ' != b && b'\t' != b)
        .unwrap_or(value.len());

    Some((name, &value[start..]))
}

/// Returns the canonical form of a header field name: the first letter and
/// any letter following a hyphen are upper-case, everything else lower-case.
///
/// For example, `content-TYPE` becomes `Content-Type`. Names that contain
/// anything other than RFC 7230 token characters (such as a space before the
/// colon) are returned unchanged, which means they never match a well-known
/// field name.
pub fn canonical_name(name: &[u8]) -> Cow<'_, str> {
    if name.is_empty() || !name.iter().copied().all(is_field_name_byte) {
        return String::from_utf8_lossy(name);
    }

    let mut upper = true;
    let canonical = name
        .iter()
        .map(|&b| {
            let c = if upper {
                b.to_ascii_uppercase()
            } else {
                b.to_ascii_lowercase()
            };
            upper = b'-' == b;
            char::from(c)
        })
        .collect::<String>();
    Cow::Owned(canonical)
}

fn is_field_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// A parsed `Content-Type` header value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    /// The lower-case media type, e.g. `multipart/mixed`.
    pub media_type: String,
    /// The parameters, keyed by lower-case name.
    pub params: BTreeMap<String, String>,
}

lazy_static! {
    /// RFC 2045 5.2, "Content-Type Defaults":
    ///
    ///   Default RFC 822 messages without a MIME Content-Type header are taken
    ///   by this protocol to be plain text in the US-ASCII character set,
    ///   which can be explicitly specified as:
    ///
    ///     Content-type: text/plain; charset=us-ascii
    pub static ref DEFAULT_CONTENT_TYPE: ContentType = ContentType {
        media_type: "text/plain".to_owned(),
        params: vec![("charset".to_owned(), "us-ascii".to_owned())]
            .into_iter()
            .collect(),
    };
}

impl ContentType {
    pub fn is_multipart(&self) -> bool {
        self.media_type.starts_with("multipart/")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Parses the value of a `Content-Type` header field.
///
/// Returns `None` if the value is syntactically invalid; RFC 2045 5.2
/// recommends that `DEFAULT_CONTENT_TYPE` be assumed in that case.
///
/// Parameters split into RFC 2231 sections (`boundary*0`, `boundary*1*`, ...)
/// or given as extended values (`boundary*=us-ascii''abc`) are reassembled
/// under their base name, replacing any plain parameter of the same name.
pub fn parse_content_type(value: &[u8]) -> Option<ContentType> {
    let (_, ((typ, subtype), raw_params)) = all_consuming(terminated(
        pair(media_type, many0(parameter)),
        // A trailing semicolon is not an error
        tuple((ws, opt(char(';')), ws)),
    ))(value)
    .ok()?;

    let mut media_type = String::from_utf8_lossy(typ).to_ascii_lowercase();
    if let Some(subtype) = subtype {
        media_type.push('/');
        media_type
            .push_str(&String::from_utf8_lossy(subtype).to_ascii_lowercase());
    }

    let mut params = BTreeMap::new();
    // RFC 2231 sections, keyed by base name and then by full name
    let mut sections = BTreeMap::<String, BTreeMap<String, String>>::new();
    for (name, value) in raw_params {
        let name = String::from_utf8_lossy(name).to_ascii_lowercase();
        let value = String::from_utf8_lossy(&value).into_owned();
        let dst = match name.find('*') {
            Some(star) => sections.entry(name[..star].to_owned()).or_default(),
            None => &mut params,
        };
        // Duplicate parameters are tolerated as long as they agree
        match dst.get(&name) {
            Some(existing) if *existing != value => return None,
            _ => {
                dst.insert(name, value);
            }
        }
    }

    for (base, sections) in sections {
        if let Some(value) = join_sections(&base, &sections) {
            params.insert(base, value);
        }
    }

    Some(ContentType { media_type, params })
}

/// Reassembles the RFC 2231 parameter `base` from `sections`.
///
/// A lone extended value (`base*`) wins outright. Otherwise numbered sections
/// are concatenated from `base*0` until the first missing number. Only the
/// first section may carry a charset; an extended section which cannot be
/// decoded contributes nothing. Returns `None` if no section was usable.
fn join_sections(
    base: &str,
    sections: &BTreeMap<String, String>,
) -> Option<String> {
    if let Some(value) = sections.get(&format!("{}*", base)) {
        return decode_extended_value(value)
            .map(|v| String::from_utf8_lossy(&v).into_owned());
    }

    let mut joined = Vec::<u8>::new();
    let mut found = false;
    for n in 0u32.. {
        let plain = format!("{}*{}", base, n);
        if let Some(value) = sections.get(&plain) {
            joined.extend_from_slice(value.as_bytes());
        } else if let Some(value) = sections.get(&format!("{}*", plain)) {
            let decoded = if 0 == n {
                decode_extended_value(value)
            } else {
                percent_decode(value)
            };
            joined.extend(decoded.unwrap_or_default());
        } else {
            break;
        }

        found = true;
    }

    if found {
        Some(String::from_utf8_lossy(&joined).into_owned())
    } else {
        None
    }
}

/// Decodes an RFC 2231 extended value, `charset'language'percent-encoded`.
///
/// Only UTF-8 and its US-ASCII subset are understood.
fn decode_extended_value(value: &str) -> Option<Vec<u8>> {
    let mut parts = value.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let text = parts.next()?;

    if "utf-8".eq_ignore_ascii_case(charset)
        || "us-ascii".eq_ignore_ascii_case(charset)
    {
        percent_decode(text)
    } else {
        None
    }
}

fn percent_decode(text: &str) -> Option<Vec<u8>> {
    let mut decoded = Vec::with_capacity(text.len());
    let mut bytes = text.bytes();
    while let Some(b) = bytes.next() {
        if b'%' == b {
            let hi = hex_value(bytes.next()?)?;
            let lo = hex_value(bytes.next()?)?;
            decoded.push(hi << 4 | lo);
        } else {
            decoded.push(b);
        }
    }

    Some(decoded)
}

fn is_tspecial(b: u8) -> bool {
    b"()<>@,;:\\\"/[]?=".contains(&b)
}

// RFC 2045 5.1 "token"
fn is_token_byte(b: u8) -> bool {
    b > b' ' && b < 0x7f && !is_tspecial(b)
}

fn token(i: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(is_token_byte)(i)
}

fn ws(i: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(|b: u8| b.is_ascii_whitespace())(i)
}

// type "/" subtype. A bare type is tolerated.
fn media_type(i: &[u8]) -> IResult<&[u8], (&[u8], Option<&[u8]>)> {
    delimited(ws, pair(token, opt(preceded(char('/'), token))), ws)(i)
}

// RFC 2045 5.1 "quoted-string". A backslash only escapes tspecials; before
// anything else it is taken literally.
fn quoted_string(i: &[u8]) -> IResult<&[u8], Cow<'_, [u8]>> {
    map(
        delimited(
            char('"'),
            fold_many0(
                alt((
                    is_not("\"\\\r\n"),
                    preceded(
                        char('\\'),
                        verify(take(1usize), |b: &[u8]| is_tspecial(b[0])),
                    ),
                    tag("\\"),
                )),
                Vec::new(),
                |mut acc: Vec<u8>, item: &[u8]| {
                    acc.extend_from_slice(item);
                    acc
                },
            ),
            char('"'),
        ),
        Cow::Owned,
    )(i)
}

fn parameter_value(i: &[u8]) -> IResult<&[u8], Cow<'_, [u8]>> {
    alt((quoted_string, map(token, Cow::Borrowed)))(i)
}

// ";" attribute "=" value
fn parameter(i: &[u8]) -> IResult<&[u8], (&[u8], Cow<'_, [u8]>)> {
    preceded(
        tuple((ws, char(';'), ws)),
        separated_pair(token, tuple((ws, char('='), ws)), parameter_value),
    )(i)
}

lazy_static! {
    // Any amount of linear whitespace followed by at least one
    // non-whitespace character.
    static ref FOLD_TOKEN: Regex = Regex::new(r"[ \t]*[^ \t]+").unwrap();
}

/// Wraps the logical header line `unfolded` across multiple physical lines,
/// each terminated by `line_ending`. See RFC 5322 2.2.3.
///
/// Each word keeps the whitespace that preceded it, so a word that starts a
/// new line supplies the folding whitespace itself. Words are added to the
/// current line as long as it stays within `MAX_FOLDED_LINE` characters; a
/// single word longer than that gets a line to itself.
///
/// An empty or all-whitespace `unfolded` produces no lines at all.
pub fn fold_header_field(unfolded: &str, line_ending: &str) -> Vec<String> {
    let mut folded: Vec<String> = Vec::new();
    for word in FOLD_TOKEN.find_iter(unfolded) {
        let word = word.as_str();
        match folded.last_mut() {
            Some(last) if last.len() + word.len() <= MAX_FOLDED_LINE => {
                last.push_str(word);
            }
            Some(last) => {
                last.push_str(line_ending);
                folded.push(word.to_owned());
            }
            None => folded.push(word.to_owned()),
        }
    }

    if let Some(last) = folded.last_mut() {
        last.push_str(line_ending);
    }

    folded
}
