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

//! Message fixtures shared by the tests.
//!
//! All of these use UNIX line endings; tests that need DOS line endings
//! convert them with `to_crlf()`.

/// A single-part message with a folded `Received` field, an RFC 2047
/// `Subject`, and significant trailing whitespace in the body.
pub static SIMPLE: &[u8] = include_bytes!("simple.eml");

/// A `multipart/mixed` message with a text part and a PNG attachment, plus a
/// preamble and an epilogue.
pub static MULTIPART: &[u8] = include_bytes!("multipart.eml");

/// `MULTIPART` after deleting `image/*` at 2021-02-18T21:54:42Z.
pub static MULTIPART_DELETED: &[u8] = include_bytes!("multipart-deleted.eml");

/// A `multipart/mixed` containing a `multipart/alternative`, a PDF
/// attachment, and a forwarded message which itself claims to be an image.
pub static NESTED: &[u8] = include_bytes!("nested.eml");

/// `NESTED` after deleting `application/*` and `image/*` at
/// 2021-02-18T21:54:42Z.
pub static NESTED_DELETED: &[u8] = include_bytes!("nested-deleted.eml");

/// A multipart message which ends in the middle of a JPEG attachment, without
/// a closing delimiter.
pub static TRUNCATED: &[u8] = include_bytes!("truncated.eml");

pub fn to_crlf(message: &[u8]) -> Vec<u8> {
    let mut converted = Vec::with_capacity(message.len() * 2);
    for &b in message {
        if b'\n' == b {
            converted.push(b'\r');
        }
        converted.push(b);
    }
    converted
}
