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

//! Line-oriented reading of raw message data.
//!
//! Unlike a typical RFC 5322 reader, nothing that is read is ever thrown
//! away: every physical line is handed back exactly as it appeared in the
//! input, line ending included, so that callers can reproduce it bit-for-bit.

use std::io::{self, BufRead, BufReader, Read, Write};

/// A logical header line as produced by `LineReader::read_folded_line()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FoldedLine {
    /// The original physical lines, including their line endings.
    pub folded: Vec<Vec<u8>>,
    /// The logical line with the line endings (but nothing else) removed.
    pub unfolded: Vec<u8>,
}

#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        LineReader {
            inner: BufReader::new(inner),
        }
    }

    #[cfg(test)]
    fn with_capacity(capacity: usize, inner: R) -> Self {
        LineReader {
            inner: BufReader::with_capacity(capacity, inner),
        }
    }

    /// Reads a single LF-terminated line, including the LF.
    ///
    /// If the input ends with a partial line, that line is returned without
    /// any terminator. Returns `None` once nothing more is left.
    pub fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        // RFC 5322 limits lines to 998 characters, but the point is to pass
        // through whatever we are given, so there is no limit here.
        let mut line = Vec::new();
        if 0 == self.inner.read_until(b'\n', &mut line)? {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }

    /// Reads a possibly-folded header line.
    ///
    /// See RFC 5322 2.2.3, "Long Header Fields". A physical line is a
    /// continuation of the logical line before it if it starts with a space
    /// or tab. Only one byte of the following line is ever peeked at to make
    /// that decision; a line which is not a continuation is left unread.
    ///
    /// A blank line is returned on its own with an empty unfolded value.
    pub fn read_folded_line(&mut self) -> io::Result<Option<FoldedLine>> {
        let first = match self.read_line()? {
            Some(first) => first,
            None => return Ok(None),
        };

        let mut unfolded = trim_crlf(&first).to_vec();
        let mut folded = vec![first];
        if unfolded.is_empty() {
            return Ok(Some(FoldedLine { folded, unfolded }));
        }

        loop {
            match self.inner.fill_buf()?.first() {
                Some(b' ') | Some(b'\t') => (),
                // EOF or a line that isn't a continuation
                _ => break,
            }

            match self.read_line()? {
                Some(line) => {
                    unfolded.extend_from_slice(trim_crlf(&line));
                    folded.push(line);
                }
                None => break,
            }
        }

        Ok(Some(FoldedLine { folded, unfolded }))
    }

    /// Copies everything that hasn't been read yet, including anything
    /// already buffered by lookahead, to `dst`.
    pub fn copy_rest(&mut self, dst: &mut impl Write) -> io::Result<u64> {
        io::copy(&mut self.inner, dst)
    }
}

/// Trims a trailing "\r\n" or "\n" from `line`.
///
/// RFC 5322 2.3 forbids bare CR and LF, but messages that have been sitting
/// in a maildir on a UNIX system usually only have LF, so both are accepted.
pub fn trim_crlf(line: &[u8]) -> &[u8] {
    match line.strip_suffix(b"\n") {
        // A CR is only part of the line ending if it precedes the LF
        Some(line) => line.strip_suffix(b"\r").unwrap_or(line),
        None => line,
    }
}
