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

//! The streaming rewriter.
//!
//! The message is walked one line at a time, and every line that is read is
//! either written back out exactly as it was or, for the body of a deleted
//! part, dropped. The only lines that do not come from the input are the
//! placeholder fields of deleted parts and the derived subject field.
//!
//! When the message turns out to be malformed, whatever has not been read
//! yet is passed through verbatim, unless strict mode is on.

use std::io::{Read, Write};

use log::info;

use super::options::RewriteOptions;
use crate::mime::encoded_word::decode_header_value;
use crate::mime::header::{
    fold_header_field, parse_content_type, parse_header_field, ContentType,
    DEFAULT_CONTENT_TYPE,
};
use crate::mime::line_reader::LineReader;
use crate::support::error::{Error, FormatError};

/// The date format used for the expiration of deleted parts (RFC 5322 date
/// with numeric zone).
const EXPIRATION_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// The name of the field added when `decode_subject` is set.
pub const DECODED_SUBJECT_FIELD: &str = "X-Rendmail-Subject";

/// Copies the message in `input` to `output`, deleting parts and decoding
/// the subject as configured by `options`.
///
/// In strict mode, a malformed message results in `Error::Format`, and
/// `output` contains only the part of the message processed up to that
/// point. Otherwise, the remainder of the input is copied through unchanged
/// and the call succeeds. `Error::Io` is always returned as-is.
pub fn rewrite_message(
    input: impl Read,
    output: impl Write,
    options: &RewriteOptions,
) -> Result<(), Error> {
    let mut rewriter = Rewriter {
        reader: LineReader::new(input),
        output,
        options,
    };

    match rewriter.copy_message_part(b"", 0) {
        Ok(_) => (),
        Err(Error::Format(e)) if !options.strict => {
            if options.verbose {
                info!("Ignoring error: {}", e);
            }
            rewriter.reader.copy_rest(&mut rewriter.output)?;
        }
        Err(e) => return Err(e),
    }

    rewriter.output.flush()?;
    Ok(())
}

struct Rewriter<'o, R, W> {
    reader: LineReader<R>,
    output: W,
    options: &'o RewriteOptions,
}

/// What `copy_header()` learned about a part.
#[derive(Debug, Default)]
struct PartHeader {
    /// The parsed value of the first `Content-Type` field, if there was one
    /// and it was valid.
    content_type: Option<ContentType>,
    /// Whether the body of the part is to be dropped.
    deleted: bool,
}

impl PartHeader {
    fn content_type(&self) -> &ContentType {
        self.content_type.as_ref().unwrap_or(&DEFAULT_CONTENT_TYPE)
    }
}

impl<R: Read, W: Write> Rewriter<'_, R, W> {
    /// Copies one message or body part, including the delimiter line that
    /// ends it.
    ///
    /// `delim` is the delimiter of the enclosing multipart, or empty for the
    /// top-level message, which ends at EOF.
    ///
    /// Returns whether the delimiter that ended the part was the closing
    /// delimiter. At the top level, this is always true.
    fn copy_message_part(
        &mut self,
        delim: &[u8],
        depth: u32,
    ) -> Result<bool, Error> {
        if depth > self.options.max_depth {
            return Err(FormatError::TooDeep(self.options.max_depth).into());
        }

        let header = self.copy_header()?;
        let content_type = header.content_type();

        if content_type.is_multipart() && !header.deleted {
            let boundary = content_type.param("boundary").unwrap_or("");
            if boundary.is_empty() {
                return Err(
                    FormatError::InvalidBoundary(boundary.to_owned()).into()
                );
            }

            let mut sub_delim = b"--".to_vec();
            sub_delim.extend_from_slice(boundary.as_bytes());

            // Preamble up to the first delimiter. A closing delimiter there
            // means there are no parts at all.
            if !self.copy_body(&sub_delim, false)? {
                while !self.copy_message_part(&sub_delim, depth + 1)? {}
            }
        }

        // Body (or epilogue of a multipart) up to the enclosing delimiter.
        self.copy_body(delim, header.deleted)
    }

    /// Copies the header of a part, including the blank line that ends it.
    fn copy_header(&mut self) -> Result<PartHeader, Error> {
        let mut header = PartHeader::default();
        let mut seen_content_type = false;
        // Synthesised lines use the line ending of the first line of the
        // header.
        let mut line_ending = None;

        loop {
            let line = match self.reader.read_folded_line()? {
                Some(line) => line,
                None => return Err(FormatError::MissingBody.into()),
            };

            let line_ending = *line_ending.get_or_insert_with(|| {
                if line.folded[0].ends_with(b"\r\n") {
                    "\r\n"
                } else {
                    "\n"
                }
            });

            if line.unfolded.is_empty() {
                self.write_lines(&line.folded)?;
                return Ok(header);
            }

            let mut extra = Vec::<String>::new();
            let mut malformed = None;

            match parse_header_field(&line.unfolded) {
                None => {
                    malformed = Some(FormatError::MalformedField(
                        String::from_utf8_lossy(&line.unfolded).into_owned(),
                    ));
                }

                Some((name, value))
                    if "Content-Type" == name && !seen_content_type =>
                {
                    seen_content_type = true;
                    header.content_type = parse_content_type(value);
                    if header.content_type.is_none() && self.options.verbose {
                        info!(
                            "Ignoring invalid Content-Type {:?}",
                            String::from_utf8_lossy(value)
                        );
                    }

                    let media_type = &header.content_type().media_type;
                    let deleted = self.options.policy.should_delete(media_type);
                    if deleted {
                        if self.options.verbose {
                            info!("Deleting {}", media_type);
                        }
                        self.write_placeholder(line_ending)?;
                    }
                    header.deleted = deleted;
                }

                Some((name, value))
                    if "Subject" == name && self.options.decode_subject =>
                {
                    match decode_header_value(value) {
                        Some(ref decoded)
                            if !decoded.is_empty()
                                && decoded.as_bytes() != value =>
                        {
                            extra = fold_header_field(
                                &format!(
                                    "{}: {}",
                                    DECODED_SUBJECT_FIELD, decoded
                                ),
                                line_ending,
                            );
                        }
                        Some(_) => (),
                        None => {
                            if self.options.verbose {
                                info!(
                                    "Unable to decode Subject {:?}",
                                    String::from_utf8_lossy(value)
                                );
                            }
                        }
                    }
                }

                Some(_) => (),
            }

            // The original field is always written, even when it is
            // malformed, so that nothing is lost before recovery.
            self.write_lines(&line.folded)?;
            for extra_line in &extra {
                self.output.write_all(extra_line.as_bytes())?;
            }

            if let Some(e) = malformed {
                return Err(e.into());
            }
        }
    }

    /// Copies body lines up to and including the next line starting with
    /// `delim`. The lines before the delimiter are dropped if `deleted`.
    ///
    /// Returns whether that delimiter was a closing delimiter. An empty
    /// `delim` means the body runs to EOF, which is then reported as a
    /// closing delimiter.
    fn copy_body(
        &mut self,
        delim: &[u8],
        deleted: bool,
    ) -> Result<bool, Error> {
        loop {
            let line = match self.reader.read_line()? {
                Some(line) => line,
                None if delim.is_empty() => return Ok(true),
                None => {
                    return Err(FormatError::MissingDelimiter(
                        String::from_utf8_lossy(delim).into_owned(),
                    )
                    .into())
                }
            };

            let is_delim = !delim.is_empty() && line.starts_with(delim);
            if is_delim || !deleted {
                self.output.write_all(&line)?;
            }

            if is_delim {
                return Ok(line[delim.len()..].starts_with(b"--"));
            }
        }
    }

    /// Writes the `Content-Type` field that turns a deleted part into a
    /// `message/external-body` reference to nothing.
    ///
    /// The original header fields of the part follow this and become the
    /// header of the (absent) external body.
    fn write_placeholder(&mut self, line_ending: &str) -> Result<(), Error> {
        write!(
            self.output,
            "Content-Type: message/external-body; \
             access-type=x-rendmail-deleted;{le}\
             \texpiration=\"{date}\"{le}{le}",
            le = line_ending,
            date = self.options.now.format(EXPIRATION_FORMAT),
        )?;
        Ok(())
    }

    fn write_lines(&mut self, lines: &[Vec<u8>]) -> Result<(), Error> {
        for line in lines {
            self.output.write_all(line)?;
        }
        Ok(())
    }
}
