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

use std::io;

use thiserror::Error;

/// An error encountered while rewriting a message.
///
/// The two cases are disjoint. `Io` is a failure of the
/// underlying streams and is always fatal. `Format` means that the message
/// itself does not have the structure we expected, which in non-strict mode
/// is recovered from by copying the rest of the input verbatim.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// A structural problem with the message being rewritten.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("missing body")]
    MissingBody,
    #[error("malformed header field {0:?}: missing colon")]
    MalformedField(String),
    #[error("invalid boundary {0:?}")]
    InvalidBoundary(String),
    #[error("EOF while looking for delimiter {0:?}")]
    MissingDelimiter(String),
    #[error("multipart nesting deeper than {0} levels")]
    TooDeep(u32),
}

/// A problem with the configuration, detected before any input is read.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("bad media type pattern {0:?}: {1}")]
    BadPattern(String, &'static str),
    #[error(
        "--delete-binary is incompatible with --delete-types and --keep-types"
    )]
    ConflictingTypes,
    #[error("bad --fake-now time {0:?}: {1}")]
    BadTime(String, chrono::ParseError),
    #[error("error reading {0}: {1}")]
    Read(String, io::Error),
    #[error("error in config file {0}: {1}")]
    Parse(String, toml::de::Error),
}
