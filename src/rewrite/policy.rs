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

//! Deciding which body parts get deleted.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::support::error::ConfigError;

/// Media types deleted by `--delete-binary`.
pub static BINARY_DELETE_TYPES: &[&str] =
    &["application/*", "audio/*", "image/*", "video/*"];

/// Exceptions to `BINARY_DELETE_TYPES`.
///
/// `application/` includes various types that are really text, so we keep
/// those. This list is surely incomplete; it is based on the IANA media type
/// registry and what shows up in real mailboxes.
pub static BINARY_KEEP_TYPES: &[&str] = &[
    "application/ecmascript",
    "application/ics",
    "application/javascript",
    "application/json",
    "application/pgp-*", // signature, encrypted, keys
    "application/pkcs7-signature",
    "application/rtf", // may include embedded images
    "application/xml",
    "application/*+json",
    "application/*+xml",
    "application/x-csh",
    "application/x-dia-diagram",
    "application/x-ecmascript",
    "application/x-httpd-php",
    "application/x-javascript",
    "application/x-perl",
    "application/x-ruby",
    "application/x-sh",
];

/// A shell-style glob matched against media types.
///
/// The syntax is that of `fnmatch` with `/` as the separator: `*` matches
/// any run of characters other than `/`, `?` matches a single character other
/// than `/`, `[...]` and `[^...]` are character classes which may contain
/// ranges, and `\` escapes the character after it. Matching is case-sensitive.
#[derive(Clone)]
pub struct MediaTypeGlob {
    pattern: String,
    regex: Regex,
}

impl MediaTypeGlob {
    pub fn matches(&self, media_type: &str) -> bool {
        self.regex.is_match(media_type)
    }
}

impl fmt::Debug for MediaTypeGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MediaTypeGlob({:?})", self.pattern)
    }
}

impl FromStr for MediaTypeGlob {
    type Err = ConfigError;

    fn from_str(pattern: &str) -> Result<Self, ConfigError> {
        let bad = |why| ConfigError::BadPattern(pattern.to_owned(), why);

        let mut re = String::with_capacity(pattern.len() * 2 + 2);
        re.push('^');

        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '*' => re.push_str("[^/]*"),
                '?' => re.push_str("[^/]"),
                '\\' => {
                    let escaped = chars
                        .next()
                        .ok_or_else(|| bad("trailing backslash"))?;
                    push_literal(&mut re, escaped);
                }
                '[' => {
                    re.push('[');
                    if Some(&'^') == chars.peek() {
                        chars.next();
                        re.push('^');
                    }

                    let mut first = true;
                    loop {
                        if !first && Some(&']') == chars.peek() {
                            chars.next();
                            break;
                        }
                        first = false;

                        let lo = class_char(&mut chars).map_err(bad)?;
                        push_literal(&mut re, lo);
                        if Some(&'-') == chars.peek() {
                            chars.next();
                            let hi = class_char(&mut chars).map_err(bad)?;
                            if hi < lo {
                                return Err(bad("reversed range"));
                            }
                            re.push('-');
                            push_literal(&mut re, hi);
                        }
                    }

                    re.push(']');
                }
                ch => push_literal(&mut re, ch),
            }
        }

        re.push('$');
        let regex = Regex::new(&re).map_err(|_| bad("unsupported pattern"))?;
        Ok(MediaTypeGlob {
            pattern: pattern.to_owned(),
            regex,
        })
    }
}

/// Reads one (possibly escaped) character of a character class.
fn class_char(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<char, &'static str> {
    match chars.next() {
        None => Err("unterminated character class"),
        Some('-') | Some(']') => Err("empty character class or range"),
        Some('\\') => chars.next().ok_or("trailing backslash"),
        Some(ch) => Ok(ch),
    }
}

fn push_literal(re: &mut String, ch: char) {
    let mut buf = [0u8; 4];
    re.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
}

/// The policy which decides whether a body part is deleted based on its
/// media type.
#[derive(Clone, Debug, Default)]
pub struct MediaTypePolicy {
    delete: Vec<MediaTypeGlob>,
    keep: Vec<MediaTypeGlob>,
}

impl MediaTypePolicy {
    /// Compiles the given glob lists, failing on the first malformed pattern.
    pub fn new(
        delete: &[impl AsRef<str>],
        keep: &[impl AsRef<str>],
    ) -> Result<Self, ConfigError> {
        fn compile(
            patterns: &[impl AsRef<str>],
        ) -> Result<Vec<MediaTypeGlob>, ConfigError> {
            patterns.iter().map(|p| p.as_ref().parse()).collect()
        }

        Ok(MediaTypePolicy {
            delete: compile(delete)?,
            keep: compile(keep)?,
        })
    }

    /// Returns whether parts of type `media_type` should be deleted.
    ///
    /// Only the first delete pattern that matches is considered: the part is
    /// deleted unless some keep pattern also matches. This makes the order of
    /// the delete patterns significant if they overlap.
    pub fn should_delete(&self, media_type: &str) -> bool {
        match self.delete.iter().find(|glob| glob.matches(media_type)) {
            None => false,
            Some(_) => !self.keep.iter().any(|glob| glob.matches(media_type)),
        }
    }
}
