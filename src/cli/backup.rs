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

//! Saving an unmodified copy of the input.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::prelude::*;

/// Creates a new, uniquely named backup file in `dir`.
///
/// The name starts with `now` in UTC, so that a directory listing sorts the
/// backups chronologically.
pub fn create_backup(
    dir: &Path,
    now: DateTime<FixedOffset>,
) -> io::Result<(fs::File, PathBuf)> {
    let file = tempfile::Builder::new()
        .prefix(&format!("{}-", backup_prefix(now.with_timezone(&Utc))))
        .tempfile_in(dir)?;
    file.keep().map_err(|e| e.error)
}

/// Formats `now` as `YYYYMMDD-hhmmss` followed by the milliseconds with
/// trailing zeroes removed (and no `.` at all if the milliseconds are zero).
fn backup_prefix(now: DateTime<Utc>) -> String {
    let formatted = now.format("%Y%m%d-%H%M%S%.3f").to_string();
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_owned()
}

/// A reader which writes everything it reads to another writer.
#[derive(Debug)]
pub struct TeeReader<R, W> {
    inner: R,
    copy: W,
}

impl<R: Read, W: Write> TeeReader<R, W> {
    pub fn new(inner: R, copy: W) -> Self {
        TeeReader { inner, copy }
    }

    /// Copies whatever has not been read yet to the writer, then flushes it
    /// and returns it.
    pub fn finish(mut self) -> io::Result<W> {
        io::copy(&mut self.inner, &mut self.copy)?;
        self.copy.flush()?;
        Ok(self.copy)
    }
}

impl<R: Read, W: Write> Read for TeeReader<R, W> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let nread = self.inner.read(dst)?;
        self.copy.write_all(&dst[..nread])?;
        Ok(nread)
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_backup_prefix() {
        assert_eq!(
            "20210218-215442.123",
            backup_prefix(utc("2021-02-18T21:54:42.123Z"))
        );
        assert_eq!(
            "20210218-215442.12",
            backup_prefix(utc("2021-02-18T21:54:42.120Z"))
        );
        assert_eq!(
            "20210218-215442.1",
            backup_prefix(utc("2021-02-18T21:54:42.1Z"))
        );
        assert_eq!(
            "20210218-215442",
            backup_prefix(utc("2021-02-18T21:54:42Z"))
        );
        assert_eq!(
            "20210218-215442",
            backup_prefix(utc("2021-02-18T21:54:42.0004Z"))
        );
        assert_eq!(
            "20210219-025442",
            backup_prefix(utc("2021-02-18T21:54:42-05:00"))
        );
        // Whole seconds ending in 0 are left alone
        assert_eq!(
            "20210218-215440",
            backup_prefix(utc("2021-02-18T21:54:40Z"))
        );
    }

    #[test]
    fn backup_file_naming() {
        let dir = tempfile::TempDir::new().unwrap();
        let now = DateTime::parse_from_rfc3339("2021-02-18T16:54:42.5-05:00")
            .unwrap();

        let (_, first) = create_backup(dir.path(), now).unwrap();
        let (_, second) = create_backup(dir.path(), now).unwrap();
        assert_ne!(first, second);

        for path in &[first, second] {
            assert_eq!(dir.path(), path.parent().unwrap());
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(
                name.starts_with("20210218-215442.5-"),
                "bad name {}",
                name
            );
            assert!(name.len() > "20210218-215442.5-".len());
            assert!(path.is_file());
        }
    }

    #[test]
    fn backup_dir_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(create_backup(
            &dir.path().join("nonexistent"),
            Local::now().into()
        )
        .is_err());
    }

    #[test]
    fn tee_partial_then_finish() {
        let mut tee = TeeReader::new(b"hello world" as &[u8], Vec::new());
        let mut buf = [0u8; 5];
        tee.read_exact(&mut buf).unwrap();
        assert_eq!(b"hello", &buf);

        let copy = tee.finish().unwrap();
        assert_eq!(b"hello world" as &[u8], &copy[..]);
    }

    proptest! {
        #[test]
        fn tee_copies_everything_read(
            content in "[a-z\r\n]{0,200}",
            buffer_size in 1usize..=32usize,
            read_limit in 0usize..=250usize,
        ) {
            let mut tee =
                TeeReader::new(content.as_bytes(), Vec::<u8>::new());
            let mut buffer = vec![0u8; buffer_size];
            let mut read = Vec::new();
            while read.len() < read_limit {
                let nread = tee.read(&mut buffer).unwrap();
                if 0 == nread {
                    break;
                }
                read.extend_from_slice(&buffer[..nread]);
            }

            prop_assert!(content.as_bytes().starts_with(&read));
            let copy = tee.finish().unwrap();
            prop_assert_eq!(content.as_bytes(), &copy[..]);
        }
    }
}
