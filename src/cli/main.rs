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

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::prelude::*;
use log::{error, info};
use structopt::StructOpt;

use super::backup::{create_backup, TeeReader};
use crate::rewrite::{rewrite_message, RewriteOptions};
use crate::support::error::{ConfigError, Error};
use crate::support::sysexits::*;
use crate::support::system_config::RewriteConfig;

/// Reads an email message from stdin and rewrites it to stdout.
///
/// The output is identical to the input except for the attachments deleted by
/// --delete-types or --delete-binary, and the field added by
/// --decode-subject.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Options {
    /// Directory to which the original, unmodified message will be saved.
    #[structopt(long, parse(from_os_str))]
    backup_dir: Option<PathBuf>,

    /// Delete common binary attachments from the message.
    #[structopt(long, conflicts_with_all(&["delete-types", "keep-types"]))]
    delete_binary: bool,

    /// Comma-separated globs of attachment media types to delete.
    #[structopt(long)]
    delete_types: Option<String>,

    /// Comma-separated glob overrides for --delete-types.
    #[structopt(long)]
    keep_types: Option<String>,

    /// Hardcoded RFC 3339 time (only used for testing).
    #[structopt(long)]
    fake_now: Option<String>,

    /// Add an X-Rendmail-Subject field with an ASCII-only rendition of the
    /// subject.
    #[structopt(long)]
    decode_subject: bool,

    /// Fail on malformed messages instead of passing them through.
    #[structopt(long)]
    strict: bool,

    /// Log what is done to the message.
    #[structopt(long)]
    verbose: bool,

    /// Log to syslog instead of stderr.
    #[structopt(long)]
    syslog: bool,

    /// Maximum depth of nested multipart bodies.
    #[structopt(long)]
    max_depth: Option<u32>,

    /// TOML file providing defaults for the other options.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,
}

impl Options {
    /// Overlays the command-line flags onto `config`.
    fn apply_to(&self, config: &mut RewriteConfig) {
        if let Some(ref dir) = self.backup_dir {
            config.backup_dir = Some(dir.clone());
        }
        if let Some(ref types) = self.delete_types {
            config.delete_types = split_list(types);
        }
        if let Some(ref types) = self.keep_types {
            config.keep_types = split_list(types);
        }
        if let Some(max_depth) = self.max_depth {
            config.max_depth = Some(max_depth);
        }

        config.delete_binary |= self.delete_binary;
        config.decode_subject |= self.decode_subject;
        config.strict |= self.strict;
        config.verbose |= self.verbose;
        config.syslog |= self.syslog;
    }

    fn now(&self) -> Result<DateTime<FixedOffset>, ConfigError> {
        match self.fake_now {
            None => Ok(Local::now().into()),
            Some(ref fake_now) => DateTime::parse_from_rfc3339(fake_now)
                .map_err(|e| ConfigError::BadTime(fake_now.clone(), e)),
        }
    }
}

/// Splits a comma-separated list, trimming whitespace around the items and
/// discarding empty ones.
fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn config_exit(e: &ConfigError) -> Sysexit {
    match *e {
        ConfigError::ConflictingTypes | ConfigError::BadTime(..) => EX_USAGE,
        _ => EX_CONFIG,
    }
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    // Logging isn't set up until the config is known, so errors reading it
    // go straight to stderr.
    let mut config = match options.config {
        None => RewriteConfig::default(),
        Some(ref path) => match RewriteConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                EX_CONFIG.exit()
            }
        }
    };
    options.apply_to(&mut config);

    init_logging(&config);

    let rewrite_options = match options
        .now()
        .and_then(|now| RewriteOptions::from_config(&config, now))
    {
        Ok(rewrite_options) => rewrite_options,
        Err(e) => die!(config_exit(&e), "{}", e),
    };

    run(&config, &rewrite_options).exit()
}

fn init_logging(config: &RewriteConfig) {
    let level = if config.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    if config.syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        match syslog::unix(formatter) {
            Ok(logger) => {
                match log::set_boxed_logger(Box::new(
                    syslog::BasicLogger::new(logger),
                )) {
                    Ok(()) => log::set_max_level(level),
                    Err(e) => eprintln!("Failed to initialise logging: {}", e),
                }
                return;
            }
            Err(e) => {
                eprintln!("Failed to connect to syslog, using stderr: {}", e)
            }
        }
    }

    crate::init_simple_log(level);
}

fn run(config: &RewriteConfig, options: &RewriteOptions) -> Sysexit {
    let stdin = io::stdin();
    let stdout = io::stdout();
    rewrite_with_backup(
        stdin.lock(),
        io::BufWriter::new(stdout.lock()),
        config.backup_dir.as_deref(),
        options,
    )
}

/// Rewrites `input` to `output`, first saving a copy of the complete input
/// under `backup_dir` if one is given.
fn rewrite_with_backup(
    input: impl Read,
    output: impl Write,
    backup_dir: Option<&Path>,
    options: &RewriteOptions,
) -> Sysexit {
    let backup_dir = match backup_dir {
        None => return rewrite_status(rewrite_message(input, output, options)),
        Some(backup_dir) => backup_dir,
    };

    let backup = create_backup(backup_dir, options.now);
    let (backup_file, backup_path) = match backup {
        Ok(backup) => backup,
        Err(e) => {
            error!(
                "Failed creating backup file in {}: {}",
                backup_dir.display(),
                e
            );
            return EX_CANTCREAT;
        }
    };
    info!("Saving original message to {}", backup_path.display());

    let mut tee = TeeReader::new(input, io::BufWriter::new(backup_file));
    let status = rewrite_status(rewrite_message(&mut tee, output, options));

    // Whatever the rewrite didn't get to still belongs in the backup.
    match tee.finish().and_then(|mut backup| backup.get_mut().sync_all()) {
        Ok(()) => status,
        Err(e) => {
            error!(
                "Failed writing message to {}: {}",
                backup_path.display(),
                e
            );
            status.max(EX_IOERR)
        }
    }
}

fn rewrite_status(result: Result<(), Error>) -> Sysexit {
    match result {
        Ok(()) => EX_OK,
        Err(Error::Format(e)) => {
            error!("Failed rewriting message: {}", e);
            EX_DATAERR
        }
        Err(Error::Io(e)) => {
            error!("Failed rewriting message: {}", e);
            EX_IOERR
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;
    use crate::test_data::{SIMPLE, TRUNCATED};

    fn parse(args: &[&str]) -> Result<Options, clap::Error> {
        Options::from_iter_safe(
            std::iter::once("rendmail").chain(args.iter().copied()),
        )
    }

    #[test]
    fn test_split_list() {
        assert_eq!(Vec::<String>::new(), split_list(""));
        assert_eq!(Vec::<String>::new(), split_list(" , ,"));
        assert_eq!(vec!["image/*"], split_list("image/*"));
        assert_eq!(
            vec!["image/*", "video/*", "text/x-*"],
            split_list(" image/*,video/* ,,text/x-* ")
        );
    }

    #[test]
    fn parse_flags() {
        let options = parse(&[
            "--delete-types=image/*, video/*",
            "--keep-types",
            "image/gif",
            "--fake-now=2021-02-18T21:54:42.123Z",
            "--backup-dir=/tmp/backup",
            "--decode-subject",
            "--max-depth=4",
        ])
        .unwrap();

        let mut config = RewriteConfig::default();
        options.apply_to(&mut config);
        assert_eq!(
            RewriteConfig {
                delete_types: vec!["image/*".to_owned(), "video/*".to_owned()],
                keep_types: vec!["image/gif".to_owned()],
                decode_subject: true,
                max_depth: Some(4),
                backup_dir: Some("/tmp/backup".into()),
                ..RewriteConfig::default()
            },
            config
        );

        assert_eq!(
            "2021-02-18T21:54:42.123+00:00",
            options.now().unwrap().to_rfc3339()
        );
    }

    #[test]
    fn flags_override_config() {
        let mut config = RewriteConfig {
            delete_types: vec!["audio/*".to_owned()],
            keep_types: vec!["audio/midi".to_owned()],
            strict: true,
            max_depth: Some(9),
            ..RewriteConfig::default()
        };

        parse(&["--delete-types=image/*", "--verbose"])
            .unwrap()
            .apply_to(&mut config);
        assert_eq!(vec!["image/*"], config.delete_types);
        assert_eq!(vec!["audio/midi"], config.keep_types);
        assert!(config.strict);
        assert!(config.verbose);
        assert_eq!(Some(9), config.max_depth);

        // An explicitly empty list clears the configured one
        parse(&["--keep-types=,"]).unwrap().apply_to(&mut config);
        assert!(config.keep_types.is_empty());
    }

    #[test]
    fn delete_binary_conflicts() {
        assert!(parse(&["--delete-binary"]).unwrap().delete_binary);
        assert_eq!(
            clap::ErrorKind::ArgumentConflict,
            parse(&["--delete-binary", "--delete-types=image/*"])
                .unwrap_err()
                .kind
        );
        assert_eq!(
            clap::ErrorKind::ArgumentConflict,
            parse(&["--keep-types=image/gif", "--delete-binary"])
                .unwrap_err()
                .kind
        );

        // Conflicts between the config file and the flags are only noticed
        // once they are merged.
        let mut config = RewriteConfig {
            delete_types: vec!["audio/*".to_owned()],
            ..RewriteConfig::default()
        };
        let options = parse(&["--delete-binary"]).unwrap();
        options.apply_to(&mut config);
        let e = RewriteOptions::from_config(&config, options.now().unwrap())
            .unwrap_err();
        assert_matches!(ConfigError::ConflictingTypes, e);
        assert_eq!(EX_USAGE, config_exit(&e));
    }

    #[test]
    fn bad_fake_now() {
        let e = parse(&["--fake-now=yesterday"]).unwrap().now().unwrap_err();
        assert_matches!(ConfigError::BadTime(..), e);
        assert_eq!(EX_USAGE, config_exit(&e));
    }

    #[test]
    fn bad_glob_is_config_error() {
        let mut config = RewriteConfig::default();
        parse(&["--delete-types=image/[a-"])
            .unwrap()
            .apply_to(&mut config);
        let e = RewriteOptions::from_config(&config, Local::now().into())
            .unwrap_err();
        assert_matches!(ConfigError::BadPattern(..), e);
        assert_eq!(EX_CONFIG, config_exit(&e));
    }

    #[test]
    fn unknown_flag_rejected() {
        assert_eq!(
            clap::ErrorKind::UnknownArgument,
            parse(&["--delete-everything"]).unwrap_err().kind
        );
    }

    #[test]
    fn status_of_rewrite_result() {
        assert_eq!(EX_OK, rewrite_status(Ok(())));
        assert_eq!(
            EX_DATAERR,
            rewrite_status(Err(Error::Format(
                crate::support::error::FormatError::MissingBody
            )))
        );
        assert_eq!(
            EX_IOERR,
            rewrite_status(Err(Error::Io(io::ErrorKind::BrokenPipe.into())))
        );
    }

    fn strict() -> RewriteOptions {
        RewriteOptions {
            strict: true,
            ..RewriteOptions::default()
        }
    }

    fn backups(dir: &Path) -> Vec<Vec<u8>> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| fs::read(entry.unwrap().path()).unwrap())
            .collect()
    }

    #[test]
    fn backup_of_truncated_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        assert_eq!(
            EX_DATAERR,
            rewrite_with_backup(
                TRUNCATED,
                &mut output,
                Some(dir.path()),
                &strict()
            )
        );
        assert!(TRUNCATED.starts_with(&output));
        assert_eq!(vec![TRUNCATED.to_vec()], backups(dir.path()));
    }

    #[test]
    fn backup_includes_input_not_yet_read() {
        // Rewriting stops at the bad field, long before the end of the body
        let mut message = b"Subject: x\nnot a field\n\n".to_vec();
        for _ in 0..10_000 {
            message.extend_from_slice(b"body line\n");
        }

        let dir = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        assert_eq!(
            EX_DATAERR,
            rewrite_with_backup(
                &message[..],
                &mut output,
                Some(dir.path()),
                &strict()
            )
        );
        assert_eq!(&b"Subject: x\nnot a field\n"[..], &output[..]);
        assert_eq!(vec![message], backups(dir.path()));
    }

    #[test]
    fn backup_of_clean_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        assert_eq!(
            EX_OK,
            rewrite_with_backup(
                SIMPLE,
                &mut output,
                Some(dir.path()),
                &strict()
            )
        );
        assert_eq!(SIMPLE, &output[..]);
        assert_eq!(vec![SIMPLE.to_vec()], backups(dir.path()));

        let mut output = Vec::new();
        assert_eq!(
            EX_OK,
            rewrite_with_backup(SIMPLE, &mut output, None, &strict())
        );
        assert_eq!(SIMPLE, &output[..]);
    }

    #[test]
    fn missing_backup_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        assert_eq!(
            EX_CANTCREAT,
            rewrite_with_backup(
                SIMPLE,
                &mut output,
                Some(dir.path().join("nonexistent").as_path()),
                &strict()
            )
        );
        assert!(output.is_empty());
    }
}
