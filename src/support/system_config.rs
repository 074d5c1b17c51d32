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

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::error::ConfigError;

/// Configuration loaded from the file named by `--config`.
///
/// Every field has the same meaning as the command-line flag of the same
/// name (with `-` instead of `_`). Flags given on the command line are
/// applied on top of this.
///
/// Example:
///
/// ```toml
/// delete_types = ["image/*", "video/*"]
/// keep_types = ["image/gif"]
/// decode_subject = true
/// backup_dir = "/var/mail/backup"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewriteConfig {
    /// Media type globs of parts to delete.
    pub delete_types: Vec<String>,
    /// Media type globs of parts to keep even if they match `delete_types`.
    pub keep_types: Vec<String>,
    /// Use the built-in lists of binary media types instead of
    /// `delete_types` and `keep_types`.
    pub delete_binary: bool,
    pub decode_subject: bool,
    pub strict: bool,
    pub verbose: bool,
    /// Log to syslog instead of stderr.
    pub syslog: bool,
    /// The maximum depth of nested multipart bodies.
    ///
    /// If unset, `DEFAULT_MAX_DEPTH` is used.
    pub max_depth: Option<u32>,
    /// Where to save a copy of every input message.
    pub backup_dir: Option<PathBuf>,
}

impl RewriteConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let name = path.display().to_string();
        let text = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(name.clone(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(name, e))
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    #[test]
    fn parse_full_config() {
        let config: RewriteConfig = toml::from_str(
            r#"
delete_types = ["image/*", "video/*"]
keep_types = ["image/gif"]
decode_subject = true
strict = true
verbose = true
syslog = true
max_depth = 5
backup_dir = "/var/mail/backup"
"#,
        )
        .unwrap();

        assert_eq!(
            RewriteConfig {
                delete_types: vec!["image/*".to_owned(), "video/*".to_owned()],
                keep_types: vec!["image/gif".to_owned()],
                delete_binary: false,
                decode_subject: true,
                strict: true,
                verbose: true,
                syslog: true,
                max_depth: Some(5),
                backup_dir: Some("/var/mail/backup".into()),
            },
            config
        );
    }

    #[test]
    fn parse_empty_config() {
        let config: RewriteConfig = toml::from_str("").unwrap();
        assert_eq!(RewriteConfig::default(), config);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<RewriteConfig>("delete_type = []").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "delete_binary = true").unwrap();
        let config = RewriteConfig::load(file.path()).unwrap();
        assert!(config.delete_binary);

        writeln!(file, "delete_binary = 42").unwrap();
        assert_matches!(
            Err(ConfigError::Parse(..)),
            RewriteConfig::load(file.path())
        );

        assert_matches!(
            Err(ConfigError::Read(..)),
            RewriteConfig::load(&file.path().join("nonexistent"))
        );
    }
}
