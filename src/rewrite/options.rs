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

use chrono::prelude::*;

use super::policy::{MediaTypePolicy, BINARY_DELETE_TYPES, BINARY_KEEP_TYPES};
use crate::support::error::ConfigError;
use crate::support::system_config::RewriteConfig;

/// Multipart bodies nested deeper than this are treated as malformed.
pub const DEFAULT_MAX_DEPTH: u32 = 20;

/// Options controlling `rewrite_message`.
///
/// These are fixed for the whole run.
#[derive(Clone, Debug)]
pub struct RewriteOptions {
    /// Which body parts get deleted.
    pub policy: MediaTypePolicy,
    /// The time stamped onto the placeholders of deleted parts.
    pub now: DateTime<FixedOffset>,
    /// Whether to add an ASCII-only `X-Rendmail-Subject` field after the
    /// `Subject` field.
    pub decode_subject: bool,
    /// Whether malformed messages are an error instead of being passed
    /// through.
    pub strict: bool,
    /// Whether to log what is being done to the message.
    pub verbose: bool,
    /// The maximum depth of nested multipart bodies.
    pub max_depth: u32,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        RewriteOptions {
            policy: MediaTypePolicy::default(),
            now: Local::now().into(),
            decode_subject: false,
            strict: false,
            verbose: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl RewriteOptions {
    /// Builds the options described by `config`, with `now` as the time of
    /// deletion.
    pub fn from_config(
        config: &RewriteConfig,
        now: DateTime<FixedOffset>,
    ) -> Result<Self, ConfigError> {
        let policy = if config.delete_binary {
            if !config.delete_types.is_empty() || !config.keep_types.is_empty()
            {
                return Err(ConfigError::ConflictingTypes);
            }
            MediaTypePolicy::new(BINARY_DELETE_TYPES, BINARY_KEEP_TYPES)?
        } else {
            MediaTypePolicy::new(
                &config.delete_types[..],
                &config.keep_types[..],
            )?
        };

        Ok(RewriteOptions {
            policy,
            now,
            decode_subject: config.decode_subject,
            strict: config.strict,
            verbose: config.verbose,
            max_depth: config.max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
        })
    }
}
