// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{collections::HashMap, num::ParseIntError, path::Path};

use snafu::{ResultExt, Snafu};
use tracing::debug;

pub const URLS_VAR: &str = "GPUDB_URLS";
pub const USERNAME_VAR: &str = "GPUDB_USERNAME";
pub const PASSWORD_VAR: &str = "GPUDB_PASSWORD";
pub const TIMEOUT_VAR: &str = "GPUDB_TIMEOUT_MS";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SettingsError {
    #[snafu(display("Failed to load environment file: {source}"))]
    Dotenv { source: dotenvy::Error },

    #[snafu(display("{TIMEOUT_VAR} must be a number of milliseconds, got '{value}'"))]
    InvalidTimeout {
        value:  String,
        source: ParseIntError,
    },
}

pub type Result<T, E = SettingsError> = std::result::Result<T, E>;

/// Where and as whom to connect, as read from the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub urls:       Vec<String>,
    pub username:   Option<String>,
    pub password:   Option<String>,
    pub timeout_ms: Option<u64>,
}

impl ConnectionSettings {
    /// Loads `.env` from the working directory (if any), then reads the
    /// process environment.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err).context(DotenvSnafu),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings from a dotenv-formatted file without touching the
    /// process environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let vars = dotenvy::from_path_iter(path.as_ref())
            .context(DotenvSnafu)?
            .collect::<Result<HashMap<_, _>, _>>()
            .context(DotenvSnafu)?;
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let urls = non_empty(URLS_VAR)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let timeout_ms = non_empty(TIMEOUT_VAR)
            .map(|value| {
                value
                    .trim()
                    .parse::<u64>()
                    .context(InvalidTimeoutSnafu { value })
            })
            .transpose()?;

        Ok(Self {
            urls,
            username: non_empty(USERNAME_VAR),
            password: non_empty(PASSWORD_VAR),
            timeout_ms,
        })
    }
}
