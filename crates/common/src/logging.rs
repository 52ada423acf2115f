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

use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoggingError {
    #[snafu(display("Invalid log filter '{directives}': {source}"))]
    Filter {
        directives: String,
        source:     tracing_subscriber::filter::ParseError,
    },

    #[snafu(display("Failed to install global subscriber: {source}"))]
    Install {
        source: tracing_subscriber::util::TryInitError,
    },
}

pub type Result<T, E = LoggingError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Filter used when `RUST_LOG` is unset
    pub level:       String,
    /// Also write daily-rotated files here
    pub directory:   Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level:       "info".to_string(),
            directory:   None,
            file_prefix: "gpudb.log".to_string(),
        }
    }
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file sink when dropped; keep it alive for
/// the lifetime of the process.
pub fn init(options: &LoggingOptions) -> Result<Option<WorkerGuard>> {
    let directives =
        std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| options.level.clone());
    let filter = parse_filter(&directives)?;

    let console = fmt::layer()
        // Use a more compact, abbreviated log format
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);

    let (file, guard) = match &options.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &options.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context(InstallSnafu)?;
    Ok(guard)
}

pub fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).context(FilterSnafu { directives })
}
