// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::{Result, anyhow};
use serde::Deserialize;

/// Seconds since the epoch at the time the relative-vs-absolute timestamp heuristic was written (June 2013).  A bare
/// `secs.frac` timestamp above this is read as `-ttt`, anything else as `-r`.
pub const DEFAULT_EPOCH_THRESHOLD: i64 = 1_371_488_434;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ParserConfig {
    pub epoch_threshold: i64,
    /// Reject traces whose first line shows abbreviated structures (strace run without `-v`).
    pub require_verbose: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            epoch_threshold: DEFAULT_EPOCH_THRESHOLD,
            require_verbose: true,
        }
    }
}

pub fn load_config(override_config: Option<&Path>) -> Result<ParserConfig> {
    let path = match override_config {
        Some(path) => path,
        None => Path::new(".config/traceparse.toml"),
    };
    if fs::exists(path)? {
        Ok(toml::from_str(&fs::read_to_string(path)?)?)
    } else {
        if let Some(override_config) = override_config {
            return Err(anyhow!(
                "override config path {override_config:?} could not be opened"
            ));
        }
        Ok(ParserConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use anyhow::Result;
    use tempfile::NamedTempFile;

    use super::{DEFAULT_EPOCH_THRESHOLD, ParserConfig, load_config};

    #[test]
    fn partial_config() -> Result<()> {
        let config: ParserConfig = toml::from_str("epoch-threshold = 1000")?;
        assert_eq!(config.epoch_threshold, 1000);
        assert!(config.require_verbose);
        Ok(())
    }

    #[test]
    fn load_override() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "require-verbose = false")?;
        let config = load_config(Some(file.path()))?;
        assert_eq!(
            config,
            ParserConfig {
                epoch_threshold: DEFAULT_EPOCH_THRESHOLD,
                require_verbose: false,
            }
        );
        Ok(())
    }

    #[test]
    fn missing_override_is_error() {
        let result = load_config(Some(std::path::Path::new("/nonexistent/traceparse.toml")));
        assert!(result.is_err());
    }
}
