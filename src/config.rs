//! Run-set and parser configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RunSetError};

/// Options controlling how output tables are parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Lines starting with this character are metadata, not data.
    #[serde(default = "default_comment_marker")]
    pub comment_marker: char,

    /// Accept `nan`, `inf` and `-inf` as draw values.
    #[serde(default)]
    pub allow_non_finite: bool,
}

fn default_comment_marker() -> char {
    '#'
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            comment_marker: default_comment_marker(),
            allow_non_finite: false,
        }
    }
}

/**
Configuration for launching a run set.

# Examples

```rust
use mini_runset::config::RunConfig;

let config = RunConfig::new(4).with_parallel_chains(2).set_seed(42);
assert_eq!(config.chain_seed(0), Some(42));
assert_eq!(config.chain_seed(3), Some(45));
assert!(config.validate().is_ok());
```
*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of chains, i.e. run units.
    #[serde(default = "default_chains")]
    pub chains: usize,

    /// Maximum number of units running at once.
    #[serde(default)]
    pub parallel_chains: Option<usize>,

    /// Global seed; chain `i` gets `seed + i`.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Wait deadline in seconds.
    #[serde(default)]
    pub timeout_secs: Option<f64>,

    /// Directory receiving per-chain output. A fresh temp dir is used when unset.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Output file prefix: `<basename>-<chain>.csv`.
    #[serde(default = "default_basename")]
    pub output_basename: String,

    #[serde(default)]
    pub show_progress: bool,

    #[serde(default)]
    pub parse: ParseOptions,
}

fn default_chains() -> usize {
    4
}

fn default_basename() -> String {
    "output".to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new(default_chains())
    }
}

impl RunConfig {
    pub fn new(chains: usize) -> Self {
        Self {
            chains,
            parallel_chains: None,
            seed: None,
            timeout_secs: None,
            output_dir: None,
            output_basename: default_basename(),
            show_progress: false,
            parse: ParseOptions::default(),
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RunSetError::io(format!("reading config {}", path.display()), e))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_parallel_chains(mut self, parallel_chains: usize) -> Self {
        self.parallel_chains = Some(parallel_chains);
        self
    }

    /// Sets the global seed. Chain `i` (0-based) is seeded with `seed + i`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_basename(mut self, basename: impl Into<String>) -> Self {
        self.output_basename = basename.into();
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn with_parse_options(mut self, parse: ParseOptions) -> Self {
        self.parse = parse;
        self
    }

    /// Effective concurrency limit: explicit value, else available parallelism capped at `chains`.
    pub fn concurrency_limit(&self) -> usize {
        match self.parallel_chains {
            Some(n) => n,
            None => {
                let threads = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                threads.min(self.chains).max(1)
            }
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Seed for chain `i` (0-based), if a global seed was set.
    pub fn chain_seed(&self, i: usize) -> Option<u64> {
        self.seed.map(|s| s.wrapping_add(i as u64))
    }

    /// Fills in a random global seed when none was given.
    pub(crate) fn resolve_seed(&mut self) -> u64 {
        *self.seed.get_or_insert_with(|| thread_rng().gen::<u64>())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains == 0 {
            return Err(RunSetError::Configuration(
                "chains must be a positive integer".to_string(),
            ));
        }
        if self.parallel_chains == Some(0) {
            return Err(RunSetError::Configuration(
                "parallel_chains must be a positive integer".to_string(),
            ));
        }
        if let Some(t) = self.timeout_secs {
            if !(t.is_finite() && t > 0.0) {
                return Err(RunSetError::Configuration(format!(
                    "timeout must be positive, got {t}"
                )));
            }
            if Duration::try_from_secs_f64(t).is_err() {
                return Err(RunSetError::Configuration(format!(
                    "timeout of {t} seconds is out of range"
                )));
            }
        }
        if self.output_basename.is_empty() {
            return Err(RunSetError::Configuration(
                "output_basename must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_chains_rejected() {
        let err = RunConfig::new(0).validate().unwrap_err();
        assert!(matches!(err, RunSetError::Configuration(_)));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = RunConfig::new(4)
            .with_parallel_chains(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, RunSetError::Configuration(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = RunConfig::new(2)
            .with_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, RunSetError::Configuration(_)));
    }

    #[test]
    fn test_huge_timeout_rejected() {
        let config = RunConfig::new(1).with_timeout(Duration::from_secs(u64::MAX));
        assert!(matches!(
            config.validate(),
            Err(RunSetError::Configuration(_))
        ));
        let config = RunConfig {
            timeout_secs: Some(1e30),
            ..RunConfig::new(1)
        };
        assert!(config.validate().is_err());
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_concurrency_defaults_capped_by_chains() {
        let config = RunConfig::new(1);
        assert_eq!(config.concurrency_limit(), 1);
        assert_eq!(RunConfig::new(8).with_parallel_chains(3).concurrency_limit(), 3);
    }

    #[test]
    fn test_resolve_seed_is_stable() {
        let mut config = RunConfig::new(2);
        let seed = config.resolve_seed();
        assert_eq!(config.resolve_seed(), seed);
        assert_eq!(config.chain_seed(1), Some(seed.wrapping_add(1)));
    }

    #[test]
    fn test_from_json_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"chains": 2, "seed": 7, "parse": {"allow_non_finite": true}}"#)
            .unwrap();
        let config = RunConfig::from_json_file(&path).unwrap();
        assert_eq!(config.chains, 2);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.output_basename, "output");
        assert_eq!(config.parse.comment_marker, '#');
        assert!(config.parse.allow_non_finite);
    }
}
