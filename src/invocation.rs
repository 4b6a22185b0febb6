//! Command lines handed to the external sampler executable.
//!
//! Arguments follow the CmdStan grammar, e.g.
//!
//! ```text
//! ./model id=2 random seed=43 data file=data.json output file=out-2.csv \
//!     method=generate_quantities fitted_params=fit-2.csv
//! ```

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunSetError};

/// The method a run set executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Sample {
        num_warmup: usize,
        num_samples: usize,
        save_warmup: bool,
        thin: usize,
    },
    /// Conditioned on one fitted-params CSV per chain.
    GenerateQuantities { fitted_params: Vec<PathBuf> },
}

impl Method {
    pub fn sample(num_warmup: usize, num_samples: usize) -> Self {
        Method::Sample {
            num_warmup,
            num_samples,
            save_warmup: false,
            thin: 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::Sample { .. } => "sample",
            Method::GenerateQuantities { .. } => "generate_quantities",
        }
    }

    fn args(&self, chain: usize) -> Result<Vec<OsString>> {
        match self {
            Method::Sample {
                num_warmup,
                num_samples,
                save_warmup,
                thin,
            } => {
                if *thin == 0 {
                    return Err(RunSetError::Configuration(
                        "thin must be a positive integer".to_string(),
                    ));
                }
                Ok(vec![
                    "method=sample".into(),
                    format!("num_samples={num_samples}").into(),
                    format!("num_warmup={num_warmup}").into(),
                    format!("save_warmup={}", u8::from(*save_warmup)).into(),
                    format!("thin={thin}").into(),
                ])
            }
            Method::GenerateQuantities { fitted_params } => {
                let csv = chain
                    .checked_sub(1)
                    .and_then(|i| fitted_params.get(i))
                    .ok_or_else(|| {
                        RunSetError::Configuration(format!(
                            "no fitted-params file for chain {chain} ({} given)",
                            fitted_params.len()
                        ))
                    })?;
                Ok(vec![
                    "method=generate_quantities".into(),
                    prefixed("fitted_params=", csv),
                ])
            }
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Model data: none, an existing file, or inline JSON written out before launch.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DataSource {
    #[default]
    None,
    File(PathBuf),
    Json(serde_json::Value),
}

impl DataSource {
    /// Path to pass on the command line, writing inline JSON to `dir/<basename>-data.json` first.
    pub(crate) fn materialize(&self, dir: &Path, basename: &str) -> Result<Option<PathBuf>> {
        match self {
            DataSource::None => Ok(None),
            DataSource::File(path) => {
                if !path.is_file() {
                    return Err(RunSetError::Configuration(format!(
                        "data file {} does not exist",
                        path.display()
                    )));
                }
                Ok(Some(path.clone()))
            }
            DataSource::Json(value) => {
                let path = dir.join(format!("{basename}-data.json"));
                let text = serde_json::to_string_pretty(value)?;
                std::fs::write(&path, text)
                    .map_err(|e| RunSetError::io(format!("writing {}", path.display()), e))?;
                Ok(Some(path))
            }
        }
    }
}

/// Everything needed to start one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub executable: PathBuf,
    /// 1-based chain id.
    pub chain_id: usize,
    pub seed: Option<u64>,
    pub data_file: Option<PathBuf>,
    pub output_file: PathBuf,
    pub method: Method,
}

impl Invocation {
    /// Argument list, excluding the executable itself.
    pub fn args(&self) -> Result<Vec<OsString>> {
        let mut args: Vec<OsString> = vec![format!("id={}", self.chain_id).into()];
        if let Some(seed) = self.seed {
            args.push("random".into());
            args.push(format!("seed={seed}").into());
        }
        if let Some(data) = &self.data_file {
            args.push("data".into());
            args.push(prefixed("file=", data));
        }
        args.push("output".into());
        args.push(prefixed("file=", &self.output_file));
        args.extend(self.method.args(self.chain_id)?);
        Ok(args)
    }
}

fn prefixed(prefix: &str, path: &Path) -> OsString {
    let mut s = OsString::from(prefix);
    s.push(path.as_os_str());
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.into_string().unwrap())
            .collect()
    }

    #[test]
    fn test_sample_args() {
        let inv = Invocation {
            executable: PathBuf::from("/models/bern"),
            chain_id: 2,
            seed: Some(43),
            data_file: Some(PathBuf::from("/d/bern.json")),
            output_file: PathBuf::from("/out/bern-2.csv"),
            method: Method::Sample {
                num_warmup: 100,
                num_samples: 100,
                save_warmup: true,
                thin: 1,
            },
        };
        assert_eq!(
            strings(inv.args().unwrap()),
            vec![
                "id=2",
                "random",
                "seed=43",
                "data",
                "file=/d/bern.json",
                "output",
                "file=/out/bern-2.csv",
                "method=sample",
                "num_samples=100",
                "num_warmup=100",
                "save_warmup=1",
                "thin=1",
            ]
        );
    }

    #[test]
    fn test_gq_args_pick_matching_chain() {
        let inv = Invocation {
            executable: PathBuf::from("gq"),
            chain_id: 3,
            seed: None,
            data_file: None,
            output_file: PathBuf::from("gq-3.csv"),
            method: Method::GenerateQuantities {
                fitted_params: (1..=4).map(|i| PathBuf::from(format!("fit-{i}.csv"))).collect(),
            },
        };
        let args = strings(inv.args().unwrap());
        assert_eq!(args.last().unwrap(), "fitted_params=fit-3.csv");
        assert!(!args.contains(&"random".to_string()));
    }

    #[test]
    fn test_gq_args_missing_chain_file() {
        let inv = Invocation {
            executable: PathBuf::from("gq"),
            chain_id: 2,
            seed: None,
            data_file: None,
            output_file: PathBuf::from("gq-2.csv"),
            method: Method::GenerateQuantities {
                fitted_params: vec![PathBuf::from("fit-1.csv")],
            },
        };
        assert!(matches!(inv.args(), Err(RunSetError::Configuration(_))));
    }

    #[test]
    fn test_inline_json_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataSource::Json(serde_json::json!({"N": 2, "y": [0, 1]}));
        let path = data.materialize(dir.path(), "bern").unwrap().unwrap();
        assert_eq!(path, dir.path().join("bern-data.json"));
        let back: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back["y"][1], 1);
    }

    #[test]
    fn test_missing_data_file() {
        let data = DataSource::File(PathBuf::from("/definitely/not/here.json"));
        assert!(matches!(
            data.materialize(Path::new("/tmp"), "x"),
            Err(RunSetError::Configuration(_))
        ));
    }
}
