//! A completed posterior sample: the conditioning input of a generated-quantities run.

use std::path::PathBuf;

use ndarray::{ArrayD, ArrayView2};

use crate::config::ParseOptions;
use crate::draws::{DrawsTable, RunDraws};
use crate::error::Result;
use crate::invocation::Method;
use crate::io::DrawSplit;
use crate::runset::RunSet;
use crate::schema::VariableSchema;

/// What the merge engine needs from a posterior sample.
///
/// Implementors hand out read-only views; nothing here lets a caller mutate the draws.
pub trait PosteriorSource {
    fn chains(&self) -> usize;

    fn schema(&self) -> &VariableSchema;

    /// Raw column names, reserved columns included.
    fn columns(&self) -> &[String];

    /// draws × columns matrix of chain `chain` (0-based).
    fn draws(&self, chain: usize, include_warmup: bool) -> ArrayView2<'_, f64>;

    fn split(&self) -> DrawSplit;

    fn has_saved_warmup(&self) -> bool {
        self.split().warmup > 0
    }

    /// One output file per chain, in chain order.
    fn csv_files(&self) -> Vec<PathBuf>;
}

/**
Posterior draws parsed from a successful sampling run set.

```no_run
use std::path::PathBuf;
use mini_runset::config::ParseOptions;
use mini_runset::sample::{PosteriorSample, PosteriorSource};

let files: Vec<PathBuf> = (1..=4).map(|i| format!("bern-{i}.csv").into()).collect();
let fit = PosteriorSample::from_csv_files(&files, ParseOptions::default())?;
let theta = fit.variable("theta")?;
assert_eq!(theta.shape()[0], fit.chains() * fit.split().sampling);
# Ok::<(), mini_runset::error::RunSetError>(())
```
*/
#[derive(Debug)]
pub struct PosteriorSample {
    runset: RunSet,
    draws: RunDraws,
}

impl PosteriorSample {
    /// Wraps a completed run set, parsing and validating every chain.
    pub fn from_runset(runset: RunSet) -> Result<Self> {
        let draws = runset.outputs(None)?;
        Ok(Self { runset, draws })
    }

    /// Reads existing per-chain output files; an empty list is a `Configuration` error.
    pub fn from_csv_files(csv_files: &[PathBuf], parse: ParseOptions) -> Result<Self> {
        let runset = RunSet::from_completed(csv_files, Method::sample(0, 0), parse)?;
        Self::from_runset(runset)
    }

    pub fn runset(&self) -> &RunSet {
        &self.runset
    }

    pub fn run_draws(&self) -> &RunDraws {
        &self.draws
    }

    /// Sampling draws of a user variable, flattened to `(chains * draws, *shape)`.
    pub fn variable(&self, name: &str) -> Result<ArrayD<f64>> {
        let variable = self.draws.schema().lookup(name)?;
        Ok(self.draws.variable_flat(variable, false))
    }

    /// `(chains, draws, *shape)` form of a user variable.
    pub fn variable_by_chain(&self, name: &str, include_warmup: bool) -> Result<ArrayD<f64>> {
        let variable = self.draws.schema().lookup(name)?;
        Ok(self.draws.variable_by_chain(variable, include_warmup))
    }

    /// Every column, reserved ones included, one row per (chain, draw).
    pub fn draws_table(&self, include_warmup: bool) -> DrawsTable {
        self.draws.table(include_warmup)
    }
}

impl PosteriorSource for PosteriorSample {
    fn chains(&self) -> usize {
        self.draws.num_chains()
    }

    fn schema(&self) -> &VariableSchema {
        self.draws.schema()
    }

    fn columns(&self) -> &[String] {
        self.draws.columns()
    }

    fn draws(&self, chain: usize, include_warmup: bool) -> ArrayView2<'_, f64> {
        self.draws.draws(chain, include_warmup)
    }

    fn split(&self) -> DrawSplit {
        self.draws.split()
    }

    fn csv_files(&self) -> Vec<PathBuf> {
        self.runset.csv_files()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunSetError;
    use std::fs;

    fn write_chain(dir: &std::path::Path, chain: usize, warmup: usize, sampling: usize) -> PathBuf {
        let mut text = format!(
            "# method = sample (Default)\n# num_samples = {sampling}\n# num_warmup = {warmup}\n# save_warmup = {}\nlp__,theta,y[1],y[2]\n",
            u8::from(warmup > 0)
        );
        for d in 0..warmup + sampling {
            text.push_str(&format!("-{d},{}.{d},{},1\n", chain, d % 2));
        }
        let path = dir.join(format!("fit-{chain}.csv"));
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_from_csv_files_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<_> = (1..=3).map(|c| write_chain(dir.path(), c, 0, 5)).collect();
        let fit = PosteriorSample::from_csv_files(&files, ParseOptions::default()).unwrap();
        assert_eq!(fit.chains(), 3);
        assert!(!fit.has_saved_warmup());
        assert_eq!(fit.variable("theta").unwrap().shape(), &[15]);
        assert_eq!(fit.variable("y").unwrap().shape(), &[15, 2]);
        assert_eq!(fit.variable_by_chain("y", false).unwrap().shape(), &[3, 5, 2]);
        assert_eq!(fit.draws_table(false).shape(), (15, 4));
        assert_eq!(fit.csv_files(), files);
    }

    #[test]
    fn test_saved_warmup() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<_> = (1..=2).map(|c| write_chain(dir.path(), c, 3, 4)).collect();
        let fit = PosteriorSample::from_csv_files(&files, ParseOptions::default()).unwrap();
        assert!(fit.has_saved_warmup());
        assert_eq!(fit.split(), DrawSplit::new(3, 4));
        assert_eq!(fit.variable("theta").unwrap().shape(), &[8]);
        assert_eq!(fit.variable_by_chain("theta", true).unwrap().shape(), &[2, 7]);
        assert_eq!(fit.draws_table(true).row_count(), 14);
    }

    #[test]
    fn test_reserved_and_unknown_names() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![write_chain(dir.path(), 1, 0, 2)];
        let fit = PosteriorSample::from_csv_files(&files, ParseOptions::default()).unwrap();
        assert!(matches!(fit.variable("lp__"), Err(RunSetError::Name(_))));
        assert!(matches!(fit.variable("eta"), Err(RunSetError::Name(_))));
    }

    #[test]
    fn test_empty_file_list() {
        let err = PosteriorSample::from_csv_files(&[], ParseOptions::default()).unwrap_err();
        assert!(matches!(err, RunSetError::Configuration(_)));
    }
}
