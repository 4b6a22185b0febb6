/*!
# Generated Quantities

Combines a posterior sample with the output of a generate-quantities run
conditioned on it. Draw `d` of chain `c` in the generated quantities is assumed
to come from draw `d` of chain `c` in the posterior; nothing is reordered.

Name resolution prefers the generated quantities: a name defined by both
sources resolves to the generated-quantities values, and the posterior's
columns for that name are left out of the combined table.
*/

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{concatenate, stack, Array2, ArrayD, ArrayView2, ArrayViewD, Axis};
use tracing::info;

use crate::config::RunConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::draws::{DrawsTable, RunDraws};
use crate::error::{Result, RunSetError};
use crate::invocation::{DataSource, Method};
use crate::runset::RunSet;
use crate::sample::PosteriorSource;
use crate::schema::{is_reserved, Variable};

/**
Runs a generate-quantities pass for `posterior` and wraps the result.

One chain is launched per posterior chain, each conditioned on that chain's
output file. `config.chains` is overridden by the posterior's chain count.
*/
pub fn generate_quantities<'p, P: PosteriorSource>(
    executable: impl Into<PathBuf>,
    posterior: &'p P,
    data: DataSource,
    config: RunConfig,
    sink: Arc<dyn DiagnosticSink>,
) -> Result<GeneratedQuantities<'p, P>> {
    let fitted_params = posterior.csv_files();
    let config = RunConfig {
        chains: fitted_params.len(),
        ..config
    };
    let mut runset = RunSet::new(
        executable,
        Method::GenerateQuantities { fitted_params },
        config,
    )?
    .with_data(data)
    .with_sink(Arc::clone(&sink));
    runset.run()?;
    GeneratedQuantities::new(runset, posterior, sink.as_ref())
}

/// Where a resolved name lives.
enum Resolved<'a> {
    Generated(&'a Variable),
    Posterior(&'a Variable),
}

/// A generate-quantities run set plus a borrowed view of the posterior it was conditioned on.
pub struct GeneratedQuantities<'p, P: PosteriorSource> {
    runset: RunSet,
    draws: RunDraws,
    posterior: &'p P,
}

impl<'p, P: PosteriorSource> GeneratedQuantities<'p, P> {
    /**
    Validates a completed generate-quantities run set against its posterior.

    Mismatched chain counts are a `Configuration` error raised before any
    output is parsed. A posterior with saved warmup draws emits
    [`Diagnostic::SavedWarmupUsed`]; its row split is imposed on the
    generated tables, which do not declare one themselves.
    */
    pub fn new(runset: RunSet, posterior: &'p P, sink: &dyn DiagnosticSink) -> Result<Self> {
        if runset.chains() != posterior.chains() {
            return Err(RunSetError::Configuration(format!(
                "generated quantities have {} chains but the posterior sample has {}",
                runset.chains(),
                posterior.chains()
            )));
        }

        let split = posterior.split();
        if posterior.has_saved_warmup() {
            sink.emit(&Diagnostic::SavedWarmupUsed {
                chains: posterior.chains(),
                warmup_rows: split.warmup,
            });
        }

        let draws = runset.outputs(Some(split))?;
        info!(
            chains = draws.num_chains(),
            variables = draws.schema().len(),
            "generated quantities ready"
        );
        Ok(Self {
            runset,
            draws,
            posterior,
        })
    }

    pub fn runset(&self) -> &RunSet {
        &self.runset
    }

    pub fn posterior(&self) -> &'p P {
        self.posterior
    }

    pub fn run_draws(&self) -> &RunDraws {
        &self.draws
    }

    pub fn chains(&self) -> usize {
        self.draws.num_chains()
    }

    fn resolve(&self, name: &str) -> Result<Resolved<'_>> {
        if is_reserved(name) {
            return Err(RunSetError::Name(format!(
                "`{name}` is a reserved sampler column, not a variable"
            )));
        }
        if let Ok(variable) = self.draws.schema().lookup(name) {
            return Ok(Resolved::Generated(variable));
        }
        let variable = self.posterior.schema().lookup(name).map_err(|_| {
            RunSetError::Name(format!(
                "`{name}` is neither a generated quantity nor a posterior variable"
            ))
        })?;
        Ok(Resolved::Posterior(variable))
    }

    /// Sampling draws of `name`, flattened to `(chains * draws, *shape)`.
    pub fn variable(&self, name: &str) -> Result<ArrayD<f64>> {
        let by_chain = self.variable_by_chain(name, false)?;
        let mut shape = by_chain.shape().to_vec();
        let chains = shape.remove(0);
        shape[0] *= chains;
        Ok(by_chain
            .into_shape_with_order(shape)
            .expect("chain-major array is contiguous"))
    }

    /// `(chains, draws, *shape)` form of `name`.
    pub fn variable_by_chain(&self, name: &str, include_warmup: bool) -> Result<ArrayD<f64>> {
        Ok(match self.resolve(name)? {
            Resolved::Generated(variable) => self.draws.variable_by_chain(variable, include_warmup),
            Resolved::Posterior(variable) => self.posterior_by_chain(variable, include_warmup),
        })
    }

    fn posterior_by_chain(&self, variable: &Variable, include_warmup: bool) -> ArrayD<f64> {
        let per_chain: Vec<ArrayD<f64>> = (0..self.posterior.chains())
            .map(|c| variable.extract(self.posterior.draws(c, include_warmup)))
            .collect();
        let views: Vec<ArrayViewD<'_, f64>> = per_chain.iter().map(|a| a.view()).collect();
        stack(Axis(0), &views).expect("posterior chains agree on shape")
    }

    /**
    Every user variable of both sources as a `(chains, draws, *shape)` array.

    Generated quantities shadow posterior variables of the same name.
    */
    pub fn all_variables(&self, include_warmup: bool) -> BTreeMap<String, ArrayD<f64>> {
        let mut out = BTreeMap::new();
        for variable in self.posterior.schema().variables() {
            if !self.draws.schema().contains(&variable.name) {
                out.insert(
                    variable.name.clone(),
                    self.posterior_by_chain(variable, include_warmup),
                );
            }
        }
        for variable in self.draws.schema().variables() {
            out.insert(
                variable.name.clone(),
                self.draws.variable_by_chain(variable, include_warmup),
            );
        }
        out
    }

    /// Generated-quantities user columns in file order.
    pub fn column_names(&self) -> Vec<String> {
        self.generated_columns()
            .into_iter()
            .map(|i| self.draws.columns()[i].clone())
            .collect()
    }

    fn generated_columns(&self) -> Vec<usize> {
        self.draws
            .schema()
            .variables()
            .iter()
            .flat_map(Variable::columns)
            .collect()
    }

    /// Posterior column indices kept in a combined table.
    fn posterior_columns(&self, with_reserved: bool) -> Vec<usize> {
        let schema = self.posterior.schema();
        let gq = self.draws.schema();
        let mut keep: Vec<usize> = schema
            .variables()
            .iter()
            .filter(|v| !gq.contains(&v.name))
            .flat_map(Variable::columns)
            .collect();
        if with_reserved {
            keep.extend(
                self.posterior
                    .columns()
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| schema.is_reserved_column(c))
                    .map(|(i, _)| i),
            );
            keep.sort_unstable();
        }
        keep
    }

    /// Generated-quantities user columns over every row, warmup included: `(chains * rows, columns)`.
    pub fn generated_quantities(&self) -> Array2<f64> {
        self.draws.select_columns(&self.generated_columns(), true)
    }

    pub fn generated_quantities_table(&self) -> DrawsTable {
        DrawsTable {
            columns: self.column_names(),
            values: self.generated_quantities(),
            chains: self.chains(),
            draws_per_chain: self.draws.split().total(),
        }
    }

    /**
    Posterior user columns followed by generated-quantities user columns,
    one row per (chain, draw).

    Posterior columns of any variable the generated quantities redefine are
    dropped.
    */
    pub fn combined_table(&self, include_warmup: bool) -> DrawsTable {
        self.combine(self.posterior_columns(false), include_warmup)
    }

    /// Like [`combined_table`](Self::combined_table) but keeping the posterior's reserved columns.
    pub fn sample_plus_quantities(&self, include_warmup: bool) -> DrawsTable {
        self.combine(self.posterior_columns(true), include_warmup)
    }

    fn combine(&self, posterior_columns: Vec<usize>, include_warmup: bool) -> DrawsTable {
        let gq_columns = self.generated_columns();

        let mut columns: Vec<String> = posterior_columns
            .iter()
            .map(|&i| self.posterior.columns()[i].clone())
            .collect();
        columns.extend(gq_columns.iter().map(|&i| self.draws.columns()[i].clone()));

        let per_chain: Vec<Array2<f64>> = (0..self.chains())
            .map(|c| {
                let left = self
                    .posterior
                    .draws(c, include_warmup)
                    .select(Axis(1), &posterior_columns);
                let right = self
                    .draws
                    .draws(c, include_warmup)
                    .select(Axis(1), &gq_columns);
                concatenate(Axis(1), &[left.view(), right.view()])
                    .expect("posterior and generated quantities have aligned rows")
            })
            .collect();
        let views: Vec<ArrayView2<'_, f64>> = per_chain.iter().map(|a| a.view()).collect();
        let values = concatenate(Axis(0), &views).expect("chains agree on column count");

        DrawsTable {
            columns,
            values,
            chains: self.chains(),
            draws_per_chain: self.draws.split().rows(include_warmup),
        }
    }
}

impl<P: PosteriorSource> fmt::Display for GeneratedQuantities<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GeneratedQuantities:")?;
        if let Some(model) = self.runset.model_name() {
            write!(f, " model={model}")?;
        }
        write!(
            f,
            " chains={} method={} columns=[{}]",
            self.chains(),
            self.runset.method(),
            self.column_names().join(", ")
        )
    }
}

impl<P: PosteriorSource> fmt::Debug for GeneratedQuantities<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedQuantities")
            .field("runset", &self.runset)
            .field("columns", &self.column_names())
            .field("posterior_chains", &self.posterior.chains())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParseOptions;
    use crate::diagnostics::CollectingSink;
    use crate::sample::PosteriorSample;
    use std::fs;
    use std::path::Path;

    fn write(path: &Path, text: &str) -> PathBuf {
        fs::write(path, text).unwrap();
        path.to_path_buf()
    }

    /// Posterior with `lp__`, `theta` and a 2-wide `y`; `warmup` rows saved when non-zero.
    fn posterior(dir: &Path, chains: usize, warmup: usize, sampling: usize) -> PosteriorSample {
        let files: Vec<PathBuf> = (1..=chains)
            .map(|c| {
                let mut text = format!(
                    "# num_samples = {sampling}\n# num_warmup = {warmup}\n# save_warmup = {}\nlp__,theta,y[1],y[2]\n",
                    u8::from(warmup > 0)
                );
                for d in 0..warmup + sampling {
                    text.push_str(&format!("-1,{},{},{}\n", c * 1000 + d, 0, 0));
                }
                write(&dir.join(format!("fit-{c}.csv")), &text)
            })
            .collect();
        PosteriorSample::from_csv_files(&files, ParseOptions::default()).unwrap()
    }

    /// Generated quantities redefining `y` as `[chain, draw]` and adding scalar `z`.
    fn gq_runset(dir: &Path, chains: usize, rows: usize) -> RunSet {
        let files: Vec<PathBuf> = (1..=chains)
            .map(|c| {
                let mut text = String::from("# method = generate_quantities\ny[1],y[2],z\n");
                for d in 0..rows {
                    text.push_str(&format!("{c},{d},7\n"));
                }
                write(&dir.join(format!("gq-{c}.csv")), &text)
            })
            .collect();
        RunSet::from_completed(
            &files,
            Method::GenerateQuantities {
                fitted_params: files.clone(),
            },
            ParseOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_dedup_prefers_generated_values() {
        let dir = tempfile::tempdir().unwrap();
        let fit = posterior(dir.path(), 2, 0, 3);
        let sink = CollectingSink::new();
        let gq = GeneratedQuantities::new(gq_runset(dir.path(), 2, 3), &fit, &sink).unwrap();
        assert!(sink.events().is_empty());

        let y = gq.variable("y").unwrap();
        assert_eq!(y.shape(), &[6, 2]);
        assert_eq!(y[[4, 0]], 2.0);
        assert_eq!(y[[4, 1]], 1.0);

        let table = gq.combined_table(false);
        assert_eq!(table.columns, vec!["theta", "y[1]", "y[2]", "z"]);
        assert_eq!(table.row_count(), 6);
        assert_eq!(table.column("y[1]").unwrap()[table.row_of(1, 2)], 2.0);
        assert_eq!(table.column("theta").unwrap()[table.row_of(1, 2)], 2002.0);
    }

    #[test]
    fn test_falls_back_to_posterior() {
        let dir = tempfile::tempdir().unwrap();
        let fit = posterior(dir.path(), 2, 0, 3);
        let gq = GeneratedQuantities::new(gq_runset(dir.path(), 2, 3), &fit, &CollectingSink::new())
            .unwrap();
        let theta = gq.variable("theta").unwrap();
        assert_eq!(theta.shape(), &[6]);
        assert_eq!(theta[[3]], 2000.0);
        assert!(matches!(gq.variable("lp__"), Err(RunSetError::Name(_))));
        assert!(matches!(gq.variable("eta"), Err(RunSetError::Name(_))));
    }

    #[test]
    fn test_variable_is_idempotent_and_matches_chain_form() {
        let dir = tempfile::tempdir().unwrap();
        let fit = posterior(dir.path(), 3, 0, 4);
        let gq = GeneratedQuantities::new(gq_runset(dir.path(), 3, 4), &fit, &CollectingSink::new())
            .unwrap();
        assert_eq!(gq.variable("y").unwrap(), gq.variable("y").unwrap());
        let by_chain = gq.variable_by_chain("y", false).unwrap();
        assert_eq!(by_chain.shape(), &[3, 4, 2]);
        assert_eq!(
            by_chain.into_shape_with_order(vec![12, 2]).unwrap(),
            gq.variable("y").unwrap()
        );
    }

    #[test]
    fn test_all_variables_union() {
        let dir = tempfile::tempdir().unwrap();
        let fit = posterior(dir.path(), 2, 0, 3);
        let gq = GeneratedQuantities::new(gq_runset(dir.path(), 2, 3), &fit, &CollectingSink::new())
            .unwrap();
        let all = gq.all_variables(false);
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["theta", "y", "z"]);
        assert_eq!(all["y"].shape(), &[2, 3, 2]);
        assert_eq!(all["y"][[1, 2, 0]], 2.0);
        assert_eq!(all["theta"].shape(), &[2, 3]);
        assert_eq!(all["theta"], gq.variable_by_chain("theta", false).unwrap());
        assert_eq!(all["theta"][[1, 2]], 2002.0);
    }

    #[test]
    fn test_saved_warmup_warns_and_splits_rows() {
        let dir = tempfile::tempdir().unwrap();
        let fit = posterior(dir.path(), 2, 2, 3);
        let sink = CollectingSink::new();
        let gq = GeneratedQuantities::new(gq_runset(dir.path(), 2, 5), &fit, &sink).unwrap();
        assert_eq!(
            sink.events(),
            vec![Diagnostic::SavedWarmupUsed {
                chains: 2,
                warmup_rows: 2
            }]
        );
        assert_eq!(gq.generated_quantities().dim(), (10, 3));
        assert_eq!(gq.combined_table(false).row_count(), 6);
        assert_eq!(gq.combined_table(true).row_count(), 10);
        assert_eq!(gq.variable("y").unwrap().shape(), &[6, 2]);
        assert_eq!(gq.variable_by_chain("z", true).unwrap().shape(), &[2, 5]);
        // first sampling draw of chain 1 is row 2 of its table
        assert_eq!(gq.variable("y").unwrap()[[0, 1]], 2.0);
        assert_eq!(gq.variable("theta").unwrap()[[0]], 1002.0);
    }

    #[test]
    fn test_chain_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let fit = posterior(dir.path(), 2, 0, 3);
        let err = GeneratedQuantities::new(gq_runset(dir.path(), 3, 3), &fit, &CollectingSink::new())
            .unwrap_err();
        assert!(matches!(err, RunSetError::Configuration(_)));
    }

    #[test]
    fn test_row_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let fit = posterior(dir.path(), 2, 0, 3);
        let err = GeneratedQuantities::new(gq_runset(dir.path(), 2, 4), &fit, &CollectingSink::new())
            .unwrap_err();
        assert!(matches!(err, RunSetError::SchemaMismatch(_)));
    }

    #[test]
    fn test_sample_plus_quantities_keeps_reserved_columns() {
        let dir = tempfile::tempdir().unwrap();
        let fit = posterior(dir.path(), 2, 0, 3);
        let gq = GeneratedQuantities::new(gq_runset(dir.path(), 2, 3), &fit, &CollectingSink::new())
            .unwrap();
        let table = gq.sample_plus_quantities(false);
        assert_eq!(table.columns, vec!["lp__", "theta", "y[1]", "y[2]", "z"]);
        assert_eq!(gq.column_names(), vec!["y[1]", "y[2]", "z"]);
        assert!(gq.to_string().contains("method=generate_quantities"));
    }
}
