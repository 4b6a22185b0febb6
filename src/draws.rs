//! Validated, parsed draws of a whole run set and the tabular views built from them.

use std::path::Path;

use ndarray::{concatenate, stack, Array2, ArrayD, ArrayView1, ArrayView2, ArrayViewD, Axis};

use crate::error::{Result, RunSetError};
use crate::io::csv::save_csv;
use crate::io::{ChainOutput, DrawSplit};
use crate::schema::{Variable, VariableSchema};

/// Every chain of a run set, parsed and checked to agree on columns and row split.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDraws {
    chains: Vec<ChainOutput>,
    columns: Vec<String>,
    schema: VariableSchema,
    split: DrawSplit,
}

impl RunDraws {
    /**
    Checks cross-chain agreement and resolves the row split.

    Every chain must have the same column list and the same declared split. A
    chain set without declared metadata takes `expected`; without either, all
    rows count as sampling rows. When both are present they must agree.
    */
    pub fn from_chains(chains: Vec<ChainOutput>, expected: Option<DrawSplit>) -> Result<Self> {
        let first = chains.first().ok_or_else(|| {
            RunSetError::Configuration("a run set needs at least one chain".to_string())
        })?;
        let columns = first.columns.clone();
        let declared = first.declared_split;

        for (i, chain) in chains.iter().enumerate().skip(1) {
            if chain.columns != columns {
                return Err(RunSetError::SchemaMismatch(format!(
                    "chain {} columns differ from chain 1 ({} vs {} columns)",
                    i + 1,
                    chain.columns.len(),
                    columns.len()
                )));
            }
            if chain.declared_split != declared {
                return Err(RunSetError::SchemaMismatch(format!(
                    "chain {} declares row split {:?}, chain 1 declares {:?}",
                    i + 1,
                    chain.declared_split,
                    declared
                )));
            }
        }

        let split = match (declared, expected) {
            (Some(d), Some(e)) if d != e => {
                return Err(RunSetError::SchemaMismatch(format!(
                    "declared row split {d:?} disagrees with expected {e:?}"
                )))
            }
            (Some(d), _) => d,
            (None, Some(e)) => e,
            (None, None) => DrawSplit::new(0, first.rows()),
        };

        for (i, chain) in chains.iter().enumerate() {
            if chain.rows() != split.total() {
                return Err(RunSetError::SchemaMismatch(format!(
                    "chain {} has {} rows, expected {} warmup + {} sampling",
                    i + 1,
                    chain.rows(),
                    split.warmup,
                    split.sampling
                )));
            }
        }

        let schema = VariableSchema::from_columns(&columns)?;
        Ok(Self {
            chains,
            columns,
            schema,
            split,
        })
    }

    pub fn num_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn schema(&self) -> &VariableSchema {
        &self.schema
    }

    pub fn split(&self) -> DrawSplit {
        self.split
    }

    pub fn chain(&self, chain: usize) -> &ChainOutput {
        &self.chains[chain]
    }

    /// Raw draws × columns matrix of one chain (0-based).
    pub fn draws(&self, chain: usize, include_warmup: bool) -> ArrayView2<'_, f64> {
        self.chains[chain].rows_view(self.split, include_warmup)
    }

    /// `(chains, draws, *shape)` array for a resolved variable.
    pub fn variable_by_chain(&self, variable: &Variable, include_warmup: bool) -> ArrayD<f64> {
        let per_chain: Vec<ArrayD<f64>> = (0..self.num_chains())
            .map(|c| variable.extract(self.draws(c, include_warmup)))
            .collect();
        let views: Vec<ArrayViewD<'_, f64>> = per_chain.iter().map(|a| a.view()).collect();
        stack(Axis(0), &views).expect("chains agree on rows and variable shape")
    }

    /// `(chains * draws, *shape)` array for a resolved variable, chain-major.
    pub fn variable_flat(&self, variable: &Variable, include_warmup: bool) -> ArrayD<f64> {
        let per_chain: Vec<ArrayD<f64>> = (0..self.num_chains())
            .map(|c| variable.extract(self.draws(c, include_warmup)))
            .collect();
        let views: Vec<ArrayViewD<'_, f64>> = per_chain.iter().map(|a| a.view()).collect();
        concatenate(Axis(0), &views).expect("chains agree on variable shape")
    }

    /// Selected columns of every chain stacked chain-major into one matrix.
    pub fn select_columns(&self, columns: &[usize], include_warmup: bool) -> Array2<f64> {
        let per_chain: Vec<Array2<f64>> = (0..self.num_chains())
            .map(|c| self.draws(c, include_warmup).select(Axis(1), columns))
            .collect();
        let views: Vec<ArrayView2<'_, f64>> = per_chain.iter().map(|a| a.view()).collect();
        concatenate(Axis(0), &views).expect("chains agree on column count")
    }

    /// Whole-table view of every column, chain-major.
    pub fn table(&self, include_warmup: bool) -> DrawsTable {
        let all: Vec<usize> = (0..self.columns.len()).collect();
        DrawsTable {
            columns: self.columns.clone(),
            values: self.select_columns(&all, include_warmup),
            chains: self.num_chains(),
            draws_per_chain: self.split.rows(include_warmup),
        }
    }
}

/// A flat table of draws: one row per (chain, draw), chain-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawsTable {
    pub columns: Vec<String>,
    pub values: Array2<f64>,
    pub chains: usize,
    pub draws_per_chain: usize,
}

impl DrawsTable {
    /// `(rows, columns)`
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn row_count(&self) -> usize {
        self.values.nrows()
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let i = self.columns.iter().position(|c| c == name)?;
        Some(self.values.column(i))
    }

    /// Row index of draw `draw` (0-based) of chain `chain` (0-based).
    pub fn row_of(&self, chain: usize, draw: usize) -> usize {
        chain * self.draws_per_chain + draw
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        save_csv(&self.columns, self.values.view(), self.draws_per_chain, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParseOptions;
    use crate::io::csv::parse_table_str;

    fn chain(text: &str) -> ChainOutput {
        parse_table_str(text, Path::new("x.csv"), &ParseOptions::default()).unwrap()
    }

    const C1: &str = "# num_samples = 2\n# num_warmup = 1\n# save_warmup = 1\nlp__,theta,y[1],y[2]\n-1,0.1,0,1\n-2,0.2,1,1\n-3,0.3,1,0\n";
    const C2: &str = "# num_samples = 2\n# num_warmup = 1\n# save_warmup = 1\nlp__,theta,y[1],y[2]\n-4,0.4,0,0\n-5,0.5,1,1\n-6,0.6,0,1\n";

    #[test]
    fn test_variable_views_agree() {
        let draws = RunDraws::from_chains(vec![chain(C1), chain(C2)], None).unwrap();
        assert_eq!(draws.split(), DrawSplit::new(1, 2));
        let y = draws.schema().lookup("y").unwrap().clone();

        let by_chain = draws.variable_by_chain(&y, false);
        assert_eq!(by_chain.shape(), &[2, 2, 2]);
        let flat = draws.variable_flat(&y, false);
        assert_eq!(flat.shape(), &[4, 2]);

        let reshaped = by_chain.into_shape_with_order(vec![4, 2]).unwrap();
        assert_eq!(reshaped, flat);

        let cols = draws.select_columns(&[2, 3], false);
        assert_eq!(cols.into_dyn(), flat);
    }

    #[test]
    fn test_table_row_counts() {
        let draws = RunDraws::from_chains(vec![chain(C1), chain(C2)], None).unwrap();
        assert_eq!(draws.table(false).shape(), (4, 4));
        assert_eq!(draws.table(true).shape(), (6, 4));
        let table = draws.table(false);
        assert_eq!(table.column("theta").unwrap()[table.row_of(1, 0)], 0.5);
    }

    #[test]
    fn test_column_disagreement() {
        let other = "# num_samples = 2\n# num_warmup = 1\n# save_warmup = 1\nlp__,theta,z\n-1,0,0\n-1,0,0\n-1,0,0\n";
        let err = RunDraws::from_chains(vec![chain(C1), chain(other)], None).unwrap_err();
        assert!(matches!(err, RunSetError::SchemaMismatch(_)));
    }

    #[test]
    fn test_split_disagreement() {
        let other = "# num_samples = 3\nlp__,theta,y[1],y[2]\n-1,0,0,0\n-1,0,0,0\n-1,0,0,0\n";
        let err = RunDraws::from_chains(vec![chain(C1), chain(other)], None).unwrap_err();
        assert!(matches!(err, RunSetError::SchemaMismatch(_)));
    }

    #[test]
    fn test_expected_split_applies_to_undeclared_tables() {
        let gq = "y[1]\n1\n2\n3\n";
        let draws =
            RunDraws::from_chains(vec![chain(gq)], Some(DrawSplit::new(1, 2))).unwrap();
        assert_eq!(draws.draws(0, false).nrows(), 2);
        assert_eq!(draws.draws(0, false)[[0, 0]], 2.0);

        let err = RunDraws::from_chains(vec![chain(gq)], Some(DrawSplit::new(0, 2))).unwrap_err();
        assert!(matches!(err, RunSetError::SchemaMismatch(_)));
    }

    #[test]
    fn test_declared_and_expected_must_agree() {
        let err =
            RunDraws::from_chains(vec![chain(C1)], Some(DrawSplit::new(0, 3))).unwrap_err();
        assert!(matches!(err, RunSetError::SchemaMismatch(_)));
    }
}
