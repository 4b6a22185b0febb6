/*!
# Variable Schema Resolver

Groups flat column names into named variables:

- `theta` is a scalar occupying one column.
- `y_rep[1]` .. `y_rep[10]` is a vector variable `y_rep` with shape `[10]`.
- `m[1,1], m[2,1], m[1,2], m[2,2], m[1,3], m[2,3]` is a matrix `m` with shape `[2, 3]`.
  Indices are 1-based and flattened in column-major order (first index fastest).

Columns whose name ends in `__` (`lp__`, `accept_stat__`, `treedepth__`, ...) are
reserved sampler output. They stay in the raw draws matrix but are never
resolvable as variables.

```rust
use mini_runset::schema::VariableSchema;

let columns = ["lp__", "theta", "y[1]", "y[2]", "y[3]"].map(String::from);
let schema = VariableSchema::from_columns(&columns).unwrap();
let y = schema.lookup("y").unwrap();
assert_eq!(y.shape, vec![3]);
assert_eq!((y.offset, y.len), (2, 3));
assert!(schema.lookup("lp__").is_err());
```
*/

use std::collections::HashMap;

use ndarray::{ArrayD, ArrayView2, Axis, IxDyn, ShapeBuilder};

use crate::error::{Result, RunSetError};

/// Name of the log-density column.
pub const LOG_DENSITY_COLUMN: &str = "lp__";

/// True for sampler-internal column names.
pub fn is_reserved(name: &str) -> bool {
    name.ends_with("__")
}

/// A named variable reconstructed from a contiguous block of columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// Empty for scalars.
    pub shape: Vec<usize>,
    /// Index of the variable's first column.
    pub offset: usize,
    /// Number of columns; always `shape.iter().product()`.
    pub len: usize,
}

impl Variable {
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Column range of this variable in the raw matrix.
    pub fn columns(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Pulls this variable out of a draws × columns matrix as an array of shape `(draws, *shape)`.
    pub fn extract(&self, draws: ArrayView2<'_, f64>) -> ArrayD<f64> {
        let block = draws.slice_axis(Axis(1), self.columns().into());
        if self.is_scalar() {
            return block.column(0).to_owned().into_dyn();
        }

        let mut full_shape = Vec::with_capacity(self.shape.len() + 1);
        full_shape.push(block.nrows());
        full_shape.extend_from_slice(&self.shape);
        let mut out = ArrayD::<f64>::zeros(IxDyn(&full_shape));

        for (row, mut dest) in block.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
            // Column-major source, so build the per-draw array with Fortran strides.
            let cell = ArrayD::from_shape_vec(IxDyn(&self.shape).f(), row.to_vec())
                .expect("block width equals the product of the shape");
            dest.assign(&cell);
        }
        out
    }
}

/// Ordered mapping from variable name to shape and column block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSchema {
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
    /// Reserved column names with their positions.
    reserved: Vec<(String, usize)>,
}

struct Block {
    name: String,
    start: usize,
    indices: Vec<Option<Vec<usize>>>,
}

impl VariableSchema {
    /// Resolves an ordered column list into variables.
    pub fn from_columns(columns: &[String]) -> Result<Self> {
        let mut schema = Self::default();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut current: Option<Block> = None;

        for (pos, column) in columns.iter().enumerate() {
            let (name, indices) = split_column(column)?;

            if is_reserved(name) {
                if indices.is_some() {
                    return Err(RunSetError::SchemaMismatch(format!(
                        "reserved column `{column}` cannot be indexed"
                    )));
                }
                if let Some(block) = current.take() {
                    schema.close(block, &mut seen)?;
                }
                if seen.insert(name.to_string(), pos).is_some() {
                    return Err(RunSetError::SchemaMismatch(format!(
                        "column `{column}` appears more than once"
                    )));
                }
                schema.reserved.push((name.to_string(), pos));
                continue;
            }

            match current.as_mut() {
                Some(block) if block.name == name => block.indices.push(indices),
                _ => {
                    if let Some(block) = current.take() {
                        schema.close(block, &mut seen)?;
                    }
                    current = Some(Block {
                        name: name.to_string(),
                        start: pos,
                        indices: vec![indices],
                    });
                }
            }
        }
        if let Some(block) = current.take() {
            schema.close(block, &mut seen)?;
        }
        Ok(schema)
    }

    fn close(&mut self, block: Block, seen: &mut HashMap<String, usize>) -> Result<()> {
        if let Some(first) = seen.insert(block.name.clone(), block.start) {
            return Err(RunSetError::SchemaMismatch(format!(
                "columns of `{}` are not contiguous (block at column {} interrupted before column {})",
                block.name,
                first + 1,
                block.start + 1
            )));
        }
        let shape = block_shape(&block)?;
        let len = block.indices.len();
        let variable = Variable {
            name: block.name,
            shape,
            offset: block.start,
            len,
        };
        self.index
            .insert(variable.name.clone(), self.variables.len());
        self.variables.push(variable);
        Ok(())
    }

    /// Resolved user variable by name. Reserved and unknown names are both a `Name` error.
    pub fn lookup(&self, name: &str) -> Result<&Variable> {
        match self.index.get(name) {
            Some(&i) => Ok(&self.variables[i]),
            None if self.is_reserved_column(name) => Err(RunSetError::Name(format!(
                "`{name}` is a reserved sampler column, not a variable"
            ))),
            None => Err(RunSetError::Name(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// True if `name` is one of this schema's reserved columns.
    pub fn is_reserved_column(&self, name: &str) -> bool {
        self.reserved.iter().any(|(n, _)| n == name)
    }

    pub fn reserved_columns(&self) -> impl Iterator<Item = &str> {
        self.reserved.iter().map(|(n, _)| n.as_str())
    }

    /// User variables in column order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Splits `name[i,j]` into `("name", Some([i, j]))` and `name` into `("name", None)`.
fn split_column(column: &str) -> Result<(&str, Option<Vec<usize>>)> {
    let Some(open) = column.find('[') else {
        if column.contains(']') {
            return Err(malformed(column));
        }
        return Ok((column, None));
    };
    let inner = column[open + 1..]
        .strip_suffix(']')
        .ok_or_else(|| malformed(column))?;
    let name = &column[..open];
    if name.is_empty() || inner.contains('[') || inner.contains(']') {
        return Err(malformed(column));
    }
    let indices = inner
        .split(',')
        .map(|s| match s.trim().parse::<usize>() {
            Ok(i) if i >= 1 => Ok(i),
            _ => Err(malformed(column)),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((name, Some(indices)))
}

fn malformed(column: &str) -> RunSetError {
    RunSetError::SchemaMismatch(format!("malformed column name `{column}`"))
}

/// Infers and checks the shape of one contiguous column block.
fn block_shape(block: &Block) -> Result<Vec<usize>> {
    let name = &block.name;
    if block.indices.iter().all(Option::is_none) {
        if block.indices.len() > 1 {
            return Err(RunSetError::SchemaMismatch(format!(
                "scalar `{name}` appears in {} columns",
                block.indices.len()
            )));
        }
        return Ok(Vec::new());
    }

    let indices: Vec<&Vec<usize>> = block
        .indices
        .iter()
        .map(|i| {
            i.as_ref().ok_or_else(|| {
                RunSetError::SchemaMismatch(format!("`{name}` mixes scalar and indexed columns"))
            })
        })
        .collect::<Result<_>>()?;

    let rank = indices[0].len();
    if indices.iter().any(|i| i.len() != rank) {
        return Err(RunSetError::SchemaMismatch(format!(
            "`{name}` has columns of differing dimensionality"
        )));
    }

    let mut shape = vec![0; rank];
    for idx in &indices {
        for (s, &i) in shape.iter_mut().zip(idx.iter()) {
            *s = (*s).max(i);
        }
    }

    let expected: usize = shape.iter().product();
    if expected != indices.len() {
        return Err(RunSetError::SchemaMismatch(format!(
            "`{name}` with shape {shape:?} needs {expected} columns, found {}",
            indices.len()
        )));
    }

    for (k, idx) in indices.iter().enumerate() {
        let want = column_major_index(k, &shape);
        if **idx != want {
            return Err(RunSetError::SchemaMismatch(format!(
                "`{name}` column {} is {idx:?}, expected {want:?} in column-major order",
                block.start + k + 1
            )));
        }
    }
    Ok(shape)
}

/// 1-based multi-index of the `k`-th element in column-major order.
fn column_major_index(mut k: usize, shape: &[usize]) -> Vec<usize> {
    shape
        .iter()
        .map(|&s| {
            let i = k % s;
            k /= s;
            i + 1
        })
        .collect()
}
