/*!
# Output Table Parser

Parses the CSV file one chain leaves behind. The format is narrow:

```text
# method = sample (Default)
# num_samples = 100
# num_warmup = 100
# save_warmup = 0
lp__,accept_stat__,theta,y_rep[1],y_rep[2]
-7.1,0.93,0.25,0,1
...
```

Comment lines carry `key = value` metadata and may appear anywhere. The first
non-comment line is the header; every further non-comment line is one draw.
*/

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim, Writer};
use ndarray::{Array2, ArrayView2, Axis};
use tracing::debug;

use crate::config::ParseOptions;
use crate::error::{Result, RunSetError};

/// How a chain's rows divide between warmup and sampling draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawSplit {
    /// Saved warmup rows (0 when warmup was not saved).
    pub warmup: usize,
    pub sampling: usize,
}

impl DrawSplit {
    pub fn new(warmup: usize, sampling: usize) -> Self {
        Self { warmup, sampling }
    }

    pub fn total(&self) -> usize {
        self.warmup + self.sampling
    }

    /// Number of rows visible with or without warmup.
    pub fn rows(&self, include_warmup: bool) -> usize {
        if include_warmup {
            self.total()
        } else {
            self.sampling
        }
    }

    /// First visible row with or without warmup.
    pub fn first_row(&self, include_warmup: bool) -> usize {
        if include_warmup {
            0
        } else {
            self.warmup
        }
    }
}

/// `key = value` pairs captured from comment lines, first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMetadata {
    entries: BTreeMap<String, String>,
}

impl TableMetadata {
    fn capture(&mut self, comment: &str) {
        let Some((key, value)) = comment.split_once('=') else {
            return;
        };
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        let value = value.trim();
        let value = value.strip_suffix("(Default)").unwrap_or(value).trim();
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn method(&self) -> Option<&str> {
        self.get("method")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_usize(&self, key: &str) -> std::result::Result<Option<usize>, String> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<usize>()
                .map(Some)
                .map_err(|_| format!("metadata `{key}` is not a count: `{v}`")),
        }
    }

    fn get_flag(&self, key: &str) -> std::result::Result<bool, String> {
        match self.get(key) {
            None | Some("0") | Some("false") => Ok(false),
            Some("1") | Some("true") => Ok(true),
            Some(v) => Err(format!("metadata `{key}` is not a flag: `{v}`")),
        }
    }

    /// Warmup/sampling split declared by the metadata, if `num_samples` is present.
    ///
    /// Thinning keeps every `thin`-th iteration, so `n` iterations yield `ceil(n / thin)` rows.
    pub fn declared_split(&self) -> std::result::Result<Option<DrawSplit>, String> {
        let Some(num_samples) = self.get_usize("num_samples")? else {
            return Ok(None);
        };
        let thin = self.get_usize("thin")?.unwrap_or(1);
        if thin == 0 {
            return Err("metadata `thin` must be positive".to_string());
        }
        let warmup = if self.get_flag("save_warmup")? {
            self.get_usize("num_warmup")?.unwrap_or(0).div_ceil(thin)
        } else {
            0
        };
        Ok(Some(DrawSplit::new(warmup, num_samples.div_ceil(thin))))
    }
}

/// One chain's parsed output. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    pub path: PathBuf,
    pub metadata: TableMetadata,
    pub columns: Vec<String>,
    /// draws × columns
    pub draws: Array2<f64>,
    /// Split declared in metadata; `None` when the table does not say (e.g. generated quantities).
    pub declared_split: Option<DrawSplit>,
}

impl ChainOutput {
    pub fn rows(&self) -> usize {
        self.draws.nrows()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rows of this chain, with or without the leading warmup block.
    pub fn rows_view(&self, split: DrawSplit, include_warmup: bool) -> ArrayView2<'_, f64> {
        let start = split.first_row(include_warmup);
        self.draws
            .slice_axis(Axis(0), (start..split.total()).into())
    }
}

/// Parses one chain's output file.
pub fn parse_table(path: impl AsRef<Path>, options: &ParseOptions) -> Result<ChainOutput> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| RunSetError::io(format!("reading {}", path.display()), e))?;
    let text = String::from_utf8(bytes).map_err(|e| {
        let bad = e.utf8_error().valid_up_to();
        let line = e.as_bytes()[..bad].iter().filter(|&&b| b == b'\n').count() + 1;
        RunSetError::Parse {
            chain: None,
            path: path.to_path_buf(),
            line,
            reason: format!("invalid UTF-8 at byte {bad}"),
        }
    })?;
    parse_table_str(&text, path, options)
}

/// Parses output table text. `path` is only used for error messages.
pub fn parse_table_str(text: &str, path: &Path, options: &ParseOptions) -> Result<ChainOutput> {
    let parse_err = |line: usize, reason: String| RunSetError::Parse {
        chain: None,
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut metadata = TableMetadata::default();
    let mut body = String::with_capacity(text.len());
    // 1-based source line of every line handed to the CSV reader
    let mut line_numbers = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if let Some(comment) = line.trim_start().strip_prefix(options.comment_marker) {
            metadata.capture(comment);
            continue;
        }
        body.push_str(line);
        body.push('\n');
        line_numbers.push(i + 1);
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(body.as_bytes());
    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record?,
        None => return Err(parse_err(text.lines().count(), "no header line".to_string())),
    };
    let columns: Vec<String> = header.iter().map(str::to_string).collect();
    for (i, name) in columns.iter().enumerate() {
        if name.is_empty() {
            return Err(parse_err(line_numbers[0], format!("column {} has no name", i + 1)));
        }
        if columns[..i].contains(name) {
            return Err(parse_err(line_numbers[0], format!("duplicate column `{name}`")));
        }
    }

    let n_cols = columns.len();
    let mut values = Vec::with_capacity(n_cols * line_numbers.len().saturating_sub(1));
    let mut n_rows = 0;
    for (record, &line) in records.zip(&line_numbers[1..]) {
        let record = record?;
        if record.len() != n_cols {
            return Err(parse_err(
                line,
                format!("expected {} fields, found {}", n_cols, record.len()),
            ));
        }
        for (field, column) in record.iter().zip(&columns) {
            let value: f64 = field.parse().map_err(|_| {
                parse_err(line, format!("non-numeric token `{field}` in column `{column}`"))
            })?;
            if !value.is_finite() && !options.allow_non_finite {
                return Err(parse_err(
                    line,
                    format!("non-finite value `{field}` in column `{column}`"),
                ));
            }
            values.push(value);
        }
        n_rows += 1;
    }

    let draws = Array2::from_shape_vec((n_rows, n_cols), values)
        .map_err(|e| parse_err(0, format!("could not assemble draws matrix: {e}")))?;

    let declared_split = metadata
        .declared_split()
        .map_err(|reason| parse_err(0, reason))?;
    if let Some(split) = declared_split {
        if split.total() != n_rows {
            return Err(RunSetError::SchemaMismatch(format!(
                "{}: metadata declares {} warmup + {} sampling rows but the table has {} rows",
                path.display(),
                split.warmup,
                split.sampling,
                n_rows
            )));
        }
    }

    debug!(
        path = %path.display(),
        rows = n_rows,
        columns = n_cols,
        "parsed output table"
    );

    Ok(ChainOutput {
        path: path.to_path_buf(),
        metadata,
        columns,
        draws,
        declared_split,
    })
}

/**
Saves a draws table as CSV.

The header row contains `"chain"`, `"draw"` and then `columns`. Row `r` of
`values` belongs to chain `r / draws_per_chain` and draw `r % draws_per_chain`;
both indices are written 0-based.
*/
pub fn save_csv(
    columns: &[String],
    values: ArrayView2<'_, f64>,
    draws_per_chain: usize,
    filename: impl AsRef<Path>,
) -> Result<()> {
    let filename = filename.as_ref();
    let file = File::create(filename)
        .map_err(|e| RunSetError::io(format!("creating {}", filename.display()), e))?;
    let mut wtr = Writer::from_writer(file);

    let mut header: Vec<String> = vec!["chain".to_string(), "draw".to_string()];
    header.extend(columns.iter().cloned());
    wtr.write_record(&header)?;

    for (r, row) in values.axis_iter(Axis(0)).enumerate() {
        let (chain, draw) = match draws_per_chain {
            0 => (0, r),
            n => (r / n, r % n),
        };
        let mut record = vec![chain.to_string(), draw.to_string()];
        record.extend(row.iter().map(|v| v.to_string()));
        wtr.write_record(&record)?;
    }

    wtr.flush()
        .map_err(|e| RunSetError::io(format!("flushing {}", filename.display()), e))?;
    Ok(())
}
