/*!
# mini-runset

Runs an external sampler executable once per chain, parses the per-chain CSV
output into typed, shape-aware variables, and merges a generate-quantities run
with the posterior sample it was conditioned on.

## Overview

- [`io::csv`]: parses one chain's output table (metadata, header, draws).
- [`schema`]: groups flat column names such as `y_rep[3]` into variables with shapes.
- [`runset`]: launches chains on a bounded worker pool and checks they agree.
- [`sample`]: a completed posterior sample ([`PosteriorSource`]).
- [`gq`]: the generated-quantities result and its merged views.

## Example

```no_run
use std::sync::Arc;
use mini_runset::config::RunConfig;
use mini_runset::diagnostics::TracingSink;
use mini_runset::gq::generate_quantities;
use mini_runset::invocation::{DataSource, Method};
use mini_runset::runset::RunSet;
use mini_runset::sample::PosteriorSample;

let data = DataSource::File("bernoulli.data.json".into());
let config = RunConfig::new(4).with_parallel_chains(2).set_seed(12345);

let mut fit = RunSet::new("./bernoulli", Method::sample(1000, 100), config.clone())?
    .with_data(data.clone());
fit.run()?;
let posterior = PosteriorSample::from_runset(fit)?;

let gqs = generate_quantities("./bernoulli_ppc", &posterior, data, config, Arc::new(TracingSink))?;
assert_eq!(gqs.variable("y_rep")?.shape(), &[400, 10]);
assert_eq!(gqs.combined_table(false).row_count(), 400);
# Ok::<(), mini_runset::error::RunSetError>(())
```
*/

pub mod config;
pub mod diagnostics;
pub mod draws;
pub mod error;
pub mod gq;
pub mod invocation;
pub mod io;
pub mod runset;
pub mod sample;
pub mod schema;

pub use error::{Result, RunSetError};
pub use gq::GeneratedQuantities;
pub use sample::{PosteriorSample, PosteriorSource};
