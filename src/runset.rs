/*!
# Run Set

A run set owns one [`RunUnit`] per chain. Each unit is an independent external
process started from an [`Invocation`]. Units run on a bounded rayon pool with
`parallel_chains` worker threads; the rest queue until a slot frees up.

Per-unit failures are recorded, never raised, while the set runs. They surface
as errors only when [`RunSet::outputs`] is asked for the parsed draws.

```no_run
use mini_runset::config::RunConfig;
use mini_runset::invocation::Method;
use mini_runset::runset::RunSet;

let config = RunConfig::new(4).with_parallel_chains(2).set_seed(12345);
let mut runset = RunSet::new("./bernoulli", Method::sample(1000, 1000), config)?;
runset.run()?;
let draws = runset.outputs(None)?;
assert_eq!(draws.num_chains(), 4);
# Ok::<(), mini_runset::error::RunSetError>(())
```
*/

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use rand::prelude::*;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::config::{ParseOptions, RunConfig};
use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::draws::RunDraws;
use crate::error::{Result, RunSetError};
use crate::invocation::{DataSource, Invocation, Method};
use crate::io::csv::parse_table;
use crate::io::DrawSplit;

/// How often running children are checked for exit and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    /// Created, waiting for a worker slot.
    Queued,
    Running,
    /// Exited with status 0.
    Succeeded,
    /// Exited non-zero or was killed by a signal.
    Failed,
    /// The process could not be started.
    LaunchFailed,
    /// Stopped by an explicit cancellation request.
    Cancelled,
}

impl UnitStatus {
    pub fn is_complete(self) -> bool {
        !matches!(self, UnitStatus::Queued | UnitStatus::Running)
    }
}

/// One chain's external invocation and what became of it.
#[derive(Debug, Clone)]
pub struct RunUnit {
    /// 1-based chain id.
    pub chain_id: usize,
    /// `None` for units wrapping pre-existing output files.
    pub invocation: Option<Invocation>,
    pub output_path: PathBuf,
    pub stderr_path: Option<PathBuf>,
    status: UnitStatus,
    retcode: Option<i32>,
    stderr: String,
    launch_error: Option<String>,
}

impl RunUnit {
    pub fn status(&self) -> UnitStatus {
        self.status
    }

    pub fn retcode(&self) -> Option<i32> {
        self.retcode
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// True when the output file exists and is non-empty.
    pub fn output_ready(&self) -> bool {
        std::fs::metadata(&self.output_path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    fn check_extractable(&self) -> Result<()> {
        match self.status {
            UnitStatus::Succeeded if self.output_ready() => Ok(()),
            UnitStatus::Succeeded => Err(RunSetError::MissingOutput {
                chain: self.chain_id,
                path: self.output_path.clone(),
            }),
            UnitStatus::Failed => Err(RunSetError::Process {
                chain: self.chain_id,
                retcode: self.retcode,
                stderr: self.stderr.clone(),
            }),
            UnitStatus::LaunchFailed => Err(RunSetError::Launch {
                chain: self.chain_id,
                executable: self
                    .invocation
                    .as_ref()
                    .map(|i| i.executable.clone())
                    .unwrap_or_default(),
                reason: self.launch_error.clone().unwrap_or_default(),
            }),
            UnitStatus::Cancelled => Err(RunSetError::Cancelled(self.chain_id)),
            UnitStatus::Queued | UnitStatus::Running => unreachable!("checked by caller"),
        }
    }
}

/// Cloneable handle that cancels a run set from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct UnitOutcome {
    status: UnitStatus,
    retcode: Option<i32>,
    stderr: String,
    launch_error: Option<String>,
}

enum UnitEvent {
    Started(usize),
    Finished(usize, UnitOutcome),
}

/// A fixed-size collection of run units launched together.
pub struct RunSet {
    method: Method,
    config: RunConfig,
    data: DataSource,
    output_dir: PathBuf,
    units: Vec<RunUnit>,
    cancel: Arc<AtomicBool>,
    events: Option<Receiver<UnitEvent>>,
    pool: Option<Arc<ThreadPool>>,
    progress: Option<ProgressBar>,
    sink: Arc<dyn DiagnosticSink>,
    started: Option<Instant>,
}

impl std::fmt::Debug for RunSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunSet")
            .field("method", &self.method.name())
            .field("chains", &self.units.len())
            .field("output_dir", &self.output_dir)
            .field("units", &self.units)
            .finish()
    }
}

impl RunSet {
    /**
    Prepares one unit per chain without starting any process.

    Fails with `Configuration` when the config is invalid (zero chains, zero
    concurrency) or, for generated quantities, when the number of fitted-params
    files is zero or differs from `config.chains`.
    */
    pub fn new(executable: impl Into<PathBuf>, method: Method, mut config: RunConfig) -> Result<Self> {
        if let Method::GenerateQuantities { fitted_params } = &method {
            if fitted_params.is_empty() {
                return Err(RunSetError::Configuration(
                    "generate_quantities needs at least one fitted-params file".to_string(),
                ));
            }
            if fitted_params.len() != config.chains {
                return Err(RunSetError::Configuration(format!(
                    "{} fitted-params files given for {} chains",
                    fitted_params.len(),
                    config.chains
                )));
            }
        }
        config.validate()?;
        let seed = config.resolve_seed();
        let executable = executable.into();

        let output_dir = match &config.output_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join(format!(
                "{}-{:016x}",
                config.output_basename,
                thread_rng().gen::<u64>()
            )),
        };

        let units = (0..config.chains)
            .map(|i| {
                let chain_id = i + 1;
                let output_path =
                    output_dir.join(format!("{}-{}.csv", config.output_basename, chain_id));
                let stderr_path = output_dir.join(format!(
                    "{}-{}-stderr.txt",
                    config.output_basename, chain_id
                ));
                RunUnit {
                    chain_id,
                    invocation: Some(Invocation {
                        executable: executable.clone(),
                        chain_id,
                        seed: Some(seed.wrapping_add(i as u64)),
                        data_file: None,
                        output_file: output_path.clone(),
                        method: method.clone(),
                    }),
                    output_path,
                    stderr_path: Some(stderr_path),
                    status: UnitStatus::Queued,
                    retcode: None,
                    stderr: String::new(),
                    launch_error: None,
                }
            })
            .collect();

        Ok(Self {
            method,
            config,
            data: DataSource::None,
            output_dir,
            units,
            cancel: Arc::new(AtomicBool::new(false)),
            events: None,
            pool: None,
            progress: None,
            sink: Arc::new(TracingSink),
            started: None,
        })
    }

    /**
    Wraps output files that already exist as a completed, successful run set.

    Chain `i` (1-based) reads `csv_files[i - 1]`. An empty list is a
    `Configuration` error.
    */
    pub fn from_completed(
        csv_files: &[PathBuf],
        method: Method,
        parse: ParseOptions,
    ) -> Result<Self> {
        if csv_files.is_empty() {
            return Err(RunSetError::Configuration(
                "no output files given".to_string(),
            ));
        }
        let config = RunConfig::new(csv_files.len()).with_parse_options(parse);
        let output_dir = csv_files[0]
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let units = csv_files
            .iter()
            .enumerate()
            .map(|(i, path)| RunUnit {
                chain_id: i + 1,
                invocation: None,
                output_path: path.clone(),
                stderr_path: None,
                status: UnitStatus::Succeeded,
                retcode: Some(0),
                stderr: String::new(),
                launch_error: None,
            })
            .collect();
        Ok(Self {
            method,
            config,
            data: DataSource::None,
            output_dir,
            units,
            cancel: Arc::new(AtomicBool::new(false)),
            events: None,
            pool: None,
            progress: None,
            sink: Arc::new(TracingSink),
            started: None,
        })
    }

    pub fn with_data(mut self, data: DataSource) -> Self {
        self.data = data;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Launches every unit on the worker pool and returns immediately.
    pub fn start(&mut self) -> Result<()> {
        if self.started.is_some() || self.units.iter().any(|u| u.status != UnitStatus::Queued) {
            return Err(RunSetError::Configuration(
                "run set has already been started".to_string(),
            ));
        }

        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            RunSetError::io(format!("creating {}", self.output_dir.display()), e)
        })?;
        let data_file = self
            .data
            .materialize(&self.output_dir, &self.config.output_basename)?;

        let limit = self.config.concurrency_limit();
        let pool = ThreadPoolBuilder::new()
            .num_threads(limit)
            .thread_name(|i| format!("runset-worker-{i}"))
            .build()
            .map_err(|e| RunSetError::Configuration(format!("could not build worker pool: {e}")))?;
        let pool = Arc::new(pool);

        if self.config.show_progress {
            let pb = ProgressBar::new(self.units.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            {
                pb.set_style(style.progress_chars("##-"));
            }
            pb.set_prefix(self.method.name());
            self.progress = Some(pb);
        }

        let (tx, rx) = mpsc::channel();
        info!(
            method = self.method.name(),
            chains = self.units.len(),
            parallel_chains = limit,
            output_dir = %self.output_dir.display(),
            "launching run set"
        );

        for unit in self.units.iter_mut() {
            if let Some(invocation) = unit.invocation.as_mut() {
                invocation.data_file = data_file.clone();
            }
            remove_stale(&unit.output_path)?;
        }

        for (idx, unit) in self.units.iter().enumerate() {
            let Some(invocation) = unit.invocation.clone() else {
                continue;
            };
            let stderr_path = unit.stderr_path.clone();
            let cancel = Arc::clone(&self.cancel);
            let tx: Sender<UnitEvent> = tx.clone();
            pool.spawn(move || {
                let outcome = run_unit(idx, &invocation, stderr_path.as_deref(), &cancel, &tx);
                // The receiver may be gone if the caller dropped the run set.
                let _ = tx.send(UnitEvent::Finished(idx, outcome));
            });
        }

        self.events = Some(rx);
        self.pool = Some(pool);
        self.started = Some(Instant::now());
        Ok(())
    }

    /// Starts the run set and blocks until it completes or the configured timeout elapses.
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        let timeout = self.config.timeout();
        self.wait(timeout)
    }

    /**
    Blocks until every unit has completed, or until `timeout` elapses.

    On timeout the units keep running in the background and a `Timeout`
    error reports how many finished; calling `wait` again resumes collecting.
    */
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<()> {
        // a deadline past the end of the clock means no deadline
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let wait_start = Instant::now();

        while self.pending() > 0 {
            let Some(rx) = self.events.as_ref() else {
                return Err(RunSetError::Configuration(
                    "run set has not been started".to_string(),
                ));
            };
            let event = match deadline {
                None => rx.recv().ok(),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(remaining) {
                        Ok(event) => Some(event),
                        Err(RecvTimeoutError::Timeout) => {
                            warn!(
                                completed = self.completed(),
                                total = self.units.len(),
                                "timed out waiting for run set"
                            );
                            return Err(RunSetError::Timeout {
                                elapsed: wait_start.elapsed(),
                                completed: self.completed(),
                                total: self.units.len(),
                            });
                        }
                        Err(RecvTimeoutError::Disconnected) => None,
                    }
                }
            };
            match event {
                Some(event) => self.record(event),
                None => break,
            }
        }

        if let Some(pb) = self.progress.take() {
            pb.finish_with_message("Done!");
        }
        Ok(())
    }

    fn record(&mut self, event: UnitEvent) {
        match event {
            UnitEvent::Started(idx) => {
                if self.units[idx].status == UnitStatus::Queued {
                    self.units[idx].status = UnitStatus::Running;
                }
            }
            UnitEvent::Finished(idx, outcome) => {
                let unit = &mut self.units[idx];
                unit.status = outcome.status;
                unit.retcode = outcome.retcode;
                unit.stderr = outcome.stderr;
                unit.launch_error = outcome.launch_error;
                debug!(
                    chain = unit.chain_id,
                    status = ?unit.status,
                    retcode = ?unit.retcode,
                    "chain finished"
                );
                if matches!(unit.status, UnitStatus::Failed | UnitStatus::LaunchFailed) {
                    self.sink.emit(&Diagnostic::ChainFailed {
                        chain: unit.chain_id,
                        retcode: unit.retcode,
                        stderr: unit
                            .launch_error
                            .clone()
                            .unwrap_or_else(|| unit.stderr.clone()),
                    });
                }
                if let Some(pb) = &self.progress {
                    pb.inc(1);
                }
            }
        }
    }

    /// Requests cancellation: queued units never start and running ones are killed.
    pub fn cancel(&self) {
        info!(method = self.method.name(), "cancelling run set");
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// File stem of the executable, e.g. `bernoulli_ppc`; `None` for wrapped output files.
    pub fn model_name(&self) -> Option<String> {
        let invocation = self.units.first()?.invocation.as_ref()?;
        invocation
            .executable
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn chains(&self) -> usize {
        self.units.len()
    }

    pub fn units(&self) -> &[RunUnit] {
        &self.units
    }

    /// Unit of chain `i` (0-based).
    pub fn unit(&self, i: usize) -> &RunUnit {
        &self.units[i]
    }

    pub fn status(&self, i: usize) -> UnitStatus {
        self.units[i].status
    }

    pub fn retcode(&self, i: usize) -> Option<i32> {
        self.units[i].retcode
    }

    pub fn stderr(&self, i: usize) -> &str {
        &self.units[i].stderr
    }

    pub fn output_path(&self, i: usize) -> &Path {
        &self.units[i].output_path
    }

    pub fn output_ready(&self, i: usize) -> bool {
        self.units[i].output_ready()
    }

    pub fn csv_files(&self) -> Vec<PathBuf> {
        self.units.iter().map(|u| u.output_path.clone()).collect()
    }

    pub fn completed(&self) -> usize {
        self.units.iter().filter(|u| u.status.is_complete()).count()
    }

    fn pending(&self) -> usize {
        self.units.len() - self.completed()
    }

    /// True when every unit exited 0.
    pub fn is_success(&self) -> bool {
        self.units.iter().all(|u| u.status == UnitStatus::Succeeded)
    }

    /**
    Parses every chain's output and checks that the chains agree.

    Raises the first failed unit's error (launch, process, missing output or
    cancellation) before parsing anything. Chains are parsed in parallel; any
    parse error aborts the whole extraction and names its chain.
    */
    pub fn outputs(&self, expected: Option<DrawSplit>) -> Result<RunDraws> {
        let pending = self.pending();
        if pending > 0 {
            return Err(RunSetError::Timeout {
                elapsed: self.started.map(|s| s.elapsed()).unwrap_or_default(),
                completed: self.completed(),
                total: self.units.len(),
            });
        }
        for unit in &self.units {
            unit.check_extractable()?;
        }

        let options = &self.config.parse;
        let chains = self
            .units
            .par_iter()
            .map(|unit| {
                parse_table(&unit.output_path, options).map_err(|e| e.in_chain(unit.chain_id))
            })
            .collect::<Result<Vec<_>>>()?;
        RunDraws::from_chains(chains, expected)
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RunSetError::io(format!("removing stale {}", path.display()), e)),
    }
}

/// Runs one unit to completion on a pool thread.
fn run_unit(
    idx: usize,
    invocation: &Invocation,
    stderr_path: Option<&Path>,
    cancel: &AtomicBool,
    tx: &Sender<UnitEvent>,
) -> UnitOutcome {
    let launch_failed = |reason: String| UnitOutcome {
        status: UnitStatus::LaunchFailed,
        retcode: None,
        stderr: String::new(),
        launch_error: Some(reason),
    };

    if cancel.load(Ordering::SeqCst) {
        return UnitOutcome {
            status: UnitStatus::Cancelled,
            retcode: None,
            stderr: String::new(),
            launch_error: None,
        };
    }

    let args = match invocation.args() {
        Ok(args) => args,
        Err(e) => return launch_failed(e.to_string()),
    };
    let stderr = match stderr_path {
        Some(path) => match File::create(path) {
            Ok(file) => Stdio::from(file),
            Err(e) => return launch_failed(format!("creating {}: {e}", path.display())),
        },
        None => Stdio::null(),
    };

    let mut child = match Command::new(&invocation.executable)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(stderr)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!(
                chain = invocation.chain_id,
                executable = %invocation.executable.display(),
                error = %e,
                "could not launch chain"
            );
            return launch_failed(e.to_string());
        }
    };
    let _ = tx.send(UnitEvent::Started(idx));
    debug!(chain = invocation.chain_id, pid = child.id(), "chain started");

    let status: std::io::Result<ExitStatus> = loop {
        if cancel.load(Ordering::SeqCst) {
            reap(&mut child);
            debug!(chain = invocation.chain_id, "chain killed on cancel");
            return UnitOutcome {
                status: UnitStatus::Cancelled,
                retcode: None,
                stderr: read_stderr(stderr_path),
                launch_error: None,
            };
        }
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => break Err(e),
        }
    };

    match status {
        Ok(status) => UnitOutcome {
            status: if status.success() {
                UnitStatus::Succeeded
            } else {
                UnitStatus::Failed
            },
            retcode: status.code(),
            stderr: read_stderr(stderr_path),
            launch_error: None,
        },
        Err(e) => {
            reap(&mut child);
            UnitOutcome {
                status: UnitStatus::Failed,
                retcode: None,
                stderr: format!("waiting for process failed: {e}"),
                launch_error: None,
            }
        }
    }
}

/// Kills `child` and waits for it so no zombie is left behind.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn read_stderr(path: Option<&Path>) -> String {
    path.and_then(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_zero_chains_is_configuration_error() {
        let err = RunSet::new("/bin/true", Method::sample(10, 10), RunConfig::new(0)).unwrap_err();
        assert!(matches!(err, RunSetError::Configuration(_)));
    }

    #[test]
    fn test_empty_fitted_params_is_configuration_error() {
        let method = Method::GenerateQuantities {
            fitted_params: vec![],
        };
        let err = RunSet::new("/bin/true", method, RunConfig::new(4)).unwrap_err();
        assert!(matches!(err, RunSetError::Configuration(_)));
    }

    #[test]
    fn test_fitted_params_count_must_match_chains() {
        let method = Method::GenerateQuantities {
            fitted_params: vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")],
        };
        let err = RunSet::new("/bin/true", method, RunConfig::new(4)).unwrap_err();
        assert!(matches!(err, RunSetError::Configuration(_)));
    }

    #[test]
    fn test_units_get_deterministic_paths_and_seeds() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::new(3)
            .set_seed(100)
            .with_output_dir(dir.path())
            .with_basename("bern");
        let runset = RunSet::new("/bin/true", Method::sample(10, 10), config).unwrap();
        assert_eq!(runset.chains(), 3);
        assert_eq!(runset.output_path(2), dir.path().join("bern-3.csv"));
        assert_eq!(runset.model_name().as_deref(), Some("true"));
        let seeds: Vec<_> = runset
            .units()
            .iter()
            .map(|u| u.invocation.as_ref().unwrap().seed)
            .collect();
        assert_eq!(seeds, vec![Some(100), Some(101), Some(102)]);
        assert!(runset.units().iter().all(|u| u.status() == UnitStatus::Queued));
    }

    #[test]
    fn test_from_completed_empty_list() {
        let err = RunSet::from_completed(&[], Method::sample(1, 1), ParseOptions::default())
            .unwrap_err();
        assert!(matches!(err, RunSetError::Configuration(_)));
    }

    #[test]
    fn test_from_completed_missing_file_is_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("fit-1.csv");
        fs::write(&good, "# num_samples = 1\nlp__,theta\n-1,0.5\n").unwrap();
        let missing = dir.path().join("fit-2.csv");
        let runset = RunSet::from_completed(
            &[good, missing],
            Method::sample(0, 1),
            ParseOptions::default(),
        )
        .unwrap();
        assert!(runset.is_success());
        assert!(runset.output_ready(0));
        assert!(!runset.output_ready(1));
        assert_eq!(runset.model_name(), None);
        assert!(matches!(
            runset.outputs(None),
            Err(RunSetError::MissingOutput { chain: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_names_its_chain() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("fit-1.csv");
        fs::write(&good, "a,b\n1,2\n").unwrap();
        let bad = dir.path().join("fit-2.csv");
        fs::write(&bad, b"a,b\n1,\xff\n").unwrap();
        let runset =
            RunSet::from_completed(&[good, bad], Method::sample(0, 1), ParseOptions::default())
                .unwrap();
        assert!(matches!(
            runset.outputs(None),
            Err(RunSetError::Parse { chain: Some(2), line: 2, .. })
        ));
    }

    #[test]
    fn test_wait_before_start() {
        let mut runset = RunSet::new("/bin/true", Method::sample(1, 1), RunConfig::new(1)).unwrap();
        assert!(matches!(
            runset.wait(None),
            Err(RunSetError::Configuration(_))
        ));
    }

    #[test]
    fn test_outputs_before_completion() {
        let runset = RunSet::new("/bin/true", Method::sample(1, 1), RunConfig::new(2)).unwrap();
        assert!(matches!(
            runset.outputs(None),
            Err(RunSetError::Timeout { completed: 0, total: 2, .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_reap_collects_killed_child() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        reap(&mut child);
        let status = child.try_wait().unwrap().expect("child was waited on");
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_unbounded_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::new(1).with_output_dir(dir.path());
        let mut runset = RunSet::new("/bin/true", Method::sample(1, 1), config).unwrap();
        runset.start().unwrap();
        runset.wait(Some(Duration::MAX)).unwrap();
        assert_eq!(runset.status(0), UnitStatus::Succeeded);
        assert_eq!(runset.retcode(0), Some(0));
    }

    #[test]
    fn test_cancel_handle_shares_flag() {
        let runset = RunSet::new("/bin/true", Method::sample(1, 1), RunConfig::new(1)).unwrap();
        let handle = runset.cancel_handle();
        assert!(!handle.is_cancelled());
        runset.cancel();
        assert!(handle.is_cancelled());
    }
}
