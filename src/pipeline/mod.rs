//! File-transform pipelines.
//!
//! A [`Pipeline`] reads every file matching its source globs into a
//! [`Stream`], hands the stream to each [`Stage`] in order, and writes what
//! comes out under its destination directory. A stage always sees the
//! complete output of the stage before it.
//!
//! Stages never touch the destination themselves. A stage that wants an
//! intermediate result on disk emits it into the stream, and the pipeline
//! writes emitted files together with the final ones once every stage is
//! done.
//!
//! Stages report failures per file. A failing file leaves the stream, its
//! error is logged and kept as a [`Diagnostic`], and the rest of the stream
//! carries on. What a failure means for the task is decided by the
//! [`FailurePolicy`].

mod glob;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::{PipelineError, StageError};
use crate::io::{SPINNER_STYLE, as_overhead, write_if_changed};

pub use glob::{collect_sources, glob_base};
pub(crate) use glob::MATCH_OPTIONS;

/// One file travelling through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Current path of the file; stages may rename it.
    pub path: Utf8PathBuf,
    /// Static prefix of the glob that matched the file. The part of `path`
    /// below `base` is kept when writing to the destination.
    pub base: Utf8PathBuf,
    pub contents: Vec<u8>,
}

impl Asset {
    pub fn new(
        base: impl Into<Utf8PathBuf>,
        path: impl Into<Utf8PathBuf>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            path: path.into(),
            base: base.into(),
            contents: contents.into(),
        }
    }

    /// Path relative to the glob base, used to place the file in `dest`.
    pub fn relative(&self) -> &Utf8Path {
        match self.path.strip_prefix(&self.base) {
            Ok(path) => path,
            Err(_) => Utf8Path::new(self.path.file_name().unwrap_or(self.path.as_str())),
        }
    }

    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.contents)
    }

    /// Whether the file name starts with `_`, the Sass partial convention.
    pub fn is_partial(&self) -> bool {
        self.path.file_name().is_some_and(|name| name.starts_with('_'))
    }
}

/// Record of a file that was dropped because a stage failed on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub stage: String,
    pub path: Utf8PathBuf,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.path, self.message)
    }
}

/// The files flowing between stages, plus the failures collected so far
/// and the intermediate outputs emitted along the way.
#[derive(Debug, Default)]
pub struct Stream {
    files: Vec<Asset>,
    failures: Vec<Diagnostic>,
    emitted: Vec<(Utf8PathBuf, Vec<u8>)>,
}

impl Stream {
    pub fn new(files: Vec<Asset>) -> Self {
        Self {
            files,
            ..Default::default()
        }
    }

    pub fn files(&self) -> &[Asset] {
        &self.files
    }

    pub fn failures(&self) -> &[Diagnostic] {
        &self.failures
    }

    /// Files to be written at `path`, in addition to the final stream.
    pub fn emitted(&self) -> &[(Utf8PathBuf, Vec<u8>)] {
        &self.emitted
    }

    /// Schedule an extra output. It is written only if the pipeline gets as
    /// far as writing its results.
    pub fn emit(&mut self, path: Utf8PathBuf, contents: Vec<u8>) {
        self.emitted.push((path, contents));
    }

    /// Replace the files, keeping everything else gathered by earlier stages.
    pub fn with_files(self, files: Vec<Asset>) -> Self {
        Self { files, ..self }
    }

    /// Terminate one file's stream with an error.
    pub fn fail(&mut self, stage: &str, path: &Utf8Path, error: impl std::fmt::Display) {
        tracing::error!(stage, %path, "{error}");
        self.failures.push(Diagnostic {
            stage: stage.to_string(),
            path: path.to_path_buf(),
            message: error.to_string(),
        });
    }

    /// Run `f` over every file independently, spreading the work over the
    /// rayon pool. Order is preserved. `Ok(None)` drops the file from the
    /// stream, `Err` drops it and records a diagnostic.
    pub fn map_files<F>(self, stage: &str, f: F) -> Self
    where
        F: Fn(Asset) -> Result<Option<Asset>, StageError> + Send + Sync,
    {
        let results: Vec<_> = self
            .files
            .into_par_iter()
            .map(|asset| {
                let path = asset.path.clone();
                (path, f(asset))
            })
            .collect();

        let mut stream = Stream {
            files: Vec::with_capacity(results.len()),
            failures: self.failures,
            emitted: self.emitted,
        };

        for (path, result) in results {
            match result {
                Ok(Some(asset)) => stream.files.push(asset),
                Ok(None) => tracing::debug!(stage, %path, "dropped from stream"),
                Err(e) => stream.fail(stage, &path, e),
            }
        }

        stream
    }
}

/// A single transform step. Given the whole stream, return the next one.
///
/// Stages must terminate: a stage that can block on an external resource is
/// expected to bound that wait itself.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    fn process(&self, stream: Stream) -> Stream;
}

/// What a failed file means for the task that owns the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log and skip the file; the task still succeeds.
    Continue,
    /// Log and skip the file, build everything else, then fail the task.
    #[default]
    Report,
    /// Stop the pipeline at the first failing stage without writing.
    Abort,
}

/// Outcome of one or more pipelines.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Destination files that were (re)written.
    pub written: Vec<Utf8PathBuf>,
    /// Destination files that already had the produced contents.
    pub unchanged: Vec<Utf8PathBuf>,
    pub failures: Vec<Diagnostic>,
}

impl PipelineReport {
    fn merge(&mut self, other: PipelineReport) {
        self.written.extend(other.written);
        self.unchanged.extend(other.unchanged);
        self.failures.extend(other.failures);
    }

    /// Apply the failure policy to the collected diagnostics.
    pub fn check(self, policy: FailurePolicy) -> Result<Self, PipelineError> {
        match policy {
            FailurePolicy::Report | FailurePolicy::Abort if !self.failures.is_empty() => {
                Err(PipelineError::Failed(self.failures.len()))
            }
            _ => Ok(self),
        }
    }
}

/// Sources, stages and destination of one transform chain.
#[derive(Clone)]
pub struct Pipeline {
    sources: Vec<String>,
    stages: Vec<Arc<dyn Stage>>,
    dest: Utf8PathBuf,
    policy: FailurePolicy,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<_> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("Pipeline")
            .field("sources", &self.sources)
            .field("stages", &stages)
            .field("dest", &self.dest)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Pipeline {
    pub fn new<I, S>(sources: I, dest: impl Into<Utf8PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            stages: Vec::new(),
            dest: dest.into(),
            policy: FailurePolicy::default(),
            timeout: None,
        }
    }

    /// Append a stage. Stages run in the order they were added.
    pub fn pipe(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dest(&self) -> &Utf8Path {
        &self.dest
    }

    /// Run the pipeline on the blocking pool and wait until every output is
    /// written.
    ///
    /// When the timeout passes, the pipeline is cancelled: the stage in
    /// progress is left to finish, but no further stage runs and nothing is
    /// written.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let span = tracing::span!(Level::INFO, "pipeline", dest = %self.dest);
        span.pb_set_style(&SPINNER_STYLE);
        span.pb_set_message(&format!("{} → {}", self.sources.join(", "), self.dest));

        let cancel = Arc::new(AtomicBool::new(false));
        let pipeline = self.clone();
        let handle = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || span.in_scope(|| pipeline.run_until(&cancel))
        });

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined?,
                Err(_) => {
                    cancel.store(true, Ordering::SeqCst);
                    tracing::error!(dest = %self.dest, "timed out after {limit:?}, cancelled");
                    Err(PipelineError::Timeout(limit))
                }
            },
            None => handle.await?,
        }
    }

    /// Run the pipeline on the current thread.
    pub fn run_blocking(&self) -> Result<PipelineReport, PipelineError> {
        self.run_until(&AtomicBool::new(false))
    }

    fn run_until(&self, cancel: &AtomicBool) -> Result<PipelineReport, PipelineError> {
        let s = Instant::now();
        let cancelled = || {
            if cancel.load(Ordering::SeqCst) {
                Err(PipelineError::Cancelled(self.dest.clone()))
            } else {
                Ok(())
            }
        };

        let mut stream = Stream::new(collect_sources(&self.sources)?);

        for stage in &self.stages {
            cancelled()?;
            let before = stream.failures.len();
            stream = stage.process(stream);

            if self.policy == FailurePolicy::Abort
                && let Some(failure) = stream.failures.get(before)
            {
                return Err(PipelineError::Aborted {
                    stage: failure.stage.clone(),
                    path: failure.path.clone(),
                });
            }
        }

        cancelled()?;

        let Stream {
            files,
            failures,
            emitted,
        } = stream;

        let mut report = PipelineReport {
            failures,
            ..Default::default()
        };

        let outputs = emitted.into_iter().chain(
            files
                .into_iter()
                .map(|asset| (self.dest.join(asset.relative()), asset.contents)),
        );

        for (path, contents) in outputs {
            match write_if_changed(&path, &contents) {
                Ok(true) => report.written.push(path),
                Ok(false) => report.unchanged.push(path),
                Err(e) => return Err(PipelineError::Write(path, e)),
            }
        }

        tracing::info!(
            dest = %self.dest,
            written = report.written.len(),
            unchanged = report.unchanged.len(),
            failed = report.failures.len(),
            "pipeline finished {}",
            as_overhead(s)
        );

        Ok(report)
    }
}

/// Run several pipelines concurrently and merge their reports.
///
/// Every pipeline runs to completion even when a sibling fails; the first
/// error is returned once all of them are done. The failure policy is then
/// applied to the merged diagnostics.
pub async fn merge(
    pipelines: Vec<Pipeline>,
    policy: FailurePolicy,
) -> Result<PipelineReport, PipelineError> {
    let mut set = JoinSet::new();
    for pipeline in pipelines {
        let pipeline = pipeline.policy(policy);
        set.spawn(async move { pipeline.run().await });
    }

    let mut report = PipelineReport::default();
    let mut first_error = None;

    while let Some(joined) = set.join_next().await {
        match joined.map_err(PipelineError::from).and_then(|result| result) {
            Ok(part) => report.merge(part),
            Err(e) => {
                tracing::error!("{e}");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => report.check(policy),
    }
}
