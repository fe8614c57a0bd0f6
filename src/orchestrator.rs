//! Running tasks.
//!
//! The [`Orchestrator`] owns the validated tasks and runs them by name or
//! as ad-hoc compositions, producing a [`Report`] tree. Task bodies get a
//! [`Context`] for the configuration, nested runs, the live-reload channel
//! and the shutdown signal.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, Level};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Config;
use crate::io::{SPINNER_STYLE, as_overhead};
use crate::pipeline::FailurePolicy;
use crate::reload::LiveReload;
use crate::task::{Report, TaskBody, TaskRef, TaskState};

type ReportFuture = Pin<Box<dyn Future<Output = Report> + Send>>;

/// Runs registered tasks and compositions of them.
///
/// Cheap to clone; every clone shares the same tasks, configuration,
/// reload channel and shutdown signal.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    tasks: BTreeMap<String, TaskBody>,
    config: Arc<Config>,
    reload: LiveReload,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub(crate) fn new(tasks: BTreeMap<String, TaskBody>, config: Arc<Config>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tasks,
                config,
                reload: LiveReload::new(),
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.inner.config
    }

    pub fn reload(&self) -> &LiveReload {
        &self.inner.reload
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.tasks.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.tasks.keys().map(String::as_str)
    }

    /// Ask long-running tasks to wind down.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown(self.inner.shutdown.subscribe())
    }

    /// Run a task or composition and wait for everything it started.
    pub async fn run(&self, task: impl Into<TaskRef>) -> Report {
        self.run_ref(task.into()).await
    }

    fn run_ref(&self, task: TaskRef) -> ReportFuture {
        let this = self.clone();
        Box::pin(async move {
            match task {
                TaskRef::Named(name) => this.run_named(name).await,
                TaskRef::Sequential(children) => this.run_sequential(children).await,
                TaskRef::Parallel(children) => this.run_parallel(children).await,
            }
        })
    }

    async fn run_named(&self, name: String) -> Report {
        let Some(body) = self.inner.tasks.get(&name).cloned() else {
            tracing::error!(task = %name, "task not found");
            return Report::failed(&name, format!("Task '{name}' not found"));
        };

        let s = Instant::now();
        tracing::info!(task = %name, "starting");

        let (state, error, children) = match body {
            TaskBody::Work(work) => {
                let span = tracing::span!(Level::INFO, "task", task = %name);
                span.pb_set_style(&SPINNER_STYLE);
                span.pb_set_message(&name);

                let ctx = Context {
                    orchestrator: self.clone(),
                };

                match work(ctx).instrument(span).await {
                    Ok(()) => (TaskState::Succeeded, None, Vec::new()),
                    Err(e) => {
                        tracing::error!(task = %name, "{e:#}");
                        (TaskState::Failed, Some(format!("{e:#}")), Vec::new())
                    }
                }
            }
            TaskBody::Composed(task) => {
                let child = self.run_ref(task).await;
                let error = child.error.clone();
                (child.state, error, vec![child])
            }
        };

        match state {
            TaskState::Succeeded => tracing::info!(task = %name, "finished {}", as_overhead(s)),
            _ => tracing::warn!(task = %name, "failed {}", as_overhead(s)),
        }

        Report {
            label: name,
            state,
            elapsed: s.elapsed(),
            error,
            children,
        }
    }

    async fn run_sequential(&self, children: Vec<TaskRef>) -> Report {
        let s = Instant::now();
        let label = TaskRef::Sequential(children.clone()).to_string();

        let mut reports = Vec::with_capacity(children.len());
        let mut error = None;

        for child in children {
            if error.is_some() {
                reports.push(Report::pending(child.to_string()));
                continue;
            }

            let report = self.run_ref(child).await;
            if report.state == TaskState::Failed {
                error = Some(format!("'{}' failed", report.label));
            }
            reports.push(report);
        }

        Report {
            label,
            state: if error.is_some() {
                TaskState::Failed
            } else {
                TaskState::Succeeded
            },
            elapsed: s.elapsed(),
            error,
            children: reports,
        }
    }

    async fn run_parallel(&self, children: Vec<TaskRef>) -> Report {
        let s = Instant::now();
        let label = TaskRef::Parallel(children.clone()).to_string();
        let labels: Vec<String> = children.iter().map(ToString::to_string).collect();

        let mut set = JoinSet::new();
        for (i, child) in children.into_iter().enumerate() {
            let this = self.clone();
            set.spawn(async move { (i, this.run_ref(child).await) });
        }

        let mut slots: Vec<Option<Report>> = labels.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, report)) => slots[i] = Some(report),
                Err(e) => tracing::error!("task crashed: {e}"),
            }
        }

        let reports: Vec<Report> = slots
            .into_iter()
            .zip(labels)
            .map(|(slot, label)| slot.unwrap_or_else(|| Report::failed(label, "task crashed")))
            .collect();

        let failed = reports
            .iter()
            .filter(|r| r.state == TaskState::Failed)
            .count();

        Report {
            label,
            state: if failed > 0 {
                TaskState::Failed
            } else {
                TaskState::Succeeded
            },
            elapsed: s.elapsed(),
            error: (failed > 0).then(|| format!("{failed} of {} task(s) failed", reports.len())),
            children: reports,
        }
    }
}

/// Handed to every task body.
#[derive(Clone)]
pub struct Context {
    orchestrator: Orchestrator,
}

impl Context {
    pub fn config(&self) -> &Config {
        &self.orchestrator.inner.config
    }

    pub fn policy(&self) -> FailurePolicy {
        self.config().on_error
    }

    pub fn reload(&self) -> &LiveReload {
        self.orchestrator.reload()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run another task from inside this one.
    pub async fn run(&self, task: impl Into<TaskRef>) -> Report {
        self.orchestrator.run(task).await
    }

    pub fn shutdown(&self) -> Shutdown {
        self.orchestrator.shutdown_signal()
    }
}

/// Receiving end of the shutdown signal.
#[derive(Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown was requested.
    pub async fn wait(&mut self) {
        // The sender lives as long as the orchestrator, so an error means
        // nobody is left to run tasks anyway.
        let _ = self.0.wait_for(|&stop| stop).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::task::{Registry, parallel, series};

    type Log = Arc<Mutex<Vec<String>>>;

    fn config() -> Config {
        crate::config::tests::config_for("/theme")
    }

    fn record(registry: &mut Registry, log: &Log, name: &'static str, delay: u64, ok: bool) {
        let log = log.clone();
        registry
            .register(name, move |_| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(format!("start {name}"));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().unwrap().push(format!("end {name}"));
                    if ok {
                        Ok(())
                    } else {
                        anyhow::bail!("{name} broke")
                    }
                }
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_sequential_runs_in_order() {
        let log = Log::default();
        let mut registry = Registry::new();
        record(&mut registry, &log, "a", 20, true);
        record(&mut registry, &log, "b", 0, true);
        registry.register_composed("ab", series(["a", "b"])).unwrap();

        let orchestrator = registry.finish(config()).unwrap();
        let report = orchestrator.run("ab").await;

        assert!(report.is_success());
        assert_eq!(*log.lock().unwrap(), ["start a", "end a", "start b", "end b"]);
    }

    #[tokio::test]
    async fn test_sequential_stops_at_failure() {
        let log = Log::default();
        let mut registry = Registry::new();
        record(&mut registry, &log, "a", 0, false);
        record(&mut registry, &log, "b", 0, true);

        let orchestrator = registry.finish(config()).unwrap();
        let report = orchestrator.run(series(["a", "b"])).await;

        assert_eq!(report.state, TaskState::Failed);
        assert_eq!(report.children[0].state, TaskState::Failed);
        assert_eq!(report.children[0].error.as_deref(), Some("a broke"));
        assert_eq!(report.children[1].state, TaskState::Pending);
        assert!(!log.lock().unwrap().contains(&"start b".to_string()));
    }

    #[tokio::test]
    async fn test_parallel_starts_all_and_waits() {
        let log = Log::default();
        let mut registry = Registry::new();
        record(&mut registry, &log, "slow", 50, true);
        record(&mut registry, &log, "fast", 0, false);

        let orchestrator = registry.finish(config()).unwrap();
        let report = timeout(Duration::from_secs(5), orchestrator.run(parallel(["slow", "fast"])))
            .await
            .unwrap();

        // fails because one child failed, but only after the slow one is done
        assert_eq!(report.state, TaskState::Failed);
        assert_eq!(report.children[0].state, TaskState::Succeeded);
        assert_eq!(report.children[1].state, TaskState::Failed);

        let log = log.lock().unwrap();
        assert!(log.contains(&"end slow".to_string()));
        let started_fast = log.iter().position(|l| l == "start fast").unwrap();
        let ended_slow = log.iter().position(|l| l == "end slow").unwrap();
        assert!(started_fast < ended_slow);
    }

    #[tokio::test]
    async fn test_named_composition_and_nested_call() {
        let log = Log::default();
        let mut registry = Registry::new();
        record(&mut registry, &log, "a", 0, true);
        registry.register_composed("again", series(["a", "a"])).unwrap();
        registry
            .register("outer", |ctx: Context| async move {
                let report = ctx.run("again").await;
                anyhow::ensure!(report.is_success(), "inner failed");
                Ok(())
            })
            .unwrap();

        let orchestrator = registry.finish(config()).unwrap();
        let report = orchestrator.run("outer").await;

        assert!(report.is_success());
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_task_fails() {
        let orchestrator = Registry::new().finish(config()).unwrap();
        let report = orchestrator.run(series(["nope"])).await;

        assert_eq!(report.state, TaskState::Failed);
        assert_eq!(report.root_causes()[0].label, "nope");
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let mut registry = Registry::new();
        registry
            .register("forever", |ctx: Context| async move {
                ctx.shutdown().wait().await;
                Ok(())
            })
            .unwrap();

        let orchestrator = registry.finish(config()).unwrap();
        let running = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run("forever").await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!orchestrator.shutdown_signal().is_triggered());
        orchestrator.shutdown();

        let report = timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
        assert!(report.is_success());
    }
}
