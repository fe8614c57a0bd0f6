//! Tasks, compositions and their run reports.
//!
//! Tasks are registered by name into a [`Registry`]. A task body is either
//! an async work function or a composition of other tasks. Once everything
//! is registered, [`Registry::finish`] checks that the compositions only
//! refer to known tasks and do not contain themselves, and hands the tasks
//! to an [`Orchestrator`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use petgraph::Graph;

use crate::config::Config;
use crate::error::RegistryError;
use crate::orchestrator::{Context, Orchestrator};

pub(crate) type WorkFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub(crate) type WorkFn = Arc<dyn Fn(Context) -> WorkFuture + Send + Sync>;

/// Something that can be run: a task by name, or an ad-hoc composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRef {
    Named(String),
    Sequential(Vec<TaskRef>),
    Parallel(Vec<TaskRef>),
}

impl TaskRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Every task name referenced anywhere inside this reference.
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            TaskRef::Named(name) => names.push(name),
            TaskRef::Sequential(tasks) | TaskRef::Parallel(tasks) => {
                for task in tasks {
                    task.collect_names(names);
                }
            }
        }
    }
}

impl From<&str> for TaskRef {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for TaskRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, tasks) = match self {
            TaskRef::Named(name) => return f.write_str(name),
            TaskRef::Sequential(tasks) => ("series", tasks),
            TaskRef::Parallel(tasks) => ("parallel", tasks),
        };

        write!(f, "{kind}(")?;
        for (i, task) in tasks.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{task}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    /// Run one after another, stopping at the first failure.
    Sequential,
    /// Start all at once and wait for every one of them.
    Parallel,
}

/// Build a composite task reference.
pub fn compose<I, T>(mode: Composition, tasks: I) -> TaskRef
where
    I: IntoIterator<Item = T>,
    T: Into<TaskRef>,
{
    let tasks = tasks.into_iter().map(Into::into).collect();
    match mode {
        Composition::Sequential => TaskRef::Sequential(tasks),
        Composition::Parallel => TaskRef::Parallel(tasks),
    }
}

/// Shorthand for a sequential composition.
pub fn series<I, T>(tasks: I) -> TaskRef
where
    I: IntoIterator<Item = T>,
    T: Into<TaskRef>,
{
    compose(Composition::Sequential, tasks)
}

/// Shorthand for a parallel composition.
pub fn parallel<I, T>(tasks: I) -> TaskRef
where
    I: IntoIterator<Item = T>,
    T: Into<TaskRef>,
{
    compose(Composition::Parallel, tasks)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Result tree of one invocation.
#[derive(Debug, Clone)]
pub struct Report {
    pub label: String,
    pub state: TaskState,
    pub elapsed: Duration,
    pub error: Option<String>,
    pub children: Vec<Report>,
}

impl Report {
    /// A task that never started.
    pub fn pending(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: TaskState::Pending,
            elapsed: Duration::ZERO,
            error: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn failed(label: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failed,
            error: Some(error.into()),
            ..Self::pending(label)
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == TaskState::Succeeded
    }

    /// The innermost failed reports, i.e. the ones that carry the actual
    /// error rather than a summary of their children.
    pub fn root_causes(&self) -> Vec<&Report> {
        let mut causes = Vec::new();
        self.collect_causes(&mut causes);
        causes
    }

    fn collect_causes<'a>(&'a self, causes: &mut Vec<&'a Report>) {
        if self.state != TaskState::Failed {
            return;
        }

        let before = causes.len();
        for child in &self.children {
            child.collect_causes(causes);
        }
        if causes.len() == before {
            causes.push(self);
        }
    }

    /// Depth-first search for a report by label.
    pub fn find(&self, label: &str) -> Option<&Report> {
        if self.label == label {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(label))
    }
}

#[derive(Clone)]
pub(crate) enum TaskBody {
    Work(WorkFn),
    Composed(TaskRef),
}

/// Every task known to the build, by name.
#[derive(Default)]
pub struct Registry {
    tasks: BTreeMap<String, TaskBody>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async work function under `name`.
    pub fn register<F, Fut>(&mut self, name: &str, work: F) -> Result<(), RegistryError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: WorkFn = Arc::new(move |ctx: Context| -> WorkFuture { Box::pin(work(ctx)) });
        self.insert(name, TaskBody::Work(body))
    }

    /// Register a composition of other tasks under `name`.
    pub fn register_composed(
        &mut self,
        name: &str,
        task: impl Into<TaskRef>,
    ) -> Result<(), RegistryError> {
        self.insert(name, TaskBody::Composed(task.into()))
    }

    fn insert(&mut self, name: &str, body: TaskBody) -> Result<(), RegistryError> {
        if self.tasks.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.tasks.insert(name.to_string(), body);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let mut graph = Graph::<&str, ()>::new();
        let nodes: HashMap<&str, _> = self
            .tasks
            .keys()
            .map(|name| (name.as_str(), graph.add_node(name.as_str())))
            .collect();

        for (name, body) in &self.tasks {
            let TaskBody::Composed(task) = body else {
                continue;
            };

            for child in task.names() {
                let Some(&target) = nodes.get(child) else {
                    return Err(RegistryError::Unknown(name.clone(), child.to_string()));
                };
                graph.add_edge(nodes[name.as_str()], target, ());
            }
        }

        petgraph::algo::toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| RegistryError::Cycle(graph[cycle.node_id()].to_string()))
    }

    /// Validate the registered compositions and build the orchestrator.
    pub fn finish(self, config: Config) -> Result<Orchestrator, RegistryError> {
        self.validate()?;
        Ok(Orchestrator::new(self.tasks, Arc::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_: Context) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let mut registry = Registry::new();
        registry.register("bundle", noop).unwrap();

        let err = registry.register("bundle", noop).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "bundle"));

        let err = registry.register_composed("bundle", "other").unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
    }

    #[test]
    fn test_unknown_reference() {
        let mut registry = Registry::new();
        registry.register("bundle", noop).unwrap();
        registry
            .register_composed("build", series(["bundle", "styles"]))
            .unwrap();

        let err = registry.validate().unwrap_err();
        assert!(matches!(err, RegistryError::Unknown(a, b) if a == "build" && b == "styles"));
    }

    #[test]
    fn test_cycle() {
        let mut registry = Registry::new();
        registry.register_composed("a", series(["b"])).unwrap();
        registry
            .register_composed("b", parallel([TaskRef::named("c"), series(["a"])]))
            .unwrap();
        registry.register("c", noop).unwrap();

        assert!(matches!(registry.validate(), Err(RegistryError::Cycle(_))));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut registry = Registry::new();
        registry.register_composed("loop", series(["loop"])).unwrap();
        assert!(matches!(registry.validate(), Err(RegistryError::Cycle(name)) if name == "loop"));
    }

    #[test]
    fn test_valid_graph() {
        let mut registry = Registry::new();
        registry.register("bundle", noop).unwrap();
        registry.register("scripts", noop).unwrap();
        registry
            .register_composed("build", series(["bundle", "scripts"]))
            .unwrap();
        registry
            .register_composed("all", parallel([TaskRef::named("build"), "bundle".into()]))
            .unwrap();

        assert!(registry.validate().is_ok());
        assert_eq!(registry.names().collect::<Vec<_>>(), ["all", "build", "bundle", "scripts"]);
    }

    #[test]
    fn test_display() {
        let task = series([TaskRef::named("bundle"), parallel(["styles", "scripts"])]);
        assert_eq!(task.to_string(), "series(bundle, parallel(styles, scripts))");
        assert_eq!(task.names(), ["bundle", "styles", "scripts"]);
    }

    #[test]
    fn test_root_causes() {
        let report = Report {
            state: TaskState::Failed,
            children: vec![
                Report {
                    state: TaskState::Succeeded,
                    ..Report::pending("a")
                },
                Report {
                    state: TaskState::Failed,
                    children: vec![Report::failed("c", "boom")],
                    ..Report::pending("b")
                },
            ],
            ..Report::pending("root")
        };

        let causes = report.root_causes();
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].label, "c");
        assert_eq!(report.find("b").unwrap().state, TaskState::Failed);
    }
}
