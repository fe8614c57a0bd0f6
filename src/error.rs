use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised by a single stage for a single file.
///
/// These never escape their pipeline: the pipeline turns them into
/// [`Diagnostic`](crate::pipeline::Diagnostic)s and applies the failure
/// policy.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    #[error("CSS error: {0}")]
    Css(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("'{program}' exited with {status}:\n{stderr}")]
    External {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("'{program}' timed out after {limit:?} and was killed")]
    Timeout {
        program: String,
        limit: std::time::Duration,
    },

    #[error("File is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Source file '{0}' not found")]
    MissingSource(Utf8PathBuf),

    #[error("Couldn't read '{0}': {1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't write '{0}': {1}")]
    Write(Utf8PathBuf, std::io::Error),

    #[error("Stage '{stage}' failed on '{path}', aborting")]
    Aborted { stage: String, path: Utf8PathBuf },

    #[error("{0} file(s) failed to build")]
    Failed(usize),

    #[error("Pipeline timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Pipeline writing to '{0}' was cancelled")]
    Cancelled(Utf8PathBuf),

    #[error("Pipeline worker crashed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}': {1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Invalid config file '{0}': {1}")]
    Parse(Utf8PathBuf, serde_json::Error),

    #[error("Config key '{0}' is not supported, the dev server only serves `baseDir` directly")]
    Unsupported(String),

    #[error("Config key 'paths.{0}' must not be empty")]
    EmptyPath(&'static str),

    #[error("Invalid browser query {0:?}: {1}")]
    Browsers(Vec<String>, String),

    #[error("Couldn't resolve config directory: {0}")]
    Root(std::io::Error),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Task '{0}' is already registered")]
    Duplicate(String),

    #[error("Task '{0}' references unknown task '{1}'")]
    Unknown(String, String),

    #[error("Cycle detected in task compositions at '{0}'")]
    Cycle(String),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't bind live reload socket: {0}")]
    Bind(std::io::Error),
}

#[derive(Debug, Error)]
pub enum KilnError {
    #[error("Error while loading configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error while registering tasks:\n{0}")]
    Registry(#[from] RegistryError),

    #[error("Failed to build runtime")]
    RuntimeBuild(#[source] std::io::Error),

    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    #[error("Task '{0}' failed")]
    TaskFailed(String),
}
