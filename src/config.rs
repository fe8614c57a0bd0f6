//! Static build configuration, read once from `buildconfig.json`.
//!
//! The file format follows the theme's existing build config: a `paths`
//! record with the asset roots, plus the live-reload watch globs and dev
//! server options. A few optional keys select the external programs and the
//! failure policy. Every path is resolved against the directory holding the
//! config file, so the process working directory does not matter.

use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::targets::Browsers;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::pipeline::FailurePolicy;

/// Default vendor scripts, relative to `paths.node`. They are concatenated in
/// this order, followed by the bundled theme entry.
const VENDOR_SCRIPTS: &[&str] = &[
    "babel-polyfill/dist/polyfill.js",
    "bootstrap/dist/js/bootstrap.min.js",
    "magnific-popup/dist/jquery.magnific-popup.js",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    paths: RawPaths,
    #[serde(default)]
    browser_sync_watch_files: Vec<String>,
    #[serde(default)]
    browser_sync_options: RawDevServer,
    #[serde(default)]
    vendor_scripts: Option<Vec<String>>,
    #[serde(default = "Program::bundler")]
    bundler: Program,
    #[serde(default = "Program::minifier")]
    minifier: Program,
    #[serde(default = "default_browsers")]
    browsers: Vec<String>,
    #[serde(default)]
    on_error: FailurePolicy,
    #[serde(default)]
    stage_timeout_secs: Option<u64>,
}

/// All six keys are mandatory; serde rejects the file when one is missing.
#[derive(Debug, Deserialize)]
struct RawPaths {
    js: String,
    dist: String,
    styles: String,
    client: String,
    img: String,
    node: String,
}

/// The dev server serves `baseDir` itself; browser-sync options it has no
/// counterpart for (`proxy` in particular) are collected and rejected.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawDevServer {
    port: u16,
    reload_port: u16,
    base_dir: String,
    #[serde(flatten)]
    unsupported: BTreeMap<String, serde_json::Value>,
}

impl Default for RawDevServer {
    fn default() -> Self {
        Self {
            port: 3000,
            reload_port: 1337,
            base_dir: ".".into(),
            unsupported: BTreeMap::new(),
        }
    }
}

fn default_browsers() -> Vec<String> {
    vec!["last 2 versions".into()]
}

/// An external program used as a pipeline stage.
///
/// An argument equal to `{file}` is replaced with the path of the processed
/// file; without it the file contents are piped through stdin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Program {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Program {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    fn bundler() -> Self {
        Self::new("esbuild", &["{file}", "--bundle", "--format=iife"])
    }

    fn minifier() -> Self {
        Self::new("esbuild", &["--minify", "--loader=js"])
    }
}

/// Asset roots, already joined with the config root.
#[derive(Debug, Clone)]
pub struct Paths {
    pub js: Utf8PathBuf,
    pub dist: Utf8PathBuf,
    pub styles: Utf8PathBuf,
    pub client: Utf8PathBuf,
    pub img: Utf8PathBuf,
    pub node: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct DevServer {
    /// HTTP port of the static server.
    pub port: u16,
    /// Preferred websocket port for live reload.
    pub reload_port: u16,
    /// Directory served over HTTP.
    pub base_dir: Utf8PathBuf,
    /// Globs whose changes trigger a browser reload.
    pub watch_files: Vec<String>,
}

/// The resolved, read-only configuration shared by every task.
#[derive(Debug, Clone)]
pub struct Config {
    pub root: Utf8PathBuf,
    pub paths: Paths,
    pub dev_server: DevServer,
    pub vendor_scripts: Vec<Utf8PathBuf>,
    pub bundler: Program,
    pub minifier: Program,
    pub browsers: Option<Browsers>,
    pub on_error: FailurePolicy,
    pub stage_timeout: Option<Duration>,
}

impl Config {
    /// Read and resolve the config file at `path`.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.into(), e))?;

        let root = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::try_from(std::env::current_dir().map_err(ConfigError::Root)?)?,
        };

        let raw = serde_json::from_str(&text).map_err(|e| ConfigError::Parse(path.into(), e))?;
        Self::resolve(raw, root)
    }

    /// Parse a config from JSON text, resolving paths against `root`.
    pub fn from_json(text: &str, root: impl Into<Utf8PathBuf>) -> Result<Self, ConfigError> {
        let raw = serde_json::from_str(text)
            .map_err(|e| ConfigError::Parse("<inline>".into(), e))?;
        Self::resolve(raw, root.into())
    }

    fn resolve(raw: RawConfig, root: Utf8PathBuf) -> Result<Self, ConfigError> {
        let RawPaths {
            js,
            dist,
            styles,
            client,
            img,
            node,
        } = raw.paths;

        let join = |key: &'static str, value: String| -> Result<Utf8PathBuf, ConfigError> {
            let value = value.trim();
            if value.is_empty() {
                return Err(ConfigError::EmptyPath(key));
            }
            Ok(root.join(value.trim_start_matches("./")))
        };

        let paths = Paths {
            js: join("js", js)?,
            dist: join("dist", dist)?,
            styles: join("styles", styles)?,
            client: join("client", client)?,
            img: join("img", img)?,
            node: join("node", node)?,
        };

        let vendor_scripts = match raw.vendor_scripts {
            Some(list) => list.iter().map(|p| paths.node.join(p)).collect(),
            None => VENDOR_SCRIPTS.iter().map(|p| paths.node.join(p)).collect(),
        };

        let browsers = Browsers::from_browserslist(raw.browsers.iter().map(String::as_str))
            .map_err(|e| ConfigError::Browsers(raw.browsers.clone(), e.to_string()))?;

        if let Some(key) = raw.browser_sync_options.unsupported.keys().next() {
            return Err(ConfigError::Unsupported(format!("browserSyncOptions.{key}")));
        }

        let dev_server = DevServer {
            port: raw.browser_sync_options.port,
            reload_port: raw.browser_sync_options.reload_port,
            base_dir: root.join(raw.browser_sync_options.base_dir.trim_start_matches("./")),
            watch_files: raw
                .browser_sync_watch_files
                .iter()
                .map(|glob| root.join(glob.trim_start_matches("./")).into_string())
                .collect(),
        };

        Ok(Self {
            paths,
            dev_server,
            vendor_scripts,
            bundler: raw.bundler,
            minifier: raw.minifier,
            browsers,
            on_error: raw.on_error,
            stage_timeout: raw.stage_timeout_secs.map(Duration::from_secs),
            root,
        })
    }

    /// Entry module handed to the bundler.
    pub fn script_main(&self) -> Utf8PathBuf {
        self.paths.js.join("main.js")
    }

    /// Output directory for scripts.
    pub fn script_dist(&self) -> Utf8PathBuf {
        self.paths.dist.join("js")
    }

    /// Output directory for the theme stylesheets.
    pub fn style_dist(&self) -> Utf8PathBuf {
        self.paths.dist.join("css")
    }

    /// Output directory for the client (block editor) stylesheets.
    pub fn client_dist(&self) -> Utf8PathBuf {
        self.paths.client.join("dist")
    }
}
