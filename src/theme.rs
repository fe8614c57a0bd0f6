//! The theme's task graph.
//!
//! | task             | does                                                     |
//! |------------------|----------------------------------------------------------|
//! | `dropdist`       | empty the dist directory                                 |
//! | `bundle`         | bundle `js/main.js` into `dist/js/main.bundle.js`        |
//! | `scripts`        | vendor scripts + bundle → `dist/js/theme.min.js`         |
//! | `sass`           | compile and prefix the stylesheets                       |
//! | `minifycss`      | minify compiled stylesheets into `*.min.css`             |
//! | `styles`         | `sass` and `minifycss` in one pass                       |
//! | `imagemin`       | recompress images in place                               |
//! | `reload`         | reload connected browsers                                |
//! | `build`          | `bundle`, then `styles`, then `scripts`                  |
//! | `watch`          | `build`, then rebuild on change                          |
//! | `browser-sync`   | dev server with live reload                              |
//! | `watch-bs`       | `browser-sync`, `watch` and `scripts` side by side       |

use anyhow::Context as _;
use camino::Utf8PathBuf;

use crate::config::Config;
use crate::error::RegistryError;
use crate::orchestrator::{Context, Orchestrator};
use crate::pipeline::{Pipeline, merge};
use crate::stage::{
    Autoprefix, Concat, External, ImageMin, MinifyCss, Quality, Rename, Sass, Tee,
};
use crate::task::{Registry, series};

#[cfg(feature = "live")]
use crate::watch::Watcher;

#[cfg(feature = "server")]
use crate::task::parallel;

/// Name of the bundled entry script inside the scripts output directory.
pub const BUNDLE_NAME: &str = "main.bundle.js";

/// Name of the concatenated and minified script.
pub const SCRIPT_NAME: &str = "theme.min.js";

/// Where the image optimizer keeps its ledger, relative to the theme root.
const CACHE_DIR: &str = ".cache/kiln";

/// Stylesheet entry points and where their CSS goes.
pub fn style_mappings(config: &Config) -> Vec<(String, Utf8PathBuf)> {
    vec![
        (
            config.paths.styles.join("*.scss").into_string(),
            config.style_dist(),
        ),
        (
            config.paths.client.join("client.scss").into_string(),
            config.client_dist(),
        ),
        (
            config.paths.client.join("client-editor.scss").into_string(),
            config.client_dist(),
        ),
    ]
}

fn sass(config: &Config) -> Sass {
    Sass::new().load_path(&config.paths.node)
}

fn configured(config: &Config, pipeline: Pipeline) -> Pipeline {
    pipeline
        .policy(config.on_error)
        .timeout(config.stage_timeout)
}

/// `js/main.js` → bundler → `dist/js/main.bundle.js`
pub fn bundle(config: &Config) -> Pipeline {
    let pipeline = Pipeline::new([config.script_main().into_string()], config.script_dist())
        .pipe(External::new("bundle", config.bundler.clone()).timeout(config.stage_timeout))
        .pipe(Rename::file_name(BUNDLE_NAME));
    configured(config, pipeline)
}

/// Vendor scripts and the bundle, concatenated and minified.
pub fn scripts(config: &Config) -> Pipeline {
    let sources = config
        .vendor_scripts
        .iter()
        .map(|path| path.to_string())
        .chain([config.script_dist().join(BUNDLE_NAME).into_string()]);

    let pipeline = Pipeline::new(sources, config.script_dist())
        .pipe(Concat::new(SCRIPT_NAME))
        .pipe(External::new("minify", config.minifier.clone()).timeout(config.stage_timeout));
    configured(config, pipeline)
}

/// Compile and prefix, one pipeline per mapping.
pub fn compile_styles(config: &Config) -> Vec<Pipeline> {
    style_mappings(config)
        .into_iter()
        .map(|(source, dest)| {
            let pipeline = Pipeline::new([source], dest)
                .pipe(sass(config))
                .pipe(Autoprefix::new(config.browsers));
            configured(config, pipeline)
        })
        .collect()
}

/// Minify what [`compile_styles`] produced into `*.min.css` files.
pub fn minify_styles(config: &Config) -> Vec<Pipeline> {
    let theme = Pipeline::new(
        [
            config.style_dist().join("*.css").into_string(),
            format!("!{}", config.style_dist().join("*.min.css")),
        ],
        config.style_dist(),
    );

    let client = Pipeline::new(
        [
            config.client_dist().join("client.css").into_string(),
            config.client_dist().join("client-editor.css").into_string(),
        ],
        config.client_dist(),
    );

    [theme, client]
        .into_iter()
        .map(|pipeline| {
            let pipeline = pipeline
                .pipe(MinifyCss::new(config.browsers))
                .pipe(Rename::suffix(".min"));
            configured(config, pipeline)
        })
        .collect()
}

/// Compile, prefix, write, minify and write again, one pipeline per
/// mapping. A broken stylesheet only drops its own outputs.
pub fn styles(config: &Config) -> Vec<Pipeline> {
    style_mappings(config)
        .into_iter()
        .map(|(source, dest)| {
            let pipeline = Pipeline::new([source], &dest)
                .pipe(sass(config))
                .pipe(Autoprefix::new(config.browsers))
                .pipe(Tee::new(&dest))
                .pipe(MinifyCss::new(config.browsers))
                .pipe(Rename::suffix(".min"));
            configured(config, pipeline)
        })
        .collect()
}

/// Recompress everything under `img` in place.
pub fn images(config: &Config) -> Pipeline {
    let pipeline = Pipeline::new(
        [config.paths.img.join("**/*").into_string()],
        &config.paths.img,
    )
    .pipe(ImageMin::new(config.root.join(CACHE_DIR), Quality::default()));
    configured(config, pipeline)
}

async fn run_all(ctx: &Context, pipelines: Vec<Pipeline>) -> anyhow::Result<()> {
    let report = merge(pipelines, ctx.policy()).await?;
    tracing::debug!(
        written = report.written.len(),
        unchanged = report.unchanged.len(),
        failed = report.failures.len(),
        "pipelines done"
    );
    Ok(())
}

async fn dropdist(ctx: Context) -> anyhow::Result<()> {
    let dist = ctx.config().paths.dist.clone();
    tokio::task::spawn_blocking(move || crate::io::clear_dir(&dist))
        .await?
        .context("couldn't empty the dist directory")?;
    Ok(())
}

#[cfg(feature = "live")]
async fn watch(ctx: Context) -> anyhow::Result<()> {
    let report = ctx.run("build").await;
    if !report.is_success() {
        tracing::warn!("initial build failed, watching anyway");
    }

    let config = ctx.config();
    let mut watcher = Watcher::new(ctx.orchestrator().clone());

    watcher.bind([config.script_main().as_str()], series(["bundle", "scripts"]))?;
    watcher.bind(
        [
            config.paths.styles.join("**/*.scss").into_string(),
            config.paths.client.join("*.scss").into_string(),
        ],
        "styles",
    )?;
    watcher.bind([config.paths.img.join("**/*").as_str()], "imagemin-watch")?;

    watcher.run().await?;
    Ok(())
}

#[cfg(feature = "server")]
async fn browser_sync(ctx: Context) -> anyhow::Result<()> {
    let config = ctx.config();
    let server = &config.dev_server;

    let reload_port = ctx.reload().start(server.reload_port)?;

    let mut watcher = Watcher::new(ctx.orchestrator().clone());
    watcher.bind(&server.watch_files, "reload")?;

    // Whichever side fails first takes the other one down with it.
    tokio::try_join!(
        crate::server::serve(&server.base_dir, server.port, reload_port, ctx.shutdown()),
        async { watcher.run().await.map_err(anyhow::Error::from) },
    )?;

    Ok(())
}

/// Register every theme task.
pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register("dropdist", dropdist)?;

    registry.register("bundle", |ctx: Context| async move {
        run_all(&ctx, vec![bundle(ctx.config())]).await
    })?;
    registry.register_composed("webpack-once", "bundle")?;
    registry.register_composed("webpack-watch", "bundle")?;

    registry.register("scripts", |ctx: Context| async move {
        run_all(&ctx, vec![scripts(ctx.config())]).await
    })?;

    registry.register("sass", |ctx: Context| async move {
        run_all(&ctx, compile_styles(ctx.config())).await
    })?;
    registry.register("minifycss", |ctx: Context| async move {
        run_all(&ctx, minify_styles(ctx.config())).await
    })?;
    registry.register("styles", |ctx: Context| async move {
        run_all(&ctx, styles(ctx.config())).await
    })?;

    registry.register("imagemin", |ctx: Context| async move {
        run_all(&ctx, vec![images(ctx.config())]).await
    })?;

    registry.register("reload", |ctx: Context| async move {
        ctx.reload().broadcast();
        Ok(())
    })?;
    registry.register_composed("imagemin-watch", series(["imagemin", "reload"]))?;

    registry.register_composed("build", series(["bundle", "styles", "scripts"]))?;

    #[cfg(feature = "live")]
    registry.register("watch", watch)?;

    #[cfg(feature = "server")]
    {
        registry.register("browser-sync", browser_sync)?;
        registry.register_composed("watch-bs", parallel(["browser-sync", "watch", "scripts"]))?;
    }

    Ok(())
}

/// The theme's tasks, ready to run with `config`.
pub fn orchestrator(config: Config) -> Result<Orchestrator, RegistryError> {
    let mut registry = Registry::new();
    register(&mut registry)?;
    registry.finish(config)
}
