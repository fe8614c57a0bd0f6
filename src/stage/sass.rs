use camino::Utf8PathBuf;

use crate::pipeline::{Asset, Stage, Stream};

/// Compiles Sass/SCSS to CSS with `grass`.
///
/// Imports resolve against the file's own directory first, then the extra
/// load paths (usually the dependency root). Partials are dropped from the
/// stream; they only exist to be imported.
#[derive(Debug, Default, Clone)]
pub struct Sass {
    load_paths: Vec<Utf8PathBuf>,
}

impl Sass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.load_paths.push(path.into());
        self
    }
}

impl Stage for Sass {
    fn name(&self) -> &str {
        "sass"
    }

    fn process(&self, stream: Stream) -> Stream {
        stream.map_files(self.name(), |asset| {
            if asset.is_partial() {
                return Ok(None);
            }

            let mut options = grass::Options::default().style(grass::OutputStyle::Expanded);
            if let Some(dir) = asset.path.parent() {
                options = options.load_path(dir);
            }
            for path in &self.load_paths {
                options = options.load_path(path);
            }

            let input = String::from_utf8(asset.contents)?;
            let css = grass::from_string(input, &options)?;

            Ok(Some(Asset {
                path: asset.path.with_extension("css"),
                base: asset.base,
                contents: css.into_bytes(),
            }))
        })
    }
}
