use crate::pipeline::{Stage, Stream};

/// Changes file names without touching contents.
#[derive(Debug, Clone)]
pub enum Rename {
    /// Insert a suffix before the extension: `a.css` → `a.min.css`.
    Suffix(String),
    /// Replace the extension.
    Extension(String),
    /// Replace the whole file name.
    FileName(String),
}

impl Rename {
    pub fn suffix(suffix: impl Into<String>) -> Self {
        Self::Suffix(suffix.into())
    }

    pub fn extension(extension: impl Into<String>) -> Self {
        Self::Extension(extension.into())
    }

    pub fn file_name(name: impl Into<String>) -> Self {
        Self::FileName(name.into())
    }
}

impl Stage for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    fn process(&self, stream: Stream) -> Stream {
        stream.map_files(self.name(), |mut asset| {
            asset.path = match self {
                Rename::Suffix(suffix) => {
                    let stem = asset.path.file_stem().unwrap_or_default();
                    let name = match asset.path.extension() {
                        Some(ext) => format!("{stem}{suffix}.{ext}"),
                        None => format!("{stem}{suffix}"),
                    };
                    asset.path.with_file_name(name)
                }
                Rename::Extension(ext) => asset.path.with_extension(ext),
                Rename::FileName(name) => asset.path.with_file_name(name),
            };
            Ok(Some(asset))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Asset;

    fn rename(stage: Rename, path: &str) -> String {
        let stream = Stream::new(vec![Asset::new("/base", path, "x")]);
        stage.process(stream).files()[0].path.to_string()
    }

    #[test]
    fn test_rename() {
        assert_eq!(rename(Rename::suffix(".min"), "/base/css/a.css"), "/base/css/a.min.css");
        assert_eq!(rename(Rename::suffix(".min"), "/base/LICENSE"), "/base/LICENSE.min");
        assert_eq!(rename(Rename::extension("css"), "/base/a.scss"), "/base/a.css");
        assert_eq!(
            rename(Rename::file_name("main.bundle.js"), "/base/js/main.js"),
            "/base/js/main.bundle.js"
        );
    }
}
