use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use crate::error::StageError;
use crate::pipeline::{Asset, Stage, Stream};

fn transform(asset: &Asset, targets: Targets, minify: bool) -> Result<String, StageError> {
    let code = asset.text().map_err(|e| StageError::Css(e.to_string()))?;

    let options = ParserOptions {
        filename: asset.path.to_string(),
        ..ParserOptions::default()
    };

    let mut sheet = StyleSheet::parse(code, options).map_err(|e| StageError::Css(e.to_string()))?;

    // Vendor prefixes are added while minifying, so this runs in both modes.
    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| StageError::Css(e.to_string()))?;

    let out = sheet
        .to_css(PrinterOptions {
            minify,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| StageError::Css(e.to_string()))?;

    Ok(out.code)
}

fn targets(browsers: Option<Browsers>) -> Targets {
    Targets {
        browsers,
        ..Targets::default()
    }
}

/// Adds the vendor prefixes the configured browsers need, keeping the
/// output readable.
#[derive(Debug, Clone, Copy)]
pub struct Autoprefix {
    targets: Targets,
}

impl Autoprefix {
    pub fn new(browsers: Option<Browsers>) -> Self {
        Self {
            targets: targets(browsers),
        }
    }
}

impl Stage for Autoprefix {
    fn name(&self) -> &str {
        "autoprefix"
    }

    fn process(&self, stream: Stream) -> Stream {
        stream.map_files(self.name(), |mut asset| {
            asset.contents = transform(&asset, self.targets, false)?.into_bytes();
            Ok(Some(asset))
        })
    }
}

/// Minifies CSS for the configured browsers.
#[derive(Debug, Clone, Copy)]
pub struct MinifyCss {
    targets: Targets,
}

impl MinifyCss {
    pub fn new(browsers: Option<Browsers>) -> Self {
        Self {
            targets: targets(browsers),
        }
    }
}

impl Stage for MinifyCss {
    fn name(&self) -> &str {
        "minifycss"
    }

    fn process(&self, stream: Stream) -> Stream {
        stream.map_files(self.name(), |mut asset| {
            asset.contents = transform(&asset, self.targets, true)?.into_bytes();
            Ok(Some(asset))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn old_safari() -> Option<Browsers> {
        Some(Browsers {
            safari: Some(13 << 16),
            ..Browsers::default()
        })
    }

    #[test]
    fn test_autoprefix_adds_prefix() {
        let stream = Stream::new(vec![Asset::new("/", "/a.css", ".a { user-select: none; }")]);
        let stream = Autoprefix::new(old_safari()).process(stream);

        let css = stream.files()[0].text().unwrap();
        assert!(css.contains("-webkit-user-select: none"));
        assert!(css.contains('\n'));
    }

    #[test]
    fn test_minify() {
        let input = ".a {\n  color: #ff0000;\n  margin: 0px 0px 0px 0px;\n}\n\n.b { }\n";
        let stream = Stream::new(vec![Asset::new("/", "/a.css", input)]);
        let stream = MinifyCss::new(None).process(stream);

        let css = stream.files()[0].text().unwrap();
        assert_eq!(css.trim(), ".a{color:red;margin:0}");

        // the result is still CSS
        assert!(StyleSheet::parse(css, ParserOptions::default()).is_ok());
    }

    #[test]
    fn test_invalid_css_is_a_diagnostic() {
        let stream = Stream::new(vec![
            Asset::new("/", "/ok.css", ".a{color:red}"),
            Asset::new("/", "/bad.css", ".a { color: red; } }}} @media ("),
            Asset::new("/", "/bin.css", vec![0xff, 0xfe]),
        ]);
        let stream = MinifyCss::new(None).process(stream);

        assert_eq!(stream.files().len() + stream.failures().len(), 3);
        assert!(stream.files().iter().any(|f| f.path == "/ok.css"));
        assert!(stream.failures().iter().any(|f| f.path == "/bin.css"));
    }
}
