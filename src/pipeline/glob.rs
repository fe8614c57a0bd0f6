use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::error::PipelineError;
use crate::pipeline::Asset;

pub(crate) const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn is_wildcard(component: &str) -> bool {
    component.contains(['*', '?', '['])
}

/// The static directory prefix of a glob.
///
/// - `styles/*.scss` → `styles`
/// - `img/**/*` → `img`
/// - `client/client.scss` → `client` (a literal path's base is its parent)
pub fn glob_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();

    match components.iter().position(|c| is_wildcard(c.as_str())) {
        Some(index) => components.iter().take(index).collect(),
        None => path.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
    }
}

/// Read every file matched by `sources`, in declaration order.
///
/// Patterns starting with `!` exclude matches of the remaining patterns. A
/// file matched twice is read once, at its first position. A literal path
/// (no wildcard) that does not exist is an error, a wildcard that matches
/// nothing is not.
pub fn collect_sources(sources: &[String]) -> Result<Vec<Asset>, PipelineError> {
    let (negated, positive): (Vec<_>, Vec<_>) = sources.iter().partition(|s| s.starts_with('!'));

    let excludes = negated
        .iter()
        .map(|pattern| Pattern::new(&pattern[1..]))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    let mut assets = Vec::new();

    for pattern in positive {
        let base = glob_base(pattern);

        let paths = if is_wildcard(pattern) {
            let mut paths = Vec::new();
            for entry in glob::glob_with(pattern, MATCH_OPTIONS)? {
                let path = Utf8PathBuf::try_from(entry?)?;
                if path.is_file() {
                    paths.push(path);
                }
            }
            paths
        } else {
            let path = Utf8PathBuf::from(pattern.as_str());
            if !path.is_file() {
                return Err(PipelineError::MissingSource(path));
            }
            vec![path]
        };

        for path in paths {
            if excludes
                .iter()
                .any(|p| p.matches_path_with(path.as_std_path(), MATCH_OPTIONS))
            {
                continue;
            }

            if !seen.insert(path.clone()) {
                continue;
            }

            let contents = fs::read(&path).map_err(|e| PipelineError::Read(path.clone(), e))?;
            assets.push(Asset::new(base.clone(), path, contents));
        }
    }

    Ok(assets)
}
