use std::fmt::Display;
use std::fs;
use std::io::{ErrorKind, Write};
use std::sync::LazyLock;
use std::time::Instant;

use camino::Utf8Path;
use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) static SPINNER_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .expect("Error setting progress bar template")
});

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Remove everything inside `dir`, keeping the directory itself.
///
/// A missing directory is created empty.
pub fn clear_dir(dir: &Utf8Path) -> std::io::Result<usize> {
    let s = Instant::now();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(dir)?;
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
        removed += 1;
    }

    tracing::info!(%dir, removed, "cleaned directory {}", as_overhead(s));

    Ok(removed)
}

/// Suffix of the temp files used for atomic writes.
pub(crate) const TEMP_SUFFIX: &str = ".kiln-tmp";

/// Write `data` to `path` unless the file already holds exactly these bytes.
///
/// The data goes to a uniquely named sibling temp file first and is renamed
/// into place, so a watcher never observes a half-written file and
/// concurrent writers of the same path do not trip over each other. Returns
/// whether the file was written.
pub fn write_if_changed(path: &Utf8Path, data: &[u8]) -> std::io::Result<bool> {
    let permissions = match fs::read(path) {
        Ok(existing) if existing == data => return Ok(false),
        Ok(_) => Some(fs::metadata(path)?.permissions()),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".")
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    temp.write_all(data)?;

    // Temp files are private; outputs are served to the web.
    if let Some(permissions) = permissions.or_else(default_permissions) {
        temp.as_file().set_permissions(permissions)?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    Ok(true)
}

#[cfg(unix)]
fn default_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<fs::Permissions> {
    None
}
