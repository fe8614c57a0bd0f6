use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::BufReader;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageFormat};

use crate::core::Hash32;
use crate::error::StageError;
use crate::pipeline::{Asset, Stage, Stream};

const LEDGER_FILE: &str = "imagemin.cbor";

/// Compression setting for JPEG files. PNG is always recompressed
/// losslessly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    /// Leave JPEG files as they are.
    Lossless,
    /// Re-encode JPEG files with a quality factor (0-100).
    Lossy(u8),
}

impl Default for Quality {
    fn default() -> Self {
        Self::Lossy(80)
    }
}

impl Quality {
    fn tag(self) -> String {
        match self {
            Quality::Lossless => "ll".to_string(),
            Quality::Lossy(q) => format!("q{q}"),
        }
    }
}

/// Recompresses PNG and JPEG images.
///
/// The result replaces the original only when it is smaller. Every file
/// that leaves this stage is fingerprinted into a ledger kept in the cache
/// directory; a file whose fingerprint is already known is passed through
/// without decoding. Since this stage usually writes back into its own
/// source directory, that is what keeps a second run from touching
/// anything.
#[derive(Debug)]
pub struct ImageMin {
    quality: Quality,
    ledger: Utf8PathBuf,
    lock: Mutex<()>,
}

impl ImageMin {
    pub fn new(cache_dir: impl AsRef<Utf8Path>, quality: Quality) -> Self {
        Self {
            quality,
            ledger: cache_dir.as_ref().join(LEDGER_FILE),
            lock: Mutex::new(()),
        }
    }

    fn load_ledger(&self) -> BTreeSet<String> {
        let file = match File::open(&self.ledger) {
            Ok(file) => file,
            Err(_) => return BTreeSet::new(),
        };

        match ciborium::from_reader(BufReader::new(file)) {
            Ok(ledger) => ledger,
            Err(e) => {
                tracing::warn!(path = %self.ledger, "discarding unreadable image ledger: {e}");
                BTreeSet::new()
            }
        }
    }

    fn save_ledger(&self, ledger: &BTreeSet<String>) -> std::io::Result<()> {
        if let Some(dir) = self.ledger.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut buffer = Vec::new();
        ciborium::into_writer(ledger, &mut buffer).map_err(std::io::Error::other)?;
        crate::io::write_if_changed(&self.ledger, &buffer)?;
        Ok(())
    }

    fn key(&self, contents: &[u8]) -> String {
        format!("{}.{}", Hash32::hash(contents).to_hex(), self.quality.tag())
    }
}

impl Stage for ImageMin {
    fn name(&self) -> &str {
        "imagemin"
    }

    fn process(&self, stream: Stream) -> Stream {
        // Overlapping runs would lose each other's ledger entries.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let known = self.load_ledger();
        let seen = Mutex::new(Vec::new());

        let stream = stream.map_files(self.name(), |asset| {
            if known.contains(&self.key(&asset.contents)) {
                return Ok(Some(asset));
            }

            let asset = optimize(asset, self.quality)?;
            let key = self.key(&asset.contents);
            seen.lock().unwrap_or_else(|e| e.into_inner()).push(key);
            Ok(Some(asset))
        });

        let seen = seen.into_inner().unwrap_or_else(|e| e.into_inner());
        if !seen.is_empty() {
            let mut ledger = known;
            ledger.extend(seen);
            if let Err(e) = self.save_ledger(&ledger) {
                tracing::warn!(path = %self.ledger, "couldn't save image ledger: {e}");
            }
        }

        stream
    }
}

fn optimize(mut asset: Asset, quality: Quality) -> Result<Asset, StageError> {
    let format = match ImageFormat::from_path(&asset.path) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg)) => format,
        _ => return Ok(asset),
    };

    let img = image::load_from_memory_with_format(&asset.contents, format)?;
    let (width, height) = (img.width(), img.height());
    let mut buffer = Vec::new();

    match (format, quality) {
        (ImageFormat::Png, _) => {
            PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, FilterType::Adaptive)
                .write_image(img.as_bytes(), width, height, img.color().into())?;
        }
        (_, Quality::Lossy(q)) => {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut buffer, q).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        (_, Quality::Lossless) => return Ok(asset),
    }

    if buffer.len() < asset.contents.len() {
        tracing::debug!(
            path = %asset.path,
            before = asset.contents.len(),
            after = buffer.len(),
            "recompressed"
        );
        asset.contents = buffer;
    }

    Ok(asset)
}
