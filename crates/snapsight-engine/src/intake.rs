use std::borrow::Cow;
use std::fs;
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::{ImageFormat, ImageReader};
use sha2::{Digest, Sha256};
use snapsight_contracts::intake::{
    format_size, mime_for_path, ImageCandidate, ImageSource, UploadedImage, ACCEPTED_EXTENSIONS,
    MAX_IMAGE_BYTES,
};
use snapsight_contracts::session::Notice;

/// Candidates gathered from one batch of paths, plus a notice per skipped path.
#[derive(Debug, Default)]
pub struct PathBatch {
    pub candidates: Vec<ImageCandidate>,
    pub skipped: Vec<Notice>,
}

/// Turns user-supplied paths into candidates without reading file bodies.
///
/// Unsupported extensions, missing paths, and non-files are skipped. The
/// declared size comes from filesystem metadata.
pub fn candidates_from_paths<P: AsRef<Path>>(paths: &[P]) -> PathBatch {
    let mut batch = PathBatch::default();
    for path in paths {
        match candidate_from_path(path.as_ref()) {
            Ok(candidate) => batch.candidates.push(candidate),
            Err(notice) => batch.skipped.push(notice),
        }
    }
    batch
}

fn candidate_from_path(path: &Path) -> Result<ImageCandidate, Notice> {
    let display = path.display().to_string();
    let Some(mime) = mime_for_path(path) else {
        return Err(Notice::warning(
            Notice::UNSUPPORTED_FILE,
            format!(
                "{display}: accepted formats are {}",
                ACCEPTED_EXTENSIONS.join(", ")
            ),
        ));
    };
    let metadata = fs::metadata(path)
        .map_err(|err| Notice::warning(Notice::UNSUPPORTED_FILE, format!("{display}: {err}")))?;
    if !metadata.is_file() {
        return Err(Notice::warning(
            Notice::UNSUPPORTED_FILE,
            format!("{display}: not a regular file"),
        ));
    }
    let name = path
        .file_name()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_else(|| display.clone());
    Ok(ImageCandidate {
        name,
        source: ImageSource::Path(path.to_path_buf()),
        size_bytes: metadata.len(),
        mime,
    })
}

/// Builds a candidate from an in-memory buffer, detecting the format from magic bytes.
pub fn candidate_from_bytes(name: &str, bytes: Vec<u8>) -> Result<ImageCandidate, Notice> {
    let mime = image::guess_format(&bytes)
        .ok()
        .and_then(accepted_mime)
        .ok_or_else(|| {
            Notice::warning(
                Notice::UNSUPPORTED_FILE,
                format!("{name}: not a JPEG, PNG, GIF or WebP image"),
            )
        })?;
    Ok(ImageCandidate {
        name: name.to_string(),
        size_bytes: bytes.len() as u64,
        source: ImageSource::Bytes(Arc::from(bytes)),
        mime,
    })
}

fn accepted_mime(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

/// Reads only the image header. A failed probe yields `None`, never an error.
pub fn probe_dimensions(candidate: &ImageCandidate) -> Option<(u32, u32)> {
    match &candidate.source {
        ImageSource::Path(path) => ImageReader::open(path)
            .ok()?
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok(),
        ImageSource::Bytes(bytes) => ImageReader::new(Cursor::new(bytes.as_ref()))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok(),
    }
}

/// Loads the body of an accepted image.
///
/// A file whose length no longer matches the size accepted at intake is an
/// `InvalidData` error, so a file that grew past the ceiling is never sent.
pub fn read_image(image: &UploadedImage) -> io::Result<Cow<'_, [u8]>> {
    let path = match image.source() {
        ImageSource::Path(path) => path,
        ImageSource::Bytes(bytes) => return Ok(Cow::Borrowed(bytes.as_ref())),
    };
    let bytes = fs::read(path)?;
    let len = bytes.len() as u64;
    if len != image.size_bytes() || len > MAX_IMAGE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "{} changed after upload ({} accepted, {} now)",
                path.display(),
                format_size(image.size_bytes()),
                format_size(len)
            ),
        ));
    }
    Ok(Cow::Owned(bytes))
}

/// Hex sha256 of the image content, recorded in the session log.
pub fn fingerprint(image: &UploadedImage) -> Result<String> {
    let bytes = read_image(image).with_context(|| format!("failed reading {}", image.name()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
