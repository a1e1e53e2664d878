use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

/// Per-file ceiling, checked against the declared size before anything is read.
pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

pub const ACCEPTED_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "gif", "webp"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(String);

impl ImageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the raw bytes of an image live. Paths are read lazily at encode time.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// A file offered by one upload interaction, before the batch is judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub name: String,
    pub source: ImageSource,
    pub size_bytes: u64,
    pub mime: &'static str,
}

impl ImageCandidate {
    pub fn is_oversized(&self) -> bool {
        self.size_bytes > MAX_IMAGE_BYTES
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub label: String,
    pub mime: &'static str,
    pub size_bytes: u64,
    pub dimensions: Option<(u32, u32)>,
}

impl Preview {
    pub fn summary(&self) -> String {
        let mut parts = vec![
            self.label.clone(),
            self.mime.to_string(),
            format_size(self.size_bytes),
        ];
        if let Some((width, height)) = self.dimensions {
            parts.push(format!("{width}x{height}"));
        }
        parts.join("  ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OversizedImage {
    pub name: String,
    pub size_bytes: u64,
}

impl fmt::Display for OversizedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is {}, above the {} limit",
            self.name,
            format_size(self.size_bytes),
            format_size(MAX_IMAGE_BYTES)
        )
    }
}

impl std::error::Error for OversizedImage {}

/// An accepted image. Its size never exceeds [`MAX_IMAGE_BYTES`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    id: ImageId,
    name: String,
    source: ImageSource,
    size_bytes: u64,
    mime: &'static str,
    preview: Preview,
}

impl UploadedImage {
    pub fn from_candidate(
        candidate: ImageCandidate,
        dimensions: Option<(u32, u32)>,
    ) -> Result<Self, OversizedImage> {
        if candidate.is_oversized() {
            return Err(OversizedImage {
                name: candidate.name,
                size_bytes: candidate.size_bytes,
            });
        }
        let preview = Preview {
            label: candidate.name.clone(),
            mime: candidate.mime,
            size_bytes: candidate.size_bytes,
            dimensions,
        };
        Ok(Self {
            id: ImageId::generate(),
            name: candidate.name,
            source: candidate.source,
            size_bytes: candidate.size_bytes,
            mime: candidate.mime,
            preview,
        })
    }

    pub fn id(&self) -> &ImageId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn preview(&self) -> &Preview {
        &self.preview
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchVerdict {
    Empty,
    Accepted,
    /// Every file over the ceiling, in submission order. The whole batch is refused.
    Oversized(Vec<OversizedImage>),
}

pub fn check_batch(candidates: &[ImageCandidate]) -> BatchVerdict {
    if candidates.is_empty() {
        return BatchVerdict::Empty;
    }
    let oversized: Vec<OversizedImage> = candidates
        .iter()
        .filter(|candidate| candidate.is_oversized())
        .map(|candidate| OversizedImage {
            name: candidate.name.clone(),
            size_bytes: candidate.size_bytes,
        })
        .collect();
    if oversized.is_empty() {
        BatchVerdict::Accepted
    } else {
        BatchVerdict::Oversized(oversized)
    }
}

pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|value| value.to_str())
        .and_then(mime_for_extension)
}

pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let value = bytes as f64;
    if value >= MIB {
        format!("{:.1} MB", value / MIB)
    } else if value >= KIB {
        format!("{:.1} KB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, size_bytes: u64) -> ImageCandidate {
        ImageCandidate {
            name: name.to_string(),
            source: ImageSource::Path(PathBuf::from(name)),
            size_bytes,
            mime: "image/png",
        }
    }

    #[test]
    fn ceiling_is_inclusive() {
        assert!(!candidate("a.png", MAX_IMAGE_BYTES).is_oversized());
        assert!(candidate("a.png", MAX_IMAGE_BYTES + 1).is_oversized());
    }

    #[test]
    fn empty_batch_is_its_own_verdict() {
        assert_eq!(check_batch(&[]), BatchVerdict::Empty);
    }

    #[test]
    fn one_oversized_file_condemns_the_batch() {
        let batch = vec![
            candidate("small.png", 1024),
            candidate("huge.png", 6 * 1024 * 1024),
            candidate("also-small.png", 2048),
        ];
        let BatchVerdict::Oversized(oversized) = check_batch(&batch) else {
            panic!("expected oversized verdict");
        };
        assert_eq!(oversized.len(), 1);
        assert_eq!(oversized[0].name, "huge.png");
    }

    #[test]
    fn from_candidate_refuses_oversized_input() {
        let err = UploadedImage::from_candidate(candidate("huge.png", MAX_IMAGE_BYTES + 1), None)
            .err()
            .map(|err| err.name);
        assert_eq!(err.as_deref(), Some("huge.png"));
    }

    #[test]
    fn uploaded_images_get_distinct_ids_and_previews() {
        let first = UploadedImage::from_candidate(candidate("a.png", 10), Some((4, 3)));
        let second = UploadedImage::from_candidate(candidate("a.png", 10), None);
        let (Ok(first), Ok(second)) = (first, second) else {
            panic!("both candidates fit under the ceiling");
        };
        assert_ne!(first.id(), second.id());
        assert_eq!(first.preview().summary(), "a.png  image/png  10 B  4x3");
        assert_eq!(second.preview().summary(), "a.png  image/png  10 B");
    }

    #[test]
    fn mime_lookup_is_case_insensitive_and_limited() {
        assert_eq!(mime_for_path(Path::new("x/Photo.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("x/anim.gif")), Some("image/gif"));
        assert_eq!(mime_for_extension(".webp"), Some("image/webp"));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("no_extension")), None);
    }

    #[test]
    fn sizes_render_in_binary_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(MAX_IMAGE_BYTES), "5.0 MB");
    }

    #[test]
    fn byte_sources_do_not_dump_contents() {
        let source = ImageSource::Bytes(Arc::from(vec![1u8, 2, 3]));
        assert_eq!(format!("{source:?}"), "Bytes(3 bytes)");
    }
}
