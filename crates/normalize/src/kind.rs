use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
    /// HEIC or HEIF, including image sequences.
    Heic,
}

impl ImageKind {
    pub fn is_heic(self) -> bool {
        matches!(self, ImageKind::Heic)
    }
}

/// What a declared content type asks the normalizer to do. Every variant has
/// exactly one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Image(ImageKind),
    Pdf,
    Text,
    /// Carries the declared content type as supplied (trimmed).
    Unsupported(String),
}

impl SourceKind {
    /// Case-insensitive; parameters after `;` are ignored.
    pub fn from_content_type(content_type: &str) -> Self {
        let declared = content_type.trim();
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let image = match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageKind::Jpeg),
            "image/png" | "image/x-png" => Some(ImageKind::Png),
            "image/gif" => Some(ImageKind::Gif),
            "image/webp" => Some(ImageKind::Webp),
            "image/bmp" | "image/x-ms-bmp" => Some(ImageKind::Bmp),
            "image/tiff" => Some(ImageKind::Tiff),
            "image/heic" | "image/heif" | "image/heic-sequence" | "image/heif-sequence" => {
                Some(ImageKind::Heic)
            }
            _ => None,
        };
        if let Some(kind) = image {
            return SourceKind::Image(kind);
        }

        match essence.as_str() {
            "application/pdf" | "application/x-pdf" => SourceKind::Pdf,
            t if t.starts_with("text/") => SourceKind::Text,
            _ => SourceKind::Unsupported(declared.to_string()),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Image(kind) => write!(f, "image ({kind:?})"),
            SourceKind::Pdf => write!(f, "pdf"),
            SourceKind::Text => write!(f, "text"),
            SourceKind::Unsupported(declared) => write!(f, "unsupported ({declared})"),
        }
    }
}
