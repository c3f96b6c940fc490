use std::sync::OnceLock;

use regex::Regex;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_unsafe_chars, r"[^A-Za-z0-9._-]+");
re!(re_repeated_underscores, r"_{2,}");
re!(re_repeated_dots, r"\.{2,}");
re!(re_extension, r"^[a-z0-9]{1,10}$");

/// Longest stem kept from a user-supplied file name.
pub const MAX_STEM_CHARS: usize = 100;

/// Appended to a stored file's name to form its metadata sidecar.
pub const SIDECAR_SUFFIX: &str = ".metadata.json";

/// Fresh opaque document id.
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reduce arbitrary text to `[A-Za-z0-9._-]`, collapsing repeats and capping
/// the length. Never returns an empty string.
pub fn safe_component(raw: &str) -> String {
    let replaced = re_unsafe_chars().replace_all(raw, "_");
    let collapsed = re_repeated_underscores().replace_all(&replaced, "_");
    let collapsed = re_repeated_dots().replace_all(&collapsed, ".");
    let trimmed = collapsed.trim_matches(|c| c == '_' || c == '.' || c == '-');
    // Only ASCII survives the replacement, so byte slicing is safe.
    let capped = &trimmed[..trimmed.len().min(MAX_STEM_CHARS)];
    let capped = capped.trim_end_matches(|c| c == '_' || c == '.' || c == '-');
    if capped.is_empty() {
        "document".to_string()
    } else {
        capped.to_string()
    }
}

/// Split a user-supplied name into a sanitized stem and an optional
/// lowercase extension. Directory components are discarded.
pub fn sanitize_file_name(original: &str) -> (String, Option<String>) {
    let base = original.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(original).trim();

    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.trim_matches('.').is_empty() => {
            let ext = ext.to_ascii_lowercase();
            if re_extension().is_match(&ext) {
                (stem, Some(ext))
            } else {
                (stem, None)
            }
        }
        _ => (base, None),
    };

    (safe_component(stem), ext)
}

/// Build the stored name `<stem>_<suffix>[.<ext>]` with an explicit suffix.
pub fn stored_file_name(original: &str, suffix: &str) -> String {
    let (stem, ext) = sanitize_file_name(original);
    match ext {
        Some(ext) => format!("{stem}_{suffix}.{ext}"),
        None => format!("{stem}_{suffix}"),
    }
}

/// Build a stored name with a short random suffix (8 lowercase hex chars).
pub fn generate_file_name(original: &str) -> String {
    let suffix = format!("{:08x}", rand::random::<u32>());
    stored_file_name(original, &suffix)
}

pub fn sidecar_file_name(file_name: &str) -> String {
    format!("{file_name}{SIDECAR_SUFFIX}")
}

pub fn is_sidecar_name(name: &str) -> bool {
    name.len() > SIDECAR_SUFFIX.len() && name.ends_with(SIDECAR_SUFFIX)
}
