use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_FILENAME_LEN;
use crate::model::Ms;

/// Promotional media a musician can attach to their profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MediaKind {
    MusicSample,
    Logo,
    Headshot,
}

/// Upload rules for one media kind.
#[derive(Debug)]
pub struct MediaRule {
    pub kind: MediaKind,
    /// Upload form field / SQL value naming this kind.
    pub field: &'static str,
    /// Storage subdirectory.
    pub dir: &'static str,
    /// Stored filename prefix.
    pub prefix: &'static str,
    pub extensions: &'static [&'static str],
    pub mime_prefix: &'static str,
    pub max_bytes: u64,
}

const MIB: u64 = 1024 * 1024;

static RULES: [MediaRule; 3] = [
    MediaRule {
        kind: MediaKind::MusicSample,
        field: "music_sample",
        dir: "music",
        prefix: "music",
        extensions: &["mp3", "wav", "ogg", "m4a", "aac", "flac"],
        mime_prefix: "audio/",
        max_bytes: 15 * MIB,
    },
    MediaRule {
        kind: MediaKind::Logo,
        field: "logo",
        dir: "logos",
        prefix: "logo",
        extensions: &["jpg", "jpeg", "png", "gif", "webp", "svg"],
        mime_prefix: "image/",
        max_bytes: 5 * MIB,
    },
    MediaRule {
        kind: MediaKind::Headshot,
        field: "headshot",
        dir: "headshots",
        prefix: "headshot",
        extensions: &["jpg", "jpeg", "png", "gif", "webp"],
        mime_prefix: "image/",
        max_bytes: 5 * MIB,
    },
];

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::MusicSample, MediaKind::Logo, MediaKind::Headshot];

    pub fn rule(self) -> &'static MediaRule {
        match self {
            MediaKind::MusicSample => &RULES[0],
            MediaKind::Logo => &RULES[1],
            MediaKind::Headshot => &RULES[2],
        }
    }

    pub fn from_field(field: &str) -> Option<Self> {
        let field = field.trim().to_ascii_lowercase();
        RULES.iter().find(|r| r.field == field).map(|r| r.kind)
    }

    pub fn as_str(self) -> &'static str {
        self.rule().field
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    EmptyFilename,
    FilenameTooLong,
    BadExtension { kind: MediaKind, ext: String },
    BadMimeType { kind: MediaKind, mime: String },
    TooLarge { kind: MediaKind, size: u64, max: u64 },
    Empty,
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::EmptyFilename => write!(f, "original filename is empty"),
            MediaError::FilenameTooLong => write!(f, "original filename too long"),
            MediaError::BadExtension { kind, ext } => write!(
                f,
                "{kind} must be one of {}; got '{ext}'",
                kind.rule().extensions.join(", ")
            ),
            MediaError::BadMimeType { kind, mime } => {
                write!(f, "{kind} must have a {}* MIME type; got '{mime}'", kind.rule().mime_prefix)
            }
            MediaError::TooLarge { kind, size, max } => {
                write!(f, "{kind} is {size} bytes; limit is {max}")
            }
            MediaError::Empty => write!(f, "file is empty"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Lowercased extension of `filename`, if it has one.
fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Check an upload against its kind's rule. Returns the normalized extension.
pub fn validate_upload(
    kind: MediaKind,
    original_filename: &str,
    size_bytes: u64,
    mime_type: &str,
) -> Result<String, MediaError> {
    let rule = kind.rule();
    if original_filename.trim().is_empty() {
        return Err(MediaError::EmptyFilename);
    }
    if original_filename.len() > MAX_FILENAME_LEN {
        return Err(MediaError::FilenameTooLong);
    }
    let ext = extension(original_filename).unwrap_or_default();
    if !rule.extensions.contains(&ext.as_str()) {
        return Err(MediaError::BadExtension { kind, ext });
    }
    if !mime_type.to_ascii_lowercase().starts_with(rule.mime_prefix) {
        return Err(MediaError::BadMimeType { kind, mime: mime_type.to_string() });
    }
    if size_bytes == 0 {
        return Err(MediaError::Empty);
    }
    if size_bytes > rule.max_bytes {
        return Err(MediaError::TooLarge { kind, size: size_bytes, max: rule.max_bytes });
    }
    Ok(ext)
}

/// Storage-relative path for an accepted upload: `<dir>/<prefix>_<uploaded_at>_<id>.<ext>`.
pub fn stored_path(kind: MediaKind, uploaded_at: Ms, id: Ulid, ext: &str) -> String {
    let rule = kind.rule();
    format!("{}/{}_{uploaded_at}_{id}.{ext}", rule.dir, rule.prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_table_is_indexed_by_kind() {
        for kind in MediaKind::ALL {
            assert_eq!(kind.rule().kind, kind);
            assert_eq!(MediaKind::from_field(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn from_field_is_case_insensitive() {
        assert_eq!(MediaKind::from_field("HEADSHOT"), Some(MediaKind::Headshot));
        assert_eq!(MediaKind::from_field(" music_sample "), Some(MediaKind::MusicSample));
        assert_eq!(MediaKind::from_field("video"), None);
    }

    #[test]
    fn accepts_audio_sample() {
        let ext = validate_upload(MediaKind::MusicSample, "Demo Track.MP3", 3 * MIB, "audio/mpeg").unwrap();
        assert_eq!(ext, "mp3");
    }

    #[test]
    fn svg_allowed_for_logo_only() {
        assert!(validate_upload(MediaKind::Logo, "logo.svg", 1024, "image/svg+xml").is_ok());
        let err = validate_upload(MediaKind::Headshot, "face.svg", 1024, "image/svg+xml").unwrap_err();
        assert!(matches!(err, MediaError::BadExtension { kind: MediaKind::Headshot, .. }));
    }

    #[test]
    fn rejects_wrong_mime() {
        let err = validate_upload(MediaKind::MusicSample, "song.mp3", 1024, "image/png").unwrap_err();
        assert!(matches!(err, MediaError::BadMimeType { .. }));
    }

    #[test]
    fn size_limits_per_kind() {
        assert!(validate_upload(MediaKind::Headshot, "a.png", 5 * MIB, "image/png").is_ok());
        let err = validate_upload(MediaKind::Headshot, "a.png", 5 * MIB + 1, "image/png").unwrap_err();
        assert_eq!(err, MediaError::TooLarge { kind: MediaKind::Headshot, size: 5 * MIB + 1, max: 5 * MIB });
        assert!(validate_upload(MediaKind::MusicSample, "a.wav", 15 * MIB, "audio/wav").is_ok());
        assert!(matches!(
            validate_upload(MediaKind::Logo, "a.png", 0, "image/png"),
            Err(MediaError::Empty)
        ));
    }

    #[test]
    fn missing_extension_rejected() {
        assert!(matches!(
            validate_upload(MediaKind::Logo, "logo", 10, "image/png"),
            Err(MediaError::BadExtension { .. })
        ));
        assert!(matches!(
            validate_upload(MediaKind::Logo, ".png", 10, "image/png"),
            Err(MediaError::BadExtension { .. })
        ));
    }

    #[test]
    fn stored_path_uses_kind_directory() {
        let id = Ulid::from_string("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap();
        assert_eq!(
            stored_path(MediaKind::Headshot, 1_700_000_000_000, id, "png"),
            "headshots/headshot_1700000000000_01ARZ3NDEKTSV4RRFFQ69G5FAV.png"
        );
    }
}
