//! Object key derivation.
//!
//! Keys depend only on (user, task, role), so a retried upload overwrites
//! the object written by an earlier attempt.

use std::fmt;

/// What a migrated object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaRole {
    Video,
    Thumbnail,
}

impl MediaRole {
    pub fn file_name(&self) -> &'static str {
        match self {
            MediaRole::Video => "video.mp4",
            MediaRole::Thumbnail => "thumbnail.jpg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaRole::Video => "video/mp4",
            MediaRole::Thumbnail => "image/jpeg",
        }
    }
}

impl fmt::Display for MediaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaRole::Video => write!(f, "video"),
            MediaRole::Thumbnail => write!(f, "thumbnail"),
        }
    }
}

/// `videos/{user}/{task}/{file}`
pub fn media_key(user_id: &str, task_id: i64, role: MediaRole) -> String {
    format!("videos/{}/{}/{}", user_id, task_id, role.file_name())
}

pub fn video_key(user_id: &str, task_id: i64) -> String {
    media_key(user_id, task_id, MediaRole::Video)
}

pub fn thumbnail_key(user_id: &str, task_id: i64) -> String {
    media_key(user_id, task_id, MediaRole::Thumbnail)
}

/// `inputs/{user}/{upload_id}.{ext}` for user-supplied images.
pub fn input_key(user_id: &str, upload_id: &str, extension: &str) -> String {
    format!("inputs/{}/{}.{}", user_id, upload_id, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_keys_are_deterministic() {
        assert_eq!(video_key("u1", 42), "videos/u1/42/video.mp4");
        assert_eq!(thumbnail_key("u1", 42), "videos/u1/42/thumbnail.jpg");
        assert_eq!(video_key("u1", 42), video_key("u1", 42));
    }

    #[test]
    fn test_input_key() {
        assert_eq!(input_key("u1", "abc", "png"), "inputs/u1/abc.png");
    }
}
