//! Credit cost lookup.
//!
//! Cost depends only on the quality tier and clip length; the same table is
//! used for text-to-video and image-to-video.

use crate::task::{TaskType, VideoDuration};

/// Standard quality, 5 seconds.
pub const STANDARD_5S_CREDITS: i32 = 1;
/// Standard quality, 10 seconds.
pub const STANDARD_10S_CREDITS: i32 = 2;
/// High quality, 5 seconds.
pub const HIGH_QUALITY_5S_CREDITS: i32 = 3;
/// High quality, 10 seconds.
pub const HIGH_QUALITY_10S_CREDITS: i32 = 6;

/// Credits charged for a generation.
pub fn credits_for(_task_type: TaskType, high_quality: bool, duration: VideoDuration) -> i32 {
    match (high_quality, duration) {
        (false, VideoDuration::Five) => STANDARD_5S_CREDITS,
        (false, VideoDuration::Ten) => STANDARD_10S_CREDITS,
        (true, VideoDuration::Five) => HIGH_QUALITY_5S_CREDITS,
        (true, VideoDuration::Ten) => HIGH_QUALITY_10S_CREDITS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_text_to_video_costs_one_credit() {
        assert_eq!(credits_for(TaskType::TextToVideo, false, VideoDuration::Five), 1);
    }

    #[test]
    fn test_high_quality_long_is_most_expensive() {
        let max = credits_for(TaskType::ImageToVideo, true, VideoDuration::Ten);
        for hq in [false, true] {
            for d in [VideoDuration::Five, VideoDuration::Ten] {
                assert!(credits_for(TaskType::ImageToVideo, hq, d) <= max);
            }
        }
    }
}
