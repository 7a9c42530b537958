use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

pub const MAX_COMMENT_CHARS: usize = 2000;

/// A 1-5 star rating
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "i32", into = "i32")]
pub struct Rating(u8);

impl Rating {
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i32> for Rating {
    type Error = CoreError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if (1..=5).contains(&value) {
            Ok(Rating(value as u8))
        } else {
            Err(CoreError::ValidationError(format!(
                "rating must be between 1 and 5, got {}",
                value
            )))
        }
    }
}

impl From<Rating> for i32 {
    fn from(rating: Rating) -> Self {
        i32::from(rating.0)
    }
}

/// Rating left by the paying party for a completed live lesson. One per booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub coach_id: Uuid,
    pub rater_profile_id: Uuid,
    pub rating: Rating,
    pub comment: Option<String>,
    /// Moderation flags, owned by an external moderation actor
    pub hidden: bool,
    pub hidden_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Trims the comment, drops it when blank, rejects it when too long.
pub fn normalize_comment(comment: Option<String>) -> CoreResult<Option<String>> {
    let Some(comment) = comment else {
        return Ok(None);
    };
    let trimmed = comment.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_COMMENT_CHARS {
        return Err(CoreError::ValidationError(format!(
            "comment must be at most {} characters",
            MAX_COMMENT_CHARS
        )));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds() {
        assert!(Rating::try_from(0).is_err());
        assert!(Rating::try_from(6).is_err());
        assert_eq!(Rating::try_from(5).unwrap().value(), 5);
        assert_eq!(Rating::try_from(1).unwrap().value(), 1);
    }

    #[test]
    fn test_comment_normalization() {
        assert_eq!(normalize_comment(None).unwrap(), None);
        assert_eq!(normalize_comment(Some("   ".to_string())).unwrap(), None);
        assert_eq!(
            normalize_comment(Some("  great session ".to_string())).unwrap(),
            Some("great session".to_string())
        );
        let long = "x".repeat(MAX_COMMENT_CHARS + 1);
        assert!(normalize_comment(Some(long)).is_err());
    }
}
