//! User feedback domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// What kind of feedback the user gave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Positive,
    Negative,
    Accept,
    Reject,
    Correction,
    Edit,
    Regenerate,
}

impl FeedbackKind {
    /// Whether this feedback counts toward the positive rate.
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive | Self::Accept)
    }

    /// Whether this feedback counts toward the negative rate.
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Negative | Self::Reject | Self::Regenerate)
    }
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Correction => "correction",
            Self::Edit => "edit",
            Self::Regenerate => "regenerate",
        };
        write!(f, "{s}")
    }
}

/// A recorded piece of user feedback about one exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    /// Unique feedback ID.
    pub id: String,

    /// When it was recorded.
    pub ts: DateTime<Utc>,

    /// The query the response answered.
    pub query: String,

    /// The response being judged.
    pub response: String,

    /// Feedback category.
    pub kind: FeedbackKind,

    /// Per-dimension ratings in `[0, 1]` (accuracy, relevance, …).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub dimensions: HashMap<String, f64>,

    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// The corrected answer, for `Correction` feedback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,

    /// Who gave the feedback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Session the exchange belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Feedback {
    pub fn new(
        query: impl Into<String>,
        response: impl Into<String>,
        kind: FeedbackKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            query: query.into(),
            response: response.into(),
            kind,
            dimensions: HashMap::new(),
            comment: None,
            correction: None,
            user_id: None,
            session_id: None,
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>, score: f64) -> Self {
        self.dimensions.insert(name.into(), score.clamp(0.0, 1.0));
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polarity_classification() {
        assert!(FeedbackKind::Positive.is_positive());
        assert!(FeedbackKind::Accept.is_positive());
        assert!(FeedbackKind::Regenerate.is_negative());
        assert!(!FeedbackKind::Correction.is_positive());
        assert!(!FeedbackKind::Correction.is_negative());
    }

    #[test]
    fn dimensions_are_clamped() {
        let fb = Feedback::new("q", "r", FeedbackKind::Positive).with_dimension("accuracy", 1.4);
        assert!((fb.dimensions["accuracy"] - 1.0).abs() < f64::EPSILON);
    }
}
