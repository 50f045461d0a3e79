use crate::error::{CategorizeError, Result};
use crate::models::{Method, ReviewTier};

/// Confidence at or above which trusted methods auto-accept regardless of
/// the client's `confidence_high`.
pub const TRUSTED_METHOD_FLOOR: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    high: f64,
    medium: f64,
}

impl Thresholds {
    /// Requires `0 <= medium <= high <= 1`.
    pub fn new(high: f64, medium: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&high) || !(0.0..=1.0).contains(&medium) {
            return Err(CategorizeError::config(format!(
                "classification thresholds must be within [0, 1] (high={high}, medium={medium})"
            )));
        }
        if medium > high {
            return Err(CategorizeError::config(format!(
                "classification.confidence_medium ({medium}) must not exceed classification.confidence_high ({high})"
            )));
        }
        Ok(Self { high, medium })
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn medium(&self) -> f64 {
        self.medium
    }
}

fn is_trusted(method: Method) -> bool {
    matches!(method, Method::CategoryMapping | Method::Rule)
}

pub fn assign_review_tier(method: Method, confidence: f64, thresholds: &Thresholds) -> ReviewTier {
    if (is_trusted(method) && confidence >= TRUSTED_METHOD_FLOOR) || confidence >= thresholds.high {
        ReviewTier::AutoAccept
    } else if confidence >= thresholds.medium {
        ReviewTier::QuickReview
    } else {
        ReviewTier::ManualReview
    }
}
