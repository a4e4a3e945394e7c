use std::fmt;

use crate::error::PredictionError;

/// Binary diagnosis. Discriminants are the model's output indices.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Label {
    NoTumor = 0,
    Tumor = 1,
}

impl Label {
    /// Labels in model output order.
    pub const ALL: [Label; 2] = [Label::NoTumor, Label::Tumor];

    pub fn from_index(index: usize) -> Option<Label> {
        Self::ALL.get(index).copied()
    }

    /// Picks the label with the highest score. Equal scores resolve to the
    /// lower index, so `[0.5, 0.5]` is `NoTumor`.
    pub fn from_scores(scores: &[f32]) -> Result<Label, PredictionError> {
        if scores.is_empty() {
            return Err(PredictionError::EmptyOutput);
        }
        if scores.len() != Self::ALL.len() {
            return Err(PredictionError::UnexpectedLength {
                expected: Self::ALL.len(),
                actual: scores.len(),
            });
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(PredictionError::NonFinite(scores.to_vec()));
        }
        let (index, _) = argmax(scores).ok_or(PredictionError::EmptyOutput)?;
        Self::from_index(index).ok_or(PredictionError::UnexpectedLength {
            expected: Self::ALL.len(),
            actual: scores.len(),
        })
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::NoTumor => f.write_str("No Tumor"),
            Label::Tumor => f.write_str("Tumor"),
        }
    }
}

/// Index and value of the first maximum; `None` for an empty slice.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best, (i, &val)| match best {
            Some((_, max_val)) if val <= max_val => best,
            _ => Some((i, val)),
        })
}
