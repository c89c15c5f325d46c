use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Normal,
    Exceeds,
}

/// `Exceeds` iff `value > threshold`. A reading exactly at the threshold is
/// `Normal`.
pub fn evaluate(value: f64, threshold: f64) -> Verdict {
    if value > threshold {
        Verdict::Exceeds
    } else {
        Verdict::Normal
    }
}
