use serde::{Deserialize, Serialize};
use time::Date;

use crate::backend::BackendKind;
use crate::nutrition::{FoodLogEntry, MacroTotals, WeightEntry};

pub const DEFAULT_WEIGH_IN_LIMIT: usize = 30;
pub const MAX_WEIGH_IN_LIMIT: usize = 365;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: BackendKind,
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: Option<Date>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    pub fn clamped(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_WEIGH_IN_LIMIT)
            .clamp(1, MAX_WEIGH_IN_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct FoodLogResponse {
    pub date: Date,
    pub totals: MacroTotals,
    pub entries: Vec<FoodLogEntry>,
}

#[derive(Debug, Serialize)]
pub struct WeighInsResponse {
    pub entries: Vec<WeightEntry>,
}
