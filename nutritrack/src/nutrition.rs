//! Food log, weigh-in and settings records plus the daily summary behind the dashboard.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

pub const FOOD_LOGS: &str = "food_logs";
pub const WEIGHT_ENTRIES: &str = "weight_entries";
pub const PROFILES: &str = "profiles";

const MAX_NAME_LEN: usize = 200;
const MAX_CALORIES: f64 = 10_000.0;
const MAX_WEIGHT_KG: f64 = 700.0;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Meal {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl Meal {
    pub const ALL: [Meal; 4] = [Meal::Breakfast, Meal::Lunch, Meal::Dinner, Meal::Snack];

    pub fn label(self) -> &'static str {
        match self {
            Meal::Breakfast => "Breakfast",
            Meal::Lunch => "Lunch",
            Meal::Dinner => "Dinner",
            Meal::Snack => "Snack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodLogEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub logged_on: Date,
    pub meal: Meal,
    pub name: String,
    pub calories: f64,
    #[serde(default)]
    pub protein_g: f64,
    #[serde(default)]
    pub carbs_g: f64,
    #[serde(default)]
    pub fat_g: f64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFoodLogEntry {
    pub logged_on: Option<Date>,
    pub meal: Meal,
    pub name: String,
    pub calories: f64,
    #[serde(default)]
    pub protein_g: f64,
    #[serde(default)]
    pub carbs_g: f64,
    #[serde(default)]
    pub fat_g: f64,
}

impl NewFoodLogEntry {
    pub fn into_entry(self, user_id: Uuid, today: Date) -> Result<FoodLogEntry, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::Empty("name"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(ValidationError::TooLong {
                field: "name",
                max: MAX_NAME_LEN,
            });
        }
        check_range("calories", self.calories, 0.0, MAX_CALORIES)?;
        check_range("protein_g", self.protein_g, 0.0, MAX_CALORIES)?;
        check_range("carbs_g", self.carbs_g, 0.0, MAX_CALORIES)?;
        check_range("fat_g", self.fat_g, 0.0, MAX_CALORIES)?;

        Ok(FoodLogEntry {
            id: Uuid::new_v4(),
            user_id,
            logged_on: self.logged_on.unwrap_or(today),
            meal: self.meal,
            name,
            calories: self.calories,
            protein_g: self.protein_g,
            carbs_g: self.carbs_g,
            fat_g: self.fat_g,
            created_at: Some(OffsetDateTime::now_utc()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub logged_on: Date,
    pub weight_kg: f64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewWeightEntry {
    pub logged_on: Option<Date>,
    pub weight_kg: f64,
}

impl NewWeightEntry {
    pub fn into_entry(self, user_id: Uuid, today: Date) -> Result<WeightEntry, ValidationError> {
        if !self.weight_kg.is_finite() || self.weight_kg <= 0.0 || self.weight_kg > MAX_WEIGHT_KG {
            return Err(ValidationError::OutOfRange {
                field: "weight_kg",
                min: 0.0,
                max: MAX_WEIGHT_KG,
            });
        }
        Ok(WeightEntry {
            id: Uuid::new_v4(),
            user_id,
            logged_on: self.logged_on.unwrap_or(today),
            weight_kg: self.weight_kg,
            created_at: Some(OffsetDateTime::now_utc()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

/// Stored in `profiles`, keyed by the owner's user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub id: Uuid,
    #[serde(default)]
    pub display_name: Option<String>,
    pub daily_calorie_goal: f64,
    pub protein_goal_g: f64,
    pub carbs_goal_g: f64,
    pub fat_goal_g: f64,
    #[serde(default)]
    pub target_weight_kg: Option<f64>,
    #[serde(default)]
    pub unit: UnitSystem,
}

impl Settings {
    pub fn defaults_for(user_id: Uuid) -> Self {
        Self {
            id: user_id,
            display_name: None,
            daily_calorie_goal: 2000.0,
            protein_goal_g: 150.0,
            carbs_goal_g: 200.0,
            fat_goal_g: 65.0,
            target_weight_kg: None,
            unit: UnitSystem::Metric,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsUpdate {
    pub display_name: Option<String>,
    pub daily_calorie_goal: Option<f64>,
    pub protein_goal_g: Option<f64>,
    pub carbs_goal_g: Option<f64>,
    pub fat_goal_g: Option<f64>,
    pub target_weight_kg: Option<f64>,
    pub unit: Option<UnitSystem>,
}

impl SettingsUpdate {
    /// Apply on top of `current`; fields left out keep their value.
    pub fn apply(self, mut current: Settings) -> Result<Settings, ValidationError> {
        if let Some(name) = self.display_name {
            let name = name.trim().to_string();
            if name.chars().count() > MAX_NAME_LEN {
                return Err(ValidationError::TooLong {
                    field: "display_name",
                    max: MAX_NAME_LEN,
                });
            }
            current.display_name = (!name.is_empty()).then_some(name);
        }
        if let Some(goal) = self.daily_calorie_goal {
            check_positive("daily_calorie_goal", goal, MAX_CALORIES)?;
            current.daily_calorie_goal = goal;
        }
        if let Some(goal) = self.protein_goal_g {
            check_positive("protein_goal_g", goal, MAX_CALORIES)?;
            current.protein_goal_g = goal;
        }
        if let Some(goal) = self.carbs_goal_g {
            check_positive("carbs_goal_g", goal, MAX_CALORIES)?;
            current.carbs_goal_g = goal;
        }
        if let Some(goal) = self.fat_goal_g {
            check_positive("fat_goal_g", goal, MAX_CALORIES)?;
            current.fat_goal_g = goal;
        }
        if let Some(target) = self.target_weight_kg {
            check_positive("target_weight_kg", target, MAX_WEIGHT_KG)?;
            current.target_weight_kg = Some(target);
        }
        if let Some(unit) = self.unit {
            current.unit = unit;
        }
        Ok(current)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MacroTotals {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

impl MacroTotals {
    pub fn sum<'a>(entries: impl IntoIterator<Item = &'a FoodLogEntry>) -> Self {
        let mut totals = Self::default();
        for entry in entries {
            totals.add(entry);
        }
        totals
    }

    fn add(&mut self, entry: &FoodLogEntry) {
        self.calories += entry.calories;
        self.protein_g += entry.protein_g;
        self.carbs_g += entry.carbs_g;
        self.fat_g += entry.fat_g;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: Date,
    pub entries: usize,
    pub totals: MacroTotals,
    pub calorie_goal: f64,
    /// Negative when over the goal.
    pub calories_remaining: f64,
    pub by_meal: BTreeMap<Meal, f64>,
    pub latest_weight_kg: Option<f64>,
    /// Latest minus earliest of the weigh-ins considered.
    pub weight_change_kg: Option<f64>,
    pub target_weight_kg: Option<f64>,
}

/// Totals for `date` (entries for other days are ignored) against the user's goals.
/// `weights` may be in any order.
pub fn summarize_day(
    date: Date,
    entries: &[FoodLogEntry],
    weights: &[WeightEntry],
    settings: &Settings,
) -> DailySummary {
    let mut totals = MacroTotals::default();
    let mut by_meal = Meal::ALL
        .iter()
        .map(|meal| (*meal, 0.0))
        .collect::<BTreeMap<_, _>>();
    let mut count = 0;

    for entry in entries.iter().filter(|entry| entry.logged_on == date) {
        totals.add(entry);
        *by_meal.entry(entry.meal).or_insert(0.0) += entry.calories;
        count += 1;
    }

    let mut ordered = weights.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|entry| (entry.logged_on, entry.created_at));
    let latest = ordered.last().map(|entry| entry.weight_kg);
    let earliest = ordered.first().map(|entry| entry.weight_kg);
    let weight_change_kg = match (earliest, latest) {
        (Some(first), Some(last)) if ordered.len() > 1 => Some(round_tenths(last - first)),
        _ => None,
    };

    DailySummary {
        date,
        entries: count,
        totals,
        calorie_goal: settings.daily_calorie_goal,
        calories_remaining: settings.daily_calorie_goal - totals.calories,
        by_meal,
        latest_weight_kg: latest,
        weight_change_kg,
        target_weight_kg: settings.target_weight_kg,
    }
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, min, max })
    }
}

fn check_positive(field: &'static str, value: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 && value <= max {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min: 0.0,
            max,
        })
    }
}
