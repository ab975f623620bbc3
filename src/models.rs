use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionCompliance {
    pub percentage: f64,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseCompliance {
    pub two_weeks_ago: f64,
    pub one_week_ago: f64,
    pub this_week: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSnapshot {
    pub client_id: String,
    pub age: u32,
    pub added_on: NaiveDate,
    pub last_signed_in: NaiveDate,
    pub workouts_completed: u32,
    pub total_cardio_activities: u32,
    pub nutrition_compliance: NutritionCompliance,
    pub exercise_compliance: ExerciseCompliance,
}

impl ClientSnapshot {
    pub fn metrics(&self) -> ClientMetrics {
        ClientMetrics {
            client_id: self.client_id.clone(),
            workouts_completed: self.workouts_completed,
            exercise_compliance: self.exercise_compliance.this_week,
            nutrition_compliance: self.nutrition_compliance.percentage,
        }
    }
}

/// What the risk classifier and insight generator get to see about a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMetrics {
    pub client_id: String,
    pub workouts_completed: u32,
    pub exercise_compliance: f64,
    pub nutrition_compliance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum RiskStatus {
    Dropout,
    Committed,
}

impl RiskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskStatus::Dropout => "dropout",
            RiskStatus::Committed => "committed",
        }
    }
}

impl fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskStatus {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dropout" => Ok(RiskStatus::Dropout),
            "committed" => Ok(RiskStatus::Committed),
            other => Err(ServiceError::Malformed(format!(
                "unknown risk status {other:?}"
            ))),
        }
    }
}

impl TryFrom<String> for RiskStatus {
    type Error = ServiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskPrediction {
    pub client_id: String,
    pub risk_status: RiskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub client_id: String,
    pub risk_status: RiskStatus,
    pub message: String,
}

/// Insights for the clients that made it through both stages. Order follows
/// completion, not input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub insights: Vec<Insight>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.insights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insights.is_empty()
    }

    pub fn client_ids(&self) -> HashSet<&str> {
        self.insights.iter().map(|i| i.client_id.as_str()).collect()
    }

    /// Input clients with no insight, in input order.
    pub fn dropped_client_ids<'a>(&self, input: &'a [ClientSnapshot]) -> Vec<&'a str> {
        let produced = self.client_ids();
        input
            .iter()
            .map(|s| s.client_id.as_str())
            .filter(|id| !produced.contains(id))
            .collect()
    }

    pub fn count_by_status(&self, status: RiskStatus) -> usize {
        self.insights
            .iter()
            .filter(|i| i.risk_status == status)
            .count()
    }
}
