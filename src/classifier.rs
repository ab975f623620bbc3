use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ServiceError;
use crate::llm::ChatClient;
use crate::models::{ClientMetrics, RiskStatus};

const RISK_SYSTEM_PROMPT: &str = "You are an AI assistant for a fitness trainer. \
Predict whether a client is likely to drop out of their fitness plan or stay committed. \
Reply with a JSON object of the form {\"riskStatus\": \"dropout\"} or {\"riskStatus\": \"committed\"} and nothing else.";

/// Labels one client as likely to drop out or stay committed.
#[async_trait]
pub trait RiskClassifier: Send + Sync {
    async fn classify(&self, metrics: &ClientMetrics) -> Result<RiskStatus, ServiceError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RiskReply {
    risk_status: RiskStatus,
}

pub struct LlmRiskClassifier {
    chat: ChatClient,
}

impl LlmRiskClassifier {
    pub fn new(chat: ChatClient) -> Self {
        Self { chat }
    }
}

pub fn risk_prompt(metrics: &ClientMetrics) -> String {
    format!(
        "Client ID: {}\nWorkouts Completed: {}\nExercise Compliance: {}%\nNutrition Compliance: {}%\n\nRisk Status:",
        metrics.client_id,
        metrics.workouts_completed,
        metrics.exercise_compliance,
        metrics.nutrition_compliance
    )
}

#[async_trait]
impl RiskClassifier for LlmRiskClassifier {
    async fn classify(&self, metrics: &ClientMetrics) -> Result<RiskStatus, ServiceError> {
        let reply: RiskReply = self
            .chat
            .complete_json(RISK_SYSTEM_PROMPT, &risk_prompt(metrics))
            .await?;
        Ok(reply.risk_status)
    }
}

/// Offline classifier: a weighted engagement score, dropout below the
/// threshold.
#[derive(Debug, Clone, Copy)]
pub struct RuleClassifier {
    pub threshold: f64,
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self { threshold: 50.0 }
    }
}

impl RuleClassifier {
    pub fn score(metrics: &ClientMetrics) -> f64 {
        let exercise = metrics.exercise_compliance.clamp(0.0, 100.0);
        let nutrition = metrics.nutrition_compliance.clamp(0.0, 100.0);
        exercise * 0.5 + nutrition * 0.3 + workout_weight(metrics.workouts_completed) * 20.0
    }
}

pub fn workout_weight(workouts_completed: u32) -> f64 {
    match workouts_completed {
        0 => 0.0,
        1..=10 => 0.4,
        11..=50 => 0.7,
        _ => 1.0,
    }
}

#[async_trait]
impl RiskClassifier for RuleClassifier {
    async fn classify(&self, metrics: &ClientMetrics) -> Result<RiskStatus, ServiceError> {
        if !metrics.exercise_compliance.is_finite() || !metrics.nutrition_compliance.is_finite() {
            return Err(ServiceError::Malformed(format!(
                "non-numeric compliance for {}",
                metrics.client_id
            )));
        }

        if Self::score(metrics) < self.threshold {
            Ok(RiskStatus::Dropout)
        } else {
            Ok(RiskStatus::Committed)
        }
    }
}
