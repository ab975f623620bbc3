use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ServiceError;
use crate::llm::ChatClient;
use crate::models::{ClientMetrics, RiskStatus};

const INSIGHT_SYSTEM_PROMPT: &str = "You are an AI assistant for a fitness trainer, tasked with \
generating personalized motivational insights for clients. Based on the client's data, provide a \
concise and encouraging message to help them stay motivated and engaged with their fitness plan. \
Tailor the message to their specific situation, highlighting their successes and addressing areas \
where they can improve. Reply with a JSON object of the form {\"insight\": \"...\"}.";

/// Writes a motivational message for one client given their risk label.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate(
        &self,
        metrics: &ClientMetrics,
        risk_status: RiskStatus,
    ) -> Result<String, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct InsightReply {
    insight: String,
}

pub struct LlmInsightGenerator {
    chat: ChatClient,
}

impl LlmInsightGenerator {
    pub fn new(chat: ChatClient) -> Self {
        Self { chat }
    }
}

pub fn insight_prompt(metrics: &ClientMetrics, risk_status: RiskStatus) -> String {
    format!(
        "Client ID: {}\nWorkouts Completed: {}\nExercise Compliance: {}%\nNutrition Compliance: {}%\nRisk Status: {}\n\nInsight:",
        metrics.client_id,
        metrics.workouts_completed,
        metrics.exercise_compliance,
        metrics.nutrition_compliance,
        risk_status
    )
}

#[async_trait]
impl InsightGenerator for LlmInsightGenerator {
    async fn generate(
        &self,
        metrics: &ClientMetrics,
        risk_status: RiskStatus,
    ) -> Result<String, ServiceError> {
        let reply: InsightReply = self
            .chat
            .complete_json(INSIGHT_SYSTEM_PROMPT, &insight_prompt(metrics, risk_status))
            .await?;
        let message = reply.insight.trim();
        if message.is_empty() {
            return Err(ServiceError::Malformed("blank insight".to_string()));
        }
        Ok(message.to_string())
    }
}

/// Offline generator with fixed wording per risk label.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateInsightGenerator;

#[async_trait]
impl InsightGenerator for TemplateInsightGenerator {
    async fn generate(
        &self,
        metrics: &ClientMetrics,
        risk_status: RiskStatus,
    ) -> Result<String, ServiceError> {
        let weakest = if metrics.exercise_compliance <= metrics.nutrition_compliance {
            format!("exercise compliance ({}%)", metrics.exercise_compliance)
        } else {
            format!("nutrition compliance ({}%)", metrics.nutrition_compliance)
        };

        let message = match risk_status {
            RiskStatus::Committed => format!(
                "Great consistency with {} workouts completed! Keep the momentum going and give your {} a little extra attention this week.",
                metrics.workouts_completed, weakest
            ),
            RiskStatus::Dropout => format!(
                "Every session counts, and you've already logged {} workouts. Let's pick one small goal this week to lift your {} and get back on track together.",
                metrics.workouts_completed, weakest
            ),
        };
        Ok(message)
    }
}
