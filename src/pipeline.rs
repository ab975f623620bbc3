//! Two-stage insight pipeline: classify every client's dropout risk, then
//! generate a motivational message for each client that got a label.
//!
//! Both stages fan out one external call per client and wait for every call
//! to settle before folding the successes. A failing or slow client never
//! cancels the others; it is logged and left out of the batch.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{future, stream, StreamExt};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::RiskClassifier;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, ServiceError, StageFailure};
use crate::generator::InsightGenerator;
use crate::models::{BatchResult, ClientSnapshot, Insight, RiskPrediction};

pub struct InsightPipeline {
    classifier: Arc<dyn RiskClassifier>,
    generator: Arc<dyn InsightGenerator>,
    config: PipelineConfig,
}

impl InsightPipeline {
    pub fn new(
        classifier: Arc<dyn RiskClassifier>,
        generator: Arc<dyn InsightGenerator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            classifier,
            generator,
            config,
        }
    }

    /// Runs both stages over one batch. Per-client failures only shrink the
    /// result; the error case is reserved for batches that cannot be
    /// processed at all.
    pub async fn run(&self, snapshots: &[ClientSnapshot]) -> Result<BatchResult, PipelineError> {
        validate_batch(snapshots)?;

        let span = info_span!("pipeline_run", run_id = %Uuid::new_v4(), clients = snapshots.len());
        async {
            if snapshots.is_empty() {
                info!("empty batch, nothing to do");
                return Ok(BatchResult::default());
            }

            let predictions = self.predict_risks(snapshots).await;
            if predictions.is_empty() {
                info!("no client received a risk label, skipping insight stage");
                return Ok(BatchResult::default());
            }

            let insights = self.generate_insights(&predictions, snapshots).await;
            info!(
                insights = insights.len(),
                dropped = snapshots.len() - insights.len(),
                "pipeline run complete"
            );
            Ok(BatchResult { insights })
        }
        .instrument(span)
        .await
    }

    pub async fn predict_risks(&self, snapshots: &[ClientSnapshot]) -> Vec<RiskPrediction> {
        if snapshots.is_empty() {
            return Vec::new();
        }

        let calls: Vec<_> = snapshots
            .iter()
            .map(|snapshot| {
                let metrics = snapshot.metrics();
                async move {
                    let outcome = self.call(self.classifier.classify(&metrics)).await;
                    (metrics.client_id, outcome)
                }
            })
            .collect();
        let dispatched = calls.len();
        let outcomes = self.settle_all(calls).await;

        let mut predictions = Vec::with_capacity(dispatched);
        for (client_id, outcome) in outcomes {
            match outcome {
                Ok(risk_status) => predictions.push(RiskPrediction {
                    client_id,
                    risk_status,
                }),
                Err(source) => log_failure(&StageFailure::Classification { client_id, source }),
            }
        }

        info!(
            stage = "risk",
            dispatched,
            succeeded = predictions.len(),
            failed = dispatched - predictions.len(),
            "risk stage settled"
        );
        predictions
    }

    pub async fn generate_insights(
        &self,
        predictions: &[RiskPrediction],
        snapshots: &[ClientSnapshot],
    ) -> Vec<Insight> {
        let by_id: HashMap<&str, &ClientSnapshot> = snapshots
            .iter()
            .map(|s| (s.client_id.as_str(), s))
            .collect();

        let calls: Vec<_> = predictions
            .iter()
            .filter_map(|prediction| {
                let Some(snapshot) = by_id.get(prediction.client_id.as_str()) else {
                    log_failure(&StageFailure::CorrelationInconsistency {
                        client_id: prediction.client_id.clone(),
                    });
                    return None;
                };
                let metrics = snapshot.metrics();
                let risk_status = prediction.risk_status;
                Some(async move {
                    let outcome = self
                        .call(self.generator.generate(&metrics, risk_status))
                        .await;
                    (metrics.client_id, risk_status, outcome)
                })
            })
            .collect();
        let dispatched = calls.len();
        let outcomes = self.settle_all(calls).await;

        let mut insights = Vec::with_capacity(dispatched);
        for (client_id, risk_status, outcome) in outcomes {
            match outcome {
                Ok(message) => insights.push(Insight {
                    client_id,
                    risk_status,
                    message,
                }),
                Err(source) => log_failure(&StageFailure::Insight { client_id, source }),
            }
        }

        info!(
            stage = "insight",
            dispatched,
            succeeded = insights.len(),
            failed = dispatched - insights.len(),
            "insight stage settled"
        );
        insights
    }

    /// Drives every call to completion, at most `max_concurrency` at a time.
    async fn settle_all<F>(&self, calls: Vec<F>) -> Vec<F::Output>
    where
        F: Future,
    {
        match self.config.max_concurrency {
            Some(limit) => {
                stream::iter(calls)
                    .buffer_unordered(limit.max(1))
                    .collect()
                    .await
            }
            None => future::join_all(calls).await,
        }
    }

    async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        match self.config.call_timeout {
            Some(limit) => with_deadline(limit, request).await,
            None => request.await,
        }
    }
}

async fn with_deadline<T>(
    limit: Duration,
    request: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    tokio::time::timeout(limit, request)
        .await
        .unwrap_or(Err(ServiceError::Timeout(limit)))
}

fn validate_batch(snapshots: &[ClientSnapshot]) -> Result<(), PipelineError> {
    let mut seen = HashSet::with_capacity(snapshots.len());
    for snapshot in snapshots {
        if snapshot.client_id.trim().is_empty() {
            return Err(PipelineError::EmptyClientId);
        }
        if !seen.insert(snapshot.client_id.as_str()) {
            return Err(PipelineError::DuplicateClientId(snapshot.client_id.clone()));
        }
    }
    Ok(())
}

fn log_failure(failure: &StageFailure) {
    match failure {
        StageFailure::CorrelationInconsistency { .. } => error!(
            client_id = failure.client_id(),
            stage = failure.stage(),
            "data integrity: {failure}"
        ),
        _ => warn!(
            client_id = failure.client_id(),
            stage = failure.stage(),
            error = %failure,
            "client dropped from batch"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientMetrics, ExerciseCompliance, NutritionCompliance, RiskStatus};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn snapshot(id: &str) -> ClientSnapshot {
        ClientSnapshot {
            client_id: id.to_string(),
            age: 34,
            added_on: NaiveDate::from_ymd_opt(2023, 9, 15).unwrap(),
            last_signed_in: NaiveDate::from_ymd_opt(2024, 7, 18).unwrap(),
            workouts_completed: 25,
            total_cardio_activities: 15,
            nutrition_compliance: NutritionCompliance {
                percentage: 60.0,
                details: "1800 Cal".to_string(),
            },
            exercise_compliance: ExerciseCompliance {
                two_weeks_ago: 75.0,
                one_week_ago: 50.0,
                this_week: 50.0,
            },
        }
    }

    fn batch(ids: &[&str]) -> Vec<ClientSnapshot> {
        ids.iter().map(|id| snapshot(id)).collect()
    }

    fn insight_for<'a>(result: &'a BatchResult, client_id: &str) -> &'a Insight {
        result
            .insights
            .iter()
            .find(|i| i.client_id == client_id)
            .expect("missing insight")
    }

    fn provider_error() -> ServiceError {
        ServiceError::Provider {
            status: 500,
            body: "upstream exploded".to_string(),
        }
    }

    #[derive(Default)]
    struct ScriptedClassifier {
        outcomes: HashMap<String, Result<RiskStatus, ServiceError>>,
        delays: HashMap<String, Duration>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl ScriptedClassifier {
        fn new(outcomes: &[(&str, Result<RiskStatus, ServiceError>)]) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(id, outcome)| (id.to_string(), outcome.clone()))
                    .collect(),
                ..Self::default()
            }
        }

        fn with_delay(mut self, client_id: &str, delay: Duration) -> Self {
            self.delays.insert(client_id.to_string(), delay);
            self
        }
    }

    #[async_trait]
    impl RiskClassifier for ScriptedClassifier {
        async fn classify(&self, metrics: &ClientMetrics) -> Result<RiskStatus, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(&metrics.client_id) {
                tokio::time::sleep(*delay).await;
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.outcomes
                .get(&metrics.client_id)
                .cloned()
                .unwrap_or(Err(ServiceError::Malformed("unscripted client".to_string())))
        }
    }

    #[derive(Default)]
    struct ScriptedGenerator {
        failing: HashSet<String>,
        seen: Mutex<Vec<(String, RiskStatus)>>,
    }

    impl ScriptedGenerator {
        fn failing_for(ids: &[&str]) -> Self {
            Self {
                failing: ids.iter().map(|id| id.to_string()).collect(),
                ..Self::default()
            }
        }

        fn seen(&self) -> Vec<(String, RiskStatus)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InsightGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            metrics: &ClientMetrics,
            risk_status: RiskStatus,
        ) -> Result<String, ServiceError> {
            self.seen
                .lock()
                .unwrap()
                .push((metrics.client_id.clone(), risk_status));
            if self.failing.contains(&metrics.client_id) {
                return Err(provider_error());
            }
            Ok(format!("{} is {}", metrics.client_id, risk_status))
        }
    }

    fn pipeline(
        classifier: Arc<ScriptedClassifier>,
        generator: Arc<ScriptedGenerator>,
        config: PipelineConfig,
    ) -> InsightPipeline {
        InsightPipeline::new(classifier, generator, config)
    }

    #[tokio::test]
    async fn labels_and_messages_follow_each_client() {
        let classifier = Arc::new(ScriptedClassifier::new(&[
            ("C001", Ok(RiskStatus::Committed)),
            ("C002", Ok(RiskStatus::Dropout)),
            ("C003", Ok(RiskStatus::Committed)),
        ]));
        let generator = Arc::new(ScriptedGenerator::default());
        let input = batch(&["C001", "C002", "C003"]);

        let result = pipeline(classifier, generator, PipelineConfig::default())
            .run(&input)
            .await
            .unwrap();

        assert_eq!(result.len(), 3);
        for (id, status) in [
            ("C001", RiskStatus::Committed),
            ("C002", RiskStatus::Dropout),
            ("C003", RiskStatus::Committed),
        ] {
            let insight = insight_for(&result, id);
            assert_eq!(insight.risk_status, status);
            assert!(!insight.message.is_empty());
        }
    }

    #[tokio::test]
    async fn classifier_failure_drops_only_that_client() {
        let classifier = Arc::new(ScriptedClassifier::new(&[
            ("C001", Err(provider_error())),
            ("C002", Ok(RiskStatus::Dropout)),
        ]));
        let generator = Arc::new(ScriptedGenerator::default());
        let input = batch(&["C001", "C002"]);

        let result = pipeline(classifier, generator.clone(), PipelineConfig::default())
            .run(&input)
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.insights[0].client_id, "C002");
        assert_eq!(result.insights[0].risk_status, RiskStatus::Dropout);
        assert_eq!(result.dropped_client_ids(&input), vec!["C001"]);
        assert_eq!(
            generator.seen(),
            vec![("C002".to_string(), RiskStatus::Dropout)]
        );
    }

    #[tokio::test]
    async fn generator_failures_yield_empty_result_without_error() {
        let classifier = Arc::new(ScriptedClassifier::new(&[
            ("C001", Ok(RiskStatus::Committed)),
            ("C002", Ok(RiskStatus::Dropout)),
        ]));
        let generator = Arc::new(ScriptedGenerator::failing_for(&["C001", "C002"]));

        let result = pipeline(classifier, generator.clone(), PipelineConfig::default())
            .run(&batch(&["C001", "C002"]))
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(generator.seen().len(), 2);
    }

    #[tokio::test]
    async fn all_classifications_failing_skips_insight_stage() {
        let classifier = Arc::new(ScriptedClassifier::new(&[
            ("C001", Err(provider_error())),
            ("C002", Err(ServiceError::Malformed("??".to_string()))),
        ]));
        let generator = Arc::new(ScriptedGenerator::default());

        let result = pipeline(classifier.clone(), generator.clone(), PipelineConfig::default())
            .run(&batch(&["C001", "C002"]))
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert!(generator.seen().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_calls_nothing() {
        let classifier = Arc::new(ScriptedClassifier::default());
        let generator = Arc::new(ScriptedGenerator::default());

        let result = pipeline(classifier.clone(), generator.clone(), PipelineConfig::default())
            .run(&[])
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert!(generator.seen().is_empty());
    }

    #[tokio::test]
    async fn results_are_a_subset_of_input_with_matching_labels() {
        let classifier = Arc::new(ScriptedClassifier::new(&[
            ("C001", Ok(RiskStatus::Committed)),
            ("C002", Err(provider_error())),
            ("C003", Ok(RiskStatus::Dropout)),
            ("C004", Ok(RiskStatus::Committed)),
        ]));
        let generator = Arc::new(ScriptedGenerator::failing_for(&["C004"]));
        let input = batch(&["C001", "C002", "C003", "C004"]);
        let pipeline = pipeline(classifier, generator, PipelineConfig::default());

        let predictions = pipeline.predict_risks(&input).await;
        let result = pipeline.run(&input).await.unwrap();

        let input_ids: HashSet<&str> = input.iter().map(|s| s.client_id.as_str()).collect();
        assert!(result.client_ids().is_subset(&input_ids));
        for insight in &result.insights {
            let prediction = predictions
                .iter()
                .find(|p| p.client_id == insight.client_id)
                .expect("insight without a risk prediction");
            assert_eq!(prediction.risk_status, insight.risk_status);
        }
        assert_eq!(result.dropped_client_ids(&input), vec!["C002", "C004"]);
        assert_eq!(predictions.len(), 3);
    }

    #[tokio::test]
    async fn slow_client_does_not_reorder_correlation() {
        let classifier = Arc::new(
            ScriptedClassifier::new(&[
                ("C001", Ok(RiskStatus::Dropout)),
                ("C002", Ok(RiskStatus::Committed)),
            ])
            .with_delay("C001", Duration::from_millis(60)),
        );
        let generator = Arc::new(ScriptedGenerator::default());

        let result = pipeline(classifier, generator, PipelineConfig::default())
            .run(&batch(&["C001", "C002"]))
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(insight_for(&result, "C001").risk_status, RiskStatus::Dropout);
        assert_eq!(insight_for(&result, "C001").message, "C001 is dropout");
        assert_eq!(insight_for(&result, "C002").message, "C002 is committed");
    }

    #[tokio::test]
    async fn call_timeout_is_a_per_client_failure() {
        let classifier = Arc::new(
            ScriptedClassifier::new(&[
                ("C001", Ok(RiskStatus::Committed)),
                ("C002", Ok(RiskStatus::Committed)),
            ])
            .with_delay("C001", Duration::from_millis(500)),
        );
        let generator = Arc::new(ScriptedGenerator::default());
        let config =
            PipelineConfig::default().with_call_timeout(Some(Duration::from_millis(50)));

        let result = pipeline(classifier, generator, config)
            .run(&batch(&["C001", "C002"]))
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result.insights[0].client_id, "C002");
    }

    #[tokio::test]
    async fn concurrency_cap_bounds_in_flight_calls() {
        let ids = ["C001", "C002", "C003", "C004", "C005", "C006"];
        let outcomes: Vec<(&str, Result<RiskStatus, ServiceError>)> = ids
            .iter()
            .map(|id| (*id, Ok(RiskStatus::Committed)))
            .collect();

        let capped = Arc::new(ScriptedClassifier::new(&outcomes));
        let config = PipelineConfig::default().with_max_concurrency(Some(2));
        let predictions = pipeline(capped.clone(), Arc::new(ScriptedGenerator::default()), config)
            .predict_risks(&batch(&ids))
            .await;
        assert_eq!(predictions.len(), 6);
        assert!(capped.peak_in_flight.load(Ordering::SeqCst) <= 2);

        let unbounded = Arc::new(ScriptedClassifier::new(&outcomes));
        pipeline(
            unbounded.clone(),
            Arc::new(ScriptedGenerator::default()),
            PipelineConfig::default(),
        )
        .predict_risks(&batch(&ids))
        .await;
        assert_eq!(unbounded.peak_in_flight.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn prediction_without_snapshot_is_skipped() {
        let generator = Arc::new(ScriptedGenerator::default());
        let pipeline = pipeline(
            Arc::new(ScriptedClassifier::default()),
            generator.clone(),
            PipelineConfig::default(),
        );
        let predictions = vec![
            RiskPrediction {
                client_id: "C001".to_string(),
                risk_status: RiskStatus::Committed,
            },
            RiskPrediction {
                client_id: "GHOST".to_string(),
                risk_status: RiskStatus::Dropout,
            },
        ];

        let insights = pipeline
            .generate_insights(&predictions, &batch(&["C001"]))
            .await;

        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].client_id, "C001");
        assert_eq!(generator.seen().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_ids_reject_the_batch_before_any_call() {
        let classifier = Arc::new(ScriptedClassifier::new(&[("C001", Ok(RiskStatus::Committed))]));
        let result = pipeline(
            classifier.clone(),
            Arc::new(ScriptedGenerator::default()),
            PipelineConfig::default(),
        )
        .run(&batch(&["C001", "C002", "C001"]))
        .await;

        assert_eq!(
            result,
            Err(PipelineError::DuplicateClientId("C001".to_string()))
        );
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_client_id_rejects_the_batch_before_any_call() {
        let classifier = Arc::new(ScriptedClassifier::new(&[("C001", Ok(RiskStatus::Committed))]));
        let result = pipeline(
            classifier.clone(),
            Arc::new(ScriptedGenerator::default()),
            PipelineConfig::default(),
        )
        .run(&batch(&["C001", "  "]))
        .await;

        assert_eq!(result, Err(PipelineError::EmptyClientId));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_runs_produce_the_same_clients() {
        let classifier = Arc::new(ScriptedClassifier::new(&[
            ("C001", Ok(RiskStatus::Committed)),
            ("C002", Err(provider_error())),
        ]));
        let pipeline = pipeline(
            classifier,
            Arc::new(ScriptedGenerator::default()),
            PipelineConfig::default(),
        );
        let input = batch(&["C001", "C002"]);

        let first = pipeline.run(&input).await.unwrap();
        let second = pipeline.run(&input).await.unwrap();
        assert_eq!(first.client_ids(), second.client_ids());
    }
}
