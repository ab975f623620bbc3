use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use crate::models::{ClientSnapshot, ExerciseCompliance, NutritionCompliance};

const DEFAULT_TRAINERIZE_URL: &str = "https://api.trainerize.com";
const DEMO_EMAIL: &str = "you@example.com";
const DEMO_PASSWORD: &str = "password123";
const DEMO_API_KEY: &str = "tr-api-12345";

#[derive(Clone)]
pub enum Credentials {
    Account {
        domain: String,
        email: String,
        password: String,
    },
    ApiKey(String),
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        match self {
            Credentials::Account {
                domain,
                email,
                password,
            } => ![domain, email, password].iter().any(|v| v.trim().is_empty()),
            Credentials::ApiKey(key) => !key.trim().is_empty(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Account { domain, email, .. } => f
                .debug_struct("Account")
                .field("domain", domain)
                .field("email", email)
                .field("password", &"***")
                .finish(),
            Credentials::ApiKey(_) => f.debug_tuple("ApiKey").field(&"***").finish(),
        }
    }
}

/// Where client snapshots come from. A rejected credential bundle is not an
/// error: it yields an empty roster.
#[async_trait]
pub trait ClientDataSource: Send + Sync {
    async fn fetch(&self, credentials: &Credentials) -> anyhow::Result<Vec<ClientSnapshot>>;
}

pub struct TrainerizeSource {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

impl TrainerizeSource {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Trainerize http client")?;
        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or(DEFAULT_TRAINERIZE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn login(
        &self,
        domain: &str,
        email: &str,
        password: &str,
    ) -> anyhow::Result<Option<String>> {
        let url = format!("{}/api/v1/auth/login", domain.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;

        if is_auth_failure(response.status()) {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("login to {url} returned {}", response.status());
        }

        let body: LoginResponse = response
            .json()
            .await
            .context("login response was not valid JSON")?;
        Ok(Some(body.token))
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[async_trait]
impl ClientDataSource for TrainerizeSource {
    async fn fetch(&self, credentials: &Credentials) -> anyhow::Result<Vec<ClientSnapshot>> {
        let (base, token) = match credentials {
            Credentials::Account {
                domain,
                email,
                password,
            } => match self.login(domain, email, password).await? {
                Some(token) => (domain.trim_end_matches('/').to_string(), token),
                None => {
                    warn!(%email, "Trainerize rejected account credentials");
                    return Ok(Vec::new());
                }
            },
            Credentials::ApiKey(key) => (self.base_url.clone(), key.clone()),
        };

        let url = format!("{base}/api/v1/clients");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;

        if is_auth_failure(response.status()) {
            warn!(status = %response.status(), "Trainerize rejected credentials");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            bail!("client list from {url} returned {}", response.status());
        }

        let clients: Vec<ClientSnapshot> = response
            .json()
            .await
            .context("client list was not in the expected format")?;
        info!(clients = clients.len(), "fetched clients from Trainerize");
        Ok(clients)
    }
}

/// Built-in roster for trying the pipeline without a Trainerize account.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoSource;

impl DemoSource {
    fn accepts(credentials: &Credentials) -> bool {
        match credentials {
            Credentials::Account {
                domain,
                email,
                password,
            } => !domain.trim().is_empty() && email == DEMO_EMAIL && password == DEMO_PASSWORD,
            Credentials::ApiKey(key) => key == DEMO_API_KEY,
        }
    }
}

#[async_trait]
impl ClientDataSource for DemoSource {
    async fn fetch(&self, credentials: &Credentials) -> anyhow::Result<Vec<ClientSnapshot>> {
        if !Self::accepts(credentials) {
            warn!("demo authentication failed");
            return Ok(Vec::new());
        }
        demo_roster()
    }
}

pub fn demo_roster() -> anyhow::Result<Vec<ClientSnapshot>> {
    let rows = [
        (
            "C001",
            28,
            (2023, 1, 10),
            (2024, 7, 20),
            52,
            30,
            85.0,
            "2200 Cal, P 35%, C 40%, F 25%",
            [100.0, 100.0, 75.0],
        ),
        (
            "C002",
            45,
            (2022, 11, 20),
            (2024, 7, 21),
            150,
            120,
            95.0,
            "2000 Cal, P 30%, C 40%, F 30%",
            [100.0, 100.0, 100.0],
        ),
        (
            "C003",
            22,
            (2024, 5, 1),
            (2024, 6, 10),
            0,
            1,
            14.0,
            "1500 Cal, P 20%, C 50%, F 30%",
            [25.0, 0.0, 0.0],
        ),
        (
            "C004",
            34,
            (2023, 9, 15),
            (2024, 7, 18),
            25,
            15,
            60.0,
            "1800 Cal, P 30%, C 45%, F 25%",
            [75.0, 50.0, 50.0],
        ),
    ];

    let date = |(y, m, d): (i32, u32, u32)| {
        NaiveDate::from_ymd_opt(y, m, d).context("invalid date")
    };

    let mut clients = Vec::with_capacity(rows.len());
    for (id, age, added_on, last_signed_in, workouts, cardio, nutrition, details, exercise) in rows
    {
        clients.push(ClientSnapshot {
            client_id: id.to_string(),
            age,
            added_on: date(added_on)?,
            last_signed_in: date(last_signed_in)?,
            workouts_completed: workouts,
            total_cardio_activities: cardio,
            nutrition_compliance: NutritionCompliance {
                percentage: nutrition,
                details: details.to_string(),
            },
            exercise_compliance: ExerciseCompliance {
                two_weeks_ago: exercise[0],
                one_week_ago: exercise[1],
                this_week: exercise[2],
            },
        });
    }
    Ok(clients)
}

/// Flat CSV export, one client per row. Files carry no authentication, so
/// the credential bundle is not consulted.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    client_id: String,
    age: u32,
    added_on: NaiveDate,
    last_signed_in: NaiveDate,
    workouts_completed: u32,
    total_cardio_activities: u32,
    nutrition_percentage: f64,
    #[serde(default)]
    nutrition_details: String,
    exercise_two_weeks_ago: f64,
    exercise_one_week_ago: f64,
    exercise_this_week: f64,
}

impl From<CsvRow> for ClientSnapshot {
    fn from(row: CsvRow) -> Self {
        ClientSnapshot {
            client_id: row.client_id,
            age: row.age,
            added_on: row.added_on,
            last_signed_in: row.last_signed_in,
            workouts_completed: row.workouts_completed,
            total_cardio_activities: row.total_cardio_activities,
            nutrition_compliance: NutritionCompliance {
                percentage: row.nutrition_percentage,
                details: row.nutrition_details,
            },
            exercise_compliance: ExerciseCompliance {
                two_weeks_ago: row.exercise_two_weeks_ago,
                one_week_ago: row.exercise_one_week_ago,
                this_week: row.exercise_this_week,
            },
        }
    }
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub fn read_csv<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<ClientSnapshot>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut clients = Vec::new();
    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid client row {}", line + 1))?;
        clients.push(row.into());
    }
    Ok(clients)
}

#[async_trait]
impl ClientDataSource for CsvSource {
    async fn fetch(&self, _credentials: &Credentials) -> anyhow::Result<Vec<ClientSnapshot>> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let clients = read_csv(file)?;
        info!(clients = clients.len(), path = %self.path.display(), "loaded clients from csv");
        Ok(clients)
    }
}
