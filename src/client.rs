//! Blocking HTTP client for the OccupEye cloud API (the GET endpoints the cache needs).
//!
//! - Blocking client using `ureq`, every call bounded by one global timeout.
//! - Records that do not match the expected shape are skipped with a warning; the rest of the
//!   listing is still returned.
//! - Transport failures, timeouts and 5xx answers are retried with jittered backoff.
//!
//! Authentication
//! - Password grant against the deployment's token endpoint, managed by [`AuthManager`].
//! - A 401 invalidates the credential and the call is retried once with a fresh one.

use chrono::NaiveDate;
use http::StatusCode;
use log::{debug, warn};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

use crate::auth::{AuthManager, Credential, TokenIssuer};
use crate::models::occupeye::*;

const MAX_IMAGE_BYTES: u64 = 32 * 1024 * 1024;
const BACKOFF_BASE_MS: u64 = 250;
const DEFAULT_IMAGE_CONTENT_TYPE: &str = "image/png";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("json error at `{path}`: {message}")]
    Json { path: String, message: String },
    #[error("auth error: {0}")]
    Auth(String),
}

impl ClientError {
    /// Worth another attempt within the same cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Timeout => true,
            ClientError::Http { status, .. } => *status >= 500,
            ClientError::Json { .. } | ClientError::Auth(_) => false,
        }
    }
}

impl From<ureq::Error> for ClientError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::Timeout(_) => ClientError::Timeout,
            other => ClientError::Transport(other.to_string()),
        }
    }
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, ClientError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| ClientError::Json {
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })
}

/// Decode each element of a JSON array on its own, dropping the ones that do not fit.
pub fn decode_records<T: DeserializeOwned>(what: &str, values: Vec<Value>) -> Vec<T> {
    let total = values.len();
    let records = values
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| match serde_path_to_error::deserialize::<_, T>(v) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("Skipping malformed {} record #{}: {} at `{}`", what, i, e.inner(), e.path());
                None
            }
        })
        .collect::<Vec<_>>();
    if records.len() < total {
        warn!("Kept {}/{} {} record(s)", records.len(), total, what);
    }
    records
}

fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::rng().random_range(0..=BACKOFF_BASE_MS);
    Duration::from_millis(exp + jitter)
}

/// Everything a refresh cycle reads from upstream.
pub trait OccupancySource {
    fn surveys(&self) -> Result<Vec<Survey>, ClientError>;
    fn maps(&self, survey_id: u64) -> Result<Vec<MapListing>, ClientError>;
    fn map_detail(&self, map_id: u64) -> Result<MapDetail, ClientError>;
    fn sensors(&self, survey_id: u64) -> Result<Vec<SurveySensor>, ClientError>;
    fn statuses(&self, survey_id: u64) -> Result<Vec<SensorStatus>, ClientError>;
    fn image(&self, image_id: u64) -> Result<Image, ClientError>;
    fn usage(&self, survey_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<UsageRow>, ClientError>;
}

/// Password grant against `{base_url}/token`.
pub struct PasswordGrant {
    agent: ureq::Agent,
    token_url: String,
    username: String,
    password: String,
}

impl TokenIssuer for PasswordGrant {
    type Error = ClientError;

    fn issue(&self) -> Result<Credential, ClientError> {
        let mut resp = self
            .agent
            .post(&self.token_url)
            .header("Accept", "application/json")
            .send_form([
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])?;
        let status = resp.status();
        let body = resp.body_mut().read_to_string()?;
        if !status.is_success() {
            return Err(ClientError::Auth(format!("http {}: {}", status.as_u16(), body)));
        }
        let TokenResponse {
            access_token,
            expires_in,
            ..
        } = parse_json(&body)?;
        if access_token.is_empty() {
            return Err(ClientError::Auth("token endpoint returned an empty token".to_string()));
        }
        Ok(Credential::from_lifetime(access_token, expires_in))
    }
}

pub struct ClientSettings {
    pub base_url: String,
    pub deployment: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub max_retries: NonZeroU32,
}

pub struct OccupEyeClient {
    agent: ureq::Agent,
    api_url: String,
    auth: AuthManager<PasswordGrant>,
    max_retries: NonZeroU32,
}

impl OccupEyeClient {
    pub fn new(settings: ClientSettings) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(settings.timeout))
            .http_status_as_error(false)
            .build()
            .into();
        let base = settings.base_url.trim_end_matches('/');
        let grant = PasswordGrant {
            agent: agent.clone(),
            token_url: format!("{}/token", base),
            username: settings.username,
            password: settings.password,
        };
        OccupEyeClient {
            agent,
            api_url: format!("{}/api/{}", base, settings.deployment),
            auth: AuthManager::new(grant),
            max_retries: settings.max_retries,
        }
    }

    pub fn auth(&self) -> &AuthManager<PasswordGrant> {
        &self.auth
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.api_url, path)
        } else {
            format!("{}/{}", self.api_url, path)
        }
    }

    /// Run `call` with retries for transient failures and one forced re-auth on 401.
    fn with_retries<T>(&self, what: &str, call: impl Fn(&str) -> Result<T, ClientError>) -> Result<T, ClientError> {
        let mut attempt: u32 = 0;
        let mut reauthed = false;
        loop {
            let header = self.auth.header()?;
            match call(&header) {
                Ok(v) => return Ok(v),
                Err(ClientError::Http { status: 401, .. }) if !reauthed => {
                    debug!("{} answered 401; refreshing credential", what);
                    self.auth.invalidate();
                    reauthed = true;
                }
                Err(e) if e.is_transient() && attempt + 1 < self.max_retries.get() => {
                    let wait = backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {}ms",
                        what,
                        attempt + 1,
                        self.max_retries.get(),
                        e,
                        wait.as_millis()
                    );
                    thread::sleep(wait);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_body(&self, path: &str, query: &[(&str, String)], header: &str) -> Result<String, ClientError> {
        let mut req = self
            .agent
            .get(&self.url(path))
            .header("Accept", "application/json")
            .header("Authorization", header);
        for (k, v) in query {
            req = req.query(*k, v);
        }
        let mut resp = req.call()?;
        let status = resp.status();
        let body = resp.body_mut().read_to_string()?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(ClientError::Http {
                status: status.as_u16(),
                message: body,
            })
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ClientError> {
        self.with_retries(path, |header| parse_json(&self.get_body(path, query, header)?))
    }

    fn get_records<T: DeserializeOwned>(&self, what: &str, path: &str, query: &[(&str, String)]) -> Result<Vec<T>, ClientError> {
        let values: Vec<Value> = self.get_json(path, query)?;
        Ok(decode_records(what, values))
    }
}

impl OccupancySource for OccupEyeClient {
    fn surveys(&self) -> Result<Vec<Survey>, ClientError> {
        self.get_records("survey", "/Surveys/", &[])
    }

    fn maps(&self, survey_id: u64) -> Result<Vec<MapListing>, ClientError> {
        self.get_records("map", "/Maps/", &[("SurveyID", survey_id.to_string())])
    }

    fn map_detail(&self, map_id: u64) -> Result<MapDetail, ClientError> {
        self.get_json(&format!("/Maps/{}", map_id), &[("origin", "tl".to_string())])
    }

    fn sensors(&self, survey_id: u64) -> Result<Vec<SurveySensor>, ClientError> {
        self.get_records("sensor", "/SurveySensors/", &[("SurveyID", survey_id.to_string())])
    }

    fn statuses(&self, survey_id: u64) -> Result<Vec<SensorStatus>, ClientError> {
        self.get_records("sensor status", "/SensorStatus/", &[("SurveyID", survey_id.to_string())])
    }

    fn image(&self, image_id: u64) -> Result<Image, ClientError> {
        let path = format!("/Images/{}", image_id);
        self.with_retries(&path, |header| {
            let mut resp = self
                .agent
                .get(&self.url(&path))
                .header("Authorization", header)
                .call()?;
            let status = resp.status();
            if status != StatusCode::OK {
                let message = resp.body_mut().read_to_string().unwrap_or_default();
                return Err(ClientError::Http {
                    status: status.as_u16(),
                    message,
                });
            }
            let content_type = resp
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_IMAGE_CONTENT_TYPE.to_string());
            let bytes = resp.body_mut().with_config().limit(MAX_IMAGE_BYTES).read_to_vec()?;
            Ok(Image { content_type, bytes })
        })
    }

    fn usage(&self, survey_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<UsageRow>, ClientError> {
        self.get_records(
            "usage row",
            "/UsageByTimeSlot/",
            &[
                ("SurveyID", survey_id.to_string()),
                ("StartDate", from.format("%Y-%m-%d").to_string()),
                ("EndDate", to.format("%Y-%m-%d").to_string()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_records_are_skipped() {
        let values: Vec<Value> = serde_json::from_str(
            r#"[
                {"SurveyID": 1, "Name": "ok", "Active": true},
                {"SurveyID": "not-a-number", "Name": "broken"},
                {"Name": "missing id"},
                {"SurveyID": 2, "Name": "also ok"}
            ]"#,
        )
        .expect("json");
        let surveys: Vec<Survey> = decode_records("survey", values);
        assert_eq!(surveys.iter().map(|s| s.survey_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn json_errors_report_the_path() {
        let err = parse_json::<TokenResponse>(r#"{"access_token": "x", "expires_in": "soon"}"#).unwrap_err();
        match err {
            ClientError::Json { path, .. } => assert_eq!(path, "expires_in"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transient_classification() {
        assert!(ClientError::Timeout.is_transient());
        assert!(ClientError::Http { status: 503, message: String::new() }.is_transient());
        assert!(!ClientError::Http { status: 404, message: String::new() }.is_transient());
        assert!(!ClientError::Auth("denied".into()).is_transient());
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        assert!(backoff(0) >= Duration::from_millis(BACKOFF_BASE_MS));
        assert!(backoff(0) <= Duration::from_millis(2 * BACKOFF_BASE_MS));
        assert!(backoff(30) <= Duration::from_millis(BACKOFF_BASE_MS * 64 + BACKOFF_BASE_MS));
    }

    #[test]
    fn api_urls() {
        let client = OccupEyeClient::new(ClientSettings {
            base_url: "https://cloud.example.com/OccupEye/".into(),
            deployment: "campus".into(),
            username: "u".into(),
            password: "p".into(),
            timeout: Duration::from_secs(5),
            max_retries: NonZeroU32::MIN,
        });
        assert_eq!(client.url("/Surveys/"), "https://cloud.example.com/OccupEye/api/campus/Surveys/");
        assert_eq!(client.url("Maps/1"), "https://cloud.example.com/OccupEye/api/campus/Maps/1");
    }
}
