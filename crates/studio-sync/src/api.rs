//! Studio REST API client.

use std::future::Future;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use studio_proto::config::ApiConfig;
use studio_proto::job::{Job, Slot};
use studio_proto::protocol::{
    ErrorBody, JobEnvelope, JobFilter, JobList, JobPatch, JobStats, LoginRequest, LoginResponse,
    NewJob, RegisterRequest, Style, StyleDraft, StyleEnvelope, StyleList, SynthesizeRequest, User,
    UserEnvelope, Voice, VoiceList, MAX_STAR_RATING, MAX_SYNTHESIS_CHARS,
};
use tracing::debug;

use crate::error::ApiError;

const USER_AGENT: &str = concat!("studio-sync/", env!("CARGO_PKG_VERSION"));

/// The slice of the API the poll loop needs.
pub trait JobApi: Send + Sync + 'static {
    fn list_jobs(
        &self,
        filter: &JobFilter,
    ) -> impl Future<Output = Result<Vec<Job>, ApiError>> + Send;

    fn job_stats(&self, all_users: bool) -> impl Future<Output = Result<JobStats, ApiError>> + Send;

    /// Persist `downloaded_url_N = true` for one slot.
    fn mark_downloaded(
        &self,
        job_id: i64,
        slot: Slot,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// Retrieves generated audio from its (external, time-limited) URL.
pub trait ArtifactFetcher: Send + Sync + 'static {
    fn fetch_artifact(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ApiError>> + Send;
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    endpoint: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn authed(&self, req: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::NotLoggedIn)?;
        Ok(req.bearer_auth(token))
    }

    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(ErrorBody::into_message);
        Err(ApiError::from_status(status, message))
    }

    async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ApiError> {
        let response = Self::check(req.send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send_empty(req: RequestBuilder) -> Result<(), ApiError> {
        Self::check(req.send().await?).await?;
        Ok(())
    }

    // ── Auth ──────────────────────────────────────────────────────────────────

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        if username.is_empty() || password.is_empty() {
            return Err(ApiError::Validation(
                "Username and password are required".to_string(),
            ));
        }
        let req = self
            .http
            .post(self.url("/auth/login"))
            .json(&LoginRequest { username, password });
        Self::send_json(req).await
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<User, ApiError> {
        let req = self.http.post(self.url("/auth/register")).json(&RegisterRequest {
            username,
            email,
            password,
        });
        let envelope: UserEnvelope = Self::send_json(req).await?;
        Ok(envelope.user)
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        let req = self.authed(self.http.get(self.url("/auth/me")))?;
        let envelope: UserEnvelope = Self::send_json(req).await?;
        Ok(envelope.user)
    }

    // ── Jobs ──────────────────────────────────────────────────────────────────

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, ApiError> {
        let req = self
            .authed(self.http.get(self.url("/songs/")))?
            .query(&filter.query_pairs());
        let list: JobList = Self::send_json(req).await?;
        debug!("Fetched {} jobs (total={})", list.jobs.len(), list.total);
        Ok(list.jobs)
    }

    pub async fn get_job(&self, id: i64) -> Result<Job, ApiError> {
        let req = self.authed(self.http.get(self.url(&format!("/songs/{}", id))))?;
        let envelope: JobEnvelope = Self::send_json(req).await?;
        Ok(envelope.job)
    }

    pub async fn create_job(&self, job: &NewJob) -> Result<JobEnvelope, ApiError> {
        let req = self.authed(self.http.post(self.url("/songs/")))?.json(job);
        Self::send_json(req).await
    }

    pub async fn update_job(&self, id: i64, patch: &JobPatch) -> Result<Job, ApiError> {
        if patch.is_empty() {
            return Err(ApiError::Validation("Nothing to update".to_string()));
        }
        let req = self
            .authed(self.http.put(self.url(&format!("/songs/{}", id))))?
            .json(patch);
        let envelope: JobEnvelope = Self::send_json(req).await?;
        Ok(envelope.job)
    }

    pub async fn set_rating(&self, id: i64, stars: u8) -> Result<Job, ApiError> {
        if stars > MAX_STAR_RATING {
            return Err(ApiError::Validation(format!(
                "Star rating must be between 0 and {}",
                MAX_STAR_RATING
            )));
        }
        self.update_job(id, &JobPatch::rating(stars)).await
    }

    pub async fn mark_downloaded(&self, id: i64, slot: Slot) -> Result<(), ApiError> {
        self.update_job(id, &JobPatch::downloaded(slot)).await?;
        Ok(())
    }

    /// Clear the artifacts and submit the job for generation again.
    pub async fn recreate_job(&self, id: i64) -> Result<Job, ApiError> {
        let req = self.authed(self.http.post(self.url(&format!("/songs/{}/recreate", id))))?;
        let envelope: JobEnvelope = Self::send_json(req).await?;
        Ok(envelope.job)
    }

    pub async fn delete_job(&self, id: i64) -> Result<(), ApiError> {
        let req = self.authed(self.http.delete(self.url(&format!("/songs/{}", id))))?;
        Self::send_empty(req).await
    }

    pub async fn job_stats(&self, all_users: bool) -> Result<JobStats, ApiError> {
        let mut req = self.authed(self.http.get(self.url("/songs/stats")))?;
        if all_users {
            req = req.query(&[("all_users", "true")]);
        }
        Self::send_json(req).await
    }

    // ── Styles ────────────────────────────────────────────────────────────────

    pub async fn list_styles(&self) -> Result<Vec<Style>, ApiError> {
        let req = self.authed(self.http.get(self.url("/styles/")))?;
        let list: StyleList = Self::send_json(req).await?;
        Ok(list.styles)
    }

    pub async fn create_style(&self, name: &str, style_prompt: &str) -> Result<Style, ApiError> {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("Style name is required".to_string()));
        }
        let draft = StyleDraft {
            name: Some(name.trim().to_string()),
            style_prompt: Some(style_prompt.to_string()),
        };
        let req = self.authed(self.http.post(self.url("/styles/")))?.json(&draft);
        let envelope: StyleEnvelope = Self::send_json(req).await?;
        Ok(envelope.style)
    }

    pub async fn update_style(&self, id: i64, draft: &StyleDraft) -> Result<Style, ApiError> {
        let req = self
            .authed(self.http.put(self.url(&format!("/styles/{}", id))))?
            .json(draft);
        let envelope: StyleEnvelope = Self::send_json(req).await?;
        Ok(envelope.style)
    }

    pub async fn delete_style(&self, id: i64) -> Result<(), ApiError> {
        let req = self.authed(self.http.delete(self.url(&format!("/styles/{}", id))))?;
        Self::send_empty(req).await
    }

    // ── Speech ────────────────────────────────────────────────────────────────

    pub async fn list_voices(&self) -> Result<Vec<Voice>, ApiError> {
        let req = self.authed(self.http.get(self.url("/speech/voices")))?;
        let list: VoiceList = Self::send_json(req).await?;
        Ok(list.voices)
    }

    /// Preview a voice: returns `audio/mpeg` bytes.
    pub async fn synthesize(&self, text: &str, voice_name: &str) -> Result<Vec<u8>, ApiError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApiError::Validation("Text is required".to_string()));
        }
        if text.chars().count() > MAX_SYNTHESIS_CHARS {
            return Err(ApiError::Validation(format!(
                "Text exceeds maximum length of {} characters",
                MAX_SYNTHESIS_CHARS
            )));
        }
        let req = self
            .authed(self.http.post(self.url("/speech/synthesize")))?
            .json(&SynthesizeRequest { text, voice_name });
        let response = Self::check(req.send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ── Artifacts ─────────────────────────────────────────────────────────────

    /// Artifact URLs point at the generation service's storage, not at the
    /// studio API, so no bearer token is attached.
    pub async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = Self::check(self.http.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl JobApi for ApiClient {
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, ApiError> {
        ApiClient::list_jobs(self, filter).await
    }

    async fn job_stats(&self, all_users: bool) -> Result<JobStats, ApiError> {
        ApiClient::job_stats(self, all_users).await
    }

    async fn mark_downloaded(&self, job_id: i64, slot: Slot) -> Result<(), ApiError> {
        ApiClient::mark_downloaded(self, job_id, slot).await
    }
}

impl ArtifactFetcher for ApiClient {
    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        ApiClient::fetch_artifact(self, url).await
    }
}
