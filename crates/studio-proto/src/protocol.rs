//! Request and response bodies of the studio REST API.
//!
//! JSON in, JSON out. Error responses carry `{"error": "..."}`.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus, Slot, VocalGender};

/// Longest text the speech preview endpoint accepts.
pub const MAX_SYNTHESIS_CHARS: usize = 10_000;

pub const MAX_STAR_RATING: u8 = 5;

// ── Jobs ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct JobList {
    #[serde(rename = "songs")]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub total: usize,
}

/// `{message, song}` returned by create / update / recreate.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEnvelope {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "song")]
    pub job: Job,
}

/// Aggregate counts by status. `completed` only counts jobs that already
/// have audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub create: u64,
    #[serde(default)]
    pub submitted: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub unspecified: u64,
}

/// Payload for creating a job. A `status` of `None` lets the service submit
/// it for generation right away.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_lyrics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_to_generate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocal_gender: Option<VocalGender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

impl NewJob {
    pub fn song(title: impl Into<String>) -> Self {
        Self {
            specific_title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn voice_clip(
        title: impl Into<String>,
        voice_name: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            specific_title: Some(title.into()),
            voice_name: Some(voice_name.into()),
            specific_lyrics: Some(script.into()),
            ..Self::default()
        }
    }
}

/// Partial update: only the fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_lyrics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_to_generate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocal_gender: Option<VocalGender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub star_rating: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_url_1: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_url_2: Option<bool>,
}

impl JobPatch {
    pub fn rating(stars: u8) -> Self {
        Self {
            star_rating: Some(stars),
            ..Self::default()
        }
    }

    /// Write-back after a slot's artifact was saved.
    pub fn downloaded(slot: Slot) -> Self {
        match slot {
            Slot::One => Self {
                downloaded_url_1: Some(true),
                ..Self::default()
            },
            Slot::Two => Self {
                downloaded_url_2: Some(true),
                ..Self::default()
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Listing filters. Everything except `min_stars` is applied by the
/// service; `min_stars` is a view filter applied locally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    /// `None` means all statuses.
    pub status: Option<JobStatus>,
    pub style_id: Option<i64>,
    pub vocal_gender: Option<VocalGender>,
    pub voice_name: Option<String>,
    pub search: Option<String>,
    pub all_users: bool,
    pub min_stars: u8,
}

impl JobFilter {
    /// Query-string pairs for `GET /songs/`.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(style_id) = self.style_id {
            pairs.push(("style_id", style_id.to_string()));
        }
        if let Some(gender) = self.vocal_gender {
            pairs.push(("vocal_gender", gender.as_str().to_string()));
        }
        if let Some(voice) = self.voice_name.as_deref().filter(|v| !v.is_empty()) {
            pairs.push(("voice_name", voice.to_string()));
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("search", search.to_string()));
        }
        if self.all_users {
            pairs.push(("all_users", "true".to_string()));
        }
        pairs
    }

    /// Local part of the filter (star threshold).
    pub fn matches_local(&self, job: &Job) -> bool {
        self.min_stars == 0 || job.star_rating >= self.min_stars
    }

    pub fn visible<'a>(&self, jobs: &'a [Job]) -> Vec<&'a Job> {
        jobs.iter().filter(|j| self.matches_local(j)).collect()
    }
}

// ── Styles ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub style_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StyleList {
    pub styles: Vec<Style>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StyleEnvelope {
    #[serde(default)]
    pub message: Option<String>,
    pub style: Style,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_prompt: Option<String>,
}

// ── Speech ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceList {
    pub voices: Vec<Voice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesizeRequest<'a> {
    pub text: &'a str,
    pub voice_name: &'a str,
}

// ── Auth ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserEnvelope {
    pub user: User,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.error.or(self.message).filter(|m| !m.is_empty())
    }
}
