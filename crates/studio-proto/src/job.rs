//! Job model: one generation request ("song" or "voice clip") as the
//! service reports it.
//!
//! The wire record is flat and loosely typed; [`Job`] decodes it through
//! [`WireJob`] into common fields, a [`JobKind`] per variant and two
//! [`Artifact`] slots.
//!
//! ## Lifecycle
//!
//!   create -> submitted -> completed | failed
//!
//! Transitions are only ever observed from the service. A `completed` job
//! may still have no artifact URLs for a while; those jobs keep polling
//! alive (see [`Job::needs_polling`]).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::protocol::{NewJob, Style};

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Create,
    Submitted,
    Completed,
    Failed,
    /// Legacy records and anything the service adds later.
    #[serde(other)]
    Unspecified,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unspecified => "unspecified",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Unspecified)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "submitted" => Ok(Self::Submitted),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "unspecified" => Ok(Self::Unspecified),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VocalGender {
    Male,
    Female,
    Other,
}

impl VocalGender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }
}

impl FromStr for VocalGender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Self::Male),
            "female" | "f" => Ok(Self::Female),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown vocal gender: {}", other)),
        }
    }
}

// ── Artifact slots ────────────────────────────────────────────────────────────

/// One of the two audio outputs a generation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    One,
    Two,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::One, Slot::Two];

    /// 1-based number used in filenames and wire field names.
    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self.number() as usize - 1
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// A generated audio file: its (time-limited) URL and whether it has been
/// saved locally at least once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    pub url: Option<String>,
    pub downloaded: bool,
}

impl Artifact {
    /// URL is present and nobody has saved it yet.
    pub fn is_deliverable(&self) -> bool {
        self.url.is_some() && !self.downloaded
    }
}

// ── Variants ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SongDetails {
    pub lyrics: Option<String>,
    pub prompt: Option<String>,
    pub style: Option<Style>,
    pub style_id: Option<i64>,
    pub vocal_gender: Option<VocalGender>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceClipDetails {
    pub voice_name: String,
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    Song(SongDetails),
    VoiceClip(VoiceClipDetails),
}

impl JobKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Song(_) => "song",
            Self::VoiceClip(_) => "voice",
        }
    }
}

// ── Job ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireJob", into = "WireJob")]
pub struct Job {
    pub id: i64,
    pub status: JobStatus,
    pub title: Option<String>,
    pub version: String,
    pub star_rating: u8,
    pub kind: JobKind,
    artifacts: [Artifact; 2],
    pub creator: Option<String>,
    pub user_id: Option<i64>,
    pub speech_task_id: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

pub const DEFAULT_VERSION: &str = "v1";

impl Job {
    /// Minimal song record, mostly useful for tests and fakes.
    pub fn new(id: i64, status: JobStatus) -> Self {
        Self {
            id,
            status,
            title: None,
            version: DEFAULT_VERSION.to_string(),
            star_rating: 0,
            kind: JobKind::Song(SongDetails::default()),
            artifacts: Default::default(),
            creator: None,
            user_id: None,
            speech_task_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artifact(mut self, slot: Slot, url: impl Into<String>, downloaded: bool) -> Self {
        self.artifacts[slot.index()] = Artifact {
            url: Some(url.into()),
            downloaded,
        };
        self
    }

    pub fn artifact(&self, slot: Slot) -> &Artifact {
        &self.artifacts[slot.index()]
    }

    pub fn artifact_mut(&mut self, slot: Slot) -> &mut Artifact {
        &mut self.artifacts[slot.index()]
    }

    /// Slots with their artifacts, in slot order.
    pub fn slots(&self) -> impl Iterator<Item = (Slot, &Artifact)> {
        Slot::ALL.into_iter().map(move |s| (s, self.artifact(s)))
    }

    fn has_any_url(&self) -> bool {
        self.artifacts.iter().any(|a| a.url.is_some())
    }

    /// Whether this job keeps the re-fetch loop alive.
    ///
    /// The service can flip a job to `completed` before it attaches the
    /// artifact URLs, so completed-without-audio counts as in flight.
    pub fn needs_polling(&self) -> bool {
        match self.status {
            JobStatus::Submitted => true,
            JobStatus::Completed => !self.has_any_url(),
            _ => false,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.status == JobStatus::Completed && self.has_any_url()
    }

    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("song")
    }

    /// `"{title}_{slot}_{version}.mp3"` with filesystem-unsafe characters
    /// replaced by `-`.
    pub fn artifact_filename(&self, slot: Slot) -> String {
        let version = if self.version.is_empty() {
            DEFAULT_VERSION
        } else {
            &self.version
        };
        format!(
            "{}_{}_{}.mp3",
            sanitize_filename(self.display_title()),
            slot.number(),
            sanitize_filename(version)
        )
    }

    /// Draft for a new job carrying this one's metadata at the next version.
    /// Status, artifacts and rating are not carried over.
    pub fn duplicate(&self) -> NewJob {
        let mut draft = NewJob {
            specific_title: self.title.clone(),
            version: Some(next_version(&self.version)),
            ..NewJob::default()
        };
        match &self.kind {
            JobKind::Song(song) => {
                draft.specific_lyrics = song.lyrics.clone();
                draft.prompt_to_generate = song.prompt.clone();
                draft.style_id = song.style_id;
                draft.vocal_gender = song.vocal_gender;
            }
            JobKind::VoiceClip(clip) => {
                draft.voice_name = Some(clip.voice_name.clone());
                draft.specific_lyrics = clip.script.clone();
            }
        }
        draft
    }
}

/// Whether any job in the list keeps the re-fetch loop alive.
pub fn needs_polling(jobs: &[Job]) -> bool {
    jobs.iter().any(Job::needs_polling)
}

/// Replace characters that are not allowed in filenames on common
/// filesystems.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' => '-',
            c => c,
        })
        .collect()
}

/// `v1 -> v2`. Anything without a leading number after the `v` counts as 1.
pub fn next_version(version: &str) -> String {
    let rest = version.replacen('v', "", 1);
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let current = digits.parse::<u32>().ok().filter(|n| *n > 0).unwrap_or(1);
    format!("v{}", current.saturating_add(1))
}

// ── Wire form ─────────────────────────────────────────────────────────────────

/// The flat record the service sends. Kept separate from [`Job`] so the
/// wire schema can change without touching the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireJob {
    pub id: i64,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_lyrics: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_to_generate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocal_gender: Option<VocalGender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Style>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
    #[serde(default)]
    pub download_url_1: Option<String>,
    #[serde(default)]
    pub downloaded_url_1: Option<bool>,
    #[serde(default)]
    pub download_url_2: Option<String>,
    #[serde(default)]
    pub downloaded_url_2: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

fn parse_timestamp(raw: Option<&str>) -> Option<NaiveDateTime> {
    let raw = raw?.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

fn format_timestamp(ts: Option<NaiveDateTime>) -> Option<String> {
    ts.map(|t| t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

impl From<WireJob> for Job {
    fn from(w: WireJob) -> Self {
        let created_at = parse_timestamp(w.created_at.as_deref());
        let updated_at = parse_timestamp(w.updated_at.as_deref());

        let kind = match non_empty(w.voice_name) {
            Some(voice_name) => JobKind::VoiceClip(VoiceClipDetails {
                voice_name,
                script: w.specific_lyrics,
            }),
            None => {
                let style_id = w.style_id.or_else(|| w.style.as_ref().map(|s| s.id));
                JobKind::Song(SongDetails {
                    lyrics: w.specific_lyrics,
                    prompt: w.prompt_to_generate,
                    style: w.style,
                    style_id,
                    vocal_gender: w.vocal_gender,
                })
            }
        };

        Self {
            id: w.id,
            status: w.status,
            title: w.specific_title,
            version: non_empty(w.version).unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            star_rating: w.star_rating.unwrap_or(0).min(5),
            kind,
            artifacts: [
                Artifact {
                    url: non_empty(w.download_url_1),
                    downloaded: w.downloaded_url_1.unwrap_or(false),
                },
                Artifact {
                    url: non_empty(w.download_url_2),
                    downloaded: w.downloaded_url_2.unwrap_or(false),
                },
            ],
            creator: w.creator,
            user_id: w.user_id,
            speech_task_id: w.speech_task_id,
            created_at,
            updated_at,
        }
    }
}

impl From<Job> for WireJob {
    fn from(job: Job) -> Self {
        let [a1, a2] = job.artifacts;
        let mut wire = WireJob {
            id: job.id,
            status: job.status,
            specific_title: job.title,
            version: Some(job.version),
            star_rating: Some(job.star_rating),
            download_url_1: a1.url,
            downloaded_url_1: Some(a1.downloaded),
            download_url_2: a2.url,
            downloaded_url_2: Some(a2.downloaded),
            speech_task_id: job.speech_task_id,
            creator: job.creator,
            user_id: job.user_id,
            created_at: format_timestamp(job.created_at),
            updated_at: format_timestamp(job.updated_at),
            ..WireJob::default()
        };
        match job.kind {
            JobKind::Song(song) => {
                wire.specific_lyrics = song.lyrics;
                wire.prompt_to_generate = song.prompt;
                wire.vocal_gender = song.vocal_gender;
                wire.style = song.style;
                wire.style_id = song.style_id;
            }
            JobKind::VoiceClip(clip) => {
                wire.voice_name = Some(clip.voice_name);
                wire.specific_lyrics = clip.script;
            }
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_service_record() {
        let json = r#"{
            "id": 7,
            "status": "completed",
            "specific_title": "Night Drive",
            "version": "v2",
            "star_rating": 4,
            "specific_lyrics": "la la",
            "prompt_to_generate": null,
            "vocal_gender": "female",
            "download_url_1": "https://cdn.example.com/a.mp3",
            "downloaded_url_1": true,
            "download_url_2": "",
            "downloaded_url_2": false,
            "speech_task_id": "task-1",
            "created_at": "2024-03-01T10:15:30.123456",
            "updated_at": null,
            "style": {"id": 3, "name": "synthwave", "style_prompt": "retro"},
            "style_name": "synthwave"
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.id, 7);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.title.as_deref(), Some("Night Drive"));
        assert_eq!(job.star_rating, 4);
        assert_eq!(
            job.artifact(Slot::One).url.as_deref(),
            Some("https://cdn.example.com/a.mp3")
        );
        assert!(job.artifact(Slot::One).downloaded);
        assert_eq!(job.artifact(Slot::Two).url, None, "empty URL is absent");
        assert!(job.created_at.is_some());
        match &job.kind {
            JobKind::Song(song) => {
                assert_eq!(song.style_id, Some(3));
                assert_eq!(song.vocal_gender, Some(VocalGender::Female));
            }
            other => panic!("expected song, got {:?}", other),
        }
    }

    #[test]
    fn voice_name_selects_voice_clip_variant() {
        let json = r#"{"id": 1, "status": "create", "voice_name": "en-US-AvaMultilingualNeural", "specific_lyrics": "hello"}"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(
            job.kind,
            JobKind::VoiceClip(VoiceClipDetails {
                voice_name: "en-US-AvaMultilingualNeural".to_string(),
                script: Some("hello".to_string()),
            })
        );
        assert_eq!(job.version, "v1");
    }

    #[test]
    fn unknown_status_is_unspecified() {
        let job: Job = serde_json::from_str(r#"{"id": 2, "status": "queued"}"#).unwrap();
        assert_eq!(job.status, JobStatus::Unspecified);
        assert!(!job.needs_polling());
    }

    #[test]
    fn needs_polling_covers_completed_without_audio() {
        assert!(Job::new(1, JobStatus::Submitted).needs_polling());
        assert!(Job::new(1, JobStatus::Completed).needs_polling());
        assert!(!Job::new(1, JobStatus::Completed)
            .with_artifact(Slot::Two, "https://x/b.mp3", false)
            .needs_polling());
        assert!(!Job::new(1, JobStatus::Create).needs_polling());
        assert!(!Job::new(1, JobStatus::Failed).needs_polling());

        let idle = vec![
            Job::new(1, JobStatus::Failed),
            Job::new(2, JobStatus::Completed).with_artifact(Slot::One, "https://x/a.mp3", true),
        ];
        assert!(!needs_polling(&idle));
        assert!(!needs_polling(&[]));
    }

    #[test]
    fn filename_is_sanitized() {
        let job = Job::new(1, JobStatus::Completed).with_title("AC/DC: \"Live\" <b>?*|%\\");
        assert_eq!(job.artifact_filename(Slot::Two), "AC-DC- -Live- -b------_2_v1.mp3");

        let untitled = Job::new(2, JobStatus::Completed);
        assert_eq!(untitled.artifact_filename(Slot::One), "song_1_v1.mp3");
    }

    #[test]
    fn next_version_matches_duplicate_rules() {
        assert_eq!(next_version("v1"), "v2");
        assert_eq!(next_version("v9"), "v10");
        assert_eq!(next_version(""), "v2");
        assert_eq!(next_version("vX"), "v2");
        assert_eq!(next_version("v0"), "v2");
        assert_eq!(next_version("3"), "v4");
    }

    #[test]
    fn duplicate_drops_status_and_artifacts() {
        let mut job = Job::new(5, JobStatus::Completed)
            .with_title("Tune")
            .with_artifact(Slot::One, "https://x/a.mp3", true);
        job.version = "v3".to_string();
        job.kind = JobKind::Song(SongDetails {
            lyrics: Some("words".to_string()),
            style_id: Some(9),
            vocal_gender: Some(VocalGender::Male),
            ..SongDetails::default()
        });

        let draft = job.duplicate();
        assert_eq!(draft.specific_title.as_deref(), Some("Tune"));
        assert_eq!(draft.version.as_deref(), Some("v4"));
        assert_eq!(draft.specific_lyrics.as_deref(), Some("words"));
        assert_eq!(draft.style_id, Some(9));
        assert_eq!(draft.vocal_gender, Some(VocalGender::Male));
        assert_eq!(draft.status, None);
    }

    #[test]
    fn encodes_back_to_flat_record() {
        let job = Job::new(3, JobStatus::Completed).with_artifact(Slot::One, "https://x/a.mp3", false);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["download_url_1"], "https://x/a.mp3");
        assert_eq!(value["downloaded_url_1"], false);
        assert_eq!(value["status"], "completed");
        assert!(value["download_url_2"].is_null());
    }
}
