//! Command handlers behind the `studio` binary.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use studio_proto::config::Config;
use studio_proto::job::{Job, JobKind, JobStatus, Slot};
use studio_proto::platform;
use studio_proto::protocol::{JobStats, NewJob, StyleDraft};
use studio_proto::session::{SessionContext, SessionUser, VoiceChoice};
use tokio::sync::broadcast;
use tracing::info;

use studio_sync::delivery::save_artifact;
use studio_sync::poller::DeliveryReport;
use studio_sync::{
    ApiClient, ApiError, Delivery, DeliveryKey, DeliveryOutcome, DeliveryRequest, PollEvent, PollScheduler,
    PollSettings, SystemOpener,
};

use crate::cli::{Command, CreateKind, FilterArgs, StyleAction};

pub struct App {
    pub config: Config,
    pub session: SessionContext,
    pub api: ApiClient,
}

impl App {
    pub async fn dispatch(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Login { username, password } => self.login(&username, password).await,
            Command::Register {
                username,
                email,
                password,
            } => self.register(&username, &email, password).await,
            Command::Logout => self.logout(),
            Command::Whoami => self.whoami().await,
            Command::List(filter) => self.list(&filter).await,
            Command::Stats { all_users } => self.stats(all_users).await,
            Command::Show { id } => self.show(id).await,
            Command::Create { kind } => self.create(kind).await,
            Command::Duplicate { id } => self.duplicate(id).await,
            Command::Rate { id, stars } => {
                let job = self.api.set_rating(id, stars).await?;
                println!("Rated {} {}", job.display_title(), stars_label(job.star_rating));
                Ok(())
            }
            Command::Recreate { id } => {
                let job = self.api.recreate_job(id).await?;
                println!("Resubmitted #{} ({})", job.id, job.status);
                Ok(())
            }
            Command::Delete { id, yes } => self.delete(id, yes).await,
            Command::Download { id, slot } => self.download(id, slot.and_then(Slot::from_number)).await,
            Command::Watch { interval, filter } => self.watch(interval, &filter).await,
            Command::Styles { action } => self.styles(action).await,
            Command::Voices => self.voices().await,
            Command::SelectVoice { voice } => self.select_voice(&voice).await,
            Command::Preview { text, voice, out } => self.preview(&text, voice, out).await,
        }
    }

    // ── Session ───────────────────────────────────────────────────────────────

    async fn login(&mut self, username: &str, password: Option<String>) -> anyhow::Result<()> {
        let password = match password {
            Some(p) => p,
            None => prompt("Password: ")?,
        };
        let response = self.api.login(username, &password).await?;
        let user = SessionUser::from(response.user);
        info!("Logged in as {} (id {})", user.username, user.id);
        println!("Logged in as {}", user.username);
        self.session.begin(response.access_token, user)?;
        Ok(())
    }

    async fn register(
        &mut self,
        username: &str,
        email: &str,
        password: Option<String>,
    ) -> anyhow::Result<()> {
        let password = match password {
            Some(p) => p,
            None => prompt("Password: ")?,
        };
        let user = self.api.register(username, email, &password).await?;
        println!("Registered {} (id {}). Run `studio login` next.", user.username, user.id);
        Ok(())
    }

    fn logout(&mut self) -> anyhow::Result<()> {
        self.session.end()?;
        println!("Logged out");
        Ok(())
    }

    async fn whoami(&self) -> anyhow::Result<()> {
        if !self.session.is_logged_in() {
            println!("Not logged in");
            return Ok(());
        }
        let user = self.api.current_user().await?;
        match &user.email {
            Some(email) => println!("{} <{}> (id {})", user.username, email, user.id),
            None => println!("{} (id {})", user.username, user.id),
        }
        if let Some(voice) = self.session.selected_voice() {
            println!("Selected voice: {} ({})", voice.name, voice.id);
        }
        Ok(())
    }

    // ── Jobs ──────────────────────────────────────────────────────────────────

    async fn list(&self, args: &FilterArgs) -> anyhow::Result<()> {
        let filter = args.to_filter()?;
        let jobs = self.api.list_jobs(&filter).await?;
        let visible = filter.visible(&jobs);
        if visible.is_empty() {
            println!("No jobs");
            return Ok(());
        }
        for job in visible {
            println!("{}", job_line(job));
        }
        Ok(())
    }

    async fn stats(&self, all_users: bool) -> anyhow::Result<()> {
        let stats = self.api.job_stats(all_users).await?;
        println!("{}", stats_line(&stats));
        Ok(())
    }

    async fn show(&self, id: i64) -> anyhow::Result<()> {
        let job = self.api.get_job(id).await?;
        println!("{}", job_line(&job));
        match &job.kind {
            JobKind::Song(song) => {
                if let Some(style) = &song.style {
                    println!("  style:   {} (#{})", style.name, style.id);
                } else if let Some(style_id) = song.style_id {
                    println!("  style:   #{}", style_id);
                }
                if let Some(gender) = song.vocal_gender {
                    println!("  vocals:  {}", gender.as_str());
                }
                if let Some(prompt) = &song.prompt {
                    println!("  prompt:  {}", prompt);
                }
                if let Some(lyrics) = &song.lyrics {
                    println!("  lyrics:\n{}", indent(lyrics));
                }
            }
            JobKind::VoiceClip(clip) => {
                println!("  voice:   {}", clip.voice_name);
                if let Some(script) = &clip.script {
                    println!("  script:\n{}", indent(script));
                }
            }
        }
        for (slot, artifact) in job.slots() {
            if let Some(url) = &artifact.url {
                let mark = if artifact.downloaded { "saved" } else { "new" };
                println!("  audio {} [{}]: {}", slot, mark, url);
            }
        }
        if let Some(created) = job.created_at {
            println!("  created: {}", created.format("%Y-%m-%d %H:%M"));
        }
        Ok(())
    }

    async fn create(&self, kind: CreateKind) -> anyhow::Result<()> {
        let draft = match kind {
            CreateKind::Song {
                title,
                lyrics,
                prompt,
                style,
                gender,
                draft,
            } => NewJob {
                specific_lyrics: lyrics,
                prompt_to_generate: prompt,
                style_id: style,
                vocal_gender: gender,
                status: draft.then_some(JobStatus::Create),
                ..NewJob::song(title)
            },
            CreateKind::Voice {
                title,
                script,
                voice,
                draft,
            } => {
                let voice = self.voice_or_selected(voice)?;
                NewJob {
                    status: draft.then_some(JobStatus::Create),
                    ..NewJob::voice_clip(title, voice, script)
                }
            }
        };
        let created = self.api.create_job(&draft).await?;
        if let Some(message) = &created.message {
            println!("{}", message);
        }
        println!("{}", job_line(&created.job));
        Ok(())
    }

    async fn duplicate(&self, id: i64) -> anyhow::Result<()> {
        let source = self.api.get_job(id).await?;
        let created = self.api.create_job(&source.duplicate()).await?;
        println!(
            "Duplicated #{} as #{} ({})",
            source.id, created.job.id, created.job.version
        );
        Ok(())
    }

    async fn delete(&self, id: i64, yes: bool) -> anyhow::Result<()> {
        if !yes {
            let job = self.api.get_job(id).await?;
            let answer = prompt(&format!(
                "Delete #{} \"{}\"? This cannot be undone. [y/N] ",
                job.id,
                job.display_title()
            ))?;
            if !matches!(answer.trim(), "y" | "Y" | "yes") {
                println!("Cancelled");
                return Ok(());
            }
        }
        self.api.delete_job(id).await?;
        println!("Deleted #{}", id);
        Ok(())
    }

    /// Manual delivery: same routine as the watcher, but the downloaded flag
    /// is ignored.
    async fn download(&self, id: i64, only: Option<Slot>) -> anyhow::Result<()> {
        let job = self.api.get_job(id).await?;
        let delivery = self.delivery();

        let mut delivered = 0;
        for (slot, artifact) in job.slots() {
            if only.is_some_and(|s| s != slot) {
                continue;
            }
            let Some(url) = artifact.url.clone() else {
                continue;
            };
            let request = DeliveryRequest {
                key: DeliveryKey {
                    job_id: job.id,
                    slot,
                    url,
                },
                filename: job.artifact_filename(slot),
            };
            let outcome = delivery.deliver(&request).await;
            println!("{}", outcome_line(&request.key, &outcome));
            delivered += 1;
        }
        if delivered == 0 {
            bail!("Job #{} has no audio yet ({})", job.id, job.status);
        }
        Ok(())
    }

    async fn watch(&self, interval: Option<u64>, args: &FilterArgs) -> anyhow::Result<()> {
        if !self.session.is_logged_in() {
            return Err(ApiError::NotLoggedIn.into());
        }
        let mut settings = PollSettings::from_config(&self.config).with_filter(args.to_filter()?);
        if let Some(secs) = interval {
            settings.interval = std::time::Duration::from_secs(secs.max(1));
        }
        let delivery = self.delivery();
        let scheduler = PollScheduler::new(delivery.service(), Arc::new(delivery), settings);

        println!(
            "Watching for new audio (saving to {}). Ctrl-C to stop.",
            self.config.paths.downloads_dir.display()
        );
        let handle = scheduler.spawn();
        let mut events = handle.subscribe_events();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => print_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Watch output lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        handle.shutdown().await;
        Ok(())
    }

    // ── Styles ────────────────────────────────────────────────────────────────

    async fn styles(&self, action: StyleAction) -> anyhow::Result<()> {
        match action {
            StyleAction::List => {
                let styles = self.api.list_styles().await?;
                if styles.is_empty() {
                    println!("No styles");
                }
                for style in styles {
                    let owner = style.created_by.as_deref().unwrap_or("-");
                    println!(
                        "{:>5}  {:<24} {:<12} {}",
                        style.id,
                        style.name,
                        owner,
                        style.style_prompt.as_deref().unwrap_or("")
                    );
                }
            }
            StyleAction::Create { name, prompt } => {
                let style = self
                    .api
                    .create_style(&name, prompt.as_deref().unwrap_or(""))
                    .await?;
                println!("Created style #{} {}", style.id, style.name);
            }
            StyleAction::Update { id, name, prompt } => {
                let draft = StyleDraft {
                    name,
                    style_prompt: prompt,
                };
                if draft == StyleDraft::default() {
                    bail!("Nothing to update: pass --name and/or --prompt");
                }
                let style = self.api.update_style(id, &draft).await?;
                println!("Updated style #{} {}", style.id, style.name);
            }
            StyleAction::Delete { id, yes } => {
                if !yes {
                    let answer = prompt(&format!("Delete style #{}? [y/N] ", id))?;
                    if !matches!(answer.trim(), "y" | "Y" | "yes") {
                        println!("Cancelled");
                        return Ok(());
                    }
                }
                self.api.delete_style(id).await?;
                println!("Deleted style #{}", id);
            }
        }
        Ok(())
    }

    // ── Voices ────────────────────────────────────────────────────────────────

    async fn voices(&self) -> anyhow::Result<()> {
        let selected = self.session.selected_voice().map(|v| v.id.clone());
        for voice in self.api.list_voices().await? {
            let mark = if selected.as_deref() == Some(voice.id.as_str()) {
                "*"
            } else {
                " "
            };
            println!(
                "{} {:<36} {:<28} {}",
                mark,
                voice.id,
                voice.name,
                voice.gender.as_deref().unwrap_or("")
            );
        }
        Ok(())
    }

    async fn select_voice(&mut self, wanted: &str) -> anyhow::Result<()> {
        let voices = self.api.list_voices().await?;
        let voice = voices
            .into_iter()
            .find(|v| v.id == wanted || v.name.eq_ignore_ascii_case(wanted))
            .with_context(|| format!("No voice named {:?}", wanted))?;
        println!("Selected {} ({})", voice.name, voice.id);
        self.session.select_voice(VoiceChoice::from(voice))?;
        Ok(())
    }

    async fn preview(
        &self,
        text: &str,
        voice: Option<String>,
        out: Option<PathBuf>,
    ) -> anyhow::Result<()> {
        let voice = self.voice_or_selected(voice)?;
        let audio = self.api.synthesize(text, &voice).await?;
        let path = match out {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, &audio)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                path
            }
            None => {
                let dir = platform::cache_dir().join("previews");
                let name = format!("preview_{}.mp3", studio_proto::job::sanitize_filename(&voice));
                save_artifact(&dir, &name, &audio).await?
            }
        };
        println!("Preview saved to {}", path.display());
        Ok(())
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn delivery(&self) -> Delivery<ApiClient> {
        Delivery::new(
            Arc::new(self.api.clone()),
            Arc::new(SystemOpener::detect()),
            self.config.paths.downloads_dir.clone(),
        )
        .open_on_failure(self.config.delivery.open_on_failure)
    }

    fn voice_or_selected(&self, voice: Option<String>) -> anyhow::Result<String> {
        match voice {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => self
                .session
                .selected_voice()
                .map(|v| v.id.clone())
                .context("No voice given and none selected; run `studio select-voice <id>`"),
        }
    }
}

fn prompt(label: &str) -> anyhow::Result<String> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}", label)?;
    stdout.flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn stars_label(stars: u8) -> String {
    let stars = stars.min(5) as usize;
    format!("{}{}", "*".repeat(stars), ".".repeat(5 - stars))
}

pub fn job_line(job: &Job) -> String {
    let audio = job
        .slots()
        .filter(|(_, a)| a.url.is_some())
        .map(|(slot, a)| format!("{}{}", slot, if a.downloaded { "" } else { "+" }))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "#{:<5} {:<11} {:<5} {} {:<32} {:<4} {}",
        job.id,
        job.status.as_str(),
        job.kind.label(),
        stars_label(job.star_rating),
        job.display_title(),
        job.version,
        if audio.is_empty() { "-".to_string() } else { audio }
    )
}

pub fn stats_line(stats: &JobStats) -> String {
    format!(
        "total {}  create {}  submitted {}  completed {}  failed {}  unspecified {}",
        stats.total, stats.create, stats.submitted, stats.completed, stats.failed, stats.unspecified
    )
}

fn outcome_line(key: &DeliveryKey, outcome: &DeliveryOutcome) -> String {
    match outcome {
        DeliveryOutcome::Saved { path, persisted } => format!(
            "#{} audio {}: saved {}{}",
            key.job_id,
            key.slot,
            path.display(),
            if *persisted { "" } else { " (not marked on server)" }
        ),
        DeliveryOutcome::OpenedExternally => format!(
            "#{} audio {}: download failed, opened {} instead",
            key.job_id, key.slot, key.url
        ),
        DeliveryOutcome::Failed(reason) => {
            format!("#{} audio {}: failed ({})", key.job_id, key.slot, reason)
        }
    }
}

fn print_event(event: &PollEvent) {
    match event {
        PollEvent::Refreshed {
            cycle,
            jobs,
            polling,
        } => {
            if *cycle == 1 {
                let state = if *polling { "polling" } else { "nothing in flight" };
                println!("Loaded {} jobs ({})", jobs, state);
            } else if !polling {
                println!("All jobs settled; waiting (Ctrl-C to stop)");
            }
        }
        PollEvent::Transition(t) => match t.from {
            Some(from) => println!("#{} {} -> {}", t.job_id, from, t.to),
            None => println!("#{} new ({})", t.job_id, t.to),
        },
        PollEvent::DeliveryStarted(request) => {
            println!("#{} audio {}: saving {}", request.key.job_id, request.key.slot, request.filename)
        }
        PollEvent::Delivered(DeliveryReport { key, outcome }) => {
            println!("{}", outcome_line(key, outcome))
        }
        PollEvent::PollFailed { error, .. } => eprintln!("Refresh failed: {}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_line_marks_unsaved_audio() {
        let mut job = Job::new(12, JobStatus::Completed)
            .with_title("Tune")
            .with_artifact(Slot::One, "https://x/a.mp3", true)
            .with_artifact(Slot::Two, "https://x/b.mp3", false);
        job.star_rating = 3;
        let line = job_line(&job);
        assert!(line.starts_with("#12"));
        assert!(line.contains("completed"));
        assert!(line.contains("***.."));
        assert!(line.ends_with("1,2+"));
    }

    #[test]
    fn stars_are_clamped() {
        assert_eq!(stars_label(0), ".....");
        assert_eq!(stars_label(9), "*****");
    }
}
