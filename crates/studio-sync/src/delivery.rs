//! Artifact delivery: fetch a generated file, save it into the downloads
//! directory and record on the service that it has been saved.
//!
//! Generated URLs expire after about two weeks, so saving a local copy as
//! soon as one shows up is the point of the whole loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use studio_proto::platform::{self, OpenerCommand};
use tracing::{error, info, warn};

use crate::api::{ArtifactFetcher, JobApi};
use crate::detector::DeliveryRequest;

/// Degraded delivery path: hand the URL to something that can open it.
pub trait Opener: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Opens URLs with the desktop's default handler.
#[derive(Debug, Clone)]
pub struct SystemOpener {
    command: Option<OpenerCommand>,
}

impl SystemOpener {
    pub fn detect() -> Self {
        let command = platform::find_opener();
        if command.is_none() {
            warn!("No URL opener found on PATH; fallback delivery will be unavailable");
        }
        Self { command }
    }
}

impl Opener for SystemOpener {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        let command = self
            .command
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no URL opener available"))?;
        // Detached: tokio reaps the child in the background once it exits
        tokio::process::Command::new(&command.program)
            .args(&command.args)
            .arg(url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Saved locally. `persisted` is false when the write-back failed.
    Saved { path: PathBuf, persisted: bool },
    /// Fetch failed; the URL was handed to the opener instead.
    OpenedExternally,
    /// Fetch failed and so did the fallback.
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

pub struct Delivery<S> {
    service: Arc<S>,
    opener: Arc<dyn Opener>,
    downloads_dir: PathBuf,
    open_on_failure: bool,
}

impl<S> Delivery<S>
where
    S: JobApi + ArtifactFetcher,
{
    pub fn new(service: Arc<S>, opener: Arc<dyn Opener>, downloads_dir: PathBuf) -> Self {
        Self {
            service,
            opener,
            downloads_dir,
            open_on_failure: true,
        }
    }

    pub fn open_on_failure(mut self, enabled: bool) -> Self {
        self.open_on_failure = enabled;
        self
    }

    pub fn service(&self) -> Arc<S> {
        Arc::clone(&self.service)
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Run one delivery to completion. Never fails: every error ends up in
    /// the returned outcome or in the log.
    pub async fn deliver(&self, request: &DeliveryRequest) -> DeliveryOutcome {
        let key = &request.key;
        info!(
            "Delivering job {} slot {} as {:?}",
            key.job_id, key.slot, request.filename
        );

        let saved = match self.service.fetch_artifact(&key.url).await {
            Ok(bytes) => save_artifact(&self.downloads_dir, &request.filename, &bytes)
                .await
                .map_err(|e| format!("save failed: {:#}", e)),
            Err(e) => Err(format!("fetch failed: {}", e)),
        };

        let path = match saved {
            Ok(path) => path,
            Err(reason) => {
                warn!(
                    "Delivery of job {} slot {} degraded ({})",
                    key.job_id, key.slot, reason
                );
                return self.fall_back(&key.url, reason);
            }
        };

        let persisted = match self.service.mark_downloaded(key.job_id, key.slot).await {
            Ok(()) => true,
            Err(e) => {
                // The file is already on disk; the session guard keeps it
                // from being fetched again until the next run.
                warn!(
                    "Saved job {} slot {} but could not mark it downloaded: {}",
                    key.job_id, key.slot, e
                );
                false
            }
        };

        info!("Saved job {} slot {} to {:?}", key.job_id, key.slot, path);
        DeliveryOutcome::Saved { path, persisted }
    }

    fn fall_back(&self, url: &str, reason: String) -> DeliveryOutcome {
        if !self.open_on_failure {
            return DeliveryOutcome::Failed(reason);
        }
        match self.opener.open(url) {
            Ok(()) => {
                info!("Opened {} externally", url);
                DeliveryOutcome::OpenedExternally
            }
            Err(e) => {
                error!("Fallback open of {} failed: {:#}", url, e);
                DeliveryOutcome::Failed(format!("{}; open failed: {:#}", reason, e))
            }
        }
    }
}

/// Write `bytes` under `dir/filename` without clobbering an existing file.
///
/// The data goes to a `.part` file first and is renamed into place, so a
/// crash never leaves a truncated file under the final name.
pub async fn save_artifact(dir: &Path, filename: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let target = unique_path(dir, filename).await;
    let part = part_path(&target);

    if let Err(e) = tokio::fs::write(&part, bytes).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&part, &target).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e.into());
    }
    Ok(target)
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

/// `name.mp3`, then `name (1).mp3`, `name (2).mp3`, ...
async fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }

    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string();
    let ext = path.extension().and_then(|e| e.to_str());

    let mut n = 1u32;
    loop {
        let name = match ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = dir.join(name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}
