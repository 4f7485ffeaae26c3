use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use studio_proto::job::{JobStatus, VocalGender};
use studio_proto::protocol::JobFilter;

#[derive(Debug, Parser)]
#[command(
    name = "studio",
    version,
    about = "Song studio client: manage generation jobs and collect their audio"
)]
pub struct Cli {
    /// API base URL for this run (overrides config and STUDIO_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and store the session token
    Login {
        username: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account
    Register {
        username: String,
        email: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored token
    Logout,
    /// Show the logged-in user
    Whoami,
    /// List jobs
    List(FilterArgs),
    /// Aggregate counts by status
    Stats {
        #[arg(long)]
        all_users: bool,
    },
    /// Show one job in detail
    Show { id: i64 },
    /// Create a song or voice clip
    Create {
        #[command(subcommand)]
        kind: CreateKind,
    },
    /// Copy a job's metadata into a new job at the next version
    Duplicate { id: i64 },
    /// Set the star rating (0-5)
    Rate {
        id: i64,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=5))]
        stars: u8,
    },
    /// Clear the artifacts and submit the job again
    Recreate { id: i64 },
    /// Delete a job
    Delete {
        id: i64,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Save a job's audio now, whether or not it was saved before
    Download {
        id: i64,
        /// Only this slot (1 or 2)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=2))]
        slot: Option<u8>,
    },
    /// Poll in-flight jobs and save their audio as it appears
    Watch {
        /// Seconds between re-fetches
        #[arg(long)]
        interval: Option<u64>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Manage styles
    Styles {
        #[command(subcommand)]
        action: StyleAction,
    },
    /// List available voices
    Voices,
    /// Remember a voice for new voice clips
    SelectVoice {
        /// Voice id or display name
        voice: String,
    },
    /// Synthesize a short preview with a voice
    Preview {
        text: String,
        /// Defaults to the selected voice
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum CreateKind {
    Song {
        #[arg(long)]
        title: String,
        #[arg(long)]
        lyrics: Option<String>,
        #[arg(long)]
        prompt: Option<String>,
        /// Style id
        #[arg(long)]
        style: Option<i64>,
        #[arg(long)]
        gender: Option<VocalGender>,
        /// Save without submitting for generation
        #[arg(long)]
        draft: bool,
    },
    Voice {
        #[arg(long)]
        title: String,
        #[arg(long)]
        script: String,
        /// Defaults to the selected voice
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        draft: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum StyleAction {
    List,
    Create {
        name: String,
        #[arg(long)]
        prompt: Option<String>,
    },
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        prompt: Option<String>,
    },
    Delete {
        id: i64,
        #[arg(long, short)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// create, submitted, completed, failed, unspecified or all
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub style: Option<i64>,
    /// male, female, other or all
    #[arg(long)]
    pub gender: Option<String>,
    #[arg(long)]
    pub voice: Option<String>,
    #[arg(long)]
    pub search: Option<String>,
    /// Include other users' jobs
    #[arg(long)]
    pub all_users: bool,
    /// Hide jobs rated below this
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=5))]
    pub min_stars: u8,
}

impl FilterArgs {
    pub fn to_filter(&self) -> anyhow::Result<JobFilter> {
        Ok(JobFilter {
            status: parse_or_all::<JobStatus>(self.status.as_deref())?,
            style_id: self.style,
            vocal_gender: parse_or_all::<VocalGender>(self.gender.as_deref())?,
            voice_name: self.voice.clone(),
            search: self.search.clone(),
            all_users: self.all_users,
            min_stars: self.min_stars,
        })
    }
}

/// `None` and `"all"` both mean no filter.
fn parse_or_all<T>(raw: Option<&str>) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("all") => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(anyhow::Error::msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn all_means_no_filter() {
        let args = FilterArgs {
            status: Some("all".to_string()),
            gender: Some("Female".to_string()),
            min_stars: 2,
            ..FilterArgs::default()
        };
        let filter = args.to_filter().unwrap();
        assert_eq!(filter.status, None);
        assert_eq!(filter.vocal_gender, Some(VocalGender::Female));
        assert_eq!(filter.min_stars, 2);

        let bad = FilterArgs {
            status: Some("queued".to_string()),
            ..FilterArgs::default()
        };
        assert!(bad.to_filter().is_err());
    }

    #[test]
    fn rating_is_range_checked() {
        assert!(Cli::try_parse_from(["studio", "rate", "3", "5"]).is_ok());
        assert!(Cli::try_parse_from(["studio", "rate", "3", "6"]).is_err());
    }

    #[test]
    fn watch_accepts_filters() {
        let cli = Cli::try_parse_from(["studio", "watch", "--interval", "5", "--status", "submitted"])
            .unwrap();
        match cli.command {
            Command::Watch { interval, filter } => {
                assert_eq!(interval, Some(5));
                assert_eq!(filter.status.as_deref(), Some("submitted"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
