//! Client side of the song studio: REST client plus the loop that keeps
//! in-flight generation jobs fresh and saves their audio exactly once.
//!
//! ```text
//!   PollScheduler ──list/stats──▶ JobApi
//!        │ snapshot
//!        ▼
//!   DeliveryGuard::detect ──requests──▶ Delivery (spawned)
//!        ▲                                 │ fetch / save / write-back
//!        └──────────── DeliveryReport ◀────┘
//! ```

pub mod api;
pub mod delivery;
pub mod detector;
pub mod error;
pub mod poller;

pub use api::{ApiClient, ArtifactFetcher, JobApi};
pub use delivery::{Delivery, DeliveryOutcome, Opener, SystemOpener};
pub use detector::{DeliveryGuard, DeliveryKey, DeliveryRequest, Transition};
pub use error::ApiError;
pub use poller::{PollEvent, PollHandle, PollScheduler, PollSettings, PollSnapshot};
