//! # Chanwarden Scheduler
//!
//! Time-driven core: recurring job driver, subscription expiry sweep,
//! scheduled post publication and throttled owner notifications.
//!
//! ## Architecture
//! ```text
//! JobScheduler (tokio interval per job, body spawned per tick)
//!   ├── expiry_sweep      every 1m  → LifecycleManager::sweep
//!   │                                   ├── Enforcer (per-pass capability cache)
//!   │                                   └── TransportGateway::remove_member
//!   ├── post_publication  every 1m  → PublicationPipeline::run
//!   ├── metric_refresh    every 6h  → ListingRefresher::refresh_member_counts
//!   └── housekeeping      every 24h → ListingRefresher::housekeeping
//!
//! Every owner-facing message → RateLimitedNotifier → TransportGateway::notify_owner
//! ```
//!
//! ## Owner callbacks
//! Owner messages carry `undo_ban:<user>:<channel>:<owner>` and
//! `set_tier:<user>:<channel>` buttons. This crate does not poll for updates;
//! the bot front end routes `undo_ban` presses to [`LifecycleManager::undo_ban`]
//! (the `chanwarden undo <ref>` command does the same by hand) and handles
//! `set_tier` itself.
//!
//! ## Deployment constraint
//! Exactly one scheduling instance may run against a database. Throttle
//! windows and capability caches live in process memory, and nothing
//! coordinates two processes sweeping the same records.

pub mod engine;
pub mod enforcer;
pub mod jobs;
pub mod lifecycle;
pub mod listings;
pub mod messages;
pub mod notify;
pub mod persistence;
pub mod publish;

#[cfg(test)]
mod testkit;

pub use engine::{JobScheduler, JobStatus, SchedulerStatus};
pub use enforcer::{Capability, Enforcer, Verdict};
pub use jobs::CoreJobs;
pub use lifecycle::{LifecycleManager, SweepReport, UndoBan};
pub use listings::{ListingRefresher, RefreshReport};
pub use notify::{NotifyOutcome, RateLimitedNotifier, ThrottlePolicy};
pub use persistence::{SqliteStore, StoreStats};
pub use publish::{PublicationPipeline, PublishReport};
