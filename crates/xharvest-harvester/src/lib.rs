//! Browser-driven harvesting of search results into structured posts.
//!
//! Control flow for one job: [`JobRunner`] acquires a session through
//! [`SessionManager`], splits the requested range with [`plan_windows`], and
//! drives a [`ScrollHarvester`] through each window. Every post element is
//! read by [`extract_post`], whose counters pass through [`parse_metric`].

pub mod browser;
pub mod error;
pub mod extract;
pub mod harvest;
pub mod job;
pub mod metrics;
pub mod query;
pub mod session;
pub mod window;

#[cfg(test)]
mod testing;

pub use browser::chromium::{ChromiumLauncher, ChromiumSettings};
pub use browser::{BrowserLauncher, BrowserPage};
pub use error::HarvestError;
pub use extract::extract_post;
pub use harvest::{HarvestAccumulator, HarvestSettings, ScrollHarvester};
pub use job::{JobRunner, StartError};
pub use metrics::parse_metric;
pub use query::{build_query, build_search_url};
pub use session::{Session, SessionManager, SessionSettings};
pub use window::{plan_windows, HarvestWindow};
