//! HTTP request handlers
//!
//! Organized by resource: jobs, run history, S3 settings, dashboard.

pub mod dashboard;
pub mod history;
pub mod jobs;
pub mod settings;

pub use dashboard::*;
pub use history::*;
pub use jobs::*;
pub use settings::*;
