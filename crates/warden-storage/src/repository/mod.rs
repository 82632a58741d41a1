//! Database repositories for each table.

pub mod cache;
pub mod categories;
pub mod content;
pub mod hosts;
pub mod log;
pub mod url_rules;

pub use cache::CacheRepo;
pub use categories::{CategoryRepo, DEFAULT_BLOCKED_CATEGORIES, DEFAULT_CATEGORIES};
pub use content::{BlockedFilesRepo, BlockedMimeRepo};
pub use hosts::TlsExclusionRepo;
pub use log::DecisionLogRepo;
pub use url_rules::{BlockedUrlsRepo, RedirectUrlsRepo};
