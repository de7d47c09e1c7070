pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod providers;
pub mod reporting;
pub mod runner;
pub mod scan;
pub mod stats;
pub mod store;
pub mod web;

pub use catalog::{OsintTool, ToolCatalog, ToolFilter};
pub use config::{ExecutionMode, ServerArgs, Settings};
pub use engine::{ScanEngine, ScanError, ScanOutcome};
pub use scan::{ScanRecord, ScanRequest, ScanStatus};
pub use web::{router, AppState};
