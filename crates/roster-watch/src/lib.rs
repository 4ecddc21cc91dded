//! roster-watch — crawl a paginated web roster, reconcile it against stored
//! identity history, and append first-sighting details to a delimited file.

pub mod config;
pub mod diagnostics;
pub mod extract;
pub mod navigator;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod renderer;
pub mod retry;
pub mod sink;
pub mod store;
pub mod types;

pub use config::{CrawlConfig, Delimiter, ReappearancePolicy, RosterLayout};
pub use diagnostics::Diagnostics;
pub use extract::{extract_details, extract_roster, parse_detail, parse_rows, RosterPage};
pub use navigator::Navigator;
pub use normalize::normalize;
pub use pipeline::{replay, run};
pub use reconcile::{apply, plan, reconcile, ApplyReport, Reconciliation};
pub use renderer::{ChromiumRenderer, Renderer, ScriptedRenderer, Session};
pub use retry::RetryPolicy;
pub use sink::{build_row, CsvSink, OutputRow};
pub use store::{IdentityStore, SqliteIdentityStore, StoreStats};
pub use types::*;
