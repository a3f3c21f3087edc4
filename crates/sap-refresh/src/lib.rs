//! # sap-refresh
//!
//! Refresh SAP Analysis for Office reports by driving Excel.
//!
//! A [`SapRefresh`] session opens one report in a fresh Excel instance,
//! discovers the SAP data source behind its crosstab, logs in, refreshes,
//! applies variable and filter restrictions and closes everything again.
//! The [`workflow`] module strings sessions together for the two use cases:
//! collecting report information and the scheduled batch refresh.
//!
//! ```no_run
//! use sap_refresh::{
//!     AppConfig, BridgeLauncher, Context, LogNotifier, RetryPolicy, SecretCodec,
//!     SystemProcessKiller,
//! };
//!
//! let config = AppConfig::load("config.xlsx".as_ref(), &RetryPolicy::default())?;
//! let ctx = Context::new(
//!     config,
//!     SecretCodec::from_env()?,
//!     Box::new(BridgeLauncher::default()),
//!     Box::new(SystemProcessKiller::default()),
//!     Box::new(LogNotifier),
//! );
//! let today = chrono::Local::now().date_naive();
//! let summary = sap_refresh::workflow::refresh_auto_reports(&ctx, today);
//! println!("{} refreshed, {} failed", summary.succeeded.len(), summary.failed.len());
//! # Ok::<(), sap_refresh::RefreshError>(())
//! ```

pub mod config;
pub mod connectivity;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod export;
pub mod host;
pub mod notifier;
pub mod periods;
pub mod restrictions;
pub mod retry;
pub mod sap;
pub mod secret;
pub mod session;
pub mod timing;
pub mod workflow;

pub use config::{AppConfig, MailSettings, Settings};
pub use context::Context;
pub use descriptor::{DataSourceDescriptor, SourceDetails};
pub use error::{RefreshError, Result};
pub use host::{
    BridgeLauncher, ExcelHost, HostError, HostLauncher, HostResult, ProcessKiller,
    SystemProcessKiller, Value, WorkbookId,
};
pub use notifier::{compose_status_email, LogNotifier, Notify, SmtpNotifier, Status};
pub use periods::PeriodTokens;
pub use restrictions::{ObservedRestriction, ReportSchedule, RestrictionCommand, RestrictionRow};
pub use retry::{RetryPolicies, RetryPolicy};
pub use secret::SecretCodec;
pub use session::{with_session, SapRefresh, SessionState};
pub use workflow::BatchSummary;

pub use sap_refresh_excel::ExcelBridgeConfig;
