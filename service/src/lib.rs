//! Bankrupt Transfer Service
//!
//! Accepts transfer requests from authenticated callers, checks them against
//! the stored accounts and runs them through the ledger engine, retrying
//! attempts that lose a store conflict.

pub mod config;
pub mod guard;
pub mod messages;
pub mod metrics;
pub mod notifier;
pub mod service;
pub mod state;

pub use config::{DatabaseConfig, RetryConfig, ServiceConfig};
pub use guard::TransferGuard;
pub use messages::{Caller, ErrorResponse, TransferRequest, TransferResponse};
pub use metrics::{InFlightTransfer, Metrics, MetricsSnapshot};
pub use notifier::{NotificationWorker, TransferNotification, TransferNotifier};
pub use service::TransferService;
pub use state::ServiceState;
