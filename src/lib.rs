//! Environmental monitoring backend.
//!
//! Sensor readings are ingested and classified against fixed threshold
//! rules (`classifier`), rolled up into per-station periodic statistics
//! (`aggregator`) and summarized into text reports (`report`). Everything is
//! reached through the role-checked [`MonitoringService`] façade, backed by a
//! [`store::Store`] implementation injected at construction.
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): the
//! binary only talks to `config`, `schema`, `routes` and the façade.

pub mod access;
pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod error;
pub mod models;
pub mod period;
pub mod report;
pub mod routes;
pub mod schema;
pub mod service;
pub mod store;

pub use access::{Caller, Role};
pub use config::Config;
pub use error::{Error, Result};
pub use models::{AnomalyKind, ProcessingStatus, ValidityFlag};
pub use period::{Period, PeriodDescriptor};
pub use service::{MonitoringService, ServiceSettings};
