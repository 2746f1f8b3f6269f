//! Storage boundary for readings, anomalies, statistics and reports.
//!
//! The core (classifier, aggregator, renderer) and the access façade only
//! talk to [`Store`]. [`PgStore`] is the production backend; [`MemoryStore`]
//! keeps the same semantics in process (cascade on delete, upsert by
//! statistic key, one transaction per reading write) and backs the tests.
//!
//! Write paths that touch a reading (`insert_reading`, `correct_reading`,
//! `reclassify`) run [`crate::classifier::evaluate`] and rewrite the reading's
//! anomalies and validity flag atomically with the write itself. If
//! classification cannot complete, the write is rolled back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{
        Anomaly, AnomalyCount, Classification, LatestReading, Measurements, NewReading,
        NewReport, NewStatistic, PeriodicStatistic, ProcessingStatus, Reading, ReadingFilter,
        Report, ReportTemplate, Sensor, Station, StatisticsFilter, SystemStatus,
    },
    Result,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ---
    // Topology (read-only, provisioned elsewhere)

    async fn station(&self, id: i64) -> Result<Option<Station>>;

    async fn stations(&self) -> Result<Vec<Station>>;

    async fn sensor(&self, id: i64) -> Result<Option<Sensor>>;

    // Readings

    /// Insert a reading and classify it in the same transaction.
    async fn insert_reading(&self, reading: &NewReading) -> Result<Classification>;

    /// Replace a reading's measurements and re-classify it. `None` if absent.
    async fn correct_reading(
        &self,
        id: i64,
        measurements: &Measurements,
    ) -> Result<Option<Classification>>;

    /// Delete the reading's anomalies, re-run every rule and update the
    /// validity flag, holding a lock on that reading. `None` if absent.
    async fn reclassify(&self, id: i64) -> Result<Option<Classification>>;

    async fn reading(&self, id: i64) -> Result<Option<Reading>>;

    async fn reading_ids(&self) -> Result<Vec<i64>>;

    /// Readings matching `filter`, oldest first.
    async fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>>;

    /// Delete a reading; its anomalies go with it. `false` if absent.
    async fn delete_reading(&self, id: i64) -> Result<bool>;

    /// Most recent reading per station in `normal` status, ordered by station name.
    async fn latest_readings(&self) -> Result<Vec<LatestReading>>;

    // Anomalies

    async fn anomalies_for(&self, reading_id: i64) -> Result<Vec<Anomaly>>;

    async fn process_anomaly(
        &self,
        id: i64,
        status: ProcessingStatus,
        processed_by: Option<&str>,
    ) -> Result<Option<Anomaly>>;

    /// Anomalies discovered in `[from, to)` grouped by station and kind,
    /// ordered by station name then descending count.
    async fn anomaly_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AnomalyCount>>;

    // Statistics

    /// Insert or overwrite the row keyed by `(station_id, period, period_date)`.
    async fn upsert_statistic(&self, stat: &NewStatistic) -> Result<PeriodicStatistic>;

    async fn list_statistics(&self, filter: &StatisticsFilter) -> Result<Vec<PeriodicStatistic>>;

    // Reports

    async fn template(&self, id: i64) -> Result<Option<ReportTemplate>>;

    /// Fetch the template called `name`, creating it if it does not exist.
    async fn template_get_or_create(
        &self,
        name: &str,
        template_type: &str,
        content: &str,
    ) -> Result<ReportTemplate>;

    async fn insert_report(&self, report: &NewReport) -> Result<Report>;

    async fn report(&self, id: i64) -> Result<Option<Report>>;

    // Status

    /// Counters for the overview, counting readings collected in `[day_start, day_end)`.
    async fn system_status(
        &self,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> Result<SystemStatus>;
}
