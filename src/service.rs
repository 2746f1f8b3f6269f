//! Access façade over the monitoring core.
//!
//! [`MonitoringService`] is the one object the HTTP layer (or any other
//! caller) talks to. Each operation checks the caller's role, validates input
//! before touching storage, then delegates to the classifier, aggregator or
//! report renderer. A storage failure is retried once, the pool hands out a
//! fresh connection for the second attempt, before it is surfaced.
//!
//! One instance is built per process and shared by cloning; the store handle
//! is explicit, there is no global state.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    access::{Access, Caller},
    aggregator, classifier,
    classifier::ClassifySummary,
    config::Config,
    models::{
        Anomaly, AnomalyCount, Classification, DailyAirQuality, DailyTrend, LatestReading,
        Measurements, NewReading, PeriodicStatistic, ProcessingStatus, Reading, ReadingFilter,
        Report, Scope, StatisticsFilter, SystemStatus, ValidityFlag,
    },
    period::{midnight, Period, PeriodDescriptor},
    report::{self, GeneratedReport},
    store::Store,
    Error, Result,
};

/// Upper bound on readings returned by one listing call.
pub const MAX_LIST_LIMIT: u32 = 10_000;

/// Tunables the façade needs from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub anomaly_window_days: u32,
    pub trend_days: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            anomaly_window_days: 30,
            trend_days: 7,
        }
    }
}

impl From<&Config> for ServiceSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            anomaly_window_days: cfg.anomaly_window_days,
            trend_days: cfg.trend_days,
        }
    }
}

/// Time window for anomaly queries. Explicit bounds win over `days`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AnomalyWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub days: Option<u32>,
}

/// Parameters of `generate_report`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ReportRequest {
    pub period: PeriodDescriptor,
    #[serde(default)]
    pub template_id: Option<i64>,
    /// Re-run aggregation for every station before rendering.
    #[serde(default)]
    pub refresh: bool,
}

// ---

pub struct MonitoringService<S: ?Sized> {
    store: Arc<S>,
    settings: ServiceSettings,
}

impl<S: ?Sized> Clone for MonitoringService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings,
        }
    }
}

impl<S> MonitoringService<S>
where
    S: Store + ?Sized,
{
    // ---
    pub fn new(store: Arc<S>, settings: ServiceSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> ServiceSettings {
        self.settings
    }

    /// Run `op`, retrying once if it fails with a storage error.
    async fn with_retry<T, F, Fut>(&self, name: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // ---
        match op().await {
            Err(err) if err.is_retryable() => {
                warn!(operation = name, error = %err, "Storage error, retrying once");
                op().await
            }
            other => other,
        }
    }

    // ---
    // Readings

    /// Store a reading and classify it before returning.
    ///
    /// The sensor must be installed at the station and the station must
    /// belong to the region; a reading attributed elsewhere could never be
    /// aggregated.
    pub async fn ingest_reading(&self, caller: &Caller, reading: NewReading) -> Result<Classification> {
        // ---
        caller.require(Access::Write)?;
        reading.measurements.validate()?;

        let store = self.store.as_ref();
        let scope = Scope {
            region_id: reading.region_id,
            station_id: reading.station_id,
            sensor_id: Some(reading.sensor_id),
        };
        let scope = &scope;
        self.with_retry("check_scope", move || aggregator::check_scope(store, scope))
            .await?;

        let reading = &reading;
        let outcome = self
            .with_retry("ingest_reading", move || store.insert_reading(reading))
            .await?;
        classifier::log_outcome("ingested", &outcome);
        Ok(outcome)
    }

    pub async fn list_readings(&self, caller: &Caller, mut filter: ReadingFilter) -> Result<Vec<Reading>> {
        // ---
        caller.require(Access::Read)?;
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(Error::validation("time range start is after its end"));
            }
        }
        filter.limit = Some(filter.limit.unwrap_or(MAX_LIST_LIMIT).min(MAX_LIST_LIMIT));

        let store = self.store.as_ref();
        let filter = &filter;
        self.with_retry("list_readings", move || store.list_readings(filter))
            .await
    }

    pub async fn reading(&self, caller: &Caller, id: i64) -> Result<(Reading, Vec<Anomaly>)> {
        // ---
        caller.require(Access::Read)?;
        let store = self.store.as_ref();
        let reading = self
            .with_retry("reading", move || store.reading(id))
            .await?
            .ok_or_else(|| reading_not_found(id))?;
        let anomalies = self
            .with_retry("anomalies_for", move || store.anomalies_for(id))
            .await?;
        Ok((reading, anomalies))
    }

    /// Replace a reading's measurements; the update re-runs classification.
    pub async fn correct_reading(
        &self,
        caller: &Caller,
        id: i64,
        measurements: Measurements,
    ) -> Result<Classification> {
        // ---
        caller.require(Access::Write)?;
        measurements.validate()?;

        let store = self.store.as_ref();
        let measurements = &measurements;
        let outcome = self
            .with_retry("correct_reading", move || {
                store.correct_reading(id, measurements)
            })
            .await?
            .ok_or_else(|| reading_not_found(id))?;
        classifier::log_outcome("corrected", &outcome);
        Ok(outcome)
    }

    /// Request a validity flag. The flag is derived from the anomaly rules:
    /// a request the rules disagree with is refused before anything is
    /// written, and an agreeing request leaves the reading's anomalies (and
    /// their processing state) alone unless the stored flag is stale.
    pub async fn update_reading_status(
        &self,
        caller: &Caller,
        id: i64,
        requested: ValidityFlag,
    ) -> Result<Classification> {
        // ---
        caller.require(Access::Write)?;
        let store = self.store.as_ref();
        let reading = self
            .with_retry("reading", move || store.reading(id))
            .await?
            .ok_or_else(|| reading_not_found(id))?;

        let findings = classifier::evaluate(&reading.measurements);
        let derived = classifier::validity_for(&findings);
        if derived != requested {
            return Err(Error::Conflict(format!(
                "reading {} classifies as {} ({} rule violations); correct its measurements instead",
                id,
                derived,
                findings.len()
            )));
        }

        if reading.validity == derived {
            let anomalies = self
                .with_retry("anomalies_for", move || store.anomalies_for(id))
                .await?;
            return Ok(Classification {
                reading_id: id,
                validity: derived,
                anomalies,
            });
        }

        let outcome = self
            .with_retry("update_reading_status", move || store.reclassify(id))
            .await?
            .ok_or_else(|| reading_not_found(id))?;
        classifier::log_outcome("re-validated", &outcome);
        Ok(outcome)
    }

    /// Delete a reading; its anomalies are removed with it.
    pub async fn delete_reading(&self, caller: &Caller, id: i64) -> Result<()> {
        // ---
        caller.require(Access::Admin)?;
        let store = self.store.as_ref();
        let deleted = self
            .with_retry("delete_reading", move || store.delete_reading(id))
            .await?;
        if !deleted {
            return Err(reading_not_found(id));
        }
        info!(reading_id = id, by = caller.display_name(), "Reading deleted");
        Ok(())
    }

    /// Re-run classification over `ids`, or over every reading.
    pub async fn reclassify(&self, caller: &Caller, ids: Option<Vec<i64>>) -> Result<ClassifySummary> {
        // ---
        caller.require(Access::Write)?;
        let store = self.store.as_ref();
        let ids = ids.as_deref();
        self.with_retry("reclassify", move || classifier::classify(store, ids))
            .await
    }

    pub async fn latest_readings(&self, caller: &Caller) -> Result<Vec<LatestReading>> {
        // ---
        caller.require(Access::Read)?;
        let store = self.store.as_ref();
        self.with_retry("latest_readings", move || store.latest_readings())
            .await
    }

    // ---
    // Statistics

    /// Compute and store the statistic for one scope and period.
    ///
    /// Returns `false` when no valid reading fell into the period, in which
    /// case nothing was written.
    pub async fn run_aggregation(
        &self,
        caller: &Caller,
        scope: Scope,
        period: Period,
        period_date: NaiveDate,
    ) -> Result<bool> {
        // ---
        caller.require(Access::Write)?;
        let store = self.store.as_ref();
        let scope = &scope;
        let stored = self
            .with_retry("run_aggregation", move || {
                aggregator::aggregate(store, scope, period, period_date)
            })
            .await?;
        Ok(stored.is_some())
    }

    pub async fn list_statistics(
        &self,
        caller: &Caller,
        filter: StatisticsFilter,
    ) -> Result<Vec<PeriodicStatistic>> {
        // ---
        caller.require(Access::Read)?;
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(Error::validation("date range start is after its end"));
            }
        }
        let store = self.store.as_ref();
        let filter = &filter;
        self.with_retry("list_statistics", move || store.list_statistics(filter))
            .await
    }

    pub async fn trend(&self, caller: &Caller, station_id: i64, days: Option<u32>) -> Result<Vec<DailyTrend>> {
        // ---
        caller.require(Access::Read)?;
        let days = self.lookback(days, self.settings.trend_days)?;
        let store = self.store.as_ref();
        self.with_retry("trend", move || aggregator::trend(store, station_id, days))
            .await
    }

    pub async fn air_quality(
        &self,
        caller: &Caller,
        station_id: i64,
        days: Option<u32>,
    ) -> Result<Vec<DailyAirQuality>> {
        // ---
        caller.require(Access::Read)?;
        let days = self.lookback(days, self.settings.trend_days)?;
        let store = self.store.as_ref();
        self.with_retry("air_quality", move || {
            aggregator::air_quality(store, station_id, days)
        })
        .await
    }

    // ---
    // Reports

    /// Render and store a report for one period.
    pub async fn generate_report(&self, caller: &Caller, request: ReportRequest) -> Result<GeneratedReport> {
        // ---
        caller.require(Access::Write)?;
        let window = request.period.window()?;

        if request.refresh {
            self.refresh_period(window.period, window.start).await?;
        }

        let store = self.store.as_ref();
        let descriptor = &request.period;
        let template_id = request.template_id;
        let generated_by = caller.display_name();
        self.with_retry("generate_report", move || {
            report::generate(store, descriptor, template_id, generated_by)
        })
        .await
    }

    /// Aggregate every station for one period ahead of a report.
    async fn refresh_period(&self, period: Period, anchor: NaiveDate) -> Result<()> {
        // ---
        let store = self.store.as_ref();
        let stations = self.with_retry("stations", move || store.stations()).await?;
        let mut updated = 0usize;
        for station in &stations {
            let scope = Scope {
                region_id: station.region_id,
                station_id: station.id,
                sensor_id: None,
            };
            let scope = &scope;
            let stored = self
                .with_retry("refresh_period", move || {
                    aggregator::aggregate(store, scope, period, anchor)
                })
                .await?;
            updated += usize::from(stored.is_some());
        }
        info!(period = %period, anchor = %anchor, stations = stations.len(), updated, "Period refreshed");
        Ok(())
    }

    pub async fn report(&self, caller: &Caller, id: i64) -> Result<Report> {
        // ---
        caller.require(Access::Read)?;
        let store = self.store.as_ref();
        self.with_retry("report", move || store.report(id))
            .await?
            .ok_or_else(|| Error::not_found(format!("report {id} not found")))
    }

    // ---
    // Anomalies

    /// Anomaly counts by station and kind inside the window.
    pub async fn list_anomalies(&self, caller: &Caller, window: AnomalyWindow) -> Result<Vec<AnomalyCount>> {
        // ---
        caller.require(Access::Read)?;
        let (from, to) = self.resolve_window(window)?;
        let store = self.store.as_ref();
        self.with_retry("list_anomalies", move || store.anomaly_counts(from, to))
            .await
    }

    pub async fn process_anomaly(
        &self,
        caller: &Caller,
        id: i64,
        status: ProcessingStatus,
    ) -> Result<Anomaly> {
        // ---
        caller.require(Access::Write)?;
        let store = self.store.as_ref();
        let by = caller.display_name();
        let anomaly = self
            .with_retry("process_anomaly", move || {
                store.process_anomaly(id, status, Some(by))
            })
            .await?
            .ok_or_else(|| Error::not_found(format!("anomaly {id} not found")))?;
        info!(anomaly_id = id, status = %status, by, "Anomaly processing updated");
        Ok(anomaly)
    }

    pub async fn system_status(&self, caller: &Caller) -> Result<SystemStatus> {
        // ---
        caller.require(Access::Read)?;
        let today = Utc::now().date_naive();
        let start = midnight(today);
        let end = start + Duration::days(1);
        let store = self.store.as_ref();
        self.with_retry("system_status", move || store.system_status(start, end))
            .await
    }

    // ---

    fn lookback(&self, days: Option<u32>, default: u32) -> Result<u32> {
        // ---
        match days.unwrap_or(default) {
            0 => Err(Error::validation("look-back window must be at least one day")),
            d if d > 3660 => Err(Error::validation("look-back window is limited to ten years")),
            d => Ok(d),
        }
    }

    fn resolve_window(&self, window: AnomalyWindow) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        // ---
        let now = Utc::now();
        let to = window.to.unwrap_or(now);
        let from = match window.from {
            Some(from) => from,
            None => {
                let days = self.lookback(window.days, self.settings.anomaly_window_days)?;
                to - Duration::days(i64::from(days))
            }
        };
        if from > to {
            return Err(Error::validation("anomaly window start is after its end"));
        }
        Ok((from, to))
    }
}

fn reading_not_found(id: i64) -> Error {
    Error::not_found(format!("reading {id} not found"))
}
