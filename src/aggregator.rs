//! Periodic statistics over valid readings.
//!
//! [`aggregate`] selects the valid readings of one scope inside one calendar
//! window, folds them into [`Figures`] and upserts the result under
//! `(station_id, period, period_date)`. Re-running it on an unchanged reading
//! set rewrites the same values. An empty window writes nothing, so good
//! historical rows are never replaced with nulls.
//!
//! The daily trend and air-quality series reuse the same fold per calendar day.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use crate::{
    models::{
        DailyAirQuality, DailyTrend, Figures, Measurements, NewStatistic, PeriodicStatistic,
        Reading, ReadingFilter, Scope, ValidityFlag,
    },
    period::{Period, PeriodWindow},
    store::Store,
    Error, Result,
};

/// `source` column value for rows written by this module.
pub const SOURCE_AUTOMATIC: &str = "automatic";

// ---

/// Running mean/extremes/sum for one optional field.
#[derive(Debug, Clone, Copy, Default)]
struct Acc {
    n: u64,
    sum: f64,
    max: Option<f64>,
    min: Option<f64>,
}

impl Acc {
    // ---
    fn push(&mut self, value: Option<f64>) {
        // ---
        let Some(v) = value else { return };
        self.n += 1;
        self.sum += v;
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
    }

    fn avg(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }

    fn total(&self) -> Option<f64> {
        (self.n > 0).then_some(self.sum)
    }
}

#[derive(Debug, Default)]
struct FieldAccs {
    count: i64,
    temperature: Acc,
    humidity: Acc,
    rainfall: Acc,
    wind_speed: Acc,
    pm25: Acc,
    pm10: Acc,
}

impl FieldAccs {
    // ---
    fn push(&mut self, m: &Measurements) {
        // ---
        self.count += 1;
        self.temperature.push(m.temperature);
        self.humidity.push(m.humidity);
        self.rainfall.push(m.rainfall);
        self.wind_speed.push(m.wind_speed);
        self.pm25.push(m.pm25);
        self.pm10.push(m.pm10);
    }

    fn figures(&self) -> Figures {
        // ---
        Figures {
            data_count: self.count,
            avg_temperature: self.temperature.avg(),
            max_temperature: self.temperature.max,
            min_temperature: self.temperature.min,
            avg_humidity: self.humidity.avg(),
            max_humidity: self.humidity.max,
            min_humidity: self.humidity.min,
            total_rainfall: self.rainfall.total(),
            avg_wind_speed: self.wind_speed.avg(),
            max_wind_speed: self.wind_speed.max,
            avg_pm25: self.pm25.avg(),
            avg_pm10: self.pm10.avg(),
        }
    }
}

/// Fold readings into figures; `None` when there are no readings at all.
pub fn fold<'a, I>(readings: I) -> Option<Figures>
where
    I: IntoIterator<Item = &'a Reading>,
{
    // ---
    let mut accs = FieldAccs::default();
    for r in readings {
        accs.push(&r.measurements);
    }
    (accs.count > 0).then(|| accs.figures())
}

/// Group readings by UTC calendar day and fold each day.
pub fn fold_daily(readings: &[Reading]) -> BTreeMap<NaiveDate, Figures> {
    // ---
    let mut days: BTreeMap<NaiveDate, FieldAccs> = BTreeMap::new();
    for r in readings {
        days.entry(r.collected_at.date_naive())
            .or_default()
            .push(&r.measurements);
    }
    days.into_iter().map(|(d, accs)| (d, accs.figures())).collect()
}

// ---

/// Compute and upsert the statistic for `scope` over the period containing `anchor`.
///
/// Returns the stored row, or `None` when no valid reading matched.
pub async fn aggregate<S>(
    store: &S,
    scope: &Scope,
    period: Period,
    anchor: NaiveDate,
) -> Result<Option<PeriodicStatistic>>
where
    S: Store + ?Sized,
{
    // ---
    check_scope(store, scope).await?;
    let window = period.window(anchor)?;

    let readings = store.list_readings(&scope_filter(scope, &window)).await?;
    let Some(figures) = fold(&readings) else {
        debug!(
            station_id = scope.station_id,
            period = %period,
            period_date = %window.start,
            "No valid readings in window, statistic left untouched"
        );
        return Ok(None);
    };

    let stat = store
        .upsert_statistic(&NewStatistic {
            scope: *scope,
            period,
            period_date: window.start,
            figures,
            source: SOURCE_AUTOMATIC.to_string(),
        })
        .await?;

    info!(
        station_id = scope.station_id,
        region_id = scope.region_id,
        sensor_id = ?scope.sensor_id,
        period = %period,
        period_date = %window.start,
        data_count = stat.figures.data_count,
        "Statistic upserted"
    );
    Ok(Some(stat))
}

/// Station must exist and belong to the scope's region; a sensor, when
/// given, must be installed at that station.
pub(crate) async fn check_scope<S>(store: &S, scope: &Scope) -> Result<()>
where
    S: Store + ?Sized,
{
    // ---
    let station = store
        .station(scope.station_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("station {} not found", scope.station_id)))?;
    if station.region_id != scope.region_id {
        return Err(Error::validation(format!(
            "station {} belongs to region {}, not {}",
            station.id, station.region_id, scope.region_id
        )));
    }

    if let Some(sensor_id) = scope.sensor_id {
        let sensor = store
            .sensor(sensor_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("sensor {sensor_id} not found")))?;
        if sensor.station_id != station.id {
            return Err(Error::validation(format!(
                "sensor {} is installed at station {}, not {}",
                sensor.id, sensor.station_id, station.id
            )));
        }
    }
    Ok(())
}

fn scope_filter(scope: &Scope, window: &PeriodWindow) -> ReadingFilter {
    // ---
    ReadingFilter {
        region_id: Some(scope.region_id),
        station_id: Some(scope.station_id),
        sensor_id: scope.sensor_id,
        from: Some(window.start_utc()),
        to: Some(window.end_utc()),
        validity: Some(ValidityFlag::Valid),
        limit: None,
    }
}

// ---

/// Valid readings of one station from `days` days ago (midnight) until now.
async fn recent_valid<S>(store: &S, station_id: i64, days: u32) -> Result<Vec<Reading>>
where
    S: Store + ?Sized,
{
    // ---
    store
        .station(station_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("station {station_id} not found")))?;

    let today = Utc::now().date_naive();
    let since = today - chrono::Duration::days(i64::from(days));
    store
        .list_readings(&ReadingFilter {
            station_id: Some(station_id),
            from: Some(crate::period::midnight(since)),
            validity: Some(ValidityFlag::Valid),
            ..ReadingFilter::default()
        })
        .await
}

/// Per-day average temperature/humidity and total rainfall.
pub async fn trend<S>(store: &S, station_id: i64, days: u32) -> Result<Vec<DailyTrend>>
where
    S: Store + ?Sized,
{
    // ---
    let readings = recent_valid(store, station_id, days).await?;
    Ok(fold_daily(&readings)
        .into_iter()
        .map(|(date, f)| DailyTrend {
            date,
            avg_temperature: f.avg_temperature,
            avg_humidity: f.avg_humidity,
            total_rainfall: f.total_rainfall,
        })
        .collect())
}

/// Per-day average PM2.5 and PM10.
pub async fn air_quality<S>(store: &S, station_id: i64, days: u32) -> Result<Vec<DailyAirQuality>>
where
    S: Store + ?Sized,
{
    // ---
    let readings = recent_valid(store, station_id, days).await?;
    Ok(fold_daily(&readings)
        .into_iter()
        .map(|(date, f)| DailyAirQuality {
            date,
            avg_pm25: f.avg_pm25,
            avg_pm10: f.avg_pm10,
        })
        .collect())
}
