//! In-process [`Store`] with the same semantics as the Postgres backend.
//!
//! One mutex guards all tables, which makes every method trivially atomic.
//! Topology is provisioned through the inherent `add_*` methods. Storage
//! failures can be injected with [`MemoryStore::fail_next`] to exercise the
//! façade's retry path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use super::Store;
use crate::{
    classifier,
    models::{
        Anomaly, AnomalyCount, AnomalyKind, Classification, LatestReading, Measurements,
        NewReading, NewReport, NewStatistic, PeriodicStatistic, ProcessingStatus, Reading,
        ReadingFilter, Region, Report, ReportTemplate, Sensor, Station, StationStatus,
        StatisticsFilter, SystemStatus, ValidityFlag,
    },
    Error, Result,
};

#[derive(Default)]
struct Tables {
    // ---
    last_id: i64,
    regions: BTreeMap<i64, Region>,
    stations: BTreeMap<i64, Station>,
    sensors: BTreeMap<i64, Sensor>,
    readings: BTreeMap<i64, Reading>,
    anomalies: BTreeMap<i64, Anomaly>,
    statistics: BTreeMap<i64, PeriodicStatistic>,
    templates: BTreeMap<i64, ReportTemplate>,
    reports: BTreeMap<i64, Report>,
}

impl Tables {
    // ---
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    /// Delete-and-regenerate the anomalies of one reading.
    fn classify(&mut self, reading_id: i64) -> Option<Classification> {
        // ---
        let measurements = self.readings.get(&reading_id)?.measurements.clone();
        self.anomalies.retain(|_, a| a.reading_id != reading_id);

        let findings = classifier::evaluate(&measurements);
        let validity = classifier::validity_for(&findings);
        let now = Utc::now();

        let mut anomalies = Vec::with_capacity(findings.len());
        for finding in findings {
            let anomaly = Anomaly {
                id: self.next_id(),
                reading_id,
                kind: finding.kind,
                description: finding.description,
                discovered_at: now,
                processing_status: ProcessingStatus::Unprocessed,
                processed_at: None,
                processed_by: None,
            };
            self.anomalies.insert(anomaly.id, anomaly.clone());
            anomalies.push(anomaly);
        }

        if let Some(reading) = self.readings.get_mut(&reading_id) {
            reading.validity = validity;
        }
        Some(Classification {
            reading_id,
            validity,
            anomalies,
        })
    }
}

/// In-memory store used by tests and local experiments.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_next: AtomicU32,
}

impl MemoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store calls fail with a storage error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    fn injected_fault(&self) -> Result<()> {
        // ---
        let tripped = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(Error::Storage("injected storage failure".to_string()))
        } else {
            Ok(())
        }
    }

    pub async fn add_region(&self, name: &str, region_type: &str) -> Region {
        // ---
        let mut t = self.tables.lock().await;
        let region = Region {
            id: t.next_id(),
            name: name.to_string(),
            region_type: region_type.to_string(),
            latitude: None,
            longitude: None,
            parent_id: None,
        };
        t.regions.insert(region.id, region.clone());
        region
    }

    pub async fn add_station(&self, region_id: i64, name: &str, status: StationStatus) -> Station {
        // ---
        let mut t = self.tables.lock().await;
        let station = Station {
            id: t.next_id(),
            region_id,
            name: name.to_string(),
            station_type: "weather".to_string(),
            latitude: 39.9042,
            longitude: 116.4074,
            altitude: None,
            status,
            installation_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
        };
        t.stations.insert(station.id, station.clone());
        station
    }

    pub async fn add_sensor(&self, station_id: i64, monitor_type: &str) -> Sensor {
        // ---
        let mut t = self.tables.lock().await;
        let sensor = Sensor {
            id: t.next_id(),
            station_id,
            model: "generic".to_string(),
            monitor_type: monitor_type.to_string(),
            status: "normal".to_string(),
        };
        t.sensors.insert(sensor.id, sensor.clone());
        sensor
    }

    /// Total anomaly rows, for invariant checks in tests.
    pub async fn anomaly_total(&self) -> usize {
        self.tables.lock().await.anomalies.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // ---
    async fn station(&self, id: i64) -> Result<Option<Station>> {
        self.injected_fault()?;
        Ok(self.tables.lock().await.stations.get(&id).cloned())
    }

    async fn stations(&self) -> Result<Vec<Station>> {
        self.injected_fault()?;
        let t = self.tables.lock().await;
        let mut stations: Vec<_> = t.stations.values().cloned().collect();
        stations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stations)
    }

    async fn sensor(&self, id: i64) -> Result<Option<Sensor>> {
        self.injected_fault()?;
        Ok(self.tables.lock().await.sensors.get(&id).cloned())
    }

    async fn insert_reading(&self, new: &NewReading) -> Result<Classification> {
        // ---
        self.injected_fault()?;
        let mut t = self.tables.lock().await;
        if !t.sensors.contains_key(&new.sensor_id)
            || !t.stations.contains_key(&new.station_id)
            || !t.regions.contains_key(&new.region_id)
        {
            return Err(Error::not_found(
                "referenced entity does not exist (sensor, station or region)",
            ));
        }

        let reading = Reading {
            id: t.next_id(),
            sensor_id: new.sensor_id,
            station_id: new.station_id,
            region_id: new.region_id,
            collected_at: new.collected_at,
            measurements: new.measurements.clone(),
            validity: ValidityFlag::Valid,
        };
        let id = reading.id;
        t.readings.insert(id, reading);
        t.classify(id)
            .ok_or_else(|| Error::Storage(format!("reading {id} vanished during insert")))
    }

    async fn correct_reading(
        &self,
        id: i64,
        measurements: &Measurements,
    ) -> Result<Option<Classification>> {
        // ---
        self.injected_fault()?;
        let mut t = self.tables.lock().await;
        let Some(reading) = t.readings.get_mut(&id) else {
            return Ok(None);
        };
        reading.measurements = measurements.clone();
        Ok(t.classify(id))
    }

    async fn reclassify(&self, id: i64) -> Result<Option<Classification>> {
        self.injected_fault()?;
        Ok(self.tables.lock().await.classify(id))
    }

    async fn reading(&self, id: i64) -> Result<Option<Reading>> {
        self.injected_fault()?;
        Ok(self.tables.lock().await.readings.get(&id).cloned())
    }

    async fn reading_ids(&self) -> Result<Vec<i64>> {
        self.injected_fault()?;
        Ok(self.tables.lock().await.readings.keys().copied().collect())
    }

    async fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        // ---
        self.injected_fault()?;
        let t = self.tables.lock().await;
        let mut readings: Vec<_> = t
            .readings
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        readings.sort_by_key(|r| (r.collected_at, r.id));
        if let Some(limit) = filter.limit {
            readings.truncate(limit as usize);
        }
        Ok(readings)
    }

    async fn delete_reading(&self, id: i64) -> Result<bool> {
        // ---
        self.injected_fault()?;
        let mut t = self.tables.lock().await;
        if t.readings.remove(&id).is_none() {
            return Ok(false);
        }
        t.anomalies.retain(|_, a| a.reading_id != id);
        Ok(true)
    }

    async fn latest_readings(&self) -> Result<Vec<LatestReading>> {
        // ---
        self.injected_fault()?;
        let t = self.tables.lock().await;
        let mut latest: Vec<LatestReading> = t
            .stations
            .values()
            .filter(|s| s.status == StationStatus::Normal)
            .filter_map(|s| {
                t.readings
                    .values()
                    .filter(|r| r.station_id == s.id)
                    .max_by_key(|r| (r.collected_at, r.id))
                    .map(|r| LatestReading {
                        station_name: s.name.clone(),
                        station_type: s.station_type.clone(),
                        reading: r.clone(),
                    })
            })
            .collect();
        latest.sort_by(|a, b| a.station_name.cmp(&b.station_name));
        Ok(latest)
    }

    async fn anomalies_for(&self, reading_id: i64) -> Result<Vec<Anomaly>> {
        // ---
        self.injected_fault()?;
        let t = self.tables.lock().await;
        Ok(t.anomalies
            .values()
            .filter(|a| a.reading_id == reading_id)
            .cloned()
            .collect())
    }

    async fn process_anomaly(
        &self,
        id: i64,
        status: ProcessingStatus,
        processed_by: Option<&str>,
    ) -> Result<Option<Anomaly>> {
        // ---
        self.injected_fault()?;
        let mut t = self.tables.lock().await;
        let Some(anomaly) = t.anomalies.get_mut(&id) else {
            return Ok(None);
        };
        anomaly.processing_status = status;
        if status == ProcessingStatus::Unprocessed {
            anomaly.processed_at = None;
            anomaly.processed_by = None;
        } else {
            anomaly.processed_at = Some(Utc::now());
            anomaly.processed_by = processed_by.map(str::to_string);
        }
        Ok(Some(anomaly.clone()))
    }

    async fn anomaly_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AnomalyCount>> {
        // ---
        self.injected_fault()?;
        let t = self.tables.lock().await;
        let mut groups: BTreeMap<(i64, AnomalyKind), i64> = BTreeMap::new();
        for a in t.anomalies.values() {
            if a.discovered_at < from || a.discovered_at >= to {
                continue;
            }
            if let Some(r) = t.readings.get(&a.reading_id) {
                *groups.entry((r.station_id, a.kind)).or_default() += 1;
            }
        }

        let mut counts: Vec<AnomalyCount> = groups
            .into_iter()
            .filter_map(|((station_id, kind), count)| {
                t.stations.get(&station_id).map(|s| AnomalyCount {
                    station_id,
                    station_name: s.name.clone(),
                    kind,
                    count,
                })
            })
            .collect();
        counts.sort_by(|a, b| {
            a.station_name
                .cmp(&b.station_name)
                .then(b.count.cmp(&a.count))
                .then(a.kind.cmp(&b.kind))
        });
        Ok(counts)
    }

    async fn upsert_statistic(&self, stat: &NewStatistic) -> Result<PeriodicStatistic> {
        // ---
        self.injected_fault()?;
        let mut t = self.tables.lock().await;
        let existing = t
            .statistics
            .values()
            .find(|s| {
                s.station_id == stat.scope.station_id
                    && s.period == stat.period
                    && s.period_date == stat.period_date
            })
            .map(|s| s.id);
        let id = match existing {
            Some(id) => id,
            None => t.next_id(),
        };

        let row = PeriodicStatistic {
            id,
            region_id: stat.scope.region_id,
            station_id: stat.scope.station_id,
            sensor_id: stat.scope.sensor_id,
            period: stat.period,
            period_date: stat.period_date,
            figures: stat.figures.clone(),
            source: stat.source.clone(),
            computed_at: Utc::now(),
        };
        t.statistics.insert(id, row.clone());
        Ok(row)
    }

    async fn list_statistics(&self, filter: &StatisticsFilter) -> Result<Vec<PeriodicStatistic>> {
        // ---
        self.injected_fault()?;
        let t = self.tables.lock().await;
        let mut rows: Vec<_> = t
            .statistics
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        rows.sort_by_key(|s| (s.period_date, s.station_id, s.period));
        Ok(rows)
    }

    async fn template(&self, id: i64) -> Result<Option<ReportTemplate>> {
        self.injected_fault()?;
        Ok(self.tables.lock().await.templates.get(&id).cloned())
    }

    async fn template_get_or_create(
        &self,
        name: &str,
        template_type: &str,
        content: &str,
    ) -> Result<ReportTemplate> {
        // ---
        self.injected_fault()?;
        let mut t = self.tables.lock().await;
        if let Some(existing) = t.templates.values().find(|tpl| tpl.name == name) {
            return Ok(existing.clone());
        }
        let template = ReportTemplate {
            id: t.next_id(),
            name: name.to_string(),
            template_type: template_type.to_string(),
            content: content.to_string(),
        };
        t.templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn insert_report(&self, new: &NewReport) -> Result<Report> {
        // ---
        self.injected_fault()?;
        let mut t = self.tables.lock().await;
        if !t.templates.contains_key(&new.template_id) {
            return Err(Error::not_found(format!(
                "report template {} not found",
                new.template_id
            )));
        }
        let report = Report {
            id: t.next_id(),
            template_id: new.template_id,
            name: new.name.clone(),
            content: new.content.clone(),
            generated_at: Utc::now(),
            generated_by: new.generated_by.clone(),
        };
        t.reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn report(&self, id: i64) -> Result<Option<Report>> {
        self.injected_fault()?;
        Ok(self.tables.lock().await.reports.get(&id).cloned())
    }

    async fn system_status(
        &self,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> Result<SystemStatus> {
        // ---
        self.injected_fault()?;
        let t = self.tables.lock().await;
        let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        Ok(SystemStatus {
            station_count: count(t.stations.len()),
            normal_station_count: count(
                t.stations
                    .values()
                    .filter(|s| s.status == StationStatus::Normal)
                    .count(),
            ),
            today_reading_count: count(
                t.readings
                    .values()
                    .filter(|r| r.collected_at >= day_start && r.collected_at < day_end)
                    .count(),
            ),
            unprocessed_anomaly_count: count(
                t.anomalies
                    .values()
                    .filter(|a| a.processing_status == ProcessingStatus::Unprocessed)
                    .count(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::period::Period;
    use crate::models::{Figures, Scope};
    use chrono::TimeZone;

    async fn seeded() -> (MemoryStore, Station, Sensor) {
        // ---
        let store = MemoryStore::new();
        let region = store.add_region("North Forest", "forest").await;
        let station = store
            .add_station(region.id, "Station 1", StationStatus::Normal)
            .await;
        let sensor = store.add_sensor(station.id, "weather").await;
        (store, station, sensor)
    }

    fn new_reading(station: &Station, sensor: &Sensor, temperature: f64) -> NewReading {
        // ---
        NewReading {
            sensor_id: sensor.id,
            station_id: station.id,
            region_id: station.region_id,
            collected_at: Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap(),
            measurements: Measurements {
                temperature: Some(temperature),
                ..Measurements::default()
            },
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_unknown_topology() {
        // ---
        let (store, station, mut sensor) = seeded().await;
        sensor.id = 9_999;
        let err = store
            .insert_reading(&new_reading(&station, &sensor, 20.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_correction_regenerates_anomalies() {
        // ---
        let (store, station, sensor) = seeded().await;
        let hot = store
            .insert_reading(&new_reading(&station, &sensor, 45.0))
            .await
            .unwrap();
        assert_eq!(hot.validity, ValidityFlag::Invalid);
        assert_eq!(store.anomaly_total().await, 1);

        let fixed = store
            .correct_reading(
                hot.reading_id,
                &Measurements {
                    temperature: Some(25.0),
                    ..Measurements::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fixed.validity, ValidityFlag::Valid);
        assert!(fixed.anomalies.is_empty());
        assert_eq!(store.anomaly_total().await, 0);
    }

    #[tokio::test]
    async fn test_statistic_upsert_keeps_key_unique() {
        // ---
        let (store, station, _) = seeded().await;
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let mut stat = NewStatistic {
            scope: Scope {
                region_id: station.region_id,
                station_id: station.id,
                sensor_id: None,
            },
            period: Period::Month,
            period_date: date,
            figures: Figures {
                data_count: 1,
                ..Figures::default()
            },
            source: "automatic".into(),
        };
        let first = store.upsert_statistic(&stat).await.unwrap();
        stat.figures.data_count = 5;
        let second = store.upsert_statistic(&stat).await.unwrap();

        assert_eq!(first.id, second.id);
        let rows = store
            .list_statistics(&StatisticsFilter::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].figures.data_count, 5);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        // ---
        let (store, station, _) = seeded().await;
        store.fail_next(1);
        assert!(store.station(station.id).await.is_err());
        assert!(store.station(station.id).await.unwrap().is_some());
    }
}
