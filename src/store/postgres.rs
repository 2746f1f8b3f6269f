//! PostgreSQL-backed [`Store`].
//!
//! Reading writes run in one transaction that locks the reading row
//! (`SELECT ... FOR UPDATE`), so two writers of the same reading serialize
//! while different readings proceed in parallel. Statistic upserts rely on the
//! `(station_id, period, period_date)` unique constraint and `ON CONFLICT`.
//! Cascade from readings to anomalies is enforced by the foreign key.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::Store;
use crate::{
    classifier,
    models::{
        Anomaly, AnomalyCount, Classification, Figures, LatestReading, Measurements, NewReading,
        NewReport, NewStatistic, PeriodicStatistic, ProcessingStatus, Reading, ReadingFilter,
        Report, ReportTemplate, Sensor, Station, StatisticsFilter, SystemStatus,
    },
    Error, Result,
};

// ---

macro_rules! reading_columns {
    () => {
        "id, sensor_id, station_id, region_id, collected_at, temperature, humidity, \
         wind_speed, wind_direction, rainfall, sunshine_duration, soil_temperature, \
         soil_humidity, soil_ph, pm25, pm10, validity"
    };
}

macro_rules! anomaly_columns {
    () => {
        "id, reading_id, kind, description, discovered_at, processing_status, \
         processed_at, processed_by"
    };
}

macro_rules! statistic_columns {
    () => {
        "id, region_id, station_id, sensor_id, period, period_date, data_count, \
         avg_temperature, max_temperature, min_temperature, avg_humidity, max_humidity, \
         min_humidity, total_rainfall, avg_wind_speed, max_wind_speed, avg_pm25, avg_pm10, \
         source, computed_at"
    };
}

macro_rules! station_columns {
    () => {
        "id, region_id, name, station_type, latitude, longitude, altitude, status, \
         installation_date"
    };
}

/// Parse a text column into one of the model enums. A value the CHECK
/// constraints should have rejected is a storage fault, not bad input.
fn decode<T>(column: &str, value: &str) -> Result<T>
where
    T: FromStr<Err = Error>,
{
    value
        .parse()
        .map_err(|_| Error::Storage(format!("unexpected {column} value '{value}' in database")))
}

#[derive(sqlx::FromRow)]
struct ReadingRow {
    // ---
    id: i64,
    sensor_id: i64,
    station_id: i64,
    region_id: i64,
    collected_at: DateTime<Utc>,
    #[sqlx(flatten)]
    measurements: Measurements,
    validity: String,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = Error;

    fn try_from(row: ReadingRow) -> Result<Self> {
        // ---
        Ok(Reading {
            id: row.id,
            sensor_id: row.sensor_id,
            station_id: row.station_id,
            region_id: row.region_id,
            collected_at: row.collected_at,
            measurements: row.measurements,
            validity: decode("validity", &row.validity)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LatestRow {
    station_name: String,
    station_type: String,
    #[sqlx(flatten)]
    reading: ReadingRow,
}

#[derive(sqlx::FromRow)]
struct AnomalyRow {
    // ---
    id: i64,
    reading_id: i64,
    kind: String,
    description: String,
    discovered_at: DateTime<Utc>,
    processing_status: String,
    processed_at: Option<DateTime<Utc>>,
    processed_by: Option<String>,
}

impl TryFrom<AnomalyRow> for Anomaly {
    type Error = Error;

    fn try_from(row: AnomalyRow) -> Result<Self> {
        // ---
        Ok(Anomaly {
            id: row.id,
            reading_id: row.reading_id,
            kind: decode("kind", &row.kind)?,
            description: row.description,
            discovered_at: row.discovered_at,
            processing_status: decode("processing_status", &row.processing_status)?,
            processed_at: row.processed_at,
            processed_by: row.processed_by,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AnomalyCountRow {
    station_id: i64,
    station_name: String,
    kind: String,
    count: i64,
}

#[derive(sqlx::FromRow)]
struct StatisticRow {
    // ---
    id: i64,
    region_id: i64,
    station_id: i64,
    sensor_id: Option<i64>,
    period: String,
    period_date: NaiveDate,
    #[sqlx(flatten)]
    figures: Figures,
    source: String,
    computed_at: DateTime<Utc>,
}

impl TryFrom<StatisticRow> for PeriodicStatistic {
    type Error = Error;

    fn try_from(row: StatisticRow) -> Result<Self> {
        // ---
        Ok(PeriodicStatistic {
            id: row.id,
            region_id: row.region_id,
            station_id: row.station_id,
            sensor_id: row.sensor_id,
            period: decode("period", &row.period)?,
            period_date: row.period_date,
            figures: row.figures,
            source: row.source,
            computed_at: row.computed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StationRow {
    // ---
    id: i64,
    region_id: i64,
    name: String,
    station_type: String,
    latitude: f64,
    longitude: f64,
    altitude: Option<f64>,
    status: String,
    installation_date: NaiveDate,
}

impl TryFrom<StationRow> for Station {
    type Error = Error;

    fn try_from(row: StationRow) -> Result<Self> {
        // ---
        Ok(Station {
            id: row.id,
            region_id: row.region_id,
            name: row.name,
            station_type: row.station_type,
            latitude: row.latitude,
            longitude: row.longitude,
            altitude: row.altitude,
            status: decode("status", &row.status)?,
            installation_date: row.installation_date,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ---

/// Production store over a shared sqlx connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Delete-and-regenerate anomalies for one reading inside `tx`.
    async fn classify_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
    ) -> Result<Option<Classification>> {
        // ---
        let row: Option<ReadingRow> = sqlx::query_as(concat!(
            "SELECT ",
            reading_columns!(),
            " FROM readings WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let reading = Reading::try_from(row)?;

        sqlx::query("DELETE FROM anomalies WHERE reading_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        let findings = classifier::evaluate(&reading.measurements);
        let validity = classifier::validity_for(&findings);

        let mut anomalies = Vec::with_capacity(findings.len());
        for finding in &findings {
            let row: AnomalyRow = sqlx::query_as(concat!(
                "INSERT INTO anomalies (reading_id, kind, description) VALUES ($1, $2, $3) RETURNING ",
                anomaly_columns!()
            ))
            .bind(id)
            .bind(finding.kind.as_str())
            .bind(&finding.description)
            .fetch_one(&mut **tx)
            .await?;
            anomalies.push(Anomaly::try_from(row)?);
        }

        sqlx::query("UPDATE readings SET validity = $1 WHERE id = $2")
            .bind(validity.as_str())
            .bind(id)
            .execute(&mut **tx)
            .await?;

        Ok(Some(Classification {
            reading_id: id,
            validity,
            anomalies,
        }))
    }
}

#[async_trait]
impl Store for PgStore {
    // ---
    async fn station(&self, id: i64) -> Result<Option<Station>> {
        // ---
        let row: Option<StationRow> = sqlx::query_as(concat!(
            "SELECT ",
            station_columns!(),
            " FROM stations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Station::try_from).transpose()
    }

    async fn stations(&self) -> Result<Vec<Station>> {
        // ---
        let rows: Vec<StationRow> = sqlx::query_as(concat!(
            "SELECT ",
            station_columns!(),
            " FROM stations ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn sensor(&self, id: i64) -> Result<Option<Sensor>> {
        // ---
        let sensor = sqlx::query_as::<_, Sensor>(
            "SELECT id, station_id, model, monitor_type, status FROM sensors WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sensor)
    }

    async fn insert_reading(&self, new: &NewReading) -> Result<Classification> {
        // ---
        let m = &new.measurements;
        let mut tx = self.pool.begin().await?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO readings (
                sensor_id, station_id, region_id, collected_at,
                temperature, humidity, wind_speed, wind_direction, rainfall,
                sunshine_duration, soil_temperature, soil_humidity, soil_ph, pm25, pm10
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING id
            "#,
        )
        .bind(new.sensor_id)
        .bind(new.station_id)
        .bind(new.region_id)
        .bind(new.collected_at)
        .bind(m.temperature)
        .bind(m.humidity)
        .bind(m.wind_speed)
        .bind(&m.wind_direction)
        .bind(m.rainfall)
        .bind(m.sunshine_duration)
        .bind(m.soil_temperature)
        .bind(m.soil_humidity)
        .bind(m.soil_ph)
        .bind(m.pm25)
        .bind(m.pm10)
        .fetch_one(&mut *tx)
        .await?;

        let outcome = Self::classify_in_tx(&mut tx, id)
            .await?
            .ok_or_else(|| Error::Storage(format!("reading {id} vanished during insert")))?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn correct_reading(
        &self,
        id: i64,
        m: &Measurements,
    ) -> Result<Option<Classification>> {
        // ---
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE readings SET
                temperature = $2, humidity = $3, wind_speed = $4, wind_direction = $5,
                rainfall = $6, sunshine_duration = $7, soil_temperature = $8,
                soil_humidity = $9, soil_ph = $10, pm25 = $11, pm10 = $12
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(m.temperature)
        .bind(m.humidity)
        .bind(m.wind_speed)
        .bind(&m.wind_direction)
        .bind(m.rainfall)
        .bind(m.sunshine_duration)
        .bind(m.soil_temperature)
        .bind(m.soil_humidity)
        .bind(m.soil_ph)
        .bind(m.pm25)
        .bind(m.pm10)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let outcome = Self::classify_in_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn reclassify(&self, id: i64) -> Result<Option<Classification>> {
        // ---
        let mut tx = self.pool.begin().await?;
        let outcome = Self::classify_in_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn reading(&self, id: i64) -> Result<Option<Reading>> {
        // ---
        let row: Option<ReadingRow> = sqlx::query_as(concat!(
            "SELECT ",
            reading_columns!(),
            " FROM readings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Reading::try_from).transpose()
    }

    async fn reading_ids(&self) -> Result<Vec<i64>> {
        // ---
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM readings ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        // ---
        let rows: Vec<ReadingRow> = sqlx::query_as(concat!(
            "SELECT ",
            reading_columns!(),
            r#"
            FROM readings
            WHERE ($1::BIGINT IS NULL OR region_id = $1)
              AND ($2::BIGINT IS NULL OR station_id = $2)
              AND ($3::BIGINT IS NULL OR sensor_id = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR collected_at >= $4)
              AND ($5::TIMESTAMPTZ IS NULL OR collected_at < $5)
              AND ($6::TEXT IS NULL OR validity = $6)
            ORDER BY collected_at, id
            LIMIT $7
            "#
        ))
        .bind(filter.region_id)
        .bind(filter.station_id)
        .bind(filter.sensor_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.validity.map(|v| v.as_str()))
        .bind(filter.limit.map(i64::from))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn delete_reading(&self, id: i64) -> Result<bool> {
        // ---
        let done = sqlx::query("DELETE FROM readings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn latest_readings(&self) -> Result<Vec<LatestReading>> {
        // ---
        let rows: Vec<LatestRow> = sqlx::query_as(concat!(
            "SELECT s.name AS station_name, s.station_type, r.* FROM (SELECT DISTINCT ON (station_id) ",
            reading_columns!(),
            r#"
                FROM readings
                ORDER BY station_id, collected_at DESC, id DESC
            ) r
            JOIN stations s ON s.id = r.station_id
            WHERE s.status = 'normal'
            ORDER BY s.name
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LatestReading {
                    station_name: row.station_name,
                    station_type: row.station_type,
                    reading: Reading::try_from(row.reading)?,
                })
            })
            .collect()
    }

    async fn anomalies_for(&self, reading_id: i64) -> Result<Vec<Anomaly>> {
        // ---
        let rows: Vec<AnomalyRow> = sqlx::query_as(concat!(
            "SELECT ",
            anomaly_columns!(),
            " FROM anomalies WHERE reading_id = $1 ORDER BY id"
        ))
        .bind(reading_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn process_anomaly(
        &self,
        id: i64,
        status: ProcessingStatus,
        processed_by: Option<&str>,
    ) -> Result<Option<Anomaly>> {
        // ---
        let row: Option<AnomalyRow> = sqlx::query_as(concat!(
            r#"
            UPDATE anomalies SET
                processing_status = $2,
                processed_at = CASE WHEN $2 = 'unprocessed' THEN NULL ELSE NOW() END,
                processed_by = CASE WHEN $2 = 'unprocessed' THEN NULL ELSE $3 END
            WHERE id = $1
            RETURNING "#,
            anomaly_columns!()
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(processed_by)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Anomaly::try_from).transpose()
    }

    async fn anomaly_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AnomalyCount>> {
        // ---
        let rows: Vec<AnomalyCountRow> = sqlx::query_as(
            r#"
            SELECT r.station_id, s.name AS station_name, a.kind, COUNT(*) AS count
            FROM anomalies a
            JOIN readings r ON r.id = a.reading_id
            JOIN stations s ON s.id = r.station_id
            WHERE a.discovered_at >= $1 AND a.discovered_at < $2
            GROUP BY r.station_id, s.name, a.kind
            ORDER BY s.name, count DESC, a.kind
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(AnomalyCount {
                    station_id: row.station_id,
                    station_name: row.station_name,
                    kind: decode("kind", &row.kind)?,
                    count: row.count,
                })
            })
            .collect()
    }

    async fn upsert_statistic(&self, stat: &NewStatistic) -> Result<PeriodicStatistic> {
        // ---
        let f = &stat.figures;
        let row: StatisticRow = sqlx::query_as(concat!(
            r#"
            INSERT INTO periodic_statistics (
                region_id, station_id, sensor_id, period, period_date, data_count,
                avg_temperature, max_temperature, min_temperature,
                avg_humidity, max_humidity, min_humidity, total_rainfall,
                avg_wind_speed, max_wind_speed, avg_pm25, avg_pm10, source, computed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, NOW())
            ON CONFLICT (station_id, period, period_date) DO UPDATE SET
                region_id       = EXCLUDED.region_id,
                sensor_id       = EXCLUDED.sensor_id,
                data_count      = EXCLUDED.data_count,
                avg_temperature = EXCLUDED.avg_temperature,
                max_temperature = EXCLUDED.max_temperature,
                min_temperature = EXCLUDED.min_temperature,
                avg_humidity    = EXCLUDED.avg_humidity,
                max_humidity    = EXCLUDED.max_humidity,
                min_humidity    = EXCLUDED.min_humidity,
                total_rainfall  = EXCLUDED.total_rainfall,
                avg_wind_speed  = EXCLUDED.avg_wind_speed,
                max_wind_speed  = EXCLUDED.max_wind_speed,
                avg_pm25        = EXCLUDED.avg_pm25,
                avg_pm10        = EXCLUDED.avg_pm10,
                source          = EXCLUDED.source,
                computed_at     = NOW()
            RETURNING "#,
            statistic_columns!()
        ))
        .bind(stat.scope.region_id)
        .bind(stat.scope.station_id)
        .bind(stat.scope.sensor_id)
        .bind(stat.period.as_str())
        .bind(stat.period_date)
        .bind(f.data_count)
        .bind(f.avg_temperature)
        .bind(f.max_temperature)
        .bind(f.min_temperature)
        .bind(f.avg_humidity)
        .bind(f.max_humidity)
        .bind(f.min_humidity)
        .bind(f.total_rainfall)
        .bind(f.avg_wind_speed)
        .bind(f.max_wind_speed)
        .bind(f.avg_pm25)
        .bind(f.avg_pm10)
        .bind(&stat.source)
        .fetch_one(&self.pool)
        .await?;
        PeriodicStatistic::try_from(row)
    }

    async fn list_statistics(&self, filter: &StatisticsFilter) -> Result<Vec<PeriodicStatistic>> {
        // ---
        let rows: Vec<StatisticRow> = sqlx::query_as(concat!(
            "SELECT ",
            statistic_columns!(),
            r#"
            FROM periodic_statistics
            WHERE ($1::BIGINT IS NULL OR region_id = $1)
              AND ($2::BIGINT IS NULL OR station_id = $2)
              AND ($3::TEXT IS NULL OR period = $3)
              AND ($4::DATE IS NULL OR period_date >= $4)
              AND ($5::DATE IS NULL OR period_date <= $5)
            ORDER BY period_date, station_id, period
            "#
        ))
        .bind(filter.region_id)
        .bind(filter.station_id)
        .bind(filter.period.map(|p| p.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn template(&self, id: i64) -> Result<Option<ReportTemplate>> {
        // ---
        let template = sqlx::query_as::<_, ReportTemplate>(
            "SELECT id, name, template_type, content FROM report_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(template)
    }

    async fn template_get_or_create(
        &self,
        name: &str,
        template_type: &str,
        content: &str,
    ) -> Result<ReportTemplate> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO report_templates (name, template_type, content)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(template_type)
        .bind(content)
        .execute(&self.pool)
        .await?;

        let template = sqlx::query_as::<_, ReportTemplate>(
            "SELECT id, name, template_type, content FROM report_templates WHERE name = $1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(template)
    }

    async fn insert_report(&self, new: &NewReport) -> Result<Report> {
        // ---
        let report = sqlx::query_as::<_, Report>(
            r#"
            INSERT INTO reports (template_id, name, content, generated_by)
            VALUES ($1, $2, $3, $4)
            RETURNING id, template_id, name, content, generated_at, generated_by
            "#,
        )
        .bind(new.template_id)
        .bind(&new.name)
        .bind(&new.content)
        .bind(&new.generated_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(report)
    }

    async fn report(&self, id: i64) -> Result<Option<Report>> {
        // ---
        let report = sqlx::query_as::<_, Report>(
            r#"
            SELECT id, template_id, name, content, generated_at, generated_by
            FROM reports WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(report)
    }

    async fn system_status(
        &self,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> Result<SystemStatus> {
        // ---
        let status = sqlx::query_as::<_, SystemStatus>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM stations) AS station_count,
                (SELECT COUNT(*) FROM stations WHERE status = 'normal') AS normal_station_count,
                (SELECT COUNT(*) FROM readings
                  WHERE collected_at >= $1 AND collected_at < $2) AS today_reading_count,
                (SELECT COUNT(*) FROM anomalies
                  WHERE processing_status = 'unprocessed') AS unprocessed_anomaly_count
            "#,
        )
        .bind(day_start)
        .bind(day_end)
        .fetch_one(&self.pool)
        .await?;
        Ok(status)
    }
}
