//! Data models for the environmental monitoring pipeline.
//!
//! Readings, anomalies, periodic statistics and reports as they travel
//! between the store, the core (classifier, aggregator, renderer) and the
//! JSON surface. Text-valued enums round-trip through their snake_case names,
//! which are also what the database CHECK constraints accept.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{period::Period, Error};

// ---

/// Declare a fieldless enum stored as text, with `as_str`, `Display` and `FromStr`.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum!(
    /// Whether any anomaly rule currently flags a reading.
    ValidityFlag {
        Valid => "valid",
        Invalid => "invalid",
    }
);

text_enum!(
    /// The measured field an anomaly rule watches.
    AnomalyKind {
        Temperature => "temperature",
        Humidity => "humidity",
        WindSpeed => "wind_speed",
        Pm25 => "pm25",
        Pm10 => "pm10",
        SoilPh => "soil_ph",
    }
);

text_enum!(
    /// Operator workflow state of an anomaly.
    ProcessingStatus {
        Unprocessed => "unprocessed",
        InProgress => "in_progress",
        Processed => "processed",
    }
);

text_enum!(
    /// Operational state of a monitoring station.
    StationStatus {
        Normal => "normal",
        Fault => "fault",
        Maintenance => "maintenance",
    }
);

// ---

/// The measured values of one reading. Every field is optional; a station
/// only reports what its sensors measure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Measurements {
    // ---
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<String>,
    pub rainfall: Option<f64>,
    pub sunshine_duration: Option<f64>,
    pub soil_temperature: Option<f64>,
    pub soil_humidity: Option<f64>,
    pub soil_ph: Option<f64>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
}

impl Measurements {
    // ---
    /// Reject NaN and infinite values before they reach storage.
    pub fn validate(&self) -> Result<(), Error> {
        // ---
        let numeric = [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("wind_speed", self.wind_speed),
            ("rainfall", self.rainfall),
            ("sunshine_duration", self.sunshine_duration),
            ("soil_temperature", self.soil_temperature),
            ("soil_humidity", self.soil_humidity),
            ("soil_ph", self.soil_ph),
            ("pm25", self.pm25),
            ("pm10", self.pm10),
        ];
        for (name, value) in numeric {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(Error::validation(format!("{name} must be a finite number")));
                }
            }
        }
        Ok(())
    }
}

/// Incoming reading as submitted for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReading {
    // ---
    pub sensor_id: i64,
    pub station_id: i64,
    pub region_id: i64,
    pub collected_at: DateTime<Utc>,
    #[serde(flatten)]
    pub measurements: Measurements,
}

/// A stored, time-stamped sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    pub id: i64,
    pub sensor_id: i64,
    pub station_id: i64,
    pub region_id: i64,
    pub collected_at: DateTime<Utc>,
    #[serde(flatten)]
    pub measurements: Measurements,
    pub validity: ValidityFlag,
}

/// Most recent reading of a station, with the station's display data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestReading {
    // ---
    pub station_name: String,
    pub station_type: String,
    #[serde(flatten)]
    pub reading: Reading,
}

/// Filters for listing readings. All bounds are optional; `from` is
/// inclusive and `to` exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingFilter {
    // ---
    pub region_id: Option<i64>,
    pub station_id: Option<i64>,
    pub sensor_id: Option<i64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub validity: Option<ValidityFlag>,
    pub limit: Option<u32>,
}

impl ReadingFilter {
    // ---
    pub fn matches(&self, r: &Reading) -> bool {
        // ---
        self.region_id.map_or(true, |id| r.region_id == id)
            && self.station_id.map_or(true, |id| r.station_id == id)
            && self.sensor_id.map_or(true, |id| r.sensor_id == id)
            && self.from.map_or(true, |t| r.collected_at >= t)
            && self.to.map_or(true, |t| r.collected_at < t)
            && self.validity.map_or(true, |v| r.validity == v)
    }
}

// ---

/// A flagged rule violation tied to one reading and one measured field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    // ---
    pub id: i64,
    pub reading_id: i64,
    pub kind: AnomalyKind,
    pub description: String,
    pub discovered_at: DateTime<Utc>,
    pub processing_status: ProcessingStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
}

/// Rule outcome before it is persisted as an [`Anomaly`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub kind: AnomalyKind,
    pub description: String,
}

/// Result of (re-)classifying one reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    // ---
    pub reading_id: i64,
    pub validity: ValidityFlag,
    pub anomalies: Vec<Anomaly>,
}

/// Anomalies discovered in a window, grouped by station and kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyCount {
    // ---
    pub station_id: i64,
    pub station_name: String,
    pub kind: AnomalyKind,
    pub count: i64,
}

// ---

/// The (region, station, sensor?) tuple an aggregation is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub region_id: i64,
    pub station_id: i64,
    pub sensor_id: Option<i64>,
}

/// Aggregate figures over one set of readings.
///
/// Averages, extremes and sums skip absent values the way SQL aggregates
/// skip NULL; a figure is `None` when no reading carried that field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Figures {
    // ---
    pub data_count: i64,
    pub avg_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub max_humidity: Option<f64>,
    pub min_humidity: Option<f64>,
    pub total_rainfall: Option<f64>,
    pub avg_wind_speed: Option<f64>,
    pub max_wind_speed: Option<f64>,
    pub avg_pm25: Option<f64>,
    pub avg_pm10: Option<f64>,
}

/// Statistic row ready to be upserted by key.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStatistic {
    // ---
    pub scope: Scope,
    pub period: Period,
    /// Normalized to the first day of the period window.
    pub period_date: NaiveDate,
    pub figures: Figures,
    pub source: String,
}

/// Precomputed aggregate for one station and one calendar period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodicStatistic {
    // ---
    pub id: i64,
    pub region_id: i64,
    pub station_id: i64,
    pub sensor_id: Option<i64>,
    pub period: Period,
    pub period_date: NaiveDate,
    #[serde(flatten)]
    pub figures: Figures,
    pub source: String,
    pub computed_at: DateTime<Utc>,
}

/// Filters for listing statistics; `from`/`to` bound `period_date` inclusively.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatisticsFilter {
    // ---
    pub region_id: Option<i64>,
    pub station_id: Option<i64>,
    pub period: Option<Period>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl StatisticsFilter {
    pub fn matches(&self, s: &PeriodicStatistic) -> bool {
        // ---
        self.region_id.map_or(true, |id| s.region_id == id)
            && self.station_id.map_or(true, |id| s.station_id == id)
            && self.period.map_or(true, |p| s.period == p)
            && self.from.map_or(true, |d| s.period_date >= d)
            && self.to.map_or(true, |d| s.period_date <= d)
    }
}

/// Daily environmental trend point for one station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub total_rainfall: Option<f64>,
}

/// Daily air quality point for one station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAirQuality {
    pub date: NaiveDate,
    pub avg_pm25: Option<f64>,
    pub avg_pm10: Option<f64>,
}

// ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReportTemplate {
    pub id: i64,
    pub name: String,
    pub template_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub template_id: i64,
    pub name: String,
    pub content: String,
    pub generated_by: String,
}

/// Append-only rendered report artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    // ---
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    pub content: String,
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
}

// ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: i64,
    pub name: String,
    pub region_type: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    // ---
    pub id: i64,
    pub region_id: i64,
    pub name: String,
    pub station_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub status: StationStatus,
    pub installation_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sensor {
    pub id: i64,
    pub station_id: i64,
    pub model: String,
    pub monitor_type: String,
    pub status: String,
}

/// Counters for the system status overview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct SystemStatus {
    // ---
    pub station_count: i64,
    pub normal_station_count: i64,
    pub today_reading_count: i64,
    pub unprocessed_anomaly_count: i64,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_reading(station_id: i64, hour: u32, validity: ValidityFlag) -> Reading {
        // ---
        Reading {
            id: 1,
            sensor_id: 10,
            station_id,
            region_id: 100,
            collected_at: Utc.with_ymd_and_hms(2025, 3, 26, hour, 0, 0).unwrap(),
            measurements: Measurements {
                temperature: Some(20.0),
                ..Measurements::default()
            },
            validity,
        }
    }

    #[test]
    fn test_text_enum_round_trip() {
        // ---
        for kind in AnomalyKind::ALL {
            assert_eq!(kind.as_str().parse::<AnomalyKind>().unwrap(), *kind);
        }
        assert_eq!("in_progress".parse::<ProcessingStatus>().unwrap(), ProcessingStatus::InProgress);
        assert!("broken".parse::<ValidityFlag>().is_err());
        assert_eq!(serde_json::to_string(&AnomalyKind::WindSpeed).unwrap(), "\"wind_speed\"");
    }

    #[test]
    fn test_reading_filter_bounds() {
        // ---
        let reading = create_test_reading(7, 12, ValidityFlag::Valid);

        let window = ReadingFilter {
            from: Some(Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2025, 3, 26, 13, 0, 0).unwrap()),
            ..ReadingFilter::default()
        };
        assert!(window.matches(&reading));

        // `to` is exclusive
        let before = ReadingFilter {
            to: Some(reading.collected_at),
            ..ReadingFilter::default()
        };
        assert!(!before.matches(&reading));

        let other_station = ReadingFilter {
            station_id: Some(8),
            ..ReadingFilter::default()
        };
        assert!(!other_station.matches(&reading));

        let invalid_only = ReadingFilter {
            validity: Some(ValidityFlag::Invalid),
            ..ReadingFilter::default()
        };
        assert!(!invalid_only.matches(&reading));
    }

    #[test]
    fn test_measurements_reject_non_finite() {
        // ---
        let ok = Measurements {
            temperature: Some(-5.0),
            pm25: Some(12.0),
            ..Measurements::default()
        };
        assert!(ok.validate().is_ok());

        let bad = Measurements {
            humidity: Some(f64::NAN),
            ..Measurements::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_reading_json_is_flat() {
        // ---
        let json = serde_json::to_value(create_test_reading(7, 1, ValidityFlag::Invalid)).unwrap();
        assert_eq!(json["temperature"], 20.0);
        assert_eq!(json["validity"], "invalid");
        assert!(json.get("measurements").is_none());
    }
}
