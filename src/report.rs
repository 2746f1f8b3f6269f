//! Report rendering.
//!
//! A report combines the latest snapshot per station, the stored periodic
//! statistics for the requested period and the anomalies discovered inside
//! the period window. The text layout is fixed-width so it reads the same in
//! a terminal, a log line or a stored artifact. Sparse periods render an
//! explicit "no data" section instead of failing.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::{
    models::{AnomalyCount, LatestReading, NewReport, PeriodicStatistic, StatisticsFilter},
    period::{Period, PeriodDescriptor, PeriodWindow},
    store::Store,
    Error, Result,
};

const RULE_WIDTH: usize = 96;

/// Returned to the caller after a report is stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedReport {
    pub report_id: i64,
    pub name: String,
    pub content: String,
}

/// Name, type and placeholder content of the default template for `period`.
pub fn default_template(period: Period) -> (String, &'static str, String) {
    // ---
    let adjective = period.adjective();
    (
        format!("{adjective} Environmental Monitoring Report"),
        period.as_str(),
        format!("Default {} report template", adjective.to_lowercase()),
    )
}

pub fn report_name(descriptor: &PeriodDescriptor) -> String {
    format!("environmental-report-{}-{}", descriptor.period(), descriptor)
}

// ---

/// Everything the text layout needs, already fetched.
pub struct ReportInput<'a> {
    // ---
    pub title: &'a str,
    pub descriptor: &'a PeriodDescriptor,
    pub window: &'a PeriodWindow,
    pub generated_at: DateTime<Utc>,
    pub latest: &'a [LatestReading],
    /// Statistic rows paired with their station names.
    pub statistics: &'a [(String, PeriodicStatistic)],
    pub anomalies: &'a [AnomalyCount],
}

fn fmt_value(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{v:.2}{unit}"),
        None => "-".to_string(),
    }
}

/// Render the fixed-layout text report.
pub fn render(input: &ReportInput<'_>) -> String {
    input.to_string()
}

impl fmt::Display for ReportInput<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write_report(out, self)
    }
}

fn write_report<W: fmt::Write>(out: &mut W, input: &ReportInput<'_>) -> fmt::Result {
    // ---
    let rule = "=".repeat(RULE_WIDTH);
    let thin = "-".repeat(RULE_WIDTH);

    // Header
    writeln!(out, "{}", input.title)?;
    writeln!(
        out,
        "Period       : {} ({} .. {})",
        input.descriptor, input.window.start, input.window.end
    )?;
    writeln!(
        out,
        "Generated at : {}",
        input.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(out, "{rule}")?;

    // Latest snapshot
    writeln!(out, "\nLatest readings:")?;
    if input.latest.is_empty() {
        writeln!(out, "  No readings received from active stations.")?;
    } else {
        writeln!(
            out,
            "{:<20} {:<20} {:>10} {:>10} {:>10} {:>10}",
            "Station", "Collected at", "Temp", "Humidity", "Wind", "Rainfall"
        )?;
        writeln!(out, "{thin}")?;
        for l in input.latest {
            let m = &l.reading.measurements;
            writeln!(
                out,
                "{:<20} {:<20} {:>10} {:>10} {:>10} {:>10}",
                l.station_name,
                l.reading.collected_at.format("%Y-%m-%d %H:%M"),
                fmt_value(m.temperature, "℃"),
                fmt_value(m.humidity, "%"),
                fmt_value(m.wind_speed, "m/s"),
                fmt_value(m.rainfall, "mm"),
            )?;
        }
    }

    // Statistics
    writeln!(out, "\nStation statistics:")?;
    if input.statistics.is_empty() {
        writeln!(out, "  No data: no statistics were computed for this period.")?;
    } else {
        writeln!(
            out,
            "{:<20} {:>8} {:>9} {:>9} {:>9} {:>9} {:>10} {:>9} {:>9}",
            "Station", "Readings", "Avg temp", "Max temp", "Min temp", "Avg hum", "Rainfall",
            "PM2.5", "PM10"
        )?;
        writeln!(out, "{thin}")?;
        for (name, s) in input.statistics {
            let f = &s.figures;
            writeln!(
                out,
                "{:<20} {:>8} {:>9} {:>9} {:>9} {:>9} {:>10} {:>9} {:>9}",
                name,
                f.data_count,
                fmt_value(f.avg_temperature, "℃"),
                fmt_value(f.max_temperature, "℃"),
                fmt_value(f.min_temperature, "℃"),
                fmt_value(f.avg_humidity, "%"),
                fmt_value(f.total_rainfall, "mm"),
                fmt_value(f.avg_pm25, ""),
                fmt_value(f.avg_pm10, ""),
            )?;
        }
    }

    // Anomalies
    writeln!(out, "\nAnomaly summary:")?;
    if input.anomalies.is_empty() {
        writeln!(out, "  No anomalies discovered in this period.")?;
    } else {
        writeln!(out, "{:<20} {:<12} {:>6}", "Station", "Kind", "Count")?;
        writeln!(out, "{thin}")?;
        for a in input.anomalies {
            writeln!(out, "{:<20} {:<12} {:>6}", a.station_name, a.kind, a.count)?;
        }
    }
    let total: i64 = input.anomalies.iter().map(|a| a.count).sum();
    writeln!(out, "\nTotal anomalies: {total}")
}

// ---

/// Render and persist a report for `descriptor`.
///
/// `template_id` selects an existing template (absent → NotFound); without
/// it the period's default template is fetched or created by name.
pub async fn generate<S>(
    store: &S,
    descriptor: &PeriodDescriptor,
    template_id: Option<i64>,
    generated_by: &str,
) -> Result<GeneratedReport>
where
    S: Store + ?Sized,
{
    // ---
    let window = descriptor.window()?;

    let template = match template_id {
        Some(id) => store
            .template(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("report template {id} not found")))?,
        None => {
            let (name, kind, content) = default_template(descriptor.period());
            store.template_get_or_create(&name, kind, &content).await?
        }
    };

    let station_names: HashMap<i64, String> = store
        .stations()
        .await?
        .into_iter()
        .map(|s| (s.id, s.name))
        .collect();

    let mut statistics: Vec<(String, PeriodicStatistic)> = store
        .list_statistics(&StatisticsFilter {
            period: Some(window.period),
            from: Some(window.start),
            to: Some(window.start),
            ..StatisticsFilter::default()
        })
        .await?
        .into_iter()
        .map(|s| {
            let name = station_names
                .get(&s.station_id)
                .cloned()
                .unwrap_or_else(|| format!("station #{}", s.station_id));
            (name, s)
        })
        .collect();
    statistics.sort_by(|a, b| a.0.cmp(&b.0));

    let latest = store.latest_readings().await?;
    let anomalies = store
        .anomaly_counts(window.start_utc(), window.end_utc())
        .await?;

    let content = render(&ReportInput {
        title: &template.name,
        descriptor,
        window: &window,
        generated_at: Utc::now(),
        latest: &latest,
        statistics: &statistics,
        anomalies: &anomalies,
    });

    let report = store
        .insert_report(&NewReport {
            template_id: template.id,
            name: report_name(descriptor),
            content,
            generated_by: generated_by.to_string(),
        })
        .await?;

    info!(
        report_id = report.id,
        name = %report.name,
        stations = statistics.len(),
        "Report generated"
    );
    Ok(GeneratedReport {
        report_id: report.id,
        name: report.name,
        content: report.content,
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{
        AnomalyKind, Figures, Measurements, Reading, ValidityFlag,
    };
    use chrono::{NaiveDate, TimeZone};
    use std::fmt;

    fn descriptor() -> PeriodDescriptor {
        PeriodDescriptor::Day {
            date: NaiveDate::from_ymd_opt(2025, 3, 26).unwrap(),
        }
    }

    fn statistic(station_id: i64) -> PeriodicStatistic {
        // ---
        PeriodicStatistic {
            id: 1,
            region_id: 1,
            station_id,
            sensor_id: None,
            period: Period::Day,
            period_date: NaiveDate::from_ymd_opt(2025, 3, 26).unwrap(),
            figures: Figures {
                data_count: 24,
                avg_temperature: Some(21.456),
                max_temperature: Some(28.0),
                min_temperature: Some(15.0),
                avg_humidity: Some(55.0),
                total_rainfall: Some(3.2),
                ..Figures::default()
            },
            source: "automatic".into(),
            computed_at: Utc.with_ymd_and_hms(2025, 3, 27, 0, 5, 0).unwrap(),
        }
    }

    #[test]
    fn test_render_full_report() {
        // ---
        let d = descriptor();
        let window = d.window().unwrap();
        let latest = vec![LatestReading {
            station_name: "Station 1".into(),
            station_type: "weather".into(),
            reading: Reading {
                id: 9,
                sensor_id: 1,
                station_id: 1,
                region_id: 1,
                collected_at: Utc.with_ymd_and_hms(2025, 3, 26, 23, 0, 0).unwrap(),
                measurements: Measurements {
                    temperature: Some(18.0),
                    ..Measurements::default()
                },
                validity: ValidityFlag::Valid,
            },
        }];
        let stats = vec![("Station 1".to_string(), statistic(1))];
        let anomalies = vec![AnomalyCount {
            station_id: 1,
            station_name: "Station 1".into(),
            kind: AnomalyKind::Pm25,
            count: 2,
        }];

        let text = render(&ReportInput {
            title: "Daily Environmental Monitoring Report",
            descriptor: &d,
            window: &window,
            generated_at: Utc.with_ymd_and_hms(2025, 3, 27, 8, 0, 0).unwrap(),
            latest: &latest,
            statistics: &stats,
            anomalies: &anomalies,
        });

        assert!(text.starts_with("Daily Environmental Monitoring Report\n"));
        assert!(text.contains("Period       : 2025-03-26 (2025-03-26 .. 2025-03-27)"));
        assert!(text.contains("Generated at : 2025-03-27 08:00:00 UTC"));
        assert!(text.contains("21.46℃"));
        assert!(text.contains("3.20mm"));
        assert!(text.contains("pm25"));
        assert!(text.contains("Total anomalies: 2"));
        assert!(!text.contains("No data"));
    }

    #[test]
    fn test_render_empty_period_says_no_data() {
        // ---
        let d = descriptor();
        let window = d.window().unwrap();
        let text = render(&ReportInput {
            title: "Daily Environmental Monitoring Report",
            descriptor: &d,
            window: &window,
            generated_at: Utc::now(),
            latest: &[],
            statistics: &[],
            anomalies: &[],
        });

        assert!(text.contains("No data: no statistics were computed for this period."));
        assert!(text.contains("No anomalies discovered in this period."));
        assert!(text.contains("Total anomalies: 0"));
    }

    /// Accepts a fixed number of bytes, then refuses.
    struct Capped(usize);

    impl fmt::Write for Capped {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            if s.len() > self.0 {
                return Err(fmt::Error);
            }
            self.0 -= s.len();
            Ok(())
        }
    }

    #[test]
    fn test_writer_failure_is_propagated() {
        // ---
        let d = descriptor();
        let window = d.window().unwrap();
        let input = ReportInput {
            title: "Daily Environmental Monitoring Report",
            descriptor: &d,
            window: &window,
            generated_at: Utc::now(),
            latest: &[],
            statistics: &[],
            anomalies: &[],
        };

        let full = render(&input);
        assert_eq!(full, format!("{input}"));
        assert!(write_report(&mut Capped(full.len()), &input).is_ok());
        assert!(write_report(&mut Capped(full.len() - 1), &input).is_err());
        assert!(write_report(&mut Capped(0), &input).is_err());
    }

    #[test]
    fn test_default_templates_and_names() {
        // ---
        let (name, kind, content) = default_template(Period::Quarter);
        assert_eq!(name, "Quarterly Environmental Monitoring Report");
        assert_eq!(kind, "quarter");
        assert_eq!(content, "Default quarterly report template");

        let week = PeriodDescriptor::Week { year: 2025, week: 3 };
        assert_eq!(report_name(&week), "environmental-report-week-2025-W03");
    }
}
