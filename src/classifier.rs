//! Threshold-based anomaly classifier.
//!
//! Six independent range rules, one per watched field. Any number of them may
//! fire for the same reading. Evaluation is a pure function of the measured
//! values; persisting the outcome (delete the reading's anomalies, insert the
//! fresh findings, update the validity flag) happens inside the store's
//! per-reading transaction, see [`crate::store::Store::reclassify`].
//!
//! A rule whose field was not measured never fires. Bounds are exclusive:
//! a value sitting exactly on a threshold is still normal.

use tracing::{debug, info};

use crate::{
    models::{Classification, Finding, Measurements, ValidityFlag},
    store::Store,
    AnomalyKind, Result,
};

// ---

/// One range rule over a single measured field.
#[derive(Debug)]
pub struct Rule {
    // ---
    pub kind: AnomalyKind,
    /// Field label used in the anomaly description.
    pub label: &'static str,
    pub unit: &'static str,
    /// Values strictly below this bound violate the rule.
    pub min: Option<f64>,
    /// Values strictly above this bound violate the rule.
    pub max: Option<f64>,
    value: fn(&Measurements) -> Option<f64>,
}

impl Rule {
    // ---
    pub fn violated_by(&self, value: f64) -> bool {
        self.min.map_or(false, |min| value < min) || self.max.map_or(false, |max| value > max)
    }

    /// Finding for `m`, if the watched field is present and out of range.
    pub fn check(&self, m: &Measurements) -> Option<Finding> {
        // ---
        let value = (self.value)(m)?;
        self.violated_by(value).then(|| Finding {
            kind: self.kind,
            description: format!("{} out of normal range: {:.2}{}", self.label, value, self.unit),
        })
    }
}

fn temperature(m: &Measurements) -> Option<f64> {
    m.temperature
}

fn humidity(m: &Measurements) -> Option<f64> {
    m.humidity
}

fn wind_speed(m: &Measurements) -> Option<f64> {
    m.wind_speed
}

fn pm25(m: &Measurements) -> Option<f64> {
    m.pm25
}

fn pm10(m: &Measurements) -> Option<f64> {
    m.pm10
}

fn soil_ph(m: &Measurements) -> Option<f64> {
    m.soil_ph
}

/// The fixed rule table.
pub static RULES: [Rule; 6] = [
    Rule {
        kind: AnomalyKind::Temperature,
        label: "temperature",
        unit: "℃",
        min: Some(-20.0),
        max: Some(40.0),
        value: temperature,
    },
    Rule {
        kind: AnomalyKind::Humidity,
        label: "humidity",
        unit: "%",
        min: Some(0.0),
        max: Some(100.0),
        value: humidity,
    },
    Rule {
        kind: AnomalyKind::WindSpeed,
        label: "wind speed",
        unit: "m/s",
        min: None,
        max: Some(30.0),
        value: wind_speed,
    },
    Rule {
        kind: AnomalyKind::Pm25,
        label: "PM2.5",
        unit: "μg/m³",
        min: None,
        max: Some(500.0),
        value: pm25,
    },
    Rule {
        kind: AnomalyKind::Pm10,
        label: "PM10",
        unit: "μg/m³",
        min: None,
        max: Some(1000.0),
        value: pm10,
    },
    Rule {
        kind: AnomalyKind::SoilPh,
        label: "soil pH",
        unit: "",
        min: Some(4.5),
        max: Some(9.5),
        value: soil_ph,
    },
];

/// Run every rule against `m`, in rule-table order.
pub fn evaluate(m: &Measurements) -> Vec<Finding> {
    RULES.iter().filter_map(|rule| rule.check(m)).collect()
}

pub fn validity_for(findings: &[Finding]) -> ValidityFlag {
    if findings.is_empty() {
        ValidityFlag::Valid
    } else {
        ValidityFlag::Invalid
    }
}

// ---

/// Totals from a classification pass over several readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ClassifySummary {
    pub readings: usize,
    pub invalid_readings: usize,
    pub anomalies: usize,
}

/// Re-classify the given readings, or every stored reading when `ids` is `None`.
///
/// Each reading is handled in its own store transaction, so concurrent
/// classification of different readings needs no coordination. Ids that no
/// longer exist are skipped.
pub async fn classify<S>(store: &S, ids: Option<&[i64]>) -> Result<ClassifySummary>
where
    S: Store + ?Sized,
{
    // ---
    let ids = match ids {
        Some(ids) => ids.to_vec(),
        None => store.reading_ids().await?,
    };

    let mut summary = ClassifySummary::default();
    for id in ids {
        let Some(outcome) = store.reclassify(id).await? else {
            debug!(reading_id = id, "Reading vanished before reclassification");
            continue;
        };
        summary.readings += 1;
        summary.anomalies += outcome.anomalies.len();
        if outcome.validity == ValidityFlag::Invalid {
            summary.invalid_readings += 1;
        }
    }

    info!(
        readings = summary.readings,
        invalid_readings = summary.invalid_readings,
        anomalies = summary.anomalies,
        "Classification pass complete"
    );
    Ok(summary)
}

/// Log line shared by every write path that classifies a reading.
pub(crate) fn log_outcome(action: &str, outcome: &Classification) {
    // ---
    info!(
        reading_id = outcome.reading_id,
        validity = %outcome.validity,
        anomalies = outcome.anomalies.len(),
        "Reading {}",
        action
    );
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn only(kind: AnomalyKind, value: f64) -> Measurements {
        // ---
        let mut m = Measurements::default();
        match kind {
            AnomalyKind::Temperature => m.temperature = Some(value),
            AnomalyKind::Humidity => m.humidity = Some(value),
            AnomalyKind::WindSpeed => m.wind_speed = Some(value),
            AnomalyKind::Pm25 => m.pm25 = Some(value),
            AnomalyKind::Pm10 => m.pm10 = Some(value),
            AnomalyKind::SoilPh => m.soil_ph = Some(value),
        }
        m
    }

    fn fires(kind: AnomalyKind, value: f64) -> bool {
        let findings = evaluate(&only(kind, value));
        findings.iter().any(|f| f.kind == kind)
    }

    #[test]
    fn test_temperature_boundaries() {
        // ---
        assert!(!fires(AnomalyKind::Temperature, 40.0));
        assert!(fires(AnomalyKind::Temperature, 40.01));
        assert!(!fires(AnomalyKind::Temperature, -20.0));
        assert!(fires(AnomalyKind::Temperature, -20.01));
    }

    #[test]
    fn test_humidity_boundaries() {
        // ---
        assert!(!fires(AnomalyKind::Humidity, 0.0));
        assert!(fires(AnomalyKind::Humidity, -0.01));
        assert!(!fires(AnomalyKind::Humidity, 100.0));
        assert!(fires(AnomalyKind::Humidity, 100.01));
    }

    #[test]
    fn test_upper_bound_only_rules() {
        // ---
        assert!(!fires(AnomalyKind::WindSpeed, 30.0));
        assert!(fires(AnomalyKind::WindSpeed, 30.01));
        assert!(!fires(AnomalyKind::WindSpeed, -5.0));

        assert!(!fires(AnomalyKind::Pm25, 500.0));
        assert!(fires(AnomalyKind::Pm25, 500.01));

        assert!(!fires(AnomalyKind::Pm10, 1000.0));
        assert!(fires(AnomalyKind::Pm10, 1000.01));
    }

    #[test]
    fn test_soil_ph_boundaries() {
        // ---
        assert!(!fires(AnomalyKind::SoilPh, 4.5));
        assert!(fires(AnomalyKind::SoilPh, 4.49));
        assert!(!fires(AnomalyKind::SoilPh, 9.5));
        assert!(fires(AnomalyKind::SoilPh, 9.51));
    }

    #[test]
    fn test_multiple_rules_fire_independently() {
        // ---
        let m = Measurements {
            temperature: Some(45.0),
            humidity: Some(150.0),
            wind_speed: Some(3.0),
            ..Measurements::default()
        };
        let findings = evaluate(&m);

        let kinds: Vec<_> = findings.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![AnomalyKind::Temperature, AnomalyKind::Humidity]);
        assert_eq!(validity_for(&findings), ValidityFlag::Invalid);
    }

    #[test]
    fn test_missing_fields_never_fire() {
        // ---
        let findings = evaluate(&Measurements::default());
        assert!(findings.is_empty());
        assert_eq!(validity_for(&findings), ValidityFlag::Valid);
    }

    #[test]
    fn test_description_format() {
        // ---
        let findings = evaluate(&only(AnomalyKind::Pm25, 600.0));
        assert_eq!(findings[0].description, "PM2.5 out of normal range: 600.00μg/m³");

        let findings = evaluate(&only(AnomalyKind::SoilPh, 3.2));
        assert_eq!(findings[0].description, "soil pH out of normal range: 3.20");

        let findings = evaluate(&only(AnomalyKind::Temperature, -25.5));
        assert_eq!(findings[0].description, "temperature out of normal range: -25.50℃");
    }

    #[test]
    fn test_rule_table_covers_every_kind_once() {
        // ---
        for kind in AnomalyKind::ALL {
            assert_eq!(RULES.iter().filter(|r| r.kind == *kind).count(), 1);
        }
    }
}
