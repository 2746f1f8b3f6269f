//! Smoke tests against a running server backed by Postgres.
//!
//! Ignored by default. Start the service with a provisioned station and run
//! `BASE_URL=http://localhost:8080 STATION_ID=1 cargo test -- --ignored`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Reading {
    id: i64,
    station_id: i64,
    collected_at: DateTime<Utc>,
    pm25: Option<f64>,
    validity: String,
}

#[derive(Debug, Deserialize)]
struct SystemStatus {
    station_count: i64,
    normal_station_count: i64,
}

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into())
}

#[tokio::test]
#[ignore]
async fn status_reports_provisioned_stations() -> Result<()> {
    // ---
    let url = format!("{}/status", base_url());
    let status: SystemStatus = Client::new().get(&url).send().await?.json().await?;

    assert!(status.station_count > 0, "No stations provisioned behind {}", url);
    assert!(status.normal_station_count <= status.station_count);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn listed_readings_honour_filters() -> Result<()> {
    // ---
    let station_id: i64 = std::env::var("STATION_ID")
        .unwrap_or_else(|_| "1".into())
        .parse()?;
    let url = format!(
        "{}/readings?station_id={}&validity=invalid&limit=10",
        base_url(),
        station_id
    );
    let readings: Vec<Reading> = Client::new().get(&url).send().await?.json().await?;

    assert!(readings.len() <= 10, "Limit filter failed");
    for r in &readings {
        assert_eq!(r.station_id, station_id, "Station filter failed");
        assert_eq!(r.validity, "invalid", "Validity filter failed");
        assert!(r.id > 0);
        assert!(r.collected_at <= Utc::now() + chrono::Duration::days(1));
        if let Some(pm25) = r.pm25 {
            assert!(pm25.is_finite());
        }
    }
    Ok(())
}

#[tokio::test]
#[ignore]
async fn guests_cannot_write() -> Result<()> {
    // ---
    let url = format!("{}/readings/reclassify", base_url());
    let response = Client::new()
        .post(&url)
        .json(&serde_json::json!({}))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().contains_key("x-request-id"));
    Ok(())
}
