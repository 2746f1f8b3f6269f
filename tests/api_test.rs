//! HTTP surface tests: requests go through the full router stack in process.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use envmon_stats::{
    models::StationStatus, routes, store::MemoryStore, MonitoringService, ServiceSettings,
};

struct Api {
    app: Router,
    station_id: i64,
    region_id: i64,
    sensor_id: i64,
}

async fn setup() -> Api {
    // ---
    let store = Arc::new(MemoryStore::new());
    let region = store.add_region("North Forest", "forest").await;
    let station = store
        .add_station(region.id, "Station 1", StationStatus::Normal)
        .await;
    let sensor = store.add_sensor(station.id, "weather").await;
    let service = MonitoringService::new(store, ServiceSettings::default());

    Api {
        app: routes::router(service),
        station_id: station.id,
        region_id: region.id,
        sensor_id: sensor.id,
    }
}

impl Api {
    async fn call(&self, method: Method, uri: &str, role: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        // ---
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(role) = role {
            builder = builder.header("x-user-role", role).header("x-user-name", "tester");
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.app.clone().oneshot(request).await?;
        assert!(response.headers().contains_key("x-request-id"));
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    fn reading(&self, collected_at: &str, pm25: f64) -> Value {
        json!({
            "sensor_id": self.sensor_id,
            "station_id": self.station_id,
            "region_id": self.region_id,
            "collected_at": collected_at,
            "temperature": 21.5,
            "pm25": pm25,
        })
    }
}

#[tokio::test]
async fn health_needs_no_role() -> Result<()> {
    // ---
    let api = setup().await;
    let (status, body) = api.call(Method::GET, "/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn ingest_then_query() -> Result<()> {
    // ---
    let api = setup().await;

    let (status, body) = api
        .call(
            Method::POST,
            "/readings",
            Some("user"),
            Some(api.reading("2025-03-26T18:45:00Z", 600.0)),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["validity"], "invalid");
    assert_eq!(body["anomalies"][0]["kind"], "pm25");
    let id = body["reading_id"].as_i64().unwrap();

    api.call(
        Method::POST,
        "/readings",
        Some("user"),
        Some(api.reading("2025-03-27T08:00:00Z", 30.0)),
    )
    .await?;

    let (status, body) = api
        .call(
            Method::GET,
            "/readings?time_range=2025-03-26T00:00:00Z,2025-03-27T00:00:00Z",
            None,
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["id"], id);

    let (_, body) = api.call(Method::GET, "/readings?validity=valid", None, None).await?;
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let (status, body) = api
        .call(Method::GET, &format!("/readings/{id}"), None, None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pm25"], 600.0);
    assert_eq!(body["anomalies"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn error_codes_follow_the_taxonomy() -> Result<()> {
    // ---
    let api = setup().await;
    let reading = api.reading("2025-03-26T18:45:00Z", 600.0);

    let (status, body) = api
        .call(Method::POST, "/readings", None, Some(reading.clone()))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "FORBIDDEN");

    let (status, _) = api
        .call(Method::POST, "/readings", Some("superuser"), Some(reading.clone()))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = api
        .call(Method::GET, "/readings?time_range=yesterday", None, None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = api.call(Method::GET, "/reports/404", None, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = api
        .call(Method::POST, "/readings", Some("user"), Some(reading))
        .await?;
    let id = body["reading_id"].as_i64().unwrap();
    let (status, body) = api
        .call(
            Method::PATCH,
            &format!("/readings/{id}/status"),
            Some("user"),
            Some(json!({ "validity": "valid" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "CONFLICT");

    let (status, _) = api
        .call(Method::DELETE, &format!("/readings/{id}"), Some("user"), None)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = api
        .call(Method::DELETE, &format!("/readings/{id}"), Some("admin"), None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn statistics_and_reports_round_trip() -> Result<()> {
    // ---
    let api = setup().await;
    for hour in ["00", "06", "12", "18"] {
        api.call(
            Method::POST,
            "/readings",
            Some("user"),
            Some(api.reading(&format!("2025-03-26T{hour}:00:00Z"), 40.0)),
        )
        .await?;
    }

    let run = json!({
        "region_id": api.region_id,
        "station_id": api.station_id,
        "period": "week",
        "period_date": "2025-03-26",
    });
    let (status, body) = api
        .call(Method::POST, "/statistics/run", Some("user"), Some(run))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], true);

    let (_, body) = api
        .call(Method::GET, "/statistics?period=week", None, None)
        .await?;
    assert_eq!(body[0]["period_date"], "2025-03-24");
    assert_eq!(body[0]["data_count"], 4);
    assert_eq!(body[0]["avg_pm25"], 40.0);

    let request = json!({ "period": { "kind": "week", "year": 2025, "week": 13 } });
    let (status, body) = api
        .call(Method::POST, "/reports", Some("user"), Some(request))
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "environmental-report-week-2025-W13");
    let content = body["content"].as_str().unwrap_or_default();
    assert!(content.starts_with("Weekly Environmental Monitoring Report"));
    assert!(content.contains("Station 1"));

    let id = body["report_id"].as_i64().unwrap();
    let (status, body) = api
        .call(Method::GET, &format!("/reports/{id}"), None, None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["generated_by"], "tester");
    Ok(())
}
