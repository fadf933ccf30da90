//! Operator flows against the full router with a mock extractor.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

use regmargin::dashboard::build_router;
use regmargin::dashboard::routes::DashboardState;
use regmargin::llm::bridge::ExtractionBridge;
use regmargin::session::Session;

use crate::mock_extractor::{sheet, MockExtractor};

const LIMIT: usize = 4 * 1024 * 1024;

fn router_with(mock: MockExtractor) -> Router {
    let state = Arc::new(DashboardState::new(
        Session::default(),
        Some(ExtractionBridge::new(Box::new(mock))),
    ));
    build_router(state, LIMIT)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn approx(v: &Value, expected: f64) -> bool {
    v.as_f64().map(|x| (x - expected).abs() < 1e-9).unwrap_or(false)
}

#[tokio::test]
async fn extraction_overwrites_matched_units_and_globals() {
    let app = router_with(MockExtractor::returning(sheet()));

    let (status, json) = send(
        &app,
        "POST",
        "/api/extract",
        Some(serde_json::json!({ "image": "data:image/jpeg;base64,aGVsbG8=" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["applied"], true);
    assert_eq!(json["matched"].as_array().unwrap().len(), 5);
    assert_eq!(json["unmatched"], serde_json::json!(["TOTAL"]));

    let totals = &json["report"]["totals"];
    assert!(approx(&totals["gross_power_mw"], 92.0));
    assert!(approx(&totals["total_rpf_mw"], 2.76));
    assert!(approx(&totals["total_rsf_mw"], 0.0));
    assert!(approx(&totals["deviation_pct"], 15.0));
    assert_eq!(totals["in_range"], false);
    assert_eq!(json["report"]["processing"], false);
}

#[tokio::test]
async fn failed_extraction_leaves_inputs_untouched() {
    let app = router_with(MockExtractor::failing("upstream 500"));

    let (_, before) = send(&app, "GET", "/api/report", None).await;
    let (status, json) = send(
        &app,
        "POST",
        "/api/extract",
        Some(serde_json::json!({ "image": "aGVsbG8=" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["applied"], false);
    assert_eq!(json["report"]["units"], before["units"]);
    assert_eq!(json["report"]["globals"], before["globals"]);
    assert_eq!(json["report"]["processing"], false);

    // The busy flag was released; a second attempt is accepted.
    let (status, _) = send(
        &app,
        "POST",
        "/api/extract",
        Some(serde_json::json!({ "image": "aGVsbG8=" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn second_upload_is_refused_while_busy() {
    let release = Arc::new(Notify::new());
    let mock = MockExtractor::returning(sheet()).held(release.clone());
    let calls = mock.calls();
    let app = router_with(mock);

    let first = {
        let app = app.clone();
        tokio::spawn(async move {
            send(
                &app,
                "POST",
                "/api/extract",
                Some(serde_json::json!({ "image": "aGVsbG8=" })),
            )
            .await
        })
    };

    // Wait until the first extraction is in flight.
    for _ in 0..200 {
        if !calls.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(calls.lock().unwrap().len(), 1);

    let (_, report) = send(&app, "GET", "/api/report", None).await;
    assert_eq!(report["processing"], true);

    let (status, json) = send(
        &app,
        "POST",
        "/api/extract",
        Some(serde_json::json!({ "image": "aGVsbG8=" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "busy");

    release.notify_one();
    let (status, json) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["applied"], true);
    assert_eq!(calls.lock().unwrap().len(), 1);

    let (_, report) = send(&app, "GET", "/api/report", None).await;
    assert_eq!(report["processing"], false);
}

#[tokio::test]
async fn raw_upload_keeps_content_type() {
    let mock = MockExtractor::returning(sheet());
    let calls = mock.calls();
    let app = router_with(mock);

    let req = Request::builder()
        .method("POST")
        .uri("/api/extract/raw")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(&b"\x89PNG fake"[..]))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].mime_type, "image/png");
    assert!(!calls[0].base64.is_empty());
}

#[tokio::test]
async fn operator_edits_recompute_margins() {
    let app = router_with(MockExtractor::returning(sheet()));

    // Garbage input coerces to zero.
    let (status, json) = send(
        &app,
        "PUT",
        "/api/units/g1/load",
        Some(serde_json::json!({ "value": "n/a" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(approx(&json["units"][0]["real_disp_mw"], 0.0));

    // Taking G2 out of both bands zeroes its margins only.
    let (_, json) = send(
        &app,
        "PUT",
        "/api/units/g2/regulation",
        Some(serde_json::json!({ "primary": false, "secondary": false })),
    )
    .await;
    let g2 = &json["units"][1];
    assert!(approx(&g2["total_margin_mw"], 0.0));
    assert!(approx(&g2["real_disp_mw"], 16.928));

    // Lower the target so the remaining 69.37 MW is within 10%.
    let (_, json) = send(
        &app,
        "PUT",
        "/api/settings",
        Some(serde_json::json!({ "programmed_mw": 70 })),
    )
    .await;
    let totals = &json["totals"];
    assert!(approx(&totals["gross_power_mw"], 69.37));
    assert!(approx(&totals["deviation_pct"], -0.9));
    assert_eq!(totals["in_range"], true);
}
