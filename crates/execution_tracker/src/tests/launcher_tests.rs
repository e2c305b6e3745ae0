use super::*;
use axum::{extract::Path, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn starts_run_and_returns_run_id() {
    let app = Router::new().route(
        "/workflows/:workflow_id/execute/",
        post(|Path(workflow_id): Path<String>| async move {
            Json(json!({ "run_id": format!("run-for-{workflow_id}") }))
        }),
    );
    let api_base = serve(app).await;

    let launcher = HttpRunLauncher::new(format!("{api_base}/"));
    let run_id = launcher.start_run("wf-7").await.expect("run id");

    assert_eq!(run_id, RunId::from("run-for-wf-7"));
}

#[tokio::test]
async fn accepts_id_alias_in_response() {
    let app = Router::new().route(
        "/workflows/:workflow_id/execute/",
        post(|| async { Json(json!({ "id": "abc-123", "status": "queued" })) }),
    );
    let api_base = serve(app).await;

    let run_id = HttpRunLauncher::new(api_base)
        .start_run("wf-1")
        .await
        .expect("run id");

    assert_eq!(run_id.as_str(), "abc-123");
}

#[tokio::test]
async fn non_success_status_is_a_launch_error() {
    let app = Router::new().route(
        "/workflows/:workflow_id/execute/",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json::<Value>(json!({ "detail": "engine offline" })),
            )
        }),
    );
    let api_base = serve(app).await;

    let err = HttpRunLauncher::new(api_base)
        .start_run("wf-1")
        .await
        .expect_err("500 must fail");

    match err {
        TrackerError::RunLaunch { workflow_id, .. } => assert_eq!(workflow_id, "wf-1"),
        other => panic!("expected run launch error, got {other:?}"),
    }
}

#[test]
fn start_url_trims_trailing_slash() {
    let launcher = HttpRunLauncher::new("http://api.local/v1/");
    assert_eq!(
        launcher.start_url("wf-9"),
        "http://api.local/v1/workflows/wf-9/execute/"
    );
}
