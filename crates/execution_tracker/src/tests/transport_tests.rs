use super::*;

fn endpoint(base: &str, run_id: &str) -> String {
    let base = normalize_ws_base(base).expect("base");
    execution_endpoint(&base, &RunId::from(run_id))
        .expect("endpoint")
        .to_string()
}

#[test]
fn builds_execution_endpoint_with_trailing_slash() {
    assert_eq!(
        endpoint("ws://localhost:8000", "run-42"),
        "ws://localhost:8000/ws/executions/run-42/"
    );
    assert_eq!(
        endpoint("wss://api.example.com/", "abc"),
        "wss://api.example.com/ws/executions/abc/"
    );
}

#[test]
fn keeps_base_path_prefix() {
    assert_eq!(
        endpoint("ws://gateway.local/backend/", "r1"),
        "ws://gateway.local/backend/ws/executions/r1/"
    );
}

#[test]
fn maps_http_schemes_to_websocket_schemes() {
    assert_eq!(
        endpoint("http://127.0.0.1:9000", "r1"),
        "ws://127.0.0.1:9000/ws/executions/r1/"
    );
    assert_eq!(
        endpoint("https://crm.example.com", "r1"),
        "wss://crm.example.com/ws/executions/r1/"
    );
}

#[test]
fn run_id_is_a_single_encoded_segment() {
    assert_eq!(
        endpoint("ws://localhost", "a/b c"),
        "ws://localhost/ws/executions/a%2Fb%20c/"
    );
}

#[test]
fn rejects_unsupported_schemes() {
    let err = normalize_ws_base("ftp://example.com").expect_err("ftp must be rejected");
    assert!(matches!(err, TrackerError::InvalidBaseUrl { .. }));
    assert!(WsTransport::new("localhost:8000").is_err());
}
