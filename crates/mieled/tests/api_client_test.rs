#![cfg(feature = "integration_miele")]
//! Miele HTTP client, fetcher and dispatcher against a local mock server.

use std::sync::Arc;

use mieled::integrations::miele::Config;
use mieled::integrations::miele::Error;
use mieled::integrations::miele::client::ReqwestTransport;
use mieled::integrations::miele::client::StaticToken;
use mieled::integrations::miele::dispatch::Command;
use mieled::integrations::miele::dispatch::Dispatcher;
use mieled::integrations::miele::snapshot::SnapshotFetcher;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

async fn setup() -> (MockServer, Arc<ReqwestTransport>) {
    let server = MockServer::start().await;
    let config: Config = toml::from_str(&format!(
        "access_token = \"s3cret\"\nbase_url = \"{}\"\n",
        server.uri()
    ))
    .unwrap();
    let transport = ReqwestTransport::new(&config).unwrap();
    (server, Arc::new(transport))
}

fn listing() -> serde_json::Value {
    json!({
        "000123": {
            "ident": {
                "type": {"value_raw": 1, "value_localized": "Washing machine"},
                "deviceName": "Laundry",
                "deviceIdentLabel": {"fabNumber": "000123", "techType": "WCI870"},
                "xkmIdentLabel": {"techType": "EK057", "releaseVersion": "08.32"}
            },
            "state": {
                "status": {"value_raw": 5, "value_localized": "In use"},
                "remainingTime": [1, 30],
                "signalDoor": false
            }
        }
    })
}

#[tokio::test]
async fn test_fetch_devices() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .and(query_param("language", "de"))
        .and(header("authorization", "Bearer s3cret"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .expect(1)
        .mount(&server)
        .await;

    let devices = SnapshotFetcher::new(transport).fetch("de").await.unwrap();
    let washer = &devices["000123"];
    assert_eq!(washer.name, "Laundry");
    assert_eq!(washer.status_code(), Some(5));
    assert_eq!(washer.time("remainingTime"), Some(vec![1, 30]));
}

#[tokio::test]
async fn test_fetch_rejected_token() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_token"))
        .mount(&server)
        .await;

    let result = SnapshotFetcher::new(transport).fetch("en").await;
    assert_eq!(result.unwrap_err(), Error::AuthExpired);
}

#[tokio::test]
async fn test_fetch_server_error() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = SnapshotFetcher::new(transport).fetch("en").await.unwrap_err();
    assert_eq!(
        err,
        Error::FetchFailed {
            status: 503,
            body: "maintenance".to_string()
        }
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unreachable_server() {
    let transport = ReqwestTransport::with_client(
        reqwest::Client::new(),
        "http://127.0.0.1:1",
        Arc::new(StaticToken::new("s3cret")),
    );

    let err = SnapshotFetcher::new(transport).fetch("en").await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "got {err:?}");
}

#[tokio::test]
async fn test_dispatch_commands() {
    let (server, transport) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/v1/devices/000123/actions"))
        .and(body_json(json!({"processAction": 2})))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/devices/000123/programs"))
        .and(body_json(json!({"programId": 24})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(transport);
    dispatcher
        .dispatch("000123", &Command::StopProgram)
        .await
        .unwrap();
    dispatcher
        .dispatch("000123", &Command::StartProgram(24))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dispatch_rejected() {
    let (server, transport) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/v1/devices/000456/actions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("light not supported"))
        .mount(&server)
        .await;

    let err = Dispatcher::new(transport)
        .dispatch("000456", &Command::SetLight(true))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::DispatchFailed {
            device_id: "000456".to_string(),
            status: 400,
            body: "light not supported".to_string(),
        }
    );
    assert!(!err.is_transient());
}
