//! Integration tests for the Keycloak directory client against a mock
//! server, covering pagination and access-token caching/refresh.

use kckc_sync::{
    http_client::{HttpClientCircuitBreakerConfig, HttpClientConfig},
    keycloak::{KeycloakClient, KeycloakConfig},
};
use serde_json::json;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn config(url: String) -> KeycloakConfig {
    KeycloakConfig {
        url,
        realm: "test-realm".to_string(),
        client_id: Some("kckc-sync".to_string()),
        client_secret: Some("shh".to_string()),
        admin_username: None,
        admin_password: None,
        page_size: 2,
        webhook_hmac_secret: "unused-in-these-tests".to_string(),
        service_account_prefixes: vec!["service-account-".to_string()],
    }
}

async fn client(server: &MockServer) -> KeycloakClient {
    let http = HttpClientConfig::default().to_client("keycloak-test").await.unwrap();
    let breaker = HttpClientCircuitBreakerConfig::default().make_circuit_breaker();
    KeycloakClient::new(config(server.uri()), http, breaker, std::time::Duration::from_secs(5)).unwrap()
}

fn token_mock(expires_in: u64) -> Mock {
    Mock::given(method("POST"))
        .and(path("/realms/test-realm/protocol/openid-connect/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "tok-1", "expires_in": expires_in })),
        )
}

fn user(id: &str, username: &str, enabled: bool) -> serde_json::Value {
    json!({
        "id": id,
        "username": username,
        "enabled": enabled,
        "email": null,
        "createdTimestamp": 1_700_000_000_000i64,
    })
}

#[tokio::test]
async fn fetch_all_users_paginates_and_filters_disabled() {
    let server = MockServer::start().await;
    token_mock(300).mount(&server).await;

    Mock::given(method("GET"))
        .and(path("/admin/realms/test-realm/users"))
        .and(query_param("first", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            user("1", "alice", true),
            user("2", "bob", false),
        ]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/test-realm/users"))
        .and(query_param("first", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![user("3", "carol", true)]))
        .mount(&server)
        .await;

    let client = client(&server).await;
    let users = client.fetch_all_users().await.unwrap();

    let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "carol"], "bob is disabled and must be filtered out");
}

#[tokio::test]
async fn access_token_is_cached_across_calls() {
    let server = MockServer::start().await;
    token_mock(300).expect(1).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/test-realm/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&server)
        .await;

    let client = client(&server).await;
    client.fetch_all_users().await.unwrap();
    client.fetch_all_users().await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn access_token_is_refetched_once_expired() {
    let server = MockServer::start().await;
    token_mock(0).expect(2).mount(&server).await;

    let client = client(&server).await;
    client.health_check().await.unwrap();
    client.health_check().await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn find_user_by_id_maps_404_to_not_found() {
    let server = MockServer::start().await;
    token_mock(300).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/test-realm/users/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server).await;
    let err = client.find_user_by_id("missing").await.unwrap_err();
    assert!(matches!(err, kckc_sync::keycloak::KeycloakError::NotFound(_)));
}

#[tokio::test]
async fn unauthorized_response_triggers_one_forced_refresh() {
    let server = MockServer::start().await;
    token_mock(300).mount(&server).await;

    Mock::given(method("GET"))
        .and(path("/admin/realms/test-realm/users/stale-token-user"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/test-realm/users/stale-token-user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user("9", "dana", true)))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = client(&server).await;
    let found = client.find_user_by_id("stale-token-user").await.unwrap();
    assert_eq!(found.username, "dana");
}
