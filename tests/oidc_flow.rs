// SPDX-License-Identifier: MIT OR Apache-2.0
//! The SSH-to-OIDC bridge, end to end: the client signs a subject JWT with
//! its SSH key, exchanges it at a mock issuer for an RS256 ID token, and
//! presents that token to a reposerver whose write side is OIDC-protected.

use chrono::Utc;
use dbt_auth::{LocalKeySigner, ProfileAuthorizer, TokenProvider};
use dbt_config::{AuthDescriptor, ServerProfile};
use dbt_oidc::{ExchangeClient, ExchangeConfig};
use dbt_reposerver::{build_app, build_state, ServerConfig};
use dbt_transport::{ProgressOptions, Transport, TransportError};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SSH_KEY: &str = include_str!("../crates/dbt-auth/tests/fixtures/id_ed25519");
const RSA_PEM: &str = include_str!("../crates/dbt-reposerver/tests/fixtures/rsa_private.pem");
const JWKS_JSON: &str = include_str!("../crates/dbt-reposerver/tests/fixtures/jwks.json");

/// Mint the RS256 ID token the mock issuer hands back.
fn id_token(issuer: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-key".to_string());
    let now = Utc::now().timestamp();
    let claims = json!({
        "iss": issuer,
        "sub": "nik",
        "aud": "dbt",
        "email": "nik@example.com",
        "groups": ["publishers"],
        "iat": now,
        "exp": now + 300,
    });
    let key = EncodingKey::from_rsa_pem(RSA_PEM.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, &claims, &key).unwrap()
}

/// An issuer that answers discovery, JWKS, and the RFC 8693 exchange.
async fn mount_issuer(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "jwks_uri": format!("{}/keys", server.uri()),
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS_JSON, "application/json"))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange",
        ))
        .and(body_string_contains("subject_token="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "unused",
            "token_type": "bearer",
            "expires_in": 300,
            "id_token": id_token(&server.uri()),
        })))
        .mount(server)
        .await;
}

async fn spawn_oidc_server(root: &Path, issuer: &str) -> String {
    let config: ServerConfig = serde_json::from_value(json!({
        "address": "127.0.0.1",
        "port": 0,
        "serverRoot": root,
        "authTypePut": "oidc",
        "authOptsPut": {
            "oidc": {
                "issuerUrl": issuer,
                "audiences": ["dbt"],
                "usernameClaimKey": "email",
                "allowedGroups": ["publishers"],
            }
        },
    }))
    .unwrap();
    let state = Arc::new(build_state(&config).await.unwrap());
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{address}")
}

fn oidc_transport(base: &str, issuer: &str) -> Transport {
    let profile = ServerProfile {
        repository: format!("{base}/dbt"),
        truststore: format!("{base}/dbt/truststore"),
        tools_repository: format!("{base}/dbt-tools"),
        auth: Some(AuthDescriptor::Oidc {
            issuer: issuer.to_string(),
            audience: "dbt".to_string(),
            client_id: "dbt-client".to_string(),
            client_secret: None,
            username: "nik".to_string(),
            connector_id: None,
        }),
    };

    let signer = Arc::new(LocalKeySigner::from_openssh(SSH_KEY).unwrap());
    let exchange = ExchangeClient::new(
        ExchangeConfig {
            issuer: issuer.to_string(),
            audience: "dbt".to_string(),
            client_id: "dbt-client".to_string(),
            client_secret: None,
            username: "nik".to_string(),
            connector_id: None,
        },
        signer,
    )
    .unwrap();

    let authorizer = ProfileAuthorizer::new(&profile).with_token_provider(Arc::new(exchange));
    Transport::new(Arc::new(authorizer), ProgressOptions::default())
}

#[tokio::test]
async fn exchanged_id_token_authorizes_a_write() {
    let issuer = MockServer::start().await;
    mount_issuer(&issuer).await;

    let root = tempfile::tempdir().unwrap();
    let base = spawn_oidc_server(root.path(), &issuer.uri()).await;

    let transport = oidc_transport(&base, &issuer.uri());
    transport
        .put(
            &format!("{base}/dbt-tools/catalog/1.0.0/description.txt"),
            b"Published through the bridge.".to_vec(),
        )
        .await
        .unwrap();

    assert_eq!(
        std::fs::read(root.path().join("dbt-tools/catalog/1.0.0/description.txt")).unwrap(),
        b"Published through the bridge."
    );
}

#[tokio::test]
async fn exchange_happens_once_for_consecutive_writes() {
    let issuer = MockServer::start().await;
    mount_issuer(&issuer).await;

    let root = tempfile::tempdir().unwrap();
    let base = spawn_oidc_server(root.path(), &issuer.uri()).await;

    let transport = oidc_transport(&base, &issuer.uri());
    for n in 0..3 {
        transport
            .put(&format!("{base}/file-{n}"), b"x".to_vec())
            .await
            .unwrap();
    }

    // One token exchange serves the whole session; the cache handles the
    // rest. Discovery and JWKS also stay at one fetch each server-side.
    let exchanges = issuer
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/token")
        .count();
    assert_eq!(exchanges, 1);
}

#[tokio::test]
async fn foreign_bearer_token_is_rejected() {
    let issuer = MockServer::start().await;
    mount_issuer(&issuer).await;

    let root = tempfile::tempdir().unwrap();
    let base = spawn_oidc_server(root.path(), &issuer.uri()).await;

    struct ForgedToken;

    #[async_trait::async_trait]
    impl TokenProvider for ForgedToken {
        async fn bearer_token(&self) -> Result<String, dbt_auth::AuthError> {
            Ok("not-a-real-id-token".to_string())
        }
    }

    let profile = ServerProfile {
        repository: format!("{base}/dbt"),
        truststore: format!("{base}/dbt/truststore"),
        tools_repository: format!("{base}/dbt-tools"),
        auth: Some(AuthDescriptor::Oidc {
            issuer: issuer.uri(),
            audience: "dbt".to_string(),
            client_id: "dbt-client".to_string(),
            client_secret: None,
            username: "nik".to_string(),
            connector_id: None,
        }),
    };
    let authorizer = ProfileAuthorizer::new(&profile).with_token_provider(Arc::new(ForgedToken));
    let transport = Transport::new(Arc::new(authorizer), ProgressOptions::default());

    match transport
        .put(&format!("{base}/denied"), b"x".to_vec())
        .await
        .unwrap_err()
    {
        TransportError::Status { status, .. } => assert_eq!(status, 401),
        other => panic!("expected 401, got {other:?}"),
    }
}
