//! Security context and user token exchange against a local identity broker.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Form, Json, Router,
};
use entity_workflow_base::error::WorkflowTriggerError;
use infra::infra::binding::{IdentityBrokerConfig, OAuthCredentials, WorkflowServiceConfig};
use infra::infra::token::{
    IdentityBroker, TokenBroker, XsuaaIdentityBrokerImpl, USER_TOKEN_GRANT_TYPE,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const PRIVATE_KEY: &str = include_str!("../testdata/broker_rsa_private.pem");
const PUBLIC_KEY: &str = include_str!("../testdata/broker_rsa_public.pem");
const MODULUS: &str = "yGuQoJ8FE9d9qC6x0vMZFP2C9PF_wiJ_z5_jqkXK4EM3J0gDuZeqJLy2BtEqALYjnwGrmhiB6NqhozpS6qsiGjeqKn5R406BQJGW5MXsELcowR5ZsWTwlWeFCe5_wAXAE2Oq_EZewsIFKZXoF8Z8KOJd_uOn31J9GF5zJVdTRqo2TKim8DPY2MKSjqdmSQwGleDH5r8FQNPUpnd2fh5IgC_hS_riAGB4xYScBWL5_u6T7E0lr-KWTvRCB5XLKHvBoX_LTDNMUJAdAzUXffznWaZ-6JRUY2jJ32LwFjyHvAwMI1NI0T1oVNLGmYuoVDdgN8MYHwNYDhluA066nfLF7w";
const KID: &str = "default-jwt-key";

type Forms = Arc<Mutex<Vec<(Option<String>, HashMap<String, String>)>>>;

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn user_jwt(exp: i64, zid: &str) -> String {
    let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some(KID.to_string());
    encode(
        &header,
        &json!({
            "exp": exp,
            "zid": zid,
            "client_id": "sb-orders",
            "user_name": "alice@example.com",
            "scope": ["orders.Write"]
        }),
        &EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap(),
    )
    .unwrap()
}

async fn broker_server(token_status: StatusCode) -> (String, Forms) {
    let forms: Forms = Arc::default();
    let router = Router::new()
        .route(
            "/token_keys",
            get(|| async {
                Json(json!({"keys": [{
                    "kty": "RSA",
                    "kid": KID,
                    "alg": "RS256",
                    "use": "sig",
                    "n": MODULUS,
                    "e": "AQAB"
                }]}))
            }),
        )
        .route(
            "/oauth/token",
            post(
                move |State(forms): State<Forms>,
                      headers: HeaderMap,
                      Form(form): Form<HashMap<String, String>>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    forms.lock().unwrap().push((auth, form));
                    (
                        token_status,
                        Json(json!({"access_token": "workflow-scoped-token", "token_type": "bearer"})),
                    )
                },
            ),
        )
        .with_state(forms.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), forms)
}

fn credentials(url: &str, clientid: &str, verificationkey: Option<&str>) -> OAuthCredentials {
    OAuthCredentials {
        url: url.to_string(),
        clientid: clientid.to_string(),
        clientsecret: format!("{clientid}-secret"),
        verificationkey: verificationkey.map(String::from),
        identityzone: Some("tenant".to_string()),
        xsappname: None,
    }
}

fn token_broker(url: &str, verificationkey: Option<&str>) -> (TokenBroker, WorkflowServiceConfig) {
    let identity = XsuaaIdentityBrokerImpl::new(
        reqwest::Client::new(),
        IdentityBrokerConfig {
            credentials: credentials(url, "sb-orders", verificationkey),
        },
    );
    let workflow = WorkflowServiceConfig::new(
        "http://127.0.0.1:9/rest",
        credentials(url, "sb-workflow", None),
    )
    .unwrap();
    (TokenBroker::new(Arc::new(identity)), workflow)
}

#[tokio::test]
async fn test_exchange_with_fetched_token_keys() {
    let (url, forms) = broker_server(StatusCode::OK).await;
    let (broker, workflow) = token_broker(&url, None);
    let jwt = user_jwt(now() + 600, "tenant");

    let token = broker
        .exchange(&workflow, Some(format!("Bearer {jwt}").as_str()))
        .await
        .unwrap();
    assert_eq!(token.as_str(), "workflow-scoped-token");

    let forms = forms.lock().unwrap();
    assert_eq!(forms.len(), 1);
    let (auth, form) = &forms[0];
    // basic auth of the workflow binding, not of the caller's app
    assert!(auth.as_deref().unwrap().starts_with("Basic "));
    assert_eq!(form.get("grant_type").map(String::as_str), Some(USER_TOKEN_GRANT_TYPE));
    assert_eq!(form.get("client_id").map(String::as_str), Some("sb-workflow"));
    assert_eq!(form.get("assertion"), Some(&jwt));
}

#[tokio::test]
async fn test_security_context_with_binding_verification_key() {
    let (url, _) = broker_server(StatusCode::OK).await;
    let identity = XsuaaIdentityBrokerImpl::new(
        reqwest::Client::new(),
        IdentityBrokerConfig {
            credentials: credentials(&url, "sb-orders", Some(PUBLIC_KEY)),
        },
    );
    let context = identity
        .create_security_context(&user_jwt(now() + 600, "tenant"))
        .await
        .unwrap();
    assert_eq!(context.user_name(), Some("alice@example.com"));
    assert_eq!(context.zone_id(), Some("tenant"));
}

#[tokio::test]
async fn test_expired_token_is_exchange_failed() {
    let (url, forms) = broker_server(StatusCode::OK).await;
    let (broker, workflow) = token_broker(&url, Some(PUBLIC_KEY));
    let jwt = user_jwt(now() - 3600, "tenant");

    let err = broker
        .exchange(&workflow, Some(format!("Bearer {jwt}").as_str()))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WorkflowTriggerError>(),
        Some(WorkflowTriggerError::TokenExchangeFailed(_))
    ));
    assert!(forms.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_foreign_zone_is_exchange_failed() {
    let (url, forms) = broker_server(StatusCode::OK).await;
    let (broker, workflow) = token_broker(&url, Some(PUBLIC_KEY));
    let jwt = user_jwt(now() + 600, "other-tenant");

    let err = broker
        .exchange(&workflow, Some(format!("Bearer {jwt}").as_str()))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WorkflowTriggerError>(),
        Some(WorkflowTriggerError::TokenExchangeFailed(_))
    ));
    assert!(forms.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_token_request_is_exchange_failed() {
    let (url, forms) = broker_server(StatusCode::UNAUTHORIZED).await;
    let (broker, workflow) = token_broker(&url, Some(PUBLIC_KEY));
    let jwt = user_jwt(now() + 600, "tenant");

    let err = broker
        .exchange(&workflow, Some(format!("Bearer {jwt}").as_str()))
        .await
        .unwrap_err();
    match err.downcast_ref::<WorkflowTriggerError>() {
        Some(WorkflowTriggerError::TokenExchangeFailed(m)) => assert!(m.contains("401")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(forms.lock().unwrap().len(), 1);
}
