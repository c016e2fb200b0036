//! REST API tests against the in-memory document store.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tandem_server::config::Config;
use tandem_server::db::{DocumentStore, MemoryStore};
use tandem_server::websocket::ServerMessage;
use tandem_server::AppState;
use tokio::sync::mpsc;
use tower::ServiceExt;

fn config(auth_secret: Option<&str>) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: String::new(),
        auth_secret: auth_secret.map(str::to_string),
    }
}

fn setup(auth_secret: Option<&str>) -> (Router, AppState) {
    let state = AppState::new(Arc::new(MemoryStore::new()), config(auth_secret));
    (tandem_server::app(state.clone()), state)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[cfg(test)]
mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_health() {
        let (app, _) = setup(None);
        let (status, body) = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }
}

#[cfg(test)]
mod collection_tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_list() {
        let (app, _) = setup(None);

        let (status, body) = send(
            &app,
            Method::PUT,
            "/v1/tenants/acme/collections/diesel/D1",
            Some(json!({"id": "D1", "litros": 120})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "D1");
        assert_eq!(body["body"]["tenantId"], "acme");

        let (status, body) =
            send(&app, Method::GET, "/v1/tenants/acme/collections/diesel", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"documents": [{"id": "D1", "body": {"id": "D1", "litros": 120, "tenantId": "acme"}}]})
        );
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let (app, _) = setup(None);
        send(
            &app,
            Method::PUT,
            "/v1/tenants/acme/collections/cxc/C1",
            Some(json!({"id": "C1"})),
            None,
        )
        .await;

        let (_, body) = send(&app, Method::GET, "/v1/tenants/globex/collections/cxc", None, None).await;
        assert_eq!(body["documents"], json!([]));
    }

    #[tokio::test]
    async fn test_foreign_tenant_body_rejected() {
        let (app, state) = setup(None);
        let (status, body) = send(
            &app,
            Method::PUT,
            "/v1/tenants/acme/collections/cxc/C1",
            Some(json!({"id": "C1", "tenantId": "globex"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("globex"));
        assert!(state.store.list("acme", "cxc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_fans_out_to_subscribers() {
        let (app, state) = setup(None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = state.conn_manager.register("acme", tx);
        state.conn_manager.subscribe(&conn_id, "inventario");

        send(
            &app,
            Method::PUT,
            "/v1/tenants/acme/collections/inventario/I1",
            Some(json!({"id": "I1"})),
            None,
        )
        .await;

        match rx.try_recv().unwrap() {
            ServerMessage::CollectionChanged {
                collection,
                documents,
            } => {
                assert_eq!(collection, "inventario");
                assert_eq!(documents.len(), 1);
                assert_eq!(documents[0].body["tenantId"], "acme");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

#[cfg(test)]
mod active_number_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_number_is_not_found() {
        let (app, _) = setup(None);
        let (status, _) = send(&app, Method::GET, "/v1/tenants/acme/active-number", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (app, _) = setup(None);
        let (status, body) = send(
            &app,
            Method::PUT,
            "/v1/tenants/acme/active-number",
            Some(json!({
                "number": "2500042",
                "updatedAt": "2025-03-01T10:00:00.000Z",
                "updatedBy": "u-1",
                "tenantId": "acme"
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["number"], "2500042");

        let (status, body) = send(&app, Method::GET, "/v1/tenants/acme/active-number", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "number": "2500042",
                "updatedAt": "2025-03-01T10:00:00.000Z",
                "updatedBy": "u-1",
                "tenantId": "acme"
            })
        );
    }

    #[tokio::test]
    async fn test_foreign_tenant_rejected() {
        let (app, _) = setup(None);
        let (status, _) = send(
            &app,
            Method::PUT,
            "/v1/tenants/acme/active-number",
            Some(json!({"number": "2500042", "tenantId": "globex"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[cfg(test)]
mod user_tests {
    use super::*;

    #[tokio::test]
    async fn test_profile_round_trip() {
        let (app, _) = setup(None);
        let (status, _) = send(&app, Method::GET, "/v1/users/u-1", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            Method::PUT,
            "/v1/users/u-1",
            Some(json!({"tenantId": "acme"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, Method::GET, "/v1/users/u-1", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"userId": "u-1", "tenantId": "acme"}));
    }
}

#[cfg(test)]
mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_secret_enforced() {
        let (app, _) = setup(Some("s3cret"));
        let uri = "/v1/tenants/acme/collections/cxc";

        let (status, _) = send(&app, Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, Method::GET, uri, None, Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, Method::GET, uri, None, Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _) = setup(Some("s3cret"));
        let (status, _) = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
