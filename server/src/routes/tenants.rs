//! Tenant-scoped routes: collections, active number and realtime channel.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::{get, put},
    Json, Router,
};
use serde_json::Value;
use tandem_engine::remote::protocol::{ActiveNumberDoc, CollectionResponse, RemoteDocument};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::active_number::{self, ActiveNumberUpdate};
use crate::handlers::{documents, websocket};
use crate::AppState;

/// Create tenant routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/tenants/{tenant}/collections/{collection}",
            get(list_handler),
        )
        .route(
            "/v1/tenants/{tenant}/collections/{collection}/{id}",
            put(put_document_handler),
        )
        .route(
            "/v1/tenants/{tenant}/active-number",
            get(get_active_number_handler).put(put_active_number_handler),
        )
        .route("/v1/tenants/{tenant}/ws", get(ws_handler))
}

/// GET /v1/tenants/{tenant}/collections/{collection}
async fn list_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((tenant, collection)): Path<(String, String)>,
) -> Result<Json<CollectionResponse>> {
    let response = documents::handle_list(state.store.as_ref(), &tenant, &collection).await?;
    Ok(Json(response))
}

/// PUT /v1/tenants/{tenant}/collections/{collection}/{id}
async fn put_document_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((tenant, collection, id)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<RemoteDocument>> {
    let document = documents::handle_put(
        state.store.as_ref(),
        &state.conn_manager,
        &tenant,
        &collection,
        &id,
        body,
    )
    .await?;
    Ok(Json(document))
}

/// GET /v1/tenants/{tenant}/active-number
async fn get_active_number_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(tenant): Path<String>,
) -> Result<Json<ActiveNumberDoc>> {
    let doc = active_number::handle_get(state.store.as_ref(), &tenant).await?;
    Ok(Json(doc))
}

/// PUT /v1/tenants/{tenant}/active-number
async fn put_active_number_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(tenant): Path<String>,
    Json(update): Json<ActiveNumberUpdate>,
) -> Result<Json<ActiveNumberDoc>> {
    let doc =
        active_number::handle_put(state.store.as_ref(), &state.conn_manager, &tenant, update)
            .await?;
    Ok(Json(doc))
}

/// GET /v1/tenants/{tenant}/ws - upgrade to the realtime channel.
async fn ws_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(tenant): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        websocket::handle_websocket_connection(socket, state.store, state.conn_manager, tenant)
    })
}
