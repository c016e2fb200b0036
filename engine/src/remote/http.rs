//! Client for the Tandem document server.
//!
//! CRUD goes over REST; pushes arrive over one WebSocket per subscription.

use super::protocol::{ClientMessage, CollectionResponse, ServerMessage, UserProfile};
use super::{ActiveNumberDoc, RemoteDocument, RemoteStore, Subscription};
use crate::{Error, Result, TenantId};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

/// Remote store reached over HTTP.
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
    token: Option<String>,
    online: AtomicBool,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            token: None,
            online: AtomicBool::new(true),
        }
    }

    /// Send a bearer token with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn tenant_url(&self, tenant: &str, rest: &str) -> String {
        format!(
            "{}/v1/tenants/{}{}",
            self.base_url,
            urlencoding::encode(tenant),
            rest
        )
    }

    fn collection_url(&self, tenant: &str, collection: &str) -> String {
        self.tenant_url(
            tenant,
            &format!("/collections/{}", urlencoding::encode(collection)),
        )
    }

    fn websocket_url(&self, tenant: &str) -> String {
        let url = self.tenant_url(tenant, "/ws");
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            url
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request, tracking connectivity from the outcome.
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        match builder.send().await {
            Ok(response) => {
                self.online.store(true, Ordering::Relaxed);
                Ok(response)
            }
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    self.online.store(false, Ordering::Relaxed);
                }
                Err(e.into())
            }
        }
    }

    /// Open an authenticated realtime channel, send `hello`, and forward
    /// matching pushes.
    async fn open_feed<T, F>(&self, tenant: &str, hello: ClientMessage, select: F) -> Result<Subscription<T>>
    where
        T: Send + 'static,
        F: Fn(ServerMessage) -> Option<T> + Send + 'static,
    {
        let mut request = self.websocket_url(tenant).into_client_request()?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::Config(format!("invalid bearer token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        let (socket, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut stream) = socket.split();
        sink.send(Message::Text(serde_json::to_string(&hello)?.into()))
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Realtime channel failed");
                        break;
                    }
                };
                match serde_json::from_str::<ServerMessage>(text.as_str()) {
                    Ok(ServerMessage::Error { message }) => {
                        tracing::warn!(%message, "Realtime channel reported an error");
                    }
                    Ok(message) => {
                        if let Some(item) = select(message) {
                            if tx.send(item).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Unparsable realtime message"),
                }
            }
            let _ = sink.close().await;
        });

        Ok(Subscription::with_task(rx, task))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn get_all(&self, tenant: &str, collection: &str) -> Result<Vec<RemoteDocument>> {
        let url = self.collection_url(tenant, collection);
        let response = self
            .send(self.request(reqwest::Method::GET, &url))
            .await?
            .error_for_status()?;
        let body: CollectionResponse = response.json().await?;
        Ok(body.documents)
    }

    async fn upsert(
        &self,
        tenant: &str,
        collection: &str,
        doc_id: &str,
        body: &Value,
    ) -> Result<()> {
        let url = format!(
            "{}/{}",
            self.collection_url(tenant, collection),
            urlencoding::encode(doc_id)
        );
        self.send(self.request(reqwest::Method::PUT, &url).json(body))
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn subscribe(
        &self,
        tenant: &str,
        collection: &str,
    ) -> Result<Subscription<Vec<RemoteDocument>>> {
        let wanted = collection.to_string();
        self.open_feed(
            tenant,
            ClientMessage::Subscribe {
                collection: wanted.clone(),
            },
            move |message| match message {
                ServerMessage::CollectionChanged {
                    collection,
                    documents,
                } if collection == wanted => Some(documents),
                _ => None,
            },
        )
        .await
    }

    async fn get_active_number(&self, tenant: &str) -> Result<Option<ActiveNumberDoc>> {
        let url = self.tenant_url(tenant, "/active-number");
        let response = self.send(self.request(reqwest::Method::GET, &url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json().await?))
    }

    async fn set_active_number(&self, tenant: &str, doc: &ActiveNumberDoc) -> Result<()> {
        let url = self.tenant_url(tenant, "/active-number");
        self.send(self.request(reqwest::Method::PUT, &url).json(doc))
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn subscribe_active_number(
        &self,
        tenant: &str,
    ) -> Result<Subscription<ActiveNumberDoc>> {
        self.open_feed(tenant, ClientMessage::SubscribeActiveNumber, |message| {
            match message {
                ServerMessage::ActiveNumberChanged { doc } => Some(doc),
                _ => None,
            }
        })
        .await
    }

    async fn user_tenant(&self, user_id: &str) -> Result<Option<TenantId>> {
        let url = format!("{}/v1/users/{}", self.base_url, urlencoding::encode(user_id));
        let response = self.send(self.request(reqwest::Method::GET, &url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let profile: UserProfile = response.error_for_status()?.json().await?;
        Ok(profile.tenant_id.filter(|t| !t.is_empty()))
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_urls() {
        let remote = HttpRemote::new("http://localhost:3000/");
        assert_eq!(
            remote.collection_url("acme corp", "cxc"),
            "http://localhost:3000/v1/tenants/acme%20corp/collections/cxc"
        );
        assert_eq!(
            remote.tenant_url("acme", "/active-number"),
            "http://localhost:3000/v1/tenants/acme/active-number"
        );
    }

    #[test]
    fn websocket_scheme_follows_http_scheme() {
        assert_eq!(
            HttpRemote::new("http://h:1").websocket_url("t"),
            "ws://h:1/v1/tenants/t/ws"
        );
        assert_eq!(
            HttpRemote::new("https://h").websocket_url("t"),
            "wss://h/v1/tenants/t/ws"
        );
    }

    #[test]
    fn starts_online() {
        assert!(HttpRemote::new("http://h").is_online());
    }
}
