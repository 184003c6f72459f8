//! Provider implementation for the binmap REST API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;

use binmap_core::{
    config::ApiConfig,
    model::{Bin, CollectionCenter, EntityId, EntityKind},
    normalize::{Canonical, DropReason},
    ports::{CollectionPort, CredentialStore, FetchError, ProfilePort, unwrap_collection},
    session::UserProfile,
    sources::MapSources,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors raised while resolving a scanned QR code.
pub enum QrError {
    /// The payload does not address a bin.
    #[error("QR code does not address a bin: {0}")]
    NotABin(String),
    /// The payload points outside the configured API base.
    #[error("QR code points outside the configured API: {0}")]
    OutsideApi(String),
    /// The bin could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The bin record cannot be placed on the map.
    #[error("Invalid bin record: {0:?}")]
    Invalid(DropReason),
}

/// Authenticated access to the API, shared by every port.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: Arc<ApiConfig>,
    credentials: Arc<dyn CredentialStore>,
}

impl ApiClient {
    /// Create a client bound to the given HTTP client, configuration and credential store.
    #[must_use]
    pub fn new(client: Client, config: ApiConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            config: Arc::new(config),
            credentials,
        }
    }

    /// URL of the API resource at `segments`, each segment percent-encoded.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::NetworkUnreachable`] when the configured base URL
    /// is not a valid hierarchical URL.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.config.base_url).map_err(|err| {
            FetchError::NetworkUnreachable(format!("invalid API base URL: {err}"))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                FetchError::NetworkUnreachable("API base URL cannot carry a path".to_owned())
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET the resource at `segments` with the bearer token and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::AuthRequired`] without issuing the request when no
    /// token is available, otherwise the classified request failure.
    pub async fn get(&self, segments: &[&str]) -> Result<Value, FetchError> {
        let token = self
            .credentials
            .token()
            .await
            .ok_or(FetchError::AuthRequired)?;

        let url = self.endpoint(segments)?;
        tracing::debug!(%url, "api request");
        fetch_json(self.client.get(url).bearer_auth(token)).await
    }

    /// Fetch a single bin; failures are logged and yield `None`.
    pub async fn fetch_bin_by_id(&self, id: &EntityId) -> Option<Bin> {
        self.fetch_record(&[EntityKind::Bin.path(), &id.0]).await
    }

    /// Fetch a single collection center; failures are logged and yield `None`.
    pub async fn fetch_center_by_id(&self, id: &EntityId) -> Option<CollectionCenter> {
        self.fetch_record(&[EntityKind::Center.path(), &id.0]).await
    }

    /// Fetch the bins of one community; failures are logged and yield an empty list.
    pub async fn fetch_bins_by_community(&self, community_id: &str) -> Vec<Bin> {
        let raw = match self
            .get(&[EntityKind::Bin.path(), "community", community_id])
            .await
            .and_then(unwrap_collection)
        {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(community = community_id, %err, "community bins unavailable");
                return Vec::new();
            }
        };
        binmap_core::normalize::normalize_records::<Bin>(&raw).items
    }

    /// Resolve a scanned QR payload into the bin it addresses.
    ///
    /// The payload is a URL on the configured API, or an API path, ending in
    /// `bins/{id}`.
    ///
    /// # Errors
    ///
    /// Returns a [`QrError`] when the payload does not address a bin of this
    /// API, the fetch fails, or the record is invalid.
    pub async fn resolve_qr(&self, payload: &str) -> Result<Bin, QrError> {
        let id = bin_id_from_qr(payload, &self.config.base_url)?;
        let body = self.get(&[EntityKind::Bin.path(), &id.0]).await?;
        Bin::from_record(&unwrap_record(body)).map_err(QrError::Invalid)
    }

    async fn fetch_record<T: Canonical>(&self, segments: &[&str]) -> Option<T> {
        let path = segments.join("/");
        let body = match self.get(segments).await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(%path, %err, "record unavailable");
                return None;
            }
        };
        match T::from_record(&unwrap_record(body)) {
            Ok(entity) => Some(entity),
            Err(reason) => {
                tracing::warn!(%path, ?reason, "record cannot be placed on the map");
                None
            }
        }
    }
}

/// Remote collection of centers or bins.
pub struct HttpCollectionPort {
    api: ApiClient,
    kind: EntityKind,
}

impl HttpCollectionPort {
    /// Create a port serving `kind` through `api`.
    #[must_use]
    pub fn new(api: ApiClient, kind: EntityKind) -> Self {
        Self { api, kind }
    }
}

#[async_trait]
impl CollectionPort for HttpCollectionPort {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn fetch(&self) -> Result<Value, FetchError> {
        let records = unwrap_collection(self.api.get(&[self.kind.path()]).await?)?;
        tracing::info!(
            kind = %self.kind,
            records = records.as_array().map_or(0, Vec::len),
            "received collection"
        );
        Ok(records)
    }
}

/// Profile of the signed-in user.
pub struct HttpProfilePort {
    api: ApiClient,
}

impl HttpProfilePort {
    /// Create a profile port using `api`.
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ProfilePort for HttpProfilePort {
    async fn current_user(&self) -> Result<UserProfile, FetchError> {
        let body = self.api.get(&["users", "me"]).await?;
        serde_json::from_value(unwrap_record(body))
            .map_err(|err| FetchError::MalformedResponse(err.to_string()))
    }
}

/// Build the centers and bins sources for the map.
#[must_use]
pub fn sources(api: &ApiClient) -> MapSources {
    MapSources::new(
        Arc::new(HttpCollectionPort::new(api.clone(), EntityKind::Center)),
        Arc::new(HttpCollectionPort::new(api.clone(), EntityKind::Bin)),
    )
}

/// Identifier of the bin addressed by a QR payload.
///
/// The payload is resolved against `base_url`, so it may be an absolute URL or
/// a path relative to the API. The result must lie under the API base and read
/// `bins/{id}` from there.
///
/// # Errors
///
/// Returns [`QrError::OutsideApi`] for URLs outside the API base and
/// [`QrError::NotABin`] when the remaining path is not `bins/{id}`.
pub fn bin_id_from_qr(payload: &str, base_url: &str) -> Result<EntityId, QrError> {
    let payload = payload.trim();
    let base = Url::parse(base_url).map_err(|_| QrError::OutsideApi(payload.to_owned()))?;
    let url = base
        .join(payload)
        .map_err(|_| QrError::NotABin(payload.to_owned()))?;

    let base_segments = path_segments(&base);
    let segments = path_segments(&url);
    let relative = match segments.strip_prefix(base_segments.as_slice()) {
        Some(relative) if url.origin() == base.origin() => relative,
        _ => return Err(QrError::OutsideApi(payload.to_owned())),
    };

    match relative {
        // Encoded identifiers would be encoded twice on the way out.
        [kind, id] if kind == EntityKind::Bin.path() && id != "community" && !id.contains('%') => {
            Ok(EntityId(id.clone()))
        }
        _ => Err(QrError::NotABin(payload.to_owned())),
    }
}

fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

// Single-record endpoints answer with the record or with `{data: record}`.
fn unwrap_record(body: Value) -> Value {
    match body {
        Value::Object(mut fields) if fields.get("data").is_some_and(Value::is_object) => {
            fields.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn classify(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_decode() || err.is_body() {
        FetchError::MalformedResponse(err.to_string())
    } else {
        FetchError::NetworkUnreachable(err.to_string())
    }
}

// Small helper to fetch and decode JSON with status handling.
async fn fetch_json(req: RequestBuilder) -> Result<Value, FetchError> {
    let response = req.send().await.map_err(|err| classify(&err))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::ServerError {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await.map_err(|err| classify(&err))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|err| FetchError::MalformedResponse(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::get,
    };
    use binmap_core::{ports::FailureKind, session::AppSession};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    const TOKEN: &str = "secret";

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            == Some("Bearer secret")
    }

    fn guarded(headers: &HeaderMap, body: Value) -> Response {
        if authorized(headers) {
            Json(body).into_response()
        } else {
            (StatusCode::UNAUTHORIZED, "token expired").into_response()
        }
    }

    fn router() -> Router {
        Router::new()
            .route(
                "/api/collect-center",
                get(|headers: HeaderMap| async move {
                    guarded(
                        &headers,
                        json!({"data": [{"id": "c1", "name": "Center A", "latitude": 48.85, "longitude": 2.35}]}),
                    )
                }),
            )
            .route(
                "/api/collect-center/{id}",
                get(|headers: HeaderMap, Path(id): Path<String>| async move {
                    guarded(
                        &headers,
                        json!({"data": {"id": id, "latitude": "45.1", "longitude": "4.9", "name": "  "}}),
                    )
                }),
            )
            .route(
                "/api/bins",
                get(|headers: HeaderMap| async move {
                    guarded(
                        &headers,
                        json!({"content": [
                            {"id": "b1", "latitude": 48.86, "longitude": 2.36, "garbageType": "glass"},
                            {"id": "b2", "latitude": "x", "longitude": 2.36},
                        ]}),
                    )
                }),
            )
            .route(
                "/api/bins/{id}",
                get(|headers: HeaderMap, Path(id): Path<String>| async move {
                    let latitude = if id == "broken" { json!(200) } else { json!(45.0) };
                    guarded(&headers, json!({"id": id, "latitude": latitude, "longitude": 4.8}))
                }),
            )
            .route(
                "/api/bins/community/{id}",
                get(|headers: HeaderMap, Path(id): Path<String>| async move {
                    guarded(
                        &headers,
                        json!([{"id": "b9", "latitude": 1, "longitude": 1, "community": id}]),
                    )
                }),
            )
            .route(
                "/api/users/me",
                get(|headers: HeaderMap| async move {
                    guarded(&headers, json!({"data": {"id": "u1", "username": "ada"}}))
                }),
            )
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move { axum::serve(listener, router).await.expect("serve") });
        format!("http://{addr}/api/")
    }

    async fn api(base_url: String, token: Option<&str>) -> ApiClient {
        let session = Arc::new(AppSession::new());
        if let Some(token) = token {
            session.login(token, None).await;
        }
        let config = ApiConfig {
            base_url,
            timeout: Duration::from_secs(2),
            ..ApiConfig::default()
        };
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("client");
        ApiClient::new(client, config, session)
    }

    #[tokio::test]
    async fn collections_are_fetched_and_unwrapped() {
        let api = api(serve(router()).await, Some(TOKEN)).await;
        let sources = sources(&api);

        let centers = sources.centers.fetch().await.expect("centers");
        assert_eq!(centers.as_array().map(Vec::len), Some(1));
        assert_eq!(centers[0]["name"], "Center A");

        let bins = sources.bins.fetch().await.expect("bins");
        assert_eq!(bins.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn rejected_token_is_a_server_error() {
        let api = api(serve(router()).await, Some("stale")).await;
        let err = HttpCollectionPort::new(api, EntityKind::Bin)
            .fetch()
            .await
            .expect_err("401");
        assert_eq!(
            err,
            FetchError::ServerError {
                status: 401,
                body: "token expired".to_owned()
            }
        );
        assert_eq!(err.kind(), FailureKind::AuthExpired);
    }

    #[tokio::test]
    async fn missing_token_fails_fast() {
        let api = api("http://127.0.0.1:1/api/".to_owned(), None).await;
        let err = HttpCollectionPort::new(api, EntityKind::Center)
            .fetch()
            .await
            .expect_err("no token");
        assert_eq!(err, FetchError::AuthRequired);
    }

    #[tokio::test]
    async fn unreachable_api_is_classified() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let api = api(format!("http://{addr}/api/"), Some(TOKEN)).await;
        let err = HttpCollectionPort::new(api, EntityKind::Center)
            .fetch()
            .await
            .expect_err("refused");
        assert_eq!(err.kind(), FailureKind::NetworkUnreachable);
    }

    #[tokio::test]
    async fn unexpected_bodies_are_malformed() {
        let router = Router::new()
            .route("/api/collect-center", get(|| async { "<html>maintenance</html>" }))
            .route("/api/bins", get(|| async { Json(json!({"items": []})) }));
        let api = api(serve(router).await, Some(TOKEN)).await;
        let sources = sources(&api);

        assert!(matches!(
            sources.centers.fetch().await,
            Err(FetchError::MalformedResponse(_))
        ));
        assert!(matches!(
            sources.bins.fetch().await,
            Err(FetchError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn single_records_and_community_bins_are_normalized() {
        let api = api(serve(router()).await, Some(TOKEN)).await;

        let bin = api.fetch_bin_by_id(&EntityId::from("b7")).await.expect("bin");
        assert_eq!(bin.point.id, EntityId::from("b7"));
        assert_eq!(api.fetch_bin_by_id(&EntityId::from("broken")).await, None);

        let center = api
            .fetch_center_by_id(&EntityId::from("c3"))
            .await
            .expect("center");
        assert_eq!(center.name, binmap_core::model::UNNAMED_CENTER);
        assert!((center.point.latitude - 45.1).abs() < 1e-9);

        let community = api.fetch_bins_by_community("north").await;
        assert_eq!(community.len(), 1);
        assert_eq!(community[0].community, "north");
    }

    #[tokio::test]
    async fn qr_codes_resolve_against_the_configured_api() {
        let base = serve(router()).await;
        let api = api(base.clone(), Some(TOKEN)).await;

        let bin = api
            .resolve_qr(&format!("{base}bins/b42"))
            .await
            .expect("bin");
        assert_eq!(bin.point.id, EntityId::from("b42"));

        assert!(matches!(
            api.resolve_qr("http://192.168.1.55:8080/api/bins/b42").await,
            Err(QrError::OutsideApi(_))
        ));

        assert_eq!(
            api.resolve_qr("hello").await,
            Err(QrError::NotABin("hello".to_owned()))
        );
        assert_eq!(
            api.resolve_qr("/api/bins/broken").await,
            Err(QrError::Invalid(DropReason::OutOfRange))
        );
    }

    #[tokio::test]
    async fn profile_is_read_from_the_data_envelope() {
        let api = api(serve(router()).await, Some(TOKEN)).await;
        let user = HttpProfilePort::new(api).current_user().await.expect("profile");
        assert_eq!(user.display_name(), "ada");
    }

    #[test]
    fn qr_payloads_map_to_bin_ids() {
        let base = "https://api.example.org/api/";
        assert_eq!(bin_id_from_qr("bins/b1", base), Ok(EntityId::from("b1")));
        assert_eq!(
            bin_id_from_qr(" https://api.example.org/api/bins/b2/ ", base),
            Ok(EntityId::from("b2"))
        );
        assert!(matches!(
            bin_id_from_qr("https://api.example.org/api/bins/community", base),
            Err(QrError::NotABin(_))
        ));
        assert!(matches!(
            bin_id_from_qr("https://api.example.org/api/centers/c1", base),
            Err(QrError::NotABin(_))
        ));
        assert!(matches!(
            bin_id_from_qr("https://elsewhere.example.org/api/bins/b1", base),
            Err(QrError::OutsideApi(_))
        ));
    }

    #[test]
    fn qr_payloads_stay_inside_the_api_base() {
        let base = "https://api.example.org/api/";
        assert_eq!(bin_id_from_qr("bins/b1?x=1", base), Ok(EntityId::from("b1")));
        assert!(matches!(
            bin_id_from_qr("https://api.example.org/admin/bins/b1", base),
            Err(QrError::OutsideApi(_))
        ));
        assert!(matches!(
            bin_id_from_qr("/bins/b1", base),
            Err(QrError::OutsideApi(_))
        ));
        assert!(matches!(
            bin_id_from_qr("bins/b%2F1", base),
            Err(QrError::NotABin(_))
        ));
    }

    #[tokio::test]
    async fn endpoint_segments_are_encoded() {
        let versioned = api("https://api.example.org/v1".to_owned(), None).await;
        let url = versioned.endpoint(&["bins", "a b?c/d"]).expect("valid base");
        assert_eq!(url.as_str(), "https://api.example.org/v1/bins/a%20b%3Fc%2Fd");

        let slashed = api("https://api.example.org/api/".to_owned(), None).await;
        let url = slashed.endpoint(&["users", "me"]).expect("valid base");
        assert_eq!(url.as_str(), "https://api.example.org/api/users/me");
    }
}
