//! Request handlers of the serving engine.
//!
//! Everything below `/apis` goes through [`serve_apis`], which resolves the
//! path, negotiates media types and dispatches to the storage bound to the
//! addressed resource.

use super::discovery;
use super::group::InstalledResource;
use super::request_info::{ApiPath, RequestInfo};
use super::response::ApiResponse;
use super::state::AppState;
use super::watch::{watch_response, WatchLimits};
use crate::{ApiError, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use example_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::{DeleteOptions as MetaDeleteOptions, ListMeta};
use example_core::{DynamicObject, MediaType};
use example_storage::{
    apply_merge_patch, DeleteOptions, FieldSelector, LabelSelector, ListOptions, RequestContext, UpdateFn, Verb,
    WatchOptions,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const MERGE_PATCH: &str = "application/merge-patch+json";
const STATUS_SUBRESOURCE: &str = "status";

/// Query parameters understood by resource requests.
///
/// Values are kept as strings so malformed input is reported as a `Status`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub watch: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub limit: Option<String>,
    #[serde(rename = "continue")]
    pub continue_token: Option<String>,
    pub resource_version: Option<String>,
    pub allow_watch_bookmarks: Option<String>,
    pub timeout_seconds: Option<String>,
}

impl QueryParams {
    fn flag(value: &Option<String>) -> bool {
        value.as_deref().is_some_and(|v| v == "true" || v == "1")
    }

    pub fn is_watch(&self) -> bool {
        Self::flag(&self.watch)
    }

    fn selectors(&self) -> Result<(LabelSelector, FieldSelector)> {
        let labels = match self.label_selector.as_deref() {
            Some(selector) => LabelSelector::parse(selector)?,
            None => LabelSelector::everything(),
        };
        let fields = match self.field_selector.as_deref() {
            Some(selector) => FieldSelector::parse(selector)?,
            None => FieldSelector::everything(),
        };
        Ok((labels, fields))
    }

    fn list_options(&self) -> Result<ListOptions> {
        let (label_selector, field_selector) = self.selectors()?;
        let limit = self
            .limit
            .as_deref()
            .map(|limit| {
                limit
                    .parse::<usize>()
                    .map_err(|_| ApiError::BadRequest(format!("invalid limit {:?}", limit)))
            })
            .transpose()?;

        Ok(ListOptions {
            label_selector,
            field_selector,
            limit,
            continue_token: self.continue_token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn watch_options(&self) -> Result<WatchOptions> {
        let (label_selector, field_selector) = self.selectors()?;
        Ok(WatchOptions {
            label_selector,
            field_selector,
            resource_version: self.resource_version.clone().filter(|rv| !rv.is_empty()),
            allow_bookmarks: Self::flag(&self.allow_watch_bookmarks),
        })
    }

    fn timeout(&self) -> Result<Option<Duration>> {
        self.timeout_seconds
            .as_deref()
            .map(|secs| {
                secs.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ApiError::BadRequest(format!("invalid timeoutSeconds {:?}", secs)))
            })
            .transpose()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Entry point for `/apis` and everything below it
pub async fn serve_apis(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    Query(query): Query<QueryParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().strip_prefix("/apis").unwrap_or_default();

    let api_path = match ApiPath::parse(path) {
        Some(api_path) => api_path,
        None => return not_found(uri.path()).into_response(),
    };

    match api_path {
        ApiPath::Resource(info) => {
            let started = Instant::now();
            let verb = info
                .verb(&method, query.is_watch())
                .map(|v| v.as_str())
                .unwrap_or("unknown");
            let resource = info.resource_path();

            let response = handle_resource(&state, &method, info, query, &headers, body)
                .await
                .unwrap_or_else(IntoResponse::into_response);

            state.request_metrics.observe(
                verb,
                &resource,
                response.status().as_u16(),
                started.elapsed(),
            );
            response
        }
        discovery_path => {
            if method != Method::GET {
                return ApiError::MethodNotAllowed(format!("{} is not supported on {}", method, uri.path()))
                    .into_response();
            }
            serve_discovery(&state, discovery_path, &headers)
                .unwrap_or_else(IntoResponse::into_response)
        }
    }
}

fn not_found(path: &str) -> ApiError {
    ApiError::NotFound(format!("the server could not find the requested resource ({})", path))
}

fn serve_discovery(state: &AppState, path: ApiPath, headers: &HeaderMap) -> Result<Response> {
    let media_type = MediaType::negotiate(header_str(headers, header::ACCEPT))?;

    let response = match path {
        ApiPath::Groups => ApiResponse::document(
            &state.codecs,
            media_type,
            &discovery::api_group_list(state.groups.values()),
        )?,
        ApiPath::Group(group) => {
            let group = state
                .groups
                .get(&group)
                .ok_or_else(|| not_found(&format!("/apis/{}", group)))?;
            ApiResponse::document(&state.codecs, media_type, &discovery::api_group(group))?
        }
        ApiPath::Version(gv) => {
            let version = state
                .groups
                .get(&gv.group)
                .and_then(|group| group.version(&gv.version))
                .ok_or_else(|| not_found(&format!("/{}", gv.api_path())))?;
            ApiResponse::document(&state.codecs, media_type, &discovery::api_resource_list(version))?
        }
        ApiPath::Resource(info) => return Err(not_found(&info.resource_path())),
    };
    Ok(response.into_response())
}

/// Resolve the addressed resource and run the verb against its storage
async fn handle_resource(
    state: &AppState,
    method: &Method,
    info: RequestInfo,
    query: QueryParams,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let group = state
        .groups
        .get(&info.group_version.group)
        .ok_or_else(|| not_found(&info.resource_path()))?;
    let resource = group
        .version(&info.group_version.version)
        .and_then(|version| version.resources.get(&info.resource))
        .ok_or_else(|| not_found(&info.resource_path()))?;

    let status = match info.subresource.as_deref() {
        None => false,
        Some(STATUS_SUBRESOURCE) => true,
        Some(_) => return Err(not_found(&info.resource_path())),
    };

    let verb = info.verb(method, query.is_watch()).ok_or_else(|| {
        ApiError::MethodNotAllowed(format!(
            "{} is not supported on {}",
            method,
            info.resource_path()
        ))
    })?;
    if status && !matches!(verb, Verb::Get | Verb::Update | Verb::Patch) {
        return Err(ApiError::MethodNotAllowed(format!(
            "{} is not supported on {}",
            verb,
            info.resource_path()
        )));
    }
    if !resource.supports(verb) {
        return Err(ApiError::MethodNotAllowed(format!(
            "{} is not supported on {}",
            verb,
            info.resource_path()
        )));
    }

    // Namespaced kinds are only listed and watched across namespaces
    match (resource.namespaced(), info.namespace.is_some()) {
        (true, false) if !matches!(verb, Verb::List | Verb::Watch) => {
            return Err(not_found(&info.resource_path()))
        }
        (false, true) => return Err(not_found(&info.resource_path())),
        _ => {}
    }

    let accept = MediaType::negotiate(header_str(headers, header::ACCEPT))?;
    let request_token = state.shutdown.child_token();
    let ctx = RequestContext::new(request_token.clone()).with_namespace(info.namespace.clone());
    let codecs = &group.codecs;
    let name = info.name.clone().unwrap_or_default();

    debug!("{} {}", verb, info.resource_path());

    let response = match verb {
        Verb::Get => {
            let object = resource.storage.get(&ctx, &name).await?;
            ApiResponse::object(StatusCode::OK, codecs, accept, &object)?.into_response()
        }
        Verb::List => {
            let list = resource.storage.list(&ctx, &query.list_options()?).await?;
            let items = list
                .items
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            let metadata = ListMeta {
                resource_version: Some(list.resource_version.to_string()),
                continue_: list.continue_token,
                remaining_item_count: list.remaining_item_count,
                ..Default::default()
            };
            let body = json!({
                "apiVersion": resource.gvk().api_version(),
                "kind": resource.list_kind,
                "metadata": metadata,
                "items": items,
            });
            ApiResponse::ok(codecs, accept, &body)?.into_response()
        }
        Verb::Watch => {
            let options = query.watch_options()?;
            let timeout = query.timeout()?;
            let stream = resource.storage.watch(&ctx, &options).await?;
            info!(
                "Watching {} from version {}",
                info.resource_path(),
                options.resource_version.as_deref().unwrap_or("0")
            );
            watch_response(
                stream,
                codecs.clone(),
                accept,
                WatchLimits {
                    shutdown: state.shutdown.clone(),
                    timeout,
                    guard: request_token.drop_guard(),
                },
            )
        }
        Verb::Create => {
            let object = decode_body(resource, &info, codecs, headers, &body)?;
            let created = resource.storage.create(&ctx, object).await?;
            ApiResponse::object(StatusCode::CREATED, codecs, accept, &created)?.into_response()
        }
        Verb::Update => {
            let object = decode_body(resource, &info, codecs, headers, &body)?;
            let update: UpdateFn = Box::new(move |_current| Ok(object));
            let updated = if status {
                resource.storage.update_status(&ctx, &name, update).await?
            } else {
                resource.storage.update(&ctx, &name, update).await?
            };
            ApiResponse::object(StatusCode::OK, codecs, accept, &updated)?.into_response()
        }
        Verb::Patch => {
            let patch = patched_object(resource, codecs, merge_patch(headers, &body)?);
            let patched = if status {
                resource.storage.update_status(&ctx, &name, patch).await?
            } else {
                resource.storage.patch(&ctx, &name, patch).await?
            };
            ApiResponse::object(StatusCode::OK, codecs, accept, &patched)?.into_response()
        }
        Verb::Delete => {
            let options = delete_options(&body)?;
            let deleted = resource.storage.delete(&ctx, &name, &options).await?;
            ApiResponse::object(StatusCode::OK, codecs, accept, &deleted)?.into_response()
        }
    };

    Ok(response)
}

/// Decode a create or update body and reconcile its identity with the path
fn decode_body(
    resource: &InstalledResource,
    info: &RequestInfo,
    codecs: &example_core::CodecFactory,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<DynamicObject> {
    let media_type = MediaType::from_content_type(header_str(headers, header::CONTENT_TYPE))?;
    let mut object = codecs.decode(body, media_type, Some(resource.gvk()))?;

    if let Some(name) = info.name.as_deref() {
        match object.name() {
            None | Some("") => object.metadata.name = Some(name.to_string()),
            Some(n) if n == name => {}
            Some(n) => {
                return Err(ApiError::BadRequest(format!(
                    "the name of the object ({}) does not match the name on the URL ({})",
                    n, name
                )))
            }
        }
    }

    if resource.namespaced() {
        let namespace = info.namespace.as_deref().unwrap_or_default();
        match object.namespace() {
            None | Some("") => object.metadata.namespace = Some(namespace.to_string()),
            Some(ns) if ns == namespace => {}
            Some(_) => {
                return Err(ApiError::BadRequest(
                    "the namespace of the provided object does not match the namespace sent on the request"
                        .to_string(),
                ))
            }
        }
    } else {
        object.metadata.namespace = None;
    }

    Ok(object)
}

/// Merge `patch` into the stored object and normalize the result as the
/// served kind, the way a decoded request body would be.
fn patched_object(
    resource: &InstalledResource,
    codecs: &example_core::CodecFactory,
    patch: Value,
) -> UpdateFn {
    let merge = apply_merge_patch(patch);
    let scheme = codecs.scheme().clone();
    let gvk = resource.gvk().clone();
    Box::new(move |current| {
        let mut merged = merge(current)?;
        merged.api_version = gvk.api_version();
        merged.kind = gvk.kind.clone();
        Ok(scheme.normalize_object(merged)?)
    })
}

fn merge_patch(headers: &HeaderMap, body: &[u8]) -> Result<Value> {
    let content_type = header_str(headers, header::CONTENT_TYPE).unwrap_or_default();
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    if !essence.eq_ignore_ascii_case(MERGE_PATCH) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "the body of the request was in an unknown format - accepted media types include: {}",
            MERGE_PATCH
        )));
    }

    let patch: Value = serde_json::from_slice(body)?;
    if !patch.is_object() {
        return Err(ApiError::BadRequest("a merge patch must be a JSON object".to_string()));
    }
    Ok(patch)
}

fn delete_options(body: &[u8]) -> Result<DeleteOptions> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DeleteOptions::default());
    }
    let options: MetaDeleteOptions = serde_json::from_slice(body)?;
    Ok(DeleteOptions {
        resource_version: options.preconditions.and_then(|p| p.resource_version),
    })
}

/// Health check endpoint
pub async fn healthz() -> &'static str {
    "ok"
}

/// Liveness probe
pub async fn livez() -> &'static str {
    "ok"
}

/// Readiness probe; fails once shutdown has begun
pub async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    if state.shutdown.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
    } else {
        "ok".into_response()
    }
}

pub async fn version(State(state): State<Arc<AppState>>) -> Json<example_core::VersionInfo> {
    Json(state.version.clone())
}

pub async fn api_versions(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    MediaType::negotiate(header_str(&headers, header::ACCEPT))
        .map_err(ApiError::from)
        .and_then(|media_type| {
            ApiResponse::document(&state.codecs, media_type, &discovery::api_versions())
        })
        .map(IntoResponse::into_response)
        .unwrap_or_else(IntoResponse::into_response)
}

/// Prometheus exposition; served only when a recorder handle is configured
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            handle.render(),
        )
            .into_response(),
        None => not_found("/metrics").into_response(),
    }
}

pub async fn fallback(uri: Uri) -> Response {
    not_found(uri.path()).into_response()
}
