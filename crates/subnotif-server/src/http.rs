// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! RESTCONF style HTTP routes of the subscription service.
//!
//! Request bodies are decoded according to their `Content-Type`
//! (`application/yang-data+xml` or JSON otherwise), responses use the media
//! type asked for in `Accept` and fall back to the request's.

use crate::session::{ConnectionSession, SessionTracker};
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use std::{convert::Infallible, str::FromStr};
use subnotif_model::{
    json, node::Node, notification::Encoding, xml, SubscriptionId,
    SUBSCRIBED_NOTIFICATIONS_MODULE,
};
use subnotif_service::{
    datastore::InMemoryDatastore,
    error::{ErrorTag, RpcError, SubscriptionError},
    rpc::{
        input::{RpcBody, RpcOperation, RpcRequest, StreamFilterEntry},
        RpcOutput, SubscriptionRpcHandler,
    },
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AppState {
    handler: SubscriptionRpcHandler<InMemoryDatastore>,
    sessions: SessionTracker,
    root: String,
    listener_buffer_size: usize,
    closing: CancellationToken,
}

impl AppState {
    /// `closing` ends every open event stream once cancelled
    pub fn new(
        handler: SubscriptionRpcHandler<InMemoryDatastore>,
        root: &str,
        listener_buffer_size: usize,
        closing: CancellationToken,
    ) -> Self {
        Self {
            handler,
            sessions: SessionTracker::default(),
            root: root.trim_matches('/').to_string(),
            listener_buffer_size,
            closing,
        }
    }

    pub const fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }
}

pub fn build_router(state: AppState) -> Router {
    let root = state.root.clone();
    Router::new()
        .route(
            &format!("/{root}/operations/:operation"),
            post(invoke_operation),
        )
        .route(&format!("/{root}/streams/:id"), get(attach_stream))
        .route(
            &format!("/{root}/data/*path"),
            get(read_data).put(put_data).delete(delete_data),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Data resources of the `ietf-subscribed-notifications` module
#[derive(Debug, Clone, PartialEq, Eq)]
enum DataResource {
    Streams,
    Receivers(SubscriptionId),
    StreamFilter(String),
}

impl FromStr for DataResource {
    type Err = SubscriptionError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let unknown = || SubscriptionError::invalid_value(format!("unknown data resource {path}"));
        let relative = path
            .trim_matches('/')
            .strip_prefix(SUBSCRIBED_NOTIFICATIONS_MODULE)
            .and_then(|path| path.strip_prefix(':'))
            .ok_or_else(unknown)?;
        let segments = relative.split('/').collect::<Vec<_>>();
        match segments.as_slice() {
            ["streams"] => Ok(Self::Streams),
            ["subscriptions", subscription, "receivers"] => {
                let id = subscription
                    .strip_prefix("subscription=")
                    .and_then(|id| id.parse().ok())
                    .ok_or_else(unknown)?;
                Ok(Self::Receivers(id))
            }
            ["filters", filter] => filter
                .strip_prefix("stream-filter=")
                .filter(|name| !name.is_empty())
                .map(|name| Self::StreamFilter(name.to_string()))
                .ok_or_else(unknown),
            _ => Err(unknown()),
        }
    }
}

fn request_encoding(headers: &HeaderMap) -> Encoding {
    let is_xml = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("xml"));
    if is_xml {
        Encoding::Xml
    } else {
        Encoding::Json
    }
}

fn response_encoding(headers: &HeaderMap, fallback: Encoding) -> Encoding {
    match headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
    {
        Some(accept) if accept.contains("xml") => Encoding::Xml,
        Some(accept) if accept.contains("json") => Encoding::Json,
        _ => fallback,
    }
}

fn parse_body(encoding: Encoding, body: &str) -> Result<RpcBody, SubscriptionError> {
    match encoding {
        Encoding::Json => RpcBody::from_json_str(body),
        Encoding::Xml => RpcBody::from_xml_str(body),
    }
}

fn payload(status: StatusCode, encoding: Encoding, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, encoding.media_type())], body).into_response()
}

/// `read` selects 404 for unknown subscriptions and filters
fn error_response(error: &SubscriptionError, encoding: Encoding, read: bool) -> Response {
    let status = match error.error_tag() {
        ErrorTag::InvalidValue | ErrorTag::MissingElement => match error {
            SubscriptionError::UnknownSubscription(_) | SubscriptionError::UnknownFilter(_)
                if read =>
            {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::BAD_REQUEST,
        },
        ErrorTag::OperationFailed => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorTag::OperationNotSupported => StatusCode::NOT_IMPLEMENTED,
        ErrorTag::InUse => StatusCode::CONFLICT,
    };
    let rpc_error = RpcError::from(error);
    match encoding {
        Encoding::Xml => match rpc_error.to_xml() {
            Ok(body) => payload(status, Encoding::Xml, body),
            Err(err) => {
                warn!(error = %err, "failed to encode error as XML");
                payload(status, Encoding::Json, rpc_error.to_json().to_string())
            }
        },
        Encoding::Json => payload(status, Encoding::Json, rpc_error.to_json().to_string()),
    }
}

fn unknown_resource(error: &SubscriptionError, encoding: Encoding) -> Response {
    let mut response = error_response(error, encoding, true);
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

fn node_response(state: &AppState, node: &Node, encoding: Encoding) -> Response {
    match encoding {
        Encoding::Json => payload(StatusCode::OK, encoding, json::encode_node(node).to_string()),
        Encoding::Xml => {
            let schema = state.handler.schema().current_schema_context();
            match xml::encode_node(node, &schema) {
                Ok(body) => payload(StatusCode::OK, encoding, body),
                Err(err) => error_response(
                    &SubscriptionError::Internal(err.to_string()),
                    encoding,
                    true,
                ),
            }
        }
    }
}

async fn invoke_operation(
    State(state): State<AppState>,
    ConnectInfo(connection): ConnectInfo<ConnectionSession>,
    Path(operation): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    state.sessions.track(&connection, &state.handler);
    let input_encoding = request_encoding(&headers);
    let output_encoding = response_encoding(&headers, input_encoding);
    let session = connection.transport_session();
    debug!(session = %session, %operation, "invoking operation");
    let result = async {
        let operation = RpcOperation::from_str(&operation)?;
        let body = parse_body(input_encoding, &body)?;
        let schema = state.handler.schema().current_schema_context();
        let request = RpcRequest::parse(operation, &body, &schema)?;
        state.handler.handle(&session, request).await
    }
    .await;
    match result {
        Ok(RpcOutput::Establish(output)) => match output_encoding {
            Encoding::Json => payload(StatusCode::OK, output_encoding, output.to_json().to_string()),
            Encoding::Xml => match output.to_xml() {
                Ok(body) => payload(StatusCode::OK, output_encoding, body),
                Err(err) => error_response(
                    &SubscriptionError::Internal(err.to_string()),
                    output_encoding,
                    false,
                ),
            },
        },
        Ok(RpcOutput::Ok) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err, output_encoding, false),
    }
}

async fn attach_stream(
    State(state): State<AppState>,
    ConnectInfo(connection): ConnectInfo<ConnectionSession>,
    Path(id): Path<SubscriptionId>,
) -> Response {
    match state
        .handler
        .attach_listener(id, state.listener_buffer_size)
        .await
    {
        Ok(rx) => {
            info!(
                subscription_id = id,
                session = connection.id(),
                "stream listener attached"
            );
            let events = rx
                .map(|event| Ok::<_, Infallible>(Event::default().data(event.payload())))
                .take_until(state.closing.clone().cancelled_owned());
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(err) => error_response(&err, Encoding::Json, true),
    }
}

async fn read_data(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let encoding = response_encoding(&headers, Encoding::Json);
    let node = match DataResource::from_str(&path) {
        Ok(DataResource::Streams) => Ok(state.handler.streams()),
        Ok(DataResource::Receivers(id)) => state.handler.receivers(id),
        Ok(DataResource::StreamFilter(name)) => Err(SubscriptionError::NotSupported(format!(
            "reading stream filter {name}"
        ))),
        Err(err) => return unknown_resource(&err, encoding),
    };
    match node {
        Ok(node) => node_response(&state, &node, encoding),
        Err(err) => error_response(&err, encoding, true),
    }
}

async fn put_data(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let input_encoding = request_encoding(&headers);
    let output_encoding = response_encoding(&headers, input_encoding);
    let name = match DataResource::from_str(&path) {
        Ok(DataResource::StreamFilter(name)) => name,
        Ok(_) => {
            return error_response(
                &SubscriptionError::NotSupported(format!("writing {path}")),
                output_encoding,
                false,
            )
        }
        Err(err) => return unknown_resource(&err, output_encoding),
    };
    let result = async {
        let entry = match parse_body(input_encoding, &body)? {
            RpcBody::Json(value) => StreamFilterEntry::from_json(&value)?,
            RpcBody::Xml(element) => {
                let schema = state.handler.schema().current_schema_context();
                StreamFilterEntry::from_xml(&element, &schema)?
            }
            RpcBody::Empty => {
                return Err(SubscriptionError::missing_element(
                    "No stream filter specified",
                ))
            }
        };
        if entry.name() != name {
            return Err(SubscriptionError::invalid_value(format!(
                "stream filter name {} does not match the resource name {name}",
                entry.name()
            )));
        }
        let (name, filter) = entry.into_parts();
        state.handler.put_filter(&name, filter).await
    }
    .await;
    match result {
        Ok(true) => StatusCode::CREATED.into_response(),
        Ok(false) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err, output_encoding, false),
    }
}

async fn delete_data(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let encoding = response_encoding(&headers, Encoding::Json);
    match DataResource::from_str(&path) {
        Ok(DataResource::StreamFilter(name)) => match state.handler.remove_filter(&name).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(err) => error_response(&err, encoding, true),
        },
        Ok(_) => error_response(
            &SubscriptionError::NotSupported(format!("deleting {path}")),
            encoding,
            false,
        ),
        Err(err) => unknown_resource(&err, encoding),
    }
}
