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

//! # Subscribed Notifications Server
//!
//! Wires the subscription runtime of [subnotif_service] to a RESTCONF style
//! HTTP front end:
//!
//! - `POST /{root}/operations/{module}:{rpc}`: the subscription RPCs
//! - `GET /{root}/streams/{id}`: server-sent events of an established
//!   subscription
//! - `GET /{root}/data/ietf-subscribed-notifications:streams`
//! - `GET /{root}/data/ietf-subscribed-notifications:subscriptions/subscription={id}/receivers`
//! - `PUT`/`DELETE /{root}/data/ietf-subscribed-notifications:filters/stream-filter={name}`

use crate::{
    config::{DispatcherConfig, SubscriptionServerConfig},
    http::AppState,
    session::ConnectionSession,
};
use anyhow::Context;
use std::sync::Arc;
use subnotif_service::{
    datastore::InMemoryDatastore,
    dispatcher::{DispatcherActorError, DispatcherHandle},
    router::{InMemoryNotificationRouter, NotificationRouter, StreamSelector},
    rpc::SubscriptionRpcHandler,
    schema::{SchemaContextProvider, WatchSchemaContextProvider},
    state_machine::SubscriptionStateMachine,
    streams::StreamRegistry,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod config;
pub mod http;
pub mod session;

/// The running subscription runtime
pub struct SubscriptionService {
    handler: SubscriptionRpcHandler<InMemoryDatastore>,
    router: InMemoryNotificationRouter,
    schema: Arc<WatchSchemaContextProvider>,
    datastore: InMemoryDatastore,
    dispatcher: DispatcherHandle,
    dispatcher_join: JoinHandle<Result<(), DispatcherActorError>>,
    schema_watcher: JoinHandle<()>,
    listener_buffer_size: usize,
    closing: CancellationToken,
}

impl SubscriptionService {
    /// Starts the dispatcher and connects it to every configured stream
    pub async fn start(
        config: &SubscriptionServerConfig,
        meter: opentelemetry::metrics::Meter,
    ) -> anyhow::Result<Self> {
        let DispatcherConfig {
            cmd_buffer_size,
            listener_buffer_size,
            subscriber_timeout,
            router_buffer_size,
        } = config.dispatcher.clone();
        let streams = Arc::new(StreamRegistry::new(&config.streams));
        let state_machine = Arc::new(SubscriptionStateMachine::new(streams.clone()));
        let schema = Arc::new(WatchSchemaContextProvider::new(config.schema.clone()));
        let router = InMemoryNotificationRouter::default();
        let datastore = InMemoryDatastore::default();
        let (dispatcher_join, dispatcher) = DispatcherHandle::new(
            cmd_buffer_size,
            subscriber_timeout,
            state_machine.clone(),
            schema.watch(),
            either::Either::Left(meter),
        );
        for stream in streams.stream_names() {
            let rx = router.subscribe(StreamSelector::for_stream(&stream), router_buffer_size);
            dispatcher
                .add_stream(stream.clone(), rx)
                .await
                .with_context(|| format!("attaching stream {stream} to the dispatcher"))?;
            info!(%stream, "event stream ready");
        }
        let handler = SubscriptionRpcHandler::new(
            state_machine,
            dispatcher.clone(),
            schema.clone(),
            datastore.clone(),
        );
        let schema_watcher = handler.spawn_schema_watcher();
        Ok(Self {
            handler,
            router,
            schema,
            datastore,
            dispatcher,
            dispatcher_join,
            schema_watcher,
            listener_buffer_size,
            closing: CancellationToken::new(),
        })
    }

    pub const fn handler(&self) -> &SubscriptionRpcHandler<InMemoryDatastore> {
        &self.handler
    }

    /// Router the notifications of the served streams are published to
    pub const fn router(&self) -> &InMemoryNotificationRouter {
        &self.router
    }

    pub const fn schema(&self) -> &Arc<WatchSchemaContextProvider> {
        &self.schema
    }

    pub const fn datastore(&self) -> &InMemoryDatastore {
        &self.datastore
    }

    pub fn app_state(&self, root: &str) -> AppState {
        AppState::new(
            self.handler.clone(),
            root,
            self.listener_buffer_size,
            self.closing.clone(),
        )
    }

    /// Serves the HTTP front end until `shutdown` resolves
    pub async fn serve(
        &self,
        config: &SubscriptionServerConfig,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(config.server.address)
            .await
            .with_context(|| format!("binding to {}", config.server.address))?;
        self.serve_listener(listener, &config.server.root, shutdown)
            .await
    }

    /// Serves the HTTP front end on an already bound listener.
    ///
    /// Once `shutdown` resolves every open event stream is ended, so the
    /// connections carrying them can drain.
    pub async fn serve_listener(
        &self,
        listener: tokio::net::TcpListener,
        root: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        info!(
            address = ?listener.local_addr().ok(),
            %root,
            "serving RESTCONF subscriptions"
        );
        let closing = self.closing.clone();
        let shutdown = async move {
            shutdown.await;
            info!("closing open event streams");
            closing.cancel();
        };
        let app = http::build_router(self.app_state(root));
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<ConnectionSession>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.closing.cancel();
        self.schema_watcher.abort();
        self.dispatcher
            .shutdown()
            .await
            .context("shutting down the dispatcher")?;
        self.dispatcher_join
            .await
            .context("dispatcher task failed")?
            .context("dispatcher terminated with an error")?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::{config::SubscriptionServerConfig, SubscriptionService};
    use std::time::Duration;
    use subnotif_model::schema::{ModuleInfo, SchemaContext, SchemaNode, SchemaNodeKind};
    use subnotif_service::{
        rpc::input::EstablishSubscriptionInput, session::TransportSession, streams::StreamConfig,
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    pub(crate) const TOASTER_MODULE: &str = "example-toaster";

    pub(crate) fn test_config() -> SubscriptionServerConfig {
        SubscriptionServerConfig {
            streams: vec![StreamConfig::new("toaster", None, 8)],
            schema: SchemaContext::new(
                vec![ModuleInfo::new(
                    TOASTER_MODULE,
                    "http://netconfcentral.org/ns/toaster",
                    None,
                )],
                vec![
                    SchemaNode::notification(
                        TOASTER_MODULE,
                        "toasterRestocked",
                        vec![SchemaNode::new("amountOfBread", SchemaNodeKind::Leaf)],
                    ),
                    SchemaNode::notification(TOASTER_MODULE, "toasterOutOfBread", vec![]),
                ],
            ),
            ..Default::default()
        }
    }

    pub(crate) async fn test_service() -> SubscriptionService {
        SubscriptionService::start(
            &test_config(),
            opentelemetry::global::meter("subnotif-server-test"),
        )
        .await
        .expect("service started")
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_start_and_shutdown() {
        let service = test_service().await;
        let mut streams = service
            .handler()
            .state_machine()
            .streams()
            .stream_names();
        streams.sort();
        assert_eq!(streams, vec!["NETCONF".to_string(), "toaster".to_string()]);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_shutdown_ends_open_event_streams() {
        let service = test_service().await;
        let id = service
            .handler()
            .establish(
                &TransportSession::new(1, "test".to_string(), None),
                EstablishSubscriptionInput::new(Some("toaster")),
            )
            .await
            .unwrap()
            .id();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let server = service.serve_listener(listener, "restconf", async move {
            let _ = shutdown_rx.await;
        });
        let client = async move {
            let mut stream = TcpStream::connect(address).await.unwrap();
            stream
                .write_all(
                    format!(
                        "GET /restconf/streams/{id} HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n"
                    )
                    .as_bytes(),
                )
                .await
                .unwrap();
            let mut head = vec![0u8; 1024];
            let read = stream.read(&mut head).await.unwrap();
            assert!(String::from_utf8_lossy(&head[..read]).starts_with("HTTP/1.1 200"));

            shutdown_tx.send(()).unwrap();
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).await.unwrap();
        };
        let (served, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(server, client)
        })
        .await
        .expect("server stopped while an event stream was attached");
        served.unwrap();
        assert!(logs_contain("closing open event streams"));
        service.shutdown().await.unwrap();
    }
}
