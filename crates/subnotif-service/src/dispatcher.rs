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

//! # Event Stream Dispatcher
//!
//! The [DispatcherActor] owns the listeners attached to subscriptions and the
//! feeds of notifications coming from the [crate::router::NotificationRouter],
//! one feed per event stream. For every notification a feed yields it:
//!
//! 1. records the event in the replay buffer of the feed's stream,
//! 2. skips subscriptions on other streams and subscriptions that are not
//!    `ACTIVE`,
//! 3. applies the subscription's filter, counting rejected events as
//!    `excluded-event-records`,
//! 4. encodes the (possibly pruned) body with the subscription's encoding and
//!    pushes it to the listener, counting it as `sent-event-records`.
//!
//! Sends to all the listeners run concurrently, each bounded by the
//! subscriber timeout, so a slow listener only loses its own events.
//!
//! State-change notifications travel through the command channel of the same
//! actor, which keeps them ordered with respect to each other and to the
//! content notifications already delivered. They are never filtered.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//! use subnotif_model::schema::SchemaContext;
//! use subnotif_service::{
//!     dispatcher::DispatcherHandle,
//!     router::{InMemoryNotificationRouter, NotificationRouter, StreamSelector},
//!     state_machine::SubscriptionStateMachine,
//!     streams::StreamRegistry,
//! };
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let streams = Arc::new(StreamRegistry::new(&[]));
//!     let state_machine = Arc::new(SubscriptionStateMachine::new(streams));
//!     let (_schema_tx, schema_rx) = watch::channel(Arc::new(SchemaContext::default()));
//!     let meter = opentelemetry::global::meter("subnotif");
//!     let (join_handle, dispatcher) = DispatcherHandle::new(
//!         100,
//!         Duration::from_millis(100),
//!         state_machine,
//!         schema_rx,
//!         either::Either::Left(meter),
//!     );
//!     let router = InMemoryNotificationRouter::default();
//!     let feed = router.subscribe(StreamSelector::for_stream("NETCONF"), 1000);
//!     dispatcher
//!         .add_stream("NETCONF".to_string(), feed)
//!         .await
//!         .expect("failed to add stream");
//!     dispatcher.shutdown().await.expect("failed to shut down");
//!     join_handle
//!         .await
//!         .expect("join handle failed")
//!         .expect("dispatcher failed");
//! }
//! ```

use crate::{
    state_machine::{ReceiverCounters, SubscriptionState, SubscriptionStateMachine},
    EncodedEvent, ListenerSender, NotificationReceiver,
};
use futures::stream::SelectAll;
use futures_util::StreamExt;
use rustc_hash::FxHashSet;
use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};
use subnotif_model::{
    notification::{Encoding, NotificationEvent, StateChangeNotification},
    schema::SchemaContext,
    SubscriptionId,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, trace, warn};

/// Notifications of one event stream, tagged with the stream name
type Feed = Pin<Box<dyn futures::Stream<Item = (Arc<str>, Arc<NotificationEvent>)> + Send>>;

#[derive(Debug, Clone, strum_macros::Display)]
pub(crate) enum DispatcherCommand {
    Shutdown(mpsc::Sender<()>),
    AddStream(String, NotificationReceiver, mpsc::Sender<()>),
    /// Attach a listener to a subscription, an open listener already attached
    /// is only replaced when `replace` is set
    AttachListener {
        id: SubscriptionId,
        listener: ListenerSender,
        replace: bool,
        reply: mpsc::Sender<AttachOutcome>,
    },
    DetachListener(SubscriptionId, mpsc::Sender<bool>),
    StateChange {
        notification: StateChangeNotification,
        encoding: Encoding,
        counters: Arc<ReceiverCounters>,
        reply: mpsc::Sender<bool>,
    },
    ListenerCount(mpsc::Sender<usize>),
}

/// Result of attaching a listener to a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum AttachOutcome {
    Attached,
    /// An open listener was attached before and has been closed
    Replaced,
    /// An open listener is attached and was kept, the new one is dropped
    Occupied,
}

#[derive(Debug)]
pub enum DispatcherActorError {
    CommandChannelClosed,
}

impl std::fmt::Display for DispatcherActorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommandChannelClosed => write!(f, "[Dispatcher] command channel closed"),
        }
    }
}

impl std::error::Error for DispatcherActorError {}

#[derive(Debug, Clone)]
pub struct DispatcherStats {
    received: opentelemetry::metrics::Counter<u64>,
    sent: opentelemetry::metrics::Counter<u64>,
    excluded: opentelemetry::metrics::Counter<u64>,
    dropped: opentelemetry::metrics::Counter<u64>,
    listeners: opentelemetry::metrics::Gauge<u64>,
}

impl DispatcherStats {
    pub fn new(meter: opentelemetry::metrics::Meter) -> Self {
        let received = meter
            .u64_counter("subnotif.dispatcher.received")
            .with_description("Number of notifications received from the notification router")
            .build();
        let sent = meter
            .u64_counter("subnotif.dispatcher.sent")
            .with_description("Number of notifications pushed to subscription listeners")
            .build();
        let excluded = meter
            .u64_counter("subnotif.dispatcher.excluded")
            .with_description("Number of notifications rejected by a subscription filter")
            .build();
        let dropped = meter
            .u64_counter("subnotif.dispatcher.dropped")
            .with_description("Number of notifications dropped before reaching a listener")
            .build();
        let listeners = meter
            .u64_gauge("subnotif.dispatcher.listeners")
            .with_description("Number of listeners attached to subscriptions")
            .build();
        Self {
            received,
            sent,
            excluded,
            dropped,
            listeners,
        }
    }
}

fn subscription_attribute(id: SubscriptionId) -> opentelemetry::KeyValue {
    opentelemetry::KeyValue::new("subnotif.subscription.id", opentelemetry::Value::I64(id.into()))
}

struct DispatcherActor {
    cmd_rx: mpsc::Receiver<DispatcherCommand>,
    state_machine: Arc<SubscriptionStateMachine>,
    schema: watch::Receiver<Arc<SchemaContext>>,
    feeds: SelectAll<Feed>,
    listeners: HashMap<SubscriptionId, ListenerSender>,
    /// Subscriptions whose replay has already been delivered
    replayed: FxHashSet<SubscriptionId>,
    /// Timeout for pushing one event to a listener before dropping it
    subscriber_timeout: Duration,
    stats: DispatcherStats,
}

impl std::fmt::Debug for DispatcherActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherActor")
            .field("feeds", &self.feeds.len())
            .field("listeners", &self.listeners.len())
            .field("subscriber_timeout", &self.subscriber_timeout)
            .finish_non_exhaustive()
    }
}

impl DispatcherActor {
    fn new(
        cmd_rx: mpsc::Receiver<DispatcherCommand>,
        state_machine: Arc<SubscriptionStateMachine>,
        schema: watch::Receiver<Arc<SchemaContext>>,
        subscriber_timeout: Duration,
        stats: DispatcherStats,
    ) -> Self {
        Self {
            cmd_rx,
            state_machine,
            schema,
            feeds: SelectAll::new(),
            listeners: HashMap::new(),
            replayed: FxHashSet::default(),
            subscriber_timeout,
            stats,
        }
    }

    /// Pushes one encoded event to a listener, returns true when the listener
    /// accepted it.
    async fn send_to_listener(
        id: SubscriptionId,
        event: Arc<EncodedEvent>,
        tx: ListenerSender,
        timeout: Duration,
        sent_counter: opentelemetry::metrics::Counter<u64>,
        drop_counter: opentelemetry::metrics::Counter<u64>,
    ) -> bool {
        if tx.is_full() {
            warn!(
                subscription_id = id,
                "listener channel is full, dropping notification"
            );
            drop_counter.add(
                1,
                &[
                    subscription_attribute(id),
                    opentelemetry::KeyValue::new("error.type", "channel is full"),
                ],
            );
            return false;
        }
        match tokio::time::timeout(timeout, tx.send(event)).await {
            Ok(Ok(_)) => {
                trace!(subscription_id = id, "sent notification to listener");
                sent_counter.add(1, &[subscription_attribute(id)]);
                true
            }
            Ok(Err(_)) => {
                warn!(subscription_id = id, "listener is closed, dropping notification");
                drop_counter.add(
                    1,
                    &[
                        subscription_attribute(id),
                        opentelemetry::KeyValue::new("error.type", "send error"),
                    ],
                );
                false
            }
            Err(_) => {
                warn!(
                    subscription_id = id,
                    "listener is experiencing backpressure and possibly dropping notifications"
                );
                drop_counter.add(
                    1,
                    &[
                        subscription_attribute(id),
                        opentelemetry::KeyValue::new("error.type", "timeout"),
                    ],
                );
                false
            }
        }
    }

    fn encode(
        &self,
        id: SubscriptionId,
        encoding: Encoding,
        event_time: chrono::DateTime<chrono::Utc>,
        body: &subnotif_model::node::Node,
    ) -> Option<Arc<EncodedEvent>> {
        let schema = self.schema.borrow().clone();
        match EncodedEvent::encode(id, encoding, event_time, body, &schema) {
            Ok(encoded) => Some(Arc::new(encoded)),
            Err(err) => {
                error!(subscription_id = id, error = %err, "failed to encode notification");
                self.stats.dropped.add(
                    1,
                    &[
                        subscription_attribute(id),
                        opentelemetry::KeyValue::new("error.type", "encoding error"),
                    ],
                );
                None
            }
        }
    }

    /// Filters and encodes `event` for one subscription, `None` when nothing
    /// has to be pushed.
    fn prepare(
        &self,
        id: SubscriptionId,
        stream: &str,
        event: &NotificationEvent,
    ) -> Option<(Arc<EncodedEvent>, Arc<ReceiverCounters>)> {
        let context = self.state_machine.delivery_context(id)?;
        if context.stream != stream || context.state != SubscriptionState::Active {
            return None;
        }
        let Some(pruned) = context.filter.apply(event.body()).into_pruned() else {
            debug!(
                subscription_id = id,
                notification = %event.name(),
                "notification excluded by subscription filter"
            );
            context.counters.record_excluded();
            self.stats.excluded.add(1, &[subscription_attribute(id)]);
            return None;
        };
        let encoded = self.encode(id, context.encoding, event.event_time(), &pruned)?;
        Some((encoded, context.counters))
    }

    fn remove_closed_listeners(&mut self) {
        self.listeners.retain(|id, tx| {
            if tx.is_closed() {
                info!(subscription_id = id, "listener is closed, removing it");
                false
            } else {
                true
            }
        });
        self.stats.listeners.record(self.listeners.len() as u64, &[]);
    }

    async fn handle_event(&mut self, stream: Arc<str>, event: Arc<NotificationEvent>) {
        self.stats.received.add(
            1,
            &[opentelemetry::KeyValue::new(
                "subnotif.stream",
                stream.to_string(),
            )],
        );
        self.state_machine.streams().record(&stream, &event);
        self.remove_closed_listeners();
        debug!(
            stream = %stream,
            published_on = event.stream(),
            notification = %event.name(),
            listeners = self.listeners.len(),
            "dispatching notification"
        );
        let mut send_handlers = vec![];
        for (id, tx) in &self.listeners {
            let Some((encoded, counters)) = self.prepare(*id, &stream, &event) else {
                continue;
            };
            let send_handler = Self::send_to_listener(
                *id,
                encoded,
                tx.clone(),
                self.subscriber_timeout,
                self.stats.sent.clone(),
                self.stats.dropped.clone(),
            );
            send_handlers.push(async move {
                if send_handler.await {
                    counters.record_sent();
                }
            });
        }
        futures::future::join_all(send_handlers).await;
    }

    /// Delivers the buffered events a subscription asked to replay, followed
    /// by `replay-completed`.
    async fn replay(&mut self, id: SubscriptionId) {
        let Some(subscription) = self.state_machine.lookup(id) else {
            return;
        };
        let Some(start) = subscription.replay_start_time() else {
            return;
        };
        if !self.replayed.insert(id) {
            return;
        }
        let Some(tx) = self.listeners.get(&id).cloned() else {
            return;
        };
        let events = self.state_machine.streams().replay(
            subscription.stream(),
            start,
            subscription.stop_time(),
        );
        info!(
            subscription_id = id,
            events = events.len(),
            "replaying buffered notifications"
        );
        for event in events {
            let Some((encoded, counters)) = self.prepare(id, subscription.stream(), &event) else {
                continue;
            };
            if Self::send_to_listener(
                id,
                encoded,
                tx.clone(),
                self.subscriber_timeout,
                self.stats.sent.clone(),
                self.stats.dropped.clone(),
            )
            .await
            {
                counters.record_sent();
            }
        }
        self.deliver_state_change(
            StateChangeNotification::ReplayCompleted { id },
            subscription.encoding(),
            subscription.counters().clone(),
        )
        .await;
    }

    async fn deliver_state_change(
        &mut self,
        notification: StateChangeNotification,
        encoding: Encoding,
        counters: Arc<ReceiverCounters>,
    ) -> bool {
        let id = notification.id();
        let Some(tx) = self.listeners.get(&id).cloned() else {
            debug!(
                subscription_id = id,
                %notification,
                "no listener attached, state change not delivered"
            );
            return false;
        };
        let delivered = match self.encode(id, encoding, chrono::Utc::now(), &notification.to_node())
        {
            Some(encoded) => {
                let sent = Self::send_to_listener(
                    id,
                    encoded,
                    tx,
                    self.subscriber_timeout,
                    self.stats.sent.clone(),
                    self.stats.dropped.clone(),
                )
                .await;
                if sent {
                    counters.record_sent();
                }
                sent
            }
            None => false,
        };
        if notification.is_terminal() {
            info!(subscription_id = id, %notification, "closing listener");
            self.listeners.remove(&id);
            self.replayed.remove(&id);
            self.stats.listeners.record(self.listeners.len() as u64, &[]);
        }
        delivered
    }

    async fn handle_shutdown(tx: mpsc::Sender<()>) -> bool {
        info!("[Dispatcher] received shutdown command, shutting down");
        let _ = tx.send(()).await;
        true
    }

    async fn handle_add_stream(
        &mut self,
        stream: String,
        rx: NotificationReceiver,
        tx: mpsc::Sender<()>,
    ) -> bool {
        info!(stream = %stream, "[Dispatcher] adding notification feed");
        let name: Arc<str> = Arc::from(stream);
        self.feeds
            .push(Box::pin(rx.map(move |event| (name.clone(), event))));
        let _ = tx.send(()).await;
        false
    }

    async fn handle_attach(
        &mut self,
        id: SubscriptionId,
        listener: ListenerSender,
        replace: bool,
        tx: mpsc::Sender<AttachOutcome>,
    ) -> bool {
        let open = self
            .listeners
            .get(&id)
            .is_some_and(|current| !current.is_closed());
        if open && !replace {
            warn!(
                subscription_id = id,
                "a listener is already attached, rejecting the new one"
            );
            drop(listener);
            let _ = tx.send(AttachOutcome::Occupied).await;
            return false;
        }
        let outcome = if self.listeners.insert(id, listener).is_some() && open {
            warn!(subscription_id = id, "replaced the attached listener");
            AttachOutcome::Replaced
        } else {
            info!(subscription_id = id, "listener attached");
            AttachOutcome::Attached
        };
        self.stats.listeners.record(self.listeners.len() as u64, &[]);
        if let Err(err) = tx.send(outcome).await {
            error!(
                subscription_id = id,
                error = %err,
                "unable to confirm listener attachment, detaching it"
            );
            self.listeners.remove(&id);
            return false;
        }
        self.replay(id).await;
        false
    }

    async fn handle_detach(&mut self, id: SubscriptionId, tx: mpsc::Sender<bool>) -> bool {
        let removed = self.listeners.remove(&id).is_some();
        self.replayed.remove(&id);
        info!(subscription_id = id, removed, "listener detached");
        self.stats.listeners.record(self.listeners.len() as u64, &[]);
        let _ = tx.send(removed).await;
        false
    }

    async fn handle_cmd(
        &mut self,
        cmd: Option<DispatcherCommand>,
    ) -> Result<bool, DispatcherActorError> {
        let cmd_result = match cmd {
            Some(DispatcherCommand::Shutdown(tx)) => Self::handle_shutdown(tx).await,
            Some(DispatcherCommand::AddStream(stream, rx, tx)) => {
                self.handle_add_stream(stream, rx, tx).await
            }
            Some(DispatcherCommand::AttachListener {
                id,
                listener,
                replace,
                reply,
            }) => self.handle_attach(id, listener, replace, reply).await,
            Some(DispatcherCommand::DetachListener(id, tx)) => self.handle_detach(id, tx).await,
            Some(DispatcherCommand::StateChange {
                notification,
                encoding,
                counters,
                reply,
            }) => {
                let delivered = self
                    .deliver_state_change(notification, encoding, counters)
                    .await;
                let _ = reply.send(delivered).await;
                false
            }
            Some(DispatcherCommand::ListenerCount(tx)) => {
                let _ = tx.send(self.listeners.len()).await;
                false
            }
            None => {
                warn!("[Dispatcher] command channel is closed, shutting down");
                return Err(DispatcherActorError::CommandChannelClosed);
            }
        };
        Ok(cmd_result)
    }

    async fn run(mut self) -> Result<(), DispatcherActorError> {
        info!("[Dispatcher] starting notification dispatcher");
        loop {
            tokio::select! {
                biased; // Prioritize command messages
                cmd = self.cmd_rx.recv() => {
                    match self.handle_cmd(cmd).await {
                        Ok(true) => return Ok(()),
                        Ok(false) => {}
                        Err(err) => return Err(err),
                    }
                }
                next = self.feeds.next(), if !self.feeds.is_empty() => {
                    match next {
                        Some((stream, event)) => self.handle_event(stream, event).await,
                        None => warn!("[Dispatcher] all notification feeds are closed"),
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
pub enum DispatcherHandleError {
    SendError,
    ReceiveError,
}

impl std::fmt::Display for DispatcherHandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            DispatcherHandleError::SendError => {
                write!(f, "error sending command to dispatcher")
            }
            DispatcherHandleError::ReceiveError => {
                write!(f, "error receiving response from dispatcher")
            }
        }
    }
}

impl std::error::Error for DispatcherHandleError {}

/// Cloneable interface to the [DispatcherActor]
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    cmd_buffer_size: usize,
    cmd_tx: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    pub fn new(
        cmd_buffer_size: usize,
        subscriber_timeout: Duration,
        state_machine: Arc<SubscriptionStateMachine>,
        schema: watch::Receiver<Arc<SchemaContext>>,
        stats: either::Either<opentelemetry::metrics::Meter, DispatcherStats>,
    ) -> (JoinHandle<Result<(), DispatcherActorError>>, Self) {
        let stats = match stats {
            either::Either::Left(meter) => DispatcherStats::new(meter),
            either::Either::Right(stats) => stats,
        };
        let (cmd_tx, cmd_rx) = mpsc::channel(cmd_buffer_size);
        let actor = DispatcherActor::new(
            cmd_rx,
            state_machine,
            schema,
            subscriber_timeout,
            stats,
        );
        let join_handle = tokio::spawn(actor.run());
        (
            join_handle,
            Self {
                cmd_buffer_size,
                cmd_tx,
            },
        )
    }

    async fn request<T>(
        &self,
        cmd: impl FnOnce(mpsc::Sender<T>) -> DispatcherCommand,
    ) -> Result<T, DispatcherHandleError> {
        let (tx, mut rx) = mpsc::channel(self.cmd_buffer_size);
        self.cmd_tx
            .send(cmd(tx))
            .await
            .map_err(|_| DispatcherHandleError::SendError)?;
        rx.recv().await.ok_or(DispatcherHandleError::ReceiveError)
    }

    pub async fn shutdown(&self) -> Result<(), DispatcherHandleError> {
        self.request(DispatcherCommand::Shutdown).await
    }

    /// Adds a feed of notifications, usually obtained from
    /// [crate::router::NotificationRouter::subscribe]
    pub async fn add_stream(
        &self,
        stream: String,
        rx: NotificationReceiver,
    ) -> Result<(), DispatcherHandleError> {
        self.request(|tx| DispatcherCommand::AddStream(stream, rx, tx))
            .await
    }

    /// Returns true if an open listener of the subscription was replaced
    pub async fn attach_listener(
        &self,
        id: SubscriptionId,
        listener: ListenerSender,
    ) -> Result<bool, DispatcherHandleError> {
        let outcome = self
            .request(|reply| DispatcherCommand::AttachListener {
                id,
                listener,
                replace: true,
                reply,
            })
            .await?;
        Ok(outcome == AttachOutcome::Replaced)
    }

    /// Attaches the listener unless an open one is already attached
    pub async fn attach_vacant_listener(
        &self,
        id: SubscriptionId,
        listener: ListenerSender,
    ) -> Result<AttachOutcome, DispatcherHandleError> {
        self.request(|reply| DispatcherCommand::AttachListener {
            id,
            listener,
            replace: false,
            reply,
        })
        .await
    }

    pub async fn detach_listener(&self, id: SubscriptionId) -> Result<bool, DispatcherHandleError> {
        self.request(|tx| DispatcherCommand::DetachListener(id, tx))
            .await
    }

    /// Delivers a state-change notification, returns true when a listener
    /// received it
    pub async fn state_change(
        &self,
        notification: StateChangeNotification,
        encoding: Encoding,
        counters: Arc<ReceiverCounters>,
    ) -> Result<bool, DispatcherHandleError> {
        self.request(|reply| DispatcherCommand::StateChange {
            notification,
            encoding,
            counters,
            reply,
        })
        .await
    }

    pub async fn listener_count(&self) -> Result<usize, DispatcherHandleError> {
        self.request(DispatcherCommand::ListenerCount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        create_listener_channel, create_notification_channel,
        state_machine::SubscriptionSpec,
        tests::{
            event, inventory_entry, session, stream_registry, toaster_out_of_bread,
            toaster_restocked, toaster_schema, REPLAY_STREAM, TOASTER_MODULE,
        },
        ListenerReceiver, NotificationSender, NETCONF_STREAM,
    };
    use chrono::{TimeDelta, Utc};
    use serde_json::json;
    use subnotif_model::{
        filter::{FilterNode, ResolvedFilter, SubtreeFilter},
        node::NodeName,
        notification::{StreamFilter, SubscriptionTerminatedReason},
    };

    struct Setup {
        state_machine: Arc<SubscriptionStateMachine>,
        dispatcher: DispatcherHandle,
        feeds: HashMap<String, NotificationSender>,
        _schema_tx: watch::Sender<Arc<SchemaContext>>,
    }

    async fn setup() -> Setup {
        let state_machine = Arc::new(SubscriptionStateMachine::new(stream_registry()));
        let (schema_tx, schema_rx) = watch::channel(Arc::new(toaster_schema()));
        let (_join, dispatcher) = DispatcherHandle::new(
            10,
            Duration::from_millis(100),
            state_machine.clone(),
            schema_rx,
            either::Either::Left(opentelemetry::global::meter("subnotif-test")),
        );
        let mut feeds = HashMap::new();
        for stream in [NETCONF_STREAM, REPLAY_STREAM] {
            let (tx, rx) = create_notification_channel(100);
            dispatcher.add_stream(stream.to_string(), rx).await.unwrap();
            feeds.insert(stream.to_string(), tx);
        }
        Setup {
            state_machine,
            dispatcher,
            feeds,
            _schema_tx: schema_tx,
        }
    }

    impl Setup {
        fn subscribe(&self, spec: SubscriptionSpec) -> SubscriptionId {
            let id = self.state_machine.create(spec).unwrap().id();
            self.state_machine
                .move_to(id, SubscriptionState::Active)
                .unwrap();
            id
        }

        async fn attach(&self, id: SubscriptionId, buffer: usize) -> ListenerReceiver {
            let (tx, rx) = create_listener_channel(buffer);
            assert!(!self.dispatcher.attach_listener(id, tx).await.unwrap());
            rx
        }

        async fn publish(&self, event: NotificationEvent) {
            self.feeds[event.stream()].send(Arc::new(event)).await.unwrap();
        }

        fn counters(&self, id: SubscriptionId) -> (u64, u64) {
            let counters = self.state_machine.lookup(id).unwrap().counters().clone();
            (counters.sent(), counters.excluded())
        }
    }

    fn restocked_only() -> (StreamFilter, ResolvedFilter) {
        let filter = SubtreeFilter::new(vec![FilterNode::selection(NodeName::qualified(
            TOASTER_MODULE,
            "toasterRestocked",
        ))]);
        (
            StreamFilter::Subtree(filter.clone()),
            ResolvedFilter::Subtree(Arc::new(filter)),
        )
    }

    async fn next_json(rx: &ListenerReceiver) -> serde_json::Value {
        crate::tests::next_json(rx).await
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_filter_counters() {
        let setup = setup().await;
        let (filter, resolved) = restocked_only();
        let id = setup.subscribe(
            SubscriptionSpec::new(NETCONF_STREAM, session(1)).with_filter(filter, resolved),
        );
        let rx = setup.attach(id, 10).await;

        setup.publish(event(toaster_out_of_bread())).await;
        setup.publish(event(toaster_restocked(5))).await;

        let payload = next_json(&rx).await;
        assert_eq!(
            payload["ietf-restconf:notification"]["example-toaster:toasterRestocked"],
            json!({"amountOfBread": 5})
        );
        assert_eq!(setup.counters(id), (1, 1));
        assert!(rx.is_empty());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_suspended_subscription_not_counted() {
        let setup = setup().await;
        let id = setup.subscribe(SubscriptionSpec::new(NETCONF_STREAM, session(1)));
        let rx = setup.attach(id, 10).await;
        setup
            .state_machine
            .move_to(id, SubscriptionState::Suspended)
            .unwrap();
        setup.publish(event(toaster_restocked(1))).await;
        // A barrier through the command channel does not order the feed, so
        // wait until the event is consumed before resuming.
        tokio::time::sleep(Duration::from_millis(50)).await;
        setup
            .state_machine
            .move_to(id, SubscriptionState::Active)
            .unwrap();
        setup.publish(event(toaster_restocked(2))).await;

        let payload = next_json(&rx).await;
        assert_eq!(
            payload["ietf-restconf:notification"]["example-toaster:toasterRestocked"]
                ["amountOfBread"],
            json!(2)
        );
        assert_eq!(setup.counters(id), (1, 0));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_other_stream_ignored() {
        let setup = setup().await;
        let id = setup.subscribe(SubscriptionSpec::new(REPLAY_STREAM, session(1)));
        let rx = setup.attach(id, 10).await;
        setup.publish(event(toaster_restocked(1))).await;
        setup
            .publish(NotificationEvent::new(
                REPLAY_STREAM,
                Utc::now(),
                toaster_restocked(2),
            ))
            .await;
        let payload = next_json(&rx).await;
        assert_eq!(
            payload["ietf-restconf:notification"]["example-toaster:toasterRestocked"]
                ["amountOfBread"],
            json!(2)
        );
        assert_eq!(setup.counters(id), (1, 0));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_slow_listener_isolated() {
        let setup = setup().await;
        let slow = setup.subscribe(SubscriptionSpec::new(NETCONF_STREAM, session(1)));
        let fast = setup.subscribe(SubscriptionSpec::new(NETCONF_STREAM, session(2)));
        let slow_rx = setup.attach(slow, 1).await;
        let fast_rx = setup.attach(fast, 10).await;

        for amount in 0..3 {
            setup.publish(event(toaster_restocked(amount))).await;
        }
        for amount in 0..3 {
            let payload = next_json(&fast_rx).await;
            assert_eq!(
                payload["ietf-restconf:notification"]["example-toaster:toasterRestocked"]
                    ["amountOfBread"],
                json!(amount)
            );
        }
        assert_eq!(slow_rx.len(), 1);
        assert_eq!(setup.counters(slow).0, 1);
        assert_eq!(setup.counters(fast).0, 3);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_partial_selection_pruned() {
        let setup = setup().await;
        let filter = SubtreeFilter::new(vec![FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![FilterNode::containment(
                NodeName::local("entry"),
                vec![FilterNode::selection(NodeName::local("id"))],
            )],
        )]);
        let id = setup.subscribe(
            SubscriptionSpec::new(NETCONF_STREAM, session(1)).with_filter(
                StreamFilter::Subtree(filter.clone()),
                ResolvedFilter::Subtree(Arc::new(filter)),
            ),
        );
        let rx = setup.attach(id, 10).await;
        setup.publish(event(inventory_entry(7, "rye"))).await;
        let payload = next_json(&rx).await;
        assert_eq!(
            payload["ietf-restconf:notification"]["example-toaster:inventory"],
            json!({"entry": [{"id": 7}]})
        );
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_xml_encoding() {
        let setup = setup().await;
        let id = setup.subscribe(
            SubscriptionSpec::new(NETCONF_STREAM, session(1)).with_encoding(Encoding::Xml),
        );
        let rx = setup.attach(id, 10).await;
        setup.publish(event(toaster_out_of_bread())).await;
        let encoded = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(encoded.encoding(), Encoding::Xml);
        assert_eq!(encoded.subscription_id(), id);
        assert!(encoded.payload().starts_with(
            "<notification xmlns=\"urn:ietf:params:xml:ns:netconf:notification:1.0\"><eventTime>"
        ));
        assert!(encoded.payload().ends_with(
            "<toasterOutOfBread xmlns=\"http://netconfcentral.org/ns/toaster\"/></notification>"
        ));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_terminal_state_change_closes_listener() {
        let setup = setup().await;
        let id = setup.subscribe(SubscriptionSpec::new(NETCONF_STREAM, session(1)));
        let rx = setup.attach(id, 10).await;
        let subscription = setup.state_machine.lookup(id).unwrap();
        setup.state_machine.move_to(id, SubscriptionState::End).unwrap();
        let delivered = setup
            .dispatcher
            .state_change(
                StateChangeNotification::Terminated {
                    id,
                    reason: SubscriptionTerminatedReason::Killed,
                },
                subscription.encoding(),
                subscription.counters().clone(),
            )
            .await
            .unwrap();
        assert!(delivered);
        assert_eq!(setup.dispatcher.listener_count().await.unwrap(), 0);
        let payload = next_json(&rx).await;
        assert_eq!(
            payload["ietf-restconf:notification"]
                ["ietf-subscribed-notifications:subscription-terminated"],
            json!({"id": id, "reason": "ietf-subscribed-notifications:killed"})
        );
        assert!(rx.recv().await.is_err());
        assert_eq!(setup.counters(id), (1, 0));

        // nothing is listening anymore
        assert!(!setup
            .dispatcher
            .state_change(
                StateChangeNotification::Completed { id },
                subscription.encoding(),
                subscription.counters().clone(),
            )
            .await
            .unwrap());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_replay_before_live_events() {
        let setup = setup().await;
        let start = Utc::now() - TimeDelta::seconds(60);
        let (filter, resolved) = restocked_only();
        // buffered before anybody subscribed
        for amount in 0..2 {
            setup
                .publish(NotificationEvent::new(
                    REPLAY_STREAM,
                    start + TimeDelta::seconds(amount.into()),
                    toaster_restocked(amount),
                ))
                .await;
        }
        setup
            .publish(NotificationEvent::new(
                REPLAY_STREAM,
                start + TimeDelta::seconds(3),
                toaster_out_of_bread(),
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let id = setup.subscribe(
            SubscriptionSpec::new(REPLAY_STREAM, session(1))
                .with_filter(filter, resolved)
                .with_replay_start_time(Some(start + TimeDelta::seconds(1))),
        );
        let rx = setup.attach(id, 10).await;
        let replayed = next_json(&rx).await;
        assert_eq!(
            replayed["ietf-restconf:notification"]["example-toaster:toasterRestocked"]
                ["amountOfBread"],
            json!(1)
        );
        let completed = next_json(&rx).await;
        assert_eq!(
            completed["ietf-restconf:notification"]["ietf-subscribed-notifications:replay-completed"],
            json!({"id": id})
        );
        setup
            .publish(NotificationEvent::new(
                REPLAY_STREAM,
                Utc::now(),
                toaster_restocked(9),
            ))
            .await;
        let live = next_json(&rx).await;
        assert_eq!(
            live["ietf-restconf:notification"]["example-toaster:toasterRestocked"]
                ["amountOfBread"],
            json!(9)
        );
        // replayed event, replay-completed and the live event
        assert_eq!(setup.counters(id), (3, 1));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_closed_listener_removed() {
        let setup = setup().await;
        let id = setup.subscribe(SubscriptionSpec::new(NETCONF_STREAM, session(1)));
        let rx = setup.attach(id, 10).await;
        assert_eq!(setup.dispatcher.listener_count().await.unwrap(), 1);
        drop(rx);
        setup.publish(event(toaster_restocked(1))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(setup.dispatcher.listener_count().await.unwrap(), 0);
        assert_eq!(setup.counters(id), (0, 0));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_attach_keeps_open_listener() {
        let setup = setup().await;
        let id = setup.subscribe(SubscriptionSpec::new(NETCONF_STREAM, session(1)));
        let owner_rx = setup.attach(id, 10).await;

        let (tx, other_rx) = create_listener_channel(10);
        assert_eq!(
            setup.dispatcher.attach_vacant_listener(id, tx).await.unwrap(),
            AttachOutcome::Occupied
        );
        assert!(other_rx.is_closed());
        setup.publish(event(toaster_restocked(1))).await;
        assert!(next_json(&owner_rx).await["ietf-restconf:notification"]
            .get("example-toaster:toasterRestocked")
            .is_some());

        // a closed listener leaves the subscription vacant
        drop(owner_rx);
        let (tx, new_rx) = create_listener_channel(10);
        assert_eq!(
            setup.dispatcher.attach_vacant_listener(id, tx).await.unwrap(),
            AttachOutcome::Attached
        );
        setup.publish(event(toaster_restocked(2))).await;
        assert!(next_json(&new_rx).await["ietf-restconf:notification"]
            .get("example-toaster:toasterRestocked")
            .is_some());

        let (tx, _replacing_rx) = create_listener_channel(10);
        assert!(setup.dispatcher.attach_listener(id, tx).await.unwrap());
        assert!(new_rx.recv().await.is_err());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_shutdown() {
        let state_machine = Arc::new(SubscriptionStateMachine::new(stream_registry()));
        let (_schema_tx, schema_rx) = watch::channel(Arc::new(SchemaContext::default()));
        let (join, dispatcher) = DispatcherHandle::new(
            10,
            Duration::from_millis(100),
            state_machine,
            schema_rx,
            either::Either::Left(opentelemetry::global::meter("subnotif-test")),
        );
        dispatcher.shutdown().await.unwrap();
        assert!(join.await.unwrap().is_ok());
        assert!(matches!(
            dispatcher.listener_count().await,
            Err(DispatcherHandleError::SendError)
        ));
    }
}
