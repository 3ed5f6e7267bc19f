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

//! Registry of subscriptions and their lifecycle.
//!
//! Every subscription moves through the states below, any other transition is
//! rejected:
//!
//! ```text
//!  START ---> ACTIVE <---> SUSPENDED
//!    |          |              |
//!    +--------> END <----------+
//! ```
//!
//! The registry is a sharded concurrent map, so mutations of one subscription
//! are serialised by the shard lock while unrelated subscriptions proceed in
//! parallel.

use crate::{
    error::SubscriptionError,
    session::{SessionId, TransportSession},
    streams::StreamRegistry,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustc_hash::FxHashSet;
use serde_json::json;
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc,
};
use subnotif_model::{
    filter::ResolvedFilter,
    node::{Node, NodeName},
    notification::{
        format_date_time, Encoding, StreamFilter, SubscriptionStartedModified,
        SubscriptionSuspendedReason,
    },
    SubscriptionId, SUBSCRIBED_NOTIFICATIONS_MODULE,
};
use tracing::{debug, info};

/// First id handed out, ids below are left to statically configured
/// subscriptions.
pub const FIRST_SUBSCRIPTION_ID: SubscriptionId = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum SubscriptionState {
    #[strum(to_string = "START")]
    Start,

    #[strum(to_string = "ACTIVE")]
    Active,

    #[strum(to_string = "SUSPENDED")]
    Suspended,

    #[strum(to_string = "END")]
    End,
}

impl SubscriptionState {
    pub const fn allowed_transitions(&self) -> &'static [SubscriptionState] {
        match self {
            Self::Start => &[Self::Active, Self::End],
            Self::Active => &[Self::Suspended, Self::End],
            Self::Suspended => &[Self::Active, Self::End],
            Self::End => &[],
        }
    }

    pub fn can_move_to(&self, to: SubscriptionState) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub const fn is_active_or_suspended(&self) -> bool {
        matches!(self, Self::Active | Self::Suspended)
    }
}

/// Per receiver counters, updated by the dispatcher without locking the
/// registry
#[derive(Debug, Default)]
pub struct ReceiverCounters {
    sent: AtomicU64,
    excluded: AtomicU64,
}

impl ReceiverCounters {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn excluded(&self) -> u64 {
        self.excluded.load(Ordering::Relaxed)
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_excluded(&self) {
        self.excluded.fetch_add(1, Ordering::Relaxed);
    }
}

/// What a new subscription is created from
#[derive(Debug, Clone)]
pub struct SubscriptionSpec {
    stream: String,
    filter: Option<StreamFilter>,
    resolved_filter: ResolvedFilter,
    encoding: Encoding,
    stop_time: Option<DateTime<Utc>>,
    replay_start_time: Option<DateTime<Utc>>,
    session: TransportSession,
}

impl SubscriptionSpec {
    pub fn new(stream: impl Into<String>, session: TransportSession) -> Self {
        Self {
            stream: stream.into(),
            filter: None,
            resolved_filter: ResolvedFilter::None,
            encoding: Encoding::default(),
            stop_time: None,
            replay_start_time: None,
            session,
        }
    }

    pub fn with_filter(mut self, filter: StreamFilter, resolved: ResolvedFilter) -> Self {
        self.filter = Some(filter);
        self.resolved_filter = resolved;
        self
    }

    pub const fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub const fn with_stop_time(mut self, stop_time: Option<DateTime<Utc>>) -> Self {
        self.stop_time = stop_time;
        self
    }

    pub const fn with_replay_start_time(
        mut self,
        replay_start_time: Option<DateTime<Utc>>,
    ) -> Self {
        self.replay_start_time = replay_start_time;
        self
    }
}

/// A subscription as held by the registry
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    stream: String,
    filter: Option<StreamFilter>,
    resolved_filter: ResolvedFilter,
    encoding: Encoding,
    stop_time: Option<DateTime<Utc>>,
    replay_start_time: Option<DateTime<Utc>>,
    session: TransportSession,
    state: SubscriptionState,
    counters: Arc<ReceiverCounters>,
    suspended_reason: Option<SubscriptionSuspendedReason>,
}

impl Subscription {
    fn new(id: SubscriptionId, spec: SubscriptionSpec) -> Self {
        Self {
            id,
            stream: spec.stream,
            filter: spec.filter,
            resolved_filter: spec.resolved_filter,
            encoding: spec.encoding,
            stop_time: spec.stop_time,
            replay_start_time: spec.replay_start_time,
            session: spec.session,
            state: SubscriptionState::Start,
            counters: Arc::new(ReceiverCounters::default()),
            suspended_reason: None,
        }
    }

    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub const fn filter(&self) -> Option<&StreamFilter> {
        self.filter.as_ref()
    }

    pub const fn resolved_filter(&self) -> &ResolvedFilter {
        &self.resolved_filter
    }

    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub const fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }

    pub const fn replay_start_time(&self) -> Option<DateTime<Utc>> {
        self.replay_start_time
    }

    pub const fn session(&self) -> &TransportSession {
        &self.session
    }

    pub const fn state(&self) -> SubscriptionState {
        self.state
    }

    pub const fn counters(&self) -> &Arc<ReceiverCounters> {
        &self.counters
    }

    pub const fn suspended_reason(&self) -> Option<SubscriptionSuspendedReason> {
        self.suspended_reason
    }

    pub fn set_filter(&mut self, filter: Option<StreamFilter>, resolved: ResolvedFilter) {
        self.filter = filter;
        self.resolved_filter = resolved;
    }

    pub fn set_resolved_filter(&mut self, resolved: ResolvedFilter) {
        self.resolved_filter = resolved;
    }

    pub fn set_stop_time(&mut self, stop_time: Option<DateTime<Utc>>) {
        self.stop_time = stop_time;
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.encoding = encoding;
    }

    /// Body of the `subscription-started` and `subscription-modified`
    /// notifications
    pub fn started_modified(&self) -> SubscriptionStartedModified {
        SubscriptionStartedModified::new(
            self.id,
            self.stream.clone(),
            self.filter.clone(),
            self.stop_time,
            self.encoding,
            self.replay_start_time,
        )
    }

    /// Operational record written to the datastore
    pub fn to_json(&self) -> serde_json::Value {
        let mut record = json!({
            "id": self.id,
            "stream": self.stream,
            "encoding": self.encoding.identity(),
        });
        if let Some(object) = record.as_object_mut() {
            if let Some(stop_time) = self.stop_time {
                object.insert(
                    "stop-time".to_string(),
                    json!(format_date_time(stop_time).to_string()),
                );
            }
            match &self.filter {
                Some(StreamFilter::Named(name)) => {
                    object.insert("stream-filter-name".to_string(), json!(name));
                }
                Some(StreamFilter::XPath(xpath)) => {
                    object.insert("stream-xpath-filter".to_string(), json!(xpath.expression()));
                }
                Some(StreamFilter::Subtree(_)) | None => {}
            }
        }
        record
    }

    fn receiver_node(&self) -> Node {
        let state = if self.state == SubscriptionState::Active {
            "active"
        } else {
            "suspended"
        };
        Node::container(
            NodeName::qualified(SUBSCRIBED_NOTIFICATIONS_MODULE, "receivers"),
            vec![Node::list(
                NodeName::local("receiver"),
                vec![vec![
                    Node::leaf(NodeName::local("name"), self.session.receiver_name()),
                    Node::leaf(
                        NodeName::local("sent-event-records"),
                        self.counters.sent().to_string(),
                    ),
                    Node::leaf(
                        NodeName::local("excluded-event-records"),
                        self.counters.excluded().to_string(),
                    ),
                    Node::leaf(NodeName::local("state"), state),
                ]],
            )],
        )
    }
}

/// Everything the dispatcher needs to deliver one event to a subscription
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub stream: String,
    pub state: SubscriptionState,
    pub filter: ResolvedFilter,
    pub encoding: Encoding,
    pub counters: Arc<ReceiverCounters>,
}

#[derive(Debug)]
pub struct SubscriptionStateMachine {
    next_id: AtomicU32,
    subscriptions: DashMap<SubscriptionId, Subscription>,
    by_session: DashMap<SessionId, FxHashSet<SubscriptionId>>,
    streams: Arc<StreamRegistry>,
}

impl SubscriptionStateMachine {
    pub fn new(streams: Arc<StreamRegistry>) -> Self {
        Self {
            next_id: AtomicU32::new(FIRST_SUBSCRIPTION_ID),
            subscriptions: DashMap::new(),
            by_session: DashMap::new(),
            streams,
        }
    }

    pub const fn streams(&self) -> &Arc<StreamRegistry> {
        &self.streams
    }

    /// Allocates a fresh id and stores the subscription in `START` state
    pub fn create(&self, spec: SubscriptionSpec) -> Result<Subscription, SubscriptionError> {
        if !self.streams.contains(&spec.stream) {
            return Err(SubscriptionError::UnknownStream(spec.stream));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let subscription = Subscription::new(id, spec);
        info!(
            subscription_id = id,
            stream = %subscription.stream,
            session = %subscription.session,
            "subscription created"
        );
        self.by_session
            .entry(subscription.session.id())
            .or_default()
            .insert(id);
        self.subscriptions.insert(id, subscription.clone());
        Ok(subscription)
    }

    pub fn lookup(&self, id: SubscriptionId) -> Option<Subscription> {
        self.subscriptions.get(&id).map(|entry| entry.clone())
    }

    pub fn delivery_context(&self, id: SubscriptionId) -> Option<DeliveryContext> {
        self.subscriptions.get(&id).map(|entry| DeliveryContext {
            stream: entry.stream.clone(),
            state: entry.state,
            filter: entry.resolved_filter.clone(),
            encoding: entry.encoding,
            counters: entry.counters.clone(),
        })
    }

    /// Removes the record, returning it
    pub fn delete(&self, id: SubscriptionId) -> Result<Subscription, SubscriptionError> {
        let (_, subscription) = self
            .subscriptions
            .remove(&id)
            .ok_or(SubscriptionError::NotFound(id))?;
        let session = subscription.session.id();
        if let Some(mut ids) = self.by_session.get_mut(&session) {
            ids.remove(&id);
        }
        self.by_session.remove_if(&session, |_, ids| ids.is_empty());
        debug!(subscription_id = id, "subscription removed from registry");
        Ok(subscription)
    }

    /// Puts back a record removed by [Self::delete] in the given state, used
    /// to roll back a failed commit
    pub fn reinstate(&self, mut subscription: Subscription, state: SubscriptionState) {
        subscription.state = state;
        debug!(
            subscription_id = subscription.id,
            state = %subscription.state,
            "reinstating subscription"
        );
        self.by_session
            .entry(subscription.session.id())
            .or_default()
            .insert(subscription.id);
        self.subscriptions.insert(subscription.id, subscription);
    }

    /// Moves the subscription to `to` and returns the state it left
    pub fn move_to(
        &self,
        id: SubscriptionId,
        to: SubscriptionState,
    ) -> Result<SubscriptionState, SubscriptionError> {
        self.transition(id, to, None)
    }

    /// `ACTIVE -> SUSPENDED`, keeping the reason for operational reads
    pub fn suspend(
        &self,
        id: SubscriptionId,
        reason: SubscriptionSuspendedReason,
    ) -> Result<SubscriptionState, SubscriptionError> {
        self.transition(id, SubscriptionState::Suspended, Some(reason))
    }

    fn transition(
        &self,
        id: SubscriptionId,
        to: SubscriptionState,
        reason: Option<SubscriptionSuspendedReason>,
    ) -> Result<SubscriptionState, SubscriptionError> {
        let mut subscription = self
            .subscriptions
            .get_mut(&id)
            .ok_or(SubscriptionError::UnknownSubscription(id))?;
        let from = subscription.state;
        if !from.can_move_to(to) {
            return Err(SubscriptionError::IllegalTransition { id, from, to });
        }
        subscription.state = to;
        subscription.suspended_reason = reason;
        info!(subscription_id = id, %from, %to, "subscription state changed");
        Ok(from)
    }

    pub fn get_state(&self, id: SubscriptionId) -> Result<SubscriptionState, SubscriptionError> {
        self.subscriptions
            .get(&id)
            .map(|entry| entry.state)
            .ok_or(SubscriptionError::UnknownSubscription(id))
    }

    /// Runs `f` on the record while holding its lock
    pub fn update<T>(
        &self,
        id: SubscriptionId,
        f: impl FnOnce(&mut Subscription) -> T,
    ) -> Result<T, SubscriptionError> {
        let mut subscription = self
            .subscriptions
            .get_mut(&id)
            .ok_or(SubscriptionError::UnknownSubscription(id))?;
        Ok(f(&mut subscription))
    }

    pub fn subscriptions_of(&self, session: SessionId) -> Vec<SubscriptionId> {
        let mut ids = self
            .by_session
            .get(&session)
            .map(|ids| ids.iter().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Operational `receivers` container of a subscription
    pub fn receivers(&self, id: SubscriptionId) -> Result<Node, SubscriptionError> {
        self.subscriptions
            .get(&id)
            .map(|entry| entry.receiver_node())
            .ok_or(SubscriptionError::UnknownSubscription(id))
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        let mut ids = self
            .subscriptions
            .iter()
            .map(|entry| *entry.key())
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
