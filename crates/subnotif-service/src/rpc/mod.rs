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

//! # Subscription RPC Handlers
//!
//! Implements `establish-subscription`, `modify-subscription`,
//! `delete-subscription` and `kill-subscription` on top of the
//! [SubscriptionStateMachine], committing every change of the operational
//! subscription records to a [Datastore]. A failed commit rolls the in-memory
//! change back before the error is reported.
//!
//! The handler also owns the stop-time timers of the subscriptions, tears
//! down the subscriptions of closed transport sessions and re-validates
//! filters when the schema context or the named filters change.

pub mod input;

use crate::{
    create_listener_channel,
    datastore::{DataPath, Datastore, DatastoreError, WriteTransaction},
    dispatcher::{AttachOutcome, DispatcherHandle},
    emitter::StateChangeEmitter,
    error::SubscriptionError,
    rpc::input::{
        EstablishSubscriptionInput, EstablishSubscriptionOutput, ModifySubscriptionInput,
        RpcRequest, SubscriptionIdInput,
    },
    schema::SchemaContextProvider,
    session::{SessionId, TransportSession},
    state_machine::{Subscription, SubscriptionSpec, SubscriptionState, SubscriptionStateMachine},
    ListenerReceiver,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use subnotif_model::{
    filter::ResolvedFilter,
    node::Node,
    notification::{StreamFilter, SubscriptionSuspendedReason, SubscriptionTerminatedReason},
    SubscriptionId,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Successful result of an RPC
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcOutput {
    Establish(EstablishSubscriptionOutput),
    /// RPCs without output parameters
    Ok,
}

struct Inner<D: Datastore> {
    state_machine: Arc<SubscriptionStateMachine>,
    dispatcher: DispatcherHandle,
    emitter: StateChangeEmitter,
    schema: Arc<dyn SchemaContextProvider>,
    datastore: D,
    stop_timers: DashMap<SubscriptionId, CancellationToken>,
}

pub struct SubscriptionRpcHandler<D: Datastore> {
    inner: Arc<Inner<D>>,
}

impl<D: Datastore> Clone for SubscriptionRpcHandler<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Datastore> std::fmt::Debug for SubscriptionRpcHandler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRpcHandler")
            .field("subscriptions", &self.inner.state_machine.len())
            .field("stop_timers", &self.inner.stop_timers.len())
            .finish()
    }
}

impl<D: Datastore> SubscriptionRpcHandler<D> {
    pub fn new(
        state_machine: Arc<SubscriptionStateMachine>,
        dispatcher: DispatcherHandle,
        schema: Arc<dyn SchemaContextProvider>,
        datastore: D,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state_machine,
                emitter: StateChangeEmitter::new(dispatcher.clone()),
                dispatcher,
                schema,
                datastore,
                stop_timers: DashMap::new(),
            }),
        }
    }

    pub fn state_machine(&self) -> &Arc<SubscriptionStateMachine> {
        &self.inner.state_machine
    }

    pub fn schema(&self) -> &Arc<dyn SchemaContextProvider> {
        &self.inner.schema
    }

    pub async fn handle(
        &self,
        session: &TransportSession,
        request: RpcRequest,
    ) -> Result<RpcOutput, SubscriptionError> {
        let result = match request {
            RpcRequest::Establish(input) => self
                .establish(session, input)
                .await
                .map(RpcOutput::Establish),
            RpcRequest::Modify(input) => self.modify(session, input).await.map(|_| RpcOutput::Ok),
            RpcRequest::Delete(input) => self.delete(session, input).await.map(|_| RpcOutput::Ok),
            RpcRequest::Kill(input) => self.kill(session, input).await.map(|_| RpcOutput::Ok),
        };
        if let Err(err) = &result {
            warn!(session = %session, error = %err, "rejected subscription RPC");
        }
        result
    }

    async fn commit(
        &self,
        operations: impl FnOnce(&mut D::Transaction),
    ) -> Result<(), DatastoreError> {
        let mut tx = self.inner.datastore.new_write_transaction();
        operations(&mut tx);
        tx.commit().await
    }

    pub async fn establish(
        &self,
        session: &TransportSession,
        input: EstablishSubscriptionInput,
    ) -> Result<EstablishSubscriptionOutput, SubscriptionError> {
        let state_machine = &self.inner.state_machine;
        let streams = state_machine.streams();
        let stream = input
            .stream()
            .ok_or_else(|| SubscriptionError::missing_element("No stream specified"))?;
        if !streams.contains(stream) {
            return Err(SubscriptionError::UnknownStream(stream.to_string()));
        }
        let schema = self.inner.schema.current_schema_context();
        let resolved = streams.resolve_filter(input.filter(), &schema)?;

        let now = Utc::now();
        let mut replay_start_time_revision = None;
        if let Some(replay_start_time) = input.replay_start_time() {
            if !streams.supports_replay(stream) {
                return Err(SubscriptionError::invalid_value(format!(
                    "stream {stream} does not support replay"
                )));
            }
            if replay_start_time > now {
                return Err(SubscriptionError::invalid_value(
                    "replay-start-time is in the future",
                ));
            }
            if input
                .stop_time()
                .is_some_and(|stop_time| stop_time < replay_start_time)
            {
                return Err(SubscriptionError::invalid_value(
                    "replay-start-time is later than stop-time",
                ));
            }
            replay_start_time_revision = streams
                .oldest_event_time(stream)
                .filter(|oldest| *oldest > replay_start_time);
        } else if input.stop_time().is_some_and(|stop_time| stop_time <= now) {
            return Err(SubscriptionError::invalid_value("stop-time is in the past"));
        }

        let mut spec = SubscriptionSpec::new(stream, session.clone())
            .with_encoding(input.encoding().unwrap_or_default())
            .with_stop_time(input.stop_time())
            .with_replay_start_time(input.replay_start_time());
        if let Some(filter) = input.filter() {
            spec = spec.with_filter(filter.clone(), resolved);
        }
        let id = state_machine.create(spec)?.id();
        state_machine.move_to(id, SubscriptionState::Active)?;
        let subscription = state_machine
            .lookup(id)
            .ok_or(SubscriptionError::UnknownSubscription(id))?;

        if let Err(err) = self
            .commit(|tx| tx.put(DataPath::subscription(id), subscription.to_json()))
            .await
        {
            error!(subscription_id = id, error = %err, "failed to commit new subscription, rolling back");
            let _ = state_machine.delete(id);
            return Err(err.into());
        }
        if let Some(stop_time) = subscription.stop_time() {
            self.schedule_stop(id, stop_time);
        }
        info!(
            subscription_id = id,
            stream,
            session = %session,
            encoding = %subscription.encoding(),
            "subscription established"
        );
        if let Err(err) = self.inner.emitter.started(&subscription).await {
            warn!(subscription_id = id, error = %err, "failed to emit subscription-started");
        }
        Ok(EstablishSubscriptionOutput::new(
            id,
            replay_start_time_revision,
        ))
    }

    /// Applies the modification under the record lock, the state is checked
    /// again there since a concurrent kill may have ended the subscription
    /// after it was looked up.
    fn modify_record(
        &self,
        input: &ModifySubscriptionInput,
        resolved: Option<ResolvedFilter>,
    ) -> Result<Subscription, SubscriptionError> {
        let id = input.id();
        self.inner.state_machine.update(id, |subscription| {
            if !subscription.state().is_active_or_suspended() {
                return Err(SubscriptionError::NoActiveSubscription(id));
            }
            if let (Some(filter), Some(resolved)) = (input.filter(), resolved) {
                subscription.set_filter(Some(filter.clone()), resolved);
            }
            if let Some(stop_time) = input.stop_time() {
                subscription.set_stop_time(Some(stop_time));
            }
            if let Some(encoding) = input.encoding() {
                subscription.set_encoding(encoding);
            }
            Ok(subscription.clone())
        })?
    }

    /// Puts back the filter, stop-time and encoding of `previous`
    fn restore_record(&self, previous: &Subscription) {
        let id = previous.id();
        let restored = self.inner.state_machine.update(id, |subscription| {
            subscription.set_filter(
                previous.filter().cloned(),
                previous.resolved_filter().clone(),
            );
            subscription.set_stop_time(previous.stop_time());
            subscription.set_encoding(previous.encoding());
        });
        if let Err(err) = restored {
            warn!(
                subscription_id = id,
                error = %err,
                "unable to roll back modified subscription"
            );
        }
    }

    pub async fn modify(
        &self,
        session: &TransportSession,
        input: ModifySubscriptionInput,
    ) -> Result<(), SubscriptionError> {
        let state_machine = &self.inner.state_machine;
        let id = input.id();
        let current = state_machine
            .lookup(id)
            .ok_or(SubscriptionError::UnknownSubscription(id))?;
        if current.session() != session {
            return Err(SubscriptionError::WrongSession(id));
        }
        if !current.state().is_active_or_suspended() {
            return Err(SubscriptionError::NoActiveSubscription(id));
        }
        let resolved = match input.filter() {
            Some(filter) => {
                let schema = self.inner.schema.current_schema_context();
                Some(state_machine.streams().resolve_filter(Some(filter), &schema)?)
            }
            None => None,
        };
        if input
            .stop_time()
            .is_some_and(|stop_time| stop_time <= Utc::now())
        {
            return Err(SubscriptionError::invalid_value("stop-time is in the past"));
        }

        let updated = self.modify_record(&input, resolved)?;

        if let Err(err) = self
            .commit(|tx| tx.put(DataPath::subscription(id), updated.to_json()))
            .await
        {
            error!(subscription_id = id, error = %err, "failed to commit modified subscription, rolling back");
            self.restore_record(&current);
            return Err(err.into());
        }
        if input.stop_time().is_some() {
            if let Some(stop_time) = updated.stop_time() {
                self.schedule_stop(id, stop_time);
            }
        }
        info!(subscription_id = id, session = %session, "subscription modified");
        if let Err(err) = self.inner.emitter.modified(&updated).await {
            warn!(subscription_id = id, error = %err, "failed to emit subscription-modified");
        }
        // a valid replacement filter ends a filter-unavailable suspension
        if input.filter().is_some()
            && updated.suspended_reason() == Some(SubscriptionSuspendedReason::FilterUnavailable)
        {
            self.resume(&updated).await;
        }
        Ok(())
    }

    pub async fn delete(
        &self,
        session: &TransportSession,
        input: SubscriptionIdInput,
    ) -> Result<(), SubscriptionError> {
        let id = input.id();
        let subscription = self
            .inner
            .state_machine
            .lookup(id)
            .ok_or(SubscriptionError::UnknownSubscription(id))?;
        if subscription.session() != session {
            return Err(SubscriptionError::WrongSession(id));
        }
        self.terminate(subscription, SubscriptionTerminatedReason::NoSuchSubscription)
            .await
    }

    /// Privileged variant of [Self::delete] that ignores session affinity
    pub async fn kill(
        &self,
        session: &TransportSession,
        input: SubscriptionIdInput,
    ) -> Result<(), SubscriptionError> {
        let id = input.id();
        let subscription = self
            .inner
            .state_machine
            .lookup(id)
            .ok_or(SubscriptionError::UnknownSubscription(id))?;
        info!(
            subscription_id = id,
            session = %session,
            owner = %subscription.session(),
            "killing subscription"
        );
        self.terminate(subscription, SubscriptionTerminatedReason::Killed)
            .await
    }

    async fn terminate(
        &self,
        subscription: Subscription,
        reason: SubscriptionTerminatedReason,
    ) -> Result<(), SubscriptionError> {
        let state_machine = &self.inner.state_machine;
        let id = subscription.id();
        if !subscription.state().is_active_or_suspended() {
            return Err(SubscriptionError::NoActiveSubscription(id));
        }
        let previous = match state_machine.move_to(id, SubscriptionState::End) {
            Ok(previous) => previous,
            Err(SubscriptionError::IllegalTransition { .. }) => {
                return Err(SubscriptionError::NoActiveSubscription(id))
            }
            Err(err) => return Err(err),
        };
        let removed = state_machine.delete(id)?;
        if let Err(err) = self
            .commit(|tx| tx.delete(DataPath::subscription(id)))
            .await
        {
            error!(subscription_id = id, error = %err, "failed to commit subscription removal, rolling back");
            state_machine.reinstate(removed, previous);
            return Err(err.into());
        }
        self.cancel_stop(id);
        info!(subscription_id = id, %reason, "subscription terminated");
        if let Err(err) = self.inner.emitter.terminated(&removed, reason).await {
            warn!(subscription_id = id, error = %err, "failed to emit subscription-terminated");
        }
        Ok(())
    }

    /// Tears down every subscription owned by a closed transport session.
    ///
    /// The receiver is gone, so no `subscription-terminated` is sent.
    pub async fn session_closed(&self, session: SessionId) -> Vec<SubscriptionId> {
        let state_machine = &self.inner.state_machine;
        let mut removed = vec![];
        for id in state_machine.subscriptions_of(session) {
            if state_machine.move_to(id, SubscriptionState::End).is_err() {
                debug!(subscription_id = id, "subscription already ended");
            }
            if state_machine.delete(id).is_ok() {
                self.cancel_stop(id);
                if let Err(err) = self.inner.dispatcher.detach_listener(id).await {
                    warn!(subscription_id = id, error = %err, "failed to detach listener");
                }
                removed.push(id);
            }
        }
        if removed.is_empty() {
            return removed;
        }
        info!(
            session,
            subscriptions = ?removed,
            "transport session closed, subscriptions removed"
        );
        if let Err(err) = self
            .commit(|tx| {
                for id in &removed {
                    tx.delete(DataPath::subscription(*id));
                }
            })
            .await
        {
            error!(session, error = %err, "failed to remove subscriptions of closed session");
        }
        removed
    }

    fn schedule_stop(&self, id: SubscriptionId, stop_time: DateTime<Utc>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.stop_timers.insert(id, token.clone()) {
            previous.cancel();
        }
        let delay = (stop_time - Utc::now()).to_std().unwrap_or_default();
        debug!(subscription_id = id, ?delay, "scheduling subscription stop");
        let inner: Weak<Inner<D>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(inner) = inner.upgrade() {
                        SubscriptionRpcHandler { inner }.complete(id).await;
                    }
                }
            }
        });
    }

    fn cancel_stop(&self, id: SubscriptionId) {
        if let Some((_, token)) = self.inner.stop_timers.remove(&id) {
            token.cancel();
        }
    }

    /// Ends a subscription that reached its stop-time
    async fn complete(&self, id: SubscriptionId) {
        let state_machine = &self.inner.state_machine;
        self.inner.stop_timers.remove(&id);
        if state_machine.move_to(id, SubscriptionState::End).is_err() {
            return;
        }
        let Ok(subscription) = state_machine.delete(id) else {
            return;
        };
        if let Err(err) = self
            .commit(|tx| tx.delete(DataPath::subscription(id)))
            .await
        {
            error!(subscription_id = id, error = %err, "failed to remove completed subscription");
        }
        info!(subscription_id = id, "subscription reached its stop-time");
        if let Err(err) = self.inner.emitter.completed(&subscription).await {
            warn!(subscription_id = id, error = %err, "failed to emit subscription-completed");
        }
    }

    async fn resume(&self, subscription: &Subscription) {
        let id = subscription.id();
        if self
            .inner
            .state_machine
            .move_to(id, SubscriptionState::Active)
            .is_ok()
        {
            if let Err(err) = self.inner.emitter.resumed(subscription).await {
                warn!(subscription_id = id, error = %err, "failed to emit subscription-resumed");
            }
        }
    }

    /// Resolves the filter of every subscription again, suspending the ones
    /// whose filter is no longer valid and resuming the ones whose filter
    /// became valid.
    pub async fn revalidate(&self) {
        let state_machine = &self.inner.state_machine;
        let schema = self.inner.schema.current_schema_context();
        for id in state_machine.ids() {
            let Some(subscription) = state_machine.lookup(id) else {
                continue;
            };
            match state_machine
                .streams()
                .resolve_filter(subscription.filter(), &schema)
            {
                Ok(resolved) => {
                    let updated = state_machine.update(id, |subscription| {
                        subscription.set_resolved_filter(resolved)
                    });
                    if let Err(err) = updated {
                        warn!(
                            subscription_id = id,
                            error = %err,
                            "subscription vanished during revalidation"
                        );
                        continue;
                    }
                    if subscription.suspended_reason()
                        == Some(SubscriptionSuspendedReason::FilterUnavailable)
                    {
                        info!(subscription_id = id, "filter is available again");
                        self.resume(&subscription).await;
                    }
                }
                Err(err) if subscription.state() == SubscriptionState::Active => {
                    warn!(subscription_id = id, error = %err, "filter became unavailable, suspending subscription");
                    let reason = SubscriptionSuspendedReason::FilterUnavailable;
                    if state_machine.suspend(id, reason).is_ok() {
                        if let Err(err) = self.inner.emitter.suspended(&subscription, reason).await
                        {
                            warn!(subscription_id = id, error = %err, "failed to emit subscription-suspended");
                        }
                    }
                }
                Err(_) => {}
            }
        }
    }

    /// Re-validates the subscriptions every time the schema context changes
    pub fn spawn_schema_watcher(&self) -> JoinHandle<()> {
        let mut rx = self.inner.schema.watch();
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                info!("schema context changed, re-validating subscription filters");
                SubscriptionRpcHandler { inner }.revalidate().await;
            }
        })
    }

    /// Stores a named filter and re-validates the subscriptions, returns true
    /// when the filter did not exist before
    pub async fn put_filter(
        &self,
        name: &str,
        filter: StreamFilter,
    ) -> Result<bool, SubscriptionError> {
        let schema = self.inner.schema.current_schema_context();
        let created = self
            .inner
            .state_machine
            .streams()
            .put_filter(name, filter, &schema)?;
        info!(filter = name, created, "stream filter stored");
        self.revalidate().await;
        Ok(created)
    }

    pub async fn remove_filter(&self, name: &str) -> Result<(), SubscriptionError> {
        self.inner
            .state_machine
            .streams()
            .remove_filter(name)
            .ok_or_else(|| SubscriptionError::UnknownFilter(name.to_string()))?;
        info!(filter = name, "stream filter removed");
        self.revalidate().await;
        Ok(())
    }

    /// Attaches a listener to a subscription, refused while a previously
    /// attached listener is still open
    pub async fn attach_listener(
        &self,
        id: SubscriptionId,
        buffer_size: usize,
    ) -> Result<ListenerReceiver, SubscriptionError> {
        let subscription = self
            .inner
            .state_machine
            .lookup(id)
            .ok_or(SubscriptionError::UnknownSubscription(id))?;
        if !subscription.state().is_active_or_suspended() {
            return Err(SubscriptionError::NoActiveSubscription(id));
        }
        let (tx, rx) = create_listener_channel(buffer_size);
        match self.inner.dispatcher.attach_vacant_listener(id, tx).await? {
            AttachOutcome::Occupied => Err(SubscriptionError::ReceiverAttached(id)),
            AttachOutcome::Attached | AttachOutcome::Replaced => Ok(rx),
        }
    }

    pub fn receivers(&self, id: SubscriptionId) -> Result<Node, SubscriptionError> {
        self.inner.state_machine.receivers(id)
    }

    pub fn streams(&self) -> Node {
        self.inner.state_machine.streams().to_node()
    }
}
