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

//! Publishes subscription state-change notifications to the listener of the
//! subscription they describe.

use crate::{
    dispatcher::{DispatcherHandle, DispatcherHandleError},
    state_machine::Subscription,
};
use subnotif_model::notification::{
    StateChangeNotification, SubscriptionSuspendedReason, SubscriptionTerminatedReason,
};
use tracing::info;

#[derive(Debug, Clone)]
pub struct StateChangeEmitter {
    dispatcher: DispatcherHandle,
}

impl StateChangeEmitter {
    pub const fn new(dispatcher: DispatcherHandle) -> Self {
        Self { dispatcher }
    }

    /// Returns true when a listener received the notification
    pub async fn emit(
        &self,
        subscription: &Subscription,
        notification: StateChangeNotification,
    ) -> Result<bool, DispatcherHandleError> {
        info!(
            subscription_id = subscription.id(),
            %notification,
            "emitting state change notification"
        );
        self.dispatcher
            .state_change(
                notification,
                subscription.encoding(),
                subscription.counters().clone(),
            )
            .await
    }

    pub async fn started(&self, subscription: &Subscription) -> Result<bool, DispatcherHandleError> {
        self.emit(
            subscription,
            StateChangeNotification::Started(subscription.started_modified()),
        )
        .await
    }

    pub async fn modified(
        &self,
        subscription: &Subscription,
    ) -> Result<bool, DispatcherHandleError> {
        self.emit(
            subscription,
            StateChangeNotification::Modified(subscription.started_modified()),
        )
        .await
    }

    pub async fn suspended(
        &self,
        subscription: &Subscription,
        reason: SubscriptionSuspendedReason,
    ) -> Result<bool, DispatcherHandleError> {
        self.emit(
            subscription,
            StateChangeNotification::Suspended {
                id: subscription.id(),
                reason,
            },
        )
        .await
    }

    pub async fn resumed(&self, subscription: &Subscription) -> Result<bool, DispatcherHandleError> {
        self.emit(
            subscription,
            StateChangeNotification::Resumed {
                id: subscription.id(),
            },
        )
        .await
    }

    pub async fn terminated(
        &self,
        subscription: &Subscription,
        reason: SubscriptionTerminatedReason,
    ) -> Result<bool, DispatcherHandleError> {
        self.emit(
            subscription,
            StateChangeNotification::Terminated {
                id: subscription.id(),
                reason,
            },
        )
        .await
    }

    pub async fn completed(
        &self,
        subscription: &Subscription,
    ) -> Result<bool, DispatcherHandleError> {
        self.emit(
            subscription,
            StateChangeNotification::Completed {
                id: subscription.id(),
            },
        )
        .await
    }
}
