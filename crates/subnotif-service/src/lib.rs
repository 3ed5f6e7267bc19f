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

//! # Subscribed Notifications Service
//!
//! Runtime of RFC 8639 dynamic subscriptions:
//!
//! - [state_machine::SubscriptionStateMachine]: the registry of subscriptions
//!   and their `START -> ACTIVE <-> SUSPENDED -> END` lifecycle.
//! - [streams::StreamRegistry]: event streams, their replay buffers and the
//!   named stream filters.
//! - [dispatcher::DispatcherHandle]: actor that takes the notifications
//!   delivered by the [router::NotificationRouter], filters, encodes and
//!   pushes them to the attached listeners.
//! - [emitter::StateChangeEmitter]: subscription state-change notifications.
//! - [rpc::SubscriptionRpcHandler]: `establish-subscription`,
//!   `modify-subscription`, `delete-subscription` and `kill-subscription`.
//!
//! The collaborators this subsystem consumes are traits with an in-memory
//! implementation each: [router::NotificationRouter],
//! [schema::SchemaContextProvider] and [datastore::Datastore].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use subnotif_model::{
    json, node::Node, notification::Encoding, schema::SchemaContext, xml, SubscriptionId,
};

pub mod datastore;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod router;
pub mod rpc;
pub mod schema;
pub mod session;
pub mod state_machine;
pub mod streams;

/// Name of the stream every server supports
pub const NETCONF_STREAM: &str = "NETCONF";

/// A notification encoded for one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEvent {
    subscription_id: SubscriptionId,
    encoding: Encoding,
    payload: Box<str>,
}

impl EncodedEvent {
    pub fn encode(
        subscription_id: SubscriptionId,
        encoding: Encoding,
        event_time: DateTime<Utc>,
        body: &Node,
        schema: &SchemaContext,
    ) -> Result<Self, EncodeError> {
        let payload = match encoding {
            Encoding::Json => {
                serde_json::to_string(&json::encode_notification(event_time, body))
                    .map_err(|err| EncodeError::Json(err.to_string()))?
            }
            Encoding::Xml => xml::encode_notification(event_time, body, schema)
                .map_err(|err| EncodeError::Xml(err.to_string()))?,
        };
        Ok(Self {
            subscription_id,
            encoding,
            payload: payload.into(),
        })
    }

    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

#[derive(Debug, Clone, strum_macros::Display, PartialEq, Eq)]
pub enum EncodeError {
    #[strum(to_string = "JSON encoding error: {0}")]
    Json(String),

    #[strum(to_string = "XML encoding error: {0}")]
    Xml(String),
}

impl std::error::Error for EncodeError {}

pub type ListenerSender = async_channel::Sender<Arc<EncodedEvent>>;
pub type ListenerReceiver = async_channel::Receiver<Arc<EncodedEvent>>;

pub fn create_listener_channel(buffer_size: usize) -> (ListenerSender, ListenerReceiver) {
    async_channel::bounded(buffer_size)
}

pub type NotificationSender = async_channel::Sender<Arc<subnotif_model::notification::NotificationEvent>>;
pub type NotificationReceiver =
    async_channel::Receiver<Arc<subnotif_model::notification::NotificationEvent>>;

pub fn create_notification_channel(buffer_size: usize) -> (NotificationSender, NotificationReceiver) {
    async_channel::bounded(buffer_size)
}
