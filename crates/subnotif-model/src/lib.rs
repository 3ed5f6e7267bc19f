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

//! # Subscribed Notifications Data Model
//!
//! Data structures shared by the subscription runtime and its transports, as
//! specified in:
//! - [RFC 8639](https://datatracker.ietf.org/doc/html/rfc8639): Subscription to
//!   YANG Notifications
//! - [RFC 6241 Section 6](https://datatracker.ietf.org/doc/html/rfc6241#section-6):
//!   Subtree Filtering
//! - [RFC 7951](https://datatracker.ietf.org/doc/html/rfc7951): JSON Encoding of
//!   Data Modeled with YANG
//! - [RFC 8040](https://datatracker.ietf.org/doc/html/rfc8040): RESTCONF
//!   notification envelope
//!
//! ## Key components:
//! - [node::Node]: schema-agnostic data tree carried by notifications.
//! - [schema::SchemaContext]: the modules and notification schema nodes known
//!   to the controller, used to validate filters and resolve XML namespaces.
//! - [filter::SubtreeFilter]: subtree match and prune.
//! - [xpath::XPathFilter]: the location-path subset of `stream-xpath-filter`.
//! - [notification::StateChangeNotification]: subscription lifecycle events.
//! - [json] and [xml]: encoders for event payloads and decoders for filters.

pub mod filter;
pub mod json;
pub mod node;
pub mod notification;
pub mod schema;
pub mod xml;
pub mod xpath;

pub type SubscriptionId = u32;

pub const SUBSCRIBED_NOTIFICATIONS_MODULE: &str = "ietf-subscribed-notifications";
pub const SUBSCRIBED_NOTIFICATIONS_NS: &str =
    "urn:ietf:params:xml:ns:yang:ietf-subscribed-notifications";

pub const RESTCONF_MODULE: &str = "ietf-restconf";
pub const RESTCONF_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-restconf";

/// Namespace of the `<notification>` envelope, RFC 5277
pub const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// Namespaces the codecs know without consulting a schema context.
pub(crate) fn well_known_namespace(module: &str) -> Option<&'static str> {
    match module {
        SUBSCRIBED_NOTIFICATIONS_MODULE => Some(SUBSCRIBED_NOTIFICATIONS_NS),
        RESTCONF_MODULE => Some(RESTCONF_NS),
        _ => None,
    }
}

pub(crate) fn well_known_module(namespace: &str) -> Option<&'static str> {
    match namespace {
        SUBSCRIBED_NOTIFICATIONS_NS => Some(SUBSCRIBED_NOTIFICATIONS_MODULE),
        RESTCONF_NS => Some(RESTCONF_MODULE),
        _ => None,
    }
}
