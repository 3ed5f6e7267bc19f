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

//! # Notifications
//!
//! Content notifications delivered by the notification router and the
//! subscription state-change notifications defined in
//! [RFC 8639 Section 2.7](https://datatracker.ietf.org/doc/html/rfc8639#section-2.7).
//!
//! State-change notifications are converted into a [Node] tree, so they go
//! through the same encoders as content notifications.

use crate::{
    filter::SubtreeFilter,
    node::{LeafValue, Node, NodeName},
    xpath::XPathFilter,
    SubscriptionId, SUBSCRIBED_NOTIFICATIONS_MODULE,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Encoding of the notification messages sent to a receiver
#[derive(Clone, Copy, Debug, Default, Display, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Encoding {
    #[default]
    #[serde(rename = "ietf-subscribed-notifications:encode-json")]
    #[serde(alias = "encode-json")]
    #[strum(to_string = "ietf-subscribed-notifications:encode-json")]
    Json,

    #[serde(rename = "ietf-subscribed-notifications:encode-xml")]
    #[serde(alias = "encode-xml")]
    #[strum(to_string = "ietf-subscribed-notifications:encode-xml")]
    Xml,
}

impl Encoding {
    /// Parses an identity value, the prefix (module name in JSON, namespace
    /// prefix in XML) is ignored.
    pub fn from_identity(identity: &str) -> Option<Self> {
        let local = identity
            .rsplit_once(':')
            .map_or(identity, |(_, local)| local);
        match local.trim() {
            "encode-json" => Some(Self::Json),
            "encode-xml" => Some(Self::Xml),
            _ => None,
        }
    }

    pub const fn identity(&self) -> &'static str {
        match self {
            Self::Json => "ietf-subscribed-notifications:encode-json",
            Self::Xml => "ietf-subscribed-notifications:encode-xml",
        }
    }

    pub const fn media_type(&self) -> &'static str {
        match self {
            Self::Json => "application/yang-data+json",
            Self::Xml => "application/yang-data+xml",
        }
    }
}

/// A notification as published on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    stream: String,
    event_time: DateTime<Utc>,
    body: Node,
}

impl NotificationEvent {
    pub fn new(stream: impl Into<String>, event_time: DateTime<Utc>, body: Node) -> Self {
        Self {
            stream: stream.into(),
            event_time,
            body,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub const fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    pub const fn body(&self) -> &Node {
        &self.body
    }

    /// Notification type, i.e. the name of the body root
    pub const fn name(&self) -> &NodeName {
        self.body.name()
    }
}

/// Filter as requested by the subscriber, before it is resolved against the
/// stream registry and the schema context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFilter {
    Subtree(SubtreeFilter),
    XPath(XPathFilter),
    Named(String),
}

impl StreamFilter {
    fn to_node(&self) -> Node {
        match self {
            Self::Subtree(filter) => Node::container(
                NodeName::local("stream-subtree-filter"),
                filter.roots().iter().map(|root| root.to_node()).collect(),
            ),
            Self::XPath(filter) => Node::leaf(
                NodeName::local("stream-xpath-filter"),
                filter.expression(),
            ),
            Self::Named(name) => Node::leaf(NodeName::local("stream-filter-name"), name.as_str()),
        }
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum SubscriptionTerminatedReason {
    #[strum(to_string = "no-such-subscription")]
    NoSuchSubscription,

    #[strum(to_string = "stream-unavailable")]
    StreamUnavailable,

    #[strum(to_string = "filter-unavailable")]
    FilterUnavailable,

    #[strum(to_string = "suspension-timeout")]
    SuspensionTimeout,

    /// Administratively terminated by `kill-subscription`
    #[strum(to_string = "killed")]
    Killed,
}

impl SubscriptionTerminatedReason {
    pub fn identity(&self) -> String {
        format!("{SUBSCRIBED_NOTIFICATIONS_MODULE}:{self}")
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum SubscriptionSuspendedReason {
    #[strum(to_string = "insufficient-resources")]
    InsufficientResources,

    #[strum(to_string = "unsupportable-volume")]
    UnsupportableVolume,

    #[strum(to_string = "filter-unavailable")]
    FilterUnavailable,
}

impl SubscriptionSuspendedReason {
    pub fn identity(&self) -> String {
        format!("{SUBSCRIBED_NOTIFICATIONS_MODULE}:{self}")
    }
}

/// Content of the `subscription-started` and `subscription-modified`
/// notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStartedModified {
    id: SubscriptionId,
    stream: String,
    filter: Option<StreamFilter>,
    stop_time: Option<DateTime<Utc>>,
    encoding: Encoding,
    replay_start_time: Option<DateTime<Utc>>,
}

impl SubscriptionStartedModified {
    pub fn new(
        id: SubscriptionId,
        stream: String,
        filter: Option<StreamFilter>,
        stop_time: Option<DateTime<Utc>>,
        encoding: Encoding,
        replay_start_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            stream,
            filter,
            stop_time,
            encoding,
            replay_start_time,
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
    pub const fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }
    pub const fn replay_start_time(&self) -> Option<DateTime<Utc>> {
        self.replay_start_time
    }

    fn children(&self) -> Vec<Node> {
        let mut children = vec![
            Node::leaf(NodeName::local("id"), self.id),
            Node::leaf(NodeName::local("stream"), self.stream.as_str()),
        ];
        if let Some(filter) = &self.filter {
            children.push(filter.to_node());
        }
        if let Some(replay_start_time) = self.replay_start_time {
            children.push(Node::leaf(
                NodeName::local("replay-start-time"),
                format_date_time(replay_start_time),
            ));
        }
        if let Some(stop_time) = self.stop_time {
            children.push(Node::leaf(
                NodeName::local("stop-time"),
                format_date_time(stop_time),
            ));
        }
        children.push(Node::leaf(
            NodeName::local("encoding"),
            self.encoding.identity(),
        ));
        children
    }
}

/// Subscription state-change notifications
#[derive(Debug, Clone, Display, PartialEq, Eq)]
pub enum StateChangeNotification {
    #[strum(to_string = "subscription-started")]
    Started(SubscriptionStartedModified),

    #[strum(to_string = "subscription-modified")]
    Modified(SubscriptionStartedModified),

    #[strum(to_string = "subscription-suspended")]
    Suspended {
        id: SubscriptionId,
        reason: SubscriptionSuspendedReason,
    },

    #[strum(to_string = "subscription-resumed")]
    Resumed { id: SubscriptionId },

    #[strum(to_string = "subscription-terminated")]
    Terminated {
        id: SubscriptionId,
        reason: SubscriptionTerminatedReason,
    },

    #[strum(to_string = "subscription-completed")]
    Completed { id: SubscriptionId },

    #[strum(to_string = "replay-completed")]
    ReplayCompleted { id: SubscriptionId },
}

impl StateChangeNotification {
    pub const fn id(&self) -> SubscriptionId {
        match self {
            Self::Started(started) | Self::Modified(started) => started.id,
            Self::Suspended { id, .. }
            | Self::Resumed { id }
            | Self::Terminated { id, .. }
            | Self::Completed { id }
            | Self::ReplayCompleted { id } => *id,
        }
    }

    /// No notification follows a terminal one for the same subscription
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated { .. } | Self::Completed { .. })
    }

    pub fn to_node(&self) -> Node {
        let id = |id: SubscriptionId| Node::leaf(NodeName::local("id"), id);
        let children = match self {
            Self::Started(started) | Self::Modified(started) => started.children(),
            Self::Suspended { id: value, reason } => vec![
                id(*value),
                Node::leaf(NodeName::local("reason"), reason.identity()),
            ],
            Self::Terminated { id: value, reason } => vec![
                id(*value),
                Node::leaf(NodeName::local("reason"), reason.identity()),
            ],
            Self::Resumed { id: value }
            | Self::Completed { id: value }
            | Self::ReplayCompleted { id: value } => vec![id(*value)],
        };
        Node::container(
            NodeName::qualified(SUBSCRIBED_NOTIFICATIONS_MODULE, &self.to_string()),
            children,
        )
    }
}

/// `yang:date-and-time` canonical form used in every encoding
pub fn format_date_time(value: DateTime<Utc>) -> LeafValue {
    LeafValue::from(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{filter::FilterNode, tests::TOASTER_MODULE};
    use chrono::TimeZone;

    #[test]
    fn test_encoding_identities() {
        assert_eq!(
            Encoding::from_identity("ietf-subscribed-notifications:encode-xml"),
            Some(Encoding::Xml)
        );
        assert_eq!(Encoding::from_identity("sn:encode-json"), Some(Encoding::Json));
        assert_eq!(Encoding::from_identity("encode-json"), Some(Encoding::Json));
        assert_eq!(Encoding::from_identity("encode-cbor"), None);
        assert_eq!(Encoding::default(), Encoding::Json);

        let json: Encoding = serde_json::from_str("\"encode-xml\"").unwrap();
        assert_eq!(json, Encoding::Xml);
        assert_eq!(
            serde_json::to_string(&Encoding::Json).unwrap(),
            "\"ietf-subscribed-notifications:encode-json\""
        );
    }

    #[test]
    fn test_terminated_to_node() {
        let terminated = StateChangeNotification::Terminated {
            id: 1 << 31,
            reason: SubscriptionTerminatedReason::Killed,
        };
        assert!(terminated.is_terminal());
        assert_eq!(terminated.id(), 2147483648);
        assert_eq!(
            terminated.to_node(),
            Node::container(
                NodeName::qualified(SUBSCRIBED_NOTIFICATIONS_MODULE, "subscription-terminated"),
                vec![
                    Node::leaf(NodeName::local("id"), 2147483648u32),
                    Node::leaf(
                        NodeName::local("reason"),
                        "ietf-subscribed-notifications:killed"
                    ),
                ]
            )
        );
    }

    #[test]
    fn test_modified_to_node() {
        let stop_time = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let modified = StateChangeNotification::Modified(SubscriptionStartedModified::new(
            7,
            "NETCONF".to_string(),
            Some(StreamFilter::Subtree(SubtreeFilter::new(vec![
                FilterNode::selection(NodeName::qualified(TOASTER_MODULE, "toasterRestocked")),
            ]))),
            Some(stop_time),
            Encoding::Xml,
            None,
        ));
        assert!(!modified.is_terminal());
        let node = modified.to_node();
        assert_eq!(node.name().name(), "subscription-modified");
        assert_eq!(
            node.child("stop-time").and_then(Node::value),
            Some(&LeafValue::from("2026-01-02T03:04:05Z"))
        );
        assert_eq!(
            node.child("encoding").and_then(Node::value),
            Some(&LeafValue::from("ietf-subscribed-notifications:encode-xml"))
        );
        let filter = node.child("stream-subtree-filter").expect("filter");
        assert_eq!(
            filter.children()[0].name(),
            &NodeName::qualified(TOASTER_MODULE, "toasterRestocked")
        );
    }

    #[test]
    fn test_names() {
        assert_eq!(
            StateChangeNotification::ReplayCompleted { id: 1 }.to_string(),
            "replay-completed"
        );
        assert_eq!(
            SubscriptionSuspendedReason::UnsupportableVolume.identity(),
            "ietf-subscribed-notifications:unsupportable-volume"
        );
    }
}
