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

//! Event streams known to the server, their replay buffers, and the named
//! stream filters (`filters/stream-filter`) subscriptions may refer to.

use crate::{error::SubscriptionError, NETCONF_STREAM};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, sync::Arc};
use subnotif_model::{
    filter::ResolvedFilter,
    node::{LeafValue, Node, NodeName},
    notification::{format_date_time, NotificationEvent, StreamFilter},
    schema::SchemaContext,
    SUBSCRIBED_NOTIFICATIONS_MODULE,
};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    /// Number of events kept for replay, `0` disables replay
    #[serde(default)]
    replay_buffer_size: usize,
}

impl StreamConfig {
    pub fn new(name: &str, description: Option<String>, replay_buffer_size: usize) -> Self {
        Self {
            name: name.to_string(),
            description,
            replay_buffer_size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub const fn replay_buffer_size(&self) -> usize {
        self.replay_buffer_size
    }
}

#[derive(Debug)]
struct ReplayBuffer {
    capacity: usize,
    log_creation_time: DateTime<Utc>,
    events: VecDeque<Arc<NotificationEvent>>,
}

#[derive(Debug)]
struct EventStream {
    description: Option<String>,
    replay: Option<ReplayBuffer>,
}

impl From<&StreamConfig> for EventStream {
    fn from(config: &StreamConfig) -> Self {
        let replay = (config.replay_buffer_size > 0).then(|| ReplayBuffer {
            capacity: config.replay_buffer_size,
            log_creation_time: Utc::now(),
            events: VecDeque::with_capacity(config.replay_buffer_size),
        });
        Self {
            description: config.description.clone(),
            replay,
        }
    }
}

/// A filter stored under a name in the `filters` container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFilter {
    name: String,
    filter: StreamFilter,
    resolved: ResolvedFilter,
}

impl NamedFilter {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub const fn filter(&self) -> &StreamFilter {
        &self.filter
    }
    pub const fn resolved(&self) -> &ResolvedFilter {
        &self.resolved
    }
}

#[derive(Debug)]
pub struct StreamRegistry {
    streams: DashMap<String, EventStream>,
    filters: DashMap<String, NamedFilter>,
}

impl StreamRegistry {
    /// Creates the registry with the configured streams, `NETCONF` is always
    /// present.
    pub fn new(configs: &[StreamConfig]) -> Self {
        let streams = DashMap::new();
        for config in configs {
            streams.insert(config.name.clone(), EventStream::from(config));
        }
        if !streams.contains_key(NETCONF_STREAM) {
            streams.insert(
                NETCONF_STREAM.to_string(),
                EventStream::from(&StreamConfig::new(
                    NETCONF_STREAM,
                    Some("Default NETCONF event stream".to_string()),
                    0,
                )),
            );
        }
        Self {
            streams,
            filters: DashMap::new(),
        }
    }

    /// Returns `false` if a stream with the same name already exists
    pub fn add_stream(&self, config: &StreamConfig) -> bool {
        if self.streams.contains_key(&config.name) {
            return false;
        }
        info!(stream = %config.name, "adding event stream");
        self.streams
            .insert(config.name.clone(), EventStream::from(config));
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    pub fn stream_names(&self) -> Vec<String> {
        let mut names = self
            .streams
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn supports_replay(&self, name: &str) -> bool {
        self.streams
            .get(name)
            .is_some_and(|stream| stream.replay.is_some())
    }

    /// Keeps `event` in the replay buffer of the `name` stream, evicting the
    /// oldest event when the buffer is full.
    pub fn record(&self, name: &str, event: &Arc<NotificationEvent>) {
        let Some(mut stream) = self.streams.get_mut(name) else {
            return;
        };
        if let Some(replay) = stream.replay.as_mut() {
            if replay.events.len() == replay.capacity {
                replay.events.pop_front();
            }
            replay.events.push_back(event.clone());
        }
    }

    /// Buffered events with `start <= event-time <= stop`, in publish order
    pub fn replay(
        &self,
        name: &str,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
    ) -> Vec<Arc<NotificationEvent>> {
        let Some(stream) = self.streams.get(name) else {
            return vec![];
        };
        let Some(replay) = stream.replay.as_ref() else {
            return vec![];
        };
        replay
            .events
            .iter()
            .filter(|event| {
                event.event_time() >= start && stop.is_none_or(|stop| event.event_time() <= stop)
            })
            .cloned()
            .collect()
    }

    pub fn oldest_event_time(&self, name: &str) -> Option<DateTime<Utc>> {
        let stream = self.streams.get(name)?;
        let replay = stream.replay.as_ref()?;
        replay
            .events
            .front()
            .map(|event| event.event_time())
            .or(Some(replay.log_creation_time))
    }

    /// Operational view of the `streams` container
    pub fn to_node(&self) -> Node {
        let entries = self
            .stream_names()
            .into_iter()
            .filter_map(|name| {
                let stream = self.streams.get(&name)?;
                let mut entry = vec![Node::leaf(NodeName::local("name"), name.as_str())];
                if let Some(description) = &stream.description {
                    entry.push(Node::leaf(
                        NodeName::local("description"),
                        description.as_str(),
                    ));
                }
                if let Some(replay) = &stream.replay {
                    entry.push(Node::leaf(
                        NodeName::local("replay-support"),
                        LeafValue::Empty,
                    ));
                    entry.push(Node::leaf(
                        NodeName::local("replay-log-creation-time"),
                        format_date_time(replay.log_creation_time),
                    ));
                }
                Some(entry)
            })
            .collect::<Vec<_>>();
        Node::container(
            NodeName::qualified(SUBSCRIBED_NOTIFICATIONS_MODULE, "streams"),
            vec![Node::list(NodeName::local("stream"), entries)],
        )
    }

    /// Resolves the filter a subscription asked for against the named filters
    /// and validates it against the schema context.
    pub fn resolve_filter(
        &self,
        filter: Option<&StreamFilter>,
        schema: &SchemaContext,
    ) -> Result<ResolvedFilter, SubscriptionError> {
        let resolved = match filter {
            None => ResolvedFilter::None,
            Some(StreamFilter::Subtree(subtree)) => ResolvedFilter::Subtree(Arc::new(subtree.clone())),
            Some(StreamFilter::XPath(xpath)) => ResolvedFilter::XPath(Arc::new(xpath.clone())),
            Some(StreamFilter::Named(name)) => self
                .filters
                .get(name)
                .map(|named| named.resolved.clone())
                .ok_or_else(|| SubscriptionError::UnknownFilter(name.clone()))?,
        };
        resolved.validate(schema)?;
        Ok(resolved)
    }

    /// Stores a named filter, returns `true` if it did not exist before.
    pub fn put_filter(
        &self,
        name: &str,
        filter: StreamFilter,
        schema: &SchemaContext,
    ) -> Result<bool, SubscriptionError> {
        if matches!(filter, StreamFilter::Named(_)) {
            return Err(SubscriptionError::invalid_value(format!(
                "stream filter {name} cannot refer to another stream filter"
            )));
        }
        let resolved = self.resolve_filter(Some(&filter), schema)?;
        debug!(filter = name, "storing stream filter");
        let previous = self.filters.insert(
            name.to_string(),
            NamedFilter {
                name: name.to_string(),
                filter,
                resolved,
            },
        );
        Ok(previous.is_none())
    }

    pub fn remove_filter(&self, name: &str) -> Option<NamedFilter> {
        self.filters.remove(name).map(|(_, filter)| filter)
    }

    pub fn filter(&self, name: &str) -> Option<NamedFilter> {
        self.filters.get(name).map(|filter| filter.clone())
    }

    pub fn filter_names(&self) -> Vec<String> {
        let mut names = self
            .filters
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
