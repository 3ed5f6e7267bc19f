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

//! Source of the notifications fed to the subscription subsystem.

use crate::{
    create_notification_channel, NotificationReceiver, NotificationSender, NETCONF_STREAM,
};
use dashmap::DashMap;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};
use subnotif_model::notification::NotificationEvent;
use tracing::{debug, trace};

/// Which notifications a router subscriber receives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamSelector {
    All,
    Stream(String),
}

impl StreamSelector {
    /// Selector feeding the named event stream, `NETCONF` carries every
    /// notification published on the server
    pub fn for_stream(name: &str) -> Self {
        if name == NETCONF_STREAM {
            Self::All
        } else {
            Self::Stream(name.to_string())
        }
    }

    pub fn accepts(&self, stream: &str) -> bool {
        match self {
            Self::All => true,
            Self::Stream(name) => name == stream,
        }
    }
}

/// Delivers the notifications published by the rest of the server to
/// interested receivers.
pub trait NotificationRouter: Send + Sync + 'static {
    /// Returns the number of receivers the event was handed to
    fn publish(&self, event: NotificationEvent) -> impl Future<Output = usize> + Send;

    fn subscribe(&self, selector: StreamSelector, buffer_size: usize) -> NotificationReceiver;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationRouter {
    next_id: Arc<AtomicU32>,
    subscribers: Arc<DashMap<u32, (StreamSelector, NotificationSender)>>,
}

impl InMemoryNotificationRouter {
    pub fn subscribers_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl NotificationRouter for InMemoryNotificationRouter {
    async fn publish(&self, event: NotificationEvent) -> usize {
        self.subscribers.retain(|_, (_, tx)| !tx.is_closed());
        let targets = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().0.accepts(event.stream()))
            .map(|entry| (*entry.key(), entry.value().1.clone()))
            .collect::<Vec<_>>();
        let event = Arc::new(event);
        let mut delivered = 0;
        for (id, tx) in targets {
            match tx.send(event.clone()).await {
                Ok(_) => delivered += 1,
                Err(_) => {
                    debug!(subscriber = id, "router subscriber is closed, removing it");
                    self.subscribers.remove(&id);
                }
            }
        }
        trace!(stream = event.stream(), delivered, "published notification");
        delivered
    }

    fn subscribe(&self, selector: StreamSelector, buffer_size: usize) -> NotificationReceiver {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = create_notification_channel(buffer_size);
        debug!(subscriber = id, ?selector, "new router subscriber");
        self.subscribers.insert(id, (selector, tx));
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{event, toaster_restocked};
    use chrono::Utc;

    #[test]
    fn test_selector_for_stream() {
        assert_eq!(StreamSelector::for_stream(NETCONF_STREAM), StreamSelector::All);
        assert_eq!(
            StreamSelector::for_stream("toaster"),
            StreamSelector::Stream("toaster".to_string())
        );
        assert!(StreamSelector::for_stream(NETCONF_STREAM).accepts("toaster"));
        assert!(!StreamSelector::for_stream("toaster").accepts(NETCONF_STREAM));
    }

    #[tokio::test]
    async fn test_publish_by_stream() {
        let router = InMemoryNotificationRouter::default();
        let all = router.subscribe(StreamSelector::All, 10);
        let netconf = router.subscribe(StreamSelector::Stream(NETCONF_STREAM.to_string()), 10);
        let other = router.subscribe(StreamSelector::Stream("other".to_string()), 10);

        assert_eq!(router.publish(event(toaster_restocked(1))).await, 2);
        assert_eq!(
            router
                .publish(NotificationEvent::new(
                    "other",
                    Utc::now(),
                    toaster_restocked(2)
                ))
                .await,
            2
        );
        assert_eq!(all.len(), 2);
        assert_eq!(netconf.len(), 1);
        assert_eq!(other.len(), 1);
        assert_eq!(
            netconf.recv().await.unwrap().body(),
            &toaster_restocked(1)
        );
    }

    #[tokio::test]
    async fn test_closed_subscribers_removed() {
        let router = InMemoryNotificationRouter::default();
        let rx = router.subscribe(StreamSelector::All, 10);
        assert_eq!(router.subscribers_count(), 1);
        drop(rx);
        assert_eq!(router.publish(event(toaster_restocked(1))).await, 0);
        assert_eq!(router.subscribers_count(), 0);
    }
}
