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

//! Transport sessions of HTTP connections.
//!
//! Every accepted connection gets a [ConnectionSession] through axum's
//! connect info. All the clones handed to the requests of the connection
//! share one drop guard; once the connection and its in-flight requests are
//! gone, the session's `closed` token is cancelled and the
//! [SessionTracker] tears down the subscriptions the session owned.

use axum::{extract::connect_info::Connected, serve::IncomingStream};
use dashmap::DashSet;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use subnotif_service::{
    datastore::Datastore,
    rpc::SubscriptionRpcHandler,
    session::{SessionId, TransportSession},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct ConnectionSession {
    id: SessionId,
    remote_addr: SocketAddr,
    closed: CancellationToken,
    _guard: Arc<DropGuard>,
}

impl ConnectionSession {
    pub fn new(remote_addr: SocketAddr) -> Self {
        let closed = CancellationToken::new();
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr,
            _guard: Arc::new(closed.clone().drop_guard()),
            closed,
        }
    }

    pub const fn id(&self) -> SessionId {
        self.id
    }

    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Cancelled once the connection is gone, holding it does not keep the
    /// session alive
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn transport_session(&self) -> TransportSession {
        TransportSession::new(self.id, format!("HTTP {}", self.remote_addr), None)
    }
}

impl Connected<IncomingStream<'_>> for ConnectionSession {
    fn connect_info(target: IncomingStream<'_>) -> Self {
        let session = Self::new(target.remote_addr());
        debug!(session = session.id, remote = %session.remote_addr, "new connection");
        session
    }
}

/// Watches the sessions that used the subscription RPCs
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    sessions: Arc<DashSet<SessionId>>,
}

impl SessionTracker {
    /// Starts watching `session` unless it is already watched
    pub fn track<D: Datastore>(
        &self,
        session: &ConnectionSession,
        handler: &SubscriptionRpcHandler<D>,
    ) {
        let id = session.id();
        if !self.sessions.insert(id) {
            return;
        }
        let closed = session.closed();
        let sessions = self.sessions.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            closed.cancelled().await;
            sessions.remove(&id);
            let removed = handler.session_closed(id).await;
            info!(
                session = id,
                subscriptions = removed.len(),
                "connection closed"
            );
        });
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
