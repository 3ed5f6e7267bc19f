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

use std::{
    fmt,
    hash::{Hash, Hasher},
};

pub type SessionId = u64;

/// Opaque handle of the client connection an RPC arrived on.
///
/// Two handles are the same session iff their ids are equal; the description
/// and principal are informational only.
#[derive(Debug, Clone)]
pub struct TransportSession {
    id: SessionId,
    description: String,
    principal: Option<String>,
}

impl TransportSession {
    pub fn new(id: SessionId, description: String, principal: Option<String>) -> Self {
        Self {
            id,
            description,
            principal,
        }
    }

    pub const fn id(&self) -> SessionId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Receiver name as shown in the operational `receivers` list
    pub fn receiver_name(&self) -> String {
        format!(
            "{} via {}",
            self.principal().unwrap_or("anonymous"),
            self.description
        )
    }
}

impl PartialEq for TransportSession {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TransportSession {}

impl Hash for TransportSession {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {} ({})", self.id, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_by_id() {
        let left = TransportSession::new(1, "HTTP 127.0.0.1:4000".to_string(), None);
        let renamed = TransportSession::new(1, "other".to_string(), Some("admin".to_string()));
        let other = TransportSession::new(2, "HTTP 127.0.0.1:4000".to_string(), None);
        assert_eq!(left, renamed);
        assert_ne!(left, other);
    }

    #[test]
    fn test_receiver_name() {
        let session = TransportSession::new(
            1,
            "HTTP 127.0.0.1:4000".to_string(),
            Some("admin".to_string()),
        );
        assert_eq!(session.receiver_name(), "admin via HTTP 127.0.0.1:4000");
        let anonymous = TransportSession::new(2, "HTTP 127.0.0.1:4001".to_string(), None);
        assert_eq!(
            anonymous.receiver_name(),
            "anonymous via HTTP 127.0.0.1:4001"
        );
    }
}
