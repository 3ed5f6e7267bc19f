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

//! Access to the YANG schema context used to validate filters and encode
//! notifications.

use std::sync::Arc;
use subnotif_model::schema::SchemaContext;
use tokio::sync::watch;
use tracing::info;

pub trait SchemaContextProvider: Send + Sync + 'static {
    fn current_schema_context(&self) -> Arc<SchemaContext>;

    /// Receiver notified every time the schema context changes
    fn watch(&self) -> watch::Receiver<Arc<SchemaContext>>;
}

/// Schema context provider backed by a [watch] channel
#[derive(Debug)]
pub struct WatchSchemaContextProvider {
    tx: watch::Sender<Arc<SchemaContext>>,
}

impl WatchSchemaContextProvider {
    pub fn new(schema: SchemaContext) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(schema));
        Self { tx }
    }

    /// Replaces the schema context, returning the previous one
    pub fn update(&self, schema: SchemaContext) -> Arc<SchemaContext> {
        info!(
            modules = schema.modules().len(),
            "schema context updated"
        );
        self.tx.send_replace(Arc::new(schema))
    }
}

impl SchemaContextProvider for WatchSchemaContextProvider {
    fn current_schema_context(&self) -> Arc<SchemaContext> {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Arc<SchemaContext>> {
        self.tx.subscribe()
    }
}
