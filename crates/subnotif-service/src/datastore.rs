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

//! Transactional datastore the subscription records are committed to.

use dashmap::DashMap;
use serde_json::Value;
use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use subnotif_model::{SubscriptionId, SUBSCRIBED_NOTIFICATIONS_MODULE};
use tracing::{debug, trace};

/// Location of a node in the data tree, one segment per path step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataPath(Vec<String>);

impl DataPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// `ietf-subscribed-notifications:subscriptions/subscription=<id>`
    pub fn subscription(id: SubscriptionId) -> Self {
        Self(vec![
            format!("{SUBSCRIBED_NOTIFICATIONS_MODULE}:subscriptions"),
            format!("subscription={id}"),
        ])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &DataPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, strum_macros::Display)]
pub enum DatastoreError {
    #[strum(to_string = "commit failed: {0}")]
    CommitFailed(String),

    #[strum(to_string = "read failed: {0}")]
    ReadFailed(String),
}

impl std::error::Error for DatastoreError {}

/// Batch of writes applied atomically on commit
pub trait WriteTransaction: Send {
    fn put(&mut self, path: DataPath, value: Value);

    fn delete(&mut self, path: DataPath);

    fn commit(self) -> impl Future<Output = Result<(), DatastoreError>> + Send;
}

pub trait Datastore: Send + Sync + 'static {
    type Transaction: WriteTransaction;

    fn new_write_transaction(&self) -> Self::Transaction;

    fn read(
        &self,
        path: &DataPath,
    ) -> impl Future<Output = Result<Option<Value>, DatastoreError>> + Send;
}

#[derive(Debug, Clone)]
enum Operation {
    Put(DataPath, Value),
    Delete(DataPath),
}

/// Datastore keeping the operational tree in memory.
///
/// Commits can be made to fail with [InMemoryDatastore::set_fail_commits],
/// which is used to exercise the rollback paths of the RPC handlers.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatastore {
    tree: Arc<DashMap<DataPath, Value>>,
    fail_commits: Arc<AtomicBool>,
}

impl InMemoryDatastore {
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn contains(&self, path: &DataPath) -> bool {
        self.tree.contains_key(path)
    }
}

#[derive(Debug)]
pub struct InMemoryTransaction {
    tree: Arc<DashMap<DataPath, Value>>,
    fail_commits: Arc<AtomicBool>,
    operations: Vec<Operation>,
}

impl WriteTransaction for InMemoryTransaction {
    fn put(&mut self, path: DataPath, value: Value) {
        self.operations.push(Operation::Put(path, value));
    }

    fn delete(&mut self, path: DataPath) {
        self.operations.push(Operation::Delete(path));
    }

    async fn commit(self) -> Result<(), DatastoreError> {
        if self.fail_commits.load(Ordering::Relaxed) {
            debug!(
                operations = self.operations.len(),
                "rejecting datastore commit"
            );
            return Err(DatastoreError::CommitFailed(
                "datastore is not accepting commits".to_string(),
            ));
        }
        for operation in self.operations {
            match operation {
                Operation::Put(path, value) => {
                    trace!(%path, "datastore put");
                    self.tree.insert(path, value);
                }
                Operation::Delete(path) => {
                    trace!(%path, "datastore delete");
                    self.tree.retain(|key, _| !key.starts_with(&path));
                }
            }
        }
        Ok(())
    }
}

impl Datastore for InMemoryDatastore {
    type Transaction = InMemoryTransaction;

    fn new_write_transaction(&self) -> Self::Transaction {
        InMemoryTransaction {
            tree: self.tree.clone(),
            fail_commits: self.fail_commits.clone(),
            operations: vec![],
        }
    }

    async fn read(&self, path: &DataPath) -> Result<Option<Value>, DatastoreError> {
        Ok(self.tree.get(path).map(|value| value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_commit_applies_operations() {
        let datastore = InMemoryDatastore::default();
        let path = DataPath::subscription(7);
        assert_eq!(
            path.to_string(),
            "ietf-subscribed-notifications:subscriptions/subscription=7"
        );

        let mut tx = datastore.new_write_transaction();
        tx.put(path.clone(), json!({"id": 7}));
        assert!(datastore.is_empty());
        tx.commit().await.unwrap();
        assert_eq!(datastore.read(&path).await, Ok(Some(json!({"id": 7}))));

        let mut tx = datastore.new_write_transaction();
        tx.delete(path.clone());
        tx.commit().await.unwrap();
        assert_eq!(datastore.read(&path).await, Ok(None));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_tree_untouched() {
        let datastore = InMemoryDatastore::default();
        datastore.set_fail_commits(true);
        let mut tx = datastore.new_write_transaction();
        tx.put(DataPath::subscription(1), json!({}));
        assert!(matches!(
            tx.commit().await,
            Err(DatastoreError::CommitFailed(_))
        ));
        assert!(datastore.is_empty());
    }
}
