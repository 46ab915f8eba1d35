use std::{collections::HashMap, ops::Deref, sync::Arc};

use futures::Stream;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Notification, Surreal,
};
use tokio::sync::RwLock;
use tracing::instrument;

use super::types::StoredObject;
use crate::error::BrainError;

/// A single-brain-scoped SurrealDB connection. Every operation on this
/// handle is implicitly confined to the database named after `brain_id`
/// inside the shared `brains` namespace, giving each tenant an isolated
/// graph, vector, and document store.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
    pub brain_id: String,
}

pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    /// Connects to `address`, authenticates as root, and selects the
    /// per-brain database inside the shared `brains` namespace.
    #[instrument(skip(password))]
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        brain_id: &str,
    ) -> Result<Self, BrainError> {
        let db = connect(address).await?;
        db.signin(Root { username, password }).await?;
        db.use_ns("brains").use_db(brain_id).await?;

        Ok(SurrealDbClient {
            client: db,
            brain_id: brain_id.to_string(),
        })
    }

    pub async fn ensure_initialized(&self) -> Result<(), BrainError> {
        super::indexes::ensure_runtime_indexes(self, super::indexes::DEFAULT_VECTOR_DIMENSION)
            .await
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, BrainError>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        Ok(self.client.delete(T::table_name()).await?)
    }

    /// Stores an object, requires the struct to implement `StoredObject`.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, BrainError>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        let id = item.get_id().to_string();
        Ok(self.client.create((T::table_name(), id)).content(item).await?)
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, BrainError>
    where
        T: for<'de> StoredObject,
    {
        Ok(self.client.select(T::table_name()).await?)
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, BrainError>
    where
        T: for<'de> StoredObject,
    {
        Ok(self.client.select((T::table_name(), id)).await?)
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, BrainError>
    where
        T: for<'de> StoredObject,
    {
        Ok(self.client.delete((T::table_name(), id)).await?)
    }

    pub async fn listen<T>(
        &self,
    ) -> Result<impl Stream<Item = Result<Notification<T>, surrealdb::Error>>, BrainError>
    where
        T: for<'de> StoredObject + std::marker::Unpin,
    {
        Ok(self.client.select(T::table_name()).live().await?)
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Creates an in-memory SurrealDB client scoped to `brain_id`, for tests.
    pub async fn memory(brain_id: &str) -> Result<Self, BrainError> {
        let db = connect("mem://").await?;
        db.use_ns("brains").use_db(brain_id).await?;

        Ok(SurrealDbClient {
            client: db,
            brain_id: brain_id.to_string(),
        })
    }
}

/// Caches per-brain `SurrealDbClient`s so handlers and workers share one
/// connection per brain instead of reconnecting on every call, mirroring
/// the base crate's single shared client but generalized to many brains.
/// This runtime has no fork-per-request model, so a worker-local cache with
/// explicit shutdown is sufficient in place of pid-keyed reconnection.
#[derive(Clone, Default)]
pub struct BrainClientPool {
    address: String,
    username: String,
    password: String,
    clients: Arc<RwLock<HashMap<String, Arc<SurrealDbClient>>>>,
}

impl BrainClientPool {
    #[must_use]
    pub fn new(address: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, brain_id: &str) -> Result<Arc<SurrealDbClient>, BrainError> {
        if let Some(client) = self.clients.read().await.get(brain_id) {
            return Ok(client.clone());
        }

        let client = Arc::new(
            SurrealDbClient::new(&self.address, &self.username, &self.password, brain_id).await?,
        );
        client.ensure_initialized().await?;
        self.clients
            .write()
            .await
            .insert(brain_id.to_string(), client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use chrono::Utc;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let db = SurrealDbClient::memory("test_brain")
            .await
            .expect("failed to start in-memory surrealdb");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.store_item(dummy.clone()).await.expect("store failed");
        assert!(stored.is_some());

        let fetched = db.get_item::<Dummy>(&dummy.id).await.expect("fetch failed");
        assert_eq!(fetched, Some(dummy.clone()));

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("fetch all failed");
        assert!(all.contains(&dummy));

        let deleted = db.delete_item::<Dummy>(&dummy.id).await.expect("delete failed");
        assert_eq!(deleted, Some(dummy));

        let fetch_post = db
            .get_item::<Dummy>("abc")
            .await
            .expect("fetch post-delete failed");
        assert!(fetch_post.is_none());
    }
}
