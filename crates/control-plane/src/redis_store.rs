use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;

use crate::rate_limit::{CounterStore, CounterStoreError};

/// [`CounterStore`] over Redis. The connection is opened on first use and
/// reconnects on its own afterwards.
pub struct RedisCounterStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisCounterStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            conn: OnceCell::new(),
        }
    }

    pub fn open(url: &str) -> Result<Self, CounterStoreError> {
        let client =
            redis::Client::open(url).map_err(|err| CounterStoreError::Unavailable(err.to_string()))?;
        Ok(Self::new(client))
    }

    async fn connection(&self) -> Result<ConnectionManager, CounterStoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .map_err(|err| CounterStoreError::Unavailable(err.to_string()))?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CounterStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|err| CounterStoreError::Command(err.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CounterStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|err| CounterStoreError::Command(err.to_string()))
    }
}

fn _assert_send_sync<T: Send + Sync>() {}

#[allow(dead_code)]
fn _assert_redis_types() {
    _assert_send_sync::<RedisCounterStore>();
}
