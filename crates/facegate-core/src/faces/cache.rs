use std::time::Duration;

use redis::Commands;

use crate::errors::{CacheError, CacheResult};

/// Fast lookup layer in front of the durable store. Strictly an
/// accelerator: every operation returns [`CacheError`] on trouble and the
/// caller decides to log and move on. Entries carry a bounded TTL so a
/// populate that was never invalidated cannot outlive it.
pub trait EncodingCache {
    fn get(&self, user_id: &str) -> CacheResult<Option<Vec<f64>>>;
    fn put(&self, user_id: &str, encoding: &[f64], ttl: Duration) -> CacheResult<()>;
    fn remove(&self, user_id: &str) -> CacheResult<()>;
    fn ping(&self) -> CacheResult<()>;
}

/// Redis-backed encoding cache. Connections are established per operation;
/// a refused connection is just another swallowed `CacheError` upstream.
pub struct RedisEncodingCache {
    client: redis::Client,
}

impl RedisEncodingCache {
    pub fn connect(
        host: &str,
        port: u16,
        password: Option<&str>,
        db: i64,
    ) -> CacheResult<Self> {
        let info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(host.to_string(), port),
            redis: redis::RedisConnectionInfo {
                db,
                username: None,
                password: password.map(str::to_string),
                ..Default::default()
            },
        };
        let client = redis::Client::open(info)?;
        Ok(Self { client })
    }

    fn key(user_id: &str) -> String {
        format!("face_encoding:{user_id}")
    }

    fn connection(&self) -> CacheResult<redis::Connection> {
        self.client.get_connection().map_err(CacheError::from)
    }
}

impl EncodingCache for RedisEncodingCache {
    fn get(&self, user_id: &str) -> CacheResult<Option<Vec<f64>>> {
        let mut con = self.connection()?;
        let payload: Option<String> = con.get(Self::key(user_id))?;
        match payload {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(|err| {
                CacheError::InvalidEntry {
                    user_id: user_id.to_string(),
                    message: err.to_string(),
                }
            }),
            None => Ok(None),
        }
    }

    fn put(&self, user_id: &str, encoding: &[f64], ttl: Duration) -> CacheResult<()> {
        let json = serde_json::to_string(encoding).map_err(|err| CacheError::InvalidEntry {
            user_id: user_id.to_string(),
            message: err.to_string(),
        })?;
        let mut con = self.connection()?;
        let _: () = con.set_ex(Self::key(user_id), json, ttl.as_secs().max(1))?;
        Ok(())
    }

    fn remove(&self, user_id: &str) -> CacheResult<()> {
        let mut con = self.connection()?;
        let _: () = con.del(Self::key(user_id))?;
        Ok(())
    }

    fn ping(&self) -> CacheResult<()> {
        let mut con = self.connection()?;
        redis::cmd("PING").query::<String>(&mut con)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_are_namespaced_by_user() {
        assert_eq!(
            RedisEncodingCache::key("alice"),
            "face_encoding:alice"
        );
    }
}
