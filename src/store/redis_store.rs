use std::time::Duration;

use tracing::debug;

use super::{BatchStore, Pool};
use crate::config::bench::BenchmarkConfig;
use crate::error::{BenchError, Result};

/// Redis (or protocol-compatible) server reached over TCP, one connection per worker.
pub struct RedisStore {
    client: redis::Client,
    pool: Pool<redis::Connection>,
    timeout: Duration,
}

impl RedisStore {
    pub fn open(
        host: &str,
        port: u16,
        password: &str,
        max_connections: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(connection_url(host, port, password))
            .map_err(|e| BenchError::configuration(format!("bad redis address: {e}")))?;
        Ok(RedisStore {
            client,
            pool: Pool::new(max_connections, timeout),
            timeout,
        })
    }

    pub fn from_config(config: &BenchmarkConfig) -> Result<Self> {
        Self::open(
            &config.host,
            config.port,
            &config.password,
            config.workers,
            config.timeout,
        )
    }

    fn connect(&self) -> Result<redis::Connection> {
        let conn = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(|e| BenchError::ConnectionAcquisition(e.to_string()))?;
        conn.set_read_timeout(Some(self.timeout))
            .and_then(|_| conn.set_write_timeout(Some(self.timeout)))
            .map_err(|e| BenchError::ConnectionAcquisition(e.to_string()))?;
        debug!(open = self.pool.open(), "opened redis connection");
        Ok(conn)
    }
}

impl BatchStore for RedisStore {
    type Conn = redis::Connection;

    fn acquire(&self) -> Result<Self::Conn> {
        self.pool.acquire_with(|| self.connect())
    }

    fn release(&self, conn: Self::Conn) {
        self.pool.release(conn);
    }

    fn execute_write(&self, conn: &mut Self::Conn, pairs: &[(String, String)]) -> Result<()> {
        mset(pairs).query::<()>(conn)?;
        Ok(())
    }

    fn execute_read(
        &self,
        conn: &mut Self::Conn,
        keys: &[String],
    ) -> Result<Vec<Option<String>>> {
        Ok(mget(keys).query(conn)?)
    }
}

/// `MSET k1 v1 k2 v2 ...`: the pairs are flattened into alternating arguments.
fn mset(pairs: &[(String, String)]) -> redis::Cmd {
    let mut cmd = redis::cmd("MSET");
    cmd.arg(pairs);
    cmd
}

fn mget(keys: &[String]) -> redis::Cmd {
    let mut cmd = redis::cmd("MGET");
    cmd.arg(keys);
    cmd
}

fn connection_url(host: &str, port: u16, password: &str) -> String {
    if password.is_empty() {
        format!("redis://{host}:{port}/")
    } else {
        format!(
            "redis://:{}@{host}:{port}/",
            urlencoding::encode(password)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{connection_url, mget, mset};

    fn args(cmd: &redis::Cmd) -> Vec<String> {
        cmd.args_iter()
            .map(|arg| match arg {
                redis::Arg::Simple(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                redis::Arg::Cursor => "<cursor>".to_string(),
            })
            .collect()
    }

    #[test]
    fn mset_flattens_pairs() {
        let pairs = vec![
            ("1".to_string(), "a".to_string()),
            ("2".to_string(), "b".to_string()),
        ];
        assert_eq!(args(&mset(&pairs)), ["MSET", "1", "a", "2", "b"]);
    }

    #[test]
    fn mget_lists_keys() {
        let keys = vec!["7".to_string(), "7".to_string(), "42".to_string()];
        assert_eq!(args(&mget(&keys)), ["MGET", "7", "7", "42"]);
    }

    #[test]
    fn url_without_password() {
        assert_eq!(connection_url("localhost", 6379, ""), "redis://localhost:6379/");
    }

    #[test]
    fn password_is_escaped() {
        assert_eq!(
            connection_url("10.0.0.1", 7000, "p@ss/w:rd"),
            "redis://:p%40ss%2Fw%3Ard@10.0.0.1:7000/"
        );
    }
}
