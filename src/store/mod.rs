//! The key-value store the workload runs against.
//!
//! The harness only needs batched writes and reads plus a way to borrow a connection for
//! the duration of one call; everything else is up to the implementation.

mod memory;
mod pool;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::pool::Pool;
pub use self::redis_store::RedisStore;

use crate::error::Result;

pub trait BatchStore: Sync {
    type Conn: Send;

    /// Borrows a connection. May block while all connections are in use.
    fn acquire(&self) -> Result<Self::Conn>;

    fn release(&self, conn: Self::Conn);

    /// Stores every pair in a single round trip.
    fn execute_write(&self, conn: &mut Self::Conn, pairs: &[(String, String)]) -> Result<()>;

    /// Fetches every key in a single round trip, `None` for missing keys.
    fn execute_read(&self, conn: &mut Self::Conn, keys: &[String])
        -> Result<Vec<Option<String>>>;
}
