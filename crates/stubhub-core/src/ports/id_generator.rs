//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース

use crate::domain::ids::{ConnectionId, LaunchId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator mints handles for bus connections and process launches.
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから使える）
pub trait IdGenerator: Send + Sync {
    fn generate_connection_id(&self) -> ConnectionId;

    fn generate_launch_id(&self) -> LaunchId;
}

/// ULID generator driven by a `Clock`, so a `FixedClock` gives ids with a
/// deterministic timestamp part.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_connection_id(&self) -> ConnectionId {
        ConnectionId::from(self.next_ulid())
    }

    fn generate_launch_id(&self) -> LaunchId {
        LaunchId::from(self.next_ulid())
    }
}
