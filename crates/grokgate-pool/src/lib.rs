mod credential;
mod pool;
mod refresh;
mod store;
mod writes;

pub use credential::{Credential, CredentialStatus, PoolClass, QUOTA_UNKNOWN};
pub use pool::{CredentialPool, Lease, Outcome, PoolConfig, PoolStats, SelectError};
pub use refresh::{
    refresh_all, spawn_refresh_task, spawn_reload_task, ProbeError, QuotaProbe, QuotaReading,
};
pub use store::{CredentialStore, StoreError, StoreResult};
pub use writes::WriteBuffer;
