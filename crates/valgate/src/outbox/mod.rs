pub mod pgoutput;
pub mod relay;
pub mod replication;

pub use relay::OutboxRelay;
pub use replication::{Lsn, ReplicationClient, ReplicationSettings};
