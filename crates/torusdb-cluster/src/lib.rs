//! Cluster topology: hash ring, watched config store, ownership, health,
//! and write routing for the TorusDB front door.

pub mod health;
pub mod ownership;
pub mod ring;
pub mod router;
pub mod store;
pub mod view;

pub use health::HealthMonitor;
pub use ownership::OwnershipMap;
pub use ring::{belongs_to, HashRing};
pub use router::{Router, WriteRoute};
pub use store::{ConfigBackend, EtcdConfigBackend, MemoryConfigBackend, CONFIG_RECORD};
pub use view::{empty_ring_as_unavailable, ClusterSnapshot, ClusterView};
