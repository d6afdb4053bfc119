//! Cluster membership and gossip: the peer registry, the greet/push HTTP
//! protocol, and multicast discovery.

mod discovery;
mod node;
mod registry;

pub use discovery::{start as start_discovery, DiscoveryConfig, DEFAULT_PING_PERIOD};
pub use node::{
    combine_host_and_port, split_host_port, GreetState, NodeInfo, NodeInfoWire, NodeUpdate,
    PublicClusterInfo, PushState, UpdateData,
};
pub use registry::{GossipError, Registry};
