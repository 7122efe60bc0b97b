// src/distribution/mod.rs — Distribution layer: wire protocol and audience routing

pub mod protocol;
pub mod router;

pub use protocol::{InboundMessage, OutboundMessage, Role};
pub use router::{AudienceCounts, ConnectionId, DistributionRouter, Membership};
