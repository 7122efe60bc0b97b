// src/client/mod.rs — Field-unit and control-center side of the real-time channel

pub mod alerts;
pub mod backoff;
pub mod connection;

pub use alerts::{Alert, AlertPriority, AlertQueue, Announcer, LogAnnouncer, PushOutcome};
pub use backoff::ReconnectPolicy;
pub use connection::{ClientEvent, ConnectionManager, ConnectionOptions, ConnectionStatus};
