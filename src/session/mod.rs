//! Device session: connection lifecycle, telemetry and frame dispatch

pub mod backoff;
pub mod events;
pub mod manager;
pub mod transport;

pub use backoff::Backoff;
pub use events::{EventHub, PropertyUpdate, SignalReading, Subscription, Topic};
pub use manager::{ConnectionState, DeviceProperties, Session, SessionHandle, SessionStatus};
pub use transport::{Connector, TransportHandle, WebSocketConnector, WireMessage};
