//! In-process realtime broker
//!
//! The server side of the messaging wire contract: connection registry,
//! conversation rooms, room-scoped fan-out and presence announcements.
//! [`BrokerConnector`] plugs it straight into a [`dm_client`] transport,
//! which is how the end-to-end scenario tests run without sockets.

pub mod broker;
pub mod connector;

pub use broker::{Broker, BrokerError, ConnectionId};
pub use connector::BrokerConnector;
