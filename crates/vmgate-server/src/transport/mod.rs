//! Client-facing transports.

pub mod websocket;

pub use websocket::UpgradePolicy;
