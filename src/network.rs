//! Network URL constants for the Lightcone streaming endpoint.

/// Default WebSocket URL for Lightcone.
pub const DEFAULT_WS_URL: &str = "wss://tws.lightcone.xyz/ws";

/// Local development WebSocket URL.
pub const LOCAL_WS_URL: &str = "ws://localhost:8081/ws";
