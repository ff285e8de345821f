//! Metric names recorded through the `metrics` facade.
//!
//! The library only records; installing an exporter is up to the binary.

/// Connections whose pump pair started (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections whose pump pair terminated (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connections with running pumps (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Data messages written to streams (counter).
pub const WS_MESSAGES_SENT_TOTAL: &str = "ws_messages_sent_total";
/// Data messages read from streams (counter).
pub const WS_MESSAGES_RECEIVED_TOTAL: &str = "ws_messages_received_total";
/// Liveness pings written (counter).
pub const WS_PINGS_SENT_TOTAL: &str = "ws_pings_sent_total";
/// Payloads refused by a full or closed send channel (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Sends addressed to an id with no registered connection (counter).
pub const WS_SEND_TARGET_MISSING_TOTAL: &str = "ws_send_target_missing_total";
/// Dial attempts made by reconnecting links (counter).
pub const WS_RECONNECT_ATTEMPTS_TOTAL: &str = "ws_reconnect_attempts_total";
