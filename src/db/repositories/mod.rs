pub mod anomalies;
pub mod connection_log;
pub mod drive_sessions;
pub mod profiles;
pub mod readings;
pub mod retention;
pub mod statistics;
pub mod vehicle_static;
