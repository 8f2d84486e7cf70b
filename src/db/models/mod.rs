pub mod anomaly;
pub mod cleanup;
pub mod connection_log;
pub mod drive_session;
pub mod profile;
pub mod reading;
pub mod statistics;
pub mod vehicle;

pub use anomaly::Anomaly;
pub use cleanup::{CleanupResult, RetentionSummary, TableCleanup, TableSummary, VacuumOutcome};
pub use connection_log::ConnectionLogEntry;
pub use drive_session::{DriveSession, DriveSessionStatus};
pub use profile::{Profile, Threshold};
pub use reading::{ParameterValue, Reading};
pub use statistics::StatisticsSnapshot;
pub use vehicle::VehicleStatic;
