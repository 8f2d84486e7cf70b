//! Cache-aside resolution of static vehicle data by VIN.

pub mod decoder;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    db::{Database, VehicleStatic},
    error::ConfigError,
};

pub use decoder::{NhtsaDecoder, VinDecoder};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub decoder_url: String,
    pub timeout_secs: u64,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            decoder_url: "https://vpic.nhtsa.dot.gov/api/vehicles".into(),
            timeout_secs: 10,
        }
    }
}

impl VehicleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.decoder_url.starts_with("http://") && !self.decoder_url.starts_with("https://") {
            return Err(ConfigError::new("vehicle.decoder_url must be an http(s) URL"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::new("vehicle.timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// 17 characters from the VIN alphabet (no I, O or Q).
pub fn is_valid_vin(vin: &str) -> bool {
    vin.len() == 17
        && vin
            .chars()
            .all(|c| c.is_ascii_digit() || (c.is_ascii_uppercase() && !matches!(c, 'I' | 'O' | 'Q')))
}

/// Store first, decoder on a miss, write-back on success.
///
/// The decoder is called at most once per VIN for the life of the process,
/// failed or not. Failures are not written back, so a later process retries.
#[derive(Clone)]
pub struct StaticDataResolver {
    db: Database,
    decoder: Arc<dyn VinDecoder>,
    clock: Arc<dyn Clock>,
    attempted: Arc<Mutex<HashSet<String>>>,
}

impl StaticDataResolver {
    pub fn new(db: Database, decoder: Arc<dyn VinDecoder>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            decoder,
            clock,
            attempted: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Never fails: anything that goes wrong degrades to unknown fields.
    pub async fn resolve(&self, vin: &str) -> VehicleStatic {
        let vin = vin.trim().to_ascii_uppercase();
        if !is_valid_vin(&vin) {
            log_warn!("Ignoring invalid VIN {vin:?}");
            return VehicleStatic::unknown(vin);
        }

        match self.db.get_vehicle_static(&vin).await {
            Ok(Some(cached)) => return cached,
            Ok(None) => {}
            Err(err) => log_warn!("Vehicle cache lookup failed for {vin}: {err:?}"),
        }

        if !self.mark_attempted(&vin) {
            return VehicleStatic::unknown(vin);
        }

        match self.decoder.decode(&vin).await {
            Ok(mut vehicle) => {
                vehicle.vin = vin.clone();
                vehicle.decoded_at = Some(self.clock.now());
                if let Err(err) = self.db.upsert_vehicle_static(&vehicle).await {
                    log_warn!("Failed to cache decoded vehicle {vin}: {err:?}");
                }
                log_info!(
                    "Decoded VIN {vin}: {} {} {}",
                    vehicle.year.map(|y| y.to_string()).unwrap_or_default(),
                    vehicle.make.as_deref().unwrap_or("?"),
                    vehicle.model.as_deref().unwrap_or("?")
                );
                vehicle
            }
            Err(err) => {
                log_warn!("VIN decode failed for {vin}, continuing without static data: {err}");
                VehicleStatic::unknown(vin)
            }
        }
    }

    /// True if this is the first attempt for `vin` in this process.
    fn mark_attempted(&self, vin: &str) -> bool {
        let mut attempted = match self.attempted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        attempted.insert(vin.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SystemClock, testing::CountingDecoder};

    const VIN: &str = "1HGCM82633A004352";

    fn resolver(db: &Database, decoder: &CountingDecoder) -> StaticDataResolver {
        StaticDataResolver::new(db.clone(), Arc::new(decoder.clone()), Arc::new(SystemClock))
    }

    #[test]
    fn vin_validation() {
        assert!(is_valid_vin(VIN));
        assert!(!is_valid_vin("1HGCM82633A00435"));
        assert!(!is_valid_vin("1HGCM82633A00435O"));
        assert!(!is_valid_vin("1hgcm82633a004352"));
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("vehicle.sqlite3")).unwrap();
        let decoder = CountingDecoder::succeeding();
        let resolver = resolver(&db, &decoder);

        let first = resolver.resolve(VIN).await;
        let second = resolver.resolve(&VIN.to_lowercase()).await;

        assert_eq!(decoder.calls(), 1);
        assert_eq!(first.make.as_deref(), Some("HONDA"));
        assert_eq!(second.model, first.model);
        assert!(db.get_vehicle_static(VIN).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failures_degrade_and_are_not_retried_in_process() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("vehicle.sqlite3")).unwrap();
        let decoder = CountingDecoder::failing();
        let resolver = resolver(&db, &decoder);

        assert!(resolver.resolve(VIN).await.is_unknown());
        assert!(resolver.resolve(VIN).await.is_unknown());

        assert_eq!(decoder.calls(), 1);
        assert!(db.get_vehicle_static(VIN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_vin_skips_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("vehicle.sqlite3")).unwrap();
        let decoder = CountingDecoder::succeeding();

        let vehicle = resolver(&db, &decoder).resolve("NOT-A-VIN").await;

        assert!(vehicle.is_unknown());
        assert_eq!(decoder.calls(), 0);
    }
}
