use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;

use crate::{db::VehicleStatic, error::DecodeError, vehicle::VinDecoder};

/// Decoder stub that counts calls and returns a fixed outcome.
#[derive(Clone)]
pub struct CountingDecoder {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl CountingDecoder {
    pub fn succeeding() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VinDecoder for CountingDecoder {
    async fn decode(&self, vin: &str) -> Result<VehicleStatic, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DecodeError::Status(503));
        }
        Ok(VehicleStatic {
            make: Some("HONDA".into()),
            model: Some("Accord".into()),
            year: Some(2003),
            body_class: Some("Coupe".into()),
            cylinders: Some(6),
            horsepower: Some(240.0),
            plant_country: Some("UNITED STATES (USA)".into()),
            ..VehicleStatic::unknown(vin)
        })
    }
}
