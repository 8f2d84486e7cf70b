use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decoded vehicle identity. Fields the decoder could not supply stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStatic {
    pub vin: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub body_class: Option<String>,
    pub cylinders: Option<i32>,
    pub horsepower: Option<f64>,
    pub plant_country: Option<String>,
    pub decoded_at: Option<DateTime<Utc>>,
}

impl VehicleStatic {
    pub fn unknown(vin: impl Into<String>) -> Self {
        Self {
            vin: vin.into(),
            ..Self::default()
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.make.is_none()
            && self.model.is_none()
            && self.year.is_none()
            && self.body_class.is_none()
            && self.cylinders.is_none()
            && self.horsepower.is_none()
            && self.plant_country.is_none()
    }
}
