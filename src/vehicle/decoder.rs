use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{db::VehicleStatic, error::DecodeError};

/// External VIN decoding service.
#[async_trait]
pub trait VinDecoder: Send + Sync {
    async fn decode(&self, vin: &str) -> Result<VehicleStatic, DecodeError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DecodeResponse {
    results: Vec<DecodedVehicle>,
}

/// Flat record returned by `DecodeVinValues`. Every value is a string and
/// unknown values are empty.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DecodedVehicle {
    make: String,
    model: String,
    model_year: String,
    body_class: String,
    engine_cylinders: String,
    #[serde(rename = "EngineHP")]
    engine_hp: String,
    plant_country: String,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl DecodedVehicle {
    fn into_vehicle(self, vin: &str) -> VehicleStatic {
        VehicleStatic {
            vin: vin.to_string(),
            year: self.model_year.trim().parse().ok(),
            cylinders: self.engine_cylinders.trim().parse().ok(),
            horsepower: self.engine_hp.trim().parse().ok(),
            make: non_empty(self.make),
            model: non_empty(self.model),
            body_class: non_empty(self.body_class),
            plant_country: non_empty(self.plant_country),
            decoded_at: None,
        }
    }
}

/// NHTSA vPIC `DecodeVinValues` client.
pub struct NhtsaDecoder {
    client: reqwest::Client,
    base_url: String,
}

impl NhtsaDecoder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VinDecoder for NhtsaDecoder {
    async fn decode(&self, vin: &str) -> Result<VehicleStatic, DecodeError> {
        let url = format!("{}/DecodeVinValues/{vin}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("format", "json")])
            .send()
            .await
            .map_err(|err| DecodeError::Network(err.to_string()))?;

        if !response.status().is_success() {
            return Err(DecodeError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|err| DecodeError::Network(err.to_string()))?;
        parse_decode_response(vin, &body)
    }
}

fn parse_decode_response(vin: &str, body: &str) -> Result<VehicleStatic, DecodeError> {
    let payload: DecodeResponse =
        serde_json::from_str(body).map_err(|err| DecodeError::Malformed(err.to_string()))?;
    payload
        .results
        .into_iter()
        .next()
        .map(|decoded| decoded.into_vehicle(vin))
        .ok_or_else(|| DecodeError::Malformed("response carried no results".into()))
}
