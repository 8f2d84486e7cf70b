//! Synthetic vehicle used when no adapter is available.
//!
//! Every RPM query advances one step through a repeating cycle: engine off,
//! a drive with varying load, then engine off again. The other parameters
//! follow the current step with some noise.

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{db::ParameterValue, error::AdapterError};

use super::{
    parameters::{RPM, VIN_PARAMETER},
    DiagnosticAdapter,
};

const SIMULATED_VIN: &str = "1HGCM82633A004352";
const ENGINE_OFF_STEPS: u64 = 30;
const DRIVE_STEPS: u64 = 300;
const CYCLE_STEPS: u64 = ENGINE_OFF_STEPS * 2 + DRIVE_STEPS;

pub struct SimulatedAdapter {
    rng: StdRng,
    step: u64,
    connected: bool,
    fuel_level: f64,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            step: 0,
            connected: false,
            fuel_level: 72.0,
        }
    }

    fn engine_running(&self) -> bool {
        let phase = self.step % CYCLE_STEPS;
        (ENGINE_OFF_STEPS..ENGINE_OFF_STEPS + DRIVE_STEPS).contains(&phase)
    }

    /// 0.0 at the start of the drive, 1.0 at its midpoint, back to 0.0 at the end.
    fn drive_intensity(&self) -> f64 {
        if !self.engine_running() {
            return 0.0;
        }
        let progress = (self.step % CYCLE_STEPS - ENGINE_OFF_STEPS) as f64 / DRIVE_STEPS as f64;
        (progress * std::f64::consts::PI).sin()
    }

    fn noise(&mut self, spread: f64) -> f64 {
        self.rng.gen_range(-spread..=spread)
    }

    fn sample(&mut self, name: &str) -> Result<f64, AdapterError> {
        let running = self.engine_running();
        let intensity = self.drive_intensity();

        let value = match name {
            RPM if running => 750.0 + intensity * 2_400.0 + self.noise(80.0),
            RPM => 0.0,
            "SPEED" if running => (intensity * 110.0 + self.noise(3.0)).max(0.0),
            "SPEED" => 0.0,
            "COOLANT_TEMP" if running => 70.0 + intensity * 25.0 + self.noise(1.5),
            "COOLANT_TEMP" => 35.0,
            "ENGINE_LOAD" if running => 18.0 + intensity * 55.0 + self.noise(4.0),
            "ENGINE_LOAD" => 0.0,
            "THROTTLE_POS" if running => 12.0 + intensity * 40.0 + self.noise(3.0),
            "THROTTLE_POS" => 0.0,
            "INTAKE_TEMP" => 24.0 + intensity * 12.0 + self.noise(1.0),
            "MAF" if running => 3.0 + intensity * 40.0 + self.noise(1.5),
            "MAF" => 0.0,
            "FUEL_LEVEL" => {
                if running {
                    self.fuel_level = (self.fuel_level - 0.002).max(0.0);
                }
                self.fuel_level
            }
            "TIMING_ADVANCE" => 8.0 + intensity * 22.0 + self.noise(2.0),
            "SHORT_FUEL_TRIM_1" => self.noise(4.0),
            "LONG_FUEL_TRIM_1" => 2.5 + self.noise(0.5),
            other => return Err(AdapterError::Unsupported(other.to_string())),
        };
        Ok(value)
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiagnosticAdapter for SimulatedAdapter {
    async fn connect(&mut self, _address: &str) -> Result<(), AdapterError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AdapterError> {
        self.connected = false;
        Ok(())
    }

    async fn query_parameter(&mut self, name: &str) -> Result<ParameterValue, AdapterError> {
        if !self.connected {
            return Err(AdapterError::Link("simulated adapter not connected".into()));
        }
        if name == VIN_PARAMETER {
            return Ok(ParameterValue::Text(SIMULATED_VIN.to_string()));
        }

        let value = self.sample(name)?;
        if name == RPM {
            self.step = self.step.wrapping_add(1);
        }
        Ok(ParameterValue::Number(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cycles_through_engine_off_and_drive() {
        let mut adapter = SimulatedAdapter::seeded(7);
        adapter.connect("sim").await.unwrap();

        let mut rpms = Vec::new();
        for _ in 0..CYCLE_STEPS {
            let value = adapter.query_parameter(RPM).await.unwrap();
            rpms.push(value.as_f64().unwrap());
        }

        assert!(rpms[..ENGINE_OFF_STEPS as usize].iter().all(|r| *r == 0.0));
        let driving = &rpms[ENGINE_OFF_STEPS as usize..(ENGINE_OFF_STEPS + DRIVE_STEPS) as usize];
        assert!(driving.iter().all(|r| *r > 500.0));
        assert!(rpms[(ENGINE_OFF_STEPS + DRIVE_STEPS) as usize..].iter().all(|r| *r == 0.0));
    }

    #[tokio::test]
    async fn queries_fail_until_connected() {
        let mut adapter = SimulatedAdapter::seeded(1);
        let err = adapter.query_parameter(RPM).await.unwrap_err();
        assert!(err.is_link_loss());

        adapter.connect("sim").await.unwrap();
        let vin = adapter.query_parameter(VIN_PARAMETER).await.unwrap();
        assert_eq!(vin.as_text(), Some(SIMULATED_VIN));
    }
}
