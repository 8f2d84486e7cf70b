//! The fixed set of parameters polled on every tick.

/// A polled parameter: name used throughout the pipeline, unit, and the
/// SAE J1979 mode-01 PID it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub unit: &'static str,
    pub pid: u8,
}

pub const RPM: &str = "RPM";
pub const VIN_PARAMETER: &str = "VIN";

/// Polling order is the order of this slice.
pub const PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec { name: RPM, unit: "rpm", pid: 0x0C },
    ParameterSpec { name: "SPEED", unit: "km/h", pid: 0x0D },
    ParameterSpec { name: "COOLANT_TEMP", unit: "degC", pid: 0x05 },
    ParameterSpec { name: "ENGINE_LOAD", unit: "percent", pid: 0x04 },
    ParameterSpec { name: "THROTTLE_POS", unit: "percent", pid: 0x11 },
    ParameterSpec { name: "INTAKE_TEMP", unit: "degC", pid: 0x0F },
    ParameterSpec { name: "MAF", unit: "g/s", pid: 0x10 },
    ParameterSpec { name: "FUEL_LEVEL", unit: "percent", pid: 0x2F },
    ParameterSpec { name: "TIMING_ADVANCE", unit: "degree", pid: 0x0E },
    ParameterSpec { name: "SHORT_FUEL_TRIM_1", unit: "percent", pid: 0x06 },
    ParameterSpec { name: "LONG_FUEL_TRIM_1", unit: "percent", pid: 0x07 },
];

pub fn spec_for(name: &str) -> Option<&'static ParameterSpec> {
    PARAMETERS.iter().find(|spec| spec.name == name)
}

/// Applies the J1979 scaling for a mode-01 PID to its data bytes.
pub fn decode_pid(pid: u8, data: &[u8]) -> Option<f64> {
    let a = f64::from(*data.first()?);
    let b = data.get(1).map(|b| f64::from(*b));

    let value = match pid {
        0x04 | 0x11 | 0x2F => a * 100.0 / 255.0,
        0x05 | 0x0F => a - 40.0,
        0x06 | 0x07 => (a - 128.0) * 100.0 / 128.0,
        0x0C => (a * 256.0 + b?) / 4.0,
        0x0D => a,
        0x0E => a / 2.0 - 64.0,
        0x10 => (a * 256.0 + b?) / 100.0,
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_names_are_unique() {
        let mut names: Vec<_> = PARAMETERS.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PARAMETERS.len());
    }

    #[test]
    fn decodes_standard_pids() {
        assert_eq!(decode_pid(0x0C, &[0x1A, 0xF8]), Some(1726.0));
        assert_eq!(decode_pid(0x0D, &[0x3C]), Some(60.0));
        assert_eq!(decode_pid(0x05, &[0x7B]), Some(83.0));
        assert_eq!(decode_pid(0x06, &[0x80]), Some(0.0));
        assert_eq!(decode_pid(0x0E, &[0x80]), Some(0.0));
        assert_eq!(decode_pid(0x10, &[0x01, 0xF4]), Some(5.0));
    }

    #[test]
    fn two_byte_pid_with_one_byte_is_rejected() {
        assert_eq!(decode_pid(0x0C, &[0x1A]), None);
        assert_eq!(decode_pid(0x0D, &[]), None);
        assert_eq!(decode_pid(0x99, &[0x01]), None);
    }
}
