//! ELM327-compatible adapter reached over TCP (WiFi dongles).
//!
//! Commands are ASCII lines terminated by `\r`; the adapter answers with
//! one or more lines and finishes with a `>` prompt.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use crate::{db::ParameterValue, error::AdapterError};

use super::{
    parameters::{decode_pid, spec_for, VIN_PARAMETER},
    DiagnosticAdapter,
};

const INIT_COMMANDS: &[&str] = &["ATZ", "ATE0", "ATL0", "ATS1", "ATH0", "ATSP0"];
const PROMPT: u8 = b'>';
const MAX_RESPONSE_BYTES: usize = 4096;

pub struct Elm327Adapter {
    stream: Option<TcpStream>,
    read_timeout: Duration,
}

impl Elm327Adapter {
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            stream: None,
            read_timeout,
        }
    }

    async fn command(&mut self, command: &str) -> Result<String, AdapterError> {
        let read_timeout = self.read_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| AdapterError::Link("adapter not connected".into()))?;

        stream
            .write_all(format!("{command}\r").as_bytes())
            .await
            .map_err(|err| AdapterError::Link(err.to_string()))?;

        let mut response = Vec::with_capacity(64);
        let read = async {
            let mut chunk = [0u8; 256];
            loop {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "adapter closed the connection",
                    ));
                }
                response.extend_from_slice(&chunk[..n]);
                if response.contains(&PROMPT) || response.len() > MAX_RESPONSE_BYTES {
                    return Ok::<(), std::io::Error>(());
                }
            }
        };

        match timeout(read_timeout, read).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(AdapterError::Link(err.to_string())),
            Err(_) => return Err(AdapterError::Timeout),
        }

        let text = String::from_utf8_lossy(&response).to_string();
        debug!("ELM327 {command} -> {:?}", text.trim());
        Ok(text)
    }
}

#[async_trait]
impl DiagnosticAdapter for Elm327Adapter {
    async fn connect(&mut self, address: &str) -> Result<(), AdapterError> {
        self.stream = None;
        let stream = timeout(self.read_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| AdapterError::Link(format!("timed out connecting to {address}")))?
            .map_err(|err| AdapterError::Link(err.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|err| AdapterError::Link(err.to_string()))?;
        self.stream = Some(stream);

        for command in INIT_COMMANDS {
            let response = self.command(command).await?;
            if *command != "ATZ" && !response.contains("OK") {
                self.stream = None;
                return Err(AdapterError::Link(format!(
                    "adapter rejected {command}: {}",
                    response.trim()
                )));
            }
        }

        info!("ELM327 adapter initialised at {address}");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AdapterError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.write_all(b"ATPC\r").await;
            stream
                .shutdown()
                .await
                .map_err(|err| AdapterError::Link(err.to_string()))?;
        }
        Ok(())
    }

    async fn query_parameter(&mut self, name: &str) -> Result<ParameterValue, AdapterError> {
        if name == VIN_PARAMETER {
            let response = self.command("0902").await?;
            return parse_vin_response(&response).map(ParameterValue::Text);
        }

        let spec = spec_for(name).ok_or_else(|| AdapterError::Unsupported(name.to_string()))?;
        let response = self.command(&format!("01{:02X}", spec.pid)).await?;
        let data = parse_mode01_response(&response, spec.pid, name)?;
        decode_pid(spec.pid, &data)
            .map(ParameterValue::Number)
            .ok_or_else(|| AdapterError::Malformed(format!("{name}: short payload {data:02X?}")))
    }
}

fn check_status(response: &str, name: &str) -> Result<(), AdapterError> {
    let upper = response.to_ascii_uppercase();
    if upper.contains("NO DATA") {
        return Err(AdapterError::Unsupported(name.to_string()));
    }
    if upper.contains("UNABLE TO CONNECT")
        || upper.contains("CAN ERROR")
        || upper.contains("BUS INIT")
        || upper.contains("STOPPED")
    {
        return Err(AdapterError::Timeout);
    }
    if upper.trim_end_matches('>').trim() == "?" {
        return Err(AdapterError::Malformed(format!("{name}: adapter did not understand request")));
    }
    Ok(())
}

/// Hex bytes of every response line, skipping CAN frame indices (`0:`) and
/// the multi-frame byte count line.
fn hex_bytes(response: &str) -> Vec<u8> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("SEARCHING"))
        .flat_map(|line| {
            let payload = match line.split_once(':') {
                Some((_, rest)) => rest,
                None => line,
            };
            payload
                .split_whitespace()
                .filter(|token| token.len() == 2)
                .filter_map(|token| u8::from_str_radix(token, 16).ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

pub(crate) fn parse_mode01_response(
    response: &str,
    pid: u8,
    name: &str,
) -> Result<Vec<u8>, AdapterError> {
    check_status(response, name)?;
    let bytes = hex_bytes(response);
    let start = bytes
        .windows(2)
        .position(|pair| pair == [0x41, pid])
        .ok_or_else(|| AdapterError::Malformed(format!("{name}: no 41 {pid:02X} header")))?;
    Ok(bytes[start + 2..].to_vec())
}

pub(crate) fn parse_vin_response(response: &str) -> Result<String, AdapterError> {
    check_status(response, VIN_PARAMETER)?;
    let bytes = hex_bytes(response);
    let start = bytes
        .windows(2)
        .position(|pair| pair == [0x49, 0x02])
        .ok_or_else(|| AdapterError::Malformed("VIN: no 49 02 header".into()))?;

    // 49 02 is followed by the message count byte, then ASCII characters.
    let vin: String = bytes
        .iter()
        .skip(start + 3)
        .filter(|b| b.is_ascii_alphanumeric())
        .map(|b| char::from(*b))
        .collect();

    if vin.len() < 17 {
        return Err(AdapterError::Malformed(format!("VIN too short: {vin}")));
    }
    Ok(vin[vin.len() - 17..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_frame_rpm() {
        let data = parse_mode01_response("41 0C 1A F8 \r\r>", 0x0C, "RPM").unwrap();
        assert_eq!(data, vec![0x1A, 0xF8]);
        assert_eq!(decode_pid(0x0C, &data), Some(1726.0));
    }

    #[test]
    fn skips_searching_banner() {
        let data = parse_mode01_response("SEARCHING...\r41 0D 3C\r\r>", 0x0D, "SPEED").unwrap();
        assert_eq!(data, vec![0x3C]);
    }

    #[test]
    fn no_data_is_unsupported() {
        let err = parse_mode01_response("NO DATA\r\r>", 0x2F, "FUEL_LEVEL").unwrap_err();
        assert_eq!(err, AdapterError::Unsupported("FUEL_LEVEL".into()));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = parse_mode01_response("7F 01 12\r>", 0x0C, "RPM").unwrap_err();
        assert!(matches!(err, AdapterError::Malformed(_)));
    }

    #[test]
    fn parses_multi_frame_vin() {
        let response = "014\r0: 49 02 01 31 48 47\r1: 43 4D 38 32 36 33 33\r2: 41 30 30 34 33 35 32\r\r>";
        assert_eq!(parse_vin_response(response).unwrap(), "1HGCM82633A004352");
    }
}
