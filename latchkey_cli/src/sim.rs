use std::collections::VecDeque;

use latchkey_core::adapter::{SessionTransport, TransportError};
use latchkey_core::payload::ProtocolState;
use serde_json::Value;

/// Response byte for an accepted command.
const RESP_OK: u8 = 0x00;
/// Response byte for a rejected command.
const RESP_ERR: u8 = 0x01;

/// Opcode that crashes the simulated firmware.
const OPCODE_POISON: u8 = 0xEE;

/// An in-process smart-lock double implementing the session transport
/// boundary, so the binary can run a full session campaign without radio
/// hardware. Behavior mirrors the real device's observable surface: auth,
/// unlock and lock opcodes, the "Lock mechanism open/closed" log lines, and
/// a panic log plus dead connection when it hits the poison frame.
pub struct SimulatedLock {
    connected: bool,
    crashed: bool,
    state: ProtocolState,
    log: VecDeque<String>,
}

impl SimulatedLock {
    pub fn new() -> Self {
        SimulatedLock {
            connected: false,
            crashed: false,
            state: ProtocolState::Locked,
            log: VecDeque::new(),
        }
    }

    fn push_log(&mut self, line: impl Into<String>) {
        self.log.push_back(line.into());
        // Keep a bounded window; only the most recent lines matter.
        while self.log.len() > 64 {
            self.log.pop_front();
        }
    }

    fn frame_bytes(command: &[Value]) -> Option<Vec<u8>> {
        command
            .iter()
            .map(|v| v.as_u64().filter(|b| *b <= 0xFF).map(|b| b as u8))
            .collect()
    }
}

impl Default for SimulatedLock {
    fn default() -> Self {
        SimulatedLock::new()
    }
}

impl SessionTransport for SimulatedLock {
    fn connect(&mut self, _device: &str) -> Result<(), TransportError> {
        // A reconnect clears a crashed firmware, like a power cycle would.
        self.crashed = false;
        self.connected = true;
        self.state = ProtocolState::Locked;
        self.push_log("Boot complete. Locked");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.connected = false;
        Ok(())
    }

    fn write_command(&mut self, command: &[Value]) -> Result<Vec<u8>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.crashed {
            return Err(TransportError::Io("device unresponsive".to_string()));
        }

        let Some(frame) = Self::frame_bytes(command) else {
            self.push_log("[Error] malformed frame");
            return Ok(vec![RESP_ERR]);
        };
        let Some(&opcode) = frame.first() else {
            self.push_log("[Error] empty frame");
            return Ok(vec![RESP_ERR]);
        };

        match opcode {
            // Full reset sequence: six-byte frame re-locks the device.
            0x00 if frame.len() == 6 => {
                self.state = ProtocolState::Locked;
                self.push_log("Lock mechanism closed");
                Ok(vec![RESP_OK])
            }
            0x01 => {
                if self.state == ProtocolState::Authenticated {
                    self.state = ProtocolState::Unlocked;
                    self.push_log("Lock mechanism open");
                    Ok(vec![RESP_OK])
                } else {
                    self.push_log("[Error] unlock denied");
                    Ok(vec![RESP_ERR])
                }
            }
            0x02 => {
                self.state = ProtocolState::Locked;
                self.push_log("Lock mechanism closed");
                Ok(vec![RESP_OK])
            }
            0x03 => {
                self.state = ProtocolState::Authenticated;
                self.push_log("Authenticated");
                Ok(vec![RESP_OK])
            }
            OPCODE_POISON => {
                self.crashed = true;
                self.push_log("Guru Meditation Error: Core 1 panic'ed (LoadProhibited)");
                Err(TransportError::Io("connection reset by device".to_string()))
            }
            _ => {
                self.push_log("[Error] unknown opcode");
                Ok(vec![RESP_ERR])
            }
        }
    }

    fn last_log_line(&mut self) -> Option<String> {
        self.log.back().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connected_lock() -> SimulatedLock {
        let mut lock = SimulatedLock::new();
        lock.connect("Smart Lock [Group 2]").unwrap();
        lock
    }

    #[test]
    fn auth_then_unlock_opens_the_lock() {
        let mut lock = connected_lock();
        assert_eq!(lock.write_command(&[json!(0x03)]).unwrap(), vec![RESP_OK]);
        assert_eq!(lock.last_log_line().unwrap(), "Authenticated");
        assert_eq!(lock.write_command(&[json!(0x01)]).unwrap(), vec![RESP_OK]);
        assert_eq!(lock.last_log_line().unwrap(), "Lock mechanism open");
    }

    #[test]
    fn unlock_without_auth_is_denied() {
        let mut lock = connected_lock();
        assert_eq!(lock.write_command(&[json!(0x01)]).unwrap(), vec![RESP_ERR]);
        assert!(lock.last_log_line().unwrap().contains("[Error]"));
    }

    #[test]
    fn malformed_frames_are_rejected_not_fatal() {
        let mut lock = connected_lock();
        assert_eq!(
            lock.write_command(&[json!("invalid"), json!(1)]).unwrap(),
            vec![RESP_ERR]
        );
        assert_eq!(lock.last_log_line().unwrap(), "[Error] malformed frame");

        assert_eq!(lock.write_command(&[json!(300)]).unwrap(), vec![RESP_ERR]);
    }

    #[test]
    fn poison_frame_crashes_until_reconnect() {
        let mut lock = connected_lock();
        assert!(lock.write_command(&[json!(0xEE)]).is_err());
        assert!(lock.last_log_line().unwrap().contains("Guru Meditation"));
        // Still dead until a reconnect power-cycles it.
        assert!(lock.write_command(&[json!(0x02)]).is_err());
        lock.connect("Smart Lock [Group 2]").unwrap();
        assert_eq!(lock.write_command(&[json!(0x02)]).unwrap(), vec![RESP_OK]);
    }

    #[test]
    fn writes_require_a_connection() {
        let mut lock = SimulatedLock::new();
        assert!(lock.write_command(&[json!(0x02)]).is_err());
    }
}
