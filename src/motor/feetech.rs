// Feetech STS3215 serial protocol implementation
//
// Protocol is similar to Dynamixel Protocol 1.0:
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]

use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default serial configuration for Feetech servos
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
// Short enough that one missing servo cannot stall a 250Hz sampler for long
pub const DEFAULT_TIMEOUT_MS: u64 = 10;

/// Encoder resolution: 4096 steps per revolution
pub const STEPS_PER_REVOLUTION: f64 = 4096.0;

/// Full-scale PWM command in open-loop mode
pub const PWM_FULL_SCALE: i16 = 1000;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Bytes read by `read_status`: PresentPosition (56) through PresentCurrent (69..70)
const STATUS_BLOCK_LEN: u8 = 15;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Register addresses for STS3215
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    // EEPROM area (persists across power cycles)
    ModelNumber = 3, // 2 bytes, read-only
    Id = 5,          // 1 byte

    // RAM area (volatile)
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity, 2=PWM, 3=step
    TorqueEnable = 40,    // 1 byte: 0=off, 1=on
    GoalTime = 44,        // 2 bytes, PWM duty in PWM mode (sign bit 10)
    Lock = 55,            // 1 byte: 0=unlocked, 1=locked
    PresentPosition = 56, // 2 bytes, read-only
    PresentVelocity = 58, // 2 bytes, read-only (sign bit 15)
    PresentLoad = 60,     // 2 bytes, read-only (0.1%, sign bit 10)
    PresentVoltage = 62,  // 1 byte, read-only (0.1V)
    PresentCurrent = 69,  // 2 bytes, read-only (6.5mA, sign bit 15)
}

/// Operating modes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
    Pwm = 2,
    Step = 3,
}

/// Error types for Feetech communication
#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Servo {id} returned error status: 0x{status:02X}")]
    ServoError { id: u8, status: u8 },

    #[error("Timeout waiting for response from servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Byte transport under the bus: a serial port, or a fake in tests.
pub trait BusPort: Read + Write + Send {}

impl<T: Read + Write + Send> BusPort for T {}

/// Raw status registers of one servo, read in a single transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServoStatus {
    pub position: u16, // 0..4095
    pub velocity: i16, // steps/s
    pub load: i16,     // 0.1% of stall
    pub voltage: u8,   // 0.1V
    pub current: i16,  // 6.5mA
}

impl ServoStatus {
    pub fn supply_volts(&self) -> f64 {
        self.voltage as f64 / 10.0
    }

    pub fn load_fraction(&self) -> f64 {
        self.load as f64 / 1000.0
    }

    pub fn current_amps(&self) -> f64 {
        self.current as f64 * 0.0065
    }
}

/// Feetech servo bus - handles serial communication with servos
pub struct FeetechBus {
    port: Box<dyn BusPort>,
}

impl FeetechBus {
    /// Open a new connection to the servo bus
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self::with_port(Box::new(port)))
    }

    /// Wrap an already-open transport
    pub fn with_port(port: Box<dyn BusPort>) -> Self {
        Self { port }
    }

    /// Calculate checksum for a packet (excluding header)
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    /// Build a packet with header and checksum
    pub(crate) fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);

        // Checksum over id, length, instruction, params
        let checksum_data = &packet[2..]; // skip header
        packet.push(Self::checksum(checksum_data));

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_byte(&mut self, expected_id: u8) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.port.read_exact(&mut byte).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::UnexpectedEof => {
                FeetechError::Timeout { id: expected_id }
            }
            _ => FeetechError::Io(e),
        })?;
        Ok(byte[0])
    }

    /// Read a response packet
    ///
    /// Skips any leftover bytes from an earlier timed-out exchange until a
    /// header is found.
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut previous = self.read_byte(expected_id)?;
        loop {
            let current = self.read_byte(expected_id)?;
            if [previous, current] == HEADER {
                break;
            }
            previous = current;
        }

        let mut id = self.read_byte(expected_id)?;
        // A third 0xFF is legal padding before the id
        while id == 0xFF {
            id = self.read_byte(expected_id)?;
        }
        let length = self.read_byte(expected_id)? as usize;

        if id != expected_id {
            return Err(FeetechError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 2 {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // Read remaining bytes (error + params + checksum = length bytes)
        let mut remaining = vec![0u8; length];
        self.port.read_exact(&mut remaining).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::UnexpectedEof => {
                FeetechError::Timeout { id }
            }
            _ => FeetechError::Io(e),
        })?;

        // Verify checksum
        let mut checksum_data = vec![id, length as u8];
        checksum_data.extend_from_slice(&remaining[..remaining.len() - 1]);
        let expected_checksum = Self::checksum(&checksum_data);
        let received_checksum = remaining[remaining.len() - 1];

        if expected_checksum != received_checksum {
            return Err(FeetechError::ChecksumMismatch { id });
        }

        // Check error status
        let error_status = remaining[0];
        if error_status != 0 {
            return Err(FeetechError::ServoError {
                id,
                status: error_status,
            });
        }

        // Return parameters (excluding error byte and checksum)
        Ok(remaining[1..remaining.len() - 1].to_vec())
    }

    /// Ping a servo to check if it's connected
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write a single byte to a register
    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        let params = [register as u8, value];
        let packet = Self::build_packet(id, Instruction::Write, &params);
        debug!("Write u8 to servo {}: reg={:?}, value={}", id, register, value);
        self.send_packet(&packet)?;

        // Read status response
        let _ = self.read_response(id)?;
        Ok(())
    }

    /// Write two bytes (little-endian) to a register
    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        let params = [register as u8, (value & 0xFF) as u8, (value >> 8) as u8];
        let packet = Self::build_packet(id, Instruction::Write, &params);
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    /// Read `len` consecutive bytes starting at `register`
    pub fn read_block(&mut self, id: u8, register: Register, len: u8) -> Result<Vec<u8>> {
        let params = [register as u8, len]; // address, length
        let packet = Self::build_packet(id, Instruction::Read, &params);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.len() < len as usize {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Expected {} bytes, got {}", len, response.len()),
            });
        }
        Ok(response)
    }

    /// Read a single byte from a register
    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        Ok(self.read_block(id, register, 1)?[0])
    }

    /// Read two bytes (little-endian) from a register
    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let response = self.read_block(id, register, 2)?;
        Ok(u16::from_le_bytes([response[0], response[1]]))
    }

    // === High-level convenience methods ===

    /// Enable torque on a servo
    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    /// Disable torque on a servo
    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Set operating mode (must disable torque first)
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    /// Open-loop output in PWM mode, +/- PWM_FULL_SCALE
    pub fn set_pwm(&mut self, id: u8, duty: i16) -> Result<()> {
        let duty = duty.clamp(-PWM_FULL_SCALE, PWM_FULL_SCALE);
        self.write_u16(id, Register::GoalTime, encode_sign_magnitude(duty, 10))
    }

    /// Read present encoder position (0..4095)
    pub fn get_position(&mut self, id: u8) -> Result<u16> {
        Ok(self.read_u16(id, Register::PresentPosition)? & 0x0FFF)
    }

    /// Read position, velocity, load, voltage and current in one exchange
    pub fn read_status(&mut self, id: u8) -> Result<ServoStatus> {
        let block = self.read_block(id, Register::PresentPosition, STATUS_BLOCK_LEN)?;
        let word = |offset: usize| u16::from_le_bytes([block[offset], block[offset + 1]]);

        Ok(ServoStatus {
            position: word(0) & 0x0FFF,
            velocity: decode_sign_magnitude(word(2), 15),
            load: decode_sign_magnitude(word(4), 10),
            voltage: block[6],
            current: decode_sign_magnitude(word(13), 15),
        })
    }
}

/// Encode a signed value to sign-magnitude format
/// Bit `sign_bit` = sign (1 = negative), lower bits = magnitude
pub(crate) fn encode_sign_magnitude(value: i16, sign_bit: u8) -> u16 {
    let magnitude = value.unsigned_abs() & ((1u16 << sign_bit) - 1);
    if value < 0 {
        (1u16 << sign_bit) | magnitude
    } else {
        magnitude
    }
}

/// Decode sign-magnitude format to signed value
pub(crate) fn decode_sign_magnitude(raw: u16, sign_bit: u8) -> i16 {
    let magnitude = (raw & ((1u16 << sign_bit) - 1)) as i16;
    if raw & (1u16 << sign_bit) != 0 {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // Example: ID=1, Length=4, Instruction=WRITE, Addr=30, Data=0, 2
        let data = [1u8, 4, 0x03, 30, 0, 2];
        let checksum = FeetechBus::checksum(&data);
        // ~(1+4+3+30+0+2) = ~40 = 215
        assert_eq!(checksum, 215);
    }

    #[test]
    fn test_sign_magnitude_encoding() {
        assert_eq!(encode_sign_magnitude(0, 15), 0);
        assert_eq!(encode_sign_magnitude(100, 15), 100);
        assert_eq!(encode_sign_magnitude(-100, 15), 0x8064); // 0x8000 | 100
        assert_eq!(encode_sign_magnitude(-1, 15), 0x8001);

        assert_eq!(decode_sign_magnitude(0x8064, 15), -100);
        assert_eq!(decode_sign_magnitude(0x8001, 15), -1);
    }

    #[test]
    fn test_pwm_sign_bit_is_ten() {
        assert_eq!(encode_sign_magnitude(-1000, 10), 0x0400 | 1000);
        assert_eq!(decode_sign_magnitude(0x0400 | 500, 10), -500);
        assert_eq!(decode_sign_magnitude(500, 10), 500);
    }

    #[test]
    fn test_build_packet() {
        let packet = FeetechBus::build_packet(1, Instruction::Ping, &[]);
        // Header (2) + ID (1) + Length (1) + Instruction (1) + Checksum (1) = 6 bytes
        assert_eq!(packet.len(), 6);
        assert_eq!(packet[0], 0xFF);
        assert_eq!(packet[1], 0xFF);
        assert_eq!(packet[2], 1); // ID
        assert_eq!(packet[3], 2); // Length (instruction + checksum)
        assert_eq!(packet[4], 0x01); // PING instruction
    }

    /// Replays a canned byte stream and records what was written.
    struct ScriptedPort {
        incoming: std::io::Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.incoming.read(buf)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn status_packet(id: u8, params: &[u8]) -> Vec<u8> {
        // A status packet is framed like an instruction packet with the
        // error byte in the instruction slot.
        let mut packet = vec![0xFF, 0xFF, id, (params.len() + 2) as u8, 0];
        packet.extend_from_slice(params);
        let checksum = FeetechBus::checksum(&packet[2..]);
        packet.push(checksum);
        packet
    }

    #[test]
    fn test_read_status_skips_garbage_and_decodes() {
        let mut params = vec![0u8; STATUS_BLOCK_LEN as usize];
        params[0..2].copy_from_slice(&1234u16.to_le_bytes());
        params[2..4].copy_from_slice(&encode_sign_magnitude(-300, 15).to_le_bytes());
        params[4..6].copy_from_slice(&encode_sign_magnitude(-250, 10).to_le_bytes());
        params[6] = 121;
        params[13..15].copy_from_slice(&154u16.to_le_bytes());

        let mut incoming = vec![0x00, 0x42]; // leftovers from a lost reply
        incoming.extend(status_packet(3, &params));

        let port = ScriptedPort {
            incoming: std::io::Cursor::new(incoming),
            written: Vec::new(),
        };
        let mut bus = FeetechBus::with_port(Box::new(port));
        let status = bus.read_status(3).unwrap();

        assert_eq!(status.position, 1234);
        assert_eq!(status.velocity, -300);
        assert_eq!(status.load, -250);
        assert!((status.supply_volts() - 12.1).abs() < 1e-9);
        assert!((status.current_amps() - 1.001).abs() < 1e-9);
    }

    #[test]
    fn test_missing_reply_is_timeout() {
        let port = ScriptedPort {
            incoming: std::io::Cursor::new(Vec::new()),
            written: Vec::new(),
        };
        let mut bus = FeetechBus::with_port(Box::new(port));
        assert!(matches!(bus.ping(9), Ok(false)));
        assert!(matches!(
            bus.get_position(9),
            Err(FeetechError::Timeout { id: 9 })
        ));
    }
}
