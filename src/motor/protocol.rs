// SH motor-controller serial protocol
//
// Line-oriented text frames, one command per write, one response per read:
//   command:  s[<pwmR>:<pwmL>]e
//   feedback: s[<pulseR hex>:<pulseL hex>][<speedR>:<loadR>][<speedL>:<loadL>]e

use serialport::{self, ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum frame length in either direction (bytes)
pub const FRAME_MAX: usize = 256;

/// Read timeout: the response is expected to be buffered already
pub const RECV_TIMEOUT: Duration = Duration::from_millis(1);

/// Baud rates accepted by the motor controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baudrate {
    B9600,
    B19200,
    B38400,
    B57600,
}

impl Baudrate {
    pub fn bits_per_second(self) -> u32 {
        match self {
            Baudrate::B9600 => 9600,
            Baudrate::B19200 => 19200,
            Baudrate::B38400 => 38400,
            Baudrate::B57600 => 57600,
        }
    }
}

impl FromStr for Baudrate {
    type Err = ShError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "B9600" => Ok(Baudrate::B9600),
            "B19200" => Ok(Baudrate::B19200),
            "B38400" => Ok(Baudrate::B38400),
            "B57600" => Ok(Baudrate::B57600),
            other => Err(ShError::UnsupportedBaudrate(other.to_string())),
        }
    }
}

/// Error types for SH serial communication
#[derive(Debug, thiserror::Error)]
pub enum ShError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device is not opened")]
    NotOpen,

    #[error("Device {0} is already opened")]
    AlreadyOpen(String),

    #[error("Frame length {len} must be below 256 bytes")]
    FrameTooLong { len: usize },

    #[error("Short write: {written} of {len} bytes")]
    ShortWrite { written: usize, len: usize },

    #[error("Unsupported baudrate: {0}")]
    UnsupportedBaudrate(String),
}

pub type Result<T> = std::result::Result<T, ShError>;

/// Feedback frame that failed to scan
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedbackError {
    #[error("Empty feedback frame")]
    Empty,

    #[error("Malformed feedback frame: {0}")]
    Malformed(String),
}

/// One decoded feedback frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feedback {
    pub pulse_r: i32,
    pub pulse_l: i32,
    pub speed_voltage_r: f64,
    pub load_voltage_r: f64,
    pub speed_voltage_l: f64,
    pub load_voltage_l: f64,
}

/// Format a main-motor command, two decimals per PWM value
pub fn main_command(pwm_r: f64, pwm_l: f64) -> String {
    format!("s[{:.2}:{:.2}]e", pwm_r, pwm_l)
}

/// Format a sub-motor command, integer PWM values
pub fn sub_command(pwm_r: i32, pwm_l: i32) -> String {
    format!("s[{}:{}]e", pwm_r, pwm_l)
}

/// Scan a feedback frame.
///
/// All six fields must be present. As with the firmware's reference
/// scanner, nothing after the sixth field is checked.
pub fn parse_feedback(frame: &str) -> std::result::Result<Feedback, FeedbackError> {
    if frame.is_empty() {
        return Err(FeedbackError::Empty);
    }

    let mut scan = Scanner::new(frame);
    scan.literal("s[")?;
    let pulse_r = scan.hex()?;
    scan.literal(":")?;
    let pulse_l = scan.hex()?;
    scan.literal("][")?;
    let speed_voltage_r = scan.float()?;
    scan.literal(":")?;
    let load_voltage_r = scan.float()?;
    scan.literal("][")?;
    let speed_voltage_l = scan.float()?;
    scan.literal(":")?;
    let load_voltage_l = scan.float()?;

    Ok(Feedback {
        pulse_r,
        pulse_l,
        speed_voltage_r,
        load_voltage_r,
        speed_voltage_l,
        load_voltage_l,
    })
}

/// Minimal scanf-style cursor over a frame
struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn malformed(&self, expected: &str) -> FeedbackError {
        FeedbackError::Malformed(format!(
            "expected {} at byte {} of {:?}",
            expected, self.pos, self.input
        ))
    }

    fn literal(&mut self, lit: &str) -> std::result::Result<(), FeedbackError> {
        if self.rest().starts_with(lit) {
            self.pos += lit.len();
            Ok(())
        } else {
            Err(self.malformed(&format!("{:?}", lit)))
        }
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    /// Take the longest prefix whose chars satisfy `accept`
    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let len = rest.find(|c: char| !accept(c)).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn hex(&mut self) -> std::result::Result<i32, FeedbackError> {
        self.skip_whitespace();
        let negative = if self.rest().starts_with('-') {
            self.pos += 1;
            true
        } else {
            if self.rest().starts_with('+') {
                self.pos += 1;
            }
            false
        };
        if self.rest().starts_with("0x") || self.rest().starts_with("0X") {
            self.pos += 2;
        }

        let digits = self.take_while(|c| c.is_ascii_hexdigit());
        if digits.is_empty() {
            return Err(self.malformed("hex digits"));
        }
        let value = u32::from_str_radix(digits, 16).map_err(|_| self.malformed("32-bit hex"))?;
        // Same bit pattern an int receives from %X
        let value = value as i32;
        Ok(if negative { value.wrapping_neg() } else { value })
    }

    fn float(&mut self) -> std::result::Result<f64, FeedbackError> {
        self.skip_whitespace();
        let text = self.take_while(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
        text.parse::<f64>().map_err(|_| self.malformed("decimal"))
    }
}

/// Serial link to one SH motor controller
///
/// Mirrors the controller's expectations: 8N1, RTS/CTS flow control, one
/// write per command and a single non-blocking read per response.
pub struct ShCommunicator {
    port: Option<Box<dyn SerialPort>>,
}

impl Default for ShCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShCommunicator {
    pub fn new() -> Self {
        Self { port: None }
    }

    /// Open the device. Refuses to open twice.
    pub fn open(&mut self, device_name: &str, baudrate: &str) -> Result<()> {
        if self.is_open() {
            return Err(ShError::AlreadyOpen(device_name.to_string()));
        }

        let baudrate: Baudrate = baudrate.parse()?;
        let port = serialport::new(device_name, baudrate.bits_per_second())
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::Hardware)
            .timeout(RECV_TIMEOUT)
            .open()?;

        // Drop whatever the controller sent while nobody was listening
        port.clear(ClearBuffer::Input)?;

        debug!("Opened {} at {:?}", device_name, baudrate);
        self.port = Some(port);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn close(&mut self) {
        self.port = None;
    }

    /// Write one frame in full
    pub fn send(&mut self, data: &str) -> Result<()> {
        let port = self.port.as_mut().ok_or(ShError::NotOpen)?;

        if data.len() >= FRAME_MAX {
            return Err(ShError::FrameTooLong { len: data.len() });
        }

        let written = port.write(data.as_bytes())?;
        if written != data.len() {
            return Err(ShError::ShortWrite {
                written,
                len: data.len(),
            });
        }
        port.flush()?;
        Ok(())
    }

    /// Single best-effort read. Any failure yields an empty string.
    pub fn recv(&mut self) -> String {
        let Some(port) = self.port.as_mut() else {
            warn!("Device is not opened");
            return String::new();
        };

        let mut buffer = [0u8; FRAME_MAX];
        let size = match port.read(&mut buffer) {
            Ok(n) => n,
            Err(e) => {
                debug!("Serial read returned nothing: {}", e);
                return String::new();
            }
        };

        frame_from_bytes(&buffer[..size])
    }
}

/// Text up to the first NUL, lossy for non-UTF-8 noise
fn frame_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
