// Motor links used by the crawler loop
//
// A link is one SH motor controller on its own serial device. The crawler
// opens each link at the start of a cycle and closes it at the end, so an
// unplugged controller only costs that group one cycle.

use tracing::debug;

use super::protocol::{Result, ShCommunicator};

/// One request/response channel to a motor controller
pub trait MotorLink: Send {
    /// Human readable name for logs ("SH1", ...)
    fn name(&self) -> &str;

    /// Open the channel for this cycle
    fn open(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Send one command frame
    fn send(&mut self, frame: &str) -> Result<()>;

    /// Read one response frame; empty when nothing arrived
    fn recv(&mut self) -> String;

    fn close(&mut self);
}

/// Serial link that reopens the device every cycle
pub struct SerialMotorLink {
    name: String,
    device_name: String,
    baudrate: String,
    sh: ShCommunicator,
}

impl SerialMotorLink {
    pub fn new(name: &str, device_name: &str, baudrate: &str) -> Self {
        Self {
            name: name.to_string(),
            device_name: device_name.to_string(),
            baudrate: baudrate.to_string(),
            sh: ShCommunicator::new(),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl MotorLink for SerialMotorLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        // A link left open by an aborted cycle is reopened fresh
        self.sh.close();
        self.sh.open(&self.device_name, &self.baudrate)
    }

    fn is_open(&self) -> bool {
        self.sh.is_open()
    }

    fn send(&mut self, frame: &str) -> Result<()> {
        debug!("{} <- {}", self.name, frame);
        self.sh.send(frame)
    }

    fn recv(&mut self) -> String {
        let frame = self.sh.recv();
        debug!("{} -> {:?}", self.name, frame);
        frame
    }

    fn close(&mut self) {
        self.sh.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_fails_to_open() {
        let mut link = SerialMotorLink::new("SH1", "/dev/spider-crawler-missing", "B38400");
        assert!(link.open().is_err());
        assert!(!link.is_open());
        assert_eq!(link.recv(), "");
        assert_eq!(link.name(), "SH1");
        assert_eq!(link.device_name(), "/dev/spider-crawler-missing");
    }
}
