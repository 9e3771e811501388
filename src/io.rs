use std::collections::HashMap;

use log::{debug, trace, warn};

/// A peripheral claiming one or more I/O ports.
pub trait PortDevice {
    fn read(&mut self, port: u16, size: u8) -> u32;
    fn write(&mut self, port: u16, size: u8, value: u32);

    /// Back to the power-on state.
    fn reset(&mut self) {}
}

/// The port-I/O surface the CPU talks to. IN/OUT/INS/OUTS never reach a
/// peripheral any other way.
pub trait PortIo {
    fn read_8(&mut self, port: u16) -> u8;
    fn read_16(&mut self, port: u16) -> u16;
    fn write_8(&mut self, port: u16, value: u8);
    fn write_16(&mut self, port: u16, value: u16);

    /// Called from `Cpu::reset`.
    fn reset(&mut self) {}

    // Doubleword accesses are two word accesses on adjacent ports
    fn read_32(&mut self, port: u16) -> u32 {
        let low = self.read_16(port) as u32;
        let high = self.read_16(port.wrapping_add(2)) as u32;
        (high << 16) | low
    }

    fn write_32(&mut self, port: u16, value: u32) {
        self.write_16(port, value as u16);
        self.write_16(port.wrapping_add(2), (value >> 16) as u16);
    }
}

struct RangeDevice {
    start: u16,
    len: u16,
    dev: Box<dyn PortDevice>,
}

impl RangeDevice {
    fn end_exclusive(&self) -> u32 {
        u32::from(self.start) + u32::from(self.len)
    }

    fn contains(&self, port: u16) -> bool {
        let p = u32::from(port);
        p >= u32::from(self.start) && p < self.end_exclusive()
    }
}

/// Port -> device map. Exact-port registrations win over ranges.
pub struct IoPortBus {
    devices: HashMap<u16, Box<dyn PortDevice>>,
    ranges: Vec<RangeDevice>,
}

impl Default for IoPortBus {
    fn default() -> Self {
        Self::new()
    }
}

impl IoPortBus {
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
            ranges: Vec::new(),
        }
    }

    pub fn register(&mut self, port: u16, device: Box<dyn PortDevice>) {
        if self.devices.insert(port, device).is_some() {
            warn!("[IO] Port {:04X} re-registered, previous device dropped", port);
        }
    }

    /// Claim `len` ports starting at `start`. Overlapping or wrapping ranges are refused.
    pub fn register_range(&mut self, start: u16, len: u16, dev: Box<dyn PortDevice>) -> bool {
        let end_exclusive = u32::from(start) + u32::from(len);
        if len == 0 || end_exclusive > 0x1_0000 {
            warn!("[IO] Refused range {:04X}+{:X}", start, len);
            return false;
        }

        let idx = self.ranges.partition_point(|r| r.start < start);
        let overlaps_prev = idx > 0 && u32::from(start) < self.ranges[idx - 1].end_exclusive();
        let overlaps_next = self
            .ranges
            .get(idx)
            .is_some_and(|next| end_exclusive > u32::from(next.start));
        if overlaps_prev || overlaps_next {
            warn!("[IO] Range {:04X}..{:04X} overlaps an existing device", start, end_exclusive);
            return false;
        }

        debug!("[IO] Claimed ports {:04X}..{:04X}", start, end_exclusive);
        self.ranges.insert(idx, RangeDevice { start, len, dev });
        true
    }

    fn find_range_index(&self, port: u16) -> Option<usize> {
        let idx = self.ranges.partition_point(|r| r.start <= port);
        if idx == 0 {
            return None;
        }
        let cand = idx - 1;
        self.ranges[cand].contains(port).then_some(cand)
    }

    fn device_for(&mut self, port: u16) -> Option<&mut Box<dyn PortDevice>> {
        if self.devices.contains_key(&port) {
            return self.devices.get_mut(&port);
        }
        let idx = self.find_range_index(port)?;
        Some(&mut self.ranges[idx].dev)
    }

    pub fn read(&mut self, port: u16, size: u8) -> u32 {
        match self.device_for(port) {
            Some(dev) => dev.read(port, size),
            None => {
                trace!("[IO] Unclaimed read from port {:04X}", port);
                // Open bus floats high
                match size {
                    1 => 0xFF,
                    2 => 0xFFFF,
                    _ => 0xFFFF_FFFF,
                }
            }
        }
    }

    pub fn write(&mut self, port: u16, size: u8, value: u32) {
        match self.device_for(port) {
            Some(dev) => dev.write(port, size, value),
            None => debug!("[IO] Unclaimed write {:0width$X} to port {:04X}", value, port, width = size as usize * 2),
        }
    }
}

impl PortIo for IoPortBus {
    fn read_8(&mut self, port: u16) -> u8 {
        self.read(port, 1) as u8
    }

    fn read_16(&mut self, port: u16) -> u16 {
        self.read(port, 2) as u16
    }

    fn write_8(&mut self, port: u16, value: u8) {
        self.write(port, 1, value as u32);
    }

    fn write_16(&mut self, port: u16, value: u16) {
        self.write(port, 2, value as u32);
    }

    fn reset(&mut self) {
        for dev in self.devices.values_mut() {
            dev.reset();
        }
        for range in self.ranges.iter_mut() {
            range.dev.reset();
        }
    }
}

// POST diagnostic port (0x80). BIOS writes a progress code here at each boot stage.
pub const POST_CODE_PORT: u16 = 0x80;

#[derive(Debug, Default)]
pub struct PostCodePort {
    pub last_code: Option<u8>,
}

impl PortDevice for PostCodePort {
    fn read(&mut self, _port: u16, _size: u8) -> u32 {
        self.last_code.map(u32::from).unwrap_or(0xFF)
    }

    fn write(&mut self, _port: u16, _size: u8, value: u32) {
        let code = value as u8;
        debug!("[POST] {:02X}", code);
        self.last_code = Some(code);
    }

    fn reset(&mut self) {
        self.last_code = None;
    }
}
