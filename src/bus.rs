use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, trace};

use crate::error::BusError;

pub type DeviceId = u32;

/// Device-category identifiers. A category may hold several devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceCategory {
    Cpu,
    Memory,
    InterruptController,
    Timer,
    Dma,
    Keyboard,
    Cmos,
    Video,
    Chipset,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    /// payload[0]: 1 = enter protected mode, 0 = back to real mode
    ModeSwitch,
    /// payload[0]: vector
    RaiseInterrupt,
    /// payload[0]: vector that the CPU just delivered
    InterruptRaised,
    A20Enable,
    A20Disable,
    LockBootVector,
    UnlockBootVector,
    /// payload: little-endian linear address of the instruction
    InstructionLog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: Subject,
    pub sender: DeviceId,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: Subject, sender: DeviceId, payload: Vec<u8>) -> Self {
        Self { subject, sender, payload }
    }

    pub fn signal(subject: Subject, sender: DeviceId) -> Self {
        Self::new(subject, sender, Vec::new())
    }
}

/// Anything that can sit on the bus.
///
/// `receive` runs to completion on the sender's call stack. The bus is
/// passed back in so a device can forward or answer synchronously.
pub trait BusDevice {
    fn set_bus_id(&mut self, id: DeviceId);
    fn bus_id(&self) -> DeviceId;
    fn receive(&mut self, message: &BusMessage, bus: &Bus);
}

pub type SharedDevice = Rc<RefCell<dyn BusDevice>>;

struct Attached {
    id: DeviceId,
    category: DeviceCategory,
    device: SharedDevice,
}

/// Typed device registry with synchronous, registration-ordered delivery.
pub struct Bus {
    next_id: DeviceId,
    devices: Vec<Attached>,
    by_category: BTreeMap<DeviceCategory, Vec<usize>>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            devices: Vec::new(),
            by_category: BTreeMap::new(),
        }
    }

    /// Attach a device under a category and hand it its unique id.
    pub fn register(&mut self, device: SharedDevice, category: DeviceCategory) -> DeviceId {
        let id = self.next_id;
        self.next_id = id + 1;
        device.borrow_mut().set_bus_id(id);

        let slot = self.devices.len();
        self.devices.push(Attached { id, category, device });
        self.by_category.entry(category).or_default().push(slot);

        debug!("[BUS] Registered device {} under {:?}", id, category);
        id
    }

    pub fn find_all(&self, category: DeviceCategory) -> Vec<SharedDevice> {
        self.slots(category)
            .iter()
            .map(|&slot| Rc::clone(&self.devices[slot].device))
            .collect()
    }

    pub fn find_one(&self, category: DeviceCategory) -> Result<SharedDevice, BusError> {
        self.slots(category)
            .first()
            .map(|&slot| Rc::clone(&self.devices[slot].device))
            .ok_or(BusError::DeviceNotFound(category))
    }

    pub fn has_category(&self, category: DeviceCategory) -> bool {
        !self.slots(category).is_empty()
    }

    pub fn category_of(&self, id: DeviceId) -> Option<DeviceCategory> {
        self.devices.iter().find(|a| a.id == id).map(|a| a.category)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Broadcast to every device except the sender, in registration order.
    pub fn send_to_all(&self, message: &BusMessage) -> Result<(), BusError> {
        trace!("[BUS] Broadcast {:?} from {}", message.subject, message.sender);
        for attached in &self.devices {
            if attached.id == message.sender {
                continue;
            }
            self.deliver(attached, message)?;
        }
        Ok(())
    }

    /// Deliver to every device of one category. An empty category is not an error.
    pub fn send_to_category(
        &self,
        category: DeviceCategory,
        message: &BusMessage,
    ) -> Result<(), BusError> {
        for &slot in self.slots(category) {
            let attached = &self.devices[slot];
            if attached.id == message.sender {
                continue;
            }
            self.deliver(attached, message)?;
        }
        Ok(())
    }

    /// Deliver to the first device registered under a category.
    pub fn send_to_one(&self, category: DeviceCategory, message: &BusMessage) -> Result<(), BusError> {
        let slot = *self
            .slots(category)
            .first()
            .ok_or(BusError::DeviceNotFound(category))?;
        self.deliver(&self.devices[slot], message)
    }

    /// Deliver to a single device by id.
    pub fn send_to_device(&self, id: DeviceId, message: &BusMessage) -> Result<(), BusError> {
        let attached = self
            .devices
            .iter()
            .find(|a| a.id == id)
            .ok_or(BusError::UnknownDevice(id))?;
        self.deliver(attached, message)
    }

    fn slots(&self, category: DeviceCategory) -> &[usize] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn deliver(&self, attached: &Attached, message: &BusMessage) -> Result<(), BusError> {
        // A device already on the call stack cannot take a nested message
        let mut device = attached
            .device
            .try_borrow_mut()
            .map_err(|_| BusError::DeviceBusy(attached.id))?;
        device.receive(message, self);
        Ok(())
    }
}
