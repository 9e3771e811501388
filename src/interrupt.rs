use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::bus::{Bus, BusDevice, BusMessage, DeviceId, Subject};
use crate::cpu::Cpu;
use crate::error::CpuError;
use crate::registers::{CpuFlags, SegReg, Width};

pub const DIVIDE_ERROR: u8 = 0x00;
pub const BREAKPOINT: u8 = 0x03;
pub const OVERFLOW: u8 = 0x04;
pub const DEVICE_NOT_AVAILABLE: u8 = 0x07;

/// Holds external interrupt requests until the CPU can take them.
/// Registered on the bus under the Cpu category.
#[derive(Debug, Default)]
pub struct InterruptLatch {
    pending: VecDeque<u8>,
    bus_id: DeviceId,
}

impl InterruptLatch {
    pub fn raise(&mut self, vector: u8) {
        self.pending.push_back(vector);
    }

    pub fn take(&mut self) -> Option<u8> {
        self.pending.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl BusDevice for InterruptLatch {
    fn set_bus_id(&mut self, id: DeviceId) {
        self.bus_id = id;
    }

    fn bus_id(&self) -> DeviceId {
        self.bus_id
    }

    fn receive(&mut self, message: &BusMessage, _bus: &Bus) {
        if message.subject != Subject::RaiseInterrupt {
            return;
        }
        match message.payload.first() {
            Some(&vector) => {
                trace!("[INT] Device {} raised {:02X}", message.sender, vector);
                self.raise(vector);
            }
            None => warn!("[INT] RaiseInterrupt from {} without a vector", message.sender),
        }
    }
}

impl Cpu {
    /// Vector through the IVT (real mode) or a flat IDT gate (protected mode).
    ///
    /// The vector entry is read before anything is pushed, so an unreadable
    /// table leaves the machine state untouched.
    pub fn deliver_interrupt(&mut self, vector: u8, return_eip: u32) -> Result<(), CpuError> {
        let flags = self.regs.get_cpu_flags().bits();
        let cs = self.regs.segment(SegReg::Cs).selector as u32;

        let (selector, target) = if self.regs.protected_mode() {
            let gate = self.regs.idtr.base.wrapping_add(vector as u32 * 8);
            let low = self.read_linear(gate, Width::Word)?;
            let selector = self.read_linear(gate.wrapping_add(2), Width::Word)? as u16;
            let high = self.read_linear(gate.wrapping_add(6), Width::Word)?;
            self.push_frame(Width::Dword, [flags, cs, return_eip])?;
            (selector, (high << 16) | low)
        } else {
            let entry = self.regs.idtr.base.wrapping_add(vector as u32 * 4);
            let offset = self.read_linear(entry, Width::Word)?;
            let segment = self.read_linear(entry.wrapping_add(2), Width::Word)? as u16;
            self.push_frame(Width::Word, [flags & 0xFFFF, cs, return_eip & 0xFFFF])?;
            (segment, offset)
        };

        self.set_cpu_flag(CpuFlags::IF, false);
        self.set_cpu_flag(CpuFlags::TF, false);
        self.load_segment(SegReg::Cs, selector);
        self.regs.eip = target;
        self.ctx.branch = Some(target);
        debug!("[INT] {:02X} -> {:04X}:{:08X}", vector, selector, target);

        self.publish(Subject::InterruptRaised, vec![vector])
    }

    // All three slots must be reachable before the first store
    fn push_frame(&mut self, width: Width, frame: [u32; 3]) -> Result<(), CpuError> {
        let bytes = width.bytes();
        for slot in 1..=3 {
            self.peek_stack(width, 0u32.wrapping_sub(slot * bytes))?;
        }
        let saved_sp = self.stack_pointer();
        for value in frame {
            if let Err(e) = self.push(width, value) {
                self.set_stack_pointer(saved_sp);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Software interrupt from inside a handler: returns past the current instruction.
    pub fn software_interrupt(&mut self, vector: u8) -> Result<(), CpuError> {
        let return_eip = self.ctx.cursor;
        self.deliver_interrupt(vector, return_eip)
    }

    /// Fault-class exception: the saved EIP points at the faulting instruction.
    pub fn raise_fault(&mut self, vector: u8) -> Result<(), CpuError> {
        let return_eip = self.ctx.start;
        self.deliver_interrupt(vector, return_eip)
    }

    /// Undo an interrupt frame of the given width.
    pub fn interrupt_return(&mut self, width: Width) -> Result<(), CpuError> {
        // Read the whole frame before committing anything
        let bytes = width.bytes();
        let eip = self.peek_stack(width, 0)?;
        let cs = self.peek_stack(width, bytes)? as u16;
        let flags = self.peek_stack(width, bytes * 2)?;
        let sp = self.stack_pointer().wrapping_add(bytes * 3);
        self.set_stack_pointer(sp);

        match width {
            Width::Dword => self
                .regs
                .set_cpu_flags(CpuFlags::from_bits_retain(flags)),
            _ => self.regs.set_flags_word(flags as u16),
        }
        self.load_segment(SegReg::Cs, cs);
        self.regs.eip = eip;
        self.ctx.branch = Some(eip);
        Ok(())
    }
}
