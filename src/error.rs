use thiserror::Error;

use crate::bus::{DeviceCategory, DeviceId};

/// A memory access that hit neither installed RAM nor the locked ROM window.
/// Architecturally this is a general-protection fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("general protection fault: {width}-byte access at linear {address:#010X}")]
pub struct MemoryFault {
    pub address: u32,
    pub width: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("instruction truncated at {address:#010X}")]
    Truncated { address: u32 },
    #[error("instruction at {address:#010X} exceeds 15 bytes")]
    TooLong { address: u32 },
    #[error("opcode {opcode:#04X} requires a memory operand")]
    RegisterOperand { opcode: u8 },
    #[error("invalid segment register encoding {encoding}")]
    BadSegment { encoding: u8 },
    #[error("invalid control register CR{index}")]
    BadControlRegister { index: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("no device registered under {0:?}")]
    DeviceNotFound(DeviceCategory),
    #[error("no device with id {0}")]
    UnknownDevice(DeviceId),
    #[error("device {0} is already handling a message")]
    DeviceBusy(DeviceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error(transparent)]
    Memory(#[from] MemoryFault),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("unrecognized opcode {} at {address:#010X}", format_opcode(.opcode, .sub_opcode))]
    UnrecognizedOpcode {
        opcode: u16,
        sub_opcode: Option<u8>,
        address: u32,
    },
    #[error("instruction pointer did not advance at {address:#010X}")]
    LoopDetected { address: u32 },
}

impl CpuError {
    /// Faults that end a run no matter how the loop is configured.
    pub fn is_always_fatal(&self) -> bool {
        !matches!(self, CpuError::UnrecognizedOpcode { .. })
    }
}

fn format_opcode(opcode: &u16, sub_opcode: &Option<u8>) -> String {
    let base = if *opcode > 0xFF {
        format!("{:04X}", opcode)
    } else {
        format!("{:02X}", opcode)
    };
    match *sub_opcode {
        Some(reg) => format!("{} /{}", base, reg),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_opcode_message_names_group_field() {
        let err = CpuError::UnrecognizedOpcode {
            opcode: 0xFF,
            sub_opcode: Some(7),
            address: 0x0001_0000,
        };
        assert_eq!(err.to_string(), "unrecognized opcode FF /7 at 0x00010000");

        let err = CpuError::UnrecognizedOpcode {
            opcode: 0x0F0B,
            sub_opcode: None,
            address: 0x100,
        };
        assert_eq!(err.to_string(), "unrecognized opcode 0F0B at 0x00000100");
    }

    #[test]
    fn memory_fault_converts_into_cpu_error() {
        let fault = MemoryFault { address: 0x0200_0000, width: 2 };
        let err: CpuError = fault.into();
        assert!(err.is_always_fatal());
        assert_eq!(err, CpuError::Memory(fault));
    }
}
