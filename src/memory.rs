use log::{debug, trace, warn};

use crate::bus::{Bus, BusDevice, BusMessage, DeviceId, Subject};
use crate::error::MemoryFault;
use crate::registers::Segment;

// Top 64 KiB of the 32-bit space, served from ROM while the boot vector is locked
pub const ROM_WINDOW_START: u32 = 0xFFFF_0000;
// Legacy BIOS area ends here; the ROM image is shadowed right below it
pub const SHADOW_END: usize = 0x10_0000;
const A20_BIT: u32 = 1 << 20;

/// Which translation strategy is active. Switched by a ModeSwitch message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Real,
    Protected,
}

#[derive(Debug, Clone, Copy)]
enum Location {
    Ram(usize),
    Rom(usize),
}

pub struct MemoryController {
    ram: Vec<u8>,
    rom: Vec<u8>,
    boot_vector_locked: bool,
    a20_enabled: bool,
    mode: AddressingMode,
    bus_id: DeviceId,
}

impl MemoryController {
    pub fn new(ram_size: usize, rom: Vec<u8>) -> Self {
        let mut controller = Self {
            ram: vec![0; ram_size],
            rom,
            boot_vector_locked: true,
            a20_enabled: false,
            mode: AddressingMode::Real,
            bus_id: 0,
        };
        controller.shadow_rom();
        controller
    }

    /// Power-on state: boot vector locked, A20 off, real mode, BIOS re-shadowed.
    pub fn reset(&mut self) {
        self.boot_vector_locked = true;
        self.a20_enabled = false;
        self.mode = AddressingMode::Real;
        self.shadow_rom();
    }

    // Copy the ROM image so it ends at the top of the first megabyte (F000 segment)
    fn shadow_rom(&mut self) {
        if self.rom.is_empty() || self.rom.len() > SHADOW_END || self.ram.len() < SHADOW_END {
            return;
        }
        let start = SHADOW_END - self.rom.len();
        self.ram[start..SHADOW_END].copy_from_slice(&self.rom);
        debug!(
            "[MEM] Shadowed {} byte BIOS image at {:05X}-{:05X}",
            self.rom.len(),
            start,
            SHADOW_END - 1
        );
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn mode(&self) -> AddressingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: AddressingMode) {
        if self.mode != mode {
            debug!("[MEM] Addressing mode {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
    }

    pub fn is_boot_vector_locked(&self) -> bool {
        self.boot_vector_locked
    }

    pub fn lock_boot_vector(&mut self) {
        self.boot_vector_locked = true;
    }

    pub fn unlock_boot_vector(&mut self) {
        self.boot_vector_locked = false;
    }

    pub fn a20_enabled(&self) -> bool {
        self.a20_enabled
    }

    pub fn set_a20(&mut self, enabled: bool) {
        self.a20_enabled = enabled;
    }

    /// Build the cached descriptor for a selector under the active strategy.
    pub fn load_segment(&self, selector: u16) -> Segment {
        match self.mode {
            AddressingMode::Real => Segment::real_mode(selector),
            AddressingMode::Protected => Segment::flat(selector),
        }
    }

    // Calculate Linear Address from Segment:Offset
    pub fn segment_to_linear(&self, segment: &Segment, offset: u32) -> u32 {
        match self.mode {
            AddressingMode::Real => {
                let linear = segment.base.wrapping_add(offset);
                // With A20 off, wrap at 1 MiB like an 8086 (the reset CS base is exempt)
                if !self.a20_enabled && linear < ROM_WINDOW_START {
                    linear & !A20_BIT
                } else {
                    linear
                }
            }
            AddressingMode::Protected => segment.base.wrapping_add(offset),
        }
    }

    fn locate(&self, address: u32) -> Option<Location> {
        if self.boot_vector_locked && address >= ROM_WINDOW_START {
            // The image is mapped backwards from the top of the address space
            let from_top = (1u64 << 32) - address as u64;
            let len = self.rom.len() as u64;
            if from_top <= len {
                return Some(Location::Rom((len - from_top) as usize));
            }
            return None;
        }
        let index = address as usize;
        (index < self.ram.len()).then_some(Location::Ram(index))
    }

    fn read_located(&self, location: Location) -> u8 {
        match location {
            Location::Ram(i) => self.ram[i],
            Location::Rom(i) => self.rom[i],
        }
    }

    fn read_bytes<const N: usize>(&self, address: u32) -> Result<[u8; N], MemoryFault> {
        let mut out = [0u8; N];
        for (i, byte) in out.iter_mut().enumerate() {
            let location = self
                .locate(address.wrapping_add(i as u32))
                .ok_or(MemoryFault { address, width: N as u8 })?;
            *byte = self.read_located(location);
        }
        Ok(out)
    }

    fn write_bytes<const N: usize>(&mut self, address: u32, bytes: [u8; N]) -> Result<(), MemoryFault> {
        // Resolve every byte first so a faulting write leaves memory untouched
        let mut locations = [Location::Ram(0); N];
        for (i, location) in locations.iter_mut().enumerate() {
            *location = self
                .locate(address.wrapping_add(i as u32))
                .ok_or(MemoryFault { address, width: N as u8 })?;
        }
        for (location, value) in locations.into_iter().zip(bytes) {
            match location {
                Location::Ram(i) => self.ram[i] = value,
                Location::Rom(i) => trace!("[MEM] Discarded ROM write at image offset {:05X}", i),
            }
        }
        Ok(())
    }

    pub fn read_byte(&self, address: u32) -> Result<u8, MemoryFault> {
        Ok(self.read_bytes::<1>(address)?[0])
    }

    pub fn read_word(&self, address: u32) -> Result<u16, MemoryFault> {
        Ok(u16::from_le_bytes(self.read_bytes::<2>(address)?))
    }

    pub fn read_dword(&self, address: u32) -> Result<u32, MemoryFault> {
        Ok(u32::from_le_bytes(self.read_bytes::<4>(address)?))
    }

    pub fn write_byte(&mut self, address: u32, value: u8) -> Result<(), MemoryFault> {
        self.write_bytes(address, [value])
    }

    pub fn write_word(&mut self, address: u32, value: u16) -> Result<(), MemoryFault> {
        self.write_bytes(address, value.to_le_bytes())
    }

    pub fn write_dword(&mut self, address: u32, value: u32) -> Result<(), MemoryFault> {
        self.write_bytes(address, value.to_le_bytes())
    }

    /// Diagnostic read. Unmapped bytes show as open bus (FF).
    pub fn peek(&self, address: u32, count: usize) -> Vec<u8> {
        (0..count)
            .map(|i| {
                self.locate(address.wrapping_add(i as u32))
                    .map(|l| self.read_located(l))
                    .unwrap_or(0xFF)
            })
            .collect()
    }

    /// Up to `max` readable bytes starting at `address`, stopping at the first hole.
    pub fn fetch_window(&self, address: u32, max: usize) -> Vec<u8> {
        (0..max)
            .map_while(|i| {
                self.locate(address.wrapping_add(i as u32))
                    .map(|l| self.read_located(l))
            })
            .collect()
    }

    /// Copy raw bytes into RAM, bypassing the ROM window (loader/test use).
    pub fn load(&mut self, address: u32, bytes: &[u8]) -> Result<(), MemoryFault> {
        let start = address as usize;
        let end = start + bytes.len();
        if end > self.ram.len() {
            return Err(MemoryFault { address, width: 1 });
        }
        self.ram[start..end].copy_from_slice(bytes);
        Ok(())
    }
}

impl BusDevice for MemoryController {
    fn set_bus_id(&mut self, id: DeviceId) {
        self.bus_id = id;
    }

    fn bus_id(&self) -> DeviceId {
        self.bus_id
    }

    fn receive(&mut self, message: &BusMessage, _bus: &Bus) {
        match message.subject {
            Subject::ModeSwitch => {
                let protected = message.payload.first().copied().unwrap_or(0) != 0;
                self.set_mode(if protected {
                    AddressingMode::Protected
                } else {
                    AddressingMode::Real
                });
            }
            Subject::A20Enable => self.set_a20(true),
            Subject::A20Disable => self.set_a20(false),
            Subject::LockBootVector => self.lock_boot_vector(),
            Subject::UnlockBootVector => {
                debug!("[MEM] Boot vector unlocked by device {}", message.sender);
                self.unlock_boot_vector();
            }
            Subject::RaiseInterrupt | Subject::InterruptRaised | Subject::InstructionLog => {}
        }
        if message.subject == Subject::ModeSwitch && message.payload.is_empty() {
            warn!("[MEM] ModeSwitch from {} without payload, assuming real mode", message.sender);
        }
    }
}
