use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use log::{debug, error, info, warn};

use crate::alu::{self, AluOp};
use crate::bus::{Bus, BusMessage, DeviceCategory, DeviceId, Subject};
use crate::config::{CpuConfig, OpcodePolicy};
use crate::decoder::{self, DecodeContext, DispatchTable};
use crate::diagnostics::{self, CoreDump, DiagnosticSink, InstructionEvent, NullSink, TraceLog};
use crate::error::{CpuError, MemoryFault};
use crate::instructions;
use crate::interrupt::InterruptLatch;
use crate::io::{IoPortBus, PortIo};
use crate::memory::MemoryController;
use crate::modrm::Operand;
use crate::registers::{Cr0, CpuFlags, Registers, SegReg, Width};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Halted,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One instruction ran, or one external interrupt was serviced
    Executed,
    Halted,
    /// The run already faulted; nothing was done
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Halted,
    IpZero,
    StepBudget,
    Fault(CpuError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub reason: StopReason,
    pub steps: u64,
}

pub struct Cpu {
    pub regs: Registers,
    pub memory: Rc<RefCell<MemoryController>>,
    pub io: Box<dyn PortIo>,
    pub bus: Bus,
    pub state: CpuState,
    pub config: CpuConfig,

    pub(crate) ctx: DecodeContext,
    pub(crate) primary: DispatchTable,
    pub(crate) secondary: DispatchTable,

    latch: Rc<RefCell<InterruptLatch>>,
    bus_id: DeviceId,
    sink: Box<dyn DiagnosticSink>,
    last_fault: Option<CpuError>,
}

impl Cpu {
    pub fn new(config: CpuConfig, rom: Vec<u8>) -> io::Result<Self> {
        Self::with_io(config, rom, Box::new(IoPortBus::new()))
    }

    /// Fails only when `config.trace_path` is set and the trace file cannot be created.
    pub fn with_io(config: CpuConfig, rom: Vec<u8>, io: Box<dyn PortIo>) -> io::Result<Self> {
        let memory = Rc::new(RefCell::new(MemoryController::new(config.ram_size, rom)));
        let latch = Rc::new(RefCell::new(InterruptLatch::default()));

        // The latch is the CPU's face on the bus; its id is our sender id
        let mut bus = Bus::new();
        let bus_id = bus.register(latch.clone(), DeviceCategory::Cpu);
        bus.register(memory.clone(), DeviceCategory::Memory);

        let sink: Box<dyn DiagnosticSink> = match &config.trace_path {
            Some(path) => {
                info!("[CPU] Tracing to {}", path.display());
                Box::new(TraceLog::create(path)?)
            }
            None => Box::new(NullSink),
        };

        Ok(Self {
            regs: Registers::new(),
            memory,
            io,
            bus,
            state: CpuState::Running,
            config,
            ctx: DecodeContext::default(),
            primary: instructions::primary_table(),
            secondary: instructions::secondary_table(),
            latch,
            bus_id,
            sink,
            last_fault: None,
        })
    }

    pub fn set_sink(&mut self, sink: Box<dyn DiagnosticSink>) {
        self.sink = sink;
    }

    pub fn bus_id(&self) -> DeviceId {
        self.bus_id
    }

    pub fn last_fault(&self) -> Option<CpuError> {
        self.last_fault
    }

    pub fn pending_interrupts(&self) -> usize {
        self.latch.borrow().pending()
    }

    /// Architectural power-on state: CS=F000 (base FFFF0000), IP=FFF0, boot vector locked.
    pub fn reset(&mut self) {
        self.regs = Registers::new();
        self.memory.borrow_mut().reset();
        self.io.reset();
        self.latch.borrow_mut().clear();
        self.state = CpuState::Running;
        self.last_fault = None;
        info!("[CPU] Reset");
    }

    // ===== Memory =====

    // Calculate Linear Address from Segment:Offset
    pub fn linear(&self, seg: SegReg, offset: u32) -> u32 {
        self.memory
            .borrow()
            .segment_to_linear(&self.regs.segment(seg), offset)
    }

    pub fn read_linear(&self, address: u32, width: Width) -> Result<u32, MemoryFault> {
        let memory = self.memory.borrow();
        match width {
            Width::Byte => memory.read_byte(address).map(u32::from),
            Width::Word => memory.read_word(address).map(u32::from),
            Width::Dword => memory.read_dword(address),
        }
    }

    pub fn write_linear(&mut self, address: u32, width: Width, value: u32) -> Result<(), MemoryFault> {
        let mut memory = self.memory.borrow_mut();
        match width {
            Width::Byte => memory.write_byte(address, value as u8),
            Width::Word => memory.write_word(address, value as u16),
            Width::Dword => memory.write_dword(address, value),
        }
    }

    pub fn read_mem(&self, seg: SegReg, offset: u32, width: Width) -> Result<u32, CpuError> {
        Ok(self.read_linear(self.linear(seg, offset), width)?)
    }

    pub fn write_mem(&mut self, seg: SegReg, offset: u32, width: Width, value: u32) -> Result<(), CpuError> {
        let address = self.linear(seg, offset);
        Ok(self.write_linear(address, width, value)?)
    }

    pub fn read_operand(&self, operand: Operand, width: Width) -> Result<u32, CpuError> {
        match operand {
            Operand::Register(index) => Ok(self.regs.read(width, index)),
            Operand::Memory { segment, offset } => self.read_mem(segment, offset, width),
        }
    }

    pub fn write_operand(&mut self, operand: Operand, width: Width, value: u32) -> Result<(), CpuError> {
        match operand {
            Operand::Register(index) => {
                self.regs.write(width, index, value);
                Ok(())
            }
            Operand::Memory { segment, offset } => self.write_mem(segment, offset, width, value),
        }
    }

    /// Load a segment register through the active translation strategy.
    pub fn load_segment(&mut self, seg: SegReg, selector: u16) {
        let segment = self.memory.borrow().load_segment(selector);
        self.regs.set_segment(seg, segment);
    }

    // ===== Stack =====

    fn stack_is_32(&self) -> bool {
        self.regs.segment(SegReg::Ss).is_32bit()
    }

    pub fn stack_pointer(&self) -> u32 {
        if self.stack_is_32() {
            self.regs.read(Width::Dword, 4)
        } else {
            self.regs.read(Width::Word, 4)
        }
    }

    pub fn set_stack_pointer(&mut self, value: u32) {
        if self.stack_is_32() {
            self.regs.write(Width::Dword, 4, value);
        } else {
            self.regs.write(Width::Word, 4, value);
        }
    }

    /// SP or ESP, following the SS descriptor.
    pub fn stack_width(&self) -> Width {
        if self.stack_is_32() { Width::Dword } else { Width::Word }
    }

    fn stack_mask(&self) -> u32 {
        self.stack_width().mask()
    }

    // SP moves only after the store succeeded
    pub fn push(&mut self, width: Width, value: u32) -> Result<(), CpuError> {
        let sp = self.stack_pointer().wrapping_sub(width.bytes()) & self.stack_mask();
        self.write_mem(SegReg::Ss, sp, width, value)?;
        self.set_stack_pointer(sp);
        Ok(())
    }

    pub fn pop(&mut self, width: Width) -> Result<u32, CpuError> {
        let value = self.peek_stack(width, 0)?;
        let sp = self.stack_pointer().wrapping_add(width.bytes()) & self.stack_mask();
        self.set_stack_pointer(sp);
        Ok(value)
    }

    /// Read the stack `depth` bytes above SP without popping.
    pub fn peek_stack(&self, width: Width, depth: u32) -> Result<u32, CpuError> {
        let sp = self.stack_pointer().wrapping_add(depth) & self.stack_mask();
        self.read_mem(SegReg::Ss, sp, width)
    }

    // ===== Flags =====

    pub fn get_cpu_flag(&self, flag: CpuFlags) -> bool {
        self.regs.get_cpu_flag(flag)
    }

    pub fn set_cpu_flag(&mut self, flag: CpuFlags, value: bool) {
        self.regs.set_cpu_flag(flag, value);
    }

    /// Copy the `affected` bits of `result` into EFLAGS.
    pub fn apply_flags(&mut self, result: CpuFlags, affected: CpuFlags) {
        let merged = (self.regs.get_cpu_flags() - affected) | (result & affected);
        self.regs.set_cpu_flags(merged);
    }

    /// Run an ALU operation, commit its flags and return the truncated result.
    pub fn alu(&mut self, op: AluOp, width: Width, a: u32, b: u32) -> u32 {
        let carry = self.get_cpu_flag(CpuFlags::CF);
        let result = alu::binary(op, width, a, b, carry);
        self.apply_flags(result.flags, CpuFlags::STATUS);
        result.value
    }

    // ===== System =====

    /// Publish a message from the CPU to every other device.
    pub fn publish(&mut self, subject: Subject, payload: Vec<u8>) -> Result<(), CpuError> {
        let message = BusMessage::new(subject, self.bus_id, payload);
        self.bus.send_to_all(&message)?;
        Ok(())
    }

    /// Write CR0. Flipping PE tells the bus (the memory controller swaps strategy).
    pub fn write_cr0(&mut self, value: u32) -> Result<(), CpuError> {
        let was_protected = self.regs.protected_mode();
        // ET is hardwired on a 387-equipped 386
        self.regs.cr0 = Cr0::from_bits_retain(value) | Cr0::ET;
        let protected = self.regs.protected_mode();
        if protected != was_protected {
            debug!("[CPU] CR0.PE -> {}", protected);
            self.publish(Subject::ModeSwitch, vec![protected as u8])?;
        }
        Ok(())
    }

    pub fn halt(&mut self) {
        self.state = CpuState::Halted;
    }

    // ===== Fetch-execute =====

    fn service_pending_interrupt(&mut self) -> Result<bool, CpuError> {
        if !self.get_cpu_flag(CpuFlags::IF) {
            return Ok(false);
        }
        let Some(vector) = self.latch.borrow_mut().take() else {
            return Ok(false);
        };
        debug!("[CPU] Servicing external interrupt {:02X}", vector);
        let return_eip = self.regs.eip;
        self.deliver_interrupt(vector, return_eip)?;
        Ok(true)
    }

    fn trace_instruction(&mut self) {
        let cs = self.regs.segment(SegReg::Cs);
        let linear = self.linear(SegReg::Cs, self.regs.eip);

        if self.bus.has_category(DeviceCategory::Debug) {
            let message = BusMessage::new(Subject::InstructionLog, self.bus_id, linear.to_le_bytes().to_vec());
            if let Err(e) = self.bus.send_to_category(DeviceCategory::Debug, &message) {
                warn!("[CPU] Instruction log delivery failed: {}", e);
            }
        }

        if !self.sink.wants_instructions() {
            return;
        }
        let window = self.memory.borrow().peek(linear, decoder::MAX_INSTRUCTION_LEN as usize);
        let bitness = if cs.is_32bit() { 32 } else { 16 };
        let (text, len) = diagnostics::disassemble(&window, bitness, self.regs.eip as u64);
        let event = InstructionEvent {
            cs: cs.selector,
            eip: self.regs.eip,
            linear,
            bytes: window[..len.max(1).min(window.len())].to_vec(),
            text,
        };
        self.sink.instruction(&event);
    }

    fn step_inner(&mut self) -> Result<StepOutcome, CpuError> {
        if self.state == CpuState::Faulted {
            return Ok(StepOutcome::Faulted);
        }
        if self.service_pending_interrupt()? {
            self.state = CpuState::Running;
            return Ok(StepOutcome::Executed);
        }
        if self.state == CpuState::Halted {
            return Ok(StepOutcome::Halted);
        }

        let before = self.linear(SegReg::Cs, self.regs.eip);
        self.trace_instruction();
        decoder::execute_next(self)?;

        if self.state == CpuState::Halted {
            return Ok(StepOutcome::Halted);
        }
        // Compared as linear addresses: a far jump may keep CS:IP but move the base
        if self.config.loop_guard && self.linear(SegReg::Cs, self.regs.eip) == before {
            return Err(CpuError::LoopDetected { address: before });
        }
        Ok(StepOutcome::Executed)
    }

    fn handle_fault(&mut self, err: CpuError) -> Result<StepOutcome, CpuError> {
        if matches!(err, CpuError::UnrecognizedOpcode { .. }) && self.config.opcode_policy == OpcodePolicy::Skip {
            warn!("[CPU] Skipping {}", err);
            self.sink.note(&format!("skipped {}", err));
            self.regs.eip = self.ctx.cursor & self.ctx.ip_mask();
            return Ok(StepOutcome::Executed);
        }

        error!("[CPU] {}", err);
        let dump = CoreDump::capture(
            &self.regs,
            &self.memory.borrow(),
            self.config.dump_bytes,
            err.to_string(),
        );
        self.sink.core_dump(&dump);
        self.state = CpuState::Faulted;
        self.last_fault = Some(err);
        Err(err)
    }

    /// Execute one instruction, or service one pending external interrupt.
    pub fn step(&mut self) -> Result<StepOutcome, CpuError> {
        match self.step_inner() {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.handle_fault(err),
        }
    }

    /// Step until halt, fault, the IP==0 sentinel or the step budget.
    pub fn run(&mut self) -> RunOutcome {
        let mut steps = 0u64;
        loop {
            if self.config.max_steps.is_some_and(|max| steps >= max) {
                return RunOutcome { reason: StopReason::StepBudget, steps };
            }

            let reason = match self.step() {
                Ok(StepOutcome::Executed) => None,
                // Nothing else runs while we wait, so a halt ends the run
                Ok(StepOutcome::Halted) => Some(StopReason::Halted),
                Ok(StepOutcome::Faulted) => Some(match self.last_fault {
                    Some(err) => StopReason::Fault(err),
                    None => StopReason::Halted,
                }),
                Err(err) => Some(StopReason::Fault(err)),
            };
            steps += 1;

            if let Some(reason) = reason {
                return RunOutcome { reason, steps };
            }
            if self.config.stop_at_ip_zero && self.regs.eip == 0 {
                return RunOutcome { reason: StopReason::IpZero, steps };
            }
        }
    }
}
