use std::cell::RefCell;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use chrono::{DateTime, Local};
use iced_x86::{Decoder, DecoderOptions};

use crate::memory::MemoryController;
use crate::registers::{CpuFlags, Registers, SegReg, Width};

/// One traced instruction, captured before it executes.
#[derive(Debug, Clone)]
pub struct InstructionEvent {
    pub cs: u16,
    pub eip: u32,
    pub linear: u32,
    pub bytes: Vec<u8>,
    pub text: String,
}

impl fmt::Display for InstructionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex: Vec<String> = self.bytes.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{:04X}:{:04X}  {:<24} {}", self.cs, self.eip, hex.join(" "), self.text)
    }
}

/// Disassemble the first instruction in `bytes`, returning its text and length.
/// Used for diagnostics only; execution never goes through here.
pub fn disassemble(bytes: &[u8], bitness: u32, ip: u64) -> (String, usize) {
    if bytes.is_empty() {
        return ("(no bytes)".to_string(), 0);
    }
    let mut decoder = Decoder::with_ip(bitness, bytes, ip, DecoderOptions::NONE);
    let instr = decoder.decode();
    if instr.is_invalid() {
        ("(bad)".to_string(), 1)
    } else {
        (format!("{}", instr), instr.len())
    }
}

/// Full machine snapshot taken when a run faults.
#[derive(Debug, Clone)]
pub struct CoreDump {
    pub captured_at: DateTime<Local>,
    pub description: String,
    pub registers: Registers,
    pub code_address: u32,
    pub code: Vec<u8>,
    pub disassembly: String,
}

impl CoreDump {
    pub fn capture(
        registers: &Registers,
        memory: &MemoryController,
        byte_count: usize,
        description: String,
    ) -> Self {
        let cs = registers.segment(SegReg::Cs);
        let code_address = memory.segment_to_linear(&cs, registers.eip);
        let code = memory.peek(code_address, byte_count);
        let bitness = if cs.is_32bit() { 32 } else { 16 };
        let (disassembly, _) = disassemble(&code, bitness, registers.eip as u64);

        Self {
            captured_at: Local::now(),
            description,
            registers: registers.clone(),
            code_address,
            code,
            disassembly,
        }
    }
}

fn flag_letters(flags: CpuFlags) -> String {
    [
        (CpuFlags::OF, 'O'),
        (CpuFlags::DF, 'D'),
        (CpuFlags::IF, 'I'),
        (CpuFlags::TF, 'T'),
        (CpuFlags::SF, 'S'),
        (CpuFlags::ZF, 'Z'),
        (CpuFlags::AF, 'A'),
        (CpuFlags::PF, 'P'),
        (CpuFlags::CF, 'C'),
    ]
    .iter()
    .map(|&(flag, c)| if flags.contains(flag) { c } else { '-' })
    .collect()
}

impl fmt::Display for CoreDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.registers;
        let gpr = |i: u8| r.read(Width::Dword, i);
        let seg = |s: SegReg| r.segment(s);

        writeln!(f, "==== CORE DUMP {} ====", self.captured_at.format("%Y-%m-%d %H:%M:%S%.3f"))?;
        writeln!(f, "{}", self.description)?;
        writeln!(
            f,
            "{:04X}:{:08X}  EAX:{:08X} EBX:{:08X} ECX:{:08X} EDX:{:08X}",
            seg(SegReg::Cs).selector,
            r.eip,
            gpr(0),
            gpr(3),
            gpr(1),
            gpr(2)
        )?;
        writeln!(
            f,
            "               ESI:{:08X} EDI:{:08X} EBP:{:08X} ESP:{:08X}",
            gpr(6),
            gpr(7),
            gpr(5),
            gpr(4)
        )?;
        for s in [SegReg::Es, SegReg::Cs, SegReg::Ss, SegReg::Ds, SegReg::Fs, SegReg::Gs] {
            let d = seg(s);
            writeln!(
                f,
                "{}:{:04X} base={:08X} limit={:08X} attr={:04X}",
                s.name(),
                d.selector,
                d.base,
                d.limit,
                d.access
            )?;
        }
        writeln!(
            f,
            "EFLAGS:{:08X} [{}]",
            r.get_cpu_flags().bits(),
            flag_letters(r.get_cpu_flags())
        )?;
        let cr0_names: Vec<&str> = r.cr0.iter_names().map(|(name, _)| name).collect();
        writeln!(
            f,
            "CR0:{:08X} [{}] CR2:{:08X} CR3:{:08X}",
            r.cr0.bits(),
            cr0_names.join(" "),
            r.cr2,
            r.cr3
        )?;
        writeln!(
            f,
            "GDTR:{:08X}/{:04X} IDTR:{:08X}/{:04X}",
            r.gdtr.base, r.gdtr.limit, r.idtr.base, r.idtr.limit
        )?;
        let hex: Vec<String> = self.code.iter().map(|b| format!("{:02X}", b)).collect();
        writeln!(f, "Code @ {:08X}: {}", self.code_address, hex.join(" "))?;
        write!(f, "Disasm: {}", self.disassembly)
    }
}

/// Where the core sends its diagnostic events.
pub trait DiagnosticSink {
    /// Per-instruction events cost a disassembly; sinks opt in.
    fn wants_instructions(&self) -> bool {
        false
    }

    fn instruction(&mut self, _event: &InstructionEvent) {}

    fn core_dump(&mut self, dump: &CoreDump);

    fn note(&mut self, _text: &str) {}
}

#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn core_dump(&mut self, _dump: &CoreDump) {}
}

/// Buffered trace file.
pub struct TraceLog {
    writer: BufWriter<File>,
}

impl TraceLog {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "[TRACE] Started {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        Ok(Self { writer })
    }
}

impl DiagnosticSink for TraceLog {
    fn wants_instructions(&self) -> bool {
        true
    }

    fn instruction(&mut self, event: &InstructionEvent) {
        // Do not flush per line
        let _ = writeln!(self.writer, "{}", event);
    }

    fn core_dump(&mut self, dump: &CoreDump) {
        let _ = writeln!(self.writer, "{}", dump);
        let _ = self.writer.flush();
    }

    fn note(&mut self, text: &str) {
        let _ = writeln!(self.writer, "[NOTE] {}", text);
    }
}

/// Keeps everything in memory. Share it through `Rc<RefCell<_>>` to inspect after a run.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub record_instructions: bool,
    pub instructions: Vec<InstructionEvent>,
    pub dumps: Vec<CoreDump>,
    pub notes: Vec<String>,
}

impl DiagnosticSink for RecordingSink {
    fn wants_instructions(&self) -> bool {
        self.record_instructions
    }

    fn instruction(&mut self, event: &InstructionEvent) {
        self.instructions.push(event.clone());
    }

    fn core_dump(&mut self, dump: &CoreDump) {
        self.dumps.push(dump.clone());
    }

    fn note(&mut self, text: &str) {
        self.notes.push(text.to_string());
    }
}

impl<T: DiagnosticSink> DiagnosticSink for Rc<RefCell<T>> {
    fn wants_instructions(&self) -> bool {
        self.borrow().wants_instructions()
    }

    fn instruction(&mut self, event: &InstructionEvent) {
        self.borrow_mut().instruction(event);
    }

    fn core_dump(&mut self, dump: &CoreDump) {
        self.borrow_mut().core_dump(dump);
    }

    fn note(&mut self, text: &str) {
        self.borrow_mut().note(text);
    }
}
