use std::path::PathBuf;

/// What the fetch-execute loop does with an opcode that has no handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpcodePolicy {
    /// Dump the machine state and stop the run.
    #[default]
    Fatal,
    /// Note it in the diagnostics sink and continue after the opcode bytes.
    Skip,
}

#[derive(Debug, Clone)]
pub struct CpuConfig {
    pub ram_size: usize,
    pub opcode_policy: OpcodePolicy,
    /// Fault when a step leaves CS:EIP where it found it
    pub loop_guard: bool,
    /// Stop `run` when EIP reaches 0 (test harness convention)
    pub stop_at_ip_zero: bool,
    pub max_steps: Option<u64>,
    /// Raw code bytes captured in a core dump
    pub dump_bytes: usize,
    pub trace_path: Option<PathBuf>,
}

pub const DEFAULT_RAM_KB: usize = 4096;

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            ram_size: DEFAULT_RAM_KB * 1024,
            opcode_policy: OpcodePolicy::Fatal,
            loop_guard: true,
            stop_at_ip_zero: false,
            max_steps: None,
            dump_bytes: 16,
            trace_path: None,
        }
    }
}

impl CpuConfig {
    pub fn with_ram_kb(mut self, kb: usize) -> Self {
        self.ram_size = kb * 1024;
        self
    }

    pub fn with_opcode_policy(mut self, policy: OpcodePolicy) -> Self {
        self.opcode_policy = policy;
        self
    }
}
