//! Deterministic walker and resolver for a small fictional program that
//! faults in `main.divide` and captures its stack from the fault handler.

use crate::resolve::SymbolResolver;
use callstack_capture::{FaultStack, ProbeError, StackWalker};
use callstack_types::{Pc, Symbol};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Raw address at which `runtime.sigpanic` appears on a fault stack.
pub(crate) const SIGPANIC_PC: usize = 0x1050;
/// The faulting instruction in `main.divide`, on line 11.
pub(crate) const FAULT_PC: usize = 0x2010;
/// A signal trampoline outside every symbol in the table.
pub(crate) const TRAMPOLINE_PC: usize = 0x9900;

const APP_FILE: &str = "/home/user/src/app/main.go";

struct Function {
    name: &'static str,
    file: &'static str,
    start: usize,
    end: usize,
    lines: &'static [(usize, u32)],
}

pub(crate) struct SymbolTable {
    functions: Vec<Function>,
}

impl SymbolTable {
    pub(crate) fn go_program() -> Self {
        let functions = vec![
            Function {
                name: "runtime.sigpanic",
                file: "/usr/local/go/src/runtime/signal_unix.go",
                start: 0x1000,
                end: 0x1100,
                lines: &[(0x1000, 700)],
            },
            Function {
                name: "main.divide",
                file: APP_FILE,
                start: 0x2000,
                end: 0x2100,
                lines: &[(0x2000, 10), (FAULT_PC, 11), (0x2014, 12)],
            },
            Function {
                name: "main.compute",
                file: APP_FILE,
                start: 0x3000,
                end: 0x3100,
                lines: &[(0x3000, 20), (0x3020, 21)],
            },
            Function {
                name: "main.main",
                file: APP_FILE,
                start: 0x4000,
                end: 0x4100,
                lines: &[(0x4000, 30), (0x4010, 31)],
            },
            Function {
                name: "runtime.main",
                file: "/usr/local/go/src/runtime/proc.go",
                start: 0x5000,
                end: 0x5100,
                lines: &[(0x5000, 250), (0x5040, 251)],
            },
            Function {
                name: "runtime.goexit",
                file: "/usr/local/go/src/runtime/asm_amd64.s",
                start: 0x6000,
                end: 0x6100,
                lines: &[(0x6000, 1650)],
            },
            Function {
                name: "main.handler",
                file: APP_FILE,
                start: 0x7000,
                end: 0x7100,
                lines: &[(0x7000, 40), (0x7030, 41)],
            },
            Function {
                name: "callstack.capture",
                file: "/home/user/src/callstack/capture.go",
                start: 0x8000,
                end: 0x8100,
                lines: &[(0x8000, 1)],
            },
        ];
        Self { functions }
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, pc: Pc) -> Option<Symbol> {
        let pc = pc.get();
        let function = self
            .functions
            .iter()
            .find(|f| (f.start..f.end).contains(&pc))?;
        let line = function
            .lines
            .iter()
            .take_while(|&&(start, _)| start <= pc)
            .last()
            .map_or(0, |&(_, line)| line);
        Some(
            Symbol::new(function.name)
                .ok()?
                .with_location(function.file, line),
        )
    }
}

/// Replays a fixed raw stack. Element 0 of `stack` stands for the frame
/// that called `walk`.
pub(crate) struct ScriptedWalker {
    stack: Vec<Pc>,
    fault_stack: Vec<Pc>,
    fault_address: Pc,
    fault_probes: AtomicUsize,
}

fn pcs(raw: &[usize]) -> Vec<Pc> {
    raw.iter().copied().map(Pc::new).collect()
}

impl ScriptedWalker {
    pub(crate) fn go_program() -> Self {
        Self::faulting_through(SIGPANIC_PC)
    }

    /// Same program, but the fault is dispatched through a trampoline that
    /// has no symbol.
    pub(crate) fn unsymbolized_trampoline() -> Self {
        Self::faulting_through(TRAMPOLINE_PC)
    }

    fn faulting_through(dispatch: usize) -> Self {
        Self {
            stack: pcs(&[
                0x8010, 0x7031, dispatch, FAULT_PC, 0x3021, 0x4011, 0x5041, 0x6001,
            ]),
            fault_stack: pcs(&[0x8010, dispatch, FAULT_PC, 0x3021]),
            fault_address: Pc::new(FAULT_PC),
            fault_probes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_fault_address(self, fault_address: Pc) -> Self {
        Self {
            fault_address,
            ..self
        }
    }

    pub(crate) fn fault_probes(&self) -> usize {
        self.fault_probes.load(Ordering::SeqCst)
    }
}

fn copy_into(src: &[Pc], skip: usize, buf: &mut [Pc]) -> usize {
    let src = src.get(skip..).unwrap_or_default();
    let n = src.len().min(buf.len());
    buf[..n].copy_from_slice(&src[..n]);
    n
}

impl StackWalker for ScriptedWalker {
    fn walk(&self, skip: usize, buf: &mut [Pc]) -> usize {
        copy_into(&self.stack, skip, buf)
    }

    fn walk_fault(&self, buf: &mut [Pc]) -> Result<FaultStack, ProbeError> {
        self.fault_probes.fetch_add(1, Ordering::SeqCst);
        // Widen the window so concurrent first users really overlap.
        std::thread::sleep(std::time::Duration::from_millis(20));
        match copy_into(&self.fault_stack, 0, buf) {
            0 => Err(ProbeError::NoFrames),
            len => Ok(FaultStack {
                len,
                fault_address: self.fault_address,
            }),
        }
    }
}
