//! Raw stack walking for the calling thread.
//!
//! This crate only produces program counters. Turning them into symbols,
//! correcting return addresses, and formatting are the job of `callstack`.

use callstack_types::Pc;
use std::error::Error;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Once;

mod pool;

pub use pool::{AddressPool, PooledAddresses};

/// Symbols of functions that the runtime or the OS interposes between a
/// faulting frame and the code that handles the fault.
pub const DEFAULT_FAULT_DISPATCH_SYMBOLS: &[&str] = &[
    "__restore_rt",
    "__kernel_rt_sigreturn",
    "_sigtramp",
    "runtime.sigpanic",
];

pub const DEFAULT_MAX_FRAMES: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    pub max_frames: NonZeroUsize,
    pub fault_dispatch_symbols: &'static [&'static str],
    pub detect_faults: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_frames: NonZeroUsize::new(DEFAULT_MAX_FRAMES)
                .expect("invariant violated: default max_frames must be non-zero"),
            fault_dispatch_symbols: DEFAULT_FAULT_DISPATCH_SYMBOLS,
            detect_faults: true,
        }
    }
}

#[derive(Debug)]
pub enum ProbeError {
    UnsupportedPlatform {
        target_os: &'static str,
        target_arch: &'static str,
    },
    InstallHandler {
        signal: i32,
        source: std::io::Error,
    },
    NoFrames,
}

impl ProbeError {
    pub fn unsupported() -> Self {
        Self::UnsupportedPlatform {
            target_os: std::env::consts::OS,
            target_arch: std::env::consts::ARCH,
        }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedPlatform {
                target_os,
                target_arch,
            } => write!(
                f,
                "fault probe is not implemented for {target_os}/{target_arch}; only Linux x86_64 and aarch64 are supported"
            ),
            Self::InstallHandler { signal, source } => {
                write!(f, "failed to install probe handler for signal {signal}: {source}")
            }
            Self::NoFrames => write!(f, "fault handler captured no frames"),
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InstallHandler { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Raw stack captured from inside a fault handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultStack {
    /// Number of addresses written to the caller's buffer.
    pub len: usize,
    /// Address of the faulting instruction, as saved in the signal context.
    pub fault_address: Pc,
}

/// Source of raw program counters for the calling thread, innermost first.
pub trait StackWalker: Send + Sync {
    /// Fills `buf` with up to `buf.len()` addresses and returns how many were
    /// written. With `skip == 0` element 0 belongs to the function that called
    /// `walk`; the walker's own frames never appear.
    fn walk(&self, skip: usize, buf: &mut [Pc]) -> usize;

    /// Deliberately raises a fault and fills `buf` with the raw stack as seen
    /// from inside the fault handler.
    fn walk_fault(&self, buf: &mut [Pc]) -> Result<FaultStack, ProbeError> {
        let _ = buf;
        Err(ProbeError::unsupported())
    }
}

/// Walker backed by the platform unwinder through the `backtrace` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeWalker;

static MISSING_ANCHOR_WARNING: Once = Once::new();

impl StackWalker for NativeWalker {
    #[inline(never)]
    fn walk(&self, skip: usize, buf: &mut [Pc]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        // Unwinder internals sit above this frame and their depth depends on
        // inlining, so counting starts only once our own frame shows up.
        let this: fn(&NativeWalker, usize, &mut [Pc]) -> usize =
            <NativeWalker as StackWalker>::walk;
        let anchor = this as usize;

        let mut anchored = false;
        let mut skip_remaining = skip;
        let mut filled = 0usize;

        backtrace::trace(|frame| {
            if !anchored {
                anchored = frame.symbol_address() as usize == anchor;
                return true;
            }

            let ip = frame.ip() as usize;
            if ip == 0 {
                return true;
            }

            if skip_remaining > 0 {
                skip_remaining -= 1;
                return true;
            }

            buf[filled] = Pc::new(ip);
            filled += 1;
            filled < buf.len()
        });

        if !anchored {
            MISSING_ANCHOR_WARNING.call_once(|| {
                tracing::warn!(
                    "stack walker could not locate its own frame; captured stacks will be empty"
                );
            });
        }

        filled
    }

    fn walk_fault(&self, buf: &mut [Pc]) -> Result<FaultStack, ProbeError> {
        platform::probe_fault(buf)
    }
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub use platform::FAULT_LINE;

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
mod platform {
    use super::{FaultStack, ProbeError};
    use callstack_types::Pc;
    use parking_lot::Mutex;
    use std::cell::UnsafeCell;
    use std::ffi::c_void;

    use std::mem::MaybeUninit;
    use std::ptr;
    use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

    #[cfg(target_arch = "x86_64")]
    const PROBE_SIGNAL: libc::c_int = libc::SIGFPE;
    #[cfg(target_arch = "aarch64")]
    const PROBE_SIGNAL: libc::c_int = libc::SIGILL;

    /// Action that was installed for the probe signal before the probe ran.
    /// Written only under `PROBE_LOCK`, before the probe handler goes in.
    struct SavedAction(UnsafeCell<MaybeUninit<libc::sigaction>>);

    unsafe impl Sync for SavedAction {}

    impl SavedAction {
        fn as_mut_ptr(&self) -> *mut libc::sigaction {
            self.0.get().cast()
        }
    }

    static PROBE_LOCK: Mutex<()> = Mutex::new(());
    static SAVED: SavedAction = SavedAction(UnsafeCell::new(MaybeUninit::uninit()));
    static SAVED_VALID: AtomicBool = AtomicBool::new(false);
    static ACTIVE: AtomicBool = AtomicBool::new(false);
    static OWNER: AtomicUsize = AtomicUsize::new(0);
    static BUF: AtomicPtr<Pc> = AtomicPtr::new(ptr::null_mut());
    static CAP: AtomicUsize = AtomicUsize::new(0);
    static LEN: AtomicUsize = AtomicUsize::new(0);
    static FAULT_ADDRESS: AtomicUsize = AtomicUsize::new(0);

    fn current_thread() -> usize {
        unsafe { libc::pthread_self() as usize }
    }

    pub fn probe_fault(buf: &mut [Pc]) -> Result<FaultStack, ProbeError> {
        if buf.is_empty() {
            return Err(ProbeError::NoFrames);
        }

        let _guard = PROBE_LOCK.lock();

        // Saved before installing, so a foreign fault that lands right after
        // the install can already be forwarded.
        let queried = unsafe { libc::sigaction(PROBE_SIGNAL, ptr::null(), SAVED.as_mut_ptr()) };
        if queried != 0 {
            return Err(ProbeError::InstallHandler {
                signal: PROBE_SIGNAL,
                source: std::io::Error::last_os_error(),
            });
        }
        SAVED_VALID.store(true, Ordering::Release);

        BUF.store(buf.as_mut_ptr(), Ordering::Release);
        CAP.store(buf.len(), Ordering::Release);
        LEN.store(0, Ordering::Release);
        FAULT_ADDRESS.store(0, Ordering::Release);
        OWNER.store(current_thread(), Ordering::Release);

        let installed = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = probe_handler as *const () as usize;
            action.sa_flags = libc::SA_SIGINFO;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(PROBE_SIGNAL, &action, ptr::null_mut())
        };
        if installed != 0 {
            let source = std::io::Error::last_os_error();
            reset();
            return Err(ProbeError::InstallHandler {
                signal: PROBE_SIGNAL,
                source,
            });
        }

        ACTIVE.store(true, Ordering::SeqCst);
        raise_fault();
        ACTIVE.store(false, Ordering::SeqCst);

        let restored =
            unsafe { libc::sigaction(PROBE_SIGNAL, SAVED.as_mut_ptr(), ptr::null_mut()) };
        let len = LEN.load(Ordering::Acquire);
        let fault_address = Pc::new(FAULT_ADDRESS.load(Ordering::Acquire));
        reset();

        if restored != 0 {
            return Err(ProbeError::InstallHandler {
                signal: PROBE_SIGNAL,
                source: std::io::Error::last_os_error(),
            });
        }
        if len == 0 {
            return Err(ProbeError::NoFrames);
        }
        Ok(FaultStack { len, fault_address })
    }

    fn reset() {
        SAVED_VALID.store(false, Ordering::Release);
        BUF.store(ptr::null_mut(), Ordering::Release);
        CAP.store(0, Ordering::Release);
        OWNER.store(0, Ordering::Release);
    }

    extern "C" fn probe_handler(sig: libc::c_int, info: *mut libc::siginfo_t, ctx: *mut c_void) {
        let ours = OWNER.load(Ordering::Acquire) == current_thread();
        if !ours || !ACTIVE.swap(false, Ordering::AcqRel) {
            unsafe { forward_to_saved(sig, info, ctx) };
            return;
        }

        let buf = BUF.load(Ordering::Acquire);
        let cap = CAP.load(Ordering::Acquire);
        let mut len = 0usize;
        if !buf.is_null() {
            unsafe {
                backtrace::trace_unsynchronized(|frame| {
                    let ip = frame.ip() as usize;
                    if ip != 0 {
                        *buf.add(len) = Pc::new(ip);
                        len += 1;
                    }
                    len < cap
                });
            }
        }
        LEN.store(len, Ordering::Release);

        unsafe {
            FAULT_ADDRESS.store(faulting_instruction(ctx), Ordering::Release);
            skip_faulting_instruction(ctx);
        }
    }

    // Hands a fault that is not ours to the action that was installed before
    // the probe, without touching the process-wide disposition.
    unsafe fn forward_to_saved(sig: libc::c_int, info: *mut libc::siginfo_t, ctx: *mut c_void) {
        if !SAVED_VALID.load(Ordering::Acquire) {
            return;
        }
        let saved = unsafe { &*SAVED.as_mut_ptr() };
        match saved.sa_sigaction {
            libc::SIG_IGN => {}
            libc::SIG_DFL => {
                // A foreign hardware fault under the default action is fatal:
                // reinstate it and let the instruction fault again.
                unsafe { libc::sigaction(sig, saved, ptr::null_mut()) };
            }
            handler if saved.sa_flags & libc::SA_SIGINFO != 0 => {
                let handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut c_void) =
                    unsafe { std::mem::transmute(handler) };
                handler(sig, info, ctx);
            }
            handler => {
                let handler: extern "C" fn(libc::c_int) = unsafe { std::mem::transmute(handler) };
                handler(sig);
            }
        }
    }

    #[cfg(target_arch = "x86_64")]
    unsafe fn faulting_instruction(ctx: *mut c_void) -> usize {
        let uc = ctx.cast::<libc::ucontext_t>();
        unsafe { (*uc).uc_mcontext.gregs[libc::REG_RIP as usize] as usize }
    }

    #[cfg(target_arch = "aarch64")]
    unsafe fn faulting_instruction(ctx: *mut c_void) -> usize {
        let uc = ctx.cast::<libc::ucontext_t>();
        unsafe { (*uc).uc_mcontext.pc as usize }
    }

    #[cfg(target_arch = "x86_64")]
    unsafe fn skip_faulting_instruction(ctx: *mut c_void) {
        // `div rcx` encodes as REX.W F7 F1.
        const FAULT_INSN_LEN: libc::greg_t = 3;
        let uc = ctx.cast::<libc::ucontext_t>();
        unsafe {
            (*uc).uc_mcontext.gregs[libc::REG_RIP as usize] += FAULT_INSN_LEN;
        }
    }

    #[cfg(target_arch = "aarch64")]
    unsafe fn skip_faulting_instruction(ctx: *mut c_void) {
        const FAULT_INSN_LEN: u64 = 4;
        let uc = ctx.cast::<libc::ucontext_t>();
        unsafe {
            (*uc).uc_mcontext.pc += FAULT_INSN_LEN;
        }
    }

    /// Source line that debug info attributes to the faulting instruction.
    #[cfg(target_arch = "x86_64")]
    pub const FAULT_LINE: u32 = line!() + 7;

    // Integer division by zero raises #DE with RIP left on the `div`.
    #[cfg(target_arch = "x86_64")]
    #[inline(never)]
    fn raise_fault() {
        unsafe {
            core::arch::asm!(
                "div rcx",
                in("rcx") 0u64,
                inout("rax") 1u64 => _,
                inout("rdx") 0u64 => _,
                options(nostack),
            );
        }
    }

    /// Source line that debug info attributes to the faulting instruction.
    #[cfg(target_arch = "aarch64")]
    pub const FAULT_LINE: u32 = line!() + 7;

    // aarch64 division by zero yields 0 instead of trapping.
    #[cfg(target_arch = "aarch64")]
    #[inline(never)]
    fn raise_fault() {
        unsafe {
            core::arch::asm!("udf #0", options(nostack));
        }
    }
}

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
mod platform {
    use super::{FaultStack, ProbeError};
    use callstack_types::Pc;

    pub fn probe_fault(_buf: &mut [Pc]) -> Result<FaultStack, ProbeError> {
        Err(ProbeError::unsupported())
    }
}
