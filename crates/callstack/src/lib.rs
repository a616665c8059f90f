//! Capture, trim and format call stacks of the current thread.
//!
//! ```no_run
//! let here = callstack::caller(0);
//! println!("{here} in {}", here.display(callstack::Verb::Name));
//!
//! let stack = callstack::trace().trim_runtime();
//! println!("{stack:+}");
//! ```
//!
//! Raw walks contain return addresses, which point just past a call
//! instruction. Every captured [`Call`] already carries the corrected address,
//! so its line is the line that made the call, or for a frame interrupted by
//! a hardware fault, the line that faulted.

mod call;
mod capture;
mod fault;
mod format;
mod normalize;
mod resolve;
mod runtime;
mod stack;
mod trim;

#[cfg(test)]
mod fixtures;

use std::sync::LazyLock;

pub use call::Call;
pub use callstack_capture::{
    AddressPool, CaptureOptions, DEFAULT_FAULT_DISPATCH_SYMBOLS, DEFAULT_MAX_FRAMES, FaultStack,
    NativeWalker, ProbeError, StackWalker,
};
pub use callstack_types::{FrameRecord, InvariantError, Pc, StackRecord, Symbol};
pub use capture::Capturer;
pub use fault::{FaultDispatch, UNNAMED_DISPATCH};
pub use format::{
    CallDisplay, Flags, FormatSpec, StackDisplay, Verb, base_name, relative_path, unqualified_name,
};
pub use resolve::{NativeResolver, SymbolResolver};
pub use runtime::{RuntimeRoot, library_prefix, runtime_root};
pub use stack::CallStack;

static DEFAULT_CAPTURER: LazyLock<Capturer> = LazyLock::new(Capturer::native);

/// The process-wide capturer behind [`caller`] and [`trace`].
pub fn default_capturer() -> &'static Capturer {
    &DEFAULT_CAPTURER
}

/// The call `skip` frames above the caller; 0 identifies the calling function.
#[inline(never)]
pub fn caller(skip: usize) -> Call {
    let call = default_capturer().call(skip.saturating_add(1));
    std::hint::black_box(&call);
    call
}

/// The current thread's stack with element 0 identifying the calling function.
#[inline(never)]
pub fn trace() -> CallStack {
    let stack = default_capturer().stack(1);
    std::hint::black_box(&stack);
    stack
}
