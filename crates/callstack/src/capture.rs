use crate::call::Call;
use crate::fault::{self, FaultDispatch};
use crate::normalize;
use crate::resolve::{NativeResolver, SymbolResolver};
use crate::stack::CallStack;
use callstack_capture::{AddressPool, CaptureOptions, NativeWalker, StackWalker};
use callstack_types::Pc;
use std::fmt;
use std::sync::OnceLock;

/// Captures calls from the current thread's stack.
///
/// Fault-dispatch detection runs at most once per capturer, on the first
/// capture that needs it; concurrent first users block until it finishes.
pub struct Capturer<W = NativeWalker, R = NativeResolver> {
    walker: W,
    resolver: R,
    options: CaptureOptions,
    pool: AddressPool,
    dispatch: OnceLock<Option<FaultDispatch>>,
}

impl Capturer {
    /// Native walker and resolver with default options.
    pub fn native() -> Self {
        Self::new(NativeWalker, NativeResolver, CaptureOptions::default())
    }
}

impl Default for Capturer {
    fn default() -> Self {
        Self::native()
    }
}

impl<W, R> Capturer<W, R>
where
    W: StackWalker,
    R: SymbolResolver,
{
    pub fn new(walker: W, resolver: R, options: CaptureOptions) -> Self {
        Self {
            walker,
            resolver,
            pool: AddressPool::new(options.max_frames.saturating_add(1)),
            options,
            dispatch: OnceLock::new(),
        }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn walker(&self) -> &W {
        &self.walker
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// The detected fault-dispatch routine, running detection if needed.
    /// `None` means return addresses are always decremented.
    pub fn fault_dispatch(&self) -> Option<&FaultDispatch> {
        self.dispatch
            .get_or_init(|| {
                if !self.options.detect_faults {
                    tracing::debug!("fault dispatch detection disabled");
                    return None;
                }
                fault::detect(
                    &self.walker,
                    &self.resolver,
                    &self.pool,
                    self.options.fault_dispatch_symbols,
                )
            })
            .as_ref()
    }

    /// The call `skip` frames above the caller of this method; 0 is the
    /// calling function. Returns an invalid call when the stack is too shallow.
    #[inline(never)]
    pub fn call(&self, skip: usize) -> Call {
        let mut window = [Pc::NULL; 2];
        let n = self.walker.walk(skip, &mut window);
        if n < 2 {
            return Call::default();
        }
        let [inward, target] = window;
        let call = normalize::resolve_one(inward, target, self.fault_dispatch(), &self.resolver);
        std::hint::black_box(call)
    }

    /// The stack from `skip` frames above the caller of this method, up to
    /// `max_frames` deep.
    #[inline(never)]
    pub fn stack(&self, skip: usize) -> CallStack {
        let dispatch = self.fault_dispatch();
        // One extra inward frame is walked so the first returned frame gets
        // the same fault check as every other.
        let calls = {
            let mut buf = self.pool.acquire();
            let n = self.walker.walk(skip, &mut buf);
            match buf[..n].split_first() {
                Some((&inward, raw)) => {
                    normalize::resolve_all(Some(inward), raw, dispatch, &self.resolver)
                }
                None => Vec::new(),
            }
        };
        std::hint::black_box(CallStack::new(calls))
    }
}

impl<W, R> fmt::Debug for Capturer<W, R>
where
    W: fmt::Debug,
    R: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capturer")
            .field("walker", &self.walker)
            .field("resolver", &self.resolver)
            .field("options", &self.options)
            .field("dispatch", &self.dispatch.get())
            .finish_non_exhaustive()
    }
}
