//! Identification of the function the OS or runtime interposes between a
//! faulting frame and its handler.
//!
//! The frame directly outward of that function holds the address of the
//! faulting instruction itself rather than a return address, so it must not
//! be decremented. Detection deliberately raises a fault once, captures the
//! stack from inside the handler, and looks for a known dispatch symbol. When
//! none is present, the frame inward of the faulting address is taken.

use crate::resolve::SymbolResolver;
use callstack_capture::{AddressPool, StackWalker};
use callstack_types::{Pc, Symbol};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultDispatch {
    name: String,
    address: Pc,
}

impl FaultDispatch {
    pub fn new(name: impl Into<String>, address: Pc) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    /// Resolved function name of the dispatch routine.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw address at which the dispatch frame was observed. Signal
    /// trampolines are always entered through the same address.
    pub fn address(&self) -> Pc {
        self.address
    }

    pub(crate) fn matches(&self, raw: Pc, symbol: Option<&Symbol>) -> bool {
        raw == self.address || symbol.is_some_and(|symbol| symbol.function() == self.name)
    }
}

/// Name given to a dispatch frame that was located only through the faulting
/// address and has no symbol of its own.
pub const UNNAMED_DISPATCH: &str = "<signal trampoline>";

pub(crate) fn detect<W, R>(
    walker: &W,
    resolver: &R,
    pool: &AddressPool,
    symbols: &[&str],
) -> Option<FaultDispatch>
where
    W: StackWalker + ?Sized,
    R: SymbolResolver + ?Sized,
{
    let mut buf = pool.acquire();
    let fault = match walker.walk_fault(&mut buf) {
        Ok(fault) => fault,
        Err(err) => {
            tracing::debug!(
                %err,
                "fault dispatch detection failed; return addresses will always be decremented"
            );
            return None;
        }
    };
    let raw = &buf[..fault.len.min(buf.len())];

    let by_name = raw.iter().find_map(|&raw| {
        // Trampolines start right at a symbol boundary, so the raw address
        // itself is tried before the usual one-byte step back.
        [raw, raw.prev()].into_iter().find_map(|pc| {
            let symbol = resolver.resolve(pc)?;
            symbols
                .iter()
                .any(|&known| known == symbol.function())
                .then(|| FaultDispatch::new(symbol.function(), raw))
        })
    });
    if let Some(dispatch) = by_name {
        tracing::debug!(
            name = dispatch.name(),
            address = dispatch.address().get(),
            "detected fault dispatch frame by name"
        );
        return Some(dispatch);
    }

    // The frame that holds the faulting address sits directly outward of the
    // dispatch frame, whatever that frame is called.
    let by_address = raw
        .iter()
        .skip(1)
        .position(|&pc| pc == fault.fault_address)
        .map(|at| {
            let dispatch = raw[at];
            // Only the exact address: one byte back may already belong to the
            // neighbouring function, whose name would then match real frames.
            let name = resolver
                .resolve(dispatch)
                .map(|symbol| symbol.function().to_owned())
                .unwrap_or_else(|| UNNAMED_DISPATCH.to_owned());
            FaultDispatch::new(name, dispatch)
        });
    match &by_address {
        Some(dispatch) => tracing::debug!(
            name = dispatch.name(),
            address = dispatch.address().get(),
            "detected fault dispatch frame by faulting address"
        ),
        None => tracing::debug!(
            frames = raw.len(),
            fault_address = fault.fault_address.get(),
            "no fault dispatch frame in probe stack; return addresses will always be decremented"
        ),
    }
    by_address
}
