use crate::call::Call;
use crate::fault::FaultDispatch;
use crate::resolve::SymbolResolver;
use callstack_types::Pc;

/// Resolves a raw walk, innermost first. `inward` is the raw address of the
/// frame just inward of `raw[0]`, when the walk captured one.
///
/// Every address is a return address and steps back one byte, except the one
/// directly outward of a fault-dispatch frame, which already points at the
/// faulting instruction.
pub(crate) fn resolve_all<R>(
    inward: Option<Pc>,
    raw: &[Pc],
    dispatch: Option<&FaultDispatch>,
    resolver: &R,
) -> Vec<Call>
where
    R: SymbolResolver + ?Sized,
{
    let mut calls = Vec::with_capacity(raw.len());
    let mut after_dispatch =
        inward.is_some_and(|inward| follows_dispatch(inward, dispatch, resolver));
    for &pc in raw {
        let corrected = if after_dispatch { pc } else { pc.prev() };
        let call = Call::resolve(corrected, resolver);
        after_dispatch = dispatch.is_some_and(|d| d.matches(pc, call.symbol()));
        calls.push(call);
    }
    calls
}

/// Resolves `target` given the raw address of the frame just inward of it.
pub(crate) fn resolve_one<R>(
    inward: Pc,
    target: Pc,
    dispatch: Option<&FaultDispatch>,
    resolver: &R,
) -> Call
where
    R: SymbolResolver + ?Sized,
{
    let corrected = if follows_dispatch(inward, dispatch, resolver) {
        target
    } else {
        target.prev()
    };
    Call::resolve(corrected, resolver)
}

fn follows_dispatch<R>(inward: Pc, dispatch: Option<&FaultDispatch>, resolver: &R) -> bool
where
    R: SymbolResolver + ?Sized,
{
    dispatch.is_some_and(|d| {
        inward == d.address() || d.matches(inward, resolver.resolve(inward.prev()).as_ref())
    })
}
