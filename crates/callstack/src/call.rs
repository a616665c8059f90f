use crate::format::{self, CallDisplay, Flags, Verb};
use crate::resolve::SymbolResolver;
use callstack_types::{FrameRecord, Pc, Symbol};
use std::fmt;
use std::sync::Arc;

const UNKNOWN: &str = "???";

/// A single function invocation from a thread's stack.
///
/// `pc` is already corrected: it is the address that resolves to the line
/// performing the call. The default value is the invalid call returned when a
/// capture runs out of frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Call {
    pc: Pc,
    symbol: Option<Arc<Symbol>>,
}

impl Call {
    pub fn new(pc: Pc, symbol: Option<Symbol>) -> Self {
        Self {
            pc,
            symbol: symbol.map(Arc::new),
        }
    }

    pub(crate) fn resolve<R: SymbolResolver + ?Sized>(pc: Pc, resolver: &R) -> Self {
        Self::new(pc, resolver.resolve(pc))
    }

    pub fn pc(&self) -> Pc {
        self.pc
    }

    pub fn symbol(&self) -> Option<&Symbol> {
        self.symbol.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.symbol.is_some()
    }

    /// Fully qualified function name, or `???`.
    pub fn function(&self) -> &str {
        self.symbol().map_or(UNKNOWN, Symbol::function)
    }

    /// Full source path, or `???`.
    pub fn file_path(&self) -> &str {
        self.symbol().and_then(Symbol::file).unwrap_or(UNKNOWN)
    }

    pub fn line(&self) -> u32 {
        self.symbol().map_or(0, Symbol::line)
    }

    pub fn render(&self, verb: Verb, flags: Flags) -> String {
        let mut out = String::new();
        let _ = format::write_call(&mut out, self, verb, flags);
        out
    }

    /// Adapter that renders `verb`, taking `+` and `#` from the format string.
    pub fn display(&self, verb: Verb) -> CallDisplay<'_> {
        CallDisplay::new(self, verb)
    }

    pub fn to_record(&self) -> FrameRecord {
        FrameRecord::new(self.pc, self.symbol())
    }
}

/// `{}` renders `file:line`; `{:+}` uses the build-relative path and `{:#}`
/// the full path.
impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = Flags::from_formatter(f);
        format::write_call(f, self, Verb::Combined, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method_call() -> Call {
        let symbol = Symbol::new("pkg/sub.Type.Method")
            .expect("valid symbol")
            .with_location("/root/src/pkg/sub/file.go", 42);
        Call::new(Pc::new(0x4010), Some(symbol))
    }

    #[test]
    fn accessors_expose_resolved_values() {
        let call = method_call();
        assert!(call.is_resolved());
        assert_eq!(call.pc(), Pc::new(0x4010));
        assert_eq!(call.function(), "pkg/sub.Type.Method");
        assert_eq!(call.file_path(), "/root/src/pkg/sub/file.go");
        assert_eq!(call.line(), 42);
    }

    #[test]
    fn invalid_call_uses_placeholders() {
        let call = Call::default();
        assert!(!call.is_resolved());
        assert_eq!(call.function(), "???");
        assert_eq!(call.file_path(), "???");
        assert_eq!(call.line(), 0);
        assert_eq!(call.to_string(), "%!v(NOFUNC)");
    }

    #[test]
    fn display_flags_select_path_form() {
        let call = method_call();
        assert_eq!(format!("{call}"), "file.go:42");
        assert_eq!(format!("{call:+}"), "pkg/sub/file.go:42");
        assert_eq!(format!("{call:#}"), "/root/src/pkg/sub/file.go:42");
    }

    #[test]
    fn clones_share_the_symbol() {
        let call = method_call();
        let copy = call.clone();
        assert_eq!(call, copy);
        assert!(std::ptr::eq(
            call.symbol().expect("resolved"),
            copy.symbol().expect("resolved")
        ));
    }

    #[test]
    fn record_carries_location() {
        let record = method_call().to_record();
        assert_eq!(record.pc, 0x4010);
        assert_eq!(record.function.as_deref(), Some("pkg/sub.Type.Method"));
        assert_eq!(record.line, Some(42));
        assert_eq!(Call::default().to_record().function, None);
    }
}
