use callstack_types::{Pc, Symbol};
use std::ffi::c_void;
use std::path::Path;

/// Maps an address to the function and source location that contain it.
pub trait SymbolResolver: Send + Sync {
    /// Resolves exactly `pc`. Callers are responsible for any return-address
    /// correction; `None` means the address lies outside known code.
    fn resolve(&self, pc: Pc) -> Option<Symbol>;
}

impl<R: SymbolResolver + ?Sized> SymbolResolver for &R {
    fn resolve(&self, pc: Pc) -> Option<Symbol> {
        (**self).resolve(pc)
    }
}

/// Resolver backed by the process's own debug info via the `backtrace` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeResolver;

impl SymbolResolver for NativeResolver {
    fn resolve(&self, pc: Pc) -> Option<Symbol> {
        if pc.is_null() {
            return None;
        }

        let mut resolved = None;
        // `backtrace::resolve` treats its argument as a return address and
        // looks up the byte before it.
        backtrace::resolve(pc.next().get() as *mut c_void, |symbol| {
            if resolved.is_some() {
                return;
            }
            let Some(name) = symbol.name() else {
                return;
            };
            let demangled = format!("{name:#}");
            let Ok(mut found) = Symbol::new(strip_rust_hash_suffix(&demangled)) else {
                return;
            };
            if let Some(file) = symbol.filename() {
                found = found.with_location(slash_path(file), symbol.lineno().unwrap_or(0));
            }
            resolved = Some(found);
        });
        resolved
    }
}

fn strip_rust_hash_suffix(name: &str) -> &str {
    if let Some(index) = name.rfind("::h") {
        let suffix = &name[index + 3..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return &name[..index];
        }
    }
    name
}

fn slash_path(path: &Path) -> String {
    let path = path.to_string_lossy();
    if cfg!(windows) {
        path.replace('\\', "/")
    } else {
        path.into_owned()
    }
}
