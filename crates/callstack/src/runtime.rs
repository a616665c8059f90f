use crate::resolve::{NativeResolver, SymbolResolver};
use callstack_types::Pc;
use std::sync::LazyLock;

const LIBRARY_DIR: &str = "/library/";
const REMAP_PREFIX: &str = "/rustc/";

/// Filesystem prefix under which the standard library's sources live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeRoot {
    prefix: String,
    case_insensitive: bool,
}

impl RuntimeRoot {
    /// Uses the platform's filesystem case rules.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_case_sensitivity(prefix, cfg!(any(windows, target_os = "macos")))
    }

    pub fn with_case_sensitivity(prefix: impl Into<String>, case_insensitive: bool) -> Self {
        Self {
            prefix: prefix.into().replace('\\', "/"),
            case_insensitive,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn contains(&self, file: &str) -> bool {
        if self.prefix.is_empty() {
            return false;
        }
        let (file, prefix) = (file.as_bytes(), self.prefix.as_bytes());
        if file.len() < prefix.len() {
            return false;
        }
        let head = &file[..prefix.len()];
        if self.case_insensitive {
            head.eq_ignore_ascii_case(prefix)
        } else {
            head == prefix
        }
    }

    /// Locates the standard library by resolving one of its functions.
    pub fn detect<R: SymbolResolver>(resolver: &R) -> Self {
        let probe: fn() -> std::thread::Thread = std::thread::current;
        let file = resolver
            .resolve(Pc::new(probe as usize))
            .and_then(|symbol| symbol.file().map(str::to_owned));
        let prefix = file
            .as_deref()
            .and_then(library_prefix)
            .unwrap_or(REMAP_PREFIX);
        Self::new(prefix)
    }
}

/// `/rustc/<hash>/library/std/src/thread/mod.rs` -> `/rustc/<hash>/library/`.
pub fn library_prefix(file: &str) -> Option<&str> {
    let file_bytes = file.as_bytes();
    let dir = LIBRARY_DIR.as_bytes();
    let at = file_bytes
        .windows(dir.len())
        .rposition(|window| window == dir)?;
    Some(&file[..at + dir.len()])
}

static RUNTIME_ROOT: LazyLock<RuntimeRoot> = LazyLock::new(|| {
    let root = RuntimeRoot::detect(&NativeResolver);
    tracing::debug!(
        prefix = root.prefix(),
        case_insensitive = root.is_case_insensitive(),
        "computed runtime root"
    );
    root
});

/// The process-wide runtime root, computed on first use.
pub fn runtime_root() -> &'static RuntimeRoot {
    &RUNTIME_ROOT
}
