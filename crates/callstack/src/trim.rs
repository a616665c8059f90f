use crate::call::Call;
use crate::runtime::{RuntimeRoot, runtime_root};
use crate::stack::CallStack;

impl CallStack {
    /// Drops innermost frames until `target` is first. Frames are matched by
    /// corrected address; an absent target yields an empty stack.
    pub fn trim_below(&self, target: &Call) -> CallStack {
        match self.iter().position(|call| call.pc() == target.pc()) {
            Some(start) => self.window(start, self.len()),
            None => self.window(self.len(), self.len()),
        }
    }

    /// Drops outermost frames until `target` is last. An absent target
    /// yields an empty stack.
    pub fn trim_above(&self, target: &Call) -> CallStack {
        match self.iter().rposition(|call| call.pc() == target.pc()) {
            Some(last) => self.window(0, last + 1),
            None => self.window(0, 0),
        }
    }

    /// Drops the trailing frames that belong to the standard library or to
    /// process startup code.
    pub fn trim_runtime(&self) -> CallStack {
        self.trim_runtime_with(runtime_root())
    }

    pub fn trim_runtime_with(&self, root: &RuntimeRoot) -> CallStack {
        let end = self
            .iter()
            .rposition(|call| !is_runtime_frame(call, root))
            .map_or(0, |last| last + 1);
        self.window(0, end)
    }
}

// Unresolved frames and frames without a source file are startup and loader
// code (`_start`, `start_thread`).
fn is_runtime_frame(call: &Call, root: &RuntimeRoot) -> bool {
    match call.symbol().and_then(|symbol| symbol.file()) {
        Some(file) => root.contains(file),
        None => true,
    }
}
