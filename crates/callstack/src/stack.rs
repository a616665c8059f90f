use crate::call::Call;
use crate::format::{self, Flags, StackDisplay, Verb};
use callstack_types::StackRecord;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A sequence of calls from one thread's stack, innermost first.
///
/// The calls live in a shared immutable buffer; clones and trims are windows
/// onto it and never copy or reorder elements.
#[derive(Clone)]
pub struct CallStack {
    calls: Arc<[Call]>,
    start: usize,
    end: usize,
}

impl CallStack {
    pub fn new(calls: Vec<Call>) -> Self {
        let end = calls.len();
        Self {
            calls: calls.into(),
            start: 0,
            end,
        }
    }

    pub fn as_slice(&self) -> &[Call] {
        &self.calls[self.start..self.end]
    }

    /// Window `start..end` relative to this view.
    pub(crate) fn window(&self, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= self.len());
        Self {
            calls: Arc::clone(&self.calls),
            start: self.start + start,
            end: self.start + end,
        }
    }

    /// Whether `self` and `other` are views onto the same captured buffer.
    pub fn shares_buffer(&self, other: &CallStack) -> bool {
        Arc::ptr_eq(&self.calls, &other.calls)
    }

    pub fn render(&self, verb: Verb, flags: Flags) -> String {
        let mut out = String::new();
        let _ = format::write_stack(&mut out, self.as_slice(), verb, flags);
        out
    }

    pub fn display(&self, verb: Verb) -> StackDisplay<'_> {
        StackDisplay::new(self.as_slice(), verb)
    }

    pub fn to_record(&self) -> StackRecord {
        StackRecord::new(self.iter().map(Call::to_record).collect())
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Deref for CallStack {
    type Target = [Call];

    fn deref(&self) -> &[Call] {
        self.as_slice()
    }
}

impl PartialEq for CallStack {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for CallStack {}

impl From<Vec<Call>> for CallStack {
    fn from(calls: Vec<Call>) -> Self {
        Self::new(calls)
    }
}

impl FromIterator<Call> for CallStack {
    fn from_iter<I: IntoIterator<Item = Call>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a CallStack {
    type Item = &'a Call;
    type IntoIter = std::slice::Iter<'a, Call>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl fmt::Debug for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// `[frame0 frame1 ...]` with each call rendered as `file:line`; `{:+}` and
/// `{:#}` apply to every call.
impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = Flags::from_formatter(f);
        format::write_stack(f, self.as_slice(), Verb::Combined, flags)
    }
}
