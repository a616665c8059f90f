use callstack::{Call, CallStack, FormatSpec, StackRecord};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct TraceBundle {
    pub schema_version: u32,
    pub capture_binary: String,
    pub traces: Vec<TraceRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TraceRecord {
    pub label: String,
    /// The stack rendered with each of the bundle's format specs, keyed by
    /// spec text.
    pub rendered: Vec<(String, String)>,
    pub stack: StackRecord,
}

#[derive(Debug, Clone)]
pub struct CapturedTrace {
    pub label: String,
    pub stack: CallStack,
}

impl CapturedTrace {
    pub fn to_record(&self, specs: &[FormatSpec]) -> TraceRecord {
        TraceRecord {
            label: self.label.clone(),
            rendered: specs
                .iter()
                .map(|spec| (spec.to_string(), spec.render_stack(&self.stack)))
                .collect(),
            stack: self.stack.to_record(),
        }
    }
}

/// Captures the stack right here.
#[inline(never)]
pub fn collect_here(label: &str) -> CapturedTrace {
    let stack = callstack::trace();
    std::hint::black_box(CapturedTrace {
        label: label.to_owned(),
        stack,
    })
}

/// Recurses `depth` more times before capturing, so the trace holds
/// `depth + 1` countdown frames above `collect_here`.
#[inline(never)]
pub fn countdown(label: &str, depth: usize) -> CapturedTrace {
    let trace = match depth {
        0 => collect_here(label),
        n => countdown(label, std::hint::black_box(n - 1)),
    };
    std::hint::black_box(trace)
}

/// Captures `depth` frames below a recorded entry point and cuts the stack
/// off above it.
#[inline(never)]
pub fn windowed(depth: usize) -> CapturedTrace {
    std::hint::black_box(enter_window(depth))
}

#[inline(never)]
fn enter_window(depth: usize) -> CapturedTrace {
    std::hint::black_box(descend(depth, None))
}

#[inline(never)]
fn descend(depth: usize, top: Option<Call>) -> CapturedTrace {
    // The first call records its caller, which bounds the window.
    let top = match top {
        Some(top) => top,
        None => callstack::caller(1),
    };
    let trace = if depth == 0 {
        CapturedTrace {
            label: "windowed".to_owned(),
            stack: callstack::trace().trim_above(&top),
        }
    } else {
        descend(depth - 1, Some(top))
    };
    std::hint::black_box(trace)
}

/// Qualified name of the function that called this one.
#[inline(never)]
pub fn who_called_me() -> String {
    let call = callstack::caller(1);
    format!("{:+}", call.display(callstack::Verb::Name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstack::Verb;

    fn names(trace: &CapturedTrace) -> Vec<String> {
        trace
            .stack
            .iter()
            .map(|call| call.display(Verb::Name).to_string())
            .collect()
    }

    #[test]
    fn countdown_records_every_level() {
        let trace = countdown("countdown", 2);
        let names = names(&trace);
        assert_eq!(
            names[..4],
            ["collect_here", "countdown", "countdown", "countdown"]
        );
        assert_ne!(names[4], "countdown");
    }

    #[test]
    fn windowed_stops_at_the_recorded_entry() {
        let trace = windowed(2);
        assert_eq!(
            names(&trace),
            ["descend", "descend", "descend", "enter_window"]
        );
        let first = &trace.stack[0];
        assert_eq!(trace.stack.trim_below(first), trace.stack);
    }

    #[inline(never)]
    fn asks_who_called() -> String {
        std::hint::black_box(who_called_me())
    }

    #[test]
    fn who_called_me_names_the_direct_caller() {
        let name = asks_who_called();
        assert!(name.ends_with("tests::asks_who_called"), "got {name}");
    }

    #[test]
    fn records_carry_every_rendering() {
        let specs = [
            FormatSpec::parse("%n").expect("valid spec"),
            FormatSpec::parse("%+v").expect("valid spec"),
        ];
        let trace = countdown("countdown", 1);
        let record = trace.to_record(&specs);
        assert_eq!(record.label, "countdown");
        assert_eq!(record.rendered[0].0, "%n");
        assert!(
            record.rendered[0].1.starts_with("[collect_here countdown countdown "),
            "got {}",
            record.rendered[0].1
        );
        assert_eq!(record.rendered[1].0, "%+v");
        assert_eq!(record.stack.frames.len(), trace.stack.len());
    }
}
