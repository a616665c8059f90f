//! Rendering of calls and stacks.
//!
//! The grammar is a verb plus optional flags, written `%[+#]<verb>`:
//!
//! | spec  | output                                       |
//! |-------|----------------------------------------------|
//! | `%s`  | source file base name                        |
//! | `%+s` | source path relative to the build root       |
//! | `%#s` | full source path                             |
//! | `%d`  | line number                                  |
//! | `%n`  | unqualified function name                    |
//! | `%+n` | fully qualified function name                |
//! | `%v`  | `%s:%d`, likewise `%+v` and `%#v`            |
//!
//! Through `std::fmt` the flags are `{:+}` and `{:#}`.

use crate::call::Call;
use crate::stack::CallStack;
use std::fmt;

const UNKNOWN_FILE: &str = "???";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    File,
    Line,
    Name,
    Combined,
}

impl Verb {
    pub const fn as_char(self) -> char {
        match self {
            Self::File => 's',
            Self::Line => 'd',
            Self::Name => 'n',
            Self::Combined => 'v',
        }
    }

    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            's' => Some(Self::File),
            'd' => Some(Self::Line),
            'n' => Some(Self::Name),
            'v' => Some(Self::Combined),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags {
    pub plus: bool,
    pub sharp: bool,
}

impl Flags {
    pub const NONE: Flags = Flags {
        plus: false,
        sharp: false,
    };
    pub const PLUS: Flags = Flags {
        plus: true,
        sharp: false,
    };
    pub const SHARP: Flags = Flags {
        plus: false,
        sharp: true,
    };

    pub fn from_formatter(f: &fmt::Formatter<'_>) -> Self {
        Self {
            plus: f.sign_plus(),
            sharp: f.alternate(),
        }
    }
}

/// A parsed `%[+#]<verb>` specifier, for template systems that carry format
/// specs as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatSpec {
    pub verb: Verb,
    pub flags: Flags,
}

impl FormatSpec {
    pub const fn new(verb: Verb, flags: Flags) -> Self {
        Self { verb, flags }
    }

    pub fn parse(spec: &str) -> Option<Self> {
        let mut chars = spec.strip_prefix('%')?.chars();
        let mut flags = Flags::NONE;
        loop {
            match chars.next()? {
                '+' => flags.plus = true,
                '#' => flags.sharp = true,
                c => {
                    let verb = Verb::from_char(c)?;
                    if chars.next().is_some() {
                        return None;
                    }
                    return Some(Self { verb, flags });
                }
            }
        }
    }

    pub fn render_call(&self, call: &Call) -> String {
        call.render(self.verb, self.flags)
    }

    pub fn render_stack(&self, stack: &CallStack) -> String {
        stack.render(self.verb, self.flags)
    }
}

impl fmt::Display for FormatSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("%")?;
        if self.flags.plus {
            f.write_str("+")?;
        }
        if self.flags.sharp {
            f.write_str("#")?;
        }
        write!(f, "{}", self.verb.as_char())
    }
}

pub(crate) fn write_call<W: fmt::Write + ?Sized>(
    out: &mut W,
    call: &Call,
    verb: Verb,
    flags: Flags,
) -> fmt::Result {
    let Some(symbol) = call.symbol() else {
        return write!(out, "%!{}(NOFUNC)", verb.as_char());
    };

    match verb {
        Verb::File | Verb::Combined => {
            let file = symbol.file().unwrap_or(UNKNOWN_FILE);
            let file = if flags.sharp {
                file
            } else if flags.plus {
                relative_path(file, symbol.function())
            } else {
                base_name(file)
            };
            out.write_str(file)?;
            if verb == Verb::Combined {
                write!(out, ":{}", symbol.line())?;
            }
        }
        Verb::Line => write!(out, "{}", symbol.line())?,
        Verb::Name => {
            let name = if flags.plus {
                symbol.function()
            } else {
                unqualified_name(symbol.function())
            };
            out.write_str(name)?;
        }
    }
    Ok(())
}

pub(crate) fn write_stack<W: fmt::Write + ?Sized>(
    out: &mut W,
    calls: &[Call],
    verb: Verb,
    flags: Flags,
) -> fmt::Result {
    out.write_str("[")?;
    for (i, call) in calls.iter().enumerate() {
        if i > 0 {
            out.write_str(" ")?;
        }
        write_call(out, call, verb, flags)?;
    }
    out.write_str("]")
}

pub fn base_name(file: &str) -> &str {
    match file.rfind('/') {
        Some(i) => &file[i + 1..],
        None => file,
    }
}

/// Reconstructs the path as it looked relative to the build root.
///
/// The root itself is not recorded anywhere at runtime, but a qualified name
/// like `pkg/sub.Type.Method` has one separator fewer than the wanted
/// `pkg/sub/file.go`, so leading segments are dropped until the counts line up.
pub fn relative_path<'a>(file: &'a str, function: &str) -> &'a str {
    let import_separators = function.matches('/').count() + 1;
    let mut path_separators = file.matches('/').count();
    let mut file = file;
    while path_separators > import_separators {
        let Some(i) = file.find('/') else {
            break;
        };
        file = &file[i + 1..];
        path_separators -= 1;
    }
    file
}

/// Drops the package path from a qualified name: `pkg/sub.Type.Method` becomes
/// `Type.Method` and `krate::module::func` becomes `func`.
pub fn unqualified_name(function: &str) -> &str {
    let name = match function.rfind('/') {
        Some(i) => &function[i + 1..],
        None => function,
    };
    let name = match name.find('.') {
        Some(i) => &name[i + 1..],
        None => name,
    };
    last_path_segment(name)
}

// Generic arguments and trait qualifiers (`<T as Trait>`) nest their own `::`
// separators, so only depth-0 separators count. Synthetic trailing segments
// such as `{{closure}}` (or `{closure#0}` under v0 mangling) keep their owner.
fn last_path_segment(name: &str) -> &str {
    let bytes = name.as_bytes();
    let mut depth = 0usize;
    let mut starts = vec![0usize];
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' if i == 0 || bytes[i - 1] != b'-' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                starts.push(i + 2);
                i += 2;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    let mut segment = starts.len() - 1;
    while segment > 0 && name[starts[segment]..].starts_with('{') {
        segment -= 1;
    }
    &name[starts[segment]..]
}

/// Renders a call with a fixed verb and flags taken from the format string.
#[derive(Debug, Clone, Copy)]
pub struct CallDisplay<'a> {
    call: &'a Call,
    verb: Verb,
}

impl<'a> CallDisplay<'a> {
    pub(crate) fn new(call: &'a Call, verb: Verb) -> Self {
        Self { call, verb }
    }
}

impl fmt::Display for CallDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = Flags::from_formatter(f);
        write_call(f, self.call, self.verb, flags)
    }
}

/// Renders a stack with a fixed verb and flags taken from the format string.
#[derive(Debug, Clone, Copy)]
pub struct StackDisplay<'a> {
    calls: &'a [Call],
    verb: Verb,
}

impl<'a> StackDisplay<'a> {
    pub(crate) fn new(calls: &'a [Call], verb: Verb) -> Self {
        Self { calls, verb }
    }
}

impl fmt::Display for StackDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = Flags::from_formatter(f);
        write_stack(f, self.calls, self.verb, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstack_types::{Pc, Symbol};

    fn call(function: &str, file: &str, line: u32) -> Call {
        let symbol = Symbol::new(function)
            .expect("valid symbol")
            .with_location(file, line);
        Call::new(Pc::new(0x1000), Some(symbol))
    }

    fn go_method() -> Call {
        call("pkg/sub.Type.Method", "/home/user/src/pkg/sub/file.go", 42)
    }

    fn render(call: &Call, spec: &str) -> String {
        FormatSpec::parse(spec)
            .expect("valid spec")
            .render_call(call)
    }

    #[test]
    fn file_verb_path_forms() {
        let call = go_method();
        assert_eq!(render(&call, "%s"), "file.go");
        assert_eq!(render(&call, "%+s"), "pkg/sub/file.go");
        assert_eq!(render(&call, "%#s"), "/home/user/src/pkg/sub/file.go");
        // `#` wins over `+`.
        assert_eq!(render(&call, "%+#s"), "/home/user/src/pkg/sub/file.go");
    }

    #[test]
    fn line_and_name_verbs() {
        let call = go_method();
        assert_eq!(render(&call, "%d"), "42");
        assert_eq!(render(&call, "%n"), "Type.Method");
        assert_eq!(render(&call, "%+n"), "pkg/sub.Type.Method");
    }

    #[test]
    fn combined_verb_matches_file_and_line() {
        let call = call("pkg/sub.Func", "/root/src/pkg/sub/file.go", 42);
        insta::assert_snapshot!(render(&call, "%#v"), @"/root/src/pkg/sub/file.go:42");
        insta::assert_snapshot!(render(&call, "%v"), @"file.go:42");
        insta::assert_snapshot!(render(&call, "%+v"), @"pkg/sub/file.go:42");
    }

    #[test]
    fn unresolved_call_renders_placeholder_for_every_verb() {
        let call = Call::new(Pc::new(0xdead), None);
        for (spec, expected) in [
            ("%s", "%!s(NOFUNC)"),
            ("%+s", "%!s(NOFUNC)"),
            ("%d", "%!d(NOFUNC)"),
            ("%n", "%!n(NOFUNC)"),
            ("%+n", "%!n(NOFUNC)"),
            ("%v", "%!v(NOFUNC)"),
            ("%#v", "%!v(NOFUNC)"),
        ] {
            assert_eq!(render(&call, spec), expected, "spec {spec}");
        }
    }

    #[test]
    fn symbol_without_file_renders_unknown_location() {
        let symbol = Symbol::new("__libc_start_main").expect("valid symbol");
        let call = Call::new(Pc::new(0x10), Some(symbol));
        assert_eq!(render(&call, "%v"), "???:0");
        assert_eq!(render(&call, "%n"), "__libc_start_main");
    }

    #[test]
    fn relative_path_strips_to_import_depth() {
        assert_eq!(
            relative_path("/home/user/src/pkg/sub/file.go", "pkg/sub.Type.Method"),
            "pkg/sub/file.go"
        );
        assert_eq!(
            relative_path("/home/user/src/main.go", "main.main"),
            "src/main.go"
        );
        assert_eq!(relative_path("file.go", "a/b/c/d.F"), "file.go");
        assert_eq!(
            relative_path("/work/crates/app/src/lib.rs", "app::run"),
            "src/lib.rs"
        );
    }

    #[test]
    fn unqualified_names_for_rust_paths() {
        assert_eq!(unqualified_name("callstack::tests::leaf"), "leaf");
        assert_eq!(
            unqualified_name("callstack::tests::leaf::{{closure}}"),
            "leaf::{{closure}}"
        );
        assert_eq!(
            unqualified_name("<callstack::Call as core::fmt::Display>::fmt"),
            "fmt"
        );
        assert_eq!(
            unqualified_name("core::ops::function::FnOnce::call_once<fn() -> u32>"),
            "call_once<fn() -> u32>"
        );
        assert_eq!(
            unqualified_name("callstack::tests::leaf::{closure#0}::{closure#1}"),
            "leaf::{closure#0}::{closure#1}"
        );
        assert_eq!(unqualified_name("main"), "main");
    }

    #[test]
    fn unqualified_names_for_go_paths() {
        assert_eq!(unqualified_name("main.main"), "main");
        assert_eq!(unqualified_name("github.com/a/b.(*T).M"), "(*T).M");
        assert_eq!(unqualified_name("runtime.sigpanic"), "sigpanic");
    }

    #[test]
    fn spec_parsing() {
        assert_eq!(
            FormatSpec::parse("%+v"),
            Some(FormatSpec::new(Verb::Combined, Flags::PLUS))
        );
        assert_eq!(
            FormatSpec::parse("%#s"),
            Some(FormatSpec::new(Verb::File, Flags::SHARP))
        );
        assert_eq!(FormatSpec::parse("%x"), None);
        assert_eq!(FormatSpec::parse("v"), None);
        assert_eq!(FormatSpec::parse("%"), None);
        assert_eq!(FormatSpec::parse("%vv"), None);
        let spec = FormatSpec::parse("%+#n").expect("valid spec");
        assert_eq!(spec.to_string(), "%+#n");
    }

    #[test]
    fn display_adapter_takes_flags_from_format_string() {
        let call = go_method();
        assert_eq!(format!("{}", call.display(Verb::File)), "file.go");
        assert_eq!(format!("{:+}", call.display(Verb::File)), "pkg/sub/file.go");
        assert_eq!(format!("{:+}", call.display(Verb::Name)), "pkg/sub.Type.Method");
        // The sign flag must not leak into the line number.
        assert_eq!(format!("{:+}", call.display(Verb::Line)), "42");
    }

    #[test]
    fn stack_renders_bracketed_and_space_separated() {
        let stack = CallStack::new(vec![
            call("main.a", "/src/a.go", 1),
            call("main.b", "/src/b.go", 2),
            call("main.c", "/src/c.go", 3),
        ]);
        insta::assert_snapshot!(stack.to_string(), @"[a.go:1 b.go:2 c.go:3]");
        insta::assert_snapshot!(
            format!("{}", stack.display(Verb::Name)),
            @"[a b c]"
        );
        assert_eq!(CallStack::default().to_string(), "[]");
    }
}
