use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    EmptyField(&'static str),
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "{field} must be non-empty"),
        }
    }
}

impl Error for InvariantError {}

/// A raw or corrected program counter.
///
/// Values are only meaningful for equality within one capture and as input to
/// a symbol resolver; ordering is provided so resolvers can keep sorted tables.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Pc(usize);

impl Pc {
    pub const NULL: Pc = Pc(0);

    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    pub const fn get(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The address one byte before `self`.
    ///
    /// Return addresses point just past the call instruction; stepping back one
    /// byte lands inside the call, which is the location callers want to see.
    pub const fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<usize> for Pc {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl fmt::LowerHex for Pc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A resolved program counter: the function that contains it and, when debug
/// info is available, the source location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    function: String,
    file: Option<String>,
    line: u32,
}

impl Symbol {
    pub fn new(function: impl Into<String>) -> Result<Self, InvariantError> {
        let function = function.into();
        if function.is_empty() {
            return Err(InvariantError::EmptyField("function"));
        }
        Ok(Self {
            function,
            file: None,
            line: 0,
        })
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        let file = file.into();
        if !file.is_empty() {
            self.file = Some(file);
            self.line = line;
        }
        self
    }

    /// Fully qualified function name.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Source file path with `/` separators, if known.
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// Source line; 0 when the file is unknown.
    pub fn line(&self) -> u32 {
        self.line
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub pc: u64,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl FrameRecord {
    pub fn new(pc: Pc, symbol: Option<&Symbol>) -> Self {
        Self {
            pc: pc.get() as u64,
            function: symbol.map(|s| s.function().to_owned()),
            file: symbol.and_then(|s| s.file()).map(str::to_owned),
            line: symbol.filter(|s| s.file().is_some()).map(Symbol::line),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.function.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRecord {
    pub frames: Vec<FrameRecord>,
}

impl StackRecord {
    pub fn new(frames: Vec<FrameRecord>) -> Self {
        Self { frames }
    }
}
