use std::fmt::{self, Display, Formatter};

/// One step of a field access chain attached to a traced variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldStep {
    /// `.name` (deref = false) or `->name` (deref = true) access.
    Member { name: String, deref: bool },
    /// `[index]` access on an array or a pointer.
    Index(u64),
}

impl Display for FieldStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FieldStep::Member { name, deref: true } => write!(f, "->{name}"),
            FieldStep::Member { name, deref: false } => write!(f, ".{name}"),
            FieldStep::Index(idx) => write!(f, "[{idx}]"),
        }
    }
}

/// A single "what to capture" item of a probe request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgSpec {
    /// User supplied alias for the captured value.
    pub name: Option<String>,
    /// Traced variable, or a raw token (`$retval`, `%reg`, `@symbol`, ...)
    /// taken verbatim.
    pub var: String,
    /// Field access chain applied to `var`, in source order.
    pub fields: Vec<FieldStep>,
    /// Textual type override (`u32`, `x64`, ...), wins over the inferred tag.
    pub cast: Option<String>,
}

impl ArgSpec {
    pub fn new(var: impl ToString) -> Self {
        Self {
            var: var.to_string(),
            ..Default::default()
        }
    }

    /// True if `var` may name a C variable found in debug information,
    /// false for raw tokens passed through to the tracer untouched.
    pub fn is_c_varname(&self) -> bool {
        self.var
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    }

    /// Synthesize a display name from the variable expression.
    /// `:` (the type separator in the user syntax) is not acceptable in a
    /// tracer argument name and is rewritten to `_`.
    pub fn synthesize_name(&self) -> String {
        let mut name = self.var.clone();
        for step in &self.fields {
            name.push_str(&step.to_string());
        }
        name.replace(':', "_")
    }
}

/// Probe target described by a function name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSelector {
    pub name: String,
    /// Restrict matching to functions declared in this file (tail-matched).
    pub file: Option<String>,
    /// Line number relative to the function declaration line.
    pub line: Option<u64>,
    /// Byte offset from the function entry.
    pub offset: Option<u64>,
    /// Lazy pattern applied to the function body source lines.
    pub lazy: Option<String>,
    /// Probe the function return instead of an address inside it.
    pub retprobe: bool,
}

/// Where to install a probe. Exactly one selector per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    Function(FunctionSelector),
    /// Absolute source line in a file.
    SourceLine { file: String, line: u64 },
    /// Lazy pattern over a whole source file.
    LazyPattern { file: String, pattern: String },
}

impl TargetSelector {
    /// The source file restriction of a selector, when there is one.
    pub fn file(&self) -> Option<&str> {
        match self {
            TargetSelector::Function(sel) => sel.file.as_deref(),
            TargetSelector::SourceLine { file, .. } => Some(file),
            TargetSelector::LazyPattern { file, .. } => Some(file),
        }
    }

    pub fn retprobe(&self) -> bool {
        match self {
            TargetSelector::Function(sel) => sel.retprobe,
            _ => false,
        }
    }
}

/// A parsed probe request: a place selector plus captured arguments.
/// Produced by the front-end parser, read-only for the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub target: TargetSelector,
    pub args: Vec<ArgSpec>,
}
