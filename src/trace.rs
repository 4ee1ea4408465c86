use crate::line_list::LineList;
use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

/// A captured value expressed in the kernel tracer's argument grammar.
///
/// `value` is a register name, `@symbol`, an immediate or a raw passthrough
/// token; `indirections` is the chain of memory dereference offsets applied
/// to it, outermost-first: `+o1(+o2(value))`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceArg {
    pub name: String,
    pub value: String,
    pub indirections: SmallVec<[i64; 2]>,
    pub type_tag: Option<String>,
}

impl TraceArg {
    /// Attach a new outermost dereference frame.
    pub(crate) fn push_frame(&mut self, offset: i64) {
        self.indirections.insert(0, offset);
    }

    /// Fold an intra-frame offset into the current (outermost) frame.
    /// Callers must ensure a frame exists.
    pub(crate) fn add_to_current_frame(&mut self, offset: i64) {
        self.indirections[0] += offset;
    }

    pub(crate) fn has_frame(&self) -> bool {
        !self.indirections.is_empty()
    }
}

impl Display for TraceArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", self.name)?;
        for offset in &self.indirections {
            write!(f, "{offset:+}(")?;
        }
        write!(f, "{}", self.value)?;
        for _ in &self.indirections {
            write!(f, ")")?;
        }
        if let Some(ref tag) = self.type_tag {
            write!(f, ":{tag}")?;
        }
        Ok(())
    }
}

/// A resolved probe site in the tracer's vocabulary: a symbol plus a byte
/// offset from its entry, and the captured arguments.
///
/// For a nameless enclosing function `symbol` is empty and `offset` holds the
/// raw address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    pub symbol: String,
    pub offset: u64,
    /// Raw instruction address of the site.
    pub address: u64,
    pub retprobe: bool,
    pub args: Vec<TraceArg>,
}

impl Display for ProbeResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.symbol.is_empty() {
            write!(f, "{:#x}", self.offset)?;
        } else {
            write!(f, "{}+{}", self.symbol, self.offset)?;
        }
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Reverse translation of an instruction address back to source terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbePoint {
    pub function: Option<String>,
    pub file: Option<PathBuf>,
    /// Line number relative to the anchor function declaration line.
    pub line: Option<i64>,
    /// Byte offset from the function entry, when no line is known.
    pub offset: Option<u64>,
}

/// Scope of a probeable-line enumeration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRangeSpec {
    /// Lines of a function, optionally restricted to an interval relative
    /// to its declaration line.
    Function {
        name: String,
        file: Option<String>,
        range: Option<(u64, u64)>,
    },
    /// Lines of a file restricted to an absolute interval.
    File { file: String, start: u64, end: u64 },
}

/// Probeable source lines found for a [`LineRangeSpec`].
#[derive(Debug, Clone, Default)]
pub struct LineRange {
    /// Canonical path of the source file (after prefix resolution).
    pub path: PathBuf,
    pub function: Option<String>,
    pub lines: LineList,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_trace_arg_rendering() {
        let arg = TraceArg {
            name: "cpu".to_string(),
            value: "%di".to_string(),
            indirections: SmallVec::new(),
            type_tag: Some("s32".to_string()),
        };
        assert_eq!(arg.to_string(), "cpu=%di:s32");

        let mut arg = TraceArg {
            name: "pid".to_string(),
            value: "%bp".to_string(),
            ..Default::default()
        };
        arg.push_frame(-24);
        arg.push_frame(8);
        arg.add_to_current_frame(4);
        assert_eq!(arg.to_string(), "pid=+12(-24(%bp))");
    }

    #[test]
    fn test_probe_result_rendering() {
        let res = ProbeResult {
            symbol: "schedule".to_string(),
            offset: 12,
            address: 0xffff_0000,
            retprobe: false,
            args: vec![TraceArg {
                name: "cpu".to_string(),
                value: "%di".to_string(),
                ..Default::default()
            }],
        };
        assert_eq!(res.to_string(), "schedule+12 cpu=%di");

        let nameless = ProbeResult {
            offset: 0x401000,
            address: 0x401000,
            ..Default::default()
        };
        assert_eq!(nameless.to_string(), "0x401000");
    }
}
