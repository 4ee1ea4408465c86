//! ProbeStalker resolves high-level dynamic tracepoint descriptions into
//! low-level probe records using DWARF debug information.
//!
//! Given a place to probe (a function name, a source file and line, or a
//! "lazy" textual pattern) and a list of values to capture there (local
//! variables, structure fields, array elements or raw registers), the
//! resolver walks the compilation units of the target binary and produces
//! [`trace::ProbeResult`] records in the kernel tracer's vocabulary: a
//! function symbol plus byte offset, and per argument a register name, a
//! memory dereference chain or a symbolic address.
//!
//! Entry points live on [`dwarf::DebugInformation`]:
//!
//! - [`dwarf::DebugInformation::find_probes`] — forward resolution of a
//!   [`request::ProbeRequest`];
//! - [`dwarf::DebugInformation::find_probe_point`] — reverse translation of
//!   a raw address into function, file and line;
//! - [`dwarf::DebugInformation::find_line_range`] — enumeration of
//!   probeable source lines.
//!
//! The resolver is single-threaded and synchronous; one
//! [`config::ResolverConfig`] value is passed to each call instead of any
//! process-wide state.

pub mod config;
pub mod dwarf;
pub mod error;
pub mod lazy;
pub mod line_list;
pub mod paths;
pub mod request;
mod resolver;
pub mod trace;

pub use config::{x86_64_register_name, RegisterNameFn, ResolverConfig};
pub use dwarf::DebugInformation;
pub use error::{Error, ErrorKind, Result};
pub use line_list::{AddOutcome, LineList};
pub use request::{ArgSpec, FieldStep, FunctionSelector, ProbeRequest, TargetSelector};
pub use trace::{LineRange, LineRangeSpec, ProbePoint, ProbeResult, TraceArg};
