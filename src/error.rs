use crate::dwarf::unit::DieRef;
use std::path::PathBuf;

/// Coarse error classification, one per failure family in the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Invalid,
    NotSupported,
    OutOfRange,
    Io,
    Malformed,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),

    // --------------------------------- entity not found ------------------------------------------
    #[error("no debug information found")]
    NoDebugInformation,
    #[error("function `{0}` not found")]
    FunctionNotFound(String),
    #[error("probe point at {0:#x} is not found in any function")]
    NoEnclosingFunction(u64),
    #[error("variable `{0}` not found in this scope")]
    VariableNotFound(String),
    #[error("`{structure}` has no member `{member}`")]
    MemberNotFound { structure: String, member: String },
    #[error("type of `{0}` not found")]
    TypeNotFound(String),
    #[error("debug information entry not found, reference: {0:?}")]
    DieNotFound(DieRef),
    #[error("source file {0:?} not found")]
    SourceFileNotFound(PathBuf),
    #[error("there are no suitable probe points for this request")]
    NoSuitablePlace,
    #[error("location of `{0}` is not available at this address")]
    LocationNotAvailable(String),

    // --------------------------------- semantic errors -------------------------------------------
    #[error("`{0}` must be referred by `->`")]
    DerefExpected(String),
    #[error("`{0}` must be referred by `.`")]
    MemberAccessExpected(String),
    #[error("`{0}` is not a data structure nor a union")]
    NotAStructure(String),
    #[error("`{0}` is not a pointer nor an array")]
    NotAnArray(String),
    #[error("specified offset is out of `{0}`")]
    OffsetOutOfFunction(String),
    #[error("$retval is available only for return probes")]
    RetvalWithoutRetprobe,

    // --------------------------------- dwarf subset limits ---------------------------------------
    #[error("DWARF operation {0} is not supported")]
    UnsupportedDwarfOp(String),
    #[error("no frame base available at {0:#x}")]
    NoFrameBase(u64),
    #[error("unsupported frame base expression")]
    UnsupportedFrameBase,
    #[error("unsupported canonical frame address rule")]
    UnsupportedCfa,
    #[error("structure on a register is not supported")]
    RegisterStructure,
    #[error("unsupported member location expression")]
    UnsupportedMemberLocation,

    // --------------------------------- capacity and mapping --------------------------------------
    #[error("mapping for the register number {0} is missing on this architecture")]
    RegisterMappingMissing(u16),
    #[error("too many probe points found (the limit is {0})")]
    TooManyProbes(usize),

    // --------------------------------- parsing errors --------------------------------------------
    #[error("dwarf parsing error: {0}")]
    DwarfParsing(#[from] gimli::Error),
    #[error("object file parsing error: {0}")]
    ObjParsing(#[from] object::Error),
}

impl Error {
    /// Classify an error by the failure family it reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IO(_) => ErrorKind::Io,

            Error::NoDebugInformation => ErrorKind::NotFound,
            Error::FunctionNotFound(_) => ErrorKind::NotFound,
            Error::NoEnclosingFunction(_) => ErrorKind::NotFound,
            Error::VariableNotFound(_) => ErrorKind::NotFound,
            Error::MemberNotFound { .. } => ErrorKind::NotFound,
            Error::TypeNotFound(_) => ErrorKind::NotFound,
            Error::DieNotFound(_) => ErrorKind::NotFound,
            Error::SourceFileNotFound(_) => ErrorKind::NotFound,
            Error::NoSuitablePlace => ErrorKind::NotFound,
            Error::LocationNotAvailable(_) => ErrorKind::NotFound,

            Error::DerefExpected(_) => ErrorKind::Invalid,
            Error::MemberAccessExpected(_) => ErrorKind::Invalid,
            Error::NotAStructure(_) => ErrorKind::Invalid,
            Error::NotAnArray(_) => ErrorKind::Invalid,
            Error::OffsetOutOfFunction(_) => ErrorKind::Invalid,
            Error::RetvalWithoutRetprobe => ErrorKind::Invalid,

            Error::UnsupportedDwarfOp(_) => ErrorKind::NotSupported,
            Error::NoFrameBase(_) => ErrorKind::NotSupported,
            Error::UnsupportedFrameBase => ErrorKind::NotSupported,
            Error::UnsupportedCfa => ErrorKind::NotSupported,
            Error::RegisterStructure => ErrorKind::NotSupported,
            Error::UnsupportedMemberLocation => ErrorKind::NotSupported,

            Error::RegisterMappingMissing(_) => ErrorKind::OutOfRange,
            Error::TooManyProbes(_) => ErrorKind::OutOfRange,

            Error::DwarfParsing(_) => ErrorKind::Malformed,
            Error::ObjParsing(_) => ErrorKind::Malformed,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "resolver", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "resolver", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
