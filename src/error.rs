use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    FromUtf8(#[from] FromUtf8Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    // --------------------------------- debug adapter errors --------------------------------------
    #[error("debug adapter does not support {0}")]
    Unsupported(&'static str),
    #[error("debug adapter connection closed")]
    AdapterClosed,
    #[error("`{command}` request failed: {message}")]
    Request { command: String, message: String },
    #[error("malformed adapter message: {0}")]
    Protocol(String),
    #[error("timeout while waiting for {0}")]
    Timeout(&'static str),
    #[error("process launch: {0}")]
    Launch(String),

    // --------------------------------- target values and memory ----------------------------------
    #[error("value handle {id} belongs to evaluation {generation} and is no longer valid")]
    StaleValue { id: u64, generation: u64 },
    #[error("unknown value handle {0}")]
    UnknownValue(u64),
    #[error("value has no member `{0}`")]
    MissingMember(&'static str),
    #[error("invalid binary representation of `{0}`: {1:?}")]
    TypeBinaryRepr(&'static str, Box<[u8]>),
    #[error("cannot interpret `{0}` as a scalar value")]
    NotAScalar(String),
    #[error("unsupported integer bitwidth {0}")]
    UnsupportedBitWidth(u32),
    #[error("integer bitwidth was not probed")]
    BitWidthUnknown,
    #[error("invalid buffer length {0}")]
    InvalidLength(i64),
    #[error("memory read at {addr:#x}: expected {expected} bytes, got {got}")]
    ShortRead {
        addr: u64,
        expected: usize,
        got: usize,
    },

    // --------------------------------- kernel session errors -------------------------------------
    #[error("unexpected result of `{snippet}`: {result}")]
    UnexpectedResult { snippet: String, result: String },
    #[error("kernel startup: {0}")]
    Startup(String),
    #[error("session lock poisoned")]
    Poisoned,

    // --------------------------------- syscall errors --------------------------------------------
    #[error("{0} syscall error: {1}")]
    Syscall(&'static str, nix::Error),
    #[error("interrupt source closed")]
    InterruptSourceClosed,
}

impl Error {
    /// Return a hint to the caller - continue serving cells after error or stop the whole kernel.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IO(_) => false,
            Error::FromUtf8(_) => false,
            Error::Json(_) => false,
            Error::Unsupported(_) => false,
            Error::Request { .. } => false,
            Error::Protocol(_) => false,
            Error::Timeout(_) => false,
            Error::StaleValue { .. } => false,
            Error::UnknownValue(_) => false,
            Error::MissingMember(_) => false,
            Error::TypeBinaryRepr(_, _) => false,
            Error::NotAScalar(_) => false,
            Error::BitWidthUnknown => false,
            Error::InvalidLength(_) => false,
            Error::ShortRead { .. } => false,
            Error::UnexpectedResult { .. } => false,
            Error::InterruptSourceClosed => false,

            // currently fatal errors
            Error::AdapterClosed => true,
            Error::Launch(_) => true,
            Error::UnsupportedBitWidth(_) => true,
            Error::Startup(_) => true,
            Error::Poisoned => true,
            Error::Syscall(_, _) => true,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "kernel", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "kernel", concat!($msg, " {:#}"), e);
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
