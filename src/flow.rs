//! Data-plane status codes.
//!
//! Every push and pull returns a [`FlowResult`]. Errors are cheap, `Copy`
//! and carry no diagnostics; rich failures travel on the bus instead.
//!
//! Propagation rule: a caller receiving an `Err` stops pushing on that pad
//! and returns the error upstream unchanged. Only [`FlowError::is_fatal`]
//! errors mean something is broken; the rest are normal interruptions.

use thiserror::Error;

/// Result of a push, pull or chain call.
pub type FlowResult = Result<FlowSuccess, FlowError>;

/// Successful outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowSuccess {
    /// Data was accepted.
    #[default]
    Ok,
    /// Element-private success (code >= 100), e.g. "dropped on purpose".
    CustomSuccess(i32),
}

/// Unsuccessful outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FlowError {
    /// The pad has no peer.
    #[error("not linked")]
    NotLinked,
    /// The pad is flushing or not active in the right mode.
    #[error("flushing")]
    Flushing,
    /// End of stream reached.
    #[error("end of stream")]
    Eos,
    /// Caps are missing or could not be negotiated.
    #[error("not negotiated")]
    NotNegotiated,
    /// Fatal error; details are posted on the bus.
    #[error("error")]
    Error,
    /// Element-private error (code <= -100).
    #[error("custom error {0}")]
    CustomError(i32),
}

impl FlowError {
    /// True for conditions that must tear down the stream.
    ///
    /// Flushing, not-linked, EOS and not-negotiated are expected
    /// interruptions and are never fatal.
    pub fn is_fatal(self) -> bool {
        matches!(self, FlowError::Error | FlowError::CustomError(_))
    }

    /// Short label used in logs and metrics.
    pub fn kind(self) -> &'static str {
        match self {
            FlowError::NotLinked => "not-linked",
            FlowError::Flushing => "flushing",
            FlowError::Eos => "eos",
            FlowError::NotNegotiated => "not-negotiated",
            FlowError::Error => "error",
            FlowError::CustomError(_) => "custom-error",
        }
    }
}

/// Closed integer-coded vocabulary, convertible to and from [`FlowResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowReturn {
    /// 0
    Ok,
    /// -1
    NotLinked,
    /// -2
    Flushing,
    /// -3
    Eos,
    /// -4
    NotNegotiated,
    /// -5
    Error,
    /// >= 100
    CustomSuccess(i32),
    /// <= -100
    CustomError(i32),
}

impl FlowReturn {
    /// First code of the custom success range.
    pub const CUSTOM_SUCCESS: i32 = 100;
    /// First code of the custom error range.
    pub const CUSTOM_ERROR: i32 = -100;

    /// Integer code.
    pub fn code(self) -> i32 {
        match self {
            FlowReturn::Ok => 0,
            FlowReturn::NotLinked => -1,
            FlowReturn::Flushing => -2,
            FlowReturn::Eos => -3,
            FlowReturn::NotNegotiated => -4,
            FlowReturn::Error => -5,
            FlowReturn::CustomSuccess(c) | FlowReturn::CustomError(c) => c,
        }
    }

    /// Decode an integer code. Unknown codes between the named codes and
    /// the custom ranges map to `Error` (negative) or `Ok` (positive).
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => FlowReturn::Ok,
            -1 => FlowReturn::NotLinked,
            -2 => FlowReturn::Flushing,
            -3 => FlowReturn::Eos,
            -4 => FlowReturn::NotNegotiated,
            -5 => FlowReturn::Error,
            c if c >= Self::CUSTOM_SUCCESS => FlowReturn::CustomSuccess(c),
            c if c <= Self::CUSTOM_ERROR => FlowReturn::CustomError(c),
            c if c > 0 => FlowReturn::Ok,
            _ => FlowReturn::Error,
        }
    }

    /// Convert to the `Result` form.
    pub fn into_result(self) -> FlowResult {
        match self {
            FlowReturn::Ok => Ok(FlowSuccess::Ok),
            FlowReturn::CustomSuccess(c) => Ok(FlowSuccess::CustomSuccess(c)),
            FlowReturn::NotLinked => Err(FlowError::NotLinked),
            FlowReturn::Flushing => Err(FlowError::Flushing),
            FlowReturn::Eos => Err(FlowError::Eos),
            FlowReturn::NotNegotiated => Err(FlowError::NotNegotiated),
            FlowReturn::Error => Err(FlowError::Error),
            FlowReturn::CustomError(c) => Err(FlowError::CustomError(c)),
        }
    }
}

impl From<FlowResult> for FlowReturn {
    fn from(result: FlowResult) -> Self {
        match result {
            Ok(FlowSuccess::Ok) => FlowReturn::Ok,
            Ok(FlowSuccess::CustomSuccess(c)) => FlowReturn::CustomSuccess(c),
            Err(FlowError::NotLinked) => FlowReturn::NotLinked,
            Err(FlowError::Flushing) => FlowReturn::Flushing,
            Err(FlowError::Eos) => FlowReturn::Eos,
            Err(FlowError::NotNegotiated) => FlowReturn::NotNegotiated,
            Err(FlowError::Error) => FlowReturn::Error,
            Err(FlowError::CustomError(c)) => FlowReturn::CustomError(c),
        }
    }
}

impl From<FlowError> for FlowReturn {
    fn from(err: FlowError) -> Self {
        FlowReturn::from(Err(err))
    }
}

impl std::fmt::Display for FlowReturn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.into_result() {
            Ok(FlowSuccess::Ok) => f.write_str("ok"),
            Ok(FlowSuccess::CustomSuccess(c)) => write!(f, "custom success {c}"),
            Err(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(FlowReturn::Ok.code(), 0);
        assert_eq!(FlowReturn::NotLinked.code(), -1);
        assert_eq!(FlowReturn::Flushing.code(), -2);
        assert_eq!(FlowReturn::Eos.code(), -3);
        assert_eq!(FlowReturn::NotNegotiated.code(), -4);
        assert_eq!(FlowReturn::Error.code(), -5);
        assert_eq!(FlowReturn::from_code(101), FlowReturn::CustomSuccess(101));
        assert_eq!(FlowReturn::from_code(-102), FlowReturn::CustomError(-102));
    }

    #[test]
    fn test_result_conversion_is_lossless() {
        for code in [0, -1, -2, -3, -4, -5, 100, 250, -100, -300] {
            let ret = FlowReturn::from_code(code);
            assert_eq!(FlowReturn::from(ret.into_result()), ret);
            assert_eq!(ret.code(), code);
        }
    }

    #[test]
    fn test_only_errors_are_fatal() {
        assert!(FlowError::Error.is_fatal());
        assert!(FlowError::CustomError(-100).is_fatal());
        assert!(!FlowError::Flushing.is_fatal());
        assert!(!FlowError::NotLinked.is_fatal());
        assert!(!FlowError::Eos.is_fatal());
        assert!(!FlowError::NotNegotiated.is_fatal());
    }
}
