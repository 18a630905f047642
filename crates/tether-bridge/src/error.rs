//! Error types for tether-bridge

use crate::interface::BindStatus;
use crate::object::Ownership;
use tether_core::{CallError, ConversionError, Identifier, InstanceId, NativeHandle, Rid};
use thiserror::Error;

/// Bridge error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("cannot resolve {class}::{method} (hash {hash}): {status}")]
    BindResolution {
        class: Identifier,
        method: Identifier,
        hash: i64,
        status: BindStatus,
    },

    #[error("contract violation: {0}")]
    ContractViolation(Violation),

    #[error("unknown native class: {0}")]
    UnknownClass(Identifier),

    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("call failed: {0}")]
    Call(CallError),

    #[error("config error: {0}")]
    Config(#[from] ron::error::SpannedError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A broken usage contract
///
/// These are programming errors, not runtime conditions. The plain API
/// panics on them; `try_` variants hand them back so tests can observe them.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    #[error("bridge used before a native interface was installed")]
    NotInitialized,

    #[error("{0} proxy used after release")]
    ReleasedProxy(Identifier),

    #[error("{0} proxy is not bound to a native object")]
    UnboundProxy(Identifier),

    #[error("{0} proxy is already bound")]
    AlreadyBound(Identifier),

    #[error("null handle where an object was required")]
    NullHandle,

    #[error("'{name}' expects {expected} arguments, got {got}")]
    ArityMismatch {
        name: Identifier,
        expected: usize,
        got: usize,
    },

    #[error("{0} freed twice")]
    DoubleFree(Rid),

    #[error("{0} used after it was freed")]
    FreedRid(Rid),

    #[error("{0} already has a managed owner")]
    DuplicateOwner(NativeHandle),

    #[error("{class} object cannot be held as {ownership:?}")]
    OwnershipMismatch { class: Identifier, ownership: Ownership },

    #[error("{0} does not refer to a live object")]
    StaleHandle(NativeHandle),

    #[error("an owning proxy cannot be duplicated; borrow it instead")]
    CloneOwned,

    #[error("native object {0} is no longer alive")]
    DeadInstance(InstanceId),
}

impl From<Violation> for BridgeError {
    fn from(violation: Violation) -> Self {
        BridgeError::ContractViolation(violation)
    }
}

impl BridgeError {
    /// Check whether this is a usage-contract violation
    pub fn is_violation(&self) -> bool {
        matches!(self, BridgeError::ContractViolation(_))
    }

    /// The violation, if this is one
    pub fn violation(&self) -> Option<Violation> {
        match self {
            BridgeError::ContractViolation(v) => Some(*v),
            _ => None,
        }
    }

    /// Map a trampoline error slot onto the bridge's error kinds
    ///
    /// Arity mismatches are contract violations; everything else stays a
    /// plain call failure.
    pub fn from_call(err: CallError, name: Identifier) -> Self {
        if err.is_arity_mismatch() {
            Violation::ArityMismatch {
                name,
                expected: err.expected.max(0) as usize,
                got: err.argument.max(0) as usize,
            }
            .into()
        } else {
            BridgeError::Call(err)
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Log and abort the current operation
///
/// Used wherever a failure means the managed code is wrong, not the input.
#[track_caller]
pub(crate) fn fatal(err: BridgeError) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(target: "tether", %location, "{}", err);
    panic!("{}", err)
}

/// Unwrap or fail fast on contract violations, passing other errors through
#[track_caller]
pub(crate) fn escalate<T>(result: Result<T>) -> Result<T> {
    match result {
        Err(err) if err.is_violation() => fatal(err),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{intern, CallErrorKind};

    #[test]
    fn test_arity_errors_become_violations() {
        let err = BridgeError::from_call(CallError::argument_count(5, 4), intern("on_hit"));
        assert_eq!(
            err.violation(),
            Some(Violation::ArityMismatch {
                name: intern("on_hit"),
                expected: 5,
                got: 4,
            })
        );
        assert_eq!(
            err.to_string(),
            "contract violation: 'on_hit' expects 5 arguments, got 4"
        );
    }

    #[test]
    fn test_other_call_errors_stay_recoverable() {
        let err = BridgeError::from_call(CallError::invalid_method(), intern("nope"));
        assert!(!err.is_violation());
        assert!(matches!(
            err,
            BridgeError::Call(CallError {
                kind: CallErrorKind::InvalidMethod,
                ..
            })
        ));
    }

    #[test]
    fn test_escalate_passes_recoverable_errors() {
        let result: Result<()> = Err(BridgeError::UnknownClass(intern("Nope")));
        assert!(escalate(result).is_err());
    }

    #[test]
    #[should_panic(expected = "freed twice")]
    fn test_escalate_panics_on_violation() {
        let result: Result<()> = Err(Violation::DoubleFree(Rid::new(4)).into());
        let _ = escalate(result);
    }
}
