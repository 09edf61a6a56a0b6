//! Error taxonomy for the controller core.
//!
//! Stalls are not modeled as [`Error`] — a protocol stall is a normal,
//! synchronous outcome of the standard-request engine (see
//! [`crate::requests`]) and is reported through its own return type so
//! callers can't accidentally propagate it with `?` into something that
//! aborts a transfer instead of asserting STALL.

/// Failures the core can report to its caller.
///
/// Programmer violations (e.g. priming an already-primed endpoint
/// without going through [`crate::endpoint::schedule_append`]) are not
/// represented here: they are undefined behavior, not a diagnosed
/// error, per the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A queue-head or transfer-descriptor pool had no free element.
    PoolExhausted,
    /// A busy-wait on a hardware acknowledgement bit exceeded its spin
    /// budget. The bit is read once more by the caller before giving up.
    ControllerUnresponsive,
    /// A host-mode transfer handle did not refer to a pending transfer.
    UnknownTransfer,
}
