// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
///
/// Errors reported by an [`IdlePlatform`] use the same type and are passed
/// through to the caller unchanged.
///
/// [`IdlePlatform`]: crate::IdlePlatform
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// A CPU or an idle state index is out of range, or the idle state table
    /// is malformed.
    InvalidArgs,
    /// The memory for a coupled set cannot be allocated.
    NoMemory,
    /// The CPU is already registered.
    Busy,
    /// The CPU does not belong to any coupled set.
    NotCoupled,
    /// The operation requires coupled idle to be disabled on the set.
    InvalidState,
    /// The hardware failed to enter an idle state.
    IoError,
}

/// The result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
