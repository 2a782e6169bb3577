use crate::{registers::Command, SecurityState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The bus transfer failed.
    Transport(E),
    /// The gauge is not in the security state the operation requires.
    UnexpectedState {
        expected: SecurityState,
        actual: SecurityState,
    },
    /// The checksum read back after committing a block differs from the one written.
    ChecksumMismatch { written: u8, read_back: u8 },
    /// Design capacity must be at least 1 mAh.
    InvalidCapacity,
    /// `DEVICE_TYPE` returned something other than the expected chip id.
    UnknownDevice(u16),
    /// The chip's register map has no address for this command.
    Unsupported(Command),
}

impl<E> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::Transport(error)
    }
}

/// The steps of a design capacity update, in the order they are performed.
///
/// `CheckDevice` and `RefreshState` only occur in [`crate::Bq27441::initialize`]
/// and [`crate::Bq27441::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CapacityWriteStep {
    Validate,
    CheckDevice,
    RefreshState,
    Unseal,
    EnterConfigUpdate,
    EnableBlockControl,
    SelectDataClass,
    SelectBlock,
    ReadBlock,
    WriteCapacityHigh,
    WriteCapacityLow,
    WriteChecksum,
    VerifyChecksum,
    ExitConfigUpdate,
    Seal,
}

/// A failed design capacity update.
///
/// `state` is where the gauge was left after the rollback attempt. Anything
/// other than [`SecurityState::Sealed`] means the rollback did not complete
/// either, and the caller should resume with [`crate::Bq27441::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CapacityWriteError<E> {
    pub step: CapacityWriteStep,
    pub state: SecurityState,
    pub error: Error<E>,
}

impl<E> CapacityWriteError<E> {
    /// Whether the gauge may still be unsealed or in config-update mode.
    pub fn needs_recovery(&self) -> bool {
        self.state != SecurityState::Sealed
    }
}
