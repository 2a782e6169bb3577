#![cfg_attr(not(test), no_std)]
//! # BQ27441 fuel gauge driver
//!
//! Reads battery telemetry from a TI BQ27441 and updates the design capacity
//! stored in its data memory.
//!
//! Changing the design capacity follows the gauge's access protocol: unseal,
//! enter config-update mode, edit the `State` subclass block, commit it with a
//! checksum, exit config-update mode and seal again. A wrong order or a missing
//! checksum corrupts the gauge's configuration, so the whole sequence lives in
//! [`Bq27441::write_design_capacity`] and is rolled back on failure.
//!
//! ```no_run
//! # use embedded_hal::{delay::DelayNs, i2c::I2c};
//! # fn example<I: I2c, D: DelayNs>(i2c: I, mut delay: D) {
//! use bq27441::{Bq27441, Config};
//!
//! let mut gauge = Bq27441::new(i2c, Config { design_capacity: 8000, ..Config::default() });
//!
//! // Writes the design capacity to the gauge. This takes a few seconds.
//! gauge.initialize(&mut delay).ok();
//!
//! let info = gauge.basic_info();
//! # }
//! ```
//!
//! The security state lives in the gauge, not in the handle. The handle keeps a
//! mirror of it and [`Bq27441::refresh_state`] re-reads it from the chip. Two
//! handles to the same chip, or a handle shared between tasks without a lock
//! around each whole operation, will interleave the unseal/config-update
//! sequence and corrupt it.

mod fmt;

mod block;
mod error;
mod info;
pub mod ll;
pub mod registers;

use embedded_hal::delay::DelayNs;

pub use block::{checksum, decode_capacity, encode_capacity, Block, BLOCK_SIZE};
pub use error::{CapacityWriteError, CapacityWriteStep, Error};
pub use info::{AllInfo, BasicInfo};
use ll::{Bq27441I2cInterface, RegisterInterface};
use registers::{Chip, Command, ControlStatus, ControlStatusBit, Flag, Flags, Subcommand};

/// Access state of the gauge.
///
/// `FullAccess` exists on the chip but is never entered by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityState {
    Sealed,
    Unsealed,
    /// Unsealed, with gauging suspended so data memory can be edited.
    ConfigUpdate,
}

impl SecurityState {
    pub fn is_unsealed(self) -> bool {
        self != SecurityState::Sealed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Design capacity in mAh, written by [`Bq27441::initialize`].
    pub design_capacity: u16,

    /// Wait after writing block data and again after writing the checksum,
    /// while the gauge updates its data memory.
    pub settle_delay_ms: u32,

    /// Interval between `Flags()` reads while waiting for `CFGUPMODE` to change.
    pub poll_interval_ms: u32,

    /// Number of `Flags()` reads before giving up on `CFGUPMODE`. Zero reads once.
    pub poll_attempts: u8,

    /// Read `BlockDataChecksum()` back after committing a block.
    pub verify_checksum: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            design_capacity: 2500,
            settle_delay_ms: 1000,
            poll_interval_ms: 100,
            poll_attempts: 20,
            verify_checksum: true,
        }
    }
}

trait StepExt<V, E> {
    fn at(self, step: CapacityWriteStep) -> Result<V, (CapacityWriteStep, Error<E>)>;
}

impl<V, E> StepExt<V, E> for Result<V, Error<E>> {
    fn at(self, step: CapacityWriteStep) -> Result<V, (CapacityWriteStep, Error<E>)> {
        self.map_err(|error| (step, error))
    }
}

pub struct Bq27441<T> {
    driver: ll::Bq27441<T>,
    config: Config,
    state: SecurityState,
}

impl<I> Bq27441<Bq27441I2cInterface<I>> {
    /// Creates a handle for a BQ27441 on `i2c`. Does not touch the bus.
    pub const fn new(i2c: I, config: Config) -> Self {
        Self::for_chip(i2c, Chip::BQ27441, config)
    }

    /// Creates a handle for `chip`, addressed at [`Chip::address`].
    pub const fn for_chip(i2c: I, chip: Chip, config: Config) -> Self {
        let iface = Bq27441I2cInterface::with_address(i2c, chip.address);
        Self::with_interface(iface, chip, config)
    }
}

impl<T> Bq27441<T> {
    /// Creates a handle for `chip` over an arbitrary register transport.
    ///
    /// The gauge is assumed to be sealed until [`Bq27441::refresh_state`] says otherwise.
    pub const fn with_interface(iface: T, chip: Chip, config: Config) -> Self {
        Self {
            driver: ll::Bq27441::new(iface, chip),
            config,
            state: SecurityState::Sealed,
        }
    }

    /// The last known security state of the gauge.
    pub fn state(&self) -> SecurityState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn release(self) -> T {
        self.driver.iface
    }
}

impl<T> Bq27441<T>
where
    T: RegisterInterface,
{
    fn failed(
        &self,
        step: CapacityWriteStep,
        error: Error<T::Error>,
    ) -> CapacityWriteError<T::Error> {
        CapacityWriteError {
            step,
            state: self.state,
            error,
        }
    }

    fn require(&self, expected: SecurityState) -> Result<(), Error<T::Error>> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::UnexpectedState {
                expected,
                actual: self.state,
            })
        }
    }

    fn set_state(&mut self, state: SecurityState) {
        debug!("Security state: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Checks the chip, brings it back to `Sealed` if a previous run left it
    /// unsealed, then writes [`Config::design_capacity`].
    ///
    /// This mutates the gauge's data memory and blocks for at least twice
    /// [`Config::settle_delay_ms`].
    pub fn initialize(
        &mut self,
        delay: &mut impl DelayNs,
    ) -> Result<(), CapacityWriteError<T::Error>> {
        let device_type = self
            .device_id()
            .map_err(|e| self.failed(CapacityWriteStep::CheckDevice, e))?;

        if device_type != self.driver.chip.device_type {
            error!(
                "Unexpected device type for {}: {:#x}",
                self.driver.chip.name,
                device_type
            );
            return Err(self.failed(
                CapacityWriteStep::CheckDevice,
                Error::UnknownDevice(device_type),
            ));
        }

        self.recover(delay)?;

        self.write_design_capacity(self.config.design_capacity, delay)
    }

    /// Reads the security state back from the gauge.
    pub fn refresh_state(&mut self) -> Result<SecurityState, Error<T::Error>> {
        let state = if self.control_status()?.contains(ControlStatusBit::Ss) {
            SecurityState::Sealed
        } else if self.flags()?.contains(Flag::CfgUpMode) {
            SecurityState::ConfigUpdate
        } else {
            SecurityState::Unsealed
        };

        if state != self.state {
            self.set_state(state);
        }

        Ok(state)
    }

    /// Drives the gauge back to `Sealed` from whatever state it is in.
    pub fn recover(
        &mut self,
        delay: &mut impl DelayNs,
    ) -> Result<(), CapacityWriteError<T::Error>> {
        let state = self
            .refresh_state()
            .map_err(|e| self.failed(CapacityWriteStep::RefreshState, e))?;

        if state != SecurityState::Sealed {
            warn!("Gauge found in {:?}, recovering", state);
        }

        if state == SecurityState::ConfigUpdate {
            self.exit_config_update(delay)
                .map_err(|e| self.failed(CapacityWriteStep::ExitConfigUpdate, e))?;
        }

        if self.state == SecurityState::Unsealed {
            self.seal()
                .map_err(|e| self.failed(CapacityWriteStep::Seal, e))?;
        }

        Ok(())
    }

    /// Writes the unseal key twice and confirms the sealed bit cleared.
    pub fn unseal(&mut self) -> Result<(), Error<T::Error>> {
        self.require(SecurityState::Sealed)?;

        let key = self.driver.chip.unseal_key;
        self.driver.execute_control_word(key)?;
        self.driver.execute_control_word(key)?;

        // Both keys were accepted, so the gauge may be unsealed even if the
        // status read below fails.
        self.set_state(SecurityState::Unsealed);

        if self.control_status()?.contains(ControlStatusBit::Ss) {
            self.set_state(SecurityState::Sealed);
            return Err(Error::UnexpectedState {
                expected: SecurityState::Unsealed,
                actual: SecurityState::Sealed,
            });
        }

        Ok(())
    }

    /// Seals the gauge and confirms the sealed bit is set.
    ///
    /// The handle stays `Unsealed` until the status read confirms the change.
    pub fn seal(&mut self) -> Result<(), Error<T::Error>> {
        self.require(SecurityState::Unsealed)?;

        self.driver.execute_subcommand(Subcommand::Sealed)?;

        if !self.control_status()?.contains(ControlStatusBit::Ss) {
            return Err(Error::UnexpectedState {
                expected: SecurityState::Sealed,
                actual: SecurityState::Unsealed,
            });
        }

        self.set_state(SecurityState::Sealed);
        Ok(())
    }

    /// Enters config-update mode and waits until the gauge reports `CFGUPMODE`.
    ///
    /// Once the command is accepted the handle treats the gauge as being in
    /// config-update mode even if the flag never shows up, so that a rollback
    /// still issues `EXIT_CFGUPDATE`.
    pub fn enter_config_update(
        &mut self,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error<T::Error>> {
        self.require(SecurityState::Unsealed)?;

        self.driver.execute_subcommand(Subcommand::SetCfgUpdate)?;
        self.set_state(SecurityState::ConfigUpdate);

        self.wait_for_config_update(true, delay)
    }

    /// Leaves config-update mode and waits until `CFGUPMODE` clears.
    pub fn exit_config_update(
        &mut self,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error<T::Error>> {
        self.require(SecurityState::ConfigUpdate)?;

        self.driver.execute_subcommand(Subcommand::ExitCfgUpdate)?;
        self.wait_for_config_update(false, delay)?;

        self.set_state(SecurityState::Unsealed);
        Ok(())
    }

    fn wait_for_config_update(
        &mut self,
        active: bool,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error<T::Error>> {
        for _ in 0..self.config.poll_attempts.max(1) {
            if self.flags()?.contains(Flag::CfgUpMode) == active {
                return Ok(());
            }
            delay.delay_ms(self.config.poll_interval_ms);
        }

        let (expected, actual) = if active {
            (SecurityState::ConfigUpdate, SecurityState::Unsealed)
        } else {
            (SecurityState::Unsealed, SecurityState::ConfigUpdate)
        };

        Err(Error::UnexpectedState { expected, actual })
    }

    /// Writes `capacity` (mAh) to the design capacity field of the `State` subclass.
    ///
    /// On failure the gauge is taken out of config-update mode and sealed again
    /// if possible. The returned error names the failed step and the state the
    /// gauge was left in.
    pub fn write_design_capacity(
        &mut self,
        capacity: u16,
        delay: &mut impl DelayNs,
    ) -> Result<(), CapacityWriteError<T::Error>> {
        if capacity == 0 {
            return Err(self.failed(CapacityWriteStep::Validate, Error::InvalidCapacity));
        }

        info!("Writing design capacity: {} mAh", capacity);

        let initial = self.state;

        match self.apply_design_capacity(capacity, delay) {
            Ok(()) => {
                info!("Design capacity updated");
                Ok(())
            }
            Err((step, error)) => {
                error!("Design capacity update failed at {:?}", step);
                // A refused unseal that left the state alone has nothing to undo.
                if step != CapacityWriteStep::Unseal || self.state != initial {
                    self.rollback(delay);
                }
                Err(self.failed(step, error))
            }
        }
    }

    fn apply_design_capacity(
        &mut self,
        capacity: u16,
        delay: &mut impl DelayNs,
    ) -> Result<(), (CapacityWriteStep, Error<T::Error>)> {
        let chip = self.driver.chip;

        self.unseal().at(CapacityWriteStep::Unseal)?;
        self.enter_config_update(delay)
            .at(CapacityWriteStep::EnterConfigUpdate)?;

        self.driver
            .write_extended(Command::BlockDataControl, 0x00)
            .at(CapacityWriteStep::EnableBlockControl)?;
        self.driver
            .write_extended(Command::DataClass, chip.capacity_class as u8)
            .at(CapacityWriteStep::SelectDataClass)?;
        self.driver
            .write_extended(Command::DataBlock, chip.capacity_block)
            .at(CapacityWriteStep::SelectBlock)?;

        let mut block = self
            .driver
            .read_data_block()
            .at(CapacityWriteStep::ReadBlock)?;
        debug!(
            "Design capacity in data memory: {} mAh",
            block.read_u16_be(chip.capacity_offset)
        );

        block.write_u16_be(chip.capacity_offset, capacity);
        let [high, low] = encode_capacity(capacity);

        self.driver
            .write_block_byte(chip.capacity_offset, high)
            .at(CapacityWriteStep::WriteCapacityHigh)?;
        self.driver
            .write_block_byte(chip.capacity_offset + 1, low)
            .at(CapacityWriteStep::WriteCapacityLow)?;

        delay.delay_ms(self.config.settle_delay_ms);

        let checksum = block.checksum();
        self.driver
            .write_extended(Command::BlockDataChecksum, checksum)
            .at(CapacityWriteStep::WriteChecksum)?;

        delay.delay_ms(self.config.settle_delay_ms);

        if self.config.verify_checksum {
            self.verify_checksum(checksum)
                .at(CapacityWriteStep::VerifyChecksum)?;
        }

        self.exit_config_update(delay)
            .at(CapacityWriteStep::ExitConfigUpdate)?;
        self.seal().at(CapacityWriteStep::Seal)?;

        Ok(())
    }

    fn verify_checksum(&mut self, written: u8) -> Result<(), Error<T::Error>> {
        let read_back = self.driver.read_extended(Command::BlockDataChecksum)?;

        if read_back != written {
            return Err(Error::ChecksumMismatch { written, read_back });
        }

        Ok(())
    }

    // Best effort, errors are logged. `self.state` keeps the last confirmed state.
    fn rollback(&mut self, delay: &mut impl DelayNs) {
        if self.state == SecurityState::ConfigUpdate && self.exit_config_update(delay).is_err() {
            warn!("Rollback: failed to exit config update mode");
            return;
        }

        if self.state == SecurityState::Unsealed && self.seal().is_err() {
            warn!("Rollback: failed to seal");
        }
    }

    pub fn device_id(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_subcommand(Subcommand::DeviceType)
    }

    pub fn dm_id(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_subcommand(Subcommand::DmCode)
    }

    pub fn fw_version(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_subcommand(Subcommand::FwVersion)
    }

    pub fn chem_id(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_subcommand(Subcommand::ChemId)
    }

    pub fn control_status(&mut self) -> Result<ControlStatus, Error<T::Error>> {
        let raw = self.driver.read_subcommand(Subcommand::ControlStatus)?;
        Ok(ControlStatus::from_u16_truncated(raw))
    }

    /// Resets gauging. The gauge is not ready again until `INITCOMP` is set in
    /// [`Bq27441::control_status`]. Ignored by the gauge while sealed.
    pub fn soft_reset(&mut self) -> Result<(), Error<T::Error>> {
        debug!("Soft reset");
        self.driver.execute_subcommand(Subcommand::SoftReset)
    }

    /// Signals battery insertion when `OpConfig.BIE` is cleared.
    pub fn battery_insert(&mut self) -> Result<(), Error<T::Error>> {
        self.driver.execute_subcommand(Subcommand::BatInsert)
    }

    /// Signals battery removal when `OpConfig.BIE` is cleared.
    pub fn battery_remove(&mut self) -> Result<(), Error<T::Error>> {
        self.driver.execute_subcommand(Subcommand::BatRemove)
    }

    pub fn set_hibernate(&mut self) -> Result<(), Error<T::Error>> {
        self.driver.execute_subcommand(Subcommand::SetHibernate)
    }

    pub fn clear_hibernate(&mut self) -> Result<(), Error<T::Error>> {
        self.driver.execute_subcommand(Subcommand::ClearHibernate)
    }

    pub fn flags(&mut self) -> Result<Flags, Error<T::Error>> {
        let raw = self.driver.read_command_u16(Command::Flags)?;
        Ok(Flags::from_u16_truncated(raw))
    }

    /// Temperature in 0.1 K.
    pub fn temperature(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::Temperature)
    }

    /// Internal die temperature in 0.1 K.
    pub fn internal_temperature(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::InternalTemperature)
    }

    /// Cell voltage in mV.
    pub fn voltage(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::Voltage)
    }

    /// Average current in mA. Negative while discharging.
    pub fn average_current(&mut self) -> Result<i16, Error<T::Error>> {
        self.driver.read_command_i16(Command::AverageCurrent)
    }

    /// Standby current in mA.
    pub fn standby_current(&mut self) -> Result<i16, Error<T::Error>> {
        self.driver.read_command_i16(Command::StandbyCurrent)
    }

    /// Maximum load current in mA.
    pub fn max_load_current(&mut self) -> Result<i16, Error<T::Error>> {
        self.driver.read_command_i16(Command::MaxLoadCurrent)
    }

    /// Average power in mW. Negative while discharging.
    pub fn average_power(&mut self) -> Result<i16, Error<T::Error>> {
        self.driver.read_command_i16(Command::AveragePower)
    }

    /// State of charge in %.
    pub fn state_of_charge(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::StateOfCharge)
    }

    pub fn state_of_charge_unfiltered(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::StateOfChargeUnfiltered)
    }

    /// State of health in %. The high byte of the register holds the SOH status
    /// and is dropped.
    pub fn state_of_health(&mut self) -> Result<u8, Error<T::Error>> {
        let raw = self.driver.read_command_u16(Command::StateOfHealth)?;
        Ok((raw & 0x00FF) as u8)
    }

    /// Full available capacity in mAh.
    pub fn available_capacity(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::FullAvailableCapacity)
    }

    /// Nominal available capacity in mAh.
    pub fn nominal_available_capacity(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::NominalAvailableCapacity)
    }

    /// Remaining capacity in mAh.
    pub fn remaining_capacity(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::RemainingCapacity)
    }

    pub fn remaining_capacity_unfiltered(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::RemainingCapacityUnfiltered)
    }

    pub fn remaining_capacity_filtered(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::RemainingCapacityFiltered)
    }

    /// Full charge capacity in mAh.
    pub fn full_charge_capacity(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::FullChargeCapacity)
    }

    pub fn full_charge_capacity_unfiltered(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::FullChargeCapacityUnfiltered)
    }

    pub fn full_charge_capacity_filtered(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::FullChargeCapacityFiltered)
    }

    pub fn true_remaining_capacity(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::TrueRemainingCapacity)
    }

    /// Design capacity in mAh, as currently used by the gauging algorithm.
    pub fn design_capacity(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::DesignCapacity)
    }

    pub fn op_config(&mut self) -> Result<u16, Error<T::Error>> {
        self.driver.read_command_u16(Command::OpConfig)
    }

    fn warn_if_suspended(&self) {
        if self.state == SecurityState::ConfigUpdate {
            warn!("Gauging is suspended, readings are stale");
        }
    }

    /// Reads voltage, average current, state of charge and state of health.
    pub fn basic_info(&mut self) -> BasicInfo {
        self.warn_if_suspended();

        BasicInfo {
            voltage: field("voltage", self.voltage()),
            current: field("current", self.average_current()),
            soc: field("soc", self.state_of_charge()),
            soh: field("soh", self.state_of_health()),
        }
    }

    /// Reads every standard command.
    pub fn all_info(&mut self) -> AllInfo {
        self.warn_if_suspended();

        AllInfo {
            control: field("control", self.driver.read_command_u16(Command::Control)),
            temperature: field("temperature", self.temperature()),
            voltage: field("voltage", self.voltage()),
            flags: field("flags", self.driver.read_command_u16(Command::Flags)),
            nominal_capacity: field("nominal_capacity", self.nominal_available_capacity()),
            available_capacity: field("available_capacity", self.available_capacity()),
            remaining_capacity: field("remaining_capacity", self.remaining_capacity()),
            full_capacity: field("full_capacity", self.full_charge_capacity()),
            average_current: field("average_current", self.average_current()),
            standby_current: field("standby_current", self.standby_current()),
            max_current: field("max_current", self.max_load_current()),
            average_power: field("average_power", self.average_power()),
            soc: field("soc", self.state_of_charge()),
            internal_temperature: field("internal_temperature", self.internal_temperature()),
            soh: field("soh", self.state_of_health()),
            remaining_capacity_unfiltered: field(
                "remaining_capacity_unfiltered",
                self.remaining_capacity_unfiltered()
            ),
            remaining_capacity_filtered: field(
                "remaining_capacity_filtered",
                self.remaining_capacity_filtered()
            ),
            full_capacity_unfiltered: field(
                "full_capacity_unfiltered",
                self.full_charge_capacity_unfiltered()
            ),
            full_capacity_filtered: field(
                "full_capacity_filtered",
                self.full_charge_capacity_filtered()
            ),
            soc_unfiltered: field("soc_unfiltered", self.state_of_charge_unfiltered()),
            true_remaining_capacity: field(
                "true_remaining_capacity",
                self.true_remaining_capacity()
            ),
        }
    }
}

fn field<V, E>(name: &'static str, reading: Result<V, Error<E>>) -> Option<V> {
    match reading {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Failed to read {}", name);
            None
        }
    }
}
