//! Command, subcommand and data class codes of the BQ27441 family.
//!
//! Codes that differ between chip variants are looked up through [`Chip`], so the
//! protocol in the crate root never hardcodes a register address.

use enumset::{EnumSet, EnumSetType};

/// Standard and extended commands, i.e. the register pointers the host addresses.
///
/// Standard commands are 2-byte little-endian words. Extended commands select and
/// access the data memory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Control,
    Temperature,
    Voltage,
    Flags,
    NominalAvailableCapacity,
    FullAvailableCapacity,
    RemainingCapacity,
    FullChargeCapacity,
    AverageCurrent,
    StandbyCurrent,
    MaxLoadCurrent,
    AveragePower,
    StateOfCharge,
    InternalTemperature,
    StateOfHealth,
    RemainingCapacityUnfiltered,
    RemainingCapacityFiltered,
    FullChargeCapacityUnfiltered,
    FullChargeCapacityFiltered,
    StateOfChargeUnfiltered,
    TrueRemainingCapacity,

    OpConfig,
    DesignCapacity,
    DataClass,
    DataBlock,
    BlockData,
    BlockDataChecksum,
    BlockDataControl,
}

/// Subcommands written to the `Control()` register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Subcommand {
    ControlStatus = 0x0000,
    DeviceType = 0x0001,
    FwVersion = 0x0002,
    DmCode = 0x0004,
    PrevMacwrite = 0x0007,
    ChemId = 0x0008,
    BatInsert = 0x000C,
    BatRemove = 0x000D,
    SetHibernate = 0x0011,
    ClearHibernate = 0x0012,
    SetCfgUpdate = 0x0013,
    ShutdownEnable = 0x001B,
    Shutdown = 0x001C,
    Sealed = 0x0020,
    PulseSocInt = 0x0023,
    Reset = 0x0041,
    SoftReset = 0x0042,
    ExitCfgUpdate = 0x0043,
    ExitResim = 0x0044,
}

impl From<Subcommand> for u16 {
    fn from(value: Subcommand) -> u16 {
        value as u16
    }
}

/// Data memory subclass IDs, written to `DataClass()` to select a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DataClass {
    Safety = 2,
    ChargeTermination = 36,
    ConfigData = 48,
    Discharge = 49,
    Registers = 64,
    Power = 68,
    ItCfg = 80,
    CurrentThresholds = 81,
    State = 82,
    RaRam = 89,
    CalibrationData = 104,
    CcCal = 105,
    Current = 107,
    Codes = 112,
}

/// Bits of the `Flags()` register.
#[derive(EnumSetType, Debug)]
#[enumset(repr = "u16")]
pub enum Flag {
    /// Discharging
    Dsg = 0,
    /// State of charge final threshold reached
    Socf = 1,
    /// State of charge initial threshold reached
    Soc1 = 2,
    /// Battery detected
    BatDet = 3,
    /// Config update mode active, gauging suspended
    CfgUpMode = 4,
    /// Power-on reset or `RESET` occurred, RAM configuration is default
    ItPor = 5,
    OcvTaken = 7,
    /// Fast charging allowed
    Chg = 8,
    /// Full charge detected
    Fc = 9,
    /// Under-temperature
    Ut = 14,
    /// Over-temperature
    Ot = 15,
}

pub type Flags = EnumSet<Flag>;

/// Bits of the word returned by the `CONTROL_STATUS` subcommand.
#[derive(EnumSetType, Debug)]
#[enumset(repr = "u16")]
pub enum ControlStatusBit {
    Vok = 1,
    RupDis = 2,
    Ldmd = 3,
    Sleep = 4,
    Hibernate = 6,
    /// Gauge initialization complete
    InitComp = 7,
    ResUp = 8,
    QmaxUp = 9,
    Bca = 10,
    Cca = 11,
    CalMode = 12,
    /// Sealed state
    Ss = 13,
    WdReset = 14,
    ShutdownEn = 15,
}

pub type ControlStatus = EnumSet<ControlStatusBit>;

/// Describes one member of the chip family: where its commands live and the
/// constants needed to unseal it and edit its design capacity.
#[derive(Debug, Clone, Copy)]
pub struct Chip {
    pub name: &'static str,
    /// 7-bit bus address
    pub address: u8,
    /// Expected `DEVICE_TYPE` readback
    pub device_type: u16,
    /// Written twice to `Control()` to unseal
    pub unseal_key: u16,
    /// Subclass holding the design capacity
    pub capacity_class: DataClass,
    /// Block index of the design capacity within its subclass
    pub capacity_block: u8,
    /// Offset of the capacity MSB within the 32-byte block
    pub capacity_offset: u8,
    commands: &'static [(Command, u8)],
}

impl Chip {
    pub const BQ27441: Chip = Chip {
        name: "BQ27441",
        address: 0x55,
        device_type: 0x0421,
        unseal_key: 0x8000,
        capacity_class: DataClass::State,
        capacity_block: 0,
        capacity_offset: 0x0A,
        commands: &[
            (Command::Control, 0x00),
            (Command::Temperature, 0x02),
            (Command::Voltage, 0x04),
            (Command::Flags, 0x06),
            (Command::NominalAvailableCapacity, 0x08),
            (Command::FullAvailableCapacity, 0x0A),
            (Command::RemainingCapacity, 0x0C),
            (Command::FullChargeCapacity, 0x0E),
            (Command::AverageCurrent, 0x10),
            (Command::StandbyCurrent, 0x12),
            (Command::MaxLoadCurrent, 0x14),
            (Command::AveragePower, 0x18),
            (Command::StateOfCharge, 0x1C),
            (Command::InternalTemperature, 0x1E),
            (Command::StateOfHealth, 0x20),
            (Command::RemainingCapacityUnfiltered, 0x28),
            (Command::RemainingCapacityFiltered, 0x2A),
            (Command::FullChargeCapacityUnfiltered, 0x2C),
            (Command::FullChargeCapacityFiltered, 0x2E),
            (Command::StateOfChargeUnfiltered, 0x30),
            (Command::TrueRemainingCapacity, 0x6A),
            (Command::OpConfig, 0x3A),
            (Command::DesignCapacity, 0x3C),
            (Command::DataClass, 0x3E),
            (Command::DataBlock, 0x3F),
            (Command::BlockData, 0x40),
            (Command::BlockDataChecksum, 0x60),
            (Command::BlockDataControl, 0x61),
        ],
    };

    /// The same chip strapped to a different bus address.
    pub const fn with_address(self, address: u8) -> Self {
        Self { address, ..self }
    }

    /// Returns the register pointer of `command`, if this chip implements it.
    pub fn command(&self, command: Command) -> Option<u8> {
        self.commands
            .iter()
            .find(|(c, _)| *c == command)
            .map(|(_, addr)| *addr)
    }
}

impl Default for Chip {
    fn default() -> Self {
        Self::BQ27441
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bq27441_maps_block_registers() {
        let chip = Chip::BQ27441;

        assert_eq!(chip.command(Command::Control), Some(0x00));
        assert_eq!(chip.command(Command::DataClass), Some(0x3E));
        assert_eq!(chip.command(Command::DataBlock), Some(0x3F));
        assert_eq!(chip.command(Command::BlockData), Some(0x40));
        assert_eq!(chip.command(Command::BlockDataChecksum), Some(0x60));
        assert_eq!(chip.command(Command::BlockDataControl), Some(0x61));
    }

    #[test]
    fn missing_command_is_none() {
        let chip = Chip {
            commands: &[(Command::Voltage, 0x04)],
            ..Chip::BQ27441
        };

        assert_eq!(chip.command(Command::Voltage), Some(0x04));
        assert_eq!(chip.command(Command::Flags), None);
    }

    #[test]
    fn flags_decode_cfgupmode() {
        let flags = Flags::from_u16_truncated(0x0018);

        assert!(flags.contains(Flag::CfgUpMode));
        assert!(flags.contains(Flag::BatDet));
        assert!(!flags.contains(Flag::Dsg));
    }

    #[test]
    fn control_status_decodes_sealed_bit() {
        let status = ControlStatus::from_u16_truncated(0x2080);

        assert!(status.contains(ControlStatusBit::Ss));
        assert!(status.contains(ControlStatusBit::InitComp));
        assert_eq!(status.as_u16_truncated(), 0x2080);
    }
}
