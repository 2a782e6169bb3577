//! Register access layer: protocol encoding over a byte/word register transport.

use embedded_hal::i2c::I2c;

use crate::{
    block::{Block, BLOCK_SIZE},
    registers::{Chip, Command, Subcommand},
    Error,
};

/// The register transport the gauge is reached through.
///
/// Words are little-endian on the wire.
pub trait RegisterInterface {
    type Error;

    fn write_word(&mut self, reg: u8, value: u16) -> Result<(), Self::Error>;
    fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), Self::Error>;
    fn read_word(&mut self, reg: u8) -> Result<u16, Self::Error>;
    fn read_block(&mut self, reg: u8, data: &mut [u8]) -> Result<(), Self::Error>;
}

pub struct Bq27441I2cInterface<I> {
    pub i2c: I,
    pub address: u8,
}

impl<I> Bq27441I2cInterface<I> {
    pub const DEVICE_ADDR: u8 = 0x55;

    pub const fn new(i2c: I) -> Self {
        Self::with_address(i2c, Self::DEVICE_ADDR)
    }

    pub const fn with_address(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn release(self) -> I {
        self.i2c
    }
}

impl<I> RegisterInterface for Bq27441I2cInterface<I>
where
    I: I2c,
{
    type Error = I::Error;

    fn write_word(&mut self, reg: u8, value: u16) -> Result<(), Self::Error> {
        let [lo, hi] = value.to_le_bytes();
        self.i2c.write(self.address, &[reg, lo, hi])
    }

    fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), Self::Error> {
        self.i2c.write(self.address, &[reg, value])
    }

    fn read_word(&mut self, reg: u8) -> Result<u16, Self::Error> {
        let mut buffer = [0; 2];
        self.i2c.write_read(self.address, &[reg], &mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    fn read_block(&mut self, reg: u8, data: &mut [u8]) -> Result<(), Self::Error> {
        self.i2c.write_read(self.address, &[reg], data)
    }
}

/// Encodes the gauge's command set. Holds no state besides the transport.
///
/// Nothing here retries; a failed transfer is returned as [`Error::Transport`].
pub struct Bq27441<T> {
    pub iface: T,
    pub chip: Chip,
}

impl<T> Bq27441<T> {
    pub const fn new(iface: T, chip: Chip) -> Self {
        Self { iface, chip }
    }
}

impl<T> Bq27441<T>
where
    T: RegisterInterface,
{
    fn address(&self, command: Command) -> Result<u8, Error<T::Error>> {
        self.chip
            .command(command)
            .ok_or(Error::Unsupported(command))
    }

    /// Writes `subcommand` to `Control()` and reads the response back from it.
    pub fn read_control_word(&mut self, subcommand: u16) -> Result<u16, Error<T::Error>> {
        let reg = self.address(Command::Control)?;
        self.iface.write_word(reg, subcommand)?;
        let response = self.iface.read_word(reg)?;
        trace!("Control({:#x}) = {:#x}", subcommand, response);
        Ok(response)
    }

    /// Writes `subcommand` to `Control()` without expecting a response.
    pub fn execute_control_word(&mut self, subcommand: u16) -> Result<(), Error<T::Error>> {
        let reg = self.address(Command::Control)?;
        trace!("Control({:#x})", subcommand);
        self.iface.write_word(reg, subcommand)?;
        Ok(())
    }

    pub fn read_subcommand(&mut self, subcommand: Subcommand) -> Result<u16, Error<T::Error>> {
        self.read_control_word(subcommand.into())
    }

    pub fn execute_subcommand(&mut self, subcommand: Subcommand) -> Result<(), Error<T::Error>> {
        self.execute_control_word(subcommand.into())
    }

    /// Single-byte write to an extended command register.
    pub fn write_extended_register(&mut self, addr: u8, value: u8) -> Result<(), Error<T::Error>> {
        trace!("[{:#x}] <- {:#x}", addr, value);
        self.iface.write_byte(addr, value)?;
        Ok(())
    }

    pub fn write_extended(&mut self, command: Command, value: u8) -> Result<(), Error<T::Error>> {
        let addr = self.address(command)?;
        self.write_extended_register(addr, value)
    }

    pub fn read_extended(&mut self, command: Command) -> Result<u8, Error<T::Error>> {
        let addr = self.address(command)?;
        let mut buffer = [0];
        self.read_block(addr, &mut buffer)?;
        Ok(buffer[0])
    }

    pub fn read_block(&mut self, addr: u8, data: &mut [u8]) -> Result<(), Error<T::Error>> {
        self.iface.read_block(addr, data)?;
        Ok(())
    }

    pub fn read_u16(&mut self, addr: u8) -> Result<u16, Error<T::Error>> {
        let mut buffer = [0; 2];
        self.read_block(addr, &mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    pub fn read_i16(&mut self, addr: u8) -> Result<i16, Error<T::Error>> {
        let mut buffer = [0; 2];
        self.read_block(addr, &mut buffer)?;
        Ok(i16::from_le_bytes(buffer))
    }

    pub fn read_command_u16(&mut self, command: Command) -> Result<u16, Error<T::Error>> {
        let addr = self.address(command)?;
        self.read_u16(addr)
    }

    pub fn read_command_i16(&mut self, command: Command) -> Result<i16, Error<T::Error>> {
        let addr = self.address(command)?;
        self.read_i16(addr)
    }

    /// Reads the currently selected 32-byte data memory block.
    pub fn read_data_block(&mut self) -> Result<Block, Error<T::Error>> {
        let addr = self.address(Command::BlockData)?;
        let mut data = [0; BLOCK_SIZE];
        self.read_block(addr, &mut data)?;
        Ok(Block::new(data))
    }

    /// Writes one byte of the selected block through its `BlockData()` mapped address.
    pub fn write_block_byte(&mut self, offset: u8, value: u8) -> Result<(), Error<T::Error>> {
        debug_assert!((offset as usize) < BLOCK_SIZE);
        let base = self.address(Command::BlockData)?;
        self.write_extended_register(base + offset, value)
    }
}
