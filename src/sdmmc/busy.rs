use crate::bus::{DataPath, Direction, Flags, Transport};
use crate::sdmmc_proto::*;

use super::ErrorCodes;

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

/// A struct used while the controller talks to the card.
///
/// This struct is responsible for issuing commands, pumping small register
/// reads through the FIFO and turning hardware flags into error codes.
pub struct SdMmcBusy<'bus, BUS>
where
    BUS: Transport,
{
    bus: &'bus mut BUS,
}

/// Copy up to four bytes of a FIFO word into `buffer` at `pos`.
pub(crate) fn store_word(buffer: &mut [u8], pos: usize, word: u32) -> usize {
    let bytes = word.to_le_bytes();
    let count = core::cmp::min(4, buffer.len().saturating_sub(pos));
    buffer[pos..pos + count].copy_from_slice(&bytes[..count]);
    count
}

/// Build a FIFO word from up to four bytes of `buffer` at `pos`.
pub(crate) fn load_word(buffer: &[u8], pos: usize) -> (u32, usize) {
    let mut bytes = [0u8; 4];
    let count = core::cmp::min(4, buffer.len().saturating_sub(pos));
    bytes[..count].copy_from_slice(&buffer[pos..pos + count]);
    (u32::from_le_bytes(bytes), count)
}

impl<'bus, BUS> SdMmcBusy<'bus, BUS>
where
    BUS: Transport,
{
    pub fn new(bus: &'bus mut BUS) -> Self {
        SdMmcBusy { bus }
    }

    /// Perform a command.
    pub fn card_command(&mut self, command: Command, arg: u32) -> Result<(), ErrorCodes> {
        self.card_command_timeout(command, arg, CMD_TIMEOUT_MS)
    }

    /// Perform a command that may keep the card busy for a while.
    pub fn card_command_timeout(
        &mut self,
        command: Command,
        arg: u32,
        timeout_ms: u32,
    ) -> Result<(), ErrorCodes> {
        trace!("CMD{} arg={:x}", command.index(), arg);
        self.bus.send_command(command, arg, timeout_ms)
    }

    /// Perform an application-specific command.
    pub fn card_acmd(&mut self, rca_arg: u32, command: Command, arg: u32) -> Result<(), ErrorCodes> {
        self.card_command(Command::AppCmd, rca_arg)?;
        self.card_command(command, arg)
    }

    /// The first response word of the last command.
    pub fn response(&self) -> u32 {
        self.bus.response(0)
    }

    /// All four words of a long response.
    pub fn long_response(&self) -> [u32; 4] {
        [
            self.bus.response(0),
            self.bus.response(1),
            self.bus.response(2),
            self.bus.response(3),
        ]
    }

    /// Ask the card for its status register.
    pub fn card_status(&mut self, rca_arg: u32) -> Result<u32, ErrorCodes> {
        self.card_command(Command::SendStatus, rca_arg)?;
        Ok(self.response())
    }

    /// End a multiple block transfer.
    pub fn stop_transmission(&mut self, timeout_ms: u32) -> Result<(), ErrorCodes> {
        self.card_command_timeout(Command::StopTransmission, 0, timeout_ms)
    }

    /// Spin until one of `flags` is set, checking at most `budget` times.
    pub fn wait_flag(&self, flags: Flags, budget: u32) -> bool {
        let mut count = budget;
        loop {
            if self.bus.is_flag_active(flags) {
                return true;
            }
            if count == 0 {
                return false;
            }
            count -= 1;
        }
    }

    /// Spin until one of `flags` is set, for at most `timeout` ticks.
    pub fn wait_flag_ticks(&self, flags: Flags, timeout: u32) -> bool {
        let start = self.bus.get_tick();
        loop {
            if self.bus.is_flag_active(flags) {
                return true;
            }
            if self.bus.get_tick().wrapping_sub(start) >= timeout {
                return false;
            }
        }
    }

    /// Which data phase errors are flagged. A data timeout is reported as
    /// `timeout_code`.
    pub fn data_errors(&self, timeout_code: ErrorCodes) -> ErrorCodes {
        let mut codes = ErrorCodes::empty();
        if self.bus.is_flag_active(Flags::DATA_TIMEOUT) {
            codes |= timeout_code;
        }
        if self.bus.is_flag_active(Flags::DATA_CRC_FAIL) {
            codes |= ErrorCodes::DATA_CRC_FAIL;
        }
        if self.bus.is_flag_active(Flags::RX_OVERRUN) {
            codes |= ErrorCodes::RX_OVERRUN;
        }
        if self.bus.is_flag_active(Flags::TX_UNDERRUN) {
            codes |= ErrorCodes::TX_UNDERRUN;
        }
        if self.bus.is_flag_active(Flags::IDMA_TRANSFER_ERROR) {
            codes |= ErrorCodes::DMA;
        }
        codes
    }

    /// Read a small block (SCR, SD status, switch status) sent in answer to
    /// `command`. The block length is set to the buffer length first, and
    /// `app_rca` prefixes the command with CMD55 when given.
    pub fn read_register(
        &mut self,
        app_rca: Option<u32>,
        command: Command,
        arg: u32,
        data_timeout: u32,
        buffer: &mut [u8],
    ) -> Result<(), ErrorCodes> {
        let len = buffer.len() as u32;
        self.card_command(Command::SetBlockLen, len)?;
        if let Some(rca_arg) = app_rca {
            self.card_command(Command::AppCmd, rca_arg)?;
        }
        self.bus
            .arm_data_path(&DataPath::new(data_timeout, len, len, Direction::FromCard));
        if let Err(e) = self.card_command(command, arg) {
            self.bus.disarm_data_path();
            self.bus.clear_flags(Flags::STATIC_DATA_FLAGS);
            return Err(e);
        }

        let start = self.bus.get_tick();
        let mut pos = 0;
        let finished = Flags::RX_OVERRUN | Flags::DATA_CRC_FAIL | Flags::DATA_TIMEOUT | Flags::DATA_END;
        while !self.bus.is_flag_active(finished) {
            let remaining = buffer.len() - pos;
            if self.bus.is_flag_active(Flags::RX_FIFO_HALF_FULL) && remaining >= FIFO_BURST_BYTES {
                for _ in 0..FIFO_BURST_WORDS {
                    let word = self.bus.read_fifo();
                    pos += store_word(buffer, pos, word);
                }
            } else if remaining > 0 && !self.bus.is_flag_active(Flags::RX_FIFO_EMPTY) {
                let word = self.bus.read_fifo();
                pos += store_word(buffer, pos, word);
            }
            if self.bus.get_tick().wrapping_sub(start) >= data_timeout {
                self.bus.disarm_data_path();
                self.bus.clear_flags(Flags::STATIC_DATA_FLAGS);
                return Err(ErrorCodes::TIMEOUT);
            }
        }
        // Whatever is left in the FIFO once the card has finished
        while pos < buffer.len()
            && !self.bus.is_flag_active(Flags::RX_FIFO_EMPTY | Flags::DATA_ERRORS)
        {
            let word = self.bus.read_fifo();
            pos += store_word(buffer, pos, word);
        }
        self.bus.disarm_data_path();
        let errors = self.data_errors(ErrorCodes::DATA_TIMEOUT);
        self.bus.clear_flags(Flags::STATIC_DATA_FLAGS);
        trace!("Read {} register bytes after CMD{}", pos, command.index());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
