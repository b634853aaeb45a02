//! Bus speed negotiation and card status queries.

use super::{Callbacks, Error, ErrorCodes, SdMmc, State, Transceiver};
use crate::bus::{BusSpeed, BusWidth, Dma, KernelClock, ReceiveClock, Transport};
use crate::card::{CardState, Scr, SdStatus, SpeedClass, SwitchStatus};
use crate::sdmmc_proto::*;

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

/// Bus speed modes that can be requested with CMD6.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpeedMode {
    /// Default speed, up to 25 MHz
    Default,
    /// High speed, up to 50 MHz
    High,
    /// UHS-I SDR12
    Sdr12,
    /// UHS-I SDR25
    Sdr25,
    /// UHS-I SDR50
    Sdr50,
    /// UHS-I SDR104
    Sdr104,
    /// UHS-I DDR50
    Ddr50,
}

impl SpeedMode {
    fn is_uhs(self) -> bool {
        !matches!(self, SpeedMode::Default | SpeedMode::High)
    }

    /// The CMD6 argument for this mode, if the card and board can use it.
    pub fn switch_pattern(self, speed: SpeedClass, transceiver: Transceiver) -> Option<u32> {
        if self.is_uhs() && (speed != SpeedClass::UltraHigh || transceiver != Transceiver::Present) {
            return None;
        }
        Some(match self {
            SpeedMode::Default | SpeedMode::Sdr12 => SWITCH_PATTERN_DEFAULT,
            SpeedMode::High | SpeedMode::Sdr25 => SWITCH_PATTERN_HIGH,
            SpeedMode::Sdr50 => SWITCH_PATTERN_SDR50,
            SpeedMode::Sdr104 => SWITCH_PATTERN_SDR104,
            SpeedMode::Ddr50 => SWITCH_PATTERN_DDR50,
        })
    }
}

impl<'buf, BUS, DMA, CLK, CB> SdMmc<'buf, BUS, DMA, CLK, CB>
where
    BUS: Transport,
    DMA: Dma,
    CLK: KernelClock,
    CB: Callbacks,
{
    /// Switch the card to another bus speed mode.
    ///
    /// UHS-I modes need an `UltraHigh` card and a transceiver; asking for
    /// one otherwise fails with `REQUEST_NOT_APPLICABLE` before anything is
    /// sent to the card.
    pub fn switch_speed_mode(&mut self, mode: SpeedMode) -> Result<(), Error> {
        self.check_idle()?;
        let pattern = match mode.switch_pattern(self.card.speed, self.config.transceiver) {
            Some(pattern) => pattern,
            None => {
                let e = Error::Failed(ErrorCodes::REQUEST_NOT_APPLICABLE);
                self.record(e);
                return Err(e);
            }
        };
        self.begin(None)?;
        let result = self.run_speed_switch(mode, pattern);
        self.end(result)
    }

    fn run_speed_switch(&mut self, mode: SpeedMode, pattern: u32) -> Result<(), Error> {
        if self.card.speed == SpeedClass::UltraHigh && self.bus_config.bus_width != BusWidth::Four {
            self.set_wide_bus(BusWidth::Four)?;
        }
        match mode {
            SpeedMode::Sdr50 | SpeedMode::Sdr104 => self.bus.set_bus_speed(BusSpeed::UltraHighSdr),
            SpeedMode::Ddr50 => self.bus.set_bus_speed(BusSpeed::UltraHighDdr),
            _ => {}
        }

        let mut status = SwitchStatus {
            data: [0u8; SD_STATUS_LEN],
        };
        let data_timeout = self.timeouts.data_cycles;
        self.busy()
            .read_register(None, Command::SwitchFunction, pattern, data_timeout, &mut status.data)
            .map_err(Error::Failed)?;
        if !status.function_group1_high_speed() {
            return Err(Error::Failed(ErrorCodes::UNSUPPORTED_FEATURE));
        }

        if self.config.transceiver == Transceiver::Present && self.card.speed == SpeedClass::UltraHigh {
            let clock = match mode {
                SpeedMode::Sdr50 | SpeedMode::Sdr104 => Some(ReceiveClock::Feedback),
                SpeedMode::Ddr50 => Some(ReceiveClock::ClockIn),
                _ => None,
            };
            if let Some(clock) = clock {
                self.callbacks.drive_transceiver(true);
                self.bus.select_receive_clock(clock);
                self.bus.set_delay_block(true);
            }
        }

        self.wait_for_transfer_state()?;
        self.busy()
            .card_command(Command::SetBlockLen, BLOCK_LEN)
            .map_err(Error::Failed)?;
        debug!("Switched to {:?}", mode);
        Ok(())
    }

    fn wait_for_transfer_state(&mut self) -> Result<(), Error> {
        let rca_arg = self.card.rca_argument();
        let start = self.bus.get_tick();
        loop {
            let status = self.busy().card_status(rca_arg).map_err(Error::Failed)?;
            if CardState::from_card_status(status) == CardState::Transfer {
                return Ok(());
            }
            if self.bus.get_tick().wrapping_sub(start) >= CMD_TIMEOUT_MS {
                return Err(Error::Failed(ErrorCodes::TIMEOUT));
            }
        }
    }

    /// Read the SD status. The speed class is refreshed from it.
    pub fn card_status(&mut self) -> Result<SdStatus, Error> {
        self.begin(None)?;
        let result = self.read_sd_status().and_then(|status| {
            self.card.speed = SpeedClass::from_status(self.card.capacity, &status);
            self.busy()
                .card_command(Command::SetBlockLen, BLOCK_LEN)
                .map_err(Error::Failed)?;
            Ok(status)
        });
        self.end(result)
    }

    /// Ask the card which state it is in.
    pub fn card_state(&mut self) -> Result<CardState, Error> {
        match self.state {
            State::Reset | State::Initialized | State::CardRemoved => return Err(Error::Busy),
            _ => {}
        }
        let rca_arg = self.card.rca_argument();
        match self.busy().card_status(rca_arg) {
            Ok(status) => Ok(CardState::from_card_status(status)),
            Err(codes) => {
                let e = Error::Failed(codes);
                self.record(e);
                Err(e)
            }
        }
    }

    pub(crate) fn read_sd_status(&mut self) -> Result<SdStatus, Error> {
        let rca_arg = self.card.rca_argument();
        let data_timeout = self.timeouts.data_cycles;
        let mut status = SdStatus::default();
        self.busy()
            .read_register(Some(rca_arg), Command::AppSdStatus, 0, data_timeout, &mut status.data)
            .map_err(Error::Failed)?;
        Ok(status)
    }

    pub(crate) fn read_scr(&mut self) -> Result<Scr, Error> {
        let rca_arg = self.card.rca_argument();
        let data_timeout = self.timeouts.data_cycles;
        let mut scr = Scr::default();
        self.busy()
            .read_register(Some(rca_arg), Command::AppSendScr, 0, data_timeout, &mut scr.data)
            .map_err(Error::Failed)?;
        Ok(scr)
    }

    /// Select the bus width on the card, then on the host.
    pub(crate) fn set_wide_bus(&mut self, width: BusWidth) -> Result<(), Error> {
        let scr = self.read_scr()?;
        let arg = match width {
            BusWidth::Four if scr.supports_wide_bus() => BUS_WIDTH_4BIT_ARG,
            BusWidth::One if scr.supports_single_bus() => BUS_WIDTH_1BIT_ARG,
            _ => return Err(Error::Failed(ErrorCodes::UNSUPPORTED_FEATURE)),
        };
        let rca_arg = self.card.rca_argument();
        self.busy()
            .card_acmd(rca_arg, Command::AppSetBusWidth, arg)
            .map_err(Error::Failed)?;
        self.bus_config.bus_width = width;
        self.bus.configure(&self.bus_config);
        debug!("Bus width {:?}", width);
        Ok(())
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
