//! Card identification and bus configuration.

use embedded_hal::blocking::delay::DelayMs;

use super::{default_bus_config, Callbacks, Config, Error, ErrorCodes, SdMmc, State, Transceiver};
use crate::bus::{Dma, Flags, KernelClock, Transport, VoltageSwitch};
use crate::card::{CapacityClass, Cid, Csd, SpeedClass};
use crate::sdmmc_proto::*;

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// Bus clock divider for `target_hz`: `ceil(kernel / (2 * target))`, or 0
/// (bypass) when the kernel clock is not fast enough to divide.
pub(crate) fn divider_for(kernel_hz: u32, target_hz: u32) -> u32 {
    let kernel = u64::from(kernel_hz);
    let twice_target = 2 * u64::from(target_hz);
    if twice_target == 0 || twice_target > kernel {
        0
    } else {
        ((kernel + twice_target - 1) / twice_target) as u32
    }
}

/// Bus clock divider for the requested clock, bounded by what the speed
/// class allows.
pub(crate) fn clock_divider(kernel_hz: u32, requested_hz: u32, speed: SpeedClass) -> Result<u32, Error> {
    let max_hz = speed.max_clock_hz();
    let target_hz = if cfg!(feature = "auto-clock-detection") {
        max_hz
    } else if requested_hz == 0 || requested_hz > max_hz {
        return Err(Error::InvalidParam);
    } else {
        requested_hz
    };
    Ok(divider_for(kernel_hz, target_hz))
}

fn check_config(config: &Config) -> Result<(), Error> {
    if !cfg!(feature = "auto-clock-detection") && config.clock_hz == 0 {
        Err(Error::InvalidParam)
    } else {
        Ok(())
    }
}

impl<'buf, BUS, DMA, CLK, CB> SdMmc<'buf, BUS, DMA, CLK, CB>
where
    BUS: Transport,
    DMA: Dma,
    CLK: KernelClock,
    CB: Callbacks,
{
    /// Power the card up, identify it and apply `config`.
    ///
    /// An identified card (`Idle`) may be configured again, which runs the
    /// whole sequence from power-up. On failure the controller is left in
    /// `CardRemoved`.
    pub fn set_config<D>(&mut self, config: Config, delay: &mut D) -> Result<(), Error>
    where
        D: DelayMs<u32>,
    {
        match self.state {
            State::Reset => self.clock.enable(),
            State::Initialized | State::Idle | State::CardRemoved => {}
            _ => return Err(Error::Busy),
        }
        check_config(&config)?;
        self.config = config;
        self.card = Default::default();
        self.cid = None;

        let result = self
            .power_up(delay)
            .and_then(|_| self.identify_voltage_range())
            .and_then(|_| self.identify_card())
            .and_then(|_| self.apply_config());
        self.finish_identification(result)
    }

    /// A card was inserted: identify it and apply `config`. Power-up and
    /// the voltage negotiation are skipped.
    pub fn notify_card_insertion(&mut self, config: Config) -> Result<(), Error> {
        match self.state {
            State::CardRemoved | State::Idle => {}
            _ => return Err(Error::Busy),
        }
        check_config(&config)?;
        debug!("Card inserted");
        self.config = config;
        // The new card starts on a 1-bit bus at the identification clock
        self.bus_config = default_bus_config(self.clock.kernel_clock_hz());
        self.bus.configure(&self.bus_config);
        let result = self.identify_card().and_then(|_| self.apply_config());
        self.finish_identification(result)
    }

    fn finish_identification(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        self.bus.clear_flags(Flags::STATIC_FLAGS);
        match result {
            Ok(()) => {
                debug!(
                    "Card ready: {:?}, {} blocks, {:?}",
                    self.card.capacity, self.card.geometry.logical_block_count, self.card.speed
                );
                self.state = State::Idle;
                Ok(())
            }
            Err(e) => {
                self.record(e);
                warn!("Identification failed: {:?}", e);
                self.state = State::CardRemoved;
                Err(e)
            }
        }
    }

    /// Polls allowed for a busy-wait lasting `CMD_TIMEOUT_MS`.
    fn poll_budget(&self) -> u32 {
        CMD_TIMEOUT_MS.saturating_mul(self.clock.kernel_clock_hz() / 22 / 1000)
    }

    fn power_up<D>(&mut self, delay: &mut D) -> Result<(), Error>
    where
        D: DelayMs<u32>,
    {
        let kernel_hz = self.clock.kernel_clock_hz();
        if kernel_hz == 0 {
            return Err(Error::Failed(ErrorCodes::INVALID_PARAMETER));
        }
        self.bus_config = default_bus_config(kernel_hz);
        self.bus.configure(&self.bus_config);
        self.bus.power_on();
        // 74 identification clock cycles, rounded up to whole milliseconds
        delay.delay_ms(1 + (74 * 1000) / INIT_FREQ_HZ);
        Ok(())
    }

    fn identify_voltage_range(&mut self) -> Result<(), Error> {
        let mut busy = self.busy();
        busy.card_command(Command::GoIdleState, 0).map_err(Error::Failed)?;
        let legacy = match busy.card_command(Command::SendIfCond, IF_COND_PATTERN) {
            Ok(()) => false,
            Err(ErrorCodes::CMD_RSP_TIMEOUT) => {
                debug!("No answer to CMD8, version 1.x card");
                busy.card_command(Command::GoIdleState, 0).map_err(Error::Failed)?;
                true
            }
            Err(e) => return Err(Error::Failed(e)),
        };

        let arg = OCR_VOLTAGE_WINDOW | OCR_HIGH_CAPACITY | OCR_SWITCH_1_8V;
        let mut ocr = 0;
        let mut trials = 0;
        while ocr & OCR_POWER_UP_DONE == 0 {
            if trials == MAX_VOLT_TRIAL {
                return Err(Error::Failed(ErrorCodes::INVALID_VOLTRANGE));
            }
            trials += 1;
            busy.card_acmd(0, Command::AppSendOpCond, arg)
                .map_err(Error::Failed)?;
            ocr = busy.response();
        }
        trace!("OCR {:x} after {} trials", ocr, trials);

        self.card.capacity = if ocr & OCR_HIGH_CAPACITY != 0 {
            CapacityClass::HighOrExtendedCapacity
        } else {
            CapacityClass::StandardCapacity
        };
        debug!("Card is {:?} (legacy: {})", self.card.capacity, legacy);

        if self.card.capacity == CapacityClass::HighOrExtendedCapacity
            && ocr & OCR_SWITCH_1_8V != 0
            && self.config.transceiver == Transceiver::Present
        {
            self.switch_to_1v8()?;
        }
        Ok(())
    }

    fn switch_to_1v8(&mut self) -> Result<(), Error> {
        debug!("Switching to 1.8V signalling");
        let budget = self.poll_budget();
        self.bus.set_voltage_switch(VoltageSwitch::Armed);
        let result = self.run_voltage_switch(budget);
        self.bus.set_voltage_switch(VoltageSwitch::Disabled);
        self.bus.clear_flags(Flags::STATIC_FLAGS);
        result
    }

    fn run_voltage_switch(&mut self, budget: u32) -> Result<(), Error> {
        self.busy()
            .card_command(Command::VoltageSwitch, 0)
            .map_err(Error::Failed)?;
        if !self.busy().wait_flag(Flags::CLOCK_STOP, budget) {
            return Err(Error::Failed(ErrorCodes::TIMEOUT));
        }
        self.bus.clear_flags(Flags::CLOCK_STOP);
        // The card holds DAT0 low until it has switched
        if !self.bus.is_flag_active(Flags::BUSY_D0) {
            return Err(Error::Failed(ErrorCodes::UNSUPPORTED_FEATURE));
        }
        self.callbacks.drive_transceiver(true);
        self.bus.set_voltage_switch(VoltageSwitch::Started);
        if !self.busy().wait_flag(Flags::VOLTAGE_SWITCH_END, budget) {
            return Err(Error::Failed(ErrorCodes::TIMEOUT));
        }
        if self.bus.is_flag_active(Flags::BUSY_D0) {
            return Err(Error::Failed(ErrorCodes::INVALID_VOLTRANGE));
        }
        Ok(())
    }

    /// CID, RCA, CSD, select, SD status.
    fn identify_card(&mut self) -> Result<(), Error> {
        let budget = self.poll_budget();
        let capacity = self.card.capacity;
        let mut busy = self.busy();

        busy.card_command(Command::AllSendCid, 0).map_err(Error::Failed)?;
        let cid = Cid::from_response(busy.long_response());

        let mut rca = 0u16;
        let mut polls = 0;
        while rca == 0 {
            if polls == budget {
                return Err(Error::Failed(ErrorCodes::TIMEOUT));
            }
            polls += 1;
            busy.card_command(Command::SendRelativeAddr, 0)
                .map_err(Error::Failed)?;
            rca = (busy.response() >> 16) as u16;
        }
        let rca_arg = u32::from(rca) << 16;

        busy.card_command(Command::SendCsd, rca_arg)
            .map_err(Error::Failed)?;
        let csd = Csd::from_response(capacity, busy.long_response());
        let geometry = csd
            .geometry()
            .ok_or(Error::Failed(ErrorCodes::UNSUPPORTED_FEATURE))?;

        busy.card_command(Command::SelectCard, rca_arg)
            .map_err(Error::Failed)?;

        self.card.relative_address = rca;
        self.card.geometry = geometry;
        if cfg!(feature = "card-cid") {
            self.cid = Some(cid);
        }
        debug!("RCA {:x}, geometry {:?}", rca, geometry);

        let status = self.read_sd_status()?;
        self.card.speed = SpeedClass::from_status(capacity, &status);
        self.busy()
            .card_command(Command::SetBlockLen, BLOCK_LEN)
            .map_err(Error::Failed)?;
        Ok(())
    }

    /// SCR, bus width, clock, block length.
    fn apply_config(&mut self) -> Result<(), Error> {
        #[cfg(feature = "spec-version")]
        {
            let scr = self.read_scr()?;
            self.spec_version = scr.spec_version();
            debug!("Physical layer version {:?}", self.spec_version);
        }

        if self.config.bus_width != self.bus_config.bus_width {
            self.set_wide_bus(self.config.bus_width)?;
        }

        let kernel_hz = self.clock.kernel_clock_hz();
        let clock_divider = clock_divider(kernel_hz, self.config.clock_hz, self.card.speed)?;
        self.bus_config.clock_edge = self.config.clock_edge;
        self.bus_config.power_save = self.config.power_save;
        self.bus_config.flow_control = self.config.flow_control;
        self.bus_config.clock_divider = clock_divider;
        self.bus.configure(&self.bus_config);
        trace!("Clock divider {}", clock_divider);

        self.busy()
            .card_command(Command::SetBlockLen, BLOCK_LEN)
            .map_err(Error::Failed)
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
