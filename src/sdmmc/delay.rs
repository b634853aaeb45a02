//! Delay block tuning, for sampling with the feedback clock.
//!
//! The delay block delays the bus clock by a number of unit cells. Tuning
//! picks the unit length so that the whole line covers one clock period,
//! after which the output phase can be chosen in unit cells.

use super::{Callbacks, Error, ErrorCodes, SdMmc};
use crate::bus::{DelayLine, Dma, KernelClock, Transport};

#[cfg(feature = "log")]
use log::{debug, trace};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace};

/// Number of unit lengths tried while tuning.
const MAX_UNIT: u8 = 128;

/// Phase selected while the line length is measured. Also the largest
/// phase that can be programmed.
const MAX_TUNING_PHASE: u8 = 12;

/// Largest phase reported by [`SdMmc::max_delay_block_phase`].
const MAX_USED_PHASE: u8 = 10;

/// Tuning gives up after this many ms.
const TUNING_TIMEOUT_MS: u32 = 255;

const LENGTH_LOW_MASK: u16 = 0x07FF;
const LENGTH_TOP_MASK: u16 = 0x0C00;

/// Does the measured line cover exactly one clock period?
fn covers_one_period(length: u16) -> bool {
    length & LENGTH_LOW_MASK != 0 && length & LENGTH_TOP_MASK != LENGTH_TOP_MASK
}

/// How many unit cells span one clock period.
fn max_phase(length: u16) -> u8 {
    let mut max = MAX_USED_PHASE;
    while max > 0 && (length >> max) == 0 {
        max -= 1;
    }
    max
}

impl<'buf, BUS, DMA, CLK, CB> SdMmc<'buf, BUS, DMA, CLK, CB>
where
    BUS: Transport,
    DMA: Dma,
    CLK: KernelClock,
    CB: Callbacks,
{
    /// Turn the delay block on.
    pub fn enable_delay_block(&mut self) -> Result<(), Error> {
        self.check_idle()?;
        self.bus.set_delay_block(true);
        Ok(())
    }

    /// Turn the delay block off.
    pub fn disable_delay_block(&mut self) -> Result<(), Error> {
        self.check_idle()?;
        self.bus.set_delay_block(false);
        Ok(())
    }

    /// Is the delay block on?
    pub fn is_delay_block_enabled(&self) -> bool {
        self.bus.is_delay_block_enabled()
    }

    /// The output clock phase currently programmed, in unit cells.
    pub fn delay_block_phase(&self) -> u8 {
        self.bus.delay_line().phase
    }

    /// Tune the unit length for the current bus clock, then delay the
    /// output clock by `phase` unit cells.
    ///
    /// `phase` should not exceed [`SdMmc::max_delay_block_phase`]. The
    /// delay block is left on or off, as it was.
    pub fn set_delay_block_phase(&mut self, phase: u8) -> Result<(), Error> {
        self.check_idle()?;
        if phase > MAX_TUNING_PHASE {
            return Err(Error::InvalidParam);
        }
        let was_enabled = self.bus.is_delay_block_enabled();
        self.bus.set_delay_block(true);
        let result = self.tune_unit().map(|unit| {
            self.bus.set_delay_line(DelayLine { unit, phase });
            debug!("Delay block unit {}, phase {}", unit, phase);
        });
        if !was_enabled {
            self.bus.set_delay_block(false);
        }
        if let Err(e) = result {
            self.record(e);
        }
        result
    }

    /// How many unit cells span one bus clock period, which is the largest
    /// useful output phase. The programmed delay line is kept.
    pub fn max_delay_block_phase(&mut self) -> Result<u8, Error> {
        self.begin(None)?;
        let was_enabled = self.bus.is_delay_block_enabled();
        let saved = self.bus.delay_line();
        self.bus.set_delay_block(true);

        let result = self.tune_unit().and_then(|_| {
            self.bus
                .delay_line_length()
                .map(max_phase)
                .ok_or(Error::Failed(ErrorCodes::TIMEOUT))
        });

        self.bus.set_delay_line(saved);
        if !was_enabled {
            self.bus.set_delay_block(false);
        }
        self.end(result)
    }

    /// Find the shortest unit length whose line covers one clock period.
    /// The longest unit is kept if none does.
    fn tune_unit(&mut self) -> Result<u8, Error> {
        let start = self.bus.get_tick();
        for unit in 0..MAX_UNIT {
            self.bus.set_delay_line(DelayLine {
                unit,
                phase: MAX_TUNING_PHASE,
            });
            let length = loop {
                if let Some(length) = self.bus.delay_line_length() {
                    break length;
                }
                if self.bus.get_tick().wrapping_sub(start) >= TUNING_TIMEOUT_MS {
                    return Err(Error::Failed(ErrorCodes::TIMEOUT));
                }
            };
            if covers_one_period(length) {
                trace!("Delay line length {:x} with unit {}", length, unit);
                return Ok(unit);
            }
        }
        Ok(MAX_UNIT - 1)
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
