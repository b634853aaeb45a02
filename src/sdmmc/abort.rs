//! Cancelling a transfer in flight.

use super::{Callbacks, Error, ErrorCodes, SdMmc, State, TransferMode};
use crate::bus::{Direction, Dma, Flags, KernelClock, Transport};
use crate::card::CardState;

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

impl<'buf, BUS, DMA, CLK, CB> SdMmc<'buf, BUS, DMA, CLK, CB>
where
    BUS: Transport,
    DMA: Dma,
    CLK: KernelClock,
    CB: Callbacks,
{
    fn claim_for_abort(&mut self) -> Result<(), Error> {
        if self.state != State::Active {
            return Err(Error::Busy);
        }
        self.state = State::Aborting;
        self.bus.disable_interrupts(Flags::TRANSFER_INTERRUPTS);
        Ok(())
    }

    fn dma_in_use(&self) -> bool {
        matches!(
            self.operation.map(|operation| operation.mode),
            Some(TransferMode::Dma) | Some(TransferMode::LinkedList)
        )
    }

    fn abort_failed(&mut self, e: Error) -> Result<(), Error> {
        self.record(e);
        self.bus.disarm_data_path();
        self.bus.clear_flags(Flags::STATIC_DATA_FLAGS);
        self.operation = None;
        self.state = State::Idle;
        Err(e)
    }

    /// Wait, with the data timeout, for the data path to settle once the
    /// transfer has been stopped (or found already finished).
    pub(super) fn wait_quiescent(&mut self, stopped: bool) -> Result<(), Error> {
        let direction = self.operation.map(|operation| operation.direction);
        let until = match direction {
            Some(Direction::ToCard) if stopped => Flags::DATA_ABORT | Flags::BUSY_D0_END,
            Some(Direction::ToCard) => Flags::DATA_END,
            _ => Flags::DATA_ABORT | Flags::DATA_END,
        };
        let data_timeout = self.timeouts.data_cycles;
        if self.busy().wait_flag_ticks(until, data_timeout) {
            Ok(())
        } else {
            Err(Error::Failed(ErrorCodes::TIMEOUT))
        }
    }

    /// Cancel the transfer in flight and wait until the card has stopped.
    pub fn abort(&mut self) -> Result<(), Error> {
        self.claim_for_abort()?;
        if self.dma_in_use() {
            self.dma.abort();
        }

        let timeout = self.timeouts.stop_transfer_ms;
        let stopped = match self.busy().stop_transmission(timeout) {
            Ok(()) => true,
            // The card was not sending or receiving
            Err(ErrorCodes::CMD_RSP_TIMEOUT) => false,
            Err(codes) => return self.abort_failed(Error::Failed(codes)),
        };
        if let Err(e) = self.wait_quiescent(stopped) {
            return self.abort_failed(e);
        }

        self.bus.clear_flags(Flags::BUSY_D0_END | Flags::STATIC_FLAGS);
        self.bus.disarm_data_path();
        self.operation = None;
        self.state = State::Idle;
        debug!("Transfer aborted");
        Ok(())
    }

    /// Cancel the transfer in flight without waiting for the DMA engine.
    ///
    /// [`Callbacks::abort_complete`](super::Callbacks::abort_complete) runs
    /// once everything has stopped. With DMA that is after the DMA engine
    /// has reported back through [`SdMmc::dma_abort_complete`]. If the stop
    /// command fails, or the data path never settles, the error is returned
    /// (or passed to [`Callbacks::error`](super::Callbacks::error) for DMA)
    /// and the abort callback does not run.
    pub fn abort_it(&mut self) -> Result<(), Error> {
        self.claim_for_abort()?;

        let rca_arg = self.card.rca_argument();
        let timeout = self.timeouts.stop_transfer_ms;
        let mut busy = self.busy();
        let transferring = match busy.card_status(rca_arg) {
            Ok(status) => matches!(
                CardState::from_card_status(status),
                CardState::Sending | CardState::Receiving
            ),
            Err(_) => false,
        };
        let stopped = if transferring {
            match busy.stop_transmission(timeout) {
                Ok(()) => true,
                Err(ErrorCodes::CMD_RSP_TIMEOUT) => false,
                Err(codes) => return self.abort_failed(Error::Failed(codes)),
            }
        } else {
            false
        };

        if self.dma_in_use() {
            match self.dma.abort_it() {
                Ok(()) => {
                    self.dma_abort_stopped = Some(stopped);
                    return Ok(());
                }
                Err(_) => return self.abort_failed(Error::Failed(ErrorCodes::DMA)),
            }
        }
        if let Err(e) = self.wait_quiescent(stopped) {
            return self.abort_failed(e);
        }
        self.finish_abort_it();
        Ok(())
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
