//! Interrupt and DMA completion handling.

use super::busy::{load_word, store_word};
use super::{Callbacks, Error, ErrorCodes, Operation, SdMmc, State, TransferEvent, TransferMode, XferBuffer};
use crate::bus::{Direction, Dma, Flags, KernelClock, Transport};
use crate::sdmmc_proto::*;

#[cfg(feature = "log")]
use log::{trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{trace, warn};

fn uses_dma(operation: &Operation) -> bool {
    matches!(operation.mode, TransferMode::Dma | TransferMode::LinkedList)
}

fn completion_event(operation: &Operation) -> TransferEvent {
    match operation.direction {
        Direction::ToCard => TransferEvent::TxComplete,
        Direction::FromCard => TransferEvent::RxComplete,
    }
}

impl<'buf, BUS, DMA, CLK, CB> SdMmc<'buf, BUS, DMA, CLK, CB>
where
    BUS: Transport,
    DMA: Dma,
    CLK: KernelClock,
    CB: Callbacks,
{
    /// Service the host controller interrupt.
    ///
    /// Call this from the SDMMC interrupt vector. It moves FIFO data for
    /// interrupt transfers and finishes transfers on data end or error.
    pub fn irq_handler(&mut self) {
        let operation = match (self.state, self.operation) {
            (State::Active, Some(operation)) => operation,
            _ => return,
        };

        if self.is_pending(Flags::RX_FIFO_HALF_FULL) {
            self.pump_rx_fifo();
        } else if self.is_pending(Flags::TX_FIFO_HALF_EMPTY) {
            self.pump_tx_fifo();
        }

        // An error raised alongside data end still fails the transfer
        if self.is_pending(Flags::DATA_ERRORS) {
            let codes = self.busy().data_errors(ErrorCodes::DATA_TIMEOUT);
            self.fail_transfer(operation, codes);
            return;
        }

        if self.is_pending(Flags::DATA_END) {
            self.bus.clear_flags(Flags::DATA_END);
            self.complete_transfer(operation);
            return;
        }

        if self.is_pending(Flags::IDMA_BUFFER_COMPLETE) {
            self.bus.clear_flags(Flags::IDMA_BUFFER_COMPLETE);
            let event = match operation.direction {
                Direction::ToCard => TransferEvent::TxNodeComplete,
                Direction::FromCard => TransferEvent::RxNodeComplete,
            };
            self.callbacks.transfer_complete(event);
        }
    }

    /// The DMA engine has finished moving the data of a DMA or linked-list
    /// transfer.
    pub fn dma_transfer_complete(&mut self) {
        if let (State::Active, Some(operation)) = (self.state, self.operation) {
            if uses_dma(&operation) {
                self.complete_transfer(operation);
            }
        }
    }

    /// The DMA engine reported an error.
    pub fn dma_transfer_error(&mut self) {
        if let (State::Active, Some(operation)) = (self.state, self.operation) {
            if uses_dma(&operation) {
                self.fail_transfer(operation, ErrorCodes::DMA);
            }
        }
    }

    /// The DMA engine has finished the abort started by
    /// [`SdMmc::abort_it`].
    ///
    /// If the data path never settles, the abort fails and
    /// [`Callbacks::error`] gets [`ErrorCodes::TIMEOUT`] instead of
    /// [`Callbacks::abort_complete`].
    pub fn dma_abort_complete(&mut self) {
        let stopped = match self.dma_abort_stopped.take() {
            Some(stopped) => stopped,
            None => return,
        };
        if let Err(e) = self.wait_quiescent(stopped) {
            self.record(e);
            self.bus.disarm_data_path();
            self.release();
            self.callbacks.error(ErrorCodes::TIMEOUT);
            return;
        }
        self.finish_abort_it();
    }

    fn is_pending(&self, flags: Flags) -> bool {
        let enabled = flags & self.bus.enabled_interrupts();
        !enabled.is_empty() && self.bus.is_flag_active(enabled)
    }

    fn pump_rx_fifo(&mut self) {
        if let Some(XferBuffer::Read(buffer)) = self.buffer.as_mut() {
            if buffer.len() - self.cursor >= FIFO_BURST_BYTES {
                for _ in 0..FIFO_BURST_WORDS {
                    let word = self.bus.read_fifo();
                    self.cursor += store_word(buffer, self.cursor, word);
                }
            }
            if buffer.len() - self.cursor < FIFO_BURST_BYTES {
                self.bus.disable_interrupts(Flags::RX_FIFO_HALF_FULL);
            }
        }
    }

    fn pump_tx_fifo(&mut self) {
        if let Some(XferBuffer::Write(buffer)) = self.buffer.as_ref() {
            if buffer.len() - self.cursor >= FIFO_BURST_BYTES {
                for _ in 0..FIFO_BURST_WORDS {
                    let (word, count) = load_word(buffer, self.cursor);
                    self.bus.write_fifo(word);
                    self.cursor += count;
                }
            }
            if buffer.len() - self.cursor < FIFO_BURST_BYTES {
                self.bus.disable_interrupts(Flags::TX_FIFO_HALF_EMPTY);
            }
        }
    }

    /// Read whatever the card left in the FIFO when it signalled data end.
    fn drain_rx_fifo(&mut self) {
        if let Some(XferBuffer::Read(buffer)) = self.buffer.as_mut() {
            while self.cursor < buffer.len() && !self.bus.is_flag_active(Flags::RX_FIFO_EMPTY) {
                let word = self.bus.read_fifo();
                self.cursor += store_word(buffer, self.cursor, word);
            }
        }
    }

    fn release(&mut self) {
        self.bus.clear_flags(Flags::STATIC_DATA_FLAGS);
        self.operation = None;
        self.state = State::Idle;
    }

    fn complete_transfer(&mut self, operation: Operation) {
        self.bus.disable_interrupts(Flags::TRANSFER_INTERRUPTS);
        if operation.mode == TransferMode::Interrupt && operation.direction == Direction::FromCard {
            self.drain_rx_fifo();
        }
        self.bus.disarm_data_path();

        if self.needs_stop(&operation) {
            let timeout = self.timeouts.stop_transfer_ms;
            if let Err(codes) = self.busy().stop_transmission(timeout) {
                self.record(Error::Failed(codes));
                self.release();
                self.callbacks.error(codes);
                return;
            }
        }

        self.release();
        trace!("{:?} transfer done", operation.mode);
        self.callbacks.transfer_complete(completion_event(&operation));
    }

    fn fail_transfer(&mut self, operation: Operation, mut codes: ErrorCodes) {
        warn!("{:?} transfer failed", operation.mode);
        self.bus.clear_flags(Flags::STATIC_DATA_FLAGS);
        self.bus.disable_interrupts(Flags::TRANSFER_INTERRUPTS);
        self.bus.disarm_data_path();
        if uses_dma(&operation) {
            self.dma.abort();
        }
        let timeout = self.timeouts.stop_transfer_ms;
        match self.busy().stop_transmission(timeout) {
            // Nothing left to stop
            Ok(()) | Err(ErrorCodes::CMD_RSP_TIMEOUT) => {}
            Err(e) => codes |= e,
        }
        self.record(Error::Failed(codes));
        self.bus.clear_flags(Flags::DATA_ABORT);
        self.release();
        self.callbacks.error(codes);
    }

    pub(super) fn finish_abort_it(&mut self) {
        self.bus.disarm_data_path();
        self.bus.clear_flags(Flags::STATIC_FLAGS);
        self.operation = None;
        self.state = State::Idle;
        self.callbacks.abort_complete();
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
