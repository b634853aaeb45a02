//! Block transfers: polling, interrupt, DMA and linked-list DMA, plus erase.

use super::busy::{load_word, store_word};
use super::{Callbacks, Error, ErrorCodes, Operation, SdMmc, TransferMode, XferBuffer};
use crate::bus::{DataPath, Direction, Dma, DmaMode, DmaRequest, Flags, KernelClock, Transport};
use crate::card::{CapacityClass, CardState};
#[cfg(feature = "linked-list")]
use crate::linked_list::Queue;
use crate::sdmmc_proto::*;

#[cfg(feature = "log")]
use log::{trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{trace, warn};

/// Interrupts enabled while an interrupt driven read runs.
const READ_IT_INTERRUPTS: Flags = Flags::from_bits_truncate(
    Flags::DATA_CRC_FAIL.bits()
        | Flags::DATA_TIMEOUT.bits()
        | Flags::RX_OVERRUN.bits()
        | Flags::DATA_END.bits()
        | Flags::RX_FIFO_HALF_FULL.bits(),
);

/// Interrupts enabled while an interrupt driven write runs.
const WRITE_IT_INTERRUPTS: Flags = Flags::from_bits_truncate(
    Flags::DATA_CRC_FAIL.bits()
        | Flags::DATA_TIMEOUT.bits()
        | Flags::TX_UNDERRUN.bits()
        | Flags::DATA_END.bits()
        | Flags::TX_FIFO_HALF_EMPTY.bits(),
);

/// Interrupts enabled while a DMA transfer runs. Completion comes from the
/// DMA engine.
const DMA_INTERRUPTS: Flags = Flags::DATA_ERRORS;

fn data_command(direction: Direction, multi_block: bool) -> Command {
    match (direction, multi_block) {
        (Direction::FromCard, false) => Command::ReadSingleBlock,
        (Direction::FromCard, true) => Command::ReadMultipleBlock,
        (Direction::ToCard, false) => Command::WriteSingleBlock,
        (Direction::ToCard, true) => Command::WriteMultipleBlock,
    }
}

impl<'buf, BUS, DMA, CLK, CB> SdMmc<'buf, BUS, DMA, CLK, CB>
where
    BUS: Transport,
    DMA: Dma,
    CLK: KernelClock,
    CB: Callbacks,
{
    /// Check a transfer request, returning its length in bytes.
    fn check_transfer(&self, block_addr: u32, blocks_nbr: u32, buffer_len: usize) -> Result<usize, Error> {
        if blocks_nbr == 0 {
            return Err(Error::InvalidParam);
        }
        let end = block_addr.checked_add(blocks_nbr).ok_or(Error::InvalidParam)?;
        if end > self.card.geometry.logical_block_count {
            return Err(Error::InvalidParam);
        }
        let length = (blocks_nbr as usize)
            .checked_mul(BLOCK_LEN as usize)
            .ok_or(Error::InvalidParam)?;
        if buffer_len < length || length > u32::MAX as usize {
            return Err(Error::InvalidParam);
        }
        Ok(length)
    }

    /// Does this operation end with CMD12?
    pub(super) fn needs_stop(&self, operation: &Operation) -> bool {
        operation.multi_block && self.card.capacity != CapacityClass::SecuredDevice
    }

    fn timed_out(&self, start: u32, timeout_ms: u32) -> bool {
        timeout_ms == 0 || self.bus.get_tick().wrapping_sub(start) >= timeout_ms
    }

    /// Arm the data path and send the read/write command.
    fn start_data_phase(
        &mut self,
        operation: &Operation,
        block_addr: u32,
        length: usize,
        dma: DmaMode,
    ) -> Result<(), ErrorCodes> {
        let path = DataPath::new(
            self.timeouts.data_cycles,
            length as u32,
            BLOCK_LEN,
            operation.direction,
        )
        .with_dma(dma);
        self.bus.arm_data_path(&path);
        let command = data_command(operation.direction, operation.multi_block);
        let arg = self.card.capacity.address(block_addr);
        trace!("{:?} of {} bytes at {:x}", command, length, arg);
        self.busy().card_command(command, arg)
    }

    /// A transfer could not be started: release everything, back to Idle.
    fn abandon(&mut self, codes: ErrorCodes) -> Error {
        let dma_started = matches!(
            self.operation,
            Some(Operation {
                mode: TransferMode::Dma,
                ..
            }) | Some(Operation {
                mode: TransferMode::LinkedList,
                ..
            })
        );
        if dma_started {
            self.dma.abort();
        }
        self.bus.disable_interrupts(Flags::TRANSFER_INTERRUPTS);
        self.bus.disarm_data_path();
        let e = Error::Failed(codes);
        let _ = self.end::<()>(Err(e));
        e
    }

    // ------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------

    /// Read `blocks_nbr` blocks from `block_addr` into `buffer`, spinning
    /// on the FIFO until done or `timeout_ms` has elapsed.
    pub fn read_blocks(
        &mut self,
        buffer: &mut [u8],
        block_addr: u32,
        blocks_nbr: u32,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        let length = self.check_transfer(block_addr, blocks_nbr, buffer.len())?;
        let operation = Operation {
            direction: Direction::FromCard,
            multi_block: blocks_nbr > 1,
            mode: TransferMode::Polling,
        };
        self.begin(Some(operation))?;
        let result = self.poll_read(&operation, &mut buffer[..length], block_addr, timeout_ms);
        self.bus.disarm_data_path();
        self.end(result)
    }

    fn poll_read(
        &mut self,
        operation: &Operation,
        buffer: &mut [u8],
        block_addr: u32,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        let start = self.bus.get_tick();
        self.start_data_phase(operation, block_addr, buffer.len(), DmaMode::Disabled)
            .map_err(Error::Failed)?;

        let finished = Flags::RX_OVERRUN | Flags::DATA_CRC_FAIL | Flags::DATA_TIMEOUT | Flags::DATA_END;
        let mut pos = 0;
        while !self.bus.is_flag_active(finished) {
            if self.bus.is_flag_active(Flags::RX_FIFO_HALF_FULL) && buffer.len() - pos >= FIFO_BURST_BYTES {
                for _ in 0..FIFO_BURST_WORDS {
                    let word = self.bus.read_fifo();
                    pos += store_word(buffer, pos, word);
                }
            }
            if self.timed_out(start, timeout_ms) {
                return Err(Error::Timeout);
            }
        }
        self.finish_polled(operation)
    }

    /// Write `blocks_nbr` blocks from `buffer` at `block_addr`, spinning on
    /// the FIFO until done or `timeout_ms` has elapsed.
    pub fn write_blocks(
        &mut self,
        buffer: &[u8],
        block_addr: u32,
        blocks_nbr: u32,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        let length = self.check_transfer(block_addr, blocks_nbr, buffer.len())?;
        let operation = Operation {
            direction: Direction::ToCard,
            multi_block: blocks_nbr > 1,
            mode: TransferMode::Polling,
        };
        self.begin(Some(operation))?;
        let result = self.poll_write(&operation, &buffer[..length], block_addr, timeout_ms);
        self.bus.disarm_data_path();
        self.end(result)
    }

    fn poll_write(
        &mut self,
        operation: &Operation,
        buffer: &[u8],
        block_addr: u32,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        let start = self.bus.get_tick();
        self.start_data_phase(operation, block_addr, buffer.len(), DmaMode::Disabled)
            .map_err(Error::Failed)?;

        let finished = Flags::TX_UNDERRUN | Flags::DATA_CRC_FAIL | Flags::DATA_TIMEOUT | Flags::DATA_END;
        let mut pos = 0;
        while !self.bus.is_flag_active(finished) {
            if self.bus.is_flag_active(Flags::TX_FIFO_HALF_EMPTY) && buffer.len() - pos >= FIFO_BURST_BYTES {
                for _ in 0..FIFO_BURST_WORDS {
                    let (word, count) = load_word(buffer, pos);
                    self.bus.write_fifo(word);
                    pos += count;
                }
            }
            if self.timed_out(start, timeout_ms) {
                return Err(Error::Timeout);
            }
        }
        self.finish_polled(operation)
    }

    fn finish_polled(&mut self, operation: &Operation) -> Result<(), Error> {
        if self.bus.is_flag_active(Flags::DATA_END) && self.needs_stop(operation) {
            let timeout = self.timeouts.stop_transfer_ms;
            self.busy().stop_transmission(timeout).map_err(Error::Failed)?;
        }
        let errors = self.busy().data_errors(ErrorCodes::DATA_TIMEOUT);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Failed(errors))
        }
    }

    // ------------------------------------------------------------------
    // Interrupt
    // ------------------------------------------------------------------

    /// Start reading `blocks_nbr` blocks into `buffer`. The FIFO is serviced
    /// by [`SdMmc::irq_handler`]; completion is reported through
    /// [`Callbacks::transfer_complete`](super::Callbacks::transfer_complete).
    pub fn read_blocks_it(&mut self, buffer: &'buf mut [u8], block_addr: u32, blocks_nbr: u32) -> Result<(), Error> {
        let length = self.check_transfer(block_addr, blocks_nbr, buffer.len())?;
        let operation = Operation {
            direction: Direction::FromCard,
            multi_block: blocks_nbr > 1,
            mode: TransferMode::Interrupt,
        };
        self.begin(Some(operation))?;
        let (buffer, _) = buffer.split_at_mut(length);
        self.buffer = Some(XferBuffer::Read(buffer));
        self.cursor = 0;
        if let Err(codes) = self.start_data_phase(&operation, block_addr, length, DmaMode::Disabled) {
            return Err(self.abandon(codes));
        }
        self.bus.enable_interrupts(READ_IT_INTERRUPTS);
        Ok(())
    }

    /// Start writing `blocks_nbr` blocks from `buffer`. The FIFO is serviced
    /// by [`SdMmc::irq_handler`].
    pub fn write_blocks_it(&mut self, buffer: &'buf [u8], block_addr: u32, blocks_nbr: u32) -> Result<(), Error> {
        let length = self.check_transfer(block_addr, blocks_nbr, buffer.len())?;
        let operation = Operation {
            direction: Direction::ToCard,
            multi_block: blocks_nbr > 1,
            mode: TransferMode::Interrupt,
        };
        self.begin(Some(operation))?;
        self.buffer = Some(XferBuffer::Write(&buffer[..length]));
        self.cursor = 0;
        if let Err(codes) = self.start_data_phase(&operation, block_addr, length, DmaMode::Disabled) {
            return Err(self.abandon(codes));
        }
        self.bus.enable_interrupts(WRITE_IT_INTERRUPTS);
        Ok(())
    }

    // ------------------------------------------------------------------
    // DMA
    // ------------------------------------------------------------------

    /// Start reading `blocks_nbr` blocks into `buffer` by DMA.
    pub fn read_blocks_dma(&mut self, buffer: &'buf mut [u8], block_addr: u32, blocks_nbr: u32) -> Result<(), Error> {
        let length = self.check_transfer(block_addr, blocks_nbr, buffer.len())?;
        let operation = Operation {
            direction: Direction::FromCard,
            multi_block: blocks_nbr > 1,
            mode: TransferMode::Dma,
        };
        self.begin(Some(operation))?;
        let (buffer, _) = buffer.split_at_mut(length);
        let request = DmaRequest::Linear {
            direction: Direction::FromCard,
            memory: buffer.as_mut_ptr() as usize,
            length: length as u32,
        };
        self.buffer = Some(XferBuffer::Read(buffer));
        self.start_dma(&operation, &request, block_addr, length, DmaMode::Linear)
    }

    /// Start writing `blocks_nbr` blocks from `buffer` by DMA.
    pub fn write_blocks_dma(&mut self, buffer: &'buf [u8], block_addr: u32, blocks_nbr: u32) -> Result<(), Error> {
        let length = self.check_transfer(block_addr, blocks_nbr, buffer.len())?;
        let operation = Operation {
            direction: Direction::ToCard,
            multi_block: blocks_nbr > 1,
            mode: TransferMode::Dma,
        };
        self.begin(Some(operation))?;
        let buffer = &buffer[..length];
        let request = DmaRequest::Linear {
            direction: Direction::ToCard,
            memory: buffer.as_ptr() as usize,
            length: length as u32,
        };
        self.buffer = Some(XferBuffer::Write(buffer));
        self.start_dma(&operation, &request, block_addr, length, DmaMode::Linear)
    }

    fn start_dma(
        &mut self,
        operation: &Operation,
        request: &DmaRequest,
        block_addr: u32,
        length: usize,
        mode: DmaMode,
    ) -> Result<(), Error> {
        if self.dma.start(request).is_err() {
            warn!("DMA start failed");
            return Err(self.abandon(ErrorCodes::DMA));
        }
        if let Err(codes) = self.start_data_phase(operation, block_addr, length, mode) {
            return Err(self.abandon(codes));
        }
        self.bus.enable_interrupts(DMA_INTERRUPTS);
        if mode == DmaMode::LinkedList {
            self.bus.enable_interrupts(Flags::IDMA_BUFFER_COMPLETE);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Linked-list DMA
    // ------------------------------------------------------------------

    /// Start reading `blocks_nbr` blocks into the buffers of `queue`.
    ///
    /// Each filled node is reported with
    /// [`TransferEvent::RxNodeComplete`](super::TransferEvent::RxNodeComplete),
    /// then the whole transfer with `RxComplete`.
    #[cfg(feature = "linked-list")]
    pub fn read_blocks_linked_list(&mut self, queue: Queue<'buf>, block_addr: u32, blocks_nbr: u32) -> Result<(), Error> {
        self.start_linked_list(queue, Direction::FromCard, block_addr, blocks_nbr)
    }

    /// Start writing `blocks_nbr` blocks from the buffers of `queue`.
    #[cfg(feature = "linked-list")]
    pub fn write_blocks_linked_list(&mut self, queue: Queue<'buf>, block_addr: u32, blocks_nbr: u32) -> Result<(), Error> {
        self.start_linked_list(queue, Direction::ToCard, block_addr, blocks_nbr)
    }

    #[cfg(feature = "linked-list")]
    fn start_linked_list(
        &mut self,
        queue: Queue<'buf>,
        direction: Direction,
        block_addr: u32,
        blocks_nbr: u32,
    ) -> Result<(), Error> {
        let total = queue.total_size().ok_or(Error::InvalidParam)?;
        let length = self.check_transfer(block_addr, blocks_nbr, total as usize)?;
        // Linked-list transfers always use the multiple block commands
        let operation = Operation {
            direction,
            multi_block: true,
            mode: TransferMode::LinkedList,
        };
        self.begin(Some(operation))?;
        let request = queue.dma_request(direction);
        self.queue = Some(queue);
        self.start_dma(&operation, &request, block_addr, length, DmaMode::LinkedList)
    }

    // ------------------------------------------------------------------
    // Erase
    // ------------------------------------------------------------------

    /// Erase the blocks from `start_block_addr` to `end_block_addr`.
    pub fn erase(&mut self, start_block_addr: u32, end_block_addr: u32) -> Result<(), Error> {
        if end_block_addr < start_block_addr
            || end_block_addr > self.card.geometry.logical_block_count
        {
            return Err(Error::InvalidParam);
        }
        self.begin(None)?;
        let result = self.run_erase(start_block_addr, end_block_addr);
        self.end(result)
    }

    fn run_erase(&mut self, start_block_addr: u32, end_block_addr: u32) -> Result<(), Error> {
        let rca_arg = self.card.rca_argument();
        let start = self.card.capacity.address(start_block_addr);
        let end = self.card.capacity.address(end_block_addr);
        let erase_timeout = self.timeouts.erase_ms;
        let mut busy = self.busy();

        let status = busy.card_status(rca_arg).map_err(Error::Failed)?;
        if CardState::from_card_status(status) != CardState::Transfer {
            return Err(Error::Failed(ErrorCodes::REQUEST_NOT_APPLICABLE));
        }
        busy.card_command(Command::EraseWrBlkStart, start)
            .map_err(Error::Failed)?;
        busy.card_command(Command::EraseWrBlkEnd, end)
            .map_err(Error::Failed)?;
        busy.card_command_timeout(Command::Erase, 0, erase_timeout)
            .map_err(Error::Failed)?;
        trace!("Erased {:x}..{:x}", start, end);
        Ok(())
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
