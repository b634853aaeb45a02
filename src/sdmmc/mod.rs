//! embedded-sdmmc-host - SDMMC Protocol
//!
//! Implements the SD protocol on a native SD host controller.
//!
//! One [`SdMmc`] owns one host controller. Every operation checks the
//! lifecycle [`State`] first: anything but `Idle` means another operation
//! owns the data path, and the caller gets [`Error::Busy`].

mod abort;
mod busy;
mod delay;
mod identify;
mod irq;
mod speed;
mod transfer;

use busy::SdMmcBusy;

pub use speed::SpeedMode;

use core::convert::TryFrom;

use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx, BlockIter};
use crate::bus::{BusConfig, BusWidth, ClockEdge, Dma, Flags, KernelClock, Transport};
use crate::card::{CardInfo, Cid, SpecVersion};
#[cfg(feature = "linked-list")]
use crate::linked_list::Queue;
use crate::sdmmc_proto::*;

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

bitflags::bitflags! {
    /// Every error condition the controller can record.
    pub struct ErrorCodes: u32 {
        /// Command response received (but CRC check failed)
        const CMD_CRC_FAIL = 0x0000_0001;
        /// Data block sent/received (CRC check failed)
        const DATA_CRC_FAIL = 0x0000_0002;
        /// Command response timeout
        const CMD_RSP_TIMEOUT = 0x0000_0004;
        /// Data timeout
        const DATA_TIMEOUT = 0x0000_0008;
        /// Transmit FIFO underrun
        const TX_UNDERRUN = 0x0000_0010;
        /// Receive FIFO overrun
        const RX_OVERRUN = 0x0000_0020;
        /// Misaligned address
        const ADDR_MISALIGNED = 0x0000_0040;
        /// Transferred block length is not allowed for the card
        const BLOCK_LEN_ERR = 0x0000_0080;
        /// An error in the sequence of erase commands occurred
        const ERASE_SEQ_ERR = 0x0000_0100;
        /// An invalid selection for erase groups
        const BAD_ERASE_PARAM = 0x0000_0200;
        /// Attempt to program a write protected block
        const WRITE_PROT_VIOLATION = 0x0000_0400;
        /// Sequence or password error, or locked card access
        const LOCK_UNLOCK_FAILED = 0x0000_0800;
        /// CRC check of the previous command failed
        const COM_CRC_FAILED = 0x0000_1000;
        /// Command is not legal for the card state
        const ILLEGAL_CMD = 0x0000_2000;
        /// Card internal ECC was applied but failed to correct the data
        const CARD_ECC_FAILED = 0x0000_4000;
        /// Internal card controller error
        const CC_ERR = 0x0000_8000;
        /// General or unknown error
        const GENERAL_UNKNOWN_ERR = 0x0001_0000;
        /// The card could not sustain data reading in stream mode
        const STREAM_READ_UNDERRUN = 0x0002_0000;
        /// The card could not sustain data programming in stream mode
        const STREAM_WRITE_OVERRUN = 0x0004_0000;
        /// CID/CSD overwrite error
        const CID_CSD_OVERWRITE = 0x0008_0000;
        /// Only partial address space was erased
        const WP_ERASE_SKIP = 0x0010_0000;
        /// Command has been executed without using internal ECC
        const CARD_ECC_DISABLED = 0x0020_0000;
        /// Erase sequence was cleared before executing
        const ERASE_RESET = 0x0040_0000;
        /// Error in sequence of authentication
        const AKE_SEQ_ERR = 0x0080_0000;
        /// Error in case of invalid voltage range
        const INVALID_VOLTRANGE = 0x0100_0000;
        /// Error when addressed block is out of range
        const ADDR_OUT_OF_RANGE = 0x0200_0000;
        /// Error when command request is not applicable
        const REQUEST_NOT_APPLICABLE = 0x0400_0000;
        /// The used parameter is not valid
        const INVALID_PARAMETER = 0x0800_0000;
        /// Error when feature is not supported
        const UNSUPPORTED_FEATURE = 0x1000_0000;
        /// Error when transfer process is busy
        const BUSY = 0x2000_0000;
        /// Error while DMA transfer
        const DMA = 0x4000_0000;
        /// Timeout error
        const TIMEOUT = 0x8000_0000;
    }
}

impl ErrorCodes {
    /// Map the error bits of an R1 card status.
    pub fn from_card_status(status: u32) -> ErrorCodes {
        const MAP: [(u32, ErrorCodes); 19] = [
            (R1_ADDR_OUT_OF_RANGE, ErrorCodes::ADDR_OUT_OF_RANGE),
            (R1_ADDR_MISALIGNED, ErrorCodes::ADDR_MISALIGNED),
            (R1_BLOCK_LEN_ERR, ErrorCodes::BLOCK_LEN_ERR),
            (R1_ERASE_SEQ_ERR, ErrorCodes::ERASE_SEQ_ERR),
            (R1_BAD_ERASE_PARAM, ErrorCodes::BAD_ERASE_PARAM),
            (R1_WRITE_PROT_VIOLATION, ErrorCodes::WRITE_PROT_VIOLATION),
            (R1_LOCK_UNLOCK_FAILED, ErrorCodes::LOCK_UNLOCK_FAILED),
            (R1_COM_CRC_FAILED, ErrorCodes::COM_CRC_FAILED),
            (R1_ILLEGAL_CMD, ErrorCodes::ILLEGAL_CMD),
            (R1_CARD_ECC_FAILED, ErrorCodes::CARD_ECC_FAILED),
            (R1_CC_ERROR, ErrorCodes::CC_ERR),
            (R1_GENERAL_UNKNOWN_ERROR, ErrorCodes::GENERAL_UNKNOWN_ERR),
            (R1_STREAM_READ_UNDERRUN, ErrorCodes::STREAM_READ_UNDERRUN),
            (R1_STREAM_WRITE_OVERRUN, ErrorCodes::STREAM_WRITE_OVERRUN),
            (R1_CID_CSD_OVERWRITE, ErrorCodes::CID_CSD_OVERWRITE),
            (R1_WP_ERASE_SKIP, ErrorCodes::WP_ERASE_SKIP),
            (R1_CARD_ECC_DISABLED, ErrorCodes::CARD_ECC_DISABLED),
            (R1_ERASE_RESET, ErrorCodes::ERASE_RESET),
            (R1_AKE_SEQ_ERROR, ErrorCodes::AKE_SEQ_ERR),
        ];
        MAP.iter()
            .filter(|(bit, _)| status & bit != 0)
            .fold(ErrorCodes::empty(), |acc, (_, code)| acc | *code)
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for ErrorCodes {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ErrorCodes({=u32:#x})", self.bits())
    }
}

/// The possible errors `SdMmc` can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// A parameter was out of range, or the card can't do what was asked
    InvalidParam,
    /// Another operation owns the controller, or it is in the wrong state
    Busy,
    /// The operation did not finish in time
    Timeout,
    /// The operation failed. The codes are also added to
    /// [`SdMmc::last_errors`].
    Failed(ErrorCodes),
}

/// Lifecycle of the controller.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Powered off, or never configured
    Reset,
    /// Peripheral clock enabled, waiting for [`SdMmc::set_config`]
    Initialized,
    /// Ready for an operation
    Idle,
    /// An operation owns the data path
    Active,
    /// An abort is in progress
    Aborting,
    /// No usable card. Re-insert or re-identify it.
    CardRemoved,
}

/// How a transfer moves its data.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferMode {
    /// The caller spins on the FIFO
    Polling,
    /// The interrupt handler services the FIFO
    Interrupt,
    /// One DMA buffer
    Dma,
    /// A chain of DMA buffers
    LinkedList,
}

/// The operation currently in flight.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Transfer direction
    pub direction: crate::bus::Direction,
    /// Was a multi-block command used?
    pub multi_block: bool,
    /// How the data moves
    pub mode: TransferMode,
}

/// What just finished, as passed to [`Callbacks::transfer_complete`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// A write finished
    TxComplete,
    /// A read finished
    RxComplete,
    /// One node of a linked-list write was sent
    TxNodeComplete,
    /// One node of a linked-list read was filled
    RxNodeComplete,
}

/// Is there a 1.8V level shifter between the host and the card?
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transceiver {
    /// Signalling stays at 3.3V
    NotPresent,
    /// UHS-I signalling is possible
    Present,
}

/// Calls from the controller into the application.
///
/// These run in whatever context drives the controller: the interrupt
/// handler, a DMA callback, or the caller of a blocking function. They must
/// not block.
pub trait Callbacks {
    /// A transfer, or one node of a linked-list transfer, is done.
    fn transfer_complete(&mut self, _event: TransferEvent) {}
    /// An interrupt or DMA transfer failed.
    fn error(&mut self, _errors: ErrorCodes) {}
    /// [`SdMmc::abort_it`] has finished.
    fn abort_complete(&mut self) {}
    /// Switch the external level shifter to 1.8V (`true`) or back.
    fn drive_transceiver(&mut self, _enable: bool) {}
}

/// Callbacks that do nothing.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone)]
pub struct NoCallbacks;

impl Callbacks for NoCallbacks {}

/// Bus parameters chosen by the application.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /// Clock edge
    pub clock_edge: ClockEdge,
    /// Stop the bus clock when the bus is idle
    pub power_save: bool,
    /// Wanted bus clock in Hz. Ignored with the `auto-clock-detection`
    /// feature, where the fastest clock for the card is used.
    pub clock_hz: u32,
    /// Bus width
    pub bus_width: BusWidth,
    /// Hardware flow control
    pub flow_control: bool,
    /// Level shifter
    pub transceiver: Transceiver,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            clock_edge: ClockEdge::Rising,
            power_save: false,
            clock_hz: NORMAL_SPEED_FREQ_HZ,
            bus_width: BusWidth::One,
            flow_control: false,
            transceiver: Transceiver::NotPresent,
        }
    }
}

/// Timeouts used by the transfer engine.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Data timeout, in bus clock cycles
    pub data_cycles: u32,
    /// Stop transmission timeout, in ms
    pub stop_transfer_ms: u32,
    /// Erase timeout, in ms
    pub erase_ms: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            data_cycles: DEFAULT_DATA_TIMEOUT_CYCLES,
            stop_transfer_ms: DEFAULT_STOP_TRANSFER_TIMEOUT_MS,
            erase_ms: DEFAULT_ERASE_TIMEOUT_MS,
        }
    }
}

/// A buffer lent to an interrupt or DMA transfer.
#[derive(Debug)]
pub enum XferBuffer<'buf> {
    /// Destination of a read
    Read(&'buf mut [u8]),
    /// Source of a write
    Write(&'buf [u8]),
}

/// Represents an SD card attached to a native SD host controller.
pub struct SdMmc<'buf, BUS, DMA, CLK, CB>
where
    BUS: Transport,
    DMA: Dma,
    CLK: KernelClock,
    CB: Callbacks,
{
    bus: BUS,
    dma: DMA,
    clock: CLK,
    callbacks: CB,
    state: State,
    operation: Option<Operation>,
    last_errors: ErrorCodes,
    timeouts: Timeouts,
    config: Config,
    bus_config: BusConfig,
    card: CardInfo,
    cid: Option<Cid>,
    spec_version: SpecVersion,
    buffer: Option<XferBuffer<'buf>>,
    cursor: usize,
    #[cfg(feature = "linked-list")]
    queue: Option<Queue<'buf>>,
    dma_abort_stopped: Option<bool>,
}

/// Bus parameters used during identification, and after card removal.
fn default_bus_config(kernel_hz: u32) -> BusConfig {
    BusConfig {
        clock_edge: ClockEdge::Rising,
        power_save: false,
        bus_width: BusWidth::One,
        flow_control: false,
        clock_divider: kernel_hz / (2 * INIT_FREQ_HZ),
    }
}

impl<'buf, BUS, DMA, CLK, CB> SdMmc<'buf, BUS, DMA, CLK, CB>
where
    BUS: Transport,
    DMA: Dma,
    CLK: KernelClock,
    CB: Callbacks,
{
    /// Create a new controller and enable its peripheral clock.
    ///
    /// Call [`SdMmc::set_config`] next, to identify the card.
    pub fn new(bus: BUS, dma: DMA, mut clock: CLK, callbacks: CB) -> Self {
        clock.enable();
        let bus_config = default_bus_config(clock.kernel_clock_hz());
        SdMmc {
            bus,
            dma,
            clock,
            callbacks,
            state: State::Initialized,
            operation: None,
            last_errors: ErrorCodes::empty(),
            timeouts: Timeouts::default(),
            config: Config::default(),
            bus_config,
            card: CardInfo::default(),
            cid: None,
            spec_version: SpecVersion::Unsupported,
            buffer: None,
            cursor: 0,
            #[cfg(feature = "linked-list")]
            queue: None,
            dma_abort_stopped: None,
        }
    }

    /// Power the card off and go back to `Reset`.
    pub fn deinit(&mut self) -> Result<(), Error> {
        match self.state {
            State::Active | State::Aborting => return Err(Error::Busy),
            _ => {}
        }
        self.bus.power_off();
        self.operation = None;
        self.state = State::Reset;
        debug!("Host powered off");
        Ok(())
    }

    /// Give back the bus, DMA, clock and callbacks.
    pub fn free(self) -> (BUS, DMA, CLK, CB) {
        (self.bus, self.dma, self.clock, self.callbacks)
    }

    /// The card has gone. The card model is kept, but nothing can be done
    /// with it until [`SdMmc::notify_card_insertion`].
    pub fn notify_card_removal(&mut self) -> Result<(), Error> {
        if self.state == State::Reset {
            return Err(Error::Busy);
        }
        self.bus.disable_interrupts(Flags::TRANSFER_INTERRUPTS);
        self.bus.disarm_data_path();
        self.bus.clear_flags(Flags::STATIC_FLAGS);
        self.bus_config = default_bus_config(self.clock.kernel_clock_hz());
        self.bus.configure(&self.bus_config);
        self.operation = None;
        self.state = State::CardRemoved;
        debug!("Card removed");
        Ok(())
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The operation in flight, if any.
    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    /// Every error recorded since the last [`SdMmc::take_last_errors`].
    pub fn last_errors(&self) -> ErrorCodes {
        self.last_errors
    }

    /// Return the recorded errors and forget them.
    pub fn take_last_errors(&mut self) -> ErrorCodes {
        core::mem::replace(&mut self.last_errors, ErrorCodes::empty())
    }

    /// What we know about the card.
    pub fn card_info(&self) -> &CardInfo {
        &self.card
    }

    /// The card's CID. Only kept with the `card-cid` feature.
    pub fn card_cid(&self) -> Option<&Cid> {
        self.cid.as_ref()
    }

    /// The card's physical layer version. Only decoded with the
    /// `spec-version` feature.
    pub fn card_spec_version(&self) -> SpecVersion {
        self.spec_version
    }

    /// The bus clock, in Hz, from the kernel clock and the applied divider.
    pub fn clock_frequency(&self) -> u32 {
        let kernel_hz = self.clock.kernel_clock_hz();
        match self.bus_config.clock_divider {
            0 => kernel_hz,
            div => kernel_hz / div.saturating_mul(2),
        }
    }

    /// The current bus configuration.
    pub fn get_config(&self) -> Config {
        Config {
            clock_edge: self.bus_config.clock_edge,
            power_save: self.bus_config.power_save,
            clock_hz: self.clock_frequency(),
            bus_width: self.bus_config.bus_width,
            flow_control: self.bus_config.flow_control,
            transceiver: self.config.transceiver,
        }
    }

    /// The bus parameters last applied to the host.
    pub fn bus_config(&self) -> &BusConfig {
        &self.bus_config
    }

    /// The timeouts used by transfers.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Set the data timeout, in bus clock cycles.
    pub fn set_data_timeout(&mut self, cycles: u32) -> Result<(), Error> {
        self.check_idle()?;
        self.timeouts.data_cycles = cycles;
        Ok(())
    }

    /// Set the stop transmission timeout, in ms.
    pub fn set_stop_transfer_timeout(&mut self, ms: u32) -> Result<(), Error> {
        self.check_idle()?;
        self.timeouts.stop_transfer_ms = ms;
        Ok(())
    }

    /// Set the erase timeout, in ms.
    pub fn set_erase_timeout(&mut self, ms: u32) -> Result<(), Error> {
        self.check_idle()?;
        self.timeouts.erase_ms = ms;
        Ok(())
    }

    /// Take back the buffer lent to the last interrupt or DMA transfer.
    pub fn release_buffer(&mut self) -> Option<XferBuffer<'buf>> {
        match self.state {
            State::Active | State::Aborting => None,
            _ => self.buffer.take(),
        }
    }

    /// Take back the queue lent to the last linked-list transfer.
    #[cfg(feature = "linked-list")]
    pub fn release_queue(&mut self) -> Option<Queue<'buf>> {
        match self.state {
            State::Active | State::Aborting => None,
            _ => self.queue.take(),
        }
    }

    fn check_idle(&self) -> Result<(), Error> {
        if self.state == State::Idle {
            Ok(())
        } else {
            Err(Error::Busy)
        }
    }

    /// Claim the controller for an operation.
    fn begin(&mut self, operation: Option<Operation>) -> Result<(), Error> {
        self.check_idle()?;
        self.state = State::Active;
        self.operation = operation;
        Ok(())
    }

    /// Release the controller after a blocking operation, recording any
    /// failure.
    fn end<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            self.record(*e);
        }
        self.bus.clear_flags(Flags::STATIC_DATA_FLAGS);
        self.operation = None;
        self.state = State::Idle;
        result
    }

    fn record(&mut self, error: Error) {
        match error {
            Error::Failed(codes) => {
                warn!("Operation failed: {:x}", codes.bits());
                self.last_errors |= codes;
            }
            Error::Timeout => {
                warn!("Operation timed out");
                self.last_errors |= ErrorCodes::TIMEOUT;
            }
            Error::InvalidParam | Error::Busy => {}
        }
    }

    fn busy(&mut self) -> SdMmcBusy<BUS> {
        SdMmcBusy::new(&mut self.bus)
    }
}

/// Polling timeout for one block read or written through [`BlockDevice`].
const BLOCK_DEVICE_TIMEOUT_MS: u32 = 1000;

impl<'buf, BUS, DMA, CLK, CB> SdMmc<'buf, BUS, DMA, CLK, CB>
where
    BUS: Transport,
    DMA: Dma,
    CLK: KernelClock,
    CB: Callbacks,
{
    /// The blocks `start..start + len`, if they are all on the card.
    fn block_range(&self, start: BlockIdx, len: usize) -> Result<BlockIter, Error> {
        self.check_idle()?;
        let count = u32::try_from(len).map_err(|_| Error::InvalidParam)?;
        let end = start
            .checked_add(BlockCount(count))
            .ok_or(Error::InvalidParam)?;
        if end.0 > self.card.geometry.logical_block_count {
            return Err(Error::InvalidParam);
        }
        Ok(BlockIter::new(start, end))
    }
}

impl<'buf, BUS, DMA, CLK, CB> BlockDevice for SdMmc<'buf, BUS, DMA, CLK, CB>
where
    BUS: Transport,
    DMA: Dma,
    CLK: KernelClock,
    CB: Callbacks,
{
    type Error = Error;

    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error> {
        let range = self.block_range(start_block_idx, blocks.len())?;
        trace!("Read {} blocks at {} for {}", blocks.len(), start_block_idx.0, reason);
        for (block, idx) in blocks.iter_mut().zip(range) {
            self.read_blocks(&mut block.contents, idx.0, 1, BLOCK_DEVICE_TIMEOUT_MS)?;
        }
        Ok(())
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        let range = self.block_range(start_block_idx, blocks.len())?;
        trace!("Write {} blocks at {}", blocks.len(), start_block_idx.0);
        for (block, idx) in blocks.iter().zip(range) {
            self.write_blocks(&block.contents, idx.0, 1, BLOCK_DEVICE_TIMEOUT_MS)?;
        }
        Ok(())
    }

    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        match self.state {
            State::Reset | State::Initialized | State::CardRemoved => Err(Error::Busy),
            _ => Ok(BlockCount(self.card.geometry.logical_block_count)),
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
