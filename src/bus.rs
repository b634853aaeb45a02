//! embedded-sdmmc-host - Hardware seams
//!
//! The controller never touches registers. Everything it needs from the
//! SDMMC peripheral, its DMA and its clock tree goes through the traits in
//! this module, which a board support crate implements.

use crate::sdmmc::ErrorCodes;
use crate::sdmmc_proto::Command;

bitflags::bitflags! {
    /// Status flags of the host controller.
    ///
    /// The same bits are used to enable the matching interrupts.
    pub struct Flags: u32 {
        /// Command response received, CRC check failed
        const CMD_CRC_FAIL = 1 << 0;
        /// Data block sent/received, CRC check failed
        const DATA_CRC_FAIL = 1 << 1;
        /// Command response timeout
        const CMD_TIMEOUT = 1 << 2;
        /// Data timeout
        const DATA_TIMEOUT = 1 << 3;
        /// Transmit FIFO underrun
        const TX_UNDERRUN = 1 << 4;
        /// Receive FIFO overrun
        const RX_OVERRUN = 1 << 5;
        /// Command response received, CRC check passed
        const CMD_RESPONSE_END = 1 << 6;
        /// Command sent, no response required
        const CMD_SENT = 1 << 7;
        /// Data transfer ended correctly
        const DATA_END = 1 << 8;
        /// Data transfer hold
        const DATA_HOLD = 1 << 9;
        /// Data block sent/received
        const DATA_BLOCK_END = 1 << 10;
        /// Data transfer aborted by CMD12
        const DATA_ABORT = 1 << 11;
        /// Data path state machine active
        const DPSM_ACTIVE = 1 << 12;
        /// Command path state machine active
        const CPSM_ACTIVE = 1 << 13;
        /// Transmit FIFO half empty
        const TX_FIFO_HALF_EMPTY = 1 << 14;
        /// Receive FIFO half full
        const RX_FIFO_HALF_FULL = 1 << 15;
        /// Transmit FIFO full
        const TX_FIFO_FULL = 1 << 16;
        /// Receive FIFO full
        const RX_FIFO_FULL = 1 << 17;
        /// Transmit FIFO empty
        const TX_FIFO_EMPTY = 1 << 18;
        /// Receive FIFO empty
        const RX_FIFO_EMPTY = 1 << 19;
        /// DAT0 held low by the card
        const BUSY_D0 = 1 << 20;
        /// End of DAT0 busy following a command with busy response
        const BUSY_D0_END = 1 << 21;
        /// SDIO interrupt received
        const SDIO_IT = 1 << 22;
        /// Boot acknowledgment received, CRC check failed
        const ACK_FAIL = 1 << 23;
        /// Boot acknowledgment timeout
        const ACK_TIMEOUT = 1 << 24;
        /// Voltage switch critical timing section completed
        const VOLTAGE_SWITCH_END = 1 << 25;
        /// SDMMC_CK stopped in voltage switch procedure
        const CLOCK_STOP = 1 << 26;
        /// Internal DMA transfer error
        const IDMA_TRANSFER_ERROR = 1 << 27;
        /// Internal DMA buffer transfer complete (linked-list node boundary)
        const IDMA_BUFFER_COMPLETE = 1 << 28;

        /// Data phase errors
        const DATA_ERRORS = Self::DATA_CRC_FAIL.bits | Self::DATA_TIMEOUT.bits
            | Self::TX_UNDERRUN.bits | Self::RX_OVERRUN.bits
            | Self::IDMA_TRANSFER_ERROR.bits;
        /// Sticky flags related to the data path
        const STATIC_DATA_FLAGS = Self::DATA_CRC_FAIL.bits | Self::DATA_TIMEOUT.bits
            | Self::TX_UNDERRUN.bits | Self::RX_OVERRUN.bits | Self::DATA_END.bits
            | Self::DATA_HOLD.bits | Self::DATA_BLOCK_END.bits | Self::DATA_ABORT.bits
            | Self::IDMA_TRANSFER_ERROR.bits | Self::IDMA_BUFFER_COMPLETE.bits;
        /// All sticky flags
        const STATIC_FLAGS = Self::STATIC_DATA_FLAGS.bits | Self::CMD_CRC_FAIL.bits
            | Self::CMD_TIMEOUT.bits | Self::CMD_RESPONSE_END.bits | Self::CMD_SENT.bits
            | Self::BUSY_D0_END.bits | Self::SDIO_IT.bits | Self::ACK_FAIL.bits
            | Self::ACK_TIMEOUT.bits | Self::VOLTAGE_SWITCH_END.bits | Self::CLOCK_STOP.bits;
        /// Interrupts used by interrupt and DMA transfers
        const TRANSFER_INTERRUPTS = Self::DATA_ERRORS.bits | Self::DATA_END.bits
            | Self::RX_FIFO_HALF_FULL.bits | Self::TX_FIFO_HALF_EMPTY.bits
            | Self::IDMA_BUFFER_COMPLETE.bits;
    }
}

/// Which way data flows on the data path.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Host to card
    ToCard,
    /// Card to host
    FromCard,
}

/// How the data path moves words between the FIFO and memory.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DmaMode {
    /// The CPU reads/writes the FIFO
    Disabled,
    /// Single buffer DMA
    Linear,
    /// Linked-list DMA
    LinkedList,
}

/// Everything needed to arm the data path before a data command.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DataPath {
    /// Data timeout in bus clock cycles
    pub timeout_cycles: u32,
    /// Total number of bytes to move
    pub length: u32,
    /// Block size, as a power of two (9 for 512 bytes)
    pub block_size_code: u8,
    /// Transfer direction
    pub direction: Direction,
    /// How the FIFO is serviced
    pub dma: DmaMode,
}

impl DataPath {
    /// A data path for `length` bytes in blocks of `block_size` bytes.
    ///
    /// `block_size` must be a power of two.
    pub fn new(timeout_cycles: u32, length: u32, block_size: u32, direction: Direction) -> DataPath {
        DataPath {
            timeout_cycles,
            length,
            block_size_code: block_size.trailing_zeros() as u8,
            direction,
            dma: DmaMode::Disabled,
        }
    }

    /// Use the given DMA mode.
    pub fn with_dma(self, dma: DmaMode) -> DataPath {
        DataPath { dma, ..self }
    }
}

/// The width of the data bus.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusWidth {
    /// DAT0 only
    One,
    /// DAT0 to DAT3
    Four,
}

/// The clock edge on which data and commands change.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClockEdge {
    /// Rising edge of the kernel clock
    Rising,
    /// Falling edge of the kernel clock
    Falling,
}

/// Signalling selected for the bus.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusSpeed {
    /// Default or high speed, single data rate
    Default,
    /// UHS-I single data rate (SDR50, SDR104)
    UltraHighSdr,
    /// UHS-I double data rate (DDR50)
    UltraHighDdr,
}

/// Source of the clock used to sample data coming from the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReceiveClock {
    /// The internal bus clock
    Internal,
    /// The CKIN feedback pin
    ClockIn,
    /// The delay block output (feedback clock)
    Feedback,
}

/// Steps of the 1.8V signalling switch.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VoltageSwitch {
    /// Normal operation
    Disabled,
    /// Switch armed, waiting for the card to acknowledge CMD11
    Armed,
    /// Clock restarted at 1.8V, waiting for the switch to complete
    Started,
}

/// Delay line settings of the delay block.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DelayLine {
    /// Length of one delay unit cell
    pub unit: u8,
    /// Output clock phase, in unit cells
    pub phase: u8,
}

/// Host side bus parameters.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Clock edge
    pub clock_edge: ClockEdge,
    /// Stop the bus clock when the bus is idle
    pub power_save: bool,
    /// Bus width
    pub bus_width: BusWidth,
    /// Hardware flow control
    pub flow_control: bool,
    /// Bus clock is `kernel / (2 * clock_divider)`, or the kernel clock itself
    /// when the divider is 0.
    pub clock_divider: u32,
}

/// The low-level command/response transport.
///
/// Implementations check command responses (CRC, timeout and the card
/// status error bits of R1 responses, see
/// [`ErrorCodes::from_card_status`]) and report failures as [`ErrorCodes`].
pub trait Transport {
    /// Turn the card supply and the bus on.
    fn power_on(&mut self);
    /// Turn the card supply and the bus off.
    fn power_off(&mut self);
    /// Apply clock, width and flow control settings.
    fn configure(&mut self, config: &BusConfig);
    /// Send a command and wait (up to `timeout_ms`) for its response.
    fn send_command(
        &mut self,
        command: Command,
        argument: u32,
        timeout_ms: u32,
    ) -> Result<(), ErrorCodes>;
    /// Read one of the four response words of the last command. Slot 0
    /// holds the most significant bits of a long response.
    fn response(&self, slot: usize) -> u32;
    /// Pull a word from the FIFO.
    fn read_fifo(&mut self) -> u32;
    /// Push a word into the FIFO.
    fn write_fifo(&mut self, word: u32);
    /// Program the data path for the next data command.
    fn arm_data_path(&mut self, path: &DataPath);
    /// Reset the data path, including length, control and IDMA.
    fn disarm_data_path(&mut self);
    /// Is any of the given flags set?
    fn is_flag_active(&self, flags: Flags) -> bool;
    /// Clear the given sticky flags.
    fn clear_flags(&mut self, flags: Flags);
    /// Enable interrupts for the given flags.
    fn enable_interrupts(&mut self, flags: Flags);
    /// Disable interrupts for the given flags.
    fn disable_interrupts(&mut self, flags: Flags);
    /// Which interrupts are currently enabled.
    fn enabled_interrupts(&self) -> Flags;
    /// Drive the 1.8V switch hardware.
    fn set_voltage_switch(&mut self, step: VoltageSwitch);
    /// Select bus signalling.
    fn set_bus_speed(&mut self, speed: BusSpeed);
    /// Select the receive sampling clock.
    fn select_receive_clock(&mut self, clock: ReceiveClock);
    /// Turn the delay block used with the feedback clock on or off.
    fn set_delay_block(&mut self, enabled: bool);
    /// Is the delay block on?
    fn is_delay_block_enabled(&self) -> bool;
    /// Program the delay line. The sampler is enabled around the update.
    fn set_delay_line(&mut self, line: DelayLine);
    /// The delay line as last programmed.
    fn delay_line(&self) -> DelayLine;
    /// The measured delay line length: bit `n` is set when unit cell `n`
    /// ends inside the first clock period. `None` until the measurement is
    /// valid.
    fn delay_line_length(&self) -> Option<u16>;
    /// A free running millisecond tick.
    fn get_tick(&self) -> u32;
}

/// A DMA request, describing the memory side of the transfer. The other
/// side is always the host controller's FIFO.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DmaRequest {
    /// One contiguous buffer
    Linear {
        /// Transfer direction
        direction: Direction,
        /// Address of the first byte
        memory: usize,
        /// Number of bytes
        length: u32,
    },
    /// A chain of [`Node`](crate::linked_list::Node)s
    LinkedList {
        /// Transfer direction
        direction: Direction,
        /// Address link offsets are relative to
        list_base: usize,
        /// Buffer of the head node
        buffer_base: usize,
        /// Buffer size of the head node
        buffer_size: u32,
        /// Link descriptor of the head node
        link: u32,
    },
}

/// The DMA engine attached to the host controller.
///
/// When a transfer started with [`Dma::start`] finishes, the platform
/// calls [`SdMmc::dma_transfer_complete`](crate::SdMmc::dma_transfer_complete)
/// or [`SdMmc::dma_transfer_error`](crate::SdMmc::dma_transfer_error).
pub trait Dma {
    /// The errors the DMA engine can report. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Start a transfer.
    fn start(&mut self, request: &DmaRequest) -> Result<(), Self::Error>;
    /// Abort the current transfer and wait until it has stopped.
    fn abort(&mut self);
    /// Request an abort and return at once. The platform calls
    /// [`SdMmc::dma_abort_complete`](crate::SdMmc::dma_abort_complete)
    /// when the engine has stopped.
    fn abort_it(&mut self) -> Result<(), Self::Error>;
}

/// The peripheral clock feeding the host controller.
pub trait KernelClock {
    /// Enable the peripheral clock.
    fn enable(&mut self);
    /// Frequency of the kernel clock, in Hz. 0 when the clock is not running.
    fn kernel_clock_hz(&self) -> u32;
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
