//! embedded-sdmmc-host - Constants from the SD Specifications
//!
//! Based on SD Simplified Physical Layer Specification Version 6.00, as used
//! over the native 1-bit/4-bit SD bus.

/// The bus commands this driver issues.
///
/// Encoding them onto the wire is the job of the [`Transport`](crate::Transport).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    /// CMD0 - Reset the card to the idle state
    GoIdleState,
    /// CMD2 - Ask the card for its CID
    AllSendCid,
    /// CMD3 - Ask the card to publish a new relative address
    SendRelativeAddr,
    /// CMD6 - Check or switch a card function (bus speed mode)
    SwitchFunction,
    /// CMD7 - Select/deselect a card by relative address
    SelectCard,
    /// CMD8 - Send the interface condition (voltage probe)
    SendIfCond,
    /// CMD9 - Ask the card for its CSD
    SendCsd,
    /// CMD11 - Switch signalling to 1.8V
    VoltageSwitch,
    /// CMD12 - Stop a multiple block transfer
    StopTransmission,
    /// CMD13 - Ask the card for its status register
    SendStatus,
    /// CMD16 - Set the block length used for data transfers
    SetBlockLen,
    /// CMD17 - Read a single block
    ReadSingleBlock,
    /// CMD18 - Read blocks until stopped
    ReadMultipleBlock,
    /// CMD24 - Write a single block
    WriteSingleBlock,
    /// CMD25 - Write blocks until stopped
    WriteMultipleBlock,
    /// CMD32 - Set the first block to erase
    EraseWrBlkStart,
    /// CMD33 - Set the last block to erase
    EraseWrBlkEnd,
    /// CMD38 - Erase the selected range
    Erase,
    /// CMD55 - The next command is an application-specific command
    AppCmd,
    /// ACMD6 - Select the data bus width
    AppSetBusWidth,
    /// ACMD13 - Send the 512-bit SD status
    AppSdStatus,
    /// ACMD41 - Send the host capacity support and ask for the OCR
    AppSendOpCond,
    /// ACMD51 - Send the SD configuration register
    AppSendScr,
}

/// Response formats, as defined in section 4.9.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseType {
    /// No response
    None,
    /// Normal response with card status
    R1,
    /// R1 with a busy signal on DAT0
    R1b,
    /// 136-bit CID or CSD
    R2,
    /// OCR, without CRC
    R3,
    /// Published RCA
    R6,
    /// Card interface condition
    R7,
}

impl Command {
    /// The command index sent on the bus.
    pub fn index(self) -> u8 {
        match self {
            Command::GoIdleState => 0,
            Command::AllSendCid => 2,
            Command::SendRelativeAddr => 3,
            Command::SwitchFunction => 6,
            Command::SelectCard => 7,
            Command::SendIfCond => 8,
            Command::SendCsd => 9,
            Command::VoltageSwitch => 11,
            Command::StopTransmission => 12,
            Command::SendStatus => 13,
            Command::SetBlockLen => 16,
            Command::ReadSingleBlock => 17,
            Command::ReadMultipleBlock => 18,
            Command::WriteSingleBlock => 24,
            Command::WriteMultipleBlock => 25,
            Command::EraseWrBlkStart => 32,
            Command::EraseWrBlkEnd => 33,
            Command::Erase => 38,
            Command::AppCmd => 55,
            Command::AppSetBusWidth => 6,
            Command::AppSdStatus => 13,
            Command::AppSendOpCond => 41,
            Command::AppSendScr => 51,
        }
    }

    /// Is this an ACMD, which must follow a [`Command::AppCmd`]?
    pub fn is_app(self) -> bool {
        matches!(
            self,
            Command::AppSetBusWidth
                | Command::AppSdStatus
                | Command::AppSendOpCond
                | Command::AppSendScr
        )
    }

    /// The response the card sends back.
    pub fn response_type(self) -> ResponseType {
        match self {
            Command::GoIdleState => ResponseType::None,
            Command::AllSendCid | Command::SendCsd => ResponseType::R2,
            Command::SendRelativeAddr => ResponseType::R6,
            Command::SendIfCond => ResponseType::R7,
            Command::AppSendOpCond => ResponseType::R3,
            Command::SelectCard | Command::StopTransmission | Command::Erase => ResponseType::R1b,
            _ => ResponseType::R1,
        }
    }
}

/// Block length used for every data transfer
pub const BLOCK_LEN: u32 = 512;

/// CMD8 argument: 2.7-3.6V and check pattern 0xAA
pub const IF_COND_PATTERN: u32 = 0x0000_01AA;

/// ACMD41 voltage window advertised by the host
pub const OCR_VOLTAGE_WINDOW: u32 = 0x8010_0000;
/// OCR bit 30, host supports / card is high capacity
pub const OCR_HIGH_CAPACITY: u32 = 0x4000_0000;
/// OCR bit 24, switch to 1.8V request / accepted
pub const OCR_SWITCH_1_8V: u32 = 0x0100_0000;
/// OCR bit 31, card power up procedure finished
pub const OCR_POWER_UP_DONE: u32 = 0x8000_0000;

/// Maximum number of ACMD41 attempts
pub const MAX_VOLT_TRIAL: u32 = 0xFFFF;

/// SCR bit 50 (bit 18 of the upper word): 4-bit bus supported
pub const SCR_WIDE_BUS_SUPPORT: u32 = 0x0004_0000;
/// SCR bit 48 (bit 16 of the upper word): 1-bit bus supported
pub const SCR_SINGLE_BUS_SUPPORT: u32 = 0x0001_0000;

/// ACMD6 argument for a 4-bit bus
pub const BUS_WIDTH_4BIT_ARG: u32 = 0x2;
/// ACMD6 argument for a 1-bit bus
pub const BUS_WIDTH_1BIT_ARG: u32 = 0x0;

/// CMD6 pattern: switch to SDR12 / default speed
pub const SWITCH_PATTERN_DEFAULT: u32 = 0x80FF_FF00;
/// CMD6 pattern: switch to SDR25 / high speed
pub const SWITCH_PATTERN_HIGH: u32 = 0x80FF_FF01;
/// CMD6 pattern: switch to SDR50
pub const SWITCH_PATTERN_SDR50: u32 = 0x80FF_1F02;
/// CMD6 pattern: switch to SDR104
pub const SWITCH_PATTERN_SDR104: u32 = 0x80FF_1F03;
/// CMD6 pattern: switch to DDR50
pub const SWITCH_PATTERN_DDR50: u32 = 0x80FF_FF04;

/// Identification clock (Hz)
pub const INIT_FREQ_HZ: u32 = 400_000;
/// Normal speed clock limit (Hz)
pub const NORMAL_SPEED_FREQ_HZ: u32 = 25_000_000;
/// High speed clock limit (Hz)
pub const HIGH_SPEED_FREQ_HZ: u32 = 50_000_000;
/// UHS clock limit (Hz)
pub const ULTRA_HIGH_SPEED_FREQ_HZ: u32 = 100_000_000;

/// Command response timeout (ms)
pub const CMD_TIMEOUT_MS: u32 = 100;
/// Default data timeout, in bus clock cycles
pub const DEFAULT_DATA_TIMEOUT_CYCLES: u32 = 0xFFFF_FFFF;
/// Default stop transfer timeout (ms)
pub const DEFAULT_STOP_TRANSFER_TIMEOUT_MS: u32 = 500;
/// Default erase timeout (ms)
pub const DEFAULT_ERASE_TIMEOUT_MS: u32 = 63_000;

/// Words moved per FIFO half-full/half-empty event
pub const FIFO_BURST_WORDS: usize = 8;
/// Bytes moved per FIFO half-full/half-empty event
pub const FIFO_BURST_BYTES: usize = FIFO_BURST_WORDS * 4;

/// Size of the SD status and switch function status blocks
pub const SD_STATUS_LEN: usize = 64;
/// Size of the SCR
pub const SCR_LEN: usize = 8;

// Card status (R1) error bits

/// Command argument out of range
pub const R1_ADDR_OUT_OF_RANGE: u32 = 0x8000_0000;
/// Misaligned address
pub const R1_ADDR_MISALIGNED: u32 = 0x4000_0000;
/// Transferred block length not allowed
pub const R1_BLOCK_LEN_ERR: u32 = 0x2000_0000;
/// Error in the sequence of erase commands
pub const R1_ERASE_SEQ_ERR: u32 = 0x1000_0000;
/// Invalid selection of write-blocks for erase
pub const R1_BAD_ERASE_PARAM: u32 = 0x0800_0000;
/// Attempt to program a write protected block
pub const R1_WRITE_PROT_VIOLATION: u32 = 0x0400_0000;
/// Lock/unlock command failed
pub const R1_LOCK_UNLOCK_FAILED: u32 = 0x0100_0000;
/// CRC check of the previous command failed
pub const R1_COM_CRC_FAILED: u32 = 0x0080_0000;
/// Command not legal for the card state
pub const R1_ILLEGAL_CMD: u32 = 0x0040_0000;
/// Card internal ECC failed
pub const R1_CARD_ECC_FAILED: u32 = 0x0020_0000;
/// Internal card controller error
pub const R1_CC_ERROR: u32 = 0x0010_0000;
/// General or unknown error
pub const R1_GENERAL_UNKNOWN_ERROR: u32 = 0x0008_0000;
/// Stream read underrun
pub const R1_STREAM_READ_UNDERRUN: u32 = 0x0004_0000;
/// Stream write overrun
pub const R1_STREAM_WRITE_OVERRUN: u32 = 0x0002_0000;
/// CID/CSD overwrite
pub const R1_CID_CSD_OVERWRITE: u32 = 0x0001_0000;
/// Some blocks were skipped because they are write protected
pub const R1_WP_ERASE_SKIP: u32 = 0x0000_8000;
/// Command executed without internal ECC
pub const R1_CARD_ECC_DISABLED: u32 = 0x0000_4000;
/// Erase sequence was cleared before executing
pub const R1_ERASE_RESET: u32 = 0x0000_2000;
/// Error in the authentication sequence
pub const R1_AKE_SEQ_ERROR: u32 = 0x0000_0008;
/// Card is ready for data
pub const R1_READY_FOR_DATA: u32 = 0x0000_0100;
/// Card expects an ACMD
pub const R1_APP_CMD: u32 = 0x0000_0020;
/// All of the error bits above
pub const R1_ERROR_BITS: u32 = 0xFDFF_E008;

/// Position of the CURRENT_STATE field in the card status
pub const R1_CURRENT_STATE_SHIFT: u32 = 9;
/// Mask of the CURRENT_STATE field, once shifted
pub const R1_CURRENT_STATE_MASK: u32 = 0xF;

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
