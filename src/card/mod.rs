//! embedded-sdmmc-host - Card Model
//!
//! What the host learns about the card during identification.

mod cid;
mod csd;
mod scr;
mod status;

pub use cid::Cid;
pub use csd::{Csd, CsdV1, CsdV2};
pub use scr::Scr;
pub use status::{SdStatus, SwitchStatus};

use crate::sdmmc_proto::{R1_CURRENT_STATE_MASK, R1_CURRENT_STATE_SHIFT};

/// Capacity class of a card. Governs how block addresses are encoded.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CapacityClass {
    /// SDSC: byte addressed, CSD version 1.0
    StandardCapacity,
    /// SDHC/SDXC: block addressed, CSD version 2.0
    HighOrExtendedCapacity,
    /// Secured device: block addressed, no stop after multi-block transfers
    SecuredDevice,
}

impl CapacityClass {
    /// Turn a block index into a command argument.
    pub fn address(self, block_idx: u32) -> u32 {
        match self {
            CapacityClass::StandardCapacity => block_idx.wrapping_mul(512),
            CapacityClass::HighOrExtendedCapacity | CapacityClass::SecuredDevice => block_idx,
        }
    }
}

/// Speed class, derived from the capacity class and the SD status.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpeedClass {
    /// Up to 25 MHz
    Normal,
    /// Up to 50 MHz
    High,
    /// UHS-I, up to 100 MHz here
    UltraHigh,
}

impl SpeedClass {
    /// Classify a card from its capacity class and SD status.
    pub fn from_status(capacity: CapacityClass, status: &SdStatus) -> SpeedClass {
        match capacity {
            CapacityClass::HighOrExtendedCapacity => {
                if status.uhs_speed_grade() != 0 || status.uhs_au_size() != 0 {
                    SpeedClass::UltraHigh
                } else {
                    SpeedClass::High
                }
            }
            CapacityClass::StandardCapacity | CapacityClass::SecuredDevice => SpeedClass::Normal,
        }
    }

    /// The fastest bus clock allowed for this class, in Hz.
    pub fn max_clock_hz(self) -> u32 {
        match self {
            SpeedClass::Normal => crate::sdmmc_proto::NORMAL_SPEED_FREQ_HZ,
            SpeedClass::High => crate::sdmmc_proto::HIGH_SPEED_FREQ_HZ,
            SpeedClass::UltraHigh => crate::sdmmc_proto::ULTRA_HIGH_SPEED_FREQ_HZ,
        }
    }
}

/// Physical layer specification version reported in the SCR.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum SpecVersion {
    /// Version 1.0 and 1.01
    V1_0x,
    /// Version 1.10
    V1_10,
    /// Version 2.00
    V2_00,
    /// Version 3.0X
    V3_0x,
    /// Version 4.XX
    V4_xx,
    /// Version 5.XX
    V5_xx,
    /// Version 6.XX
    V6_xx,
    /// Not decoded, or a combination we don't know
    Unsupported,
}

/// The card's state machine, as reported in the card status.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardState {
    /// idle
    Idle,
    /// ready
    Ready,
    /// ident
    Identification,
    /// stby
    Standby,
    /// tran
    Transfer,
    /// data
    Sending,
    /// rcv
    Receiving,
    /// prg
    Programming,
    /// dis
    Disconnected,
    /// A reserved state value
    Reserved(u8),
}

impl CardState {
    /// Extract the state from an R1 card status.
    pub fn from_card_status(status: u32) -> CardState {
        match (status >> R1_CURRENT_STATE_SHIFT) & R1_CURRENT_STATE_MASK {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Identification,
            3 => CardState::Standby,
            4 => CardState::Transfer,
            5 => CardState::Sending,
            6 => CardState::Receiving,
            7 => CardState::Programming,
            8 => CardState::Disconnected,
            n => CardState::Reserved(n as u8),
        }
    }
}

/// Block geometry of a card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// Number of native blocks
    pub block_count: u32,
    /// Size of a native block, in bytes
    pub block_size: u32,
    /// Number of 512-byte blocks
    pub logical_block_count: u32,
    /// Always 512
    pub logical_block_size: u32,
}

/// Information about the identified card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardInfo {
    /// Capacity class
    pub capacity: CapacityClass,
    /// Relative card address
    pub relative_address: u16,
    /// Block geometry
    pub geometry: Geometry,
    /// Speed class
    pub speed: SpeedClass,
}

impl Default for CardInfo {
    fn default() -> CardInfo {
        CardInfo {
            capacity: CapacityClass::StandardCapacity,
            relative_address: 0,
            geometry: Geometry::default(),
            speed: SpeedClass::Normal,
        }
    }
}

impl CardInfo {
    /// The command argument carrying the relative card address.
    pub fn rca_argument(&self) -> u32 {
        u32::from(self.relative_address) << 16
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
