//! The Card Specific Data register.

use core::convert::TryFrom;

use super::{CapacityClass, Geometry};
use crate::sdmmc_proto::BLOCK_LEN;

/// Turn the four words of an R2 response into the register byte stream.
pub(crate) fn register_bytes(response: [u32; 4]) -> [u8; 16] {
    let mut data = [0u8; 16];
    for (chunk, word) in data.chunks_exact_mut(4).zip(response.iter()) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    data
}

/// A version 1.0 CSD, as sent by standard capacity cards.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CsdV1 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// A version 2.0 CSD, as sent by high and extended capacity cards.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CsdV2 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// A Card Specific Data register, in whichever layout the card uses.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Csd {
    /// Standard capacity layout
    V1(CsdV1),
    /// High/extended capacity layout
    V2(CsdV2),
}

impl Csd {
    /// Decode the R2 response to CMD9, using the layout of the given
    /// capacity class.
    pub fn from_response(capacity: CapacityClass, response: [u32; 4]) -> Csd {
        let data = register_bytes(response);
        match capacity {
            CapacityClass::StandardCapacity => Csd::V1(CsdV1 { data }),
            CapacityClass::HighOrExtendedCapacity | CapacityClass::SecuredDevice => {
                Csd::V2(CsdV2 { data })
            }
        }
    }

    /// Block geometry. `None` if the card reports more logical blocks than
    /// a `u32` can count.
    pub fn geometry(&self) -> Option<Geometry> {
        match self {
            Csd::V1(csd) => csd.geometry(),
            Csd::V2(csd) => csd.geometry(),
        }
    }
}

impl CsdV1 {
    /// Create a new, empty, CSD
    pub fn new() -> CsdV1 {
        Default::default()
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(data_read_access_time1, u8, 1, 0, 8);
    define_field!(data_read_access_time2, u8, 2, 0, 8);
    define_field!(max_data_transfer_rate, u8, 3, 0, 8);
    define_field!(card_command_classes, u16, [(4, 0, 8), (5, 4, 4)]);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(read_partial_blocks, bool, 6, 7);
    define_field!(write_block_misalignment, bool, 6, 6);
    define_field!(read_block_misalignment, bool, 6, 5);
    define_field!(dsr_implemented, bool, 6, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u8, [(9, 0, 2), (10, 7, 1)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(erase_sector_size, u8, [(10, 0, 6), (11, 7, 1)]);
    define_field!(write_protect_group_size, u8, 11, 0, 7);
    define_field!(write_protect_group_enable, bool, 12, 7);
    define_field!(write_speed_factor, u8, 12, 2, 3);
    define_field!(max_write_data_length, u8, [(12, 0, 2), (13, 6, 2)]);
    define_field!(write_partial_blocks, bool, 13, 5);
    define_field!(file_format_group, bool, 14, 7);
    define_field!(copy_flag, bool, 14, 6);
    define_field!(permanent_write_protection, bool, 14, 5);
    define_field!(temporary_write_protection, bool, 14, 4);
    define_field!(file_format, u8, 14, 2, 2);
    define_field!(crc, u8, 15, 1, 7);

    /// `(C_SIZE + 1) * 2^(C_SIZE_MULT + 2)` blocks of `2^READ_BL_LEN` bytes,
    /// normalised to 512-byte logical blocks.
    pub fn geometry(&self) -> Option<Geometry> {
        let mult = 1u32 << (u32::from(self.device_size_multiplier()) + 2);
        let block_count = (self.device_size() + 1) * mult;
        let block_size = 1u32 << self.read_block_length();
        let bytes = u64::from(block_count) * u64::from(block_size);
        let logical_block_count = u32::try_from(bytes / u64::from(BLOCK_LEN)).ok()?;
        Some(Geometry {
            block_count,
            block_size,
            logical_block_count,
            logical_block_size: BLOCK_LEN,
        })
    }

    /// Capacity of the card, in bytes.
    pub fn card_capacity_bytes(&self) -> u64 {
        let mult = 1u64 << (u64::from(self.device_size_multiplier()) + 2);
        (u64::from(self.device_size()) + 1) * mult * (1u64 << self.read_block_length())
    }
}

impl CsdV2 {
    /// Create a new, empty, CSD
    pub fn new() -> CsdV2 {
        Default::default()
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(data_read_access_time1, u8, 1, 0, 8);
    define_field!(data_read_access_time2, u8, 2, 0, 8);
    define_field!(max_data_transfer_rate, u8, 3, 0, 8);
    define_field!(card_command_classes, u16, [(4, 0, 8), (5, 4, 4)]);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(read_partial_blocks, bool, 6, 7);
    define_field!(write_block_misalignment, bool, 6, 6);
    define_field!(read_block_misalignment, bool, 6, 5);
    define_field!(dsr_implemented, bool, 6, 4);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(erase_sector_size, u8, [(10, 0, 6), (11, 7, 1)]);
    define_field!(write_protect_group_size, u8, 11, 0, 7);
    define_field!(write_protect_group_enable, bool, 12, 7);
    define_field!(write_speed_factor, u8, 12, 2, 3);
    define_field!(max_write_data_length, u8, [(12, 0, 2), (13, 6, 2)]);
    define_field!(write_partial_blocks, bool, 13, 5);
    define_field!(file_format_group, bool, 14, 7);
    define_field!(copy_flag, bool, 14, 6);
    define_field!(permanent_write_protection, bool, 14, 5);
    define_field!(temporary_write_protection, bool, 14, 4);
    define_field!(file_format, u8, 14, 2, 2);
    define_field!(crc, u8, 15, 1, 7);

    /// `(C_SIZE + 1) * 1024` blocks of 512 bytes.
    pub fn geometry(&self) -> Option<Geometry> {
        let blocks = (u64::from(self.device_size()) + 1) * 1024;
        let block_count = u32::try_from(blocks).ok()?;
        Some(Geometry {
            block_count,
            block_size: BLOCK_LEN,
            logical_block_count: block_count,
            logical_block_size: BLOCK_LEN,
        })
    }

    /// Capacity of the card, in bytes.
    pub fn card_capacity_bytes(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 512 * 1024
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
