//! The 512-bit SD status register and the CMD6 switch status.

use crate::sdmmc_proto::SD_STATUS_LEN;

/// The SD status, as returned by ACMD13.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct SdStatus {
    /// The 64 bytes of the register, in the order the card sent them
    pub data: [u8; SD_STATUS_LEN],
}

impl Default for SdStatus {
    fn default() -> SdStatus {
        SdStatus {
            data: [0u8; SD_STATUS_LEN],
        }
    }
}

impl core::fmt::Debug for SdStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("SdStatus")
            .field("data_bus_width", &self.data_bus_width())
            .field("speed_class", &self.speed_class())
            .field("au_size", &self.au_size())
            .field("uhs_speed_grade", &self.uhs_speed_grade())
            .field("uhs_au_size", &self.uhs_au_size())
            .finish()
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for SdStatus {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "SdStatus {{ bus_width: {}, speed_class: {}, au_size: {}, uhs: {}/{} }}",
            self.data_bus_width(),
            self.speed_class(),
            self.au_size(),
            self.uhs_speed_grade(),
            self.uhs_au_size()
        )
    }
}

impl SdStatus {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(data_bus_width, u8, 0, 6, 2);
    define_field!(secured_mode, bool, 0, 5);
    define_field!(card_type, u16, [(2, 0, 8), (3, 0, 8)]);
    define_field!(protected_area_size, u32, [(4, 0, 8), (5, 0, 8), (6, 0, 8), (7, 0, 8)]);
    define_field!(speed_class, u8, 8, 0, 8);
    define_field!(performance_move, u8, 9, 0, 8);
    define_field!(au_size, u8, 10, 4, 4);
    define_field!(erase_size, u16, [(11, 0, 8), (12, 0, 8)]);
    define_field!(erase_timeout, u8, 13, 2, 6);
    define_field!(erase_offset, u8, 13, 0, 2);
    define_field!(uhs_speed_grade, u8, 14, 4, 4);
    define_field!(uhs_au_size, u8, 14, 0, 4);
    define_field!(video_speed_class, u8, 15, 0, 8);
}

/// The status block returned by CMD6.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct SwitchStatus {
    /// The 64 bytes of the block, in the order the card sent them
    pub data: [u8; SD_STATUS_LEN],
}

impl SwitchStatus {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(max_current, u16, [(0, 0, 8), (1, 0, 8)]);
    define_field!(function_group1_high_speed, bool, 13, 1);
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
