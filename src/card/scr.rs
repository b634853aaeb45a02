//! The SD Configuration Register.

use super::SpecVersion;
use crate::sdmmc_proto::SCR_LEN;

/// The 64-bit SCR, as returned by ACMD51.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Scr {
    /// The 8 bytes of the register, in the order the card sent them
    pub data: [u8; SCR_LEN],
}

impl Scr {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(scr_structure, u8, 0, 4, 4);
    define_field!(sd_spec, u8, 0, 0, 4);
    define_field!(data_stat_after_erase, bool, 1, 7);
    define_field!(sd_security, u8, 1, 4, 3);
    define_field!(sd_bus_widths, u8, 1, 0, 4);
    define_field!(sd_spec3, bool, 2, 7);
    define_field!(ex_security, u8, 2, 3, 4);
    define_field!(sd_spec4, bool, 2, 2);
    define_field!(sd_specx, u8, [(2, 0, 2), (3, 6, 2)]);
    define_field!(cmd_support, u8, 3, 0, 4);

    /// Does the card support a 4-bit bus?
    pub fn supports_wide_bus(&self) -> bool {
        self.sd_bus_widths() & 0b0100 != 0
    }

    /// Does the card support a 1-bit bus?
    pub fn supports_single_bus(&self) -> bool {
        self.sd_bus_widths() & 0b0001 != 0
    }

    /// The physical layer specification version the card complies with.
    pub fn spec_version(&self) -> SpecVersion {
        match (self.sd_spec(), self.sd_spec3(), self.sd_spec4(), self.sd_specx()) {
            (0, false, false, 0) => SpecVersion::V1_0x,
            (1, false, false, 0) => SpecVersion::V1_10,
            (2, false, false, 0) => SpecVersion::V2_00,
            (2, true, false, 0) => SpecVersion::V3_0x,
            (2, true, true, 0) => SpecVersion::V4_xx,
            (2, true, _, 1) => SpecVersion::V5_xx,
            (2, true, _, 2) => SpecVersion::V6_xx,
            _ => SpecVersion::Unsupported,
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
