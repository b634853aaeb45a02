//! The Card Identification register.

use super::csd::register_bytes;

/// The 128-bit CID, as returned by CMD2.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Cid {
    /// The 16 bytes of the register, most significant first
    pub data: [u8; 16],
}

impl Cid {
    /// Decode the R2 response to CMD2.
    pub fn from_response(response: [u32; 4]) -> Cid {
        Cid {
            data: register_bytes(response),
        }
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(manufacturer_id, u8, 0, 0, 8);
    define_field!(oem_id, u16, [(1, 0, 8), (2, 0, 8)]);
    define_field!(product_revision, u8, 8, 0, 8);
    define_field!(product_serial_number, u32, [(9, 0, 8), (10, 0, 8), (11, 0, 8), (12, 0, 8)]);
    define_field!(manufacturing_date, u16, [(13, 0, 4), (14, 0, 8)]);
    define_field!(crc, u8, 15, 1, 7);

    /// The five ASCII characters of the product name.
    pub fn product_name(&self) -> [u8; 5] {
        let mut name = [0u8; 5];
        name.copy_from_slice(&self.data[3..8]);
        name
    }

    /// Manufacturing date as `(year, month)`.
    pub fn manufacturing_year_month(&self) -> (u16, u8) {
        let date = self.manufacturing_date();
        (2000 + (date >> 4), (date & 0xF) as u8)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
