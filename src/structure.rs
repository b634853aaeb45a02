//! embedded-sdmmc-host - Useful macros for parsing SD/MMC structures.
//!
//! Card registers are kept as the raw byte stream the card sends, most
//! significant byte first. Fields are located by `(byte offset, start bit,
//! number of bits)` within that stream.

macro_rules! access_field {
    ($self:expr, $offset:expr, $start_bit:expr, 1) => {
        ($self.data()[$offset] & (1 << $start_bit)) != 0
    };
    ($self:expr, $offset:expr, $start:expr, $num_bits:expr) => {
        ($self.data()[$offset] >> $start) & (((1u16 << $num_bits) - 1) as u8)
    };
}

macro_rules! define_field {
    ($name:ident, bool, $offset:expr, $bit:expr) => {
        doc_comment::doc_comment! {
            concat!(
                "Get the `", stringify!($name), "` flag (byte ",
                stringify!($offset), ", bit ", stringify!($bit), ")"
            ),
            pub fn $name(&self) -> bool {
                access_field!(self, $offset, $bit, 1)
            }
        }
    };
    ($name:ident, u8, $offset:expr, $start_bit:expr, $num_bits:expr) => {
        doc_comment::doc_comment! {
            concat!(
                "Get the `", stringify!($name), "` field (byte ",
                stringify!($offset), ", bits ", stringify!($start_bit),
                "+", stringify!($num_bits), ")"
            ),
            pub fn $name(&self) -> u8 {
                access_field!(self, $offset, $start_bit, $num_bits)
            }
        }
    };
    ($name:ident, $type:ty, [ $( ( $offset:expr, $start_bit:expr, $num_bits:expr ) ),+ ]) => {
        doc_comment::doc_comment! {
            concat!(
                "Get the `", stringify!($name), "` field, assembled MSB first from ",
                "(byte, start bit, bits) ", stringify!($( ($offset, $start_bit, $num_bits) ),+)
            ),
            pub fn $name(&self) -> $type {
                let mut result = 0;
                $(
                        result <<= $num_bits;
                        let part = access_field!(self, $offset, $start_bit, $num_bits) as $type;
                        result |=  part;
                )+
                result
            }
        }
    };
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
