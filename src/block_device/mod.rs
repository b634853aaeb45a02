//! embedded-sdmmc-host - Block Device support
//!
//! The card seen as an array of 512 byte logical blocks. Cards with larger
//! native blocks are normalised when the CSD is decoded, so a block index
//! here is always a logical block index.

mod block;
pub use block::*;

/// A store of 512 byte blocks. [`SdMmc`](crate::SdMmc) implements it with
/// polled single block transfers.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;

    /// Read `blocks.len()` consecutive blocks, starting at
    /// `start_block_idx`. `reason` is only used for logging.
    ///
    /// A range that runs past [`BlockDevice::num_blocks`] is rejected before
    /// anything is read.
    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error>;

    /// Write `blocks.len()` consecutive blocks, starting at
    /// `start_block_idx`, with the same range check as `read`.
    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error>;

    /// The logical block count of the card. Fails until a card has been
    /// identified.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error>;

    /// Read a single block.
    fn read_block(&mut self, block_idx: BlockIdx) -> Result<Block, Self::Error> {
        let mut blocks = [Block::new()];
        self.read(&mut blocks, block_idx, "read_block")?;
        let [block] = blocks;
        Ok(block)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
