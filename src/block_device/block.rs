use core::ops::AddAssign;

/// One 512 byte logical block of the card.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    /// The 512 bytes in this block.
    pub contents: [u8; Block::LEN],
}

/// The index of a logical block, as passed to the data commands after
/// scaling for the card's addressing mode.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockIdx(pub u32);

/// A number of logical blocks.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockCount(pub u32);

impl Block {
    /// Every transfer moves blocks of this size.
    pub const LEN: usize = 512;

    /// Create a new block full of zeros.
    pub fn new() -> Block {
        Block {
            contents: [0u8; Self::LEN],
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Block::new()
    }
}

impl core::fmt::Debug for Block {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        writeln!(fmt, "Block:")?;
        for line in self.contents.chunks(32) {
            for b in line {
                write!(fmt, "{:02x}", b)?;
            }
            writeln!(fmt)?;
        }
        Ok(())
    }
}

impl AddAssign<BlockCount> for BlockIdx {
    fn add_assign(&mut self, rhs: BlockCount) {
        self.0 += rhs.0
    }
}

impl BlockIdx {
    /// The index `num` blocks further on, if it fits.
    pub fn checked_add(self, num: BlockCount) -> Option<BlockIdx> {
        self.0.checked_add(num.0).map(BlockIdx)
    }

    /// Iterate over `num` blocks starting at this one. `None` if the range
    /// does not fit in a 32-bit index.
    pub fn range(self, num: BlockCount) -> Option<BlockIter> {
        self.checked_add(num).map(|end| BlockIter::new(self, end))
    }
}

/// An iterator returned from `BlockIdx::range`.
pub struct BlockIter {
    end: BlockIdx,
    current: BlockIdx,
}

impl BlockIter {
    /// Create a new `BlockIter`, from the given start block up to (but not
    /// including) the given end block.
    pub fn new(start: BlockIdx, end: BlockIdx) -> BlockIter {
        BlockIter {
            end,
            current: start,
        }
    }
}

impl Iterator for BlockIter {
    type Item = BlockIdx;
    fn next(&mut self) -> Option<Self::Item> {
        if self.current.0 >= self.end.0 {
            None
        } else {
            let this = self.current;
            self.current += BlockCount(1);
            Some(this)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn range_stops_at_end() {
        let blocks: Vec<BlockIdx> = BlockIdx(7).range(BlockCount(3)).unwrap().collect();
        assert_eq!(blocks, [BlockIdx(7), BlockIdx(8), BlockIdx(9)]);
        assert_eq!(BlockIdx(7).range(BlockCount(0)).unwrap().count(), 0);
    }

    #[test]
    fn range_past_the_last_index() {
        assert!(BlockIdx(u32::MAX).range(BlockCount(2)).is_none());
        assert_eq!(BlockIdx(u32::MAX - 1).range(BlockCount(1)).unwrap().count(), 1);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
