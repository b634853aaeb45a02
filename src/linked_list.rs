//! embedded-sdmmc-host - Linked-list DMA nodes
//!
//! A linked-list transfer walks a chain of [`Node`]s without CPU help. Each
//! node describes one buffer; the link descriptor tells the DMA engine where
//! the next node lives, relative to the first one.

use core::convert::TryFrom;
use core::marker::PhantomData;

use crate::bus::{Direction, DmaRequest};
use crate::sdmmc::Error;
use crate::sdmmc_proto::FIFO_BURST_BYTES;

/// Update the list address from the link offset when this node is done
const LINK_UPDATE_ADDRESS: u32 = 1 << 31;
/// Load the buffer size field of the next node
const LINK_UPDATE_SIZE: u32 = 1 << 30;
/// The buffer of this node is ready to be transferred
const LINK_BUFFER_READY: u32 = 1 << 29;
/// Where the next node is, relative to the list base address
const LINK_OFFSET_MASK: u32 = 0x0000_FFFC;

/// Whether a node's buffer may be used by the DMA engine.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// The buffer is being recycled by software
    NotReady,
    /// The buffer can be transferred
    Ready,
}

/// One link of a linked-list transfer, in the layout the DMA engine reads.
#[repr(C)]
#[derive(Debug)]
pub struct Node<'buf> {
    link: u32,
    buffer_base: usize,
    buffer_size: u32,
    _buffer: PhantomData<&'buf mut [u8]>,
}

impl<'buf> Node<'buf> {
    /// Describe `buffer`. Its length must be a non-zero multiple of 32 bytes.
    pub fn new(buffer: &'buf mut [u8]) -> Result<Node<'buf>, Error> {
        if buffer.is_empty() || buffer.len() % FIFO_BURST_BYTES != 0 {
            return Err(Error::InvalidParam);
        }
        let buffer_size = u32::try_from(buffer.len()).map_err(|_| Error::InvalidParam)?;
        Ok(Node {
            link: LINK_UPDATE_SIZE | LINK_BUFFER_READY,
            buffer_base: buffer.as_mut_ptr() as usize,
            buffer_size,
            _buffer: PhantomData,
        })
    }

    /// Base address and size of the node's buffer.
    pub fn buffer(&self) -> (usize, u32) {
        (self.buffer_base, self.buffer_size)
    }

    /// The raw link descriptor.
    pub fn link(&self) -> u32 {
        self.link
    }

    /// The offset of the next node, if there is one.
    pub fn next_offset(&self) -> Option<u32> {
        if self.link & LINK_UPDATE_ADDRESS != 0 {
            Some(self.link & LINK_OFFSET_MASK)
        } else {
            None
        }
    }

    /// Is the buffer ready for the DMA engine?
    pub fn state(&self) -> NodeState {
        if self.link & LINK_BUFFER_READY != 0 {
            NodeState::Ready
        } else {
            NodeState::NotReady
        }
    }

    /// Mark the buffer ready, or not.
    pub fn set_state(&mut self, state: NodeState) {
        match state {
            NodeState::Ready => self.link |= LINK_BUFFER_READY,
            NodeState::NotReady => self.link &= !LINK_BUFFER_READY,
        }
    }

    fn chain_to(&mut self, offset: u32) {
        self.link =
            (self.link & !LINK_OFFSET_MASK) | LINK_UPDATE_ADDRESS | (offset & LINK_OFFSET_MASK);
    }

    fn terminate(&mut self) {
        self.link &= !(LINK_UPDATE_ADDRESS | LINK_OFFSET_MASK);
    }
}

/// A chain of nodes, ready for a linked-list transfer.
#[derive(Debug)]
pub struct Queue<'buf> {
    nodes: &'buf mut [Node<'buf>],
}

impl<'buf> Queue<'buf> {
    /// Chain `nodes` in order. The last node ends the list.
    pub fn new(nodes: &'buf mut [Node<'buf>]) -> Result<Queue<'buf>, Error> {
        if nodes.is_empty() {
            return Err(Error::InvalidParam);
        }
        let node_size = core::mem::size_of::<Node<'_>>();
        let count = nodes.len();
        for (idx, node) in nodes.iter_mut().enumerate() {
            if idx + 1 == count {
                node.terminate();
            } else {
                let offset = u32::try_from((idx + 1) * node_size).map_err(|_| Error::InvalidParam)?;
                if offset > LINK_OFFSET_MASK {
                    return Err(Error::InvalidParam);
                }
                node.chain_to(offset);
            }
        }
        Ok(Queue { nodes })
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a built queue.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The nodes, in transfer order.
    pub fn nodes(&self) -> &[Node<'buf>] {
        self.nodes
    }

    /// A node, to flip its ready state while recycling its buffer.
    pub fn node_mut(&mut self, idx: usize) -> Option<&mut Node<'buf>> {
        self.nodes.get_mut(idx)
    }

    /// Sum of all node buffer sizes, in bytes. `None` on overflow.
    pub fn total_size(&self) -> Option<u32> {
        self.nodes
            .iter()
            .try_fold(0u32, |acc, node| acc.checked_add(node.buffer_size))
    }

    /// The address of the head node; link offsets are relative to it.
    pub fn base_address(&self) -> usize {
        self.nodes.as_ptr() as usize
    }

    pub(crate) fn dma_request(&self, direction: Direction) -> DmaRequest {
        let head = &self.nodes[0];
        DmaRequest::LinkedList {
            direction,
            list_base: self.base_address(),
            buffer_base: head.buffer_base,
            buffer_size: head.buffer_size,
            link: head.link,
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
