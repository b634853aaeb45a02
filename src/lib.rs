//! # embedded-sdmmc-host
//!
//! > An SD card host controller driver written in Embedded Rust
//!
//! This crate drives an SD memory card attached to a native SDMMC host
//! controller: the 1 or 4 bit SD bus, with a command state machine, a data
//! FIFO and an internal DMA engine. It is `#![no_std]` and does not use
//! `alloc`.
//!
//! The register level is left to you. Implement [`Transport`] for your
//! controller, [`Dma`] for its DMA engine and [`KernelClock`] for its clock
//! gate, then hand them to [`SdMmc`]. The driver does the rest: power-up,
//! voltage negotiation, identification, bus width and speed selection, block
//! transfers, erase and abort.
//!
//! ```rust,ignore
//! let mut sdmmc = embedded_sdmmc_host::SdMmc::new(bus, dma, clock, NoCallbacks);
//! sdmmc.set_config(Config::default(), &mut delay)?;
//! writeln!(uart, "{} blocks", sdmmc.card_info().geometry.logical_block_count)?;
//! let mut buffer = [0u8; 512];
//! sdmmc.read_blocks(&mut buffer, 0, 1, 1000)?;
//! ```
//!
//! Transfers come in four flavours:
//!
//! * Polling: [`SdMmc::read_blocks`] and [`SdMmc::write_blocks`] block
//!   until done.
//! * Interrupt: [`SdMmc::read_blocks_it`] and [`SdMmc::write_blocks_it`]
//!   return at once; call [`SdMmc::irq_handler`] from the controller's
//!   interrupt.
//! * DMA: [`SdMmc::read_blocks_dma`] and [`SdMmc::write_blocks_dma`]; the
//!   DMA engine reports back through [`SdMmc::dma_transfer_complete`].
//! * Linked-list DMA: a [`linked_list::Queue`] of buffers, with a
//!   notification per node.
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//! * `linked-list`: linked-list DMA transfers (default).
//! * `card-cid`: keep the card's CID after identification (default).
//! * `spec-version`: read the SCR during configuration and decode the card's
//! specification version (default).
//! * `auto-clock-detection`: ignore the requested bus clock and run at the
//! fastest clock the card's speed class allows.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]
// #![deny(missing_docs)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************


#[macro_use]
mod structure;

pub mod block_device;
pub mod bus;
pub mod card;
#[cfg(feature = "linked-list")]
pub mod linked_list;
pub mod sdmmc;
pub mod sdmmc_proto;

pub use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx};
pub use crate::bus::{
    BusConfig, BusSpeed, BusWidth, ClockEdge, DataPath, DelayLine, Direction, Dma, DmaMode,
    DmaRequest, Flags, KernelClock, ReceiveClock, Transport, VoltageSwitch,
};
pub use crate::card::{
    CapacityClass, CardInfo, CardState, Cid, Csd, Geometry, Scr, SdStatus, SpecVersion, SpeedClass,
};
pub use crate::sdmmc::Error as SdMmcError;
pub use crate::sdmmc::{
    Callbacks, Config, Error, ErrorCodes, NoCallbacks, Operation, SdMmc, SpeedMode, State, Timeouts,
    Transceiver, TransferEvent, TransferMode, XferBuffer,
};

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
