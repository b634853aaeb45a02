//! A simulated SD card behind a simulated host controller.
//!
//! [`Card`] models enough of the card and the controller to run the driver
//! end to end: commands and responses, a FIFO, sticky flags, interrupt
//! enables and a DMA engine that copies straight to and from memory.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

#[cfg(feature = "linked-list")]
use embedded_sdmmc_host::linked_list::Node;
use embedded_sdmmc_host::sdmmc_proto::*;
use embedded_sdmmc_host::{
    BusConfig, BusSpeed, Callbacks, Config, DataPath, DelayLine, Direction, Dma, DmaMode, DmaRequest,
    ErrorCodes, Flags, KernelClock, ReceiveClock, SdMmc, Transport, TransferEvent, VoltageSwitch,
};

/// Kernel clock of the simulated controller.
pub const KERNEL_HZ: u32 = 200_000_000;

/// RCA published by the simulated card.
pub const RCA: u16 = 0xB368;

/// Card status of an R1 response: current state and READY_FOR_DATA.
fn card_status(state: u32) -> u32 {
    (state << R1_CURRENT_STATE_SHIFT) | R1_READY_FOR_DATA
}

const STATE_TRANSFER: u32 = 4;
const STATE_SENDING: u32 = 5;
const STATE_RECEIVING: u32 = 6;

/// A version 1.0 CSD for a standard capacity card.
pub fn csd_v1(c_size: u32, c_size_mult: u8, read_bl_len: u8) -> [u8; 16] {
    let mut csd = [0u8; 16];
    csd[1] = 0x26;
    csd[3] = 0x32;
    csd[4] = 0x5F;
    csd[5] = 0x50 | (read_bl_len & 0x0F);
    csd[6] = 0x80 | ((c_size >> 10) & 0x03) as u8;
    csd[7] = (c_size >> 2) as u8;
    csd[8] = ((c_size & 0x03) << 6) as u8;
    csd[9] = (c_size_mult >> 1) & 0x03;
    csd[10] = (c_size_mult & 0x01) << 7;
    csd[15] = 0x01;
    csd
}

/// A version 2.0 CSD for a high capacity card.
pub fn csd_v2(c_size: u32) -> [u8; 16] {
    let mut csd = [0u8; 16];
    csd[0] = 0x40;
    csd[1] = 0x0E;
    csd[3] = 0x32;
    csd[4] = 0x5B;
    csd[5] = 0x59;
    csd[7] = ((c_size >> 16) & 0x3F) as u8;
    csd[8] = (c_size >> 8) as u8;
    csd[9] = c_size as u8;
    csd[10] = 0x7F;
    csd[11] = 0x80;
    csd[15] = 0x01;
    csd
}

/// A CID for product "SIM01", serial 0x12345678, made September 2021.
pub const CID: [u8; 16] = [
    0x1D, 0x41, 0x44, b'S', b'I', b'M', b'0', b'1', 0x10, 0x12, 0x34, 0x56, 0x78, 0x01, 0x59, 0x01,
];

/// An R2 response, most significant word first.
fn r2_words(data: &[u8; 16]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (word, chunk) in words.iter_mut().zip(data.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

/// Something the DMA engine will report back.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DmaEvent {
    /// A linked-list node is done
    Node,
    /// The whole transfer is done
    Complete,
    /// The transfer failed
    Error,
    /// An `abort_it` has finished
    AbortComplete,
}

/// The data phase in progress.
#[derive(Debug)]
struct Transfer {
    direction: Direction,
    first_block: u32,
    /// Bytes still expected from the host, for writes
    incoming: Vec<u8>,
    expected: usize,
    dma: DmaMode,
}

/// The simulated card and controller.
pub struct Card {
    // What kind of card this is
    pub high_capacity: bool,
    pub legacy: bool,
    pub accepts_1v8: bool,
    pub ultra_high_speed: bool,
    pub wide_bus: bool,
    pub switch_supported: bool,
    pub csd: [u8; 16],
    pub logical_blocks: u32,
    /// ACMD41 polls answered with busy before the card is ready
    pub op_cond_busy: u32,
    /// CMD3 polls answered with RCA 0
    pub rca_zero_polls: u32,

    // Fault injection
    /// Fail the next use of this command with these codes
    pub fail_command: Option<(Command, ErrorCodes)>,
    /// Raise this flag instead of moving data on the next data command
    pub data_error: Option<Flags>,
    /// Refuse to start DMA transfers
    pub dma_start_fails: bool,
    /// Report a DMA error instead of completing the next DMA transfer
    pub dma_error: bool,
    /// Keep the next read in the FIFO without ever finishing it
    pub stall_reads: bool,
    /// CMD12 is answered but the data path never reports that it stopped
    pub stop_never_settles: bool,
    /// Smallest delay unit whose line covers one clock period. `None`
    /// never gives a valid length.
    pub delay_lock_unit: Option<u8>,
    /// Delay line length measured once the unit is long enough
    pub delay_length: u16,

    // What the driver did
    pub commands: Vec<(Command, u32)>,
    pub configs: Vec<BusConfig>,
    pub dma_requests: Vec<DmaRequest>,
    pub dma_aborts: u32,
    pub bus_speed: BusSpeed,
    pub receive_clock: ReceiveClock,
    pub delay_block: bool,
    pub delay_line: DelayLine,
    pub signalling_1v8: bool,
    pub powered: bool,
    pub delayed_ms: u32,

    // Internal state
    storage: HashMap<u32, [u8; 512]>,
    app_cmd: bool,
    selected: bool,
    block_len: u32,
    flags: Flags,
    enabled: Flags,
    response: [u32; 4],
    rx: VecDeque<u32>,
    path: Option<DataPath>,
    transfer: Option<Transfer>,
    multi_block_open: bool,
    voltage_switch: VoltageSwitch,
    busy_d0: bool,
    dma_events: VecDeque<DmaEvent>,
    erase_start: u32,
    erase_end: u32,
    tick: Cell<u32>,
}

/// A card shared between the bus, the DMA engine and the test.
pub type SharedCard = Rc<RefCell<Card>>;

impl Card {
    fn new(high_capacity: bool, csd: [u8; 16], logical_blocks: u32) -> Card {
        Card {
            high_capacity,
            legacy: false,
            accepts_1v8: false,
            ultra_high_speed: false,
            wide_bus: true,
            switch_supported: true,
            csd,
            logical_blocks,
            op_cond_busy: 2,
            rca_zero_polls: 0,
            fail_command: None,
            data_error: None,
            dma_start_fails: false,
            dma_error: false,
            stall_reads: false,
            stop_never_settles: false,
            delay_lock_unit: Some(20),
            delay_length: 0x00FF,
            commands: Vec::new(),
            configs: Vec::new(),
            dma_requests: Vec::new(),
            dma_aborts: 0,
            bus_speed: BusSpeed::Default,
            receive_clock: ReceiveClock::Internal,
            delay_block: false,
            delay_line: DelayLine::default(),
            signalling_1v8: false,
            powered: false,
            delayed_ms: 0,
            storage: HashMap::new(),
            app_cmd: false,
            selected: false,
            block_len: 512,
            flags: Flags::empty(),
            enabled: Flags::empty(),
            response: [0; 4],
            rx: VecDeque::new(),
            path: None,
            transfer: None,
            multi_block_open: false,
            voltage_switch: VoltageSwitch::Disabled,
            busy_d0: false,
            dma_events: VecDeque::new(),
            erase_start: 0,
            erase_end: 0,
            tick: Cell::new(0),
        }
    }

    /// A 2 MiB standard capacity card.
    pub fn sdsc() -> Card {
        Card::new(false, csd_v1(1023, 0, 9), 4096)
    }

    /// A high capacity card with the given C_SIZE.
    pub fn sdhc(c_size: u32) -> Card {
        Card::new(true, csd_v2(c_size), (c_size + 1) * 1024)
    }

    /// A UHS-I card that can switch to 1.8V.
    pub fn uhs() -> Card {
        let mut card = Card::sdhc(3999);
        card.accepts_1v8 = true;
        card.ultra_high_speed = true;
        card
    }

    pub fn shared(self) -> SharedCard {
        Rc::new(RefCell::new(self))
    }

    /// Contents of a block. Unwritten blocks read as zeros.
    pub fn block(&self, idx: u32) -> [u8; 512] {
        self.storage.get(&idx).copied().unwrap_or([0u8; 512])
    }

    pub fn set_block(&mut self, idx: u32, contents: [u8; 512]) {
        self.storage.insert(idx, contents);
    }

    /// How many times the driver sent `command`.
    pub fn count(&self, command: Command) -> usize {
        self.commands.iter().filter(|(c, _)| *c == command).count()
    }

    /// Arguments of every `command` sent.
    pub fn arguments(&self, command: Command) -> Vec<u32> {
        self.commands
            .iter()
            .filter(|(c, _)| *c == command)
            .map(|(_, arg)| *arg)
            .collect()
    }

    pub fn last_config(&self) -> BusConfig {
        *self.configs.last().expect("never configured")
    }

    fn scr(&self) -> [u8; 8] {
        let widths = if self.wide_bus { 0x05 } else { 0x01 };
        [0x02, 0x30 | widths, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00]
    }

    fn sd_status(&self) -> [u8; 64] {
        let mut status = [0u8; 64];
        status[8] = 0x04;
        status[10] = 0x90;
        if self.ultra_high_speed {
            status[14] = 0x11;
        }
        status
    }

    fn switch_status(&self) -> [u8; 64] {
        let mut status = [0u8; 64];
        status[1] = 0x64;
        if self.switch_supported {
            status[13] = 0x03;
        }
        status
    }

    fn flags_now(&self) -> Flags {
        let mut flags = self.flags;
        if self.rx.is_empty() {
            flags |= Flags::RX_FIFO_EMPTY;
        }
        if self.rx.len() >= FIFO_BURST_WORDS {
            flags |= Flags::RX_FIFO_HALF_FULL;
        }
        if let Some(transfer) = &self.transfer {
            if transfer.direction == Direction::ToCard
                && transfer.dma == DmaMode::Disabled
                && transfer.incoming.len() < transfer.expected
            {
                flags |= Flags::TX_FIFO_HALF_EMPTY;
            }
        }
        if self.busy_d0 {
            flags |= Flags::BUSY_D0;
        }
        flags
    }

    /// Raise flags, as the controller would.
    pub fn raise_flags(&mut self, flags: Flags) {
        self.flags |= flags;
    }

    /// The delay line length the delay block measures.
    fn measured_delay_length(&self) -> Option<u16> {
        if !self.delay_block {
            return None;
        }
        match self.delay_lock_unit {
            Some(lock) if self.delay_line.unit >= lock => Some(self.delay_length),
            // Units too short: the whole line fits in one period
            Some(_) => Some(0x0FFF),
            None => None,
        }
    }

    /// Is an enabled interrupt flagged?
    pub fn interrupt_pending(&self) -> bool {
        self.flags_now().intersects(self.enabled)
    }

    pub fn enabled_interrupts(&self) -> Flags {
        self.enabled
    }

    /// Is a data phase still running?
    pub fn transfer_active(&self) -> bool {
        self.transfer.is_some()
    }

    fn block_index(&self, arg: u32) -> u32 {
        if self.high_capacity {
            arg
        } else {
            arg / 512
        }
    }

    fn queue_rx(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.rx.push_back(u32::from_le_bytes(word));
        }
    }

    fn read_storage(&self, first_block: u32, length: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(length);
        let mut idx = first_block;
        while data.len() < length {
            data.extend_from_slice(&self.block(idx));
            idx += 1;
        }
        data.truncate(length);
        data
    }

    fn write_storage(&mut self, first_block: u32, data: &[u8]) {
        for (offset, chunk) in data.chunks(512).enumerate() {
            let mut block = [0u8; 512];
            block[..chunk.len()].copy_from_slice(chunk);
            self.storage.insert(first_block + offset as u32, block);
        }
    }

    /// Send a register block through the FIFO, for ACMD13, ACMD51 and CMD6.
    fn send_register(&mut self, bytes: &[u8]) -> Result<(), ErrorCodes> {
        match self.path {
            Some(path) if path.direction == Direction::FromCard => {
                if self.block_len as usize != bytes.len() || path.length as usize != bytes.len() {
                    return Err(ErrorCodes::BLOCK_LEN_ERR);
                }
                if let Some(flag) = self.data_error.take() {
                    self.flags |= flag;
                    return Ok(());
                }
                self.queue_rx(bytes);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn start_data(&mut self, command: Command, arg: u32) -> Result<(), ErrorCodes> {
        let path = match self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        let direction = match command {
            Command::ReadSingleBlock | Command::ReadMultipleBlock => Direction::FromCard,
            _ => Direction::ToCard,
        };
        assert_eq!(path.direction, direction, "data path armed the wrong way");
        assert_eq!(path.block_size_code, 9, "data path block size");
        let length = path.length as usize;
        let blocks = (length / 512) as u32;
        let first_block = self.block_index(arg);
        if first_block + blocks > self.logical_blocks {
            return Err(ErrorCodes::from_card_status(R1_ADDR_OUT_OF_RANGE));
        }
        self.multi_block_open = matches!(
            command,
            Command::ReadMultipleBlock | Command::WriteMultipleBlock
        );

        if let Some(flag) = self.data_error.take() {
            self.flags |= flag;
            self.transfer = Some(Transfer {
                direction,
                first_block,
                incoming: Vec::new(),
                expected: 0,
                dma: path.dma,
            });
            return Ok(());
        }

        match path.dma {
            DmaMode::Disabled => {
                if direction == Direction::FromCard {
                    let data = self.read_storage(first_block, length);
                    self.queue_rx(&data);
                }
                self.transfer = Some(Transfer {
                    direction,
                    first_block,
                    incoming: Vec::new(),
                    expected: if direction == Direction::ToCard { length } else { 0 },
                    dma: path.dma,
                });
            }
            DmaMode::Linear | DmaMode::LinkedList => {
                self.transfer = Some(Transfer {
                    direction,
                    first_block,
                    incoming: Vec::new(),
                    expected: 0,
                    dma: path.dma,
                });
                self.run_dma(direction, first_block, length);
            }
        }
        Ok(())
    }

    /// Move the data of a DMA transfer and queue its events.
    fn run_dma(&mut self, direction: Direction, first_block: u32, length: usize) {
        let request = *self.dma_requests.last().expect("DMA not started");
        if self.dma_error {
            self.dma_error = false;
            self.dma_events.push_back(DmaEvent::Error);
            return;
        }
        match request {
            DmaRequest::Linear { memory, length: dma_length, .. } => {
                assert!(dma_length as usize >= length);
                // The driver lends this buffer for the whole transfer
                unsafe {
                    match direction {
                        Direction::FromCard => {
                            let data = self.read_storage(first_block, length);
                            std::slice::from_raw_parts_mut(memory as *mut u8, length)
                                .copy_from_slice(&data);
                        }
                        Direction::ToCard => {
                            let data = std::slice::from_raw_parts(memory as *const u8, length).to_vec();
                            self.write_storage(first_block, &data);
                        }
                    }
                }
            }
            #[cfg(feature = "linked-list")]
            DmaRequest::LinkedList { list_base, .. } => {
                let mut data = match direction {
                    Direction::FromCard => self.read_storage(first_block, length),
                    Direction::ToCard => Vec::with_capacity(length),
                };
                let mut done = 0;
                let mut offset = 0u32;
                loop {
                    // The queue is lent to the driver for the whole transfer
                    let node = unsafe { &*((list_base + offset as usize) as *const Node) };
                    let (base, size) = node.buffer();
                    let count = std::cmp::min(size as usize, length - done);
                    unsafe {
                        match direction {
                            Direction::FromCard => std::slice::from_raw_parts_mut(base as *mut u8, count)
                                .copy_from_slice(&data[done..done + count]),
                            Direction::ToCard => data
                                .extend_from_slice(std::slice::from_raw_parts(base as *const u8, count)),
                        }
                    }
                    done += count;
                    self.dma_events.push_back(DmaEvent::Node);
                    match node.next_offset() {
                        Some(next) if done < length => offset = next,
                        _ => break,
                    }
                }
                if direction == Direction::ToCard {
                    data.truncate(length);
                    self.write_storage(first_block, &data);
                }
            }
            #[cfg(not(feature = "linked-list"))]
            DmaRequest::LinkedList { .. } => unreachable!("linked-list DMA without the feature"),
        }
        self.dma_events.push_back(DmaEvent::Complete);
    }

    /// The next thing the DMA engine has to say. Completion ends the data
    /// phase, as the controller would.
    pub fn next_dma_event(&mut self) -> Option<DmaEvent> {
        let event = self.dma_events.pop_front()?;
        match event {
            DmaEvent::Node => self.flags |= Flags::IDMA_BUFFER_COMPLETE,
            DmaEvent::Complete => {
                self.transfer = None;
                self.flags |= Flags::DATA_END;
            }
            DmaEvent::Error => self.flags |= Flags::IDMA_TRANSFER_ERROR,
            DmaEvent::AbortComplete => {}
        }
        Some(event)
    }

    fn execute(&mut self, command: Command, arg: u32) -> Result<(), ErrorCodes> {
        if let Some((failing, codes)) = self.fail_command {
            if failing == command {
                self.fail_command = None;
                return Err(codes);
            }
        }
        if command.is_app() && !self.app_cmd {
            return Err(ErrorCodes::ILLEGAL_CMD);
        }
        self.app_cmd = false;
        let rca_arg = u32::from(RCA) << 16;
        self.response = [card_status(STATE_TRANSFER), 0, 0, 0];

        match command {
            Command::GoIdleState => {
                self.selected = false;
                self.response = [0; 4];
            }
            Command::SendIfCond => {
                if self.legacy {
                    return Err(ErrorCodes::CMD_RSP_TIMEOUT);
                }
                self.response[0] = arg & 0xFFF;
            }
            Command::AppCmd => {
                self.app_cmd = true;
                self.response[0] |= R1_APP_CMD;
            }
            Command::AppSendOpCond => {
                if self.op_cond_busy > 0 {
                    self.op_cond_busy -= 1;
                    self.response[0] = 0x00FF_8000;
                } else {
                    let mut ocr = OCR_POWER_UP_DONE | 0x00FF_8000;
                    if self.high_capacity && arg & OCR_HIGH_CAPACITY != 0 {
                        ocr |= OCR_HIGH_CAPACITY;
                    }
                    if self.accepts_1v8 && arg & OCR_SWITCH_1_8V != 0 {
                        ocr |= OCR_SWITCH_1_8V;
                    }
                    self.response[0] = ocr;
                }
            }
            Command::VoltageSwitch => {
                if self.voltage_switch == VoltageSwitch::Armed {
                    self.flags |= Flags::CLOCK_STOP;
                    self.busy_d0 = true;
                }
            }
            Command::AllSendCid => self.response = r2_words(&CID),
            Command::SendRelativeAddr => {
                if self.rca_zero_polls > 0 {
                    self.rca_zero_polls -= 1;
                    self.response[0] = 0x0500;
                } else {
                    self.response[0] = rca_arg | 0x0500;
                }
            }
            Command::SendCsd => {
                if arg != rca_arg {
                    return Err(ErrorCodes::CMD_RSP_TIMEOUT);
                }
                self.response = r2_words(&self.csd);
            }
            Command::SelectCard => {
                if arg != rca_arg {
                    return Err(ErrorCodes::CMD_RSP_TIMEOUT);
                }
                self.selected = true;
            }
            Command::SetBlockLen => self.block_len = arg,
            Command::AppSdStatus => {
                let status = self.sd_status();
                self.send_register(&status)?;
            }
            Command::AppSendScr => {
                let scr = self.scr();
                self.send_register(&scr)?;
            }
            Command::AppSetBusWidth => {
                if arg == BUS_WIDTH_4BIT_ARG && !self.wide_bus {
                    return Err(ErrorCodes::ILLEGAL_CMD);
                }
            }
            Command::SwitchFunction => {
                let status = self.switch_status();
                self.send_register(&status)?;
            }
            Command::SendStatus => {
                if arg != rca_arg {
                    return Err(ErrorCodes::CMD_RSP_TIMEOUT);
                }
                let state = match &self.transfer {
                    Some(t) if t.direction == Direction::FromCard => STATE_SENDING,
                    Some(_) => STATE_RECEIVING,
                    None => STATE_TRANSFER,
                };
                self.response[0] = card_status(state);
            }
            Command::ReadSingleBlock
            | Command::ReadMultipleBlock
            | Command::WriteSingleBlock
            | Command::WriteMultipleBlock => {
                if !self.selected {
                    return Err(ErrorCodes::ILLEGAL_CMD);
                }
                self.start_data(command, arg)?;
            }
            Command::StopTransmission => match self.transfer.take() {
                Some(transfer) => {
                    self.rx.clear();
                    self.dma_events.clear();
                    self.multi_block_open = false;
                    if self.stop_never_settles {
                        return Ok(());
                    }
                    self.flags |= Flags::DATA_ABORT;
                    if transfer.direction == Direction::ToCard {
                        self.flags |= Flags::BUSY_D0_END;
                    }
                }
                None if self.multi_block_open => self.multi_block_open = false,
                None => return Err(ErrorCodes::CMD_RSP_TIMEOUT),
            },
            Command::EraseWrBlkStart => self.erase_start = self.block_index(arg),
            Command::EraseWrBlkEnd => self.erase_end = self.block_index(arg),
            Command::Erase => {
                for idx in self.erase_start..=self.erase_end {
                    self.storage.remove(&idx);
                }
            }
        }
        Ok(())
    }

    fn pop_rx(&mut self) -> u32 {
        let word = self.rx.pop_front().unwrap_or(0);
        if self.rx.is_empty() && !self.stall_reads {
            self.flags |= Flags::DATA_END;
            if let Some(t) = &self.transfer {
                if t.direction == Direction::FromCard {
                    self.transfer = None;
                }
            }
        }
        word
    }

    fn push_tx(&mut self, word: u32) {
        let done = match &mut self.transfer {
            Some(t) if t.direction == Direction::ToCard && t.incoming.len() < t.expected => {
                t.incoming.extend_from_slice(&word.to_le_bytes());
                t.incoming.len() >= t.expected
            }
            _ => false,
        };
        if done {
            if let Some(t) = self.transfer.take() {
                self.write_storage(t.first_block, &t.incoming[..t.expected]);
            }
            self.flags |= Flags::DATA_END;
        }
    }
}

/// The controller side of the simulated card.
pub struct SimBus(pub SharedCard);

impl Transport for SimBus {
    fn power_on(&mut self) {
        self.0.borrow_mut().powered = true;
    }

    fn power_off(&mut self) {
        self.0.borrow_mut().powered = false;
    }

    fn configure(&mut self, config: &BusConfig) {
        self.0.borrow_mut().configs.push(*config);
    }

    fn send_command(&mut self, command: Command, argument: u32, _timeout_ms: u32) -> Result<(), ErrorCodes> {
        let mut card = self.0.borrow_mut();
        card.commands.push((command, argument));
        card.execute(command, argument)
    }

    fn response(&self, slot: usize) -> u32 {
        self.0.borrow().response[slot]
    }

    fn read_fifo(&mut self) -> u32 {
        self.0.borrow_mut().pop_rx()
    }

    fn write_fifo(&mut self, word: u32) {
        self.0.borrow_mut().push_tx(word)
    }

    fn arm_data_path(&mut self, path: &DataPath) {
        self.0.borrow_mut().path = Some(*path);
    }

    fn disarm_data_path(&mut self) {
        let mut card = self.0.borrow_mut();
        card.path = None;
        card.rx.clear();
        card.transfer = None;
    }

    fn is_flag_active(&self, flags: Flags) -> bool {
        self.0.borrow().flags_now().intersects(flags)
    }

    fn clear_flags(&mut self, flags: Flags) {
        self.0.borrow_mut().flags.remove(flags);
    }

    fn enable_interrupts(&mut self, flags: Flags) {
        self.0.borrow_mut().enabled.insert(flags);
    }

    fn disable_interrupts(&mut self, flags: Flags) {
        self.0.borrow_mut().enabled.remove(flags);
    }

    fn enabled_interrupts(&self) -> Flags {
        self.0.borrow().enabled
    }

    fn set_voltage_switch(&mut self, step: VoltageSwitch) {
        let mut card = self.0.borrow_mut();
        card.voltage_switch = step;
        if step == VoltageSwitch::Started {
            card.busy_d0 = false;
            card.signalling_1v8 = true;
            card.flags |= Flags::VOLTAGE_SWITCH_END;
        }
    }

    fn set_bus_speed(&mut self, speed: BusSpeed) {
        self.0.borrow_mut().bus_speed = speed;
    }

    fn select_receive_clock(&mut self, clock: ReceiveClock) {
        self.0.borrow_mut().receive_clock = clock;
    }

    fn set_delay_block(&mut self, enabled: bool) {
        self.0.borrow_mut().delay_block = enabled;
    }

    fn is_delay_block_enabled(&self) -> bool {
        self.0.borrow().delay_block
    }

    fn set_delay_line(&mut self, line: DelayLine) {
        self.0.borrow_mut().delay_line = line;
    }

    fn delay_line(&self) -> DelayLine {
        self.0.borrow().delay_line
    }

    fn delay_line_length(&self) -> Option<u16> {
        self.0.borrow().measured_delay_length()
    }

    fn get_tick(&self) -> u32 {
        let card = self.0.borrow();
        let now = card.tick.get();
        card.tick.set(now.wrapping_add(1));
        now
    }
}

/// The DMA engine of the simulated controller.
pub struct SimDma(pub SharedCard);

impl Dma for SimDma {
    type Error = ();

    fn start(&mut self, request: &DmaRequest) -> Result<(), ()> {
        let mut card = self.0.borrow_mut();
        if card.dma_start_fails {
            return Err(());
        }
        card.dma_requests.push(*request);
        Ok(())
    }

    fn abort(&mut self) {
        let mut card = self.0.borrow_mut();
        card.dma_aborts += 1;
        card.dma_events.clear();
    }

    fn abort_it(&mut self) -> Result<(), ()> {
        let mut card = self.0.borrow_mut();
        card.dma_aborts += 1;
        card.dma_events.clear();
        card.dma_events.push_back(DmaEvent::AbortComplete);
        Ok(())
    }
}

/// The kernel clock of the simulated controller.
pub struct SimClock {
    pub enabled: bool,
    pub hz: u32,
}

impl KernelClock for SimClock {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn kernel_clock_hz(&self) -> u32 {
        if self.enabled {
            self.hz
        } else {
            0
        }
    }
}

/// A delay that only keeps count.
pub struct SimDelay(pub SharedCard);

impl embedded_hal::blocking::delay::DelayMs<u32> for SimDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().delayed_ms += ms;
    }
}

/// What the driver told the application.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    Transfer(TransferEvent),
    Error(ErrorCodes),
    AbortComplete,
    Transceiver(bool),
}

/// Callbacks that write down every call.
#[derive(Clone, Default)]
pub struct Recorder(pub Rc<RefCell<Vec<Event>>>);

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Callbacks for Recorder {
    fn transfer_complete(&mut self, event: TransferEvent) {
        self.0.borrow_mut().push(Event::Transfer(event));
    }

    fn error(&mut self, errors: ErrorCodes) {
        self.0.borrow_mut().push(Event::Error(errors));
    }

    fn abort_complete(&mut self) {
        self.0.borrow_mut().push(Event::AbortComplete);
    }

    fn drive_transceiver(&mut self, enable: bool) {
        self.0.borrow_mut().push(Event::Transceiver(enable));
    }
}

pub type Host<'buf> = SdMmc<'buf, SimBus, SimDma, SimClock, Recorder>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A controller in front of `card`, not yet configured.
pub fn host<'buf>(card: &SharedCard) -> (Host<'buf>, Recorder) {
    init_logging();
    let recorder = Recorder::default();
    let host = SdMmc::new(
        SimBus(card.clone()),
        SimDma(card.clone()),
        SimClock {
            enabled: false,
            hz: KERNEL_HZ,
        },
        recorder.clone(),
    );
    (host, recorder)
}

/// A controller that has identified `card` with `config`.
pub fn identified<'buf>(card: &SharedCard, config: Config) -> (Host<'buf>, Recorder) {
    let (mut host, recorder) = host(card);
    host.set_config(config, &mut SimDelay(card.clone()))
        .expect("identification failed");
    card.borrow_mut().commands.clear();
    (host, recorder)
}

/// Feed DMA events and interrupts to the driver until nothing is left.
pub fn run_to_completion(host: &mut Host, card: &SharedCard) {
    for _ in 0..100_000 {
        let event = card.borrow_mut().next_dma_event();
        match event {
            Some(DmaEvent::Node) => host.irq_handler(),
            Some(DmaEvent::Complete) => host.dma_transfer_complete(),
            Some(DmaEvent::Error) => host.dma_transfer_error(),
            Some(DmaEvent::AbortComplete) => host.dma_abort_complete(),
            None => {
                let pending = card.borrow().interrupt_pending();
                if pending {
                    host.irq_handler();
                } else {
                    return;
                }
            }
        }
    }
    panic!("the transfer never finished");
}

/// A block full of a pattern derived from `seed`.
pub fn pattern(seed: u8) -> [u8; 512] {
    let mut block = [0u8; 512];
    for (i, b) in block.iter_mut().enumerate() {
        *b = seed.wrapping_mul(31).wrapping_add(i as u8);
    }
    block
}

/// `count` consecutive pattern blocks, as one buffer.
pub fn patterns(seed: u8, count: usize) -> Vec<u8> {
    (0..count)
        .flat_map(|i| pattern(seed.wrapping_add(i as u8)).to_vec())
        .collect()
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
