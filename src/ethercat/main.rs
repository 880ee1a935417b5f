//! Master context.
//!
//! The context owns the slave and group tables, the scratch memory shared by scan and
//! mapping (EEPROM cache, index stack, PDO assignment buffers) and the context-wide
//! error and distributed clock state. One context drives one segment and is not meant
//! to be mutated from several threads at once: wrap it in a lock held for the duration
//! of a transition when it has to be shared.

use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use heapless::{Deque, String as HeaplessString};
use log::{debug, trace, warn};
use thiserror::Error;

use super::{
    base::RegisterPort,
    image::IoMapping,
    r#type::{
        ErrorInfo, ErrorType, Ethercat, EthercatRegister, EthercatState, DEFAULT_RETRIES,
        LOG_GROUP_OFFSET, MAX_BUF_COUNT, MAX_EEP_BITMAP_SIZE, MAX_EEP_BUF_SIZE,
        STATE_POLL_INTERVAL, TIMEOUT_RETURN,
    },
};
use crate::osal::{self, OsalTimer};

/// Max. entries in EtherCAT error list
pub const MAX_E_LIST_ENTRIES: usize = 64;

/// Max length of readable name in slavelist and Object Description List
pub const MAX_NAME_LENGTH: u16 = 40;

/// Maximum number of slaves in array, one slot is kept for the topology-wide entry
pub const MAX_SLAVES: u16 = 200;

/// Maximum number of groups
pub const MAX_GROUPS: u8 = 2;

/// Maximum number of IO segments per group
pub const MAX_IO_SEGMENTS: usize = 64;

/// Max Sync Manager used
pub const MAX_SM: u8 = 8;

/// Max Fieldbus Memory Management Units used
pub const MAX_FMMU: usize = 4;

/// Maximum number of concurrent threads in mapping
pub const MAX_MAPT: usize = 1;

/// Fieldbus Memory Management Unit, register layout
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Fmmu {
    pub log_start: Ethercat<u32>,
    pub log_length: Ethercat<u16>,
    pub log_start_bit: u8,
    pub log_end_bit: u8,
    pub physical_start: Ethercat<u16>,
    pub physical_start_bit: u8,
    pub fmmu_type: u8,
    pub fmmu_active: u8,
    pub unused: u8,
    pub unused2: Ethercat<u16>,
}

/// Sync manager, register layout
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SyncManager {
    pub start_address: Ethercat<u16>,
    pub sm_length: Ethercat<u16>,
    pub sm_flags: Ethercat<u32>,
}

impl SyncManager {
    /// A sync manager with a zero start address is not programmed
    pub fn is_used(&self) -> bool {
        !self.start_address.is_zero()
    }
}

/// AL status block as read from register 0x130
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct StateStatus {
    pub state: Ethercat<u16>,
    pub unused: Ethercat<u16>,
    pub al_status_code: Ethercat<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid sync manager type {0}")]
pub struct InvalidSyncManagerType(pub u8);

/// Sync manager type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncManagerType {
    #[default]
    Unused,
    MailboxWrite,
    MailboxRead,
    Outputs,
    Inputs,
}

impl From<SyncManagerType> for u8 {
    fn from(value: SyncManagerType) -> Self {
        match value {
            SyncManagerType::Unused => 0,
            SyncManagerType::MailboxWrite => 1,
            SyncManagerType::MailboxRead => 2,
            SyncManagerType::Outputs => 3,
            SyncManagerType::Inputs => 4,
        }
    }
}

impl TryFrom<u8> for SyncManagerType {
    type Error = InvalidSyncManagerType;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unused),
            1 => Ok(Self::MailboxWrite),
            2 => Ok(Self::MailboxRead),
            3 => Ok(Self::Outputs),
            4 => Ok(Self::Inputs),
            _ => Err(InvalidSyncManagerType(value)),
        }
    }
}

/// Mailbox parameters of a slave
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Mailbox {
    /// Length of write mailbox in bytes, 0 if no mailbox
    pub length: u16,
    pub write_offset: u16,

    /// Length of read mailbox in bytes
    pub read_length: u16,
    pub read_offset: u16,

    /// Supported mailbox protocols
    pub protocols: u16,

    /// Counter value of mailbox link layer protocol 1..7
    pub count: u8,
}

/// Detected EtherCAT slave.
///
/// Identity, alias and DC fields are filled by the scan and distributed clock layers.
#[derive(Debug, Default, Clone)]
pub struct Slave {
    /// State of slave, including the error bit
    pub state: u16,

    /// Application layer status code
    pub al_status_code: u16,

    /// Configured address
    pub config_address: u16,

    /// Alias address
    pub alias_address: u16,

    /// Manufacturer from EEprom
    pub eep_manufacturer: u32,

    /// EEProm ID
    pub eep_id: u32,

    /// EEProm revision
    pub eep_revision: u32,

    pub output_bits: u16,

    /// Output bytes, if output_bits < 8, output_bytes = 0
    pub output_bytes: u32,

    /// Location of the outputs in the caller's IOmap
    pub outputs: Option<IoMapping>,

    /// Startbit in first output byte
    pub output_startbit: u8,

    pub input_bits: u16,

    /// Input bytes, if input_bits < 8, input_bytes = 0
    pub input_bytes: u32,

    /// Location of the inputs in the caller's IOmap
    pub inputs: Option<IoMapping>,

    /// Startbit in first input byte
    pub input_startbit: u8,

    pub sync_manager: [SyncManager; MAX_SM as usize],
    pub sync_manager_type: [SyncManagerType; MAX_SM as usize],

    /// Fieldbus Memory Management Units
    pub fmmu: [Fmmu; MAX_FMMU],

    /// First unused Fieldbus Memory Management Unit
    pub fmmu_unused: u8,

    pub mailbox: Mailbox,

    /// Has DC capability
    pub has_dc: bool,

    /// Next DC slave
    pub dc_next: u16,

    /// Previous DC slave
    pub dc_previous: u16,

    /// DC cycle time
    pub dc_cycle: Duration,

    /// DC shift from clock modulus boundary
    pub dc_shift: i32,

    /// DC sync activation
    pub dc_active: bool,

    /// False for eeprom to master, true for eeprom to PDI
    pub eep_pdi: bool,

    pub group: u8,

    /// Whether the slave is responding, maintained by the state control loop
    pub is_lost: bool,

    pub name: HeaplessString<{ MAX_NAME_LENGTH as usize + 1 }>,
}

impl Slave {
    pub fn sync_manager(&self, index: u8) -> Option<&SyncManager> {
        self.sync_manager.get(usize::from(index))
    }

    pub fn sync_manager_mut(&mut self, index: u8) -> Option<&mut SyncManager> {
        self.sync_manager.get_mut(usize::from(index))
    }

    /// Type of a sync manager, `Unused` for indices past `MAX_SM`
    pub fn sync_manager_type(&self, index: u8) -> SyncManagerType {
        self.sync_manager_type
            .get(usize::from(index))
            .copied()
            .unwrap_or_default()
    }

    pub fn fmmu(&self, index: usize) -> Option<&Fmmu> {
        self.fmmu.get(index)
    }

    pub fn fmmu_mut(&mut self, index: usize) -> Option<&mut Fmmu> {
        self.fmmu.get_mut(index)
    }

    /// FMMUs the state machine programs on the way to safe operational
    pub fn used_fmmus(&self) -> &[Fmmu] {
        &self.fmmu[..usize::from(self.fmmu_unused).min(MAX_FMMU)]
    }
}

/// EtherCAT slave group
#[derive(Debug, Clone)]
pub struct SlaveGroup {
    /// Logical start address for this group
    pub logical_start_address: u32,

    /// Output bytes, 0 if output bits < 8
    pub output_bytes: u32,

    /// Output IOmap buffer
    pub outputs: Option<IoMapping>,

    /// Input bytes, 0 if input bits < 8
    pub input_bytes: u32,

    /// Input IOmap buffer
    pub inputs: Option<IoMapping>,

    /// Has DC capability
    pub has_dc: bool,

    /// Next DC slave
    pub dc_next: u16,

    /// Number of used IO segments
    pub used_segment_count: u16,

    pub first_input_segment: u16,
    pub input_offset: u16,

    /// Expected workcounter outputs
    pub work_counter_outputs: u16,

    /// Expected workcounter inputs
    pub work_counter_inputs: u16,

    pub check_slaves_states: bool,

    /// IO segmentation list. Datagrams must not break SM in two.
    pub io_segments: [u32; MAX_IO_SEGMENTS],
}

impl SlaveGroup {
    fn new(index: u8) -> Self {
        Self {
            logical_start_address: u32::from(index) << LOG_GROUP_OFFSET,
            output_bytes: 0,
            outputs: None,
            input_bytes: 0,
            inputs: None,
            has_dc: false,
            dc_next: 0,
            used_segment_count: 0,
            first_input_segment: 0,
            input_offset: 0,
            work_counter_outputs: 0,
            work_counter_inputs: 0,
            check_slaves_states: false,
            io_segments: [0; MAX_IO_SEGMENTS],
        }
    }
}

/// Eeprom Fieldbus Memory Management Unit
#[derive(Debug, Default, Clone, Copy)]
pub struct EepromFmmu {
    pub start_position: u16,
    pub number_fmmu: u8,
    pub fmmu: [u8; 4],
}

#[derive(Debug, Default, Clone)]
pub struct EepromSyncManager {
    pub start_position: u16,
    pub number_sync_manager: u8,
    pub phase_start: u16,
    pub phase_length: u16,
    pub control_register: u8,
    pub slave_register: u8,
    pub activate: u8,
    pub process_data_interface_control: u8,
}

/// Sync manager communication type structure for communication access
#[derive(Debug, Default, Clone)]
pub struct SyncManagerCommunicationType {
    pub number: u8,
    pub null: u8,
    pub sync_manager_type: [SyncManagerType; MAX_SM as usize],
}

/// Process data object assign structure for communication access
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct PdoAssign {
    pub number: u8,
    pub null: u8,
    pub index: [u16; 256],
}

/// Process data object description structure for communication access
#[derive(Debug, Clone, Copy, Zeroable)]
pub struct PdoDescription {
    pub number: u8,
    pub null: u8,
    pub pdo: [u32; 256],
}

/// Stack structure to store segmented logical read, logical write, logical read/write constructs
#[derive(Debug, Default, Clone)]
pub struct IndexStack {
    pub pushed: u8,
    pub pulled: u8,
    pub index: [u8; MAX_BUF_COUNT],
    pub length: [u16; MAX_BUF_COUNT],
    pub dc_offset: [u16; MAX_BUF_COUNT],
}

impl IndexStack {
    /// Records a sent frame. Returns false when the stack is full.
    pub fn push(&mut self, index: u8, length: u16, dc_offset: u16) -> bool {
        let slot = usize::from(self.pushed);
        if slot >= MAX_BUF_COUNT {
            return false;
        }
        self.index[slot] = index;
        self.length[slot] = length;
        self.dc_offset[slot] = dc_offset;
        self.pushed += 1;
        true
    }

    /// Next recorded frame as (index, length, dc offset), in push order
    pub fn pull(&mut self) -> Option<(u8, u16, u16)> {
        if self.pulled >= self.pushed {
            return None;
        }
        let slot = usize::from(self.pulled);
        self.pulled += 1;
        Some((self.index[slot], self.length[slot], self.dc_offset[slot]))
    }

    pub fn clear(&mut self) {
        self.pushed = 0;
        self.pulled = 0;
    }
}

/// Runtime limits and tuning of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Capacity of the slave table, the slave count always stays below it
    pub max_slaves: u16,

    /// Number of groups
    pub max_groups: u8,

    /// Pause between two AL status reads while waiting for a state
    pub poll_interval: Duration,

    /// Retries of EEPROM ownership writes
    pub retries: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_slaves: MAX_SLAVES,
            max_groups: MAX_GROUPS,
            poll_interval: STATE_POLL_INTERVAL,
            retries: DEFAULT_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("slave capacity must be between 1 and {max}, got {0}", max = MAX_SLAVES)]
    InvalidSlaveCapacity(u16),

    #[error("group capacity must be between 1 and {max}, got {0}", max = MAX_GROUPS)]
    InvalidGroupCapacity(u8),

    #[error("slave table is full, {0} slaves configured")]
    SlaveCountExceeded(u16),
}

/// Context structure referenced by all master functions.
///
/// All references handed out by a context borrow from it, so none of them can outlive
/// [`Context::destroy`].
pub struct Context<P> {
    /// Register port of the segment
    port: P,

    settings: Settings,

    slavelist: Vec<Slave>,

    /// Topology-wide entry, accumulates states of broadcast reads
    all_slaves: Slave,

    grouplist: Vec<SlaveGroup>,

    /// Eeprom cache buffer
    esibuf: Box<[u8; MAX_EEP_BUF_SIZE]>,

    /// Eeprom cache map
    esimap: Box<[u32; MAX_EEP_BITMAP_SIZE]>,

    /// Current slave for eeprom cache
    esislave: u16,

    elist: Deque<ErrorInfo, MAX_E_LIST_ENTRIES>,

    index_stack: IndexStack,

    ecaterror: bool,

    /// Last DC time from slaves
    dc_time: i64,

    sync_manager_communication_type: Vec<SyncManagerCommunicationType>,
    pdo_assign: Vec<PdoAssign>,
    pdo_description: Vec<PdoDescription>,
    eep_sync_manager: EepromSyncManager,
    eep_fmmu: EepromFmmu,
}

impl<P> Context<P> {
    /// Creates a context with the default limits
    pub fn create(port: P) -> Self {
        Self::build(port, Settings::default())
    }

    /// Creates a context with custom limits
    ///
    /// # Errors
    /// Returns an error if the slave or group capacity is zero or exceeds the compiled maximum.
    pub fn with_settings(port: P, settings: Settings) -> Result<Self, ContextError> {
        if settings.max_slaves == 0 || settings.max_slaves > MAX_SLAVES {
            return Err(ContextError::InvalidSlaveCapacity(settings.max_slaves));
        }
        if settings.max_groups == 0 || settings.max_groups > MAX_GROUPS {
            return Err(ContextError::InvalidGroupCapacity(settings.max_groups));
        }
        Ok(Self::build(port, settings))
    }

    fn build(port: P, settings: Settings) -> Self {
        debug!(
            "Creating master context for {} slaves and {} groups",
            settings.max_slaves, settings.max_groups
        );
        Self {
            port,
            settings,
            slavelist: Vec::with_capacity(usize::from(settings.max_slaves)),
            all_slaves: Slave::default(),
            grouplist: (0..settings.max_groups).map(SlaveGroup::new).collect(),
            esibuf: Box::new([0; MAX_EEP_BUF_SIZE]),
            esimap: Box::new([0; MAX_EEP_BITMAP_SIZE]),
            esislave: 0,
            elist: Deque::new(),
            index_stack: IndexStack::default(),
            ecaterror: false,
            dc_time: 0,
            sync_manager_communication_type: vec![
                SyncManagerCommunicationType::default();
                MAX_MAPT
            ],
            pdo_assign: vec![PdoAssign::zeroed(); MAX_MAPT],
            pdo_description: vec![PdoDescription::zeroed(); MAX_MAPT],
            eep_sync_manager: EepromSyncManager::default(),
            eep_fmmu: EepromFmmu::default(),
        }
    }

    /// Releases everything the context owns and hands back the port
    pub fn destroy(self) -> P {
        debug!("Destroying master context with {} slaves", self.slave_count());
        self.port
    }

    pub const fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of slaves found in configuration
    pub fn slave_count(&self) -> u16 {
        self.slavelist.len() as u16
    }

    /// Slave at `index`, `None` for `index >= slave_count()`
    pub fn slave(&self, index: u16) -> Option<&Slave> {
        self.slavelist.get(usize::from(index))
    }

    pub fn slave_mut(&mut self, index: u16) -> Option<&mut Slave> {
        self.slavelist.get_mut(usize::from(index))
    }

    /// Port together with a slave entry, for transports that need both
    pub(crate) fn port_and_slave(&mut self, index: u16) -> Option<(&mut P, &Slave)> {
        let Self {
            port, slavelist, ..
        } = self;
        slavelist.get(usize::from(index)).map(|slave| (port, slave))
    }

    /// Appends a slave found by the network scan and returns its index
    ///
    /// # Errors
    /// Returns an error if adding the slave would make the slave count reach the capacity.
    pub fn add_slave(&mut self, slave: Slave) -> Result<u16, ContextError> {
        let index = self.slave_count();
        if index + 1 >= self.settings.max_slaves {
            return Err(ContextError::SlaveCountExceeded(index));
        }
        trace!(
            "Adding slave {index} at configured address {:#06x}",
            slave.config_address
        );
        self.slavelist.push(slave);
        Ok(index)
    }

    /// Resets slave list, group list and caches, as done before a new scan
    pub fn clear_slaves(&mut self) {
        self.slavelist.clear();
        self.all_slaves = Slave::default();
        self.grouplist = (0..self.settings.max_groups)
            .map(SlaveGroup::new)
            .collect();
        self.index_stack.clear();
        self.reset_eeprom_cache();
    }

    /// Topology-wide entry. Never addressed by the state machine.
    pub const fn all_slaves(&self) -> &Slave {
        &self.all_slaves
    }

    pub fn all_slaves_mut(&mut self) -> &mut Slave {
        &mut self.all_slaves
    }

    pub fn group_count(&self) -> u8 {
        self.grouplist.len() as u8
    }

    pub fn group(&self, index: u8) -> Option<&SlaveGroup> {
        self.grouplist.get(usize::from(index))
    }

    pub fn group_mut(&mut self, index: u8) -> Option<&mut SlaveGroup> {
        self.grouplist.get_mut(usize::from(index))
    }

    /// Whether an error was recorded and not yet popped
    pub const fn error_flag(&self) -> bool {
        self.ecaterror
    }

    /// Records an error and raises the error flag. The oldest entry is dropped when full.
    pub fn push_error(&mut self, mut error: ErrorInfo) {
        while let Err(rejected) = self.elist.push_back(error) {
            self.elist.pop_front();
            error = rejected;
        }
        self.ecaterror = true;
    }

    /// Oldest recorded error. The flag drops once the list is empty.
    pub fn pop_error(&mut self) -> Option<ErrorInfo> {
        let error = self.elist.pop_front();
        if self.elist.is_empty() {
            self.ecaterror = false;
        }
        error.map(|error| ErrorInfo {
            signal: false,
            ..error
        })
    }

    pub fn clear_errors(&mut self) {
        self.elist.clear();
        self.ecaterror = false;
    }

    pub fn error_count(&self) -> usize {
        self.elist.len()
    }

    /// Last distributed clock time read from the reference slave
    pub const fn distributed_clock_time(&self) -> i64 {
        self.dc_time
    }

    /// Updated by the distributed clock collaborator after every DC-enabled exchange
    pub fn set_distributed_clock_time(&mut self, time: i64) {
        self.dc_time = time;
    }

    pub fn eeprom_buffer_mut(&mut self) -> &mut [u8] {
        self.esibuf.as_mut_slice()
    }

    pub fn eeprom_bitmap_mut(&mut self) -> &mut [u32] {
        self.esimap.as_mut_slice()
    }

    /// Slave whose EEPROM content is in the cache
    pub const fn eeprom_slave(&self) -> u16 {
        self.esislave
    }

    pub fn set_eeprom_slave(&mut self, slave: u16) {
        self.esislave = slave;
    }

    pub fn reset_eeprom_cache(&mut self) {
        self.esibuf.fill(0);
        self.esimap.fill(0);
        self.esislave = 0;
    }

    pub fn index_stack_mut(&mut self) -> &mut IndexStack {
        &mut self.index_stack
    }

    pub fn sync_manager_communication_type_mut(
        &mut self,
        thread_number: usize,
    ) -> Option<&mut SyncManagerCommunicationType> {
        self.sync_manager_communication_type.get_mut(thread_number)
    }

    pub fn pdo_assign_mut(&mut self, thread_number: usize) -> Option<&mut PdoAssign> {
        self.pdo_assign.get_mut(thread_number)
    }

    pub fn pdo_description_mut(&mut self, thread_number: usize) -> Option<&mut PdoDescription> {
        self.pdo_description.get_mut(thread_number)
    }

    pub fn eep_sync_manager_mut(&mut self) -> &mut EepromSyncManager {
        &mut self.eep_sync_manager
    }

    pub fn eep_fmmu_mut(&mut self) -> &mut EepromFmmu {
        &mut self.eep_fmmu
    }
}

fn read_state_status<P: RegisterPort>(
    port: &mut P,
    config_address: u16,
    timeout: Duration,
) -> Option<StateStatus> {
    let mut status = StateStatus::zeroed();
    let wkc = port.fprd(
        config_address,
        EthercatRegister::ApplicationLayerStatus.into(),
        bytemuck::bytes_of_mut(&mut status),
        timeout,
    );
    (wkc > 0).then_some(status)
}

fn store_state<P>(context: &mut Context<P>, slave: u16, status: StateStatus) {
    let al_status = status.state.to_host();
    let al_status_code = status.al_status_code.to_host();
    if let Some(entry) = context.slave_mut(slave) {
        entry.state = al_status;
        entry.al_status_code = al_status_code;
    }
    if EthercatState::has_error(al_status) {
        warn!("Slave {slave} reports state {al_status:#04x}, AL status code {al_status_code:#06x}");
        context.push_error(ErrorInfo::new(
            slave,
            ErrorType::ApplicationLayerError,
            i32::from(al_status_code),
        ));
    }
}

/// Reads the AL status of one slave once and stores it in the slave entry.
///
/// # Returns
/// The full AL status including the error bit, `None` if the slave is unknown or didn't respond
pub fn read_state<P: RegisterPort>(
    context: &mut Context<P>,
    slave: u16,
    timeout: Duration,
) -> Option<u16> {
    let config_address = context.slave(slave)?.config_address;
    let status = read_state_status(&mut context.port, config_address, timeout)?;
    store_state(context, slave, status);
    Some(status.state.to_host())
}

/// Check actual slave state, blocking until the requested state is reached or the timeout
/// expires. The full AL status, error bit included, is stored in the slave entry; an error
/// bit also lands in the error list.
///
/// # Parameters
/// `context`: Context struct
/// `slave`: Slave number
/// `request_state`: Requested state
/// `timeout`: Timeout value
///
/// # Returns
/// Observed state without the error bit, 0 for an unknown slave
pub fn statecheck<P: RegisterPort>(
    context: &mut Context<P>,
    slave: u16,
    request_state: EthercatState,
    timeout: Duration,
) -> u16 {
    let Some(config_address) = context.slave(slave).map(|entry| entry.config_address) else {
        return 0;
    };
    let timer = OsalTimer::new(timeout);
    let poll_interval = context.settings.poll_interval;
    let mut status;
    loop {
        // A slave that doesn't answer reads as state none
        status = read_state_status(&mut context.port, config_address, TIMEOUT_RETURN)
            .unwrap_or_default();
        let state = EthercatState::state_of(status.state.to_host());
        trace!("Slave {slave} in state {state:#x}, waiting for {request_state:?}");
        if state == request_state || timer.is_expired() {
            break;
        }
        osal::usleep(&timer, poll_interval);
    }
    store_state(context, slave, status);
    EthercatState::state_of(status.state.to_host())
}

/// Check the state of all slaves at once with a broadcast read. The OR-ed AL status is
/// stored in the topology-wide entry.
///
/// # Returns
/// Lowest common state without the error bit
pub fn statecheck_all<P: RegisterPort>(
    context: &mut Context<P>,
    request_state: EthercatState,
    timeout: Duration,
) -> u16 {
    let timer = OsalTimer::new(timeout);
    let poll_interval = context.settings.poll_interval;
    let mut al_status;
    loop {
        let mut word = [0; 2];
        context.port.brd(
            0,
            EthercatRegister::ApplicationLayerStatus.into(),
            &mut word,
            TIMEOUT_RETURN,
        );
        al_status = Ethercat::<u16>::from_bytes(word).to_host();
        if EthercatState::state_of(al_status) == request_state || timer.is_expired() {
            break;
        }
        osal::usleep(&timer, poll_interval);
    }
    context.all_slaves.state = al_status;
    EthercatState::state_of(al_status)
}

fn write_eeprom_config<P: RegisterPort>(
    context: &mut Context<P>,
    config_address: u16,
    value: u8,
) -> i32 {
    let mut wkc = 0;
    for _ in 0..=context.settings.retries {
        wkc = context.port.fpwr(
            config_address,
            EthercatRegister::EepromConfig.into(),
            &[value],
            TIMEOUT_RETURN,
        );
        if wkc > 0 {
            break;
        }
    }
    wkc
}

/// Hands control of the slave's EEPROM to its process data interface.
/// Does nothing if the PDI already owns it.
///
/// # Returns
/// Working counter of the last write, 1 if nothing had to be written, 0 for an unknown slave
pub fn eeprom_to_pdi<P: RegisterPort>(context: &mut Context<P>, slave: u16) -> i32 {
    let Some(entry) = context.slave(slave) else {
        return 0;
    };
    if entry.eep_pdi {
        return 1;
    }
    let config_address = entry.config_address;
    let wkc = write_eeprom_config(context, config_address, 1);
    if wkc <= 0 {
        warn!("Slave {slave} didn't acknowledge EEPROM handover to PDI");
    }
    if let Some(entry) = context.slave_mut(slave) {
        entry.eep_pdi = true;
    }
    wkc
}

/// Takes control of the slave's EEPROM back from the process data interface.
/// Does nothing if the master already owns it.
///
/// # Returns
/// Working counter of the last write, 1 if nothing had to be written, 0 for an unknown slave
pub fn eeprom_to_master<P: RegisterPort>(context: &mut Context<P>, slave: u16) -> i32 {
    let Some(entry) = context.slave(slave) else {
        return 0;
    };
    if !entry.eep_pdi {
        return 1;
    }
    let config_address = entry.config_address;

    // Force the EEPROM away from the PDI, then hand it to the master
    write_eeprom_config(context, config_address, 2);
    let wkc = write_eeprom_config(context, config_address, 0);
    if wkc <= 0 {
        warn!("Slave {slave} didn't acknowledge EEPROM handover to master");
    }
    if let Some(entry) = context.slave_mut(slave) {
        entry.eep_pdi = false;
    }
    wkc
}
