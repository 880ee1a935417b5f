//! General types and constants for EtherCAT.
//!
//! Constants that could need optimization for specific applications
//! are the `TIMEOUT_xxx`. Assumptions for the standard settings are a
//! standard Linux PC or laptop and a wired connection maximal 100 slaves.
//! For use with wireless connections or lots of slaves, the timeouts need
//! increasing. For fast systems running Xenomai and RT-net or alike the
//! timeouts need to be shorter.

use std::time::{Duration, SystemTime};

use bytemuck::{Pod, Zeroable};
use num_traits::PrimInt;
use thiserror::Error;

/// Possible status codes returned at the raw integer boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    /// No frame returned
    NoFrame = -1,

    /// Unknown frame received
    OtherFrame = -2,

    /// General error
    Error = -3,

    /// Too many slaves, or slave index beyond the slave count
    SlaveCountExceeded = -4,

    /// Request timeout
    Timeout = -5,
}

impl From<StatusCode> for i32 {
    fn from(value: StatusCode) -> Self {
        value as i32
    }
}

/// Number of frame buffers per channel
pub const MAX_BUF_COUNT: usize = 16;

/// Timeout value for tx frame to return to rx
pub const TIMEOUT_RETURN: Duration = Duration::from_micros(2000);

/// Timeout value for safe data transfer, max. triple retry
pub const TIMEOUT_RET3: Duration = Duration::from_micros(2000 * 3);

/// Timeout value for rx mailbox cycle
pub const TIMEOUT_RX_MAILBOX: Duration = Duration::from_micros(700_000);

/// Timeout value for check statechange
pub const TIMEOUT_STATE: Duration = Duration::from_micros(2_000_000);

/// Interval between two reads of the AL status register while waiting for a state
pub const STATE_POLL_INTERVAL: Duration = Duration::from_micros(1000);

/// Size of EEPROM bitmap cache
pub const MAX_EEP_BITMAP_SIZE: usize = 128;

/// Size of EEPROM cache buffer
pub const MAX_EEP_BUF_SIZE: usize = MAX_EEP_BITMAP_SIZE << 5;

/// Default number of retries if WKC <= 0
pub const DEFAULT_RETRIES: u8 = 3;

/// Default group size in 2^x
pub const LOG_GROUP_OFFSET: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid EtherCAT state 0x{0:X}")]
pub struct InvalidEthercatState(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EthercatState {
    /// No valid state
    None,

    /// Init state
    Init,

    /// Pre-operational
    PreOperational,

    /// Boot state
    Boot,

    /// Safe-operational
    SafeOperational,

    /// Operational
    Operational = 8,

    /// (ACK) error
    Error = 0x10,
}

impl EthercatState {
    /// Acknowledge bit, written together with a state to clear an error. Same bit as `Error`.
    pub const ACK: u16 = 0x10;

    /// Mask selecting the state nibble of an AL status value
    pub const MASK: u16 = 0x0F;

    /// Strips the error bit from a raw AL status
    pub const fn state_of(al_status: u16) -> u16 {
        al_status & Self::MASK
    }

    /// Whether a raw AL status carries the error bit
    pub const fn has_error(al_status: u16) -> bool {
        al_status & Self::ACK != 0
    }
}

impl From<EthercatState> for u8 {
    fn from(value: EthercatState) -> Self {
        value as u8
    }
}

impl From<EthercatState> for u16 {
    fn from(value: EthercatState) -> Self {
        u16::from(u8::from(value))
    }
}

impl TryFrom<u16> for EthercatState {
    type Error = InvalidEthercatState;

    fn try_from(value: u16) -> Result<Self, InvalidEthercatState> {
        match value {
            0 => Ok(EthercatState::None),
            1 => Ok(EthercatState::Init),
            2 => Ok(EthercatState::PreOperational),
            3 => Ok(EthercatState::Boot),
            4 => Ok(EthercatState::SafeOperational),
            8 => Ok(EthercatState::Operational),
            0x10 => Ok(EthercatState::Error),
            _ => Err(InvalidEthercatState(value)),
        }
    }
}

impl PartialEq<EthercatState> for u16 {
    fn eq(&self, other: &EthercatState) -> bool {
        *self == u16::from(*other)
    }
}

/// Slave registers touched by the master core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EthercatRegister {
    ApplicationLayerControl,

    /// AL status, followed by the AL status code at offset 4
    ApplicationLayerStatus,

    EepromConfig,
    FieldbusMemoryManagementUnit0,
    SyncManager0,
}

impl From<EthercatRegister> for u16 {
    fn from(value: EthercatRegister) -> Self {
        match value {
            EthercatRegister::ApplicationLayerControl => 0x120,
            EthercatRegister::ApplicationLayerStatus => 0x130,
            EthercatRegister::EepromConfig => 0x500,
            EthercatRegister::FieldbusMemoryManagementUnit0 => 0x600,
            EthercatRegister::SyncManager0 => 0x800,
        }
    }
}

/// Source of an entry in the error list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    ServiceDataObjectError,
    Emergency,
    PacketError,
    MailboxError,
    FileOverEthercatError,
    FileOverEthercatBufferTooSmall,
    FileOverEthercatFileNotFound,

    /// Slave raised the error bit in its AL status
    ApplicationLayerError,
}

/// Struct to retrieve errors
#[derive(Debug, Clone, Copy)]
pub struct ErrorInfo {
    /// Time at which the error was generated
    pub time: SystemTime,

    /// Signal bit, error set but not read
    pub signal: bool,

    /// Slave number that generated the error
    pub slave: u16,

    /// CoE Service Data Object index that generated the error
    pub index: u16,

    /// CoE Service Data Object subindex that generated the error
    pub sub_index: u8,

    /// Type of error
    pub error_type: ErrorType,

    /// Abort code, AL status code or raw status, depending on `error_type`
    pub code: i32,
}

impl ErrorInfo {
    pub fn new(slave: u16, error_type: ErrorType, code: i32) -> Self {
        Self {
            time: SystemTime::now(),
            signal: true,
            slave,
            index: 0,
            sub_index: 0,
            error_type,
            code,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
/// A struct representing a numeric value in EtherCAT (little endian) format.
/// This struct makes it harder or even impossible to perform some operations on values
/// converted to EtherCAT.
pub struct Ethercat<Int: PrimInt>(Int);

#[allow(unsafe_code)]
// SAFETY: transparent wrapper around a primitive integer, for which all-zeroes is valid.
unsafe impl<Int: PrimInt + Zeroable> Zeroable for Ethercat<Int> {}

#[allow(unsafe_code)]
// SAFETY: transparent wrapper around a primitive integer without padding.
unsafe impl<Int: PrimInt + Pod> Pod for Ethercat<Int> {}

impl<Int: PrimInt> Ethercat<Int> {
    pub const fn from_raw(value: Int) -> Self {
        Self(value)
    }

    pub fn from_host(value: Int) -> Self {
        host_to_ethercat(value)
    }

    pub fn to_host(self) -> Int {
        ethercat_to_host(self)
    }

    pub const fn into_inner(self) -> Int {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl Ethercat<u16> {
    pub const fn to_bytes(self) -> [u8; 2] {
        self.0.to_ne_bytes()
    }

    pub const fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_ne_bytes(bytes))
    }
}

impl Ethercat<u32> {
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_ne_bytes()
    }

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_ne_bytes(bytes))
    }
}

pub fn host_to_ethercat<Int: PrimInt>(value: Int) -> Ethercat<Int> {
    Ethercat(value.to_le())
}

pub fn ethercat_to_host<Int: PrimInt>(value: Ethercat<Int>) -> Int {
    Int::from_le(value.0)
}
