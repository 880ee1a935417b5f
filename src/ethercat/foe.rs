//! File over EtherCAT reads.

use std::time::Duration;

use log::{debug, warn};

use super::{
    main::{Context, Slave},
    r#type::StatusCode,
};

/// File access through a slave's mailbox
pub trait FoeTransport {
    /// Reads a file from the slave.
    ///
    /// `size` holds the capacity available in `data` on entry and the number of bytes read
    /// on return. Returns a positive working counter on success, otherwise a status code.
    fn foe_read(
        &mut self,
        slave: &Slave,
        file_name: &str,
        password: u32,
        size: &mut i32,
        data: &mut [u8],
        timeout: Duration,
    ) -> i32;
}

/// Outcome of a file read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoeRead {
    /// Number of bytes read into the buffer
    Transferred(usize),

    /// Status reported by the transport, never positive
    Failed(i32),
}

impl FoeRead {
    /// Interprets a transport status and the size it reported. A successful status with
    /// a negative size is a general error.
    pub fn from_status(status: i32, size: i32) -> Self {
        if status <= 0 {
            return Self::Failed(status);
        }
        match usize::try_from(size) {
            Ok(size) => Self::Transferred(size),
            Err(_) => Self::Failed(StatusCode::Error.into()),
        }
    }

    /// Byte count for a successful read, the status otherwise.
    ///
    /// An empty file and a zero status both map to 0.
    pub fn into_raw(self) -> i32 {
        match self {
            Self::Transferred(size) => i32::try_from(size).unwrap_or(i32::MAX),
            Self::Failed(status) => status,
        }
    }

    pub const fn is_transferred(&self) -> bool {
        matches!(self, Self::Transferred(_))
    }
}

/// FoE read with the buffer size passed by value.
///
/// # Parameters
/// - `context`: Context struct
/// - `slave`: Slave number
/// - `file_name`: Filename of file to read
/// - `password`: Password
/// - `size`: Size of the file buffer
/// - `data`: File buffer
/// - `timeout`: Timeout per mailbox cycle, standard is `TIMEOUT_RX_MAILBOX`
pub fn foe_read_checked<P: FoeTransport>(
    context: &mut Context<P>,
    slave: u16,
    file_name: &str,
    password: u32,
    size: i32,
    data: &mut [u8],
    timeout: Duration,
) -> FoeRead {
    let Some((port, entry)) = context.port_and_slave(slave) else {
        warn!("FoE read of {file_name:?} from unknown slave {slave}");
        return FoeRead::Failed(StatusCode::SlaveCountExceeded.into());
    };
    let mut size = size;
    let status = port.foe_read(entry, file_name, password, &mut size, data, timeout);
    let result = FoeRead::from_status(status, size);
    debug!("FoE read of {file_name:?} from slave {slave}: {result:?}");
    result
}

/// FoE read with the buffer size passed by value.
///
/// # Returns
/// Bytes read if positive, otherwise the status of the failed read
pub fn foe_read<P: FoeTransport>(
    context: &mut Context<P>,
    slave: u16,
    file_name: &str,
    password: u32,
    size: i32,
    data: &mut [u8],
    timeout: Duration,
) -> i32 {
    foe_read_checked(context, slave, file_name, password, size, data, timeout).into_raw()
}
