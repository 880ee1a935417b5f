//! CAN application protocol over EtherCAT, service data object reads.
//!
//! The mailbox exchange itself is done by an [`SdoTransport`]; this module adapts its
//! size-by-reference convention to plain values.

use std::time::Duration;

use log::{trace, warn};

use super::{
    main::{Context, Slave},
    r#type::StatusCode,
};

/// Service data object access through a slave's mailbox
pub trait SdoTransport {
    /// Reads one object entry, or all entries of an object with complete access.
    ///
    /// `size` holds the capacity available in `data` on entry and the number of bytes read
    /// on return. Returns the working counter, or a negative [`StatusCode`].
    #[allow(clippy::too_many_arguments)]
    fn sdo_read(
        &mut self,
        slave: &Slave,
        index: u16,
        sub_index: u8,
        complete_access: bool,
        size: &mut i32,
        data: &mut [u8],
        timeout: Duration,
    ) -> i32;
}

/// CoE SDO read with the buffer size passed by value.
///
/// # Parameters
/// - `context`: Context struct
/// - `slave`: Slave number
/// - `index`: Index to read
/// - `sub_index`: Subindex to read, must be 0 or 1 if complete access is used
/// - `complete_access`: False for single subindex, true for complete access, all subindexes read
/// - `size`: Size of the parameter buffer
/// - `data`: Parameter buffer
/// - `timeout`: Timeout duration, standard is `TIMEOUT_RX_MAILBOX`
///
/// # Returns
/// Status of the underlying read, `SlaveCountExceeded` for an unknown slave
#[expect(clippy::too_many_arguments)]
pub fn sdo_read<P: SdoTransport>(
    context: &mut Context<P>,
    slave: u16,
    index: u16,
    sub_index: u8,
    complete_access: bool,
    size: i32,
    data: &mut [u8],
    timeout: Duration,
) -> i32 {
    let Some((port, entry)) = context.port_and_slave(slave) else {
        warn!("SDO read {index:#06x}:{sub_index} from unknown slave {slave}");
        return StatusCode::SlaveCountExceeded.into();
    };
    let mut size = size;
    let wkc = port.sdo_read(
        entry,
        index,
        sub_index,
        complete_access,
        &mut size,
        data,
        timeout,
    );
    trace!("SDO read {index:#06x}:{sub_index} from slave {slave} returned {wkc}, {size} bytes");
    wkc
}
