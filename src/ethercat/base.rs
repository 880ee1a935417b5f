//! Register I/O consumed by the master core.
//!
//! Frame construction, datagram indexing and wire retries belong to the transport
//! implementing [`RegisterPort`]. Every primitive returns the working counter of the
//! datagram; zero or a negative value means the slave didn't respond in time.

use std::time::Duration;

use super::r#type::{host_to_ethercat, Ethercat, EthercatRegister};

/// Addressed register access to the slaves on one EtherCAT segment
pub trait RegisterPort {
    /// Configured address physical read
    fn fprd(&mut self, adp: u16, ado: u16, data: &mut [u8], timeout: Duration) -> i32;

    /// Configured address physical write
    fn fpwr(&mut self, adp: u16, ado: u16, data: &[u8], timeout: Duration) -> i32;

    /// Broadcast read, the data of all responding slaves is OR-ed together
    fn brd(&mut self, adp: u16, ado: u16, data: &mut [u8], timeout: Duration) -> i32;

    /// Configured address physical write of a single word
    fn fpwrw(
        &mut self,
        adp: u16,
        ado: impl Into<u16>,
        data: Ethercat<u16>,
        timeout: Duration,
    ) -> i32
    where
        Self: Sized,
    {
        self.fpwr(adp, ado.into(), &data.to_bytes(), timeout)
    }
}

/// Writes the requested state to a slave's AL control register
pub(crate) fn write_al_control<P: RegisterPort>(
    port: &mut P,
    config_address: u16,
    state: u16,
    timeout: Duration,
) -> i32 {
    port.fpwrw(
        config_address,
        EthercatRegister::ApplicationLayerControl,
        host_to_ethercat(state),
        timeout,
    )
}
