//! In-memory segment used by the unit tests.

use std::{collections::HashMap, ops::Range, time::Duration};

use super::{
    base::RegisterPort,
    r#type::{EthercatRegister, EthercatState},
};

#[derive(Debug, Default, Clone, Copy)]
struct SimulatedSlave {
    al_status: u16,
    al_status_code: u16,
    ignore_state_requests: bool,
    error_code: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedWrite {
    pub adp: u16,
    pub ado: u16,
    pub data: Vec<u8>,
}

/// Slaves following AL control requests immediately, with every access recorded
#[derive(Debug, Default)]
pub(crate) struct SimulatedPort {
    slaves: HashMap<u16, SimulatedSlave>,
    dropped_registers: Vec<u16>,
    pub reads: Vec<(u16, u16)>,
    pub writes: Vec<RecordedWrite>,
}

impl SimulatedPort {
    pub fn add_slave(&mut self, adp: u16, al_status: u16) {
        self.slaves.insert(
            adp,
            SimulatedSlave {
                al_status,
                ..SimulatedSlave::default()
            },
        );
    }

    pub fn remove_slave(&mut self, adp: u16) {
        self.slaves.remove(&adp);
    }

    pub fn set_al_status(&mut self, adp: u16, al_status: u16, al_status_code: u16) {
        if let Some(slave) = self.slaves.get_mut(&adp) {
            slave.al_status = al_status;
            slave.al_status_code = al_status_code;
        }
    }

    /// Slave keeps its state whatever is written to AL control
    pub fn ignore_state_requests(&mut self, adp: u16) {
        if let Some(slave) = self.slaves.get_mut(&adp) {
            slave.ignore_state_requests = true;
        }
    }

    /// Slave enters requested states with the error bit and `code` raised
    pub fn fail_state_requests(&mut self, adp: u16, code: u16) {
        if let Some(slave) = self.slaves.get_mut(&adp) {
            slave.error_code = Some(code);
        }
    }

    /// Writes to `ado` are recorded but never acknowledged
    pub fn drop_writes_to(&mut self, ado: u16) {
        self.dropped_registers.push(ado);
    }

    pub fn al_status(&self, adp: u16) -> Option<u16> {
        self.slaves.get(&adp).map(|slave| slave.al_status)
    }

    pub fn writes_to(&self, adp: u16, ado: u16) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|write| write.adp == adp && write.ado == ado)
            .map(|write| write.data.clone())
            .collect()
    }

    /// Writes into a register block, as (address, data)
    pub fn writes_in(&self, adp: u16, block: Range<u16>) -> Vec<(u16, Vec<u8>)> {
        self.writes
            .iter()
            .filter(|write| write.adp == adp && block.contains(&write.ado))
            .map(|write| (write.ado, write.data.clone()))
            .collect()
    }

    fn status_block(slave: &SimulatedSlave) -> [u8; 6] {
        let [status_low, status_high] = slave.al_status.to_le_bytes();
        let [code_low, code_high] = slave.al_status_code.to_le_bytes();
        [status_low, status_high, 0, 0, code_low, code_high]
    }
}

impl RegisterPort for SimulatedPort {
    fn fprd(&mut self, adp: u16, ado: u16, data: &mut [u8], _timeout: Duration) -> i32 {
        self.reads.push((adp, ado));
        let Some(slave) = self.slaves.get(&adp) else {
            return 0;
        };
        if ado == u16::from(EthercatRegister::ApplicationLayerStatus) {
            let block = Self::status_block(slave);
            let length = data.len().min(block.len());
            data[..length].copy_from_slice(&block[..length]);
        }
        1
    }

    fn fpwr(&mut self, adp: u16, ado: u16, data: &[u8], _timeout: Duration) -> i32 {
        self.writes.push(RecordedWrite {
            adp,
            ado,
            data: data.to_vec(),
        });
        if self.dropped_registers.contains(&ado) {
            return 0;
        }
        let Some(slave) = self.slaves.get_mut(&adp) else {
            return 0;
        };
        if ado == u16::from(EthercatRegister::ApplicationLayerControl) && !slave.ignore_state_requests {
            let mut request = [0; 2];
            let length = data.len().min(2);
            request[..length].copy_from_slice(&data[..length]);
            let state = EthercatState::state_of(u16::from_le_bytes(request));
            match slave.error_code {
                Some(code) => {
                    slave.al_status = state | EthercatState::ACK;
                    slave.al_status_code = code;
                }
                None => {
                    slave.al_status = state;
                    slave.al_status_code = 0;
                }
            }
        }
        1
    }

    fn brd(&mut self, _adp: u16, ado: u16, data: &mut [u8], _timeout: Duration) -> i32 {
        data.fill(0);
        if ado == u16::from(EthercatRegister::ApplicationLayerStatus) {
            for slave in self.slaves.values() {
                let block = Self::status_block(slave);
                for (target, source) in data.iter_mut().zip(block) {
                    *target |= source;
                }
            }
        }
        self.slaves.len() as i32
    }
}
