//! Slave state transitions.
//!
//! Every transition is a write to AL control followed by a state check. Sync managers are
//! only programmed once a slave confirmed INIT and FMMUs only after the safe operational
//! request.

use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

use super::{
    base::{write_al_control, RegisterPort},
    main::{eeprom_to_pdi, read_state, statecheck, Context, Fmmu, SyncManager},
    r#type::{EthercatRegister, EthercatState, TIMEOUT_RET3},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("slave {0} is not in the slave table")]
    SlaveNotFound(u16),

    #[error("slave {slave} did not respond to register {register:#06x}")]
    NoResponse { slave: u16, register: u16 },
}

fn config_address<P>(context: &Context<P>, slave: u16) -> Result<u16, TransitionError> {
    context
        .slave(slave)
        .map(|entry| entry.config_address)
        .ok_or(TransitionError::SlaveNotFound(slave))
}

fn program_sync_managers<P: RegisterPort>(
    context: &mut Context<P>,
    slave: u16,
    config_address: u16,
    sync_managers: &[SyncManager],
    timeout: Duration,
) {
    for (sm_index, sync_manager) in sync_managers
        .iter()
        .enumerate()
        .filter(|(_, sync_manager)| sync_manager.is_used())
    {
        let register = u16::from(EthercatRegister::SyncManager0)
            + sm_index as u16 * size_of::<SyncManager>() as u16;
        let wkc = context.port_mut().fpwr(
            config_address,
            register,
            bytemuck::bytes_of(sync_manager),
            timeout,
        );
        if wkc <= 0 {
            warn!("Slave {slave} didn't acknowledge sync manager {sm_index} at {register:#06x}");
        }
    }
}

fn program_fmmus<P: RegisterPort>(
    context: &mut Context<P>,
    slave: u16,
    config_address: u16,
    fmmus: &[Fmmu],
    timeout: Duration,
) {
    for (fmmu_index, fmmu) in fmmus.iter().enumerate() {
        let register = u16::from(EthercatRegister::FieldbusMemoryManagementUnit0)
            + fmmu_index as u16 * size_of::<Fmmu>() as u16;
        let wkc = context
            .port_mut()
            .fpwr(config_address, register, bytemuck::bytes_of(fmmu), timeout);
        if wkc <= 0 {
            warn!("Slave {slave} didn't acknowledge FMMU {fmmu_index} at {register:#06x}");
        }
    }
}

/// Reconfigure a slave and bring it to pre-operational.
///
/// The slave is reset to INIT, its EEPROM handed to the PDI and, once INIT is confirmed,
/// every used sync manager is programmed before pre-operational is requested.
///
/// # Parameters
/// - `context`: Context struct
/// - `slave`: Slave to reconfigure
/// - `timeout`: Limit of every state check, also used for the register writes, standard is
///   `TIMEOUT_STATE`
///
/// # Errors
/// Returns an error if the slave is unknown or didn't acknowledge the INIT request.
///
/// # Returns
/// Last observed state, which is not pre-operational if the slave stalled
pub fn reconfig_slave_to_preop<P: RegisterPort>(
    context: &mut Context<P>,
    slave: u16,
    timeout: Duration,
) -> Result<u16, TransitionError> {
    let config_address = config_address(context, slave)?;
    debug!("Reconfiguring slave {slave} to pre-operational");

    if write_al_control(
        context.port_mut(),
        config_address,
        EthercatState::Init.into(),
        timeout,
    ) <= 0
    {
        warn!("Slave {slave} didn't acknowledge the INIT request");
        return Err(TransitionError::NoResponse {
            slave,
            register: EthercatRegister::ApplicationLayerControl.into(),
        });
    }

    // Set EEPROM to PDI
    eeprom_to_pdi(context, slave);

    // Check state change init
    let mut state = statecheck(context, slave, EthercatState::Init, timeout);
    if state == EthercatState::Init {
        let sync_managers = context
            .slave(slave)
            .map(|entry| entry.sync_manager)
            .unwrap_or_default();
        program_sync_managers(context, slave, config_address, &sync_managers, timeout);

        if write_al_control(
            context.port_mut(),
            config_address,
            EthercatState::PreOperational.into(),
            timeout,
        ) <= 0
        {
            warn!("Slave {slave} didn't acknowledge the pre-operational request");
        }

        // Check state change pre-operational
        state = statecheck(context, slave, EthercatState::PreOperational, timeout);
    } else {
        debug!("Slave {slave} stayed in state {state:#x} instead of INIT");
    }
    Ok(state)
}

/// Bring a pre-operational slave to safe-operational and program its FMMUs.
///
/// The FMMUs below `fmmu_unused` are written once safe-operational was requested, whether
/// or not the slave confirmed it. A slave that isn't pre-operational is left untouched.
///
/// # Errors
/// Returns an error if the slave is unknown.
///
/// # Returns
/// Last observed state
pub fn reconfig_slave_to_safeop<P: RegisterPort>(
    context: &mut Context<P>,
    slave: u16,
    timeout: Duration,
) -> Result<u16, TransitionError> {
    let config_address = config_address(context, slave)?;
    debug!("Reconfiguring slave {slave} to safe-operational");

    let mut state = statecheck(context, slave, EthercatState::PreOperational, timeout);
    if state != EthercatState::PreOperational {
        debug!("Slave {slave} is in state {state:#x}, not pre-operational");
        return Ok(state);
    }

    if write_al_control(
        context.port_mut(),
        config_address,
        EthercatState::SafeOperational.into(),
        timeout,
    ) <= 0
    {
        warn!("Slave {slave} didn't acknowledge the safe-operational request");
    }
    state = statecheck(context, slave, EthercatState::SafeOperational, timeout);

    let (fmmus, used) = context
        .slave(slave)
        .map(|entry| (entry.fmmu, entry.used_fmmus().len()))
        .unwrap_or_default();
    program_fmmus(context, slave, config_address, &fmmus[..used], timeout);
    Ok(state)
}

/// Write the state stored in the slave entry to the slave's AL control register.
///
/// # Errors
/// Returns an error if the slave is unknown or didn't respond.
pub fn write_state<P: RegisterPort>(
    context: &mut Context<P>,
    slave: u16,
) -> Result<(), TransitionError> {
    let entry = context
        .slave(slave)
        .ok_or(TransitionError::SlaveNotFound(slave))?;
    let (config_address, state) = (entry.config_address, entry.state);
    if write_al_control(context.port_mut(), config_address, state, TIMEOUT_RET3) <= 0 {
        return Err(TransitionError::NoResponse {
            slave,
            register: EthercatRegister::ApplicationLayerControl.into(),
        });
    }
    Ok(())
}

fn request_state<P: RegisterPort>(
    context: &mut Context<P>,
    slave: u16,
    state: u16,
) -> Result<(), TransitionError> {
    if let Some(entry) = context.slave_mut(slave) {
        entry.state = state;
    }
    write_state(context, slave)
}

/// Move a slave one step closer to operational, as done by a cyclic supervision loop.
///
/// An error reported by the slave is acknowledged first. Otherwise INIT, BOOT and NONE
/// are reconfigured to pre-operational, pre-operational to safe-operational and
/// safe-operational is requested to go operational.
///
/// # Errors
/// Returns an error if the slave is unknown or didn't respond.
///
/// # Returns
/// State observed after the step
pub fn step_slave<P: RegisterPort>(
    context: &mut Context<P>,
    slave: u16,
    timeout: Duration,
) -> Result<u16, TransitionError> {
    config_address(context, slave)?;
    let al_status = read_state(context, slave, timeout).ok_or(TransitionError::NoResponse {
        slave,
        register: EthercatRegister::ApplicationLayerStatus.into(),
    })?;
    let state = EthercatState::state_of(al_status);

    let reached = if EthercatState::has_error(al_status) {
        debug!("Acknowledging error of slave {slave} in state {state:#x}");
        request_state(context, slave, state | EthercatState::ACK)?;
        match EthercatState::try_from(state) {
            Ok(target) => statecheck(context, slave, target, timeout),
            Err(_) => state,
        }
    } else {
        match EthercatState::try_from(state) {
            Ok(EthercatState::None | EthercatState::Init | EthercatState::Boot) => {
                reconfig_slave_to_preop(context, slave, timeout)?
            }
            Ok(EthercatState::PreOperational) => reconfig_slave_to_safeop(context, slave, timeout)?,
            Ok(EthercatState::SafeOperational) => {
                request_state(context, slave, EthercatState::Operational.into())?;
                statecheck(context, slave, EthercatState::Operational, timeout)
            }
            _ => state,
        }
    };

    if reached != state && reached != EthercatState::None {
        if let Some(entry) = context.slave_mut(slave) {
            entry.is_lost = false;
        }
    }
    Ok(reached)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        reconfig_slave_to_preop, reconfig_slave_to_safeop, step_slave, write_state,
        TransitionError,
    };
    use crate::ethercat::{
        main::{Context, Fmmu, Slave, SyncManager},
        r#type::{Ethercat, EthercatRegister, EthercatState},
        sim::SimulatedPort,
    };

    const SHORT: Duration = Duration::from_millis(20);
    const ADDRESS: u16 = 0x1001;

    fn sync_manager(start_address: u16, length: u16, flags: u32) -> SyncManager {
        SyncManager {
            start_address: Ethercat::from_host(start_address),
            sm_length: Ethercat::from_host(length),
            sm_flags: Ethercat::from_host(flags),
        }
    }

    fn fmmu(log_start: u32) -> Fmmu {
        Fmmu {
            log_start: Ethercat::from_host(log_start),
            log_length: Ethercat::from_host(4),
            fmmu_active: 1,
            ..Fmmu::default()
        }
    }

    fn context_with(al_status: EthercatState, slave: Slave) -> Context<SimulatedPort> {
        let mut port = SimulatedPort::default();
        port.add_slave(ADDRESS, al_status.into());
        let mut context = Context::create(port);
        context
            .add_slave(Slave {
                config_address: ADDRESS,
                ..slave
            })
            .unwrap();
        context
    }

    fn al_control_writes(context: &Context<SimulatedPort>) -> Vec<Vec<u8>> {
        context
            .port()
            .writes_to(ADDRESS, EthercatRegister::ApplicationLayerControl.into())
    }

    fn sync_manager_writes(context: &Context<SimulatedPort>) -> Vec<(u16, Vec<u8>)> {
        context.port().writes_in(ADDRESS, 0x800..0x840)
    }

    fn fmmu_writes(context: &Context<SimulatedPort>) -> Vec<(u16, Vec<u8>)> {
        context.port().writes_in(ADDRESS, 0x600..0x640)
    }

    #[test]
    fn preop_programs_every_used_sync_manager_once() {
        let mut slave = Slave::default();
        slave.sync_manager[0] = sync_manager(0x1000, 128, 0x0001_0026);
        slave.sync_manager[1] = sync_manager(0x1080, 128, 0x0001_0022);
        slave.sync_manager[3] = sync_manager(0x1100, 6, 0x0001_0020);
        let mut context = context_with(EthercatState::SafeOperational, slave);

        let state = reconfig_slave_to_preop(&mut context, 0, SHORT).unwrap();
        assert_eq!(state, EthercatState::PreOperational);
        assert_eq!(context.slave(0).unwrap().state, EthercatState::PreOperational);

        let writes = sync_manager_writes(&context);
        let registers: Vec<u16> = writes.iter().map(|(register, _)| *register).collect();
        assert_eq!(registers, [0x800, 0x808, 0x818]);
        assert_eq!(writes[1].1, [0x80, 0x10, 0x80, 0x00, 0x22, 0x00, 0x01, 0x00]);
        assert_eq!(al_control_writes(&context), [vec![1, 0], vec![2, 0]]);
        assert!(context.slave(0).unwrap().eep_pdi);
    }

    #[test]
    fn preop_stops_when_init_is_not_confirmed() {
        let mut slave = Slave::default();
        slave.sync_manager[0] = sync_manager(0x1000, 128, 0x0001_0026);
        let mut context = context_with(EthercatState::SafeOperational, slave);
        context.port_mut().ignore_state_requests(ADDRESS);

        let state = reconfig_slave_to_preop(&mut context, 0, SHORT).unwrap();
        assert_eq!(state, EthercatState::SafeOperational);
        assert!(sync_manager_writes(&context).is_empty());
        assert_eq!(al_control_writes(&context), [vec![1, 0]]);
    }

    #[test]
    fn preop_returns_init_when_preop_stalls() {
        let mut slave = Slave::default();
        slave.sync_manager[1] = sync_manager(0x1000, 128, 0x0001_0022);
        let mut context = context_with(EthercatState::Init, slave);
        context.port_mut().ignore_state_requests(ADDRESS);

        let state = reconfig_slave_to_preop(&mut context, 0, SHORT).unwrap();
        assert_eq!(state, EthercatState::Init);
        let registers: Vec<u16> = sync_manager_writes(&context)
            .iter()
            .map(|(register, _)| *register)
            .collect();
        assert_eq!(registers, [0x808]);
        assert_eq!(al_control_writes(&context), [vec![1, 0], vec![2, 0]]);
    }

    #[test]
    fn failed_sync_manager_write_does_not_stop_preop() {
        let mut slave = Slave::default();
        slave.sync_manager[0] = sync_manager(0x1000, 128, 0x0001_0026);
        slave.sync_manager[1] = sync_manager(0x1080, 128, 0x0001_0022);
        let mut context = context_with(EthercatState::Init, slave);
        context.port_mut().drop_writes_to(0x808);

        let state = reconfig_slave_to_preop(&mut context, 0, SHORT).unwrap();
        assert_eq!(state, EthercatState::PreOperational);
        assert_eq!(sync_manager_writes(&context).len(), 2);
    }

    #[test]
    fn preop_fails_without_init_acknowledge() {
        let mut context = context_with(EthercatState::PreOperational, Slave::default());
        context
            .port_mut()
            .drop_writes_to(EthercatRegister::ApplicationLayerControl.into());

        assert_eq!(
            reconfig_slave_to_preop(&mut context, 0, SHORT),
            Err(TransitionError::NoResponse {
                slave: 0,
                register: 0x120
            })
        );
        assert!(!context.slave(0).unwrap().eep_pdi);
    }

    #[test]
    fn unknown_slave_is_rejected() {
        let mut context = context_with(EthercatState::Init, Slave::default());
        assert_eq!(
            reconfig_slave_to_preop(&mut context, 1, SHORT),
            Err(TransitionError::SlaveNotFound(1))
        );
        assert_eq!(
            reconfig_slave_to_safeop(&mut context, 1, SHORT),
            Err(TransitionError::SlaveNotFound(1))
        );
        assert!(context.port().writes.is_empty());
    }

    #[test]
    fn safeop_programs_only_used_fmmus() {
        let mut slave = Slave {
            fmmu_unused: 2,
            ..Slave::default()
        };
        slave.fmmu = [fmmu(0x0), fmmu(0x10), fmmu(0x20), fmmu(0x30)];
        let mut context = context_with(EthercatState::PreOperational, slave);

        let state = reconfig_slave_to_safeop(&mut context, 0, SHORT).unwrap();
        assert_eq!(state, EthercatState::SafeOperational);

        let writes = fmmu_writes(&context);
        let registers: Vec<u16> = writes.iter().map(|(register, _)| *register).collect();
        assert_eq!(registers, [0x600, 0x610]);
        assert_eq!(writes[1].1.len(), 16);
        assert_eq!(writes[1].1[..4], [0x10, 0, 0, 0]);
    }

    #[test]
    fn safeop_programs_fmmus_even_if_unconfirmed() {
        let mut slave = Slave {
            fmmu_unused: 1,
            ..Slave::default()
        };
        slave.fmmu[0] = fmmu(0x0);
        let mut context = context_with(EthercatState::PreOperational, slave);
        context.port_mut().ignore_state_requests(ADDRESS);

        let state = reconfig_slave_to_safeop(&mut context, 0, SHORT).unwrap();
        assert_eq!(state, EthercatState::PreOperational);
        assert_eq!(fmmu_writes(&context).len(), 1);
    }

    #[test]
    fn safeop_leaves_slave_outside_preop_untouched() {
        let mut slave = Slave {
            fmmu_unused: 1,
            ..Slave::default()
        };
        slave.fmmu[0] = fmmu(0x0);
        let mut context = context_with(EthercatState::Init, slave);

        let state = reconfig_slave_to_safeop(&mut context, 0, SHORT).unwrap();
        assert_eq!(state, EthercatState::Init);
        assert!(context.port().writes.is_empty());
    }

    #[test]
    fn error_bit_is_kept_in_slave_entry() {
        let mut context = context_with(EthercatState::PreOperational, Slave::default());
        context.port_mut().fail_state_requests(ADDRESS, 0x001D);

        let state = reconfig_slave_to_safeop(&mut context, 0, SHORT).unwrap();
        assert_eq!(state, EthercatState::SafeOperational);
        assert_eq!(context.slave(0).unwrap().state, 0x14);
        assert_eq!(context.slave(0).unwrap().al_status_code, 0x001D);
        assert!(context.error_flag());
    }

    #[test]
    fn write_state_requests_stored_state() {
        let mut context = context_with(EthercatState::Init, Slave::default());
        context.slave_mut(0).unwrap().state = EthercatState::PreOperational.into();
        write_state(&mut context, 0).unwrap();
        assert_eq!(
            context.port().al_status(ADDRESS),
            Some(EthercatState::PreOperational.into())
        );
        assert_eq!(
            write_state(&mut context, 4),
            Err(TransitionError::SlaveNotFound(4))
        );
    }

    #[test]
    fn step_slave_walks_to_operational() {
        let slave = Slave {
            is_lost: true,
            ..Slave::default()
        };
        let mut context = context_with(EthercatState::Init, slave);

        let expected = [
            EthercatState::PreOperational,
            EthercatState::SafeOperational,
            EthercatState::Operational,
            EthercatState::Operational,
        ];
        for state in expected {
            assert_eq!(step_slave(&mut context, 0, SHORT).unwrap(), state);
        }
        assert!(!context.slave(0).unwrap().is_lost);
    }

    #[test]
    fn step_slave_acknowledges_errors() {
        let mut context = context_with(EthercatState::Init, Slave::default());
        context.port_mut().set_al_status(
            ADDRESS,
            u16::from(EthercatState::SafeOperational) | EthercatState::ACK,
            0x001B,
        );

        let state = step_slave(&mut context, 0, SHORT).unwrap();
        assert_eq!(state, EthercatState::SafeOperational);
        assert_eq!(al_control_writes(&context), [vec![0x14, 0]]);
        assert_eq!(context.slave(0).unwrap().state, EthercatState::SafeOperational);
    }

    #[test]
    fn step_slave_reports_silent_slave() {
        let mut context = context_with(EthercatState::Init, Slave::default());
        context.port_mut().remove_slave(ADDRESS);
        assert_eq!(
            step_slave(&mut context, 0, SHORT),
            Err(TransitionError::NoResponse {
                slave: 0,
                register: 0x130
            })
        );
    }
}
