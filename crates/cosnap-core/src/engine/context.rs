use super::config::RunConfig;
use crate::core::parallel::comm::Communicator;
use crate::core::parallel::domain::DomainLayout;

/// Everything a snapshot operation needs to know about the current run and
/// the process it executes on.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub config: &'a RunConfig,
    pub comm: &'a dyn Communicator,
    pub layout: DomainLayout,
}

impl<'a> RunContext<'a> {
    pub fn new(config: &'a RunConfig, comm: &'a dyn Communicator) -> Self {
        Self {
            config,
            comm,
            layout: DomainLayout::from_comm(comm),
        }
    }

    pub fn is_master(&self) -> bool {
        self.comm.is_master()
    }
}

/// Emits an `info!` event on the master process only.
macro_rules! master_info {
    ($ctx:expr, $($arg:tt)+) => {
        if $ctx.is_master() {
            tracing::info!($($arg)+);
        }
    };
}

pub(crate) use master_info;
