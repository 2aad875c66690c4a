//! Finding, launching and watching the game server process.

mod locate;
mod supervisor;

pub use locate::{diagnose, locate};
pub use supervisor::{
    run, spawn, supervise, LineSink, ServerProcess, ServerState, ServerStatus, Supervisor,
    SupervisorHandle,
};
