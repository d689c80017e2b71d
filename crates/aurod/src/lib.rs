pub mod api;
pub mod config;
pub mod machine;
pub mod monitor;
pub mod simulator;
pub mod store;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use machine::Machine;
pub use machine::MachineStatus;
pub use machine::StatusUpdate;
pub use monitor::MachineMonitor;
pub use monitor::MirrorState;
pub use monitor::MonitorHandle;
pub use simulator::SimulatorHandle;
pub use simulator::StatusSimulator;
pub use store::ChangeEvent;
pub use store::MachineStore;
pub use store::RestStore;
pub use store::StoreError;
