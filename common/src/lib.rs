pub mod config;
pub mod debounce;
pub mod mailbox;
pub mod provision;
pub mod report;
pub mod scheduler;
pub mod storage;

pub use config::{DebounceConfig, NodeConfig, ProvisioningConfig, ReportConfig};
pub use debounce::{DebounceEngine, PinRecord};
pub use mailbox::Mailbox;
pub use provision::{CredentialField, ProvisioningSession, RadioControl, SessionState};
pub use report::StateReport;
pub use scheduler::ReportScheduler;
pub use storage::{CredentialStore, Credentials, MemoryStore, StorageError};
