// Manager library entry point

pub mod internal {
    pub mod tree {
        pub mod node;
    }
    pub mod fsm {
        pub mod engine;
        pub mod memory;
    }
    pub mod device {
        pub mod registry;
    }
    pub mod policy {
        pub mod policy;
    }
    pub mod mem {
        pub mod store;
    }
    pub mod exec {
        pub mod scheduler;
    }
    pub mod prompt {
        pub mod resolver;
    }
    pub mod dhcp6 {
        pub mod request;
        pub mod tester;
    }
    pub mod api;
    pub mod config;
    pub mod daemon;
    pub mod inventory;
    pub mod manager;
    pub mod objects;
}

// Re-export key types for external use
pub use internal::api::{ControlError, ControlReply, ControlRequest};
pub use internal::daemon::{Daemon, ManagerEvent, ManagerHandle};
pub use internal::device::registry::{DeviceError, DeviceRegistry, ManagedDevice};
pub use internal::exec::scheduler::{PassReport, PendingSet, Scheduler, MAX_POLICIES};
pub use internal::fsm::engine::{Engine, EngineError, PolicyId, Prompt, PromptHandler, WorkerId, WorkerInfo, WorkerKind};
pub use internal::fsm::memory::InMemoryEngine;
pub use internal::manager::{HotplugEvent, Manager};
pub use internal::mem::store::{SecretStore, SecretValue};
pub use internal::policy::policy::{ManagedPolicy, PolicyError, PolicyRegistry};
pub use internal::prompt::resolver::{PromptError, PromptResolver};
pub use internal::tree::node::{ConfigTree, NodeId};
