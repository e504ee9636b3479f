pub mod host_component;

pub use host_component::{host_component_id, HostComponentState, WorkStatus};

pub const STACK_VERSION_CURRENT: &str = "CURRENT";
