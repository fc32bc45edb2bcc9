//! acs-script
//!
//! Loader, interpreter and cooperative scheduler for compiled ACS level scripts.
//!
//! A level owns one [`Module`] and one [`Scheduler`]. Every simulation tick the scheduler
//! advances each live script instance once; instances talk to the game only through the
//! [`host`] traits, and every world or presentation mutation is expressed as a
//! [`SideEffect`] so replicas can replay it.

pub mod config;
pub mod deferred;
pub mod effect;
pub mod format;
pub mod host;
pub mod save;
pub mod scheduler;
pub mod session;
pub mod strings;
pub mod vm;

pub use config::{NetRole, VmConfig, VmConfigBuilder};
pub use deferred::{DeferredAction, DeferredEntry, DeferredQueue};
pub use effect::SideEffect;
pub use format::{
    FunctionDescriptor, LoadError, LoadOptions, Module, ModuleFingerprint, ModuleFormat,
    PcodeEncoding, ScriptDescriptor, ScriptFlags, ScriptType,
};
pub use host::{ActorHandle, LineId, LineSide, Presentation, Replication, ScriptHost, WorldModel};
pub use save::{InstanceSnapshot, LevelSnapshot, SaveError};
pub use scheduler::{InstanceId, LaunchParams, Scheduler, ScriptRequest};
pub use session::Session;
pub use vm::{Pcode, ScriptInstance, ScriptState, VmError};
