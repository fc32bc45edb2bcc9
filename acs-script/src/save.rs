//! Level snapshots.
//!
//! Program counters are stored as byte offsets into the module image and stack frames as
//! offsets into the instance's own segment, so a snapshot restores into any identical
//! load of the same module.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::VmConfig;
use crate::format::{Module, ModuleFingerprint};
use crate::host::{ActorHandle, LineId, LineSide};
use crate::scheduler::Scheduler;
use crate::vm::{Frame, ScriptInstance, ScriptState, Slot};

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("cannot encode snapshot: {0}")]
    Encode(#[source] bincode::Error),

    #[error("cannot decode snapshot: {0}")]
    Decode(#[source] bincode::Error),

    #[error("snapshot belongs to another module ({found:?}, expected {expected:?})")]
    ModuleMismatch { expected: ModuleFingerprint, found: ModuleFingerprint },

    #[error("script {script}: saved pc 0x{pc:X} is outside the module")]
    PcOutOfRange { script: i32, pc: u32 },

    #[error("script {0} is not in the module")]
    UnknownScript(i32),

    #[error("snapshot does not match the module layout: {0}")]
    Shape(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub number: i32,
    pub pc: u32,
    pub state: ScriptState,
    pub locals: Vec<i32>,
    pub activator: Option<ActorHandle>,
    pub line: Option<LineId>,
    pub side: LineSide,
    pub segment: Vec<Slot>,
    pub frame: Frame,
    pub function: Option<u32>,
    pub print: String,
    pub hud_opt: Option<u32>,
    pub result: i32,
    pub last_tick: u64,
    /// Whether the registry tracks this instance (launched without `always`).
    pub registered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub map: i32,
    pub module: ModuleFingerprint,
    pub map_vars: Vec<i32>,
    pub map_arrays: Vec<Vec<i32>>,
    /// In execution order.
    pub instances: Vec<InstanceSnapshot>,
    /// Completed ticks.
    pub tick: u64,
}

impl LevelSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SaveError> {
        bincode::serialize(self).map_err(SaveError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SaveError> {
        bincode::deserialize(bytes).map_err(SaveError::Decode)
    }
}

impl Scheduler {
    /// Capture the level between ticks.
    pub fn snapshot(&self) -> LevelSnapshot {
        let instances = self
            .ids()
            .filter_map(|id| self.instance(id).map(|inst| (id, inst)))
            .map(|(id, inst)| InstanceSnapshot {
                number: inst.number,
                pc: inst.pc,
                state: inst.state,
                locals: inst.locals.clone(),
                activator: inst.activator,
                line: inst.line,
                side: inst.side,
                segment: inst.segment.clone(),
                frame: inst.frame,
                function: inst.function,
                print: inst.print.clone(),
                hud_opt: inst.hud_opt,
                result: inst.result,
                last_tick: inst.last_tick,
                registered: self.find(inst.number) == Some(id),
            })
            .collect();
        LevelSnapshot {
            map: self.map,
            module: self.module.fingerprint(),
            map_vars: self.module.map_vars().to_vec(),
            map_arrays: self.module.map_arrays().to_vec(),
            instances,
            tick: self.tick,
        }
    }

    /// Rebuild a level from `snapshot` on a freshly loaded `module`.
    pub fn restore(
        mut module: Module,
        snapshot: &LevelSnapshot,
        config: VmConfig,
    ) -> Result<Scheduler, SaveError> {
        if module.fingerprint() != snapshot.module {
            return Err(SaveError::ModuleMismatch {
                expected: module.fingerprint(),
                found: snapshot.module,
            });
        }
        if !module.restore_map_state(&snapshot.map_vars, &snapshot.map_arrays) {
            return Err(SaveError::Shape("map variables or arrays"));
        }

        let len = module.bytes().len() as u32;
        let mut instances = Vec::with_capacity(snapshot.instances.len());
        for saved in &snapshot.instances {
            let desc = module
                .find_script(saved.number)
                .ok_or(SaveError::UnknownScript(saved.number))?;
            if saved.pc >= len {
                return Err(SaveError::PcOutOfRange { script: saved.number, pc: saved.pc });
            }
            if saved.segment.len() > config.stack_capacity {
                return Err(SaveError::Shape("instance stack segment exceeds capacity"));
            }
            let mut inst = ScriptInstance::new(desc, 0, &[], saved.activator, saved.line, saved.side);
            inst.pc = saved.pc;
            inst.state = saved.state;
            inst.locals = saved.locals.clone();
            inst.segment = saved.segment.clone();
            inst.frame = saved.frame;
            inst.function = saved.function;
            inst.print = saved.print.clone();
            inst.hud_opt = saved.hud_opt;
            inst.result = saved.result;
            inst.last_tick = saved.last_tick;
            instances.push((inst, saved.registered));
        }

        let mut sched = Scheduler::new(module, snapshot.map, config);
        sched.tick = snapshot.tick;
        for (inst, registered) in instances {
            let number = inst.number;
            let id = sched.link_last(inst);
            if registered {
                sched.running.insert(number, id);
            }
        }
        log::info!(
            "restored map {} at tick {} with {} scripts",
            snapshot.map,
            snapshot.tick,
            snapshot.instances.len()
        );
        Ok(sched)
    }
}
