use serde::{Deserialize, Serialize};

use super::stack::{Frame, Slot};
use crate::format::ScriptDescriptor;
use crate::host::{ActorHandle, LineId, LineSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptState {
    Running,
    /// Only an explicit resume changes this.
    Suspended,
    /// Ticks left before the script runs again.
    Delayed(u32),
    TagWait(i32),
    PolyWait(i32),
    /// Waiting for the target script to be launched.
    ScriptWaitPre(i32),
    /// Waiting for the target script to finish.
    ScriptWait(i32),
    PleaseRemove,
    DivideBy0,
    ModulusBy0,
}

impl ScriptState {
    #[inline]
    pub fn is_running(self) -> bool {
        self == ScriptState::Running
    }

    /// States the scheduler removes on sight.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScriptState::PleaseRemove | ScriptState::DivideBy0 | ScriptState::ModulusBy0
        )
    }
}

/// One running or waiting invocation of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInstance {
    pub(crate) number: i32,
    pub(crate) type_tag: u16,
    pub(crate) entry: u32,
    pub(crate) pc: u32,
    pub(crate) state: ScriptState,
    pub(crate) locals: Vec<i32>,
    pub(crate) activator: Option<ActorHandle>,
    pub(crate) line: Option<LineId>,
    pub(crate) side: LineSide,
    /// Operand stack contents while the instance is not dispatching.
    pub(crate) segment: Vec<Slot>,
    pub(crate) frame: Frame,
    pub(crate) function: Option<u32>,
    pub(crate) print: String,
    /// Segment depth recorded by OPTHUDMESSAGE.
    pub(crate) hud_opt: Option<u32>,
    /// Last LSPEC5RESULT-style result, kept for persistence.
    pub(crate) result: i32,
    pub(crate) last_tick: u64,
}

impl ScriptInstance {
    pub(crate) fn new(
        desc: &ScriptDescriptor,
        local_slots: usize,
        args: &[i32],
        activator: Option<ActorHandle>,
        line: Option<LineId>,
        side: LineSide,
    ) -> Self {
        let slots = local_slots
            .max(desc.local_count.unwrap_or(0) as usize)
            .max(desc.arg_count as usize);
        let mut locals = vec![0; slots];
        for (dst, src) in locals.iter_mut().zip(args.iter().take(desc.arg_count as usize)) {
            *dst = *src;
        }
        Self {
            number: desc.number,
            type_tag: desc.type_tag,
            entry: desc.entry,
            pc: desc.entry,
            state: ScriptState::Running,
            locals,
            activator,
            line,
            side,
            segment: Vec::new(),
            frame: Frame::Script,
            function: None,
            print: String::new(),
            hud_opt: None,
            result: 0,
            last_tick: 0,
        }
    }

    #[inline]
    pub fn number(&self) -> i32 {
        self.number
    }

    #[inline]
    pub fn type_tag(&self) -> u16 {
        self.type_tag
    }

    /// Byte offset of the next instruction.
    #[inline]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    #[inline]
    pub fn state(&self) -> ScriptState {
        self.state
    }

    #[inline]
    pub fn locals(&self) -> &[i32] {
        &self.locals
    }

    #[inline]
    pub fn activator(&self) -> Option<ActorHandle> {
        self.activator
    }

    #[inline]
    pub fn line(&self) -> Option<LineId> {
        self.line
    }

    #[inline]
    pub fn side(&self) -> LineSide {
        self.side
    }

    /// Operand stack depth held by this instance.
    #[inline]
    pub fn stack_depth(&self) -> usize {
        self.segment.len()
    }

    #[inline]
    pub fn frame(&self) -> Frame {
        self.frame
    }
}
