//! Per-level registry and cooperative round-robin over script instances.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::{NetRole, VmConfig};
use crate::deferred::{DeferredAction, DeferredEntry};
use crate::format::{Module, ScriptType};
use crate::host::{ActorHandle, LineId, LineSide, ScriptHost};
use crate::session::Session;
use crate::vm::{Exec, OperandStack, ScriptInstance, ScriptState};

/// Instances started immediately within one tick (or one external call) before the
/// rest are left for the next pass.
const MAX_IMMEDIATE_RUNS: u32 = 1024;

/// Generation-checked handle to an instance slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchParams {
    pub script: i32,
    pub activator: Option<ActorHandle>,
    pub line: Option<LineId>,
    pub side: LineSide,
    pub args: [i32; 3],
    /// Start a new instance even if one is already tracked, and leave it untracked.
    pub always: bool,
    /// Leave the instance for the next scheduler pass instead of running it right away.
    pub defer_start: bool,
}

impl LaunchParams {
    pub fn new(script: i32) -> Self {
        Self {
            script,
            activator: None,
            line: None,
            side: LineSide::Front,
            args: [0; 3],
            always: false,
            defer_start: false,
        }
    }

    pub fn with_activator(mut self, activator: Option<ActorHandle>) -> Self {
        self.activator = activator;
        self
    }

    pub fn with_line(mut self, line: Option<LineId>, side: LineSide) -> Self {
        self.line = line;
        self.side = side;
        self
    }

    pub fn with_args(mut self, args: [i32; 3]) -> Self {
        self.args = args;
        self
    }

    pub fn with_always(mut self, always: bool) -> Self {
        self.always = always;
        self
    }

    pub fn with_defer_start(mut self, defer_start: bool) -> Self {
        self.defer_start = defer_start;
        self
    }
}

/// Script-control request raised by a running script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptRequest {
    Execute {
        map: i32,
        script: i32,
        args: [i32; 3],
        always: bool,
        activator: Option<ActorHandle>,
        line: Option<LineId>,
        side: LineSide,
    },
    Suspend {
        map: i32,
        script: i32,
    },
    Terminate {
        map: i32,
        script: i32,
    },
}

impl ScriptRequest {
    /// Target map; 0 means the current one.
    pub fn map(&self) -> i32 {
        match self {
            ScriptRequest::Execute { map, .. }
            | ScriptRequest::Suspend { map, .. }
            | ScriptRequest::Terminate { map, .. } => *map,
        }
    }

    pub fn script(&self) -> i32 {
        match self {
            ScriptRequest::Execute { script, .. }
            | ScriptRequest::Suspend { script, .. }
            | ScriptRequest::Terminate { script, .. } => *script,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Node {
    pub generation: u32,
    pub prev: Option<u32>,
    pub next: Option<u32>,
    /// `None` while the slot is free or while its instance is dispatching.
    pub instance: Option<ScriptInstance>,
    pub linked: bool,
}

pub struct Scheduler {
    pub(crate) module: Module,
    pub(crate) map: i32,
    pub(crate) config: VmConfig,
    pub(crate) stack: OperandStack,
    pub(crate) nodes: Vec<Node>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    /// Tracked (non-`always`) instances by script number.
    pub(crate) running: HashMap<i32, InstanceId>,
    pending: VecDeque<ScriptRequest>,
    ready: VecDeque<InstanceId>,
    pub(crate) tick: u64,
    immediate_runs: u32,
    reap_pending: bool,
}

impl Scheduler {
    pub fn new(module: Module, map: i32, config: VmConfig) -> Self {
        let stack = OperandStack::new(config.stack_capacity);
        Self {
            module,
            map,
            config,
            stack,
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            running: HashMap::new(),
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            tick: 0,
            immediate_runs: 0,
            reap_pending: false,
        }
    }

    #[inline]
    pub fn module(&self) -> &Module {
        &self.module
    }

    #[inline]
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    #[inline]
    pub fn map(&self) -> i32 {
        self.map
    }

    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Replicas only apply received side effects; they never interpret.
    #[inline]
    pub fn is_replica(&self) -> bool {
        self.config.role == NetRole::Replica
    }

    /// Number of completed ticks.
    #[inline]
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Shared operand stack depth. Zero whenever no instance is dispatching.
    #[inline]
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn instance_count(&self) -> usize {
        self.ids().count()
    }

    /// Instance ids in execution order.
    pub fn ids(&self) -> impl Iterator<Item = InstanceId> + '_ {
        std::iter::successors(self.head, move |&i| self.nodes[i as usize].next).map(move |i| {
            InstanceId { index: i, generation: self.nodes[i as usize].generation }
        })
    }

    /// Live instances in execution order.
    pub fn instances(&self) -> impl Iterator<Item = &ScriptInstance> + '_ {
        self.ids().filter_map(move |id| self.instance(id))
    }

    pub fn instance(&self, id: InstanceId) -> Option<&ScriptInstance> {
        self.node(id).and_then(|n| n.instance.as_ref())
    }

    /// Tracked instance of `number`, if any.
    pub fn find(&self, number: i32) -> Option<InstanceId> {
        self.running.get(&number).copied()
    }

    pub fn is_running(&self, number: i32) -> bool {
        self.running.contains_key(&number)
    }

    pub fn script_state(&self, number: i32) -> Option<ScriptState> {
        self.find(number).and_then(|id| self.instance(id)).map(ScriptInstance::state)
    }

    fn node(&self, id: InstanceId) -> Option<&Node> {
        self.nodes.get(id.index as usize).filter(|n| n.linked && n.generation == id.generation)
    }

    fn node_mut(&mut self, id: InstanceId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.index as usize)
            .filter(|n| n.linked && n.generation == id.generation)
    }

    fn instance_mut(&mut self, id: InstanceId) -> Option<&mut ScriptInstance> {
        self.node_mut(id).and_then(|n| n.instance.as_mut())
    }

    pub(crate) fn link_last(&mut self, instance: ScriptInstance) -> InstanceId {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.nodes.push(Node::default());
                (self.nodes.len() - 1) as u32
            }
        };
        let node = &mut self.nodes[index as usize];
        node.instance = Some(instance);
        node.linked = true;
        let id = InstanceId { index, generation: node.generation };
        self.attach_last(index);
        id
    }

    fn detach(&mut self, index: u32) {
        let (prev, next) = {
            let n = &mut self.nodes[index as usize];
            (n.prev.take(), n.next.take())
        };
        match prev {
            Some(p) => self.nodes[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n as usize].prev = prev,
            None => self.tail = prev,
        }
    }

    fn attach_last(&mut self, index: u32) {
        self.nodes[index as usize].prev = self.tail;
        self.nodes[index as usize].next = None;
        match self.tail {
            Some(t) => self.nodes[t as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    fn attach_first(&mut self, index: u32) {
        self.nodes[index as usize].prev = None;
        self.nodes[index as usize].next = self.head;
        match self.head {
            Some(h) => self.nodes[h as usize].prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
    }

    /// Move an instance to the front of the execution order.
    pub fn put_first(&mut self, id: InstanceId) -> bool {
        if self.node(id).is_none() {
            return false;
        }
        self.detach(id.index);
        self.attach_first(id.index);
        true
    }

    /// Move an instance to the back of the execution order.
    pub fn put_last(&mut self, id: InstanceId) -> bool {
        if self.node(id).is_none() {
            return false;
        }
        self.detach(id.index);
        self.attach_last(id.index);
        true
    }

    /// Unlink and destroy an instance, then wake anything waiting for its script.
    fn remove(&mut self, id: InstanceId) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        let number = node.instance.take().map(|i| i.number);
        node.linked = false;
        node.generation = node.generation.wrapping_add(1);
        self.detach(id.index);
        self.free.push(id.index);

        let Some(number) = number else {
            return;
        };
        if self.running.get(&number) == Some(&id) {
            self.running.remove(&number);
        }
        log::debug!("script {} finished", number);
        self.wake_waiters(number);
    }

    fn wake_waiters(&mut self, number: i32) {
        let waiters: Vec<InstanceId> = self
            .ids()
            .filter(|&id| {
                self.instance(id).map(ScriptInstance::state) == Some(ScriptState::ScriptWait(number))
            })
            .collect();
        for id in waiters {
            if let Some(inst) = self.instance_mut(id) {
                inst.state = ScriptState::Running;
            }
            self.put_last(id);
        }
    }

    fn promote_pre_waiters(&mut self, number: i32) {
        for node in self.nodes.iter_mut().filter(|n| n.linked) {
            if let Some(inst) = node.instance.as_mut() {
                if inst.state == ScriptState::ScriptWaitPre(number) {
                    inst.state = ScriptState::ScriptWait(number);
                }
            }
        }
    }

    /// Remove every instance in a terminal state.
    fn reap(&mut self) {
        if !std::mem::take(&mut self.reap_pending) {
            return;
        }
        let dead: Vec<InstanceId> = self
            .ids()
            .filter(|&id| self.instance(id).is_some_and(|i| i.state.is_terminal()))
            .collect();
        for id in dead {
            self.remove(id);
        }
    }

    /// Start a script, run it at once unless deferred, and settle any requests it raised.
    pub fn launch<H: ScriptHost + ?Sized>(
        &mut self,
        params: LaunchParams,
        session: &mut Session,
        host: &mut H,
    ) -> bool {
        if self.is_replica() {
            return false;
        }
        self.immediate_runs = 0;
        let ok = self.launch_queued(params);
        self.settle(session, host);
        ok
    }

    fn launch_queued(&mut self, params: LaunchParams) -> bool {
        let Some(desc) = self.module.find_script(params.script).cloned() else {
            log::warn!("cannot start script {}: not in this module", params.script);
            return false;
        };

        if !params.always {
            if let Some(id) = self.find(params.script) {
                if let Some(inst) = self.instance_mut(id) {
                    if inst.state == ScriptState::Suspended {
                        inst.state = ScriptState::Running;
                        return true;
                    }
                    return false;
                }
            }
        }

        let instance = ScriptInstance::new(
            &desc,
            self.config.script_locals,
            &params.args,
            params.activator,
            params.line,
            params.side,
        );
        let id = self.link_last(instance);
        if !params.always {
            self.running.insert(params.script, id);
            self.promote_pre_waiters(params.script);
        }
        log::debug!("started script {}", params.script);
        if !params.defer_start {
            self.ready.push_back(id);
        }
        true
    }

    /// Set the state of the tracked instance of `number`. Fails if none is tracked or it is
    /// already on its way out.
    pub fn set_state(&mut self, number: i32, state: ScriptState) -> bool {
        let Some(id) = self.find(number) else {
            return false;
        };
        let Some(inst) = self.instance_mut(id) else {
            return false;
        };
        if inst.state.is_terminal() {
            return false;
        }
        inst.state = state;
        if state.is_terminal() {
            self.reap_pending = true;
        }
        true
    }

    /// Route a script-control request: other maps go to the deferred queue, this map acts
    /// now.
    pub fn request<H: ScriptHost + ?Sized>(
        &mut self,
        request: ScriptRequest,
        session: &mut Session,
        host: &mut H,
    ) -> bool {
        if self.is_replica() {
            return false;
        }
        self.immediate_runs = 0;
        let ok = self.route(request, session, host);
        self.settle(session, host);
        ok
    }

    fn route<H: ScriptHost + ?Sized>(
        &mut self,
        request: ScriptRequest,
        session: &mut Session,
        host: &mut H,
    ) -> bool {
        let map = request.map();
        if map != 0 && map != self.map {
            let (action, args, player) = match &request {
                ScriptRequest::Execute { always, args, activator, .. } => (
                    if *always { DeferredAction::ExecuteAlways } else { DeferredAction::Execute },
                    *args,
                    activator.and_then(|a| host.player_number(a)),
                ),
                ScriptRequest::Suspend { .. } => (DeferredAction::Suspend, [0; 3], None),
                ScriptRequest::Terminate { .. } => (DeferredAction::Terminate, [0; 3], None),
            };
            session.deferred_mut().push(DeferredEntry {
                map,
                action,
                script: request.script(),
                args,
                player,
            });
            return true;
        }

        match request {
            ScriptRequest::Execute { script, args, always, activator, line, side, .. } => self
                .launch_queued(
                    LaunchParams::new(script)
                        .with_activator(activator)
                        .with_line(line, side)
                        .with_args(args)
                        .with_always(always),
                ),
            ScriptRequest::Suspend { script, .. } => self.set_state(script, ScriptState::Suspended),
            ScriptRequest::Terminate { script, .. } => {
                self.set_state(script, ScriptState::PleaseRemove)
            }
        }
    }

    /// Drain queued requests and immediate starts until nothing is left.
    fn settle<H: ScriptHost + ?Sized>(&mut self, session: &mut Session, host: &mut H) {
        loop {
            if let Some(request) = self.pending.pop_front() {
                self.route(request, session, host);
                continue;
            }
            let Some(id) = self.ready.pop_front() else {
                break;
            };
            if self.immediate_runs >= MAX_IMMEDIATE_RUNS {
                log::warn!("too many scripts started at once; the rest wait for the next tick");
                let tick = self.tick;
                if let Some(inst) = self.instance_mut(id) {
                    inst.last_tick = tick;
                }
                continue;
            }
            self.immediate_runs += 1;
            self.visit(id, session, host);
        }
        self.reap();
    }

    /// Advance one instance's wait state and run it if it is ready. Each instance is
    /// visited at most once per tick.
    fn visit<H: ScriptHost + ?Sized>(&mut self, id: InstanceId, session: &mut Session, host: &mut H) {
        let tick = self.tick;
        let Some(node) = self.nodes.get_mut(id.index as usize) else {
            return;
        };
        if !node.linked || node.generation != id.generation {
            return;
        }
        let Some(mut inst) = node.instance.take() else {
            return;
        };
        if inst.last_tick == tick && tick != 0 {
            node.instance = Some(inst);
            return;
        }
        inst.last_tick = tick;

        inst.state = match inst.state {
            ScriptState::Delayed(n) if n <= 1 => ScriptState::Running,
            ScriptState::Delayed(n) => ScriptState::Delayed(n - 1),
            ScriptState::TagWait(tag) if !host.sector_tag_busy(tag) => ScriptState::Running,
            ScriptState::PolyWait(po) if !host.polyobj_busy(po) => ScriptState::Running,
            ScriptState::ScriptWaitPre(n) if self.running.contains_key(&n) => {
                ScriptState::ScriptWait(n)
            }
            state => state,
        };

        if inst.state.is_running() {
            let mut requests = Vec::new();
            let outcome = Exec::new(
                &mut self.module,
                session,
                &mut self.stack,
                host,
                &self.config,
                &mut requests,
            )
            .run(&mut inst);
            log::trace!("script {} ran {} instructions", inst.number, outcome.executed);
            self.pending.extend(requests);

            if let ScriptState::ScriptWaitPre(n) = inst.state {
                if self.running.contains_key(&n) {
                    inst.state = ScriptState::ScriptWait(n);
                }
            }
        }

        let terminal = inst.state.is_terminal();
        if let Some(node) = self.nodes.get_mut(id.index as usize) {
            node.instance = Some(inst);
        }
        if terminal {
            self.remove(id);
        }
    }

    /// Advance every instance once, in list order.
    pub fn tick<H: ScriptHost + ?Sized>(&mut self, session: &mut Session, host: &mut H) {
        if self.is_replica() {
            return;
        }
        self.tick += 1;
        self.immediate_runs = 0;
        let tick = self.tick;
        loop {
            // Instances appended or repositioned during the pass are picked up by the next
            // round; `last_tick` keeps everyone to one visit.
            let order: Vec<InstanceId> = self
                .ids()
                .filter(|&id| self.instance(id).is_some_and(|i| i.last_tick != tick))
                .collect();
            if order.is_empty() {
                break;
            }
            for id in order {
                self.visit(id, session, host);
                self.settle(session, host);
            }
        }
    }

    /// Launch every script of `kind`, e.g. Enter scripts for a player's activator.
    pub fn start_typed_scripts<H: ScriptHost + ?Sized>(
        &mut self,
        kind: ScriptType,
        activator: Option<ActorHandle>,
        always: bool,
        session: &mut Session,
        host: &mut H,
    ) -> usize {
        if self.is_replica() {
            return 0;
        }
        self.immediate_runs = 0;
        let numbers: Vec<i32> = self
            .module
            .scripts()
            .iter()
            .filter(|s| s.kind() == Some(kind))
            .map(|s| s.number)
            .collect();
        let started = numbers
            .into_iter()
            .filter(|&number| {
                self.launch_queued(
                    LaunchParams::new(number).with_activator(activator).with_always(always),
                )
            })
            .count();
        self.settle(session, host);
        started
    }

    /// Drain this map's deferred entries, then start its Open scripts.
    pub fn begin_level<H: ScriptHost + ?Sized>(&mut self, session: &mut Session, host: &mut H) {
        if self.is_replica() {
            return;
        }
        self.immediate_runs = 0;
        for entry in session.deferred_mut().take(self.map) {
            if self.module.find_script(entry.script).is_none() {
                log::warn!(
                    "dropping deferred {:?} of script {} on map {}: no such script",
                    entry.action,
                    entry.script,
                    entry.map
                );
                continue;
            }
            match entry.action {
                DeferredAction::Execute | DeferredAction::ExecuteAlways => {
                    let activator = entry.player.and_then(|p| host.player_actor(p));
                    self.launch_queued(
                        LaunchParams::new(entry.script)
                            .with_activator(activator)
                            .with_args(entry.args)
                            .with_always(entry.action == DeferredAction::ExecuteAlways),
                    );
                }
                DeferredAction::Suspend => {
                    self.set_state(entry.script, ScriptState::Suspended);
                }
                DeferredAction::Terminate => {
                    self.set_state(entry.script, ScriptState::PleaseRemove);
                }
            }
        }
        self.settle(session, host);
        let opened = self.start_typed_scripts(ScriptType::Open, None, false, session, host);
        log::info!("map {}: {} open scripts started", self.map, opened);
    }

    /// Drop every instance; used when the level unloads.
    pub fn terminate_all(&mut self) {
        let ids: Vec<InstanceId> = self.ids().collect();
        for id in ids {
            if let Some(node) = self.node_mut(id) {
                node.instance = None;
                node.linked = false;
                node.generation = node.generation.wrapping_add(1);
            }
            self.detach(id.index);
            self.free.push(id.index);
        }
        self.running.clear();
        self.pending.clear();
        self.ready.clear();
        self.stack.truncate(0);
    }
}
