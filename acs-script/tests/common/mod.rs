#![allow(dead_code)]

use std::collections::HashSet;

use anyhow::Result;

use acs_script::effect::SideEffect;
use acs_script::format::{ModuleBuilder, ModuleFlavor};
use acs_script::{
    ActorHandle, LineId, LineSide, LoadOptions, Module, PcodeEncoding, Presentation, Replication,
    Scheduler, Session, VmConfig, WorldModel,
};

/// Host double that records every broadcast side effect.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub effects: Vec<SideEffect>,
    pub specials: Vec<(i32, [i32; 5])>,
    pub busy_tags: HashSet<i32>,
    pub busy_polys: HashSet<i32>,
    /// Player `n` is controlled by `players[n]`.
    pub players: Vec<ActorHandle>,
    pub dead: HashSet<ActorHandle>,
    pub gravity: Option<i32>,
    pub printed: Vec<String>,
}

impl RecordingHost {
    pub fn with_players(players: &[ActorHandle]) -> Self {
        Self { players: players.to_vec(), ..Self::default() }
    }
}

impl WorldModel for RecordingHost {
    fn actor_alive(&self, actor: ActorHandle) -> bool {
        !self.dead.contains(&actor)
    }

    fn sector_tag_busy(&self, tag: i32) -> bool {
        self.busy_tags.contains(&tag)
    }

    fn polyobj_busy(&self, id: i32) -> bool {
        self.busy_polys.contains(&id)
    }

    fn execute_special(
        &mut self,
        special: i32,
        args: [i32; 5],
        _activator: Option<ActorHandle>,
        _line: Option<LineId>,
        _side: LineSide,
    ) -> i32 {
        self.specials.push((special, args));
        1
    }

    fn random(&mut self, min: i32, _max: i32) -> i32 {
        min
    }

    fn player_number(&self, actor: ActorHandle) -> Option<u8> {
        self.players.iter().position(|p| *p == actor).map(|p| p as u8)
    }

    fn player_actor(&self, player: u8) -> Option<ActorHandle> {
        self.players.get(player as usize).copied()
    }

    fn player_in_game(&self, player: u8) -> bool {
        (player as usize) < self.players.len()
    }

    fn player_count(&self) -> i32 {
        self.players.len() as i32
    }

    fn set_gravity(&mut self, value: i32) {
        self.gravity = Some(value);
    }
}

impl Presentation for RecordingHost {
    fn print(&mut self, _target: Option<ActorHandle>, text: &str, _bold: bool) {
        self.printed.push(text.to_owned());
    }
}

impl Replication for RecordingHost {
    fn broadcast(&mut self, effect: &SideEffect) {
        self.effects.push(effect.clone());
    }
}

pub fn builder() -> ModuleBuilder {
    ModuleBuilder::new(ModuleFlavor::Enhanced(PcodeEncoding::Compact))
}

pub fn load(bytes: &[u8]) -> Result<Module> {
    Ok(Module::load(bytes, &LoadOptions::default())?)
}

/// A level on map 1 with a fresh session and host.
pub fn level(b: ModuleBuilder) -> Result<(Scheduler, Session, RecordingHost)> {
    level_with(b, VmConfig::default())
}

pub fn level_with(
    b: ModuleBuilder,
    config: VmConfig,
) -> Result<(Scheduler, Session, RecordingHost)> {
    let module = load(&b.build())?;
    Ok((Scheduler::new(module, 1, config), Session::new(), RecordingHost::default()))
}

pub fn ticks(s: &mut Scheduler, session: &mut Session, host: &mut RecordingHost, n: usize) {
    for _ in 0..n {
        s.tick(session, host);
    }
}

pub fn gravity_log(host: &RecordingHost) -> Vec<i32> {
    host.effects
        .iter()
        .filter_map(|e| match e {
            SideEffect::SetGravity { value } => Some(*value),
            _ => None,
        })
        .collect()
}
