//! Interfaces to the game around the VM.
//!
//! The interpreter never touches game state directly. Reads go through [`WorldModel`]
//! queries; writes are described as [`SideEffect`]s which are applied to the host and then
//! handed to [`Replication`].

use serde::{Deserialize, Serialize};

use crate::effect::{BlockingKind, Fade, HudMessage, SideEffect, SoundSource, Surface};

/// Generation-checked reference to a world actor. A handle whose actor has since been
/// destroyed simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorHandle {
    pub index: u32,
    pub generation: u32,
}

impl ActorHandle {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineId(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineSide {
    #[default]
    Front,
    Back,
}

impl LineSide {
    pub fn as_i32(self) -> i32 {
        match self {
            LineSide::Front => 0,
            LineSide::Back => 1,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        if v == 0 {
            LineSide::Front
        } else {
            LineSide::Back
        }
    }
}

/// Game state the scripts can read, plus the authoritative mutations behind each
/// [`SideEffect`]. Optional queries default to an empty single-player world.
pub trait WorldModel {
    fn actor_alive(&self, actor: ActorHandle) -> bool;

    /// Whether any sector with `tag` still has an active floor/ceiling mover.
    fn sector_tag_busy(&self, tag: i32) -> bool;

    fn polyobj_busy(&self, id: i32) -> bool;

    /// Run line special `special`; returns the special's result.
    fn execute_special(
        &mut self,
        special: i32,
        args: [i32; 5],
        activator: Option<ActorHandle>,
        line: Option<LineId>,
        side: LineSide,
    ) -> i32;

    /// Uniform value in `min..=max` from the simulation's deterministic generator.
    fn random(&mut self, min: i32, max: i32) -> i32;

    fn player_number(&self, _actor: ActorHandle) -> Option<u8> {
        None
    }

    /// Current body of a connected player.
    fn player_actor(&self, _player: u8) -> Option<ActorHandle> {
        None
    }

    fn player_in_game(&self, _player: u8) -> bool {
        false
    }

    fn player_count(&self) -> i32 {
        0
    }

    fn player_name(&self, _player: u8) -> Option<String> {
        None
    }

    fn actor_name(&self, _actor: ActorHandle) -> Option<String> {
        None
    }

    fn player_health(&self, _actor: ActorHandle) -> i32 {
        0
    }

    fn player_armor(&self, _actor: ActorHandle) -> i32 {
        0
    }

    fn player_frags(&self, _actor: ActorHandle) -> i32 {
        0
    }

    fn actor_tid(&self, _actor: ActorHandle) -> i32 {
        0
    }

    /// Fixed-point position of the first actor with `tid`.
    fn actor_position(&self, _tid: i32) -> [i32; 3] {
        [0; 3]
    }

    fn thing_count(&self, _kind: i32, _tid: i32) -> i32 {
        0
    }

    fn inventory_count(&self, _actor: ActorHandle, _item: &str) -> i32 {
        0
    }

    fn game_type(&self) -> i32 {
        0
    }

    fn game_skill(&self) -> i32 {
        2
    }

    /// Ticks since the level started.
    fn level_time(&self) -> i32 {
        0
    }

    fn is_network_game(&self) -> bool {
        false
    }

    /// Whether `actor` holds the key for `lock`; gates the locked-execute special.
    fn check_lock(&self, _actor: Option<ActorHandle>, _lock: i32) -> bool {
        true
    }

    fn change_flat(&mut self, _tag: i32, _texture: &str, _surface: Surface) {}

    fn clear_line_special(&mut self, _line: LineId) {}

    fn set_line_texture(&mut self, _line_id: i32, _side: LineSide, _position: i32, _texture: &str) {}

    fn set_line_blocking(&mut self, _line_id: i32, _kind: BlockingKind, _enabled: bool) {}

    fn set_line_special(&mut self, _line_id: i32, _special: i32, _args: [i32; 5]) {}

    fn set_gravity(&mut self, _value: i32) {}

    fn set_air_control(&mut self, _value: i32) {}

    fn clear_inventory(&mut self, _target: Option<ActorHandle>) {}

    fn give_inventory(&mut self, _target: Option<ActorHandle>, _item: &str, _amount: i32) {}

    fn take_inventory(&mut self, _target: Option<ActorHandle>, _item: &str, _amount: i32) {}

    /// Returns the number of actors spawned.
    fn spawn(&mut self, _kind: &str, _position: [i32; 3], _tid: i32, _angle: i32) -> i32 {
        0
    }

    fn spawn_spot(&mut self, _kind: &str, _spot: i32, _tid: i32, _angle: i32) -> i32 {
        0
    }
}

/// Text, sound, music and screen effects. Everything defaults to a no-op so a headless
/// server can ignore presentation entirely.
pub trait Presentation {
    /// `target == None` prints to every player.
    fn print(&mut self, _target: Option<ActorHandle>, _text: &str, _bold: bool) {}

    fn hud_message(&mut self, _target: Option<ActorHandle>, _message: &HudMessage) {}

    fn set_font(&mut self, _name: &str) {}

    fn change_music(&mut self, _target: Option<ActorHandle>, _name: &str, _order: i32) {}

    fn play_sound(&mut self, _source: &SoundSource, _name: &str, _volume: i32) {}

    fn sound_sequence(&mut self, _line: Option<LineId>, _name: &str) {}

    fn fade(&mut self, _target: Option<ActorHandle>, _fade: &Fade) {}

    /// Resolve a localization key for PRINTLOCALIZED.
    fn localize(&self, key: &str) -> String {
        key.to_owned()
    }
}

pub trait Replication {
    /// Ship an already-applied effect to every replica.
    fn broadcast(&mut self, _effect: &SideEffect) {}
}

/// Everything the scheduler needs from its environment.
pub trait ScriptHost: WorldModel + Presentation + Replication {}

impl<T: WorldModel + Presentation + Replication + ?Sized> ScriptHost for T {}
