//! Replication records for side-effecting opcodes.

use serde::{Deserialize, Serialize};

use crate::host::{ActorHandle, LineId, LineSide, Presentation, WorldModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Surface {
    Floor,
    Ceiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingKind {
    /// Blocks everything.
    All,
    Monsters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoundSource {
    /// Front sector of the activation line, or the whole level without one.
    Sector(Option<LineId>),
    /// Heard by everyone at full volume.
    Ambient,
    /// Heard only by the given player.
    LocalAmbient(Option<ActorHandle>),
    /// Every actor with this tid.
    Thing(i32),
    Actor(Option<ActorHandle>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HudMessage {
    pub text: String,
    pub kind: i32,
    pub id: i32,
    pub color: i32,
    /// Fixed-point screen position.
    pub x: i32,
    pub y: i32,
    /// Fixed-point seconds.
    pub hold: i32,
    /// Type-specific trailing arguments (fade times and the like).
    pub extra: Vec<i32>,
    pub bold: bool,
}

/// RGB components are 0..=255; alpha and time are fixed-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fade {
    Cancel,
    To { rgba: [i32; 4], time: i32 },
    Range { from: [i32; 4], to: [i32; 4], time: i32 },
}

/// One observable mutation produced by a script.
///
/// The authoritative side calls [`SideEffect::apply`] and then broadcasts the record;
/// replicas receive it and only call `apply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideEffect {
    LineSpecial {
        special: i32,
        args: [i32; 5],
        activator: Option<ActorHandle>,
        line: Option<LineId>,
        side: LineSide,
    },
    ChangeFlat { tag: i32, texture: String, surface: Surface },
    ClearLineSpecial { line: LineId },
    SetLineTexture { line_id: i32, side: LineSide, position: i32, texture: String },
    SetLineBlocking { line_id: i32, kind: BlockingKind, enabled: bool },
    SetLineSpecial { line_id: i32, special: i32, args: [i32; 5] },
    SetGravity { value: i32 },
    SetAirControl { value: i32 },
    ClearInventory { target: Option<ActorHandle> },
    GiveInventory { target: Option<ActorHandle>, item: String, amount: i32 },
    TakeInventory { target: Option<ActorHandle>, item: String, amount: i32 },
    Spawn { kind: String, position: [i32; 3], tid: i32, angle: i32 },
    SpawnSpot { kind: String, spot: i32, tid: i32, angle: i32 },
    Print { target: Option<ActorHandle>, text: String, bold: bool },
    HudMessage { target: Option<ActorHandle>, message: HudMessage },
    SetFont { name: String },
    Music { target: Option<ActorHandle>, name: String, order: i32 },
    Sound { source: SoundSource, name: String, volume: i32 },
    SoundSequence { line: Option<LineId>, name: String },
    Fade { target: Option<ActorHandle>, fade: Fade },
}

impl SideEffect {
    /// Perform the effect locally. Returns the value an opcode pushes for effects that
    /// produce one (line special results, spawn counts) and 0 otherwise.
    pub fn apply<H: WorldModel + Presentation + ?Sized>(&self, host: &mut H) -> i32 {
        match self {
            SideEffect::LineSpecial { special, args, activator, line, side } => {
                return host.execute_special(*special, *args, *activator, *line, *side);
            }
            SideEffect::ChangeFlat { tag, texture, surface } => {
                host.change_flat(*tag, texture, *surface)
            }
            SideEffect::ClearLineSpecial { line } => host.clear_line_special(*line),
            SideEffect::SetLineTexture { line_id, side, position, texture } => {
                host.set_line_texture(*line_id, *side, *position, texture)
            }
            SideEffect::SetLineBlocking { line_id, kind, enabled } => {
                host.set_line_blocking(*line_id, *kind, *enabled)
            }
            SideEffect::SetLineSpecial { line_id, special, args } => {
                host.set_line_special(*line_id, *special, *args)
            }
            SideEffect::SetGravity { value } => host.set_gravity(*value),
            SideEffect::SetAirControl { value } => host.set_air_control(*value),
            SideEffect::ClearInventory { target } => host.clear_inventory(*target),
            SideEffect::GiveInventory { target, item, amount } => {
                host.give_inventory(*target, item, *amount)
            }
            SideEffect::TakeInventory { target, item, amount } => {
                host.take_inventory(*target, item, *amount)
            }
            SideEffect::Spawn { kind, position, tid, angle } => {
                return host.spawn(kind, *position, *tid, *angle);
            }
            SideEffect::SpawnSpot { kind, spot, tid, angle } => {
                return host.spawn_spot(kind, *spot, *tid, *angle);
            }
            SideEffect::Print { target, text, bold } => host.print(*target, text, *bold),
            SideEffect::HudMessage { target, message } => host.hud_message(*target, message),
            SideEffect::SetFont { name } => host.set_font(name),
            SideEffect::Music { target, name, order } => host.change_music(*target, name, *order),
            SideEffect::Sound { source, name, volume } => host.play_sound(source, name, *volume),
            SideEffect::SoundSequence { line, name } => host.sound_sequence(*line, name),
            SideEffect::Fade { target, fade } => host.fade(*target, fade),
        }
        0
    }
}
