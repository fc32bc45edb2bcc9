use std::f64::consts::TAU;

use super::decode::{
    case_table, read_index, read_opcode, read_raw, read_word, sorted_case_target,
};
use super::instance::{ScriptInstance, ScriptState};
use super::opcode::Pcode;
use super::stack::{Frame, OperandStack, ReturnRecord, Slot};
use super::VmError;
use crate::config::VmConfig;
use crate::effect::{BlockingKind, Fade, HudMessage, SideEffect, SoundSource, Surface};
use crate::format::{FunctionDescriptor, Module};
use crate::host::{ActorHandle, ScriptHost};
use crate::scheduler::ScriptRequest;
use crate::session::Session;

const SPECIAL_EXECUTE: i32 = 80;
const SPECIAL_SUSPEND: i32 = 81;
const SPECIAL_TERMINATE: i32 = 82;
const SPECIAL_LOCKED_EXECUTE: i32 = 83;
const SPECIAL_EXECUTE_ALWAYS: i32 = 226;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Script,
    Map,
    World,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayScope {
    Map,
    World,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Update {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Inc,
    Dec,
}

impl Update {
    fn takes_operand(self) -> bool {
        !matches!(self, Update::Inc | Update::Dec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunOutcome {
    pub executed: u32,
}

/// Everything one dispatch borrows from the scheduler.
pub(crate) struct Exec<'a, H: ScriptHost + ?Sized> {
    pub module: &'a mut Module,
    pub session: &'a mut Session,
    pub stack: &'a mut OperandStack,
    pub host: &'a mut H,
    pub config: &'a VmConfig,
    /// Script-control requests raised during the dispatch, drained by the scheduler.
    pub requests: &'a mut Vec<ScriptRequest>,
    base: usize,
}

impl<'a, H: ScriptHost + ?Sized> Exec<'a, H> {
    pub fn new(
        module: &'a mut Module,
        session: &'a mut Session,
        stack: &'a mut OperandStack,
        host: &'a mut H,
        config: &'a VmConfig,
        requests: &'a mut Vec<ScriptRequest>,
    ) -> Self {
        Self { module, session, stack, host, config, requests, base: 0 }
    }

    /// Run `inst` until it leaves the Running state, faults, or hits the instruction limit.
    pub fn run(&mut self, inst: &mut ScriptInstance) -> RunOutcome {
        self.base = self.stack.len();
        if let Err(e) = self.stack.restore(std::mem::take(&mut inst.segment)) {
            log::error!("script {}: cannot resume: {}", inst.number, e);
            inst.state = ScriptState::PleaseRemove;
            return RunOutcome { executed: 0 };
        }

        let limit = self.config.instruction_limit;
        let mut executed = 0u32;
        while inst.state.is_running() {
            if executed >= limit {
                log::error!(
                    "script {} ran {} instructions without yielding; terminating",
                    inst.number,
                    limit
                );
                inst.state = ScriptState::PleaseRemove;
                break;
            }
            executed += 1;
            let at = inst.pc;
            if let Err(e) = self.step(inst) {
                log::error!("script {} aborted at 0x{:X}: {}", inst.number, at, e);
                inst.state = ScriptState::PleaseRemove;
            }
        }

        match inst.state {
            ScriptState::DivideBy0 => {
                log::warn!("script {}: division by zero; terminating", inst.number);
                inst.state = ScriptState::PleaseRemove;
            }
            ScriptState::ModulusBy0 => {
                log::warn!("script {}: modulus by zero; terminating", inst.number);
                inst.state = ScriptState::PleaseRemove;
            }
            _ => {}
        }

        if inst.state == ScriptState::PleaseRemove {
            self.stack.truncate(self.base);
        } else {
            inst.segment = self.stack.spill(self.base);
        }
        RunOutcome { executed }
    }

    fn step(&mut self, inst: &mut ScriptInstance) -> Result<(), VmError> {
        let at = inst.pc;
        let raw = read_opcode(self.module.bytes(), &mut inst.pc, self.module.encoding())?;
        let Some(op) = Pcode::from_raw(raw) else {
            log::warn!("script {}: unknown opcode {} at 0x{:X}, skipped", inst.number, raw, at);
            return Ok(());
        };
        log::trace!("script {} 0x{:04X} {}", inst.number, at, op.mnemonic());

        use Pcode::*;
        match op {
            Nop => {}
            Terminate => inst.state = ScriptState::PleaseRemove,
            Suspend => inst.state = ScriptState::Suspended,
            Restart => {
                self.stack.truncate(self.base);
                inst.frame = Frame::Script;
                inst.function = None;
                inst.pc = inst.entry;
            }

            PushNumber => {
                let v = self.word(inst)?;
                self.push(v)?;
            }
            PushByte => self.push_raw(inst, 1)?,
            Push2Bytes => self.push_raw(inst, 2)?,
            Push3Bytes => self.push_raw(inst, 3)?,
            Push4Bytes => self.push_raw(inst, 4)?,
            Push5Bytes => self.push_raw(inst, 5)?,
            PushBytes => {
                let n = self.raw(inst)?;
                self.push_raw(inst, n as usize)?;
            }
            Drop => {
                self.pop()?;
            }
            Dup => {
                let v = self.peek()?;
                self.push(v)?;
            }
            Swap => {
                let [a, b] = self.pop_n::<2>()?;
                self.push(b)?;
                self.push(a)?;
            }

            Add => self.binop(i32::wrapping_add)?,
            Subtract => self.binop(i32::wrapping_sub)?,
            Multiply => self.binop(i32::wrapping_mul)?,
            Divide | Modulus | FixedDiv => {
                let [a, b] = self.pop_n::<2>()?;
                if b == 0 {
                    inst.state = if op == Modulus {
                        ScriptState::ModulusBy0
                    } else {
                        ScriptState::DivideBy0
                    };
                } else {
                    let v = match op {
                        Divide => a.wrapping_div(b),
                        Modulus => a.wrapping_rem(b),
                        _ => (((a as i64) << 16) / b as i64) as i32,
                    };
                    self.push(v)?;
                }
            }
            FixedMul => self.binop(|a, b| ((a as i64 * b as i64) >> 16) as i32)?,
            Eq => self.binop(|a, b| (a == b) as i32)?,
            Ne => self.binop(|a, b| (a != b) as i32)?,
            Lt => self.binop(|a, b| (a < b) as i32)?,
            Gt => self.binop(|a, b| (a > b) as i32)?,
            Le => self.binop(|a, b| (a <= b) as i32)?,
            Ge => self.binop(|a, b| (a >= b) as i32)?,
            AndLogical => self.binop(|a, b| (a != 0 && b != 0) as i32)?,
            OrLogical => self.binop(|a, b| (a != 0 || b != 0) as i32)?,
            AndBitwise => self.binop(|a, b| a & b)?,
            OrBitwise => self.binop(|a, b| a | b)?,
            EorBitwise => self.binop(|a, b| a ^ b)?,
            LShift => self.binop(|a, b| a.wrapping_shl(b as u32))?,
            RShift => self.binop(|a, b| a.wrapping_shr(b as u32))?,
            NegateLogical => {
                let v = self.pop()?;
                self.push((v == 0) as i32)?;
            }
            UnaryMinus => {
                let v = self.pop()?;
                self.push(v.wrapping_neg())?;
            }
            Sin | Cos => {
                let a = angle_radians(self.pop()?);
                self.push(to_fixed(if op == Sin { a.sin() } else { a.cos() }))?;
            }
            VectorAngle => {
                let [x, y] = self.pop_n::<2>()?;
                let mut a = (y as f64).atan2(x as f64);
                if a < 0.0 {
                    a += TAU;
                }
                self.push(((a / TAU * 65536.0).round() as i32) & 0xFFFF)?;
            }

            AssignScriptVar => self.var_update(inst, Scope::Script, Update::Assign)?,
            AssignMapVar => self.var_update(inst, Scope::Map, Update::Assign)?,
            AssignWorldVar => self.var_update(inst, Scope::World, Update::Assign)?,
            AssignGlobalVar => self.var_update(inst, Scope::Global, Update::Assign)?,
            AddScriptVar => self.var_update(inst, Scope::Script, Update::Add)?,
            AddMapVar => self.var_update(inst, Scope::Map, Update::Add)?,
            AddWorldVar => self.var_update(inst, Scope::World, Update::Add)?,
            AddGlobalVar => self.var_update(inst, Scope::Global, Update::Add)?,
            SubScriptVar => self.var_update(inst, Scope::Script, Update::Sub)?,
            SubMapVar => self.var_update(inst, Scope::Map, Update::Sub)?,
            SubWorldVar => self.var_update(inst, Scope::World, Update::Sub)?,
            SubGlobalVar => self.var_update(inst, Scope::Global, Update::Sub)?,
            MulScriptVar => self.var_update(inst, Scope::Script, Update::Mul)?,
            MulMapVar => self.var_update(inst, Scope::Map, Update::Mul)?,
            MulWorldVar => self.var_update(inst, Scope::World, Update::Mul)?,
            MulGlobalVar => self.var_update(inst, Scope::Global, Update::Mul)?,
            DivScriptVar => self.var_update(inst, Scope::Script, Update::Div)?,
            DivMapVar => self.var_update(inst, Scope::Map, Update::Div)?,
            DivWorldVar => self.var_update(inst, Scope::World, Update::Div)?,
            DivGlobalVar => self.var_update(inst, Scope::Global, Update::Div)?,
            ModScriptVar => self.var_update(inst, Scope::Script, Update::Mod)?,
            ModMapVar => self.var_update(inst, Scope::Map, Update::Mod)?,
            ModWorldVar => self.var_update(inst, Scope::World, Update::Mod)?,
            ModGlobalVar => self.var_update(inst, Scope::Global, Update::Mod)?,
            IncScriptVar => self.var_update(inst, Scope::Script, Update::Inc)?,
            IncMapVar => self.var_update(inst, Scope::Map, Update::Inc)?,
            IncWorldVar => self.var_update(inst, Scope::World, Update::Inc)?,
            IncGlobalVar => self.var_update(inst, Scope::Global, Update::Inc)?,
            DecScriptVar => self.var_update(inst, Scope::Script, Update::Dec)?,
            DecMapVar => self.var_update(inst, Scope::Map, Update::Dec)?,
            DecWorldVar => self.var_update(inst, Scope::World, Update::Dec)?,
            DecGlobalVar => self.var_update(inst, Scope::Global, Update::Dec)?,
            PushScriptVar => self.push_var(inst, Scope::Script)?,
            PushMapVar => self.push_var(inst, Scope::Map)?,
            PushWorldVar => self.push_var(inst, Scope::World)?,
            PushGlobalVar => self.push_var(inst, Scope::Global)?,

            PushMapArray => self.push_array(inst, ArrayScope::Map)?,
            PushWorldArray => self.push_array(inst, ArrayScope::World)?,
            PushGlobalArray => self.push_array(inst, ArrayScope::Global)?,
            AssignMapArray => self.array_update(inst, ArrayScope::Map, Update::Assign)?,
            AssignWorldArray => self.array_update(inst, ArrayScope::World, Update::Assign)?,
            AssignGlobalArray => self.array_update(inst, ArrayScope::Global, Update::Assign)?,
            AddMapArray => self.array_update(inst, ArrayScope::Map, Update::Add)?,
            AddWorldArray => self.array_update(inst, ArrayScope::World, Update::Add)?,
            AddGlobalArray => self.array_update(inst, ArrayScope::Global, Update::Add)?,
            SubMapArray => self.array_update(inst, ArrayScope::Map, Update::Sub)?,
            SubWorldArray => self.array_update(inst, ArrayScope::World, Update::Sub)?,
            SubGlobalArray => self.array_update(inst, ArrayScope::Global, Update::Sub)?,
            MulMapArray => self.array_update(inst, ArrayScope::Map, Update::Mul)?,
            MulWorldArray => self.array_update(inst, ArrayScope::World, Update::Mul)?,
            MulGlobalArray => self.array_update(inst, ArrayScope::Global, Update::Mul)?,
            DivMapArray => self.array_update(inst, ArrayScope::Map, Update::Div)?,
            DivWorldArray => self.array_update(inst, ArrayScope::World, Update::Div)?,
            DivGlobalArray => self.array_update(inst, ArrayScope::Global, Update::Div)?,
            ModMapArray => self.array_update(inst, ArrayScope::Map, Update::Mod)?,
            ModWorldArray => self.array_update(inst, ArrayScope::World, Update::Mod)?,
            ModGlobalArray => self.array_update(inst, ArrayScope::Global, Update::Mod)?,
            IncMapArray => self.array_update(inst, ArrayScope::Map, Update::Inc)?,
            IncWorldArray => self.array_update(inst, ArrayScope::World, Update::Inc)?,
            IncGlobalArray => self.array_update(inst, ArrayScope::Global, Update::Inc)?,
            DecMapArray => self.array_update(inst, ArrayScope::Map, Update::Dec)?,
            DecWorldArray => self.array_update(inst, ArrayScope::World, Update::Dec)?,
            DecGlobalArray => self.array_update(inst, ArrayScope::Global, Update::Dec)?,

            Goto => inst.pc = self.word(inst)? as u32,
            IfGoto | IfNotGoto => {
                let target = self.word(inst)? as u32;
                let v = self.pop()?;
                if (v != 0) == (op == IfGoto) {
                    inst.pc = target;
                }
            }
            CaseGoto => {
                let value = self.word(inst)?;
                let target = self.word(inst)? as u32;
                if self.peek()? == value {
                    self.pop()?;
                    inst.pc = target;
                }
            }
            CaseGotoSorted => {
                let (base, count) = case_table(self.module.bytes(), inst.pc)?;
                let value = self.peek()?;
                match sorted_case_target(self.module.bytes(), base, count, value)? {
                    Some(target) => {
                        self.pop()?;
                        inst.pc = target;
                    }
                    None => inst.pc = base + 4 + count * 8,
                }
            }

            Call => self.call(inst, false)?,
            CallDiscard => self.call(inst, true)?,
            ReturnVoid => self.ret(inst, 0)?,
            ReturnVal => {
                let v = self.pop()?;
                self.ret(inst, v)?;
            }

            Delay => {
                let n = self.pop()?;
                delay(inst, n);
            }
            DelayDirect => {
                let n = self.word(inst)?;
                delay(inst, n);
            }
            DelayDirectB => {
                let n = self.raw(inst)?;
                delay(inst, n as i32);
            }
            TagWait => inst.state = ScriptState::TagWait(self.pop()?),
            TagWaitDirect => inst.state = ScriptState::TagWait(self.word(inst)?),
            PolyWait => inst.state = ScriptState::PolyWait(self.pop()?),
            PolyWaitDirect => inst.state = ScriptState::PolyWait(self.word(inst)?),
            ScriptWait => inst.state = ScriptState::ScriptWaitPre(self.pop()?),
            ScriptWaitDirect => inst.state = ScriptState::ScriptWaitPre(self.word(inst)?),

            LSpec1 => self.lspec_stack(inst, 1, false)?,
            LSpec2 => self.lspec_stack(inst, 2, false)?,
            LSpec3 => self.lspec_stack(inst, 3, false)?,
            LSpec4 => self.lspec_stack(inst, 4, false)?,
            LSpec5 => self.lspec_stack(inst, 5, false)?,
            LSpec5Result => self.lspec_stack(inst, 5, true)?,
            LSpec1Direct => self.lspec_direct(inst, 1, false)?,
            LSpec2Direct => self.lspec_direct(inst, 2, false)?,
            LSpec3Direct => self.lspec_direct(inst, 3, false)?,
            LSpec4Direct => self.lspec_direct(inst, 4, false)?,
            LSpec5Direct => self.lspec_direct(inst, 5, false)?,
            LSpec1DirectB => self.lspec_direct(inst, 1, true)?,
            LSpec2DirectB => self.lspec_direct(inst, 2, true)?,
            LSpec3DirectB => self.lspec_direct(inst, 3, true)?,
            LSpec4DirectB => self.lspec_direct(inst, 4, true)?,
            LSpec5DirectB => self.lspec_direct(inst, 5, true)?,

            Random => {
                let [min, max] = self.pop_n::<2>()?;
                let v = self.host.random(min, max);
                self.push(v)?;
            }
            RandomDirect => {
                let [min, max] = self.words::<2>(inst)?;
                let v = self.host.random(min, max);
                self.push(v)?;
            }
            RandomDirectB => {
                let min = self.raw(inst)? as i32;
                let max = self.raw(inst)? as i32;
                let v = self.host.random(min, max);
                self.push(v)?;
            }
            ThingCount => {
                let [kind, tid] = self.pop_n::<2>()?;
                let v = self.host.thing_count(kind, tid);
                self.push(v)?;
            }
            ThingCountDirect => {
                let [kind, tid] = self.words::<2>(inst)?;
                let v = self.host.thing_count(kind, tid);
                self.push(v)?;
            }
            LineSide => self.push(inst.side.as_i32())?,
            PlayerCount => {
                let v = self.host.player_count();
                self.push(v)?;
            }
            GameType => {
                let v = self.host.game_type();
                self.push(v)?;
            }
            GameSkill => {
                let v = self.host.game_skill();
                self.push(v)?;
            }
            Timer => {
                let v = self.host.level_time();
                self.push(v)?;
            }
            IsNetworkGame | SinglePlayer => {
                let net = self.host.is_network_game();
                self.push((net == (op == IsNetworkGame)) as i32)?;
            }
            PlayerHealth | PlayerArmorPoints | PlayerFrags | ActivatorTid => {
                let v = match self.activator(inst) {
                    Some(a) => match op {
                        PlayerHealth => self.host.player_health(a),
                        PlayerArmorPoints => self.host.player_armor(a),
                        PlayerFrags => self.host.player_frags(a),
                        _ => self.host.actor_tid(a),
                    },
                    None => 0,
                };
                self.push(v)?;
            }
            PlayerNumber => {
                let v = self
                    .activator(inst)
                    .and_then(|a| self.host.player_number(a))
                    .map_or(-1, i32::from);
                self.push(v)?;
            }
            PlayerInGame => {
                let n = self.pop()?;
                let v = u8::try_from(n).map_or(false, |p| self.host.player_in_game(p));
                self.push(v as i32)?;
            }
            GetActorX | GetActorY | GetActorZ => {
                let tid = self.pop()?;
                let pos = self.host.actor_position(tid);
                let axis = match op {
                    GetActorX => 0,
                    GetActorY => 1,
                    _ => 2,
                };
                self.push(pos[axis])?;
            }
            CheckInventory => {
                let name = self.pop_string()?;
                self.check_inventory(inst, &name)?;
            }
            CheckInventoryDirect => {
                let index = self.word(inst)?;
                let name = self.string(index);
                self.check_inventory(inst, &name)?;
            }
            StrLen => {
                let index = self.pop()?;
                let len = self
                    .module
                    .lookup_string(index, self.config.locale)
                    .map_or(0, |s| s.chars().count());
                self.push(len as i32)?;
            }

            ChangeFloor | ChangeCeiling => {
                let [tag, name] = self.pop_n::<2>()?;
                self.change_flat(tag, name, op == ChangeFloor);
            }
            ChangeFloorDirect | ChangeCeilingDirect => {
                let [tag, name] = self.words::<2>(inst)?;
                self.change_flat(tag, name, op == ChangeFloorDirect);
            }
            ClearLineSpecial => {
                if let Some(line) = inst.line {
                    self.perform(SideEffect::ClearLineSpecial { line });
                }
            }
            SetLineTexture => {
                let [line_id, side, position, name] = self.pop_n::<4>()?;
                let texture = self.string(name);
                self.perform(SideEffect::SetLineTexture {
                    line_id,
                    side: crate::host::LineSide::from_i32(side),
                    position,
                    texture,
                });
            }
            SetLineBlocking | SetLineMonsterBlocking => {
                let [line_id, enabled] = self.pop_n::<2>()?;
                let kind = if op == SetLineBlocking {
                    BlockingKind::All
                } else {
                    BlockingKind::Monsters
                };
                self.perform(SideEffect::SetLineBlocking { line_id, kind, enabled: enabled != 0 });
            }
            SetLineSpecial => {
                let [line_id, special, a0, a1, a2, a3, a4] = self.pop_n::<7>()?;
                self.perform(SideEffect::SetLineSpecial {
                    line_id,
                    special,
                    args: [a0, a1, a2, a3, a4],
                });
            }
            SetGravity => {
                let value = self.pop()?;
                self.perform(SideEffect::SetGravity { value });
            }
            SetGravityDirect => {
                let value = self.word(inst)?;
                self.perform(SideEffect::SetGravity { value });
            }
            SetAirControl => {
                let value = self.pop()?;
                self.perform(SideEffect::SetAirControl { value });
            }
            SetAirControlDirect => {
                let value = self.word(inst)?;
                self.perform(SideEffect::SetAirControl { value });
            }
            ClearInventory => {
                let target = self.activator(inst);
                self.perform(SideEffect::ClearInventory { target });
            }
            GiveInventory | TakeInventory => {
                let [name, amount] = self.pop_n::<2>()?;
                self.inventory(inst, op == GiveInventory, name, amount);
            }
            GiveInventoryDirect | TakeInventoryDirect => {
                let [name, amount] = self.words::<2>(inst)?;
                self.inventory(inst, op == GiveInventoryDirect, name, amount);
            }
            Spawn => {
                let [name, x, y, z, tid, angle] = self.pop_n::<6>()?;
                self.spawn(name, [x, y, z], tid, angle)?;
            }
            SpawnDirect => {
                let [name, x, y, z, tid, angle] = self.words::<6>(inst)?;
                self.spawn(name, [x, y, z], tid, angle)?;
            }
            SpawnSpot => {
                let [name, spot, tid, angle] = self.pop_n::<4>()?;
                self.spawn_spot(name, spot, tid, angle)?;
            }
            SpawnSpotDirect => {
                let [name, spot, tid, angle] = self.words::<4>(inst)?;
                self.spawn_spot(name, spot, tid, angle)?;
            }

            BeginPrint => inst.print.clear(),
            PrintString => {
                let s = self.pop_string()?;
                inst.print.push_str(&s);
            }
            PrintLocalized => {
                let key = self.pop_string()?;
                inst.print.push_str(&self.host.localize(&key));
            }
            PrintNumber => {
                let v = self.pop()?;
                inst.print.push_str(&v.to_string());
            }
            PrintCharacter => {
                let v = self.pop()?;
                inst.print.push(char::from_u32(v as u32).unwrap_or('?'));
            }
            PrintFixed => {
                let v = self.pop()?;
                inst.print.push_str(&format_fixed(v));
            }
            PrintName => {
                let n = self.pop()?;
                let name = self.print_name(inst, n);
                inst.print.push_str(&name);
            }
            EndPrint | EndPrintBold => {
                let bold = op == EndPrintBold;
                let target = if bold { None } else { self.player_target(inst) };
                let text = std::mem::take(&mut inst.print);
                self.perform(SideEffect::Print { target, text, bold });
            }
            MoreHudMessage => inst.hud_opt = None,
            OptHudMessage => inst.hud_opt = Some((self.stack.len() - self.base) as u32),
            EndHudMessage | EndHudMessageBold => self.end_hud(inst, op == EndHudMessageBold)?,
            SetFont => {
                let name = self.pop_string()?;
                self.perform(SideEffect::SetFont { name });
            }
            SetFontDirect => {
                let index = self.word(inst)?;
                let name = self.string(index);
                self.perform(SideEffect::SetFont { name });
            }

            SectorSound | AmbientSound | LocalAmbientSound | ActivatorSound => {
                let [name, volume] = self.pop_n::<2>()?;
                let source = match op {
                    SectorSound => SoundSource::Sector(inst.line),
                    AmbientSound => SoundSource::Ambient,
                    LocalAmbientSound => SoundSource::LocalAmbient(self.activator(inst)),
                    _ => SoundSource::Actor(self.activator(inst)),
                };
                let name = self.string(name);
                self.perform(SideEffect::Sound { source, name, volume });
            }
            ThingSound => {
                let [tid, name, volume] = self.pop_n::<3>()?;
                let name = self.string(name);
                self.perform(SideEffect::Sound { source: SoundSource::Thing(tid), name, volume });
            }
            SoundSequence => {
                let name = self.pop_string()?;
                self.perform(SideEffect::SoundSequence { line: inst.line, name });
            }
            MusicChange => {
                let [name, order] = self.pop_n::<2>()?;
                self.music(None, name, order);
            }
            SetMusic | LocalSetMusic => {
                let [name, order, _] = self.pop_n::<3>()?;
                let target = if op == LocalSetMusic { self.player_target(inst) } else { None };
                self.music(target, name, order);
            }
            SetMusicDirect | LocalSetMusicDirect => {
                let [name, order, _] = self.words::<3>(inst)?;
                let target = if op == LocalSetMusicDirect { self.player_target(inst) } else { None };
                self.music(target, name, order);
            }
            FadeTo => {
                let [r, g, b, a, time] = self.pop_n::<5>()?;
                let target = self.player_target(inst);
                self.perform(SideEffect::Fade { target, fade: Fade::To { rgba: [r, g, b, a], time } });
            }
            FadeRange => {
                let [r1, g1, b1, a1, r2, g2, b2, a2, time] = self.pop_n::<9>()?;
                let target = self.player_target(inst);
                self.perform(SideEffect::Fade {
                    target,
                    fade: Fade::Range { from: [r1, g1, b1, a1], to: [r2, g2, b2, a2], time },
                });
            }
            CancelFade => {
                let target = self.player_target(inst);
                self.perform(SideEffect::Fade { target, fade: Fade::Cancel });
            }
        }
        Ok(())
    }

    // ----- operand stack -----

    fn push(&mut self, v: i32) -> Result<(), VmError> {
        self.stack.push(Slot::Value(v))
    }

    fn pop(&mut self) -> Result<i32, VmError> {
        if self.stack.len() <= self.base {
            return Err(VmError::StackUnderflow);
        }
        match self.stack.pop() {
            Some(Slot::Value(v)) => Ok(v),
            Some(Slot::Return(_)) => Err(VmError::BadFrame { slot: self.stack.len() }),
            None => Err(VmError::StackUnderflow),
        }
    }

    fn peek(&self) -> Result<i32, VmError> {
        if self.stack.len() <= self.base {
            return Err(VmError::StackUnderflow);
        }
        self.value_at(self.stack.len() - 1)
    }

    fn value_at(&self, slot: usize) -> Result<i32, VmError> {
        match self.stack.get(slot) {
            Some(Slot::Value(v)) => Ok(*v),
            _ => Err(VmError::BadFrame { slot }),
        }
    }

    /// Pop `N` values, returned in the order they were pushed.
    fn pop_n<const N: usize>(&mut self) -> Result<[i32; N], VmError> {
        let mut out = [0; N];
        for slot in out.iter_mut().rev() {
            *slot = self.pop()?;
        }
        Ok(out)
    }

    fn binop(&mut self, f: impl FnOnce(i32, i32) -> i32) -> Result<(), VmError> {
        let [a, b] = self.pop_n::<2>()?;
        self.push(f(a, b))
    }

    // ----- instruction stream -----

    fn word(&self, inst: &mut ScriptInstance) -> Result<i32, VmError> {
        read_word(self.module.bytes(), &mut inst.pc)
    }

    fn words<const N: usize>(&self, inst: &mut ScriptInstance) -> Result<[i32; N], VmError> {
        let mut out = [0; N];
        for slot in out.iter_mut() {
            *slot = self.word(inst)?;
        }
        Ok(out)
    }

    fn raw(&self, inst: &mut ScriptInstance) -> Result<u8, VmError> {
        read_raw(self.module.bytes(), &mut inst.pc)
    }

    fn index(&self, inst: &mut ScriptInstance) -> Result<u32, VmError> {
        read_index(self.module.bytes(), &mut inst.pc, self.module.encoding())
    }

    fn push_raw(&mut self, inst: &mut ScriptInstance, count: usize) -> Result<(), VmError> {
        for _ in 0..count {
            let v = self.raw(inst)?;
            self.push(v as i32)?;
        }
        Ok(())
    }

    // ----- variables -----

    fn current_function(&self, inst: &ScriptInstance) -> Option<FunctionDescriptor> {
        inst.function.and_then(|i| self.module.function(i)).copied()
    }

    /// Stack slot of script variable `index` in the current function frame.
    fn frame_slot(&self, inst: &ScriptInstance, fp: u32, index: u32) -> Result<Option<usize>, VmError> {
        let func = self.current_function(inst).ok_or(VmError::BadFrame { slot: self.base })?;
        if index as usize >= func.frame_size() {
            return Ok(None);
        }
        Ok(Some(self.base + fp as usize + index as usize))
    }

    fn load_var(&self, inst: &ScriptInstance, scope: Scope, index: u32) -> Result<i32, VmError> {
        let i = index as usize;
        let v = match scope {
            Scope::Script => match inst.frame {
                Frame::Script => inst.locals.get(i).copied(),
                Frame::Stack(fp) => match self.frame_slot(inst, fp, index)? {
                    Some(slot) => Some(self.value_at(slot)?),
                    None => None,
                },
            },
            Scope::Map => self.module.map_var(i),
            Scope::World => self.session.world_var(i),
            Scope::Global => self.session.global_var(i),
        };
        Ok(v.unwrap_or_else(|| {
            log::warn!("script {}: {:?} variable {} out of range", inst.number, scope, index);
            0
        }))
    }

    fn store_var(
        &mut self,
        inst: &mut ScriptInstance,
        scope: Scope,
        index: u32,
        value: i32,
    ) -> Result<(), VmError> {
        let i = index as usize;
        let stored = match scope {
            Scope::Script => match inst.frame {
                Frame::Script => match inst.locals.get_mut(i) {
                    Some(slot) => {
                        *slot = value;
                        true
                    }
                    None => false,
                },
                Frame::Stack(fp) => match self.frame_slot(inst, fp, index)? {
                    Some(slot) => match self.stack.get_mut(slot) {
                        Some(Slot::Value(v)) => {
                            *v = value;
                            true
                        }
                        _ => return Err(VmError::BadFrame { slot }),
                    },
                    None => false,
                },
            },
            Scope::Map => self.module.set_map_var(i, value),
            Scope::World => self.session.set_world_var(i, value),
            Scope::Global => self.session.set_global_var(i, value),
        };
        if !stored {
            log::warn!("script {}: {:?} variable {} out of range", inst.number, scope, index);
        }
        Ok(())
    }

    fn push_var(&mut self, inst: &mut ScriptInstance, scope: Scope) -> Result<(), VmError> {
        let index = self.index(inst)?;
        let v = self.load_var(inst, scope, index)?;
        self.push(v)
    }

    fn var_update(
        &mut self,
        inst: &mut ScriptInstance,
        scope: Scope,
        update: Update,
    ) -> Result<(), VmError> {
        let index = self.index(inst)?;
        let operand = if update.takes_operand() { self.pop()? } else { 1 };
        let current = if update == Update::Assign {
            0
        } else {
            self.load_var(inst, scope, index)?
        };
        if let Some(v) = combine(inst, update, current, operand) {
            self.store_var(inst, scope, index, v)?;
        }
        Ok(())
    }

    fn array_get(&self, scope: ArrayScope, slot: u32, element: i32) -> i32 {
        let slot = slot as usize;
        match scope {
            ArrayScope::Map => self
                .module
                .map_var(slot)
                .map_or(0, |array| self.module.array_value(array, element)),
            ArrayScope::World => self.session.world_array(slot).map_or(0, |a| a.get(element)),
            ArrayScope::Global => self.session.global_array(slot).map_or(0, |a| a.get(element)),
        }
    }

    fn array_set(&mut self, scope: ArrayScope, slot: u32, element: i32, value: i32) {
        let slot = slot as usize;
        match scope {
            ArrayScope::Map => {
                if let Some(array) = self.module.map_var(slot) {
                    self.module.set_array_value(array, element, value);
                }
            }
            ArrayScope::World => {
                if let Some(a) = self.session.world_array_mut(slot) {
                    a.set(element, value);
                }
            }
            ArrayScope::Global => {
                if let Some(a) = self.session.global_array_mut(slot) {
                    a.set(element, value);
                }
            }
        }
    }

    fn push_array(&mut self, inst: &mut ScriptInstance, scope: ArrayScope) -> Result<(), VmError> {
        let slot = self.index(inst)?;
        let element = self.pop()?;
        let v = self.array_get(scope, slot, element);
        self.push(v)
    }

    fn array_update(
        &mut self,
        inst: &mut ScriptInstance,
        scope: ArrayScope,
        update: Update,
    ) -> Result<(), VmError> {
        let slot = self.index(inst)?;
        let operand = if update.takes_operand() { self.pop()? } else { 1 };
        let element = self.pop()?;
        let current = self.array_get(scope, slot, element);
        if let Some(v) = combine(inst, update, current, operand) {
            self.array_set(scope, slot, element, v);
        }
        Ok(())
    }

    // ----- functions -----

    fn call(&mut self, inst: &mut ScriptInstance, discard_result: bool) -> Result<(), VmError> {
        let index = self.index(inst)?;
        let func = *self.module.function(index).ok_or(VmError::FunctionOutOfRange {
            index,
            count: self.module.functions().len(),
        })?;
        if func.import != 0 {
            return Err(VmError::UnresolvedFunction { index });
        }
        let argc = func.arg_count as usize;
        if self.stack.len() - self.base < argc {
            return Err(VmError::StackUnderflow);
        }
        let extra = func.frame_size() - argc;
        if self.stack.free() < extra + 1 {
            return Err(VmError::StackOverflow { capacity: self.stack.capacity() });
        }
        let fp = (self.stack.len() - argc - self.base) as u32;
        for _ in 0..extra {
            self.stack.push(Slot::Value(0))?;
        }
        self.stack.push(Slot::Return(ReturnRecord {
            return_pc: inst.pc,
            caller_frame: inst.frame,
            caller_function: inst.function,
            discard_result,
        }))?;
        inst.frame = Frame::Stack(fp);
        inst.function = Some(index);
        inst.pc = func.entry;
        Ok(())
    }

    fn ret(&mut self, inst: &mut ScriptInstance, value: i32) -> Result<(), VmError> {
        let Frame::Stack(fp) = inst.frame else {
            return Err(VmError::ReturnOutsideFunction);
        };
        let func = self.current_function(inst).ok_or(VmError::ReturnOutsideFunction)?;
        let frame_base = self.base + fp as usize;
        let record_slot = frame_base + func.frame_size();
        let record = match self.stack.get(record_slot) {
            Some(Slot::Return(r)) => *r,
            _ => return Err(VmError::BadFrame { slot: record_slot }),
        };
        self.stack.truncate(frame_base);
        inst.pc = record.return_pc;
        inst.frame = record.caller_frame;
        inst.function = record.caller_function;
        if !record.discard_result {
            self.push(value)?;
        }
        Ok(())
    }

    // ----- collaborators -----

    fn perform(&mut self, effect: SideEffect) -> i32 {
        let result = effect.apply(&mut *self.host);
        self.host.broadcast(&effect);
        result
    }

    /// The activator, if it still exists.
    fn activator(&self, inst: &ScriptInstance) -> Option<ActorHandle> {
        inst.activator.filter(|a| self.host.actor_alive(*a))
    }

    /// The activator when it is a player; `None` addresses everyone.
    fn player_target(&self, inst: &ScriptInstance) -> Option<ActorHandle> {
        self.activator(inst).filter(|a| self.host.player_number(*a).is_some())
    }

    fn string(&self, index: i32) -> String {
        match self.module.lookup_string(index, self.config.locale) {
            Some(s) => s.to_owned(),
            None => {
                log::debug!("string {} not found for locale {}", index, self.config.locale);
                String::new()
            }
        }
    }

    fn pop_string(&mut self) -> Result<String, VmError> {
        let index = self.pop()?;
        Ok(self.string(index))
    }

    fn lspec_stack(&mut self, inst: &mut ScriptInstance, argc: usize, push: bool) -> Result<(), VmError> {
        let special = self.index(inst)? as i32;
        let mut args = [0; 5];
        for slot in args[..argc].iter_mut().rev() {
            *slot = self.pop()?;
        }
        let result = self.special(inst, special, args);
        if push {
            inst.result = result;
            self.push(result)?;
        }
        Ok(())
    }

    fn lspec_direct(&mut self, inst: &mut ScriptInstance, argc: usize, bytes: bool) -> Result<(), VmError> {
        let special = if bytes { self.raw(inst)? as i32 } else { self.index(inst)? as i32 };
        let mut args = [0; 5];
        for slot in args[..argc].iter_mut() {
            *slot = if bytes { self.raw(inst)? as i32 } else { self.word(inst)? };
        }
        self.special(inst, special, args);
        Ok(())
    }

    /// Script-control specials become scheduler requests; everything else goes to the world.
    fn special(&mut self, inst: &ScriptInstance, special: i32, args: [i32; 5]) -> i32 {
        let [script, map, a0, a1, a2] = args;
        let request = match special {
            SPECIAL_EXECUTE | SPECIAL_EXECUTE_ALWAYS => ScriptRequest::Execute {
                map,
                script,
                args: [a0, a1, a2],
                always: special == SPECIAL_EXECUTE_ALWAYS,
                activator: inst.activator,
                line: inst.line,
                side: inst.side,
            },
            SPECIAL_LOCKED_EXECUTE => {
                if !self.host.check_lock(self.activator(inst), a2) {
                    return 0;
                }
                ScriptRequest::Execute {
                    map,
                    script,
                    args: [a0, a1, 0],
                    always: false,
                    activator: inst.activator,
                    line: inst.line,
                    side: inst.side,
                }
            }
            SPECIAL_SUSPEND => ScriptRequest::Suspend { map, script },
            SPECIAL_TERMINATE => ScriptRequest::Terminate { map, script },
            _ => {
                let activator = self.activator(inst);
                return self.perform(SideEffect::LineSpecial {
                    special,
                    args,
                    activator,
                    line: inst.line,
                    side: inst.side,
                });
            }
        };
        self.requests.push(request);
        1
    }

    fn change_flat(&mut self, tag: i32, name: i32, floor: bool) {
        let texture = self.string(name);
        let surface = if floor { Surface::Floor } else { Surface::Ceiling };
        self.perform(SideEffect::ChangeFlat { tag, texture, surface });
    }

    fn inventory(&mut self, inst: &ScriptInstance, give: bool, name: i32, amount: i32) {
        let target = self.activator(inst);
        let item = self.string(name);
        let effect = if give {
            SideEffect::GiveInventory { target, item, amount }
        } else {
            SideEffect::TakeInventory { target, item, amount }
        };
        self.perform(effect);
    }

    fn check_inventory(&mut self, inst: &ScriptInstance, item: &str) -> Result<(), VmError> {
        let v = self
            .activator(inst)
            .map_or(0, |a| self.host.inventory_count(a, item));
        self.push(v)
    }

    fn spawn(&mut self, name: i32, position: [i32; 3], tid: i32, angle: i32) -> Result<(), VmError> {
        let kind = self.string(name);
        let v = self.perform(SideEffect::Spawn { kind, position, tid, angle });
        self.push(v)
    }

    fn spawn_spot(&mut self, name: i32, spot: i32, tid: i32, angle: i32) -> Result<(), VmError> {
        let kind = self.string(name);
        let v = self.perform(SideEffect::SpawnSpot { kind, spot, tid, angle });
        self.push(v)
    }

    fn music(&mut self, target: Option<ActorHandle>, name: i32, order: i32) {
        let name = self.string(name);
        self.perform(SideEffect::Music { target, name, order });
    }

    fn print_name(&self, inst: &ScriptInstance, n: i32) -> String {
        if n <= 0 {
            return self
                .activator(inst)
                .and_then(|a| self.host.actor_name(a))
                .unwrap_or_else(|| "Unknown".to_owned());
        }
        u8::try_from(n - 1)
            .ok()
            .filter(|p| self.host.player_in_game(*p))
            .and_then(|p| self.host.player_name(p))
            .unwrap_or_else(|| format!("Player {}", n))
    }

    fn end_hud(&mut self, inst: &mut ScriptInstance, bold: bool) -> Result<(), VmError> {
        let depth = self.stack.len() - self.base;
        let opt = inst.hud_opt.take().map_or(depth, |d| (d as usize).min(depth));
        if opt < 6 {
            return Err(VmError::StackUnderflow);
        }
        let extra = (opt..depth)
            .map(|i| self.value_at(self.base + i))
            .collect::<Result<Vec<_>, _>>()?;
        self.stack.truncate(self.base + opt);
        let [kind, id, color, x, y, hold] = self.pop_n::<6>()?;
        let target = if bold { None } else { self.player_target(inst) };
        let message = HudMessage {
            text: std::mem::take(&mut inst.print),
            kind,
            id,
            color,
            x,
            y,
            hold,
            extra,
            bold,
        };
        self.perform(SideEffect::HudMessage { target, message });
        Ok(())
    }
}

fn delay(inst: &mut ScriptInstance, ticks: i32) {
    if ticks > 0 {
        inst.state = ScriptState::Delayed(ticks as u32);
    }
}

/// Apply `update`; `None` means the instance faulted and nothing is stored.
fn combine(inst: &mut ScriptInstance, update: Update, current: i32, operand: i32) -> Option<i32> {
    Some(match update {
        Update::Assign => operand,
        Update::Add => current.wrapping_add(operand),
        Update::Sub => current.wrapping_sub(operand),
        Update::Mul => current.wrapping_mul(operand),
        Update::Inc => current.wrapping_add(1),
        Update::Dec => current.wrapping_sub(1),
        Update::Div | Update::Mod if operand == 0 => {
            inst.state = if update == Update::Div {
                ScriptState::DivideBy0
            } else {
                ScriptState::ModulusBy0
            };
            return None;
        }
        Update::Div => current.wrapping_div(operand),
        Update::Mod => current.wrapping_rem(operand),
    })
}

/// Fixed-point angle where 1.0 is a full turn.
fn angle_radians(fixed: i32) -> f64 {
    (fixed & 0xFFFF) as f64 / 65536.0 * TAU
}

fn to_fixed(v: f64) -> i32 {
    (v * 65536.0).round() as i32
}

fn format_fixed(v: i32) -> String {
    let f = v as f64 / 65536.0;
    let s = format!("{:.6}", f);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_owned()
}
