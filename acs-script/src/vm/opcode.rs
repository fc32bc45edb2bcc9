use num_derive::FromPrimitive;

/// Operand kinds following an opcode in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// 32-bit little-endian word.
    Word,
    /// Variable, array, function or special index; a word in wide encoding, a byte in compact.
    Byte,
    /// Single raw byte regardless of encoding.
    Raw,
    /// Raw count byte followed by that many raw bytes.
    RawList,
    /// 4-byte aligned `u32 count` followed by `count` sorted `{i32 value, u32 target}` pairs.
    CaseTable,
}

use Operand::{Byte as B, CaseTable as T, Raw as R, RawList as L, Word as W};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, strum::IntoStaticStr, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[repr(u32)]
pub enum Pcode {
    Nop = 0,
    Terminate = 1,
    Suspend = 2,
    PushNumber = 3,
    LSpec1 = 4,
    LSpec2 = 5,
    LSpec3 = 6,
    LSpec4 = 7,
    LSpec5 = 8,
    LSpec1Direct = 9,
    LSpec2Direct = 10,
    LSpec3Direct = 11,
    LSpec4Direct = 12,
    LSpec5Direct = 13,
    Add = 14,
    Subtract = 15,
    Multiply = 16,
    Divide = 17,
    Modulus = 18,
    Eq = 19,
    Ne = 20,
    Lt = 21,
    Gt = 22,
    Le = 23,
    Ge = 24,
    AssignScriptVar = 25,
    AssignMapVar = 26,
    AssignWorldVar = 27,
    PushScriptVar = 28,
    PushMapVar = 29,
    PushWorldVar = 30,
    AddScriptVar = 31,
    AddMapVar = 32,
    AddWorldVar = 33,
    SubScriptVar = 34,
    SubMapVar = 35,
    SubWorldVar = 36,
    MulScriptVar = 37,
    MulMapVar = 38,
    MulWorldVar = 39,
    DivScriptVar = 40,
    DivMapVar = 41,
    DivWorldVar = 42,
    ModScriptVar = 43,
    ModMapVar = 44,
    ModWorldVar = 45,
    IncScriptVar = 46,
    IncMapVar = 47,
    IncWorldVar = 48,
    DecScriptVar = 49,
    DecMapVar = 50,
    DecWorldVar = 51,
    Goto = 52,
    IfGoto = 53,
    Drop = 54,
    Delay = 55,
    DelayDirect = 56,
    Random = 57,
    RandomDirect = 58,
    ThingCount = 59,
    ThingCountDirect = 60,
    TagWait = 61,
    TagWaitDirect = 62,
    PolyWait = 63,
    PolyWaitDirect = 64,
    ChangeFloor = 65,
    ChangeFloorDirect = 66,
    ChangeCeiling = 67,
    ChangeCeilingDirect = 68,
    Restart = 69,
    AndLogical = 70,
    OrLogical = 71,
    AndBitwise = 72,
    OrBitwise = 73,
    EorBitwise = 74,
    NegateLogical = 75,
    LShift = 76,
    RShift = 77,
    UnaryMinus = 78,
    IfNotGoto = 79,
    LineSide = 80,
    ScriptWait = 81,
    ScriptWaitDirect = 82,
    ClearLineSpecial = 83,
    CaseGoto = 84,
    BeginPrint = 85,
    EndPrint = 86,
    PrintString = 87,
    PrintNumber = 88,
    PrintCharacter = 89,
    PlayerCount = 90,
    GameType = 91,
    GameSkill = 92,
    Timer = 93,
    SectorSound = 94,
    AmbientSound = 95,
    SoundSequence = 96,
    SetLineTexture = 97,
    SetLineBlocking = 98,
    SetLineSpecial = 99,
    ThingSound = 100,
    EndPrintBold = 101,
    ActivatorSound = 102,
    LocalAmbientSound = 103,
    SetLineMonsterBlocking = 104,
    IsNetworkGame = 118,
    PlayerHealth = 120,
    PlayerArmorPoints = 121,
    PlayerFrags = 122,
    PrintName = 131,
    MusicChange = 132,
    SinglePlayer = 135,
    FixedMul = 136,
    FixedDiv = 137,
    SetGravity = 138,
    SetGravityDirect = 139,
    SetAirControl = 140,
    SetAirControlDirect = 141,
    ClearInventory = 142,
    GiveInventory = 143,
    GiveInventoryDirect = 144,
    TakeInventory = 145,
    TakeInventoryDirect = 146,
    CheckInventory = 147,
    CheckInventoryDirect = 148,
    Spawn = 149,
    SpawnDirect = 150,
    SpawnSpot = 151,
    SpawnSpotDirect = 152,
    SetMusic = 153,
    SetMusicDirect = 154,
    LocalSetMusic = 155,
    LocalSetMusicDirect = 156,
    PrintFixed = 157,
    PrintLocalized = 158,
    MoreHudMessage = 159,
    OptHudMessage = 160,
    EndHudMessage = 161,
    EndHudMessageBold = 162,
    SetFont = 165,
    SetFontDirect = 166,
    PushByte = 167,
    LSpec1DirectB = 168,
    LSpec2DirectB = 169,
    LSpec3DirectB = 170,
    LSpec4DirectB = 171,
    LSpec5DirectB = 172,
    DelayDirectB = 173,
    RandomDirectB = 174,
    PushBytes = 175,
    Push2Bytes = 176,
    Push3Bytes = 177,
    Push4Bytes = 178,
    Push5Bytes = 179,
    AssignGlobalVar = 181,
    PushGlobalVar = 182,
    AddGlobalVar = 183,
    SubGlobalVar = 184,
    MulGlobalVar = 185,
    DivGlobalVar = 186,
    ModGlobalVar = 187,
    IncGlobalVar = 188,
    DecGlobalVar = 189,
    FadeTo = 190,
    FadeRange = 191,
    CancelFade = 192,
    GetActorX = 196,
    GetActorY = 197,
    GetActorZ = 198,
    Call = 203,
    CallDiscard = 204,
    ReturnVoid = 205,
    ReturnVal = 206,
    PushMapArray = 207,
    AssignMapArray = 208,
    AddMapArray = 209,
    SubMapArray = 210,
    MulMapArray = 211,
    DivMapArray = 212,
    ModMapArray = 213,
    IncMapArray = 214,
    DecMapArray = 215,
    Dup = 216,
    Swap = 217,
    Sin = 220,
    Cos = 221,
    VectorAngle = 222,
    PushWorldArray = 226,
    AssignWorldArray = 227,
    AddWorldArray = 228,
    SubWorldArray = 229,
    MulWorldArray = 230,
    DivWorldArray = 231,
    ModWorldArray = 232,
    IncWorldArray = 233,
    DecWorldArray = 234,
    PushGlobalArray = 235,
    AssignGlobalArray = 236,
    AddGlobalArray = 237,
    SubGlobalArray = 238,
    MulGlobalArray = 239,
    DivGlobalArray = 240,
    ModGlobalArray = 241,
    IncGlobalArray = 242,
    DecGlobalArray = 243,
    PlayerNumber = 247,
    ActivatorTid = 248,
    StrLen = 253,
    CaseGotoSorted = 256,
    LSpec5Result = 263,
    PlayerInGame = 267,
}

impl Pcode {
    #[inline]
    pub fn from_raw(raw: u32) -> Option<Pcode> {
        num_traits::FromPrimitive::from_u32(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Operand layout that follows the opcode.
    pub fn operands(self) -> &'static [Operand] {
        use Pcode::*;
        match self {
            PushNumber | Goto | IfGoto | IfNotGoto | DelayDirect | TagWaitDirect
            | PolyWaitDirect | ScriptWaitDirect | SetGravityDirect | SetAirControlDirect
            | CheckInventoryDirect | SetFontDirect => &[W],

            RandomDirect | ThingCountDirect | ChangeFloorDirect | ChangeCeilingDirect
            | CaseGoto | GiveInventoryDirect | TakeInventoryDirect => &[W, W],

            SetMusicDirect | LocalSetMusicDirect => &[W, W, W],
            SpawnSpotDirect => &[W, W, W, W],
            SpawnDirect => &[W, W, W, W, W, W],

            LSpec1 | LSpec2 | LSpec3 | LSpec4 | LSpec5 | LSpec5Result | Call | CallDiscard => &[B],

            AssignScriptVar | AssignMapVar | AssignWorldVar | AssignGlobalVar | PushScriptVar
            | PushMapVar | PushWorldVar | PushGlobalVar | AddScriptVar | AddMapVar
            | AddWorldVar | AddGlobalVar | SubScriptVar | SubMapVar | SubWorldVar
            | SubGlobalVar | MulScriptVar | MulMapVar | MulWorldVar | MulGlobalVar
            | DivScriptVar | DivMapVar | DivWorldVar | DivGlobalVar | ModScriptVar
            | ModMapVar | ModWorldVar | ModGlobalVar | IncScriptVar | IncMapVar | IncWorldVar
            | IncGlobalVar | DecScriptVar | DecMapVar | DecWorldVar | DecGlobalVar => &[B],

            PushMapArray | AssignMapArray | AddMapArray | SubMapArray | MulMapArray
            | DivMapArray | ModMapArray | IncMapArray | DecMapArray | PushWorldArray
            | AssignWorldArray | AddWorldArray | SubWorldArray | MulWorldArray
            | DivWorldArray | ModWorldArray | IncWorldArray | DecWorldArray
            | PushGlobalArray | AssignGlobalArray | AddGlobalArray | SubGlobalArray
            | MulGlobalArray | DivGlobalArray | ModGlobalArray | IncGlobalArray
            | DecGlobalArray => &[B],

            LSpec1Direct => &[B, W],
            LSpec2Direct => &[B, W, W],
            LSpec3Direct => &[B, W, W, W],
            LSpec4Direct => &[B, W, W, W, W],
            LSpec5Direct => &[B, W, W, W, W, W],

            PushByte | DelayDirectB => &[R],
            RandomDirectB | Push2Bytes | LSpec1DirectB => &[R, R],
            Push3Bytes | LSpec2DirectB => &[R, R, R],
            Push4Bytes | LSpec3DirectB => &[R, R, R, R],
            Push5Bytes | LSpec4DirectB => &[R, R, R, R, R],
            LSpec5DirectB => &[R, R, R, R, R, R],
            PushBytes => &[L],

            CaseGotoSorted => &[T],

            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn numbering_is_stable() {
        assert_eq!(Pcode::from_raw(3), Some(Pcode::PushNumber));
        assert_eq!(Pcode::from_raw(256), Some(Pcode::CaseGotoSorted));
        assert_eq!(Pcode::from_raw(105), None);
        assert_eq!(Pcode::LSpec5Result.raw(), 263);
    }

    #[test]
    fn mnemonics_are_lowercase_names() {
        assert_eq!(Pcode::PushNumber.mnemonic(), "pushnumber");
        assert_eq!(Pcode::LSpec3DirectB.mnemonic(), "lspec3directb");
    }

    #[test]
    fn every_opcode_roundtrips_through_its_number() {
        for p in Pcode::iter() {
            assert_eq!(Pcode::from_raw(p.raw()), Some(p), "{}", p.mnemonic());
        }
    }
}
