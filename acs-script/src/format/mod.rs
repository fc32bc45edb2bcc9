//! Compiled module images.
//!
//! A module is loaded once per level from a raw blob. Program counters everywhere in this
//! crate are byte offsets into [`Module::bytes`], so they survive a reload of the same blob.

mod builder;
mod error;
mod loader;
pub(crate) mod reader;

pub use builder::{CodeBuilder, Label, ModuleBuilder, ModuleFlavor};
pub use error::LoadError;

use std::sync::Arc;

use acs_nls::{Encoding, LanguageId};
use bitflags::bitflags;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::strings::StringChain;

pub const MAP_VAR_COUNT: usize = 128;

/// How opcodes and byte-sized operands are laid out in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PcodeEncoding {
    /// Opcodes and byte operands are full 32-bit words.
    Wide,
    /// Opcodes are one byte (two above 239) and byte operands are single bytes.
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleFormat {
    /// Plain directory layout.
    Legacy,
    /// Legacy header whose directory is preceded by an `ACSE`/`ACSe` tag and a chunk section.
    LegacyChunked(PcodeEncoding),
    /// `ACSE` / `ACSe` header.
    Enhanced(PcodeEncoding),
}

impl ModuleFormat {
    pub fn encoding(self) -> PcodeEncoding {
        match self {
            ModuleFormat::Legacy => PcodeEncoding::Wide,
            ModuleFormat::LegacyChunked(enc) | ModuleFormat::Enhanced(enc) => enc,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, strum::Display,
)]
#[repr(u16)]
pub enum ScriptType {
    Closed = 0,
    Open = 1,
    Respawn = 2,
    Death = 3,
    Enter = 4,
    Pickup = 5,
    BlueReturn = 6,
    RedReturn = 7,
    WhiteReturn = 8,
    Lightning = 12,
    Unloading = 13,
    Disconnect = 14,
    Return = 15,
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ScriptFlags: u16 {
        const NET = 0x0001;
        const CLIENTSIDE = 0x0002;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDescriptor {
    pub number: i32,
    /// Raw type tag; see [`ScriptDescriptor::kind`].
    pub type_tag: u16,
    pub arg_count: u8,
    /// Byte offset of the first instruction.
    pub entry: u32,
    pub flags: ScriptFlags,
    /// Local slot count declared by an SVCT chunk.
    pub local_count: Option<u16>,
}

impl ScriptDescriptor {
    pub fn kind(&self) -> Option<ScriptType> {
        num_traits::FromPrimitive::from_u16(self.type_tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub arg_count: u8,
    pub local_count: u8,
    pub has_return: bool,
    /// Non-zero for functions imported from another library; those are never resolved here.
    pub import: u8,
    pub entry: u32,
}

impl FunctionDescriptor {
    /// Stack slots between the frame base and the return record. `local_count` counts the
    /// arguments too.
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.arg_count.max(self.local_count) as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub encoding: Encoding,
}

/// Identity of a module image, recorded in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleFingerprint {
    pub len: u32,
    pub sha256: [u8; 32],
}

impl ModuleFingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut sha256 = [0u8; 32];
        sha256.copy_from_slice(&digest);
        Self { len: bytes.len() as u32, sha256 }
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    bytes: Arc<[u8]>,
    format: ModuleFormat,
    /// Sorted by number.
    scripts: Vec<ScriptDescriptor>,
    functions: Vec<FunctionDescriptor>,
    arrays: Vec<Vec<i32>>,
    map_vars: [i32; MAP_VAR_COUNT],
    strings: StringChain,
    fingerprint: ModuleFingerprint,
}

impl Module {
    pub fn load(bytes: &[u8], opts: &LoadOptions) -> Result<Self, LoadError> {
        let parsed = loader::parse(bytes, opts)?;
        let module = Self {
            bytes: Arc::from(bytes),
            format: parsed.format,
            scripts: parsed.scripts,
            functions: parsed.functions,
            arrays: parsed.arrays,
            map_vars: parsed.map_vars,
            strings: parsed.strings,
            fingerprint: ModuleFingerprint::of(bytes),
        };
        log::info!(
            "loaded {:?} module: {} bytes, {} scripts, {} functions, {} arrays, string tables {:?}",
            module.format,
            module.bytes.len(),
            module.scripts.len(),
            module.functions.len(),
            module.arrays.len(),
            module.strings.languages().collect::<Vec<_>>(),
        );
        Ok(module)
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn format(&self) -> ModuleFormat {
        self.format
    }

    #[inline]
    pub fn encoding(&self) -> PcodeEncoding {
        self.format.encoding()
    }

    #[inline]
    pub fn fingerprint(&self) -> ModuleFingerprint {
        self.fingerprint
    }

    pub fn find_script(&self, number: i32) -> Option<&ScriptDescriptor> {
        self.scripts
            .binary_search_by_key(&number, |s| s.number)
            .ok()
            .map(|i| &self.scripts[i])
    }

    pub fn scripts(&self) -> &[ScriptDescriptor] {
        &self.scripts
    }

    pub fn function(&self, index: u32) -> Option<&FunctionDescriptor> {
        self.functions.get(index as usize)
    }

    pub fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    pub fn array_count(&self) -> usize {
        self.arrays.len()
    }

    pub fn array_len(&self, array: i32) -> Option<usize> {
        self.array(array).map(Vec::len)
    }

    fn array(&self, array: i32) -> Option<&Vec<i32>> {
        usize::try_from(array).ok().and_then(|i| self.arrays.get(i))
    }

    /// Element `index` of map array `array`; 0 when either is out of range.
    pub fn array_value(&self, array: i32, index: i32) -> i32 {
        self.array(array)
            .and_then(|a| usize::try_from(index).ok().and_then(|i| a.get(i)))
            .copied()
            .unwrap_or(0)
    }

    /// Out-of-range writes are ignored.
    pub fn set_array_value(&mut self, array: i32, index: i32, value: i32) {
        let (Ok(array), Ok(index)) = (usize::try_from(array), usize::try_from(index)) else {
            return;
        };
        if let Some(slot) = self.arrays.get_mut(array).and_then(|a| a.get_mut(index)) {
            *slot = value;
        }
    }

    pub fn map_var(&self, index: usize) -> Option<i32> {
        self.map_vars.get(index).copied()
    }

    /// Returns false when `index` is outside the map scope.
    pub fn set_map_var(&mut self, index: usize, value: i32) -> bool {
        match self.map_vars.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn map_vars(&self) -> &[i32] {
        &self.map_vars
    }

    pub fn map_arrays(&self) -> &[Vec<i32>] {
        &self.arrays
    }

    /// Replace map-scope state from a snapshot. Array shapes must match the loaded module.
    pub(crate) fn restore_map_state(&mut self, vars: &[i32], arrays: &[Vec<i32>]) -> bool {
        if vars.len() != MAP_VAR_COUNT
            || arrays.len() != self.arrays.len()
            || arrays.iter().zip(&self.arrays).any(|(a, b)| a.len() != b.len())
        {
            return false;
        }
        self.map_vars.copy_from_slice(vars);
        self.arrays.clone_from_slice(arrays);
        true
    }

    pub fn strings(&self) -> &StringChain {
        &self.strings
    }

    pub fn lookup_string(&self, index: i32, locale: LanguageId) -> Option<&str> {
        self.strings.lookup(index, locale)
    }
}
