/// Reasons a module image is rejected. A rejected module never yields a partially usable
/// [`Module`](super::Module).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("module too short: {len} bytes")]
    TooShort { len: usize },

    #[error("bad magic: {found:02X?}")]
    BadMagic { found: [u8; 3] },

    #[error("unknown format tag 0x{tag:02X}")]
    BadFormatTag { tag: u8 },

    #[error("truncated {what} at offset 0x{offset:X}")]
    Truncated { what: &'static str, offset: usize },

    #[error("chunk {id:?} at offset 0x{offset:X} runs past the end of the module")]
    BadChunk { id: String, offset: usize },

    #[error("{what} offset 0x{offset:X} is outside the module")]
    BadOffset { what: &'static str, offset: usize },
}
