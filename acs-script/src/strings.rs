//! Per-language string tables and locale fallback.

use acs_nls::{LanguageId, TextDecoder};

use crate::format::LoadError;

/// One decoded string table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    language: LanguageId,
    strings: Vec<String>,
}

impl StringTable {
    pub fn new(language: LanguageId, strings: Vec<String>) -> Self {
        Self { language, strings }
    }

    /// Decode `offsets.len()` NUL-terminated strings, each at `base + offset` in `bytes`.
    pub(crate) fn decode(
        bytes: &[u8],
        base: usize,
        offsets: &[u32],
        language: LanguageId,
        decoder: &dyn TextDecoder,
    ) -> Result<Self, LoadError> {
        let mut strings = Vec::with_capacity(offsets.len());
        for &off in offsets {
            let start = base
                .checked_add(off as usize)
                .filter(|&s| s < bytes.len())
                .ok_or(LoadError::BadOffset {
                    what: "string",
                    offset: base.saturating_add(off as usize),
                })?;
            strings.push(decoder.decode_cstr(&bytes[start..]).into_owned());
        }
        Ok(Self { language, strings })
    }

    #[inline]
    pub fn language(&self) -> LanguageId {
        self.language
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn get(&self, index: i32) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.strings.get(i))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }
}

/// All string tables of a module, keyed by language.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringChain {
    tables: Vec<StringTable>,
}

impl StringChain {
    /// Add a table. A second table for a language already present is ignored.
    pub fn insert(&mut self, table: StringTable) {
        if self.table(table.language).is_some() {
            log::warn!(
                "duplicate string table for language {}; keeping the first",
                table.language
            );
            return;
        }
        self.tables.push(table);
    }

    pub fn table(&self, language: LanguageId) -> Option<&StringTable> {
        self.tables.iter().find(|t| t.language == language)
    }

    pub fn languages(&self) -> impl Iterator<Item = LanguageId> + '_ {
        self.tables.iter().map(|t| t.language)
    }

    /// Resolve `index` for `locale`, trying the locale's table, then English, then the
    /// language-neutral table. Each table is consulted only if it exists and `index` is in
    /// range for it.
    pub fn lookup(&self, index: i32, locale: LanguageId) -> Option<&str> {
        LanguageId::fallback_chain(locale)
            .into_iter()
            .filter_map(|lang| self.table(lang))
            .find_map(|t| t.get(index))
    }
}
