//! Assembles module images in memory: test fixtures and tooling output.

use acs_nls::{Decoder, Encoding, LanguageId};

use super::{PcodeEncoding, ScriptFlags, ScriptType};
use crate::vm::Pcode;

/// Header is `ACS`, a format tag and one offset word; code starts right after it.
const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFlavor {
    /// Directory-only layout. Functions, arrays, flags and localized strings are not
    /// representable and are left out.
    Legacy,
    LegacyChunked(PcodeEncoding),
    Enhanced(PcodeEncoding),
}

impl ModuleFlavor {
    fn encoding(self) -> PcodeEncoding {
        match self {
            ModuleFlavor::Legacy => PcodeEncoding::Wide,
            ModuleFlavor::LegacyChunked(enc) | ModuleFlavor::Enhanced(enc) => enc,
        }
    }
}

/// Forward-referencable code position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

struct ScriptEntry {
    number: i32,
    kind: u16,
    argc: u8,
    entry: u32,
    flags: ScriptFlags,
    locals: Option<u16>,
}

struct FunctionEntry {
    argc: u8,
    locals: u8,
    has_return: bool,
    import: bool,
    entry: u32,
}

struct ArrayEntry {
    var: u32,
    size: u32,
    init: Vec<i32>,
}

pub struct ModuleBuilder {
    flavor: ModuleFlavor,
    decoder: Decoder,
    code: Vec<u8>,
    scripts: Vec<ScriptEntry>,
    functions: Vec<FunctionEntry>,
    arrays: Vec<ArrayEntry>,
    map_inits: Vec<(u32, Vec<i32>)>,
    /// Language-neutral table first, then localized tables in insertion order.
    strings: Vec<(LanguageId, Vec<String>)>,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
}

fn put_u8(value: u8, buffer: &mut Vec<u8>) {
    buffer.push(value);
}

fn put_u16_le(value: u16, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

fn put_u32_le(value: u32, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

fn put_chunk(id: &[u8; 4], payload: &[u8], buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(id);
    put_u32_le(payload.len() as u32, buffer);
    buffer.extend_from_slice(payload);
}

impl ModuleBuilder {
    pub fn new(flavor: ModuleFlavor) -> Self {
        Self {
            flavor,
            decoder: Decoder::new(Encoding::default()),
            code: vec![0; HEADER_LEN],
            scripts: Vec::new(),
            functions: Vec::new(),
            arrays: Vec::new(),
            map_inits: Vec::new(),
            strings: vec![(LanguageId::NEUTRAL, Vec::new())],
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.decoder = Decoder::new(encoding);
        self
    }

    pub fn flavor(&self) -> ModuleFlavor {
        self.flavor
    }

    /// Add a language-neutral string and return its index.
    pub fn string(&mut self, text: &str) -> i32 {
        let neutral = &mut self.strings[0].1;
        neutral.push(text.to_owned());
        (neutral.len() - 1) as i32
    }

    /// Replace the table for `language`. Index `i` of `texts` overrides neutral string `i`.
    pub fn localized_strings(&mut self, language: LanguageId, texts: &[&str]) {
        let texts = texts.iter().map(|s| s.to_string()).collect();
        match self.strings.iter_mut().find(|(id, _)| *id == language) {
            Some(table) => table.1 = texts,
            None => self.strings.push((language, texts)),
        }
    }

    /// Start a script body at the current end of the code.
    pub fn script(&mut self, number: i32, kind: ScriptType, argc: u8) -> CodeBuilder<'_> {
        self.script_tagged(number, kind as u16, argc)
    }

    /// Like [`ModuleBuilder::script`] with a raw type tag.
    pub fn script_tagged(&mut self, number: i32, kind: u16, argc: u8) -> CodeBuilder<'_> {
        let entry = self.code.len() as u32;
        self.scripts.push(ScriptEntry {
            number,
            kind,
            argc,
            entry,
            flags: ScriptFlags::empty(),
            locals: None,
        });
        CodeBuilder { module: self }
    }

    pub fn script_flags(&mut self, number: i32, flags: ScriptFlags) {
        if let Some(s) = self.scripts.iter_mut().find(|s| s.number == number) {
            s.flags = flags;
        }
    }

    pub fn script_locals(&mut self, number: i32, count: u16) {
        if let Some(s) = self.scripts.iter_mut().find(|s| s.number == number) {
            s.locals = Some(count);
        }
    }

    /// Reserve a function slot so calls can reference it before its body exists.
    pub fn declare_function(&mut self, argc: u8, locals: u8, has_return: bool) -> u32 {
        self.functions.push(FunctionEntry { argc, locals, has_return, import: false, entry: 0 });
        (self.functions.len() - 1) as u32
    }

    /// A function provided by another module; calling it cannot be resolved.
    pub fn import_function(&mut self, argc: u8, has_return: bool) -> u32 {
        self.functions.push(FunctionEntry { argc, locals: 0, has_return, import: true, entry: 0 });
        (self.functions.len() - 1) as u32
    }

    /// Start the body of a declared function at the current end of the code.
    pub fn define_function(&mut self, index: u32) -> CodeBuilder<'_> {
        let entry = self.code.len() as u32;
        if let Some(f) = self.functions.get_mut(index as usize) {
            f.entry = entry;
        }
        CodeBuilder { module: self }
    }

    /// Declare a map array of `size` elements bound to map variable `var`. Returns the
    /// array index.
    pub fn map_array(&mut self, var: u32, init: &[i32], size: u32) -> u32 {
        self.arrays.push(ArrayEntry { var, size, init: init.to_vec() });
        (self.arrays.len() - 1) as u32
    }

    pub fn map_var_init(&mut self, first: u32, values: &[i32]) {
        self.map_inits.push((first, values.to_vec()));
    }

    fn resolve_labels(&mut self) {
        for &(at, label) in &self.fixups {
            let target = self.labels[label.0].unwrap_or_else(|| {
                log::warn!("label {} was never bound", label.0);
                0
            });
            self.code[at..at + 4].copy_from_slice(&target.to_le_bytes());
        }
    }

    pub fn build(mut self) -> Vec<u8> {
        self.resolve_labels();
        match self.flavor {
            ModuleFlavor::Legacy => self.build_legacy(),
            ModuleFlavor::LegacyChunked(enc) => self.build_legacy_chunked(enc),
            ModuleFlavor::Enhanced(enc) => self.build_enhanced(enc),
        }
    }

    fn build_legacy(self) -> Vec<u8> {
        let mut out = self.code;
        out[0..4].copy_from_slice(b"ACS\0");

        let mut offsets = Vec::new();
        for text in &self.strings[0].1 {
            offsets.push(out.len() as u32);
            out.extend_from_slice(&self.decoder.encode(text));
            put_u8(0, &mut out);
        }

        let dir = out.len() as u32;
        put_u32_le(self.scripts.len() as u32, &mut out);
        for s in &self.scripts {
            put_u32_le(s.kind as u32 * 1000 + s.number as u32, &mut out);
            put_u32_le(s.argc as u32, &mut out);
            put_u32_le(s.entry, &mut out);
        }
        put_u32_le(offsets.len() as u32, &mut out);
        for o in offsets {
            put_u32_le(o, &mut out);
        }
        out[4..8].copy_from_slice(&dir.to_le_bytes());
        out
    }

    fn build_legacy_chunked(self, enc: PcodeEncoding) -> Vec<u8> {
        let mut out = self.code.clone();
        out[0..4].copy_from_slice(b"ACS\0");

        // Chunk offset word and tag, then an empty legacy directory, then the chunks.
        let chunks_at = out.len() as u32 + 16;
        put_u32_le(chunks_at, &mut out);
        out.extend_from_slice(match enc {
            PcodeEncoding::Wide => b"ACSE",
            PcodeEncoding::Compact => b"ACSe",
        });
        let dir = out.len() as u32;
        put_u32_le(0, &mut out);
        put_u32_le(0, &mut out);
        out[4..8].copy_from_slice(&dir.to_le_bytes());

        self.put_chunks(true, &mut out);
        out
    }

    fn build_enhanced(self, enc: PcodeEncoding) -> Vec<u8> {
        let mut out = self.code.clone();
        out[0..4].copy_from_slice(match enc {
            PcodeEncoding::Wide => b"ACSE",
            PcodeEncoding::Compact => b"ACSe",
        });
        let chunks_at = out.len() as u32;
        out[4..8].copy_from_slice(&chunks_at.to_le_bytes());
        self.put_chunks(false, &mut out);
        out
    }

    fn put_chunks(&self, short_records: bool, out: &mut Vec<u8>) {
        let mut sptr = Vec::new();
        for s in &self.scripts {
            put_u16_le(s.number as i16 as u16, &mut sptr);
            if short_records {
                put_u8(s.kind as u8, &mut sptr);
                put_u8(s.argc, &mut sptr);
                put_u32_le(s.entry, &mut sptr);
            } else {
                put_u16_le(s.kind, &mut sptr);
                put_u32_le(s.entry, &mut sptr);
                put_u32_le(s.argc as u32, &mut sptr);
            }
        }
        put_chunk(b"SPTR", &sptr, out);

        let mut sflg = Vec::new();
        let mut svct = Vec::new();
        for s in &self.scripts {
            if !s.flags.is_empty() {
                put_u16_le(s.number as i16 as u16, &mut sflg);
                put_u16_le(s.flags.bits(), &mut sflg);
            }
            if let Some(count) = s.locals {
                put_u16_le(s.number as i16 as u16, &mut svct);
                put_u16_le(count, &mut svct);
            }
        }
        if !sflg.is_empty() {
            put_chunk(b"SFLG", &sflg, out);
        }
        if !svct.is_empty() {
            put_chunk(b"SVCT", &svct, out);
        }

        if !self.functions.is_empty() {
            let mut func = Vec::new();
            for f in &self.functions {
                put_u8(f.argc, &mut func);
                put_u8(f.locals, &mut func);
                put_u8(f.has_return as u8, &mut func);
                put_u8(f.import as u8, &mut func);
                put_u32_le(f.entry, &mut func);
            }
            put_chunk(b"FUNC", &func, out);
        }

        if !self.arrays.is_empty() {
            let mut aray = Vec::new();
            for a in &self.arrays {
                put_u32_le(a.var, &mut aray);
                put_u32_le(a.size, &mut aray);
            }
            put_chunk(b"ARAY", &aray, out);
            for (index, a) in self.arrays.iter().enumerate().filter(|(_, a)| !a.init.is_empty()) {
                let mut aini = Vec::new();
                put_u32_le(index as u32, &mut aini);
                for &v in &a.init {
                    put_u32_le(v as u32, &mut aini);
                }
                put_chunk(b"AINI", &aini, out);
            }
        }

        for (first, values) in &self.map_inits {
            let mut mini = Vec::new();
            put_u32_le(*first, &mut mini);
            for &v in values {
                put_u32_le(v as u32, &mut mini);
            }
            put_chunk(b"MINI", &mini, out);
        }

        for (language, texts) in &self.strings {
            if texts.is_empty() {
                continue;
            }
            let mut strl = Vec::new();
            put_u32_le(language.to_word(), &mut strl);
            put_u32_le(texts.len() as u32, &mut strl);
            put_u32_le(0, &mut strl);
            let mut at = 12 + 4 * texts.len() as u32;
            let encoded: Vec<_> = texts.iter().map(|t| self.decoder.encode(t)).collect();
            for e in &encoded {
                put_u32_le(at, &mut strl);
                at += e.len() as u32 + 1;
            }
            for e in &encoded {
                strl.extend_from_slice(e);
                put_u8(0, &mut strl);
            }
            put_chunk(b"STRL", &strl, out);
        }
    }
}

/// Appends instructions to the module code.
pub struct CodeBuilder<'a> {
    module: &'a mut ModuleBuilder,
}

impl CodeBuilder<'_> {
    fn encoding(&self) -> PcodeEncoding {
        self.module.flavor.encoding()
    }

    /// Absolute offset of the next byte.
    pub fn here(&self) -> u32 {
        self.module.code.len() as u32
    }

    pub fn op(&mut self, pcode: Pcode) -> &mut Self {
        self.opcode(pcode.raw())
    }

    /// Any opcode number, including ones the interpreter does not know.
    pub fn opcode(&mut self, raw: u32) -> &mut Self {
        match self.encoding() {
            PcodeEncoding::Wide => put_u32_le(raw, &mut self.module.code),
            PcodeEncoding::Compact if raw < 240 => put_u8(raw as u8, &mut self.module.code),
            PcodeEncoding::Compact => {
                let rest = raw - 240;
                put_u8((240 + (rest >> 8)) as u8, &mut self.module.code);
                put_u8((rest & 0xFF) as u8, &mut self.module.code);
            }
        }
        self
    }

    pub fn word(&mut self, value: i32) -> &mut Self {
        put_u32_le(value as u32, &mut self.module.code);
        self
    }

    /// Raw byte operand.
    pub fn byte(&mut self, value: u8) -> &mut Self {
        put_u8(value, &mut self.module.code);
        self
    }

    /// Index operand: a word in wide encoding, a byte in compact.
    pub fn index(&mut self, value: u32) -> &mut Self {
        match self.encoding() {
            PcodeEncoding::Wide => put_u32_le(value, &mut self.module.code),
            PcodeEncoding::Compact => put_u8(value as u8, &mut self.module.code),
        }
        self
    }

    /// `PUSHNUMBER value`.
    pub fn push(&mut self, value: i32) -> &mut Self {
        self.op(Pcode::PushNumber).word(value)
    }

    /// Opcode with one index operand, e.g. `ASSIGNSCRIPTVAR 2` or `CALL 0`.
    pub fn op_index(&mut self, pcode: Pcode, index: u32) -> &mut Self {
        self.op(pcode).index(index)
    }

    pub fn label(&mut self) -> Label {
        self.module.labels.push(None);
        Label(self.module.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) -> &mut Self {
        let here = self.here();
        self.module.labels[label.0] = Some(here);
        self
    }

    /// Address word resolved when the module is built.
    pub fn target(&mut self, label: Label) -> &mut Self {
        let at = self.module.code.len();
        self.module.fixups.push((at, label));
        self.word(0)
    }

    /// Jump opcode followed by its target, e.g. `GOTO l`.
    pub fn jump(&mut self, pcode: Pcode, label: Label) -> &mut Self {
        self.op(pcode).target(label)
    }

    pub fn align4(&mut self) -> &mut Self {
        while self.module.code.len() % 4 != 0 {
            put_u8(0, &mut self.module.code);
        }
        self
    }

    /// `CASEGOTOSORTED` with its aligned table. Cases are sorted here.
    pub fn case_sorted(&mut self, cases: &[(i32, Label)]) -> &mut Self {
        let mut cases = cases.to_vec();
        cases.sort_by_key(|&(value, _)| value);
        self.op(Pcode::CaseGotoSorted).align4().word(cases.len() as i32);
        for (value, label) in cases {
            self.word(value).target(label);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{LoadOptions, Module};
    use crate::vm::decode_at;

    #[test]
    fn labels_resolve_to_absolute_offsets() {
        let mut b = ModuleBuilder::new(ModuleFlavor::Enhanced(PcodeEncoding::Compact));
        let mut code = b.script(1, ScriptType::Closed, 0);
        let end = code.label();
        code.jump(Pcode::Goto, end).op(Pcode::Nop);
        code.bind(end).op(Pcode::Terminate);
        let m = Module::load(&b.build(), &LoadOptions::default()).unwrap();
        let goto = decode_at(m.bytes(), m.find_script(1).unwrap().entry, PcodeEncoding::Compact)
            .unwrap();
        assert_eq!(goto.operands, vec![goto.next as i32 + 1]);
    }

    #[test]
    fn extended_opcodes_take_two_bytes_in_compact() {
        let mut b = ModuleBuilder::new(ModuleFlavor::Enhanced(PcodeEncoding::Compact));
        let start = {
            let mut code = b.script(1, ScriptType::Closed, 0);
            let start = code.here();
            code.opcode(Pcode::PlayerInGame.raw());
            assert_eq!(code.here(), start + 2);
            start
        };
        let bytes = b.build();
        assert_eq!(&bytes[start as usize..start as usize + 2], &[240, 27]);
    }
}
