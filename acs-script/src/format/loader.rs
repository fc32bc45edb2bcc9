use acs_nls::{Decoder, LanguageId};

use super::reader::{u32_at, ByteReader};
use super::{
    FunctionDescriptor, LoadError, LoadOptions, ModuleFormat, PcodeEncoding, ScriptDescriptor,
    ScriptFlags, MAP_VAR_COUNT,
};
use crate::strings::{StringChain, StringTable};

pub(super) struct Parsed {
    pub format: ModuleFormat,
    pub scripts: Vec<ScriptDescriptor>,
    pub functions: Vec<FunctionDescriptor>,
    pub arrays: Vec<Vec<i32>>,
    pub map_vars: [i32; MAP_VAR_COUNT],
    pub strings: StringChain,
}

impl Parsed {
    fn new(format: ModuleFormat) -> Self {
        Self {
            format,
            scripts: Vec::new(),
            functions: Vec::new(),
            arrays: Vec::new(),
            map_vars: [0; MAP_VAR_COUNT],
            strings: StringChain::default(),
        }
    }
}

/// Upper bound on a declared map array length.
const MAX_MAP_ARRAY_LEN: usize = 1 << 20;

struct Chunk<'a> {
    id: [u8; 4],
    payload: &'a [u8],
    /// Absolute offset of the payload.
    offset: usize,
}

pub(super) fn parse(bytes: &[u8], opts: &LoadOptions) -> Result<Parsed, LoadError> {
    if bytes.len() < 8 {
        return Err(LoadError::TooShort { len: bytes.len() });
    }
    if &bytes[0..3] != b"ACS" {
        return Err(LoadError::BadMagic { found: [bytes[0], bytes[1], bytes[2]] });
    }
    let decoder = Decoder::new(opts.encoding);
    let header_word = u32_at(bytes, 4, "header")? as usize;

    let (format, chunk_offset) = match bytes[3] {
        0 => match redesigned_tag(bytes, header_word) {
            Some(enc) => {
                let chunks = u32_at(bytes, header_word - 8, "chunk offset")? as usize;
                (ModuleFormat::LegacyChunked(enc), chunks)
            }
            None => return parse_legacy(bytes, header_word, &decoder),
        },
        b'E' => (ModuleFormat::Enhanced(PcodeEncoding::Wide), header_word),
        b'e' => (ModuleFormat::Enhanced(PcodeEncoding::Compact), header_word),
        tag => return Err(LoadError::BadFormatTag { tag }),
    };

    if chunk_offset > bytes.len() {
        return Err(LoadError::BadOffset { what: "chunk section", offset: chunk_offset });
    }
    let chunks = split_chunks(bytes, chunk_offset)?;
    let mut out = Parsed::new(format);
    let short_records = matches!(format, ModuleFormat::LegacyChunked(_));

    for c in chunks.iter().filter(|c| &c.id == b"SPTR") {
        read_sptr(c, short_records, &mut out.scripts)?;
    }
    for c in chunks.iter().filter(|c| &c.id == b"SFLG") {
        read_script_pairs(
            c,
            |s, flags| s.flags = ScriptFlags::from_bits_truncate(flags),
            &mut out.scripts,
        )?;
    }
    for c in chunks.iter().filter(|c| &c.id == b"SVCT") {
        read_script_pairs(c, |s, count| s.local_count = Some(count), &mut out.scripts)?;
    }
    for c in chunks.iter().filter(|c| &c.id == b"FUNC") {
        read_func(c, &mut out.functions)?;
    }
    for c in chunks.iter().filter(|c| &c.id == b"ARAY") {
        read_aray(c, &mut out)?;
    }
    for c in chunks.iter().filter(|c| &c.id == b"AINI") {
        read_aini(c, &mut out.arrays)?;
    }
    for c in chunks.iter().filter(|c| &c.id == b"MINI") {
        read_mini(c, &mut out.map_vars)?;
    }
    for c in chunks.iter().filter(|c| &c.id == b"STRL") {
        out.strings.insert(read_strl(bytes, c, &decoder)?);
    }

    finish_scripts(&mut out.scripts, bytes.len())?;
    for f in &out.functions {
        if f.import == 0 && f.entry as usize >= bytes.len() {
            return Err(LoadError::BadOffset {
                what: "function entry",
                offset: f.entry as usize,
            });
        }
    }
    Ok(out)
}

/// `ACSE` / `ACSe` immediately before the legacy directory marks the redesigned variant.
fn redesigned_tag(bytes: &[u8], dir: usize) -> Option<PcodeEncoding> {
    if dir < 12 || dir > bytes.len() {
        return None;
    }
    match &bytes[dir - 4..dir] {
        b"ACSE" => Some(PcodeEncoding::Wide),
        b"ACSe" => Some(PcodeEncoding::Compact),
        _ => None,
    }
}

fn parse_legacy(bytes: &[u8], dir: usize, decoder: &Decoder) -> Result<Parsed, LoadError> {
    if dir >= bytes.len() {
        return Err(LoadError::BadOffset { what: "script directory", offset: dir });
    }
    let mut out = Parsed::new(ModuleFormat::Legacy);
    let mut r = ByteReader::new(bytes, dir);

    let count = r.u32("script count")?;
    for _ in 0..count {
        let packed = r.u32("script record")?;
        let arg_count = r.u32("script record")?;
        let entry = r.u32("script record")?;
        out.scripts.push(ScriptDescriptor {
            number: (packed % 1000) as i32,
            type_tag: (packed / 1000) as u16,
            arg_count: arg_count.min(u8::MAX as u32) as u8,
            entry,
            flags: ScriptFlags::empty(),
            local_count: None,
        });
    }

    let string_count = r.u32("string count")?;
    let mut offsets = Vec::with_capacity(string_count.min(4096) as usize);
    for _ in 0..string_count {
        offsets.push(r.u32("string offset")?);
    }
    out.strings
        .insert(StringTable::decode(bytes, 0, &offsets, LanguageId::NEUTRAL, decoder)?);

    finish_scripts(&mut out.scripts, bytes.len())?;
    Ok(out)
}

fn split_chunks(bytes: &[u8], start: usize) -> Result<Vec<Chunk<'_>>, LoadError> {
    let mut chunks = Vec::new();
    let mut r = ByteReader::new(bytes, start);
    while r.remaining() >= 8 {
        let at = r.pos();
        let id = r.tag("chunk id")?;
        let len = r.u32("chunk length")? as usize;
        let offset = r.pos();
        let end = offset
            .checked_add(len)
            .filter(|&e| e <= bytes.len())
            .ok_or_else(|| LoadError::BadChunk {
                id: String::from_utf8_lossy(&id).into_owned(),
                offset: at,
            })?;
        chunks.push(Chunk { id, payload: &bytes[offset..end], offset });
        r = ByteReader::new(bytes, end);
    }
    Ok(chunks)
}

fn read_sptr(
    c: &Chunk<'_>,
    short_records: bool,
    scripts: &mut Vec<ScriptDescriptor>,
) -> Result<(), LoadError> {
    let record = if short_records { 8 } else { 12 };
    let mut r = ByteReader::new(c.payload, 0);
    for _ in 0..c.payload.len() / record {
        let (number, type_tag, arg_count, entry) = if short_records {
            let number = r.u16("SPTR")?;
            let ty = r.u8("SPTR")?;
            let argc = r.u8("SPTR")?;
            (number, ty as u16, argc, r.u32("SPTR")?)
        } else {
            let number = r.u16("SPTR")?;
            let ty = r.u16("SPTR")?;
            let entry = r.u32("SPTR")?;
            let argc = r.u32("SPTR")?;
            (number, ty, argc.min(u8::MAX as u32) as u8, entry)
        };
        scripts.push(ScriptDescriptor {
            // Script numbers are stored as signed 16-bit values.
            number: number as i16 as i32,
            type_tag,
            arg_count,
            entry,
            flags: ScriptFlags::empty(),
            local_count: None,
        });
    }
    Ok(())
}

/// SFLG / SVCT: `{u16 number, u16 value}` records applied to already-known scripts.
fn read_script_pairs(
    c: &Chunk<'_>,
    apply: impl Fn(&mut ScriptDescriptor, u16),
    scripts: &mut [ScriptDescriptor],
) -> Result<(), LoadError> {
    let mut r = ByteReader::new(c.payload, 0);
    for _ in 0..c.payload.len() / 4 {
        let number = r.u16("script pair")? as i16 as i32;
        let value = r.u16("script pair")?;
        match scripts.iter_mut().find(|s| s.number == number) {
            Some(s) => apply(s, value),
            None => log::debug!(
                "{} entry for unknown script {}",
                String::from_utf8_lossy(&c.id),
                number
            ),
        }
    }
    Ok(())
}

fn read_func(c: &Chunk<'_>, functions: &mut Vec<FunctionDescriptor>) -> Result<(), LoadError> {
    let mut r = ByteReader::new(c.payload, 0);
    for _ in 0..c.payload.len() / 8 {
        functions.push(FunctionDescriptor {
            arg_count: r.u8("FUNC")?,
            local_count: r.u8("FUNC")?,
            has_return: r.u8("FUNC")? != 0,
            import: r.u8("FUNC")?,
            entry: r.u32("FUNC")?,
        });
    }
    Ok(())
}

fn read_aray(c: &Chunk<'_>, out: &mut Parsed) -> Result<(), LoadError> {
    let mut r = ByteReader::new(c.payload, 0);
    for _ in 0..c.payload.len() / 8 {
        let var = r.u32("ARAY")? as usize;
        let size = r.u32("ARAY")? as usize;
        if size > MAX_MAP_ARRAY_LEN {
            return Err(LoadError::BadChunk { id: "ARAY".into(), offset: c.offset });
        }
        let index = out.arrays.len() as i32;
        if var < MAP_VAR_COUNT {
            out.map_vars[var] = index;
        } else {
            log::warn!("array {} bound to map variable {} outside the map scope", index, var);
        }
        out.arrays.push(vec![0; size]);
    }
    Ok(())
}

fn read_aini(c: &Chunk<'_>, arrays: &mut [Vec<i32>]) -> Result<(), LoadError> {
    let mut r = ByteReader::new(c.payload, 0);
    let index = r.u32("AINI")? as usize;
    let Some(array) = arrays.get_mut(index) else {
        log::warn!("AINI for undeclared array {}", index);
        return Ok(());
    };
    let count = (r.remaining() / 4).min(array.len());
    for slot in array.iter_mut().take(count) {
        *slot = r.i32("AINI")?;
    }
    Ok(())
}

fn read_mini(c: &Chunk<'_>, vars: &mut [i32; MAP_VAR_COUNT]) -> Result<(), LoadError> {
    let mut r = ByteReader::new(c.payload, 0);
    let first = r.u32("MINI")? as usize;
    let count = r.remaining() / 4;
    for i in first..first.saturating_add(count) {
        let value = r.i32("MINI")?;
        if let Some(slot) = vars.get_mut(i) {
            *slot = value;
        }
    }
    Ok(())
}

fn read_strl(bytes: &[u8], c: &Chunk<'_>, decoder: &Decoder) -> Result<StringTable, LoadError> {
    let mut r = ByteReader::new(c.payload, 0);
    let language = LanguageId::from_word(r.u32("STRL")?);
    let count = r.u32("STRL")? as usize;
    let _reserved = r.u32("STRL")?;
    if count > r.remaining() / 4 {
        return Err(LoadError::Truncated { what: "STRL offsets", offset: c.offset + r.pos() });
    }
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(r.u32("STRL")?);
    }
    // Offsets are relative to the payload start.
    StringTable::decode(bytes, c.offset, &offsets, language, decoder)
}

/// Sort by number, drop duplicate numbers and validate entry points.
fn finish_scripts(scripts: &mut Vec<ScriptDescriptor>, len: usize) -> Result<(), LoadError> {
    for s in scripts.iter() {
        if s.entry as usize >= len {
            return Err(LoadError::BadOffset { what: "script entry", offset: s.entry as usize });
        }
    }
    scripts.sort_by_key(|s| s.number);
    let before = scripts.len();
    scripts.dedup_by_key(|s| s.number);
    if scripts.len() != before {
        log::warn!("{} duplicate script numbers dropped", before - scripts.len());
    }
    Ok(())
}
