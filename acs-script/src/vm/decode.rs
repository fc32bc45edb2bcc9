use byteorder::{ByteOrder, LittleEndian};

use super::opcode::{Operand, Pcode};
use super::VmError;
use crate::format::PcodeEncoding;

#[inline]
fn byte_at(bytes: &[u8], pc: u32) -> Result<u8, VmError> {
    bytes
        .get(pc as usize)
        .copied()
        .ok_or(VmError::PcOutOfRange { pc, len: bytes.len() as u32 })
}

pub(crate) fn read_word(bytes: &[u8], pc: &mut u32) -> Result<i32, VmError> {
    let start = *pc as usize;
    let raw = start
        .checked_add(4)
        .and_then(|end| bytes.get(start..end))
        .ok_or(VmError::PcOutOfRange { pc: *pc, len: bytes.len() as u32 })?;
    *pc += 4;
    Ok(LittleEndian::read_i32(raw))
}

pub(crate) fn read_raw(bytes: &[u8], pc: &mut u32) -> Result<u8, VmError> {
    let b = byte_at(bytes, *pc)?;
    *pc += 1;
    Ok(b)
}

/// Index operand: a word in wide encoding, one byte in compact.
pub(crate) fn read_index(bytes: &[u8], pc: &mut u32, enc: PcodeEncoding) -> Result<u32, VmError> {
    match enc {
        PcodeEncoding::Wide => read_word(bytes, pc).map(|w| w as u32),
        PcodeEncoding::Compact => read_raw(bytes, pc).map(u32::from),
    }
}

pub(crate) fn read_opcode(bytes: &[u8], pc: &mut u32, enc: PcodeEncoding) -> Result<u32, VmError> {
    match enc {
        PcodeEncoding::Wide => read_word(bytes, pc).map(|w| w as u32),
        PcodeEncoding::Compact => {
            let b0 = read_raw(bytes, pc)? as u32;
            if b0 < 240 {
                Ok(b0)
            } else {
                let b1 = read_raw(bytes, pc)? as u32;
                Ok(240 + ((b0 - 240) << 8) + b1)
            }
        }
    }
}

#[inline]
pub(crate) fn align4(pc: u32) -> u32 {
    (pc + 3) & !3
}

/// Case table of CASEGOTOSORTED starting at `pc` (already past the opcode). Returns the
/// table base and entry count; entries follow at `base + 4`.
pub(crate) fn case_table(bytes: &[u8], pc: u32) -> Result<(u32, u32), VmError> {
    let base = align4(pc);
    let mut at = base;
    let count = read_word(bytes, &mut at)? as u32;
    let end = (at as u64) + (count as u64) * 8;
    if end > bytes.len() as u64 {
        return Err(VmError::PcOutOfRange { pc: base, len: bytes.len() as u32 });
    }
    Ok((base, count))
}

/// Binary search a CASEGOTOSORTED table for `value`. Returns the jump target if present.
pub(crate) fn sorted_case_target(
    bytes: &[u8],
    base: u32,
    count: u32,
    value: i32,
) -> Result<Option<u32>, VmError> {
    let (mut lo, mut hi) = (0u32, count);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let mut at = base + 4 + mid * 8;
        let key = read_word(bytes, &mut at)?;
        match key.cmp(&value) {
            std::cmp::Ordering::Equal => return Ok(Some(read_word(bytes, &mut at)? as u32)),
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    Ok(None)
}

/// One decoded instruction, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: u32,
    pub raw: u32,
    pub pcode: Option<Pcode>,
    /// Operand values in stream order. A case table yields `count` then `value, target` pairs.
    pub operands: Vec<i32>,
    pub next: u32,
}

impl Instruction {
    pub fn mnemonic(&self) -> String {
        match self.pcode {
            Some(p) => p.mnemonic().to_string(),
            None => format!("unknown_{}", self.raw),
        }
    }

    /// Whether control never falls through to `next`.
    pub fn ends_block(&self) -> bool {
        matches!(
            self.pcode,
            Some(
                Pcode::Terminate
                    | Pcode::Restart
                    | Pcode::Goto
                    | Pcode::ReturnVoid
                    | Pcode::ReturnVal
            )
        )
    }
}

pub fn decode_at(bytes: &[u8], offset: u32, enc: PcodeEncoding) -> Result<Instruction, VmError> {
    let mut pc = offset;
    let raw = read_opcode(bytes, &mut pc, enc)?;
    let pcode = Pcode::from_raw(raw);
    let mut operands = Vec::new();
    for op in pcode.map(Pcode::operands).unwrap_or(&[]) {
        match op {
            Operand::Word => operands.push(read_word(bytes, &mut pc)?),
            Operand::Byte => operands.push(read_index(bytes, &mut pc, enc)? as i32),
            Operand::Raw => operands.push(read_raw(bytes, &mut pc)? as i32),
            Operand::RawList => {
                let n = read_raw(bytes, &mut pc)?;
                operands.push(n as i32);
                for _ in 0..n {
                    operands.push(read_raw(bytes, &mut pc)? as i32);
                }
            }
            Operand::CaseTable => {
                let (base, count) = case_table(bytes, pc)?;
                pc = base + 4;
                operands.push(count as i32);
                for _ in 0..count * 2 {
                    operands.push(read_word(bytes, &mut pc)?);
                }
            }
        }
    }
    Ok(Instruction { offset, raw, pcode, operands, next: pc })
}
