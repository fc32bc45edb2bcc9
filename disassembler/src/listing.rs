use acs_script::vm::{decode_at, Instruction, Pcode};
use acs_script::{Module, ModuleFormat};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    Script,
    Function,
}

/// One script or function body in address order.
#[derive(Debug, Serialize, Deserialize)]
pub struct Body {
    pub kind: BodyKind,
    /// Script number or function index.
    pub id: i32,
    pub address: u32,
    pub args_count: u8,
    pub insts: Vec<Inst>,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inst {
    pub address: u32,
    pub mnemonic: String,
    pub operands: Vec<String>,
}

impl Inst {
    pub fn from_instruction(inst: &Instruction) -> Self {
        let Some(pcode) = inst.pcode else {
            return Self { address: inst.offset, mnemonic: inst.mnemonic(), operands: Vec::new() };
        };
        let ops = &inst.operands;
        let operands = match pcode {
            Pcode::Goto | Pcode::IfGoto | Pcode::IfNotGoto => vec![address(ops[0])],
            Pcode::CaseGoto => vec![ops[0].to_string(), address(ops[1])],
            Pcode::CaseGotoSorted => ops[1..]
                .chunks(2)
                .map(|pair| format!("{}:{}", pair[0], address(pair[1])))
                .collect(),
            Pcode::Call | Pcode::CallDiscard => vec![format!("fn{}", ops[0])],
            _ => ops.iter().map(i32::to_string).collect(),
        };
        Self { address: inst.offset, mnemonic: inst.mnemonic(), operands }
    }
}

impl std::fmt::Display for Inst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06X}  {}", self.address, self.mnemonic)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands.join(", "))?;
        }
        Ok(())
    }
}

fn address(target: i32) -> String {
    format!("0x{:X}", target as u32)
}

/// First byte past the code area, derived from the header word.
fn code_end(module: &Module) -> u32 {
    let bytes = module.bytes();
    let word = bytes
        .get(4..8)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .unwrap_or(0);
    let end = match module.format() {
        // Chunk offset word and tag sit right before the directory.
        ModuleFormat::LegacyChunked(_) => word.saturating_sub(8),
        ModuleFormat::Legacy | ModuleFormat::Enhanced(_) => word,
    };
    end.min(bytes.len() as u32)
}

pub struct Disassembler<'a> {
    module: &'a Module,
}

impl<'a> Disassembler<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self { module }
    }

    fn starts(&self) -> Vec<(BodyKind, i32, u32, u8)> {
        let scripts = self
            .module
            .scripts()
            .iter()
            .map(|s| (BodyKind::Script, s.number, s.entry, s.arg_count));
        let functions = self
            .module
            .functions()
            .iter()
            .enumerate()
            .filter(|(_, f)| f.import == 0)
            .map(|(i, f)| (BodyKind::Function, i as i32, f.entry, f.arg_count));
        let mut starts: Vec<_> = scripts.chain(functions).collect();
        starts.sort_by_key(|&(_, _, entry, _)| entry);
        starts
    }

    /// Decode every body. A body runs up to the next entry point; the last one stops at
    /// its first unconditional exit, since legacy modules keep string data after the code.
    pub fn disassemble(&self) -> Vec<Body> {
        let bytes = self.module.bytes();
        let enc = self.module.encoding();
        let end = code_end(self.module);
        let starts = self.starts();

        let mut bodies = Vec::with_capacity(starts.len());
        for &(kind, id, entry, args_count) in &starts {
            let next = starts.iter().map(|s| s.2).find(|&e| e > entry);
            let limit = next.unwrap_or(end);
            let mut insts = Vec::new();
            let mut pc = entry;
            while pc < limit {
                match decode_at(bytes, pc, enc) {
                    Ok(inst) => {
                        insts.push(Inst::from_instruction(&inst));
                        pc = inst.next;
                        if next.is_none() && inst.ends_block() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("{:?} {}: stopped at 0x{:X}: {}", kind, id, pc, e);
                        break;
                    }
                }
            }
            bodies.push(Body { kind, id, address: entry, args_count, insts });
        }
        bodies
    }

    /// Disassembly of one script, or `None` if the module has no such script.
    pub fn script(&self, number: i32) -> Option<Body> {
        self.disassemble()
            .into_iter()
            .find(|b| b.kind == BodyKind::Script && b.id == number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acs_script::format::{ModuleBuilder, ModuleFlavor};
    use acs_script::{LoadOptions, PcodeEncoding, ScriptType};
    use pretty_assertions::assert_eq;

    fn mnemonics(body: &Body) -> Vec<&str> {
        body.insts.iter().map(|i| i.mnemonic.as_str()).collect()
    }

    #[test]
    fn bodies_split_at_entry_points() {
        let mut b = ModuleBuilder::new(ModuleFlavor::Enhanced(PcodeEncoding::Compact));
        let f = b.declare_function(1, 1, true);
        b.script(2, ScriptType::Open, 0)
            .push(4)
            .op_index(Pcode::Call, f)
            .op(Pcode::Drop)
            .op(Pcode::Terminate);
        b.define_function(f).op_index(Pcode::PushScriptVar, 0).op(Pcode::ReturnVal);
        let m = Module::load(&b.build(), &LoadOptions::default()).unwrap();

        let bodies = Disassembler::new(&m).disassemble();
        assert_eq!(bodies.len(), 2);
        assert_eq!(mnemonics(&bodies[0]), vec!["pushnumber", "call", "drop", "terminate"]);
        assert_eq!(bodies[0].insts[1].operands, vec!["fn0".to_string()]);
        assert_eq!((bodies[1].kind, bodies[1].id), (BodyKind::Function, 0));
        assert_eq!(mnemonics(&bodies[1]), vec!["pushscriptvar", "returnval"]);
    }

    #[test]
    fn legacy_tail_stops_before_strings() {
        let mut b = ModuleBuilder::new(ModuleFlavor::Legacy);
        b.string("not code");
        {
            let mut code = b.script(1, ScriptType::Open, 0);
            let top = code.label();
            code.bind(top).op(Pcode::DelayDirect).word(1).jump(Pcode::Goto, top);
        }
        let m = Module::load(&b.build(), &LoadOptions::default()).unwrap();
        let body = Disassembler::new(&m).script(1).unwrap();
        assert_eq!(mnemonics(&body), vec!["delaydirect", "goto"]);
        assert_eq!(body.insts[1].to_string(), format!("{:06X}  goto 0x8", body.insts[1].address));
    }

    #[test]
    fn unknown_opcodes_keep_their_number() {
        let mut b = ModuleBuilder::new(ModuleFlavor::Enhanced(PcodeEncoding::Wide));
        b.script(1, ScriptType::Closed, 0).opcode(105).op(Pcode::Terminate);
        let m = Module::load(&b.build(), &LoadOptions::default()).unwrap();
        let body = Disassembler::new(&m).script(1).unwrap();
        assert_eq!(mnemonics(&body), vec!["unknown_105", "terminate"]);
    }
}
