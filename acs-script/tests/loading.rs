mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;

use acs_nls::{Encoding, LanguageId};
use acs_script::format::{ModuleBuilder, ModuleFlavor};
use acs_script::{
    LoadError, LoadOptions, Module, ModuleFormat, Pcode, PcodeEncoding, Scheduler, ScriptType,
    Session, VmConfig,
};
use common::{builder, load, RecordingHost};

const FLAVORS: [ModuleFlavor; 5] = [
    ModuleFlavor::Legacy,
    ModuleFlavor::LegacyChunked(PcodeEncoding::Wide),
    ModuleFlavor::LegacyChunked(PcodeEncoding::Compact),
    ModuleFlavor::Enhanced(PcodeEncoding::Wide),
    ModuleFlavor::Enhanced(PcodeEncoding::Compact),
];

fn expected_format(flavor: ModuleFlavor) -> ModuleFormat {
    match flavor {
        ModuleFlavor::Legacy => ModuleFormat::Legacy,
        ModuleFlavor::LegacyChunked(enc) => ModuleFormat::LegacyChunked(enc),
        ModuleFlavor::Enhanced(enc) => ModuleFormat::Enhanced(enc),
    }
}

#[test]
fn every_layout_runs_the_same_program() -> Result<()> {
    for flavor in FLAVORS {
        let mut b = ModuleBuilder::new(flavor);
        let hi = b.string("Hi");
        {
            let mut code = b.script(1, ScriptType::Open, 0);
            let skip = code.label();
            code.op(Pcode::BeginPrint)
                .push(hi)
                .op(Pcode::PrintString)
                .op(Pcode::EndPrintBold)
                .push(6)
                .push(7)
                .op(Pcode::Multiply)
                .op_index(Pcode::AssignMapVar, 0)
                .jump(Pcode::Goto, skip)
                .op_index(Pcode::IncMapVar, 0);
            code.bind(skip).op(Pcode::Terminate);
        }
        let module = load(&b.build())?;
        assert_eq!(module.format(), expected_format(flavor));

        let mut s = Scheduler::new(module, 1, VmConfig::default());
        let mut session = Session::new();
        let mut host = RecordingHost::default();
        s.begin_level(&mut session, &mut host);

        assert_eq!(host.printed, vec!["Hi".to_string()], "{:?}", flavor);
        assert_eq!(s.module().map_var(0), Some(42), "{:?}", flavor);
        assert_eq!(s.instance_count(), 0);
    }
    Ok(())
}

#[test]
fn scripts_are_sorted_and_stable_across_loads() -> Result<()> {
    let mut b = builder();
    for n in [5, 2, 9] {
        b.script(n, ScriptType::Closed, 0).op(Pcode::Terminate);
    }
    let bytes = b.build();
    let first = load(&bytes)?;
    let second = load(&bytes)?;

    let numbers: Vec<i32> = first.scripts().iter().map(|s| s.number).collect();
    assert_eq!(numbers, vec![2, 5, 9]);
    for n in [2, 5, 9] {
        assert_eq!(
            first.find_script(n).map(|s| s.entry),
            second.find_script(n).map(|s| s.entry)
        );
    }
    assert!(first.find_script(3).is_none());
    assert_eq!(first.fingerprint(), second.fingerprint());
    Ok(())
}

#[test]
fn truncated_chunk_is_rejected() {
    let mut b = builder();
    b.string("a string long enough to matter");
    b.script(1, ScriptType::Open, 0).op(Pcode::Terminate);
    let mut bytes = b.build();
    bytes.truncate(bytes.len() - 3);
    assert!(matches!(
        Module::load(&bytes, &LoadOptions::default()),
        Err(LoadError::BadChunk { id, .. }) if id == "STRL"
    ));
}

#[test]
fn legacy_directory_past_the_end_is_rejected() {
    let mut b = ModuleBuilder::new(ModuleFlavor::Legacy);
    b.script(1, ScriptType::Open, 0).op(Pcode::Terminate);
    let mut bytes = b.build();
    let past = bytes.len() as u32 + 100;
    bytes[4..8].copy_from_slice(&past.to_le_bytes());
    assert!(matches!(
        Module::load(&bytes, &LoadOptions::default()),
        Err(LoadError::BadOffset { what: "script directory", .. })
    ));
}

#[test]
fn unknown_format_tag_is_rejected() {
    let mut bytes = builder().build();
    bytes[3] = b'X';
    assert_eq!(
        Module::load(&bytes, &LoadOptions::default()).err(),
        Some(LoadError::BadFormatTag { tag: b'X' })
    );
}

#[test]
fn strings_resolve_through_the_locale_chain() -> Result<()> {
    let fr: LanguageId = "fr".parse()?;
    let de: LanguageId = "de".parse()?;
    let mut b = builder();
    for s in ["neutral-0", "neutral-1", "neutral-2"] {
        b.string(s);
    }
    b.localized_strings(LanguageId::ENGLISH, &["english-0", "english-1"]);
    b.localized_strings(fr, &["french-0"]);
    b.script(1, ScriptType::Open, 0).op(Pcode::Terminate);
    let m = load(&b.build())?;

    assert_eq!(m.lookup_string(0, fr), Some("french-0"));
    assert_eq!(m.lookup_string(1, fr), Some("english-1"));
    assert_eq!(m.lookup_string(2, fr), Some("neutral-2"));
    assert_eq!(m.lookup_string(0, de), Some("english-0"));
    assert_eq!(m.lookup_string(3, de), None);
    assert_eq!(m.strings().languages().count(), 3);
    Ok(())
}

#[test]
fn string_bytes_follow_the_configured_encoding() -> Result<()> {
    for encoding in [Encoding::Utf8, Encoding::Windows1252] {
        let mut b = builder().with_encoding(encoding);
        b.string("café");
        b.script(1, ScriptType::Open, 0).op(Pcode::Terminate);
        let m = Module::load(&b.build(), &LoadOptions { encoding })?;
        assert_eq!(m.lookup_string(0, LanguageId::NEUTRAL), Some("café"));
    }
    Ok(())
}
