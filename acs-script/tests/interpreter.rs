mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;

use acs_nls::LanguageId;
use acs_script::effect::HudMessage;
use acs_script::{LaunchParams, Pcode, ScriptType, SideEffect, VmConfig};
use common::{builder, gravity_log, level, level_with};

#[test]
fn functions_return_values_and_recurse() -> Result<()> {
    let mut b = builder();
    let fact = b.declare_function(1, 1, true);
    b.script(1, ScriptType::Closed, 0)
        .push(5)
        .op_index(Pcode::Call, fact)
        .op_index(Pcode::AssignMapVar, 0)
        .push(3)
        .op_index(Pcode::CallDiscard, fact)
        .op(Pcode::Suspend);
    {
        let mut code = b.define_function(fact);
        let recurse = code.label();
        code.op_index(Pcode::PushScriptVar, 0)
            .push(1)
            .op(Pcode::Le)
            .jump(Pcode::IfNotGoto, recurse)
            .push(1)
            .op(Pcode::ReturnVal);
        code.bind(recurse)
            .op_index(Pcode::PushScriptVar, 0)
            .op_index(Pcode::PushScriptVar, 0)
            .push(1)
            .op(Pcode::Subtract)
            .op_index(Pcode::Call, fact)
            .op(Pcode::Multiply)
            .op(Pcode::ReturnVal);
    }
    let (mut s, mut session, mut host) = level(b)?;
    s.launch(LaunchParams::new(1), &mut session, &mut host);

    assert_eq!(s.module().map_var(0), Some(120));
    // The discarded call leaves nothing behind.
    let depth = s.instances().next().map(|i| i.stack_depth());
    assert_eq!(depth, Some(0));
    Ok(())
}

#[test]
fn bad_calls_and_returns_abort_the_script() -> Result<()> {
    let mut b = builder();
    let import = b.import_function(0, false);
    b.script(1, ScriptType::Closed, 0).op_index(Pcode::Call, 9).op(Pcode::Suspend);
    b.script(2, ScriptType::Closed, 0).op_index(Pcode::Call, import).op(Pcode::Suspend);
    b.script(3, ScriptType::Closed, 0).op(Pcode::ReturnVoid).op(Pcode::Suspend);
    let (mut s, mut session, mut host) = level(b)?;
    for n in 1..=3 {
        s.launch(LaunchParams::new(n), &mut session, &mut host);
        assert!(!s.is_running(n), "script {} survived", n);
    }
    Ok(())
}

#[test]
fn map_arrays_ignore_out_of_range_access() -> Result<()> {
    let mut b = builder();
    b.map_array(0, &[1, 2, 3], 3);
    b.map_array(1, &[9], 1);
    b.script(1, ScriptType::Closed, 0)
        .push(3)
        .push(42)
        .op_index(Pcode::AssignMapArray, 0)
        .push(-1)
        .push(42)
        .op_index(Pcode::AssignMapArray, 0)
        .push(-1)
        .op_index(Pcode::PushMapArray, 0)
        .op_index(Pcode::AssignMapVar, 2)
        .push(3)
        .op_index(Pcode::PushMapArray, 0)
        .op_index(Pcode::AssignMapVar, 3)
        .push(1)
        .push(5)
        .op_index(Pcode::AddMapArray, 0)
        .op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;
    s.begin_level(&mut session, &mut host);
    s.launch(LaunchParams::new(1), &mut session, &mut host);

    assert_eq!(s.module().map_arrays(), &[vec![1, 7, 3], vec![9]]);
    assert_eq!((s.module().map_var(2), s.module().map_var(3)), (Some(0), Some(0)));
    Ok(())
}

#[test]
fn world_and_global_scopes_live_in_the_session() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Closed, 0)
        .push(9)
        .op_index(Pcode::AssignWorldVar, 3)
        .op_index(Pcode::IncGlobalVar, 63)
        .push(1_000_000)
        .push(77)
        .op_index(Pcode::AssignGlobalArray, 1)
        .op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;
    s.launch(LaunchParams::new(1), &mut session, &mut host);

    assert_eq!(session.world_var(3), Some(9));
    assert_eq!(session.global_var(63), Some(1));
    assert_eq!(session.global_array(1).map(|a| a.get(1_000_000)), Some(77));
    assert_eq!(session.world_var(4), Some(0));
    Ok(())
}

#[test]
fn sorted_case_table_jumps_or_falls_through() -> Result<()> {
    for (value, expected) in [(20, 2), (30, 3), (99, 0)] {
        let mut b = builder();
        {
            let mut code = b.script(1, ScriptType::Closed, 0);
            let (ten, twenty, thirty) = (code.label(), code.label(), code.label());
            code.push(value)
                .case_sorted(&[(30, thirty), (10, ten), (20, twenty)])
                .op(Pcode::SetGravityDirect)
                .word(0)
                .op(Pcode::Terminate);
            for (label, g) in [(ten, 1), (twenty, 2), (thirty, 3)] {
                code.bind(label).op(Pcode::SetGravityDirect).word(g).op(Pcode::Terminate);
            }
        }
        let (mut s, mut session, mut host) = level(b)?;
        s.launch(LaunchParams::new(1), &mut session, &mut host);
        assert_eq!(gravity_log(&host), vec![expected], "case {}", value);
    }
    Ok(())
}

#[test]
fn case_goto_pops_only_on_match() -> Result<()> {
    let mut b = builder();
    {
        let mut code = b.script(1, ScriptType::Closed, 0);
        let hit = code.label();
        code.push(4)
            .op(Pcode::CaseGoto)
            .word(3)
            .target(hit)
            .op(Pcode::CaseGoto)
            .word(4)
            .target(hit)
            .op(Pcode::Terminate);
        code.bind(hit).op(Pcode::Suspend);
    }
    let (mut s, mut session, mut host) = level(b)?;
    s.launch(LaunchParams::new(1), &mut session, &mut host);
    let depth = s.instances().next().map(|i| i.stack_depth());
    assert_eq!(depth, Some(0));
    Ok(())
}

#[test]
fn unknown_opcodes_are_skipped() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Closed, 0)
        .opcode(105)
        .op(Pcode::SetGravityDirect)
        .word(5)
        .op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;
    s.launch(LaunchParams::new(1), &mut session, &mut host);
    assert_eq!(gravity_log(&host), vec![5]);
    Ok(())
}

#[test]
fn print_uses_the_locale_chain() -> Result<()> {
    let mut b = builder();
    let hello = b.string("Hello");
    let bye = b.string("Bye");
    b.localized_strings("fr".parse::<LanguageId>()?, &["Bonjour"]);
    b.script(1, ScriptType::Closed, 0)
        .op(Pcode::BeginPrint)
        .push(hello)
        .op(Pcode::PrintString)
        .push(bye)
        .op(Pcode::PrintString)
        .push(7)
        .op(Pcode::PrintNumber)
        .push(3 << 15)
        .op(Pcode::PrintFixed)
        .op(Pcode::EndPrintBold)
        .op(Pcode::Terminate);
    let config = VmConfig::builder().with_locale("fr".parse::<LanguageId>()?).get();
    let (mut s, mut session, mut host) = level_with(b, config)?;
    s.launch(LaunchParams::new(1), &mut session, &mut host);

    assert_eq!(host.printed, vec!["BonjourBye71.5".to_string()]);
    assert_eq!(
        host.effects,
        vec![SideEffect::Print { target: None, text: "BonjourBye71.5".into(), bold: true }]
    );
    Ok(())
}

#[test]
fn hud_message_collects_optional_arguments() -> Result<()> {
    let mut b = builder();
    let text = b.string("Door locked");
    b.script(1, ScriptType::Closed, 0)
        .op(Pcode::BeginPrint)
        .push(text)
        .op(Pcode::PrintString)
        .op(Pcode::MoreHudMessage)
        .push(1)
        .push(0)
        .push(4)
        .push(1 << 15)
        .push(3 << 14)
        .push(2 << 16)
        .op(Pcode::OptHudMessage)
        .push(1 << 16)
        .op(Pcode::EndHudMessageBold)
        .op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;
    s.launch(LaunchParams::new(1), &mut session, &mut host);

    let expected = HudMessage {
        text: "Door locked".into(),
        kind: 1,
        id: 0,
        color: 4,
        x: 1 << 15,
        y: 3 << 14,
        hold: 2 << 16,
        extra: vec![1 << 16],
        bold: true,
    };
    assert_eq!(host.effects, vec![SideEffect::HudMessage { target: None, message: expected }]);
    Ok(())
}

#[test]
fn stack_shuffling_and_arithmetic() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Closed, 0)
        .op(Pcode::Push3Bytes)
        .byte(2)
        .byte(1)
        .byte(7)
        .op(Pcode::Swap)
        .op(Pcode::Subtract) // 7 - 1
        .op(Pcode::Multiply) // 2 * 6
        .op(Pcode::Dup)
        .op(Pcode::Add)
        .op_index(Pcode::AssignMapVar, 0)
        .push(-7)
        .push(2)
        .op(Pcode::Modulus)
        .op_index(Pcode::AssignMapVar, 1)
        .push(i32::MAX)
        .push(1)
        .op(Pcode::Add)
        .op_index(Pcode::AssignMapVar, 2)
        .push(3 << 16)
        .push(1 << 15)
        .op(Pcode::FixedMul)
        .op_index(Pcode::AssignMapVar, 3)
        .op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;
    s.launch(LaunchParams::new(1), &mut session, &mut host);

    let m = s.module();
    assert_eq!(
        (m.map_var(0), m.map_var(1), m.map_var(2), m.map_var(3)),
        (Some(24), Some(-1), Some(i32::MIN), Some(3 << 15))
    );
    Ok(())
}
