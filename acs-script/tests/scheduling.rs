mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;

use acs_script::{
    ActorHandle, LaunchParams, Pcode, ScriptState, ScriptType, SideEffect, VmConfig,
};
use common::{builder, gravity_log, level, level_with, load, ticks, RecordingHost};

const ACS_EXECUTE: u32 = 80;

#[test]
fn open_script_delays_then_terminates() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Open, 0).push(5).op(Pcode::Delay).op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;

    s.begin_level(&mut session, &mut host);
    assert_eq!(s.script_state(1), Some(ScriptState::Delayed(5)));

    ticks(&mut s, &mut session, &mut host, 4);
    assert_eq!(s.script_state(1), Some(ScriptState::Delayed(1)));

    s.tick(&mut session, &mut host);
    assert_eq!(s.script_state(1), None);
    assert_eq!(s.instance_count(), 0);
    Ok(())
}

#[test]
fn delay_expires_on_exactly_the_requested_tick() -> Result<()> {
    for v in [1, 2, 7] {
        let mut b = builder();
        b.script(1, ScriptType::Closed, 0)
            .op(Pcode::DelayDirect)
            .word(v)
            .op(Pcode::SetGravityDirect)
            .word(v)
            .op(Pcode::Terminate);
        let (mut s, mut session, mut host) = level(b)?;
        assert!(s.launch(LaunchParams::new(1), &mut session, &mut host));

        ticks(&mut s, &mut session, &mut host, v as usize - 1);
        assert!(host.effects.is_empty(), "delay {} ran early", v);
        s.tick(&mut session, &mut host);
        assert_eq!(gravity_log(&host), vec![v]);
    }
    Ok(())
}

#[test]
fn zero_and_negative_delays_do_not_yield() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Closed, 0)
        .push(0)
        .op(Pcode::Delay)
        .push(-3)
        .op(Pcode::Delay)
        .op(Pcode::SetGravityDirect)
        .word(1)
        .op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;
    s.launch(LaunchParams::new(1), &mut session, &mut host);
    assert_eq!(gravity_log(&host), vec![1]);
    Ok(())
}

#[test]
fn executor_resumes_after_awaited_script_finishes() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Open, 0)
        .op(Pcode::LSpec2Direct)
        .index(ACS_EXECUTE)
        .word(2)
        .word(0)
        .op(Pcode::ScriptWaitDirect)
        .word(2)
        .op(Pcode::SetGravityDirect)
        .word(100)
        .op(Pcode::Terminate);
    b.script(2, ScriptType::Closed, 0).op(Pcode::DelayDirect).word(1).op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;

    s.begin_level(&mut session, &mut host);
    assert_eq!(s.script_state(1), Some(ScriptState::ScriptWait(2)));
    assert_eq!(s.script_state(2), Some(ScriptState::Delayed(1)));

    s.tick(&mut session, &mut host);
    assert_eq!(s.script_state(2), None);
    assert_eq!(s.script_state(1), Some(ScriptState::Running));

    s.tick(&mut session, &mut host);
    assert_eq!(gravity_log(&host), vec![100]);
    assert_eq!(s.instance_count(), 0);
    Ok(())
}

#[test]
fn waiting_for_an_unstarted_script_blocks_until_it_starts() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Open, 0)
        .op(Pcode::ScriptWaitDirect)
        .word(9)
        .op(Pcode::SetGravityDirect)
        .word(1)
        .op(Pcode::Terminate);
    b.script(9, ScriptType::Closed, 0).op(Pcode::DelayDirect).word(2).op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;

    s.begin_level(&mut session, &mut host);
    ticks(&mut s, &mut session, &mut host, 3);
    assert_eq!(s.script_state(1), Some(ScriptState::ScriptWaitPre(9)));

    s.launch(LaunchParams::new(9), &mut session, &mut host);
    assert_eq!(s.script_state(1), Some(ScriptState::ScriptWait(9)));
    ticks(&mut s, &mut session, &mut host, 3);
    assert_eq!(gravity_log(&host), vec![1]);
    Ok(())
}

#[test]
fn divide_by_zero_only_ends_the_faulting_script() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Open, 0)
        .op(Pcode::DelayDirect)
        .word(1)
        .push(1)
        .push(0)
        .op(Pcode::Divide)
        .op(Pcode::SetGravityDirect)
        .word(1)
        .op(Pcode::Terminate);
    b.script(2, ScriptType::Open, 0)
        .op(Pcode::DelayDirect)
        .word(1)
        .op(Pcode::SetGravityDirect)
        .word(2)
        .op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;

    s.begin_level(&mut session, &mut host);
    s.tick(&mut session, &mut host);
    assert_eq!(gravity_log(&host), vec![2]);
    assert_eq!((s.instance_count(), s.stack_len()), (0, 0));
    Ok(())
}

#[test]
fn modulus_by_zero_in_a_variable_update_is_a_fault() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Closed, 0)
        .push(0)
        .op_index(Pcode::ModMapVar, 3)
        .op(Pcode::SetGravityDirect)
        .word(1)
        .op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;
    s.launch(LaunchParams::new(1), &mut session, &mut host);
    assert!(host.effects.is_empty());
    assert_eq!(s.instance_count(), 0);
    Ok(())
}

#[test]
fn second_launch_of_a_running_script_fails() -> Result<()> {
    let mut b = builder();
    b.script(3, ScriptType::Closed, 0).op(Pcode::DelayDirect).word(10).op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;

    assert!(s.launch(LaunchParams::new(3), &mut session, &mut host));
    assert!(!s.launch(LaunchParams::new(3), &mut session, &mut host));
    assert_eq!(s.instance_count(), 1);
    assert!(!s.launch(LaunchParams::new(4), &mut session, &mut host));
    Ok(())
}

#[test]
fn call_overflow_aborts_only_the_caller() -> Result<()> {
    let mut b = builder();
    let big = b.declare_function(0, 40, false);
    b.script(1, ScriptType::Closed, 0)
        .op(Pcode::DelayDirect)
        .word(1)
        .op_index(Pcode::CallDiscard, big)
        .op(Pcode::SetGravityDirect)
        .word(1)
        .op(Pcode::Terminate);
    b.script(2, ScriptType::Closed, 0)
        .push(7)
        .push(8)
        .op(Pcode::DelayDirect)
        .word(1)
        .op(Pcode::Add)
        .op_index(Pcode::AssignMapVar, 0)
        .op(Pcode::Terminate);
    b.define_function(big).op(Pcode::ReturnVoid);
    let config = VmConfig::builder().with_stack_capacity(16).get();
    let (mut s, mut session, mut host) = level_with(b, config)?;

    s.launch(LaunchParams::new(1), &mut session, &mut host);
    s.launch(LaunchParams::new(2), &mut session, &mut host);
    let second = s.find(2).and_then(|id| s.instance(id)).map(|i| i.stack_depth());
    assert_eq!(second, Some(2));

    s.tick(&mut session, &mut host);
    assert!(host.effects.is_empty());
    assert_eq!(s.module().map_var(0), Some(15));
    assert_eq!((s.instance_count(), s.stack_len()), (0, 0));
    Ok(())
}

#[test]
fn runaway_loop_is_cut_off() -> Result<()> {
    let mut b = builder();
    {
        let mut code = b.script(1, ScriptType::Closed, 0);
        let top = code.label();
        code.bind(top).jump(Pcode::Goto, top);
    }
    b.script(2, ScriptType::Closed, 0).op(Pcode::SetGravityDirect).word(2).op(Pcode::Terminate);
    let config = VmConfig::builder().with_instruction_limit(1000).get();
    let (mut s, mut session, mut host) = level_with(b, config)?;

    s.launch(LaunchParams::new(1), &mut session, &mut host);
    assert!(!s.is_running(1));
    s.launch(LaunchParams::new(2), &mut session, &mut host);
    assert_eq!(gravity_log(&host), vec![2]);
    Ok(())
}

#[test]
fn scripts_can_suspend_resume_and_terminate_each_other() -> Result<()> {
    const ACS_SUSPEND: u32 = 81;
    const ACS_TERMINATE: u32 = 82;
    let mut b = builder();
    {
        let mut worker = b.script(5, ScriptType::Closed, 0);
        let top = worker.label();
        worker
            .bind(top)
            .op_index(Pcode::IncMapVar, 0)
            .op(Pcode::DelayDirect)
            .word(1)
            .jump(Pcode::Goto, top);
    }
    b.script(6, ScriptType::Closed, 0)
        .op(Pcode::LSpec1Direct)
        .index(ACS_SUSPEND)
        .word(5)
        .op(Pcode::Terminate);
    b.script(7, ScriptType::Closed, 0)
        .op(Pcode::LSpec1Direct)
        .index(ACS_TERMINATE)
        .word(5)
        .op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;

    s.launch(LaunchParams::new(5), &mut session, &mut host);
    ticks(&mut s, &mut session, &mut host, 2);
    assert_eq!(s.module().map_var(0), Some(3));

    s.launch(LaunchParams::new(6), &mut session, &mut host);
    assert_eq!(s.script_state(5), Some(ScriptState::Suspended));
    ticks(&mut s, &mut session, &mut host, 3);
    assert_eq!(s.module().map_var(0), Some(3));

    // Relaunching a suspended script resumes it.
    assert!(s.launch(LaunchParams::new(5), &mut session, &mut host));
    s.tick(&mut session, &mut host);
    assert_eq!(s.module().map_var(0), Some(4));

    s.launch(LaunchParams::new(7), &mut session, &mut host);
    assert!(!s.is_running(5));
    assert_eq!(s.instance_count(), 0);
    Ok(())
}

#[test]
fn other_map_requests_wait_for_that_map() -> Result<()> {
    let here = ActorHandle::new(1, 1);
    let mut first = builder();
    first
        .script(1, ScriptType::Closed, 0)
        .op(Pcode::LSpec3Direct)
        .index(ACS_EXECUTE)
        .word(7)
        .word(5)
        .word(11)
        .op(Pcode::Terminate);
    let (mut s, mut session, _) = level(first)?;
    let mut host = RecordingHost::with_players(&[here]);
    s.launch(LaunchParams::new(1).with_activator(Some(here)), &mut session, &mut host);
    assert_eq!(session.deferred().pending(5), 1);

    let mut second = builder();
    second
        .script(7, ScriptType::Closed, 1)
        .op_index(Pcode::PushScriptVar, 0)
        .op_index(Pcode::AssignMapVar, 0)
        .op(Pcode::Suspend);
    let module = load(&second.build())?;
    let mut next = acs_script::Scheduler::new(module, 5, VmConfig::default());
    let respawned = ActorHandle::new(4, 2);
    let mut host = RecordingHost::with_players(&[respawned]);
    next.begin_level(&mut session, &mut host);

    assert!(session.deferred().is_empty());
    assert_eq!(next.module().map_var(0), Some(11));
    let activators: Vec<_> = next.instances().map(|i| i.activator()).collect();
    assert_eq!(activators, vec![Some(respawned)]);
    Ok(())
}

#[test]
fn deferred_entry_for_a_missing_script_is_dropped() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Closed, 0).op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;
    session.deferred_mut().push(acs_script::DeferredEntry {
        map: 1,
        action: acs_script::DeferredAction::Execute,
        script: 99,
        args: [0; 3],
        player: None,
    });
    s.begin_level(&mut session, &mut host);
    assert!(session.deferred().is_empty());
    assert_eq!(s.instance_count(), 0);
    Ok(())
}

#[test]
fn enter_scripts_start_per_player_activator() -> Result<()> {
    let mut b = builder();
    b.script(2, ScriptType::Enter, 0)
        .op(Pcode::PlayerNumber)
        .op_index(Pcode::AssignMapVar, 0)
        .op(Pcode::Suspend);
    let (mut s, mut session, _) = level(b)?;
    let players = [ActorHandle::new(0, 0), ActorHandle::new(1, 0)];
    let mut host = RecordingHost::with_players(&players);
    let started =
        s.start_typed_scripts(ScriptType::Enter, Some(players[1]), true, &mut session, &mut host);
    assert_eq!(started, 1);
    assert_eq!(s.module().map_var(0), Some(1));
    assert!(!s.is_running(2));
    Ok(())
}

#[test]
fn line_specials_reach_the_world_and_are_replicated() -> Result<()> {
    let mut b = builder();
    b.script(1, ScriptType::Closed, 0)
        .push(12)
        .push(34)
        .op_index(Pcode::LSpec2, 70)
        .push(1)
        .push(2)
        .push(3)
        .push(4)
        .push(5)
        .op_index(Pcode::LSpec5Result, 71)
        .op_index(Pcode::AssignMapVar, 0)
        .op(Pcode::Terminate);
    let (mut s, mut session, mut host) = level(b)?;
    s.launch(LaunchParams::new(1), &mut session, &mut host);
    assert_eq!(host.specials, vec![(70, [12, 34, 0, 0, 0]), (71, [1, 2, 3, 4, 5])]);
    assert_eq!(s.module().map_var(0), Some(1));
    assert!(matches!(host.effects.first(), Some(SideEffect::LineSpecial { special: 70, .. })));
    Ok(())
}
