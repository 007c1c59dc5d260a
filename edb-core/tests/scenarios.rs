//! End-to-end scenarios: a monitor on a simulated board, driven by a
//! simulated debugger over the serial and signal wires.

use edb_core::sim::{Pulse, RamNvStore, SimBoard};
use edb_core::{edb_assert, eif_printf, energy_guard};
use edb_core::{CodepointMode, DebugState, Features, InterruptType, MonitorConfig};
use std::time::{Duration, Instant};

fn board() -> SimBoard {
    SimBoard::new(MonitorConfig::default()).expect("board")
}

/// Wait until the monitor reaches `state`; edge handlers run on their own
/// threads and finish after the host's last wire action.
fn wait_for_state(board: &SimBoard, state: DebugState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while board.monitor.state() != state {
        assert!(Instant::now() < deadline, "stuck in {:?}", board.monitor.state());
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Host-initiated session: interrupt, run `commands`, detach.
fn session(board: &SimBoard, commands: impl FnOnce(&SimBoard)) {
    board.host.interrupt().expect("interrupt");
    assert_eq!(board.monitor.state(), DebugState::Debug);
    commands(board);
    board.host.detach().expect("detach");
    wait_for_state(board, DebugState::Idle);
}

#[test]
fn test_scenario_read_memory() {
    let board = board();
    board.memory.load(0x2000, &[11, 22, 33, 44]);
    board.monitor.init();

    session(&board, |board| {
        assert_eq!(board.host.read_mem(0x2000, 4).unwrap(), vec![11, 22, 33, 44]);
    });
    assert_eq!(
        board.state_history(),
        vec![DebugState::Idle, DebugState::Debug, DebugState::Suspended, DebugState::Idle]
    );
    assert_eq!(board.debug_led_history(), vec![false, true, false]);
}

#[test]
fn test_scenario_read_is_clipped() {
    let board = board();
    board.memory.load(0x3000, &[0xAB; 80]);
    board.monitor.init();

    session(&board, |board| {
        let data = board.host.read_mem(0x3000, 200).unwrap();
        assert_eq!(data.len(), edb_core::protocol::MAX_READ_LEN);
        assert!(data.iter().all(|&b| b == 0xAB));
    });
}

#[test]
fn test_scenario_write_then_read() {
    let board = board();
    board.monitor.init();

    session(&board, |board| {
        assert_eq!(board.host.write_mem(0x1C00, &[9, 8, 7]).unwrap(), 9);
        assert_eq!(board.host.read_mem(0x1C00, 3).unwrap(), vec![9, 8, 7]);
    });
    assert_eq!(board.memory.read(0x1C00, 3), vec![9, 8, 7]);
}

#[test]
fn test_scenario_pc_is_captured_on_interrupt() {
    let board = board();
    board.set_program_counter(0x4400);
    board.monitor.init();

    session(&board, |board| {
        // Moving on does not change what was captured.
        board.set_program_counter(0x9999);
        assert_eq!(board.host.get_pc().unwrap(), 0x4400);
    });
    assert_eq!(board.monitor.saved_program_counter(), 0x4400);
}

#[test]
fn test_scenario_breakpoint_hit() {
    let board = board();
    board.monitor.init();

    session(&board, |board| board.host.set_breakpoint(3, true).unwrap());
    assert_eq!(board.monitor.breakpoint_mask(), 1 << 3);

    let app = board
        .spawn_app(|monitor| {
            monitor.internal_breakpoint(2);
            monitor.internal_breakpoint(3);
            monitor.state()
        })
        .unwrap();

    assert_eq!(board.host.serve_request().unwrap(), Pulse::Encoded(Features::FULL.bits()));
    assert_eq!(board.host.interrupt_context().unwrap(), (InterruptType::Breakpoint, 3));
    board.host.detach().unwrap();

    assert_eq!(app.join().unwrap(), DebugState::Idle);
    // Breakpoint 2 is disabled and never reached the debugger.
    assert!(board.host.try_next_pulse().is_none());
    assert_eq!(board.monitor.interrupt_context().kind, InterruptType::None);
}

#[test]
fn test_scenario_breakpoint_mask_round_trip() {
    let board = board();
    board.monitor.init();

    session(&board, |board| {
        for index in 0..16 {
            board.host.set_breakpoint(index, true).unwrap();
        }
        board.host.set_breakpoint(7, false).unwrap();
    });
    assert_eq!(board.monitor.breakpoint_mask(), 0xFF7F);

    session(&board, |board| {
        for index in 0..16 {
            board.host.set_breakpoint(index, false).unwrap();
        }
    });
    assert_eq!(board.monitor.breakpoint_mask(), 0);
}

#[test]
fn test_scenario_breakpoints_survive_reboot() {
    let store = RamNvStore::new();
    {
        let board = SimBoard::with_store(MonitorConfig::default(), Box::new(store.clone())).unwrap();
        board.monitor.init();
        session(&board, |board| board.host.set_breakpoint(5, true).unwrap());
    }
    assert_eq!(store.mask(), 1 << 5);

    let board = SimBoard::with_store(MonitorConfig::default(), Box::new(store)).unwrap();
    board.monitor.init();
    assert_eq!(board.monitor.breakpoint_mask(), 1 << 5);

    let app = board.spawn_app(|monitor| monitor.internal_breakpoint(5)).unwrap();
    board.host.serve_request().unwrap();
    assert_eq!(board.host.interrupt_context().unwrap(), (InterruptType::Breakpoint, 5));
    board.host.detach().unwrap();
    app.join().unwrap();
}

#[test]
fn test_scenario_energy_guard() {
    let board = board();
    board.monitor.init();

    let app = board
        .spawn_app(|monitor| {
            energy_guard!(monitor, {
                assert_eq!(monitor.state(), DebugState::Debug);
                monitor.console().puts("guarded");
            })
        })
        .unwrap();

    assert_eq!(board.host.serve_request().unwrap(), Pulse::Encoded(Features::WITH_TRANSPORT.bits()));
    assert_eq!(board.host.recv_stdio().unwrap(), b"guarded\n");
    board.host.finish_guard().unwrap();
    app.join().unwrap();

    wait_for_state(&board, DebugState::Idle);
    assert_eq!(
        board.state_history(),
        vec![DebugState::Idle, DebugState::Debug, DebugState::Suspended, DebugState::Idle]
    );
    // No command loop in a guard.
    assert_eq!(board.debug_led_history(), vec![false]);
}

#[test]
fn test_scenario_eif_print() {
    let board = board();
    board.monitor.init();

    let app = board.spawn_app(|monitor| eif_printf!(monitor, "x={}\n", 42)).unwrap();
    board.host.serve_request().unwrap();
    assert_eq!(board.host.recv_stdio().unwrap(), b"x=42\n");
    board.host.finish_guard().unwrap();
    app.join().unwrap();
    wait_for_state(&board, DebugState::Idle);
}

#[test]
fn test_scenario_assert_inside_guard() {
    let board = board();
    board.monitor.init();

    let app = board
        .spawn_app(|monitor| {
            monitor.energy_guard_begin();
            edb_assert!(monitor, 1 + 1 == 3);
            monitor.energy_guard_end();
        })
        .unwrap();

    assert_eq!(board.host.serve_request().unwrap(), Pulse::Encoded(Features::WITH_TRANSPORT.bits()));
    // Already in debug mode: the nested request is spelled out.
    board.host.expect_pulse(Pulse::Encoded(1)).unwrap();
    board.host.pulse().unwrap();
    board.host.expect_pulse(Pulse::Encoded(Features::FULL.bits())).unwrap();

    let (kind, line) = board.host.interrupt_context().unwrap();
    assert_eq!(kind, InterruptType::Assert);
    assert!(line > 0);
    board.host.detach().unwrap();

    board.host.finish_guard().unwrap();
    app.join().unwrap();
    wait_for_state(&board, DebugState::Idle);

    // Leaving the nested session ends in Idle, so the guard's own exit
    // passes through Suspended a second time, starting from Idle.
    assert_eq!(
        board.state_history(),
        vec![
            DebugState::Idle,
            DebugState::Debug,
            DebugState::Debug,
            DebugState::Suspended,
            DebugState::Idle,
            DebugState::Suspended,
            DebugState::Idle,
        ]
    );
}

#[test]
fn test_scenario_debug_on_boot() {
    let board = board();
    board.memory.load(0x10, &[0x5A]);
    board.host.hold_high(true);

    let boot = board
        .spawn_app(|monitor| {
            monitor.init();
            monitor.state()
        })
        .unwrap();

    board.host.attach_on_boot().unwrap();
    assert_eq!(board.host.interrupt_context().unwrap(), (InterruptType::DebuggerRequest, 0));
    assert_eq!(board.host.read_mem(0x10, 1).unwrap(), vec![0x5A]);
    board.host.detach().unwrap();

    assert_eq!(boot.join().unwrap(), DebugState::Idle);
}

#[test]
fn test_scenario_serial_echo() {
    let board = board();
    board.monitor.init();

    session(&board, |board| {
        for value in [0, 5, 7] {
            assert_eq!(board.host.serial_echo(value).unwrap(), Pulse::Encoded(value));
        }
    });
}

#[test]
fn test_scenario_line_stays_masked_during_session() {
    let board = board();
    board.monitor.init();

    session(&board, |board| {
        assert!(!board.wire.is_armed());
        board.host.serial_echo(3).unwrap();
        assert!(!board.wire.is_armed());
        board.host.get_pc().unwrap();
        assert!(!board.wire.is_armed());
    });
    assert!(board.wire.is_armed());
}

#[test]
fn test_scenario_echo_then_detach_repeatedly() {
    for _ in 0..50 {
        let board = board();
        board.monitor.init();
        session(&board, |board| {
            assert_eq!(board.host.serial_echo(5).unwrap(), Pulse::Encoded(5));
        });
    }

    let board = board();
    board.monitor.init();
    for value in 0..20u8 {
        session(&board, |board| {
            assert_eq!(board.host.serial_echo(value % 8).unwrap(), Pulse::Encoded(value % 8));
        });
    }
}

#[test]
fn test_scenario_serial_echo_bare_without_target_requests() {
    let config = MonitorConfig { target_side_requests: false, ..MonitorConfig::default() };
    let board = SimBoard::new(config).unwrap();
    board.monitor.init();

    session(&board, |board| {
        assert_eq!(board.host.serial_echo(6).unwrap(), Pulse::Bare);
    });
}

#[test]
fn test_scenario_app_output() {
    let board = board();
    board.monitor.set_app_output(|buf| {
        buf[..3].copy_from_slice(b"abc");
        3
    });
    board.monitor.init();

    session(&board, |board| {
        assert_eq!(board.host.app_output().unwrap(), b"abc");
    });
}

#[test]
fn test_scenario_concurrent_senders_do_not_interleave() {
    let board = board();
    board.monitor.init();
    board.monitor.enable_bare_print();

    let apps: Vec<_> = (1..=4u8)
        .map(|id| board.spawn_app(move |monitor| monitor.output_app_data(&[id; 40])).unwrap())
        .collect();
    for app in apps {
        app.join().unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..4 {
        let frame = board.host.expect_frame(edb_core::ResponseDescriptor::AppOutput).unwrap();
        assert_eq!(frame.payload.len(), 40);
        assert!(frame.payload.iter().all(|&b| b == frame.payload[0]));
        seen.push(frame.payload[0]);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 3, 4]);
    board.monitor.disable_bare_print();
}

#[test]
fn test_scenario_external_breakpoint() {
    let board = board();
    board.monitor.init();
    board.set_codepoint_inputs(0b10);

    let app = board
        .spawn_app(|monitor| {
            monitor.external_breakpoint(0);
            monitor.external_breakpoint(1);
        })
        .unwrap();
    board.host.serve_request().unwrap();
    assert_eq!(board.host.interrupt_context().unwrap(), (InterruptType::Breakpoint, 1));
    board.host.detach().unwrap();
    app.join().unwrap();
}

#[test]
fn test_scenario_watchpoints_need_output_lines() {
    let config = MonitorConfig { codepoints: CodepointMode::Outputs, ..MonitorConfig::default() };
    let board = SimBoard::new(config).unwrap();
    board.monitor.init();

    board.monitor.watchpoint(0);
    board.monitor.passive_breakpoint(1);
    assert_eq!(board.codepoint_writes(), vec![0b01, 0, 0b10, 0]);
    assert_eq!(board.monitor.state(), DebugState::Idle);
}
