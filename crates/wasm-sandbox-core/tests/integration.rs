//! Integration tests for wasm-sandbox-core.
//!
//! These tests verify the complete invocation pipeline:
//! - WAT compilation to an artifact
//! - Instantiation against the host capability table
//! - Dispatch of exported functions with word arguments
//! - Trap classification and resource release

use wasm_sandbox_common::{
    Capabilities, EngineConfig, ExecutionConfig, SandboxError, TrapCause, Word,
};
use wasm_sandbox_core::store::{LogLevel, LogSource, Phase};
use wasm_sandbox_core::{CompiledModule, HostImports, InstanceReport, LiveInstance, WasmEngine};
use wasm_sandbox_host::host_imports;

struct Harness {
    engine: WasmEngine,
    imports: HostImports,
    exec_config: ExecutionConfig,
}

impl Harness {
    fn new() -> Self {
        Self::with(EngineConfig::default(), Capabilities::default())
    }

    fn with(engine_config: EngineConfig, capabilities: Capabilities) -> Self {
        let engine_config = EngineConfig {
            pooling_allocator: false,
            ..engine_config
        };
        let engine = WasmEngine::new(&engine_config).unwrap();
        let imports = host_imports(&engine, capabilities).unwrap();

        Self {
            engine,
            imports,
            exec_config: ExecutionConfig::default(),
        }
    }

    fn instantiate(&self, wat: &str) -> Result<LiveInstance, SandboxError> {
        let module = CompiledModule::from_wat(&self.engine, wat)?;
        LiveInstance::instantiate(
            &self.engine,
            &module,
            &self.imports,
            &self.exec_config,
            "test",
        )
    }

    fn execute(
        &self,
        wat: &str,
        function: &str,
        args: &[Word],
    ) -> (Result<Vec<Word>, SandboxError>, InstanceReport) {
        match self.instantiate(wat) {
            Ok(mut instance) => {
                let result = instance.invoke(function, args);
                (result, instance.finish())
            }
            Err(e) => (Err(e), InstanceReport::default()),
        }
    }
}

const ADD_WAT: &str = r#"
    (module
        (func (export "add") (param i64 i64) (result i64)
            (i64.add (local.get 0) (local.get 1))))
"#;

const ACCUMULATE_WAT: &str = r#"
    (module
        (memory (export "memory") 1)
        (func (export "accumulate") (param i64) (result i64)
            (i64.store (i32.const 0)
                (i64.add (i64.load (i32.const 0)) (local.get 0)))
            (i64.load (i32.const 0))))
"#;

const INIT_PRINTS_WAT: &str = r#"
    (module
        (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
        (memory (export "memory") 1)
        (data (i32.const 16) "init\n")

        (func (export "_initialize")
            (i32.store (i32.const 0) (i32.const 16))
            (i32.store (i32.const 4) (i32.const 5))
            (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8))))

        (func (export "noop")))
"#;

fn assert_trap(result: Result<Vec<Word>, SandboxError>, expected: TrapCause) {
    match result {
        Err(SandboxError::ExecutionTrap { cause, message }) => {
            assert_eq!(cause, expected, "unexpected cause, message: {message}");
        }
        other => panic!("expected {expected} trap, got {other:?}"),
    }
}

// ============================================================================
// Test: Basic Execution
// ============================================================================

#[test]
fn test_add() {
    let harness = Harness::new();
    let (result, _) = harness.execute(ADD_WAT, "add", &[2, 3]);

    assert_eq!(result.unwrap(), vec![5]);
}

#[test]
fn test_zero_argument_export_has_no_host_calls() {
    let harness = Harness::new();
    let wat = r#"(module (func (export "answer") (result i32) (i32.const 42)))"#;

    let (result, report) = harness.execute(wat, "answer", &[]);

    assert_eq!(result.unwrap(), vec![42]);
    assert!(report.logs.is_empty());
}

#[test]
fn test_multi_value_results_in_order() {
    let harness = Harness::new();
    let wat = r#"
        (module
            (func (export "pair") (result i32 i64)
                (i32.const -1) (i64.const 7)))
    "#;

    let (result, _) = harness.execute(wat, "pair", &[]);
    assert_eq!(result.unwrap(), vec![0xFFFF_FFFF, 7]);
}

// ============================================================================
// Test: Bad Input
// ============================================================================

#[test]
fn test_malformed_bytecode() {
    let harness = Harness::new();

    let result = CompiledModule::compile(&harness.engine, b"definitely not wasm");

    assert!(matches!(result, Err(SandboxError::Compile { .. })));
    assert_eq!(harness.engine.live_instances(), 0);
    assert_eq!(harness.engine.live_artifacts(), 0);
}

#[test]
fn test_function_not_found_after_init() {
    let harness = Harness::new();
    let mut instance = harness.instantiate(INIT_PRINTS_WAT).unwrap();
    let logs_before = instance.logs().len();

    let result = instance.invoke("does_not_exist", &[]);

    match result {
        Err(SandboxError::FunctionNotFound { name }) => assert_eq!(name, "does_not_exist"),
        other => panic!("expected FunctionNotFound, got {other:?}"),
    }
    assert_eq!(instance.logs().len(), logs_before);
    assert_eq!(instance.phase(), Phase::Instantiated);
}

#[test]
fn test_argument_mismatch() {
    let harness = Harness::new();
    let mut instance = harness.instantiate(ADD_WAT).unwrap();

    let result = instance.invoke("add", &[1]);
    assert!(matches!(result, Err(SandboxError::ArgumentMismatch { .. })));

    // The instance is still usable after a rejected call
    assert_eq!(instance.invoke("add", &[1, 1]).unwrap(), vec![2]);
}

#[test]
fn test_disabled_capability_fails_instantiation() {
    let harness = Harness::with(EngineConfig::default(), Capabilities::none());
    let wat = r#"
        (module
            (import "env" "log" (func (param i32 i32 i32)))
            (func (export "noop")))
    "#;

    match harness.instantiate(wat) {
        Err(SandboxError::Instantiate { reason, .. }) => {
            assert!(reason.contains("env::log"), "reason: {reason}");
        }
        other => panic!("expected Instantiate error, got {other:?}"),
    }
    assert_eq!(harness.engine.live_instances(), 0);
}

// ============================================================================
// Test: Initialization Output
// ============================================================================

#[test]
fn test_init_output_precedes_invocation() {
    let harness = Harness::new();
    let mut instance = harness.instantiate(INIT_PRINTS_WAT).unwrap();

    // Already forwarded before the target function runs
    assert_eq!(instance.logs().len(), 1);
    assert_eq!(instance.logs()[0].message, "init");

    let result = instance.invoke("noop", &[]);
    assert_eq!(result.unwrap(), Vec::<Word>::new());

    let report = instance.finish();
    assert_eq!(report.logs.len(), 1);
    assert_eq!(report.logs[0].message, "init");
    assert_eq!(report.logs[0].source, LogSource::Stdout);
    assert_eq!(report.logs[0].level, LogLevel::Info);
}

#[test]
fn test_unterminated_init_line_kept_separate() {
    let harness = Harness::new();
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 16) "init")
            (data (i32.const 32) "done\n")

            (func $print (param $ptr i32) (param $len i32)
                (i32.store (i32.const 0) (local.get $ptr))
                (i32.store (i32.const 4) (local.get $len))
                (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8))))

            (func (export "_initialize") (call $print (i32.const 16) (i32.const 4)))
            (func (export "run") (call $print (i32.const 32) (i32.const 5))))
    "#;

    let mut instance = harness.instantiate(wat).unwrap();

    assert_eq!(instance.logs().len(), 1);
    assert_eq!(instance.logs()[0].message, "init");
    assert_eq!(instance.logs()[0].phase, Phase::Instantiated);

    instance.invoke("run", &[]).unwrap();

    let report = instance.finish();
    let messages: Vec<&str> = report.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["init", "done"]);
    assert_eq!(report.logs[1].phase, Phase::Running);
}

#[test]
fn test_console_buffer_released_between_calls() {
    let mut harness = Harness::new();
    harness.exec_config.console_buffer_bytes = 40;
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 16) "0123456789abcde\n")

            (func (export "say") (result i32)
                (i32.store (i32.const 0) (i32.const 16))
                (i32.store (i32.const 4) (i32.const 16))
                (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8))))
    "#;

    let mut instance = harness.instantiate(wat).unwrap();

    // Far more than 40 bytes in total, at most 16 per call
    for _ in 0..8 {
        assert_eq!(instance.invoke("say", &[]).unwrap(), vec![0]);
    }

    let report = instance.finish();
    assert_eq!(report.logs.len(), 8);
    assert!(report.logs.iter().all(|l| l.message == "0123456789abcde"));
}

#[test]
fn test_guest_logging_and_stderr() {
    let harness = Harness::new();
    let wat = r#"
        (module
            (import "env" "log" (func $log (param i32 i32 i32)))
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 32) "First message")
            (data (i32.const 64) "oops\n")

            (func (export "run")
                (call $log (i32.const 1) (i32.const 32) (i32.const 13))
                (i32.store (i32.const 0) (i32.const 64))
                (i32.store (i32.const 4) (i32.const 5))
                (drop (call $fd_write (i32.const 2) (i32.const 0) (i32.const 1) (i32.const 8)))
                (call $log (i32.const 3) (i32.const 32) (i32.const 5))))
    "#;

    let (result, report) = harness.execute(wat, "run", &[]);
    assert!(result.is_ok());

    // Guest logs are recorded as they happen; console lines when drained
    let logs = &report.logs;
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0].message, "First message");
    assert_eq!(logs[0].source, LogSource::Guest);
    assert_eq!(logs[1].message, "First");
    assert_eq!(logs[1].level, LogLevel::Error);
    assert_eq!(logs[2].message, "oops");
    assert_eq!(logs[2].source, LogSource::Stderr);
    assert_eq!(logs[2].level, LogLevel::Warn);
}

// ============================================================================
// Test: Trap Handling
// ============================================================================

#[test]
fn test_out_of_bounds_releases_instance() {
    let harness = Harness::new();
    let wat = r#"
        (module
            (memory 1)
            (func (export "peek") (result i32)
                (i32.load (i32.const 70000))))
    "#;
    let before = harness.engine.live_instances();

    let (result, _) = harness.execute(wat, "peek", &[]);

    assert_trap(result, TrapCause::OutOfBounds);
    assert_eq!(harness.engine.live_instances(), before);
}

#[test]
fn test_divide_by_zero() {
    let harness = Harness::new();
    let wat = r#"
        (module
            (func (export "div") (param i32 i32) (result i32)
                (i32.div_s (local.get 0) (local.get 1))))
    "#;

    let (result, _) = harness.execute(wat, "div", &[10, 0]);
    assert_trap(result, TrapCause::DivideFault);

    let (result, _) = harness.execute(wat, "div", &[10, 2]);
    assert_eq!(result.unwrap(), vec![5]);
}

#[test]
fn test_unreachable() {
    let harness = Harness::new();
    let wat = r#"(module (func (export "_start") unreachable))"#;

    let (result, _) = harness.execute(wat, "_start", &[]);
    assert_trap(result, TrapCause::Unreachable);
}

#[test]
fn test_stack_exhaustion() {
    let harness = Harness::new();
    let wat = r#"(module (func $recurse (export "recurse") (call $recurse)))"#;

    let (result, _) = harness.execute(wat, "recurse", &[]);
    assert_trap(result, TrapCause::StackExhaustion);
    assert_eq!(harness.engine.live_instances(), 0);
}

#[test]
fn test_explicit_abort() {
    let harness = Harness::new();
    let wat = r#"
        (module
            (import "env" "abort" (func $abort (param i32)))
            (func (export "fail") (call $abort (i32.const 7))))
    "#;

    let (result, _) = harness.execute(wat, "fail", &[]);
    assert_trap(result, TrapCause::ExplicitAbort);
}

#[test]
fn test_proc_exit_is_explicit_abort() {
    let harness = Harness::new();
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
            (memory (export "memory") 1)
            (func (export "quit") (call $exit (i32.const 3))))
    "#;

    let (result, _) = harness.execute(wat, "quit", &[]);
    assert_trap(result, TrapCause::ExplicitAbort);
}

#[test]
fn test_proc_exit_zero_completes() {
    let harness = Harness::new();
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
            (memory (export "memory") 1)
            (func (export "quit") (call $exit (i32.const 0)))
            (func (export "quit_early") (result i32)
                (call $exit (i32.const 0))
                (i32.const 1)))
    "#;

    let mut instance = harness.instantiate(wat).unwrap();
    assert_eq!(instance.invoke("quit", &[]).unwrap(), Vec::<Word>::new());
    assert_eq!(instance.phase(), Phase::Completed);

    // A function that owes results cannot complete by exiting
    let (result, _) = harness.execute(wat, "quit_early", &[]);
    assert_trap(result, TrapCause::ExplicitAbort);
}

#[test]
fn test_host_call_failure() {
    let harness = Harness::new();
    let wat = r#"
        (module
            (import "env" "log" (func $log (param i32 i32 i32)))
            (memory (export "memory") 1)
            (func (export "bad_log")
                (call $log (i32.const 1) (i32.const 65530) (i32.const 100))))
    "#;

    let (result, _) = harness.execute(wat, "bad_log", &[]);
    assert_trap(result, TrapCause::HostCallFailure);
}

#[test]
fn test_fuel_exhaustion() {
    let harness = Harness::with(
        EngineConfig {
            fuel_metering: true,
            ..Default::default()
        },
        Capabilities::default(),
    );
    let harness = Harness {
        exec_config: ExecutionConfig {
            max_fuel: 1000,
            ..Default::default()
        },
        ..harness
    };
    let wat = r#"(module (func (export "spin") (loop $forever (br $forever))))"#;

    let (result, _) = harness.execute(wat, "spin", &[]);
    assert_trap(result, TrapCause::OutOfFuel);
}

#[test]
fn test_fuel_consumption_reported() {
    let harness = Harness::with(
        EngineConfig {
            fuel_metering: true,
            ..Default::default()
        },
        Capabilities::default(),
    );
    let wat = r#"
        (module
            (func (export "count") (result i32)
                (local $i i32)
                (loop $continue
                    (local.set $i (i32.add (local.get $i) (i32.const 1)))
                    (br_if $continue (i32.lt_u (local.get $i) (i32.const 100))))
                (local.get $i)))
    "#;

    let (result, report) = harness.execute(wat, "count", &[]);

    assert_eq!(result.unwrap(), vec![100]);
    assert!(report.metrics.fuel_consumed > 0);
    assert!(report.metrics.duration.is_some());
}

#[test]
fn test_memory_limit() {
    let mut harness = Harness::new();
    harness.exec_config.max_memory_mb = 1;
    let wat = r#"
        (module
            (memory (export "memory") 1)
            (func (export "grow") (param i32) (result i32)
                (memory.grow (local.get 0))))
    "#;

    // 1 MiB is 16 pages; growing past it fails instead of trapping
    let (result, _) = harness.execute(wat, "grow", &[100]);
    assert_eq!(result.unwrap(), vec![0xFFFF_FFFF]);

    let (result, _) = harness.execute(wat, "grow", &[1]);
    assert_eq!(result.unwrap(), vec![1]);
}

// ============================================================================
// Test: Sandbox Boundary
// ============================================================================

#[test]
fn test_clock_frozen_without_capability() {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "clock_time_get"
                (func $clock (param i32 i64 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "now") (result i64)
                (drop (call $clock (i32.const 0) (i64.const 0) (i32.const 0)))
                (i64.load (i32.const 0))))
    "#;

    let frozen = Harness::new();
    let (result, _) = frozen.execute(wat, "now", &[]);
    assert_eq!(result.unwrap(), vec![0]);

    let live = Harness::with(
        EngineConfig::default(),
        Capabilities {
            clock: true,
            ..Default::default()
        },
    );
    let (result, _) = live.execute(wat, "now", &[]);
    assert!(result.unwrap()[0] > 0);
}

// ============================================================================
// Test: Isolation
// ============================================================================

#[test]
fn test_state_stays_within_instance() {
    let harness = Harness::new();
    let mut instance = harness.instantiate(ACCUMULATE_WAT).unwrap();

    assert_eq!(instance.invoke("accumulate", &[5]).unwrap(), vec![5]);
    assert_eq!(instance.invoke("accumulate", &[5]).unwrap(), vec![10]);

    // A fresh instance starts from zeroed memory
    let (result, _) = harness.execute(ACCUMULATE_WAT, "accumulate", &[5]);
    assert_eq!(result.unwrap(), vec![5]);
}

#[test]
fn test_concurrent_matches_sequential() {
    const INVOCATIONS: u64 = 1000;
    const WORKERS: u64 = 8;

    let harness = Harness::new();

    let sequential: Vec<Vec<Word>> = (0..INVOCATIONS)
        .map(|i| harness.execute(ACCUMULATE_WAT, "accumulate", &[i]).0.unwrap())
        .collect();

    let mut concurrent: Vec<(u64, Vec<Word>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|worker| {
                let harness = &harness;
                scope.spawn(move || {
                    (worker..INVOCATIONS)
                        .step_by(WORKERS as usize)
                        .map(|i| {
                            let (result, _) = harness.execute(ACCUMULATE_WAT, "accumulate", &[i]);
                            (i, result.unwrap())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });
    concurrent.sort_by_key(|(i, _)| *i);

    let concurrent: Vec<Vec<Word>> = concurrent.into_iter().map(|(_, r)| r).collect();
    assert_eq!(concurrent, sequential);
    assert_eq!(harness.engine.live_instances(), 0);
}

// ============================================================================
// Test: Shutdown
// ============================================================================

#[test]
fn test_everything_fails_after_shutdown() {
    let harness = Harness::new();
    let module = CompiledModule::from_wat(&harness.engine, ADD_WAT).unwrap();
    let mut instance = LiveInstance::instantiate(
        &harness.engine,
        &module,
        &harness.imports,
        &harness.exec_config,
        "before-shutdown",
    )
    .unwrap();

    assert!(harness.engine.shutdown());

    assert!(matches!(
        CompiledModule::from_wat(&harness.engine, ADD_WAT),
        Err(SandboxError::EngineClosed)
    ));
    assert!(matches!(
        LiveInstance::instantiate(
            &harness.engine,
            &module,
            &harness.imports,
            &harness.exec_config,
            "after-shutdown",
        ),
        Err(SandboxError::EngineClosed)
    ));
    assert!(matches!(
        instance.invoke("add", &[1, 2]),
        Err(SandboxError::EngineClosed)
    ));

    drop(instance);
    assert_eq!(harness.engine.live_instances(), 0);
}
