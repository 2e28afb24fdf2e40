//! Integration tests running real guests under wasmtime.
//!
//! Guests are small inline WAT modules. The asyncify guest is written by
//! hand: it keeps its state in globals and saves its one local into the
//! scratch region, the way an instrumented module would.

use std::time::Duration;

use futures::FutureExt;
use wasi_shim::wasi::{CaptureSink, ScriptedInput};
use wasi_shim::{
    AsyncifyState, HostImports, HostValue, RunOutcome, ShimConfig, ShimError, ShimInstance,
    ShimRuntime, StdioStreams, Val, ValType,
};

const HELLO_WAT: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 1024) "hello, ")
  (data (i32.const 1040) "world\npartial")
  (func (export "_start")
    (i32.store (i32.const 2048) (i32.const 1024))
    (i32.store (i32.const 2052) (i32.const 7))
    (i32.store (i32.const 2056) (i32.const 1040))
    (i32.store (i32.const 2060) (i32.const 13))
    (i32.store (i32.const 2080)
      (call $fd_write (i32.const 1) (i32.const 2048) (i32.const 2) (i32.const 2064)))))
"#;

/// Thin exports forwarding to WASI imports, so tests can drive syscalls
/// with chosen pointers.
const PROBE_WAT: &str = r#"
(module
  (import "wasi_snapshot_preview1" "args_sizes_get"
    (func $args_sizes_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "args_get"
    (func $args_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "environ_sizes_get"
    (func $environ_sizes_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "environ_get"
    (func $environ_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_fdstat_get"
    (func $fd_fdstat_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_seek"
    (func $fd_seek (param i32 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_prestat_get"
    (func $fd_prestat_get (param i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "args_sizes_get") (param i32 i32) (result i32)
    (call $args_sizes_get (local.get 0) (local.get 1)))
  (func (export "args_get") (param i32 i32) (result i32)
    (call $args_get (local.get 0) (local.get 1)))
  (func (export "environ_sizes_get") (param i32 i32) (result i32)
    (call $environ_sizes_get (local.get 0) (local.get 1)))
  (func (export "environ_get") (param i32 i32) (result i32)
    (call $environ_get (local.get 0) (local.get 1)))
  (func (export "fd_fdstat_get") (param i32 i32) (result i32)
    (call $fd_fdstat_get (local.get 0) (local.get 1)))
  (func (export "fd_seek") (param i32 i64 i32 i32) (result i32)
    (call $fd_seek (local.get 0) (local.get 1) (local.get 2) (local.get 3)))
  (func (export "fd_prestat_get") (param i32 i32) (result i32)
    (call $fd_prestat_get (local.get 0) (local.get 1))))
"#;

const ECHO_WAT: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_read"
    (func $fd_read (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "_start")
    (i32.store (i32.const 32) (i32.const 1024))
    (i32.store (i32.const 36) (i32.const 64))
    (i32.store (i32.const 12)
      (call $fd_read (i32.const 0) (i32.const 32) (i32.const 1) (i32.const 8)))
    (i32.store (i32.const 36) (i32.load (i32.const 8)))
    (drop (call $fd_write (i32.const 1) (i32.const 32) (i32.const 1) (i32.const 16))))

  ;; iovec array at the null offset
  (func (export "write_null_iovs") (result i32)
    (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 16))))
"#;

const EXIT_WAT: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 1024) "bye")
  (func (export "_start")
    (i32.store (i32.const 32) (i32.const 1024))
    (i32.store (i32.const 36) (i32.const 3))
    (drop (call $fd_write (i32.const 2) (i32.const 32) (i32.const 1) (i32.const 8)))
    (call $proc_exit (i32.const 7))
    (i32.store (i32.const 100) (i32.const 1))))
"#;

const ASYNC_WAT: &str = r#"
(module
  (import "env" "async_add" (func $async_add (param i32) (result i32)))
  (memory (export "memory") 1)
  (global $state (mut i32) (i32.const 0))
  (global $data (mut i32) (i32.const 0))
  (global $side_effects (mut i32) (i32.const 0))

  (func (export "asyncify_get_state") (result i32) (global.get $state))
  (func (export "asyncify_start_unwind") (param i32)
    (global.set $state (i32.const 1))
    (global.set $data (local.get 0)))
  (func (export "asyncify_stop_unwind") (global.set $state (i32.const 0)))
  (func (export "asyncify_start_rewind") (param i32)
    (global.set $state (i32.const 2))
    (global.set $data (local.get 0)))
  (func (export "asyncify_stop_rewind") (global.set $state (i32.const 0)))

  (func (export "side_effects") (result i32) (global.get $side_effects))

  ;; run(x) = async_add(x) + x
  (func (export "run") (param $x i32) (result i32)
    (local $r i32)
    (if (i32.eq (global.get $state) (i32.const 2))
      (then
        (local.set $x (i32.load (i32.load (global.get $data)))))
      (else
        (global.set $side_effects (i32.add (global.get $side_effects) (i32.const 1)))))
    (local.set $r (call $async_add (local.get $x)))
    (if (i32.eq (global.get $state) (i32.const 1))
      (then
        (i32.store (i32.load (global.get $data)) (local.get $x))
        (return (i32.const 0))))
    (i32.add (local.get $r) (local.get $x)))

  ;; ignores the unwind request and calls the import again
  (func (export "run_twice") (result i32)
    (drop (call $async_add (i32.const 1)))
    (call $async_add (i32.const 2))))
"#;

const PLAIN_ASYNC_WAT: &str = r#"
(module
  (import "env" "async_add" (func $async_add (param i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "run") (param i32) (result i32)
    (call $async_add (local.get 0))))
"#;

struct Captured {
    instance: ShimInstance,
    stdout: CaptureSink,
    stderr: CaptureSink,
}

fn instantiate(config: ShimConfig, wat: &str, imports: &HostImports, input: &[&str]) -> Captured {
    let runtime = ShimRuntime::new(config).expect("failed to create runtime");
    let module = runtime
        .load_module_bytes("guest", wat)
        .expect("failed to load module");
    let stdout = CaptureSink::new();
    let stderr = CaptureSink::new();
    let streams = StdioStreams::new(
        ScriptedInput::new(input.iter().copied()),
        stdout.clone(),
        stderr.clone(),
    );
    let instance = runtime
        .instantiate_with(&module, imports, streams)
        .expect("failed to instantiate");
    Captured {
        instance,
        stdout,
        stderr,
    }
}

fn read_u32(instance: &mut ShimInstance, offset: u32) -> u32 {
    let bytes = instance.read_memory(offset, 4).expect("read failed");
    u32::from_le_bytes(bytes.try_into().unwrap())
}

async fn call_i32(instance: &mut ShimInstance, name: &str, args: &[Val]) -> i32 {
    let result = instance.call(name, args).await.expect("call failed");
    result.values[0].unwrap_i32()
}

fn async_add_import(delay: Duration) -> HostImports {
    let mut imports = HostImports::new();
    imports.define(
        "env",
        "async_add",
        [ValType::I32],
        [ValType::I32],
        move |args| {
            let x = args[0].unwrap_i32();
            HostValue::Pending(
                async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, ShimError>(vec![Val::I32(x * 10)])
                }
                .boxed(),
            )
        },
    );
    imports
}

#[tokio::test]
async fn test_hello_world() {
    let mut guest = instantiate(ShimConfig::default(), HELLO_WAT, &HostImports::new(), &[]);

    let outcome = guest.instance.start().await.expect("start failed");
    assert_eq!(outcome, RunOutcome::Returned);
    assert_eq!(read_u32(&mut guest.instance, 2064), 20);
    assert_eq!(read_u32(&mut guest.instance, 2080), 0);
    // the unterminated tail is flushed when _start returns
    assert_eq!(guest.stdout.lines(), vec!["hello, world", "partial"]);
    assert!(guest.stderr.lines().is_empty());
}

#[tokio::test]
async fn test_args_and_environ() {
    let config = ShimConfig::default()
        .args(["a", "bb"])
        .env("NODE_ENV", "development");
    let mut guest = instantiate(config, PROBE_WAT, &HostImports::new(), &[]);
    let i = &mut guest.instance;

    assert_eq!(call_i32(i, "args_sizes_get", &[Val::I32(100), Val::I32(104)]).await, 0);
    assert_eq!(read_u32(i, 100), 2);
    assert_eq!(read_u32(i, 104), 5);

    assert_eq!(call_i32(i, "args_get", &[Val::I32(200), Val::I32(300)]).await, 0);
    assert_eq!(read_u32(i, 200), 300);
    assert_eq!(read_u32(i, 204), 302);
    assert_eq!(i.read_memory(300, 5).unwrap(), b"a\0bb\0");

    assert_eq!(call_i32(i, "environ_sizes_get", &[Val::I32(100), Val::I32(104)]).await, 0);
    assert_eq!(read_u32(i, 100), 1);
    assert_eq!(read_u32(i, 104), 21);

    assert_eq!(call_i32(i, "environ_get", &[Val::I32(200), Val::I32(400)]).await, 0);
    assert_eq!(i.read_memory(400, 21).unwrap(), b"NODE_ENV=development\0");

    // null pointer
    assert_eq!(call_i32(i, "args_get", &[Val::I32(0), Val::I32(300)]).await, 28);
}

#[tokio::test]
async fn test_fdstat_and_seek() {
    let mut guest = instantiate(ShimConfig::default(), PROBE_WAT, &HostImports::new(), &[]);
    let i = &mut guest.instance;

    assert_eq!(call_i32(i, "fd_fdstat_get", &[Val::I32(2), Val::I32(512)]).await, 0);
    let record = i.read_memory(512, 24).unwrap();
    assert_eq!(u16::from_le_bytes([record[0], record[1]]), 2);
    assert_eq!(u16::from_le_bytes([record[2], record[3]]), 0);
    let base = u64::from_le_bytes(record[8..16].try_into().unwrap());
    assert_eq!(base, wasi_shim::wasi::STDIO_BASE.bits());

    assert_eq!(call_i32(i, "fd_fdstat_get", &[Val::I32(9), Val::I32(512)]).await, 8);
    assert_eq!(call_i32(i, "fd_fdstat_get", &[Val::I32(1), Val::I32(65530)]).await, 21);
    assert_eq!(call_i32(i, "fd_prestat_get", &[Val::I32(3), Val::I32(512)]).await, 8);

    let fd = i.wasi_mut().fds_mut().insert_file(
        "blob",
        b"0123456789".to_vec(),
        wasi_shim::wasi::AccessMode::ReadOnly,
    );
    let seek = [Val::I32(fd as i32), Val::I64(4), Val::I32(2), Val::I32(600)];
    assert_eq!(call_i32(i, "fd_seek", &seek).await, 0);
    assert_eq!(read_u32(i, 600), 6);

    let bad_whence = [Val::I32(fd as i32), Val::I64(0), Val::I32(7), Val::I32(600)];
    assert_eq!(call_i32(i, "fd_seek", &bad_whence).await, 28);
}

#[tokio::test]
async fn test_stdin_echo() {
    let mut guest = instantiate(ShimConfig::default(), ECHO_WAT, &HostImports::new(), &["ping"]);
    guest.instance.start().await.expect("start failed");

    assert_eq!(read_u32(&mut guest.instance, 12), 0);
    assert_eq!(read_u32(&mut guest.instance, 8), 5);
    assert_eq!(guest.stdout.lines(), vec!["ping"]);
}

#[tokio::test]
async fn test_stdin_exhausted_is_canceled() {
    let mut guest = instantiate(ShimConfig::default(), ECHO_WAT, &HostImports::new(), &[]);
    guest.instance.start().await.expect("start failed");

    assert_eq!(read_u32(&mut guest.instance, 12), 11);
    assert_eq!(read_u32(&mut guest.instance, 8), 0);
    assert!(guest.stdout.lines().is_empty());
}

#[tokio::test]
async fn test_null_iovec_array_is_inval() {
    let mut guest = instantiate(ShimConfig::default(), ECHO_WAT, &HostImports::new(), &["ping"]);
    guest.instance.write_memory(16, &[0xAA; 4]).unwrap();

    assert_eq!(call_i32(&mut guest.instance, "write_null_iovs", &[]).await, 28);
    assert_eq!(read_u32(&mut guest.instance, 16), 0xAAAA_AAAA);
    assert!(guest.stdout.lines().is_empty());
}

#[tokio::test]
async fn test_proc_exit_stops_guest() {
    let mut guest = instantiate(ShimConfig::default(), EXIT_WAT, &HostImports::new(), &[]);

    let outcome = guest.instance.start().await.expect("start failed");
    assert_eq!(outcome, RunOutcome::Exited(7));
    assert_eq!(outcome.code(), 7);
    assert_eq!(guest.instance.exit_code(), Some(7));
    assert_eq!(read_u32(&mut guest.instance, 100), 0);
    assert_eq!(guest.stderr.lines(), vec!["bye"]);
}

#[tokio::test]
async fn test_proc_exit_can_return() {
    let config = ShimConfig::default().return_on_exit(false);
    let mut guest = instantiate(config, EXIT_WAT, &HostImports::new(), &[]);

    let outcome = guest.instance.start().await.expect("start failed");
    assert_eq!(outcome, RunOutcome::Returned);
    assert_eq!(guest.instance.exit_code(), Some(7));
    assert_eq!(read_u32(&mut guest.instance, 100), 1);
}

#[tokio::test]
async fn test_asyncify_round_trip() {
    let imports = async_add_import(Duration::from_millis(5));
    let mut guest = instantiate(ShimConfig::default(), ASYNC_WAT, &imports, &[]);
    let i = &mut guest.instance;

    assert!(i.is_asyncified());
    assert_eq!(read_u32(i, 16), 24);
    assert_eq!(read_u32(i, 20), 1024);

    assert_eq!(call_i32(i, "run", &[Val::I32(4)]).await, 44);
    assert_eq!(call_i32(i, "side_effects", &[]).await, 1);
    // the local was saved at the scratch start during the unwind
    assert_eq!(read_u32(i, 24), 4);

    assert_eq!(call_i32(i, "run", &[Val::I32(7)]).await, 77);
    assert_eq!(call_i32(i, "side_effects", &[]).await, 2);
    assert_eq!(call_i32(i, "asyncify_get_state", &[]).await, 0);
}

#[tokio::test]
async fn test_asyncify_ready_value_does_not_unwind() {
    let mut imports = HostImports::new();
    imports.define("env", "async_add", [ValType::I32], [ValType::I32], |args| {
        HostValue::Ready(vec![Val::I32(args[0].unwrap_i32() + 1)])
    });
    let mut guest = instantiate(ShimConfig::default(), ASYNC_WAT, &imports, &[]);

    assert_eq!(call_i32(&mut guest.instance, "run", &[Val::I32(5)]).await, 11);
    assert_eq!(read_u32(&mut guest.instance, 24), 0);
}

#[tokio::test]
async fn test_import_while_unwinding_is_fatal() {
    let imports = async_add_import(Duration::from_millis(1));
    let mut guest = instantiate(ShimConfig::default(), ASYNC_WAT, &imports, &[]);

    let err = guest.instance.call("run_twice", &[]).await.unwrap_err();
    match err {
        ShimError::AsyncifyState { expected, actual } => {
            assert_eq!(expected, AsyncifyState::None);
            assert_eq!(actual, AsyncifyState::Unwinding);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_pending_without_asyncify_is_fatal() {
    let imports = async_add_import(Duration::from_millis(1));
    let mut guest = instantiate(ShimConfig::default(), PLAIN_ASYNC_WAT, &imports, &[]);

    assert!(!guest.instance.is_asyncified());
    let err = guest.instance.call("run", &[Val::I32(1)]).await.unwrap_err();
    assert!(matches!(err, ShimError::AsyncifyProtocol(_)));
}

#[tokio::test]
async fn test_start_requires_command_module() {
    let mut guest = instantiate(ShimConfig::default(), PROBE_WAT, &HostImports::new(), &[]);
    let err = guest.instance.start().await.unwrap_err();
    assert!(matches!(err, ShimError::MissingExport(name) if name == "_start"));

    let both = r#"(module (func (export "_start")) (func (export "_initialize")))"#;
    let mut guest = instantiate(ShimConfig::default(), both, &HostImports::new(), &[]);
    let err = guest.instance.start().await.unwrap_err();
    assert!(matches!(err, ShimError::UnexpectedExport(name) if name == "_initialize"));
}
