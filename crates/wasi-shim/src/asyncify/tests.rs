//! Protocol tests against a guest simulated in plain Rust.

use super::*;
use futures::executor::block_on;
use futures::FutureExt;

/// Stands in for an instrumented guest. `run` keeps a local across one
/// import call and counts a side effect that must not be replayed.
struct FakeGuest {
    state: AsyncifyState,
    asyncify: Asyncify<i32>,
    side_effects: u32,
    calls: u32,
    saved: Option<u32>,
    log: Vec<&'static str>,
}

impl FakeGuest {
    fn new() -> Self {
        Self {
            state: AsyncifyState::None,
            asyncify: Asyncify::new(AsyncifyConfig::default()),
            side_effects: 0,
            calls: 0,
            saved: None,
            log: Vec::new(),
        }
    }

    /// Guest body. `import` is what the host import produces.
    fn run(&mut self, import: impl FnOnce() -> HostValue<i32>) -> Result<i32> {
        self.calls += 1;
        let local = if self.state == AsyncifyState::Rewinding {
            self.saved.take().unwrap_or_default()
        } else {
            self.side_effects += 1;
            7
        };

        let value = intercept_import(self, |_| Ok(import()))?;
        match value {
            Some(value) => Ok(value + local as i32),
            None => {
                self.saved = Some(local);
                Ok(-1)
            }
        }
    }
}

impl AsyncifyHost for FakeGuest {
    type Value = i32;

    fn state(&mut self) -> Result<AsyncifyState> {
        Ok(self.state)
    }

    fn start_unwind(&mut self, data_ptr: u32) -> Result<()> {
        assert_eq!(data_ptr, 16);
        self.log.push("start_unwind");
        self.state = AsyncifyState::Unwinding;
        Ok(())
    }

    fn stop_unwind(&mut self) -> Result<()> {
        self.log.push("stop_unwind");
        self.state = AsyncifyState::None;
        Ok(())
    }

    fn start_rewind(&mut self, data_ptr: u32) -> Result<()> {
        assert_eq!(data_ptr, 16);
        self.log.push("start_rewind");
        self.state = AsyncifyState::Rewinding;
        Ok(())
    }

    fn stop_rewind(&mut self) -> Result<()> {
        self.log.push("stop_rewind");
        self.state = AsyncifyState::None;
        Ok(())
    }

    fn asyncify(&mut self) -> &mut Asyncify<i32> {
        &mut self.asyncify
    }
}

#[test]
fn test_state_from_raw() {
    assert_eq!(AsyncifyState::try_from(0).unwrap(), AsyncifyState::None);
    assert_eq!(AsyncifyState::try_from(1).unwrap(), AsyncifyState::Unwinding);
    assert_eq!(AsyncifyState::try_from(2).unwrap(), AsyncifyState::Rewinding);
    assert!(matches!(
        AsyncifyState::try_from(3),
        Err(ShimError::AsyncifyProtocol(_))
    ));
}

#[test]
fn test_ready_value_passes_through() {
    let mut guest = FakeGuest::new();
    let ret = block_on(drive_export(&mut guest, |g| g.run(|| HostValue::Ready(35)))).unwrap();
    assert_eq!(ret, 42);
    assert_eq!(guest.calls, 1);
    assert!(guest.log.is_empty());
    assert!(guest.asyncify.is_idle());
}

#[test]
fn test_pending_value_unwinds_and_rewinds() {
    let mut guest = FakeGuest::new();
    let ret = block_on(drive_export(&mut guest, |g| {
        g.run(|| HostValue::Pending(async { Ok::<_, ShimError>(35) }.boxed()))
    }))
    .unwrap();

    assert_eq!(ret, 42);
    assert_eq!(guest.calls, 2);
    assert_eq!(guest.side_effects, 1);
    assert_eq!(
        guest.log,
        vec!["start_unwind", "stop_unwind", "start_rewind", "stop_rewind"]
    );
    assert_eq!(guest.state, AsyncifyState::None);
    assert!(guest.asyncify.is_idle());
}

#[test]
fn test_pending_error_surfaces() {
    let mut guest = FakeGuest::new();
    let err = block_on(drive_export(&mut guest, |g| {
        g.run(|| {
            HostValue::Pending(async { Err::<i32, _>(ShimError::Trap("timer failed".into())) }.boxed())
        })
    }))
    .unwrap_err();
    assert!(matches!(err, ShimError::Trap(msg) if msg == "timer failed"));
    assert_eq!(guest.calls, 1);
}

#[test]
fn test_import_while_unwinding_is_fatal() {
    let mut guest = FakeGuest::new();
    let err = block_on(drive_export(&mut guest, |g| {
        g.run(|| HostValue::Pending(async { Ok::<_, ShimError>(1) }.boxed()))?;
        // a second import before the guest returns
        g.run(|| HostValue::Pending(async { Ok::<_, ShimError>(2) }.boxed()))
    }))
    .unwrap_err();

    match err {
        ShimError::AsyncifyState { expected, actual } => {
            assert_eq!(expected, AsyncifyState::None);
            assert_eq!(actual, AsyncifyState::Unwinding);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_second_stash_is_rejected() {
    let mut slot: Asyncify<i32> = Asyncify::new(AsyncifyConfig::default());
    slot.stash_pending(async { Ok::<_, ShimError>(1) }.boxed()).unwrap();
    assert!(matches!(
        slot.stash_pending(async { Ok::<_, ShimError>(2) }.boxed()),
        Err(ShimError::AsyncifyProtocol(_))
    ));
}

#[test]
fn test_export_must_start_idle() {
    let mut guest = FakeGuest::new();
    guest.state = AsyncifyState::Rewinding;
    let err = block_on(drive_export(&mut guest, |g| g.run(|| HostValue::Ready(0)))).unwrap_err();
    assert!(matches!(
        err,
        ShimError::AsyncifyState {
            expected: AsyncifyState::None,
            actual: AsyncifyState::Rewinding,
        }
    ));
    assert_eq!(guest.calls, 0);
}

#[test]
fn test_write_bounds() {
    let slot: Asyncify<i32> = Asyncify::new(AsyncifyConfig::default());
    let mut bytes = vec![0u8; 64];
    let mut mem = GuestMemory::new(&mut bytes);
    slot.write_bounds(&mut mem).unwrap();
    assert_eq!(&bytes[16..20], &24u32.to_le_bytes());
    assert_eq!(&bytes[20..24], &1024u32.to_le_bytes());

    let mut tiny = vec![0u8; 8];
    let mut mem = GuestMemory::new(&mut tiny);
    assert!(slot.write_bounds(&mut mem).is_err());
}
