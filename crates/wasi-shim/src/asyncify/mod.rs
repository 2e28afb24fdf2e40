//! Suspend/resume engine for asyncify-instrumented guests.
//!
//! An asyncify guest cannot block, so a host import that needs to wait asks
//! the guest to unwind its stack into a scratch region, the host awaits the
//! real value, and the guest is then rewound into the same import call,
//! which now returns the value immediately.
//!
//! The protocol is written once against [`AsyncifyHost`]. The wasmtime glue
//! implements it for the store and for import callers; tests implement it
//! for plain in-memory guests.

use crate::config::AsyncifyConfig;
use crate::error::{Result, ShimError};
use crate::wasi::GuestMemory;
use futures::future::BoxFuture;
use std::fmt;

#[cfg(test)]
mod tests;

/// Exports through which the host drives the guest's asyncify state.
///
/// These are never wrapped themselves.
pub const CONTROL_EXPORTS: [&str; 5] = [
    "asyncify_get_state",
    "asyncify_start_unwind",
    "asyncify_stop_unwind",
    "asyncify_start_rewind",
    "asyncify_stop_rewind",
];

/// Guest asyncify state, as returned by `asyncify_get_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncifyState {
    /// Running normally.
    None = 0,
    /// Saving frames on the way out.
    Unwinding = 1,
    /// Restoring frames on the way back in.
    Rewinding = 2,
}

impl TryFrom<i32> for AsyncifyState {
    type Error = ShimError;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(AsyncifyState::None),
            1 => Ok(AsyncifyState::Unwinding),
            2 => Ok(AsyncifyState::Rewinding),
            other => Err(ShimError::AsyncifyProtocol(format!(
                "unknown asyncify state {other}"
            ))),
        }
    }
}

/// A host value that is not available yet.
pub type PendingValue<V> = BoxFuture<'static, Result<V>>;

/// Result of a host import.
pub enum HostValue<V> {
    /// Available now; handed straight back to the guest.
    Ready(V),
    /// Must be awaited; the guest is unwound until it resolves.
    Pending(PendingValue<V>),
}

impl<V: fmt::Debug> fmt::Debug for HostValue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            HostValue::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

enum Stash<V> {
    Empty,
    Pending(PendingValue<V>),
    Resolved(V),
}

/// Per-instance bookkeeping: where the scratch bounds live and the one
/// value in flight.
pub struct Asyncify<V> {
    config: AsyncifyConfig,
    stash: Stash<V>,
}

impl<V> Asyncify<V> {
    /// Create the bookkeeping for the given scratch placement.
    pub fn new(config: AsyncifyConfig) -> Self {
        Self {
            config,
            stash: Stash::Empty,
        }
    }

    /// Address handed to `asyncify_start_unwind`/`asyncify_start_rewind`.
    pub fn data_ptr(&self) -> u32 {
        self.config.data_ptr
    }

    /// Write the `[start, end)` scratch bounds at `data_ptr`.
    pub fn write_bounds(&self, mem: &mut GuestMemory<'_>) -> Result<()> {
        let AsyncifyConfig {
            data_ptr,
            unwind_start,
            unwind_end,
        } = self.config;
        mem.write_u32(data_ptr, unwind_start)
            .and_then(|_| mem.write_u32(data_ptr + 4, unwind_end))
            .map_err(|errno| {
                ShimError::AsyncifyProtocol(format!(
                    "cannot write scratch bounds at {data_ptr}: {errno}"
                ))
            })
    }

    /// Whether no value is stashed.
    pub fn is_idle(&self) -> bool {
        matches!(self.stash, Stash::Empty)
    }

    fn stash_pending(&mut self, pending: PendingValue<V>) -> Result<()> {
        if !self.is_idle() {
            return Err(ShimError::AsyncifyProtocol(
                "a host value is already in flight".into(),
            ));
        }
        self.stash = Stash::Pending(pending);
        Ok(())
    }

    fn take_pending(&mut self) -> Result<PendingValue<V>> {
        match std::mem::replace(&mut self.stash, Stash::Empty) {
            Stash::Pending(pending) => Ok(pending),
            other => {
                self.stash = other;
                Err(ShimError::AsyncifyProtocol(
                    "guest unwound without a pending host value".into(),
                ))
            }
        }
    }

    fn take_resolved(&mut self) -> Result<V> {
        match std::mem::replace(&mut self.stash, Stash::Empty) {
            Stash::Resolved(value) => Ok(value),
            other => {
                self.stash = other;
                Err(ShimError::AsyncifyProtocol(
                    "guest rewound without a resolved host value".into(),
                ))
            }
        }
    }
}

impl<V> fmt::Debug for Asyncify<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stash = match self.stash {
            Stash::Empty => "empty",
            Stash::Pending(_) => "pending",
            Stash::Resolved(_) => "resolved",
        };
        f.debug_struct("Asyncify")
            .field("config", &self.config)
            .field("stash", &stash)
            .finish()
    }
}

/// Access to a guest's asyncify controls and the instance's bookkeeping.
pub trait AsyncifyHost {
    /// Value type carried across a suspension.
    type Value;

    /// Current guest state.
    fn state(&mut self) -> Result<AsyncifyState>;

    /// `asyncify_start_unwind(data_ptr)`
    fn start_unwind(&mut self, data_ptr: u32) -> Result<()>;

    /// `asyncify_stop_unwind()`
    fn stop_unwind(&mut self) -> Result<()>;

    /// `asyncify_start_rewind(data_ptr)`
    fn start_rewind(&mut self, data_ptr: u32) -> Result<()>;

    /// `asyncify_stop_rewind()`
    fn stop_rewind(&mut self) -> Result<()>;

    /// The instance's bookkeeping.
    fn asyncify(&mut self) -> &mut Asyncify<Self::Value>;
}

fn expect_state<H: AsyncifyHost + ?Sized>(host: &mut H, expected: AsyncifyState) -> Result<()> {
    let actual = host.state()?;
    if actual != expected {
        return Err(ShimError::AsyncifyState { expected, actual });
    }
    Ok(())
}

/// Run a host import under the protocol.
///
/// Returns `Some(value)` for the guest, or `None` once unwinding has begun,
/// in which case whatever the import returns is ignored by the guest.
pub fn intercept_import<H, F>(host: &mut H, call: F) -> Result<Option<H::Value>>
where
    H: AsyncifyHost + ?Sized,
    F: FnOnce(&mut H) -> Result<HostValue<H::Value>>,
{
    if host.state()? == AsyncifyState::Rewinding {
        host.stop_rewind()?;
        let value = host.asyncify().take_resolved()?;
        tracing::debug!("asyncify: rewound into import");
        return Ok(Some(value));
    }

    expect_state(host, AsyncifyState::None)?;
    match call(host)? {
        HostValue::Ready(value) => Ok(Some(value)),
        HostValue::Pending(pending) => {
            host.asyncify().stash_pending(pending)?;
            let data_ptr = host.asyncify().data_ptr();
            host.start_unwind(data_ptr)?;
            tracing::debug!("asyncify: unwinding for pending host value");
            Ok(None)
        }
    }
}

/// Run a guest export under the protocol.
///
/// `call` invokes the export. While the guest comes back unwinding, the
/// stashed value is awaited and the export is invoked again to rewind.
pub async fn drive_export<H, R, F>(host: &mut H, mut call: F) -> Result<R>
where
    H: AsyncifyHost + ?Sized,
    F: FnMut(&mut H) -> Result<R>,
{
    expect_state(host, AsyncifyState::None)?;
    let mut ret = call(host)?;

    while host.state()? == AsyncifyState::Unwinding {
        host.stop_unwind()?;
        let pending = host.asyncify().take_pending()?;
        let value = pending.await?;
        host.asyncify().stash = Stash::Resolved(value);

        expect_state(host, AsyncifyState::None)?;
        let data_ptr = host.asyncify().data_ptr();
        host.start_rewind(data_ptr)?;
        tracing::debug!("asyncify: rewinding export");
        ret = call(host)?;
    }

    expect_state(host, AsyncifyState::None)?;
    Ok(ret)
}
