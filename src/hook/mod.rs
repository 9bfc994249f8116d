//! # Hook
//!
//! This module covers hooks, which redirect execution from one function to
//! another by patching the first bytes of the source function in place.
//!
//! A [`Hook`] is not internally synchronized. Concurrent lifecycle calls on
//! the same hook from multiple threads can corrupt its byte snapshots;
//! callers must serialize access, holding any external lock for the full
//! extent of [`Hook::call_through`].

use std::panic::{self, AssertUnwindSafe};

use log::{debug, error};
use thiserror::Error;

use crate::code::{stub, PointerWidth, WidthError};
use crate::mem::{self, ProtectionError};
use crate::resolve::FunctionAddress;

/// Number of prologue bytes snapshotted at first install for diagnostics
const PROLOGUE_SNAPSHOT_LEN: usize = 32;

/// Errors during hook lifecycle operations
#[derive(Debug, Error)]
pub enum HookError {
    /// A lifecycle method was invoked out of order. The hook's state is left
    /// unchanged and the call is never retried internally.
    #[error("Cannot {operation}: {required}")]
    InvalidState {
        /// The lifecycle operation that was attempted
        operation: &'static str,
        /// What must have happened before the operation is legal
        required: &'static str,
    },
    /// The OS denied the permission change on the page being patched
    #[error(transparent)]
    Protection(#[from] ProtectionError),
    /// The process pointer width has no stub encoding
    #[error(transparent)]
    Width(#[from] WidthError),
}

/// Whether the redirect stub is currently written at the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// The source currently executes its original (or restored) bytes
    Uninstalled,
    /// The source currently holds redirect bytes
    Installed,
}

/// A source→target redirect and the byte snapshots needed to undo and replay
/// it.
///
/// The hook owns one source address exclusively; a target address may be
/// shared by many hooks. Both addresses are immutable after construction and
/// are guaranteed non-null by [`FunctionAddress`].
///
/// While the hook is installed, calling the source through any path other
/// than [`Hook::call_through`] re-enters the replacement.
///
/// Dropping an installed hook restores the original bytes, so a destroyed
/// hook never leaves a live patch pointing at a target that may disappear.
pub struct Hook {
    /// Function being redirected
    source: FunctionAddress,
    /// Function the redirect transfers control to
    target: FunctionAddress,
    /// Pointer width the footprint and stub are computed for
    width: PointerWidth,
    /// Bytes present at the source before the first install; captured exactly
    /// once and never overwritten afterwards
    original: Option<Vec<u8>>,
    /// Bytes present at the source at the moment of the most recent restore;
    /// replayed verbatim by [`Hook::reinstall`]
    active: Option<Vec<u8>>,
    /// Wider prologue snapshot taken at first install, kept for diagnostics
    prologue: Option<Vec<u8>>,
    /// Current lifecycle state
    state: HookState,
}

impl Hook {
    /// Creates an uninstalled hook redirecting `source` to `target`.
    ///
    /// The addresses must already be resolved (see [`crate::resolve`]); the
    /// hook is agnostic to how they were obtained.
    pub fn new(source: FunctionAddress, target: FunctionAddress) -> Self {
        Self {
            source,
            target,
            width: PointerWidth::native(),
            original: None,
            active: None,
            prologue: None,
            state: HookState::Uninstalled,
        }
    }

    /// The function being redirected
    pub fn source(&self) -> &FunctionAddress {
        &self.source
    }

    /// The function the redirect transfers control to
    pub fn target(&self) -> &FunctionAddress {
        &self.target
    }

    /// Current lifecycle state
    pub fn state(&self) -> HookState {
        self.state
    }

    /// Whether the redirect stub is currently written at the source
    pub fn is_installed(&self) -> bool {
        self.state == HookState::Installed
    }

    /// The pristine bytes captured at first install, if any install has run
    pub fn original_bytes(&self) -> Option<&[u8]> {
        self.original.as_deref()
    }

    /// The diagnostic prologue snapshot captured at first install
    pub fn prologue(&self) -> Option<&[u8]> {
        self.prologue.as_deref()
    }

    /// Writes the redirect stub over the first footprint bytes of the source.
    ///
    /// The first install also captures the pristine original bytes and a
    /// 32-byte diagnostic prologue snapshot; re-installing after a restore
    /// never overwrites those captures.
    ///
    /// If the target's executable form must be materialized first (a
    /// just-in-time compiled body, for instance), that is the address
    /// provider's job before the hook is constructed; install does not
    /// trigger it.
    ///
    /// # Safety
    ///
    /// - the source must be readable for 32 bytes and patchable for the
    ///   footprint
    /// - the first footprint bytes at the source must form a self-contained
    ///   instruction run with no control transfer into the middle of the range
    /// - no other thread may be executing inside the patched range
    pub unsafe fn install(&mut self) -> Result<(), HookError> {
        if self.state != HookState::Uninstalled {
            return Err(HookError::InvalidState {
                operation: "install",
                required: "the hook must be uninstalled",
            });
        }

        let footprint = self.width.footprint();
        if self.original.is_none() {
            self.original = Some(mem::read_bytes(self.source.as_ptr(), footprint));
            self.prologue = Some(mem::read_bytes(self.source.as_ptr(), PROLOGUE_SNAPSHOT_LEN));
        }

        let stub = stub::encode(self.source.value(), self.target.value(), self.width);
        mem::write_protected(self.source.as_mut_ptr(), &stub)?;

        self.state = HookState::Installed;
        debug!("installed hook {} -> {}", self.source, self.target);
        Ok(())
    }

    /// Writes the pristine original bytes back over the source.
    ///
    /// Whatever bytes are live at the source right now (the stub, possibly
    /// modified since install) are captured first, so a later
    /// [`Hook::reinstall`] reproduces them without recomputation.
    ///
    /// Fails with [`HookError::InvalidState`] if no install has ever run.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Hook::install`].
    pub unsafe fn restore(&mut self) -> Result<(), HookError> {
        let original = self.original.as_ref().ok_or(HookError::InvalidState {
            operation: "restore",
            required: "install() must have captured the original bytes",
        })?;

        self.active = Some(mem::read_bytes(self.source.as_ptr(), original.len()));
        mem::write_protected(self.source.as_mut_ptr(), original)?;

        self.state = HookState::Uninstalled;
        debug!("restored original bytes of {}", self.source);
        Ok(())
    }

    /// Writes back the redirect bytes captured by the most recent restore.
    ///
    /// This is strictly a replay, never a recompute: the bytes written are
    /// exactly those that were live at the source when [`Hook::restore`] last
    /// ran.
    ///
    /// Fails with [`HookError::InvalidState`] if no restore has ever run.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Hook::install`].
    pub unsafe fn reinstall(&mut self) -> Result<(), HookError> {
        let active = self.active.as_ref().ok_or(HookError::InvalidState {
            operation: "reinstall",
            required: "restore() must have captured the redirect bytes",
        })?;

        mem::write_protected(self.source.as_mut_ptr(), active)?;

        self.state = HookState::Installed;
        debug!("reinstalled hook {} -> {}", self.source, self.target);
        Ok(())
    }

    /// Invokes the original body of the source while the hook remains
    /// logically installed.
    ///
    /// The hook is restored, `invoke` is called with the source address (cast
    /// it to the original function's type and call it), and the hook is
    /// reinstalled regardless of whether `invoke` returned or unwound. A
    /// panic from `invoke` resumes only after the reinstall completed, so the
    /// hook always returns to its pre-call state.
    ///
    /// Between the internal restore and reinstall the source is unpatched
    /// process-wide: any other thread calling it during that window observes
    /// original behavior. This is inherent to in-place patching without a
    /// relocated prologue copy.
    ///
    /// This is the only sanctioned way to reach original behavior while the
    /// hook is installed; calling the source through any other path recurses
    /// into the replacement.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Hook::install`]; additionally `invoke` must
    /// only call the source through an ABI-correct function type.
    pub unsafe fn call_through<R>(
        &mut self,
        invoke: impl FnOnce(*const u8) -> R,
    ) -> Result<R, HookError> {
        if self.state != HookState::Installed {
            return Err(HookError::InvalidState {
                operation: "call through",
                required: "the hook must be installed",
            });
        }

        self.restore()?;

        let source = self.source.as_ptr();
        let result = panic::catch_unwind(AssertUnwindSafe(|| invoke(source)));
        let reinstalled = self.reinstall();

        match result {
            Ok(value) => {
                reinstalled?;
                Ok(value)
            }
            Err(payload) => {
                if let Err(err) = reinstalled {
                    error!(
                        "reinstall of {} failed while propagating a panic from the original: {err}",
                        self.source
                    );
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

impl Drop for Hook {
    fn drop(&mut self) {
        if self.state == HookState::Installed {
            // A dropped hook must not leave a live patch behind.
            if let Err(err) = unsafe { self.restore() } {
                error!("failed to restore {} while dropping its hook: {err}", self.source);
            }
        }
    }
}
