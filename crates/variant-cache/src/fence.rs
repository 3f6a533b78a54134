use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Pending,
    Succeeded,
    Failed,
}

///Signalled once a variant finished compiling, successfully or not.
///
/// Threads that find a variant another thread is still compiling block on [CompileFence::wait].
pub struct CompileFence {
    state: Mutex<FenceState>,
    waiter: Condvar,
}

impl Default for CompileFence {
    fn default() -> Self {
        Self::new()
    }
}

impl CompileFence {
    pub fn new() -> Self {
        CompileFence {
            state: Mutex::new(FenceState::Pending),
            waiter: Condvar::new(),
        }
    }

    ///Creates an already signalled fence.
    pub fn signalled(success: bool) -> Self {
        let fence = Self::new();
        fence.signal(success);
        fence
    }

    pub fn signal(&self, success: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != FenceState::Pending {
            log::warn!("compile fence signalled twice");
            return;
        }
        *state = if success {
            FenceState::Succeeded
        } else {
            FenceState::Failed
        };
        self.waiter.notify_all();
    }

    ///Blocks until signalled. Returns whether the compile succeeded.
    pub fn wait(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self
            .waiter
            .wait_while(state, |s| *s == FenceState::Pending)
            .unwrap_or_else(PoisonError::into_inner);
        *state == FenceState::Succeeded
    }

    pub fn is_signalled(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) != FenceState::Pending
    }
}
