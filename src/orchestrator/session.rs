//! 用户会话 - 编排层
//!
//! 记录每个用户当前批次的阶段，保证同一用户同时最多一个批次，
//! 并在批次进行中把 /clear 延迟到批次结束。

use crate::models::batch::BatchPhase;
use crate::models::chapter::UserId;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct SessionState {
    phase: BatchPhase,
    in_flight: bool,
    pending_clear: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: BatchPhase::Idle,
            in_flight: false,
            pending_clear: false,
        }
    }
}

/// 单个用户的会话
#[derive(Debug, Default)]
pub struct UserSession {
    state: Mutex<SessionState>,
}

impl UserSession {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 开始一个批次；已有批次在进行时返回 None，状态不变
    pub fn try_begin(self: &Arc<Self>) -> Option<BatchGuard> {
        let mut state = self.lock();
        if state.in_flight {
            return None;
        }
        state.in_flight = true;
        state.pending_clear = false;
        state.phase = BatchPhase::Idle;
        Some(BatchGuard {
            session: Arc::clone(self),
            finished: false,
        })
    }

    /// 正在进行的批次所处阶段
    pub fn phase(&self) -> Option<BatchPhase> {
        let state = self.lock();
        state.in_flight.then_some(state.phase)
    }

    /// 没有批次时在锁内立即执行 `clear_now`；有批次时记下延迟清空并返回 None
    pub fn clear_or_defer<T>(&self, clear_now: impl FnOnce() -> T) -> Option<T> {
        let mut state = self.lock();
        if state.in_flight {
            state.pending_clear = true;
            None
        } else {
            Some(clear_now())
        }
    }
}

/// 批次令牌，持有期间该用户不能开始新批次
///
/// 正常结束走 `try_finish`；提前 drop 时直接回到空闲并丢弃未处理的延迟清空。
#[derive(Debug)]
pub struct BatchGuard {
    session: Arc<UserSession>,
    finished: bool,
}

impl BatchGuard {
    pub fn set_phase(&self, phase: BatchPhase) {
        self.session.lock().phase = phase;
    }

    /// 取走延迟清空标记
    pub fn take_pending_clear(&self) -> bool {
        std::mem::take(&mut self.session.lock().pending_clear)
    }

    /// 没有新的延迟清空时释放批次并返回 true；否则返回 false，调用方需先处理清空
    pub fn try_finish(&mut self) -> bool {
        let mut state = self.session.lock();
        if state.pending_clear {
            return false;
        }
        state.in_flight = false;
        state.phase = BatchPhase::Idle;
        self.finished = true;
        true
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.session.lock();
        state.in_flight = false;
        state.pending_clear = false;
        state.phase = BatchPhase::Idle;
    }
}

/// 所有用户的会话
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, Arc<UserSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, user: UserId) -> Arc<UserSession> {
        self.sessions.entry(user).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_rejected() {
        let registry = SessionRegistry::new();
        let session = registry.session(UserId(1));

        let mut guard = session.try_begin().unwrap();
        assert!(session.try_begin().is_none());
        // 其他用户不受影响
        assert!(registry.session(UserId(2)).try_begin().is_some());

        assert!(guard.try_finish());
        assert!(session.try_begin().is_some());
    }

    #[test]
    fn test_phase_visible_only_while_in_flight() {
        let session = SessionRegistry::new().session(UserId(1));
        assert_eq!(session.phase(), None);

        let guard = session.try_begin().unwrap();
        guard.set_phase(BatchPhase::Converting);
        assert_eq!(session.phase(), Some(BatchPhase::Converting));

        drop(guard);
        assert_eq!(session.phase(), None);
    }

    #[test]
    fn test_clear_deferred_while_in_flight() {
        let session = SessionRegistry::new().session(UserId(1));
        assert_eq!(session.clear_or_defer(|| 3), Some(3));

        let mut guard = session.try_begin().unwrap();
        assert_eq!(session.clear_or_defer(|| 3), None);

        // 有未处理的延迟清空时不能结束
        assert!(!guard.try_finish());
        assert!(guard.take_pending_clear());
        assert!(!guard.take_pending_clear());
        assert!(guard.try_finish());
        assert_eq!(session.clear_or_defer(|| 0), Some(0));
    }

    #[test]
    fn test_finished_guard_drop_does_not_touch_next_batch() {
        let session = SessionRegistry::new().session(UserId(1));
        let mut first = session.try_begin().unwrap();
        assert!(first.try_finish());

        let second = session.try_begin().unwrap();
        second.set_phase(BatchPhase::Merging);
        drop(first);

        assert_eq!(session.phase(), Some(BatchPhase::Merging));
    }
}
