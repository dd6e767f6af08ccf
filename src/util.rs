use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock ignoring poison; every guarded value here stays valid if a holder panics.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
