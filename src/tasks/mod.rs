pub mod channel;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod info;
pub mod job;
pub mod promise;
pub mod root;
pub mod state;
pub mod task;
pub mod work;

#[cfg(test)]
mod integration_tests;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Poisoning only happens while a panicking hook is being contained; the data
// behind these locks stays consistent, so recover the guard instead of
// surfacing the poison to every caller.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
