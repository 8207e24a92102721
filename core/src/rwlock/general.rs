//! Composite read-write lock: mutex, two condition variables, two packed
//! state words.
//!
//! The `active` word packs the writer-present count (bits 15..30) and the
//! active reader count (bits 0..15); the `waiting` word packs the queued
//! writer and queued reader counts the same way. Writer preference: a
//! releasing writer signals a queued writer if one exists, and broadcasts
//! to queued readers only otherwise; a releasing last reader signals a
//! queued writer.

use core::cell::UnsafeCell;

use crate::condvar::Condvar;
use crate::error::SysResult;
use crate::mutex::Mutex;

const READER_MASK: u32 = 0x0000_7FFF;
const WRITER_MASK: u32 = 0x3FFF_8000;
const WRITER_SHIFT: u32 = 15;

fn reader_count(word: u32) -> u32 {
    word & READER_MASK
}

fn with_readers(word: u32, count: u32) -> u32 {
    (word & !READER_MASK) | count
}

fn writer_count(word: u32) -> u32 {
    (word & WRITER_MASK) >> WRITER_SHIFT
}

fn with_writers(word: u32, count: u32) -> u32 {
    (word & !WRITER_MASK) | (count << WRITER_SHIFT)
}

pub(super) struct GeneralRwLock {
    mutex: Mutex,
    read_cv: Condvar,
    write_cv: Condvar,
    active: UnsafeCell<u32>,
    waiting: UnsafeCell<u32>,
}

// SAFETY: the state words are only touched while the mutex is held.
unsafe impl Send for GeneralRwLock {}
unsafe impl Sync for GeneralRwLock {}

impl core::fmt::Debug for GeneralRwLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GeneralRwLock").finish_non_exhaustive()
    }
}

impl GeneralRwLock {
    pub(super) fn new() -> SysResult<GeneralRwLock> {
        Ok(GeneralRwLock {
            mutex: Mutex::new()?,
            read_cv: Condvar::new()?,
            write_cv: Condvar::new()?,
            active: UnsafeCell::new(0),
            waiting: UnsafeCell::new(0),
        })
    }

    // State-word accessors; valid only while the mutex is held. References
    // never live across a condvar wait.
    fn active(&self) -> u32 {
        unsafe { *self.active.get() }
    }

    fn set_active(&self, word: u32) {
        unsafe { *self.active.get() = word };
    }

    fn waiting(&self) -> u32 {
        unsafe { *self.waiting.get() }
    }

    fn set_waiting(&self, word: u32) {
        unsafe { *self.waiting.get() = word };
    }

    pub(super) fn reader_lock(&self) -> bool {
        if !self.mutex.lock() {
            log::error!("RwLock::reader_lock: lock() failed");
            return false;
        }

        let mut wait_ok = true;
        if writer_count(self.active()) != 0 {
            self.set_waiting(with_readers(
                self.waiting(),
                reader_count(self.waiting()) + 1,
            ));
            while writer_count(self.active()) != 0 {
                wait_ok = self.read_cv.wait(&self.mutex);
                if !wait_ok {
                    log::error!("RwLock::reader_lock: wait() failed");
                    break;
                }
            }
            self.set_waiting(with_readers(
                self.waiting(),
                reader_count(self.waiting()) - 1,
            ));
        }

        if wait_ok {
            self.set_active(with_readers(self.active(), reader_count(self.active()) + 1));
        }

        if !self.mutex.unlock() {
            log::error!("RwLock::reader_lock: unlock() failed");
            return false;
        }
        wait_ok
    }

    pub(super) fn reader_trylock(&self) -> bool {
        if !self.mutex.lock() {
            log::error!("RwLock::reader_trylock: lock() failed");
            return false;
        }

        if writer_count(self.active()) != 0 {
            if !self.mutex.unlock() {
                log::error!("RwLock::reader_trylock: unlock() failed");
            }
            return false;
        }

        self.set_active(with_readers(self.active(), reader_count(self.active()) + 1));

        if !self.mutex.unlock() {
            log::error!("RwLock::reader_trylock: unlock() failed");
            return false;
        }
        true
    }

    pub(super) fn reader_unlock(&self) -> bool {
        if !self.mutex.lock() {
            log::error!("RwLock::reader_unlock: lock() failed");
            return false;
        }

        let readers = reader_count(self.active());
        if readers == 0 {
            if !self.mutex.unlock() {
                log::error!("RwLock::reader_unlock: unlock() failed");
            }
            return true;
        }

        self.set_active(with_readers(self.active(), readers - 1));

        let mut signal_ok = true;
        if readers == 1 && writer_count(self.waiting()) != 0 {
            signal_ok = self.write_cv.signal();
            if !signal_ok {
                log::error!("RwLock::reader_unlock: signal() failed");
            }
        }

        if !self.mutex.unlock() {
            log::error!("RwLock::reader_unlock: unlock() failed");
            return false;
        }
        signal_ok
    }

    pub(super) fn writer_lock(&self) -> bool {
        if !self.mutex.lock() {
            log::error!("RwLock::writer_lock: lock() failed");
            return false;
        }

        let mut wait_ok = true;
        if self.active() != 0 {
            self.set_waiting(with_writers(
                self.waiting(),
                writer_count(self.waiting()) + 1,
            ));
            while self.active() != 0 {
                wait_ok = self.write_cv.wait(&self.mutex);
                if !wait_ok {
                    log::error!("RwLock::writer_lock: wait() failed");
                    break;
                }
            }
            self.set_waiting(with_writers(
                self.waiting(),
                writer_count(self.waiting()) - 1,
            ));
        }

        if wait_ok {
            self.set_active(with_writers(self.active(), 1));
        }

        if !self.mutex.unlock() {
            log::error!("RwLock::writer_lock: unlock() failed");
            return false;
        }
        wait_ok
    }

    pub(super) fn writer_trylock(&self) -> bool {
        if !self.mutex.lock() {
            log::error!("RwLock::writer_trylock: lock() failed");
            return false;
        }

        if self.active() != 0 {
            if !self.mutex.unlock() {
                log::error!("RwLock::writer_trylock: unlock() failed");
            }
            return false;
        }

        self.set_active(with_writers(self.active(), 1));

        if !self.mutex.unlock() {
            log::error!("RwLock::writer_trylock: unlock() failed");
            return false;
        }
        true
    }

    pub(super) fn writer_unlock(&self) -> bool {
        if !self.mutex.lock() {
            log::error!("RwLock::writer_unlock: lock() failed");
            return false;
        }

        self.set_active(with_writers(self.active(), 0));

        let mut signal_ok = true;
        if writer_count(self.waiting()) != 0 {
            // Writer preference: a queued writer goes before queued readers.
            if !self.write_cv.signal() {
                log::error!("RwLock::writer_unlock: signal() failed");
                signal_ok = false;
            }
        } else if reader_count(self.waiting()) != 0 {
            if !self.read_cv.broadcast() {
                log::error!("RwLock::writer_unlock: broadcast() failed");
                signal_ok = false;
            }
        }

        if !self.mutex.unlock() {
            log::error!("RwLock::writer_unlock: unlock() failed");
            return false;
        }
        signal_ok
    }
}

impl Drop for GeneralRwLock {
    fn drop(&mut self) {
        // Unsynchronized reads: at drop the caller owes us exclusivity.
        if unsafe { *self.active.get() } != 0 {
            log::warn!("RwLock: destroying while threads hold the lock");
        }
        if unsafe { *self.waiting.get() } != 0 {
            log::warn!("RwLock: destroying while threads wait on the lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use std::sync::Arc;

    #[test]
    fn packed_word_helpers() {
        let word = with_readers(with_writers(0, 1), 5);
        assert_eq!(reader_count(word), 5);
        assert_eq!(writer_count(word), 1);
        assert_eq!(reader_count(with_readers(word, 0)), 0);
        assert_eq!(writer_count(with_writers(word, 0)), 0);
    }

    #[test]
    fn trylock_honors_active_state() {
        test_support::init();
        let lock = GeneralRwLock::new().expect("lock creation failed");

        assert!(lock.reader_trylock());
        assert!(!lock.writer_trylock());
        assert!(lock.reader_unlock());

        assert!(lock.writer_trylock());
        assert!(!lock.reader_trylock());
        assert!(!lock.writer_trylock());
        assert!(lock.writer_unlock());
    }

    #[test]
    fn queued_writer_blocks_new_readers_until_released() {
        test_support::init();

        let lock = Arc::new(GeneralRwLock::new().expect("lock creation failed"));
        assert!(lock.reader_lock());

        let writer_lock = Arc::clone(&lock);
        let writer = std::thread::spawn(move || {
            assert!(writer_lock.writer_lock());
            assert!(writer_lock.writer_unlock());
        });

        // Give the writer time to queue, then release it.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(lock.reader_unlock());
        writer.join().unwrap();

        assert!(lock.reader_trylock());
        assert!(lock.reader_unlock());
    }
}
