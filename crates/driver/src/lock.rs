//! Keyed, non-blocking mutual exclusion for in-flight operations.

use pd_csi_proto::Error;
use std::{
  collections::HashSet,
  fmt,
  sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
  /// Create, delete and expand of a volume.
  Volume(String),
  /// Attach and detach of a volume to one node.
  Attachment { volume: String, node: String },
  Snapshot(String),
  /// Node side operations on a volume.
  NodeVolume(String),
}

impl fmt::Display for LockKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LockKey::Volume(id) => write!(f, "volume {}", id),
      LockKey::Attachment { volume, node } => write!(f, "volume {} on node {}", volume, node),
      LockKey::Snapshot(id) => write!(f, "snapshot {}", id),
      LockKey::NodeVolume(id) => write!(f, "node volume {}", id),
    }
  }
}

/// Set of keys with an operation in flight. Cloning shares the set.
#[derive(Clone, Default)]
pub struct OperationLocks(Arc<Mutex<HashSet<LockKey>>>);

impl OperationLocks {
  pub fn new() -> Self {
    Self::default()
  }

  fn keys(&self) -> MutexGuard<'_, HashSet<LockKey>> {
    // the set stays consistent even if a holder panicked
    self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Takes `key`, or returns `None` when it is already held. Never waits.
  pub fn try_acquire(&self, key: LockKey) -> Option<OperationGuard> {
    if !self.keys().insert(key.clone()) {
      return None;
    }

    debug!(%key, "acquired operation lock");
    Some(OperationGuard {
      locks: self.clone(),
      key,
    })
  }

  /// Like [OperationLocks::try_acquire], failing with `ABORTED` when busy.
  pub fn acquire(&self, key: LockKey) -> Result<OperationGuard, Error> {
    let display = key.to_string();
    self.try_acquire(key).ok_or_else(|| {
      Error::Aborted(format!(
        "An operation on {} is already in progress",
        display
      ))
    })
  }

  pub fn is_held(&self, key: &LockKey) -> bool {
    self.keys().contains(key)
  }
}

/// Releases its key when dropped, on every exit path.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct OperationGuard {
  locks: OperationLocks,
  key: LockKey,
}

impl OperationGuard {
  #[inline]
  pub fn key(&self) -> &LockKey {
    &self.key
  }
}

impl Drop for OperationGuard {
  fn drop(&mut self) {
    self.locks.keys().remove(&self.key);
    debug!(key = %self.key, "released operation lock");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{sync::Barrier, thread};

  fn volume(id: &str) -> LockKey {
    LockKey::Volume(id.into())
  }

  #[test]
  fn second_acquire_fails_until_release() {
    let locks = OperationLocks::new();

    let guard = locks.try_acquire(volume("a")).expect("first acquire");
    assert!(locks.try_acquire(volume("a")).is_none());
    assert!(locks.is_held(&volume("a")));

    drop(guard);
    assert!(!locks.is_held(&volume("a")));
    assert!(locks.try_acquire(volume("a")).is_some());
  }

  #[test]
  fn distinct_keys_do_not_conflict() {
    let locks = OperationLocks::new();

    let _a = locks.try_acquire(volume("a")).unwrap();
    let _b = locks.try_acquire(volume("b")).unwrap();
    let _attach = locks
      .try_acquire(LockKey::Attachment {
        volume: "a".into(),
        node: "n".into(),
      })
      .unwrap();
    let _node = locks.try_acquire(LockKey::NodeVolume("a".into())).unwrap();
  }

  #[test]
  fn busy_key_is_aborted() {
    let locks = OperationLocks::new();
    let _guard = locks.acquire(LockKey::Snapshot("s".into())).unwrap();

    match locks.acquire(LockKey::Snapshot("s".into())) {
      Err(Error::Aborted(msg)) => assert!(msg.contains("snapshot s")),
      other => panic!("unexpected {:?}", other.map(|g| g.key().clone())),
    }
  }

  #[test]
  fn released_when_holder_panics() {
    let locks = OperationLocks::new();
    let shared = locks.clone();

    let result = thread::spawn(move || {
      let _guard = shared.try_acquire(volume("a")).unwrap();
      panic!("boom");
    })
    .join();

    assert!(result.is_err());
    assert!(!locks.is_held(&volume("a")));
  }

  #[test]
  fn exactly_one_concurrent_winner() {
    const THREADS: usize = 8;
    let locks = OperationLocks::new();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
      .map(|_| {
        let locks = locks.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
          barrier.wait();
          let guard = locks.try_acquire(volume("contended"));
          // hold until everybody tried
          barrier.wait();
          guard.is_some()
        })
      })
      .collect();

    let winners = handles
      .into_iter()
      .map(|h| h.join().unwrap())
      .filter(|won| *won)
      .count();

    assert_eq!(winners, 1);
  }
}
