use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

/// A shared map where every key is computed at most once.
///
/// Concurrent callers asking for the same missing key block on a per-key cell while the
/// first caller runs the initializer; the map lock itself is never held during
/// initialization, so unrelated keys are populated in parallel.
pub struct MemoizedHashMap<
  K: Send + Eq,
  V: Send + Sync + Clone,
  H: Send + Default + BuildHasher = xxhash_rust::xxh3::Xxh3Builder,
> {
  inner: RwLock<HashMap<K, Arc<OnceLock<V>>, H>>,
}

impl<K, V, H> Default for MemoizedHashMap<K, V, H>
where
  K: Send + Eq,
  V: Send + Sync + Clone,
  H: Send + Default + BuildHasher,
{
  fn default() -> Self {
    Self {
      inner: RwLock::new(HashMap::with_hasher(H::default())),
    }
  }
}

impl<K, V, H> MemoizedHashMap<K, V, H>
where
  K: Hash + Send + Eq,
  V: Send + Sync + Clone,
  H: Send + Default + BuildHasher,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the value for `key`, running `init` if no other caller has produced it yet.
  pub fn get_or_init(&self, key: K, init: impl FnOnce() -> V) -> V {
    let existing = self.inner.read().get(&key).cloned();
    let cell = match existing {
      Some(cell) => cell,
      None => self.inner.write().entry(key).or_default().clone(),
    };

    cell.get_or_init(init).clone()
  }

  /// Returns the value for `key` only when it has finished initializing.
  pub fn get<KR>(&self, key: &KR) -> Option<V>
  where
    KR: ?Sized + Eq + Hash,
    K: Borrow<KR>,
  {
    let cell = self.inner.read().get(key).cloned()?;
    cell.get().cloned()
  }

  pub fn len(&self) -> usize {
    self.inner.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.read().is_empty()
  }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{Arc, Barrier};

  use super::*;

  #[test]
  fn test_memoized_map_runs_initializer_once() {
    let map = MemoizedHashMap::<String, usize>::new();
    let calls = AtomicUsize::new(0);

    let first = map.get_or_init("key".to_string(), || {
      calls.fetch_add(1, Ordering::SeqCst);
      10
    });
    let second = map.get_or_init("key".to_string(), || {
      calls.fetch_add(1, Ordering::SeqCst);
      20
    });

    assert_eq!(first, 10);
    assert_eq!(second, 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(map.get("key"), Some(10));
  }

  #[test]
  fn test_memoized_map_concurrent_population() {
    let map = Arc::new(MemoizedHashMap::<String, usize>::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let handles = (0..8)
      .map(|_| {
        let map = map.clone();
        let calls = calls.clone();
        let barrier = barrier.clone();
        std::thread::spawn(move || {
          barrier.wait();
          map.get_or_init("shared".to_string(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            42
          })
        })
      })
      .collect::<Vec<_>>();

    for handle in handles {
      assert_eq!(handle.join().unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(map.len(), 1);
  }

  #[test]
  fn test_memoized_map_get_before_init() {
    let map = MemoizedHashMap::<String, usize>::new();
    assert_eq!(map.get("missing"), None);
    assert!(map.is_empty());
  }
}
