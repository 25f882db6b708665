use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

/// A convenience type alias for [Arc<RwLock<T>>].
///
/// All IR objects (ops, blocks, regions, values, and types) are shared via
/// this alias since the IR is a graph with back-pointers to parents.
///
/// # Example
///
/// ```
/// use torchc::shared::Shared;
///
/// let lock = Shared::new(42.into());
/// assert_eq!(*lock.try_read().unwrap(), 42);
/// ```
pub type Shared<T> = Arc<RwLock<T>>;

/// A convenience trait around [RwLock].
///
/// Lowering is single-threaded (one writer per compilation unit), so a lock
/// that cannot be taken immediately means that the same thread already holds
/// a conflicting guard. That is a bug in the caller, which is why these
/// methods crash instead of blocking forever.
///
/// # Example
///
/// ```
/// use torchc::shared::Shared;
/// use torchc::shared::SharedExt;
///
/// let lock: Shared<i64> = Shared::new(42.into());
/// assert_eq!(*lock.rd(), 42);
/// *lock.wr() = 43;
/// assert_eq!(*lock.rd(), 43);
/// ```
pub trait SharedExt<T: ?Sized> {
    /// Convenience method for reading.
    fn rd(&self) -> RwLockReadGuard<T>;
    /// Convenience method for writing.
    fn wr(&self) -> RwLockWriteGuard<T>;
}

impl<T: ?Sized> SharedExt<T> for Shared<T> {
    fn rd(&self) -> RwLockReadGuard<T> {
        self.try_read().unwrap()
    }
    fn wr(&self) -> RwLockWriteGuard<T> {
        self.try_write().unwrap()
    }
}

/// Identity of a shared object, used as a key in side tables.
pub fn ptr_id<T: ?Sized>(shared: &Shared<T>) -> usize {
    Arc::as_ptr(shared) as *const () as usize
}

#[test]
fn test_shared() {
    let lock = Shared::new(42.into());
    assert_eq!(*lock.rd(), 42);
    let other = lock.clone();
    assert_eq!(ptr_id(&lock), ptr_id(&other));
}
