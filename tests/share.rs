mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::Stub;
use sluice::share::{LockAccess, LockData};
use sluice::{Opt, Share, ShareData, ShareLock, Transfer};

/// Counts lock traffic while delegating to the stock lock.
#[derive(Default)]
struct Counting {
    inner: sluice::ParkingLock,
    locks: Arc<AtomicUsize>,
    unlocks: Arc<AtomicUsize>,
}

impl ShareLock for Counting {
    fn lock(&self, data: LockData, access: LockAccess) {
        self.locks.fetch_add(1, Ordering::SeqCst);
        self.inner.lock(data, access);
    }

    fn unlock(&self, data: LockData) {
        self.inner.unlock(data);
        self.unlocks.fetch_add(1, Ordering::SeqCst);
    }
}

fn cookie_transfer(url: &str, share: &Arc<Share>) -> Transfer {
    let mut t = Transfer::with_url(url, 0).unwrap();
    // Empty cookie file turns the cookie engine on without reading anything.
    t.set(Opt::CookieFile, "").unwrap();
    t.share(Arc::clone(share)).unwrap();
    t
}

#[test]
fn test_cookies_flow_between_transfers() {
    let stub = Stub::start();
    let counting = Counting::default();
    let (locks, unlocks) = (Arc::clone(&counting.locks), Arc::clone(&counting.unlocks));

    let mut share = Share::with_lock(counting).unwrap();
    share.share(ShareData::Cookie).unwrap();
    share.share(ShareData::Dns).unwrap();
    assert_eq!(share.shared(), &[ShareData::Cookie, ShareData::Dns]);
    let share = Arc::new(share);

    let mut first = cookie_transfer(&stub.url("/cookie/set"), &share);
    first.execute_into(&mut Vec::new()).unwrap();
    let mut second = cookie_transfer(&stub.url("/cookie/check"), &share);
    second.execute_into(&mut Vec::new()).unwrap();

    assert_eq!(
        stub.find("/cookie/check").unwrap().header("cookie"),
        Some("flavor=oat")
    );
    assert!(locks.load(Ordering::SeqCst) > 0);
    assert_eq!(locks.load(Ordering::SeqCst), unlocks.load(Ordering::SeqCst));

    // The share outlives both transfers and is freed last.
    drop(first);
    drop(second);
    assert_eq!(Arc::strong_count(&share), 1);
}

#[test]
fn test_unshared_transfers_keep_cookies_apart() {
    let stub = Stub::start();
    let mut share = Share::new().unwrap();
    share.share(ShareData::Cookie).unwrap();
    share.unshare(ShareData::Cookie).unwrap();
    assert!(share.shared().is_empty());
    let share = Arc::new(share);

    cookie_transfer(&stub.url("/cookie/set"), &share)
        .execute_into(&mut Vec::new())
        .unwrap();
    cookie_transfer(&stub.url("/cookie/other"), &share)
        .execute_into(&mut Vec::new())
        .unwrap();
    assert_eq!(stub.find("/cookie/other").unwrap().header("cookie"), None);
}
