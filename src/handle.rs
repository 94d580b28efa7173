//! Owned and borrowed wrappers around native engine resources.
//!
//! [`Owned`] releases its resource exactly once, when dropped. [`Borrowed`]
//! aliases a resource somebody else owns and never releases it; its lifetime
//! ties it to the owner so it cannot outlive the resource. Both implement
//! [`Access`], which is all the higher layers need to talk to the engine.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use curl_sys::{curl_slist, CURL, CURLM, CURLSH};

use crate::sys::curl_mime;

/// A kind of native resource: its raw type and how to release it.
pub trait Kind {
    type Raw;
    const NAME: &'static str;

    /// # Safety
    ///
    /// `raw` must point to a live resource of this kind that nobody else
    /// will release.
    unsafe fn release(raw: *mut Self::Raw);
}

/// Read access to the raw pointer, shared by owned and borrowed handles.
pub trait Access<K: Kind> {
    fn raw(&self) -> *mut K::Raw;
}

pub struct Owned<K: Kind> {
    raw: NonNull<K::Raw>,
    _kind: PhantomData<K>,
}

impl<K: Kind> Owned<K> {
    /// Take ownership of `raw`. Returns `None` for a null pointer, which is
    /// how every libcurl constructor reports allocation failure.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a live resource of kind `K` with no other owner.
    pub(crate) unsafe fn from_raw(raw: *mut K::Raw) -> Option<Self> {
        NonNull::new(raw).map(|raw| Self {
            raw,
            _kind: PhantomData,
        })
    }

    pub fn borrow(&self) -> Borrowed<'_, K> {
        Borrowed {
            raw: self.raw,
            _owner: PhantomData,
        }
    }

    /// Give up ownership without releasing. The caller becomes responsible
    /// for the resource, usually by handing it to the engine.
    pub(crate) fn into_raw(self) -> *mut K::Raw {
        let raw = self.raw.as_ptr();
        std::mem::forget(self);
        raw
    }
}

impl<K: Kind> Access<K> for Owned<K> {
    fn raw(&self) -> *mut K::Raw {
        self.raw.as_ptr()
    }
}

impl<K: Kind> Drop for Owned<K> {
    fn drop(&mut self) {
        // SAFETY: constructed through from_raw, never released elsewhere,
        // and into_raw forgets self so this runs at most once.
        unsafe { K::release(self.raw.as_ptr()) }
    }
}

impl<K: Kind> fmt::Debug for Owned<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owned<{}>({:p})", K::NAME, self.raw)
    }
}

/// Non-owning back-reference. Copyable, never releases.
pub struct Borrowed<'a, K: Kind> {
    raw: NonNull<K::Raw>,
    _owner: PhantomData<&'a ()>,
}

impl<K: Kind> Borrowed<'_, K> {
    /// # Safety
    ///
    /// `raw` must stay alive for the chosen lifetime.
    pub(crate) unsafe fn from_raw(raw: *mut K::Raw) -> Option<Self> {
        NonNull::new(raw).map(|raw| Self {
            raw,
            _owner: PhantomData,
        })
    }
}

impl<K: Kind> Access<K> for Borrowed<'_, K> {
    fn raw(&self) -> *mut K::Raw {
        self.raw.as_ptr()
    }
}

impl<K: Kind> Clone for Borrowed<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: Kind> Copy for Borrowed<'_, K> {}

impl<K: Kind> fmt::Debug for Borrowed<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Borrowed<{}>({:p})", K::NAME, self.raw)
    }
}

// ─── Resource kinds ──────────────────────────────────────────────────────────

pub enum Easy {}
pub enum Multi {}
pub enum SList {}
pub enum Mime {}
pub enum ShareHandle {}

impl Kind for Easy {
    type Raw = CURL;
    const NAME: &'static str = "transfer";

    unsafe fn release(raw: *mut CURL) {
        curl_sys::curl_easy_cleanup(raw);
    }
}

impl Kind for Multi {
    type Raw = CURLM;
    const NAME: &'static str = "transfer-set";

    unsafe fn release(raw: *mut CURLM) {
        let rc = curl_sys::curl_multi_cleanup(raw);
        if rc != curl_sys::CURLM_OK {
            tracing::warn!(code = rc, "multi cleanup reported an error");
        }
    }
}

impl Kind for SList {
    type Raw = curl_slist;
    const NAME: &'static str = "list";

    unsafe fn release(raw: *mut curl_slist) {
        curl_sys::curl_slist_free_all(raw);
    }
}

impl Kind for Mime {
    type Raw = curl_mime;
    const NAME: &'static str = "mime";

    unsafe fn release(raw: *mut curl_mime) {
        crate::sys::curl_mime_free(raw);
    }
}

impl Kind for ShareHandle {
    type Raw = CURLSH;
    const NAME: &'static str = "share";

    unsafe fn release(raw: *mut CURLSH) {
        let rc = curl_sys::curl_share_cleanup(raw);
        if rc != curl_sys::CURLSHE_OK {
            tracing::warn!(code = rc, "share cleanup reported an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static RELEASED: Cell<usize> = const { Cell::new(0) };
    }

    enum Counted {}

    impl Kind for Counted {
        type Raw = u8;
        const NAME: &'static str = "counted";

        unsafe fn release(raw: *mut u8) {
            drop(Box::from_raw(raw));
            RELEASED.with(|r| r.set(r.get() + 1));
        }
    }

    fn make() -> Owned<Counted> {
        let raw = Box::into_raw(Box::new(7u8));
        unsafe { Owned::from_raw(raw) }.unwrap()
    }

    #[test]
    fn test_release_once_on_drop() {
        RELEASED.with(|r| r.set(0));
        let owned = make();
        let moved = owned;
        let borrowed = moved.borrow();
        let copy = borrowed;
        assert_eq!(copy.raw(), moved.raw());
        drop(moved);
        assert_eq!(RELEASED.with(Cell::get), 1);
    }

    #[test]
    fn test_null_is_none() {
        let owned: Option<Owned<Counted>> = unsafe { Owned::from_raw(std::ptr::null_mut()) };
        assert!(owned.is_none());
    }

    #[test]
    fn test_into_raw_skips_release() {
        RELEASED.with(|r| r.set(0));
        let raw = make().into_raw();
        assert_eq!(RELEASED.with(Cell::get), 0);
        drop(unsafe { Owned::<Counted>::from_raw(raw) });
        assert_eq!(RELEASED.with(Cell::get), 1);
    }

    #[test]
    fn test_borrowed_never_releases() {
        RELEASED.with(|r| r.set(0));
        let owned = make();
        {
            let b = unsafe { Borrowed::<Counted>::from_raw(owned.raw()) }.unwrap();
            let _ = b;
        }
        assert_eq!(RELEASED.with(Cell::get), 0);
        drop(owned);
        assert_eq!(RELEASED.with(Cell::get), 1);
    }
}
