//! Owned, append-only string list (`curl_slist`).
//!
//! Used for request headers, resolve overrides, mail recipients and any
//! other option that takes a list. An empty list holds no native allocation
//! at all; the engine sees a null pointer, which it treats as "no list".

use std::ffi::{CStr, CString};
use std::fmt;
use std::marker::PhantomData;

use curl_sys::curl_slist;

use crate::error::ListError;
use crate::handle::{Access, Owned, SList};

#[derive(Default)]
pub struct List {
    head: Option<Owned<SList>>,
}

// SAFETY: the list is plain heap memory owned exclusively by this value.
unsafe impl Send for List {}
unsafe impl Sync for List {}

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from `items`, in order.
    pub fn from_items<I, S>(items: I) -> Result<Self, ListError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut list = Self::new();
        list.extend(items)?;
        Ok(list)
    }

    /// Append one entry. The bytes are copied into the list.
    pub fn append(&mut self, item: impl AsRef<[u8]>) -> Result<(), ListError> {
        let bytes = item.as_ref();
        let item = CString::new(bytes).map_err(|e| ListError::InteriorNul(e.nul_position()))?;
        let old = self.as_ptr();
        // SAFETY: old is null or the head we own; curl copies item.
        let new = unsafe { curl_sys::curl_slist_append(old, item.as_ptr()) };
        if new.is_null() {
            // The existing list is left untouched on failure.
            return Err(ListError::Allocation);
        }
        if old.is_null() {
            // SAFETY: freshly allocated by curl_slist_append, owned by nobody else.
            self.head = unsafe { Owned::from_raw(new) };
        }
        Ok(())
    }

    /// Append every item in order; stops at the first failure.
    pub fn extend<I, S>(&mut self, items: I) -> Result<(), ListError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        for item in items {
            self.append(item)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            cur: self.as_ptr(),
            _list: PhantomData,
        }
    }

    /// Deep copy, entry by entry.
    pub fn try_clone(&self) -> Result<Self, ListError> {
        Self::from_items(self.iter())
    }

    pub(crate) fn as_ptr(&self) -> *mut curl_slist {
        self.head
            .as_ref()
            .map_or(std::ptr::null_mut(), |head| head.raw())
    }

    /// Hand the native list to a consumer that frees it itself.
    pub(crate) fn into_raw(self) -> *mut curl_slist {
        self.head.map_or(std::ptr::null_mut(), Owned::into_raw)
    }

    /// Adopt a list the engine allocated and handed to us.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a `curl_slist` the caller is responsible for freeing.
    pub(crate) unsafe fn from_raw(raw: *mut curl_slist) -> Self {
        Self {
            head: Owned::from_raw(raw),
        }
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(String::from_utf8_lossy))
            .finish()
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = &'a [u8];
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Walks the list from the head. Restart by calling [`List::iter`] again.
pub struct Iter<'a> {
    cur: *mut curl_slist,
    _list: PhantomData<&'a List>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.cur.is_null() {
            return None;
        }
        // SAFETY: cur is a node of a list borrowed for 'a; nodes are only
        // appended, never freed, while the borrow lasts.
        unsafe {
            let node = &*self.cur;
            self.cur = node.next;
            if node.data.is_null() {
                Some(&[][..])
            } else {
                Some(CStr::from_ptr(node.data).to_bytes())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_list_is_null() {
        let list = List::new();
        assert!(list.is_empty());
        assert!(list.as_ptr().is_null());
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    fn test_append_preserves_order() {
        let mut list = List::new();
        list.append("Accept: */*").unwrap();
        list.append(b"X-Trace: 1").unwrap();
        list.extend(["a", "b"]).unwrap();
        let items: Vec<&[u8]> = list.iter().collect();
        assert_eq!(
            items,
            vec![&b"Accept: */*"[..], &b"X-Trace: 1"[..], &b"a"[..], &b"b"[..]]
        );
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn test_iteration_restarts_from_head() {
        let list = List::from_items(["one", "two"]).unwrap();
        let mut first = list.iter();
        assert_eq!(first.next(), Some(&b"one"[..]));
        let again: Vec<_> = list.iter().collect();
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn test_interior_nul_rejected() {
        let mut list = List::from_items(["ok"]).unwrap();
        let err = list.append(b"bad\0value").unwrap_err();
        assert!(matches!(err, ListError::InteriorNul(3)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_try_clone_is_independent() {
        let original = List::from_items(["x"]).unwrap();
        let mut copy = original.try_clone().unwrap();
        copy.append("y").unwrap();
        assert_eq!(original.len(), 1);
        assert_eq!(copy.len(), 2);
        assert_ne!(original.as_ptr(), copy.as_ptr());
    }

    proptest! {
        #[test]
        fn prop_roundtrips_items(items in proptest::collection::vec("[ -~]{0,24}", 0..12)) {
            let list = List::from_items(&items).unwrap();
            let back: Vec<String> = list
                .iter()
                .map(|b| String::from_utf8(b.to_vec()).unwrap())
                .collect();
            prop_assert_eq!(back, items.clone());
            prop_assert_eq!(list.is_empty(), items.is_empty());
        }
    }
}
