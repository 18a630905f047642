//! Interned identifiers for class, method, signal and property names
//!
//! Every distinct text is stored once for the life of the process. An
//! `Identifier` is a pointer to that storage, so equality and hashing never
//! look at the bytes. Entries are never freed.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{LazyLock, PoisonError, RwLock};

struct Entry {
    text: Box<str>,
    hash: u32,
}

static INTERNER: LazyLock<RwLock<HashMap<&'static str, &'static Entry>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Interned, hash-stable name
///
/// Two identifiers built from the same text share backing storage and
/// compare equal by pointer.
#[derive(Clone, Copy)]
pub struct Identifier(&'static Entry);

/// Intern `text`, returning the canonical identifier for it
///
/// Never fails; the worst case is a fresh entry.
pub fn intern(text: &str) -> Identifier {
    if let Some(entry) = INTERNER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(text)
    {
        return Identifier(entry);
    }

    let mut map = INTERNER.write().unwrap_or_else(PoisonError::into_inner);
    // Another thread may have won the race between the two locks.
    if let Some(entry) = map.get(text) {
        return Identifier(entry);
    }
    let entry: &'static Entry = Box::leak(Box::new(Entry {
        text: text.into(),
        hash: djb2(text.as_bytes()),
    }));
    map.insert(&*entry.text, entry);
    Identifier(entry)
}

/// Number of distinct identifiers interned so far
pub fn interned_count() -> usize {
    INTERNER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}

/// The string hash the native side uses for its own name tables
fn djb2(bytes: &[u8]) -> u32 {
    bytes.iter().fold(5381u32, |hash, &b| {
        (hash << 5).wrapping_add(hash).wrapping_add(u32::from(b))
    })
}

impl Identifier {
    /// Intern `text`; same as [`intern`]
    pub fn new(text: &str) -> Self {
        intern(text)
    }

    /// The interned text
    pub fn as_str(&self) -> &'static str {
        let entry: &'static Entry = self.0;
        &entry.text
    }

    /// Precomputed djb2 hash of the text
    pub fn hash32(&self) -> u32 {
        self.0.hash
    }

    /// Check whether two identifiers share backing storage
    pub fn ptr_eq(&self, other: &Identifier) -> bool {
        std::ptr::eq(self.0, other.0)
    }

    /// Borrowed C view of this name for passing into native calls
    ///
    /// The pointer stays valid for the rest of the process.
    pub fn raw(&self) -> RawName {
        RawName {
            ptr: self.0.text.as_ptr(),
            len: self.0.text.len(),
            hash: self.0.hash,
        }
    }

    /// Re-intern a name received from native code
    ///
    /// # Safety
    ///
    /// `raw.ptr` must point to `raw.len` readable bytes for the duration of
    /// the call.
    pub unsafe fn from_raw(raw: &RawName) -> Result<Identifier> {
        if raw.len == 0 {
            return Ok(intern(""));
        }
        // SAFETY: guaranteed by the caller.
        let bytes = unsafe { std::slice::from_raw_parts(raw.ptr, raw.len) };
        let text = std::str::from_utf8(bytes).map_err(|_| Error::InvalidIdentifier)?;
        Ok(intern(text))
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.0.hash);
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&{:?}", self.as_str())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        intern(s)
    }
}

impl From<&String> for Identifier {
    fn from(s: &String) -> Self {
        intern(s)
    }
}

/// C layout of a name as it crosses the boundary
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawName {
    pub ptr: *const u8,
    pub len: usize,
    pub hash: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_same_text_same_storage() {
        let a = intern("body_set_param");
        let b = Identifier::new(&String::from("body_set_param"));
        assert_eq!(a, b);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.as_str().as_ptr(), b.as_str().as_ptr());
    }

    #[test]
    fn test_different_text_differs() {
        let a = intern("shape_create");
        let b = intern("shape_create_");
        assert_ne!(a, b);
        assert_eq!(a, "shape_create");
    }

    #[test]
    fn test_intern_is_idempotent() {
        let first = intern("intern_idempotence_probe");
        let count = interned_count();
        let again = intern("intern_idempotence_probe");
        assert_eq!(first, again);
        assert!(interned_count() >= count);
        assert_eq!(first.hash32(), again.hash32());
    }

    #[test]
    fn test_djb2_matches_reference() {
        assert_eq!(djb2(b""), 5381);
        // 5381 * 33 + 'a'
        assert_eq!(djb2(b"a"), 177670);
        assert_eq!(intern("a").hash32(), 177670);
    }

    #[test]
    fn test_usable_as_key() {
        let mut set = HashSet::new();
        set.insert(intern("_ready"));
        set.insert(intern("_process"));
        set.insert(intern("_ready"));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Identifier::from("_process")));
    }

    #[test]
    fn test_raw_roundtrip() {
        let id = intern("get_name");
        let raw = id.raw();
        assert_eq!(raw.len, 8);
        assert_eq!(raw.hash, id.hash32());
        let back = unsafe { Identifier::from_raw(&raw) }.unwrap();
        assert!(back.ptr_eq(&id));
    }

    #[test]
    fn test_raw_rejects_invalid_utf8() {
        let bytes = [0xffu8, 0xfe];
        let raw = RawName {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
            hash: 0,
        };
        let result = unsafe { Identifier::from_raw(&raw) };
        assert_eq!(result, Err(Error::InvalidIdentifier));
    }
}
