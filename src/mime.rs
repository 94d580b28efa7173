//! Multipart body builder.
//!
//! The tree is assembled in plain Rust values and only turned into a native
//! `curl_mime` when a [`Transfer`](crate::Transfer) consumes it through
//! [`Transfer::mime`](crate::Transfer::mime). Moving the builder in is the
//! ownership transfer: it cannot be attached twice.

use std::ffi::{CStr, CString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use curl_sys::{CURLcode, CURLE_OK, CURLE_OUT_OF_MEMORY};

use crate::error::ConfigError;
use crate::handle::{Access, Easy, Mime, Owned};
use crate::list::List;
use crate::sys;

/// Content transfer encoding applied to a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    Binary,
    EightBit,
    SevenBit,
    Base64,
    QuotedPrintable,
}

impl Encoder {
    fn as_cstr(self) -> &'static CStr {
        match self {
            Encoder::Binary => c"binary",
            Encoder::EightBit => c"8bit",
            Encoder::SevenBit => c"7bit",
            Encoder::Base64 => c"base64",
            Encoder::QuotedPrintable => c"quoted-printable",
        }
    }
}

enum Body {
    Empty,
    Data(Vec<u8>),
    File(PathBuf),
    Subparts(MimeBuilder),
}

/// One part of a multipart body. Obtained from a [`MimeBuilder`] method and
/// refined with the chained setters.
pub struct Part {
    name: Option<String>,
    body: Body,
    content_type: Option<String>,
    encoder: Option<Encoder>,
    filename: Option<String>,
    headers: Option<List>,
}

impl Part {
    fn new(name: Option<String>, body: Body) -> Self {
        Self {
            name,
            body,
            content_type: None,
            encoder: None,
            filename: None,
            headers: None,
        }
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = Some(content_type.to_owned());
        self
    }

    pub fn encoder(&mut self, encoder: Encoder) -> &mut Self {
        self.encoder = Some(encoder);
        self
    }

    /// Remote file name. File parts default to the local base name.
    pub fn filename(&mut self, filename: &str) -> &mut Self {
        self.filename = Some(filename.to_owned());
        self
    }

    /// Extra part headers. Ownership moves into the native part when built.
    pub fn headers(&mut self, headers: List) -> &mut Self {
        self.headers = Some(headers);
        self
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            Body::Empty => "empty".to_owned(),
            Body::Data(d) => format!("{} bytes", d.len()),
            Body::File(p) => format!("file {}", p.display()),
            Body::Subparts(m) => format!("{} subparts", m.len()),
        };
        f.debug_struct("Part")
            .field("name", &self.name)
            .field("body", &body)
            .field("content_type", &self.content_type)
            .field("encoder", &self.encoder)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Root of a multipart tree.
#[derive(Debug, Default)]
pub struct MimeBuilder {
    parts: Vec<Part>,
}

impl MimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn push(&mut self, part: Part) -> &mut Part {
        self.parts.push(part);
        let last = self.parts.len() - 1;
        &mut self.parts[last]
    }

    /// An unnamed, empty part to fill in with the setters.
    pub fn part(&mut self) -> &mut Part {
        self.push(Part::new(None, Body::Empty))
    }

    /// Plain form field.
    pub fn field(&mut self, name: &str, value: impl AsRef<[u8]>) -> &mut Part {
        self.push(Part::new(
            Some(name.to_owned()),
            Body::Data(value.as_ref().to_vec()),
        ))
    }

    /// File read from disk when the transfer runs.
    pub fn file(&mut self, name: &str, path: impl AsRef<Path>) -> &mut Part {
        self.push(Part::new(
            Some(name.to_owned()),
            Body::File(path.as_ref().to_path_buf()),
        ))
    }

    /// In-memory contents sent as a file upload named `filename`.
    pub fn buffer(&mut self, name: &str, filename: &str, bytes: impl Into<Vec<u8>>) -> &mut Part {
        let part = self.push(Part::new(Some(name.to_owned()), Body::Data(bytes.into())));
        part.filename(filename)
    }

    /// Nested multipart tree (e.g. `multipart/mixed` inside a form field).
    pub fn subparts(&mut self, name: &str, nested: MimeBuilder) -> &mut Part {
        self.push(Part::new(Some(name.to_owned()), Body::Subparts(nested)))
    }

    /// Materialize the native tree, bound to `easy`.
    pub(crate) fn build(self, easy: &impl Access<Easy>) -> Result<Owned<Mime>, ConfigError> {
        // SAFETY: live handle; null means allocation failure.
        let raw = unsafe { sys::curl_mime_init(easy.raw()) };
        // SAFETY: fresh mime, owned by nobody else.
        let mime = unsafe { Owned::<Mime>::from_raw(raw) }
            .ok_or_else(|| mime_error(CURLE_OUT_OF_MEMORY))?;
        for part in self.parts {
            add_part(&mime, easy, part)?;
        }
        Ok(mime)
    }
}

fn mime_error(code: CURLcode) -> ConfigError {
    // SAFETY: static string for every code.
    let message = unsafe { CStr::from_ptr(curl_sys::curl_easy_strerror(code)) }
        .to_string_lossy()
        .into_owned();
    ConfigError::Mime {
        code: u32::from(code),
        message,
    }
}

fn check(code: CURLcode) -> Result<(), ConfigError> {
    if code == CURLE_OK {
        Ok(())
    } else {
        Err(mime_error(code))
    }
}

fn cstring(s: impl Into<Vec<u8>>) -> Result<CString, ConfigError> {
    CString::new(s).map_err(|_| mime_error(curl_sys::CURLE_BAD_FUNCTION_ARGUMENT))
}

fn add_part(mime: &Owned<Mime>, easy: &impl Access<Easy>, part: Part) -> Result<(), ConfigError> {
    // SAFETY: live mime; the part belongs to it and dies with it.
    let p = unsafe { sys::curl_mime_addpart(mime.raw()) };
    if p.is_null() {
        return Err(mime_error(CURLE_OUT_OF_MEMORY));
    }

    // SAFETY (all calls below): p is a live part of `mime`; every string and
    // buffer is copied by the engine before the call returns.
    if let Some(name) = part.name {
        let name = cstring(name)?;
        check(unsafe { sys::curl_mime_name(p, name.as_ptr()) })?;
    }
    match part.body {
        Body::Empty => {}
        Body::Data(bytes) => {
            check(unsafe { sys::curl_mime_data(p, bytes.as_ptr().cast(), bytes.len()) })?;
        }
        Body::File(path) => {
            let path = cstring(path.as_os_str().as_bytes())?;
            check(unsafe { sys::curl_mime_filedata(p, path.as_ptr()) })?;
        }
        Body::Subparts(nested) => {
            let sub = nested.build(easy)?;
            check(unsafe { sys::curl_mime_subparts(p, sub.raw()) })?;
            // Accepted: the part frees it from now on.
            let _ = sub.into_raw();
        }
    }
    if let Some(content_type) = part.content_type {
        let content_type = cstring(content_type)?;
        check(unsafe { sys::curl_mime_type(p, content_type.as_ptr()) })?;
    }
    if let Some(encoder) = part.encoder {
        check(unsafe { sys::curl_mime_encoder(p, encoder.as_cstr().as_ptr()) })?;
    }
    if let Some(filename) = part.filename {
        let filename = cstring(filename)?;
        check(unsafe { sys::curl_mime_filename(p, filename.as_ptr()) })?;
    }
    if let Some(headers) = part.headers {
        if !headers.is_empty() {
            check(unsafe { sys::curl_mime_headers(p, headers.as_ptr(), 1) })?;
            let _ = headers.into_raw();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transfer;

    #[test]
    fn test_builder_collects_parts() {
        let mut form = MimeBuilder::new();
        form.field("a", "1");
        form.buffer("b", "b.txt", b"two".to_vec())
            .content_type("text/plain");
        form.part().name("c").encoder(Encoder::Base64);
        assert_eq!(form.len(), 3);
        assert_eq!(form.parts[1].filename.as_deref(), Some("b.txt"));
        assert_eq!(form.parts[2].encoder, Some(Encoder::Base64));
    }

    #[test]
    fn test_attach_nested_tree() {
        let mut inner = MimeBuilder::new();
        inner.field("x", "y");
        let mut form = MimeBuilder::new();
        form.field("k", "v").headers(List::from_items(["X-Part: 1"]).unwrap());
        form.subparts("nested", inner).content_type("multipart/mixed");
        let mut t = Transfer::new().unwrap();
        t.mime(form).unwrap();
    }

    #[test]
    fn test_missing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut form = MimeBuilder::new();
        form.file("upload", dir.path().join("absent.bin"));
        let mut t = Transfer::new().unwrap();
        assert!(matches!(t.mime(form), Err(ConfigError::Mime { .. })));
    }

    #[test]
    fn test_existing_file_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"contents").unwrap();
        let mut form = MimeBuilder::new();
        form.file("upload", file.path()).filename("remote.bin");
        let mut t = Transfer::new().unwrap();
        t.mime(form).unwrap();
    }

    #[test]
    fn test_encoder_names() {
        assert_eq!(Encoder::QuotedPrintable.as_cstr().to_str().unwrap(), "quoted-printable");
        assert_eq!(Encoder::EightBit.as_cstr().to_str().unwrap(), "8bit");
    }
}
