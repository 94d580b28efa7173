mod common;

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{big_body, Stub, BIG_LEN};
use sluice::config::TransferConfig;
use sluice::registry::{Callback, InfoValue};
use sluice::{Buffer, InfoKey, Introspect, List, MimeBuilder, Opt, Phase, Transfer, Value};

#[test]
fn test_execute_into_delivers_body_exactly() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/big"), 0).unwrap();
    t.set_body(Cursor::new(Vec::<u8>::new())).unwrap();
    let mut body = Vec::new();
    t.execute_into(&mut body).unwrap();
    assert_eq!(body.len(), BIG_LEN);
    assert_eq!(body, big_body());
    assert_eq!(t.phase(), &Phase::Completed(Ok(())));
}

#[test]
fn test_introspection_per_category() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/hello"), 0).unwrap();
    t.set_private(0xfeed).unwrap();
    let body = Buffer::new();
    t.set_response(body.clone());
    t.execute().unwrap();
    assert_eq!(body.contents(), b"hello from /hello");

    assert_eq!(t.uri().unwrap().as_deref(), Some(stub.url("/hello").as_str()));
    assert_eq!(
        t.info_string(InfoKey::ContentType).unwrap().as_deref(),
        Some("text/plain")
    );
    assert_eq!(t.response_code().unwrap(), 200);
    assert_eq!(
        t.info_integer(InfoKey::PrimaryPort).unwrap(),
        i64::from(stub.port())
    );
    assert!(t.info_double(InfoKey::TotalTime).unwrap() >= 0.0);
    assert_eq!(
        t.info_large(InfoKey::SizeDownload).unwrap(),
        "hello from /hello".len() as i64
    );
    assert_eq!(t.private().unwrap(), 0xfeed);
    assert!(t.info_list(InfoKey::SslEngines).is_ok());
    assert!(t.certificate_chain().unwrap().certificates.is_empty());
    assert!(matches!(
        t.get_info(InfoKey::ActiveSocket).unwrap(),
        InfoValue::Socket(_)
    ));
    assert!(matches!(
        t.get_info(InfoKey::TlsSslPtr).unwrap(),
        InfoValue::TlsSessionInfo(_)
    ));
}

#[test]
fn test_post_fields_reach_server() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/form"), 0).unwrap();
    t.post_fields(b"a=1&b=\x002").unwrap();
    t.execute().unwrap();
    let req = stub.find("/form").unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.body, b"a=1&b=\x002");
}

#[test]
fn test_mime_upload_reaches_server() {
    let stub = Stub::start();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"file-contents-here").unwrap();

    let mut form = MimeBuilder::new();
    form.field("greeting", "hi there");
    form.file("upload", file.path()).content_type("application/x-test");
    form.buffer("inline", "notes.txt", b"inline-bytes".to_vec());

    let mut t = Transfer::with_url(&stub.url("/upload"), 0).unwrap();
    t.mime(form).unwrap();
    t.execute().unwrap();

    let req = stub.find("/upload").unwrap();
    assert!(req
        .header("content-type")
        .unwrap()
        .starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(&req.body);
    assert!(body.contains("name=\"greeting\""));
    assert!(body.contains("hi there"));
    assert!(body.contains("file-contents-here"));
    assert!(body.contains("application/x-test"));
    assert!(body.contains("filename=\"notes.txt\""));
    assert!(body.contains("inline-bytes"));
}

#[test]
fn test_upload_body_from_source() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/put"), 0).unwrap();
    t.set(Opt::Upload, true).unwrap();
    t.set_body(Cursor::new(b"streamed upload".to_vec())).unwrap();
    t.execute().unwrap();
    let req = stub.find("/put").unwrap();
    assert_eq!(req.method, "PUT");
    assert_eq!(req.header("content-length"), Some("15"));
    assert_eq!(req.body, b"streamed upload");
}

#[test]
fn test_headers_and_header_sink() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/h"), 0).unwrap();
    t.headers(List::from_items(["X-Probe: one", "X-Other: two"]).unwrap())
        .unwrap();
    let headers = Buffer::new();
    t.header_sink(headers.clone());
    t.execute().unwrap();

    let req = stub.find("/h").unwrap();
    assert_eq!(req.header("x-probe"), Some("one"));
    assert_eq!(req.header("x-other"), Some("two"));
    let seen = String::from_utf8(headers.contents()).unwrap();
    assert!(seen.starts_with("HTTP/1.1 200"));
    assert!(seen.contains("Content-Length: 13"));
}

#[test]
fn test_duplicate_runs_independently() {
    let stub = Stub::start();
    let mut original = Transfer::with_url(&stub.url("/one"), 0).unwrap();
    original
        .headers(List::from_items(["X-Copy: yes"]).unwrap())
        .unwrap();
    let mut copy = original.duplicate().unwrap();
    copy.url(&stub.url("/two")).unwrap();

    let (mut a, mut b) = (Vec::new(), Vec::new());
    original.execute_into(&mut a).unwrap();
    copy.execute_into(&mut b).unwrap();
    drop(original);

    assert_eq!(a, b"hello from /one");
    assert_eq!(b, b"hello from /two");
    // The deep-copied header list outlives the original.
    assert_eq!(stub.find("/two").unwrap().header("x-copy"), Some("yes"));
    assert_eq!(copy.response_code().unwrap(), 200);
}

#[test]
fn test_fail_on_error_from_config() {
    let stub = Stub::start();
    let config = TransferConfig {
        fail_on_error: true,
        ..TransferConfig::default()
    };
    let mut t = Transfer::new().unwrap();
    config.apply(&mut t).unwrap();
    t.url(&stub.url("/status/404")).unwrap();
    let err = t.execute().unwrap_err();
    assert!(err.is_http_returned_error());
    assert!(matches!(t.phase(), Phase::Completed(Err(_))));
    assert!(stub
        .find("/status/404")
        .unwrap()
        .header("user-agent")
        .unwrap()
        .starts_with("sluice/"));
}

#[test]
fn test_resolve_override() {
    let stub = Stub::start();
    let mut t = Transfer::new().unwrap();
    t.resolve(List::from_items([format!("stub.invalid:{}:127.0.0.1", stub.port())]).unwrap())
        .unwrap();
    t.url(&format!("http://stub.invalid:{}/resolved", stub.port()))
        .unwrap();
    let mut body = Vec::new();
    t.execute_into(&mut body).unwrap();
    assert_eq!(body, b"hello from /resolved");
}

#[test]
fn test_progress_abort() {
    let stub = Stub::start();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let mut t = Transfer::with_url(&stub.url("/big"), 0).unwrap();
    t.progress(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        false
    })
    .unwrap();
    let err = t.execute_into(&mut Vec::new()).unwrap_err();
    assert!(err.is_aborted_by_callback());
    assert!(calls.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_short_sink_write_fails_transfer() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/big"), 0).unwrap();
    t.set_response(sluice::sink_fn(|_| 0));
    let err = t.execute().unwrap_err();
    assert!(err.is_write_error());
}

#[test]
fn test_post_body_sends_measured_length() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/posted"), 0).unwrap();
    t.post_body(Cursor::new(b"abc".to_vec())).unwrap();
    t.execute_into(&mut Vec::new()).unwrap();
    let req = stub.find("/posted").unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.header("content-length"), Some("3"));
    assert_eq!(req.header("transfer-encoding"), None);
    assert_eq!(req.body, b"abc");
}

#[test]
fn test_post_flag_with_seekable_body_is_not_chunked() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/flagged"), 0).unwrap();
    // A stale size from an earlier body must not survive the replacement.
    t.post_fields(b"previous body").unwrap();
    t.set(Opt::Post, true).unwrap();
    t.set_body(Cursor::new(b"abc".to_vec())).unwrap();
    t.execute_into(&mut Vec::new()).unwrap();
    let req = stub.find("/flagged").unwrap();
    assert_eq!(req.header("content-length"), Some("3"));
    assert_eq!(req.body, b"abc");
}

#[test]
fn test_integer_option_round_trips_through_info() {
    let stub = Stub::start();
    let mut t = Transfer::with_url("http://127.0.0.1/ported", 0).unwrap();
    t.set(Opt::Port, Value::Integer(i64::from(stub.port())))
        .unwrap();
    t.execute_into(&mut Vec::new()).unwrap();
    assert_eq!(
        t.info_integer(InfoKey::PrimaryPort).unwrap(),
        i64::from(stub.port())
    );
    assert!(stub.find("/ported").is_some());
}

#[test]
fn test_flag_option_puts_headers_in_body() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/with-head"), 0).unwrap();
    t.set(Opt::Header, true).unwrap();
    let mut body = Vec::new();
    t.execute_into(&mut body).unwrap();
    let body = String::from_utf8(body).unwrap();
    assert!(body.starts_with("HTTP/1.1 200"), "{body}");
    assert!(body.ends_with("hello from /with-head"));
    assert!(t.info_integer(InfoKey::HeaderSize).unwrap() > 0);
}

#[test]
fn test_large_integer_option_limits_download() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/big"), 0).unwrap();
    t.set(Opt::MaxFileSizeLarge, Value::LargeInteger(1024)).unwrap();
    let err = t.execute_into(&mut Vec::new()).unwrap_err();
    assert!(err.is_filesize_exceeded(), "{err}");
    assert!(t.info_large(InfoKey::SizeDownload).unwrap() < BIG_LEN as i64);
}

#[test]
fn test_callback_option_receives_body() {
    let stub = Stub::start();
    let mut t = Transfer::with_url(&stub.url("/via-callback"), 0).unwrap();
    let body = Buffer::new();
    t.set(
        Opt::WriteFunction,
        Value::Callback(Callback::Write(Box::new(body.clone()))),
    )
    .unwrap();
    t.execute().unwrap();
    assert_eq!(body.contents(), b"hello from /via-callback");
    assert_eq!(t.response_code().unwrap(), 200);
}
