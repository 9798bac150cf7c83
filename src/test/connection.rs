use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use super::{capture, ScriptedTransport};
use crate::connection::{Connection, ObjectInfo, PutOptions, Stored, DEFAULT_CONTENT_TYPE};
use crate::dispatch::{Fatal, Outcome};
use crate::request::{Body, RequestFacade};
use crate::transfer::{ContentHash, TransferOptions};

fn connection(transport: &Rc<ScriptedTransport>) -> Connection {
    Connection::new(transport.clone(), "bucket.s3.test")
}

#[test]
fn lookup_absent() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(404, &[], b"");

    let (seen, done) = capture();
    connection(&transport).lookup("/missing", done);
    transport.run();

    assert!(seen.borrow()[0].is_absent());

    let sent = transport.sent();
    assert_eq!(sent[0].method(), "HEAD");
    assert_eq!(sent[0].path(), "/missing");
}

#[test]
fn lookup_found() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(
        200,
        &[
            ("etag", "\"abc\""),
            ("content-type", "text/plain"),
            ("last-modified", "Mon, 19 Oct 2026 10:00:00 GMT"),
            ("x-amz-meta-owner", "ops"),
        ],
        b"",
    );

    let (seen, done) = capture();
    connection(&transport).lookup("/k", done);
    transport.run();

    let info = seen.borrow_mut().pop().unwrap().success().unwrap();
    assert_eq!(
        info,
        ObjectInfo {
            etag: Some("\"abc\"".into()),
            content_type: Some("text/plain".into()),
            size: 0,
            last_modified: Some("Mon, 19 Oct 2026 10:00:00 GMT".into()),
            metadata: vec![("owner".into(), "ops".into())],
        }
    );
}

#[test]
fn lookup_custom_metadata_prefix() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(200, &[("x-goog-meta-tier", "cold"), ("content-length", "12")], b"");

    let (seen, done) = capture();
    connection(&transport)
        .metadata_prefix("x-goog-meta-")
        .lookup("/k", done);
    transport.run();

    let info = seen.borrow_mut().pop().unwrap().success().unwrap();
    assert_eq!(info.size, 12);
    assert_eq!(info.metadata, vec![("tier".to_string(), "cold".to_string())]);
}

#[test]
fn lookup_transient_failure_is_retryable() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(503, &[], b"SlowDown").reply(503, &[], b"SlowDown");

    let (seen, done) = capture();
    let conn = connection(&transport);
    conn.lookup("/k", done);

    let (exists, done) = capture();
    conn.exists("/k", done);
    transport.run();

    let Outcome::Retryable(response) = seen.borrow_mut().pop().unwrap() else {
        panic!("Expected Retryable");
    };
    assert_eq!(response.status(), 503);

    let result = exists.borrow_mut().pop().unwrap();
    assert_eq!(result.unwrap_err().status(), Some(503));
}

#[test]
fn put_if_absent_retryable_lookup_is_passed_on() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(500, &[], b"");

    let options = PutOptions::default().replace(false);
    let (slot, done) = store_slot();
    connection(&transport).upload_stream("/k", Cursor::new(b"new".to_vec()), options, done);
    transport.run();

    let (outcome, _) = slot.borrow_mut().take().unwrap();
    assert!(outcome.is_retryable());
    assert_eq!(transport.sent().len(), 1);
}

#[test]
fn exists_maps_outcomes() {
    let transport = Rc::new(ScriptedTransport::new());
    transport
        .reply(200, &[], b"")
        .reply(404, &[], b"")
        .reply(403, &[], b"denied");

    let (seen, done) = capture();
    let conn = connection(&transport);
    let seen2 = seen.clone();
    let seen3 = seen.clone();
    conn.exists("/a", done);
    conn.exists("/b", move |r| seen2.borrow_mut().push(r));
    conn.exists("/c", move |r| seen3.borrow_mut().push(r));
    transport.run();

    let seen = seen.borrow();
    assert_eq!(seen[0], Ok(true));
    assert_eq!(seen[1], Ok(false));
    assert_eq!(seen[2].as_ref().unwrap_err().status(), Some(403));
}

#[test]
fn authorizer_signs_every_request() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(200, &[], b"").reply(404, &[], b"");

    let conn = connection(&transport).authorizer(|r: &mut RequestFacade| {
        r.put_header("Authorization", "AWS key:sig");
    });

    let (_, done) = capture();
    conn.dispatch("DELETE", "/k", &[], None, done);
    let (_, done) = capture();
    conn.lookup("/k", done);
    transport.run();

    for request in transport.sent() {
        assert_eq!(request.header("authorization"), Some("AWS key:sig"));
    }
}

#[test]
fn dispatch_is_replayable() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(500, &[], b"");

    let (seen, done) = capture();
    connection(&transport)
        .secure(true)
        .port(8443)
        .dispatch("PUT", "/k", &[("x-amz-acl", "private")], Some(b"hi"), done);
    transport.run();

    assert!(seen.borrow()[0].is_retryable());

    let sent = transport.sent();
    assert_eq!(sent[0].url(), "https://bucket.s3.test:8443/k");
    assert_eq!(sent[0].header("x-amz-acl"), Some("private"));
    assert_eq!(sent[0].body().as_bytes(), b"hi");
}

type StoreSlot<R> = Rc<RefCell<Option<(Outcome<Stored>, R)>>>;

fn store_slot<R: 'static>() -> (StoreSlot<R>, impl FnOnce(Outcome<Stored>, R) + 'static) {
    let slot = Rc::new(RefCell::new(None));
    let s = slot.clone();
    (slot, move |outcome, source| {
        *s.borrow_mut() = Some((outcome, source));
    })
}

#[test]
fn upload_file_computes_hash_and_defaults_content_type() {
    let data = b"some file contents".to_vec();
    let hash = ContentHash::from_bytes(&data);

    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(200, &[("etag", hash.etag().as_str())], b"");

    let (slot, done) = store_slot();
    connection(&transport).upload_file(
        "/k",
        Cursor::new(data.clone()),
        None,
        PutOptions::default(),
        done,
    );
    transport.run();

    let (outcome, _) = slot.borrow_mut().take().unwrap();
    let Some(Stored::Uploaded(uploaded)) = outcome.success() else {
        panic!("Expected upload");
    };
    assert_eq!(uploaded.record.hash, hash);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method(), "PUT");
    assert_eq!(sent[0].header("content-type"), Some(DEFAULT_CONTENT_TYPE));
    assert_eq!(sent[0].header("content-md5"), Some(hash.base64()));
    assert_eq!(sent[0].header("content-length"), Some("18"));
    assert_eq!(sent[0].body(), &Body::Bytes(data));
}

#[test]
fn upload_file_keeps_caller_content_type() {
    let data = b"{}".to_vec();
    let hash = ContentHash::from_bytes(&data);

    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(200, &[("etag", hash.etag().as_str())], b"");

    let options = PutOptions::default().header("Content-Type", "application/json");
    let (slot, done) = store_slot();
    connection(&transport).upload_file("/k.json", Cursor::new(data), Some(hash), options, done);
    transport.run();

    assert!(slot.borrow().as_ref().unwrap().0.is_success());

    let sent = transport.sent();
    let types: Vec<_> = sent[0]
        .headers()
        .filter(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .collect();
    assert_eq!(types, vec![("Content-Type", "application/json")]);
}

#[test]
fn put_if_absent_skips_existing() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(200, &[("etag", "\"x\"")], b"");

    let options = PutOptions::default().replace(false);
    let (slot, done) = store_slot();
    connection(&transport).upload_stream("/k", Cursor::new(b"new".to_vec()), options, done);
    transport.run();

    let (outcome, source) = slot.borrow_mut().take().unwrap();
    assert!(matches!(outcome, Outcome::Success(Stored::AlreadyExists)));
    assert_eq!(source.position(), 0);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method(), "HEAD");
}

#[test]
fn put_if_absent_uploads_when_missing() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(404, &[], b"").reply(200, &[], b"");

    let options = PutOptions::default()
        .replace(false)
        .transfer(TransferOptions::default().buffer_size(2));
    let (slot, done) = store_slot();
    connection(&transport).upload_stream("/k", Cursor::new(b"new".to_vec()), options, done);

    // Only the lookup is committed until the loop runs.
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method(), "HEAD");

    transport.run();

    let (outcome, _) = slot.borrow_mut().take().unwrap();
    let Some(Stored::Uploaded(uploaded)) = outcome.success() else {
        panic!("Expected upload");
    };
    assert!(uploaded.record.chunked);
    assert_eq!(uploaded.record.buffers, 2);

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].method(), "PUT");
    assert_eq!(sent[1].body().as_bytes(), b"2\r\nne\r\n1\r\nw\r\n0\r\n\r\n");
}

#[test]
fn put_if_absent_lookup_failure_is_passed_on() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(403, &[], b"denied");

    let data = b"abc".to_vec();
    let hash = ContentHash::from_bytes(&data);
    let options = PutOptions::default().replace(false);
    let (slot, done) = store_slot();
    connection(&transport).upload_file("/k", Cursor::new(data), Some(hash), options, done);
    transport.run();

    let (outcome, _) = slot.borrow_mut().take().unwrap();
    assert!(matches!(
        outcome,
        Outcome::Fatal(Fatal::Status { status: 403, .. })
    ));
    assert_eq!(transport.sent().len(), 1);
}

#[test]
fn download_into_vec() {
    let transport = Rc::new(ScriptedTransport::new());
    transport.reply(200, &[], b"object body").reply(404, &[], b"");

    let conn = connection(&transport);
    let found: Rc<RefCell<Vec<(Outcome<_>, Vec<u8>)>>> = Rc::new(RefCell::new(Vec::new()));

    let f = found.clone();
    conn.download("/k", Vec::new(), TransferOptions::default(), move |o, sink| {
        f.borrow_mut().push((o, sink))
    });
    let f = found.clone();
    conn.download("/gone", Vec::new(), TransferOptions::default(), move |o, sink| {
        f.borrow_mut().push((o, sink))
    });
    transport.run();

    let mut found = found.borrow_mut();
    let (missing, sink) = found.pop().unwrap();
    assert!(missing.is_fatal());
    assert!(sink.is_empty());

    let (outcome, sink) = found.pop().unwrap();
    assert_eq!(sink, b"object body");
    assert_eq!(outcome.success().unwrap().size(), 11);
}
