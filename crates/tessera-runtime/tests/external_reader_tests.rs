//! Integration tests for the external reader bridge.
//!
//! A fake reader runs on the far end of a socket pair and counts the
//! requests that actually reach the wire.

#![cfg(unix)]

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;
use std::time::Duration;
use tessera_auth::UriPattern;
use tessera_runtime::external::protocol::{
    read_frame, write_frame, ListModulesResponse, Message, ReadModuleResponse,
    ReadResourceResponse,
};
use tessera_runtime::external::ExternalReaderBridge;
use tessera_runtime::interrupt::Interrupt;
use tessera_runtime::module::factories;
use tessera_runtime::resource::readers;
use tessera_runtime::{EvalError, EvaluatorBuilder, ModuleSource, ProtocolError};
use tessera_types::{EvaluatorId, Value};
use url::Url;

// =============================================================================
// Fake reader
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Reply {
    Module(&'static str),
    Failure(&'static str),
    /// Answers a module read with a listing.
    WrongKind,
}

struct FakeReader {
    requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeReader {
    fn join(self) -> usize {
        self.handle.join().expect("fake reader should finish");
        self.requests.load(Ordering::SeqCst)
    }
}

fn respond(request: Message, reply: Reply) -> Message {
    match (request, reply) {
        (Message::ReadModuleRequest(req), Reply::WrongKind) => {
            Message::ListModulesResponse(ListModulesResponse {
                request_id: req.request_id,
                evaluator_id: req.evaluator_id,
                path_elements: Some(Vec::new()),
                error: None,
            })
        }
        (Message::ReadModuleRequest(req), reply) => {
            let (contents, error) = match reply {
                Reply::Module(text) => (Some(text.to_string()), None),
                _ => (None, Some(failure(reply))),
            };
            Message::ReadModuleResponse(ReadModuleResponse {
                request_id: req.request_id,
                evaluator_id: req.evaluator_id,
                contents,
                error,
            })
        }
        (Message::ReadResourceRequest(req), reply) => {
            let (contents, error) = match reply {
                Reply::Module(text) => (Some(text.as_bytes().to_vec()), None),
                _ => (None, Some(failure(reply))),
            };
            Message::ReadResourceResponse(ReadResourceResponse {
                request_id: req.request_id,
                evaluator_id: req.evaluator_id,
                contents,
                error,
            })
        }
        (other, _) => panic!("unexpected request {}", other.name()),
    }
}

fn failure(reply: Reply) -> String {
    match reply {
        Reply::Failure(message) => message.to_string(),
        _ => "unsupported".to_string(),
    }
}

/// Answers every request after `delay` until the socket goes quiet.
fn fake_reader(mut stream: UnixStream, reply: Reply, delay: Duration) -> FakeReader {
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .expect("should set timeout");
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    let handle = std::thread::spawn(move || {
        while let Ok(Some(request)) = read_frame(&mut stream) {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(delay);
            if write_frame(&mut stream, &respond(request, reply)).is_err() {
                break;
            }
        }
    });
    FakeReader { requests, handle }
}

fn bridge_with(reply: Reply, delay: Duration) -> (Arc<ExternalReaderBridge>, FakeReader) {
    let (ours, theirs) = UnixStream::pair().expect("should create pair");
    let bridge = ExternalReaderBridge::new(
        ours.try_clone().expect("should clone"),
        ours,
        EvaluatorId::from_raw(42),
    )
    .expect("should start bridge");
    (Arc::new(bridge), fake_reader(theirs, reply, delay))
}

fn url(s: &str) -> Url {
    Url::parse(s).expect("should parse url")
}

fn read_concurrently(
    bridge: &Arc<ExternalReaderBridge>,
    uri: &Url,
    callers: usize,
) -> Vec<Result<String, ProtocolError>> {
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let bridge = Arc::clone(bridge);
            let barrier = Arc::clone(&barrier);
            let uri = uri.clone();
            std::thread::spawn(move || {
                barrier.wait();
                bridge.read_module(&uri, &Interrupt::new())
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("caller should finish"))
        .collect()
}

// =============================================================================
// Bridge
// =============================================================================

#[test]
fn concurrent_reads_of_one_uri_share_one_request() {
    let (bridge, reader) = bridge_with(Reply::Module("a = 1"), Duration::from_millis(100));
    let results = read_concurrently(&bridge, &url("ext:/a.pkl"), 2);
    for result in &results {
        assert_eq!(result.as_deref(), Ok("a = 1"));
    }
    // A later read is served from the retained entry.
    assert_eq!(
        bridge.read_module(&url("ext:/a.pkl"), &Interrupt::new()).as_deref(),
        Ok("a = 1")
    );
    bridge.close();
    assert_eq!(reader.join(), 1);
}

#[test]
fn shared_failure_reaches_every_caller() {
    let (bridge, reader) = bridge_with(Reply::Failure("no such module"), Duration::from_millis(100));
    let results = read_concurrently(&bridge, &url("ext:/missing.pkl"), 3);
    for result in results {
        assert_eq!(result, Err(ProtocolError::Remote("no such module".into())));
    }
    bridge.close();
    assert_eq!(reader.join(), 1);
}

#[test]
fn distinct_uris_are_not_coalesced() {
    let (bridge, reader) = bridge_with(Reply::Module("x = 1"), Duration::ZERO);
    for uri in ["ext:/a.pkl", "ext:/b.pkl"] {
        assert!(bridge.read_module(&url(uri), &Interrupt::new()).is_ok());
    }
    bridge.close();
    assert_eq!(reader.join(), 2);
}

#[test]
fn mismatched_response_type_is_rejected() {
    let (bridge, reader) = bridge_with(Reply::WrongKind, Duration::ZERO);
    let err = bridge
        .read_module(&url("ext:/a.pkl"), &Interrupt::new())
        .expect_err("should reject listing");
    assert!(
        matches!(err, ProtocolError::UnexpectedResponse { expected: "ReadModuleResponse", .. }),
        "got: {err:?}"
    );
    bridge.close();
    reader.join();
}

#[test]
fn peer_hangup_fails_pending_reads() {
    let (ours, theirs) = UnixStream::pair().expect("should create pair");
    let bridge = ExternalReaderBridge::new(
        ours.try_clone().expect("should clone"),
        ours,
        EvaluatorId::new(),
    )
    .expect("should start bridge");
    let hangup = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        drop(theirs);
    });
    let err = bridge
        .read_module(&url("ext:/a.pkl"), &Interrupt::new())
        .expect_err("peer went away");
    assert_eq!(err, ProtocolError::TransportClosed);
    hangup.join().expect("should finish");
}

// =============================================================================
// Through an evaluator
// =============================================================================

#[test]
fn evaluator_loads_modules_and_resources_from_external_reader() {
    let (bridge, reader) = bridge_with(Reply::Module("greeting = \"hi\""), Duration::ZERO);
    let evaluator = EvaluatorBuilder::preconfigured()
        .add_module_key_factory(factories::external("ext", Arc::clone(&bridge)))
        .add_resource_reader(readers::external("extres", Arc::clone(&bridge)))
        .add_allowed_modules([UriPattern::prefix("ext:")])
        .expect("no custom policy")
        .add_allowed_resources([UriPattern::prefix("extres:")])
        .expect("no custom policy")
        .build()
        .expect("should build");

    let value = evaluator
        .evaluate_module(&ModuleSource::uri("ext:/greeting.pkl"))
        .expect("should evaluate external module");
    assert_eq!(value.get("greeting"), Some(&Value::from("hi")));

    let text = evaluator
        .evaluate_expression(
            &ModuleSource::text("raw = \"${read extres:/greeting.txt}\"\n"),
            "raw",
        )
        .expect("should read external resource");
    assert_eq!(text, Value::from("greeting = \"hi\""));

    evaluator.close();
    assert!(bridge.is_closed());
    assert_eq!(reader.join(), 2);
}

#[test]
fn disallowed_external_scheme_never_reaches_the_wire() {
    let (bridge, reader) = bridge_with(Reply::Module("a = 1"), Duration::ZERO);
    let evaluator = EvaluatorBuilder::preconfigured()
        .add_module_key_factory(factories::external("ext", Arc::clone(&bridge)))
        .build()
        .expect("should build");
    let err = evaluator
        .evaluate_module(&ModuleSource::uri("ext:/a.pkl"))
        .expect_err("ext: is not allowed");
    assert!(matches!(err, EvalError::AccessDenied(_)), "got: {err:?}");
    evaluator.close();
    assert_eq!(reader.join(), 0);
}

#[test]
fn close_during_external_read_reports_session_unavailable() {
    let (bridge, reader) = bridge_with(Reply::Module("a = 1"), Duration::from_secs(1));
    let evaluator = EvaluatorBuilder::preconfigured()
        .add_module_key_factory(factories::external("ext", Arc::clone(&bridge)))
        .add_allowed_modules([UriPattern::prefix("ext:")])
        .expect("no custom policy")
        .build()
        .expect("should build");

    let err = std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(100));
            evaluator.close();
        });
        evaluator
            .evaluate_module(&ModuleSource::uri("ext:/slow.pkl"))
            .expect_err("closed while waiting on the reader")
    });
    assert!(matches!(err, EvalError::SessionUnavailable), "got: {err:?}");
    assert!(!err.closes_session());
    assert!(evaluator.is_closed());
    assert_eq!(reader.join(), 1);
}
