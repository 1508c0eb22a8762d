//! Request/response correlation over one external reader channel.
//!
//! Pending requests are tracked per `(kind, uri)`. The first caller for
//! a URI sends the request; every later caller, concurrent or not,
//! waits on the same completion and sees the same contents or error.
//! Completions are kept after they resolve, so a URI is requested at
//! most once for the life of the bridge.
//!
//! ```text
//! read_module(uri) ──► pending[(ReadModule, uri)] ─┬─ exists ──► wait
//!                                                  └─ new ─────► send frame, wait
//! reader thread ◄── frame ── by request id ──► complete(contents | error)
//! ```

use super::protocol::{
    read_frame, write_frame, ListModulesRequest, Message, ReadModuleRequest, ReadResourceRequest,
};
use crate::error::ProtocolError;
use crate::interrupt::Interrupt;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_types::{EvaluatorId, PathElement, RequestId};
use url::Url;

/// How often a waiter re-checks its interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RequestKind {
    ReadModule,
    ListModules,
    ReadResource,
}

impl RequestKind {
    fn response_name(self) -> &'static str {
        match self {
            Self::ReadModule => "ReadModuleResponse",
            Self::ListModules => "ListModulesResponse",
            Self::ReadResource => "ReadResourceResponse",
        }
    }

    fn request(self, request_id: RequestId, evaluator_id: EvaluatorId, uri: String) -> Message {
        match self {
            Self::ReadModule => Message::ReadModuleRequest(ReadModuleRequest {
                request_id,
                evaluator_id,
                uri,
            }),
            Self::ListModules => Message::ListModulesRequest(ListModulesRequest {
                request_id,
                evaluator_id,
                uri,
            }),
            Self::ReadResource => Message::ReadResourceRequest(ReadResourceRequest {
                request_id,
                evaluator_id,
                uri,
            }),
        }
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Module(String),
    Elements(Vec<PathElement>),
    Resource(Vec<u8>),
}

type Outcome = Result<Reply, ProtocolError>;

#[derive(Debug, Default)]
struct Completion {
    outcome: Mutex<Option<Outcome>>,
    ready: Condvar,
}

impl Completion {
    /// First completion wins; later ones are ignored.
    fn complete(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.ready.notify_all();
        }
    }

    fn wait(&self, interrupt: &Interrupt) -> Outcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            if interrupt.is_triggered() {
                return Err(ProtocolError::Interrupted);
            }
            self.ready.wait_for(&mut slot, INTERRUPT_POLL);
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    by_uri: HashMap<(RequestKind, String), Arc<Completion>>,
    in_flight: HashMap<RequestId, (RequestKind, Arc<Completion>)>,
}

struct Shared {
    evaluator_id: EvaluatorId,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    pending: Mutex<Pending>,
    closed: AtomicBool,
}

impl Shared {
    fn send(&self, message: &Message) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock();
        let writer = writer.as_mut().ok_or(ProtocolError::TransportClosed)?;
        write_frame(writer, message)
    }

    fn dispatch(&self, message: Message) {
        let received = message.name();
        let (request_id, kind, outcome) = match message {
            Message::ReadModuleResponse(r) => (
                r.request_id,
                RequestKind::ReadModule,
                match r.error {
                    Some(e) => Err(ProtocolError::Remote(e)),
                    None => Ok(Reply::Module(r.contents.unwrap_or_default())),
                },
            ),
            Message::ListModulesResponse(r) => (
                r.request_id,
                RequestKind::ListModules,
                match r.error {
                    Some(e) => Err(ProtocolError::Remote(e)),
                    None => Ok(Reply::Elements(r.path_elements.unwrap_or_default())),
                },
            ),
            Message::ReadResourceResponse(r) => (
                r.request_id,
                RequestKind::ReadResource,
                match r.error {
                    Some(e) => Err(ProtocolError::Remote(e)),
                    None => Ok(Reply::Resource(r.contents.unwrap_or_default())),
                },
            ),
            request => {
                tracing::warn!(message = request.name(), "ignoring request sent by external reader");
                return;
            }
        };
        let entry = self.pending.lock().in_flight.remove(&request_id);
        match entry {
            None => {
                tracing::warn!(%request_id, message = received, "response for unknown request");
            }
            Some((expected, completion)) if expected == kind => completion.complete(outcome),
            Some((expected, completion)) => {
                completion.complete(Err(ProtocolError::UnexpectedResponse {
                    expected: expected.response_name(),
                    received,
                }));
            }
        }
    }

    /// Fails every in-flight request. Resolved entries keep their outcome.
    fn fail_all(&self, error: &ProtocolError) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<_> = self.pending.lock().in_flight.drain().collect();
        for (_, (_, completion)) in drained {
            completion.complete(Err(error.clone()));
        }
    }
}

fn run_reader(shared: &Shared, mut reader: Box<dyn Read + Send>) {
    loop {
        match read_frame(&mut *reader) {
            Ok(Some(message)) => shared.dispatch(message),
            Ok(None) => {
                tracing::debug!("external reader closed its output");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "external reader channel failed");
                shared.fail_all(&e);
                return;
            }
        }
    }
    shared.fail_all(&ProtocolError::TransportClosed);
}

/// Client side of one external reader channel.
///
/// # Example
///
/// ```no_run
/// use std::os::unix::net::UnixStream;
/// use tessera_runtime::external::ExternalReaderBridge;
/// use tessera_runtime::Interrupt;
/// use tessera_types::EvaluatorId;
/// use url::Url;
///
/// let (ours, _theirs) = UnixStream::pair().expect("socket pair");
/// let bridge = ExternalReaderBridge::new(ours.try_clone().expect("clone"), ours, EvaluatorId::new())
///     .expect("reader thread");
/// let uri = Url::parse("ext:/a.pkl").expect("valid url");
/// let _ = bridge.read_module(&uri, &Interrupt::new());
/// ```
pub struct ExternalReaderBridge {
    shared: Arc<Shared>,
    child: Mutex<Option<Child>>,
}

impl fmt::Debug for ExternalReaderBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalReaderBridge")
            .field("evaluator_id", &self.shared.evaluator_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ExternalReaderBridge {
    /// Starts the reader thread over `reader`; requests go to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the reader thread cannot be spawned.
    pub fn new<R, W>(reader: R, writer: W, evaluator_id: EvaluatorId) -> std::io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared {
            evaluator_id,
            writer: Mutex::new(Some(Box::new(writer))),
            pending: Mutex::new(Pending::default()),
            closed: AtomicBool::new(false),
        });
        let thread_shared = Arc::clone(&shared);
        let reader: Box<dyn Read + Send> = Box::new(reader);
        std::thread::Builder::new()
            .name("tessera-external-reader".into())
            .spawn(move || run_reader(&thread_shared, reader))?;
        Ok(Self {
            shared,
            child: Mutex::new(None),
        })
    }

    pub(crate) fn with_child(self, child: Child) -> Self {
        *self.child.lock() = Some(child);
        self
    }

    #[must_use]
    pub fn evaluator_id(&self) -> EvaluatorId {
        self.shared.evaluator_id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn request(&self, kind: RequestKind, uri: &Url, interrupt: &Interrupt) -> Outcome {
        let key = (kind, uri.to_string());
        let (completion, fresh) = {
            let mut pending = self.shared.pending.lock();
            match pending.by_uri.get(&key) {
                Some(existing) => (Arc::clone(existing), None),
                None => {
                    if self.is_closed() {
                        return Err(ProtocolError::TransportClosed);
                    }
                    let completion = Arc::new(Completion::default());
                    let request_id = RequestId::new();
                    pending.by_uri.insert(key, Arc::clone(&completion));
                    pending
                        .in_flight
                        .insert(request_id, (kind, Arc::clone(&completion)));
                    (completion, Some(request_id))
                }
            }
        };
        if let Some(request_id) = fresh {
            tracing::debug!(%request_id, uri = %uri, ?kind, "sending external reader request");
            let message = kind.request(request_id, self.shared.evaluator_id, uri.to_string());
            if let Err(e) = self.shared.send(&message) {
                self.shared.pending.lock().in_flight.remove(&request_id);
                completion.complete(Err(e));
            }
        }
        completion.wait(interrupt)
    }

    /// # Errors
    ///
    /// The reader's own error as [`ProtocolError::Remote`], or a transport failure.
    pub fn read_module(&self, uri: &Url, interrupt: &Interrupt) -> Result<String, ProtocolError> {
        match self.request(RequestKind::ReadModule, uri, interrupt)? {
            Reply::Module(text) => Ok(text),
            _ => Err(ProtocolError::UnexpectedResponse {
                expected: "ReadModuleResponse",
                received: "other",
            }),
        }
    }

    /// # Errors
    ///
    /// As [`read_module`](Self::read_module).
    pub fn list_modules(
        &self,
        uri: &Url,
        interrupt: &Interrupt,
    ) -> Result<Vec<PathElement>, ProtocolError> {
        match self.request(RequestKind::ListModules, uri, interrupt)? {
            Reply::Elements(elements) => Ok(elements),
            _ => Err(ProtocolError::UnexpectedResponse {
                expected: "ListModulesResponse",
                received: "other",
            }),
        }
    }

    /// # Errors
    ///
    /// As [`read_module`](Self::read_module).
    pub fn read_resource(&self, uri: &Url, interrupt: &Interrupt) -> Result<Vec<u8>, ProtocolError> {
        match self.request(RequestKind::ReadResource, uri, interrupt)? {
            Reply::Resource(bytes) => Ok(bytes),
            _ => Err(ProtocolError::UnexpectedResponse {
                expected: "ReadResourceResponse",
                received: "other",
            }),
        }
    }

    /// Closes the request channel, fails in-flight requests and stops
    /// an owned child process. Idempotent.
    pub fn close(&self) {
        if self.shared.writer.lock().take().is_none() {
            return;
        }
        self.shared.fail_all(&ProtocolError::TransportClosed);
        if let Some(mut child) = self.child.lock().take() {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "external reader already exited");
            }
            if let Err(e) = child.wait() {
                tracing::warn!(error = %e, "failed to reap external reader");
            }
        }
        tracing::debug!(evaluator_id = %self.shared.evaluator_id, "external reader bridge closed");
    }
}

impl Drop for ExternalReaderBridge {
    fn drop(&mut self) {
        self.close();
    }
}
