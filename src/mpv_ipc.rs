//! [`Engine`] backed by an `mpv` child process speaking JSON IPC over a unix
//! socket.
//!
//! A reader thread owns the receive half of the socket. Replies are matched
//! to requests by `request_id`; events are queued for
//! [`Engine::wait_event`] and announced through the wakeup callback.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io::{BufRead, BufReader, Write},
    net::Shutdown as SocketShutdown,
    os::unix::net::UnixStream,
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};
use serde_json::{json, Value};

use crate::{
    config::EngineConfig,
    engine::{Engine, EngineError, EngineEvent, EngineNode, PropertyFormat, WakeupCallback},
};

const SUCCESS: &str = "success";
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const EXIT_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
enum IpcMessage {
    Reply {
        request_id: u64,
        error: String,
        data: Value,
    },
    Event(EngineEvent),
}

fn parse_message(line: &str) -> Result<IpcMessage, EngineError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|err| EngineError::Protocol(format!("invalid JSON from engine: {}", err)))?;

    if let Some(event) = value.get("event").and_then(Value::as_str) {
        let event = match event {
            "property-change" => {
                let name = value
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        EngineError::Protocol("property-change event without a name".to_string())
                    })?;
                EngineEvent::PropertyChange {
                    name: name.to_string(),
                    value: value
                        .get("data")
                        .cloned()
                        .map(EngineNode::from)
                        .unwrap_or(EngineNode::None),
                }
            }
            "shutdown" => EngineEvent::Shutdown,
            other => EngineEvent::Other(other.to_string()),
        };
        return Ok(IpcMessage::Event(event));
    }

    let request_id = value
        .get("request_id")
        .and_then(Value::as_u64)
        .ok_or_else(|| EngineError::Protocol(format!("unrecognised engine message: {}", line)))?;
    Ok(IpcMessage::Reply {
        request_id,
        error: value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or(SUCCESS)
            .to_string(),
        data: value.get("data").cloned().unwrap_or(Value::Null),
    })
}

struct Reply {
    error: String,
    data: Value,
}

#[derive(Default)]
struct Inbox {
    events: VecDeque<EngineEvent>,
    /// Request ids a caller is still waiting on.
    awaiting: HashSet<u64>,
    replies: HashMap<u64, Reply>,
    wakeup: Option<Arc<WakeupCallback>>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    inbox: Mutex<Inbox>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().expect("engine inbox lock poisoned")
    }

    fn push_event(&self, event: EngineEvent) {
        let wakeup = {
            let mut inbox = self.lock();
            inbox.events.push_back(event);
            inbox.wakeup.clone()
        };
        self.changed.notify_all();
        if let Some(wakeup) = wakeup {
            wakeup();
        }
    }
}

fn read_messages(stream: UnixStream, shared: Arc<Shared>) {
    let mut saw_shutdown = false;
    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                debug!("Engine IPC read failed: {}", err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_message(&line) {
            Ok(IpcMessage::Reply {
                request_id,
                error,
                data,
            }) => {
                {
                    let mut inbox = shared.lock();
                    if inbox.awaiting.contains(&request_id) {
                        inbox.replies.insert(request_id, Reply { error, data });
                    } else {
                        debug!("Dropping late reply to request {}", request_id);
                    }
                }
                shared.changed.notify_all();
            }
            Ok(IpcMessage::Event(event)) => {
                trace!("Engine event {:?}", event);
                saw_shutdown |= event == EngineEvent::Shutdown;
                shared.push_event(event);
            }
            Err(err) => warn!("Ignoring engine message: {}", err),
        }
    }

    info!("Engine IPC connection closed");
    shared.lock().closed = true;
    if saw_shutdown {
        shared.changed.notify_all();
    } else {
        shared.push_event(EngineEvent::Shutdown);
    }
}

pub struct MpvIpcEngine {
    writer: UnixStream,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    child: Option<Child>,
    socket_path: Option<PathBuf>,
    next_request_id: u64,
    next_observer_id: u64,
    request_timeout: Duration,
}

impl MpvIpcEngine {
    /// Launches the configured binary in idle mode and connects to its IPC
    /// socket, waiting up to `startup_timeout_ms` for it to appear.
    pub fn spawn(config: &EngineConfig) -> Result<Self, EngineError> {
        let socket_path = config
            .ipc_socket
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::temp_dir().join(format!("playsync-{}.sock", std::process::id()))
            });
        if socket_path.exists() {
            debug!("Removing stale IPC socket {}", socket_path.display());
            let _ = std::fs::remove_file(&socket_path);
        }

        let mut child = Command::new(&config.binary)
            .arg("--idle=yes")
            .arg("--force-window=yes")
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .args(&config.extra_args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|err| {
                EngineError::Create(format!("failed to launch {}: {}", config.binary, err))
            })?;

        let timeout = Duration::from_millis(config.startup_timeout_ms);
        let deadline = Instant::now() + timeout;
        let stream = loop {
            match UnixStream::connect(&socket_path) {
                Ok(stream) => break stream,
                Err(err) => {
                    if let Ok(Some(status)) = child.try_wait() {
                        return Err(EngineError::Create(format!(
                            "{} exited during startup: {}",
                            config.binary, status
                        )));
                    }
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(EngineError::Timeout(format!(
                            "no IPC socket at {}: {}",
                            socket_path.display(),
                            err
                        )));
                    }
                    thread::sleep(CONNECT_RETRY_INTERVAL);
                }
            }
        };
        info!(
            "Connected to {} (pid {}) over {}",
            config.binary,
            child.id(),
            socket_path.display()
        );

        match Self::connect(stream, timeout) {
            Ok(mut engine) => {
                engine.child = Some(child);
                engine.socket_path = Some(socket_path);
                Ok(engine)
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(err)
            }
        }
    }

    /// Wraps an already connected IPC stream.
    pub fn connect(stream: UnixStream, request_timeout: Duration) -> Result<Self, EngineError> {
        let reader_stream = stream.try_clone()?;
        let shared = Arc::new(Shared::default());
        let reader_shared = Arc::clone(&shared);
        let reader = thread::Builder::new()
            .name("mpv-ipc-reader".to_string())
            .spawn(move || read_messages(reader_stream, reader_shared))?;

        Ok(Self {
            writer: stream,
            shared,
            reader: Some(reader),
            child: None,
            socket_path: None,
            next_request_id: 1,
            next_observer_id: 1,
            request_timeout,
        })
    }

    fn request(&mut self, command: Vec<Value>) -> Result<Value, EngineError> {
        let label = command
            .first()
            .and_then(Value::as_str)
            .unwrap_or("request")
            .to_string();
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        {
            let mut inbox = self.shared.lock();
            if inbox.closed {
                return Err(EngineError::Unavailable);
            }
            inbox.awaiting.insert(request_id);
        }
        let mut line = json!({ "command": command, "request_id": request_id }).to_string();
        line.push('\n');
        if let Err(err) = self.writer.write_all(line.as_bytes()) {
            self.shared.lock().awaiting.remove(&request_id);
            return Err(err.into());
        }

        let deadline = Instant::now() + self.request_timeout;
        let mut inbox = self.shared.lock();
        let result = loop {
            if let Some(reply) = inbox.replies.remove(&request_id) {
                break if reply.error == SUCCESS {
                    Ok(reply.data)
                } else {
                    Err(EngineError::Protocol(format!("{}: {}", label, reply.error)))
                };
            }
            if inbox.closed {
                break Err(EngineError::Unavailable);
            }
            let now = Instant::now();
            if now >= deadline {
                break Err(EngineError::Timeout(format!(
                    "{} (request {})",
                    label, request_id
                )));
            }
            let (guard, _) = self
                .shared
                .changed
                .wait_timeout(inbox, deadline - now)
                .expect("engine inbox lock poisoned");
            inbox = guard;
        };
        inbox.awaiting.remove(&request_id);
        result
    }

    fn stop_process(&mut self) {
        let _ = self.writer.shutdown(SocketShutdown::Both);
        if let Some(mut child) = self.child.take() {
            let deadline = Instant::now() + EXIT_GRACE_PERIOD;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!("Engine process exited: {}", status);
                        break;
                    }
                    Ok(None) if Instant::now() < deadline => {
                        thread::sleep(CONNECT_RETRY_INTERVAL)
                    }
                    _ => {
                        warn!("Engine process did not exit; killing it");
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                }
            }
        }
        if let Some(socket_path) = self.socket_path.take() {
            let _ = std::fs::remove_file(socket_path);
        }
    }
}

impl Engine for MpvIpcEngine {
    fn set_option(&mut self, name: &str, value: EngineNode) -> Result<(), EngineError> {
        self.set_property(name, value)
    }

    fn observe_property(
        &mut self,
        name: &str,
        _format: PropertyFormat,
    ) -> Result<(), EngineError> {
        let observer_id = self.next_observer_id;
        self.next_observer_id += 1;
        self.request(vec![json!("observe_property"), json!(observer_id), json!(name)])
            .map(|_| ())
    }

    fn set_wakeup_callback(&mut self, callback: WakeupCallback) {
        self.shared.lock().wakeup = Some(Arc::new(callback));
    }

    fn initialize(&mut self) -> Result<(), EngineError> {
        let version = self
            .request(vec![json!("get_property"), json!("mpv-version")])
            .map_err(|err| EngineError::Initialize(err.to_string()))?;
        info!(
            "Engine ready: {}",
            version.as_str().unwrap_or("unknown version")
        );
        Ok(())
    }

    fn wait_event(&mut self, timeout_secs: f64) -> EngineEvent {
        let mut inbox = self.shared.lock();
        if let Some(event) = inbox.events.pop_front() {
            return event;
        }
        if !(timeout_secs > 0.0) {
            return EngineEvent::None;
        }
        let timeout = Duration::try_from_secs_f64(timeout_secs).unwrap_or(Duration::MAX);
        let (mut inbox, _) = self
            .shared
            .changed
            .wait_timeout_while(inbox, timeout, |inbox| {
                inbox.events.is_empty() && !inbox.closed
            })
            .expect("engine inbox lock poisoned");
        inbox.events.pop_front().unwrap_or(EngineEvent::None)
    }

    fn get_property(&mut self, name: &str) -> Option<EngineNode> {
        match self.request(vec![json!("get_property"), json!(name)]) {
            Ok(data) => Some(EngineNode::from(data)),
            Err(err) => {
                trace!("get_property {} failed: {}", name, err);
                None
            }
        }
    }

    fn set_property(&mut self, name: &str, value: EngineNode) -> Result<(), EngineError> {
        self.request(vec![
            json!("set_property"),
            json!(name),
            Value::from(&value),
        ])
        .map(|_| ())
    }

    fn command(&mut self, args: &[String]) -> Result<(), EngineError> {
        self.request(args.iter().map(|arg| json!(arg)).collect())
            .map(|_| ())
    }

    fn terminate(&mut self) {
        if let Err(err) = self.request(vec![json!("quit")]) {
            debug!("Engine quit request failed: {}", err);
        }
        self.stop_process();
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Engine IPC reader thread panicked");
            }
        }
    }
}

impl Drop for MpvIpcEngine {
    fn drop(&mut self) {
        self.stop_process();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn read_request(reader: &mut BufReader<UnixStream>) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read request");
        serde_json::from_str(&line).expect("request is JSON")
    }

    #[test]
    fn test_parse_property_change_and_replies() {
        assert_eq!(
            parse_message(r#"{"event":"property-change","id":3,"name":"time-pos","data":1.5}"#)
                .expect("parses"),
            IpcMessage::Event(EngineEvent::PropertyChange {
                name: "time-pos".to_string(),
                value: EngineNode::Double(1.5),
            })
        );
        assert_eq!(
            parse_message(r#"{"event":"property-change","id":3,"name":"duration"}"#)
                .expect("parses"),
            IpcMessage::Event(EngineEvent::PropertyChange {
                name: "duration".to_string(),
                value: EngineNode::None,
            })
        );
        assert_eq!(
            parse_message(r#"{"event":"file-loaded"}"#).expect("parses"),
            IpcMessage::Event(EngineEvent::Other("file-loaded".to_string()))
        );
        assert_eq!(
            parse_message(r#"{"request_id":7,"error":"property unavailable"}"#).expect("parses"),
            IpcMessage::Reply {
                request_id: 7,
                error: "property unavailable".to_string(),
                data: Value::Null,
            }
        );
        assert!(parse_message("not json").is_err());
        assert!(parse_message(r#"{"data":1}"#).is_err());
    }

    #[test]
    fn test_request_receives_matching_reply_and_queues_events() {
        let (client, server) = UnixStream::pair().expect("socket pair");
        let mut engine =
            MpvIpcEngine::connect(client, Duration::from_secs(5)).expect("connects");

        let server_thread = thread::spawn(move || {
            let mut reader = BufReader::new(server.try_clone().expect("clone"));
            let mut writer = server;
            let request = read_request(&mut reader);
            assert_eq!(request["command"], json!(["get_property", "volume"]));
            let request_id = request["request_id"].as_u64().expect("request id");
            writeln!(
                writer,
                r#"{{"event":"property-change","id":1,"name":"volume","data":55}}"#
            )
            .expect("write event");
            writeln!(
                writer,
                r#"{{"data":70,"request_id":{},"error":"success"}}"#,
                request_id
            )
            .expect("write reply");
            (reader, writer)
        });

        assert_eq!(engine.get_property("volume"), Some(EngineNode::Int64(70)));
        let _server = server_thread.join().expect("server thread");
        assert_eq!(
            engine.wait_event(0.0),
            EngineEvent::PropertyChange {
                name: "volume".to_string(),
                value: EngineNode::Int64(55),
            }
        );
        assert_eq!(engine.wait_event(0.0), EngineEvent::None);
    }

    #[test]
    fn test_error_reply_fails_the_request() {
        let (client, server) = UnixStream::pair().expect("socket pair");
        let mut engine =
            MpvIpcEngine::connect(client, Duration::from_secs(5)).expect("connects");

        let server_thread = thread::spawn(move || {
            let mut reader = BufReader::new(server.try_clone().expect("clone"));
            let mut writer = server;
            let request = read_request(&mut reader);
            assert_eq!(
                request["command"],
                json!(["set_property", "video-rotate", 90])
            );
            let request_id = request["request_id"].as_u64().expect("request id");
            writeln!(
                writer,
                r#"{{"request_id":{},"error":"property unavailable"}}"#,
                request_id
            )
            .expect("write reply");
            (reader, writer)
        });

        let result = engine.set_property("video-rotate", EngineNode::Int64(90));
        assert!(matches!(result, Err(EngineError::Protocol(_))));
        let _server = server_thread.join().expect("server thread");
    }

    #[test]
    fn test_timed_out_request_drops_its_late_reply() {
        let (client, server) = UnixStream::pair().expect("socket pair");
        let mut engine =
            MpvIpcEngine::connect(client, Duration::from_millis(50)).expect("connects");
        let (timed_out, wait_for_timeout) = std::sync::mpsc::channel::<()>();

        let server_thread = thread::spawn(move || {
            let mut reader = BufReader::new(server.try_clone().expect("clone"));
            let mut writer = server;
            let request = read_request(&mut reader);
            let request_id = request["request_id"].as_u64().expect("request id");
            wait_for_timeout.recv().expect("timeout signal");
            writeln!(
                writer,
                r#"{{"data":1,"request_id":{},"error":"success"}}"#,
                request_id
            )
            .expect("write reply");
            writeln!(writer, r#"{{"event":"idle"}}"#).expect("write event");
            (reader, writer)
        });

        assert!(matches!(
            engine.command(&["stop".to_string()]),
            Err(EngineError::Timeout(_))
        ));
        timed_out.send(()).expect("signal server");
        assert_eq!(engine.wait_event(5.0), EngineEvent::Other("idle".to_string()));
        let _server = server_thread.join().expect("server thread");

        let inbox = engine.shared.lock();
        assert!(inbox.replies.is_empty());
        assert!(inbox.awaiting.is_empty());
    }

    #[test]
    fn test_closed_connection_becomes_shutdown_and_wakes() {
        let (client, server) = UnixStream::pair().expect("socket pair");
        let mut engine =
            MpvIpcEngine::connect(client, Duration::from_secs(5)).expect("connects");
        let wakeups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakeups);
        engine.set_wakeup_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        {
            let mut writer = server;
            writeln!(writer, r#"{{"event":"pause"}}"#).expect("write event");
        }

        assert_eq!(
            engine.wait_event(5.0),
            EngineEvent::Other("pause".to_string())
        );
        assert_eq!(engine.wait_event(5.0), EngineEvent::Shutdown);
        assert!(wakeups.load(Ordering::SeqCst) >= 2);
        assert!(matches!(
            engine.command(&["stop".to_string()]),
            Err(EngineError::Unavailable)
        ));
    }
}
