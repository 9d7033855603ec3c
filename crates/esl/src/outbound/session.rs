use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::connection::{Connection, ConnectionConfig};
use crate::error::Error;
use crate::event::Event;
use crate::registry::Handler;

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// A registered wait for a specific completion event: fired once the event
/// matching `event_name` carries `variable_{variable_name} == expected_value`.
struct ExpectedEvent {
    event_name: String,
    variable_name: String,
    expected_value: String,
    tx: mpsc::Sender<Event>,
}

/// State the session's `before_handle` hook needs, split out from
/// `OutboundSession` itself so it can be built and handed to
/// `Connection::start` before the session object (which wraps the
/// resulting `Connection`) exists.
#[derive(Default)]
struct SessionState {
    expected: Mutex<Vec<ExpectedEvent>>,
    lingering: AtomicBool,
}

impl SessionState {
    fn observe(&self, event: &Event) {
        if event.event_name() == Some("CHANNEL_HANGUP") || event.content_type() == Some("text/disconnect-notice") {
            self.lingering.store(true, Ordering::Release);
        }

        let Some(name) = event.event_name() else { return };
        let mut expected = self.expected.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = expected.iter().position(|w| {
            w.event_name == name && event.variable(&w.variable_name) == Some(w.expected_value.as_str())
        }) {
            let waiter = expected.remove(pos);
            let _ = waiter.tx.send(event.clone());
        }
    }
}

/// Per-call state for an outbound-mode connection: the switch dialed in,
/// `connect` was already issued, and `session_data` holds the channel's
/// variables as returned in that reply (§4.5, §4.6).
///
/// Command methods fail with [`Error::SessionGone`] once the call itself has
/// ended (`lingering`), even if the socket is still open because the
/// session issued `linger` — that's the whole point of linger mode: keep
/// reading post-hangup events without being able to act on the call.
pub struct OutboundSession {
    connection: Arc<Connection>,
    session_data: Event,
    state: Arc<SessionState>,
    response_timeout: Duration,
}

impl OutboundSession {
    /// Performs the outbound handshake (`connect`) on an already-accepted
    /// socket. The expected-event registry and linger tracking are wired in
    /// as a `before_handle` hook — ahead of ordinary dispatch-key routing —
    /// so they see every event regardless of what the caller (or this
    /// session's own public handlers) registers under the same keys;
    /// `config.before_handle`, if set, still runs afterward.
    pub fn accept(socket: TcpStream, mut config: ConnectionConfig) -> Result<Arc<Self>, Error> {
        let state = Arc::new(SessionState::default());
        let user_before = config.before_handle.take();
        let hook_state = state.clone();
        config.before_handle = Some(Arc::new(move |event: &Event| {
            hook_state.observe(event);
            if let Some(user) = &user_before {
                user(event);
            }
        }));

        let connection = Connection::start(socket, config)?;
        let session_data = connection.send("connect")?;

        Ok(Arc::new(Self {
            connection,
            session_data,
            state,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }))
    }

    fn expect(&self, event_name: &str, variable_name: &str, expected_value: &str) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.state.expected.lock().unwrap_or_else(|e| e.into_inner()).push(ExpectedEvent {
            event_name: event_name.to_string(),
            variable_name: variable_name.to_string(),
            expected_value: expected_value.to_string(),
            tx,
        });
        rx
    }

    /// The channel data returned by the initial `connect` command: headers
    /// include `Unique-ID`, `Caller-*`, and every `variable_*` set on the
    /// channel at the moment the dialplan bridged into this socket.
    pub fn session_data(&self) -> &Event {
        &self.session_data
    }

    pub fn uuid(&self) -> Option<&str> {
        self.session_data.header("Unique-ID").or_else(|| self.session_data.variable("uuid"))
    }

    /// `true` while the underlying socket is open, regardless of whether the
    /// call itself has ended — see [`lingering`](Self::lingering).
    pub fn connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// `true` once `CHANNEL_HANGUP` (or a disconnect) has been observed;
    /// `call_command` and its wrappers fail with `SessionGone` from this
    /// point on even if `connected()` is still `true`.
    pub fn lingering(&self) -> bool {
        self.state.lingering.load(Ordering::Acquire)
    }

    /// Loop-condition helper for application handlers:
    /// `while session.while_connected() { ... }`.
    pub fn while_connected(&self) -> bool {
        self.connected() && !self.lingering()
    }

    pub fn register_handle(&self, key: impl Into<String>, handler: Arc<dyn Handler>) {
        self.connection.register_handle(key, handler);
    }

    pub fn unregister_handle(&self, key: &str, handler: &Arc<dyn Handler>) -> Result<(), Error> {
        self.connection.unregister_handle(key, handler)
    }

    /// Wraps an application as a bare `sendmsg ... call-command: execute`
    /// frame (operating on the socket's own channel, per §6) and sends it,
    /// returning the immediate command/reply acknowledgement (not the
    /// application's own completion).
    pub fn call_command(&self, app_name: &str, app_arg: Option<&str>) -> Result<Event, Error> {
        if self.lingering() {
            return Err(Error::SessionGone);
        }

        let mut lines = vec![
            "sendmsg".to_string(),
            "call-command: execute".to_string(),
            format!("execute-app-name: {app_name}"),
        ];
        if let Some(arg) = app_arg {
            lines.push(format!("execute-app-arg: {arg}"));
        }
        self.connection.send(&lines.join("\n"))
    }

    /// Issues `app_name`/`app_arg`, then blocks for its matching
    /// `CHANNEL_EXECUTE_COMPLETE` (keyed on `variable_current_application`).
    /// A `response_timeout` expiry is `Ok(None)`, not an error (§9) — the
    /// application may simply still be running.
    fn call_and_await(&self, app_name: &str, app_arg: Option<&str>) -> Result<Option<Event>, Error> {
        let rx = self.expect("CHANNEL_EXECUTE_COMPLETE", "current_application", app_name);
        self.call_command(app_name, app_arg)?;
        match rx.recv_timeout(self.response_timeout) {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(app = app_name, "response_timeout waiting for application completion");
                Ok(None)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    pub fn myevents(&self) -> Result<Event, Error> {
        self.connection.send("myevents")
    }

    pub fn answer(&self) -> Result<Event, Error> {
        self.call_command("answer", None)
    }

    pub fn park(&self) -> Result<Event, Error> {
        self.call_command("park", None)
    }

    /// Tells the switch to keep this socket open past hangup instead of
    /// closing it immediately, so the application can still read the final
    /// channel events. Does not by itself mark the session lingering — that
    /// happens when `CHANNEL_HANGUP` actually arrives.
    pub fn linger(&self) -> Result<Event, Error> {
        self.connection.send("linger")
    }

    pub fn hangup(&self, cause: &str) -> Result<Event, Error> {
        self.call_command("hangup", Some(cause))
    }

    /// Issues `api uuid_break <uuid>` through the correlator (§4.6, §6) —
    /// an `api` command, not an execute-app, so it goes out even while the
    /// channel isn't mid-application.
    pub fn uuid_break(&self) -> Result<Event, Error> {
        if self.lingering() {
            return Err(Error::SessionGone);
        }
        let uuid = self.uuid().ok_or(Error::SessionGone)?;
        self.connection.send(&format!("api uuid_break {uuid}"))
    }

    /// Plays `file` and blocks until playback finishes or `response_timeout`
    /// expires.
    pub fn playback(&self, file: &str) -> Result<Option<Event>, Error> {
        self.call_and_await("playback", Some(file))
    }

    /// `min`/`max` digit counts, `tries` attempts, `timeout_ms` per prompt,
    /// `terminators` (e.g. `"#"`), prompt `file`, `invalid_file` on
    /// rejection, the channel `var_name` the result lands in, a `regex` the
    /// collected digits must match, `digit_timeout_ms` between digits, and
    /// `transfer_on_fail` (an extension to dial on failure, or `""`) — the
    /// fixed 11-argument form from §4.6. Returns the collected digits from
    /// `variable_<var_name>` once the application completes.
    #[allow(clippy::too_many_arguments)]
    pub fn play_and_get_digits(
        &self,
        min: u32,
        max: u32,
        tries: u32,
        timeout_ms: u32,
        terminators: &str,
        file: &str,
        invalid_file: &str,
        var_name: &str,
        regex: &str,
        digit_timeout_ms: u32,
        transfer_on_fail: &str,
    ) -> Result<Option<String>, Error> {
        let arg = format!(
            "{min} {max} {tries} {timeout_ms} {terminators} {file} {invalid_file} {var_name} {regex} {digit_timeout_ms} {transfer_on_fail}"
        );
        let event = self.call_and_await("play_and_get_digits", Some(&arg))?;
        Ok(event.and_then(|e| e.variable(var_name).map(str::to_string)))
    }

    /// `module_name` (optionally `module:lang`, e.g. `"en"`), `say_type`
    /// (e.g. `"NUMBER"`), `say_method` (e.g. `"pronounced"`), `gender`
    /// (e.g. `"MASCULINE"`, or `""` when not applicable), and the `text` to
    /// speak — the fixed 5-field form from §4.6.
    #[allow(clippy::too_many_arguments)]
    pub fn say(
        &self,
        module_name: &str,
        lang: Option<&str>,
        say_type: &str,
        say_method: &str,
        gender: &str,
        text: &str,
    ) -> Result<Option<Event>, Error> {
        let module = match lang {
            Some(lang) => format!("{module_name}:{lang}"),
            None => module_name.to_string(),
        };
        let arg = format!("{module} {say_type} {say_method} {gender} {text}");
        self.call_and_await("say", Some(&arg))
    }

    /// Sends `exit` to the switch, joins the reader/dispatcher threads, and
    /// closes the socket. Idempotent.
    pub fn stop(&self) {
        self.connection.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn connect_script(writer: &mut impl Write, headers: &[(&str, &str)]) {
        let mut block = String::new();
        block.push_str("Content-Type: command/reply\nReply-Text: +OK\n");
        for (k, v) in headers {
            block.push_str(&format!("{k}: {v}\n"));
        }
        block.push('\n');
        writer.write_all(block.as_bytes()).unwrap();
    }

    #[test]
    fn playback_blocks_until_matching_completion_event() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);

            let mut line = String::new();
            reader.read_line(&mut line).unwrap(); // "connect"
            reader.read_line(&mut String::new()).unwrap();
            connect_script(&mut writer, &[("Unique-ID", "call-1")]);

            // sendmsg frame: 4 header lines + blank.
            for _ in 0..4 {
                reader.read_line(&mut String::new()).unwrap();
            }
            writer
                .write_all(b"Content-Type: command/reply\nReply-Text: +OK\n\n")
                .unwrap();

            // A non-matching completion first (different app), then the real one.
            writer
                .write_all(
                    b"Content-Type: text/event-plain\nContent-Length: 72\n\n\
Event-Name: CHANNEL_EXECUTE_COMPLETE\nvariable_current_application: park\n",
                )
                .unwrap();
            writer
                .write_all(
                    b"Content-Type: text/event-plain\nContent-Length: 76\n\n\
Event-Name: CHANNEL_EXECUTE_COMPLETE\nvariable_current_application: playback\n",
                )
                .unwrap();
        });

        let socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let session = OutboundSession::accept(socket, ConnectionConfig::default()).unwrap();
        assert_eq!(session.uuid(), Some("call-1"));

        let result = session.playback("/tmp/foo.wav").unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn lingering_after_hangup_fails_call_command_but_keeps_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            reader.read_line(&mut String::new()).unwrap();
            reader.read_line(&mut String::new()).unwrap();
            connect_script(&mut writer, &[("Unique-ID", "call-2")]);

            writer
                .write_all(
                    b"Content-Type: text/event-plain\nContent-Length: 27\n\nEvent-Name: CHANNEL_HANGUP\n",
                )
                .unwrap();

            thread::sleep(Duration::from_millis(50));
            // keep the socket open (simulating linger); do not close yet.
            thread::sleep(Duration::from_millis(200));
        });

        let socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let session = OutboundSession::accept(socket, ConnectionConfig::default()).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(session.lingering());
        assert!(session.connected());
        assert_eq!(session.answer(), Err(Error::SessionGone));
    }
}
