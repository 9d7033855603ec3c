use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use esl::{Event, FnHandler, InboundESL};

fn mock_switch(stream: TcpStream, script: impl FnOnce(TcpStream, BufReader<TcpStream>) + Send + 'static) {
    thread::spawn(move || {
        let writer = stream.try_clone().unwrap();
        let reader = BufReader::new(stream);
        script(writer, reader);
    });
}

fn read_command(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    reader.read_line(&mut String::new()).unwrap(); // trailing blank line
    line.trim_end().to_string()
}

/// End to end: authenticate, subscribe, receive a CUSTOM event keyed on its
/// subclass (not the literal `CUSTOM`), then issue an `api` call whose body
/// is exactly `Content-Length` bytes.
#[test]
fn authenticates_subscribes_and_dispatches_custom_events() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        mock_switch(stream, |mut writer, mut reader| {
            writer.write_all(b"Content-Type: auth/request\n\n").unwrap();

            assert_eq!(read_command(&mut reader), "auth secret");
            writer
                .write_all(b"Content-Type: command/reply\nReply-Text: +OK accepted\n\n")
                .unwrap();

            assert_eq!(read_command(&mut reader), "event plain sofia::pre_register");
            writer
                .write_all(b"Content-Type: command/reply\nReply-Text: +OK event listener enabled plain\n\n")
                .unwrap();

            let custom =
                b"Event-Name: CUSTOM\nEvent-Subclass: sofia::pre_register\nvariable_uuid: abc-123\n";
            let frame = format!(
                "Content-Type: text/event-plain\nContent-Length: {}\n\n",
                custom.len()
            );
            writer.write_all(frame.as_bytes()).unwrap();
            writer.write_all(custom).unwrap();

            assert_eq!(read_command(&mut reader), "api status");
            let body = b"UP 0 years, 1 day, 2 hours, 3 minutes, 4 seconds";
            let frame = format!(
                "Content-Type: api/response\nContent-Length: {}\n\n",
                body.len()
            );
            writer.write_all(frame.as_bytes()).unwrap();
            writer.write_all(body).unwrap();
        });
    });

    let mut client = InboundESL::new("127.0.0.1", port, "secret");
    client.connect().unwrap();

    let received: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    let store = received.clone();
    let handler = Arc::new(FnHandler::new("collector", move |event: &Event| {
        store.lock().unwrap().push(event.clone());
    }));
    client.register_handle("sofia::pre_register", handler).unwrap();

    client.subscribe("sofia::pre_register").unwrap();

    // Give the dispatcher a moment to process the event frame.
    thread::sleep(Duration::from_millis(50));
    let events = received.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_subclass(), Some("sofia::pre_register"));
    assert_eq!(events[0].variable("uuid"), Some("abc-123"));
    drop(events);

    let reply = client.api("status").unwrap();
    assert_eq!(
        reply.body_text().as_deref(),
        Some("UP 0 years, 1 day, 2 hours, 3 minutes, 4 seconds")
    );

    client.stop();
}

/// A handler registered directly under the literal `*` wildcard only sees
/// events nothing more specific claimed.
#[test]
fn wildcard_handler_does_not_see_events_with_a_specific_match() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        mock_switch(stream, |mut writer, mut reader| {
            writer.write_all(b"Content-Type: auth/request\n\n").unwrap();
            read_command(&mut reader);
            writer
                .write_all(b"Content-Type: command/reply\nReply-Text: +OK accepted\n\n")
                .unwrap();

            // Synchronization barrier: don't send the event until the test
            // has finished registering its handlers.
            read_command(&mut reader);
            writer.write_all(b"Content-Type: command/reply\nReply-Text: +OK\n\n").unwrap();

            let body = b"Event-Name: HEARTBEAT\n";
            let frame = format!("Content-Type: text/event-plain\nContent-Length: {}\n\n", body.len());
            writer.write_all(frame.as_bytes()).unwrap();
            writer.write_all(body).unwrap();
        });
    });

    let mut client = InboundESL::new("127.0.0.1", port, "secret");
    client.connect().unwrap();

    let wildcard_hits = Arc::new(AtomicUsize::new(0));
    let specific_hits = Arc::new(AtomicUsize::new(0));

    let w = wildcard_hits.clone();
    client
        .register_handle("*", Arc::new(FnHandler::new("w", move |_: &Event| {
            w.fetch_add(1, Ordering::SeqCst);
        })))
        .unwrap();
    let s = specific_hits.clone();
    client
        .register_handle("HEARTBEAT", Arc::new(FnHandler::new("s", move |_: &Event| {
            s.fetch_add(1, Ordering::SeqCst);
        })))
        .unwrap();

    client.send("nop").unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(specific_hits.load(Ordering::SeqCst), 1);
    assert_eq!(wildcard_hits.load(Ordering::SeqCst), 0);

    client.stop();
}
