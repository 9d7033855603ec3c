use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use esl_net::{CandidateListener, connect_with_timeout};

#[test]
fn binds_first_available_candidate_port() {
    // Occupy the first candidate so the listener has to fall through to the
    // second one, mirroring the "first that binds wins" contract.
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let taken_port = blocker.local_addr().unwrap().port();

    let free_port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    let listener =
        CandidateListener::bind_first_available("127.0.0.1", &[taken_port, free_port]).unwrap();

    assert_eq!(listener.local_addr().port(), free_port);
    drop(blocker);
}

#[test]
fn accept_loop_yields_on_would_block() {
    let listener = CandidateListener::bind_first_available("127.0.0.1", &[0]).unwrap();
    let addr = listener.local_addr();

    assert!(listener.try_accept().unwrap().is_none());

    let client = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"hi").unwrap();
    });

    let (mut accepted, _peer) = loop {
        if let Some(pair) = listener.try_accept().unwrap() {
            break pair;
        }
        thread::sleep(Duration::from_millis(5));
    };

    let mut buf = [0u8; 2];
    accepted.set_nonblocking(false).unwrap();
    accepted.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hi");

    client.join().unwrap();
}

#[test]
fn connect_with_timeout_fails_fast_on_unroutable_address() {
    // TEST-NET-1, RFC 5737: reserved for documentation, never routable.
    let err = connect_with_timeout("192.0.2.1", 9, Duration::from_millis(200));
    assert!(err.is_err());
}
