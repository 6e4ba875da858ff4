//! End-to-end request/reply over the in-process transport.

use std::time::{Duration, Instant};

use filament::{Context, Domain, GenericOption, Msg, ProtoOption, SpError, REP, REQ};

#[test]
fn test_basic_round_trip() {
    filament::dev_tracing::init_tracing();
    let ctx = Context::new();
    let server = ctx.socket(Domain::Sp, REP).unwrap();
    let client = ctx.socket(Domain::Sp, REQ).unwrap();
    ctx.bind(server, "inproc://round-trip").unwrap();
    ctx.connect(client, "inproc://round-trip").unwrap();

    ctx.send(client, Msg::from_chunk(b"question"), false).unwrap();
    let request = ctx.recv(server, false).unwrap();
    assert_eq!(request.body(), b"question");

    ctx.send(server, Msg::from_chunk(b"answer"), false).unwrap();
    let reply = ctx.recv(client, false).unwrap();
    assert_eq!(reply.body(), b"answer");
    assert!(reply.header().is_empty(), "correlation id is stripped");

    ctx.close(client).unwrap();
    ctx.close(server).unwrap();
}

#[test]
fn test_connect_before_bind() {
    // The request is accepted and parked while no binder exists, then
    // delivered once one shows up.
    let ctx = Context::new();
    let client = ctx.socket(Domain::Sp, REQ).unwrap();
    ctx.connect(client, "inproc://late-binder").unwrap();
    ctx.send(client, Msg::from_chunk(b"early"), false).unwrap();

    let server = ctx.socket(Domain::Sp, REP).unwrap();
    ctx.bind(server, "inproc://late-binder").unwrap();

    let request = ctx.recv(server, false).unwrap();
    assert_eq!(request.body(), b"early");
    ctx.send(server, request, false).unwrap();
    assert_eq!(ctx.recv(client, false).unwrap().body(), b"early");

    ctx.close(client).unwrap();
    ctx.close(server).unwrap();
}

#[test]
fn test_new_request_cancels_old_and_stale_reply_is_dropped() {
    let ctx = Context::new();
    let server = ctx.socket(Domain::Sp, REP).unwrap();
    let client = ctx.socket(Domain::Sp, REQ).unwrap();
    ctx.bind(server, "inproc://cancel").unwrap();
    ctx.connect(client, "inproc://cancel").unwrap();

    ctx.send(client, Msg::from_chunk(b"one"), false).unwrap();
    let first = ctx.recv(server, false).unwrap();
    assert_eq!(first.body(), b"one");

    // Supersede the outstanding request before the server answers.
    ctx.send(client, Msg::from_chunk(b"two"), false).unwrap();

    // The answer to "one" now carries a stale correlation id; the
    // client must silently discard it.
    ctx.send(server, Msg::from_chunk(b"stale answer"), false)
        .unwrap();

    let second = ctx.recv(server, false).unwrap();
    assert_eq!(second.body(), b"two");
    ctx.send(server, Msg::from_chunk(b"fresh answer"), false)
        .unwrap();

    let reply = ctx.recv(client, false).unwrap();
    assert_eq!(reply.body(), b"fresh answer");

    ctx.close(client).unwrap();
    ctx.close(server).unwrap();
}

#[test]
fn test_unanswered_request_is_resent() {
    // A raw reply socket sees the duplicate transmissions that the
    // cooked pair hides.
    let ctx = Context::new();
    let server = ctx.socket(Domain::SpRaw, REP).unwrap();
    let client = ctx.socket(Domain::Sp, REQ).unwrap();
    ctx.bind(server, "inproc://resend").unwrap();
    ctx.connect(client, "inproc://resend").unwrap();
    ctx.set_proto_option(client, ProtoOption::ReqResendIvl, 80)
        .unwrap();
    assert_eq!(
        ctx.get_proto_option(client, ProtoOption::ReqResendIvl)
            .unwrap(),
        80
    );

    ctx.send(client, Msg::from_chunk(b"ping"), false).unwrap();
    let first = ctx.recv(server, false).unwrap();
    let second = ctx.recv(server, false).unwrap();
    assert_eq!(first.body(), b"ping");
    assert_eq!(second.body(), b"ping");
    // Resends reuse the correlation id.
    assert_eq!(first.header(), second.header());

    // Answer the duplicate; raw headers route it back unchanged.
    let mut reply = Msg::from_chunk(b"pong");
    reply.set_header(second.header());
    ctx.send(server, reply, false).unwrap();
    assert_eq!(ctx.recv(client, false).unwrap().body(), b"pong");

    ctx.close(client).unwrap();
    ctx.close(server).unwrap();
}

#[test]
fn test_request_survives_server_restart() {
    let ctx = Context::new();
    let client = ctx.socket(Domain::Sp, REQ).unwrap();
    ctx.connect(client, "inproc://restart").unwrap();

    let old = ctx.socket(Domain::Sp, REP).unwrap();
    ctx.bind(old, "inproc://restart").unwrap();

    ctx.send(client, Msg::from_chunk(b"persistent"), false)
        .unwrap();
    // The first server takes the request down with it.
    let lost = ctx.recv(old, false).unwrap();
    assert_eq!(lost.body(), b"persistent");
    ctx.close(old).unwrap();

    let new = ctx.socket(Domain::Sp, REP).unwrap();
    ctx.bind(new, "inproc://restart").unwrap();

    // Losing the carrying connection triggers an immediate resend once
    // the reconnect succeeds; no full resend interval is waited.
    let request = ctx.recv(new, false).unwrap();
    assert_eq!(request.body(), b"persistent");
    ctx.send(new, request, false).unwrap();
    assert_eq!(ctx.recv(client, false).unwrap().body(), b"persistent");

    ctx.close(client).unwrap();
    ctx.close(new).unwrap();
}

#[test]
fn test_recv_timeout_is_a_single_deadline() {
    let ctx = Context::new();
    let client = ctx.socket(Domain::Sp, REQ).unwrap();
    ctx.set_option(client, GenericOption::RecvTimeout, 100).unwrap();
    ctx.send(client, Msg::from_chunk(b"void"), false).unwrap();

    let start = Instant::now();
    assert_eq!(ctx.recv(client, false).unwrap_err(), SpError::WouldBlock);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");

    ctx.close(client).unwrap();
}

#[test]
fn test_req_recv_without_request_is_a_state_error() {
    let ctx = Context::new();
    let client = ctx.socket(Domain::Sp, REQ).unwrap();
    assert_eq!(ctx.recv(client, true).unwrap_err(), SpError::BadState);
    ctx.close(client).unwrap();
}

#[test]
fn test_rep_alternation_is_enforced() {
    let ctx = Context::new();
    let server = ctx.socket(Domain::Sp, REP).unwrap();
    let client = ctx.socket(Domain::Sp, REQ).unwrap();
    ctx.bind(server, "inproc://alternation").unwrap();
    ctx.connect(client, "inproc://alternation").unwrap();

    // Reply with nothing to reply to.
    let (_, err) = ctx.send(server, Msg::from_chunk(b"eager"), false).unwrap_err();
    assert_eq!(err, SpError::BadState);

    ctx.send(client, Msg::from_chunk(b"req"), false).unwrap();
    let request = ctx.recv(server, false).unwrap();
    // A second recv while the reply is owed.
    assert_eq!(ctx.recv(server, true).unwrap_err(), SpError::BadState);
    ctx.send(server, request, false).unwrap();

    assert_eq!(ctx.recv(client, false).unwrap().body(), b"req");
    ctx.close(client).unwrap();
    ctx.close(server).unwrap();
}

#[test]
fn test_dont_wait_never_blocks() {
    let ctx = Context::new();
    let client = ctx.socket(Domain::Sp, REQ).unwrap();
    ctx.send(client, Msg::from_chunk(b"solo"), false).unwrap();
    let start = Instant::now();
    assert_eq!(ctx.recv(client, true).unwrap_err(), SpError::WouldBlock);
    assert!(start.elapsed() < Duration::from_millis(50));
    ctx.close(client).unwrap();
}

#[test]
fn test_duplicate_bind_is_rejected() {
    let ctx = Context::new();
    let a = ctx.socket(Domain::Sp, REP).unwrap();
    let b = ctx.socket(Domain::Sp, REP).unwrap();
    ctx.bind(a, "inproc://taken").unwrap();
    assert_eq!(
        ctx.bind(b, "inproc://taken").unwrap_err(),
        SpError::AddressInUse
    );
    // The name frees up once the binder closes.
    ctx.close(a).unwrap();
    ctx.bind(b, "inproc://taken").unwrap();
    ctx.close(b).unwrap();
}
