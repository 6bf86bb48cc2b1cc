use hreq_pool::{Clock, ConnectionState, Error, Output, RequestState, Settings};
use http::Method;

mod common;
use common::{collect, connects, ok_response, results, transmits, Harness};

fn path_of(transmit: &str) -> &str {
    transmit.split(' ').nth(1).unwrap_or("")
}

#[test]
fn single_request() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let req = client.request(Method::GET, "10.0.0.1", "/path", collect(&res));
    req.add_header("accept", "*/*")?;
    req.submit()?;

    assert_eq!(req.state(), RequestState::Queued);

    let out = h.outputs();
    assert_eq!(out.len(), 1);
    let conn = out[0].conn();
    assert_eq!(
        out[0],
        Output::Connect {
            conn,
            addr: "10.0.0.1:80".parse().unwrap()
        }
    );
    assert_eq!(req.state(), RequestState::Connecting);
    assert_eq!(h.ctx.connection_state(conn), Some(ConnectionState::Connecting));

    h.connected(conn);
    assert_eq!(req.state(), RequestState::Sending);

    let sent = transmits(&h.outputs());
    assert_eq!(
        sent,
        vec![(
            conn,
            "GET /path HTTP/1.1\r\naccept: */*\r\nHost: 10.0.0.1\r\n\r\n".to_string()
        )]
    );
    assert_eq!(req.state(), RequestState::WaitingResponse);

    h.receive(conn, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel");
    assert_eq!(req.state(), RequestState::ReceivingPayload);
    assert!(res.borrow().is_empty());

    h.receive(conn, b"lo");
    assert_eq!(req.state(), RequestState::Finished);

    let res = res.borrow();
    assert_eq!(res.len(), 1);
    let r = res[0].as_ref().unwrap();
    assert_eq!(r.status(), 200);
    assert_eq!(r.reason(), "OK");
    assert_eq!(r.header("content-length"), Some("5"));
    assert_eq!(r.payload(), b"hello");

    assert_eq!(h.ctx.connection_state(conn), Some(ConnectionState::Idle));
    assert_eq!(h.ctx.responses_served(conn), 1);

    Ok(())
}

#[test]
fn reuse_idle_connection() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let r1 = client.request(Method::GET, "10.0.0.1", "/1", collect(&res));
    r1.submit()?;

    let conn = connects(&h.outputs())[0];
    h.connected(conn);
    h.outputs();
    h.receive(conn, &ok_response("one"));

    let r2 = client.request(Method::GET, "10.0.0.1", "/2", collect(&res));
    r2.submit()?;

    // no new connect, straight onto the idle connection
    let out = h.outputs();
    assert!(connects(&out).is_empty());
    assert_eq!(transmits(&out)[0].0, conn);
    assert_eq!(path_of(&transmits(&out)[0].1), "/2");

    h.receive(conn, &ok_response("two"));

    assert_eq!(res.borrow().len(), 2);
    assert_eq!(h.ctx.connection_count(), 1);

    Ok(())
}

#[test]
fn pipeline_order_with_abort() -> Result<(), Error> {
    let h = Harness::new(Settings {
        max_pipelined_requests: 3,
        ..Default::default()
    });
    let client = h.client();
    let res = results();

    let r1 = client.request(Method::GET, "10.0.0.1", "/1", collect(&res));
    let r2 = client.request(Method::GET, "10.0.0.1", "/2", collect(&res));
    let r3 = client.request(Method::GET, "10.0.0.1", "/3", collect(&res));
    r1.submit()?;
    r2.submit()?;
    r3.submit()?;

    let conn = connects(&h.outputs())[0];
    // r2 and r3 wait for the connection to be up
    assert_eq!(h.ctx.queued_requests(), 2);

    h.connected(conn);

    let sent = transmits(&h.outputs());
    let paths: Vec<_> = sent.iter().map(|(_, t)| path_of(t)).collect();
    assert_eq!(paths, vec!["/1", "/2", "/3"]);
    assert_eq!(h.ctx.pipeline_len(conn), 3);

    // abort the middle one while its response is on its way
    r2.abort();
    assert_eq!(r2.state(), RequestState::Aborted);
    assert_eq!(res.borrow().len(), 1);
    assert!(matches!(res.borrow()[0], Err(Error::Aborted)));

    // the slot stays until the response is read off the wire
    assert_eq!(h.ctx.pipeline_len(conn), 3);

    let mut all = ok_response("first");
    all.extend(ok_response("second"));
    all.extend(ok_response("third"));
    h.receive(conn, &all);

    let res = res.borrow();
    assert_eq!(res.len(), 3);
    assert_eq!(res[1].as_ref().unwrap().payload(), b"first");
    assert_eq!(res[2].as_ref().unwrap().payload(), b"third");

    assert_eq!(r1.state(), RequestState::Finished);
    assert_eq!(r3.state(), RequestState::Finished);
    assert_eq!(h.ctx.pipeline_len(conn), 0);
    assert_eq!(h.ctx.responses_served(conn), 3);

    Ok(())
}

#[test]
fn abort_unsent_frees_slot() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let r1 = client.request(Method::GET, "10.0.0.1", "/1", collect(&res));
    let r2 = client.request(Method::GET, "10.0.0.1", "/2", collect(&res));
    r1.submit()?;
    r2.submit()?;

    let conn = connects(&h.outputs())[0];

    // reserved on the connecting connection, never sent
    r1.abort();
    assert_eq!(h.ctx.pipeline_len(conn), 0);

    h.connected(conn);

    let sent = transmits(&h.outputs());
    assert_eq!(sent.len(), 1);
    assert_eq!(path_of(&sent[0].1), "/2");

    h.receive(conn, &ok_response("2"));

    let res = res.borrow();
    assert!(matches!(res[0], Err(Error::Aborted)));
    assert_eq!(res[1].as_ref().unwrap().payload(), b"2");

    Ok(())
}

#[test]
fn in_flight_limit() -> Result<(), Error> {
    let h = Harness::new(Settings {
        max_parallel_connections: 2,
        max_pipelined_requests: 2,
        ..Default::default()
    });
    let client = h.client();
    let res = results();

    let reqs: Vec<_> = (0..6)
        .map(|i| {
            let r = client.request(Method::GET, "10.0.0.1", &format!("/{}", i), collect(&res));
            r.submit().unwrap();
            r
        })
        .collect();

    let conns = connects(&h.outputs());
    assert_eq!(conns.len(), 2);

    for conn in &conns {
        h.connected(*conn);
    }

    let sent = transmits(&h.outputs());
    assert_eq!(sent.len(), 4);

    let active = reqs.iter().filter(|r| r.state().is_active()).count();
    assert_eq!(active, 4);
    assert_eq!(h.ctx.queued_requests(), 2);
    assert_eq!(h.ctx.pipeline_len(conns[0]), 2);
    assert_eq!(h.ctx.pipeline_len(conns[1]), 2);

    // a response frees one slot, one more request goes out
    h.receive(conns[0], &ok_response("0"));

    let sent = transmits(&h.outputs());
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, conns[0]);
    assert_eq!(h.ctx.queued_requests(), 1);

    let active = reqs.iter().filter(|r| r.state().is_active()).count();
    assert_eq!(active, 4);

    Ok(())
}

#[test]
fn destinations_are_separate() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let r1 = client.request(Method::GET, "10.0.0.1", "/", collect(&res));
    let r2 = client.request(Method::GET, "10.0.0.1", "/", collect(&res));
    r2.set_port(8080)?;
    let r3 = client.request(Method::GET, "10.0.0.2", "/", collect(&res));
    r1.submit()?;
    r2.submit()?;
    r3.submit()?;

    let out = h.outputs();
    let addrs: Vec<_> = out
        .iter()
        .filter_map(|o| match o {
            Output::Connect { addr, .. } => Some(addr.to_string()),
            _ => None,
        })
        .collect();

    assert_eq!(addrs, vec!["10.0.0.1:80", "10.0.0.1:8080", "10.0.0.2:80"]);

    Ok(())
}

#[test]
fn urgent_goes_first() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let r1 = client.request(Method::GET, "10.0.0.1", "/1", collect(&res));
    r1.submit()?;

    let conn = connects(&h.outputs())[0];
    h.connected(conn);
    h.outputs();

    let r2 = client.request(Method::GET, "10.0.0.1", "/2", collect(&res));
    let r3 = client.request(Method::GET, "10.0.0.1", "/3", collect(&res));
    let r4 = client.request(Method::GET, "10.0.0.1", "/4", collect(&res));
    r4.set_urgent()?;
    r2.submit()?;
    r3.submit()?;
    r4.submit()?;

    assert!(h.outputs().is_empty());

    let mut order = vec![];
    for _ in 0..3 {
        h.receive(conn, &ok_response("x"));
        let sent = transmits(&h.outputs());
        assert_eq!(sent.len(), 1);
        order.push(path_of(&sent[0].1).to_string());
    }

    assert_eq!(order, vec!["/4", "/2", "/3"]);

    Ok(())
}

#[test]
fn resolve_and_try_next_address() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let req = client.request(Method::GET, "Example.COM", "/", collect(&res));
    req.submit()?;

    let out = h.outputs();
    let conn = out[0].conn();
    assert_eq!(
        out,
        vec![Output::Resolve {
            conn,
            host: "example.com".into()
        }]
    );

    h.resolved(conn, &["10.0.0.5", "10.0.0.6"]);
    assert_eq!(
        h.outputs(),
        vec![Output::Connect {
            conn,
            addr: "10.0.0.5:80".parse().unwrap()
        }]
    );

    h.connect_failed(conn);
    assert_eq!(
        h.outputs(),
        vec![Output::Connect {
            conn,
            addr: "10.0.0.6:80".parse().unwrap()
        }]
    );

    h.connected(conn);
    let sent = transmits(&h.outputs());
    assert_eq!(sent[0].1, "GET / HTTP/1.1\r\nHost: Example.COM\r\n\r\n");

    Ok(())
}

#[test]
fn secure_handshake() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let req = client.request_url(Method::GET, "https://10.0.0.1/secret?a=b", collect(&res))?;
    req.submit()?;

    let out = h.outputs();
    let conn = out[0].conn();
    assert_eq!(
        out,
        vec![Output::Connect {
            conn,
            addr: "10.0.0.1:443".parse().unwrap()
        }]
    );

    h.connected(conn);
    assert_eq!(
        h.outputs(),
        vec![Output::Handshake {
            conn,
            server_name: "10.0.0.1".into()
        }]
    );
    assert_eq!(req.state(), RequestState::Connecting);

    h.handshaked(conn);
    let sent = transmits(&h.outputs());
    assert_eq!(sent[0].1, "GET /secret?a=b HTTP/1.1\r\nHost: 10.0.0.1\r\n\r\n");

    Ok(())
}

#[test]
fn bad_url() {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let err = client
        .request_url(Method::GET, "ftp://example.com/", collect(&res))
        .unwrap_err();
    assert!(matches!(err, Error::User(_)));

    let err = client
        .request_url(Method::GET, "/only/path", collect(&res))
        .unwrap_err();
    assert!(matches!(err, Error::User(_)));
}

#[test]
fn idle_connection_closed() -> Result<(), Error> {
    let h = Harness::new(Settings {
        max_idle_time_msecs: 1000,
        ..Default::default()
    });
    let client = h.client();
    let res = results();

    let req = client.request(Method::GET, "10.0.0.1", "/", collect(&res));
    req.submit()?;

    let conn = connects(&h.outputs())[0];
    h.connected(conn);
    h.outputs();
    h.receive(conn, &ok_response("x"));

    let idle_at = h.clock.now();
    assert_eq!(
        h.ctx.poll_timeout(),
        Some(idle_at + std::time::Duration::from_millis(1000))
    );

    h.advance(999);
    assert!(h.outputs().is_empty());
    assert_eq!(h.ctx.connection_count(), 1);

    h.advance(1);
    assert_eq!(h.outputs(), vec![Output::Close { conn }]);
    assert_eq!(h.ctx.connection_count(), 0);
    assert_eq!(h.ctx.connection_state(conn), None);

    Ok(())
}
