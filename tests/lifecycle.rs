use hreq_pool::{Client, Error, RequestState, Settings};
use http::Method;
use std::cell::RefCell;
use std::rc::Rc;

mod common;
use common::{closes, collect, connects, ok_response, results, transmits, Harness};

#[test]
fn abort_queued() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let r1 = client.request(Method::GET, "10.0.0.1", "/1", collect(&res));
    let r2 = client.request(Method::GET, "10.0.0.1", "/2", collect(&res));
    r1.submit()?;
    r2.submit()?;

    h.outputs();
    assert_eq!(h.ctx.queued_requests(), 1);

    r2.abort();

    assert_eq!(r2.state(), RequestState::Aborted);
    assert_eq!(h.ctx.queued_requests(), 0);
    assert_eq!(res.borrow().len(), 1);
    assert_eq!(res.borrow()[0].as_ref().unwrap_err(), &Error::Aborted);

    // aborting again is a no-op
    r2.abort();
    assert_eq!(res.borrow().len(), 1);

    Ok(())
}

#[test]
fn abort_in_flight_discards_response() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let r1 = client.request(Method::GET, "10.0.0.1", "/1", collect(&res));
    let r2 = client.request(Method::GET, "10.0.0.1", "/2", collect(&res));
    r1.submit()?;
    r2.submit()?;

    let conn = connects(&h.outputs())[0];
    h.connected(conn);
    h.outputs();

    r1.abort();
    assert_eq!(res.borrow().len(), 1);

    // the slot stays taken until the response has been read
    assert!(transmits(&h.outputs()).is_empty());

    h.receive(conn, &ok_response("one"));

    let sent = transmits(&h.outputs());
    assert!(sent[0].1.starts_with("GET /2 "));

    h.receive(conn, &ok_response("two"));

    let res = res.borrow();
    assert_eq!(res.len(), 2);
    assert_eq!(res[1].as_ref().unwrap().payload(), b"two");

    Ok(())
}

#[test]
fn abort_in_flight_unanswered_frees_slot() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let r1 = client.request(Method::GET, "10.0.0.1", "/1", collect(&res));
    r1.submit()?;

    let c1 = connects(&h.outputs())[0];
    h.connected(c1);
    assert_eq!(transmits(&h.outputs()).len(), 1);

    r1.abort();

    let r2 = client.request(Method::GET, "10.0.0.1", "/2", collect(&res));
    r2.submit()?;
    assert!(h.outputs().is_empty());
    assert_eq!(r2.state(), RequestState::Queued);

    // the loop must be woken up even though nothing else is pending
    assert!(h.ctx.poll_timeout().is_some());

    h.advance(59_999);
    assert!(h.outputs().is_empty());

    // the server never answered, the connection is given up
    h.advance(1);
    let out = h.outputs();
    assert_eq!(closes(&out), vec![c1]);
    let c2 = connects(&out)[0];
    assert_eq!(r2.state(), RequestState::Connecting);

    h.connected(c2);
    let sent = transmits(&h.outputs());
    assert!(sent[0].1.starts_with("GET /2 "));
    h.receive(c2, &ok_response("two"));

    let res = res.borrow();
    assert_eq!(res.len(), 2);
    assert_eq!(res[0].as_ref().unwrap_err(), &Error::Aborted);
    assert_eq!(res[1].as_ref().unwrap().payload(), b"two");

    Ok(())
}

#[test]
fn callback_invoked_once() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();

    let count = Rc::new(RefCell::new(0));
    let count2 = count.clone();

    let req = client.request(Method::GET, "10.0.0.1", "/", move |_| {
        *count2.borrow_mut() += 1;
    });
    req.submit()?;

    let conn = connects(&h.outputs())[0];
    h.connected(conn);
    h.outputs();
    h.receive(conn, &ok_response("x"));

    req.abort();
    h.closed(conn);

    assert_eq!(*count.borrow(), 1);
    assert_eq!(req.state(), RequestState::Finished);

    Ok(())
}

#[test]
fn dropped_handle_still_completes() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let req = client.request(Method::GET, "10.0.0.1", "/", collect(&res));
    req.submit()?;
    drop(req);

    let conn = connects(&h.outputs())[0];
    h.connected(conn);
    h.outputs();
    h.receive(conn, &ok_response("kept"));

    assert_eq!(res.borrow()[0].as_ref().unwrap().payload(), b"kept");

    Ok(())
}

#[test]
fn callback_may_submit() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = Rc::new(h.client());
    let res = results();

    let follow_up = Rc::new(RefCell::new(None));

    let req = {
        let client = client.clone();
        let follow_up = follow_up.clone();
        let res = res.clone();
        client.clone().request(Method::GET, "10.0.0.1", "/1", move |_| {
            let next = client.request(Method::GET, "10.0.0.1", "/2", collect(&res));
            next.submit().unwrap();
            *follow_up.borrow_mut() = Some(next);
        })
    };
    req.submit()?;

    let conn = connects(&h.outputs())[0];
    h.connected(conn);
    h.outputs();
    h.receive(conn, &ok_response("1"));

    assert!(follow_up.borrow().is_some());

    let sent = transmits(&h.outputs());
    assert!(sent[0].1.starts_with("GET /2 "));

    h.receive(conn, &ok_response("2"));
    assert_eq!(res.borrow()[0].as_ref().unwrap().payload(), b"2");

    Ok(())
}

#[test]
fn deinit_aborts_everything() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();
    let res = results();

    let r1 = client.request(Method::GET, "10.0.0.1", "/1", collect(&res));
    let r2 = client.request(Method::GET, "10.0.0.1", "/2", collect(&res));
    r1.submit()?;
    r2.submit()?;

    let conn = connects(&h.outputs())[0];
    h.connected(conn);
    h.outputs();

    h.ctx.deinit();

    assert_eq!(r1.state(), RequestState::Aborted);
    assert_eq!(r2.state(), RequestState::Aborted);
    assert!(res.borrow().iter().all(|r| r.as_ref().unwrap_err() == &Error::Aborted));
    assert_eq!(closes(&h.outputs()), vec![conn]);
    assert_eq!(h.ctx.connection_count(), 0);

    let r3 = client.request(Method::GET, "10.0.0.1", "/3", collect(&res));
    assert!(matches!(r3.submit(), Err(Error::User(_))));

    // late input for the closed connection is ignored
    h.receive(conn, &ok_response("late"));
    assert!(h.outputs().is_empty());

    Ok(())
}

#[test]
fn client_drop_aborts_own_requests() -> Result<(), Error> {
    let h = Harness::new(Settings {
        max_parallel_connections: 2,
        ..Default::default()
    });
    let a = h.client();
    let b = h.client();
    let res_a = results();
    let res_b = results();

    let ra = a.request(Method::GET, "10.0.0.1", "/a", collect(&res_a));
    let rb = b.request(Method::GET, "10.0.0.1", "/b", collect(&res_b));
    ra.submit()?;
    rb.submit()?;

    let conns = connects(&h.outputs());
    assert_eq!(conns.len(), 2);

    drop(a);

    assert_eq!(ra.state(), RequestState::Aborted);
    assert_eq!(rb.state(), RequestState::Connecting);
    assert_eq!(res_a.borrow()[0].as_ref().unwrap_err(), &Error::Aborted);

    h.connected(conns[1]);
    h.outputs();
    h.receive(conns[1], &ok_response("b"));

    assert_eq!(res_b.borrow()[0].as_ref().unwrap().payload(), b"b");

    Ok(())
}

#[async_std::test]
async fn response_future() -> Result<(), Error> {
    let h = Harness::new(Settings::default());
    let client = h.client();

    let (req, fut) = client.request_future(Method::GET, "10.0.0.1", "/");
    req.submit()?;

    let conn = connects(&h.outputs())[0];
    h.connected(conn);
    h.outputs();
    h.receive(conn, &ok_response("future"));

    let res = fut.await?;
    assert_eq!(res.status(), 200);
    assert_eq!(res.payload(), b"future");

    Ok(())
}

#[async_std::test]
async fn response_future_dropped_request() {
    let client = Client::new(Settings::default());

    let (req, fut) = client.request_future(Method::GET, "10.0.0.1", "/");
    drop(req);

    assert_eq!(fut.await.unwrap_err(), Error::Aborted);
}
