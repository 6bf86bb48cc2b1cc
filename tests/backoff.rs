use hreq_pool::{Backoff, Clock, Error, Output, RequestState, Settings};
use http::Method;
use std::time::Duration;

mod common;
use common::{closes, collect, connects, ok_response, results, transmits, Harness, ManualClock};

#[test]
fn backoff_doubles_and_resets() {
    let clock = ManualClock::new();
    let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));

    assert!(!b.is_active(clock.now()));

    assert_eq!(b.failed(clock.now()), Duration::from_millis(100));
    assert!(b.is_active(clock.now()));
    clock.advance(99);
    assert!(b.is_active(clock.now()));
    clock.advance(1);
    assert!(!b.is_active(clock.now()));

    assert_eq!(b.failed(clock.now()), Duration::from_millis(200));
    assert_eq!(b.failed(clock.now()), Duration::from_millis(350));
    assert_eq!(b.failed(clock.now()), Duration::from_millis(350));

    b.succeeded();
    assert!(!b.is_active(clock.now()));
    assert_eq!(b.failed(clock.now()), Duration::from_millis(100));
}

#[test]
fn backoff_beyond_clock_range() {
    let clock = ManualClock::new();
    let huge = Duration::from_secs(u64::MAX);
    let mut b = Backoff::new(huge, huge);

    assert_eq!(b.failed(clock.now()), huge);
    assert!(b.is_active(clock.now()));
    assert!(b.until().unwrap() > clock.now());

    // doubling saturates at the max
    assert_eq!(b.failed(clock.now()), huge);
    assert!(b.is_active(clock.now()));

    b.succeeded();
    assert!(!b.is_active(clock.now()));
}

#[test]
fn connect_fails_twice_then_succeeds() -> Result<(), Error> {
    let h = Harness::new(Settings {
        connect_backoff_time_msecs: 100,
        request_max_attempts: 3,
        ..Default::default()
    });
    let client = h.client();
    let res = results();

    let req = client.request(Method::GET, "10.0.0.1", "/", collect(&res));
    req.submit()?;

    let c1 = connects(&h.outputs())[0];
    let failed_at = h.clock.now();
    h.connect_failed(c1);

    // back in the queue, not connecting again yet
    assert_eq!(req.state(), RequestState::Queued);
    let out = h.outputs();
    assert_eq!(closes(&out), vec![c1]);
    assert!(connects(&out).is_empty());
    assert_eq!(
        h.ctx.poll_timeout(),
        Some(failed_at + Duration::from_millis(100))
    );

    h.advance(99);
    assert!(connects(&h.outputs()).is_empty());

    h.advance(1);
    let c2 = connects(&h.outputs())[0];
    assert_ne!(c1, c2);

    // second failure doubles the wait
    let failed_at = h.clock.now();
    h.connect_failed(c2);
    h.outputs();
    assert_eq!(
        h.ctx.poll_timeout(),
        Some(failed_at + Duration::from_millis(200))
    );

    h.advance(199);
    assert!(connects(&h.outputs()).is_empty());

    h.advance(1);
    let c3 = connects(&h.outputs())[0];
    h.connected(c3);
    assert_eq!(transmits(&h.outputs()).len(), 1);

    h.receive(c3, &ok_response("finally"));

    assert_eq!(res.borrow()[0].as_ref().unwrap().payload(), b"finally");
    assert_eq!(req.stats().attempts, 2);
    assert_eq!(req.stats().send_attempts, 0);

    // success resets to the base interval
    h.closed(c3);
    h.outputs();

    let req = client.request(Method::GET, "10.0.0.1", "/", collect(&res));
    req.submit()?;
    let c4 = connects(&h.outputs())[0];
    let failed_at = h.clock.now();
    h.connect_failed(c4);
    h.outputs();
    assert_eq!(
        h.ctx.poll_timeout(),
        Some(failed_at + Duration::from_millis(100))
    );

    Ok(())
}

#[test]
fn connect_attempts_exhausted() -> Result<(), Error> {
    let h = Harness::new(Settings {
        request_max_attempts: 2,
        ..Default::default()
    });
    let client = h.client();
    let res = results();

    let req = client.request(Method::GET, "10.0.0.1", "/", collect(&res));
    req.submit()?;

    let c1 = connects(&h.outputs())[0];
    h.connect_failed(c1);
    h.outputs();
    h.advance(100);

    let c2 = connects(&h.outputs())[0];
    h.connect_failed(c2);

    assert_eq!(req.state(), RequestState::Failed);
    assert!(matches!(res.borrow()[0], Err(Error::Connect(_))));
    assert_eq!(req.stats().attempts, 2);

    Ok(())
}

#[test]
fn backoff_spares_existing_connections() -> Result<(), Error> {
    let h = Harness::new(Settings {
        max_parallel_connections: 2,
        ..Default::default()
    });
    let client = h.client();
    let res = results();

    let r1 = client.request(Method::GET, "10.0.0.1", "/1", collect(&res));
    let r2 = client.request(Method::GET, "10.0.0.1", "/2", collect(&res));
    r1.submit()?;
    r2.submit()?;

    let conns = connects(&h.outputs());
    assert_eq!(conns.len(), 2);

    h.connected(conns[0]);
    h.outputs();

    // r2 has a single attempt and fails, the destination goes into backoff
    h.connect_failed(conns[1]);
    assert!(matches!(res.borrow()[0], Err(Error::Connect(_))));

    h.receive(conns[0], &ok_response("1"));

    // the surviving connection is still used during backoff
    let r3 = client.request(Method::GET, "10.0.0.1", "/3", collect(&res));
    r3.submit()?;

    let out = h.outputs();
    assert!(connects(&out).is_empty());
    assert_eq!(transmits(&out)[0].0, conns[0]);

    Ok(())
}

#[test]
fn resolve_failure_has_no_backoff() -> Result<(), Error> {
    let h = Harness::new(Settings {
        request_max_attempts: 2,
        ..Default::default()
    });
    let client = h.client();
    let res = results();

    let req = client.request(Method::GET, "unknown.example", "/", collect(&res));
    req.submit()?;

    let c1 = h.outputs()[0].conn();
    h.resolve_failed(c1);

    // retried right away
    let out = h.outputs();
    assert_eq!(closes(&out), vec![c1]);
    let c2 = match &out[1] {
        Output::Resolve { conn, .. } => *conn,
        o => panic!("expected resolve, got {:?}", o),
    };

    h.resolve_failed(c2);

    assert_eq!(req.state(), RequestState::Failed);
    assert!(matches!(res.borrow()[0], Err(Error::Resolution(_))));

    Ok(())
}
