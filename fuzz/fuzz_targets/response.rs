#![no_main]
use libfuzzer_sys::fuzz_target;

use hreq_pool::{Client, Input, Output, Settings};
use http::Method;

fuzz_target!(|data: &[u8]| {
    let client = Client::new(Settings {
        max_pipelined_requests: 2,
        ..Default::default()
    });
    let ctx = client.context().clone();

    let r1 = client.request(Method::GET, "127.0.0.1", "/1", |_| {});
    let r2 = client.request(Method::HEAD, "127.0.0.1", "/2", |_| {});
    r1.submit().ok();
    r2.submit().ok();

    let mut conn = None;
    while let Some(out) = ctx.poll_output() {
        if let Output::Connect { conn: c, .. } = out {
            conn = Some(c);
        }
    }

    let conn = match conn {
        Some(c) => c,
        None => return,
    };

    ctx.handle_input(Input::Connected { conn, result: Ok(()) });
    while ctx.poll_output().is_some() {}

    // two reads to exercise partial parsing
    let mid = data.len() / 2;
    ctx.handle_input(Input::Received {
        conn,
        data: data[..mid].to_vec(),
    });
    ctx.handle_input(Input::Received {
        conn,
        data: data[mid..].to_vec(),
    });
    ctx.handle_input(Input::Closed { conn });

    while ctx.poll_output().is_some() {}
});
