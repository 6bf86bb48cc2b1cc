#![no_main]
use libfuzzer_sys::fuzz_target;

use hreq_pool::chunked::ChunkedDecoder;

fuzz_target!(|data: &[u8]| {
    let mut dec = ChunkedDecoder::new();
    let mut out = vec![];
    let mut pos = 0;

    // one byte at a time must give the same result as all at once
    while pos < data.len() && !dec.is_end() {
        match dec.feed(&data[pos..pos + 1], &mut out) {
            Ok(n) => pos += n,
            Err(_) => return,
        }
    }

    let mut dec2 = ChunkedDecoder::new();
    let mut out2 = vec![];
    if let Ok(n) = dec2.feed(data, &mut out2) {
        assert_eq!(n, pos);
        assert_eq!(out, out2);
    }
});
