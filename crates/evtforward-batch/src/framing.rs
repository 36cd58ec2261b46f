/// Declares the header, per-message separator and trailer bytes that wrap
/// a batch. The batching algorithm itself never depends on which framing
/// is in effect.
pub trait Framing {
    fn header(&self) -> &[u8];
    fn separator(&self) -> &[u8];
    fn trailer(&self) -> &[u8];
}

/// `{ "events": [ msg1, msg2, ... ] }` — used by the HTTP collector sink.
#[derive(Default, Clone, Copy, Debug)]
pub struct HttpJsonFraming;

impl Framing for HttpJsonFraming {
    fn header(&self) -> &[u8] {
        br#"{ "events": [ "#
    }
    fn separator(&self) -> &[u8] {
        b", "
    }
    fn trailer(&self) -> &[u8] {
        b" ] }"
    }
}

/// Bare newline-delimited JSON — used by the raw TCP sink.
#[derive(Default, Clone, Copy, Debug)]
pub struct NdjsonFraming;

impl Framing for NdjsonFraming {
    fn header(&self) -> &[u8] {
        b""
    }
    fn separator(&self) -> &[u8] {
        b"\n"
    }
    fn trailer(&self) -> &[u8] {
        b""
    }
}
