//! Shared utilities for the wiremock-backed integration tests.

pub mod socket_guard;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use wiremock::{Respond, ResponseTemplate};

/// Responder that serves a fixed sequence of JSON bodies, one per request,
/// repeating the last body once the sequence is exhausted.
///
/// The request counter is shared so tests can assert exactly how many
/// requests the code under test made.
pub struct SequencedJson {
    bodies: Vec<serde_json::Value>,
    request_count: Arc<AtomicUsize>,
}

impl SequencedJson {
    pub fn new(bodies: Vec<serde_json::Value>) -> (Self, Arc<AtomicUsize>) {
        let request_count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                bodies,
                request_count: Arc::clone(&request_count),
            },
            Arc::clone(&request_count),
        )
    }
}

impl Respond for SequencedJson {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        let body = self.bodies.get(n).unwrap_or_else(|| {
            self.bodies.last().expect("SequencedJson needs at least one body")
        });
        ResponseTemplate::new(200).set_body_json(body)
    }
}

/// Responder that fails the first `fail_count` requests with 500, then
/// returns 200 with the given body.
#[allow(dead_code)]
pub struct FlakyBytes {
    fail_count: usize,
    success_body: Vec<u8>,
    request_count: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FlakyBytes {
    pub fn new(fail_count: usize, success_body: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
        let request_count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                fail_count,
                success_body,
                request_count: Arc::clone(&request_count),
            },
            Arc::clone(&request_count),
        )
    }
}

impl Respond for FlakyBytes {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(500).set_body_bytes(b"internal server error".to_vec())
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.success_body.clone())
        }
    }
}

/// A small but structurally valid PNG, unique per seed.
#[allow(dead_code)]
pub fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let mut out = Vec::new();
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([seed, seed, seed]));
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encoding an in-memory PNG cannot fail");
    out
}
