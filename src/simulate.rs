//! Synthetic reports for exercising the backend without a camera or model.

use chrono::Utc;
use rand::seq::index::sample;
use rand::Rng;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::ReportSink;
use crate::batch::Report;

const TAG_POOL: usize = 100;
const MAX_TAGS: usize = 6;

/// A random report: up to six distinct `pNNN` tags, small in/out counts.
pub fn synthetic_report<R: Rng + ?Sized>(camera_id: u32, rng: &mut R) -> Report {
    let n = rng.gen_range(0..=MAX_TAGS);
    let track_ids = sample(rng, TAG_POOL, n)
        .into_iter()
        .map(|i| format!("p{:03}", i + 1))
        .collect();
    Report {
        camera_id,
        ts: Utc::now(),
        count_in: rng.gen_range(0..=3),
        count_out: rng.gen_range(0..=2),
        track_ids,
    }
}

/// Send one synthetic report every `interval`, forever.
pub fn run<S: ReportSink>(sink: &mut S, camera_id: u32, interval: Duration) -> ! {
    let mut rng = rand::thread_rng();
    info!(camera_id, ?interval, "simulate mode started");
    loop {
        let report = synthetic_report(camera_id, &mut rng);
        match sink.send_report(&report) {
            Ok(()) => info!(
                count_in = report.count_in,
                count_out = report.count_out,
                track_ids = ?report.track_ids,
                "synthetic report sent"
            ),
            Err(e) => warn!(error = %e, "synthetic report failed"),
        }
        thread::sleep(interval);
    }
}
