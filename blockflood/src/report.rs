//! Printing a run summary to stdout.

use std::fmt;
use std::time::Duration;

use bytesize::ByteSize;
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::run::RunReport;
use crate::upload::UploadReport;

/// Prints the upload statistics and, on the coordinator, the commit outcome.
pub fn print_report(report: &RunReport) {
    print_upload(&report.upload);

    if let Some(commit) = &report.commit {
        println!(
            "{} ({} blocks)",
            "COMMIT:".bold().green(),
            commit.blocks.bold()
        );
        println!(
            "  waited {:.2?} over {} polls",
            commit.waited.bold(),
            commit.polls
        );
    }
}

fn print_upload(upload: &UploadReport) {
    println!(
        "{} ({} blocks, {} in flight at most)",
        "UPLOAD:".bold().green(),
        upload.blocks.bold(),
        upload.peak_concurrency
    );
    if upload.blocks == 0 {
        return;
    }

    print!("  {:.2} in {:.2?}", ByteSize::b(upload.bytes).bold(), upload.elapsed);
    print_throughput(upload.bytes, upload.elapsed);
    print_percentiles(&upload.latency, Duration::from_secs_f64);
}

fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let ops = sketch.count();
    let (Some(sum), Some(p50), Some(p90), Some(p99)) = (
        sketch.sum(),
        quantile(sketch, 0.5),
        quantile(sketch, 0.9),
        quantile(sketch, 0.99),
    ) else {
        return;
    };

    let avg = map(sum / ops as f64);
    let (p50, p90, p99) = (map(p50), map(p90), map(p99));
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

fn quantile(sketch: &DDSketch, q: f64) -> Option<f64> {
    sketch.quantile(q).ok().flatten()
}

fn print_throughput(total: u64, duration: Duration) {
    if duration.is_zero() {
        println!();
        return;
    }
    let throughput = (total as f64 / duration.as_secs_f64()) as u64;
    println!(", {:.2}/s", ByteSize::b(throughput).bold());
}
