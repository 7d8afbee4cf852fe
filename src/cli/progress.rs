//! CLI-specific progress handling for butterfly-reach
//!
//! Renders the library's (stops processed, total stops) callback as a bar.

use std::sync::Arc;

use butterfly_reach::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

/// Creates a progress bar counting stops
pub fn create_progress_bar(total_stops: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_stops);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} stops ({percent}%) ETA: {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Progress bar shared with the pipeline callback
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    pub fn new(total_stops: u64, message: &str) -> Self {
        let pb = create_progress_bar(total_stops);
        eprintln!("{message}");
        Self { pb }
    }

    /// Callback that keeps the bar in sync with the pipeline
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.pb.clone();
        Arc::new(move |processed, total| {
            if pb.length().unwrap_or(0) != total {
                pb.set_length(total);
            }
            pb.set_position(processed);
            if processed >= total {
                pb.finish_with_message("✅ All stops routed");
            }
        })
    }
}
