use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Long-running phase spinner. Finish it with a message; dropping it
/// mid-flight leaves the last frame, which is what we want on panic.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .expect("spinner template is valid"),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
