use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Destination for user-facing status lines. Implementations must serialize
/// output so lines from concurrent workers never interleave.
pub trait ProgressSink: Send + Sync {
    fn line(&self, message: &str);

    /// Announces how many units of work follow.
    fn start(&self, _total: u64) {}

    /// One unit of work finished.
    fn advance(&self) {}

    /// True when nothing visual throttles the loop, so callers should pause
    /// between requests themselves.
    fn needs_pacing(&self) -> bool {
        true
    }

    fn finish(&self) {}
}

/// Plain stdout lines behind a mutex.
#[derive(Default)]
pub struct ConsoleSink {
    lock: Mutex<()>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for ConsoleSink {
    fn line(&self, message: &str) {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{message}");
    }
}

/// `indicatif` bar on stderr; status lines are printed above it.
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(label.to_string());
        Self { bar }
    }

    /// A bar is only worth drawing on an interactive stderr.
    pub fn available() -> bool {
        io::stderr().is_terminal()
    }
}

impl ProgressSink for BarSink {
    fn line(&self, message: &str) {
        self.bar.println(message);
    }

    fn start(&self, total: u64) {
        self.bar.set_length(total);
    }

    fn advance(&self) {
        self.bar.inc(1);
    }

    fn needs_pacing(&self) -> bool {
        false
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
