use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use nebflow_core::app::StatusSnapshot;
use nebflow_core::ports::LogSink;
use std::time::Duration;

const SPINNER_TICK_MS: u64 = 120;

/// Spinner showing the active stage; refreshed from controller snapshots.
#[derive(Clone)]
pub struct RunProgress {
    pb: ProgressBar,
}

impl RunProgress {
    pub fn new(total_stages: usize, visible: bool) -> Self {
        if visible {
            let progress = Self::with_target(total_stages, ProgressDrawTarget::stderr());
            progress
                .pb
                .enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
            progress
        } else {
            Self::with_target(total_stages, ProgressDrawTarget::hidden())
        }
    }

    fn with_target(total_stages: usize, target: ProgressDrawTarget) -> Self {
        let pb = ProgressBar::with_draw_target(Some(total_stages as u64), target)
            .with_style(Self::style());
        pb.set_message("Starting...");
        Self { pb }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} [{pos}/{len}] {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    pub fn update(&self, snapshot: &StatusSnapshot) {
        self.pb.set_position(snapshot.completed_stages.len() as u64);
        let label = snapshot
            .current_label
            .as_deref()
            .or(snapshot.current_stage.as_deref())
            .unwrap_or("Finishing");
        let mut message = label.to_string();
        if snapshot.ticks > 0 {
            message.push_str(&format!(" - {} checks", snapshot.ticks));
        }
        if snapshot.cancel_requested {
            message.push_str(" (cancelling)");
        }
        self.pb.set_message(message);
    }

    pub fn line(&self, text: &str) {
        self.pb.println(text);
    }

    pub fn finish(&self) {
        self.pb.disable_steady_tick();
        self.pb.finish_and_clear();
    }

    /// LogSink that prints above the spinner.
    pub fn log_sink(&self) -> ProgressLog {
        ProgressLog {
            pb: self.pb.clone(),
        }
    }
}

pub struct ProgressLog {
    pb: ProgressBar,
}

/// Prints above the spinner while it is drawn, otherwise logs through tracing.
impl LogSink for ProgressLog {
    fn log(&self, message: &str) {
        if self.pb.is_hidden() {
            tracing::info!(target: "nebflow::progress", "{message}");
        } else {
            self.pb.println(format!("  {message}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::TermLike;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Debug, Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Terminal stand-in that keeps the lines written above the bar.
    #[derive(Debug, Clone, Default)]
    struct Screen(Captured);

    impl TermLike for Screen {
        fn width(&self) -> u16 {
            80
        }

        fn move_cursor_up(&self, _: usize) -> io::Result<()> {
            Ok(())
        }

        fn move_cursor_down(&self, _: usize) -> io::Result<()> {
            Ok(())
        }

        fn move_cursor_right(&self, _: usize) -> io::Result<()> {
            Ok(())
        }

        fn move_cursor_left(&self, _: usize) -> io::Result<()> {
            Ok(())
        }

        fn write_line(&self, s: &str) -> io::Result<()> {
            let mut out = self.0.clone();
            io::Write::write_all(&mut out, format!("{s}\n").as_bytes())
        }

        fn write_str(&self, s: &str) -> io::Result<()> {
            let mut out = self.0.clone();
            io::Write::write_all(&mut out, s.as_bytes())
        }

        fn clear_line(&self) -> io::Result<()> {
            Ok(())
        }

        fn flush(&self) -> io::Result<()> {
            Ok(())
        }
    }

    fn log_with_capture(progress: &RunProgress, message: &str) -> String {
        let logs = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || progress.log_sink().log(message));
        logs.text()
    }

    #[test]
    fn hidden_spinner_logs_through_tracing_only() {
        let progress = RunProgress::new(2, false);
        let logs = log_with_capture(&progress, "NEB (iteration 1) started");
        assert_eq!(logs.matches("NEB (iteration 1) started").count(), 1);
    }

    #[test]
    fn visible_spinner_prints_each_line_once() {
        let screen = Screen::default();
        let progress =
            RunProgress::with_target(2, ProgressDrawTarget::term_like(Box::new(screen.clone())));

        let logs = log_with_capture(&progress, "Interpolating path started");

        assert!(!logs.contains("Interpolating path started"));
        assert_eq!(
            screen.0.text().matches("Interpolating path started").count(),
            1
        );
    }

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            run_id: None,
            running: true,
            cancel_requested: false,
            current_stage: Some("neb_1".to_string()),
            current_label: Some("Running NEB (iteration 1)".to_string()),
            ticks: 4,
            completed_stages: vec!["load_init".to_string()],
            total_stages: 2,
            last_outcome: None,
            last_failure: None,
        }
    }

    #[test]
    fn update_reflects_snapshot() {
        let progress = RunProgress::new(2, false);
        progress.update(&snapshot());

        assert_eq!(progress.pb.position(), 1);
        assert_eq!(progress.pb.message(), "Running NEB (iteration 1) - 4 checks");
    }

    #[test]
    fn cancelling_is_shown() {
        let progress = RunProgress::new(2, false);
        let mut snap = snapshot();
        snap.cancel_requested = true;
        snap.ticks = 0;
        progress.update(&snap);

        assert_eq!(progress.pb.message(), "Running NEB (iteration 1) (cancelling)");
    }
}
