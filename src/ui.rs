//! Stderr progress for `form_replay`.
//!
//! On a terminal each stage is a spinner carrying a running rep tally; in
//! plain mode the stage name and result are printed as lines.

use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum UiMode {
    /// Spinner when stderr is a terminal.
    #[default]
    Auto,
    Plain,
    Pretty,
}

pub struct Progress {
    spinner: bool,
}

impl Progress {
    pub fn new(mode: UiMode, stderr_is_tty: bool) -> Self {
        let spinner = match mode {
            UiMode::Auto => stderr_is_tty,
            UiMode::Plain => false,
            UiMode::Pretty => true,
        };
        Self { spinner }
    }

    pub fn stage(&self, name: &'static str) -> Stage {
        let bar = self.spinner.then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar.set_message(name);
            bar
        });
        if bar.is_none() {
            eprintln!("-- {}", name);
        }
        Stage {
            name,
            started: Instant::now(),
            bar,
        }
    }
}

pub struct Stage {
    name: &'static str,
    started: Instant,
    bar: Option<ProgressBar>,
}

impl Stage {
    /// Show how many reps have been scored so far.
    pub fn tally(&self, reps: u64, correct: u64) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{}: {} reps, {} good form", self.name, reps, correct));
        }
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        let line = format!(
            "{} done in {:.1}s",
            self.name,
            self.started.elapsed().as_secs_f64()
        );
        match &self.bar {
            Some(bar) => bar.finish_with_message(line),
            None => eprintln!("{}", line),
        }
    }
}
