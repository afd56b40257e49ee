use std::fmt;
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::detail::DetailFetcher;
use crate::discover::discover;
use crate::error::{DetailFetchError, DiscoveryError, SessionError};
use crate::place::PlaceRecord;
use crate::recorder::{Recorder, RunState};
use crate::selectors::SelectorSet;
use crate::session::{wait_until, PageSession, Wait};
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    DiscoveryFailed(String),
    PersistenceFailed(String),
    /// The browser went away mid-run; places after it were not attempted.
    SessionLost(String),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
            RunOutcome::DiscoveryFailed(e) => write!(f, "discovery failed: {}", e),
            RunOutcome::PersistenceFailed(e) => write!(f, "could not save places: {}", e),
            RunOutcome::SessionLost(e) => write!(f, "stopped early: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Skip {
    pub name: String,
    pub reason: String,
}

/// What a run did, returned even when it failed.
#[derive(Debug)]
pub struct RunReport {
    pub discovered: usize,
    /// Records carried over from a previous store.
    pub resumed: usize,
    /// Records fetched and stored by this run.
    pub recorded: usize,
    pub skipped: Vec<Skip>,
    pub records: Vec<PlaceRecord>,
    pub outcome: RunOutcome,
    pub output: PathBuf,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Completed | RunOutcome::Cancelled => 0,
            RunOutcome::DiscoveryFailed(_)
            | RunOutcome::PersistenceFailed(_)
            | RunOutcome::SessionLost(_) => 1,
        }
    }

    pub fn print(&self) {
        println!(
            "Discovered {} places: {} recorded, {} skipped{}.",
            self.discovered,
            self.recorded,
            self.skipped.len(),
            if self.resumed > 0 {
                format!(", {} kept from previous run", self.resumed)
            } else {
                String::new()
            }
        );
        for skip in &self.skipped {
            println!("  skipped {}: {}", skip.name, skip.reason);
        }
        if !self.records.is_empty() {
            println!("Saved {} places to {}", self.records.len(), self.output.display());
        }
        if self.outcome != RunOutcome::Completed {
            println!("Run {}.", self.outcome);
        }
    }
}

/// Drives one scrape: open the list, discover, then fetch and record each
/// place in list order. Consumed by `run`.
pub struct Orchestrator<'a, S: PageSession + ?Sized> {
    session: &'a mut S,
    selectors: &'a SelectorSet,
    fetcher: DetailFetcher<'a>,
    recorder: Recorder,
    state: RunState,
    start_url: Option<String>,
    wait: Wait,
    cancel: CancellationToken,
    progress: bool,
}

impl<'a, S: PageSession + ?Sized> Orchestrator<'a, S> {
    pub fn new(
        session: &'a mut S,
        selectors: &'a SelectorSet,
        settings: &Settings,
        recorder: Recorder,
    ) -> Self {
        Orchestrator {
            session,
            selectors,
            fetcher: DetailFetcher::new(
                selectors,
                settings.wait,
                settings.detail_wait,
                settings.expand_wait,
                settings.retry,
            ),
            recorder,
            state: RunState::new(),
            start_url: None,
            wait: settings.wait,
            cancel: CancellationToken::new(),
            progress: false,
        }
    }

    /// Navigate here before discovering; otherwise use the page as it is.
    pub fn start_url(mut self, url: impl Into<String>) -> Self {
        self.start_url = Some(url.into());
        self
    }

    /// Start from records of an earlier run instead of an empty state.
    pub fn resume_from(mut self, state: RunState) -> Self {
        self.state = state;
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn show_progress(mut self, on: bool) -> Self {
        self.progress = on;
        self
    }

    pub async fn run(mut self) -> RunReport {
        let resumed = self.state.len();
        let mut skipped = Vec::new();
        let mut recorded = 0usize;

        let names = match self.open_list().await {
            Ok(names) => names,
            Err(e) => {
                error!("Discovery failed: {}", e);
                return self.report(0, resumed, 0, skipped, RunOutcome::DiscoveryFailed(e.to_string()));
            }
        };
        let discovered = names.len();

        // The store exists and parses from here on, even if nothing gets recorded.
        if let Err(e) = self.recorder.flush(&self.state) {
            error!("Cannot write {}: {}", self.recorder.path().display(), e);
            let outcome = RunOutcome::PersistenceFailed(e.to_string());
            return self.report(discovered, resumed, 0, skipped, outcome);
        }

        let pb = if self.progress {
            progress_bar(discovered as u64)
        } else {
            ProgressBar::hidden()
        };

        let mut outcome = RunOutcome::Completed;
        for (i, name) in names.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Cancelled after {} of {} places", i, discovered);
                outcome = RunOutcome::Cancelled;
                break;
            }
            if !self.state.mark_attempted(&name) {
                debug!("Already have {}", name);
                pb.inc(1);
                continue;
            }

            info!("Fetching {} ({}/{})", name, i + 1, discovered);
            match self.fetcher.fetch(&mut *self.session, &name).await {
                Ok(place) => match self.recorder.record(&mut self.state, place) {
                    Ok(true) => recorded += 1,
                    Ok(false) => skipped.push(Skip {
                        name,
                        reason: "duplicate or unnamed record".into(),
                    }),
                    Err(e) => {
                        error!(
                            "Could not save {} to {}: {}",
                            name,
                            self.recorder.path().display(),
                            e
                        );
                        outcome = RunOutcome::PersistenceFailed(e.to_string());
                        break;
                    }
                },
                Err(DetailFetchError::Session(SessionError::Closed)) => {
                    error!("Browser closed while fetching {}, stopping", name);
                    outcome = RunOutcome::SessionLost(SessionError::Closed.to_string());
                    break;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", name, e);
                    skipped.push(Skip {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            "Recorded {} places ({} skipped) to {}",
            recorded,
            skipped.len(),
            self.recorder.path().display()
        );
        self.report(discovered, resumed, recorded, skipped, outcome)
    }

    async fn open_list(&mut self) -> Result<Vec<String>, DiscoveryError> {
        if let Some(url) = &self.start_url {
            info!("Opening {}", url);
            if !self.session.navigate(url).await? {
                return Err(DiscoveryError::Navigation(format!("could not load {}", url)));
            }
            if let Some(current) = self.session.current_url().await? {
                debug!("Current URL: {}", current);
            }
        }

        for (index, step) in self.selectors.open_list.iter().enumerate() {
            let Some(script) = self.selectors.click_script(index) else {
                continue;
            };
            if !wait_until(&mut *self.session, &script, self.wait).await? {
                return Err(DiscoveryError::Navigation(format!(
                    "nothing to click for {} {:?}",
                    step.selector, step.text
                )));
            }
        }

        let result = discover(&mut *self.session, self.selectors, self.wait).await;
        if matches!(result, Err(DiscoveryError::ListUnavailable { .. })) {
            self.warn_if_signed_out().await;
        }
        result
    }

    async fn warn_if_signed_out(&mut self) {
        if self.selectors.signed_in.is_empty() {
            return;
        }
        match self.session.evaluate(&self.selectors.signed_in_script()).await {
            Ok(Some(v)) if v == "true" => {}
            Ok(_) => warn!("The browser profile does not look signed in; saved lists need an account"),
            Err(e) => debug!("Sign-in check failed: {}", e),
        }
    }

    fn report(
        self,
        discovered: usize,
        resumed: usize,
        recorded: usize,
        skipped: Vec<Skip>,
        outcome: RunOutcome,
    ) -> RunReport {
        RunReport {
            discovered,
            resumed,
            recorded,
            skipped,
            output: self.recorder.path().to_path_buf(),
            records: self.state.into_records(),
            outcome,
        }
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    match ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
    {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => debug!("Progress template rejected: {}", e),
    }
    pb
}
