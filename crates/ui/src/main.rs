// Wallgrid - terminal front end
//
// Reads commands from stdin, forwards them to the task scheduler and renders
// whatever events come back. All state here is owned by the main task.

mod settings;

use anyhow::{Context, Result};
use engine::{
    DownloadRequest, EngineConfig, EventReceiver, SearchQuery, TaskEvent, TaskHandle,
    TaskScheduler,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use settings::Settings;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const THUMBNAILS_PER_SEARCH: usize = 15;

const HELP: &str = "\
commands:
  search [words]   find photos; without words, repeat the last search
  get <n>          download photo n of the current results
  dir <path>       change the save directory
  help             show this text
  quit             exit";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Search(String),
    Get(usize),
    Dir(PathBuf),
    Help,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match word {
        "search" | "s" => Command::Search(rest.to_string()),
        "get" | "g" => match rest.parse() {
            Ok(n) => Command::Get(n),
            Err(_) => Command::Unknown(line.to_string()),
        },
        "dir" if !rest.is_empty() => Command::Dir(PathBuf::from(rest)),
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    };
    Some(command)
}

struct App {
    scheduler: TaskScheduler,
    save_dir: PathBuf,
    last_term: Option<String>,
    // full-size URLs of the current results, in arrival order
    grid: Vec<String>,
    bars: MultiProgress,
    downloads: HashMap<TaskHandle, ProgressBar>,
}

impl App {
    fn new(scheduler: TaskScheduler, settings: Settings, fallback_dir: PathBuf) -> Self {
        Self {
            scheduler,
            save_dir: settings.save_dir_or(fallback_dir),
            last_term: settings.last_term,
            grid: Vec::new(),
            bars: MultiProgress::new(),
            downloads: HashMap::new(),
        }
    }

    fn say(&self, message: impl AsRef<str>) {
        // println through MultiProgress keeps bars intact
        let _ = self.bars.println(message.as_ref());
    }

    /// Returns false when the user asked to quit
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Search(term) => {
                let term = match (term.trim().is_empty(), &self.last_term) {
                    (true, Some(last)) => last.clone(),
                    _ => term,
                };
                self.last_term = Some(term.clone()).filter(|t| !t.trim().is_empty());
                self.grid.clear();
                let handle = self
                    .scheduler
                    .start_search(SearchQuery::new(term.clone(), THUMBNAILS_PER_SEARCH));
                debug!(task = %handle, %term, "search requested");
                self.say(format!("searching for {term:?}..."));
            }
            Command::Get(n) => match n.checked_sub(1).and_then(|i| self.grid.get(i)) {
                Some(url) => {
                    let request = DownloadRequest::new(url.clone(), self.save_dir.clone());
                    let handle = self.scheduler.start_download(request);
                    let bar = self.new_bar();
                    self.downloads.insert(handle, bar);
                }
                None => self.say(format!("no photo #{n} in the current results")),
            },
            Command::Dir(dir) => {
                info!(dir = %dir.display(), "save directory changed");
                self.save_dir = dir;
            }
            Command::Help => self.say(HELP),
            Command::Quit => return false,
            Command::Unknown(line) => self.say(format!("unknown command: {line} (try 'help')")),
        }
        true
    }

    fn settings(&self) -> Settings {
        Settings {
            save_dir: Some(self.save_dir.clone()),
            last_term: self.last_term.clone(),
        }
    }

    fn new_bar(&self) -> ProgressBar {
        let bar = self.bars.add(ProgressBar::new(100));
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    }

    fn handle_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::ThumbnailReady {
                image, full_url, ..
            } => {
                self.grid.push(full_url);
                self.say(format!("  [{}] thumbnail, {} bytes", self.grid.len(), image.len()));
            }
            TaskEvent::SearchCompleted { loaded, .. } => {
                self.say(format!("{loaded} thumbnails loaded"));
            }
            TaskEvent::DownloadProgress {
                handle,
                percent,
                downloaded,
            } => {
                if let Some(bar) = self.downloads.get(&handle) {
                    match percent {
                        Some(percent) => bar.set_position(u64::from(percent)),
                        // size unknown: keep the spinner moving and show bytes
                        None => {
                            bar.tick();
                            bar.set_message(format!("{downloaded} bytes"));
                        }
                    }
                }
            }
            TaskEvent::DownloadCompleted { handle, path } => {
                if let Some(bar) = self.downloads.remove(&handle) {
                    bar.finish_with_message(format!("saved {}", path.display()));
                }
            }
            TaskEvent::DownloadFailed { handle, reason } => {
                if let Some(bar) = self.downloads.remove(&handle) {
                    bar.abandon_with_message(format!("download failed: {reason}"));
                } else {
                    self.say(format!("download failed: {reason}"));
                }
            }
        }
    }
}

/// Runs until `quit` or end of input and hands the app back for shutdown
async fn run(mut app: App, mut events: EventReceiver) -> Result<App> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    app.say(HELP);
    if let Some(term) = &app.last_term {
        app.say(format!("last search: {term:?} (type 'search' to repeat it)"));
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if let Some(command) = parse_command(&line) {
                    if !app.handle_command(command) {
                        break;
                    }
                }
            }
            Some(event) = events.recv() => app.handle_event(event),
        }
    }

    Ok(app)
}

fn default_save_dir() -> PathBuf {
    dirs::picture_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wallgrid=info,engine=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    init_logging();

    let config = EngineConfig::from_env().context("invalid configuration")?;
    if config.client_id.is_empty() {
        warn!("UNSPLASH_ACCESS_KEY is not set; searches will likely be rejected");
    }

    let scheduler = TaskScheduler::new(config).context("failed to start task scheduler")?;
    let events = scheduler.subscribe();

    let settings_path = Settings::default_path();
    let settings = settings_path
        .as_deref()
        .map(Settings::load)
        .unwrap_or_default();
    let app = App::new(scheduler, settings, default_save_dir());
    info!(dir = %app.save_dir.display(), "wallgrid starting");

    let app = run(app, events).await?;
    if let Some(path) = settings_path {
        if let Err(e) = app.settings().save(&path) {
            warn!(error = %e, "failed to save settings");
        }
    }
    Ok(())
}
