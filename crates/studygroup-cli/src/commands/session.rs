use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use clap::{Subcommand, ValueEnum};
use serde_json::json;
use studygroup_core::{
    Config, Event, LocalState, PollKind, SessionCoordinator, SessionSettings, SqliteRecordStore,
};

type Coordinator<'a> = SessionCoordinator<&'a SqliteRecordStore>;
type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[derive(Clone, Copy, ValueEnum)]
pub enum PollArg {
    Location,
    Break,
}

impl From<PollArg> for PollKind {
    fn from(arg: PollArg) -> Self {
        match arg {
            PollArg::Location => PollKind::Location,
            PollArg::Break => PollKind::BreakActivity,
        }
    }
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start a session and open the location poll
    Start {
        /// Members to invite, comma-separated. You are added automatically.
        #[arg(long, value_delimiter = ',')]
        members: Vec<String>,
        /// Meeting date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,
        /// Meeting time (HH:MM), defaults to now
        #[arg(long)]
        time: Option<String>,
    },
    /// Print the current session state as JSON
    Status,
    /// List every session in your record, newest first
    History,
    /// Select (or withdraw) a location option
    VoteLocation {
        option: String,
        #[arg(long)]
        withdraw: bool,
    },
    /// Add a location option to the open poll
    AddLocation { label: String },
    /// Select (or withdraw) a break activity
    VoteBreak {
        option: String,
        #[arg(long)]
        withdraw: bool,
    },
    /// Add a break activity to the open poll
    AddBreak { label: String },
    /// Switch a poll between its voting and results view
    ToggleView {
        #[arg(value_enum)]
        poll: PollArg,
    },
    /// Advance the timers by N seconds
    Tick {
        #[arg(default_value = "1")]
        count: u64,
    },
    /// Tick once per second until the session ends or Ctrl-C
    Run {
        /// Stop after this many seconds
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Pause the pomodoro countdown
    Pause,
    /// Resume the pomodoro countdown
    Resume,
    /// Start, pause or resume the pomodoro countdown
    Toggle,
    /// Restore the full duration of the current phase
    Reset,
    /// Change study and break durations for every member
    Timer {
        /// Study duration in seconds
        study_secs: u64,
        /// Break duration in seconds
        break_secs: u64,
    },
    /// Post a chat message
    Chat { text: String },
    /// Leave the session, or remove another member
    Leave { member: Option<String> },
    /// End the session for everyone
    End,
    /// Re-send session copies that failed to reach members
    Retry,
}

fn state_key(user: &str) -> String {
    format!("device:{user}")
}

fn resolve_user(user: Option<String>, config: &Config) -> CliResult<String> {
    user.or_else(|| config.user.default_user.clone())
        .ok_or_else(|| "no user selected; pass --user or set user.default_user".into())
}

/// Rebuild this device's coordinator from its saved state, or from the
/// user's record on first use.
fn load_coordinator<'a>(
    db: &'a SqliteRecordStore,
    user: &str,
    settings: SessionSettings,
) -> CliResult<Coordinator<'a>> {
    let mut coordinator = SessionCoordinator::new(db, user, settings)?;
    let saved = db
        .kv_get(&state_key(user))?
        .and_then(|json| match serde_json::from_str::<LocalState>(&json) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable device state");
                None
            }
        });
    match saved {
        Some(state) => coordinator.import_state(state),
        None => {
            coordinator.load()?;
        }
    }
    Ok(coordinator)
}

fn save_coordinator(db: &SqliteRecordStore, coordinator: &Coordinator<'_>) -> CliResult {
    let json = serde_json::to_string(&coordinator.export_state())?;
    db.kv_set(&state_key(coordinator.user_id()), &json)?;
    Ok(())
}

fn parse_date(value: Option<String>) -> CliResult<NaiveDate> {
    match value {
        Some(s) => Ok(NaiveDate::parse_from_str(&s, "%Y-%m-%d")?),
        None => Ok(Local::now().date_naive()),
    }
}

fn parse_time(value: Option<String>) -> CliResult<NaiveTime> {
    match value {
        Some(s) => Ok(NaiveTime::parse_from_str(&s, "%H:%M")?),
        None => {
            let now = Local::now().time();
            Ok(NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now))
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_outcome(result: &impl serde::Serialize, events: Vec<Event>) -> CliResult {
    print_json(&json!({ "result": result, "events": events }))
}

pub fn run(action: SessionAction, user: Option<String>) -> CliResult {
    let config = Config::load()?;
    let user = resolve_user(user, &config)?;
    let db = SqliteRecordStore::open()?;
    let mut c = load_coordinator(&db, &user, SessionSettings::from(&config))?;

    match action {
        SessionAction::Start {
            members,
            date,
            time,
        } => {
            let report = c.start(members, parse_date(date)?, parse_time(time)?)?;
            print_outcome(&report, c.drain_events())?;
        }
        SessionAction::Status => {
            if let Err(e) = c.refresh() {
                tracing::warn!(error = %e, "could not refresh from record");
            }
            print_json(&c.snapshot())?;
        }
        SessionAction::History => {
            print_json(&c.history()?)?;
        }
        SessionAction::VoteLocation { option, withdraw } => {
            let report = c.cast_location_vote(&option, !withdraw)?;
            print_outcome(&report, c.drain_events())?;
        }
        SessionAction::AddLocation { label } => {
            let report = c.add_location_option(&label)?;
            print_outcome(&report, c.drain_events())?;
        }
        SessionAction::VoteBreak { option, withdraw } => {
            let report = c.cast_break_vote(&option, !withdraw)?;
            print_outcome(&report, c.drain_events())?;
        }
        SessionAction::AddBreak { label } => {
            let report = c.add_break_option(&label)?;
            print_outcome(&report, c.drain_events())?;
        }
        SessionAction::ToggleView { poll } => {
            let view = c.toggle_poll_view(poll.into())?;
            print_outcome(&view, c.drain_events())?;
        }
        SessionAction::Tick { count } => {
            c.attach();
            for _ in 0..count {
                c.tick()?;
            }
            print_outcome(&c.status(), c.drain_events())?;
        }
        SessionAction::Run { ticks } => {
            c.attach();
            run_loop(&db, &mut c, ticks)?;
        }
        SessionAction::Pause => {
            let changed = c.pause_timer()?;
            print_outcome(&changed, c.drain_events())?;
        }
        SessionAction::Resume => {
            let changed = c.resume_timer()?;
            print_outcome(&changed, c.drain_events())?;
        }
        SessionAction::Toggle => {
            let running = c.toggle_timer()?;
            print_outcome(&running, c.drain_events())?;
        }
        SessionAction::Reset => {
            let changed = c.reset_timer()?;
            print_outcome(&changed, c.drain_events())?;
        }
        SessionAction::Timer {
            study_secs,
            break_secs,
        } => {
            let report = c.update_timer_config(study_secs, break_secs)?;
            print_outcome(&report, c.drain_events())?;
        }
        SessionAction::Chat { text } => {
            let report = c.append_message(&text)?;
            print_outcome(&report, c.drain_events())?;
        }
        SessionAction::Leave { member } => {
            let report = match member {
                Some(member) => c.leave(&member)?,
                None => c.leave_session()?,
            };
            print_outcome(&report, c.drain_events())?;
        }
        SessionAction::End => {
            let report = c.end_session()?;
            print_outcome(&report, c.drain_events())?;
        }
        SessionAction::Retry => {
            let reports = c.retry_pending();
            print_outcome(&reports, c.drain_events())?;
        }
    }

    save_coordinator(&db, &c)
}

/// Drive the coordinator from a one-second interval. Events are printed as
/// JSON lines as they happen; state is saved after every tick.
fn run_loop(db: &SqliteRecordStore, c: &mut Coordinator<'_>, ticks: Option<u64>) -> CliResult {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first tick completes immediately.
        interval.tick().await;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut elapsed = 0u64;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    c.tick()?;
                    for event in c.drain_events() {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    save_coordinator(db, c)?;
                    elapsed += 1;
                    if !c.status().is_active || ticks.is_some_and(|n| elapsed >= n) {
                        break;
                    }
                }
                _ = &mut ctrl_c => {
                    tracing::info!("interrupted; detaching from session");
                    c.detach();
                    break;
                }
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    println!("{}", serde_json::to_string(&c.snapshot())?);
    Ok(())
}
