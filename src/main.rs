use std::{
    error::Error,
    io::BufRead,
    path::{Path, PathBuf},
    thread,
    time::{Duration, SystemTime},
};

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use wakeup_clock::{
    alarm::{Alarm, AlarmBuilder, Media},
    book::AlarmBook,
    calendar::{self, to_epoch_millis, Day, DaySet},
    communication::{AlarmEvent, UserAction},
    config::Config,
    devices::{Devices, TypedNfc},
    nfc,
    scheduler::{is_current, AlarmRef, FireKind, LocalTimers, Scheduler},
    wakeup::{Outcome, SnoozeCounter, WakeUp},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// config file to use instead of the default one
    #[clap(long, short)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// write a default config
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// add an alarm, time as HH:MM
    Add {
        time: String,
        /// comma separated, e.g. mon,tue,fri
        #[clap(long, short, value_delimiter = ',')]
        days: Vec<Day>,
        /// ring once instead of every week
        #[clap(long)]
        once: bool,
        #[clap(long, short)]
        name: Option<String>,
        /// require scanning this tag to dismiss, "" accepts any tag
        #[clap(long)]
        nfc_tag: Option<String>,
        #[clap(long)]
        volume: Option<u8>,
        #[clap(long)]
        no_vibrate: bool,
        /// sound file to play instead of the default tone
        #[clap(long)]
        sound: Option<PathBuf>,
    },
    List,
    /// turn an alarm on or off
    Toggle { id: i64 },
    Remove { id: i64 },
    /// show when the next alarm rings
    Next,
    /// keep running and ring alarms
    Run,
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn main() -> Result<(), Box<dyn Error>> {
    // initilize the logger
    simple_file_logger::init_logger!("wakeup_clock").expect("couldn't initialize logger");

    let args = Args::parse();
    let path = match args.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    match args.command {
        Some(Command::Init { force }) => {
            if force || !Config::is_config_present(&path) {
                Config::new().save(&path)?;
                std::fs::create_dir_all(Config::sounds_path()?)?;
                println!("wrote {}", path.display());
            } else {
                println!("{} already exists, use --force to overwrite", path.display());
            }
        }
        Some(Command::Add {
            time,
            days,
            once,
            name,
            nfc_tag,
            volume,
            no_vibrate,
            sound,
        }) => {
            let time = NaiveTime::parse_from_str(&time, "%H:%M")?;
            let mut builder = AlarmBuilder::new()
                .time(time.hour(), time.minute())
                .days(days.into_iter().collect::<DaySet>())
                .repeat(!once)
                .vibrate(!no_vibrate);
            if let Some(name) = name {
                builder = builder.name(name);
            }
            if let Some(tag) = nfc_tag {
                builder = builder.nfc(normalize_tag(&tag));
            }
            if let Some(volume) = volume {
                builder = builder.volume(volume);
            }
            if let Some(sound) = sound {
                builder = builder.media(Media::file(sound.to_string_lossy()));
            }
            edit_config(&path, |book| {
                let id = book.add(builder.build()?);
                println!("added alarm {id}");
                Ok(())
            })?;
        }
        Some(Command::List) => {
            let config = Config::load_or_default(&path)?;
            let use_24h = config.settings.use_24h;
            let now = now();
            for alarm in &config.alarms {
                match calendar::next_alarm(alarm, now) {
                    Some(next) => println!(
                        "{} - next {} (in {})",
                        alarm.describe(use_24h),
                        next.at.format("%a %e %b %H:%M"),
                        calendar::format_remaining(now, next.at)
                    ),
                    None => println!("{}", alarm.describe(use_24h)),
                }
            }
        }
        Some(Command::Toggle { id }) => edit_config(&path, |book| {
            let enabled = book.edit(id, |alarm| {
                alarm.set_enabled(!alarm.enabled());
                alarm.enabled()
            })?;
            println!("alarm {id} {}", if enabled { "on" } else { "off" });
            Ok(())
        })?,
        Some(Command::Remove { id }) => edit_config(&path, |book| {
            book.remove(id)?;
            println!("removed alarm {id}");
            Ok(())
        })?,
        Some(Command::Next) => {
            let config = Config::load_or_default(&path)?;
            let now = now();
            let next = config
                .alarms
                .iter()
                .filter_map(|alarm| calendar::next_alarm(alarm, now).map(|next| (alarm, next)))
                .min_by_key(|(_, next)| next.at);
            match next {
                Some((alarm, next)) => println!(
                    "{} rings {} (in {})",
                    alarm.describe(config.settings.use_24h),
                    next.at.format("%a %e %b %H:%M"),
                    calendar::format_remaining(now, next.at)
                ),
                None => println!("no alarms set"),
            }
        }
        Some(Command::Run) | None => Daemon::new(path)?.run(),
    }
    Ok(())
}

/// Loads the config, lets `edit` change the alarms, and writes it back.
fn edit_config(
    path: &Path,
    edit: impl FnOnce(&mut AlarmBook) -> wakeup_clock::Result<()>,
) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load_or_default(path)?;
    let mut book = AlarmBook::new(std::mem::take(&mut config.alarms));
    let changes = book.subscribe();
    edit(&mut book)?;
    for event in changes.try_iter() {
        if let AlarmEvent::Changed(change) = event {
            if change.re_enabled {
                config.snoozes.set_snooze_count(change.alarm.id(), 0);
            }
        }
    }
    config.alarms = book.to_vec();
    config.save(path)?;
    Ok(())
}

/// Accepts tag ids typed as `04:a2:ff` as well as `04A2FF`.
fn normalize_tag(typed: &str) -> String {
    let bytes: Option<Vec<u8>> = typed
        .split(':')
        .map(|byte| u8::from_str_radix(byte, 16).ok())
        .collect();
    match bytes {
        Some(bytes) if typed.contains(':') => nfc::tag_id(&bytes),
        _ => typed.to_uppercase(),
    }
}

fn read_actions() -> Receiver<UserAction> {
    let (sender, receiver) = unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(Result::ok) {
            match UserAction::parse(&line) {
                Some(action) => {
                    if sender.send(action).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => println!("unknown command {line:?}"),
            }
        }
    });
    receiver
}

struct Daemon {
    path: PathBuf,
    config: Config,
    book: AlarmBook,
    changes: Receiver<AlarmEvent>,
    scheduler: Scheduler<LocalTimers>,
    ringing: Option<WakeUp>,
    scanned: Option<String>,
    /// the alarms as they were last read from or written to disk
    written: Vec<Alarm>,
    modified: Option<SystemTime>,
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

impl Daemon {
    fn new(path: PathBuf) -> Result<Self, Box<dyn Error>> {
        let mut config = Config::load_or_default(&path)?;
        let written = config.alarms.clone();
        let mut book = AlarmBook::new(std::mem::take(&mut config.alarms));
        let changes = book.subscribe();
        let mut scheduler = Scheduler::new(LocalTimers::new());
        let stray = scheduler.reconcile(book.iter(), now());
        info!(
            "loaded {} alarm(s), {} timer(s) registered, {stray} stray",
            book.len(),
            scheduler.timers().len()
        );
        let mut daemon = Self {
            modified: modified(&path),
            path,
            config,
            book,
            changes,
            scheduler,
            ringing: None,
            scanned: None,
            written,
        };
        daemon.reattach();
        if daemon.book.to_vec() != daemon.written {
            // store the ids handed out while loading
            daemon.save();
        }
        Ok(daemon)
    }

    fn devices(&self) -> Devices {
        let mut devices = Devices::console();
        if self.config.settings.nfc_reader {
            devices.nfc = Box::new(TypedNfc::default());
        }
        #[cfg(feature = "sound")]
        if let Ok(sounds) = Config::sounds_path() {
            devices.audio = Box::new(wakeup_clock::devices::RodioAudio::new(
                sounds.join("default.mp3"),
            ));
        }
        devices
    }

    /// picks up an alarm that was ringing when the daemon last stopped
    fn reattach(&mut self) {
        let Some(active) = self.config.active.take() else {
            return;
        };
        let Some(alarm) = self.book.get(active.id).cloned() else {
            return;
        };
        info!("alarm {} was ringing, picking it back up", alarm.id());
        let mut wake = WakeUp::new(alarm, active.day, self.config.settings.clone(), self.devices());
        wake.reattach(now());
        self.ringing = Some(wake);
    }

    fn run(mut self) {
        println!("wakeup clock running, {} alarm(s)", self.book.len());
        let actions = read_actions();
        loop {
            let now = now();
            self.refresh();
            for fire in self.scheduler.timers_mut().due(to_epoch_millis(now)) {
                self.on_fire(fire, now);
            }
            let timed_out = self
                .ringing
                .as_mut()
                .and_then(|wake| wake.tick(now, &mut self.config.snoozes));
            if let Some(outcome) = timed_out {
                self.finish(outcome, now);
            }
            match actions.recv_timeout(Duration::from_millis(250)) {
                Ok(UserAction::Quit) => break,
                Ok(action) => self.on_action(action, now),
                Err(RecvTimeoutError::Timeout) => {}
                // stdin is closed, keep ringing alarms without input
                Err(RecvTimeoutError::Disconnected) => thread::sleep(Duration::from_millis(250)),
            }
            self.apply_changes(now);
        }
        self.save();
        info!("stopped");
    }

    fn on_fire(&mut self, fire: AlarmRef, now: NaiveDateTime) {
        let Some(alarm) = self.book.get(fire.id).cloned() else {
            debug!("timer for removed alarm {} ignored", fire.id);
            return;
        };
        if !is_current(&alarm, &fire) {
            debug!("stale timer for alarm {} ignored", fire.id);
            return;
        }
        if let Some(wake) = &mut self.ringing {
            if wake.alarm().id() == fire.id {
                debug!("alarm {} is already ringing", fire.id);
                return;
            }
            // only one alarm rings at a time, the older one counts as missed
            let outcome = wake.on_auto_dismiss_fire(&mut self.config.snoozes);
            self.finish(outcome, now);
        }
        let mut wake = WakeUp::new(alarm, fire.day, self.config.settings.clone(), self.devices());
        wake.start(now);
        self.ringing = Some(wake);
        self.save();
    }

    fn on_action(&mut self, action: UserAction, now: NaiveDateTime) {
        if let UserAction::Reload = action {
            self.reload();
            return;
        }
        let Some(wake) = self.ringing.as_mut() else {
            println!("no alarm is ringing");
            return;
        };
        let result = match action {
            UserAction::Snooze => wake.snooze(now, &mut self.scheduler, &mut self.config.snoozes),
            UserAction::Dismiss => wake.dismiss(self.scanned.as_deref(), &mut self.config.snoozes),
            UserAction::Scan(_) if wake.is_paused() => {
                println!("alarm is paused, tag ignored");
                return;
            }
            UserAction::Scan(tag) => {
                let tag = normalize_tag(&tag);
                let result = wake.dismiss(Some(&tag), &mut self.config.snoozes);
                self.scanned = Some(tag);
                result
            }
            UserAction::Pause => {
                wake.pause();
                return;
            }
            UserAction::Resume => {
                wake.resume(now);
                return;
            }
            UserAction::Reload | UserAction::Quit => return,
        };
        match result {
            Ok(outcome) => self.finish(outcome, now),
            // already shown to the user, the alarm keeps ringing
            Err(e) if e.is_user_facing() => info!("{e}"),
            Err(e) => warn!("{e}"),
        }
    }

    fn finish(&mut self, outcome: Outcome, now: NaiveDateTime) {
        match outcome {
            Outcome::Ignored => return,
            Outcome::Snoozed { until, count, .. } => {
                println!("snoozed until {} ({count} in a row)", until.format("%H:%M"));
            }
            Outcome::Dismissed { alarm } | Outcome::Missed { alarm } => {
                match self.book.settle(&alarm) {
                    Ok(record) => {
                        if let Err(e) = self.scheduler.reschedule(&record, now) {
                            warn!("couldn't reschedule alarm {}: {e}", record.id());
                        }
                    }
                    Err(e) => warn!("{e}"),
                }
            }
        }
        self.ringing = None;
        self.scanned = None;
        self.save();
    }

    fn apply_changes(&mut self, now: NaiveDateTime) {
        let events: Vec<AlarmEvent> = self.changes.try_iter().collect();
        if events.is_empty() {
            return;
        }
        for event in &events {
            if let Err(e) = self.scheduler.handle(event, now) {
                warn!("{e}");
            }
            if let AlarmEvent::Changed(change) = event {
                if change.re_enabled {
                    self.config.snoozes.set_snooze_count(change.alarm.id(), 0);
                }
            }
        }
        self.save();
    }

    /// Picks up alarms another `wakeup-clock` command wrote to the config file
    /// while the daemon was running.
    fn refresh(&mut self) {
        let modified = modified(&self.path);
        if modified == self.modified {
            return;
        }
        self.modified = modified;
        match Config::load(&self.path) {
            Ok(config) if config.alarms != self.written => {
                info!("config file changed, merging alarms");
                self.book.merge(&self.written, config.alarms.clone());
                self.written = config.alarms;
            }
            Ok(_) => {}
            Err(e) => warn!("couldn't read changed config: {e}"),
        }
    }

    fn reload(&mut self) {
        match Config::load(&self.path) {
            Ok(config) => {
                self.modified = modified(&self.path);
                self.written = config.alarms.clone();
                self.config.settings = config.settings;
                self.book.sync(config.alarms);
                println!("reloaded {} alarm(s)", self.book.len());
            }
            Err(e) => warn!("couldn't reload config: {e}"),
        }
    }

    fn save(&mut self) {
        // don't write over changes made since the last look at the file
        self.refresh();
        let mut config = self.config.clone();
        config.alarms = self.book.to_vec();
        config.active = self
            .ringing
            .as_ref()
            .map(|wake| AlarmRef::new(wake.alarm(), wake.day(), FireKind::Occurrence));
        match config.save(&self.path) {
            Ok(()) => {
                self.modified = modified(&self.path);
                self.written = config.alarms;
            }
            Err(e) => warn!("couldn't save config: {e}"),
        }
    }
}
