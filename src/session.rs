// ============================================================================
// SESSION.RS - Command Wiring And Control Loop
// ============================================================================
//
// The Session owns the router, the task runner, the navigation controller
// and the console output. Front ends feed it input events and call tick()
// on a fixed cadence; everything else happens from there.
//
// COMMANDS:
//   Direct (run on the control thread): active, label, play, stop, status
//   Task-backed (run on a worker):      open, demo, classify, train, motifs,
//                                       load-net, export-net, save, restore
//
// Navigation toolbar actions bypass the router and are never busy-locked.
// ============================================================================

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::analysis::{self, AnalysisBackend, AnalysisParams, MotifRecord, SharedStore, SignalRecord};
use crate::error::{SessionError, SessionResult};
use crate::input::{InputEvent, InputSurface, NavAction, PointerPhase};
use crate::logging::REPORTED;
use crate::navigation::{Extent, Mode, NavConfig, NavigationController, Span};
use crate::output::{Consumer, OutputMultiplexer, OutputWriter};
use crate::playback::AudioPlayer;
use crate::render::{AxisData, Renderer};
use crate::router::{CommandArgs, CommandRouter, Handler};
use crate::settings::Settings;
use crate::tasks::{Handoff, TaskHost, TaskRunner, TaskSpec, wrap_with_task};
use crate::throttle::UpdateThrottle;

// ─── Axis Names ─────────────────────────────────────────────────────────────

pub const AXIS_SPECTROGRAM: &str = "spectrogram";
pub const AXIS_CLASSIFICATION: &str = "classification";
pub const AXIS_POWER: &str = "power";
pub const AXIS_ENTROPY: &str = "entropy";

/// Length of the generated demo signal
pub const DEMO_SECONDS: f64 = 20.0;

pub struct Session {
    router: CommandRouter<Session>,
    runner: TaskRunner<Session>,
    nav: NavigationController,
    output: OutputMultiplexer,
    console: OutputWriter,
    store: SharedStore,
    backend: Arc<dyn AnalysisBackend>,
    settings: Settings,
    input: Box<dyn InputSurface>,
    player: AudioPlayer,
    was_playing: bool,
    flush_throttle: UpdateThrottle,
    quit: bool,
}

impl TaskHost for Session {
    fn tasks(&mut self) -> (&mut TaskRunner<Self>, &mut CommandRouter<Self>) {
        (&mut self.runner, &mut self.router)
    }
}

impl Session {
    pub fn new(
        settings: Settings,
        renderer: Box<dyn Renderer>,
        input: Box<dyn InputSurface>,
        backend: Arc<dyn AnalysisBackend>,
    ) -> Self {
        let output = OutputMultiplexer::new();
        let console = output.writer();

        let mut nav = NavigationController::new(renderer, NavConfig::from_settings(&settings));
        nav.add_axis(AXIS_SPECTROGRAM, Span::new(0.0, 1.0));
        nav.add_axis(AXIS_CLASSIFICATION, Span::new(0.0, 1.0));
        nav.add_axis(AXIS_POWER, Span::new(-120.0, 0.0));
        nav.add_axis(AXIS_ENTROPY, Span::new(0.0, 1.0));

        let mut session = Self {
            router: CommandRouter::new(busy_handler()),
            runner: TaskRunner::new(console.clone()),
            nav,
            console,
            output,
            store: analysis::shared_store(),
            backend,
            flush_throttle: UpdateThrottle::new(settings.flush_interval_ms),
            settings,
            input,
            player: AudioPlayer::new(),
            was_playing: false,
            quit: false,
        };
        session.register_commands();
        session
    }

    fn register_commands(&mut self) {
        let direct: [(&str, Handler<Session>); 5] = [
            ("active", Rc::new(|s: &mut Session, _: &str, args: &CommandArgs| s.set_active(args))),
            ("label", Rc::new(|s: &mut Session, _: &str, args: &CommandArgs| s.label_selection(args))),
            ("play", Rc::new(|s: &mut Session, _: &str, _: &CommandArgs| s.play())),
            ("stop", Rc::new(|s: &mut Session, _: &str, _: &CommandArgs| s.stop())),
            ("status", Rc::new(|s: &mut Session, _: &str, _: &CommandArgs| s.status())),
        ];
        for (name, handler) in direct {
            self.router.register(name, handler);
        }

        self.router.register("open", wrap_with_task(prepare_open));
        self.router.register("demo", wrap_with_task(prepare_demo));
        self.router.register("classify", wrap_with_task(prepare_classify));
        self.router.register("train", wrap_with_task(prepare_train));
        self.router.register("motifs", wrap_with_task(prepare_motifs));
        self.router.register("load-net", wrap_with_task(prepare_load_net));
        self.router.register("export-net", wrap_with_task(prepare_export_net));
        self.router.register("save", wrap_with_task(prepare_save));
        self.router.register("restore", wrap_with_task(prepare_restore));
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn nav(&self) -> &NavigationController {
        &self.nav
    }

    pub fn nav_mut(&mut self) -> &mut NavigationController {
        &mut self.nav
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn router(&self) -> &CommandRouter<Session> {
        &self.router
    }

    pub fn runner(&self) -> &TaskRunner<Session> {
        &self.runner
    }

    /// Write handle for the console stream.
    pub fn console(&self) -> OutputWriter {
        self.console.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_console_consumer(&mut self, consumer: Consumer) {
        self.output.set_consumer(consumer);
    }

    pub fn is_quitting(&self) -> bool {
        self.quit
    }

    // ─── Control Loop ────────────────────────────────────────────────────────

    /// One pass of the control loop. Returns false once the user asked to quit.
    pub fn tick(&mut self, now: Instant) -> bool {
        while let Some(event) = self.input.next_event() {
            self.handle_event(event);
            if self.quit {
                break;
            }
        }

        TaskRunner::pump(self);
        self.follow_playback(now);
        self.nav.flush_marker(now);

        if self.flush_throttle.should_update_at(now) {
            self.output.flush();
        }
        !self.quit
    }

    /// Deliver pending console text now.
    pub fn flush_output(&mut self) -> bool {
        self.output.flush()
    }

    /// Block until every live task has finished or `timeout` ran out.
    /// Returns true when nothing is left running.
    pub fn wait_for_tasks(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.runner.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            TaskRunner::pump_timeout(self, (deadline - now).min(Duration::from_millis(50)));
        }
        self.output.flush();
        self.runner.is_idle()
    }

    pub fn handle_event(&mut self, event: InputEvent) {
        match event {
            InputEvent::Command { name, args } => self.invoke(&name, &args),
            InputEvent::Navigate(action) => self.navigate(action),
            InputEvent::Pointer { phase, x, y, button } => {
                let pointer = self.nav.pointer(x, y, button);
                match phase {
                    PointerPhase::Press => self.nav.press(pointer),
                    PointerPhase::Drag => self.nav.drag(pointer),
                    PointerPhase::Release => {
                        if let Err(e) = self.nav.release(pointer) {
                            self.report(&e);
                        }
                    }
                }
            }
            InputEvent::Key(key) => self.key_press(key),
            InputEvent::Resize { width, height } => self.nav.set_viewport(width, height),
            InputEvent::Quit => {
                log::info!("Quit requested");
                self.player.stop();
                self.quit = true;
            }
        }
    }

    /// Route a named command. Failures become a console line and a log record.
    pub fn invoke(&mut self, name: &str, args: &CommandArgs) {
        let result = self
            .router
            .resolve(name)
            .and_then(|handler| handler(self, name, args));
        if let Err(e) = result {
            self.report(&e);
        }
    }

    pub fn navigate(&mut self, action: NavAction) {
        let result = match action {
            NavAction::Home => self.nav.home(),
            NavAction::Back => self.nav.scroll_backward(),
            NavAction::Forward => self.nav.scroll_forward(),
            NavAction::Pan => {
                self.nav.set_mode(Mode::Pan);
                Ok(())
            }
            NavAction::Zoom => {
                self.nav.set_mode(Mode::Zoom);
                Ok(())
            }
            NavAction::Select => {
                self.nav.set_mode(Mode::Select);
                Ok(())
            }
        };
        if let Err(e) = result {
            self.report(&e);
        }
    }

    fn key_press(&mut self, key: char) {
        if let Some(digit) = key.to_digit(10) {
            self.invoke("label", &CommandArgs::with_label(digit));
        } else {
            log::debug!("Key '{}' not bound", key);
        }
    }

    fn report(&self, err: &SessionError) {
        match err {
            SessionError::OutOfBoundsNavigation(_) => log::warn!(target: REPORTED, "{}", err),
            SessionError::TaskFailure { .. } | SessionError::WorkerSpawn { .. } => {
                log::error!(target: REPORTED, "{}", err)
            }
            _ => log::info!(target: REPORTED, "{}", err),
        }
        self.console.line(&err.to_string());
    }

    // ─── Display ─────────────────────────────────────────────────────────────

    /// Push the active record to the view: every axis redrawn, the x-domain
    /// bound to the record's extent and the player loaded with its samples.
    pub fn show_data(&mut self) {
        let store = Arc::clone(&self.store);
        let store = analysis::read(&store);
        let Some(record) = store.active_record() else {
            drop(store);
            self.clear_view();
            return;
        };

        self.display_spectrogram(record);
        self.display_classification(record);
        self.display_line(AXIS_POWER, record, &record.features.power_db, None);
        self.display_line(AXIS_ENTROPY, record, &record.features.entropy, Some(Span::new(0.0, 1.0)));

        let extent = Extent {
            time: record.domain(),
            value: record.range(),
        };
        if let Err(e) = self.nav.set_extent(extent) {
            self.report(&e);
        }
        self.player.load(&record.samples, record.sample_rate, record.offset_seconds);
        self.was_playing = false;
    }

    /// Nothing to show: empty every axis, unbind the view and unload audio.
    fn clear_view(&mut self) {
        log::info!("No active record, clearing the view");
        let axes: Vec<String> = self.nav.axis_names().iter().map(|n| n.to_string()).collect();
        for axis in &axes {
            self.nav.draw_axis(axis, &AxisData::Line(Vec::new()));
        }
        self.nav.clear_extent();
        self.player.load(&[], 1, 0.0);
        self.was_playing = false;
    }

    fn display_spectrogram(&mut self, record: &SignalRecord) {
        let features = &record.features;
        let data = AxisData::Heatmap {
            time: record.domain(),
            value: record.range(),
            columns: features.frames(),
            rows: features.rows,
            cells: features.spectrogram.clone(),
        };
        self.nav.draw_axis(AXIS_SPECTROGRAM, &data);
    }

    fn display_classification(&mut self, record: &SignalRecord) {
        let points = record
            .time
            .iter()
            .zip(&record.classification)
            .map(|(&t, &c)| (t, c as f64))
            .collect();
        self.nav.draw_axis(AXIS_CLASSIFICATION, &AxisData::Line(points));
        let top = record.max_class() as f64 + 1.0;
        if let Err(e) = self.nav.set_range(AXIS_CLASSIFICATION, Span::new(0.0, top)) {
            self.report(&e);
        }
    }

    /// Plot one value per frame; the y-range is `fixed` or fitted to the data.
    fn display_line(&mut self, axis: &str, record: &SignalRecord, values: &[f32], fixed: Option<Span>) {
        let points = record
            .time
            .iter()
            .zip(values)
            .map(|(&t, &v)| (t, v as f64))
            .collect();
        self.nav.draw_axis(axis, &AxisData::Line(points));

        let range = fixed.or_else(|| {
            let (lo, hi) = values
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            let pad = ((hi - lo) * 0.05) as f64;
            (lo.is_finite() && hi > lo).then(|| Span::new(lo as f64 - pad, hi as f64 + pad))
        });
        if let Some(range) = range
            && let Err(e) = self.nav.set_range(axis, range)
        {
            self.report(&e);
        }
    }

    fn follow_playback(&mut self, now: Instant) {
        let playing = self.player.is_playing();
        if playing {
            self.nav.set_marker_at(self.player.position_seconds(), now);
        } else if self.was_playing {
            self.nav.set_marker_at(self.player.position_seconds(), now);
            self.console.line("Playback finished");
        }
        self.was_playing = playing;
    }

    // ─── Direct Commands ─────────────────────────────────────────────────────

    fn set_active(&mut self, args: &CommandArgs) -> SessionResult<()> {
        let index = args.index.ok_or_else(|| missing("active", "index"))?;
        analysis::write(&self.store).set_active(index)?;
        self.console.line(&format!("Record {} is now active", index));
        self.show_data();
        Ok(())
    }

    fn label_selection(&mut self, args: &CommandArgs) -> SessionResult<()> {
        let label = args.label.ok_or_else(|| missing("label", "label"))?;
        let selection = self
            .nav
            .selection()
            .ok_or_else(|| SessionError::NothingSelected("label".to_string()))?;

        let store = Arc::clone(&self.store);
        let mut store = analysis::write(&store);
        let record = store
            .active_record_mut()
            .ok_or_else(|| SessionError::MissingActiveRecord("label".to_string()))?;
        let count = record.label_span(selection, label);
        log::debug!("Labelled {} frames in {} as {}", count, selection, label);
        self.console.line(&format!("Labelled {} frames as class {}", count, label));

        self.display_classification(record);
        self.nav.clear_selection();
        Ok(())
    }

    fn play(&mut self) -> SessionResult<()> {
        if !self.player.has_audio() {
            return Err(SessionError::MissingActiveRecord("play".to_string()));
        }
        let start = self.nav.marker().unwrap_or(self.nav.window().lo);
        match self.player.play_from(start) {
            Ok(()) => {
                self.console.line(&format!("Playing from {:.2} s", start));
                self.was_playing = true;
            }
            Err(e) => {
                log::error!(target: REPORTED, "Playback failed: {:#}", e);
                self.console.line(&format!("Playback failed: {:#}", e));
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> SessionResult<()> {
        self.player.stop();
        Ok(())
    }

    fn status(&mut self) -> SessionResult<()> {
        let (records, active, motifs, trained) = {
            let store = analysis::read(&self.store);
            (
                store.songs.len(),
                store.active_index(),
                store.motifs.len(),
                store.classifier.is_some(),
            )
        };
        let active = active.map_or_else(|| "none".to_string(), |i| i.to_string());
        self.console.line(&format!(
            "records: {}, active: {}, motifs: {}, classifier: {}",
            records,
            active,
            motifs,
            if trained { "yes" } else { "no" }
        ));
        self.console.line(&format!(
            "window: {}, mode: {:?}, marker: {:?}, selection: {:?}",
            self.nav.window(),
            self.nav.mode(),
            self.nav.marker(),
            self.nav.selection()
        ));
        self.console.line(&format!(
            "tasks: [{}]",
            self.runner.live_task_names().join(", ")
        ));
        Ok(())
    }

    fn apply_classification(&mut self, index: usize, classes: Vec<u32>) {
        let mut store = analysis::write(&self.store);
        let Some(record) = store.songs.get_mut(index) else {
            log::warn!("Record {} vanished before its classes arrived", index);
            return;
        };
        if classes.len() != record.frame_count() {
            log::warn!(
                "Classifier returned {} classes for {} frames, ignored",
                classes.len(),
                record.frame_count()
            );
            return;
        }
        let labelled = classes.iter().filter(|&&c| c != 0).count();
        record.classification = classes;
        self.console.line(&format!("Classified '{}': {} labelled frame(s)", record.name, labelled));
    }

    /// Append loaded records and make the first of them active.
    fn adopt_records(&mut self, records: Option<Vec<SignalRecord>>) {
        if let Some(records) = records.filter(|r| !r.is_empty()) {
            let mut store = analysis::write(&self.store);
            let first = store.extend(records);
            if let Err(err) = store.set_active(first) {
                log::warn!("{}", err);
            }
        }
        self.show_data();
    }

    fn replace_records(&mut self, records: Vec<SignalRecord>, motifs: Vec<MotifRecord>) {
        let mut store = analysis::write(&self.store);
        let any = !records.is_empty();
        store.replace(records, motifs);
        if any {
            if let Err(err) = store.set_active(0) {
                log::warn!("{}", err);
            }
        }
    }

    fn params(&self) -> AnalysisParams {
        self.settings.analysis_params()
    }
}

fn busy_handler() -> Handler<Session> {
    Rc::new(|s: &mut Session, name: &str, _: &CommandArgs| {
        let report = format!(
            "busy, command '{}' ignored, active tasks: [{}]",
            name,
            s.runner.live_task_names().join(", ")
        );
        log::info!(target: REPORTED, "{}", report);
        s.console.line(&report);
        Ok(())
    })
}

fn missing(command: &str, arg: &'static str) -> SessionError {
    SessionError::MissingArgument { command: command.to_string(), arg }
}

fn require_path(command: &str, args: &CommandArgs) -> SessionResult<PathBuf> {
    args.path.clone().ok_or_else(|| missing(command, "path"))
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ─── Task Preparation ────────────────────────────────────────────────────────
//
// Each prepare_* runs on the control thread, captures what its worker needs
// and returns the work with the cleanup to run afterwards.

fn prepare_open(s: &mut Session, args: &CommandArgs) -> SessionResult<TaskSpec<Session>> {
    let path = require_path("open", args)?;
    let (backend, params, out) = (Arc::clone(&s.backend), s.params(), s.console());
    let result = Handoff::new();
    let slot = result.clone();

    Ok(TaskSpec::new(Box::new(move || {
        let name = display_name(&path);
        out.write(&format!("Loading {} ...", name));
        let loaded = backend.load(&path, &params);
        out.write("\r");
        let records = loaded?;
        out.line(&format!("Loaded {} as {} record(s)", name, records.len()));
        slot.put(records);
        Ok(())
    }))
    .then(move |s: &mut Session| s.adopt_records(result.take())))
}

fn prepare_demo(s: &mut Session, args: &CommandArgs) -> SessionResult<TaskSpec<Session>> {
    let seed = args.index.unwrap_or(0) as u64;
    let (backend, params, out) = (Arc::clone(&s.backend), s.params(), s.console());
    let result = Handoff::new();
    let slot = result.clone();

    Ok(TaskSpec::new(Box::new(move || {
        let records = backend.synthesize(DEMO_SECONDS, seed, &params)?;
        out.line(&format!("Generated {} demo record(s) with seed {}", records.len(), seed));
        slot.put(records);
        Ok(())
    }))
    .then(move |s: &mut Session| s.adopt_records(result.take())))
}

fn prepare_classify(s: &mut Session, _: &CommandArgs) -> SessionResult<TaskSpec<Session>> {
    let index = active_index(s, "classify")?;
    let (store, backend) = (s.store(), Arc::clone(&s.backend));

    // Written back by the cleanup, on the control thread
    let result = Handoff::new();
    let slot = result.clone();

    Ok(TaskSpec::new(Box::new(move || {
        let store = analysis::read(&store);
        let Some(classifier) = store.classifier.as_ref() else {
            anyhow::bail!("no classifier, train or load one first");
        };
        let record = store.songs.get(index).ok_or(SessionError::NoSuchRecord(index))?;
        let classes = backend.classify(classifier, record)?;
        slot.put(classes);
        Ok(())
    }))
    .then(move |s: &mut Session| {
        if let Some(classes) = result.take() {
            s.apply_classification(index, classes);
        }
        s.show_data();
    }))
}

fn prepare_train(s: &mut Session, _: &CommandArgs) -> SessionResult<TaskSpec<Session>> {
    let (store, backend, out) = (s.store(), Arc::clone(&s.backend), s.console());

    Ok(TaskSpec::new(Box::new(move || {
        let classifier = {
            let store = analysis::read(&store);
            backend.train(&store.songs)?
        };
        let summary: Vec<String> = classifier
            .support
            .iter()
            .map(|(class, frames)| format!("{}:{}", class, frames))
            .collect();
        out.line(&format!("Trained classifier, frames per class [{}]", summary.join(" ")));
        analysis::write(&store).classifier = Some(classifier);
        Ok(())
    })))
}

fn prepare_motifs(s: &mut Session, _: &CommandArgs) -> SessionResult<TaskSpec<Session>> {
    let index = active_index(s, "motifs")?;
    let (store, backend, params, out) = (s.store(), Arc::clone(&s.backend), s.params(), s.console());

    Ok(TaskSpec::new(Box::new(move || {
        let found = {
            let store = analysis::read(&store);
            let record = store.songs.get(index).ok_or(SessionError::NoSuchRecord(index))?;
            backend.find_motifs(index, record, &params)?
        };
        out.line(&format!("Found {} motif(s) in record {}", found.len(), index));
        let mut store = analysis::write(&store);
        store.motifs.retain(|m| m.record != index);
        store.motifs.extend(found);
        Ok(())
    })))
}

fn prepare_load_net(s: &mut Session, args: &CommandArgs) -> SessionResult<TaskSpec<Session>> {
    let path = require_path("load-net", args)?;
    let (store, backend, out) = (s.store(), Arc::clone(&s.backend), s.console());

    Ok(TaskSpec::new(Box::new(move || {
        let classifier = backend.load_classifier(&path)?;
        out.line(&format!(
            "Loaded classifier with {} class(es) from {}",
            classifier.centroids.len(),
            display_name(&path)
        ));
        analysis::write(&store).classifier = Some(classifier);
        Ok(())
    })))
}

fn prepare_export_net(s: &mut Session, args: &CommandArgs) -> SessionResult<TaskSpec<Session>> {
    let path = require_path("export-net", args)?;
    let (store, backend, out) = (s.store(), Arc::clone(&s.backend), s.console());

    Ok(TaskSpec::new(Box::new(move || {
        let store = analysis::read(&store);
        let Some(classifier) = store.classifier.as_ref() else {
            anyhow::bail!("no classifier to export, train or load one first");
        };
        backend.save_classifier(classifier, &path)?;
        out.line(&format!("Exported classifier to {}", path.display()));
        Ok(())
    })))
}

fn prepare_save(s: &mut Session, args: &CommandArgs) -> SessionResult<TaskSpec<Session>> {
    let path = require_path("save", args)?;
    let (store, backend, out) = (s.store(), Arc::clone(&s.backend), s.console());

    Ok(TaskSpec::new(Box::new(move || {
        let store = analysis::read(&store);
        backend.save_records(&store.songs, &store.motifs, &path)?;
        out.line(&format!("Saved {} record(s) to {}", store.songs.len(), path.display()));
        Ok(())
    })))
}

fn prepare_restore(s: &mut Session, args: &CommandArgs) -> SessionResult<TaskSpec<Session>> {
    let path = require_path("restore", args)?;
    let (backend, out) = (Arc::clone(&s.backend), s.console());
    let result = Handoff::new();
    let slot = result.clone();

    Ok(TaskSpec::new(Box::new(move || {
        let (records, motifs) = backend.load_records(&path)?;
        out.line(&format!("Restored {} record(s) from {}", records.len(), display_name(&path)));
        slot.put((records, motifs));
        Ok(())
    }))
    .then(move |s: &mut Session| {
        if let Some((records, motifs)) = result.take() {
            s.replace_records(records, motifs);
        }
        s.show_data();
    }))
}

fn active_index(s: &Session, command: &str) -> SessionResult<usize> {
    analysis::read(&s.store)
        .active_index()
        .ok_or_else(|| SessionError::MissingActiveRecord(command.to_string()))
}

// ============================================================================
// UNIT TESTS
// ============================================================================
