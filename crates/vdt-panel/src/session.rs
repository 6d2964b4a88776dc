//! Session controller: binds one bridge generation to one mounted app and
//! rebuilds both on every reload.
//!
//! The session is a single-writer actor. Connectors, the host and the UI all
//! talk to it through [`SessionInput`] messages; only [`Session::handle`]
//! touches the store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use vdt_core::bridge_ipc::{Envelope, EventName};
use vdt_core::payload::decode_json;
use vdt_core::{
    AppEventRecord, FlushPayload, InstanceId, MutationRecord, ToggleInstancePayload, VuexSnapshot,
};

use crate::app::{DiagnosticSink, PanelApp, SharedTheme, ThemeSink, TracingDiagnostics};
use crate::bridge::{Bridge, BridgeSender, Generation};
use crate::store::{Action, EventLogEntry, Mutation, SessionStore, Settings, Tab};
use crate::transport::{ConnectLink, TransportConnector};
use crate::visibility::VisibilityGate;
use crate::SessionError;

#[derive(Debug)]
pub enum SessionInput {
    Connected {
        generation: Generation,
        outbound: mpsc::UnboundedSender<Envelope>,
    },
    Delivery {
        generation: Generation,
        envelope: Envelope,
    },
    /// `generation` is set when a connector asks for the reload; user and
    /// host reloads carry `None`.
    Reload {
        generation: Option<Generation>,
    },
    Host(HostSignal),
    Ui(UiCommand),
    Stop,
}

/// Advisory signals from the embedding host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Shown,
    Hidden,
    ContextMenuTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    SwitchTab(Tab),
    ToggleVuexRecording,
    ToggleEventsRecording,
    ToggleDarkTheme,
    InspectInstance(InstanceId),
}

/// Work that has to wait until the panel is on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    InspectInstance(InstanceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Attached,
    Stopped,
}

impl SessionPhase {
    pub fn label(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Attached => "attached",
            SessionPhase::Stopped => "stopped",
        }
    }
}

/// State handed to every bridge handler.
pub struct SessionContext {
    store: SessionStore,
    gate: VisibilityGate<PendingAction>,
    link: Option<BridgeSender>,
}

impl SessionContext {
    fn new(settings: Settings, embedded: bool) -> Self {
        Self {
            store: SessionStore::new(settings),
            gate: VisibilityGate::for_host(embedded),
            link: None,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn gate(&self) -> &VisibilityGate<PendingAction> {
        &self.gate
    }

    fn send(&self, event: EventName, payload: Value) {
        match self.link.as_ref() {
            Some(link) => link.send(event, payload),
            None => trace!(event = "session_send_unlinked", name = event.as_str()),
        }
    }

    fn dispatch(&mut self, action: Action) {
        for command in self.store.dispatch(action) {
            self.send(command.event, command.payload);
        }
    }

    fn ensure_shown(&mut self, action: PendingAction) {
        if let Some(action) = self.gate.ensure_shown(action) {
            self.run_pending(action);
        }
    }

    fn run_pending(&mut self, action: PendingAction) {
        match action {
            PendingAction::InspectInstance(id) => self.inspect_instance(id),
        }
    }

    /// A detached id is ignored outright: no selection is sent and the tab
    /// stays where it is.
    fn inspect_instance(&mut self, id: InstanceId) {
        if !self.store.components().instances_map.contains_key(&id) {
            debug!(event = "inspect_instance_unknown", id = %id);
            return;
        }
        self.dispatch(Action::InspectInstance(id.clone()));
        self.store.commit(Mutation::SwitchTab(Tab::Components));
        self.dispatch(Action::ExpandInstance(id));
    }
}

pub struct SessionOptions {
    pub embedded: bool,
    pub dark_theme: bool,
    pub theme: Arc<dyn ThemeSink>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            embedded: false,
            dark_theme: false,
            theme: Arc::new(SharedTheme::default()),
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }
}

/// Cloneable entry point into a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inbox: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    /// Returns false once the session has shut down.
    pub fn send(&self, input: SessionInput) -> bool {
        self.inbox.send(input).is_ok()
    }

    pub fn host(&self, signal: HostSignal) -> bool {
        self.send(SessionInput::Host(signal))
    }

    pub fn ui(&self, command: UiCommand) -> bool {
        self.send(SessionInput::Ui(command))
    }

    pub fn reload(&self) -> bool {
        self.send(SessionInput::Reload { generation: None })
    }

    pub fn stop(&self) -> bool {
        self.send(SessionInput::Stop)
    }
}

/// Read-only snapshot for rendering.
pub struct SessionView<'a> {
    pub store: &'a SessionStore,
    pub app: Option<&'a PanelApp>,
    pub generation: Generation,
    pub phase: SessionPhase,
    pub visible: bool,
    pub embedded: bool,
}

pub struct Session<T: TransportConnector> {
    connector: T,
    inbox: mpsc::UnboundedSender<SessionInput>,
    generation: Generation,
    phase: SessionPhase,
    bridge: Option<Bridge<SessionContext>>,
    app: Option<PanelApp>,
    ctx: SessionContext,
    embedded: bool,
    theme: Arc<dyn ThemeSink>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl<T: TransportConnector> Session<T> {
    pub fn new(connector: T, options: SessionOptions) -> (Self, mpsc::UnboundedReceiver<SessionInput>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let settings = Settings {
            dark_theme: options.dark_theme,
        };
        let session = Self {
            connector,
            inbox,
            generation: 0,
            phase: SessionPhase::Idle,
            bridge: None,
            app: None,
            ctx: SessionContext::new(settings, options.embedded),
            embedded: options.embedded,
            theme: options.theme,
            diagnostics: options.diagnostics,
        };
        (session, rx)
    }

    pub fn handle_sender(&self) -> SessionHandle {
        SessionHandle {
            inbox: self.inbox.clone(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn store(&self) -> &SessionStore {
        self.ctx.store()
    }

    pub fn app(&self) -> Option<&PanelApp> {
        self.app.as_ref()
    }

    pub fn pending_action(&self) -> Option<&PendingAction> {
        self.ctx.gate().pending()
    }

    /// Listener count on the live bridge, zero when none is attached.
    pub fn listener_count(&self, event: EventName) -> usize {
        self.bridge
            .as_ref()
            .map(|bridge| bridge.listener_count(event))
            .unwrap_or(0)
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            store: self.ctx.store(),
            app: self.app.as_ref(),
            generation: self.generation,
            phase: self.phase,
            visible: self.ctx.gate().is_visible(),
            embedded: self.embedded,
        }
    }

    /// Opens a new generation and asks the connector for a bridge.
    pub fn start(&mut self) {
        self.generation += 1;
        self.phase = SessionPhase::Connecting;
        info!(event = "session_connect", generation = self.generation);
        self.connector
            .connect(ConnectLink::new(self.generation, self.inbox.clone()));
    }

    /// Tears the current generation down and starts a new one.
    pub fn reload(&mut self) {
        if self.phase == SessionPhase::Stopped {
            debug!(event = "session_reload_after_stop", generation = self.generation);
            return;
        }
        info!(event = "session_reload", generation = self.generation);
        self.teardown();
        self.start();
    }

    pub fn stop(&mut self) {
        if self.phase == SessionPhase::Stopped {
            return;
        }
        self.teardown();
        self.phase = SessionPhase::Stopped;
        info!(event = "session_stopped", generation = self.generation);
    }

    /// Applies one input. Returns false once the session has stopped.
    pub fn handle(&mut self, input: SessionInput) -> bool {
        match input {
            SessionInput::Connected {
                generation,
                outbound,
            } => self.attach(generation, outbound),
            SessionInput::Delivery {
                generation,
                envelope,
            } => self.deliver(generation, &envelope),
            SessionInput::Reload { generation } => match generation {
                Some(generation) if generation != self.generation => debug!(
                    event = "session_stale_reload",
                    generation,
                    current = self.generation
                ),
                _ => self.reload(),
            },
            SessionInput::Host(signal) => self.on_host_signal(signal),
            SessionInput::Ui(command) => self.on_ui_command(command),
            SessionInput::Stop => self.stop(),
        }
        if let Some(app) = self.app.as_mut() {
            app.sync(&self.ctx.store);
        }
        self.phase != SessionPhase::Stopped
    }

    /// Starts the first generation if needed and drains the inbox until
    /// [`SessionInput::Stop`].
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<SessionInput>) {
        if self.phase == SessionPhase::Idle {
            self.start();
        }
        while let Some(input) = inbox.recv().await {
            if !self.handle(input) {
                break;
            }
        }
        self.stop();
    }

    fn attach(&mut self, generation: Generation, outbound: mpsc::UnboundedSender<Envelope>) {
        if generation != self.generation || self.phase != SessionPhase::Connecting {
            debug!(
                event = "session_stale_connect",
                generation,
                current = self.generation,
                phase = self.phase.label()
            );
            return;
        }

        let mut bridge = Bridge::new(generation, outbound);
        register_handlers(&mut bridge);
        self.ctx.link = Some(bridge.sender());
        self.bridge = Some(bridge);

        let diagnostics = self.embedded.then(|| self.diagnostics.clone());
        self.app = Some(PanelApp::mount(
            generation,
            &self.ctx.store,
            self.theme.clone(),
            diagnostics,
        ));
        self.phase = SessionPhase::Attached;
        info!(event = "session_attached", generation);

        self.ctx.dispatch(Action::Init);
    }

    fn deliver(&mut self, generation: Generation, envelope: &Envelope) {
        if generation != self.generation {
            trace!(
                event = "session_stale_delivery",
                generation,
                current = self.generation,
                name = %envelope.event
            );
            return;
        }
        let Some(bridge) = self.bridge.as_mut() else {
            debug!(event = "session_delivery_unattached", generation, name = %envelope.event);
            return;
        };
        let report = bridge.emit(envelope, &mut self.ctx);
        if report.faults > 0 {
            debug!(
                event = "session_delivery_faults",
                generation,
                name = %envelope.event,
                faults = report.faults
            );
        }
    }

    fn teardown(&mut self) {
        if let Some(mut app) = self.app.take() {
            app.destroy();
        }
        if let Some(mut bridge) = self.bridge.take() {
            bridge.remove_all_listeners();
        }
        self.ctx.link = None;
        if let Some(action) = self.ctx.gate.clear_pending() {
            debug!(
                event = "session_pending_dropped",
                generation = self.generation,
                action = ?action
            );
        }
    }

    fn on_host_signal(&mut self, signal: HostSignal) {
        match signal {
            HostSignal::Shown => {
                if let Some(action) = self.ctx.gate.on_shown() {
                    self.ctx.run_pending(action);
                }
            }
            HostSignal::Hidden => self.ctx.gate.on_hidden(),
            HostSignal::ContextMenuTarget => {
                let target = self
                    .ctx
                    .store
                    .components()
                    .inspected_instance_id
                    .as_ref()
                    .map(|id| Value::String(id.as_str().to_string()))
                    .unwrap_or(Value::Null);
                self.ctx.send(EventName::GetContextMenuTarget, target);
            }
        }
    }

    fn on_ui_command(&mut self, command: UiCommand) {
        match command {
            UiCommand::SwitchTab(tab) => self.ctx.store.commit(Mutation::SwitchTab(tab)),
            UiCommand::ToggleVuexRecording => self.ctx.dispatch(Action::ToggleVuexRecording),
            UiCommand::ToggleEventsRecording => self.ctx.dispatch(Action::ToggleEventsRecording),
            UiCommand::ToggleDarkTheme => {
                let dark = !self.ctx.store.settings().dark_theme;
                self.ctx.store.commit(Mutation::SetDarkTheme(dark));
            }
            UiCommand::InspectInstance(id) => self.ctx.dispatch(Action::InspectInstance(id)),
        }
    }
}

/// Installs the fixed handler set on a fresh bridge.
fn register_handlers(bridge: &mut Bridge<SessionContext>) {
    bridge.once(EventName::Ready, Box::new(on_ready));
    bridge.once(EventName::ProxyFail, Box::new(on_proxy_fail));
    bridge.on(EventName::Flush, Box::new(on_flush));
    bridge.on(EventName::InstanceDetails, Box::new(on_instance_details));
    bridge.on(EventName::ToggleInstance, Box::new(on_toggle_instance));
    bridge.on(EventName::VuexInit, Box::new(on_vuex_init));
    bridge.on(EventName::VuexMutation, Box::new(on_vuex_mutation));
    bridge.on(EventName::EventTriggered, Box::new(on_event_triggered));
    bridge.on(EventName::InspectInstance, Box::new(on_inspect_instance));
}

fn on_ready(ctx: &mut SessionContext, payload: &Value) -> Result<(), SessionError> {
    let version = match payload {
        Value::String(version) => version.clone(),
        Value::Null => "unknown".to_string(),
        other => other.to_string(),
    };
    info!(event = "bridge_ready", target_version = %version);
    ctx.store
        .commit(Mutation::ShowMessage(format!("Ready. Detected Vue {version}.")));
    let (vuex, events) = ctx.store.recording_flags();
    ctx.send(EventName::VuexToggleRecording, Value::Bool(vuex));
    ctx.send(EventName::EventsToggleRecording, Value::Bool(events));
    Ok(())
}

fn on_proxy_fail(ctx: &mut SessionContext, _payload: &Value) -> Result<(), SessionError> {
    warn!(event = "bridge_proxy_fail");
    ctx.store
        .commit(Mutation::ShowMessage("Proxy injection failed.".to_string()));
    Ok(())
}

fn on_flush(ctx: &mut SessionContext, payload: &Value) -> Result<(), SessionError> {
    let decoded = decode_json(payload);
    if !decoded.is_object() {
        return Err(SessionError::payload(EventName::Flush, "expected a tree snapshot object"));
    }
    ctx.store
        .commit(Mutation::ComponentsFlush(FlushPayload::from_json(&decoded)));
    Ok(())
}

fn on_instance_details(ctx: &mut SessionContext, payload: &Value) -> Result<(), SessionError> {
    ctx.store
        .commit(Mutation::ReceiveInstanceDetails(decode_json(payload)));
    Ok(())
}

fn on_toggle_instance(ctx: &mut SessionContext, payload: &Value) -> Result<(), SessionError> {
    let toggle = ToggleInstancePayload::from_json(&decode_json(payload)).ok_or_else(|| {
        SessionError::payload(EventName::ToggleInstance, "expected an instance id")
    })?;
    ctx.store.commit(Mutation::ToggleInstance(toggle));
    Ok(())
}

fn on_vuex_init(ctx: &mut SessionContext, payload: &Value) -> Result<(), SessionError> {
    let decoded = decode_json(payload);
    let snapshot = if decoded.get("state").is_some() {
        serde_json::from_value(decoded)
            .map_err(|err| SessionError::payload(EventName::VuexInit, err.to_string()))?
    } else {
        VuexSnapshot {
            state: decoded,
            getters: Value::Null,
        }
    };
    ctx.store.commit(Mutation::VuexInit(snapshot));
    Ok(())
}

fn on_vuex_mutation(ctx: &mut SessionContext, payload: &Value) -> Result<(), SessionError> {
    let record: MutationRecord = serde_json::from_value(payload.clone())
        .map_err(|err| SessionError::payload(EventName::VuexMutation, err.to_string()))?;
    ctx.store.commit(Mutation::VuexReceiveMutation(record));
    Ok(())
}

fn on_event_triggered(ctx: &mut SessionContext, payload: &Value) -> Result<(), SessionError> {
    let record = AppEventRecord::from_json(&decode_json(payload)).ok_or_else(|| {
        SessionError::payload(EventName::EventTriggered, "expected an event object")
    })?;
    ctx.store.commit(Mutation::EventsReceive(EventLogEntry {
        record,
        received_at: Utc::now(),
    }));
    Ok(())
}

fn on_inspect_instance(ctx: &mut SessionContext, payload: &Value) -> Result<(), SessionError> {
    let id = InstanceId::from_json(payload).ok_or_else(|| {
        SessionError::payload(EventName::InspectInstance, "expected an instance id")
    })?;
    ctx.ensure_shown(PendingAction::InspectInstance(id));
    Ok(())
}
