use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use vdt_core::bridge_ipc::{Envelope, EventName};
use vdt_core::payload::encode;
use vdt_panel::app::{SharedTheme, TracingDiagnostics};
use vdt_panel::session::{Session, SessionInput, SessionOptions, SessionPhase, UiCommand};
use vdt_panel::transport::{ConnectLink, MemoryConnector};
use vdt_panel::Generation;

const RELOADS: usize = 5;

struct Generations {
    session: Session<MemoryConnector>,
    links: mpsc::UnboundedReceiver<ConnectLink>,
    targets: Vec<(Generation, mpsc::UnboundedReceiver<Envelope>)>,
}

impl Generations {
    fn new(theme: SharedTheme) -> Self {
        let (connector, links) = MemoryConnector::new();
        let (session, _inbox) = Session::new(
            connector,
            SessionOptions {
                embedded: false,
                dark_theme: false,
                theme: Arc::new(theme),
                diagnostics: Arc::new(TracingDiagnostics),
            },
        );
        Self {
            session,
            links,
            targets: Vec::new(),
        }
    }

    fn attach_next(&mut self) -> Generation {
        let link = self.links.try_recv().expect("pending link");
        let (outbound, target) = mpsc::unbounded_channel();
        self.session.handle(SessionInput::Connected {
            generation: link.generation(),
            outbound,
        });
        self.targets.push((link.generation(), target));
        link.generation()
    }

    fn deliver(&mut self, generation: Generation, event: EventName, payload: Value) {
        self.session.handle(SessionInput::Delivery {
            generation,
            envelope: Envelope::new(event, payload),
        });
    }
}

fn flush(name: &str) -> Value {
    encode(&json!({"instances": [{"id": "1:0", "name": name, "children": []}]}))
}

#[test]
fn repeated_reloads_leave_one_live_generation() {
    let theme = SharedTheme::default();
    let mut gens = Generations::new(theme.clone());
    gens.session.start();
    let first = gens.attach_next();

    for _ in 0..RELOADS {
        gens.session.handle(SessionInput::Reload { generation: None });
        gens.attach_next();
    }

    let live = gens.session.generation();
    assert_eq!(live, first + RELOADS as Generation);
    assert_eq!(gens.session.phase(), SessionPhase::Attached);
    let app = gens.session.app().expect("live app");
    assert_eq!(app.generation(), live);
    assert!(app.is_mounted());

    for event in [
        EventName::Flush,
        EventName::InstanceDetails,
        EventName::ToggleInstance,
        EventName::VuexInit,
        EventName::VuexMutation,
        EventName::EventTriggered,
        EventName::InspectInstance,
        EventName::Ready,
        EventName::ProxyFail,
    ] {
        assert_eq!(gens.session.listener_count(event), 1, "{event} registrations");
    }

    let before = gens.session.store().revision();
    for stale in first..live {
        gens.deliver(stale, EventName::Flush, flush("Stale"));
        gens.deliver(stale, EventName::Ready, json!("1.0.0"));
    }
    assert_eq!(gens.session.store().revision(), before);
    assert_eq!(gens.session.store().message(), None);

    gens.deliver(live, EventName::Flush, flush("Fresh"));
    let names: Vec<&str> = gens
        .session
        .store()
        .components()
        .instances
        .iter()
        .map(|node| node.name.as_str())
        .collect();
    assert_eq!(names, vec!["Fresh"]);
}

#[test]
fn stale_channels_are_closed_and_only_the_live_one_hears_commands() {
    let mut gens = Generations::new(SharedTheme::default());
    gens.session.start();
    gens.attach_next();
    gens.session.handle(SessionInput::Reload { generation: None });
    gens.attach_next();

    gens.session
        .handle(SessionInput::Ui(UiCommand::ToggleVuexRecording));

    let (stale_generation, stale_target) = &mut gens.targets[0];
    assert_eq!(*stale_generation, 1);
    let stale: Vec<Envelope> = std::iter::from_fn(|| stale_target.try_recv().ok()).collect();
    assert_eq!(stale.len(), 1, "only the first refresh reached generation 1");
    assert!(matches!(
        stale_target.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));

    let (_, live_target) = &mut gens.targets[1];
    let live: Vec<Option<EventName>> = std::iter::from_fn(|| live_target.try_recv().ok())
        .map(|envelope| envelope.name())
        .collect();
    assert_eq!(
        live,
        vec![Some(EventName::Refresh), Some(EventName::VuexToggleRecording)]
    );
}

#[test]
fn recording_flags_and_theme_survive_reload() {
    let theme = SharedTheme::default();
    let mut gens = Generations::new(theme.clone());
    gens.session.start();
    gens.attach_next();
    gens.session
        .handle(SessionInput::Ui(UiCommand::ToggleEventsRecording));
    gens.session.handle(SessionInput::Ui(UiCommand::ToggleDarkTheme));
    assert!(theme.is_dark());

    gens.session.handle(SessionInput::Reload { generation: None });
    let live = gens.attach_next();
    gens.deliver(live, EventName::Ready, json!("2.6.11"));

    assert!(theme.is_dark());
    let (_, target) = gens.targets.last_mut().expect("live target");
    let sent: Vec<Envelope> = std::iter::from_fn(|| target.try_recv().ok()).collect();
    let flags: Vec<(Option<EventName>, Value)> = sent
        .into_iter()
        .filter(|envelope| envelope.name() != Some(EventName::Refresh))
        .map(|envelope| (envelope.name(), envelope.payload))
        .collect();
    assert_eq!(
        flags,
        vec![
            (Some(EventName::VuexToggleRecording), json!(true)),
            (Some(EventName::EventsToggleRecording), json!(false)),
        ]
    );
}
