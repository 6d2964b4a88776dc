//! Session store. All writes go through [`SessionStore::commit`] or
//! [`SessionStore::dispatch`]; readers only get shared references.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::trace;
use vdt_core::bridge_ipc::EventName;
use vdt_core::{
    AppEventRecord, ComponentNode, FlushPayload, InstanceId, MutationRecord,
    ToggleInstancePayload, VuexSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Components,
    Vuex,
    Events,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Components, Tab::Vuex, Tab::Events];

    pub fn title(self) -> &'static str {
        match self {
            Tab::Components => "Components",
            Tab::Vuex => "Vuex",
            Tab::Events => "Events",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Tab::Components => Tab::Vuex,
            Tab::Vuex => Tab::Events,
            Tab::Events => Tab::Components,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEntry {
    pub name: String,
    pub parent: Option<InstanceId>,
}

#[derive(Debug, Clone, Default)]
pub struct ComponentsState {
    pub instances: Vec<ComponentNode>,
    pub instances_map: HashMap<InstanceId, InstanceEntry>,
    pub expansion: HashMap<InstanceId, bool>,
    pub inspected_instance_id: Option<InstanceId>,
    pub inspected_instance: Option<Value>,
}

impl ComponentsState {
    pub fn is_expanded(&self, id: &InstanceId) -> bool {
        self.expansion.get(id).copied().unwrap_or(false)
    }

    /// Parent chain from the nearest parent up to the root.
    pub fn ancestors(&self, id: &InstanceId) -> Vec<InstanceId> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id.clone()]);
        let mut current = self.instances_map.get(id).and_then(|entry| entry.parent.clone());
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                break;
            }
            current = self
                .instances_map
                .get(&parent)
                .and_then(|entry| entry.parent.clone());
            chain.push(parent);
        }
        chain
    }

    fn index_tree(&mut self) {
        self.instances_map.clear();
        let mut stack: Vec<(&ComponentNode, Option<InstanceId>)> =
            self.instances.iter().rev().map(|node| (node, None)).collect();
        while let Some((node, parent)) = stack.pop() {
            self.instances_map.insert(
                node.id.clone(),
                InstanceEntry {
                    name: node.name.clone(),
                    parent,
                },
            );
            for child in node.children.iter().rev() {
                stack.push((child, Some(node.id.clone())));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct VuexState {
    pub enabled: bool,
    pub base_state: Option<VuexSnapshot>,
    pub history: Vec<MutationRecord>,
}

impl Default for VuexState {
    fn default() -> Self {
        Self {
            enabled: true,
            base_state: None,
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    pub record: AppEventRecord,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventsState {
    pub enabled: bool,
    pub log: Vec<EventLogEntry>,
}

impl Default for EventsState {
    fn default() -> Self {
        Self {
            enabled: true,
            log: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settings {
    pub dark_theme: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    ShowMessage(String),
    ComponentsFlush(FlushPayload),
    ReceiveInstanceDetails(Value),
    ToggleInstance(ToggleInstancePayload),
    SetInspectedInstance(InstanceId),
    VuexInit(VuexSnapshot),
    VuexReceiveMutation(MutationRecord),
    EventsReceive(EventLogEntry),
    SwitchTab(Tab),
    SetVuexRecording(bool),
    SetEventsRecording(bool),
    SetDarkTheme(bool),
    /// Drops state that belongs to the previous target context. Recording
    /// flags, the active tab and settings survive.
    ResetConnection,
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::ShowMessage(_) => "show_message",
            Mutation::ComponentsFlush(_) => "components_flush",
            Mutation::ReceiveInstanceDetails(_) => "components_receive_instance_details",
            Mutation::ToggleInstance(_) => "components_toggle_instance",
            Mutation::SetInspectedInstance(_) => "components_set_inspected_instance",
            Mutation::VuexInit(_) => "vuex_init",
            Mutation::VuexReceiveMutation(_) => "vuex_receive_mutation",
            Mutation::EventsReceive(_) => "events_receive",
            Mutation::SwitchTab(_) => "switch_tab",
            Mutation::SetVuexRecording(_) => "vuex_set_recording",
            Mutation::SetEventsRecording(_) => "events_set_recording",
            Mutation::SetDarkTheme(_) => "set_dark_theme",
            Mutation::ResetConnection => "reset_connection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Init,
    ExpandInstance(InstanceId),
    InspectInstance(InstanceId),
    ToggleVuexRecording,
    ToggleEventsRecording,
}

/// Message an action wants sent to the target.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    pub event: EventName,
    pub payload: Value,
}

impl OutboundCommand {
    pub fn new(event: EventName, payload: Value) -> Self {
        Self { event, payload }
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    components: ComponentsState,
    vuex: VuexState,
    events: EventsState,
    tab: Tab,
    message: Option<String>,
    settings: Settings,
    revision: u64,
}

impl SessionStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn components(&self) -> &ComponentsState {
        &self.components
    }

    pub fn vuex(&self) -> &VuexState {
        &self.vuex
    }

    pub fn events(&self) -> &EventsState {
        &self.events
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// `(mutation log, event log)` recording flags.
    pub fn recording_flags(&self) -> (bool, bool) {
        (self.vuex.enabled, self.events.enabled)
    }

    pub fn commit(&mut self, mutation: Mutation) {
        let name = mutation.name();
        match mutation {
            Mutation::ShowMessage(message) => self.message = Some(message),
            Mutation::ComponentsFlush(payload) => {
                self.components.instances = payload.instances;
                self.components.index_tree();
                if let Some(inspected) = payload.inspected_instance {
                    self.set_inspected(inspected);
                }
            }
            Mutation::ReceiveInstanceDetails(details) => self.set_inspected(details),
            Mutation::ToggleInstance(toggle) => {
                self.components.expansion.insert(toggle.id, toggle.expanded);
            }
            Mutation::SetInspectedInstance(id) => {
                self.components.inspected_instance_id = Some(id);
            }
            Mutation::VuexInit(snapshot) => {
                self.vuex.base_state = Some(snapshot);
                self.vuex.history.clear();
            }
            Mutation::VuexReceiveMutation(record) => self.vuex.history.push(record),
            Mutation::EventsReceive(entry) => self.events.log.push(entry),
            Mutation::SwitchTab(tab) => self.tab = tab,
            Mutation::SetVuexRecording(enabled) => self.vuex.enabled = enabled,
            Mutation::SetEventsRecording(enabled) => self.events.enabled = enabled,
            Mutation::SetDarkTheme(dark) => self.settings.dark_theme = dark,
            Mutation::ResetConnection => {
                self.message = None;
                self.components = ComponentsState::default();
                self.vuex.base_state = None;
                self.vuex.history.clear();
            }
        }
        self.revision += 1;
        trace!(event = "store_commit", mutation = name, revision = self.revision);
    }

    pub fn dispatch(&mut self, action: Action) -> Vec<OutboundCommand> {
        match action {
            Action::Init => {
                self.commit(Mutation::ResetConnection);
                vec![OutboundCommand::new(EventName::Refresh, Value::Null)]
            }
            Action::ExpandInstance(id) => {
                let mut chain = vec![id.clone()];
                chain.extend(self.components.ancestors(&id));
                for id in chain {
                    self.commit(Mutation::ToggleInstance(ToggleInstancePayload {
                        id,
                        expanded: true,
                    }));
                }
                Vec::new()
            }
            Action::InspectInstance(id) => {
                let payload = Value::String(id.as_str().to_string());
                self.commit(Mutation::SetInspectedInstance(id));
                vec![OutboundCommand::new(EventName::SelectInstance, payload)]
            }
            Action::ToggleVuexRecording => {
                let enabled = !self.vuex.enabled;
                self.commit(Mutation::SetVuexRecording(enabled));
                vec![OutboundCommand::new(
                    EventName::VuexToggleRecording,
                    Value::Bool(enabled),
                )]
            }
            Action::ToggleEventsRecording => {
                let enabled = !self.events.enabled;
                self.commit(Mutation::SetEventsRecording(enabled));
                vec![OutboundCommand::new(
                    EventName::EventsToggleRecording,
                    Value::Bool(enabled),
                )]
            }
        }
    }

    fn set_inspected(&mut self, details: Value) {
        if let Some(id) = details.get("id").and_then(InstanceId::from_json) {
            self.components.inspected_instance_id = Some(id);
        }
        self.components.inspected_instance = Some(details);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vdt_core::MutationCall;

    fn tree() -> FlushPayload {
        let mut root = ComponentNode::new("1:0", "Root");
        let mut layout = ComponentNode::new("1:1", "Layout");
        layout.children.push(ComponentNode::new("1:2", "Button"));
        root.children.push(layout);
        FlushPayload {
            instances: vec![root, ComponentNode::new("1:9", "Modal")],
            inspected_instance: None,
        }
    }

    #[test]
    fn flush_replaces_tree_and_indexes_parents() {
        let mut store = SessionStore::default();
        store.commit(Mutation::ComponentsFlush(tree()));

        let components = store.components();
        let roots: Vec<&str> = components.instances.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(roots, vec!["Root", "Modal"]);
        assert_eq!(components.instances_map.len(), 4);
        assert_eq!(
            components.instances_map[&InstanceId::new("1:2")].parent,
            Some(InstanceId::new("1:1"))
        );
        assert_eq!(components.instances_map[&InstanceId::new("1:9")].parent, None);

        store.commit(Mutation::ComponentsFlush(FlushPayload::default()));
        assert!(store.components().instances_map.is_empty());
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn expand_instance_opens_the_whole_ancestor_chain() {
        let mut store = SessionStore::default();
        store.commit(Mutation::ComponentsFlush(tree()));

        let outbound = store.dispatch(Action::ExpandInstance(InstanceId::new("1:2")));

        assert!(outbound.is_empty());
        let components = store.components();
        for id in ["1:2", "1:1", "1:0"] {
            assert!(components.is_expanded(&InstanceId::new(id)), "{id} expanded");
        }
        assert!(!components.is_expanded(&InstanceId::new("1:9")));
    }

    #[test]
    fn ancestors_stop_on_parent_cycles() {
        let mut components = ComponentsState::default();
        for (id, parent) in [("a", "b"), ("b", "a")] {
            components.instances_map.insert(
                InstanceId::new(id),
                InstanceEntry {
                    name: id.to_string(),
                    parent: Some(InstanceId::new(parent)),
                },
            );
        }
        assert_eq!(components.ancestors(&InstanceId::new("a")), vec![InstanceId::new("b")]);
    }

    #[test]
    fn toggle_recording_flips_flag_and_notifies_target() {
        let mut store = SessionStore::default();
        assert_eq!(store.recording_flags(), (true, true));

        let outbound = store.dispatch(Action::ToggleVuexRecording);
        assert_eq!(
            outbound,
            vec![OutboundCommand::new(EventName::VuexToggleRecording, json!(false))]
        );
        let outbound = store.dispatch(Action::ToggleEventsRecording);
        assert_eq!(outbound[0].event, EventName::EventsToggleRecording);
        assert_eq!(store.recording_flags(), (false, false));
    }

    #[test]
    fn init_resets_connection_state_but_keeps_preferences() {
        let mut store = SessionStore::new(Settings { dark_theme: true });
        store.commit(Mutation::ShowMessage("Ready.".to_string()));
        store.commit(Mutation::ComponentsFlush(tree()));
        store.commit(Mutation::SwitchTab(Tab::Events));
        store.commit(Mutation::SetEventsRecording(false));
        store.commit(Mutation::VuexReceiveMutation(MutationRecord {
            mutation: MutationCall {
                mutation_type: "increment".to_string(),
                payload: Value::Null,
            },
            timestamp: None,
            snapshot: None,
        }));

        let outbound = store.dispatch(Action::Init);

        assert_eq!(outbound, vec![OutboundCommand::new(EventName::Refresh, Value::Null)]);
        assert_eq!(store.message(), None);
        assert!(store.components().instances.is_empty());
        assert!(store.vuex().history.is_empty());
        assert_eq!(store.tab(), Tab::Events);
        assert_eq!(store.recording_flags(), (true, false));
        assert!(store.settings().dark_theme);
    }

    #[test]
    fn instance_details_track_the_inspected_id() {
        let mut store = SessionStore::default();
        store.commit(Mutation::ReceiveInstanceDetails(json!({"id": "1:2", "name": "Button"})));
        assert_eq!(
            store.components().inspected_instance_id,
            Some(InstanceId::new("1:2"))
        );

        let outbound = store.dispatch(Action::InspectInstance(InstanceId::new("1:9")));
        assert_eq!(outbound[0].payload, json!("1:9"));
        assert_eq!(
            store.components().inspected_instance_id,
            Some(InstanceId::new("1:9"))
        );
    }

    #[test]
    fn set_inspected_instance_is_a_counted_commit() {
        let mut store = SessionStore::default();
        let before = store.revision();

        store.commit(Mutation::SetInspectedInstance(InstanceId::new("1:3")));

        assert_eq!(store.revision(), before + 1);
        assert_eq!(
            store.components().inspected_instance_id,
            Some(InstanceId::new("1:3"))
        );
        assert_eq!(
            Mutation::SetInspectedInstance(InstanceId::new("1:3")).name(),
            "components_set_inspected_instance"
        );
    }
}
