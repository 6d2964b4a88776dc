//! ratatui rendering of the session store.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;
use serde_json::Value;
use vdt_core::ComponentNode;

use crate::app::{PanelApp, RenderFault};
use crate::session::{SessionPhase, SessionView};
use crate::store::{ComponentsState, EventsState, Tab, VuexState};

const CONNECTING_MESSAGE: &str = "Connecting...";
const MAX_INLINE_JSON: usize = 96;

#[derive(Clone, Copy)]
pub struct PanelTheme {
    bg: Color,
    surface: Color,
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    critical: Color,
}

pub fn panel_theme(dark: bool) -> PanelTheme {
    if dark {
        PanelTheme {
            bg: Color::Rgb(11, 18, 32),
            surface: Color::Rgb(17, 26, 46),
            border: Color::Rgb(71, 85, 105),
            title: Color::Rgb(191, 219, 254),
            text: Color::Rgb(226, 232, 240),
            muted: Color::Rgb(148, 163, 184),
            accent: Color::Rgb(65, 184, 131),
            ok: Color::Rgb(34, 197, 94),
            critical: Color::Rgb(239, 68, 68),
        }
    } else {
        PanelTheme {
            bg: Color::Rgb(248, 250, 252),
            surface: Color::Rgb(255, 255, 255),
            border: Color::Rgb(203, 213, 225),
            title: Color::Rgb(30, 41, 59),
            text: Color::Rgb(15, 23, 42),
            muted: Color::Rgb(100, 116, 139),
            accent: Color::Rgb(44, 62, 80),
            ok: Color::Rgb(21, 128, 61),
            critical: Color::Rgb(185, 28, 28),
        }
    }
}

pub fn render_panel(frame: &mut Frame, view: &SessionView<'_>, dark: bool) {
    let size = frame.size();
    let theme = panel_theme(dark);
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(size);
    frame.render_widget(render_header(view, theme), layout[0]);
    render_body(frame, view, theme, layout[1]);
    frame.render_widget(render_footer(view, theme), layout[2]);
}

fn render_header(view: &SessionView<'_>, theme: PanelTheme) -> Paragraph<'static> {
    let message = view.store.message().unwrap_or(CONNECTING_MESSAGE).to_string();
    let message_color = if message.starts_with("Ready") {
        theme.ok
    } else if message.contains("failed") {
        theme.critical
    } else {
        theme.muted
    };
    let status = format!(
        "Generation: {}  Link: {}  Panel: {}",
        view.generation,
        view.phase.label(),
        if view.visible { "shown" } else { "hidden" }
    );

    Paragraph::new(Text::from(vec![
        Line::from(Span::styled(message, Style::default().fg(message_color))),
        Line::from(vec![
            Span::styled(status, Style::default().fg(theme.muted)),
            Span::raw("  "),
            tab_strip(view.store.tab(), theme),
        ]),
    ]))
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(titled_block("Vue Devtools", theme, theme.bg))
}

fn tab_strip(active: Tab, theme: PanelTheme) -> Span<'static> {
    let labels: Vec<String> = Tab::ALL
        .iter()
        .enumerate()
        .map(|(index, tab)| {
            if *tab == active {
                format!("[{} {}]", index + 1, tab.title())
            } else {
                format!(" {} {} ", index + 1, tab.title())
            }
        })
        .collect();
    Span::styled(labels.join(" "), Style::default().fg(theme.accent))
}

fn render_body(frame: &mut Frame, view: &SessionView<'_>, theme: PanelTheme, area: Rect) {
    let tab = view.store.tab();
    if tab != Tab::Components {
        let lines = match tab {
            Tab::Vuex => guarded_lines(view, "VuexHistory", theme, || {
                vuex_lines(view.store.vuex(), theme)
            }),
            _ => guarded_lines(view, "EventLog", theme, || {
                event_lines(view.store.events(), theme)
            }),
        };
        frame.render_widget(section(lines, tab.title(), theme), area);
        return;
    }

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    let components = view.store.components();
    let tree = guarded_lines(view, "ComponentTree", theme, || {
        component_tree_lines(components, theme)
    });
    let detail = guarded_lines(view, "InstanceDetails", theme, || {
        instance_detail_lines(components, theme)
    });
    frame.render_widget(section(tree, "Components", theme), columns[0]);
    frame.render_widget(section(detail, "Inspected", theme), columns[1]);
}

fn render_footer(view: &SessionView<'_>, theme: PanelTheme) -> Paragraph<'static> {
    let (vuex, events) = view.store.recording_flags();
    let flag = |enabled: bool| if enabled { "on" } else { "off" };
    let mode = if view.embedded { "embedded" } else { "standalone" };
    let line = format!(
        "Vuex recording: {}  Events recording: {}  Mode: {mode}  (q quit, r reload, 1-3 tabs, v/e recording, c target)",
        flag(vuex),
        flag(events)
    );
    Paragraph::new(Line::from(Span::styled(line, Style::default().fg(theme.muted))))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(titled_block("Keys", theme, theme.bg))
}

/// Builds a section's lines under the app's fault boundary. Before the
/// first bridge attaches there is no app and nothing to render.
pub fn guarded_lines(
    view: &SessionView<'_>,
    component: &str,
    theme: PanelTheme,
    build: impl FnOnce() -> Vec<Line<'static>>,
) -> Vec<Line<'static>> {
    match view.app {
        Some(app) => guard_with(app, component, theme, build),
        None => {
            let note = if view.phase == SessionPhase::Stopped {
                "Session stopped."
            } else {
                "Waiting for the target..."
            };
            vec![muted_line(note, theme)]
        }
    }
}

fn guard_with(
    app: &PanelApp,
    component: &str,
    theme: PanelTheme,
    build: impl FnOnce() -> Vec<Line<'static>>,
) -> Vec<Line<'static>> {
    match app.render_guarded(component, build) {
        Ok(lines) => lines,
        Err(fault) => fault_lines(&fault, theme),
    }
}

pub fn fault_lines(fault: &RenderFault, theme: PanelTheme) -> Vec<Line<'static>> {
    fault
        .formatted()
        .into_iter()
        .map(|line| Line::from(Span::styled(line, Style::default().fg(theme.critical))))
        .collect()
}

pub fn component_tree_lines(components: &ComponentsState, theme: PanelTheme) -> Vec<Line<'static>> {
    if components.instances.is_empty() {
        return vec![muted_line("No component instances.", theme)];
    }
    let mut lines = Vec::new();
    let mut stack: Vec<(&ComponentNode, usize)> =
        components.instances.iter().rev().map(|node| (node, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        let expanded = components.is_expanded(&node.id);
        let marker = match (node.children.is_empty(), expanded) {
            (true, _) => " ",
            (false, true) => "▾",
            (false, false) => "▸",
        };
        let inspected = components.inspected_instance_id.as_ref() == Some(&node.id);
        let mut label = format!("{}{marker} <{}>", "  ".repeat(depth), node.name);
        if node.is_fragment {
            label.push_str(" fragment");
        }
        if node.inactive {
            label.push_str(" inactive");
        }
        let style = if inspected {
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD)
        } else if node.inactive {
            Style::default().fg(theme.muted)
        } else {
            Style::default().fg(theme.text)
        };
        lines.push(Line::from(Span::styled(label, style)));
        if expanded {
            for child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }
    lines
}

fn instance_detail_lines(components: &ComponentsState, theme: PanelTheme) -> Vec<Line<'static>> {
    let Some(detail) = components.inspected_instance.as_ref() else {
        return vec![muted_line("Select a component instance.", theme)];
    };
    let mut lines = Vec::new();
    if let Some(name) = detail.get("name").and_then(Value::as_str) {
        lines.push(Line::from(Span::styled(
            format!("<{name}>"),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        )));
    }
    match detail.get("state") {
        Some(Value::Array(entries)) => {
            for entry in entries {
                let key = entry.get("key").and_then(Value::as_str).unwrap_or("?");
                let value = entry.get("value").cloned().unwrap_or(Value::Null);
                lines.push(Line::from(format!("{key}: {}", inline_json(&value))));
            }
        }
        Some(other) => lines.push(Line::from(inline_json(other))),
        None => lines.push(muted_line("No state.", theme)),
    }
    lines
}

pub fn vuex_lines(vuex: &VuexState, theme: PanelTheme) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    if !vuex.enabled {
        lines.push(muted_line("Recording paused.", theme));
    }
    match vuex.base_state.as_ref() {
        Some(base) => lines.push(Line::from(format!("Base State {}", inline_json(&base.state)))),
        None => lines.push(muted_line("No store detected.", theme)),
    }
    for (index, record) in vuex.history.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!("#{} ", index + 1), Style::default().fg(theme.muted)),
            Span::styled(
                record.mutation.mutation_type.clone(),
                Style::default().fg(theme.accent),
            ),
            Span::raw(format!(" {}", inline_json(&record.mutation.payload))),
        ]));
    }
    lines
}

pub fn event_lines(events: &EventsState, theme: PanelTheme) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    if !events.enabled {
        lines.push(muted_line("Recording paused.", theme));
    }
    if events.log.is_empty() {
        lines.push(muted_line("No events recorded.", theme));
    }
    for entry in &events.log {
        let record = &entry.record;
        let source = record
            .instance_name
            .as_deref()
            .map(|name| format!(" by <{name}>"))
            .unwrap_or_default();
        lines.push(Line::from(vec![
            Span::styled(
                entry.received_at.format("%H:%M:%S ").to_string(),
                Style::default().fg(theme.muted),
            ),
            Span::styled(record.event_name.clone(), Style::default().fg(theme.accent)),
            Span::raw(format!("{source} {}", record.event_type)),
            Span::styled(
                format!(" {}", inline_json(&record.payload)),
                Style::default().fg(theme.muted),
            ),
        ]));
    }
    lines
}

fn inline_json(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= MAX_INLINE_JSON {
        return text;
    }
    let mut clipped: String = text.chars().take(MAX_INLINE_JSON - 3).collect();
    clipped.push_str("...");
    clipped
}

fn muted_line(text: &str, theme: PanelTheme) -> Line<'static> {
    Line::from(Span::styled(text.to_string(), Style::default().fg(theme.muted)))
}

fn section(lines: Vec<Line<'static>>, title: &str, theme: PanelTheme) -> Paragraph<'static> {
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(titled_block(title, theme, theme.surface))
        .wrap(Wrap { trim: false })
}

fn titled_block(title: &str, theme: PanelTheme, bg: Color) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(bg))
        .title(Span::styled(
            title.to_string(),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}
