//! Root application bound to one generation of the session store.

use std::any::Any;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::bridge::Generation;
use crate::store::SessionStore;

/// Receives the derived dark-theme flag. The terminal shell reads it back
/// when picking a palette.
pub trait ThemeSink: Send + Sync {
    fn apply_dark(&self, dark: bool);
}

/// Out-of-band fault reporting for embedded panels. Implementations must not
/// panic.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, fault: &RenderFault);
}

#[derive(Debug, Clone, Default)]
pub struct SharedTheme {
    dark: Arc<AtomicBool>,
}

impl SharedTheme {
    pub fn is_dark(&self) -> bool {
        self.dark.load(Ordering::Relaxed)
    }
}

impl ThemeSink for SharedTheme {
    fn apply_dark(&self, dark: bool) {
        self.dark.store(dark, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderFault {
    pub component: String,
    pub message: String,
    pub trace: Vec<String>,
    pub generation: Generation,
}

impl RenderFault {
    /// Lines rendered in place of the failed section.
    pub fn formatted(&self) -> Vec<String> {
        let mut lines = vec![format!("Error in render of <{}>: {}", self.component, self.message)];
        lines.extend(self.trace.iter().map(|frame| format!("  {frame}")));
        lines
    }
}

/// Logs faults through tracing only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn report(&self, fault: &RenderFault) {
        error!(
            event = "render_fault",
            component = %fault.component,
            generation = fault.generation,
            message = %fault.message
        );
    }
}

/// Appends one JSON line per fault to `render-faults.jsonl`.
#[derive(Debug, Clone)]
pub struct FileDiagnostics {
    path: PathBuf,
}

#[derive(Serialize)]
struct FaultLine<'a> {
    reported_at: String,
    #[serde(flatten)]
    fault: &'a RenderFault,
}

impl FileDiagnostics {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            path: dir.join("render-faults.jsonl"),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn append(&self, fault: &RenderFault) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&FaultLine {
            reported_at: Utc::now().to_rfc3339(),
            fault,
        })
        .map_err(std::io::Error::other)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl DiagnosticSink for FileDiagnostics {
    fn report(&self, fault: &RenderFault) {
        if let Err(err) = self.append(fault) {
            warn!(
                event = "diagnostic_write_error",
                path = %self.path.display(),
                error = %err
            );
        }
    }
}

pub struct PanelApp {
    generation: Generation,
    theme: Arc<dyn ThemeSink>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    applied_dark: bool,
    mounted: bool,
}

impl PanelApp {
    /// Binds to the store and applies the theme flag right away.
    /// `diagnostics` is only set for embedded panels.
    pub fn mount(
        generation: Generation,
        store: &SessionStore,
        theme: Arc<dyn ThemeSink>,
        diagnostics: Option<Arc<dyn DiagnosticSink>>,
    ) -> Self {
        let dark = store.settings().dark_theme;
        theme.apply_dark(dark);
        debug!(event = "app_mounted", generation, dark);
        Self {
            generation,
            theme,
            diagnostics,
            applied_dark: dark,
            mounted: true,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn sync(&mut self, store: &SessionStore) {
        if !self.mounted {
            return;
        }
        let dark = store.settings().dark_theme;
        if dark != self.applied_dark {
            self.theme.apply_dark(dark);
            self.applied_dark = dark;
        }
    }

    pub fn destroy(&mut self) {
        if self.mounted {
            self.mounted = false;
            debug!(event = "app_destroyed", generation = self.generation);
        }
    }

    /// Runs one section's render under a fault boundary.
    pub fn render_guarded<T>(
        &self,
        component: &str,
        render: impl FnOnce() -> T,
    ) -> Result<T, RenderFault> {
        let panic_payload = match panic::catch_unwind(AssertUnwindSafe(render)) {
            Ok(value) => return Ok(value),
            Err(payload) => payload,
        };
        let fault = RenderFault {
            component: component.to_string(),
            message: panic_message(panic_payload.as_ref()),
            trace: vec![
                format!("---> <{component}>"),
                format!("       <PanelApp generation={}>", self.generation),
                "         <Root>".to_string(),
            ],
            generation: self.generation,
        };
        warn!(
            event = "render_fault",
            component,
            generation = self.generation,
            message = %fault.message
        );
        if let Some(sink) = self.diagnostics.as_ref() {
            let reported = panic::catch_unwind(AssertUnwindSafe(|| sink.report(&fault)));
            if reported.is_err() {
                debug!(event = "diagnostic_sink_panicked", component);
            }
        }
        Err(fault)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown render fault".to_string()
    }
}
