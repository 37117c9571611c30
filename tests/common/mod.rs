// tests/common/mod.rs

//! Shared helpers for integration tests: manifest builders, an
//! event-recording listener, and a scripted module activator.

#![allow(dead_code)]

use girder::{
    BundleEventKind, Event, Framework, FrameworkEventKind, Listener, ModuleActivator,
    ModuleContent, ModuleId, RuntimeConfig, ServiceEventKind,
};
use std::sync::{Arc, Mutex};

pub fn framework() -> Framework {
    // First caller wins; later try_init calls in the same binary are no-ops.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
    Framework::start(RuntimeConfig::default())
}

/// Builds manifest text; repeated clauses for one header are joined into a
/// single comma-separated value
pub struct ManifestBuilder {
    name: String,
    version: String,
    imports: Vec<String>,
    exports: Vec<String>,
    requires: Vec<String>,
    fragment_host: Option<String>,
    activation: Option<String>,
}

impl ManifestBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            imports: Vec::new(),
            exports: Vec::new(),
            requires: Vec::new(),
            fragment_host: None,
            activation: None,
        }
    }

    pub fn import(mut self, package: &str, range: &str) -> Self {
        if range.is_empty() {
            self.imports.push(package.to_string());
        } else {
            self.imports
                .push(format!("{package};version=\"{range}\""));
        }
        self
    }

    pub fn export(mut self, package: &str, version: &str) -> Self {
        self.exports
            .push(format!("{package};version=\"{version}\""));
        self
    }

    pub fn require(mut self, name: &str, range: &str) -> Self {
        if range.is_empty() {
            self.requires.push(name.to_string());
        } else {
            self.requires
                .push(format!("{name};bundle-version=\"{range}\""));
        }
        self
    }

    pub fn fragment_host(mut self, name: &str, range: &str) -> Self {
        self.fragment_host = Some(if range.is_empty() {
            name.to_string()
        } else {
            format!("{name};bundle-version=\"{range}\"")
        });
        self
    }

    pub fn lazy(mut self, include: &str, exclude: &str) -> Self {
        let mut policy = "lazy".to_string();
        if !include.is_empty() {
            policy.push_str(&format!(";include:=\"{include}\""));
        }
        if !exclude.is_empty() {
            policy.push_str(&format!(";exclude:=\"{exclude}\""));
        }
        self.activation = Some(policy);
        self
    }

    pub fn build(self) -> String {
        let mut lines = vec![
            format!("Bundle-SymbolicName: {}", self.name),
            format!("Bundle-Version: {}", self.version),
        ];
        if !self.imports.is_empty() {
            lines.push(format!("Import-Package: {}", self.imports.join(", ")));
        }
        if !self.exports.is_empty() {
            lines.push(format!("Export-Package: {}", self.exports.join(", ")));
        }
        if !self.requires.is_empty() {
            lines.push(format!("Require-Bundle: {}", self.requires.join(", ")));
        }
        if let Some(host) = self.fragment_host {
            lines.push(format!("Fragment-Host: {host}"));
        }
        if let Some(policy) = self.activation {
            lines.push(format!("Bundle-ActivationPolicy: {policy}"));
        }
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    pub fn content(self) -> ModuleContent {
        ModuleContent::new(self.build())
    }

    pub fn content_with(self, activator: Arc<dyn ModuleActivator>) -> ModuleContent {
        ModuleContent::with_activator(self.build(), activator)
    }
}

/// Records every delivered event for later assertions
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> Listener {
        let sink = self.events.clone();
        Arc::new(move |event: &Event| {
            sink.lock().unwrap().push(event.clone());
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn bundle_kinds(&self, module: ModuleId) -> Vec<BundleEventKind> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                Event::Bundle(e) if e.module == module => Some(e.kind),
                _ => None,
            })
            .collect()
    }

    pub fn service_kinds(&self) -> Vec<ServiceEventKind> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                Event::Service(e) => Some(e.kind),
                _ => None,
            })
            .collect()
    }

    pub fn framework_kinds(&self) -> Vec<FrameworkEventKind> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                Event::Framework(e) => Some(e.kind),
                _ => None,
            })
            .collect()
    }
}

/// Scripted entry point that records invocations and can be told to fail
pub struct TestActivator {
    pub started: Mutex<Vec<ModuleId>>,
    pub stopped: Mutex<Vec<ModuleId>>,
    fail_start: bool,
}

impl TestActivator {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            fail_start: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            fail_start: true,
        })
    }

    pub fn start_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub fn stop_count(&self) -> usize {
        self.stopped.lock().unwrap().len()
    }
}

impl ModuleActivator for TestActivator {
    fn start(
        &self,
        module: ModuleId,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.fail_start {
            return Err("scripted start failure".into());
        }
        self.started.lock().unwrap().push(module);
        Ok(())
    }

    fn stop(
        &self,
        module: ModuleId,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.stopped.lock().unwrap().push(module);
        Ok(())
    }
}
