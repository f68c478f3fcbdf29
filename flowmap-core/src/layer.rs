//! Graph processing pipeline.
//!
//! A pipeline is an ordered list of layers run one after another over the same
//! [`TraceGraph`]; every layer sees what the previous ones did. Layers are
//! configured through [`LayerKind`], which is tagged by `type` in config files
//! so a new layer only needs a new variant.

use crate::graph::TraceGraph;
use crate::naming::NamingLayer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// One stage of graph processing. Mutates node and edge attributes in place.
pub trait Layer {
    fn execute(&self, graph: &mut TraceGraph, ctx: &LayerContext);

    /// Short human readable summary of the layer's configuration.
    fn description(&self) -> String;
}

/// Per-run information handed to every layer.
#[derive(Debug, Clone)]
pub struct LayerContext {
    pub run_id: Uuid,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl LayerContext {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            from: Some(from),
            to: Some(to),
        }
    }
}

impl Default for LayerContext {
    fn default() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            from: None,
            to: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKind {
    Naming(NamingLayer),
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Naming(_) => "naming",
        }
    }

    pub fn layer(&self) -> &dyn Layer {
        match self {
            LayerKind::Naming(layer) => layer,
        }
    }
}

/// A configured layer as it appears in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: LayerKind,
}

fn default_enabled() -> bool {
    true
}

impl LayerEntry {
    pub fn new(name: &str, kind: LayerKind) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            kind,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    layers: Vec<LayerEntry>,
}

impl Pipeline {
    pub fn new(layers: Vec<LayerEntry>) -> Self {
        Self { layers }
    }

    pub fn with_layer(mut self, entry: LayerEntry) -> Self {
        self.layers.push(entry);
        self
    }

    pub fn layers(&self) -> &[LayerEntry] {
        &self.layers
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run every enabled layer in order. Returns how many ran.
    pub fn run(&self, graph: &mut TraceGraph, ctx: &LayerContext) -> usize {
        let mut executed = 0;

        for entry in &self.layers {
            let layer = entry.kind.layer();
            if !entry.enabled {
                debug!(run_id = %ctx.run_id, layer = %entry.name, "skipping disabled layer");
                continue;
            }

            debug!(
                run_id = %ctx.run_id,
                layer = %entry.name,
                kind = entry.kind.as_str(),
                "executing layer: {}",
                layer.description()
            );
            layer.execute(graph, ctx);
            executed += 1;
        }

        info!(
            run_id = %ctx.run_id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Executed {} of {} layer(s)",
            executed,
            self.layers.len()
        );
        executed
    }
}
