// Report generation from a processed graph

use crate::graph::TraceGraph;
use crate::layer::LayerContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDetails {
    pub address: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDetails {
    pub id: String,
    pub source: String,
    pub target: String,
    pub byte_count: u64,
    pub packet_count: u64,
    pub trace_count: u64,
}

/// A processed graph flattened for output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDetails {
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
    pub total_host_count: u64,
    pub total_edge_count: u64,
    pub total_byte_count: u64,
    pub total_packet_count: u64,
    pub total_trace_count: u64,
    pub nodes: Vec<NodeDetails>,
    pub edges: Vec<EdgeDetails>,
}

impl GraphDetails {
    /// Nodes come out sorted by address, edges by (source, target).
    pub fn from_graph(graph: &TraceGraph, ctx: &LayerContext) -> Self {
        let mut nodes: Vec<_> = graph.nodes().collect();
        nodes.sort_by_key(|node| node.address);

        let mut edges: Vec<_> = graph.edges().collect();
        edges.sort_by_key(|(source, target, _)| (*source, *target));

        Self {
            run_id: ctx.run_id.to_string(),
            from: ctx.from,
            to: ctx.to,
            total_host_count: graph.node_count() as u64,
            total_edge_count: graph.edge_count() as u64,
            total_byte_count: graph.total_bytes(),
            total_packet_count: graph.total_packets(),
            total_trace_count: graph.total_traces(),
            nodes: nodes
                .into_iter()
                .map(|node| NodeDetails {
                    address: node.address.to_string(),
                    name: node.name.clone(),
                    dns_name: node.dns_name.clone(),
                })
                .collect(),
            edges: edges
                .into_iter()
                .map(|(source, target, edge)| EdgeDetails {
                    id: format!("{}-{}", source, target),
                    source: source.to_string(),
                    target: target.to_string(),
                    byte_count: edge.byte_count,
                    packet_count: edge.packet_count,
                    trace_count: edge.trace_count,
                })
                .collect(),
        }
    }

    fn names(&self) -> HashMap<&str, &str> {
        self.nodes
            .iter()
            .map(|node| (node.address.as_str(), node.name.as_str()))
            .collect()
    }

    fn format_window(&self) -> String {
        match (self.from, self.to) {
            (Some(from), Some(to)) => format!(
                "{} → {}",
                from.format("%Y-%m-%d %H:%M:%S UTC"),
                to.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            _ => "All time".to_string(),
        }
    }
}

pub fn generate_text_report(details: &GraphDetails) -> String {
    let mut report = String::new();
    let names = details.names();

    // Header
    report.push_str(RULE);
    report.push_str("                        FLOWMAP TRAFFIC GRAPH REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Run ID:       {}\n", details.run_id));
    report.push_str(&format!("Window:       {}\n", details.format_window()));
    report.push_str(&format!("Hosts:        {}\n", details.total_host_count));
    report.push_str(&format!("Connections:  {}\n", details.total_edge_count));
    report.push_str(&format!("Traces:       {}\n", details.total_trace_count));
    report.push_str(&format!("Packets:      {}\n", details.total_packet_count));
    report.push_str(&format!("Traffic:      {}\n", format_bytes(details.total_byte_count)));
    report.push('\n');

    report.push_str(RULE);
    report.push_str("HOSTS\n");
    report.push_str(RULE);
    report.push('\n');

    if details.nodes.is_empty() {
        report.push_str("  (none)\n");
    }
    for node in &details.nodes {
        if node.name == node.address {
            report.push_str(&format!("  {}\n", node.address));
        } else {
            report.push_str(&format!("  {:<40} {}\n", node.name, node.address));
        }
    }
    report.push('\n');

    report.push_str(RULE);
    report.push_str("CONNECTIONS (by traffic)\n");
    report.push_str(RULE);
    report.push('\n');

    let mut edges: Vec<&EdgeDetails> = details.edges.iter().collect();
    edges.sort_by(|a, b| b.byte_count.cmp(&a.byte_count).then_with(|| a.id.cmp(&b.id)));

    if edges.is_empty() {
        report.push_str("  (none)\n");
    }
    for edge in edges {
        let source = names.get(edge.source.as_str()).copied().unwrap_or(&edge.source);
        let target = names.get(edge.target.as_str()).copied().unwrap_or(&edge.target);
        report.push_str(&format!(
            "  {} → {}\n      {} in {} packet(s), {} trace(s)\n",
            source,
            target,
            format_bytes(edge.byte_count),
            edge.packet_count,
            edge.trace_count
        ));
    }
    report.push('\n');

    // Footer
    report.push_str(RULE);
    report.push_str("                          End of Report\n");
    report.push_str(RULE);

    report
}

pub fn generate_json_report(details: &GraphDetails) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Flowmap",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": Utc::now().to_rfc3339(),
                "format": "json"
            },
            "graph": details
        }
    });

    serde_json::to_string_pretty(&json_report)
}

/// One row per edge.
pub fn generate_csv_report(details: &GraphDetails) -> String {
    let names = details.names();
    let mut csv = String::from("source,source_name,target,target_name,bytes,packets,traces\n");

    for edge in &details.edges {
        let source_name = names.get(edge.source.as_str()).copied().unwrap_or("");
        let target_name = names.get(edge.target.as_str()).copied().unwrap_or("");
        csv.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            csv_field(&edge.source),
            csv_field(source_name),
            csv_field(&edge.target),
            csv_field(target_name),
            edge.byte_count,
            edge.packet_count,
            edge.trace_count
        ));
    }

    csv
}

pub fn generate_report(
    details: &GraphDetails,
    format: ReportFormat,
) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(details)),
        ReportFormat::Json => generate_json_report(details),
        ReportFormat::Csv => Ok(generate_csv_report(details)),
    }
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
