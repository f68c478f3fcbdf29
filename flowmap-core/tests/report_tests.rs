// Tests for report generation

use chrono::DateTime;
use flowmap_core::graph::TraceGraph;
use flowmap_core::layer::{Layer, LayerContext};
use flowmap_core::model::AggregateTrace;
use flowmap_core::naming::{AddressMatcher, NamingLayer, NamingRule};
use flowmap_core::report::{
    generate_csv_report, generate_json_report, generate_report, generate_text_report, save_report,
    GraphDetails, ReportFormat,
};
use std::net::IpAddr;
use tempfile::TempDir;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn sample_context() -> LayerContext {
    LayerContext::new(
        DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        DateTime::from_timestamp(1_700_003_600, 0).unwrap(),
    )
}

fn sample_details() -> GraphDetails {
    let mut graph = TraceGraph::build(&[
        AggregateTrace::new(ip("10.0.0.2"), ip("10.0.0.1")).with_counts(2048, 4, 2),
        AggregateTrace::new(ip("10.0.0.1"), ip("1.1.1.1")).with_counts(100, 1, 1),
    ]);

    let ctx = sample_context();
    NamingLayer::new(vec![NamingRule::include(
        AddressMatcher::parse("1.1.1.1").unwrap(),
        "Main DNS Server",
    )])
    .execute(&mut graph, &ctx);

    GraphDetails::from_graph(&graph, &ctx)
}

// ============================================================================
// Graph Details Tests
// ============================================================================

#[test]
fn test_details_totals() {
    let details = sample_details();

    assert_eq!(details.total_host_count, 3);
    assert_eq!(details.total_edge_count, 2);
    assert_eq!(details.total_byte_count, 2148);
    assert_eq!(details.total_packet_count, 5);
    assert_eq!(details.total_trace_count, 3);
}

#[test]
fn test_details_are_sorted() {
    let details = sample_details();

    let addresses: Vec<&str> = details.nodes.iter().map(|n| n.address.as_str()).collect();
    assert_eq!(addresses, vec!["1.1.1.1", "10.0.0.1", "10.0.0.2"]);

    let ids: Vec<&str> = details.edges.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["10.0.0.1-1.1.1.1", "10.0.0.2-10.0.0.1"]);
}

#[test]
fn test_details_carry_layer_names() {
    let details = sample_details();
    let named = details.nodes.iter().find(|n| n.address == "1.1.1.1").unwrap();
    assert_eq!(named.name, "Main DNS Server");
}

// ============================================================================
// Format Tests
// ============================================================================

#[test]
fn test_report_format_from_str() {
    assert_eq!(ReportFormat::from_str("text"), Some(ReportFormat::Text));
    assert_eq!(ReportFormat::from_str("TXT"), Some(ReportFormat::Text));
    assert_eq!(ReportFormat::from_str("json"), Some(ReportFormat::Json));
    assert_eq!(ReportFormat::from_str("Csv"), Some(ReportFormat::Csv));
    assert_eq!(ReportFormat::from_str("html"), None);
}

#[test]
fn test_text_report_contents() {
    let report = generate_text_report(&sample_details());

    assert!(report.contains("FLOWMAP TRAFFIC GRAPH REPORT"));
    assert!(report.contains("Hosts:        3"));
    assert!(report.contains("Main DNS Server"));
    assert!(report.contains("2.0 KiB"));
    assert!(report.contains("End of Report"));

    // Largest connection is listed first
    let big = report.find("10.0.0.2 → 10.0.0.1").unwrap();
    let small = report.find("10.0.0.1 → Main DNS Server").unwrap();
    assert!(big < small);
}

#[test]
fn test_text_report_empty_graph() {
    let details = GraphDetails::from_graph(&TraceGraph::new(), &LayerContext::default());
    let report = generate_text_report(&details);

    assert!(report.contains("Window:       All time"));
    assert!(report.contains("(none)"));
}

#[test]
fn test_json_report_is_valid() {
    let details = sample_details();
    let json = generate_json_report(&details).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["report"]["metadata"]["generator"], "Flowmap");
    assert_eq!(value["report"]["graph"]["total_host_count"], 3);
    assert_eq!(value["report"]["graph"]["run_id"], details.run_id.as_str());
    assert_eq!(
        value["report"]["graph"]["edges"].as_array().unwrap().len(),
        2
    );
}

#[test]
fn test_csv_report_rows() {
    let csv = generate_csv_report(&sample_details());
    let lines: Vec<&str> = csv.lines().collect();

    assert_eq!(
        lines[0],
        "source,source_name,target,target_name,bytes,packets,traces"
    );
    assert_eq!(lines[1], "10.0.0.1,10.0.0.1,1.1.1.1,Main DNS Server,100,1,1");
    assert_eq!(lines[2], "10.0.0.2,10.0.0.2,10.0.0.1,10.0.0.1,2048,4,2");
    assert_eq!(lines.len(), 3);
}

#[test]
fn test_generate_report_dispatches_on_format() {
    let details = sample_details();

    assert_eq!(
        generate_report(&details, ReportFormat::Csv).unwrap(),
        generate_csv_report(&details)
    );
    assert!(generate_report(&details, ReportFormat::Text)
        .unwrap()
        .contains("HOSTS"));
    assert!(generate_report(&details, ReportFormat::Json)
        .unwrap()
        .starts_with('{'));
}

#[test]
fn test_save_report() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("report.csv");

    let content = generate_csv_report(&sample_details());
    save_report(&content, &path).unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
}
