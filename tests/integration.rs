//! Integration tests for RFM Segments

use chrono::{Duration, NaiveDate, NaiveDateTime};
use pretty_assertions::assert_eq;
use rfm_segments::report::write_roster_csv;
use rfm_segments::{
    compute_segments, customers_in_segment, RawTransactionAdapter, RfmError, Segment,
    SegmentedCustomer,
};
use std::io::Write;
use tempfile::NamedTempFile;

const HEADER: &str = "Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Customer ID,Country";

fn as_of() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2011, 12, 11)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn days_ago(days: i64) -> String {
    (as_of() - Duration::days(days))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn line(invoice: &str, quantity: i64, price: f64, days: i64, customer: &str) -> String {
    format!(
        "{},22752,\"SET 7 BABUSHKA NESTING BOXES, RED\",{},{},{},{},United Kingdom",
        invoice,
        quantity,
        days_ago(days),
        price,
        customer
    )
}

/// Ten customers; 100 is recent with two invoices, 101 is a single old order
fn sample_lines() -> Vec<String> {
    let mut lines = vec![
        // Customer 100: two invoices worth 500 in total, last one 10 days ago
        line("600001", 10, 20.0, 25, "100.0"),
        line("600002", 5, 40.0, 10, "100.0"),
        line("600002", 4, 25.0, 10, "100.0"),
        // Cancelled order must not count
        line("C600003", -1, 999.0, 2, "100.0"),
        // Customer 101: one invoice 400 days ago
        line("600004", 3, 5.0, 400, "101.0"),
        // Missing customer id
        line("600005", 1, 3.0, 5, ""),
    ];

    let others = [
        (102, 30, 40.0),
        (103, 60, 80.0),
        (104, 90, 120.0),
        (105, 120, 160.0),
        (106, 150, 200.0),
        (107, 200, 240.0),
        (108, 250, 280.0),
        (109, 300, 320.0),
    ];
    for (customer, days, amount) in others {
        lines.push(line(
            &format!("7{:05}", customer),
            1,
            amount,
            days,
            &customer.to_string(),
        ));
    }

    lines
}

fn csv_text(lines: &[String]) -> String {
    let mut text = String::from(HEADER);
    text.push('\n');
    for l in lines {
        text.push_str(l);
        text.push('\n');
    }
    text
}

fn segment_sample(lines: &[String]) -> Result<Vec<SegmentedCustomer>, RfmError> {
    let table = RawTransactionAdapter::parse_csv(csv_text(lines).as_bytes())?;
    compute_segments(&table, as_of())
}

fn find(segments: &[SegmentedCustomer], customer_id: u64) -> &SegmentedCustomer {
    segments
        .iter()
        .find(|s| s.customer_id() == customer_id)
        .unwrap()
}

#[test]
fn test_recent_repeat_customer_is_champion() {
    let segments = segment_sample(&sample_lines()).unwrap();
    let top = find(&segments, 100);

    assert_eq!(top.metrics().recency, 10);
    assert_eq!(top.metrics().frequency, 2);
    assert_eq!(top.metrics().monetary, 500.0);
    assert_eq!(top.scored.recency_score.get(), 5);
    assert_eq!(top.scored.frequency_score.get(), 5);
    assert_eq!(top.scored.rf_code.to_string(), "55");
    assert_eq!(top.segment, Segment::Champions);
}

#[test]
fn test_single_old_order_is_hibernating() {
    let segments = segment_sample(&sample_lines()).unwrap();
    let old = find(&segments, 101);

    assert_eq!(old.metrics().recency, 400);
    assert_eq!(old.metrics().frequency, 1);
    assert_eq!(old.scored.rf_code.to_string(), "11");
    assert_eq!(old.segment, Segment::Hibernating);
}

#[test]
fn test_rows_without_customer_are_ignored() {
    let segments = segment_sample(&sample_lines()).unwrap();
    assert_eq!(segments.len(), 10);
}

#[test]
fn test_output_invariants() {
    for customer in segment_sample(&sample_lines()).unwrap() {
        assert!(customer.metrics().monetary > 0.0);
        assert!(customer.metrics().frequency >= 1);
    }
}

#[test]
fn test_row_order_does_not_change_result() {
    let forward = segment_sample(&sample_lines()).unwrap();

    let mut reversed_lines = sample_lines();
    reversed_lines.reverse();
    let mut reversed = segment_sample(&reversed_lines).unwrap();
    reversed.sort_by_key(|s| s.customer_id());

    assert_eq!(forward, reversed);
    assert_eq!(forward, segment_sample(&sample_lines()).unwrap());
}

#[test]
fn test_minimum_population_of_five() {
    let lines: Vec<String> = (1..=5)
        .map(|i| line(&format!("80000{}", i), 1, i as f64 * 10.0, i * 20, &i.to_string()))
        .collect();

    let segments = segment_sample(&lines).unwrap();
    assert_eq!(segments.len(), 5);

    let monetary: Vec<u8> = segments.iter().map(|s| s.scored.monetary_score.get()).collect();
    let recency: Vec<u8> = segments.iter().map(|s| s.scored.recency_score.get()).collect();
    assert_eq!(monetary, vec![1, 2, 3, 4, 5]);
    assert_eq!(recency, vec![5, 4, 3, 2, 1]);
}

#[test]
fn test_four_customers_is_insufficient() {
    let lines: Vec<String> = (1..=4)
        .map(|i| line(&format!("80000{}", i), 1, i as f64 * 10.0, i * 20, &i.to_string()))
        .collect();

    assert!(matches!(
        segment_sample(&lines),
        Err(RfmError::InsufficientData { distinct: 4, .. })
    ));
}

#[test]
fn test_missing_customer_column_fails() {
    let csv = "Invoice,Quantity,InvoiceDate,Price\n600001,1,2011-12-01 00:00:00,1.0\n";
    let table = RawTransactionAdapter::parse_csv(csv.as_bytes()).unwrap();

    assert!(matches!(
        compute_segments(&table, as_of()),
        Err(RfmError::Schema { .. })
    ));
}

#[test]
fn test_export_roster_from_file() {
    let mut input = NamedTempFile::new().unwrap();
    write!(input, "{}", csv_text(&sample_lines())).unwrap();

    let table = RawTransactionAdapter::parse_csv_file(input.path()).unwrap();
    let segments = compute_segments(&table, as_of()).unwrap();
    let champions = customers_in_segment(&segments, Segment::Champions);
    assert!(champions.contains(&100));

    let output = NamedTempFile::new().unwrap();
    write_roster_csv(output.reopen().unwrap(), &champions).unwrap();

    let text = std::fs::read_to_string(output.path()).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("customer_id"));
    assert_eq!(lines.count(), champions.len());
}
