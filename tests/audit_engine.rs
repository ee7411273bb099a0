mod common;

use std::fs;

use common::{ORDERS_DB, TestWorkspace, finding_lines};
use encoding_rs::UTF_8;
use row_audit::{
    columns::{KeyTuple, KeyValues, describe_columns},
    compare::Tolerance,
    engine::{AuditSettings, AuditSummary, Findings, RunContext, Termination, run_audit},
    metadata::{AuditMeta, ColumnMeta},
    report::{AuditReport, ReportHeading},
    source::{DelimitedOptions, DelimitedSource, RowSource, SqlSource},
    target::{DelimitedTarget, SqliteTarget, TargetProvider},
};
use rust_decimal::Decimal;

const SOURCE: &str = "\
id|customer|amount|placed
1|Alice|12.5|31/01/2008
2|Bob|7.30|14/02/2008
4|Dave|1|01/01/2008
";

fn delimited(path: &std::path::Path) -> DelimitedSource<Box<dyn std::io::Read>> {
    let options = DelimitedOptions {
        delimiter: b'|',
        encoding: UTF_8,
        has_header: true,
        column_names: Vec::new(),
    };
    DelimitedSource::open(path, &options).expect("open source")
}

fn audit(
    source: &mut dyn RowSource,
    target: &mut dyn TargetProvider,
    key: &[&str],
    settings: AuditSettings,
    meta: Option<&AuditMeta>,
) -> (AuditSummary, Findings) {
    let names = source.column_names().to_vec();
    let specs = key.iter().map(|k| k.to_string()).collect::<Vec<_>>();
    let key = KeyTuple::parse(&specs, &names).expect("key");
    let mut columns = describe_columns(&names, &key);
    if let Some(meta) = meta {
        meta.apply(&mut columns);
    }
    let key_names = key
        .names(&columns)
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    target.bind(&names, &key_names).expect("bind target");
    let mut context = RunContext::new(settings, columns, key);
    let mut findings = Findings::default();
    let summary = run_audit(&mut context, source, target, &mut findings).expect("audit runs");
    (summary, findings)
}

#[test]
fn sqlite_target_reports_value_drift_and_missing_rows() {
    let workspace = TestWorkspace::new();
    let db = workspace.sqlite("orders.db", ORDERS_DB);
    let input = workspace.write("orders.txt", SOURCE);
    let mut source = delimited(&input);
    let mut target = SqliteTarget::open(&db, "orders").expect("open target");

    let (summary, findings) = audit(
        &mut source,
        &mut target,
        &["id"],
        AuditSettings::default(),
        None,
    );

    assert_eq!(summary.termination, Termination::EndOfInput);
    assert_eq!(summary.counters.rows_checked, 3);
    assert_eq!(summary.counters.rows_with_errors, 1);
    assert_eq!(summary.counters.columns_with_errors, 1);
    assert_eq!(summary.counters.missing_rows, 1);
    assert_eq!(summary.counters.non_key_columns_audited, 6);
    assert_eq!(summary.total_errors, 2);

    assert_eq!(findings.discrepancies.len(), 1);
    let drift = &findings.discrepancies[0];
    assert_eq!(drift.key, KeyValues::new(vec!["2".to_string()]));
    assert_eq!(drift.column_name, "amount");
    assert_eq!(drift.column_position, 3);
    assert_eq!(drift.row_number, 2);
    assert_eq!(drift.target.as_deref(), Some("7.25"));
    assert_eq!(drift.source.as_deref(), Some("7.30"));

    assert_eq!(findings.missing.len(), 1);
    assert_eq!(findings.missing[0].key.as_slice(), ["4".to_string()]);
    assert_eq!(findings.missing[0].row_number, 3);
}

#[test]
fn tolerance_absorbs_small_numeric_drift() {
    let workspace = TestWorkspace::new();
    let db = workspace.sqlite("orders.db", ORDERS_DB);
    let input = workspace.write("orders.txt", SOURCE);
    let mut source = delimited(&input);
    let mut target = SqliteTarget::open(&db, "orders").expect("open target");
    let settings = AuditSettings {
        tolerance: Tolerance::absolute(Decimal::new(1, 1)),
        ..AuditSettings::default()
    };

    let (summary, findings) = audit(&mut source, &mut target, &["id"], settings, None);

    assert!(findings.discrepancies.is_empty());
    assert_eq!(summary.counters.columns_with_errors, 0);
    assert_eq!(summary.total_errors, 1);
}

#[test]
fn reverse_pass_finds_target_rows_without_a_source_row() {
    let workspace = TestWorkspace::new();
    let db = workspace.sqlite("orders.db", ORDERS_DB);
    let input = workspace.write("orders.txt", SOURCE);
    let mut source = delimited(&input);
    let mut target = SqliteTarget::open(&db, "orders").expect("open target");
    let settings = AuditSettings {
        reverse: true,
        ..AuditSettings::default()
    };

    let (summary, findings) = audit(&mut source, &mut target, &["id"], settings, None);

    assert!(summary.reverse_ran);
    assert_eq!(findings.orphans, vec![KeyValues::new(vec!["3".to_string()])]);
    assert_eq!(summary.counters.reverse_missing, 1);
    assert_eq!(summary.total_errors, 3);
    assert!(
        summary
            .statistics_line()
            .ends_with("Reverse-compare loss: 1")
    );
}

#[test]
fn max_errors_ends_the_run_early_with_a_summary() {
    let workspace = TestWorkspace::new();
    let db = workspace.sqlite("orders.db", ORDERS_DB);
    let input = workspace.write(
        "orders.txt",
        "id|customer|amount|placed\n1|Alicia|12.5|31/01/2008\n2|Bobby|7.25|14/02/2008\n",
    );
    let mut source = delimited(&input);
    let mut target = SqliteTarget::open(&db, "orders").expect("open target");
    let settings = AuditSettings {
        max_errors: 1,
        ..AuditSettings::default()
    };

    let (summary, findings) = audit(&mut source, &mut target, &["id"], settings, None);

    assert_eq!(summary.termination, Termination::MaxErrors);
    assert_eq!(summary.counters.rows_checked, 1);
    assert_eq!(summary.counters.rows_with_errors, 1);
    assert_eq!(findings.discrepancies.len(), 1);
    assert_eq!(findings.discrepancies[0].column_name, "customer");
}

#[test]
fn sql_script_source_is_audited_like_a_file() {
    let workspace = TestWorkspace::new();
    let db = workspace.sqlite(
        "orders.db",
        &format!(
            "{ORDERS_DB}
            CREATE TABLE staging (id TEXT, customer TEXT, amount TEXT, placed TEXT);
            INSERT INTO staging VALUES ('1', 'Alice', '12.50', '2008-01-31');
            INSERT INTO staging VALUES ('3', 'Caroline', '100.00', '2008-03-01');"
        ),
    );
    let script = "CREATE TEMP VIEW feed AS SELECT id, customer, amount, placed FROM staging;
                  SELECT * FROM feed ORDER BY id";
    let mut source = SqlSource::open(&db, script).expect("open query source");
    assert_eq!(source.column_names(), ["id", "customer", "amount", "placed"]);
    let mut target = SqliteTarget::open(&db, "orders").expect("open target");

    let (summary, findings) = audit(
        &mut source,
        &mut target,
        &["id"],
        AuditSettings::default(),
        None,
    );

    assert_eq!(summary.counters.rows_checked, 2);
    assert_eq!(findings.discrepancies.len(), 1);
    assert_eq!(findings.discrepancies[0].column_name, "customer");
    assert_eq!(findings.discrepancies[0].source.as_deref(), Some("Caroline"));
}

#[test]
fn metadata_names_headerless_columns_and_carries_provenance() {
    let workspace = TestWorkspace::new();
    let db = workspace.sqlite("orders.db", ORDERS_DB);
    let input = workspace.write("orders.txt", "2|Bob|7.30|2008-02-14\n");
    let meta = AuditMeta {
        table: Some("ORDERS_SRC".to_string()),
        columns: vec![
            ColumnMeta {
                key: true,
                ..ColumnMeta::new("id")
            },
            ColumnMeta::new("customer"),
            ColumnMeta {
                source_type: Some("DECIMAL(9,2)".to_string()),
                source_column: Some("ORD_AMT".to_string()),
                ..ColumnMeta::new("amount")
            },
            ColumnMeta::new("placed"),
        ],
    };
    let options = DelimitedOptions {
        delimiter: b'|',
        encoding: UTF_8,
        has_header: false,
        column_names: meta.column_names(),
    };
    let mut source = DelimitedSource::open(&input, &options).expect("open source");
    let mut target = SqliteTarget::open(&db, "orders").expect("open target");

    let (_, findings) = audit(
        &mut source,
        &mut target,
        &["id"],
        AuditSettings::default(),
        Some(&meta),
    );

    let drift = &findings.discrepancies[0];
    assert_eq!(drift.provenance.source_type.as_deref(), Some("DECIMAL(9,2)"));
    assert_eq!(drift.provenance.source_column.as_deref(), Some("ORD_AMT"));
    assert_eq!(drift.provenance.source_table.as_deref(), Some("ORDERS_SRC"));
}

#[test]
fn delimited_target_supports_composite_keys() {
    let workspace = TestWorkspace::new();
    let target_path = workspace.write(
        "balances.txt",
        "region|account|balance\nEU|100|10.00\nEU|200|20.00\nUS|100|30.00\n",
    );
    let input = workspace.write(
        "feed.txt",
        "region|account|balance\nUS|100|30\nEU|200|21.00\nAPAC|1|5\n",
    );
    let mut source = delimited(&input);
    let mut target = DelimitedTarget::open(&target_path, b'|', UTF_8).expect("open target");
    let settings = AuditSettings {
        reverse: true,
        ..AuditSettings::default()
    };

    let (summary, findings) = audit(
        &mut source,
        &mut target,
        &["region", "account"],
        settings,
        None,
    );

    assert_eq!(findings.discrepancies.len(), 1);
    assert_eq!(
        findings.discrepancies[0].key.as_slice(),
        ["EU".to_string(), "200".to_string()]
    );
    assert_eq!(findings.missing.len(), 1);
    assert_eq!(
        findings.orphans,
        vec![KeyValues::new(vec!["EU".to_string(), "100".to_string()])]
    );
    assert_eq!(summary.total_errors, 3);
}

#[test]
fn undecodable_source_row_is_still_compared_and_the_run_continues() {
    let workspace = TestWorkspace::new();
    let target_path = workspace.write("names.txt", "id|name\n1|a\n2|b\n3|c\n");
    let input = workspace.write_bytes("feed.txt", b"id|name\n1|a\n2|b\xff\n3|x\n");
    let mut source = delimited(&input);
    let mut target = DelimitedTarget::open(&target_path, b'|', UTF_8).expect("open target");

    let (summary, findings) = audit(
        &mut source,
        &mut target,
        &["id"],
        AuditSettings::default(),
        None,
    );

    assert_eq!(summary.termination, Termination::EndOfInput);
    assert_eq!(summary.counters.rows_checked, 3);
    let keys = findings
        .discrepancies
        .iter()
        .map(|d| d.key.as_slice()[0].clone())
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["2".to_string(), "3".to_string()]);
    assert_eq!(findings.discrepancies[0].source.as_deref(), Some("b\u{fffd}"));
}

#[test]
fn quoted_values_keep_their_quotes_and_column_alignment() {
    let workspace = TestWorkspace::new();
    let body = "id|name|city\n1|\"Acme\" Ltd|Oslo\n";
    let target_path = workspace.write("customers.txt", body);
    let input = workspace.write("feed.txt", "id|name|city\n1|\"Acme\" Ltd|Bergen\n");
    let mut source = delimited(&input);
    let mut target = DelimitedTarget::open(&target_path, b'|', UTF_8).expect("open target");

    let (_, findings) = audit(
        &mut source,
        &mut target,
        &["id"],
        AuditSettings::default(),
        None,
    );

    assert_eq!(findings.discrepancies.len(), 1);
    assert_eq!(findings.discrepancies[0].column_name, "city");
    assert_eq!(findings.discrepancies[0].column_position, 3);
}

#[test]
fn report_lists_findings_between_heading_and_footer() {
    let workspace = TestWorkspace::new();
    let db = workspace.sqlite("orders.db", ORDERS_DB);
    let input = workspace.write("orders.txt", SOURCE);
    let report_path = workspace.file("orders.audit.tsv");
    let mut source = delimited(&input);
    let mut target = SqliteTarget::open(&db, "orders").expect("open target");

    let names = source.column_names().to_vec();
    let key = KeyTuple::parse(&["id".to_string()], &names).expect("key");
    let columns = describe_columns(&names, &key);
    target.bind(&names, &["id".to_string()]).expect("bind");
    let heading = ReportHeading {
        table: "orders".to_string(),
        input: input.display().to_string(),
        target_label: "orders".to_string(),
        key_names: vec!["id".to_string()],
        numeric_strings: true,
    };
    let mut report = AuditReport::create(Some(report_path.as_path()), &heading).expect("create report");
    let mut context = RunContext::new(AuditSettings::default(), columns, key);
    let summary = run_audit(&mut context, &mut source, &mut target, &mut report).expect("audit");
    report.finish(&summary).expect("finish report");

    let contents = fs::read_to_string(&report_path).expect("read report");
    assert!(contents.starts_with("Audit of table: orders compared to: "));
    assert!(contents.contains("id\tCol Name\torders Value\tSource Value\tIn Line#"));
    assert_eq!(
        finding_lines(&contents),
        vec![
            "2\tamount\t7.25\t7.30\t2\t3\tNull\tNull\tNull".to_string(),
            "4\tMissing\t\t\t3".to_string(),
        ]
    );
    assert!(contents.contains("Total of all errors: 2"));
    assert!(contents.contains("Program ended normally checking table: orders"));
    assert!(contents.contains("amount (numeric), placed (date)."));
}
