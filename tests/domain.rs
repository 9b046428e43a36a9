use market_agent::domain::{
    CellValue, ColumnSelection, Enrichment, ProcessingStats, Row, RowState, RowStatus,
};

fn headers(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn detects_portuguese_headers() {
    let selection = ColumnSelection::detect(&headers(&["Cidade", "Nome da Empresa", "CNPJ"]));
    assert_eq!(selection.name_column.as_deref(), Some("Nome da Empresa"));
    assert_eq!(selection.id_column.as_deref(), Some("CNPJ"));
}

#[test]
fn detection_without_keywords_selects_nothing() {
    let selection = ColumnSelection::detect(&headers(&["Cidade", "UF"]));
    assert_eq!(selection, ColumnSelection::default());
}

#[test]
fn stats_finish_only_when_every_row_is_accounted_for() {
    let mut stats = ProcessingStats::new(3);
    assert!(!stats.is_finished());
    stats.processed = 2;
    assert_eq!(stats.percent(), 66);
    stats.errors = 1;
    assert!(stats.is_finished());
    assert_eq!(stats.percent(), 100);
    assert!(!ProcessingStats::new(0).is_finished());
    assert_eq!(ProcessingStats::new(0).percent(), 0);
}

#[test]
fn row_accessors_follow_state() {
    let mut row = Row::pending(vec![CellValue::from("Acme"), CellValue::Number(190.0)]);
    assert_eq!(row.status(), RowStatus::Pending);
    assert_eq!(row.description(), None);
    assert_eq!(row.text(1), "190");
    assert_eq!(row.text(7), "");

    row.state = RowState::Done(Enrichment {
        text: "Fabricante.".to_string(),
        sources: vec!["https://cnpj.biz/1".to_string()],
    });
    assert_eq!(row.status(), RowStatus::Done);
    assert_eq!(row.description(), Some("Fabricante."));
    assert_eq!(row.sources().map(<[String]>::len), Some(1));

    row.state = RowState::Error("timeout".to_string());
    assert_eq!(row.status(), RowStatus::Error);
    assert_eq!(row.failure(), Some("timeout"));
    assert_eq!(row.sources(), None);
}

#[test]
fn cell_values_serialize_untagged() {
    let cells = vec![
        CellValue::from("Acme"),
        CellValue::Number(1.5),
        CellValue::Empty,
    ];
    assert_eq!(
        serde_json::to_string(&cells).unwrap(),
        r#"["Acme",1.5,null]"#
    );
    assert_eq!(RowStatus::Processing.to_string(), "processing");
}
