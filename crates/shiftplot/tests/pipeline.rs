use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;

use shiftplot::{
    AnalysisConfig, AnalysisError, Analyzer, AxisPair, CacheConfig, CommentKey,
    CsvDirectorySource, DataTypeClass, Direction, PlotSpec, PlotSpecManager, RecordMeta,
    SessionMetadata, SigmaCutoff, WorkspaceConfig,
};

const ENGINE: &str = "E501";
const BUILD: &str = "12";

fn write_class(root: &Path, class: DataTypeClass, rows: &[(i64, Option<f64>, Option<f64>)]) {
    let dir = root.join(ENGINE).join(BUILD);
    fs::create_dir_all(&dir).expect("mkdir");
    let mut csv = String::from("ADR,RUN,TIMESTAMP,X,Y\n");
    for (adr, x, y) in rows {
        let cell = |value: &Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        writeln!(
            csv,
            "{adr},1,2024-07-01 08:{:02}:00,{},{}",
            adr,
            cell(x),
            cell(y)
        )
        .expect("format");
    }
    fs::write(dir.join(format!("{}.csv", class.as_str())), csv).expect("write csv");
}

fn metadata(ids: impl IntoIterator<Item = i64>) -> SessionMetadata {
    let mut metadata = SessionMetadata::new(ENGINE, BUILD).expect("metadata");
    for adr in ids {
        let timestamp = NaiveDate::from_ymd_opt(2024, 7, 1)
            .and_then(|date| date.and_hms_opt(8, adr as u32, 0))
            .expect("timestamp");
        metadata.upsert_record(RecordMeta::new(adr, 1, timestamp));
    }
    metadata
}

fn plots(class: DataTypeClass, y: &str, cutoff: SigmaCutoff) -> PlotSpecManager {
    let mut plots = PlotSpecManager::new();
    plots.add(
        format!("{y} vs X"),
        PlotSpec::new(class, vec![AxisPair::new("X", y)], cutoff).expect("spec"),
    );
    plots
}

fn config(root: &Path, persist_dir: Option<&Path>) -> AnalysisConfig {
    AnalysisConfig {
        workspace: WorkspaceConfig::in_dir(root.join("session")),
        cache: CacheConfig {
            persist: persist_dir.is_some(),
            dir: persist_dir.map(Path::to_path_buf),
        },
        ..AnalysisConfig::default()
    }
}

#[test]
fn derived_difference_carries_missing_values_into_validity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = dir.path().join("data");
    write_class(
        &data,
        DataTypeClass::Raw,
        &[(1, Some(1.0), Some(2.0)), (2, Some(2.0), None), (3, Some(3.0), Some(5.0))],
    );

    let mut analyzer = Analyzer::create(
        CsvDirectorySource::new(&data),
        config(dir.path(), None),
        metadata(1..=3),
        "DELTA = Y - X\n",
        plots(DataTypeClass::Raw, "DELTA", SigmaCutoff::Disabled),
    )
    .expect("analyzer");

    let annotated = analyzer.annotated(DataTypeClass::Raw).expect("annotated");
    assert_eq!(
        annotated
            .table
            .column("DELTA")
            .expect("delta")
            .iter_f64()
            .collect::<Vec<_>>(),
        vec![Some(1.0), None, Some(2.0)]
    );
    let analysis = annotated
        .analysis(&AxisPair::new("X", "DELTA"), SigmaCutoff::Disabled)
        .expect("analysis");
    assert_eq!(analysis.validity.bits(), &[true, false, true]);
    assert!(analysis.shifts.is_empty());
}

#[test]
fn step_in_y_yields_one_shift_at_the_step() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = dir.path().join("data");
    let rows = (1..=10)
        .map(|adr| {
            let y = if adr >= 7 { 10.0 } else { 1.0 };
            (adr, Some(adr as f64), Some(y))
        })
        .collect::<Vec<_>>();
    write_class(&data, DataTypeClass::Processed, &rows);

    let mut analyzer = Analyzer::create(
        CsvDirectorySource::new(&data),
        config(dir.path(), None),
        metadata(1..=10),
        "",
        plots(DataTypeClass::Processed, "Y", SigmaCutoff::default()),
    )
    .expect("analyzer");

    let results = analyzer.refresh();
    assert_eq!(results.len(), 1);
    let annotated = results[&DataTypeClass::Processed].as_ref().expect("annotated");
    let analysis = &annotated.annotations[0];
    assert_eq!(analysis.shift_xs(), vec![7.0]);
    assert_eq!(analysis.shifts[0].direction, Direction::Up);
}

#[test]
fn persisted_results_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = dir.path().join("data");
    let cache_dir = dir.path().join("cache");
    write_class(
        &data,
        DataTypeClass::Raw,
        &[(1, Some(1.0), Some(1.0)), (2, Some(2.0), Some(4.0))],
    );

    let mut first = Analyzer::create(
        CsvDirectorySource::new(&data),
        config(dir.path(), Some(&cache_dir)),
        metadata([1, 2]),
        "RATIO = Y / X\n",
        plots(DataTypeClass::Raw, "RATIO", SigmaCutoff::default()),
    )
    .expect("analyzer");
    let computed = first.annotated(DataTypeClass::Raw).expect("compute");
    assert_eq!(first.cache_stats().recomputes, 1);
    drop(first);

    // The source data is gone; only the persisted artifact can answer.
    fs::remove_dir_all(&data).expect("remove data");
    let mut second = Analyzer::open(
        CsvDirectorySource::new(&data),
        config(dir.path(), Some(&cache_dir)),
    )
    .expect("reopen");
    let restored = second.annotated(DataTypeClass::Raw).expect("restored");
    assert_eq!(restored, computed);
    assert_eq!(second.cache_stats().store_hits, 1);
    assert_eq!(second.cache_stats().recomputes, 0);

    second.invalidate();
    assert!(matches!(
        second.annotated(DataTypeClass::Raw),
        Err(AnalysisError::MissingData(_))
    ));
}

#[test]
fn default_config_persists_results_in_the_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = dir.path().join("data");
    write_class(
        &data,
        DataTypeClass::Raw,
        &[(1, Some(1.0), Some(2.0)), (2, Some(2.0), Some(5.0))],
    );
    let config = AnalysisConfig {
        workspace: WorkspaceConfig::in_dir(dir.path().join("session")),
        ..AnalysisConfig::default()
    };

    let mut first = Analyzer::create(
        CsvDirectorySource::new(&data),
        config.clone(),
        metadata([1, 2]),
        "DELTA = Y - X\n",
        plots(DataTypeClass::Raw, "DELTA", SigmaCutoff::default()),
    )
    .expect("analyzer");
    let computed = first.annotated(DataTypeClass::Raw).expect("compute");
    drop(first);
    assert!(
        dir.path()
            .join("session")
            .join("graph_data_cache_RAW.json")
            .exists()
    );

    let mut second =
        Analyzer::open(CsvDirectorySource::new(&data), config).expect("reopen");
    let restored = second.annotated(DataTypeClass::Raw).expect("restored");
    assert_eq!(restored, computed);
    assert_eq!(second.cache_stats().store_hits, 1);
    assert_eq!(second.cache_stats().recomputes, 0);
}

#[test]
fn archive_round_trip_keeps_local_comments_and_drops_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = dir.path().join("data");
    write_class(
        &data,
        DataTypeClass::Raw,
        &[(1, Some(1.0), Some(1.0)), (2, Some(2.0), Some(3.0))],
    );

    let mut analyzer = Analyzer::create(
        CsvDirectorySource::new(&data),
        config(dir.path(), None),
        metadata([1, 2]),
        "SUM = X + Y\n",
        plots(DataTypeClass::Raw, "SUM", SigmaCutoff::default()),
    )
    .expect("analyzer");
    let bundle = dir.path().join("session.zip");
    analyzer.export_archive(&bundle).expect("export");

    let mut comments = analyzer.workspace().comment_store().expect("comments");
    comments.set(&CommentKey::new(ENGINE, BUILD, 2), "bleed valve open");
    comments.save().expect("save comments");

    analyzer.commit_formulas("SUM = X * Y\n").expect("commit");
    analyzer.annotated(DataTypeClass::Raw).expect("warm");
    assert!(analyzer.is_cached(DataTypeClass::Raw));

    analyzer.import_archive(&bundle).expect("import");
    assert!(!analyzer.is_cached(DataTypeClass::Raw));
    assert_eq!(analyzer.formula_text(), "SUM = X + Y\n");
    let sum = analyzer.annotated(DataTypeClass::Raw).expect("recompute");
    assert_eq!(sum.table.column("SUM").expect("sum").get_f64(1), Some(5.0));

    let comments = analyzer.workspace().comment_store().expect("comments");
    assert_eq!(
        comments.get(&CommentKey::new(ENGINE, BUILD, 2)),
        Some("bleed valve open")
    );
}

#[test]
fn missing_engine_data_and_empty_selection_are_missing_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut analyzer = Analyzer::create(
        CsvDirectorySource::new(dir.path().join("nowhere")),
        config(dir.path(), None),
        metadata([1]),
        "",
        plots(DataTypeClass::Source, "Y", SigmaCutoff::default()),
    )
    .expect("analyzer");
    assert!(matches!(
        analyzer.annotated(DataTypeClass::Source),
        Err(AnalysisError::MissingData(_))
    ));

    analyzer
        .update_metadata(|metadata| metadata.set_graph(1, false))
        .expect("deselect");
    assert!(matches!(
        analyzer.annotated(DataTypeClass::Source),
        Err(AnalysisError::MissingData(_))
    ));
}
