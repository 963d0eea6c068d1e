//! Integration tests for bcpframe commands.
//!
//! The database side is an in-memory `SqlExecutor`; `bcp` is replaced by
//! small shell scripts that record what they were given.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]
#![cfg(unix)]

use bcpframe::cli::{cmd_check, cmd_export, cmd_format_file, cmd_load, read_frame, InputFormat};
use bcpframe::export::{ExportSettings, ExportSource};
use bcpframe::loader::{load_frame, LoadMethod, LoadSettings};
use bcpframe::sqlcmd::{Rows, SqlCmd, SqlExecutor};
use bcpframe::{AppError, Result};
use bcpframe_core::{
    BcpError, CatalogState, Cell, Frame, FormatFile, IfExists, LoadOptions, SqlCreds, SqlItemKind,
    TableRef,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Serializes tests that write and then execute stub scripts.
static SPAWN_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

// =============================================================================
// FAKE DATABASE
// =============================================================================

/// Answers catalog queries for one table and records every statement.
#[derive(Default)]
struct FakeDb {
    exists: bool,
    columns: Vec<(String, usize)>,
    queries: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
}

impl FakeDb {
    fn absent() -> Self {
        Self::default()
    }

    fn with_columns(columns: &[(&str, usize)]) -> Self {
        Self {
            exists: true,
            columns: columns
                .iter()
                .map(|(name, ordinal)| ((*name).to_string(), *ordinal))
                .collect(),
            ..Self::default()
        }
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

impl SqlExecutor for FakeDb {
    async fn query(&self, sql: &str) -> Result<Rows> {
        self.queries.lock().unwrap().push(sql.to_string());
        if sql.contains("INFORMATION_SCHEMA.COLUMNS") {
            return Ok(self
                .columns
                .iter()
                .map(|(name, ordinal)| vec![name.clone(), ordinal.to_string()])
                .collect());
        }
        if self.exists {
            Ok(vec![vec!["scores".to_string()]])
        } else {
            Ok(Vec::new())
        }
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(())
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir(dir.path().join("work")).unwrap();
        std::fs::create_dir(dir.path().join("capture")).unwrap();
        Self { dir }
    }

    fn work(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn capture(&self, name: &str) -> PathBuf {
        self.dir.path().join("capture").join(name)
    }

    /// Write an executable stub and return its path.
    fn stub(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A bcp that keeps copies of its arguments, flat file and format file.
    fn recording_bcp(&self) -> PathBuf {
        let capture = self.dir.path().join("capture");
        self.stub(
            "bcp",
            &format!(
                r#"echo "$@" > "{c}/args.txt"
cp "$3" "{c}/flat.txt"
prev=""
for arg in "$@"; do
  if [ "$prev" = "-f" ]; then cp "$arg" "{c}/format.fmt"; fi
  prev="$arg"
done
echo "Starting copy..."
echo "3 rows copied.""#,
                c = capture.display()
            ),
        )
    }

    fn failing_bcp(&self) -> PathBuf {
        self.stub(
            "bcp-fail",
            "echo \"SQLState = 08001, NativeError = 2\" >&2\nexit 1",
        )
    }

    /// A sqlcmd that appends every script it runs to `capture/sql.txt` and
    /// its arguments to `capture/sqlcmd_args.txt`, printing no rows.
    fn recording_sqlcmd(&self) -> PathBuf {
        let capture = self.dir.path().join("capture");
        self.stub(
            "sqlcmd",
            &format!(
                r#"echo "$@" >> "{c}/sqlcmd_args.txt"
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then cat "$arg" >> "{c}/sql.txt"; fi
  prev="$arg"
done"#,
                c = capture.display()
            ),
        )
    }

    fn work_entries(&self) -> usize {
        std::fs::read_dir(self.work()).unwrap().count()
    }
}

fn creds() -> SqlCreds {
    SqlCreds::new("localhost", "test").with_login("sa", "Passw0rd")
}

/// Three rows; the comma in the first name rules out `,` as delimiter.
fn scores() -> Frame {
    Frame::new(
        vec!["name".into(), "score".into()],
        vec![
            vec![Cell::Text("a,b".into()), Cell::Int(1)],
            vec![Cell::Text("c".into()), Cell::Int(2)],
            vec![Cell::Text("d".into()), Cell::Null],
        ],
    )
    .unwrap()
}

fn settings(ws: &Workspace, bcp: PathBuf, if_exists: IfExists) -> LoadSettings {
    LoadSettings {
        bcp_path: Some(bcp),
        temp_dir: Some(ws.work()),
        ..LoadSettings::new(LoadOptions {
            if_exists,
            ..LoadOptions::new(TableRef::new("dbo", "scores"))
        })
    }
}

/// `rows` rows whose text column makes each INSERT batch far larger than a
/// single command-line argument may be.
fn wide_notes(rows: i64) -> Frame {
    let note = "x".repeat(200);
    Frame::new(
        vec!["id".into(), "note".into()],
        (0..rows)
            .map(|i| vec![Cell::Int(i), Cell::Text(format!("{note}{i}"))])
            .collect(),
    )
    .unwrap()
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

// =============================================================================
// LOAD TESTS
// =============================================================================

#[tokio::test]
async fn test_load_creates_table_and_runs_bcp() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let db = FakeDb::absent();
    let settings = settings(&ws, ws.recording_bcp(), IfExists::Fail);

    let report = load_frame(&scores(), &creds(), &db, &settings).await.unwrap();

    assert_eq!(report.method, LoadMethod::Bcp);
    assert_eq!(report.rows, 3);
    assert_eq!(report.columns, 3);
    assert!(report.kept_files.is_empty());

    let executed = db.executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].starts_with("CREATE TABLE [dbo].[scores]"));

    assert_eq!(read(&ws.capture("flat.txt")), "0|a,b|1\n1|c|2\n2|d|\n");
    let format = FormatFile::parse(&read(&ws.capture("format.fmt"))).unwrap();
    assert_eq!(format.fields.len(), 3);
    assert_eq!(format.fields[2].terminator, "\n");

    let args = read(&ws.capture("args.txt"));
    assert!(args.starts_with("dbo.scores in "));
    assert!(args.contains("-U sa -P Passw0rd"));

    // temporary files are gone once the load returns
    assert_eq!(ws.work_entries(), 0);
}

#[tokio::test]
async fn test_load_debug_keeps_files() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let db = FakeDb::absent();
    let mut settings = settings(&ws, ws.recording_bcp(), IfExists::Fail);
    settings.debug = true;

    let report = load_frame(&scores(), &creds(), &db, &settings).await.unwrap();

    assert_eq!(report.kept_files.len(), 2);
    for path in &report.kept_files {
        assert!(path.exists());
    }
    assert_eq!(ws.work_entries(), 2);
}

#[tokio::test]
async fn test_load_passes_error_file_and_batch_size() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let db = FakeDb::absent();
    let mut settings = settings(&ws, ws.recording_bcp(), IfExists::Fail);
    settings.error_dir = Some(ws.dir.path().to_path_buf());
    settings.options.batch_size = Some(2);

    load_frame(&scores(), &creds(), &db, &settings).await.unwrap();

    let args = read(&ws.capture("args.txt"));
    assert!(args.contains("scores_bcp_error.txt"));
    assert!(args.contains("-b 2"));
}

#[tokio::test]
async fn test_load_replace_drops_first() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let db = FakeDb::with_columns(&[("old", 1)]);
    let settings = settings(&ws, ws.recording_bcp(), IfExists::Replace);

    load_frame(&scores(), &creds(), &db, &settings).await.unwrap();

    let executed = db.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].starts_with("DROP TABLE IF EXISTS [dbo].[scores]"));
    assert!(executed[1].starts_with("CREATE TABLE"));
}

#[tokio::test]
async fn test_load_append_maps_out_of_order_columns() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let db = FakeDb::with_columns(&[("id", 1), ("score", 2), ("name", 3), ("index", 4)]);
    let settings = settings(&ws, ws.recording_bcp(), IfExists::Append);

    let report = load_frame(&scores(), &creds(), &db, &settings).await.unwrap();

    assert_eq!(report.method, LoadMethod::Bcp);
    assert!(db.executed().is_empty());
    let format = FormatFile::parse(&read(&ws.capture("format.fmt"))).unwrap();
    let ordinals: Vec<(String, usize)> = format
        .fields
        .iter()
        .map(|f| (f.name.clone(), f.server_order))
        .collect();
    assert_eq!(
        ordinals,
        vec![
            ("index".to_string(), 4),
            ("name".to_string(), 3),
            ("score".to_string(), 2)
        ]
    );
}

#[tokio::test]
async fn test_load_append_rejects_extra_columns() {
    let ws = Workspace::new();
    let db = FakeDb::with_columns(&[("index", 1), ("name", 2)]);
    let settings = settings(&ws, PathBuf::from("/nonexistent/bcp"), IfExists::Append);

    let result = load_frame(&scores(), &creds(), &db, &settings).await;

    assert!(matches!(
        result,
        Err(AppError::Plan(BcpError::ExtraColumns(extra))) if extra == vec!["score"]
    ));
    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn test_load_fail_policy_refuses_existing_table() {
    let ws = Workspace::new();
    let db = FakeDb::with_columns(&[]);
    let settings = settings(&ws, PathBuf::from("/nonexistent/bcp"), IfExists::Fail);

    let result = load_frame(&scores(), &creds(), &db, &settings).await;
    assert!(matches!(
        result,
        Err(AppError::Plan(BcpError::AlreadyExists { .. }))
    ));
}

#[tokio::test]
async fn test_load_empty_frame_is_skipped() {
    let ws = Workspace::new();
    let db = FakeDb::absent();
    let settings = settings(&ws, PathBuf::from("/nonexistent/bcp"), IfExists::Fail);
    let empty = Frame::new(vec!["a".into()], vec![]).unwrap();

    let report = load_frame(&empty, &creds(), &db, &settings).await.unwrap();

    assert_eq!(report.method, LoadMethod::Skipped);
    assert_eq!(db.query_count(), 0);
    assert!(db.executed().is_empty());
}

// =============================================================================
// FALLBACK TESTS
// =============================================================================

#[tokio::test]
async fn test_bcp_failure_reports_tail() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let db = FakeDb::absent();
    let settings = settings(&ws, ws.failing_bcp(), IfExists::Fail);

    let result = load_frame(&scores(), &creds(), &db, &settings).await;

    match result {
        Err(AppError::BcpFailed { code, tail }) => {
            assert_eq!(code, Some(1));
            assert_eq!(tail, vec!["SQLState = 08001, NativeError = 2"]);
        }
        other => panic!("expected BcpFailed, got {other:?}"),
    }
    assert_eq!(ws.work_entries(), 0);
}

#[tokio::test]
async fn test_bcp_failure_falls_back_to_inserts() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let db = FakeDb::absent();
    let mut settings = settings(&ws, ws.failing_bcp(), IfExists::Fail);
    settings.fallback_native = true;

    let report = load_frame(&scores(), &creds(), &db, &settings).await.unwrap();

    assert_eq!(report.method, LoadMethod::Native);
    let executed = db.executed();
    assert_eq!(executed.len(), 3);
    assert!(executed[0].starts_with("CREATE TABLE"));
    assert_eq!(executed[1], "TRUNCATE TABLE [dbo].[scores];");
    assert!(executed[2].starts_with("INSERT INTO [dbo].[scores] ([index], [name], [score]) VALUES"));
    assert!(executed[2].contains("(0, N'a,b', 1)"));
    assert!(executed[2].contains("(2, N'd', NULL)"));
}

#[tokio::test]
async fn test_replace_falls_back_to_inserts_after_drop() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let db = FakeDb::with_columns(&[("old", 1)]);
    let mut settings = settings(&ws, ws.failing_bcp(), IfExists::Replace);
    settings.fallback_native = true;

    let report = load_frame(&scores(), &creds(), &db, &settings).await.unwrap();

    assert_eq!(report.method, LoadMethod::Native);
    let executed = db.executed();
    assert_eq!(executed.len(), 4);
    assert_eq!(executed[0], "DROP TABLE IF EXISTS [dbo].[scores];");
    assert!(executed[1].starts_with("CREATE TABLE [dbo].[scores]"));
    assert_eq!(executed[2], "TRUNCATE TABLE [dbo].[scores];");
    assert!(executed[3].starts_with("INSERT INTO [dbo].[scores]"));
}

#[tokio::test]
async fn test_native_fallback_through_sqlcmd_sends_large_batches() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let sqlcmd = SqlCmd::new(creds(), Some(ws.recording_sqlcmd()));
    let mut settings = settings(&ws, ws.failing_bcp(), IfExists::Fail);
    settings.options.table = TableRef::new("dbo", "notes");
    settings.fallback_native = true;

    let report = load_frame(&wide_notes(1500), &creds(), &sqlcmd, &settings)
        .await
        .unwrap();

    assert_eq!(report.method, LoadMethod::Native);
    assert_eq!(report.rows, 1500);

    let sql = read(&ws.capture("sql.txt"));
    // catalog query, CREATE, TRUNCATE and two INSERT batches
    assert_eq!(sql.matches("SET NOCOUNT ON;").count(), 5);
    assert!(sql.contains("CREATE TABLE [dbo].[notes]"));
    assert!(sql.contains("TRUNCATE TABLE [dbo].[notes];"));
    let inserts: Vec<&str> = sql
        .split("SET NOCOUNT ON;")
        .filter(|script| script.contains("INSERT INTO [dbo].[notes]"))
        .collect();
    assert_eq!(inserts.len(), 2);
    assert!(inserts[0].len() > 128 * 1024);
    assert!(inserts[1].contains(&format!("(1499, 1499, N'{}1499')", "x".repeat(200))));

    let args = read(&ws.capture("sqlcmd_args.txt"));
    assert_eq!(args.lines().count(), 5);
    for line in args.lines() {
        assert!(line.contains("-d test"));
        assert!(line.contains("-f 65001"));
        assert!(line.contains(" -i "));
        assert!(!line.contains("-Q"));
    }
}

#[tokio::test]
async fn test_sqlcmd_execute_runs_statement_from_script() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let sqlcmd = SqlCmd::new(creds(), Some(ws.recording_sqlcmd()));
    let statement = format!("SELECT N'{}';", "é".repeat(150_000));

    sqlcmd.execute(&statement).await.unwrap();

    assert_eq!(
        read(&ws.capture("sql.txt")),
        format!("SET NOCOUNT ON;\n{statement}\n")
    );
}

#[tokio::test]
async fn test_fallback_refused_when_appending() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let db = FakeDb::with_columns(&[("index", 1), ("name", 2), ("score", 3)]);
    let mut settings = settings(&ws, ws.failing_bcp(), IfExists::Append);
    settings.fallback_native = true;

    let result = load_frame(&scores(), &creds(), &db, &settings).await;

    assert!(matches!(result, Err(AppError::FallbackFailed { .. })));
    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn test_cmd_load_json_report() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let db = FakeDb::absent();
    let settings = settings(&ws, ws.recording_bcp(), IfExists::Fail);

    let out = cmd_load(&scores(), &creds(), &db, &settings, true).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();

    assert_eq!(value["method"], "bcp");
    assert_eq!(value["rows"], 3);
    assert_eq!(value["table"]["name"], "scores");
}

// =============================================================================
// EXPORT TESTS
// =============================================================================

#[tokio::test]
async fn test_export_table_prepends_catalog_header() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let bcp = ws.stub("bcp-out", r#"echo "$@" > "$(dirname "$3")/../capture/args.txt"
printf '1|a\n2|b\n' > "$3""#);
    let db = FakeDb::with_columns(&[("name", 2), ("id", 1)]);
    let output = ws.work().join("scores.psv");
    let settings = ExportSettings {
        path: output.clone(),
        delimiter: '|',
        bcp_path: Some(bcp),
    };
    let source = ExportSource::Object {
        kind: SqlItemKind::Table,
        table: TableRef::new("dbo", "scores"),
    };

    let out = cmd_export(&creds(), &db, &source, &settings, false).await.unwrap();

    assert_eq!(out, format!("Exported 2 rows to {}", output.display()));
    assert_eq!(read(&output), "id|name\n1|a\n2|b\n");
    let args = read(&ws.capture("args.txt"));
    assert!(args.starts_with("dbo.scores out "));
    assert!(args.contains("-c -t|"));
    // only the output file is left behind
    assert_eq!(ws.work_entries(), 1);
}

#[tokio::test]
async fn test_export_query_uses_given_columns() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let bcp = ws.stub("bcp-out", r#"printf '7,x\n' > "$3""#);
    let db = FakeDb::absent();
    let output = ws.work().join("query.csv");
    let settings = ExportSettings {
        path: output.clone(),
        delimiter: ',',
        bcp_path: Some(bcp),
    };
    let source = ExportSource::Query {
        sql: "SELECT id, tag\nFROM dbo.tags".into(),
        columns: vec!["id".into(), "tag".into()],
    };

    let out = cmd_export(&creds(), &db, &source, &settings, true).await.unwrap();

    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["rows"], 1);
    assert_eq!(read(&output), "id,tag\n7,x\n");
    assert_eq!(db.query_count(), 0);
}

#[tokio::test]
async fn test_export_missing_table_fails_before_bcp() {
    let ws = Workspace::new();
    let db = FakeDb::absent();
    let settings = ExportSettings {
        path: ws.work().join("out.csv"),
        delimiter: ',',
        bcp_path: Some(PathBuf::from("/nonexistent/bcp")),
    };
    let source = ExportSource::Object {
        kind: SqlItemKind::View,
        table: TableRef::new("dbo", "missing"),
    };

    let result = cmd_export(&creds(), &db, &source, &settings, false).await;
    assert!(matches!(result, Err(AppError::Catalog(_))));
}

// =============================================================================
// OFFLINE COMMAND TESTS
// =============================================================================

#[test]
fn test_read_frame_csv_and_format_file() {
    let ws = Workspace::new();
    let input = ws.work().join("people.csv");
    std::fs::write(&input, "id,name,active\n1,Ann,true\n2,\"Bo, Jr\",false\n").unwrap();

    let frame = read_frame(&input, InputFormat::Auto, b',', Some("id")).unwrap();
    assert_eq!(frame.columns(), ["name", "active"]);
    assert_eq!(frame.index_name(), Some("id"));

    let options = LoadOptions::new(TableRef::new("dbo", "people"));
    let text = cmd_format_file(&frame, &options).unwrap().unwrap();
    assert_eq!(
        text,
        "9.0\n3\n\
         1    SQLCHAR    0    0    \"|\"    1    id    SQL_Latin1_General_CP1_CI_AS\n\
         2    SQLCHAR    0    0    \"|\"    2    name    SQL_Latin1_General_CP1_CI_AS\n\
         3    SQLCHAR    0    0    \"\\n\"    3    active    SQL_Latin1_General_CP1_CI_AS\n"
    );
}

#[tokio::test]
async fn test_mixed_csv_column_reaches_bcp_verbatim() {
    let _guard = SPAWN_LOCK.lock().await;
    let ws = Workspace::new();
    let input = ws.work().join("codes.csv");
    std::fs::write(&input, "code,qty\n02134,1\nA1B 2C3,2\n").unwrap();
    let frame = read_frame(&input, InputFormat::Csv, b',', None).unwrap();
    std::fs::remove_file(&input).unwrap();

    let db = FakeDb::absent();
    let mut settings = settings(&ws, ws.recording_bcp(), IfExists::Fail);
    settings.options.table = TableRef::new("dbo", "codes");

    load_frame(&frame, &creds(), &db, &settings).await.unwrap();

    assert_eq!(read(&ws.capture("flat.txt")), "0,02134,1\n1,A1B 2C3,2\n");
    assert!(db.executed()[0].contains("[code] NVARCHAR(max)"));
}

#[test]
fn test_read_frame_json() {
    let ws = Workspace::new();
    let input = ws.work().join("rows.json");
    std::fs::write(&input, r#"[{"a": 1, "b": "x"}, {"a": 2, "b": null}]"#).unwrap();

    let frame = read_frame(&input, InputFormat::Auto, b',', None).unwrap();
    assert_eq!(frame.columns(), ["a", "b"]);
    assert_eq!(frame.rows()[1][1], Cell::Null);
}

#[test]
fn test_read_frame_missing_file() {
    let result = read_frame(Path::new("/no/such/input.csv"), InputFormat::Csv, b',', None);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn test_format_file_of_empty_input_is_none() {
    let empty = Frame::new(vec!["a".into()], vec![]).unwrap();
    let options = LoadOptions::new(TableRef::new("dbo", "t"));
    assert!(cmd_format_file(&empty, &options).unwrap().is_none());
}

#[test]
fn test_check_text_and_json() {
    let options = LoadOptions {
        keys: vec!["name".into()],
        ..LoadOptions::new(TableRef::new("dbo", "scores"))
    };

    let text = cmd_check(&scores(), &options, &CatalogState::absent(), false).unwrap();
    assert!(text.contains("Action:    create table"));
    assert!(text.contains("[name] NVARCHAR(450) NOT NULL"));
    assert!(text.contains("Delimiter: |"));

    let json = cmd_check(&scores(), &options, &CatalogState::absent(), true).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["plan"], "load");
    assert_eq!(value["action"]["action"], "create");
    assert_eq!(value["rows"], 3);
}
