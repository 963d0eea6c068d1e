use bcpframe::cli::{cmd_check, cmd_export, cmd_format_file, cmd_load, read_frame, InputFormat};
use bcpframe::config::{resolve, ConfigFile, ConnectionOverrides, ResolvedConnection};
use bcpframe::export::{ExportSettings, ExportSource};
use bcpframe::loader::LoadSettings;
use bcpframe::sqlcmd::{catalog_state, SqlCmd};
use bcpframe::{AppError, Result};
use bcpframe_core::ddl::DEFAULT_SCHEMA;
use bcpframe_core::{CatalogState, Frame, IfExists, LoadOptions, SqlItemKind, TableRef};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "bcpframe", version)]
#[command(about = "Bulk-load tables into SQL Server through the bcp utility")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Config file (default: <config dir>/bcpframe/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Connection profile from the config file
    #[arg(long, global = true, env = "BCPFRAME_PROFILE")]
    profile: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct ConnectionArgs {
    #[arg(short = 'S', long, global = true, env = "BCPFRAME_SERVER")]
    server: Option<String>,

    #[arg(short, long, global = true, env = "BCPFRAME_DATABASE")]
    database: Option<String>,

    /// 0 omits the port
    #[arg(long, global = true, env = "BCPFRAME_PORT")]
    port: Option<u16>,

    /// SQL login; trusted authentication when absent
    #[arg(short = 'U', long, global = true, env = "BCPFRAME_USERNAME")]
    username: Option<String>,

    #[arg(
        short = 'P',
        long,
        global = true,
        env = "BCPFRAME_PASSWORD",
        hide_env_values = true
    )]
    password: Option<String>,

    /// Path to bcp when it is not on PATH
    #[arg(long, global = true, env = "BCPFRAME_BCP_PATH")]
    bcp_path: Option<PathBuf>,

    /// Path to sqlcmd when it is not on PATH
    #[arg(long, global = true, env = "BCPFRAME_SQLCMD_PATH")]
    sqlcmd_path: Option<PathBuf>,
}

#[derive(Args)]
struct InputArgs {
    /// Input file (.csv, .tsv, .json, ...)
    input: PathBuf,

    #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
    format: InputFormat,

    /// Field delimiter of a delimited input
    #[arg(long, default_value_t = ',')]
    input_delimiter: char,

    /// Use this input column as the row index
    #[arg(long)]
    index_column: Option<String>,
}

#[derive(Args)]
struct TargetArgs {
    /// Destination table
    #[arg(short, long)]
    table: String,

    #[arg(long, default_value = DEFAULT_SCHEMA)]
    schema: String,

    /// fail, replace or append
    #[arg(long, default_value_t = IfExists::Fail)]
    if_exists: IfExists,

    /// Do not write the row index as the first column
    #[arg(long)]
    no_index: bool,

    /// Rows per bcp batch
    #[arg(short, long)]
    batch_size: Option<u32>,

    /// SQL type override for a created column, as COLUMN=TYPE
    #[arg(long = "dtype", value_parser = parse_key_value)]
    dtypes: Vec<(String, String)>,

    /// Primary key column of a created table (repeatable)
    #[arg(long = "key")]
    keys: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a file into a table
    Load {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        target: TargetArgs,

        /// Keep the flat file and format file
        #[arg(long)]
        debug: bool,

        /// Directory for bcp error files
        #[arg(long)]
        error_dir: Option<PathBuf>,

        /// Retry with INSERT statements if bcp fails
        #[arg(long)]
        native_fallback: bool,

        /// Directory for temporary files
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },
    /// Show what a load would do
    Check {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        target: TargetArgs,

        /// Assume the table does not exist instead of asking the server
        #[arg(long)]
        offline: bool,

        #[arg(long)]
        json: bool,
    },
    /// Print the bcp format file a fresh load would use
    FormatFile {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        target: TargetArgs,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Export a table, view or query to a delimited file
    Export {
        /// Table or view to export
        #[arg(short, long, conflicts_with = "query", required_unless_present = "query")]
        table: Option<String>,

        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,

        /// The object named by --table is a view
        #[arg(long)]
        view: bool,

        /// Query to export with queryout
        #[arg(short, long)]
        query: Option<String>,

        /// Header columns for a query export (comma separated)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value_t = ',')]
        delimiter: char,

        #[arg(long)]
        json: bool,
    },
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected COLUMN=TYPE, got {raw:?}")),
    }
}

impl InputArgs {
    fn read(&self) -> Result<Frame> {
        let delimiter = u8::try_from(self.input_delimiter).map_err(|_| {
            AppError::Config("--input-delimiter must be an ASCII character".into())
        })?;
        read_frame(
            &self.input,
            self.format,
            delimiter,
            self.index_column.as_deref(),
        )
    }
}

impl TargetArgs {
    fn options(&self) -> LoadOptions {
        LoadOptions {
            index: !self.no_index,
            if_exists: self.if_exists,
            batch_size: self.batch_size,
            dtypes: self.dtypes.iter().cloned().collect::<BTreeMap<_, _>>(),
            keys: self.keys.clone(),
            ..LoadOptions::new(TableRef::new(&self.schema, &self.table))
        }
    }
}

/// Initialize tracing on stderr so stdout carries only command output.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "bcpframe=debug"
    } else {
        "bcpframe=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn connect(cli: &Cli) -> Result<ResolvedConnection> {
    let file = ConfigFile::load(cli.config.as_deref())?;
    let args = &cli.connection;
    let overrides = ConnectionOverrides {
        server: args.server.clone(),
        database: args.database.clone(),
        port: args.port,
        username: args.username.clone(),
        password: args.password.clone(),
        bcp_path: args.bcp_path.clone(),
        sqlcmd_path: args.sqlcmd_path.clone(),
    };
    let resolved = resolve(&file, cli.profile.as_deref(), &overrides)?;
    tracing::debug!(creds = %resolved.creds, "Resolved connection");
    Ok(resolved)
}

async fn run(cli: Cli) -> Result<Option<String>> {
    match &cli.command {
        Commands::Load {
            input,
            target,
            debug,
            error_dir,
            native_fallback,
            temp_dir,
            json,
        } => {
            let frame = input.read()?;
            let conn = connect(&cli)?;
            let executor = SqlCmd::new(conn.creds.clone(), conn.sqlcmd_path.clone());
            let settings = LoadSettings {
                debug: *debug,
                bcp_path: conn.bcp_path.clone(),
                error_dir: error_dir.clone(),
                fallback_native: *native_fallback,
                temp_dir: temp_dir.clone(),
                ..LoadSettings::new(target.options())
            };
            cmd_load(&frame, &conn.creds, &executor, &settings, *json)
                .await
                .map(Some)
        }
        Commands::Check {
            input,
            target,
            offline,
            json,
        } => {
            let frame = input.read()?;
            let options = target.options();
            let catalog = if *offline {
                CatalogState::absent()
            } else {
                let conn = connect(&cli)?;
                let executor = SqlCmd::new(conn.creds, conn.sqlcmd_path);
                catalog_state(
                    &executor,
                    &options.table,
                    options.kind,
                    options.if_exists == IfExists::Append,
                )
                .await?
            };
            cmd_check(&frame, &options, &catalog, *json).map(Some)
        }
        Commands::FormatFile {
            input,
            target,
            output,
        } => {
            let frame = input.read()?;
            let Some(text) = cmd_format_file(&frame, &target.options())? else {
                tracing::warn!("Input is empty, no format file produced");
                return Ok(None);
            };
            match output {
                Some(path) => {
                    std::fs::write(path, text)?;
                    Ok(Some(format!("Wrote {}", path.display())))
                }
                None => Ok(Some(text.trim_end().to_string())),
            }
        }
        Commands::Export {
            table,
            schema,
            view,
            query,
            columns,
            output,
            delimiter,
            json,
        } => {
            let source = match (table, query) {
                (_, Some(sql)) => ExportSource::Query {
                    sql: sql.clone(),
                    columns: columns.clone(),
                },
                (Some(table), None) => ExportSource::Object {
                    kind: if *view {
                        SqlItemKind::View
                    } else {
                        SqlItemKind::Table
                    },
                    table: TableRef::new(schema, table),
                },
                (None, None) => {
                    return Err(AppError::Config("pass --table or --query".into()));
                }
            };
            let conn = connect(&cli)?;
            let executor = SqlCmd::new(conn.creds.clone(), conn.sqlcmd_path.clone());
            let settings = ExportSettings {
                path: output.clone(),
                delimiter: *delimiter,
                bcp_path: conn.bcp_path.clone(),
            };
            cmd_export(&conn.creds, &executor, &source, &settings, *json)
                .await
                .map(Some)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(output) => {
            if let Some(output) = output {
                println!("{output}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            if let AppError::BcpFailed { tail, .. } = &e {
                for line in tail {
                    eprintln!("  {line}");
                }
            }
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
