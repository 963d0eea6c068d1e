//! # bcpframe-core
//!
//! Pure planning logic for loading an in-memory table into SQL Server
//! through the `bcp` bulk-copy utility.
//!
//! This crate never spawns processes or opens connections. It decides:
//! - how the table is rendered to a delimited flat file ([`frame`], [`delimiter`])
//! - how host-file fields map to server columns ([`format_file`], [`schema`])
//! - which DDL runs before the copy ([`ddl`])
//! - which arguments `bcp` receives ([`bcp`], [`creds`])
//! - what a load will do, given the state of the destination ([`plan`])
//!
//! Side effects (temporary files, `bcp`, `sqlcmd`) live in the `bcpframe` app.

pub mod bcp;
pub mod creds;
pub mod ddl;
pub mod delimiter;
pub mod error;
pub mod format_file;
pub mod frame;
pub mod plan;
pub mod schema;

pub use bcp::{BcpCommand, BcpCommandBuilder, Direction, SqlItem, SqlItemKind};
pub use creds::SqlCreds;
pub use ddl::{IfExists, TableRef};
pub use delimiter::{choose_delimiter, DELIMITER_OPTIONS, ROW_TERMINATOR};
pub use error::{BcpError, Result};
pub use format_file::{build_format_file, FormatField, FormatFile};
pub use frame::{Cell, ColumnType, Frame};
pub use plan::{plan_load, CatalogState, LoadOptions, LoadPlan, PlannedLoad, TableAction};
pub use schema::{reconcile, ColumnMapping, DbColumns};
