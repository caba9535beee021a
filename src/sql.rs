use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::media::MediaKind;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertMarket {
        id: Ulid,
        name: String,
        location: Option<String>,
        stipend_cents: i64,
        contact_email: Option<String>,
    },
    UpdateMarket {
        id: Ulid,
        patch: MarketPatch,
    },
    InsertPerformanceDate {
        id: Ulid,
        market_id: Ulid,
        date: Ms,
        notes: Option<String>,
    },
    DeactivatePerformanceDate {
        id: Ulid,
    },
    InsertTimeSlot {
        id: Ulid,
        performance_date_id: Ulid,
        start: Ms,
        end: Ms,
        slot_order: u32,
    },
    DeleteTimeSlot {
        id: Ulid,
    },
    InsertMusician(NewMusician),
    InsertMedia {
        id: Ulid,
        musician_id: Ulid,
        kind: MediaKind,
        original_filename: String,
        size_bytes: u64,
        mime_type: String,
    },
    DeleteMedia {
        id: Ulid,
    },
    /// One row per requested slot; every row names the same musician.
    InsertBookings {
        musician_id: Ulid,
        time_slot_ids: Vec<Ulid>,
        join_waitlist: bool,
    },
    CancelBooking {
        id: Ulid,
        reason: Option<String>,
    },
    PayStipend {
        booking_id: Ulid,
    },
    SelectMarkets {
        id: Option<Ulid>,
    },
    SelectMusicians {
        id: Option<Ulid>,
    },
    SelectPerformanceDates {
        market_id: Ulid,
    },
    SelectTimeSlots {
        performance_date_id: Ulid,
    },
    SelectMedia {
        musician_id: Ulid,
    },
    SelectBookings(BookingFilter),
    SelectWaitlist {
        time_slot_id: Ulid,
    },
    SelectSchedule {
        market_id: Ulid,
    },
    SelectStats {
        market_id: Option<Ulid>,
    },
}

/// Shape of the rows a statement returns, known before parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Markets,
    Musicians,
    PerformanceDates,
    TimeSlots,
    Media,
    Bookings,
    Waitlist,
    Schedule,
    Stats,
    SlotOutcomes,
    Cancellation,
}

const MARKET_COLUMNS: &[&str] = &["id", "name", "location", "stipend_cents", "contact_email"];
const MARKET_SETTINGS_COLUMNS: &[&str] = &["market_id", "name", "location", "stipend_cents", "contact_email"];
const PERFORMANCE_DATE_COLUMNS: &[&str] = &["id", "market_id", "date", "notes"];
const TIME_SLOT_COLUMNS: &[&str] = &["id", "performance_date_id", "start", "end", "slot_order"];
const MUSICIAN_COLUMNS: &[&str] = &["id", "name", "email", "phone", "music_genre", "description", "website"];
const MEDIA_COLUMNS: &[&str] = &["id", "musician_id", "kind", "original_filename", "size_bytes", "mime_type"];
const BOOKING_COLUMNS: &[&str] = &["musician_id", "time_slot_id", "join_waitlist"];
const STIPEND_COLUMNS: &[&str] = &["booking_id"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match &parse_one(sql)? {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result shape of a statement that may still contain `$n` placeholders.
pub fn describe(sql: &str) -> Option<ResultKind> {
    let stmt = parse_one(sql).ok()?;
    match &stmt {
        Statement::Insert(insert) => match insert_table_name(insert).ok()?.as_str() {
            "bookings" => Some(ResultKind::SlotOutcomes),
            _ => None,
        },
        Statement::Delete(delete) => match delete_table_name(delete).ok()?.as_str() {
            "bookings" => Some(ResultKind::Cancellation),
            _ => None,
        },
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else { return None };
            let table = table_factor_name(&select.from.first()?.relation).ok()?;
            select_kind(&table)
        }
        _ => None,
    }
}

fn parse_one(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    Ok(stmts.remove(0))
}

fn select_kind(table: &str) -> Option<ResultKind> {
    Some(match table {
        "markets" => ResultKind::Markets,
        "musicians" => ResultKind::Musicians,
        "performance_dates" => ResultKind::PerformanceDates,
        "time_slots" => ResultKind::TimeSlots,
        "media" => ResultKind::Media,
        "bookings" => ResultKind::Bookings,
        "waitlist" => ResultKind::Waitlist,
        "schedule" => ResultKind::Schedule,
        "stats" => ResultKind::Stats,
        _ => return None,
    })
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "markets" => {
            let row = single_row(insert, "markets", MARKET_COLUMNS)?;
            Ok(Command::InsertMarket {
                id: row.ulid("id")?,
                name: row.text("name")?,
                location: row.opt_text("location")?,
                stipend_cents: row.opt_i64("stipend_cents")?.unwrap_or(0),
                contact_email: row.opt_text("contact_email")?,
            })
        }
        "market_settings" => {
            let row = single_row(insert, "market_settings", MARKET_SETTINGS_COLUMNS)?;
            Ok(Command::UpdateMarket {
                id: row.ulid("market_id")?,
                patch: MarketPatch {
                    name: row.opt_text("name")?,
                    location: row.opt_text("location")?,
                    stipend_cents: row.opt_i64("stipend_cents")?,
                    contact_email: row.opt_text("contact_email")?,
                },
            })
        }
        "performance_dates" => {
            let row = single_row(insert, "performance_dates", PERFORMANCE_DATE_COLUMNS)?;
            Ok(Command::InsertPerformanceDate {
                id: row.ulid("id")?,
                market_id: row.ulid("market_id")?,
                date: row.timestamp("date")?,
                notes: row.opt_text("notes")?,
            })
        }
        "time_slots" => {
            let row = single_row(insert, "time_slots", TIME_SLOT_COLUMNS)?;
            let slot_order = row.opt_i64("slot_order")?.unwrap_or(0);
            Ok(Command::InsertTimeSlot {
                id: row.ulid("id")?,
                performance_date_id: row.ulid("performance_date_id")?,
                start: row.timestamp("start")?,
                end: row.timestamp("end")?,
                slot_order: u32::try_from(slot_order)
                    .map_err(|_| SqlError::Parse(format!("slot_order {slot_order} out of range")))?,
            })
        }
        "musicians" => {
            let row = single_row(insert, "musicians", MUSICIAN_COLUMNS)?;
            Ok(Command::InsertMusician(NewMusician {
                id: row.ulid("id")?,
                name: row.text("name")?,
                email: row.text("email")?,
                phone: row.text("phone")?,
                genre: row.text("music_genre")?,
                description: row.opt_text("description")?,
                website: row.opt_text("website")?,
            }))
        }
        "media" => {
            let row = single_row(insert, "media", MEDIA_COLUMNS)?;
            let kind_text = row.text("kind")?;
            let kind = MediaKind::from_field(&kind_text)
                .ok_or_else(|| SqlError::Parse(format!("unknown media kind: {kind_text}")))?;
            let size = row.i64("size_bytes")?;
            Ok(Command::InsertMedia {
                id: row.ulid("id")?,
                musician_id: row.ulid("musician_id")?,
                kind,
                original_filename: row.text("original_filename")?,
                size_bytes: u64::try_from(size)
                    .map_err(|_| SqlError::Parse(format!("size_bytes {size} out of range")))?,
                mime_type: row.text("mime_type")?,
            })
        }
        "bookings" => {
            let rows = insert_rows(insert, "bookings", BOOKING_COLUMNS)?;
            let mut musician_id = None;
            let mut join_waitlist = None;
            let mut time_slot_ids = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let m = row.ulid("musician_id").map_err(|e| e.in_row(i))?;
                let j = row.opt_bool("join_waitlist").map_err(|e| e.in_row(i))?.unwrap_or(false);
                if *musician_id.get_or_insert(m) != m {
                    return Err(SqlError::Parse("all booking rows must name the same musician_id".into()));
                }
                if *join_waitlist.get_or_insert(j) != j {
                    return Err(SqlError::Parse("all booking rows must agree on join_waitlist".into()));
                }
                time_slot_ids.push(row.ulid("time_slot_id").map_err(|e| e.in_row(i))?);
            }
            Ok(Command::InsertBookings {
                musician_id: musician_id.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?,
                time_slot_ids,
                join_waitlist: join_waitlist.unwrap_or(false),
            })
        }
        "stipend_payments" => {
            let row = single_row(insert, "stipend_payments", STIPEND_COLUMNS)?;
            Ok(Command::PayStipend { booking_id: row.ulid("booking_id")? })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let allowed: &[&str] = if table == "bookings" { &["id", "reason"] } else { &["id"] };
    let filters = where_filters(delete.selection.as_ref(), allowed)?;
    let id = filters.required_ulid("id")?;

    match table.as_str() {
        "performance_dates" => Ok(Command::DeactivatePerformanceDate { id }),
        "time_slots" => Ok(Command::DeleteTimeSlot { id }),
        "media" => Ok(Command::DeleteMedia { id }),
        "bookings" => Ok(Command::CancelBooking { id, reason: filters.opt_text("reason")? }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let selection = select.selection.as_ref();

    match table.as_str() {
        "markets" => {
            let f = where_filters(selection, &["id"])?;
            Ok(Command::SelectMarkets { id: f.opt_ulid("id")? })
        }
        "musicians" => {
            let f = where_filters(selection, &["id"])?;
            Ok(Command::SelectMusicians { id: f.opt_ulid("id")? })
        }
        "performance_dates" => {
            let f = where_filters(selection, &["market_id"])?;
            Ok(Command::SelectPerformanceDates { market_id: f.required_ulid("market_id")? })
        }
        "time_slots" => {
            let f = where_filters(selection, &["performance_date_id"])?;
            Ok(Command::SelectTimeSlots { performance_date_id: f.required_ulid("performance_date_id")? })
        }
        "media" => {
            let f = where_filters(selection, &["musician_id"])?;
            Ok(Command::SelectMedia { musician_id: f.required_ulid("musician_id")? })
        }
        "bookings" => {
            let f = where_filters(selection, &["musician_id", "market_id", "status", "month"])?;
            let status = match f.opt_text("status")? {
                Some(s) => Some(
                    BookingStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown booking status: {s}")))?,
                ),
                None => None,
            };
            let month = match f.opt_i64("month")? {
                Some(m @ 1..=12) => Some(m as u32),
                Some(m) => return Err(SqlError::Parse(format!("month must be 1-12, got {m}"))),
                None => None,
            };
            Ok(Command::SelectBookings(BookingFilter {
                musician_id: f.opt_ulid("musician_id")?,
                market_id: f.opt_ulid("market_id")?,
                status,
                month,
            }))
        }
        "waitlist" => {
            let f = where_filters(selection, &["time_slot_id"])?;
            Ok(Command::SelectWaitlist { time_slot_id: f.required_ulid("time_slot_id")? })
        }
        "schedule" => {
            let f = where_filters(selection, &["market_id"])?;
            Ok(Command::SelectSchedule { market_id: f.required_ulid("market_id")? })
        }
        "stats" => {
            let f = where_filters(selection, &["market_id"])?;
            Ok(Command::SelectStats { market_id: f.opt_ulid("market_id")? })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Named values ──────────────────────────────────────────────

/// Column name to expression pairs, from one VALUES row or a WHERE clause.
struct Fields<'a> {
    table: &'static str,
    values: Vec<(String, &'a Expr)>,
}

impl<'a> Fields<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.values.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
    }

    /// Present and not NULL.
    fn present(&self, col: &str) -> Option<&'a Expr> {
        self.get(col).filter(|e| !is_null(e))
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.present(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.require(col)?)
    }

    fn required_ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        let expr = self.present(col).ok_or(SqlError::MissingFilter(col))?;
        parse_ulid_expr(expr)
    }

    fn opt_ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.present(col).map(parse_ulid_expr).transpose()
    }

    fn text(&self, col: &'static str) -> Result<String, SqlError> {
        parse_text_expr(self.require(col)?)
    }

    fn opt_text(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.present(col).map(parse_text_expr).transpose()
    }

    fn i64(&self, col: &'static str) -> Result<i64, SqlError> {
        parse_i64_expr(self.require(col)?)
    }

    fn opt_i64(&self, col: &str) -> Result<Option<i64>, SqlError> {
        self.present(col).map(parse_i64_expr).transpose()
    }

    fn opt_bool(&self, col: &str) -> Result<Option<bool>, SqlError> {
        self.present(col).map(parse_bool_expr).transpose()
    }

    fn timestamp(&self, col: &'static str) -> Result<Ms, SqlError> {
        parse_timestamp_expr(self.require(col)?)
    }
}

fn insert_rows<'a>(
    insert: &'a ast::Insert,
    table: &'static str,
    known: &[&str],
) -> Result<Vec<Fields<'a>>, SqlError> {
    let columns: Vec<String> = if insert.columns.is_empty() {
        known.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if let Some(unknown) = columns.iter().find(|c| !known.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(unknown.clone()));
    }

    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    if rows.is_empty() {
        return Err(SqlError::Parse("empty VALUES".into()));
    }

    rows.iter()
        .map(|row| {
            // Trailing columns may be omitted when no column list is given.
            if row.len() > columns.len() || (!insert.columns.is_empty() && row.len() != columns.len()) {
                return Err(SqlError::WrongArity(table, columns.len(), row.len()));
            }
            Ok(Fields {
                table,
                values: columns.iter().cloned().zip(row.iter()).collect(),
            })
        })
        .collect()
}

fn single_row<'a>(insert: &'a ast::Insert, table: &'static str, known: &[&str]) -> Result<Fields<'a>, SqlError> {
    let mut rows = insert_rows(insert, table, known)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    Ok(rows.remove(0))
}

/// Collect `col = value` terms joined by AND.
fn where_filters<'a>(selection: Option<&'a Expr>, known: &[&str]) -> Result<Fields<'a>, SqlError> {
    let mut fields = Fields { table: "where", values: Vec::new() };
    if let Some(expr) = selection {
        collect_equalities(expr, known, &mut fields.values)?;
    }
    Ok(fields)
}

fn collect_equalities<'a>(expr: &'a Expr, known: &[&str], out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, known, out),
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_equalities(left, known, out)?;
            collect_equalities(right, known, out)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            if !known.contains(&col.as_str()) {
                return Err(SqlError::UnknownColumn(col));
            }
            out.push((col, right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Boolean(b)) => Ok(b.to_string()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text_expr(expr)?;
    Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID '{s}': {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        return Ok(-parse_i64_expr(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            s.trim().parse().map_err(|e| SqlError::Parse(format!("bad integer '{s}': {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_bool_expr(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Milliseconds since the epoch, written as a number, an RFC 3339
/// timestamp, or a `YYYY-MM-DD` date (midnight UTC).
fn parse_timestamp_expr(expr: &Expr) -> Result<Ms, SqlError> {
    if let Ok(ms) = parse_i64_expr(expr) {
        return Ok(ms);
    }
    let s = parse_text_expr(expr)?;
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::UnknownTable(_) => "42P01",
            SqlError::UnknownColumn(_) => "42703",
            _ => "42601",
        }
    }

    fn in_row(self, row: usize) -> SqlError {
        match self {
            SqlError::Parse(s) => SqlError::Parse(format!("row {row}: {s}")),
            other => other,
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing value for {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
