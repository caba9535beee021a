use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::{process_socket, TlsAcceptor};
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::SlotbookStartupHandler;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, ResultKind, SqlError};

// ── Result schemas ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Text,
    Int,
    Bool,
}

impl ColumnType {
    fn pg_type(self) -> Type {
        match self {
            ColumnType::Text => Type::VARCHAR,
            ColumnType::Int => Type::INT8,
            ColumnType::Bool => Type::BOOL,
        }
    }
}

use ColumnType::{Bool, Int, Text};

fn columns(kind: ResultKind) -> &'static [(&'static str, ColumnType)] {
    match kind {
        ResultKind::Markets => &[
            ("id", Text),
            ("name", Text),
            ("location", Text),
            ("stipend_cents", Int),
            ("contact_email", Text),
        ],
        ResultKind::Musicians => &[
            ("id", Text),
            ("name", Text),
            ("email", Text),
            ("phone", Text),
            ("music_genre", Text),
            ("description", Text),
            ("website", Text),
            ("registered_at", Int),
        ],
        ResultKind::PerformanceDates => &[
            ("id", Text),
            ("market_id", Text),
            ("date", Int),
            ("notes", Text),
            ("is_active", Bool),
        ],
        ResultKind::TimeSlots => &[
            ("id", Text),
            ("performance_date_id", Text),
            ("start", Int),
            ("end", Int),
            ("slot_order", Int),
        ],
        ResultKind::Media => &[
            ("id", Text),
            ("musician_id", Text),
            ("kind", Text),
            ("original_filename", Text),
            ("stored_path", Text),
            ("size_bytes", Int),
            ("mime_type", Text),
            ("uploaded_at", Int),
            ("is_current", Bool),
        ],
        ResultKind::Bookings => &[
            ("id", Text),
            ("time_slot_id", Text),
            ("musician_id", Text),
            ("musician_name", Text),
            ("musician_email", Text),
            ("market_id", Text),
            ("market_name", Text),
            ("stipend_cents", Int),
            ("performance_date_id", Text),
            ("date", Int),
            ("start", Int),
            ("end", Int),
            ("slot_order", Int),
            ("status", Text),
            ("booked_at", Int),
            ("cancelled_at", Int),
            ("cancellation_reason", Text),
            ("promoted", Bool),
            ("stipend_paid_at", Int),
            ("waitlist_count", Int),
        ],
        ResultKind::Waitlist => &[
            ("id", Text),
            ("time_slot_id", Text),
            ("musician_id", Text),
            ("musician_name", Text),
            ("musician_email", Text),
            ("position", Int),
            ("joined_at", Int),
        ],
        ResultKind::Schedule => &[
            ("performance_date_id", Text),
            ("date", Int),
            ("time_slot_id", Text),
            ("start", Int),
            ("end", Int),
            ("slot_order", Int),
            ("booking_id", Text),
            ("musician_id", Text),
            ("musician_name", Text),
            ("waitlist_count", Int),
        ],
        ResultKind::Stats => &[
            ("total_slots", Int),
            ("booked_slots", Int),
            ("available_slots", Int),
            ("total_musicians", Int),
            ("total_waitlist", Int),
        ],
        ResultKind::SlotOutcomes => &[
            ("time_slot_id", Text),
            ("status", Text),
            ("booking_id", Text),
            ("position", Int),
        ],
        ResultKind::Cancellation => &[
            ("cancelled_booking_id", Text),
            ("time_slot_id", Text),
            ("promoted_booking_id", Text),
            ("promoted_musician_id", Text),
            ("promoted_name", Text),
            ("promoted_email", Text),
        ],
    }
}

fn schema(kind: ResultKind) -> Vec<FieldInfo> {
    columns(kind)
        .iter()
        .map(|(name, ty)| FieldInfo::new((*name).into(), None, None, ty.pg_type(), FieldFormat::Text))
        .collect()
}

/// One output value. `None` encodes SQL NULL.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(Option<String>),
    Int(Option<i64>),
    Bool(Option<bool>),
}

fn text(s: impl ToString) -> Cell {
    Cell::Text(Some(s.to_string()))
}

fn opt_text<T: ToString>(s: Option<T>) -> Cell {
    Cell::Text(s.map(|v| v.to_string()))
}

fn int(v: impl TryInto<i64>) -> Cell {
    Cell::Int(v.try_into().ok())
}

fn query_response(kind: ResultKind, rows: Vec<Vec<Cell>>) -> Response {
    let schema = Arc::new(schema(kind));
    let encoded: Vec<PgWireResult<_>> = rows
        .into_iter()
        .map(|row| {
            debug_assert_eq!(row.len(), schema.len());
            let mut encoder = DataRowEncoder::new(schema.clone());
            for cell in &row {
                match cell {
                    Cell::Text(v) => encoder.encode_field(v)?,
                    Cell::Int(v) => encoder.encode_field(v)?,
                    Cell::Bool(v) => encoder.encode_field(v)?,
                }
            }
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(encoded)))
}

fn execution(tag: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(tag).with_rows(rows))
}

// ── Row builders ─────────────────────────────────────────────────

fn market_row(m: &Market) -> Vec<Cell> {
    vec![
        text(m.id),
        text(&m.name),
        opt_text(m.location.as_ref()),
        int(m.stipend_cents),
        opt_text(m.contact_email.as_ref()),
    ]
}

fn musician_row(m: &Musician) -> Vec<Cell> {
    vec![
        text(m.id),
        text(&m.name),
        text(&m.email),
        text(&m.phone),
        text(&m.genre),
        opt_text(m.description.as_ref()),
        opt_text(m.website.as_ref()),
        int(m.registered_at),
    ]
}

fn performance_date_row(d: &PerformanceDate) -> Vec<Cell> {
    vec![
        text(d.id),
        text(d.market_id),
        int(d.date),
        opt_text(d.notes.as_ref()),
        Cell::Bool(Some(d.is_active)),
    ]
}

fn time_slot_row(s: &TimeSlotInfo) -> Vec<Cell> {
    vec![
        text(s.id),
        text(s.performance_date_id),
        int(s.span.start),
        int(s.span.end),
        int(s.slot_order),
    ]
}

fn media_row(f: &MediaFile, current: Option<Ulid>) -> Vec<Cell> {
    vec![
        text(f.id),
        text(f.musician_id),
        text(f.kind),
        text(&f.original_filename),
        text(&f.stored_path),
        int(f.size_bytes),
        text(&f.mime_type),
        int(f.uploaded_at),
        Cell::Bool(Some(current == Some(f.id))),
    ]
}

fn booking_row(info: &BookingInfo) -> Vec<Cell> {
    let b = &info.booking;
    vec![
        text(b.id),
        text(b.time_slot_id),
        text(b.musician_id),
        text(&info.musician_name),
        text(&info.musician_email),
        text(info.market_id),
        text(&info.market_name),
        int(info.stipend_cents),
        text(info.performance_date_id),
        int(info.date),
        int(info.span.start),
        int(info.span.end),
        int(info.slot_order),
        text(b.status.as_str()),
        int(b.booked_at),
        Cell::Int(b.cancelled_at),
        opt_text(b.cancellation_reason.as_ref()),
        Cell::Bool(Some(b.promoted)),
        Cell::Int(b.stipend_paid_at),
        int(info.waitlist_count),
    ]
}

fn waitlist_row(info: &WaitlistInfo) -> Vec<Cell> {
    let e = &info.entry;
    vec![
        text(e.id),
        text(e.time_slot_id),
        text(e.musician_id),
        text(&info.musician_name),
        text(&info.musician_email),
        int(e.position),
        int(e.joined_at),
    ]
}

fn schedule_row(r: &ScheduleRow) -> Vec<Cell> {
    vec![
        text(r.performance_date_id),
        int(r.date),
        text(r.time_slot_id),
        int(r.span.start),
        int(r.span.end),
        int(r.slot_order),
        opt_text(r.booking_id),
        opt_text(r.musician_id),
        opt_text(r.musician_name.as_ref()),
        int(r.waitlist_count),
    ]
}

fn stats_row(s: &Stats) -> Vec<Cell> {
    vec![
        int(s.total_slots),
        int(s.booked_slots),
        int(s.available_slots),
        int(s.total_musicians),
        int(s.total_waitlist),
    ]
}

fn slot_result_row(r: &SlotResult) -> Vec<Cell> {
    vec![
        text(r.time_slot_id),
        text(r.outcome.status()),
        opt_text(r.outcome.booking_id()),
        Cell::Int(r.outcome.position().map(i64::from)),
    ]
}

fn cancellation_row(c: &CancelOutcome) -> Vec<Cell> {
    let promoted = c.promoted.as_ref();
    vec![
        text(c.cancelled_booking_id),
        text(c.time_slot_id),
        opt_text(promoted.map(|p| p.booking_id)),
        opt_text(promoted.map(|p| p.musician.id)),
        opt_text(promoted.map(|p| &p.musician.name)),
        opt_text(promoted.map(|p| &p.musician.email)),
    ]
}

// ── Handler ──────────────────────────────────────────────────────

pub struct SlotbookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<SlotbookQueryParser>,
}

impl SlotbookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(SlotbookQueryParser),
        }
    }

    /// Parse and run one statement, recording query metrics.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
                return Err(sql_err(e));
            }
        };
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => {
                tracing::debug!("{label} failed: {e}");
                "error"
            }
        };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        result.map_err(engine_err)
    }

    async fn execute_command(&self, cmd: Command) -> Result<Response, EngineError> {
        let engine = &self.engine;
        let response = match cmd {
            Command::InsertMarket { id, name, location, stipend_cents, contact_email } => {
                engine.create_market(id, &name, location, stipend_cents, contact_email).await?;
                execution("INSERT", 1)
            }
            Command::UpdateMarket { id, patch } => {
                engine.update_market(id, patch).await?;
                execution("INSERT", 1)
            }
            Command::InsertPerformanceDate { id, market_id, date, notes } => {
                engine.create_performance_date(id, market_id, date, notes).await?;
                execution("INSERT", 1)
            }
            Command::DeactivatePerformanceDate { id } => {
                engine.deactivate_performance_date(id).await?;
                execution("DELETE", 1)
            }
            Command::InsertTimeSlot { id, performance_date_id, start, end, slot_order } => {
                engine.create_time_slot(id, performance_date_id, start, end, slot_order).await?;
                execution("INSERT", 1)
            }
            Command::DeleteTimeSlot { id } => {
                engine.delete_time_slot(id).await?;
                execution("DELETE", 1)
            }
            Command::InsertMusician(new) => {
                engine.register_musician(new).await?;
                execution("INSERT", 1)
            }
            Command::InsertMedia { id, musician_id, kind, original_filename, size_bytes, mime_type } => {
                engine
                    .attach_media(id, musician_id, kind, &original_filename, size_bytes, &mime_type)
                    .await?;
                execution("INSERT", 1)
            }
            Command::DeleteMedia { id } => {
                engine.remove_media(id).await?;
                execution("DELETE", 1)
            }
            Command::PayStipend { booking_id } => {
                engine.mark_stipend_paid(booking_id).await?;
                execution("INSERT", 1)
            }
            Command::InsertBookings { musician_id, time_slot_ids, join_waitlist } => {
                let results = engine.create_bookings(musician_id, &time_slot_ids, join_waitlist).await?;
                query_response(ResultKind::SlotOutcomes, results.iter().map(slot_result_row).collect())
            }
            Command::CancelBooking { id, reason } => {
                let outcome = engine.cancel_booking(id, reason).await?;
                query_response(ResultKind::Cancellation, vec![cancellation_row(&outcome)])
            }
            Command::SelectMarkets { id } => {
                let markets = match id {
                    Some(id) => vec![engine.get_market(id)?],
                    None => engine.list_markets(),
                };
                query_response(ResultKind::Markets, markets.iter().map(market_row).collect())
            }
            Command::SelectMusicians { id } => {
                let musicians = match id {
                    Some(id) => vec![engine.get_musician(id)?],
                    None => engine.list_musicians(),
                };
                query_response(ResultKind::Musicians, musicians.iter().map(musician_row).collect())
            }
            Command::SelectPerformanceDates { market_id } => {
                let dates = engine.list_performance_dates(market_id)?;
                query_response(ResultKind::PerformanceDates, dates.iter().map(performance_date_row).collect())
            }
            Command::SelectTimeSlots { performance_date_id } => {
                let slots = engine.list_time_slots(performance_date_id).await?;
                query_response(ResultKind::TimeSlots, slots.iter().map(time_slot_row).collect())
            }
            Command::SelectMedia { musician_id } => {
                let musician = engine.get_musician(musician_id)?;
                let files = engine.list_media(musician_id)?;
                query_response(
                    ResultKind::Media,
                    files
                        .iter()
                        .map(|f| media_row(f, musician.current_media(f.kind).map(|c| c.id)))
                        .collect(),
                )
            }
            Command::SelectBookings(filter) => {
                let bookings = engine.list_bookings(&filter).await;
                query_response(ResultKind::Bookings, bookings.iter().map(booking_row).collect())
            }
            Command::SelectWaitlist { time_slot_id } => {
                let entries = engine.list_waitlist(time_slot_id).await?;
                query_response(ResultKind::Waitlist, entries.iter().map(waitlist_row).collect())
            }
            Command::SelectSchedule { market_id } => {
                let schedule = engine.schedule(market_id).await?;
                query_response(ResultKind::Schedule, schedule.iter().map(schedule_row).collect())
            }
            Command::SelectStats { market_id } => {
                let stats = engine.stats(market_id).await?;
                query_response(ResultKind::Stats, vec![stats_row(&stats)])
            }
        };
        Ok(response)
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotbookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotbookQueryParser;

#[async_trait]
impl QueryParser for SlotbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(sql::describe(stmt).map(schema).unwrap_or_default())
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotbookHandler {
    type Statement = String;
    type QueryParser = SlotbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        let fields = sql::describe(&target.statement).map(schema).unwrap_or_default();
        Ok(DescribeStatementResponse::new(param_types, fields))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let fields = sql::describe(&target.statement.statement).map(schema).unwrap_or_default();
        Ok(DescribePortalResponse::new(fields))
    }
}

/// Byte ranges and indexes of `$N` placeholders outside quoted literals
/// and quoted identifiers, left to right.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote inside a literal is an escape and stays inside.
            Some(q) if b == q => {
                if bytes.get(i + 1) == Some(&q) {
                    i += 1;
                } else {
                    quote = None;
                }
            }
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start + 1..end].parse::<usize>() {
                    found.push((start..end, n));
                }
                i = end;
                continue;
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
///
/// One pass over the original SQL: substituted text is never rescanned, so
/// a bound value containing `$N` stays literal.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut last = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[last..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        last = range.end;
    }
    result.push_str(&sql[last..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotbookFactory {
    handler: Arc<SlotbookHandler>,
    auth_handler: Arc<SlotbookStartupHandler<DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotbookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotbookHandler::new(engine)),
            auth_handler: Arc::new(SlotbookStartupHandler::new(
                password,
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(SlotbookFactory::new(engine, password));
    process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}
