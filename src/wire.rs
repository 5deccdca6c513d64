use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::CoversAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ReservationFilter, SqlError};

pub struct CoversHandler {
    engine: Arc<Engine>,
    query_parser: Arc<CoversQueryParser>,
}

impl CoversHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(CoversQueryParser),
        }
    }

    /// Parse, run and time one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectSlots {
                restaurant_id,
                date,
                guest_count,
            } => {
                let slots = engine
                    .get_available_slots(restaurant_id, &date, guest_count)
                    .await
                    .map_err(engine_err)?;
                slot_rows(slots)
            }
            Command::InsertReservation { new } => {
                let reservation = engine.create_reservation(new).await.map_err(engine_err)?;
                reservation_rows(vec![reservation])
            }
            Command::SelectReservations { filter } => {
                let found = match filter {
                    ReservationFilter::All => engine.list_all().await,
                    ReservationFilter::Id(id) => {
                        vec![engine.get_by_id(id).await.map_err(engine_err)?]
                    }
                    ReservationFilter::Phone(phone) => {
                        engine.get_by_phone(&phone).await.map_err(engine_err)?
                    }
                    ReservationFilter::Restaurant {
                        restaurant_id,
                        date,
                    } => engine
                        .list_by_restaurant(restaurant_id, date.as_deref())
                        .await
                        .map_err(engine_err)?,
                };
                reservation_rows(found)
            }
            Command::UpdateReservation { id, patch } => {
                let updated = engine
                    .update_reservation(id, patch)
                    .await
                    .map_err(engine_err)?;
                reservation_rows(vec![updated])
            }
            Command::CancelReservation { id, customer_phone } => {
                let cancelled = match customer_phone {
                    Some(phone) => engine.cancel_by_phone(id, &phone).await,
                    None => engine.cancel_reservation(id).await,
                }
                .map_err(engine_err)?;
                reservation_rows(vec![cancelled])
            }
            Command::DeleteReservation { id } => {
                engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
        }
    }
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT4, FieldFormat::Text)
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![
        text_field("table_id"),
        text_field("table_name"),
        int_field("capacity"),
        text_field("start_time"),
        text_field("end_time"),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("restaurant_id"),
        text_field("table_id"),
        text_field("customer_name"),
        text_field("customer_phone"),
        text_field("customer_email"),
        int_field("guest_count"),
        text_field("date"),
        text_field("start_time"),
        text_field("end_time"),
        text_field("status"),
        text_field("notes"),
        text_field("chat_session_id"),
        text_field("created_at"),
        text_field("updated_at"),
    ]
}

fn format_timestamp(at: chrono::NaiveDateTime) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Postgres INT4 is signed; counts beyond i32 never pass validation.
fn int4(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn slot_rows(slots: Vec<Slot>) -> PgWireResult<Response> {
    let schema = Arc::new(slot_schema());
    let rows: Vec<PgWireResult<_>> = slots
        .into_iter()
        .map(|slot| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&slot.table_id.to_string())?;
            encoder.encode_field(&slot.table_name)?;
            encoder.encode_field(&int4(slot.capacity))?;
            encoder.encode_field(&format_time(slot.start_time))?;
            encoder.encode_field(&format_time(slot.end_time))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn reservation_rows(reservations: Vec<Reservation>) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.restaurant_id.to_string())?;
            encoder.encode_field(&r.table_id.to_string())?;
            encoder.encode_field(&r.customer_name)?;
            encoder.encode_field(&r.customer_phone)?;
            encoder.encode_field(&r.customer_email)?;
            encoder.encode_field(&int4(r.guest_count))?;
            encoder.encode_field(&format_date(r.date))?;
            encoder.encode_field(&format_time(r.start_time))?;
            encoder.encode_field(&format_time(r.end_time))?;
            encoder.encode_field(&r.status.to_string())?;
            encoder.encode_field(&r.notes)?;
            encoder.encode_field(&r.chat_session_id)?;
            encoder.encode_field(&format_timestamp(r.created_at))?;
            encoder.encode_field(&format_timestamp(r.updated_at))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Row shape a statement produces, guessed from its text so that
/// Describe works before parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("DELETE") {
        vec![]
    } else if upper.starts_with("SELECT") && upper.contains("SLOTS") {
        slot_schema()
    } else if upper.contains("RESERVATIONS") {
        reservation_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for CoversHandler {
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
pub struct CoversQueryParser;

#[async_trait]
impl QueryParser for CoversQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CoversHandler {
    type Statement = String;
    type QueryParser = CoversQueryParser;

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
        let sql = substitute_params(portal);
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// A run of statement text, or a `$N` placeholder outside quoted literals.
enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split SQL at its placeholders. Text inside single quotes is never a
/// placeholder; a doubled `''` just toggles twice.
fn pieces(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let (mut text_start, mut i, mut quoted) = (0, 0, false);
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                quoted = !quoted;
                i += 1;
            }
            b'$' if !quoted => {
                let digits = bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
                let end = i + 1 + digits;
                if digits > 0
                    && let Ok(n) = sql[i + 1..end].parse::<usize>()
                {
                    out.push(Piece::Text(&sql[text_start..i]));
                    out.push(Piece::Param(n));
                    text_start = end;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push(Piece::Text(&sql[text_start..]));
    out
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    pieces(sql)
        .iter()
        .filter_map(|p| match p {
            Piece::Param(n) => Some(*n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Replace each placeholder with its bound value as a quoted literal, in
/// one pass over the statement. Bound text is never rescanned. Unbound
/// placeholders stay as written and fail to parse.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in pieces(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n) => match n.checked_sub(1).and_then(|i| params.get(i)) {
                Some(Some(bytes)) => {
                    let text = String::from_utf8_lossy(bytes.as_ref());
                    out.push('\'');
                    out.push_str(&text.replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
            },
        }
    }
    out
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CoversFactory {
    handler: Arc<CoversHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CoversAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CoversFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = CoversAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CoversHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CoversFactory {
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
) -> io::Result<()> {
    let factory = CoversFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidInput(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyCancelled(_) => "55000",
        EngineError::Storage(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn count_params_takes_highest() {
        assert_eq!(count_params("SELECT * FROM slots"), 0);
        assert_eq!(
            count_params("SELECT * FROM slots WHERE restaurant_id = $1 AND date = $2"),
            2
        );
        assert_eq!(count_params("UPDATE reservations SET notes = $3 WHERE id = $12"), 12);
    }

    #[test]
    fn placeholders_inside_literals_are_text() {
        assert_eq!(count_params("SELECT * FROM slots WHERE date = '$5' AND restaurant_id = $1"), 1);
        assert_eq!(count_params("UPDATE reservations SET notes = 'it''s $2' WHERE id = $1"), 1);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "UPDATE reservations SET notes = $2 WHERE id = $1";
        let bound = bind_params(sql, &[Some("01ARZ3NDEKTSV4RRFFQ69G5FAV"), Some("voucher $1 off, it's ours")]);
        assert_eq!(
            bound,
            "UPDATE reservations SET notes = 'voucher $1 off, it''s ours' WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'"
        );
    }

    #[test]
    fn null_and_unbound_params() {
        let bound = bind_params("SELECT $1, $2, $10", &[None::<&str>, Some("x")]);
        assert_eq!(bound, "SELECT NULL, 'x', $10");
        assert_eq!(bind_params("SELECT $0", &[Some("x")]), "SELECT $0");
    }

    #[test]
    fn sqlstate_per_error() {
        assert_eq!(sqlstate(&EngineError::InvalidInput("x".into())), "22023");
        assert_eq!(sqlstate(&EngineError::NotFound("x".into())), "P0002");
        assert_eq!(sqlstate(&EngineError::slot_taken()), "23P01");
        assert_eq!(sqlstate(&EngineError::AlreadyCancelled(Ulid::new())), "55000");
        assert_eq!(sqlstate(&EngineError::Storage("x".into())), "58030");
    }

    #[test]
    fn result_schema_by_statement() {
        assert_eq!(result_schema("SELECT * FROM slots WHERE date = $1").len(), 5);
        assert_eq!(result_schema("select * from reservations").len(), 15);
        assert_eq!(
            result_schema("INSERT INTO reservations (restaurant_id) VALUES ($1)").len(),
            15
        );
        assert!(result_schema("DELETE FROM reservations WHERE id = $1").is_empty());
    }

    #[test]
    fn int4_saturates() {
        assert_eq!(int4(12), 12);
        assert_eq!(int4(u32::MAX), i32::MAX);
    }
}
