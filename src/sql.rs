use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::DEFAULT_GUEST_COUNT;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectSlots {
        restaurant_id: Ulid,
        date: String,
        guest_count: u32,
    },
    InsertReservation {
        new: NewReservation,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    UpdateReservation {
        id: Ulid,
        patch: ReservationPatch,
    },
    /// `customer_phone` set means the customer cancels their own booking.
    CancelReservation {
        id: Ulid,
        customer_phone: Option<String>,
    },
    DeleteReservation {
        id: Ulid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationFilter {
    All,
    Id(Ulid),
    Phone(String),
    Restaurant {
        restaurant_id: Ulid,
        date: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        more => {
            return Err(SqlError::Unsupported(format!(
                "{} statements in one query, send them one at a time",
                more.len()
            )));
        }
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let values = extract_insert_values(insert)?;
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT INTO reservations needs a column list".into()));
    }
    if insert.columns.len() != values.len() {
        return Err(SqlError::WrongArity("reservations", insert.columns.len(), values.len()));
    }

    let mut restaurant_id = None;
    let mut new = NewReservation {
        guest_count: DEFAULT_GUEST_COUNT,
        ..NewReservation::default()
    };
    for (column, value) in insert.columns.iter().zip(&values) {
        match column.value.to_lowercase().as_str() {
            "restaurant_id" => restaurant_id = Some(parse_ulid(value)?),
            "table_id" => new.table_id = parse_ulid_or_null(value)?,
            "customer_name" => new.customer_name = parse_string(value)?,
            "customer_phone" => new.customer_phone = parse_string(value)?,
            "customer_email" => new.customer_email = parse_string_or_null(value)?,
            "guest_count" => new.guest_count = parse_u32(value)?,
            "date" => new.date = parse_string(value)?,
            "start_time" => new.start_time = parse_string(value)?,
            "notes" => new.notes = parse_string_or_null(value)?,
            "chat_session_id" => new.chat_session_id = parse_string_or_null(value)?,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
    new.restaurant_id = restaurant_id.ok_or(SqlError::MissingColumn("restaurant_id"))?;
    for (name, value) in [
        ("customer_name", &new.customer_name),
        ("customer_phone", &new.customer_phone),
        ("date", &new.date),
        ("start_time", &new.start_time),
    ] {
        if value.is_empty() {
            return Err(SqlError::MissingColumn(name));
        }
    }
    Ok(Command::InsertReservation { new })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::DeleteReservation { id })
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut filters = Vec::new();
    if let Some(selection) = selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let mut id = None;
    let mut customer_phone = None;
    for (column, value) in &filters {
        match column.as_str() {
            "id" => id = Some(parse_ulid(value)?),
            "customer_phone" => customer_phone = Some(parse_string(value)?),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
    let id = id.ok_or(SqlError::MissingFilter("id"))?;

    let mut patch = ReservationPatch::default();
    for assignment in assignments {
        let column = assignment_column(&assignment.target)?;
        let value = &assignment.value;
        match column.as_str() {
            "customer_name" => patch.customer_name = parse_string_or_null(value)?,
            "customer_phone" => patch.customer_phone = parse_string_or_null(value)?,
            "customer_email" => patch.customer_email = parse_string_or_null(value)?,
            "guest_count" => patch.guest_count = Some(parse_u32(value)?),
            "date" => patch.date = parse_string_or_null(value)?,
            "start_time" => patch.start_time = parse_string_or_null(value)?,
            "notes" => patch.notes = parse_string_or_null(value)?,
            "status" => {
                let raw = parse_string(value)?;
                let status = raw.parse::<ReservationStatus>().map_err(SqlError::Parse)?;
                patch.status = Some(status);
            }
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    let only_cancels = patch.status == Some(ReservationStatus::Cancelled)
        && ReservationPatch {
            status: None,
            ..patch.clone()
        }
        .is_empty();
    if only_cancels {
        return Ok(Command::CancelReservation { id, customer_phone });
    }
    if customer_phone.is_some() {
        return Err(SqlError::Unsupported(
            "customer_phone filter is only accepted when cancelling".into(),
        ));
    }
    Ok(Command::UpdateReservation { id, patch })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "slots" => parse_slots_filters(&filters),
        "reservations" => Ok(Command::SelectReservations {
            filter: parse_reservation_filters(&filters)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_slots_filters(filters: &[(String, &Expr)]) -> Result<Command, SqlError> {
    let (mut restaurant_id, mut date, mut guest_count) = (None, None, None);
    for (column, value) in filters {
        match column.as_str() {
            "restaurant_id" => restaurant_id = Some(parse_ulid(value)?),
            "date" => date = Some(parse_string(value)?),
            "guest_count" => guest_count = Some(parse_u32(value)?),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
    Ok(Command::SelectSlots {
        restaurant_id: restaurant_id.ok_or(SqlError::MissingFilter("restaurant_id"))?,
        date: date.ok_or(SqlError::MissingFilter("date"))?,
        guest_count: guest_count.unwrap_or(DEFAULT_GUEST_COUNT),
    })
}

fn parse_reservation_filters(filters: &[(String, &Expr)]) -> Result<ReservationFilter, SqlError> {
    let (mut id, mut phone, mut restaurant_id, mut date) = (None, None, None, None);
    for (column, value) in filters {
        match column.as_str() {
            "id" => id = Some(parse_ulid(value)?),
            "customer_phone" => phone = Some(parse_string(value)?),
            "restaurant_id" => restaurant_id = Some(parse_ulid(value)?),
            "date" => date = Some(parse_string(value)?),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
    match (id, phone, restaurant_id, date) {
        (None, None, None, None) => Ok(ReservationFilter::All),
        (Some(id), None, None, None) => Ok(ReservationFilter::Id(id)),
        (None, Some(phone), None, None) => Ok(ReservationFilter::Phone(phone)),
        (None, None, Some(restaurant_id), date) => Ok(ReservationFilter::Restaurant {
            restaurant_id,
            date,
        }),
        (None, None, None, Some(_)) => Err(SqlError::MissingFilter("restaurant_id")),
        _ => Err(SqlError::Unsupported(
            "filter reservations by one of id, customer_phone or restaurant_id".into(),
        )),
    }
}

/// Flatten `a = x AND b = y AND ...` into (column, value) pairs.
fn collect_eq_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                out.push((column, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
        },
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
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

fn assignment_column(target: &AssignmentTarget) -> Result<String, SqlError> {
    match target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        AssignmentTarget::Tuple(_) => Err(SqlError::Unsupported("tuple assignment".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("one reservation per INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
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
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const RID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const TID: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_select_slots() {
        let sql = format!(
            "SELECT * FROM slots WHERE restaurant_id = '{RID}' AND date = '2026-10-20' AND guest_count = 4"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots {
                restaurant_id: ulid(RID),
                date: "2026-10-20".into(),
                guest_count: 4,
            }
        );
    }

    #[test]
    fn parse_select_slots_defaults_guest_count() {
        let sql = format!("SELECT * FROM slots WHERE restaurant_id = '{RID}' AND date = '2026-10-20'");
        match parse_sql(&sql).unwrap() {
            Command::SelectSlots { guest_count, .. } => assert_eq!(guest_count, DEFAULT_GUEST_COUNT),
            cmd => panic!("expected SelectSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_slots_requires_date() {
        let sql = format!("SELECT * FROM slots WHERE restaurant_id = '{RID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("date"))));
    }

    #[test]
    fn parse_insert_reservation_named_columns() {
        let sql = format!(
            "INSERT INTO reservations (start_time, date, restaurant_id, table_id, customer_name, customer_phone, guest_count, notes) \
             VALUES ('19:00', '2026-10-20', '{RID}', '{TID}', 'Ada', '+1555', 3, NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { new } => {
                assert_eq!(new.restaurant_id, ulid(RID));
                assert_eq!(new.table_id, Some(ulid(TID)));
                assert_eq!(new.customer_name, "Ada");
                assert_eq!(new.customer_phone, "+1555");
                assert_eq!(new.guest_count, 3);
                assert_eq!(new.date, "2026-10-20");
                assert_eq!(new.start_time, "19:00");
                assert_eq!(new.notes, None);
                assert_eq!(new.customer_email, None);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_without_table_auto_assigns() {
        let sql = format!(
            "INSERT INTO reservations (restaurant_id, table_id, customer_name, customer_phone, date, start_time) \
             VALUES ('{RID}', NULL, 'Ada', '+1555', '2026-10-20', '19:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { new } => {
                assert_eq!(new.table_id, None);
                assert_eq!(new.guest_count, DEFAULT_GUEST_COUNT);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_missing_phone() {
        let sql = format!(
            "INSERT INTO reservations (restaurant_id, customer_name, date, start_time) \
             VALUES ('{RID}', 'Ada', '2026-10-20', '19:00')"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("customer_phone"))
        ));
    }

    #[test]
    fn parse_insert_unknown_column() {
        let sql = format!("INSERT INTO reservations (restaurant_id, vip) VALUES ('{RID}', true)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "vip"));
    }

    #[test]
    fn parse_select_reservations_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::All
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reservations WHERE id = '{TID}'")).unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::Id(ulid(TID))
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM reservations WHERE customer_phone = '+1555'").unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::Phone("+1555".into())
            }
        );
        assert_eq!(
            parse_sql(&format!(
                "SELECT * FROM reservations WHERE restaurant_id = '{RID}' AND date = '2026-10-20'"
            ))
            .unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::Restaurant {
                    restaurant_id: ulid(RID),
                    date: Some("2026-10-20".into()),
                }
            }
        );
    }

    #[test]
    fn parse_select_reservations_rejects_mixed_filters() {
        let sql = format!("SELECT * FROM reservations WHERE id = '{TID}' AND customer_phone = '+1'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_reservation() {
        let sql = format!(
            "UPDATE reservations SET start_time = '20:00', guest_count = 5, notes = 'window seat' WHERE id = '{TID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateReservation { id, patch } => {
                assert_eq!(id, ulid(TID));
                assert_eq!(patch.start_time.as_deref(), Some("20:00"));
                assert_eq!(patch.guest_count, Some(5));
                assert_eq!(patch.notes.as_deref(), Some("window seat"));
                assert_eq!(patch.date, None);
            }
            cmd => panic!("expected UpdateReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_status_only_cancel() {
        let sql = format!("UPDATE reservations SET status = 'cancelled' WHERE id = '{TID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::CancelReservation {
                id: ulid(TID),
                customer_phone: None
            }
        );
    }

    #[test]
    fn parse_cancel_by_phone() {
        let sql = format!(
            "UPDATE reservations SET status = 'cancelled' WHERE id = '{TID}' AND customer_phone = '+1555'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::CancelReservation {
                id: ulid(TID),
                customer_phone: Some("+1555".into())
            }
        );
    }

    #[test]
    fn parse_update_other_status_is_update() {
        let sql = format!("UPDATE reservations SET status = 'completed' WHERE id = '{TID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateReservation { patch, .. } => {
                assert_eq!(patch.status, Some(ReservationStatus::Completed));
            }
            cmd => panic!("expected UpdateReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_bad_status() {
        let sql = format!("UPDATE reservations SET status = 'maybe' WHERE id = '{TID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_update_phone_filter_only_for_cancel() {
        let sql = format!(
            "UPDATE reservations SET notes = 'x' WHERE id = '{TID}' AND customer_phone = '+1555'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE reservations SET notes = 'x' WHERE customer_phone = '+1555'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_reservation() {
        let sql = format!("DELETE FROM reservations WHERE id = '{TID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DeleteReservation { id: ulid(TID) }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("DELETE FROM bookings WHERE id = '{TID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(t)) if t == "bookings"));
    }

    #[test]
    fn parse_bad_ulid_errors() {
        let sql = "DELETE FROM reservations WHERE id = 'not-a-ulid'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn parse_rejects_statement_batches() {
        let sql = format!(
            "DELETE FROM reservations WHERE id = '{TID}'; DELETE FROM reservations WHERE id = '{RID}'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(m)) if m.starts_with("2 statements")));
        let one = format!("DELETE FROM reservations WHERE id = '{TID}';");
        assert!(parse_sql(&one).is_ok());
    }
}
