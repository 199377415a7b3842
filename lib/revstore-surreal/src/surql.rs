//! SurrealQL generation for document statements.
//!
//! Collections are schemaless tables. Field and table names are validated
//! and quoted with backticks; values are bound as `$pN` (filters), `$uN`
//! (update operations) and `$kN`/`$sN`/`$iN` (upsert keys, set and
//! set-on-insert fields).

use revstore::document::is_valid_field;
use revstore::{Delete, Document, Filter, Index, Order, Query, StoreError, Update, UpdateOp, Upsert};

/// SurrealQL text plus named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<(String, serde_json::Value)>,
}

fn ident(name: &str) -> Result<String, StoreError> {
    if !is_valid_field(name) {
        return Err(StoreError::Internal(format!("invalid field name '{}'", name)));
    }
    Ok(name
        .split('.')
        .map(|segment| format!("`{}`", segment))
        .collect::<Vec<_>>()
        .join("."))
}

/// Quoted table name for a collection.
pub fn table(collection: &str) -> Result<String, StoreError> {
    if !is_valid_field(collection) || collection.contains('.') {
        return Err(StoreError::Internal(format!(
            "invalid collection name '{}'",
            collection
        )));
    }
    Ok(format!("`{}`", collection))
}

fn condition(filter: &Filter, param: &str) -> Result<String, StoreError> {
    let field = ident(filter.field())?;
    Ok(match filter {
        Filter::Eq(..) => format!("{} = {}", field, param),
        Filter::Ne(..) => format!("{} != {}", field, param),
        Filter::Gt(..) => format!("{} > {}", field, param),
        Filter::Gte(..) => format!("{} >= {}", field, param),
        Filter::Lt(..) => format!("{} < {}", field, param),
        Filter::Lte(..) => format!("{} <= {}", field, param),
        Filter::In(..) => format!("{} CONTAINS {}", param, field),
        Filter::Contains(..) => format!("{} CONTAINS {}", field, param),
        Filter::IsNull(_) => format!("({} = NONE OR {} = NULL)", field, field),
        Filter::IsNotNull(_) => format!("({} != NONE AND {} != NULL)", field, field),
    })
}

/// WHERE clause and its bindings.
fn where_clause(
    filters: &[Filter],
    extra: Option<String>,
) -> Result<(String, Vec<(String, serde_json::Value)>), StoreError> {
    let mut clauses = Vec::with_capacity(filters.len() + 1);
    let mut params = Vec::new();
    for (i, filter) in filters.iter().enumerate() {
        let name = format!("p{}", i);
        clauses.push(condition(filter, &format!("${}", name))?);
        if let Some(value) = filter.value() {
            params.push((name, value.to_json()));
        }
    }
    clauses.extend(extra);

    if clauses.is_empty() {
        return Ok((String::new(), params));
    }
    Ok((format!(" WHERE {}", clauses.join(" AND ")), params))
}

/// Drops records whose logical id has an archived metadata record.
fn live_clause(table: &str) -> String {
    format!(
        "`__id` NOT IN (SELECT VALUE `__id` FROM {} WHERE `__m` = true AND `__a` = true)",
        table
    )
}

fn order_clause(order_by: &[(String, Order)]) -> Result<String, StoreError> {
    if order_by.is_empty() {
        return Ok(String::new());
    }
    let clauses = order_by
        .iter()
        .map(|(field, order)| {
            let dir = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            Ok(format!("{} {}", ident(field)?, dir))
        })
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(format!(" ORDER BY {}", clauses.join(", ")))
}

pub fn select(query: &Query) -> Result<Statement, StoreError> {
    let table = table(&query.collection)?;
    let live = query.exclude_archived.then(|| live_clause(&table));
    let (where_clause, params) = where_clause(&query.filters, live)?;

    let columns = if query.projection.is_empty() {
        "* OMIT id".to_string()
    } else {
        query
            .projection
            .iter()
            .map(|field| ident(field))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ")
    };

    let mut sql = format!(
        "SELECT {} FROM {}{}{}",
        columns,
        table,
        where_clause,
        order_clause(&query.order_by)?
    );
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = query.offset {
        sql.push_str(&format!(" START {}", offset));
    }
    Ok(Statement { sql, params })
}

pub fn count(query: &Query) -> Result<Statement, StoreError> {
    let table = table(&query.collection)?;
    let live = query.exclude_archived.then(|| live_clause(&table));
    let (where_clause, params) = where_clause(&query.filters, live)?;
    Ok(Statement {
        sql: format!("SELECT count() FROM {}{} GROUP ALL", table, where_clause),
        params,
    })
}

pub fn insert(collection: &str, document: Document) -> Result<Statement, StoreError> {
    Ok(Statement {
        sql: format!("INSERT INTO {} $doc", table(collection)?),
        params: vec![("doc".to_string(), serde_json::Value::Object(document))],
    })
}

/// Modify the first matching record. The filters are checked again on the
/// record itself, so a record changed since the lookup is left alone.
pub fn update_one(update: &Update) -> Result<Statement, StoreError> {
    let table = table(&update.collection)?;
    let (where_clause, mut params) = where_clause(&update.filters, None)?;

    let mut sets = Vec::with_capacity(update.ops.len());
    for (i, op) in update.ops.iter().enumerate() {
        let name = format!("u{}", i);
        let (set, value) = match op {
            UpdateOp::Set(field, value) => (format!("{} = ${}", ident(field)?, name), value),
            UpdateOp::AddToSet(field, value) => {
                let field = ident(field)?;
                (
                    format!("{field} = array::union({field} ?? [], [${name}])"),
                    value,
                )
            }
            UpdateOp::Pull(field, value) => (format!("{} -= ${}", ident(field)?, name), value),
        };
        sets.push(set);
        params.push((name, value.to_json()));
    }

    Ok(Statement {
        sql: format!(
            "UPDATE (SELECT VALUE id FROM {table}{where_clause} LIMIT 1) SET {}{where_clause} RETURN `__id`",
            sets.join(", ")
        ),
        params,
    })
}

/// Update the record matching the keys, or create it. Set-on-insert fields
/// keep their existing value through `??`.
pub fn upsert(upsert: &Upsert) -> Result<Statement, StoreError> {
    let table = table(&upsert.collection)?;
    let mut sets = Vec::new();
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    for (i, (field, value)) in upsert.keys.iter().enumerate() {
        let field = ident(field)?;
        let name = format!("k{}", i);
        sets.push(format!("{} = ${}", field, name));
        conditions.push(format!("{} = ${}", field, name));
        params.push((name, value.to_json()));
    }
    for (i, (field, value)) in upsert.set.iter().enumerate() {
        let name = format!("s{}", i);
        sets.push(format!("{} = ${}", ident(field)?, name));
        params.push((name, value.to_json()));
    }
    for (i, (field, value)) in upsert.set_on_insert.iter().enumerate() {
        let field = ident(field)?;
        let name = format!("i{}", i);
        sets.push(format!("{field} = {field} ?? ${name}"));
        params.push((name, value.to_json()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    Ok(Statement {
        sql: format!(
            "UPSERT {} SET {}{} RETURN NONE",
            table,
            sets.join(", "),
            where_clause
        ),
        params,
    })
}

/// Count of the records a delete will remove, then the delete itself.
pub fn delete(delete: &Delete) -> Result<Statement, StoreError> {
    let table = table(&delete.collection)?;
    let (where_clause, params) = where_clause(&delete.filters, None)?;
    Ok(Statement {
        sql: format!(
            "SELECT count() FROM {table}{where_clause} GROUP ALL; DELETE {table}{where_clause} RETURN NONE;"
        ),
        params,
    })
}

pub fn define_table(collection: &str) -> Result<Statement, StoreError> {
    Ok(Statement {
        sql: format!("DEFINE TABLE IF NOT EXISTS {} SCHEMALESS", table(collection)?),
        params: Vec::new(),
    })
}

pub fn remove_table(collection: &str) -> Result<Statement, StoreError> {
    Ok(Statement {
        sql: format!("REMOVE TABLE IF EXISTS {}", table(collection)?),
        params: Vec::new(),
    })
}

/// SurrealDB has no partial indexes. Sparse and scoped indexes are declared
/// without `UNIQUE`, since records outside them (missing a key, or not
/// holding the scope value) would otherwise take part in the constraint.
/// Callers needing those constraints enforced get them from PostgreSQL or
/// the in-process executor.
pub fn define_index(index: &Index) -> Result<Statement, StoreError> {
    let table = table(&index.collection)?;
    if !is_valid_field(&index.name) || index.name.contains('.') {
        return Err(StoreError::Internal(format!(
            "invalid index name '{}'",
            index.name
        )));
    }
    if index.keys.is_empty() {
        return Err(StoreError::Internal(format!("index {} has no keys", index.name)));
    }
    let fields = index
        .keys
        .iter()
        .map(|key| ident(key))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    let unique = if index.unique && !index.sparse && index.scope.is_none() {
        " UNIQUE"
    } else {
        ""
    };
    Ok(Statement {
        sql: format!(
            "DEFINE INDEX IF NOT EXISTS `{}` ON TABLE {} FIELDS {}{}",
            index.name, table, fields, unique
        ),
        params: Vec::new(),
    })
}
