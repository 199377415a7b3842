//! SQL generation for document statements.
//!
//! Every collection is one table of JSONB rows:
//!
//! ```text
//! rid        BIGSERIAL PRIMARY KEY
//! doc        JSONB NOT NULL
//! created_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! ```
//!
//! Field names are validated and spliced into the statement text as JSON
//! path literals so expression indexes can match them. Values are always
//! bound as parameters.

use revstore::document::is_valid_field;
use revstore::{Delete, Document, Filter, Index, Order, Query, StoreError, Update, UpdateOp, Upsert, Value};

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Json(serde_json::Value),
    Text(String),
    Texts(Vec<String>),
}

/// SQL text plus its parameters, numbered `$1..`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

#[derive(Default)]
struct Params(Vec<Param>);

impl Params {
    fn push(&mut self, param: Param) -> String {
        self.0.push(param);
        format!("${}", self.0.len())
    }

    fn json(&mut self, value: serde_json::Value) -> String {
        format!("{}::jsonb", self.push(Param::Json(value)))
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.0,
        }
    }
}

fn checked(field: &str) -> Result<&str, StoreError> {
    if is_valid_field(field) {
        Ok(field)
    } else {
        Err(StoreError::Internal(format!("invalid field name '{}'", field)))
    }
}

/// Quoted table name for a collection.
pub fn table(collection: &str) -> Result<String, StoreError> {
    if !is_valid_field(collection) || collection.contains('.') {
        return Err(StoreError::Internal(format!(
            "invalid collection name '{}'",
            collection
        )));
    }
    Ok(format!("\"{}\"", collection))
}

fn path_literal(field: &str) -> String {
    format!("'{{{}}}'", field.replace('.', ","))
}

/// JSON-valued (`text = false`) or text-valued access to `field` of `base`.
fn access(base: &str, field: &str, text: bool) -> String {
    match (field.contains('.'), text) {
        (false, false) => format!("{} -> '{}'", base, field),
        (false, true) => format!("{} ->> '{}'", base, field),
        (true, false) => format!("{} #> {}", base, path_literal(field)),
        (true, true) => format!("{} #>> {}", base, path_literal(field)),
    }
}

/// `value` as a quoted `jsonb` literal.
fn json_literal(value: &serde_json::Value) -> String {
    format!("'{}'::jsonb", value.to_string().replace('\'', "''"))
}

fn compare(params: &mut Params, field: &str, op: &str, value: &Value) -> String {
    match value {
        Value::String(s) => format!(
            "({}) COLLATE \"C\" {} {}",
            access("doc", field, true),
            op,
            params.push(Param::Text(s.clone()))
        ),
        Value::Datetime(dt) => format!(
            "({}) COLLATE \"C\" {} {}",
            access("doc", field, true),
            op,
            params.push(Param::Text(dt.to_string()))
        ),
        other => format!(
            "({}) {} {}",
            access("doc", field, false),
            op,
            params.json(other.to_json())
        ),
    }
}

fn condition(params: &mut Params, filter: &Filter) -> Result<String, StoreError> {
    let field = checked(filter.field())?;
    let json = access("doc", field, false);

    Ok(match filter {
        Filter::Eq(_, value) => format!("({}) = {}", json, params.json(value.to_json())),
        Filter::Ne(_, value) => format!(
            "(({json}) IS NULL OR ({json}) <> {})",
            params.json(value.to_json())
        ),
        Filter::Gt(_, value) => compare(params, field, ">", value),
        Filter::Gte(_, value) => compare(params, field, ">=", value),
        Filter::Lt(_, value) => compare(params, field, "<", value),
        Filter::Lte(_, value) => compare(params, field, "<=", value),
        Filter::In(_, Value::Strings(values)) => format!(
            "({}) = ANY({}::text[])",
            access("doc", field, true),
            params.push(Param::Texts(values.clone()))
        ),
        Filter::In(_, value) => {
            let candidates = match value.to_json() {
                serde_json::Value::Array(items) => serde_json::Value::Array(items),
                single => serde_json::Value::Array(vec![single]),
            };
            format!("{} @> jsonb_build_array({})", params.json(candidates), json)
        }
        Filter::Contains(_, value) => format!(
            "({}) @> {}",
            json,
            params.json(serde_json::Value::Array(vec![value.to_json()]))
        ),
        Filter::IsNull(_) => format!("COALESCE(jsonb_typeof({}), 'null') = 'null'", json),
        Filter::IsNotNull(_) => format!("COALESCE(jsonb_typeof({}), 'null') <> 'null'", json),
    })
}

fn where_clause(
    params: &mut Params,
    filters: &[Filter],
    extra: Option<String>,
) -> Result<String, StoreError> {
    let mut clauses = filters
        .iter()
        .map(|filter| condition(params, filter))
        .collect::<Result<Vec<_>, _>>()?;
    clauses.extend(extra);

    if clauses.is_empty() {
        return Ok(String::new());
    }
    Ok(format!(" WHERE {}", clauses.join(" AND ")))
}

/// Drops rows whose logical id has an archived metadata row.
fn live_clause(table: &str) -> String {
    format!(
        "NOT EXISTS (SELECT 1 FROM {} m WHERE m.doc -> '__id' = t.doc -> '__id' \
         AND m.doc -> '__m' = 'true'::jsonb AND m.doc -> '__a' = 'true'::jsonb)",
        table
    )
}

fn order_clause(order_by: &[(String, Order)]) -> Result<String, StoreError> {
    let mut clauses = order_by
        .iter()
        .map(|(field, order)| {
            let dir = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            Ok(format!("{} {}", access("doc", checked(field)?, false), dir))
        })
        .collect::<Result<Vec<_>, StoreError>>()?;
    clauses.push("rid ASC".to_string());
    Ok(format!(" ORDER BY {}", clauses.join(", ")))
}

fn projection(fields: &[String]) -> Result<String, StoreError> {
    if fields.is_empty() {
        return Ok("doc".to_string());
    }
    let pairs = fields
        .iter()
        .map(|field| {
            let field = checked(field)?;
            Ok(format!("'{}', {}", field, access("doc", field, false)))
        })
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(format!(
        "jsonb_strip_nulls(jsonb_build_object({})) AS doc",
        pairs.join(", ")
    ))
}

pub fn select(query: &Query) -> Result<Statement, StoreError> {
    let table = table(&query.collection)?;
    let mut params = Params::default();
    let live = query.exclude_archived.then(|| live_clause(&table));
    let where_clause = where_clause(&mut params, &query.filters, live)?;

    let mut sql = format!(
        "SELECT {} FROM {} t{}{}",
        projection(&query.projection)?,
        table,
        where_clause,
        order_clause(&query.order_by)?
    );
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = query.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
    Ok(params.finish(sql))
}

/// Count ignores limit, offset and ordering.
pub fn count(query: &Query) -> Result<Statement, StoreError> {
    let table = table(&query.collection)?;
    let mut params = Params::default();
    let live = query.exclude_archived.then(|| live_clause(&table));
    let where_clause = where_clause(&mut params, &query.filters, live)?;
    Ok(params.finish(format!("SELECT COUNT(*) FROM {} t{}", table, where_clause)))
}

pub fn insert(collection: &str, document: Document) -> Result<Statement, StoreError> {
    let mut params = Params::default();
    let value = params.json(serde_json::Value::Object(document));
    Ok(params.finish(format!(
        "INSERT INTO {} (doc) VALUES ({})",
        table(collection)?,
        value
    )))
}

fn apply_op(params: &mut Params, expr: String, op: &UpdateOp) -> Result<String, StoreError> {
    Ok(match op {
        UpdateOp::Set(field, value) => format!(
            "jsonb_set({}, {}, {}, true)",
            expr,
            path_literal(checked(field)?),
            params.json(value.to_json())
        ),
        UpdateOp::AddToSet(field, value) => {
            let path = path_literal(checked(field)?);
            let current = format!("COALESCE({} #> {}, '[]'::jsonb)", expr, path);
            let item = params.json(serde_json::Value::Array(vec![value.to_json()]));
            format!(
                "jsonb_set({expr}, {path}, CASE WHEN {current} @> {item} THEN {current} \
                 ELSE {current} || {item} END, true)"
            )
        }
        UpdateOp::Pull(field, value) => {
            let path = path_literal(checked(field)?);
            format!(
                "jsonb_set({expr}, {path}, (SELECT COALESCE(jsonb_agg(item), '[]'::jsonb) \
                 FROM jsonb_array_elements(COALESCE({expr} #> {path}, '[]'::jsonb)) AS elements(item) \
                 WHERE item <> {}), true)",
                params.json(value.to_json())
            )
        }
    })
}

/// Modify the first matching row, picked by physical order and locked.
pub fn update_one(update: &Update) -> Result<Statement, StoreError> {
    let table = table(&update.collection)?;
    let mut params = Params::default();

    let mut expr = "doc".to_string();
    for op in &update.ops {
        expr = apply_op(&mut params, expr, op)?;
    }
    let where_clause = where_clause(&mut params, &update.filters, None)?;

    Ok(params.finish(format!(
        "UPDATE {table} SET doc = {expr} WHERE rid = \
         (SELECT rid FROM {table} t{where_clause} ORDER BY rid LIMIT 1 FOR UPDATE)"
    )))
}

/// Presence of every key, the predicate of a sparse index.
fn present(keys: &[&str]) -> String {
    keys.iter()
        .map(|key| format!("({}) IS NOT NULL", access("doc", key, false)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Text-valued key columns, as declared by a non-array index.
fn key_columns(keys: &[&str]) -> String {
    keys.iter()
        .map(|key| format!("({})", access("doc", key, true)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One-statement upsert: insert the full document, or merge `set` into the
/// row already holding the keys. The conflict target is the sparse unique
/// index over the keys, which must exist.
pub fn upsert(upsert: &Upsert) -> Result<Statement, StoreError> {
    let table = table(&upsert.collection)?;
    let keys = upsert
        .keys
        .iter()
        .map(|(field, _)| checked(field))
        .collect::<Result<Vec<_>, _>>()?;
    if keys.is_empty() {
        return Err(StoreError::Internal("upsert has no keys".to_string()));
    }

    let mut set = Document::new();
    for (field, value) in &upsert.set {
        set.insert(checked(field)?.to_string(), value.to_json());
    }

    let mut params = Params::default();
    let insert = params.json(serde_json::Value::Object(upsert.to_document()));
    let merge = params.json(serde_json::Value::Object(set));

    Ok(params.finish(format!(
        "INSERT INTO {} AS t (doc) VALUES ({}) ON CONFLICT ({}) WHERE {} \
         DO UPDATE SET doc = t.doc || {}",
        table,
        insert,
        key_columns(&keys),
        present(&keys),
        merge
    )))
}

pub fn delete(delete: &Delete) -> Result<Statement, StoreError> {
    let table = table(&delete.collection)?;
    let mut params = Params::default();
    let where_clause = where_clause(&mut params, &delete.filters, None)?;
    Ok(params.finish(format!("DELETE FROM {} t{}", table, where_clause)))
}

pub fn create_table(collection: &str) -> Result<Statement, StoreError> {
    Ok(Params::default().finish(format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         rid BIGSERIAL PRIMARY KEY, \
         doc JSONB NOT NULL, \
         created_at TIMESTAMPTZ NOT NULL DEFAULT now())",
        table(collection)?
    )))
}

pub fn drop_table(collection: &str) -> Result<Statement, StoreError> {
    Ok(Params::default().finish(format!("DROP TABLE IF EXISTS {}", table(collection)?)))
}

/// Expression index over the index keys. Array indexes use GIN. Sparse and
/// scoped indexes are partial: on every key being present, and on the scope
/// array holding its value. Index predicates cannot take parameters, so the
/// scope value is spliced in as a quoted literal.
pub fn create_index(index: &Index) -> Result<Statement, StoreError> {
    let table = table(&index.collection)?;
    if !is_valid_field(&index.name) || index.name.contains('.') {
        return Err(StoreError::Internal(format!(
            "invalid index name '{}'",
            index.name
        )));
    }
    let keys = index
        .keys
        .iter()
        .map(|key| checked(key))
        .collect::<Result<Vec<_>, _>>()?;
    let Some(first) = keys.first() else {
        return Err(StoreError::Internal(format!("index {} has no keys", index.name)));
    };

    let mut predicates = Vec::new();
    if index.sparse {
        predicates.push(present(&keys));
    }
    if let Some((field, value)) = &index.scope {
        predicates.push(format!(
            "({}) @> {}",
            access("doc", checked(field)?, false),
            json_literal(&serde_json::json!([value]))
        ));
    }
    let predicate = if predicates.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", predicates.join(" AND "))
    };

    let sql = if index.array {
        format!(
            "CREATE INDEX IF NOT EXISTS \"{}\" ON {} USING GIN (({})){}",
            index.name,
            table,
            access("doc", first, false),
            predicate
        )
    } else {
        format!(
            "CREATE {}INDEX IF NOT EXISTS \"{}\" ON {} ({}){}",
            if index.unique { "UNIQUE " } else { "" },
            index.name,
            table,
            key_columns(&keys),
            predicate
        )
    };
    Ok(Params::default().finish(sql))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn select_translates_filters_and_paging() {
        let query = Query::new("articles")
            .is_not_null("__v")
            .eq("__id", "x")
            .contains("__r", "latest")
            .gt("__v", "0190")
            .order_by("__v", Order::Asc)
            .limit(10)
            .offset(20);
        let statement = select(&query).unwrap();

        assert_eq!(
            statement.sql,
            "SELECT doc FROM \"articles\" t WHERE \
             COALESCE(jsonb_typeof(doc -> '__v'), 'null') <> 'null' \
             AND (doc -> '__id') = $1::jsonb \
             AND (doc -> '__r') @> $2::jsonb \
             AND (doc ->> '__v') COLLATE \"C\" > $3 \
             ORDER BY doc -> '__v' ASC, rid ASC LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            statement.params,
            vec![
                Param::Json(json!("x")),
                Param::Json(json!(["latest"])),
                Param::Text("0190".to_string()),
            ]
        );
    }

    #[test]
    fn live_reads_and_projection() {
        let query = Query::new("articles")
            .r#in("__id", vec!["a".to_string(), "b".to_string()])
            .project(["__id", "__v"])
            .exclude_archived();
        let statement = select(&query).unwrap();

        assert!(statement.sql.starts_with(
            "SELECT jsonb_strip_nulls(jsonb_build_object('__id', doc -> '__id', '__v', doc -> '__v')) AS doc"
        ));
        assert!(statement.sql.contains("(doc ->> '__id') = ANY($1::text[])"));
        assert!(statement.sql.contains("NOT EXISTS (SELECT 1 FROM \"articles\" m"));
        assert_eq!(
            statement.params,
            vec![Param::Texts(vec!["a".to_string(), "b".to_string()])]
        );
    }

    #[test]
    fn nested_fields_use_path_operators() {
        let statement = count(&Query::new("articles").eq("meta.slug", "hi").limit(3)).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(*) FROM \"articles\" t WHERE (doc #> '{meta,slug}') = $1::jsonb"
        );
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(select(&Query::new("articles; DROP TABLE x")).is_err());
        assert!(select(&Query::new("articles").eq("a'b", 1i64)).is_err());
        assert!(select(&Query::new("a.b")).is_err());
    }

    #[test]
    fn update_one_locks_a_single_row() {
        let update = Update::new("articles")
            .eq("__id", "x")
            .contains("__r", "stage")
            .pull("__r", "stage");
        let statement = update_one(&update).unwrap();

        assert!(statement.sql.starts_with("UPDATE \"articles\" SET doc = jsonb_set(doc, '{__r}', "));
        assert!(statement.sql.ends_with(
            "WHERE rid = (SELECT rid FROM \"articles\" t WHERE (doc -> '__id') = $2::jsonb \
             AND (doc -> '__r') @> $3::jsonb ORDER BY rid LIMIT 1 FOR UPDATE)"
        ));
        assert_eq!(statement.params[0], Param::Json(json!("stage")));
    }

    #[test]
    fn add_to_set_guards_duplicates() {
        let statement = update_one(&Update::new("articles").eq("__v", "v").add_to_set("__r", "stage")).unwrap();
        assert!(statement.sql.contains("CASE WHEN COALESCE(doc #> '{__r}', '[]'::jsonb) @> $1::jsonb"));
        assert_eq!(statement.params[0], Param::Json(json!(["stage"])));
    }

    #[test]
    fn upsert_is_one_insert_on_conflict() {
        let upsert = Upsert::new("articles")
            .key("__id", "x")
            .key("__m", true)
            .set("__a", true)
            .set_on_insert("__c", "now");
        let statement = super::upsert(&upsert).unwrap();

        assert_eq!(
            statement.sql,
            "INSERT INTO \"articles\" AS t (doc) VALUES ($1::jsonb) \
             ON CONFLICT ((doc ->> '__id'), (doc ->> '__m')) \
             WHERE (doc -> '__id') IS NOT NULL AND (doc -> '__m') IS NOT NULL \
             DO UPDATE SET doc = t.doc || $2::jsonb"
        );
        assert_eq!(
            statement.params,
            vec![
                Param::Json(json!({"__id": "x", "__m": true, "__a": true, "__c": "now"})),
                Param::Json(json!({"__a": true})),
            ]
        );

        // the conflict target is exactly the built-in sparse unique index
        let index = create_index(&Index::new("articles", ["__id", "__m"]).unique().sparse()).unwrap();
        assert!(index.sql.ends_with(
            "((doc ->> '__id'), (doc ->> '__m')) \
             WHERE (doc -> '__id') IS NOT NULL AND (doc -> '__m') IS NOT NULL"
        ));
    }

    #[test]
    fn upsert_without_keys_is_rejected() {
        assert!(super::upsert(&Upsert::new("articles").set("__a", true)).is_err());
    }

    #[test]
    fn scoped_unique_index_is_partial_on_holders() {
        let index = Index::new("articles", ["slug"]).unique().within("__r", "latest");
        let statement = create_index(&index).unwrap();
        assert_eq!(
            statement.sql,
            "CREATE UNIQUE INDEX IF NOT EXISTS \"articles_slug_unique\" ON \"articles\" \
             ((doc ->> 'slug')) WHERE (doc -> '__r') @> '[\"latest\"]'::jsonb"
        );

        let quoted = create_index(&Index::new("articles", ["slug"]).within("__r", "it's")).unwrap();
        assert!(quoted.sql.ends_with("@> '[\"it''s\"]'::jsonb"));
    }

    #[test]
    fn index_statements() {
        let unique = create_index(&Index::new("articles", ["__id", "__v"]).unique()).unwrap();
        assert_eq!(
            unique.sql,
            "CREATE UNIQUE INDEX IF NOT EXISTS \"articles___id___v_unique\" ON \"articles\" \
             ((doc ->> '__id'), (doc ->> '__v'))"
        );

        let sparse = create_index(&Index::new("articles", ["__id", "__m"]).unique().sparse()).unwrap();
        assert!(sparse.sql.ends_with(
            "WHERE (doc -> '__id') IS NOT NULL AND (doc -> '__m') IS NOT NULL"
        ));

        let array = create_index(&Index::new("articles", ["__r"]).array()).unwrap();
        assert_eq!(
            array.sql,
            "CREATE INDEX IF NOT EXISTS \"articles___r\" ON \"articles\" USING GIN ((doc -> '__r'))"
        );
    }
}
