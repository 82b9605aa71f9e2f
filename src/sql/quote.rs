//! Identifier and literal quoting for generated SQL.

/// Quote an identifier the way PostgreSQL's `quote_ident` does: bare when it is
/// a plain lowercase name, double-quoted (with embedded quotes doubled) otherwise.
pub fn quote_ident(ident: &str) -> String {
    let plain = ident
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$');

    if plain && !is_reserved(ident) {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Quote a schema-qualified name, leaving out the schema when there is none.
pub fn quote_qualified(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(s) => format!("{}.{}", quote_ident(s), quote_ident(name)),
        None => quote_ident(name),
    }
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Comma-separated quoted literals, for `in (...)` lists.
pub fn quote_literal_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| quote_literal(v.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Always double-quote, for backends whose keyword set is wider than what
/// `is_reserved` covers (SQLite).
pub fn quote_ident_always(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// PostgreSQL keywords outside the unreserved category: reserved,
/// type/function-name and column-name keywords.
fn is_reserved(ident: &str) -> bool {
    matches!(
        ident,
        "all" | "analyse" | "analyze" | "and" | "any" | "array" | "as" | "asc" | "asymmetric"
            | "authorization" | "between" | "bigint" | "binary" | "bit" | "boolean" | "both"
            | "case" | "cast" | "char" | "character" | "check" | "coalesce" | "collate"
            | "collation" | "column" | "concurrently" | "constraint" | "create" | "cross"
            | "current_catalog" | "current_date" | "current_role" | "current_schema"
            | "current_time" | "current_timestamp" | "current_user" | "dec" | "decimal"
            | "default" | "deferrable" | "desc" | "distinct" | "do" | "else" | "end"
            | "except" | "exists" | "extract" | "false" | "fetch" | "float" | "for"
            | "foreign" | "freeze" | "from" | "full" | "grant" | "greatest" | "group"
            | "grouping" | "having" | "ilike" | "in" | "initially" | "inner" | "inout" | "int"
            | "integer" | "intersect" | "interval" | "into" | "is" | "isnull" | "join"
            | "json" | "json_array" | "json_arrayagg" | "json_exists" | "json_object"
            | "json_objectagg" | "json_query" | "json_scalar" | "json_serialize"
            | "json_table" | "json_value" | "lateral" | "leading" | "least" | "left" | "like"
            | "limit" | "localtime" | "localtimestamp" | "merge_action" | "national"
            | "natural" | "nchar" | "none" | "normalize" | "not" | "notnull" | "null"
            | "nullif" | "numeric" | "offset" | "on" | "only" | "or" | "order" | "out"
            | "outer" | "overlaps" | "overlay" | "placing" | "position" | "precision"
            | "primary" | "real" | "references" | "returning" | "right" | "row" | "select"
            | "session_user" | "setof" | "similar" | "smallint" | "some" | "substring"
            | "symmetric" | "system_user" | "table" | "tablesample" | "then" | "time"
            | "timestamp" | "to" | "trailing" | "treat" | "trim" | "true" | "union"
            | "unique" | "user" | "using" | "values" | "varchar" | "variadic" | "verbose"
            | "when" | "where" | "window" | "with" | "xmlattributes" | "xmlconcat"
            | "xmlelement" | "xmlexists" | "xmlforest" | "xmlnamespaces" | "xmlparse"
            | "xmlpi" | "xmlroot" | "xmlserialize" | "xmltable"
    )
}
