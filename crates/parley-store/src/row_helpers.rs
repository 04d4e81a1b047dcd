use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Read a required column, mapping failures to `CorruptRow`.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    get::<Option<T>>(row, idx, table, column)
}

/// Decode a JSON text column into `T`.
pub fn parse_json<T: DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::messages::Role;

    #[test]
    fn parse_enum_success() {
        let role: Role = parse_enum("assistant", "messages", "role").unwrap();
        assert_eq!(role, Role::Assistant);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<Role, _> = parse_enum("tool", "messages", "role");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "messages", column: "role", .. })
        ));
    }

    #[test]
    fn parse_json_typed() {
        let refs: Vec<String> = parse_json(r#"["doc_1","doc_2"]"#, "messages", "document_refs").unwrap();
        assert_eq!(refs, vec!["doc_1", "doc_2"]);
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<Vec<String>, _> = parse_json("not json", "messages", "trace");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "messages", column: "trace", .. })
        ));
    }
}
