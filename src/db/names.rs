//! Schema-qualified relation names.

use crate::error::{Error, Result};

/// Split `schema.name` into its parts. Unqualified names have no schema.
pub fn parse_qualified_name(name: &str) -> Result<(Option<String>, String)> {
    let mut parts = name.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(object), None, _) => Ok((None, object.to_string())),
        (Some(schema), Some(object), None) => Ok((Some(schema.to_string()), object.to_string())),
        _ => Err(Error::InvalidReference(name.to_string())),
    }
}

/// Order `candidates` by their position in `search_order`; schemas outside
/// the search order sort last, keeping their relative order.
pub fn rank_by_search_order(search_order: &[String], candidates: &[String]) -> Vec<String> {
    let mut ranked: Vec<(usize, &String)> = candidates
        .iter()
        .map(|c| {
            let pos = search_order
                .iter()
                .position(|s| s.eq_ignore_ascii_case(c))
                .unwrap_or(usize::MAX);
            (pos, c)
        })
        .collect();
    ranked.sort_by_key(|(pos, _)| *pos);
    ranked.into_iter().map(|(_, c)| c.clone()).collect()
}
