//! Column name resolution
//!
//! Users (and AI-proposed mappings) rarely type a column exactly as the
//! dataset spells it. Resolution tries progressively looser matches and
//! always returns the dataset's own spelling.

/// Find the dataset column a reference means, trying in order:
/// exact, case-insensitive, spaces→underscores, underscores→spaces.
pub fn resolve_column<'a>(reference: &str, columns: &'a [String]) -> Option<&'a str> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }

    if let Some(found) = columns.iter().find(|c| c.as_str() == reference) {
        return Some(found.as_str());
    }
    if let Some(found) = find_case_insensitive(reference, columns) {
        return Some(found);
    }
    for candidate in [reference.replace(' ', "_"), reference.replace('_', " ")] {
        if let Some(found) = columns.iter().find(|c| **c == candidate) {
            return Some(found.as_str());
        }
        if let Some(found) = find_case_insensitive(&candidate, columns) {
            return Some(found);
        }
    }
    None
}

fn find_case_insensitive<'a>(name: &str, columns: &'a [String]) -> Option<&'a str> {
    let lower = name.to_lowercase();
    columns
        .iter()
        .find(|c| c.to_lowercase() == lower)
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        ["Revenue", "order_count", "Unit Price", "region"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_exact_match() {
        assert_eq!(resolve_column("Revenue", &columns()), Some("Revenue"));
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(resolve_column("REVENUE", &columns()), Some("Revenue"));
        assert_eq!(resolve_column("Region", &columns()), Some("region"));
    }

    #[test]
    fn test_spaces_to_underscores() {
        assert_eq!(resolve_column("order count", &columns()), Some("order_count"));
        assert_eq!(resolve_column("Order Count", &columns()), Some("order_count"));
    }

    #[test]
    fn test_underscores_to_spaces() {
        assert_eq!(resolve_column("Unit_Price", &columns()), Some("Unit Price"));
        assert_eq!(resolve_column("unit_price", &columns()), Some("Unit Price"));
    }

    #[test]
    fn test_exact_wins_over_case_insensitive() {
        let cols: Vec<String> = vec!["total".into(), "Total".into()];
        assert_eq!(resolve_column("Total", &cols), Some("Total"));
        assert_eq!(resolve_column("TOTAL", &cols), Some("total"));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(resolve_column("Profit", &columns()), None);
        assert_eq!(resolve_column("  ", &columns()), None);
        assert_eq!(resolve_column("Revenue", &[]), None);
    }
}
