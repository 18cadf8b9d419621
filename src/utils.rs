use std::collections::BTreeSet;

/// Parse a caller-supplied identifier. Only plain ASCII digits are accepted: no sign, no
/// whitespace, no empty string.
pub fn parse_id(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u64>().ok()
}

/// Parse a comma-separated id list into ascending, de-duplicated ids. Whitespace around each
/// id is tolerated; an empty element is not.
pub fn parse_id_list(raw: &str) -> Result<Vec<u64>, String> {
    let mut ids = BTreeSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        let id = parse_id(part).ok_or_else(|| part.to_string())?;
        ids.insert(id);
    }
    Ok(ids.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("9991", Some(9991))]
    #[case("99999999999", Some(99_999_999_999))]
    #[case("hello_world", None)]
    #[case("", None)]
    #[case("-1", None)]
    #[case("+7", None)]
    #[case(" 12", None)]
    #[case("99999999999999999999999", None)]
    fn id_parsing(#[case] raw: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_id(raw), expected);
    }

    #[test]
    fn id_lists_are_sorted_and_deduplicated() {
        assert_eq!(parse_id_list("9993, 9991,9993"), Ok(vec![9991, 9993]));
        assert_eq!(parse_id_list("9991,,9992"), Err(String::new()));
        assert_eq!(parse_id_list("9991,abc"), Err("abc".to_string()));
    }
}
