/// Normalize one cell: full-width spaces become half-width, outer whitespace
/// is stripped.
pub fn norm_cell(raw: &str) -> String {
    raw.replace('\u{3000}', " ").trim().to_string()
}

/// Replace full-width digits (０..９) with their ASCII equivalents. Everything
/// else passes through untouched.
pub fn normalize_digits(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Dash variants that government sheets use to mean "zero" in count columns.
const ZERO_DASHES: &[&str] = &["-", "－", "‐", "—", "―"];

/// Coerce a count cell to an integer.
///
/// Empty and `nan` cells are absent (`None`), dash variants are zero, and
/// `"3.0"`-style floats are accepted via an f64 round trip. Anything else is
/// absent — coercion never raises and never fabricates a zero.
pub fn coerce_count(raw: &str) -> Option<i64> {
    let s = norm_cell(raw);
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return None;
    }
    if ZERO_DASHES.contains(&s.as_str()) {
        return Some(0);
    }
    normalize_digits(&s).parse::<f64>().ok().map(|f| f as i64)
}
