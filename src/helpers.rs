//! Shared helpers for turning scraped text and links into identifiers and numbers.
//!
//! Scraped links come in two shapes: site-relative paths (`rider/tadej-pogacar`)
//! and absolute URLs (`https://www.procyclingstats.com/rider/tadej-pogacar`).
//! Both are reduced to their path segments before ids are derived, so the
//! same entity gets the same id whichever shape the page used.

/// Path segments of a link, ignoring scheme, host, query and fragment.
pub(crate) fn path_segments(link: &str) -> Vec<&str> {
    let without_fragment = link.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();
    let path = match without_query.find("://") {
        Some(idx) => {
            let after_scheme = &without_query[idx + 3..];
            after_scheme.find('/').map_or("", |slash| &after_scheme[slash..])
        }
        None => without_query,
    };
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Last path segment of a link: `team/uae-team-emirates-xrg-2025` → `uae-team-emirates-xrg-2025`.
pub(crate) fn last_path_segment(link: &str) -> String {
    path_segments(link)
        .last()
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// Join the last `n` path segments of a link with `-`.
///
/// `race/tour-de-france/2025/stage-4` with `n = 3` → `tour-de-france-2025-stage-4`.
pub(crate) fn join_last_segments(link: &str, n: usize) -> String {
    let segments = path_segments(link);
    let start = segments.len().saturating_sub(n);
    segments[start..].join("-")
}

/// Parse the leading numeric token of a string such as `"182.6 km"`.
pub(crate) fn parse_leading_number(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.replace(',', ".").parse().ok()
}

/// Trim a scraped text field, mapping blank or placeholder values (`-`) to `None`.
pub(crate) fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty() && *t != "-")
        .map(|t| t.to_string())
}
