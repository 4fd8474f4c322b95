use fancy_regex::Regex;
use once_cell::sync::Lazy;

static METRIC_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("metric name grammar is a valid regex")
});

static LABEL_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("label name grammar is a valid regex")
});

/// Makes `input` a valid metric name (`[a-zA-Z_:][a-zA-Z0-9_:]*`).
pub fn sanitize_metric_name(input: &str) -> String {
    sanitize(input, &METRIC_NAME_RE)
}

/// Makes `input` a valid label name (`[a-zA-Z_][a-zA-Z0-9_]*`).
pub fn sanitize_label_name(input: &str) -> String {
    sanitize(input, &LABEL_NAME_RE)
}

// Names already matching the grammar pass through untouched; anything else has every
// character outside [a-zA-Z0-9_] replaced and a leading digit turned into '_'.
// Note that the replacement drops ':' even for metric names, which keeps the
// result inside both grammars and makes the transform idempotent.
fn sanitize(input: &str, grammar: &Regex) -> String {
    if grammar.is_match(input).unwrap_or(false) {
        return input.to_string();
    }

    input
        .chars()
        .enumerate()
        .map(|(idx, c)| match c {
            '0'..='9' if idx == 0 => '_',
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => c,
            _ => '_',
        })
        .collect()
}
