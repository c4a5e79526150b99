/// Build an `attachment` Content-Disposition value for `filename`.
///
/// The quoted `filename` is an ASCII fallback. Titles with other characters
/// also get an RFC 5987 `filename*` parameter carrying the real name.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => format!("\\{}", c),
            c if c.is_ascii() && !c.is_ascii_control() => c.to_string(),
            _ => "?".to_string(),
        })
        .collect();

    if filename.is_ascii() && !filename.chars().any(|c| c.is_ascii_control()) {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(filename)
        )
    }
}
