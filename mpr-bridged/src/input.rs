//! Line-oriented command intake

/// One parsed stdin line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    /// `<zone_id> <param> <value>`
    Command {
        zone_id: u64,
        param: String,
        value: String,
    },
    /// `status`
    Status,
    /// `poll`
    Poll,
}

/// Parse one line; `Ok(None)` for blank lines and `#` comments
pub fn parse_line(line: &str) -> Result<Option<InputLine>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [word] if word.eq_ignore_ascii_case("status") => Ok(Some(InputLine::Status)),
        [word] if word.eq_ignore_ascii_case("poll") => Ok(Some(InputLine::Poll)),
        [id, param, value] => {
            let zone_id = id
                .parse()
                .map_err(|_| format!("invalid zone id {:?}", id))?;
            Ok(Some(InputLine::Command {
                zone_id,
                param: param.to_string(),
                value: value.to_string(),
            }))
        }
        _ => Err(format!(
            "expected `<zone_id> <param> <value>`, `status` or `poll`, got {:?}",
            line
        )),
    }
}
