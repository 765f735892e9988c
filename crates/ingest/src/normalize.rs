//! Text normalization applied before chunking.

/// Canonical form of a document:
/// - `\r\n` and `\r` become `\n`
/// - tabs and other control characters become spaces
/// - runs of spaces collapse to one, trailing spaces per line are dropped
/// - more than one blank line collapses to a single blank line
/// - leading and trailing whitespace is trimmed
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0usize;
    for raw in unified.split('\n') {
        let mut line = String::with_capacity(raw.len());
        let mut prev_space = false;
        for c in raw.chars() {
            let c = if c.is_control() || c.is_whitespace() { ' ' } else { c };
            if c == ' ' {
                if !prev_space {
                    line.push(' ');
                }
                prev_space = true;
            } else {
                line.push(c);
                prev_space = false;
            }
        }
        let line = line.trim().to_string();

        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }

    lines.join("\n").trim().to_string()
}
