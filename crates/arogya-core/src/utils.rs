use chrono::Utc;

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

pub fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============== Exit Command ==============

/// `exit` / `quit`, case-insensitive, surrounding whitespace ignored.
pub fn is_exit_command(body: &str) -> bool {
    let b = body.trim();
    b.eq_ignore_ascii_case("exit") || b.eq_ignore_ascii_case("quit")
}

// ============== File Naming ==============

/// File extension derived from a mimetype subtype (`image/jpeg; x=y` → `jpeg`).
pub fn mime_extension(mimetype: Option<&str>, fallback: &str) -> String {
    mimetype
        .and_then(|m| m.split('/').nth(1))
        .and_then(|sub| sub.split(';').next())
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Name used when forwarding a WhatsApp attachment to the document store.
pub fn upload_file_name(mimetype: Option<&str>, ts_millis: i64) -> String {
    format!(
        "whatsapp_upload_{ts_millis}.{}",
        mime_extension(mimetype, "bin")
    )
}

/// Name used when forwarding an image to the vision endpoint.
pub fn vision_file_name(mimetype: Option<&str>) -> String {
    format!("vision_query.{}", mime_extension(mimetype, "jpg"))
}

// ============== Message Splitting ==============

/// Split `text` into chunks of at most `max_chars` characters, preferring line breaks.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();

        if current_len + line_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > max_chars {
            // Hard-wrap a single oversized line.
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                let s: String = piece.iter().collect();
                if piece.len() == max_chars {
                    chunks.push(s);
                } else {
                    current_len = piece.len();
                    current = s;
                }
            }
            continue;
        }

        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
