/// Splits `text` into pieces of at most `max_chars` characters, breaking at
/// whitespace where possible. Words longer than the limit are cut.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in trimmed.split_inclusive(char::is_whitespace) {
        let word_len = word.chars().count();
        // Trailing whitespace never forces a break.
        let visible_len = word.trim_end().chars().count();
        if current_len + visible_len > max_chars && current_len > 0 {
            push_chunk(&mut chunks, &current);
            current.clear();
            current_len = 0;
        }

        if visible_len > max_chars {
            for ch in word.chars() {
                if current_len == max_chars {
                    push_chunk(&mut chunks, &current);
                    current.clear();
                    current_len = 0;
                }
                current.push(ch);
                current_len += 1;
            }
            continue;
        }

        current.push_str(word);
        current_len += word_len;
    }

    push_chunk(&mut chunks, &current);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, chunk: &str) {
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
}
