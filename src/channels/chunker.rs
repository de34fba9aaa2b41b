//! Splits outbound replies that exceed a channel's message cap.
//!
//! Boundaries are tried coarsest first: paragraph breaks, then lines, then
//! word boundaries, with a character-level split as the last resort. Chunks
//! concatenate back to the original text; limits are in characters, not
//! bytes.

fn char_count(text: &str) -> usize {
    text.chars().count()
}

fn split_keeping(text: &str, delimiter: &str) -> Vec<String> {
    text.split_inclusive(delimiter).map(str::to_string).collect()
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut taken = 0;

    for (idx, _) in text.char_indices() {
        if taken == max_chars {
            chunks.push(text[start..idx].to_string());
            start = idx;
            taken = 0;
        }
        taken += 1;
    }

    if start < text.len() {
        chunks.push(text[start..].to_string());
    }

    chunks
}

#[derive(Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Word,
    Hard,
}

impl Boundary {
    fn finer(self) -> Self {
        match self {
            Self::Paragraph => Self::Line,
            Self::Line => Self::Word,
            Self::Word | Self::Hard => Self::Hard,
        }
    }

    fn split(self, text: &str, max_chars: usize) -> Vec<String> {
        match self {
            Self::Paragraph => split_keeping(text, "\n\n"),
            Self::Line => split_keeping(text, "\n"),
            Self::Word => split_keeping(text, " "),
            Self::Hard => hard_split(text, max_chars),
        }
    }
}

fn pack_segment(text: &str, max_chars: usize, boundary: Boundary, out: &mut Vec<String>) {
    if text.is_empty() {
        return;
    }

    if char_count(text) <= max_chars {
        out.push(text.to_string());
        return;
    }

    // Hard-split parts are already within the limit, so the descent always
    // terminates there: an oversized text yields at least two parts.
    let parts = boundary.split(text, max_chars);
    if parts.len() <= 1 {
        pack_segment(text, max_chars, boundary.finer(), out);
        return;
    }

    // Greedily pack adjacent parts into chunks up to the limit; oversized
    // parts recurse into the next finer boundary.
    let mut pending = String::new();
    for part in parts {
        if char_count(&part) > max_chars {
            if !pending.is_empty() {
                out.push(std::mem::take(&mut pending));
            }
            pack_segment(&part, max_chars, boundary.finer(), out);
        } else if char_count(&pending) + char_count(&part) <= max_chars {
            pending.push_str(&part);
        } else {
            out.push(std::mem::replace(&mut pending, part));
        }
    }

    if !pending.is_empty() {
        out.push(pending);
    }
}

/// Split `text` into chunks of at most `max_chars` characters each.
#[must_use]
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    if char_count(text) <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    pack_segment(text, max_chars, Boundary::Paragraph, &mut chunks);
    chunks
}
