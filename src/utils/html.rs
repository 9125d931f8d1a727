// src/utils/html.rs

use serde::{Serialize, Serializer};

/// Cleans a free-text answer for display.
///
/// Whitelist-based (ammonia): harmless formatting tags survive, while
/// `<script>`, `<iframe>` and event-handler attributes are stripped, so a
/// teacher reviewing answers cannot be hit by stored XSS. Entities are
/// escaped, so the result is only meant for rendering, never for grading.
pub fn clean_text_response(input: &str) -> String {
    ammonia::clean(input)
}

/// `serialize_with` helper: answers are stored raw and cleaned on the way out.
pub fn serialize_clean<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    value
        .as_deref()
        .map(clean_text_response)
        .serialize(serializer)
}
