// Section slug generation and stable section ID construction.
//
// Slugs: lowercase, strip non-alphanumeric, hyphenate spaces.
// Fallback: h{level}_{index} when heading text is empty.
// Section ID: slug(ancestor_chain) + ordinal suffix.

/// Convert a heading string into a URL-safe slug.
///
/// - Lowercases all characters
/// - Replaces non-ASCII-alphanumeric characters with hyphens
/// - Collapses consecutive hyphens
/// - Strips leading and trailing hyphens
///
/// Returns an empty string if the heading contains no alphanumeric characters.
pub fn slugify(heading: &str) -> String {
    let raw: String = heading
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect();

    raw.split('-').filter(|part| !part.is_empty()).collect::<Vec<_>>().join("-")
}

/// Build a stable section ID from ancestor slugs and the section's own heading.
///
/// The ID encodes the full ancestor chain for structural stability:
/// `ancestor1/ancestor2/this-heading`. If two sibling sections produce the
/// same slug, an ordinal suffix (`~2`, `~3`, …) disambiguates.
///
/// # Arguments
/// - `ancestor_slugs` — slugs of all ancestor sections (root-first order)
/// - `heading` — the raw heading text for this section
/// - `level` — heading level (1–6), used for the empty-heading fallback
/// - `ordinal` — 1-based position among all sections in the document
pub fn make_section_id(
    ancestor_slugs: &[&str],
    heading: &str,
    level: u8,
    ordinal: usize,
) -> String {
    let slug = slugify(heading);
    let leaf = if slug.is_empty() { format!("h{}_{}", level, ordinal) } else { slug };

    if ancestor_slugs.is_empty() {
        leaf
    } else {
        format!("{}/{}", ancestor_slugs.join("/"), leaf)
    }
}

/// Append an ordinal suffix to a section ID to disambiguate duplicates.
///
/// - `base_id` — the section ID without suffix
/// - `occurrence` — which occurrence this is (1 = first, no suffix)
///
/// Returns `base_id` unchanged when `occurrence == 1`.
pub fn disambiguate(base_id: &str, occurrence: usize) -> String {
    if occurrence <= 1 {
        base_id.to_string()
    } else {
        format!("{base_id}~{occurrence}")
    }
}
