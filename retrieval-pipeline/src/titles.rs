//! Maps raw guide file names onto the titles shown to the model and the reader.

const GUIDE_TITLES: &[(&str, &str)] = &[
    ("homecareuserguide", "Home Care User Guide"),
    ("residentialuserguide", "Residential Care User Guide"),
    ("mapsuserguide", "Maps Feature User Guide"),
    ("newsuserguide", "News Feature User Guide"),
    ("sa2userguide", "SA2 Analysis User Guide"),
];

fn lookup_key(document_name: &str) -> String {
    let file_name = document_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(document_name);

    let stem = match file_name.rsplit_once('.') {
        Some((stem, ext))
            if ["docx", "doc", "pdf", "txt"]
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known)) =>
        {
            stem
        }
        _ => file_name,
    };

    stem.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Professional title for a guide file name; unknown names are returned unchanged.
pub fn document_title(document_name: &str) -> String {
    let key = lookup_key(document_name);
    GUIDE_TITLES
        .iter()
        .find(|(known, _)| *known == key)
        .map_or_else(|| document_name.to_string(), |(_, title)| (*title).to_string())
}
