use std::path::Path;

const MAX_KEY_LEN: usize = 64;

/// Stable settings key for a repository root.
///
/// `/home/me/src/My Repo` becomes `home-me-src-my_repo`; a Windows drive
/// prefix `C:\` becomes `c--`. Keys are lowercase and at most 64 characters.
pub fn repository_key(path: &Path) -> String {
    let raw = path.to_string_lossy().to_lowercase();

    let (drive, rest) = match raw.as_bytes() {
        [d, b':', ..] if d.is_ascii_alphabetic() => {
            (Some(*d as char), raw.get(2..).unwrap_or_default())
        }
        _ => (None, raw.as_str()),
    };

    let mut key = String::with_capacity(rest.len());
    for c in rest.chars() {
        let mapped = match c {
            '/' | '\\' => '-',
            c if c.is_alphanumeric() || c == '-' || c == '_' => c,
            _ => '_',
        };
        let last = key.chars().last();
        if (mapped == '-' || mapped == '_') && last == Some(mapped) {
            continue;
        }
        key.push(mapped);
    }

    let mut key = key.trim_matches(|c| c == '-' || c == '_').to_string();
    if let Some(d) = drive {
        key = format!("{d}--{key}");
    }
    if key.len() > MAX_KEY_LEN {
        let mut end = MAX_KEY_LEN;
        while !key.is_char_boundary(end) {
            end -= 1;
        }
        key.truncate(end);
    }
    if key.is_empty() {
        "default".to_string()
    } else {
        key
    }
}
