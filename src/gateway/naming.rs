//! Unique destination names for copy and move.

/// Split `name` into (stem, extension-with-dot). Dotfiles and directories
/// without an extension keep the whole name as stem.
fn split_extension(name: &str, is_dir: bool) -> (&str, &str) {
    if is_dir {
        return (name, "");
    }
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Strip a trailing ` (N)` counter, returning the base stem and N.
fn split_counter(stem: &str) -> (&str, u32) {
    if let Some(open) = stem.rfind(" (") {
        if let Some(digits) = stem[open + 2..].strip_suffix(')') {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(n) = digits.parse() {
                    return (&stem[..open], n);
                }
            }
        }
    }
    (stem, 0)
}

/// First name derived from `name` for which `taken` is false.
///
/// `a.txt` → `a (1).txt` → `a (2).txt`; an existing counter is incremented.
pub fn unique_name(name: &str, is_dir: bool, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name, is_dir);
    let (mut base, start) = split_counter(stem);
    // An exhausted counter starts a fresh one on the full stem.
    let mut n = match start.checked_add(1) {
        Some(n) => n,
        None => {
            base = stem;
            1
        }
    };
    loop {
        let candidate = format!("{} ({}){}", base, n, ext);
        if !taken(&candidate) {
            return candidate;
        }
        n = match n.checked_add(1) {
            Some(next) => next,
            None => {
                base = stem;
                1
            }
        };
    }
}
