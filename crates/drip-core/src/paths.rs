use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const DRIP_DIR: &str = ".drip";
pub const CONFIG_FILE: &str = ".drip/config.yaml";
pub const DELIVERIES_DB: &str = ".drip/deliveries.db";
pub const RECIPIENTS_FILE: &str = ".drip/recipients.json";
pub const OUTBOX_DIR: &str = ".drip/outbox";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn drip_dir(root: &Path) -> PathBuf {
    root.join(DRIP_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn deliveries_db_path(root: &Path) -> PathBuf {
    root.join(DELIVERIES_DB)
}

pub fn recipients_path(root: &Path) -> PathBuf {
    root.join(RECIPIENTS_FILE)
}

pub fn outbox_dir(root: &Path) -> PathBuf {
    root.join(OUTBOX_DIR)
}

/// One file per delivery: `<communication>--<recipient>.json`.
pub fn outbox_message_path(root: &Path, communication: &str, recipient: &str) -> PathBuf {
    outbox_dir(root).join(format!(
        "{}--{}.json",
        sanitize(communication),
        sanitize(recipient)
    ))
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rooted() {
        let root = Path::new("/tmp/proj");
        assert_eq!(config_path(root), PathBuf::from("/tmp/proj/.drip/config.yaml"));
        assert_eq!(
            deliveries_db_path(root),
            PathBuf::from("/tmp/proj/.drip/deliveries.db")
        );
    }

    #[test]
    fn outbox_names_are_sanitized() {
        let root = Path::new("/p");
        assert_eq!(
            outbox_message_path(root, "welcome", "ada@example.com"),
            PathBuf::from("/p/.drip/outbox/welcome--ada@example.com.json")
        );
        assert_eq!(
            outbox_message_path(root, "a/b", "../x"),
            PathBuf::from("/p/.drip/outbox/a_b--.._x.json")
        );
    }
}
