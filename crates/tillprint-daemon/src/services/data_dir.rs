// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::PathBuf;

/// Directory holding `config.json`: `$XDG_DATA_HOME/tillprint`, else
/// `~/.local/share/tillprint`.
pub fn data_dir() -> PathBuf {
    resolve(
        std::env::var("XDG_DATA_HOME").ok(),
        std::env::var("HOME").ok(),
    )
}

fn resolve(xdg_data_home: Option<String>, home: Option<String>) -> PathBuf {
    let base = match (xdg_data_home, home) {
        (Some(xdg), _) if !xdg.is_empty() => PathBuf::from(xdg),
        (_, Some(home)) if !home.is_empty() => PathBuf::from(home).join(".local").join("share"),
        // Last resort
        _ => PathBuf::from("/tmp"),
    };
    base.join("tillprint")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_wins() {
        assert_eq!(
            resolve(Some("/srv/data".into()), Some("/home/till".into())),
            PathBuf::from("/srv/data/tillprint")
        );
    }

    #[test]
    fn home_fallback() {
        assert_eq!(
            resolve(Some(String::new()), Some("/home/till".into())),
            PathBuf::from("/home/till/.local/share/tillprint")
        );
        assert_eq!(resolve(None, None), PathBuf::from("/tmp/tillprint"));
    }
}
