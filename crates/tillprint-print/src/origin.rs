// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// WebSocket origin policy.
//
// Browsers send an `Origin` header on the upgrade request; native POS
// clients usually don't. Patterns are shell globs (`*`, `?`, `[...]`). A
// pattern with a scheme (`http://localhost:*`) is matched against the whole
// origin, any other pattern (`*.shop.local`) against the origin's host only.

use glob::Pattern;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum OriginPattern {
    /// Matched against `scheme://host[:port]`.
    Origin(Pattern),
    /// Matched against the bare host.
    Host(Pattern),
}

#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    patterns: Vec<OriginPattern>,
}

impl OriginPolicy {
    /// Empty `patterns` means same-origin only. Patterns that do not compile
    /// are skipped; `ServiceConfig::validate` rejects them before this point.
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let patterns = patterns
            .into_iter()
            .map(|p| p.into().trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .filter_map(|p| match Pattern::new(&p) {
                Ok(glob) if p.contains("://") => Some(OriginPattern::Origin(glob)),
                Ok(glob) => Some(OriginPattern::Host(glob)),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Ignoring invalid origin pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_same_origin_only(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Decide on an upgrade request from its `Origin` and `Host` headers.
    pub fn allows(&self, origin: Option<&str>, host: Option<&str>) -> bool {
        let Some(origin) = origin.map(str::trim).filter(|o| !o.is_empty()) else {
            return true;
        };
        let origin = origin.to_ascii_lowercase();
        let authority = authority_of(&origin);

        if self.patterns.is_empty() {
            let same = host.is_some_and(|h| h.trim().eq_ignore_ascii_case(authority));
            if !same {
                debug!(origin = %origin, host = ?host, "Cross-origin request rejected");
            }
            return same;
        }

        let hostname = strip_port(authority);
        self.patterns.iter().any(|pattern| match pattern {
            OriginPattern::Origin(glob) => glob.matches(&origin),
            OriginPattern::Host(glob) => glob.matches(hostname),
        })
    }
}

/// `host[:port]` part of an origin such as `https://till.local:8443`.
fn authority_of(origin: &str) -> &str {
    let rest = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
}

fn strip_port(authority: &str) -> &str {
    // Bracketed IPv6 literal keeps its colons.
    if let Some(end) = authority.find(']') {
        return &authority[..=end];
    }
    authority.rsplit_once(':').map_or(authority, |(host, _)| host)
}
