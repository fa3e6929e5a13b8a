// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Authorization of job submissions.
//
// POS terminals that share the daemon's token attach it to every `ticket`
// message. Only the SHA-256 digest of the configured token is kept in memory,
// and presented tokens are compared digest to digest.

use sha2::{Digest, Sha256};
use tracing::info;

/// Decides whether a job submission may enter the queue.
pub trait AuthGate: Send + Sync {
    fn authorize(&self, token: Option<&str>) -> bool;
}

/// Shared-token gate. Without a configured token every submission passes.
#[derive(Debug, Clone, Default)]
pub struct TokenGate {
    digest: Option<String>,
}

impl TokenGate {
    pub fn new(token: Option<&str>) -> Self {
        let digest = token.filter(|t| !t.is_empty()).map(|t| hash_token(t.as_bytes()));
        info!(enabled = digest.is_some(), "Job submission token gate initialised");
        Self { digest }
    }

    pub fn is_enabled(&self) -> bool {
        self.digest.is_some()
    }
}

impl AuthGate for TokenGate {
    fn authorize(&self, token: Option<&str>) -> bool {
        let Some(expected) = &self.digest else {
            return true;
        };
        match token {
            Some(presented) if !presented.is_empty() => hash_token(presented.as_bytes()) == *expected,
            _ => false,
        }
    }
}

/// Lowercase hex SHA-256 of `data`.
fn hash_token(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
