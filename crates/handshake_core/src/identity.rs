//! Identifier normalization and matching.
//!
//! A handshake addresses its receiver by a loosely-typed contact string (a
//! messaging handle or an email) captured at initiation, because that is
//! all the initiator knows. Strong identity binding is deliberately
//! deferred to claim time: the claiming account's own identifiers are
//! resolved and compared against the stored string. This comparison is the
//! anti-spoofing gate of the whole subsystem, so it lives in exactly one
//! place and is applied symmetrically to both sides.

/// Canonical form used for all identifier comparisons: trimmed,
/// lowercased, with an optional leading `@` stripped.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_lowercase()
}

/// Case-insensitive, `@`-tolerant comparison. An empty stored identifier
/// never matches anything.
pub fn identifiers_match(stored: &str, candidate: &str) -> bool {
    let stored = normalize_identifier(stored);
    !stored.is_empty() && stored == normalize_identifier(candidate)
}

/// Contactable identifiers resolved for an account.
#[derive(Debug, Clone, Default)]
pub struct AccountIdentifiers {
    /// Messaging handle, with or without a leading `@`.
    pub handle: Option<String>,
    pub email: Option<String>,
}

impl AccountIdentifiers {
    pub fn is_empty(&self) -> bool {
        self.handle.is_none() && self.email.is_none()
    }

    /// True if any of the account's identifiers matches `stored`.
    pub fn matches(&self, stored: &str) -> bool {
        self.handle
            .as_deref()
            .is_some_and(|h| identifiers_match(stored, h))
            || self
                .email
                .as_deref()
                .is_some_and(|e| identifiers_match(stored, e))
    }
}
