//! Subscription registry and control-frame types.
//!
//! The registry records which tokens are subscribed under which mode and on
//! which exchange, enforces the per-session token quota, and builds the JSON
//! control frames the feed expects:
//!
//! ```json
//! {"correlationID":"abc","action":1,"params":{"mode":3,"tokenList":[{"exchangeType":1,"tokens":["5900"]}]}}
//! ```
//!
//! It never touches the socket; [`FeedSession`](crate::ws::session::FeedSession)
//! owns transmission and holds the registry under its session lock.
//!
//! Two behaviours are deliberate and worth knowing about:
//!
//! - Subscribing the same token twice stores it twice. Duplicates count
//!   against the quota.
//! - Unsubscribe is mode-wide: it clears every token held for the mode,
//!   whatever token list accompanies the request. To drop a subset, unsubscribe
//!   the mode and subscribe the remainder again.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::constants::defaults::QUOTA_LIMIT;
use crate::error::{Result, StreamError};
use crate::types::enums::{Action, ExchangeType, SubscriptionMode};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Tokens to (un)subscribe on one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    /// Exchange the tokens belong to.
    pub exchange_type: ExchangeType,
    /// Instrument tokens, in request order.
    pub tokens: Vec<String>,
}

impl TokenSet {
    /// Create a token set.
    pub fn new<I, T>(exchange_type: ExchangeType, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            exchange_type,
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

/// The `params` object of a control frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParams {
    pub mode: SubscriptionMode,
    pub token_list: Vec<TokenSet>,
}

/// A subscribe or unsubscribe control frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionRequest {
    /// Caller-chosen id echoed by the feed in error responses.
    #[serde(rename = "correlationID")]
    pub correlation_id: String,
    pub action: Action,
    pub params: RequestParams,
}

impl SubscriptionRequest {
    /// Build a control frame.
    pub fn new(
        action: Action,
        correlation_id: impl Into<String>,
        mode: SubscriptionMode,
        token_list: Vec<TokenSet>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            action,
            params: RequestParams { mode, token_list },
        }
    }

    /// Serialize the frame to its JSON text form.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Number of tokens carried across all token sets.
    pub fn token_count(&self) -> usize {
        self.params.token_list.iter().map(|s| s.tokens.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Tokens held for one mode, keyed by exchange.
pub type ModeEntry = BTreeMap<ExchangeType, Vec<String>>;

/// Tracks subscribed `(mode, exchange, token)` triples against a quota.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRegistry {
    quota: usize,
    entries: BTreeMap<SubscriptionMode, ModeEntry>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry with the default quota of 50 tokens.
    pub fn new() -> Self {
        Self::with_quota(QUOTA_LIMIT)
    }

    /// Create an empty registry with a custom quota.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota,
            entries: BTreeMap::new(),
        }
    }

    /// The configured token quota.
    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Record a subscription and return the control frame to send.
    ///
    /// Validation happens before anything is recorded:
    /// - an empty token list is an [`StreamError::InvalidArgument`],
    /// - DEPTH requests must carry a single NSE_CM token set
    ///   ([`StreamError::InvalidExchangeType`]),
    /// - existing plus new tokens must fit the quota
    ///   ([`StreamError::QuotaExceeded`]).
    ///
    /// On success the tokens are appended to the registry.
    pub fn subscribe(
        &mut self,
        correlation_id: impl Into<String>,
        mode: SubscriptionMode,
        token_sets: Vec<TokenSet>,
    ) -> Result<SubscriptionRequest> {
        let request = SubscriptionRequest::new(Action::Subscribe, correlation_id, mode, token_sets);

        let requested = request.token_count();
        if requested == 0 {
            return Err(StreamError::InvalidArgument(
                "subscribe requires at least one token".into(),
            ));
        }

        if mode == SubscriptionMode::Depth {
            let token_list = &request.params.token_list;
            if token_list.len() != 1 || token_list[0].exchange_type != ExchangeType::NSE_CM {
                return Err(StreamError::InvalidExchangeType);
            }
        }

        let subscribed = self.total_tokens();
        if subscribed + requested > self.quota {
            return Err(StreamError::QuotaExceeded {
                limit: self.quota,
                subscribed,
                requested,
            });
        }

        let entry = self.entries.entry(mode).or_default();
        for set in &request.params.token_list {
            entry
                .entry(set.exchange_type)
                .or_default()
                .extend(set.tokens.iter().cloned());
        }

        Ok(request)
    }

    /// Clear every token held for `mode` and return the control frame to send.
    ///
    /// The entry for the mode is left in place, empty.
    pub fn unsubscribe(
        &mut self,
        correlation_id: impl Into<String>,
        mode: SubscriptionMode,
        token_sets: Vec<TokenSet>,
    ) -> SubscriptionRequest {
        self.entries.insert(mode, ModeEntry::new());
        SubscriptionRequest::new(Action::Unsubscribe, correlation_id, mode, token_sets)
    }

    /// Undo the append performed by [`subscribe`](Self::subscribe) for
    /// `request`. Must be called before any other mutation.
    pub fn revert(&mut self, request: &SubscriptionRequest) {
        if request.action != Action::Subscribe {
            return;
        }
        let Some(entry) = self.entries.get_mut(&request.params.mode) else {
            return;
        };
        for set in request.params.token_list.iter().rev() {
            if let Some(tokens) = entry.get_mut(&set.exchange_type) {
                let keep = tokens.len().saturating_sub(set.tokens.len());
                tokens.truncate(keep);
                if tokens.is_empty() {
                    entry.remove(&set.exchange_type);
                }
            }
        }
    }

    /// Total tokens held across every mode and exchange.
    pub fn total_tokens(&self) -> usize {
        self.entries
            .values()
            .flat_map(|entry| entry.values())
            .map(Vec::len)
            .sum()
    }

    /// Tokens held for `mode`, or `None` if the mode was never touched.
    pub fn tokens(&self, mode: SubscriptionMode) -> Option<&ModeEntry> {
        self.entries.get(&mode)
    }

    /// Number of tokens held for `mode`.
    pub fn mode_token_count(&self, mode: SubscriptionMode) -> usize {
        self.entries
            .get(&mode)
            .map_or(0, |entry| entry.values().map(Vec::len).sum())
    }

    /// `true` when no tokens are held.
    pub fn is_empty(&self) -> bool {
        self.total_tokens() == 0
    }

    /// Subscribe frames that restore every non-empty mode, one per mode.
    pub fn replay_requests(&self, correlation_id: &str) -> Vec<SubscriptionRequest> {
        self.entries
            .iter()
            .filter_map(|(&mode, entry)| {
                let token_list: Vec<TokenSet> = entry
                    .iter()
                    .filter(|(_, tokens)| !tokens.is_empty())
                    .map(|(&exchange_type, tokens)| TokenSet {
                        exchange_type,
                        tokens: tokens.clone(),
                    })
                    .collect();
                if token_list.is_empty() {
                    None
                } else {
                    Some(SubscriptionRequest::new(
                        Action::Subscribe,
                        correlation_id,
                        mode,
                        token_list,
                    ))
                }
            })
            .collect()
    }
}
