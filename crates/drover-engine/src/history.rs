//! Conversation history with role-sequence validation, token accounting,
//! and oldest-first pruning.
//!
//! This is a plain struct: the agent owns exactly one `Mutex<History>`
//! and every mutation goes through it, so the invariants below hold
//! under concurrency by construction.
//!
//! Invariants:
//! - at most one System message, always first;
//! - the first non-system message is never a Tool;
//! - no two adjacent messages share a role, except Tool, which may
//!   repeat and may only follow an Assistant or another Tool;
//! - the token estimate equals `Σ(estimate(content) + overhead)`.

use tracing::info;

use drover_core::{Error, ErrorKind, Message, Result, Role};

/// Pluggable token estimator: text to a positive token count.
pub type TokenEstimator = Box<dyn Fn(&str) -> usize + Send>;

pub struct History {
    messages: Vec<Message>,
    estimated_tokens: usize,
    context_size: usize,
    estimator: Option<TokenEstimator>,
    overhead_per_message: usize,
}

impl History {
    pub fn new(context_size: usize) -> Self {
        Self::with_estimator(context_size, None, drover_core::config::DEFAULT_TEMPLATE_OVERHEAD_TOKENS)
    }

    /// `estimator` replaces the `max(1, len/4)` heuristic;
    /// `overhead_per_message` covers chat-template structural tokens.
    pub fn with_estimator(
        context_size: usize,
        estimator: Option<TokenEstimator>,
        overhead_per_message: usize,
    ) -> Self {
        Self {
            messages: Vec::new(),
            estimated_tokens: 0,
            context_size,
            estimator,
            overhead_per_message,
        }
    }

    /// Append a message after checking role-transition rules.
    pub fn add_message(&mut self, message: Message) -> Result<()> {
        self.validate_role_sequence(message.role)?;
        self.estimated_tokens += self.estimate(&message.content) + self.overhead_per_message;
        self.messages.push(message);
        Ok(())
    }

    /// Replace the leading System message, or insert one at the front.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let msg = Message::system(prompt);
        let has_system = self.messages.first().map(|m| m.role) == Some(Role::System);
        if has_system {
            let old = self.estimate(&self.messages[0].content) + self.overhead_per_message;
            self.estimated_tokens = self.estimated_tokens.saturating_sub(old);
            self.estimated_tokens += self.estimate(&msg.content) + self.overhead_per_message;
            self.messages[0] = msg;
        } else {
            self.estimated_tokens += self.estimate(&msg.content) + self.overhead_per_message;
            self.messages.insert(0, msg);
        }
    }

    /// Rollback hook for failed turns. Returns false on empty history.
    pub fn remove_last_message(&mut self) -> bool {
        match self.messages.pop() {
            Some(msg) => {
                let cost = self.estimate(&msg.content) + self.overhead_per_message;
                self.estimated_tokens = self.estimated_tokens.saturating_sub(cost);
                true
            }
            None => false,
        }
    }

    /// Remove the smallest prefix of non-system messages that brings the
    /// estimate down to `target_tokens`, keeping at least
    /// `min_messages_to_keep` newest messages. Returns the removed
    /// messages in their original order.
    pub fn prune_oldest_messages_until(
        &mut self,
        target_tokens: usize,
        min_messages_to_keep: usize,
    ) -> Vec<Message> {
        if self.messages.is_empty() {
            return Vec::new();
        }

        let first_removable = usize::from(self.messages[0].role == Role::System);

        let mut remove_count = 0;
        let mut tokens_to_subtract = 0;
        while self.estimated_tokens.saturating_sub(tokens_to_subtract) > target_tokens {
            if self.messages.len() - remove_count <= first_removable + min_messages_to_keep {
                break;
            }
            let idx = first_removable + remove_count;
            tokens_to_subtract +=
                self.estimate(&self.messages[idx].content) + self.overhead_per_message;
            remove_count += 1;
        }

        if remove_count == 0 {
            return Vec::new();
        }

        let removed: Vec<Message> = self
            .messages
            .drain(first_removable..first_removable + remove_count)
            .collect();
        self.estimated_tokens = self.estimated_tokens.saturating_sub(tokens_to_subtract);

        info!(
            removed = removed.len(),
            estimated_tokens = self.estimated_tokens,
            target_tokens,
            "pruned oldest history messages"
        );
        removed
    }

    /// Reinsert previously pruned messages after the system prompt.
    pub fn prepend_messages(&mut self, messages: &[Message]) {
        if messages.is_empty() {
            return;
        }
        let insert_at = usize::from(
            self.messages
                .first()
                .map(|m| m.role == Role::System)
                .unwrap_or(false),
        );
        for (offset, msg) in messages.iter().enumerate() {
            self.estimated_tokens += self.estimate(&msg.content) + self.overhead_per_message;
            self.messages.insert(insert_at + offset, msg.clone());
        }
    }

    /// Override the heuristic with an actual token count (e.g. KV usage
    /// plus the freshly tokenized prompt). Ignores zero.
    pub fn sync_token_estimate(&mut self, actual_total: usize) {
        if actual_total > 0 {
            self.estimated_tokens = actual_total;
        }
    }

    /// Value copy, released outside any lock the caller holds.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.estimated_tokens
    }

    pub fn is_context_exceeded(&self) -> bool {
        self.estimated_tokens > self.context_size
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.estimated_tokens = 0;
    }

    fn estimate(&self, text: &str) -> usize {
        if let Some(estimator) = &self.estimator {
            let count = estimator(text);
            if count > 0 {
                return count;
            }
        }
        (text.len() / 4).max(1)
    }

    fn validate_role_sequence(&self, role: Role) -> Result<()> {
        let Some(last) = self.messages.last() else {
            if role == Role::Tool {
                return Err(Error::new(
                    ErrorKind::InvalidMessageSequence,
                    "first message cannot be a tool response",
                ));
            }
            return Ok(());
        };

        if role == Role::System {
            return Err(Error::new(
                ErrorKind::InvalidMessageSequence,
                "system message only allowed at the beginning",
            ));
        }

        if role == Role::Tool {
            if !matches!(last.role, Role::Assistant | Role::Tool) {
                return Err(Error::new(
                    ErrorKind::InvalidMessageSequence,
                    "tool message must follow an assistant or tool message",
                ));
            }
            return Ok(());
        }

        if last.role == role {
            return Err(Error::new(
                ErrorKind::InvalidMessageSequence,
                "consecutive messages with the same role",
            ));
        }

        Ok(())
    }
}
