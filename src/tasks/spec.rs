//! # Task submission and validation.
//!
//! [`TaskRequest`] is the raw operator input. [`TaskRequest::validate`] turns it into a
//! [`TaskPlan`] or rejects it before anything is created:
//!
//! - blank target → [`ValidationError::EmptyTarget`]
//! - unknown kind → [`ValidationError::UnknownTargetKind`]
//! - no non-blank message → [`ValidationError::EmptyMessages`]
//! - delay below the minimum → [`ValidationError::DelayTooShort`]

use std::sync::Arc;
use std::time::Duration;

use crate::error::ValidationError;
use crate::transport::{Recipient, TargetKind};

/// A send job as submitted by an operator.
///
/// # Example
/// ```
/// use loopcast::TaskRequest;
///
/// let req = TaskRequest::new("9190000000", "user", ["a", "b"], 5).with_prefix("Hi");
/// assert_eq!(req.messages.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    /// Phone number or group id.
    pub target: String,
    /// `user` or `group`.
    pub kind: String,
    /// Messages sent in order, cyclically.
    pub messages: Vec<String>,
    /// Seconds between two sends.
    pub delay_secs: u64,
    /// Text prepended to every message, separated by one space.
    pub prefix: Option<String>,
}

impl TaskRequest {
    /// Request without prefix.
    pub fn new<I, S>(
        target: impl Into<String>,
        kind: impl Into<String>,
        messages: I,
        delay_secs: u64,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: target.into(),
            kind: kind.into(),
            messages: messages.into_iter().map(Into::into).collect(),
            delay_secs,
            prefix: None,
        }
    }

    /// Sets the prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Checks the request and produces the runtime plan.
    pub(crate) fn validate(self, min_delay_secs: u64) -> Result<TaskPlan, ValidationError> {
        let target = self.target.trim();
        if target.is_empty() {
            return Err(ValidationError::EmptyTarget);
        }
        let kind: TargetKind = self.kind.parse()?;

        let messages: Vec<String> = self
            .messages
            .into_iter()
            .filter(|m| !m.trim().is_empty())
            .collect();
        if messages.is_empty() {
            return Err(ValidationError::EmptyMessages);
        }

        if self.delay_secs < min_delay_secs {
            return Err(ValidationError::DelayTooShort {
                min: min_delay_secs,
                got: self.delay_secs,
            });
        }

        let prefix = self
            .prefix
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(TaskPlan {
            recipient: Recipient::new(target, kind),
            messages: messages.into(),
            delay: Duration::from_secs(self.delay_secs),
            prefix,
        })
    }
}

/// A validated request.
#[derive(Debug, Clone)]
pub(crate) struct TaskPlan {
    pub(crate) recipient: Recipient,
    pub(crate) messages: Arc<[String]>,
    pub(crate) delay: Duration,
    pub(crate) prefix: Option<String>,
}

impl TaskPlan {
    /// Text actually sent for message `index`.
    pub(crate) fn compose(&self, index: usize) -> String {
        let body = &self.messages[index % self.messages.len()];
        match &self.prefix {
            Some(prefix) => format!("{prefix} {body}"),
            None => body.clone(),
        }
    }
}
