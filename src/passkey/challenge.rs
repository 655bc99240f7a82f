//! Single-use ceremony challenges
//!
//! At most one challenge is outstanding per `(subject, ceremony)`; issuing a
//! new one replaces the previous. A challenge is burned by the first
//! `consume` that reaches it, whether that consume succeeds or not.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use log::debug;
use subtle::ConstantTimeEq;

use crate::error::{ErrorKind, PasskeyError, Result};
use crate::utils::crypto::random_bytes;
use crate::webauthn::encoding;

/// Challenge length in bytes
pub const CHALLENGE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CeremonyType {
    Registration,
    Authentication,
}

impl fmt::Display for CeremonyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        })
    }
}

/// An issued challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub value: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    /// Base64url form sent to the browser
    #[must_use]
    pub fn encoded(&self) -> String {
        encoding::encode(&self.value)
    }
}

#[derive(Debug)]
struct PendingChallenge {
    value: Vec<u8>,
    issued_at: DateTime<Utc>,
    consumed: bool,
}

pub struct ChallengeManager {
    timeout: Duration,
    pending: Mutex<HashMap<(String, CeremonyType), PendingChallenge>>,
}

impl ChallengeManager {
    #[must_use]
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::milliseconds(i64::from(
                u32::try_from(timeout_ms).unwrap_or(u32::MAX),
            )),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh challenge for `subject`, replacing any outstanding one
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the random source fails
    pub fn issue(&self, subject: &str, ceremony: CeremonyType) -> Result<Challenge> {
        self.issue_at(subject, ceremony, Utc::now())
    }

    /// [`Self::issue`] with an explicit issue time
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the random source fails
    pub fn issue_at(
        &self,
        subject: &str,
        ceremony: CeremonyType,
        now: DateTime<Utc>,
    ) -> Result<Challenge> {
        let value = random_bytes(CHALLENGE_LEN)
            .map_err(|e| PasskeyError::storage(format!("Cannot generate challenge: {e}")))?;

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let timeout = self.timeout;
        pending.retain(|_, entry| now - entry.issued_at <= timeout);
        let replaced = pending.insert(
            (subject.to_string(), ceremony),
            PendingChallenge {
                value: value.clone(),
                issued_at: now,
                consumed: false,
            },
        );
        if replaced.is_some_and(|old| !old.consumed) {
            debug!("Replaced outstanding {ceremony} challenge for {subject}");
        }

        Ok(Challenge {
            value,
            issued_at: now,
            expires_at: now + timeout,
        })
    }

    /// Consume the outstanding challenge for `subject` if `presented` matches
    ///
    /// # Errors
    /// - `ChallengeAlreadyUsed` if this exact challenge was already consumed
    /// - `ChallengeMismatch` if nothing is outstanding or the value differs
    /// - `ChallengeExpired` if the challenge is older than the timeout
    pub fn consume(&self, subject: &str, ceremony: CeremonyType, presented: &[u8]) -> Result<()> {
        self.consume_at(subject, ceremony, presented, Utc::now())
    }

    /// [`Self::consume`] evaluated at an explicit time
    ///
    /// # Errors
    /// See [`Self::consume`]
    pub fn consume_at(
        &self,
        subject: &str,
        ceremony: CeremonyType,
        presented: &[u8],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = pending.get_mut(&(subject.to_string(), ceremony)) else {
            return Err(PasskeyError::new(
                ErrorKind::ChallengeMismatch,
                format!("No outstanding {ceremony} challenge for {subject}"),
            ));
        };

        let matches =
            entry.value.len() == presented.len() && bool::from(entry.value.ct_eq(presented));
        if entry.consumed {
            return Err(if matches {
                PasskeyError::new(
                    ErrorKind::ChallengeAlreadyUsed,
                    format!("{ceremony} challenge for {subject} was already used"),
                )
            } else {
                PasskeyError::new(
                    ErrorKind::ChallengeMismatch,
                    format!("Presented {ceremony} challenge does not match"),
                )
            });
        }

        entry.consumed = true;

        if !matches {
            return Err(PasskeyError::new(
                ErrorKind::ChallengeMismatch,
                format!("Presented {ceremony} challenge does not match"),
            ));
        }

        let age = now - entry.issued_at;
        if age > self.timeout {
            return Err(PasskeyError::new(
                ErrorKind::ChallengeExpired,
                format!(
                    "{ceremony} challenge expired {} ms ago",
                    (age - self.timeout).num_milliseconds()
                ),
            ));
        }

        Ok(())
    }

    /// Number of tracked challenges, consumed ones included
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
