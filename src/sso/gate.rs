//! Second-factor gate: decides whether a handshake may skip the 2FA challenge.
//!
//! The decision is a pure function of the handshake, whether there is a current
//! user, and the session context. Side effects live in the caller, which
//! dispatches once on the returned [`SecondFactorSkipDecision`].

use super::handshake::SsoHandshake;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipOutcome {
    Skip,
    Required,
    AlreadyCompleted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    NoCurrentUser,
    IsLogout,
    NotRequiredByRequest,
    ConfirmedDuringLogin,
    NeedsChallenge,
    /// The stashed challenge was answered after it was issued.
    ChallengePassed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SecondFactorSkipDecision {
    pub outcome: SkipOutcome,
    pub reason: SkipReason,
}

impl SecondFactorSkipDecision {
    #[must_use]
    pub const fn skip(reason: SkipReason) -> Self {
        Self {
            outcome: SkipOutcome::Skip,
            reason,
        }
    }

    #[must_use]
    pub const fn required() -> Self {
        Self {
            outcome: SkipOutcome::Required,
            reason: SkipReason::NeedsChallenge,
        }
    }

    #[must_use]
    pub const fn completed() -> Self {
        Self {
            outcome: SkipOutcome::AlreadyCompleted,
            reason: SkipReason::ChallengePassed,
        }
    }

    #[must_use]
    pub fn is_skip(&self) -> bool {
        self.outcome == SkipOutcome::Skip
    }
}

/// Session state relevant to the gate, read by the caller and passed in.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SessionContext {
    /// The login that created this session already passed a 2FA challenge.
    pub confirmed_2fa_during_login: bool,
    /// Unix microseconds of the most recent successful second-factor challenge.
    pub second_factor_confirmed_at: Option<i64>,
}

/// First matching rule wins; the order is part of the contract.
#[must_use]
pub fn skip_second_factor_auth<U: ?Sized>(
    handshake: &SsoHandshake,
    current_user: Option<&U>,
    session: &SessionContext,
) -> SecondFactorSkipDecision {
    if current_user.is_none() {
        SecondFactorSkipDecision::skip(SkipReason::NoCurrentUser)
    } else if handshake.logout() {
        SecondFactorSkipDecision::skip(SkipReason::IsLogout)
    } else if !handshake.require_2fa() {
        SecondFactorSkipDecision::skip(SkipReason::NotRequiredByRequest)
    } else if session.confirmed_2fa_during_login {
        SecondFactorSkipDecision::skip(SkipReason::ConfirmedDuringLogin)
    } else {
        SecondFactorSkipDecision::required()
    }
}

/// Decision for the follow-up request of a `Required` handshake stashed at
/// `challenged_at` (unix microseconds). The confirmation must be strictly later.
#[must_use]
pub fn resume_after_challenge(
    challenged_at: i64,
    session: &SessionContext,
) -> SecondFactorSkipDecision {
    match session.second_factor_confirmed_at {
        Some(confirmed_at) if confirmed_at > challenged_at => {
            SecondFactorSkipDecision::completed()
        }
        _ => SecondFactorSkipDecision::required(),
    }
}
