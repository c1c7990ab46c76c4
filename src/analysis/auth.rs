// SPDX-License-Identifier: Apache-2.0

//! Authentication-method audit
//!
//! Classifies each user's credential posture from login history and spots
//! users mid-migration from passwords to key pairs, plus back-and-forth
//! method flapping between consecutive logins.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Password-to-keypair migrations are considered settled once the last
/// password login is this old.
const MIGRATION_QUIET_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    Keypair,
    Other,
}

impl AuthMethod {
    /// Maps the source's `FIRST_AUTHENTICATION_FACTOR` value.
    pub fn from_factor(factor: &str) -> Self {
        match factor.to_uppercase().as_str() {
            "PASSWORD" => Self::Password,
            "RSA_KEYPAIR" => Self::Keypair,
            _ => Self::Other,
        }
    }
}

/// One login event, for transition analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginEvent {
    pub user: String,
    pub at: DateTime<Utc>,
    pub method: AuthMethod,
    pub success: bool,
}

/// Per-(user, method) aggregate as returned by the login summary query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthObservation {
    pub user: String,
    pub method: AuthMethod,
    pub logins: u64,
    pub last_login: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    PasswordOnly,
    KeypairOnly,
    /// Both methods seen, but the key pair is newer and the password has
    /// been quiet long enough to look like a migration in progress.
    MigratingToKeypair,
    BothActive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthProfile {
    pub user: String,
    pub password_logins: u64,
    pub last_password: Option<DateTime<Utc>>,
    pub keypair_logins: u64,
    pub last_keypair: Option<DateTime<Utc>>,
    pub other_logins: u64,
    pub total_logins: u64,
    pub status: AuthStatus,
}

/// A user switching authentication method between consecutive logins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodTransition {
    pub user: String,
    pub at: DateTime<Utc>,
    pub from: AuthMethod,
    pub to: AuthMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthReport {
    pub profiles: Vec<AuthProfile>,
    pub transitions: Vec<MethodTransition>,
}

/// Builds per-user profiles from summary observations, sorted by user.
///
/// Status is judged relative to the newest login in the input, not the wall
/// clock, so the same data always classifies the same way.
pub fn build_profiles(observations: &[AuthObservation]) -> Vec<AuthProfile> {
    let as_of = observations.iter().map(|o| o.last_login).max();
    let Some(as_of) = as_of else {
        return Vec::new();
    };

    let mut by_user: BTreeMap<&str, Vec<&AuthObservation>> = BTreeMap::new();
    for obs in observations {
        by_user.entry(obs.user.as_str()).or_default().push(obs);
    }

    by_user
        .into_iter()
        .map(|(user, observations)| {
            let mut profile = AuthProfile {
                user: user.to_string(),
                password_logins: 0,
                last_password: None,
                keypair_logins: 0,
                last_keypair: None,
                other_logins: 0,
                total_logins: 0,
                status: AuthStatus::PasswordOnly,
            };
            for obs in observations {
                profile.total_logins += obs.logins;
                match obs.method {
                    AuthMethod::Password => {
                        profile.password_logins += obs.logins;
                        profile.last_password =
                            profile.last_password.max(Some(obs.last_login));
                    }
                    AuthMethod::Keypair => {
                        profile.keypair_logins += obs.logins;
                        profile.last_keypair = profile.last_keypair.max(Some(obs.last_login));
                    }
                    AuthMethod::Other => profile.other_logins += obs.logins,
                }
            }
            profile.status = classify(&profile, as_of);
            profile
        })
        .collect()
}

fn classify(profile: &AuthProfile, as_of: DateTime<Utc>) -> AuthStatus {
    match (profile.last_password, profile.last_keypair) {
        (Some(_), None) => AuthStatus::PasswordOnly,
        (None, Some(_)) => AuthStatus::KeypairOnly,
        (Some(pw), Some(kp)) => {
            if kp > pw && as_of - pw > Duration::days(MIGRATION_QUIET_DAYS) {
                AuthStatus::MigratingToKeypair
            } else {
                AuthStatus::BothActive
            }
        }
        // Only `Other` logins observed; treat as password-equivalent risk.
        (None, None) => AuthStatus::PasswordOnly,
    }
}

/// Flags every consecutive-login method change per user, successful logins
/// only, in chronological order.
pub fn method_transitions(events: &[LoginEvent]) -> Vec<MethodTransition> {
    let mut by_user: BTreeMap<&str, Vec<&LoginEvent>> = BTreeMap::new();
    for event in events.iter().filter(|e| e.success) {
        by_user.entry(event.user.as_str()).or_default().push(event);
    }

    let mut transitions = Vec::new();
    for (_, mut user_events) in by_user {
        user_events.sort_by_key(|e| e.at);
        for pair in user_events.windows(2) {
            if pair[0].method != pair[1].method {
                transitions.push(MethodTransition {
                    user: pair[1].user.clone(),
                    at: pair[1].at,
                    from: pair[0].method.clone(),
                    to: pair[1].method.clone(),
                });
            }
        }
    }
    transitions
}
