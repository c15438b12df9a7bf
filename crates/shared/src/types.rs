//! Core domain types used across FleetHub

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Billing state of a project.
///
/// `Trial` projects run unbilled until the owning team's trial window closes.
/// The trial housekeeper is the only component that moves a project out of
/// `Trial`; `Billed` and `NotBilled` are terminal as far as billing is
/// concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingState {
    Trial,
    Billed,
    NotBilled,
}

impl BillingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Billed => "billed",
            Self::NotBilled => "not_billed",
        }
    }
}

impl std::str::FromStr for BillingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(Self::Trial),
            "billed" => Ok(Self::Billed),
            "not_billed" => Ok(Self::NotBilled),
            _ => Err(format!("Invalid billing state: {}", s)),
        }
    }
}

/// Operational state of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    Running,
    Suspended,
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
        }
    }
}

impl std::str::FromStr for ProjectState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "suspended" => Ok(Self::Suspended),
            _ => Err(format!("Invalid project state: {}", s)),
        }
    }
}

/// User role within a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Owner,
    Member,
    Viewer,
}

impl TeamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A tenant team
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub plan_id: Uuid,
    /// Set only for teams created under trial mode; cleared by the trial
    /// housekeeper once the team has been processed.
    pub trial_ends_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Team {
    /// Whether the team is currently inside its trial window
    pub fn in_trial_window(&self, now: OffsetDateTime) -> bool {
        self.trial_ends_at.map(|ends| ends > now).unwrap_or(false)
    }
}

/// Team plan (team type), defining the free device allocation.
///
/// Product/price identifiers for member and device seats live in billing
/// configuration, keyed by plan name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeamPlan {
    pub id: Uuid,
    pub name: String,
    /// Devices covered by the plan before extra device billing kicks in
    pub device_free_allocation: i32,
    pub created_at: OffsetDateTime,
}

/// An edge device enrolled in a team
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub created_at: OffsetDateTime,
}

/// A project owned by a team
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub project_type: String,
    pub state: ProjectState,
    pub billing_state: BillingState,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Link between a team and its Stripe subscription (1:1)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub team_id: Uuid,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub created_at: OffsetDateTime,
}

/// A platform user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: OffsetDateTime,
}

/// Team membership row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeamMember {
    pub id: Uuid,
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub role: TeamRole,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Trial configuration
// =============================================================================

/// Platform settings keys for trial mode.
///
/// These live in the `platform_settings` table and are re-read on every
/// housekeeping run so that toggling trial mode takes effect without a
/// restart.
pub mod settings_keys {
    pub const TRIAL_MODE: &str = "team:trial-mode";
    pub const TRIAL_DURATION: &str = "team:trial-mode:duration";
    pub const TRIAL_PROJECT_TYPE: &str = "team:trial-mode:project-type";
}

/// Global trial-mode configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialSettings {
    pub enabled: bool,
    /// Length of the trial window, in days, starting at team creation
    pub duration_days: i64,
    /// Project type permitted to run during a trial; `None` permits any type
    pub project_type: Option<String>,
}

impl Default for TrialSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_days: 0,
            project_type: None,
        }
    }
}

impl TrialSettings {
    /// Whether a project of the given type may run during a trial
    pub fn permits(&self, project_type: &str) -> bool {
        self.project_type
            .as_deref()
            .map(|permitted| permitted == project_type)
            .unwrap_or(true)
    }

    /// Trial expiry for a team created at `now`
    pub fn trial_end_from(&self, now: OffsetDateTime) -> OffsetDateTime {
        now + Duration::days(self.duration_days)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn team_with_trial(ends_at: Option<OffsetDateTime>) -> Team {
        let now = OffsetDateTime::UNIX_EPOCH;
        Team {
            id: Uuid::new_v4(),
            name: "acme".to_string(),
            slug: "acme".to_string(),
            plan_id: Uuid::new_v4(),
            trial_ends_at: ends_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn trial_window_requires_future_expiry() {
        let now = OffsetDateTime::UNIX_EPOCH + Duration::days(100);

        let team = team_with_trial(Some(now + Duration::days(1)));
        assert!(team.in_trial_window(now));

        let team = team_with_trial(Some(now - Duration::days(1)));
        assert!(!team.in_trial_window(now));

        let team = team_with_trial(None);
        assert!(!team.in_trial_window(now));
    }

    #[test]
    fn trial_settings_permit_any_type_when_unrestricted() {
        let settings = TrialSettings {
            enabled: true,
            duration_days: 14,
            project_type: None,
        };
        assert!(settings.permits("edge"));
        assert!(settings.permits("cloud"));

        let restricted = TrialSettings {
            project_type: Some("edge".to_string()),
            ..settings
        };
        assert!(restricted.permits("edge"));
        assert!(!restricted.permits("cloud"));
    }

    #[test]
    fn trial_end_is_duration_days_after_creation() {
        let settings = TrialSettings {
            enabled: true,
            duration_days: 14,
            project_type: None,
        };
        let created = OffsetDateTime::UNIX_EPOCH;
        assert_eq!(
            settings.trial_end_from(created),
            created + Duration::days(14)
        );
    }

    #[test]
    fn billing_state_round_trips_through_str() {
        for state in [
            BillingState::Trial,
            BillingState::Billed,
            BillingState::NotBilled,
        ] {
            assert_eq!(state.as_str().parse::<BillingState>(), Ok(state));
        }
        assert!("paused".parse::<BillingState>().is_err());
    }
}
