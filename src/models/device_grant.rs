//! Device authorization grant entity model

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "device_grants")]
pub struct Model {
    /// Secret polled by the device
    #[sea_orm(primary_key, auto_increment = false)]
    pub device_code: String,

    /// Eight-character code typed by the user, stored without the dash
    #[sea_orm(unique)]
    pub user_code: String,

    pub client_id: String,

    pub scope: Option<String>,

    pub verification_uri: String,

    /// Minimum seconds between polls
    pub interval_seconds: i32,

    /// See [`GrantState`]
    pub state: String,

    /// Set once a user approves or denies
    pub user_id: Option<Uuid>,

    pub issued_at: DateTimeWithTimeZone,

    pub expires_at: DateTimeWithTimeZone,

    pub last_polled_at: Option<DateTimeWithTimeZone>,

    pub decided_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// `pending → authorized → consumed`, `pending → denied`, and
/// `pending | authorized → expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    Pending,
    Authorized,
    Denied,
    Expired,
    Consumed,
}

impl GrantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantState::Pending => "pending",
            GrantState::Authorized => "authorized",
            GrantState::Denied => "denied",
            GrantState::Expired => "expired",
            GrantState::Consumed => "consumed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GrantState::Denied | GrantState::Expired | GrantState::Consumed
        )
    }
}

impl fmt::Display for GrantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(GrantState::Pending),
            "authorized" => Ok(GrantState::Authorized),
            "denied" => Ok(GrantState::Denied),
            "expired" => Ok(GrantState::Expired),
            "consumed" => Ok(GrantState::Consumed),
            other => Err(format!("unknown grant state '{other}'")),
        }
    }
}

impl Model {
    /// Unknown stored values are treated as expired.
    pub fn grant_state(&self) -> GrantState {
        self.state.parse().unwrap_or(GrantState::Expired)
    }
}
