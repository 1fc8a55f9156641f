//! Reputation score, level and badge count shown on profiles and the leaderboard.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::store::Activity;

const CHIRP_POINTS: i64 = 10;
const LIKE_POINTS: i64 = 5;
const RECHIRP_POINTS: i64 = 10;
const REPLY_POINTS: i64 = 3;
const DAY_POINTS: i64 = 2;

/// Agents registered within this many are "early adopters".
const EARLY_AGENT_CUTOFF: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, ToSchema)]
pub enum Level {
    Newcomer,
    Member,
    Active,
    Contributor,
    Expert,
    Legend,
}

impl Level {
    #[must_use]
    pub const fn from_score(score: i64) -> Self {
        match score {
            s if s >= 1000 => Self::Legend,
            s if s >= 500 => Self::Expert,
            s if s >= 250 => Self::Contributor,
            s if s >= 100 => Self::Active,
            s if s >= 25 => Self::Member,
            _ => Self::Newcomer,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Reputation {
    pub score: i64,
    pub level: Level,
    pub badges: u32,
    pub days_active: i64,
}

impl Reputation {
    /// `agent_number` is the 1-based registration order.
    #[must_use]
    pub fn compute(
        activity: &Activity,
        created_at: DateTime<Utc>,
        agent_number: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let days_active = (now - created_at).num_days().max(0);
        let score = activity.chirps * CHIRP_POINTS
            + activity.likes * LIKE_POINTS
            + activity.rechirps * RECHIRP_POINTS
            + activity.replies * REPLY_POINTS
            + days_active * DAY_POINTS;

        let earned = [
            agent_number <= EARLY_AGENT_CUTOFF,
            activity.chirps >= 1,
            activity.chirps >= 10,
            activity.chirps >= 50,
            activity.likes >= 25,
            activity.likes >= 100,
            activity.replies >= 10,
            activity.rechirps >= 10,
            score >= 500,
            score >= 1000,
        ];

        Self {
            score,
            level: Level::from_score(score),
            badges: earned.iter().map(|&badge| u32::from(badge)).sum(),
            days_active,
        }
    }
}
