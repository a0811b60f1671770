//! User profile as seen by the pairing core
//!
//! Accounts are owned by the external auth/user service; the core only reads
//! the fields that influence matching and admission.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Gender declared by a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            other => Err(format!("unknown gender '{}'", other)),
        }
    }
}

/// Gender a user wants to be paired with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredGender {
    Male,
    Female,
    Other,
    #[default]
    Any,
}

impl PreferredGender {
    /// Whether someone of `gender` satisfies this preference
    pub fn accepts(self, gender: Gender) -> bool {
        match self {
            PreferredGender::Any => true,
            PreferredGender::Male => gender == Gender::Male,
            PreferredGender::Female => gender == Gender::Female,
            PreferredGender::Other => gender == Gender::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PreferredGender::Male => "male",
            PreferredGender::Female => "female",
            PreferredGender::Other => "other",
            PreferredGender::Any => "any",
        }
    }
}

impl fmt::Display for PreferredGender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreferredGender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(PreferredGender::Any),
            other => Gender::from_str(other).map(|g| match g {
                Gender::Male => PreferredGender::Male,
                Gender::Female => PreferredGender::Female,
                Gender::Other => PreferredGender::Other,
            }),
        }
    }
}

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub gender: Gender,
    pub preferred_gender: PreferredGender,
    pub interests: Vec<String>,
    pub banned: bool,
}

/// Trim interests, drop blanks and duplicates while keeping the declared order.
pub fn normalize_interests<I, S>(interests: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for interest in interests {
        let interest = interest.as_ref().trim();
        if interest.is_empty() || normalized.iter().any(|seen| seen == interest) {
            continue;
        }
        normalized.push(interest.to_string());
    }
    normalized
}
