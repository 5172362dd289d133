//! Row identifiers.
//!
//! All ids are minted here as UUIDv7, so rows sort by creation time. They
//! never come from user input: tokens, not ids, identify a report to a reader.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an anonymous visitor session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

/// Identifier of a report (one per session).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(Uuid);

/// Identifier of a persisted risk result row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskResultId(Uuid);

macro_rules! row_id {
    ($t:ty) => {
        impl $t {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an id read back from storage.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

row_id!(SessionId);
row_id!(ReportId);
row_id!(RiskResultId);
