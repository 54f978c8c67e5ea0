//! Game snapshot wire model.

use serde::{Deserialize, Serialize};

/// Player progression values carried in every snapshot.
///
/// Fields missing from a server payload take their starting values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerInfo {
    pub player_level: u32,
    pub money: f64,
    pub click_reward_base: f64,
    pub click_multiplier: f64,
    pub upgrade_cost: f64,
    pub training_count: u64,
}

impl Default for PlayerInfo {
    fn default() -> Self {
        Self {
            player_level: 1,
            money: 0.0,
            click_reward_base: 1.0,
            click_multiplier: 1.0,
            upgrade_cost: 0.0,
            training_count: 0,
        }
    }
}

/// Unlock/level state of one assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantState {
    pub id: u32,
    pub unlocked: bool,
    pub level: u32,
}

/// Completion state of one challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeState {
    pub id: u32,
    pub completed: bool,
}

/// Flat serializable representation of game state exchanged with the server.
///
/// `last_update_time` is stamped by the server on every save and only ever
/// read back on load; it is never sent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    #[serde(default)]
    pub player_info: PlayerInfo,
    #[serde(default)]
    pub assistants: Vec<AssistantState>,
    #[serde(default)]
    pub challenges: Vec<ChallengeState>,
    #[serde(default, skip_serializing)]
    pub last_update_time: Option<String>,
}

impl GameSnapshot {
    /// Decode a snapshot from a server `data` payload.
    ///
    /// `null` means the player has no saved game yet.
    pub fn from_server_data(data: &serde_json::Value) -> Result<Option<Self>, serde_json::Error> {
        if data.is_null() {
            return Ok(None);
        }
        serde_json::from_value(data.clone()).map(Some)
    }
}

/// Source of snapshots for the sync scheduler.
///
/// Returning `None` means "not ready yet", which is not an error.
pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self) -> Option<GameSnapshot>;
}

/// Receives state restored from the server and accepted offline rewards.
pub trait SnapshotConsumer: Send + Sync {
    fn apply_snapshot(&self, snapshot: &GameSnapshot);

    fn apply_offline_reward(&self, amount: u64);
}
