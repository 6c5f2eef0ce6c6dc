use crate::db::{Db, DbError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/* Диалоговое состояние живёт в user_flow_states (user_id, flow) -> JSON,
   чтобы незавершённые сценарии переживали рестарт процесса. */

pub const FLOW_ADD: &str = "add";
pub const FLOW_EDIT: &str = "edit";
pub const FLOW_SEARCH: &str = "search";
pub const FLOW_ADD_GENRE: &str = "add_genre";
pub const FLOW_ADMIN: &str = "admin";

/// Все сценарии, которые сбрасывает /cancel.
pub const CANCELLABLE: [&str; 4] = [FLOW_ADD, FLOW_EDIT, FLOW_SEARCH, FLOW_ADD_GENRE];

/// Кому отдать обычное текстовое сообщение, когда активно несколько
/// диалогов: редактирование, затем ввод жанра, затем добавление, затем поиск.
pub const TEXT_FLOW_ORDER: [&str; 4] = [FLOW_EDIT, FLOW_ADD_GENRE, FLOW_ADD, FLOW_SEARCH];

pub fn first_active_flow(active: &[String]) -> Option<&'static str> {
    TEXT_FLOW_ORDER
        .into_iter()
        .find(|flow| active.iter().any(|a| a.as_str() == *flow))
}

/// Добавление фильма: /add (реплаем на видео/файл) -> название -> режиссёр -> жанры.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum AddFlow {
    WaitingTitle {
        file_id: String,
    },
    WaitingDirector {
        file_id: String,
        title: String,
    },
    ChoosingGenres {
        file_id: String,
        title: String,
        director: String,
        selected: Vec<i32>,
    },
}

/// Редактирование фильма: выбор -> название -> режиссёр -> жанры.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum EditFlow {
    WaitingTitle {
        movie_id: i32,
        orig_title: String,
        orig_director: String,
        orig_genres: Vec<String>,
    },
    WaitingDirector {
        movie_id: i32,
        orig_title: String,
        orig_director: String,
        orig_genres: Vec<String>,
        new_title: String,
    },
    ChoosingGenres {
        movie_id: i32,
        orig_title: String,
        orig_director: String,
        orig_genres: Vec<String>,
        new_title: String,
        new_director: String,
        selected: Vec<i32>,
    },
}

/// Маркерные состояния: ждём поисковый запрос / название нового жанра.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pending {
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AdminState {
    verified: bool,
}

impl Db {
    pub async fn flow_state<T: DeserializeOwned>(
        &self,
        user_id: i64,
        flow: &str,
    ) -> Result<Option<T>, DbError> {
        let Some(json) = self.flow_state_json(user_id, flow).await? else {
            return Ok(None);
        };
        // битый JSON читается как отсутствие состояния
        Ok(serde_json::from_str(&json).ok())
    }

    pub async fn set_flow_state<T: Serialize>(
        &self,
        user_id: i64,
        flow: &str,
        state: &T,
    ) -> Result<(), DbError> {
        let json = serde_json::to_string(state).unwrap_or_else(|_| "{}".to_string());
        self.set_flow_state_json(user_id, flow, &json).await
    }

    pub async fn is_admin_verified(&self, user_id: i64) -> Result<bool, DbError> {
        let state: Option<AdminState> = self.flow_state(user_id, FLOW_ADMIN).await?;
        Ok(state.map(|s| s.verified).unwrap_or(false))
    }

    pub async fn set_admin_verified(&self, user_id: i64) -> Result<(), DbError> {
        self.set_flow_state(user_id, FLOW_ADMIN, &AdminState { verified: true })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_flow_round_trips_through_json() {
        let state = AddFlow::ChoosingGenres {
            file_id: "BAAC123".into(),
            title: "Интерстеллар".into(),
            director: "Нолан".into(),
            selected: vec![1, 3],
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"stage\":\"choosing_genres\""), "{json}");
        let back: AddFlow = serde_json::from_str(&json).unwrap();
        match back {
            AddFlow::ChoosingGenres { selected, .. } => assert_eq!(selected, vec![1, 3]),
            other => panic!("unexpected stage: {other:?}"),
        }
    }

    #[test]
    fn genre_name_input_beats_pending_add_dialogue() {
        let active = vec![FLOW_ADD.to_string(), FLOW_ADD_GENRE.to_string()];
        assert_eq!(first_active_flow(&active), Some(FLOW_ADD_GENRE));
        assert_eq!(first_active_flow(&[FLOW_SEARCH.to_string()]), Some(FLOW_SEARCH));
        assert_eq!(first_active_flow(&[FLOW_ADMIN.to_string()]), None);
        assert_eq!(first_active_flow(&[]), None);
    }

    #[test]
    fn garbage_state_json_does_not_deserialize() {
        let res: Result<EditFlow, _> = serde_json::from_str("{\"stage\":\"nope\"}");
        assert!(res.is_err());
    }
}
