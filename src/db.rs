use chrono::NaiveDateTime;
use moka::future::Cache;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::{sync::Arc, time::Duration};

/// сколько записей показываем на странице (жанры, поиск, админ-списки)
pub const PAGE_SIZE: i64 = 10;

/// Ошибка хранилища с именем операции, на которой всё сломалось.
#[derive(Debug, thiserror::Error)]
#[error("db error during {op}")]
pub struct DbError {
    op: &'static str,
    #[source]
    source: sqlx::Error,
}

fn during(op: &'static str) -> impl FnOnce(sqlx::Error) -> DbError {
    move |source| DbError { op, source }
}

#[derive(Debug, Clone, FromRow)]
pub struct Genre {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Movie {
    pub id: i32,
    pub title: String,
    pub director: Option<String>,
    pub file_id: String,
}

/// Строка списка: фильм + агрегированные жанры ("драма,фантастика", может быть пустой).
#[derive(Debug, Clone, FromRow)]
pub struct MovieCard {
    pub id: i32,
    pub title: String,
    pub genres: String,
    pub director: Option<String>,
    pub file_id: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct HistoryEntry {
    pub title: String,
    pub genres: String,
    pub director: Option<String>,
    pub watched_at: NaiveDateTime,
}

const CARD_SELECT: &str = "\
    SELECT m.id, \
           m.title, \
           COALESCE(STRING_AGG(DISTINCT g.name, ','), '') AS genres, \
           m.director, \
           m.file_id \
    FROM movies m \
    LEFT JOIN movie_genres mg ON m.id = mg.movie_id \
    LEFT JOIN genres g ON mg.genre_id = g.id";

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
    // список жанров нужен почти каждой клавиатуре, держим его в кеше
    genres: Cache<(), Arc<Vec<Genre>>>,
}

impl Db {
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(during("connect"))?;
        let genres = Cache::builder()
            .max_capacity(1)
            .time_to_live(Duration::from_secs(300))
            .build();
        Ok(Self { pool, genres })
    }

    /// Идемпотентное создание схемы при старте.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS genres (
                id SERIAL PRIMARY KEY,
                name TEXT UNIQUE NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS movies (
                id SERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                director TEXT,
                file_id TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS movie_genres (
                movie_id INTEGER NOT NULL,
                genre_id INTEGER NOT NULL,
                PRIMARY KEY (movie_id, genre_id),
                FOREIGN KEY (movie_id) REFERENCES movies(id),
                FOREIGN KEY (genre_id) REFERENCES genres(id)
            )",
            "CREATE TABLE IF NOT EXISTS watch_history (
                id SERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                movie_id INTEGER NOT NULL,
                watched_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            "CREATE TABLE IF NOT EXISTS user_flow_states (
                user_id BIGINT NOT NULL,
                flow TEXT NOT NULL,
                state_json TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, flow)
            )",
        ];
        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(during("init_schema"))?;
        }
        Ok(())
    }

    /* ====== Жанры ====== */

    pub async fn get_or_create_genre(&self, name: &str) -> Result<i32, DbError> {
        let name = normalize_genre_name(name);
        let existing: Option<i32> = sqlx::query_scalar("SELECT id FROM genres WHERE name = $1")
            .bind(&name)
            .fetch_optional(&self.pool)
            .await
            .map_err(during("get_or_create_genre"))?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = sqlx::query_scalar("INSERT INTO genres (name) VALUES ($1) RETURNING id")
            .bind(&name)
            .fetch_one(&self.pool)
            .await
            .map_err(during("get_or_create_genre"))?;
        self.genres.invalidate(&()).await;
        Ok(id)
    }

    pub async fn genre_name(&self, genre_id: i32) -> Result<Option<String>, DbError> {
        sqlx::query_scalar("SELECT name FROM genres WHERE id = $1")
            .bind(genre_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(during("genre_name"))
    }

    pub async fn all_genres(&self) -> Result<Arc<Vec<Genre>>, DbError> {
        if let Some(cached) = self.genres.get(&()).await {
            return Ok(cached);
        }
        let rows: Vec<Genre> = sqlx::query_as("SELECT id, name FROM genres ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(during("all_genres"))?;
        let rows = Arc::new(rows);
        self.genres.insert((), rows.clone()).await;
        Ok(rows)
    }

    /// Удаляет жанр, если к нему не привязан ни один фильм.
    pub async fn delete_genre(&self, genre_id: i32) -> Result<bool, DbError> {
        let in_use: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM movie_genres WHERE genre_id = $1")
                .bind(genre_id)
                .fetch_one(&self.pool)
                .await
                .map_err(during("delete_genre"))?;
        if in_use > 0 {
            return Ok(false);
        }
        let res = sqlx::query("DELETE FROM genres WHERE id = $1")
            .bind(genre_id)
            .execute(&self.pool)
            .await
            .map_err(during("delete_genre"))?;
        self.genres.invalidate(&()).await;
        Ok(res.rows_affected() > 0)
    }

    /* ====== Фильмы ====== */

    pub async fn add_movie(
        &self,
        title: &str,
        director: Option<&str>,
        file_id: &str,
        genre_ids: &[i32],
    ) -> Result<i32, DbError> {
        let mut tx = self.pool.begin().await.map_err(during("add_movie"))?;
        let movie_id: i32 = sqlx::query_scalar(
            "INSERT INTO movies (title, director, file_id) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(title)
        .bind(director)
        .bind(file_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(during("add_movie"))?;
        for gid in genre_ids {
            sqlx::query(
                "INSERT INTO movie_genres (movie_id, genre_id) VALUES ($1, $2) \
                 ON CONFLICT (movie_id, genre_id) DO NOTHING",
            )
            .bind(movie_id)
            .bind(gid)
            .execute(&mut *tx)
            .await
            .map_err(during("add_movie"))?;
        }
        tx.commit().await.map_err(during("add_movie"))?;
        Ok(movie_id)
    }

    pub async fn movie_by_id(&self, movie_id: i32) -> Result<Option<Movie>, DbError> {
        sqlx::query_as("SELECT id, title, director, file_id FROM movies WHERE id = $1")
            .bind(movie_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(during("movie_by_id"))
    }

    pub async fn movie_genres(&self, movie_id: i32) -> Result<Vec<String>, DbError> {
        sqlx::query_scalar(
            "SELECT g.name FROM movie_genres mg \
             JOIN genres g ON mg.genre_id = g.id \
             WHERE mg.movie_id = $1 ORDER BY g.name",
        )
        .bind(movie_id)
        .fetch_all(&self.pool)
        .await
        .map_err(during("movie_genres"))
    }

    pub async fn random_movie(&self) -> Result<Option<MovieCard>, DbError> {
        let sql = format!("{CARD_SELECT} GROUP BY m.id ORDER BY RANDOM() LIMIT 1");
        sqlx::query_as(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(during("random_movie"))
    }

    pub async fn count_all_movies(&self) -> Result<i64, DbError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM movies")
            .fetch_one(&self.pool)
            .await
            .map_err(during("count_all_movies"))
    }

    pub async fn all_movies_paged(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<MovieCard>, DbError> {
        let sql = format!("{CARD_SELECT} GROUP BY m.id ORDER BY m.id LIMIT $1 OFFSET $2");
        sqlx::query_as(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(during("all_movies_paged"))
    }

    pub async fn count_movies_by_genre(&self, genre_id: i32) -> Result<i64, DbError> {
        sqlx::query_scalar(
            "SELECT COUNT(DISTINCT m.id) FROM movies m \
             JOIN movie_genres mg ON m.id = mg.movie_id \
             WHERE mg.genre_id = $1",
        )
        .bind(genre_id)
        .fetch_one(&self.pool)
        .await
        .map_err(during("count_movies_by_genre"))
    }

    pub async fn movies_by_genre(
        &self,
        genre_id: i32,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Movie>, DbError> {
        sqlx::query_as(
            "SELECT DISTINCT m.id, m.title, m.director, m.file_id \
             FROM movies m \
             JOIN movie_genres mg ON m.id = mg.movie_id \
             WHERE mg.genre_id = $1 \
             ORDER BY m.id LIMIT $2 OFFSET $3",
        )
        .bind(genre_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(during("movies_by_genre"))
    }

    pub async fn movies_by_genre_paged(
        &self,
        genre_id: i32,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<MovieCard>, DbError> {
        sqlx::query_as(
            "SELECT m.id, m.title, \
                    COALESCE(STRING_AGG(DISTINCT g.name, ','), '') AS genres, \
                    m.director, m.file_id \
             FROM movies m \
             JOIN movie_genres mg ON m.id = mg.movie_id \
             LEFT JOIN genres g ON mg.genre_id = g.id \
             WHERE mg.genre_id = $1 \
             GROUP BY m.id \
             ORDER BY m.id LIMIT $2 OFFSET $3",
        )
        .bind(genre_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(during("movies_by_genre_paged"))
    }

    /// Поиск по названию, режиссёру или жанру (подстрока, без учёта регистра).
    pub async fn search_movies(&self, query: &str) -> Result<Vec<MovieCard>, DbError> {
        let pattern = format!("%{}%", query.trim().to_lowercase());
        let sql = format!(
            "{CARD_SELECT} \
             WHERE m.title ILIKE $1 OR m.director ILIKE $1 OR g.name ILIKE $1 \
             GROUP BY m.id ORDER BY m.title"
        );
        sqlx::query_as(&sql)
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(during("search_movies"))
    }

    /// Удаляет фильм вместе со связями и историей просмотров.
    pub async fn delete_movie(&self, movie_id: i32) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await.map_err(during("delete_movie"))?;
        sqlx::query("DELETE FROM watch_history WHERE movie_id = $1")
            .bind(movie_id)
            .execute(&mut *tx)
            .await
            .map_err(during("delete_movie"))?;
        sqlx::query("DELETE FROM movie_genres WHERE movie_id = $1")
            .bind(movie_id)
            .execute(&mut *tx)
            .await
            .map_err(during("delete_movie"))?;
        let res = sqlx::query("DELETE FROM movies WHERE id = $1")
            .bind(movie_id)
            .execute(&mut *tx)
            .await
            .map_err(during("delete_movie"))?;
        tx.commit().await.map_err(during("delete_movie"))?;
        Ok(res.rows_affected() > 0)
    }

    /// Полное обновление: название, режиссёр и перезапись набора жанров.
    pub async fn update_movie(
        &self,
        movie_id: i32,
        title: &str,
        director: Option<&str>,
        genre_ids: &[i32],
    ) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await.map_err(during("update_movie"))?;
        let exists: Option<i32> = sqlx::query_scalar("SELECT id FROM movies WHERE id = $1")
            .bind(movie_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(during("update_movie"))?;
        if exists.is_none() {
            return Ok(false);
        }
        sqlx::query("UPDATE movies SET title = $1, director = $2 WHERE id = $3")
            .bind(title)
            .bind(director)
            .bind(movie_id)
            .execute(&mut *tx)
            .await
            .map_err(during("update_movie"))?;
        sqlx::query("DELETE FROM movie_genres WHERE movie_id = $1")
            .bind(movie_id)
            .execute(&mut *tx)
            .await
            .map_err(during("update_movie"))?;
        for gid in genre_ids {
            sqlx::query(
                "INSERT INTO movie_genres (movie_id, genre_id) VALUES ($1, $2) \
                 ON CONFLICT (movie_id, genre_id) DO NOTHING",
            )
            .bind(movie_id)
            .bind(gid)
            .execute(&mut *tx)
            .await
            .map_err(during("update_movie"))?;
        }
        tx.commit().await.map_err(during("update_movie"))?;
        Ok(true)
    }

    /* ====== История просмотров ====== */

    pub async fn add_watch_history(&self, user_id: i64, movie_id: i32) -> Result<(), DbError> {
        sqlx::query("INSERT INTO watch_history (user_id, movie_id) VALUES ($1, $2)")
            .bind(user_id)
            .bind(movie_id)
            .execute(&self.pool)
            .await
            .map_err(during("add_watch_history"))?;
        Ok(())
    }

    pub async fn user_history(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>, DbError> {
        sqlx::query_as(
            "SELECT m.title, \
                    COALESCE(STRING_AGG(DISTINCT g.name, ','), '') AS genres, \
                    m.director, h.watched_at \
             FROM watch_history h \
             JOIN movies m ON h.movie_id = m.id \
             LEFT JOIN movie_genres mg ON m.id = mg.movie_id \
             LEFT JOIN genres g ON mg.genre_id = g.id \
             WHERE h.user_id = $1 \
             GROUP BY m.id, h.id \
             ORDER BY h.watched_at DESC \
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(during("user_history"))
    }

    /* ====== Состояния диалогов ====== */

    pub async fn flow_state_json(
        &self,
        user_id: i64,
        flow: &str,
    ) -> Result<Option<String>, DbError> {
        sqlx::query_scalar(
            "SELECT state_json FROM user_flow_states WHERE user_id = $1 AND flow = $2",
        )
        .bind(user_id)
        .bind(flow)
        .fetch_optional(&self.pool)
        .await
        .map_err(during("flow_state"))
    }

    /// Имена диалогов, у которых есть сохранённое состояние.
    pub async fn active_flows(&self, user_id: i64) -> Result<Vec<String>, DbError> {
        sqlx::query_scalar("SELECT flow FROM user_flow_states WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(during("active_flows"))
    }

    pub async fn set_flow_state_json(
        &self,
        user_id: i64,
        flow: &str,
        state_json: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO user_flow_states (user_id, flow, state_json) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, flow) DO UPDATE SET \
                 state_json = EXCLUDED.state_json, \
                 updated_at = CURRENT_TIMESTAMP",
        )
        .bind(user_id)
        .bind(flow)
        .bind(state_json)
        .execute(&self.pool)
        .await
        .map_err(during("set_flow_state"))?;
        Ok(())
    }

    pub async fn clear_flow_state(&self, user_id: i64, flow: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM user_flow_states WHERE user_id = $1 AND flow = $2")
            .bind(user_id)
            .bind(flow)
            .execute(&self.pool)
            .await
            .map_err(during("clear_flow_state"))?;
        Ok(())
    }

    pub async fn clear_flow_states(&self, user_id: i64, flows: &[&str]) -> Result<u64, DbError> {
        if flows.is_empty() {
            return Ok(0);
        }
        let flows: Vec<String> = flows.iter().map(|f| f.to_string()).collect();
        let res = sqlx::query(
            "DELETE FROM user_flow_states WHERE user_id = $1 AND flow = ANY($2)",
        )
        .bind(user_id)
        .bind(&flows)
        .execute(&self.pool)
        .await
        .map_err(during("clear_flow_states"))?;
        Ok(res.rows_affected())
    }
}

/// Жанры храним в нижнем регистре без обрамляющих пробелов.
pub fn normalize_genre_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genre_names_are_trimmed_and_lowercased() {
        assert_eq!(normalize_genre_name("  Драма "), "драма");
        assert_eq!(normalize_genre_name("Sci-Fi"), "sci-fi");
    }
}
