use std::fmt;

/* Формат callback data: токены через '|', первый токен — действие.
   Старые сообщения с кнопками продолжают жить в чатах, поэтому формат
   менять нельзя. */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// страница фильмов жанра (пользовательский каталог)
    GenrePage { genre_id: i32, page: i64 },
    /// назад к списку жанров
    GenresList,
    /// прислать фильм
    Movie { movie_id: i32 },
    /// прислать диплинк на фильм
    CopyLink { movie_id: i32 },
    /// тумблер жанра в диалоге добавления
    AddGenreToggle { genre_id: i32 },
    AddGenresDone,
    /// тумблер жанра в диалоге редактирования
    EditGenreToggle { genre_id: i32 },
    EditGenresDone,
    EditGenresSkip,
    EditCancel,
    EditPage { page: i64 },
    EditPick { movie_id: i32, page: i64 },
    DeletePage { page: i64 },
    DeletePick { movie_id: i32, page: i64 },
    DeleteConfirm { movie_id: i32, page: i64 },
    DeleteAbort { page: i64 },
    GenreDelete { genre_id: i32 },
    AdminMoviesPage { page: i64 },
    AdminMoviesGenres,
    AdminMoviesByGenre { genre_id: i32, page: i64 },
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.split('|');
        let head = parts.next()?;
        let args: Vec<&str> = parts.collect();
        let arg_i32 = |i: usize| args.get(i).and_then(|s| s.parse::<i32>().ok());
        let arg_i64 = |i: usize| args.get(i).and_then(|s| s.parse::<i64>().ok());

        Some(match head {
            "genre" => Self::GenrePage {
                genre_id: arg_i32(0)?,
                page: arg_i64(1)?,
            },
            "genres_list" => Self::GenresList,
            "movie" => Self::Movie { movie_id: arg_i32(0)? },
            "copylink" => Self::CopyLink { movie_id: arg_i32(0)? },
            "addg" => Self::AddGenreToggle { genre_id: arg_i32(0)? },
            "addg_done" => Self::AddGenresDone,
            "editg" => Self::EditGenreToggle { genre_id: arg_i32(0)? },
            "editg_done" => Self::EditGenresDone,
            "editg_skip" => Self::EditGenresSkip,
            "editg_cancel" => Self::EditCancel,
            "editpage" => Self::EditPage { page: arg_i64(0)? },
            "editpick" => Self::EditPick {
                movie_id: arg_i32(0)?,
                page: arg_i64(1)?,
            },
            "delpage" => Self::DeletePage { page: arg_i64(0)? },
            "delpick" => Self::DeletePick {
                movie_id: arg_i32(0)?,
                page: arg_i64(1)?,
            },
            "delyes" => Self::DeleteConfirm {
                movie_id: arg_i32(0)?,
                page: arg_i64(1)?,
            },
            "delno" => Self::DeleteAbort { page: arg_i64(0)? },
            "genre_del" => Self::GenreDelete { genre_id: arg_i32(0)? },
            "adm_movies" => Self::AdminMoviesPage { page: arg_i64(0)? },
            "adm_movies_genres" => Self::AdminMoviesGenres,
            "adm_movies_g" => Self::AdminMoviesByGenre {
                genre_id: arg_i32(0)?,
                page: arg_i64(1)?,
            },
            _ => return None,
        })
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenrePage { genre_id, page } => write!(f, "genre|{genre_id}|{page}"),
            Self::GenresList => write!(f, "genres_list"),
            Self::Movie { movie_id } => write!(f, "movie|{movie_id}"),
            Self::CopyLink { movie_id } => write!(f, "copylink|{movie_id}"),
            Self::AddGenreToggle { genre_id } => write!(f, "addg|{genre_id}"),
            Self::AddGenresDone => write!(f, "addg_done"),
            Self::EditGenreToggle { genre_id } => write!(f, "editg|{genre_id}"),
            Self::EditGenresDone => write!(f, "editg_done"),
            Self::EditGenresSkip => write!(f, "editg_skip"),
            Self::EditCancel => write!(f, "editg_cancel"),
            Self::EditPage { page } => write!(f, "editpage|{page}"),
            Self::EditPick { movie_id, page } => write!(f, "editpick|{movie_id}|{page}"),
            Self::DeletePage { page } => write!(f, "delpage|{page}"),
            Self::DeletePick { movie_id, page } => write!(f, "delpick|{movie_id}|{page}"),
            Self::DeleteConfirm { movie_id, page } => write!(f, "delyes|{movie_id}|{page}"),
            Self::DeleteAbort { page } => write!(f, "delno|{page}"),
            Self::GenreDelete { genre_id } => write!(f, "genre_del|{genre_id}"),
            Self::AdminMoviesPage { page } => write!(f, "adm_movies|{page}"),
            Self::AdminMoviesGenres => write!(f, "adm_movies_genres"),
            Self::AdminMoviesByGenre { genre_id, page } => {
                write!(f, "adm_movies_g|{genre_id}|{page}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant() {
        let actions = [
            CallbackAction::GenrePage { genre_id: 3, page: 2 },
            CallbackAction::GenresList,
            CallbackAction::Movie { movie_id: 17 },
            CallbackAction::CopyLink { movie_id: 17 },
            CallbackAction::AddGenreToggle { genre_id: 5 },
            CallbackAction::AddGenresDone,
            CallbackAction::EditGenreToggle { genre_id: 5 },
            CallbackAction::EditGenresDone,
            CallbackAction::EditGenresSkip,
            CallbackAction::EditCancel,
            CallbackAction::EditPage { page: 0 },
            CallbackAction::EditPick { movie_id: 9, page: 1 },
            CallbackAction::DeletePage { page: 4 },
            CallbackAction::DeletePick { movie_id: 9, page: 1 },
            CallbackAction::DeleteConfirm { movie_id: 9, page: 1 },
            CallbackAction::DeleteAbort { page: 1 },
            CallbackAction::GenreDelete { genre_id: 2 },
            CallbackAction::AdminMoviesPage { page: 3 },
            CallbackAction::AdminMoviesGenres,
            CallbackAction::AdminMoviesByGenre { genre_id: 2, page: 3 },
        ];
        for a in actions {
            assert_eq!(CallbackAction::parse(&a.to_string()), Some(a));
        }
    }

    #[test]
    fn wire_format_matches_legacy_buttons() {
        assert_eq!(
            CallbackAction::parse("genre|4|0"),
            Some(CallbackAction::GenrePage { genre_id: 4, page: 0 })
        );
        assert_eq!(
            CallbackAction::GenrePage { genre_id: 4, page: 0 }.to_string(),
            "genre|4|0"
        );
        assert_eq!(
            CallbackAction::AdminMoviesByGenre { genre_id: 1, page: 2 }.to_string(),
            "adm_movies_g|1|2"
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        for bad in ["", "genre", "genre|x|0", "movie|", "delyes|1", "unknown|1"] {
            assert_eq!(CallbackAction::parse(bad), None, "{bad:?}");
        }
    }
}
