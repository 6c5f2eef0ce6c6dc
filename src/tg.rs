use crate::callback::CallbackAction;
use crate::config::Config;
use crate::db::{Db, DbError, Genre, Movie, MovieCard, PAGE_SIZE};
use crate::flows::{
    first_active_flow, AddFlow, EditFlow, Pending, CANCELLABLE, FLOW_ADD, FLOW_ADD_GENRE,
    FLOW_EDIT, FLOW_SEARCH,
};
use crate::view;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    prelude::*,
    types::{
        BotCommand, BotCommandScope, CallbackQuery, ChatId, FileId, InlineKeyboardButton,
        InlineKeyboardMarkup, InputFile, KeyboardButton, MessageId, ParseMode,
        KeyboardMarkup as ReplyKeyboardMarkup, User,
    },
    utils::command::BotCommands,
};

/* ====== Команды ====== */

#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case", description = "Команды:")]
enum Command {
    #[command(description = "начать работу с ботом")]
    Start(String),
    #[command(description = "случайный фильм")]
    Random,
    #[command(description = "подбор по жанру")]
    ByGenre,
    #[command(description = "поиск по названию, режиссёру или жанру")]
    Search,
    #[command(description = "история просмотров")]
    History,
    #[command(description = "отменить текущую операцию")]
    Cancel,
    #[command(description = "панель администратора")]
    Admin,
    #[command(description = "добавить фильм (реплаем на файл/видео)")]
    Add,
    #[command(description = "добавить жанр")]
    AddGenre,
    #[command(description = "список жанров / удалить")]
    GenresAdmin,
    #[command(description = "редактировать фильм")]
    Edit,
    #[command(description = "удалить фильм")]
    Delete,
    #[command(description = "ссылки на фильмы")]
    Link(String),
    #[command(description = "список всех фильмов")]
    MoviesAdmin,
}

/// длинные названия в кнопках режем по графемам
const BUTTON_LABEL_MAX: usize = 40;

const BTN_RANDOM: &str = "🔄Рандом";
const BTN_BY_GENRE: &str = "🎥По жанрам";
const BTN_SEARCH: &str = "🔎Поиск";
const BTN_HISTORY: &str = "⌛️История";

pub async fn run(bot: Bot, cfg: Arc<Config>, db: Db) {
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(on_command),
                )
                .branch(dptree::endpoint(on_text)),
        )
        .branch(Update::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![cfg, db])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn on_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    db: Db,
    cfg: Arc<Config>,
) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    match cmd {
        Command::Start(payload) => cmd_start(&bot, &msg, &user, payload.trim(), &db).await,
        Command::Random => send_random(&bot, &msg, &user, &db).await,
        Command::ByGenre => send_genre_menu(&bot, &msg, &db).await,
        Command::Search => begin_search(&bot, &msg, &user, &db).await,
        Command::History => send_history(&bot, &msg, &user, &db).await,
        Command::Cancel => cmd_cancel(&bot, &msg, &user, &db).await,
        Command::Admin => cmd_admin(&bot, &msg, &user, &db, &cfg).await,
        Command::Add => cmd_add(&bot, &msg, &user, &db).await,
        Command::AddGenre => cmd_add_genre(&bot, &msg, &user, &db).await,
        Command::GenresAdmin => cmd_genres_admin(&bot, &msg, &user, &db).await,
        Command::Edit => cmd_edit(&bot, &msg, &user, &db).await,
        Command::Delete => cmd_delete(&bot, &msg, &user, &db).await,
        Command::Link(query) => cmd_link(&bot, &msg, &user, query.trim(), &db, &cfg).await,
        Command::MoviesAdmin => cmd_movies_admin(&bot, &msg, &user, &db, &cfg).await,
    }
}

/* ====== /start и кнопки главного меню ====== */

/// Пейлоад диплинка /start: "m<id>". Id фильма всегда положительный.
fn parse_start_payload(payload: &str) -> Option<i32> {
    let id = payload.strip_prefix('m')?.parse::<i32>().ok()?;
    (id > 0).then_some(id)
}

async fn cmd_start(
    bot: &Bot,
    msg: &Message,
    user: &User,
    payload: &str,
    db: &Db,
) -> ResponseResult<()> {
    // диплинк: /start m123
    if !payload.is_empty() {
        let Some(movie_id) = parse_start_payload(payload) else {
            bot.send_message(msg.chat.id, "Неверная ссылка на фильм.").await?;
            return Ok(());
        };
        let Some(movie) = db.movie_by_id(movie_id).await.map_err(to_req_err)? else {
            bot.send_message(msg.chat.id, "Фильм по этой ссылке не найден.").await?;
            return Ok(());
        };
        return deliver_movie(bot, msg.chat.id, user.id.0 as i64, &movie, db).await;
    }

    let text = [
        "🎬 Добро пожаловать в <b><i>Arcanum Movies</i></b>!",
        "",
        "Я — ваш личный киноархив:",
        "",
        "🔄 <b>Случайный фильм</b> — /random или кнопка «🔄Рандом»",
        "🎥 <b>Подбор по жанру</b> — /by_genre или «🎥По жанрам»",
        "🔎 <b>Поиск</b> по названию, режиссёру или жанру — /search",
        "⌛️ <b>История просмотров</b> — /history",
        "",
        "<i>Если вы администратор — введите</i> /admin, чтобы открыть панель управления.",
    ]
    .join("\n");

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_keyboard())
        .await?;
    Ok(())
}

fn main_keyboard() -> ReplyKeyboardMarkup {
    ReplyKeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(BTN_RANDOM),
            KeyboardButton::new(BTN_BY_GENRE),
        ],
        vec![
            KeyboardButton::new(BTN_SEARCH),
            KeyboardButton::new(BTN_HISTORY),
        ],
    ])
    .resize_keyboard()
}

async fn send_random(bot: &Bot, msg: &Message, user: &User, db: &Db) -> ResponseResult<()> {
    let Some(card) = db.random_movie().await.map_err(to_req_err)? else {
        bot.send_message(msg.chat.id, "Пока нет фильмов в базе.").await?;
        return Ok(());
    };
    deliver_card(bot, msg.chat.id, user.id.0 as i64, &card, db).await
}

async fn send_genre_menu(bot: &Bot, msg: &Message, db: &Db) -> ResponseResult<()> {
    let genres = db.all_genres().await.map_err(to_req_err)?;
    if genres.is_empty() {
        bot.send_message(msg.chat.id, "Жанров пока нет. Сначала добавьте фильмы.")
            .await?;
        return Ok(());
    }
    bot.send_message(msg.chat.id, "Выберите жанр:")
        .reply_markup(genres_keyboard(&genres))
        .await?;
    Ok(())
}

async fn begin_search(bot: &Bot, msg: &Message, user: &User, db: &Db) -> ResponseResult<()> {
    db.set_flow_state(user.id.0 as i64, FLOW_SEARCH, &Pending { active: true })
        .await
        .map_err(to_req_err)?;
    bot.send_message(msg.chat.id, "Введите текст для поиска:").await?;
    Ok(())
}

async fn send_history(bot: &Bot, msg: &Message, user: &User, db: &Db) -> ResponseResult<()> {
    let rows = db
        .user_history(user.id.0 as i64, PAGE_SIZE)
        .await
        .map_err(to_req_err)?;
    if rows.is_empty() {
        bot.send_message(msg.chat.id, "Вы ещё не смотрели фильмы через бота.")
            .await?;
        return Ok(());
    }
    let mut lines = vec![
        "📜 Ваша история просмотров (последние 10):".to_string(),
        String::new(),
    ];
    for (idx, e) in rows.iter().enumerate() {
        let genres = view::split_genres(&e.genres);
        let mut line = format!(
            "{}. {} — {}",
            idx + 1,
            e.title,
            view::format_genres_display(&genres)
        );
        if let Some(d) = e.director.as_deref().filter(|d| !d.trim().is_empty()) {
            line.push_str(&format!(", реж. {}", d));
        }
        line.push_str(&format!(" — {}", e.watched_at.format("%Y-%m-%d %H:%M")));
        lines.push(line);
    }
    bot.send_message(msg.chat.id, lines.join("\n")).await?;
    Ok(())
}

async fn cmd_cancel(bot: &Bot, msg: &Message, user: &User, db: &Db) -> ResponseResult<()> {
    let cleared = db
        .clear_flow_states(user.id.0 as i64, &CANCELLABLE)
        .await
        .map_err(to_req_err)?;
    if cleared > 0 {
        bot.send_message(msg.chat.id, "❌ Текущая операция отменена.").await?;
    } else {
        bot.send_message(msg.chat.id, "Сейчас нечего отменять.").await?;
    }
    Ok(())
}

/* ====== Админ: верификация ====== */

async fn cmd_admin(
    bot: &Bot,
    msg: &Message,
    user: &User,
    db: &Db,
    cfg: &Config,
) -> ResponseResult<()> {
    if user.id.0 != cfg.admin_id {
        bot.send_message(msg.chat.id, "Вы не являетесь администратором этого бота.")
            .await?;
        return Ok(());
    }

    let uid = user.id.0 as i64;
    let first_time = !db.is_admin_verified(uid).await.map_err(to_req_err)?;
    db.set_admin_verified(uid).await.map_err(to_req_err)?;

    // расширенное меню команд только в этом чате
    let commands = vec![
        BotCommand::new("add", "Добавить фильм"),
        BotCommand::new("add_genre", "Добавить жанр"),
        BotCommand::new("genres_admin", "Список жанров / удалить"),
        BotCommand::new("edit", "Редактировать фильм"),
        BotCommand::new("delete", "Удалить фильм"),
        BotCommand::new("link", "Ссылки на фильмы"),
        BotCommand::new("movies_admin", "Список всех фильмов"),
    ];
    bot.set_my_commands(commands)
        .scope(BotCommandScope::Chat {
            chat_id: msg.chat.id.into(),
        })
        .await?;

    let mut lines = vec![if first_time {
        "👑 <b>Добро пожаловать в панель администратора!</b>".to_string()
    } else {
        "👑 <b>Админ-режим уже активен.</b>".to_string()
    }];
    lines.extend(
        [
            "",
            "В меню команд (после <code>/</code>) теперь доступны:",
            "• /add — добавить фильм (в ответ на файл/видео)",
            "• /add_genre — добавить жанр",
            "• /genres_admin — список жанров и удаление",
            "• /edit — редактировать фильм",
            "• /delete — удалить фильм",
            "• /link текст — ссылки на фильмы",
            "• /movies_admin — список всех фильмов",
        ]
        .map(String::from),
    );

    bot.send_message(msg.chat.id, lines.join("\n"))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

async fn is_admin(db: &Db, user: &User) -> ResponseResult<bool> {
    db.is_admin_verified(user.id.0 as i64).await.map_err(to_req_err)
}

/* ====== Админ: добавление фильма и жанра ====== */

async fn cmd_add(bot: &Bot, msg: &Message, user: &User, db: &Db) -> ResponseResult<()> {
    if !is_admin(db, user).await? {
        bot.send_message(msg.chat.id, "У вас нет прав добавлять фильмы. Введите /admin.")
            .await?;
        return Ok(());
    }
    let Some(reply) = msg.reply_to_message() else {
        bot.send_message(
            msg.chat.id,
            "Ответьте командой /add на сообщение с видео или файлом фильма.",
        )
        .await?;
        return Ok(());
    };
    let file_id = reply
        .video()
        .map(|v| v.file.id.clone())
        .or_else(|| reply.document().map(|d| d.file.id.clone()));
    let Some(file_id) = file_id else {
        bot.send_message(
            msg.chat.id,
            "Не вижу видео или файла в сообщении, на которое вы ответили.",
        )
        .await?;
        return Ok(());
    };

    db.set_flow_state(
        user.id.0 as i64,
        FLOW_ADD,
        &AddFlow::WaitingTitle { file_id: file_id.0 },
    )
    .await
    .map_err(to_req_err)?;
    bot.send_message(msg.chat.id, "Окей. Напишите название фильма.").await?;
    Ok(())
}

async fn cmd_add_genre(bot: &Bot, msg: &Message, user: &User, db: &Db) -> ResponseResult<()> {
    if !is_admin(db, user).await? {
        bot.send_message(msg.chat.id, "Доступ только для администратора. Введите /admin.")
            .await?;
        return Ok(());
    }
    db.set_flow_state(user.id.0 as i64, FLOW_ADD_GENRE, &Pending { active: true })
        .await
        .map_err(to_req_err)?;
    bot.send_message(msg.chat.id, "Введите название нового жанра:").await?;
    Ok(())
}

/* ====== Админ: жанры ====== */

async fn cmd_genres_admin(bot: &Bot, msg: &Message, user: &User, db: &Db) -> ResponseResult<()> {
    if !is_admin(db, user).await? {
        bot.send_message(msg.chat.id, "Доступ только для администратора. Введите /admin.")
            .await?;
        return Ok(());
    }
    let genres = db.all_genres().await.map_err(to_req_err)?;
    if genres.is_empty() {
        bot.send_message(msg.chat.id, "Жанров пока нет.").await?;
        return Ok(());
    }

    let mut lines = vec!["Список жанров (id — название):".to_string(), String::new()];
    let mut rows = Vec::new();
    for g in genres.iter() {
        lines.push(format!("{} — {}", g.id, g.name));
        rows.push(vec![InlineKeyboardButton::callback(
            format!("🗑 Удалить «{}»", g.name),
            CallbackAction::GenreDelete { genre_id: g.id }.to_string(),
        )]);
    }
    bot.send_message(msg.chat.id, lines.join("\n"))
        .reply_markup(InlineKeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

/* ====== Админ: списки, редактирование, удаление ====== */

async fn cmd_movies_admin(
    bot: &Bot,
    msg: &Message,
    user: &User,
    db: &Db,
    cfg: &Config,
) -> ResponseResult<()> {
    if !is_admin(db, user).await? {
        bot.send_message(msg.chat.id, "Доступ только для администратора.").await?;
        return Ok(());
    }
    match admin_movies_view(db, 0, &cfg.bot_username).await.map_err(to_req_err)? {
        None => {
            bot.send_message(msg.chat.id, "В базе пока нет фильмов.").await?;
        }
        Some((text, kb)) => {
            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(kb)
                .await?;
        }
    }
    Ok(())
}

async fn cmd_edit(bot: &Bot, msg: &Message, user: &User, db: &Db) -> ResponseResult<()> {
    if !is_admin(db, user).await? {
        bot.send_message(msg.chat.id, "Эта команда доступна только администратору.")
            .await?;
        return Ok(());
    }
    send_picker(bot, msg.chat.id, db, Picker::Edit).await
}

async fn cmd_delete(bot: &Bot, msg: &Message, user: &User, db: &Db) -> ResponseResult<()> {
    if !is_admin(db, user).await? {
        bot.send_message(msg.chat.id, "Эта команда доступна только администратору.")
            .await?;
        return Ok(());
    }
    send_picker(bot, msg.chat.id, db, Picker::Delete).await
}

async fn send_picker(bot: &Bot, chat: ChatId, db: &Db, picker: Picker) -> ResponseResult<()> {
    match picker_view(db, 0, picker).await.map_err(to_req_err)? {
        None => {
            bot.send_message(chat, "В базе пока нет фильмов.").await?;
        }
        Some((text, kb)) => {
            bot.send_message(chat, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(kb)
                .await?;
        }
    }
    Ok(())
}

async fn cmd_link(
    bot: &Bot,
    msg: &Message,
    user: &User,
    query: &str,
    db: &Db,
    cfg: &Config,
) -> ResponseResult<()> {
    if !is_admin(db, user).await? {
        bot.send_message(
            msg.chat.id,
            "Эта команда доступна только администратору. Введите /admin.",
        )
        .await?;
        return Ok(());
    }
    if query.is_empty() {
        bot.send_message(
            msg.chat.id,
            "Использование: /link текст_поиска\nНапример: /link интерстеллар",
        )
        .await?;
        return Ok(());
    }

    let results = db.search_movies(query).await.map_err(to_req_err)?;
    if results.is_empty() {
        bot.send_message(msg.chat.id, "Ничего не найдено по этому запросу.")
            .await?;
        return Ok(());
    }

    const MAX_RESULTS: usize = 15;
    let shown = &results[..results.len().min(MAX_RESULTS)];
    let mut lines = vec![
        format!("🔗 Найдено фильмов: {} (показано {}):", results.len(), shown.len()),
        String::new(),
    ];
    for (idx, card) in shown.iter().enumerate() {
        let link = view::movie_link(&cfg.bot_username, card.id);
        let mut line = format!(
            "{}. {} ({}",
            idx + 1,
            view::html_escape(&card.title),
            view::html_escape(&card.genres)
        );
        if let Some(d) = card.director.as_deref().filter(|d| !d.trim().is_empty()) {
            line.push_str(&format!(", реж. {}", view::html_escape(d)));
        }
        line.push_str(&format!(")\n<a href=\"{}\">Ссылка на фильм 🔗</a>", link));
        lines.push(line);
    }
    if results.len() > MAX_RESULTS {
        lines.push(String::new());
        lines.push("…показаны не все результаты, сузьте запрос.".to_string());
    }
    bot.send_message(msg.chat.id, lines.join("\n"))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/* ====== Текстовые сообщения: кнопки меню и активные диалоги ====== */

async fn on_text(bot: Bot, msg: Message, db: Db) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let Some(text) = msg.text().map(|t| t.to_string()) else {
        return Ok(());
    };

    match text.as_str() {
        BTN_RANDOM => return send_random(&bot, &msg, &user, &db).await,
        BTN_BY_GENRE => return send_genre_menu(&bot, &msg, &db).await,
        BTN_SEARCH => return begin_search(&bot, &msg, &user, &db).await,
        BTN_HISTORY => return send_history(&bot, &msg, &user, &db).await,
        _ => {}
    }
    if text.starts_with('/') {
        return Ok(());
    }

    let uid = user.id.0 as i64;
    let text = text.trim().to_string();

    let active = db.active_flows(uid).await.map_err(to_req_err)?;
    match first_active_flow(&active) {
        Some(FLOW_EDIT) => {
            if let Some(state) = db
                .flow_state::<EditFlow>(uid, FLOW_EDIT)
                .await
                .map_err(to_req_err)?
            {
                return process_edit_input(&bot, &msg, uid, state, &text, &db).await;
            }
        }
        Some(FLOW_ADD_GENRE) => return process_add_genre_name(&bot, &msg, uid, &text, &db).await,
        Some(FLOW_ADD) => {
            if let Some(state) = db
                .flow_state::<AddFlow>(uid, FLOW_ADD)
                .await
                .map_err(to_req_err)?
            {
                return process_add_input(&bot, &msg, uid, state, &text, &db).await;
            }
        }
        Some(FLOW_SEARCH) => return process_search_query(&bot, &msg, uid, &text, &db).await,
        _ => {}
    }
    Ok(())
}

async fn process_add_input(
    bot: &Bot,
    msg: &Message,
    uid: i64,
    state: AddFlow,
    text: &str,
    db: &Db,
) -> ResponseResult<()> {
    match state {
        AddFlow::WaitingTitle { file_id } => {
            db.set_flow_state(
                uid,
                FLOW_ADD,
                &AddFlow::WaitingDirector {
                    file_id,
                    title: text.to_string(),
                },
            )
            .await
            .map_err(to_req_err)?;
            bot.send_message(
                msg.chat.id,
                "Записал название. Теперь напишите режиссёра (можно просто имя или «не знаю»).",
            )
            .await?;
        }
        AddFlow::WaitingDirector { file_id, title } => {
            let genres = db.all_genres().await.map_err(to_req_err)?;
            if genres.is_empty() {
                db.clear_flow_state(uid, FLOW_ADD).await.map_err(to_req_err)?;
                bot.send_message(
                    msg.chat.id,
                    "Пока нет ни одного жанра. Сначала добавьте жанры через /add_genre.",
                )
                .await?;
                return Ok(());
            }
            db.set_flow_state(
                uid,
                FLOW_ADD,
                &AddFlow::ChoosingGenres {
                    file_id,
                    title,
                    director: text.to_string(),
                    selected: Vec::new(),
                },
            )
            .await
            .map_err(to_req_err)?;
            bot.send_message(
                msg.chat.id,
                "Теперь выберите жанры фильма.\nМожно отметить несколько, затем нажмите «✅ Готово».",
            )
            .reply_markup(add_genres_keyboard(&genres, &[]))
            .await?;
        }
        AddFlow::ChoosingGenres { .. } => {
            bot.send_message(
                msg.chat.id,
                "Сейчас идёт выбор жанров.\nПожалуйста, используйте кнопки под сообщением.\n\nЕсли хотите отменить — /cancel.",
            )
            .await?;
        }
    }
    Ok(())
}

async fn process_edit_input(
    bot: &Bot,
    msg: &Message,
    uid: i64,
    state: EditFlow,
    text: &str,
    db: &Db,
) -> ResponseResult<()> {
    match state {
        EditFlow::WaitingTitle {
            movie_id,
            orig_title,
            orig_director,
            orig_genres,
        } => {
            let new_title = if text == "-" {
                orig_title.clone()
            } else {
                text.to_string()
            };
            db.set_flow_state(
                uid,
                FLOW_EDIT,
                &EditFlow::WaitingDirector {
                    movie_id,
                    orig_title,
                    orig_director,
                    orig_genres,
                    new_title,
                },
            )
            .await
            .map_err(to_req_err)?;
            bot.send_message(
                msg.chat.id,
                "Теперь отправьте <b>нового режиссёра</b>,\nили напишите <code>-</code>, чтобы оставить без изменений.\n\nДля отмены в любой момент используйте /cancel.",
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        EditFlow::WaitingDirector {
            movie_id,
            orig_title,
            orig_director,
            orig_genres,
            new_title,
        } => {
            let new_director = if text == "-" {
                orig_director.clone()
            } else {
                text.to_string()
            };
            let genres = db.all_genres().await.map_err(to_req_err)?;
            // стартовый выбор — текущие жанры фильма
            let selected: Vec<i32> = genres
                .iter()
                .filter(|g| orig_genres.contains(&g.name))
                .map(|g| g.id)
                .collect();
            let state = EditFlow::ChoosingGenres {
                movie_id,
                orig_title,
                orig_director,
                orig_genres,
                new_title,
                new_director,
                selected,
            };
            db.set_flow_state(uid, FLOW_EDIT, &state)
                .await
                .map_err(to_req_err)?;
            send_edit_genres_message(bot, msg.chat.id, &state, &genres).await?;
        }
        EditFlow::ChoosingGenres { .. } => {
            bot.send_message(
                msg.chat.id,
                "Сейчас идёт выбор жанров.\nПожалуйста, используйте кнопки под сообщением.\n\nЕсли хотите отменить — /cancel.",
            )
            .await?;
        }
    }
    Ok(())
}

async fn send_edit_genres_message(
    bot: &Bot,
    chat: ChatId,
    state: &EditFlow,
    genres: &[Genre],
) -> ResponseResult<()> {
    let EditFlow::ChoosingGenres {
        new_title,
        orig_genres,
        selected,
        ..
    } = state
    else {
        return Ok(());
    };

    let orig_text = if orig_genres.is_empty() {
        "—".to_string()
    } else {
        orig_genres.join(", ")
    };
    let selected_names: Vec<&str> = genres
        .iter()
        .filter(|g| selected.contains(&g.id))
        .map(|g| g.name.as_str())
        .collect();
    let selected_text = if selected_names.is_empty() {
        "пока ничего не выбрано".to_string()
    } else {
        selected_names.join(", ")
    };

    let text = [
        format!("✏️ Редактирование фильма: {}", new_title),
        String::new(),
        format!("Текущие жанры: {}", orig_text),
        format!("Выбранные жанры: {}", selected_text),
        String::new(),
        "Нажимайте на жанры, чтобы включать и выключать их.".to_string(),
        "Когда закончите — нажмите «✅ Готово».".to_string(),
        "Или «↩️ Оставить жанры без изменений».".to_string(),
        String::new(),
        "Для отмены также можно использовать /cancel.".to_string(),
    ]
    .join("\n");

    bot.send_message(chat, text)
        .reply_markup(edit_genres_keyboard(genres, selected))
        .await?;
    Ok(())
}

async fn process_add_genre_name(
    bot: &Bot,
    msg: &Message,
    uid: i64,
    text: &str,
    db: &Db,
) -> ResponseResult<()> {
    db.clear_flow_state(uid, FLOW_ADD_GENRE)
        .await
        .map_err(to_req_err)?;
    if text.is_empty() {
        bot.send_message(
            msg.chat.id,
            "Название жанра не может быть пустым. Попробуйте снова: /add_genre",
        )
        .await?;
        return Ok(());
    }
    let genre_id = db.get_or_create_genre(text).await.map_err(to_req_err)?;
    bot.send_message(
        msg.chat.id,
        format!("Жанр «{}» сохранён (id={}).", text, genre_id),
    )
    .await?;
    Ok(())
}

async fn process_search_query(
    bot: &Bot,
    msg: &Message,
    uid: i64,
    query: &str,
    db: &Db,
) -> ResponseResult<()> {
    db.clear_flow_state(uid, FLOW_SEARCH).await.map_err(to_req_err)?;
    if query.is_empty() {
        bot.send_message(msg.chat.id, "Пустой запрос. Попробуйте снова: /search.")
            .await?;
        return Ok(());
    }

    let results = db.search_movies(query).await.map_err(to_req_err)?;
    if results.is_empty() {
        bot.send_message(msg.chat.id, "Ничего не найдено 😕").await?;
        return Ok(());
    }

    let mut lines = vec![format!("🔎 Найдено фильмов: {}", results.len()), String::new()];
    let mut rows = Vec::new();
    for card in &results {
        let label = search_result_label(card);
        lines.push(format!("• {}", label));
        rows.push(vec![InlineKeyboardButton::callback(
            view::clip(&label, BUTTON_LABEL_MAX),
            CallbackAction::Movie { movie_id: card.id }.to_string(),
        )]);
    }
    bot.send_message(msg.chat.id, lines.join("\n"))
        .reply_markup(InlineKeyboardMarkup::new(rows))
        .await?;
    Ok(())
}

fn search_result_label(card: &MovieCard) -> String {
    let genres = view::split_genres(&card.genres);
    let mut label = format!("{} — {}", card.title, view::format_genres_display(&genres));
    if let Some(d) = card.director.as_deref().filter(|d| !d.trim().is_empty()) {
        label.push_str(&format!(", реж. {}", d));
    }
    label
}

/* ====== Callback-кнопки ====== */

async fn on_callback(bot: Bot, q: CallbackQuery, db: Db, cfg: Arc<Config>) -> ResponseResult<()> {
    let Some(data) = q.data.clone() else {
        return Ok(());
    };
    let Some(action) = CallbackAction::parse(&data) else {
        return answer_alert(&bot, &q, "Неизвестная команда.").await;
    };
    let Some((chat, msg_id)) = q.message.as_ref().map(|m| (m.chat().id, m.id())) else {
        return answer(&bot, &q).await;
    };
    let uid = q.from.id.0 as i64;

    match action {
        /* --- пользовательский каталог --- */
        CallbackAction::GenrePage { genre_id, page } => {
            show_genre_page(&bot, &q, chat, msg_id, genre_id, page, &db).await?;
        }
        CallbackAction::GenresList => {
            let genres = db.all_genres().await.map_err(to_req_err)?;
            if genres.is_empty() {
                bot.edit_message_text(chat, msg_id, "Жанров пока нет.").await?;
            } else {
                bot.edit_message_text(chat, msg_id, "Выберите жанр:")
                    .reply_markup(genres_keyboard(&genres))
                    .await?;
            }
            answer(&bot, &q).await?;
        }
        CallbackAction::Movie { movie_id } => {
            let Some(movie) = db.movie_by_id(movie_id).await.map_err(to_req_err)? else {
                return answer_alert(&bot, &q, "Фильм не найден.").await;
            };
            deliver_movie(&bot, chat, uid, &movie, &db).await?;
            answer(&bot, &q).await?;
        }
        CallbackAction::CopyLink { movie_id } => {
            if db.movie_by_id(movie_id).await.map_err(to_req_err)?.is_none() {
                return answer_alert(&bot, &q, "Фильм не найден.").await;
            }
            let text = view::copy_link_message(&cfg.bot_username, movie_id);
            bot.send_message(chat, text).parse_mode(ParseMode::Html).await?;
            answer_text(&bot, &q, "Отправил ссылку в сообщении.").await?;
        }

        /* --- диалог добавления: жанры --- */
        CallbackAction::AddGenreToggle { genre_id } => {
            let state = db
                .flow_state::<AddFlow>(uid, FLOW_ADD)
                .await
                .map_err(to_req_err)?;
            let Some(AddFlow::ChoosingGenres {
                file_id,
                title,
                director,
                mut selected,
            }) = state
            else {
                return answer(&bot, &q).await;
            };
            if let Some(pos) = selected.iter().position(|g| *g == genre_id) {
                selected.remove(pos);
            } else {
                selected.push(genre_id);
            }
            let genres = db.all_genres().await.map_err(to_req_err)?;
            let kb = add_genres_keyboard(&genres, &selected);
            db.set_flow_state(
                uid,
                FLOW_ADD,
                &AddFlow::ChoosingGenres {
                    file_id,
                    title,
                    director,
                    selected,
                },
            )
            .await
            .map_err(to_req_err)?;
            bot.edit_message_reply_markup(chat, msg_id).reply_markup(kb).await?;
            answer(&bot, &q).await?;
        }
        CallbackAction::AddGenresDone => {
            let state = db
                .flow_state::<AddFlow>(uid, FLOW_ADD)
                .await
                .map_err(to_req_err)?;
            let Some(AddFlow::ChoosingGenres {
                file_id,
                title,
                director,
                selected,
            }) = state
            else {
                return answer(&bot, &q).await;
            };
            if selected.is_empty() {
                return answer_alert(&bot, &q, "Выберите хотя бы один жанр.").await;
            }
            let director_opt = Some(director.as_str()).filter(|d| !d.trim().is_empty());
            let movie_id = db
                .add_movie(&title, director_opt, &file_id, &selected)
                .await
                .map_err(to_req_err)?;
            db.clear_flow_state(uid, FLOW_ADD).await.map_err(to_req_err)?;

            let genres = db.all_genres().await.map_err(to_req_err)?;
            let names: Vec<&str> = genres
                .iter()
                .filter(|g| selected.contains(&g.id))
                .map(|g| g.name.as_str())
                .collect();
            let mut lines = vec![
                "✅ Фильм добавлен в базу.".to_string(),
                format!("id: {}", movie_id),
                format!("Название: {}", title),
                format!("Жанры: {}", names.join(", ")),
            ];
            if let Some(d) = director_opt {
                lines.push(format!("Режиссёр: {}", d));
            }
            bot.edit_message_text(chat, msg_id, lines.join("\n")).await?;
            answer_text(&bot, &q, "Фильм сохранён.").await?;
        }

        /* --- диалог редактирования: жанры --- */
        CallbackAction::EditGenreToggle { genre_id } => {
            let state = db
                .flow_state::<EditFlow>(uid, FLOW_EDIT)
                .await
                .map_err(to_req_err)?;
            let Some(EditFlow::ChoosingGenres {
                movie_id,
                orig_title,
                orig_director,
                orig_genres,
                new_title,
                new_director,
                mut selected,
            }) = state
            else {
                return answer_alert(&bot, &q, "Сейчас жанры не редактируются.").await;
            };
            if let Some(pos) = selected.iter().position(|g| *g == genre_id) {
                selected.remove(pos);
            } else {
                selected.push(genre_id);
            }
            let genres = db.all_genres().await.map_err(to_req_err)?;
            let kb = edit_genres_keyboard(&genres, &selected);
            db.set_flow_state(
                uid,
                FLOW_EDIT,
                &EditFlow::ChoosingGenres {
                    movie_id,
                    orig_title,
                    orig_director,
                    orig_genres,
                    new_title,
                    new_director,
                    selected,
                },
            )
            .await
            .map_err(to_req_err)?;
            bot.edit_message_reply_markup(chat, msg_id).reply_markup(kb).await?;
            answer(&bot, &q).await?;
        }
        CallbackAction::EditGenresDone => {
            let state = db
                .flow_state::<EditFlow>(uid, FLOW_EDIT)
                .await
                .map_err(to_req_err)?;
            let Some(EditFlow::ChoosingGenres {
                movie_id,
                new_title,
                new_director,
                selected,
                ..
            }) = state
            else {
                return answer_alert(&bot, &q, "Сейчас жанры не редактируются.").await;
            };
            if selected.is_empty() {
                return answer_alert(
                    &bot,
                    &q,
                    "Выберите хотя бы один жанр или нажмите «Оставить жанры без изменений».",
                )
                .await;
            }
            finish_edit(
                &bot, &q, chat, msg_id, uid, movie_id, &new_title, &new_director, &selected,
                false, &db,
            )
            .await?;
        }
        CallbackAction::EditGenresSkip => {
            let state = db
                .flow_state::<EditFlow>(uid, FLOW_EDIT)
                .await
                .map_err(to_req_err)?;
            let Some(EditFlow::ChoosingGenres {
                movie_id,
                orig_genres,
                new_title,
                new_director,
                ..
            }) = state
            else {
                return answer_alert(&bot, &q, "Сейчас жанры не редактируются.").await;
            };
            let mut genre_ids = Vec::with_capacity(orig_genres.len());
            for name in &orig_genres {
                genre_ids.push(db.get_or_create_genre(name).await.map_err(to_req_err)?);
            }
            finish_edit(
                &bot, &q, chat, msg_id, uid, movie_id, &new_title, &new_director, &genre_ids,
                true, &db,
            )
            .await?;
        }
        CallbackAction::EditCancel => {
            let had_state = db
                .flow_state_json(uid, FLOW_EDIT)
                .await
                .map_err(to_req_err)?
                .is_some();
            if !had_state {
                return answer_alert(&bot, &q, "Сейчас нечего отменять.").await;
            }
            db.clear_flow_state(uid, FLOW_EDIT).await.map_err(to_req_err)?;
            bot.edit_message_text(chat, msg_id, "❌ Редактирование отменено.").await?;
            answer(&bot, &q).await?;
        }

        /* --- админ: постраничный выбор фильма --- */
        CallbackAction::EditPage { page } => {
            if !is_admin_cb(&db, &q).await? {
                return answer_alert(&bot, &q, "Нет прав. Введите /admin.").await;
            }
            show_picker_page(&bot, &q, chat, msg_id, page, Picker::Edit, &db).await?;
        }
        CallbackAction::EditPick { movie_id, .. } => {
            if !is_admin_cb(&db, &q).await? {
                return answer_alert(&bot, &q, "Нет прав. Введите /admin.").await;
            }
            let Some(movie) = db.movie_by_id(movie_id).await.map_err(to_req_err)? else {
                return answer_alert(&bot, &q, "Фильм не найден.").await;
            };
            let genres = db.movie_genres(movie_id).await.map_err(to_req_err)?;
            let genres_text = if genres.is_empty() {
                "—".to_string()
            } else {
                genres.join(", ")
            };
            db.set_flow_state(
                uid,
                FLOW_EDIT,
                &EditFlow::WaitingTitle {
                    movie_id,
                    orig_title: movie.title.clone(),
                    orig_director: movie.director.clone().unwrap_or_default(),
                    orig_genres: genres,
                },
            )
            .await
            .map_err(to_req_err)?;

            let mut lines = vec![
                format!("✏️ <b>Редактирование фильма id={}</b>", movie_id),
                format!("Текущее название: <b>{}</b>", view::html_escape(&movie.title)),
                format!("Текущие жанры: {}", view::html_escape(&genres_text)),
            ];
            if let Some(d) = movie.director.as_deref().filter(|d| !d.trim().is_empty()) {
                lines.push(format!("Текущий режиссёр: {}", view::html_escape(d)));
            }
            lines.extend(
                [
                    "",
                    "Отправьте <b>новое название</b> фильма,",
                    "или напишите <code>-</code>, чтобы оставить без изменений.",
                    "",
                    "Для отмены в любой момент напишите /cancel.",
                ]
                .map(String::from),
            );
            bot.edit_message_text(chat, msg_id, lines.join("\n"))
                .parse_mode(ParseMode::Html)
                .await?;
            answer(&bot, &q).await?;
        }
        CallbackAction::DeletePage { page } => {
            if !is_admin_cb(&db, &q).await? {
                return answer_alert(&bot, &q, "Нет прав. Введите /admin.").await;
            }
            show_picker_page(&bot, &q, chat, msg_id, page, Picker::Delete, &db).await?;
        }
        CallbackAction::DeletePick { movie_id, page } => {
            if !is_admin_cb(&db, &q).await? {
                return answer_alert(&bot, &q, "Нет прав. Введите /admin.").await;
            }
            let Some(card) = movie_card(&db, movie_id).await.map_err(to_req_err)? else {
                return answer_alert(&bot, &q, "Фильм не найден (возможно, уже удалён).").await;
            };
            let text = format!(
                "🗑 <b>Подтверждение удаления</b>\n\n{}\n\nУдалить этот фильм?",
                view::admin_movie_block(&card, &cfg.bot_username)
            );
            let kb = InlineKeyboardMarkup::new(vec![vec![
                InlineKeyboardButton::callback(
                    "✅ Да, удалить",
                    CallbackAction::DeleteConfirm { movie_id, page }.to_string(),
                ),
                InlineKeyboardButton::callback(
                    "❌ Отмена",
                    CallbackAction::DeleteAbort { page }.to_string(),
                ),
            ]]);
            bot.edit_message_text(chat, msg_id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(kb)
                .await?;
            answer(&bot, &q).await?;
        }
        CallbackAction::DeleteConfirm { movie_id, page } => {
            if !is_admin_cb(&db, &q).await? {
                return answer_alert(&bot, &q, "Нет прав. Введите /admin.").await;
            }
            if !db.delete_movie(movie_id).await.map_err(to_req_err)? {
                return answer_alert(&bot, &q, "Фильм уже удалён.").await;
            }
            answer_text(&bot, &q, "Фильм удалён.").await?;
            show_picker_page(&bot, &q, chat, msg_id, page, Picker::Delete, &db).await?;
        }
        CallbackAction::DeleteAbort { page } => {
            if !is_admin_cb(&db, &q).await? {
                return answer_alert(&bot, &q, "Нет прав. Введите /admin.").await;
            }
            answer_text(&bot, &q, "Отменено.").await?;
            show_picker_page(&bot, &q, chat, msg_id, page, Picker::Delete, &db).await?;
        }

        /* --- админ: жанры --- */
        CallbackAction::GenreDelete { genre_id } => {
            if !is_admin_cb(&db, &q).await? {
                return answer_alert(&bot, &q, "Нет прав. Введите /admin.").await;
            }
            let Some(name) = db.genre_name(genre_id).await.map_err(to_req_err)? else {
                return answer_alert(&bot, &q, "Жанр уже удалён или не найден.").await;
            };
            if !db.delete_genre(genre_id).await.map_err(to_req_err)? {
                return answer_alert(
                    &bot,
                    &q,
                    &format!("Нельзя удалить жанр «{}»: к нему привязаны фильмы.", name),
                )
                .await;
            }
            answer_alert(&bot, &q, &format!("Жанр «{}» удалён.", name)).await?;
            bot.edit_message_text(
                chat,
                msg_id,
                "Жанр удалён. Обновлённый список: /genres_admin.",
            )
            .await?;
        }

        /* --- админ: общий список фильмов --- */
        CallbackAction::AdminMoviesPage { page } => {
            if !is_admin_cb(&db, &q).await? {
                return answer_alert(&bot, &q, "Нет прав. Введите /admin.").await;
            }
            let total = db.count_all_movies().await.map_err(to_req_err)?;
            if total == 0 {
                bot.edit_message_text(chat, msg_id, "В базе пока нет фильмов.").await?;
                return answer(&bot, &q).await;
            }
            if page < 0 || page > view::max_page(total) {
                return answer_alert(&bot, &q, "Такой страницы нет.").await;
            }
            if let Some((text, kb)) = admin_movies_view(&db, page, &cfg.bot_username)
                .await
                .map_err(to_req_err)?
            {
                bot.edit_message_text(chat, msg_id, text)
                    .parse_mode(ParseMode::Html)
                    .reply_markup(kb)
                    .await?;
            }
            answer(&bot, &q).await?;
        }
        CallbackAction::AdminMoviesGenres => {
            if !is_admin_cb(&db, &q).await? {
                return answer_alert(&bot, &q, "Нет прав. Введите /admin.").await;
            }
            let genres = db.all_genres().await.map_err(to_req_err)?;
            if genres.is_empty() {
                bot.edit_message_text(chat, msg_id, "Жанров пока нет.").await?;
                return answer(&bot, &q).await;
            }
            let mut lines = vec![
                "🎭 <b>Выберите жанр для фильтрации:</b>".to_string(),
                String::new(),
            ];
            let mut rows = Vec::new();
            for g in genres.iter() {
                let count = db.count_movies_by_genre(g.id).await.map_err(to_req_err)?;
                lines.push(format!("{}. {} — {}", g.id, view::capitalize(&g.name), count));
                rows.push(vec![InlineKeyboardButton::callback(
                    view::capitalize(&g.name),
                    CallbackAction::AdminMoviesByGenre {
                        genre_id: g.id,
                        page: 0,
                    }
                    .to_string(),
                )]);
            }
            bot.edit_message_text(chat, msg_id, lines.join("\n"))
                .parse_mode(ParseMode::Html)
                .reply_markup(InlineKeyboardMarkup::new(rows))
                .await?;
            answer(&bot, &q).await?;
        }
        CallbackAction::AdminMoviesByGenre { genre_id, page } => {
            if !is_admin_cb(&db, &q).await? {
                return answer_alert(&bot, &q, "Нет прав. Введите /admin.").await;
            }
            let total = db.count_movies_by_genre(genre_id).await.map_err(to_req_err)?;
            if total == 0 {
                bot.edit_message_text(chat, msg_id, "В этом жанре пока нет фильмов.")
                    .await?;
                return answer(&bot, &q).await;
            }
            if page < 0 || page > view::max_page(total) {
                return answer_alert(&bot, &q, "Такой страницы нет.").await;
            }
            let cards = db
                .movies_by_genre_paged(genre_id, page * PAGE_SIZE, PAGE_SIZE)
                .await
                .map_err(to_req_err)?;
            let genre_name = db
                .genre_name(genre_id)
                .await
                .map_err(to_req_err)?
                .unwrap_or_else(|| "—".to_string());

            let mut lines = vec![
                format!("🎭 <b>Жанр:</b> {}", view::html_escape(&genre_name)),
                format!(
                    "Страница <b>{}</b> из <b>{}</b>",
                    page + 1,
                    view::max_page(total) + 1
                ),
                format!("Фильмов в этом жанре: <b>{}</b>", total),
                String::new(),
            ];
            for card in &cards {
                lines.push(view::admin_movie_block(card, &cfg.bot_username));
                lines.push(String::new());
            }
            bot.edit_message_text(chat, msg_id, lines.join("\n"))
                .parse_mode(ParseMode::Html)
                .reply_markup(admin_nav_keyboard(page, total, Some(genre_id)))
                .await?;
            answer(&bot, &q).await?;
        }
    }
    Ok(())
}

async fn is_admin_cb(db: &Db, q: &CallbackQuery) -> ResponseResult<bool> {
    db.is_admin_verified(q.from.id.0 as i64).await.map_err(to_req_err)
}

#[allow(clippy::too_many_arguments)]
async fn finish_edit(
    bot: &Bot,
    q: &CallbackQuery,
    chat: ChatId,
    msg_id: MessageId,
    uid: i64,
    movie_id: i32,
    new_title: &str,
    new_director: &str,
    genre_ids: &[i32],
    kept_genres: bool,
    db: &Db,
) -> ResponseResult<()> {
    let director_opt = Some(new_director).filter(|d| !d.trim().is_empty());
    let ok = db
        .update_movie(movie_id, new_title, director_opt, genre_ids)
        .await
        .map_err(to_req_err)?;
    db.clear_flow_state(uid, FLOW_EDIT).await.map_err(to_req_err)?;

    if !ok {
        bot.edit_message_text(
            chat,
            msg_id,
            "Ошибка при сохранении изменений. Возможно, фильм был удалён.",
        )
        .await?;
        return answer(bot, q).await;
    }

    let genres = db.all_genres().await.map_err(to_req_err)?;
    let names: Vec<&str> = genres
        .iter()
        .filter(|g| genre_ids.contains(&g.id))
        .map(|g| g.name.as_str())
        .collect();
    let genres_text = if names.is_empty() {
        "—".to_string()
    } else {
        names.join(", ")
    };

    let header = if kept_genres {
        "✅ Фильм обновлён (жанры оставлены без изменений)."
    } else {
        "✅ Фильм обновлён."
    };
    let mut lines = vec![
        header.to_string(),
        format!("id: {}", movie_id),
        format!("Название: {}", new_title),
        format!("Жанры: {}", genres_text),
    ];
    if let Some(d) = director_opt {
        lines.push(format!("Режиссёр: {}", d));
    }
    bot.edit_message_text(chat, msg_id, lines.join("\n")).await?;
    answer_text(bot, q, "Сохранено.").await
}

/* ====== Страницы ====== */

async fn show_genre_page(
    bot: &Bot,
    q: &CallbackQuery,
    chat: ChatId,
    msg_id: MessageId,
    genre_id: i32,
    page: i64,
    db: &Db,
) -> ResponseResult<()> {
    let total = db.count_movies_by_genre(genre_id).await.map_err(to_req_err)?;
    if total == 0 {
        bot.edit_message_text(chat, msg_id, "В этом жанре пока нет фильмов.").await?;
        return answer(bot, q).await;
    }
    let movies = db
        .movies_by_genre(genre_id, page * PAGE_SIZE, PAGE_SIZE)
        .await
        .map_err(to_req_err)?;
    if movies.is_empty() {
        return answer_alert(bot, q, "На этой странице нет фильмов.").await;
    }
    let genre_name = db
        .genre_name(genre_id)
        .await
        .map_err(to_req_err)?
        .unwrap_or_else(|| "—".to_string());
    let max_page = view::max_page(total);

    let text = [
        format!("🎭 Жанр: {}", view::capitalize(&genre_name)),
        format!("Фильмов в жанре: {}", total),
        format!("Страница: {} из {}", page + 1, max_page + 1),
        String::new(),
        "Выберите фильм:".to_string(),
    ]
    .join("\n");

    let mut rows: Vec<Vec<InlineKeyboardButton>> = movies
        .iter()
        .map(|m| {
            vec![InlineKeyboardButton::callback(
                view::clip(&m.title, BUTTON_LABEL_MAX),
                CallbackAction::Movie { movie_id: m.id }.to_string(),
            )]
        })
        .collect();
    let mut nav = Vec::new();
    if page > 0 {
        nav.push(InlineKeyboardButton::callback(
            "⬅️ Назад",
            CallbackAction::GenrePage { genre_id, page: page - 1 }.to_string(),
        ));
    }
    if page < max_page {
        nav.push(InlineKeyboardButton::callback(
            "Вперёд ➡️",
            CallbackAction::GenrePage { genre_id, page: page + 1 }.to_string(),
        ));
    }
    if !nav.is_empty() {
        rows.push(nav);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "📚 Все жанры",
        CallbackAction::GenresList.to_string(),
    )]);

    bot.edit_message_text(chat, msg_id, text)
        .reply_markup(InlineKeyboardMarkup::new(rows))
        .await?;
    answer(bot, q).await
}

/// Постраничный выбор фильма: для редактирования или удаления.
#[derive(Clone, Copy)]
enum Picker {
    Edit,
    Delete,
}

async fn picker_view(
    db: &Db,
    page: i64,
    picker: Picker,
) -> Result<Option<(String, InlineKeyboardMarkup)>, DbError> {
    let total = db.count_all_movies().await?;
    if total == 0 {
        return Ok(None);
    }
    let page = page.clamp(0, view::max_page(total));
    let offset = page * PAGE_SIZE;
    let cards = db.all_movies_paged(offset, PAGE_SIZE).await?;

    let (header, prompt) = match picker {
        Picker::Edit => (
            "✏️ <b>Редактирование фильма</b>",
            "Выберите фильм, который хотите изменить:",
        ),
        Picker::Delete => (
            "🗑 <b>Удаление фильма</b>",
            "Выберите фильм, который хотите удалить:",
        ),
    };
    let mut lines = vec![
        header.to_string(),
        format!(
            "Страница <b>{}</b> из <b>{}</b>",
            page + 1,
            view::max_page(total) + 1
        ),
        format!("Всего фильмов: <b>{}</b>", total),
        String::new(),
        prompt.to_string(),
        String::new(),
    ];

    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    let mut pick_row = Vec::new();
    for (i, card) in cards.iter().enumerate() {
        let num = offset + i as i64 + 1;
        let genres_text = if card.genres.is_empty() { "—" } else { &card.genres };
        lines.push(format!(
            "{}. {} ({})",
            num,
            view::html_escape(&card.title),
            view::html_escape(genres_text)
        ));
        let data = match picker {
            Picker::Edit => CallbackAction::EditPick { movie_id: card.id, page },
            Picker::Delete => CallbackAction::DeletePick { movie_id: card.id, page },
        };
        pick_row.push(InlineKeyboardButton::callback(num.to_string(), data.to_string()));
        if pick_row.len() == 5 {
            rows.push(std::mem::take(&mut pick_row));
        }
    }
    if !pick_row.is_empty() {
        rows.push(pick_row);
    }

    let nav_action = |p: i64| match picker {
        Picker::Edit => CallbackAction::EditPage { page: p },
        Picker::Delete => CallbackAction::DeletePage { page: p },
    };
    let mut nav = Vec::new();
    if page > 0 {
        nav.push(InlineKeyboardButton::callback(
            "⬅️ Назад",
            nav_action(page - 1).to_string(),
        ));
    }
    if page < view::max_page(total) {
        nav.push(InlineKeyboardButton::callback(
            "Вперёд ➡️",
            nav_action(page + 1).to_string(),
        ));
    }
    if !nav.is_empty() {
        rows.push(nav);
    }

    Ok(Some((lines.join("\n"), InlineKeyboardMarkup::new(rows))))
}

async fn show_picker_page(
    bot: &Bot,
    q: &CallbackQuery,
    chat: ChatId,
    msg_id: MessageId,
    page: i64,
    picker: Picker,
    db: &Db,
) -> ResponseResult<()> {
    match picker_view(db, page, picker).await.map_err(to_req_err)? {
        None => {
            bot.edit_message_text(chat, msg_id, "В базе пока нет фильмов.").await?;
        }
        Some((text, kb)) => {
            bot.edit_message_text(chat, msg_id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(kb)
                .await?;
        }
    }
    answer(bot, q).await
}

/// Страница общего админ-списка (/movies_admin и навигация по нему).
async fn admin_movies_view(
    db: &Db,
    page: i64,
    bot_username: &str,
) -> Result<Option<(String, InlineKeyboardMarkup)>, DbError> {
    let total = db.count_all_movies().await?;
    if total == 0 {
        return Ok(None);
    }
    let cards = db.all_movies_paged(page * PAGE_SIZE, PAGE_SIZE).await?;

    let mut lines = vec![
        "🎞 <b>Список всех фильмов</b>".to_string(),
        format!(
            "Страница <b>{}</b> из <b>{}</b>",
            page + 1,
            view::max_page(total) + 1
        ),
        format!("Всего фильмов: <b>{}</b>", total),
        String::new(),
    ];
    for card in &cards {
        lines.push(view::admin_movie_block(card, bot_username));
        lines.push(String::new());
    }
    Ok(Some((lines.join("\n"), admin_nav_keyboard(page, total, None))))
}

fn admin_nav_keyboard(page: i64, total: i64, genre_id: Option<i32>) -> InlineKeyboardMarkup {
    let max_page = view::max_page(total);
    let nav_data = |p: i64| match genre_id {
        None => CallbackAction::AdminMoviesPage { page: p },
        Some(genre_id) => CallbackAction::AdminMoviesByGenre { genre_id, page: p },
    };
    let mut rows = Vec::new();
    let mut nav = Vec::new();
    if page > 0 {
        nav.push(InlineKeyboardButton::callback(
            "⬅️ Назад",
            nav_data(page - 1).to_string(),
        ));
    }
    if page < max_page {
        nav.push(InlineKeyboardButton::callback(
            "Вперёд ➡️",
            nav_data(page + 1).to_string(),
        ));
    }
    if !nav.is_empty() {
        rows.push(nav);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "🎭 Фильтр по жанру",
        CallbackAction::AdminMoviesGenres.to_string(),
    )]);
    InlineKeyboardMarkup::new(rows)
}

/* ====== Клавиатуры ====== */

fn genres_keyboard(genres: &[Genre]) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = genres
        .iter()
        .map(|g| {
            vec![InlineKeyboardButton::callback(
                view::capitalize(&g.name),
                CallbackAction::GenrePage {
                    genre_id: g.id,
                    page: 0,
                }
                .to_string(),
            )]
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

fn add_genres_keyboard(genres: &[Genre], selected: &[i32]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = genres
        .iter()
        .map(|g| {
            let mark = if selected.contains(&g.id) { "✅" } else { "▫️" };
            vec![InlineKeyboardButton::callback(
                format!("{} {}", mark, view::capitalize(&g.name)),
                CallbackAction::AddGenreToggle { genre_id: g.id }.to_string(),
            )]
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "✅ Готово",
        CallbackAction::AddGenresDone.to_string(),
    )]);
    InlineKeyboardMarkup::new(rows)
}

fn edit_genres_keyboard(genres: &[Genre], selected: &[i32]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = genres
        .iter()
        .map(|g| {
            let mark = if selected.contains(&g.id) { "✅" } else { "▫️" };
            vec![InlineKeyboardButton::callback(
                format!("{} {}", mark, view::capitalize(&g.name)),
                CallbackAction::EditGenreToggle { genre_id: g.id }.to_string(),
            )]
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "✅ Готово",
        CallbackAction::EditGenresDone.to_string(),
    )]);
    rows.push(vec![InlineKeyboardButton::callback(
        "↩️ Оставить жанры без изменений",
        CallbackAction::EditGenresSkip.to_string(),
    )]);
    rows.push(vec![InlineKeyboardButton::callback(
        "❌ Отмена",
        CallbackAction::EditCancel.to_string(),
    )]);
    InlineKeyboardMarkup::new(rows)
}

/* ====== Доставка фильма ====== */

async fn deliver_movie(
    bot: &Bot,
    chat: ChatId,
    user_id: i64,
    movie: &Movie,
    db: &Db,
) -> ResponseResult<()> {
    let genres = db.movie_genres(movie.id).await.map_err(to_req_err)?;
    let caption = view::movie_caption(&movie.title, &genres, movie.director.as_deref());
    db.add_watch_history(user_id, movie.id).await.map_err(to_req_err)?;
    send_movie_file(bot, chat, &movie.file_id, caption, movie.id).await
}

async fn deliver_card(
    bot: &Bot,
    chat: ChatId,
    user_id: i64,
    card: &MovieCard,
    db: &Db,
) -> ResponseResult<()> {
    let genres = view::split_genres(&card.genres);
    let caption = view::movie_caption(&card.title, &genres, card.director.as_deref());
    db.add_watch_history(user_id, card.id).await.map_err(to_req_err)?;
    send_movie_file(bot, chat, &card.file_id, caption, card.id).await
}

/// Фильм хранится как file_id видео либо документа: сперва пробуем
/// отправить видео, при ошибке шлём документом.
async fn send_movie_file(
    bot: &Bot,
    chat: ChatId,
    file_id: &str,
    caption: String,
    movie_id: i32,
) -> ResponseResult<()> {
    let file = InputFile::file_id(FileId(file_id.to_string()));
    let kb = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🔗 Скопировать ссылку",
        CallbackAction::CopyLink { movie_id }.to_string(),
    )]]);
    let sent = bot
        .send_video(chat, file.clone())
        .caption(caption.clone())
        .reply_markup(kb.clone())
        .await;
    if sent.is_err() {
        bot.send_document(chat, file).caption(caption).reply_markup(kb).await?;
    }
    Ok(())
}

async fn movie_card(db: &Db, movie_id: i32) -> Result<Option<MovieCard>, DbError> {
    let Some(movie) = db.movie_by_id(movie_id).await? else {
        return Ok(None);
    };
    let genres = db.movie_genres(movie_id).await?;
    Ok(Some(MovieCard {
        id: movie.id,
        title: movie.title,
        genres: genres.join(","),
        director: movie.director,
        file_id: movie.file_id,
    }))
}

/* ====== Ответы на callback ====== */

async fn answer(bot: &Bot, q: &CallbackQuery) -> ResponseResult<()> {
    bot.answer_callback_query(q.id.clone()).await?;
    Ok(())
}

async fn answer_text(bot: &Bot, q: &CallbackQuery, text: &str) -> ResponseResult<()> {
    bot.answer_callback_query(q.id.clone()).text(text).await?;
    Ok(())
}

async fn answer_alert(bot: &Bot, q: &CallbackQuery, text: &str) -> ResponseResult<()> {
    bot.answer_callback_query(q.id.clone())
        .text(text)
        .show_alert(true)
        .await?;
    Ok(())
}

fn to_req_err<E: std::fmt::Display>(e: E) -> teloxide::RequestError {
    teloxide::RequestError::Io(std::sync::Arc::new(std::io::Error::new(
        std::io::ErrorKind::Other,
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    fn genre(id: i32, name: &str) -> Genre {
        Genre {
            id,
            name: name.to_string(),
        }
    }

    fn button_data(kb: &InlineKeyboardMarkup, row: usize, col: usize) -> &str {
        match &kb.inline_keyboard[row][col].kind {
            InlineKeyboardButtonKind::CallbackData(data) => data,
            other => panic!("unexpected button kind: {other:?}"),
        }
    }

    #[test]
    fn start_payload_accepts_only_movie_deep_links() {
        assert_eq!(parse_start_payload("m12"), Some(12));
        assert_eq!(parse_start_payload("m"), None);
        assert_eq!(parse_start_payload("x12"), None);
        assert_eq!(parse_start_payload("m-1"), None);
        assert_eq!(parse_start_payload("m0"), None);
        assert_eq!(parse_start_payload(""), None);
    }

    #[test]
    fn genre_keyboard_points_to_first_page() {
        let kb = genres_keyboard(&[genre(3, "драма"), genre(7, "боевик")]);
        assert_eq!(button_data(&kb, 0, 0), "genre|3|0");
        assert_eq!(button_data(&kb, 1, 0), "genre|7|0");
        assert_eq!(kb.inline_keyboard[0][0].text, "Драма");
    }

    #[test]
    fn add_keyboard_marks_selected_genres() {
        let kb = add_genres_keyboard(&[genre(1, "драма"), genre(2, "ужасы")], &[2]);
        assert_eq!(kb.inline_keyboard[0][0].text, "▫️ Драма");
        assert_eq!(kb.inline_keyboard[1][0].text, "✅ Ужасы");
        assert_eq!(button_data(&kb, 1, 0), "addg|2");
        // последняя строка — «Готово»
        assert_eq!(button_data(&kb, 2, 0), "addg_done");
    }

    #[test]
    fn edit_keyboard_has_done_skip_and_cancel_rows() {
        let kb = edit_genres_keyboard(&[genre(1, "драма")], &[1]);
        let n = kb.inline_keyboard.len();
        assert_eq!(button_data(&kb, n - 3, 0), "editg_done");
        assert_eq!(button_data(&kb, n - 2, 0), "editg_skip");
        assert_eq!(button_data(&kb, n - 1, 0), "editg_cancel");
        assert_eq!(kb.inline_keyboard[0][0].text, "✅ Драма");
    }

    #[test]
    fn admin_nav_hides_unreachable_pages() {
        // одна страница: навигации нет, только фильтр по жанру
        let kb = admin_nav_keyboard(0, 5, None);
        assert_eq!(kb.inline_keyboard.len(), 1);
        assert_eq!(button_data(&kb, 0, 0), "adm_movies_genres");

        // середина: обе стрелки
        let kb = admin_nav_keyboard(1, 25, None);
        assert_eq!(button_data(&kb, 0, 0), "adm_movies|0");
        assert_eq!(button_data(&kb, 0, 1), "adm_movies|2");

        // фильтр по жанру кодирует id жанра
        let kb = admin_nav_keyboard(1, 25, Some(4));
        assert_eq!(button_data(&kb, 0, 0), "adm_movies_g|4|0");
    }

    #[test]
    fn search_label_mentions_director_when_known() {
        let card = MovieCard {
            id: 1,
            title: "Интерстеллар".into(),
            genres: "драма".into(),
            director: Some("Нолан".into()),
            file_id: "BAAC1".into(),
        };
        assert!(search_result_label(&card).contains("реж. Нолан"));
    }
}
