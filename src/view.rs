use crate::db::{MovieCard, PAGE_SIZE};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

/* ====== Эмодзи ====== */

static GENRE_EMOJIS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("драма", "🎭"),
        ("боевик", "💥"),
        ("комедия", "😂"),
        ("ужасы", "👻"),
        ("хоррор", "👻"),
        ("научная фантастика", "🪐"),
        ("фэнтези", "🐉"),
        ("аниме", "🍥"),
        ("мультфильм", "🐭"),
        ("приключения", "🧭"),
        ("триллер", "😱"),
        ("романтика", "💖"),
        ("мелодрама", "💌"),
        ("документальный", "📚"),
        ("семейный", "👨‍👩‍👧"),
    ])
});

const DEFAULT_GENRE_EMOJI: &str = "🎬";

const DIGIT_EMOJIS: [&str; 10] = ["0️⃣", "1️⃣", "2️⃣", "3️⃣", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣"];

/// id фильма цифровыми эмодзи для админ-списков: 12 -> "1️⃣2️⃣".
pub fn digit_emoji(n: i32) -> String {
    if n < 0 {
        return n.to_string();
    }
    n.to_string()
        .bytes()
        .map(|b| DIGIT_EMOJIS[(b - b'0') as usize])
        .collect()
}

/* ====== Жанры и подписи ====== */

/// Первая буква заглавная (работает и для кириллицы).
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// "драма,фантастика" -> ["драма", "фантастика"]
pub fn split_genres(agg: &str) -> Vec<String> {
    agg.split(',')
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect()
}

/// Жанры с эмодзи и заглавной буквой: "🎭 Драма, 🪐 Научная фантастика".
pub fn format_genres_display(genres: &[String]) -> String {
    let parts: Vec<String> = genres
        .iter()
        .map(|g| g.trim())
        .filter(|g| !g.is_empty())
        .map(|g| {
            let emoji = GENRE_EMOJIS
                .get(g.to_lowercase().as_str())
                .copied()
                .unwrap_or(DEFAULT_GENRE_EMOJI);
            format!("{} {}", emoji, capitalize(g))
        })
        .collect();
    if parts.is_empty() {
        "—".to_string()
    } else {
        parts.join(", ")
    }
}

/// Единый формат подписи под фильмом.
pub fn movie_caption(title: &str, genres: &[String], director: Option<&str>) -> String {
    let mut lines = vec![
        format!("🎬 {}", title),
        String::new(),
        format!("🎞 Жанры: {}", format_genres_display(genres)),
    ];
    if let Some(d) = director.filter(|d| !d.trim().is_empty()) {
        lines.push(format!("🎬 Режиссёр: {}", d));
    }
    lines.join("\n")
}

/// Диплинк на фильм: t.me/<bot>?start=m<id>
pub fn movie_link(bot_username: &str, movie_id: i32) -> String {
    format!("https://t.me/{}?start=m{}", bot_username, movie_id)
}

/// Сообщение по кнопке «Скопировать ссылку» (HTML, кликабельный диплинк).
pub fn copy_link_message(bot_username: &str, movie_id: i32) -> String {
    format!(
        "🔗 <b>Ссылка на фильм:</b> <a href=\"{}\">открыть в Arcanum Movies</a>\n\n\
         Зажмите ссылку, чтобы скопировать её.",
        movie_link(bot_username, movie_id)
    )
}

/// Блок фильма в админ-списке (HTML).
pub fn admin_movie_block(card: &MovieCard, bot_username: &str) -> String {
    let genres_text = if card.genres.is_empty() {
        "—".to_string()
    } else {
        html_escape(&card.genres)
    };
    let mut lines = vec![
        format!("<b>{}</b>", digit_emoji(card.id)),
        format!("<b>file_id:</b> <code>{}</code>", html_escape(&card.file_id)),
        format!("<b>Название:</b> {}", html_escape(&card.title)),
        format!("<b>Жанры:</b> {}", genres_text),
    ];
    if let Some(d) = card.director.as_deref().filter(|d| !d.trim().is_empty()) {
        lines.push(format!("<b>Режиссёр:</b> {}", html_escape(d)));
    }
    lines.push(format!(
        "<b>link:</b> <code>{}</code>",
        movie_link(bot_username, card.id)
    ));
    lines.join("\n")
}

/* ====== Общие мелочи ====== */

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Обрезка по графемам, чтобы не резать эмодзи посередине.
pub fn clip(s: &str, max: usize) -> String {
    let graphemes: Vec<&str> = s.graphemes(true).collect();
    if graphemes.len() <= max {
        s.to_string()
    } else {
        graphemes[..max].concat() + "…"
    }
}

/// Номер последней страницы при PAGE_SIZE записях на страницу.
pub fn max_page(total: i64) -> i64 {
    if total > 0 {
        (total - 1) / PAGE_SIZE
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(genres: &str, director: Option<&str>) -> MovieCard {
        MovieCard {
            id: 12,
            title: "Интерстеллар <3".into(),
            genres: genres.into(),
            director: director.map(|d| d.into()),
            file_id: "BAAC123".into(),
        }
    }

    #[test]
    fn digit_emoji_maps_every_digit() {
        assert_eq!(digit_emoji(7), "7️⃣");
        assert_eq!(digit_emoji(120), "1️⃣2️⃣0️⃣");
    }

    #[test]
    fn genres_display_uses_known_emoji_and_fallback() {
        let out = format_genres_display(&["драма".into(), "вестерн".into()]);
        assert_eq!(out, "🎭 Драма, 🎬 Вестерн");
        assert_eq!(format_genres_display(&[]), "—");
    }

    #[test]
    fn caption_includes_director_only_when_present() {
        let with = movie_caption("Интерстеллар", &["драма".into()], Some("Нолан"));
        assert!(with.contains("🎬 Режиссёр: Нолан"));
        let without = movie_caption("Интерстеллар", &["драма".into()], None);
        assert!(!without.contains("Режиссёр"));
        assert!(without.starts_with("🎬 Интерстеллар\n"));
    }

    #[test]
    fn copy_link_message_is_clickable_anchor() {
        let text = copy_link_message("arcanum_bot", 7);
        assert!(text.contains(
            "<a href=\"https://t.me/arcanum_bot?start=m7\">открыть в Arcanum Movies</a>"
        ));
    }

    #[test]
    fn admin_block_escapes_html_and_has_link() {
        let block = admin_movie_block(&card("драма", Some("Нолан")), "arcanum_bot");
        assert!(block.contains("Интерстеллар &lt;3"));
        assert!(block.contains("<code>BAAC123</code>"));
        assert!(block.contains("https://t.me/arcanum_bot?start=m12"));
        assert!(block.contains("1️⃣2️⃣"));
    }

    #[test]
    fn admin_block_dashes_for_missing_fields() {
        let block = admin_movie_block(&card("", None), "arcanum_bot");
        assert!(block.contains("<b>Жанры:</b> —"));
        assert!(!block.contains("Режиссёр"));
    }

    #[test]
    fn split_genres_ignores_blanks() {
        assert_eq!(split_genres("драма, ,фантастика"), vec!["драма", "фантастика"]);
        assert!(split_genres("").is_empty());
    }

    #[test]
    fn clip_respects_grapheme_boundaries() {
        assert_eq!(clip("abc", 5), "abc");
        assert_eq!(clip("абвгд", 3), "абв…");
        assert_eq!(clip("👨‍👩‍👧xy", 1), "👨‍👩‍👧…");
    }

    #[test]
    fn max_page_arithmetic() {
        assert_eq!(max_page(0), 0);
        assert_eq!(max_page(10), 0);
        assert_eq!(max_page(11), 1);
        assert_eq!(max_page(21), 2);
    }
}
