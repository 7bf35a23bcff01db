//! Built-in localization table for the handful of user-visible strings the
//! core emits itself (synthesis fallback, error phrasings).
//!
//! Full localization lives outside the crate; these are the last-resort
//! phrases the planner needs even when no resource bundle is wired in.
//! Unknown language codes fall back to English.

/// Languages with built-in phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    /// English (default).
    En,
    /// Vietnamese.
    Vi,
}

impl Lang {
    /// Resolve a BCP-47-ish language code to a supported language.
    ///
    /// Matches on the primary subtag only (`"vi-VN"` → `Vi`); anything
    /// unrecognised resolves to English.
    pub fn resolve(code: &str) -> Self {
        let primary = code.split(['-', '_']).next().unwrap_or("");
        match primary.to_ascii_lowercase().as_str() {
            "vi" => Self::Vi,
            _ => Self::En,
        }
    }

    /// The canonical code for this language.
    pub fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Vi => "vi",
        }
    }
}

/// Returned when the synthesis pass produced no content at all.
pub fn synthesis_fallback(lang: Lang) -> &'static str {
    match lang {
        Lang::En => "I could not put together an answer from the tool results. Please try rephrasing your question.",
        Lang::Vi => "Tôi chưa tổng hợp được câu trả lời từ kết quả truy vấn. Bạn vui lòng diễn đạt lại câu hỏi.",
    }
}

/// Shown when a tool call failed validation or authorization.
pub fn rejected_phrase(lang: Lang) -> &'static str {
    match lang {
        Lang::En => "The request could not be carried out as asked",
        Lang::Vi => "Yêu cầu không thể thực hiện như đã nêu",
    }
}

/// Shown on internal or contract failures.
pub fn retry_phrase(lang: Lang) -> &'static str {
    match lang {
        Lang::En => "Something went wrong on our side. Please try again.",
        Lang::Vi => "Đã có lỗi phía hệ thống. Bạn vui lòng thử lại.",
    }
}
